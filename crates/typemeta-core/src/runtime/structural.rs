//! Uniqued structural metadata
//!
//! Tuples, functions, metatypes, existential metatypes and protocol
//! compositions have no nominal descriptor, so their metadata is built on
//! first request from the component types and uniqued by those components.
//! All of them share one cache keyed by [`StructuralKey`].

use super::alloc::{allocate_words, leak, leak_c_string};
use super::cache::Lookup;
use super::layout_init::perform_basic_layout;
use super::MetadataRuntime;
use crate::abi::{
    ExistentialTypeFlags, FunctionConvention, FunctionTypeFlags,
    MetadataKind, ParameterFlags, ProtocolClassConstraint, SpecialProtocol,
};
use crate::descriptor::ProtocolDescriptor;
use crate::error::{ReadError, ReadResult};
use crate::existential::{container_witnesses, pointer_container_witnesses};
use crate::metadata::{ExistentialRepresentation, Metadata};
use crate::pointer::reader::IN_PROCESS;
use crate::pointer::Address;
use crate::witness::builtin::{
    self, bitwise_table, METATYPE_WITNESSES, NATIVE_OBJECT_WITNESSES, THICK_FUNCTION_WITNESSES,
    THIN_FUNCTION_WITNESSES,
};
use crate::witness::{
    initialize_buffer_with_copy_of_buffer, ExtraInhabitantsValueWitnessTable, OpaqueValue,
    ValueWitnessTable,
};
use std::mem::size_of;
use tracing::{debug, trace};

const WORD: usize = size_of::<usize>();

/// Identity of a structural type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum StructuralKey {
    Tuple {
        elements: Box<[usize]>,
        labels: Option<Box<str>>,
    },
    Function {
        flags: u32,
        result: usize,
        parameters: Box<[usize]>,
        parameter_flags: Box<[u32]>,
    },
    Metatype(usize),
    ExistentialMetatype(usize),
    Existential {
        protocols: Box<[Address]>,
        superclass: usize,
    },
}

/// Allocate a record with its value witness table in front and `words`
/// after the address point. Returns the address point and the byte size.
fn allocate_record(witnesses: &'static ValueWitnessTable, words: &[usize]) -> (usize, usize) {
    let block = allocate_words(1 + words.len()).as_ptr();
    // SAFETY: the block holds exactly 1 + words.len() words.
    unsafe {
        *block = witnesses as *const ValueWitnessTable as usize;
        std::ptr::copy_nonoverlapping(words.as_ptr(), block.add(1), words.len());
        (block.add(1) as usize, (1 + words.len()) * WORD)
    }
}

fn metadata_address(metadata: &'static Metadata) -> usize {
    metadata as *const Metadata as usize
}

impl MetadataRuntime {
    fn observe_structural(&self, lookup: Lookup) -> &'static Metadata {
        if lookup.created {
            self.counters.record_miss();
        } else {
            trace!(metadata = lookup.value, "structural metadata cache hit");
            self.counters.record_hit();
        }
        // SAFETY: the cache only publishes complete records.
        unsafe { Metadata::from_address(lookup.value as Address) }
    }

    fn structural(
        &self,
        key: StructuralKey,
        build: impl FnOnce() -> (usize, usize),
    ) -> &'static Metadata {
        let lookup = match self.structural.get(&key) {
            Some(value) => Lookup { value, created: false },
            None => self.structural.get_or_insert_with(key, || {
                let (address, bytes) = build();
                self.counters.record_instantiation(bytes);
                address
            }),
        };
        self.observe_structural(lookup)
    }

    fn try_structural(
        &self,
        key: StructuralKey,
        build: impl FnOnce() -> ReadResult<(usize, usize)>,
    ) -> ReadResult<&'static Metadata> {
        let lookup = match self.structural.get(&key) {
            Some(value) => Lookup { value, created: false },
            None => self.structural.get_or_try_insert_with(key, || {
                let (address, bytes) = build()?;
                self.counters.record_instantiation(bytes);
                Ok::<_, ReadError>(address)
            })?,
        };
        Ok(self.observe_structural(lookup))
    }

    /// Canonical metadata of a tuple.
    ///
    /// `labels` is a space-terminated label per element (empty for an
    /// unlabeled one), e.g. `"x  z "`. The unlabeled empty tuple is the
    /// builtin `()`.
    pub fn tuple_metadata(
        &self,
        elements: &[&'static Metadata],
        labels: Option<&str>,
    ) -> &'static Metadata {
        if elements.is_empty() && labels.is_none() {
            return builtin::empty_tuple();
        }
        let key = StructuralKey::Tuple {
            elements: elements.iter().copied().map(metadata_address).collect(),
            labels: labels.map(Into::into),
        };
        self.structural(key, || build_tuple(elements, labels))
    }

    /// Canonical metadata of a function type
    pub fn function_metadata(
        &self,
        flags: FunctionTypeFlags,
        parameters: &[&'static Metadata],
        parameter_flags: &[ParameterFlags],
        result: &'static Metadata,
    ) -> &'static Metadata {
        debug_assert_eq!(
            flags.num_parameters() as usize,
            parameters.len(),
            "parameter count does not match flags"
        );
        debug_assert!(
            !flags.has_parameter_flags() || parameter_flags.len() == parameters.len(),
            "parameter flags missing"
        );
        let parameter_flags: Box<[u32]> = if flags.has_parameter_flags() {
            parameter_flags.iter().map(|f| f.bits()).collect()
        } else {
            Box::new([])
        };
        let key = StructuralKey::Function {
            flags: flags.bits(),
            result: metadata_address(result),
            parameters: parameters.iter().copied().map(metadata_address).collect(),
            parameter_flags: parameter_flags.clone(),
        };
        self.structural(key, || {
            build_function(flags, parameters, &parameter_flags, result)
        })
    }

    /// Canonical metatype of `instance`
    pub fn metatype_metadata(&self, instance: &'static Metadata) -> &'static Metadata {
        let key = StructuralKey::Metatype(metadata_address(instance));
        self.structural(key, || {
            allocate_record(
                &METATYPE_WITNESSES.base,
                &[
                    MetadataKind::Metatype.raw() as usize,
                    metadata_address(instance),
                ],
            )
        })
    }

    /// Canonical existential metatype of an existential type or of another
    /// existential metatype
    pub fn existential_metatype_metadata(&self, instance: &'static Metadata) -> &'static Metadata {
        let flags = match instance.kind() {
            MetadataKind::Existential => word(instance, 1),
            MetadataKind::ExistentialMetatype => word(instance, 2),
            other => {
                debug_assert!(false, "existential metatype of {}", other);
                0
            }
        };
        let flags = ExistentialTypeFlags::from_bits(flags as u32);
        let key = StructuralKey::ExistentialMetatype(metadata_address(instance));
        self.structural(key, || {
            let witnesses =
                pointer_container_witnesses(1 + flags.num_witness_tables() as usize, true);
            allocate_record(
                witnesses,
                &[
                    MetadataKind::ExistentialMetatype.raw() as usize,
                    metadata_address(instance),
                    flags.bits() as usize,
                ],
            )
        })
    }

    /// Canonical metadata of a protocol composition.
    ///
    /// The protocol list is sorted by descriptor address and deduplicated,
    /// so the order the caller names them in does not matter.
    pub fn existential_metadata(
        &self,
        protocols: &[Address],
        superclass: Option<&'static Metadata>,
    ) -> ReadResult<&'static Metadata> {
        let mut sorted = protocols.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let key = StructuralKey::Existential {
            protocols: sorted.clone().into_boxed_slice(),
            superclass: superclass.map_or(0, metadata_address),
        };
        self.try_structural(key, || build_existential(&sorted, superclass))
    }
}

fn word(metadata: &'static Metadata, index: usize) -> usize {
    // SAFETY: callers only index words the record's kind defines.
    unsafe { *(metadata as *const Metadata as *const usize).add(index) }
}

fn build_tuple(elements: &[&'static Metadata], labels: Option<&str>) -> (usize, usize) {
    let layouts: Vec<_> = elements.iter().map(|e| e.type_layout()).collect();
    let basic = perform_basic_layout(&layouts);
    let labels = labels.map_or(0, |text| leak_c_string(text).as_ptr() as usize);

    let pod = basic.layout.flags.is_pod();
    let base = ValueWitnessTable {
        size: basic.layout.size,
        flags: basic.layout.flags,
        stride: basic.layout.stride,
        ..if pod {
            bitwise_table(basic.layout.size, basic.layout.alignment(), true)
        } else {
            ValueWitnessTable {
                initialize_buffer_with_copy_of_buffer,
                destroy: tuple_destroy,
                initialize_with_copy: tuple_initialize_with_copy,
                assign_with_copy: tuple_assign_with_copy,
                initialize_with_take: tuple_initialize_with_take,
                assign_with_take: tuple_assign_with_take,
                size: 0,
                flags: basic.layout.flags,
                stride: 0,
            }
        }
    };
    let witnesses: &'static ValueWitnessTable = if basic.layout.num_extra_inhabitants() > 0 {
        &leak(ExtraInhabitantsValueWitnessTable {
            base,
            extra_inhabitant_flags: basic.layout.extra_inhabitant_flags,
            store_extra_inhabitant: tuple_store_extra_inhabitant,
            get_extra_inhabitant_index: tuple_get_extra_inhabitant_index,
        })
        .base
    } else {
        leak(base)
    };

    let mut words = vec![MetadataKind::Tuple.raw() as usize, elements.len(), labels];
    for (element, offset) in elements.iter().zip(&basic.offsets) {
        words.push(metadata_address(element));
        words.push(*offset);
    }
    let built = allocate_record(witnesses, &words);
    debug!(
        metadata = built.0,
        elements = elements.len(),
        size = basic.layout.size,
        "built tuple metadata"
    );
    built
}

fn build_function(
    flags: FunctionTypeFlags,
    parameters: &[&'static Metadata],
    parameter_flags: &[u32],
    result: &'static Metadata,
) -> (usize, usize) {
    let witnesses: &'static ValueWitnessTable = match flags.convention() {
        FunctionConvention::Thin | FunctionConvention::CFunctionPointer => {
            &THIN_FUNCTION_WITNESSES.base
        }
        FunctionConvention::Block => &NATIVE_OBJECT_WITNESSES.base,
        FunctionConvention::Swift | FunctionConvention::Unknown(_) => {
            &THICK_FUNCTION_WITNESSES.base
        }
    };
    let mut words = vec![
        MetadataKind::Function.raw() as usize,
        flags.bits() as usize,
        metadata_address(result),
    ];
    words.extend(parameters.iter().copied().map(metadata_address));
    if !parameter_flags.is_empty() {
        let flag_words = (parameter_flags.len() * 4).div_ceil(WORD);
        let start = words.len();
        words.resize(start + flag_words, 0);
        // SAFETY: the flag words just reserved hold len * 4 bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(
                parameter_flags.as_ptr(),
                words.as_mut_ptr().add(start) as *mut u32,
                parameter_flags.len(),
            );
        }
    }
    allocate_record(witnesses, &words)
}

fn build_existential(
    protocols: &[Address],
    superclass: Option<&'static Metadata>,
) -> ReadResult<(usize, usize)> {
    let mut class_bound = superclass.is_some();
    let mut tables = 0u32;
    let mut special = SpecialProtocol::None;
    for &protocol in protocols {
        let flags = ProtocolDescriptor::new(&IN_PROCESS, protocol).flags()?;
        class_bound |= flags.class_constraint() == ProtocolClassConstraint::Class;
        if flags.needs_witness_table() {
            tables += 1;
        }
        if protocols.len() == 1 {
            special = flags.special_protocol();
        }
    }
    let flags = ExistentialTypeFlags::new()
        .with_num_witness_tables(tables)
        .with_class_constraint(if class_bound {
            ProtocolClassConstraint::Class
        } else {
            ProtocolClassConstraint::Any
        })
        .with_superclass_constraint(superclass.is_some())
        .with_special_protocol(special);

    let representation = if special == SpecialProtocol::Error {
        ExistentialRepresentation::Error
    } else if class_bound {
        ExistentialRepresentation::Class
    } else {
        ExistentialRepresentation::Opaque
    };
    let witnesses = container_witnesses(representation, tables as usize);

    let mut words = vec![
        MetadataKind::Existential.raw() as usize,
        flags.bits() as usize,
        protocols.len(),
    ];
    words.extend(protocols.iter().map(|&p| p as usize));
    if let Some(superclass) = superclass {
        words.push(metadata_address(superclass));
    }
    let built = allocate_record(witnesses, &words);
    debug!(
        metadata = built.0,
        protocols = protocols.len(),
        witness_tables = tables,
        ?representation,
        "built existential metadata"
    );
    Ok(built)
}

/// Elements of in-process tuple metadata with their offsets
unsafe fn tuple_elements(tuple: *const Metadata) -> impl Iterator<Item = (&'static Metadata, usize)> {
    let words = tuple as *const usize;
    let count = *words.add(1);
    (0..count).map(move |i| {
        (
            &*(*words.add(3 + 2 * i) as *const Metadata),
            *words.add(4 + 2 * i),
        )
    })
}

unsafe fn at(value: *mut OpaqueValue, offset: usize) -> *mut OpaqueValue {
    (value as *mut u8).add(offset) as *mut OpaqueValue
}

unsafe extern "C" fn tuple_destroy(value: *mut OpaqueValue, tuple: *const Metadata) {
    for (element, offset) in tuple_elements(tuple) {
        element.vw_destroy(at(value, offset));
    }
}

unsafe extern "C" fn tuple_initialize_with_copy(
    dest: *mut OpaqueValue,
    src: *mut OpaqueValue,
    tuple: *const Metadata,
) -> *mut OpaqueValue {
    for (element, offset) in tuple_elements(tuple) {
        element.vw_initialize_with_copy(at(dest, offset), at(src, offset));
    }
    dest
}

unsafe extern "C" fn tuple_assign_with_copy(
    dest: *mut OpaqueValue,
    src: *mut OpaqueValue,
    tuple: *const Metadata,
) -> *mut OpaqueValue {
    for (element, offset) in tuple_elements(tuple) {
        element.vw_assign_with_copy(at(dest, offset), at(src, offset));
    }
    dest
}

unsafe extern "C" fn tuple_initialize_with_take(
    dest: *mut OpaqueValue,
    src: *mut OpaqueValue,
    tuple: *const Metadata,
) -> *mut OpaqueValue {
    for (element, offset) in tuple_elements(tuple) {
        element.vw_initialize_with_take(at(dest, offset), at(src, offset));
    }
    dest
}

unsafe extern "C" fn tuple_assign_with_take(
    dest: *mut OpaqueValue,
    src: *mut OpaqueValue,
    tuple: *const Metadata,
) -> *mut OpaqueValue {
    for (element, offset) in tuple_elements(tuple) {
        element.vw_assign_with_take(at(dest, offset), at(src, offset));
    }
    dest
}

// Extra inhabitants come from the first element, which sits at offset 0.

unsafe extern "C" fn tuple_store_extra_inhabitant(
    dest: *mut OpaqueValue,
    index: i32,
    tuple: *const Metadata,
) {
    if let Some((first, _)) = tuple_elements(tuple).next() {
        first.vw_store_extra_inhabitant(dest, index);
    }
}

unsafe extern "C" fn tuple_get_extra_inhabitant_index(
    src: *const OpaqueValue,
    tuple: *const Metadata,
) -> i32 {
    match tuple_elements(tuple).next() {
        Some((first, _)) => first.vw_get_extra_inhabitant_index(src),
        None => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ProtocolDescriptorFlags;
    use crate::config::RuntimeOptions;
    use crate::metadata::{MetadataView, TupleElement};

    fn runtime() -> MetadataRuntime {
        MetadataRuntime::new(RuntimeOptions::default())
    }

    /// Just enough of a protocol descriptor for its flags word to be read
    fn fake_protocol(flags: ProtocolDescriptorFlags) -> Address {
        let words = leak([0usize; 12]);
        let base = words.as_ptr() as *mut u8;
        // SAFETY: the flags word lies inside the 12-word block.
        unsafe { *(base.add(8 * WORD + 4) as *mut u32) = flags.bits() };
        words.as_ptr() as Address
    }

    #[test]
    fn test_tuple_is_uniqued_with_offsets() {
        let runtime = runtime();
        let elements = [builtin::int8(), builtin::int64(), builtin::int16()];
        let first = runtime.tuple_metadata(&elements, Some("a b c "));
        let second = runtime.tuple_metadata(&elements, Some("a b c "));
        assert!(std::ptr::eq(first, second));

        let unlabeled = runtime.tuple_metadata(&elements, None);
        assert!(!std::ptr::eq(first, unlabeled));

        let MetadataView::Tuple(view) = first.view() else {
            panic!("expected tuple metadata");
        };
        let offsets: Vec<u64> = view.elements().unwrap().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(
            view.labels().unwrap(),
            Some(vec!["a".to_owned(), "b".to_owned(), "c".to_owned()])
        );
        assert_eq!(first.vw_size(), 18);
        assert_eq!(first.vw_stride(), 24);
        assert!(first.vw_flags().is_pod());
    }

    #[test]
    fn test_empty_tuple_is_builtin() {
        let runtime = runtime();
        assert!(std::ptr::eq(runtime.tuple_metadata(&[], None), builtin::empty_tuple()));
    }

    #[test]
    fn test_non_pod_tuple_copies_element_wise() {
        let runtime = runtime();
        let tuple = runtime.tuple_metadata(&[builtin::native_object(), builtin::int32()], None);
        assert!(!tuple.vw_flags().is_pod());
        assert!(tuple.extra_inhabitant_witnesses().is_some());

        let mut src: [usize; 2] = [0x10_0000, 77];
        let mut dest: [usize; 2] = [0, 0];
        unsafe {
            tuple.vw_initialize_with_copy(
                dest.as_mut_ptr() as *mut OpaqueValue,
                src.as_mut_ptr() as *mut OpaqueValue,
            );
            assert_eq!(dest[0], 0x10_0000);
            assert_eq!(dest[1] as u32, 77);

            tuple.vw_store_extra_inhabitant(dest.as_mut_ptr() as *mut OpaqueValue, 5);
            assert_eq!(
                tuple.vw_get_extra_inhabitant_index(dest.as_ptr() as *const OpaqueValue),
                5
            );
        }
        let MetadataView::Tuple(view) = tuple.view() else {
            panic!("expected tuple metadata");
        };
        assert_eq!(
            view.element(1).unwrap(),
            TupleElement {
                metadata: builtin::int32().address(),
                offset: WORD as u64
            }
        );
    }

    #[test]
    fn test_function_metadata_keys_on_flags() {
        let runtime = runtime();
        let flags = FunctionTypeFlags::new().with_num_parameters(1);
        let thick = runtime.function_metadata(flags, &[builtin::int64()], &[], builtin::int8());
        assert!(std::ptr::eq(
            thick,
            runtime.function_metadata(flags, &[builtin::int64()], &[], builtin::int8())
        ));
        assert_eq!(thick.vw_size(), 2 * WORD);

        let thin_flags = flags.with_convention(FunctionConvention::Thin);
        let thin = runtime.function_metadata(thin_flags, &[builtin::int64()], &[], builtin::int8());
        assert!(!std::ptr::eq(thick, thin));
        assert_eq!(thin.vw_size(), WORD);

        let with_flags = flags.with_parameter_flags(true);
        let inout = runtime.function_metadata(
            with_flags,
            &[builtin::int64()],
            &[ParameterFlags::IN_OUT],
            builtin::int8(),
        );
        let MetadataView::Function(view) = inout.view() else {
            panic!("expected function metadata");
        };
        assert_eq!(view.parameters().unwrap(), vec![builtin::int64().address()]);
        assert_eq!(view.parameter_flags(0).unwrap(), ParameterFlags::IN_OUT);
        assert_eq!(view.result().unwrap(), builtin::int8().address());
    }

    #[test]
    fn test_metatypes() {
        let runtime = runtime();
        let metatype = runtime.metatype_metadata(builtin::int64());
        assert!(std::ptr::eq(metatype, runtime.metatype_metadata(builtin::int64())));
        assert_eq!(metatype.kind(), MetadataKind::Metatype);
        let MetadataView::Metatype(view) = metatype.view() else {
            panic!("expected metatype");
        };
        assert_eq!(view.instance_type().unwrap(), builtin::int64().address());
    }

    #[test]
    fn test_existential_protocol_order_is_irrelevant() {
        let runtime = runtime();
        let a = fake_protocol(ProtocolDescriptorFlags::native());
        let b = fake_protocol(ProtocolDescriptorFlags::native());
        let ab = runtime.existential_metadata(&[a, b], None).unwrap();
        let ba = runtime.existential_metadata(&[b, a, b], None).unwrap();
        assert!(std::ptr::eq(ab, ba));

        let MetadataView::Existential(view) = ab.view() else {
            panic!("expected existential");
        };
        let mut expected = vec![a, b];
        expected.sort_unstable();
        assert_eq!(view.protocols().unwrap(), expected);
        assert_eq!(view.flags().unwrap().num_witness_tables(), 2);
        assert_eq!(view.representation().unwrap(), ExistentialRepresentation::Opaque);
        assert_eq!(ab.vw_size() as u64, view.container_size().unwrap());

        let metatype = runtime.existential_metatype_metadata(ab);
        let MetadataView::ExistentialMetatype(meta) = metatype.view() else {
            panic!("expected existential metatype");
        };
        assert_eq!(meta.flags().unwrap().num_witness_tables(), 2);
        assert_eq!(metatype.vw_size() as u64, meta.container_size().unwrap());
    }

    #[test]
    fn test_class_bound_and_error_existentials() {
        let runtime = runtime();
        let class_bound = fake_protocol(
            ProtocolDescriptorFlags::native().with_class_constraint(ProtocolClassConstraint::Class),
        );
        let existential = runtime.existential_metadata(&[class_bound], None).unwrap();
        let MetadataView::Existential(view) = existential.view() else {
            panic!("expected existential");
        };
        assert_eq!(view.representation().unwrap(), ExistentialRepresentation::Class);
        assert_eq!(existential.vw_size(), 2 * WORD);

        let error = fake_protocol(
            ProtocolDescriptorFlags::native().with_special_protocol(SpecialProtocol::Error),
        );
        let existential = runtime.existential_metadata(&[error], None).unwrap();
        let MetadataView::Existential(view) = existential.view() else {
            panic!("expected existential");
        };
        assert_eq!(view.representation().unwrap(), ExistentialRepresentation::Error);
        assert_eq!(existential.vw_size(), WORD);
    }
}
