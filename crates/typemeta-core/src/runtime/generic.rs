//! Generic metadata instantiation
//!
//! A [`GenericMetadataPattern`] is the template a compiler emits for a
//! generic nominal type. Instantiating it with an argument vector copies the
//! template into fresh permanent memory, stores the arguments where the fill
//! operations say, installs the class vtable, runs the initializer and
//! publishes the result. The key is the pattern's address plus its key
//! arguments, so each distinct instantiation is built once.

use super::alloc::allocate_words;
use super::MetadataRuntime;
use crate::descriptor::TypeContextDescriptor;
use crate::error::{ReadError, ReadResult};
use crate::metadata::{ClassLayout, ClassMetadata, Metadata, RawMetadata};
use crate::pointer::reader::IN_PROCESS;
use crate::pointer::Address;
use std::mem::size_of;
use tracing::{debug, trace};

const WORD: usize = size_of::<usize>();

/// Store argument `argument` into metadata word `word`.
///
/// Word indices count from the address point. For classes with a resilient
/// superclass they count from the end of the superclass's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillOp {
    /// Index into the argument vector
    pub argument: usize,
    /// Destination word
    pub word: usize,
}

/// Shape of the metadata a pattern produces
#[derive(Debug, Clone, Copy)]
pub enum PatternKind {
    /// Struct or enum metadata: the template is the whole record
    Value,
    /// Class metadata
    Class {
        /// The class's nominal type descriptor
        descriptor: Address,
        /// Superclass metadata, `None` for a root class
        superclass: Option<&'static Metadata>,
        /// Words the class adds after its superclass's metadata. Only read
        /// when the descriptor marks the superclass resilient, in which case
        /// the template is the fixed class header followed by these words.
        immediate_members: usize,
    },
}

/// Hook run on a new instance before it is published
pub type MetadataInitializer = fn(&MetadataRuntime, &'static Metadata, &[usize]);

/// Template for the metadata of a generic type
#[derive(Debug, Clone)]
pub struct GenericMetadataPattern {
    /// Template words, including the prefix before the address point
    pub template: Vec<usize>,
    /// Number of template words before the address point
    pub address_point: usize,
    /// Leading arguments that identify an instantiation
    pub num_key_arguments: usize,
    /// Where the arguments go
    pub fill: Vec<FillOp>,
    /// Value or class
    pub kind: PatternKind,
    /// Completion hook, e.g. layout initialization
    pub initializer: Option<MetadataInitializer>,
}

impl GenericMetadataPattern {
    /// A struct or enum pattern
    pub fn value(template: Vec<usize>, address_point: usize, num_key_arguments: usize) -> Self {
        Self {
            template,
            address_point,
            num_key_arguments,
            fill: Vec::new(),
            kind: PatternKind::Value,
            initializer: None,
        }
    }

    /// A class pattern. With a resilient superclass, `template` is the
    /// prefix and fixed class header followed by `immediate_members` words.
    pub fn class(
        template: Vec<usize>,
        address_point: usize,
        num_key_arguments: usize,
        descriptor: Address,
        superclass: Option<&'static Metadata>,
        immediate_members: usize,
    ) -> Self {
        Self {
            kind: PatternKind::Class {
                descriptor,
                superclass,
                immediate_members,
            },
            ..Self::value(template, address_point, num_key_arguments)
        }
    }

    /// Store argument `argument` at word `word`
    pub fn with_fill(mut self, argument: usize, word: usize) -> Self {
        self.fill.push(FillOp { argument, word });
        self
    }

    /// Set the completion hook
    pub fn with_initializer(mut self, initializer: MetadataInitializer) -> Self {
        self.initializer = Some(initializer);
        self
    }
}

/// Identity of one instantiation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct GenericKey {
    pattern: usize,
    arguments: Box<[usize]>,
}

impl GenericKey {
    fn new(pattern: &'static GenericMetadataPattern, arguments: &[usize]) -> Self {
        Self {
            pattern: pattern as *const GenericMetadataPattern as usize,
            arguments: arguments[..pattern.num_key_arguments].into(),
        }
    }
}

/// A block of metadata under construction
struct MetadataBlock {
    start: *mut usize,
    address_point: usize,
    words: usize,
}

impl MetadataBlock {
    fn allocate(address_point: usize, words_after: usize) -> Self {
        let words = address_point + words_after;
        Self {
            start: allocate_words(words).as_ptr(),
            address_point,
            words,
        }
    }

    fn metadata(&self) -> *mut usize {
        // SAFETY: the address point lies inside the block.
        unsafe { self.start.add(self.address_point) }
    }

    /// Copy `words` to block word `at` (counted from the start)
    fn copy_from(&mut self, at: usize, words: &[usize]) {
        debug_assert!(at + words.len() <= self.words, "template overruns metadata block");
        // SAFETY: bounds checked above, source and block do not overlap.
        unsafe { std::ptr::copy_nonoverlapping(words.as_ptr(), self.start.add(at), words.len()) }
    }

    /// Set the word `index` counted from the address point
    fn set_word(&mut self, index: usize, value: usize) {
        debug_assert!(self.address_point + index < self.words, "metadata word out of range");
        // SAFETY: checked above.
        unsafe { *self.metadata().add(index) = value }
    }

    /// Set a 32-bit field at `offset` bytes from the address point
    fn set_u32(&mut self, offset: u64, value: u32) {
        // SAFETY: class header fields lie inside the block.
        unsafe { *(self.metadata() as *mut u8).add(offset as usize).cast::<u32>() = value }
    }

    fn bytes(&self) -> usize {
        self.words * WORD
    }
}

impl MetadataRuntime {
    /// Canonical metadata for `pattern` applied to `arguments`.
    ///
    /// `arguments` holds at least the pattern's key arguments; they identify
    /// the instance. Concurrent callers for the same instance block until
    /// the first one has built it.
    pub fn instantiate_generic_metadata(
        &self,
        pattern: &'static GenericMetadataPattern,
        arguments: &[usize],
    ) -> ReadResult<&'static Metadata> {
        debug_assert!(
            arguments.len() >= pattern.num_key_arguments,
            "fewer arguments than key arguments"
        );
        let key = GenericKey::new(pattern, arguments);
        if let Some(existing) = self.generic.get(&key) {
            trace!(metadata = existing, "generic metadata cache hit");
            self.counters.record_hit();
            // SAFETY: only published metadata enters the cache.
            return Ok(unsafe { Metadata::from_address(existing as Address) });
        }
        let lookup = self.generic.get_or_try_insert_with(key, || {
            self.build_generic_metadata(pattern, arguments)
        })?;
        if lookup.created {
            self.counters.record_miss();
        } else {
            self.counters.record_hit();
        }
        // SAFETY: the cache publishes complete metadata.
        Ok(unsafe { Metadata::from_address(lookup.value as Address) })
    }

    /// Number of generic instances built or in flight
    pub fn generic_cache_len(&self) -> usize {
        self.generic.len()
    }

    fn build_generic_metadata(
        &self,
        pattern: &'static GenericMetadataPattern,
        arguments: &[usize],
    ) -> ReadResult<usize> {
        let (mut block, adjustment) = match pattern.kind {
            PatternKind::Value => {
                let mut block = MetadataBlock::allocate(
                    pattern.address_point,
                    pattern.template.len() - pattern.address_point,
                );
                block.copy_from(0, &pattern.template);
                (block, 0)
            }
            PatternKind::Class {
                descriptor,
                superclass,
                immediate_members,
            } => allocate_class(pattern, descriptor, superclass, immediate_members)?,
        };

        for op in &pattern.fill {
            block.set_word(adjustment + op.word, arguments[op.argument]);
        }

        if let PatternKind::Class { descriptor, .. } = pattern.kind {
            install_vtable(&mut block, descriptor, adjustment)?;
        }

        // SAFETY: the block now holds a complete record.
        let metadata = unsafe { Metadata::from_address(block.metadata() as Address) };
        if let Some(initializer) = pattern.initializer {
            initializer(self, metadata, arguments);
        }

        self.counters.record_instantiation(block.bytes());
        debug!(
            metadata = metadata.address(),
            kind = %metadata.kind(),
            bytes = block.bytes(),
            "instantiated generic metadata"
        );
        Ok(block.metadata() as usize)
    }
}

/// Allocate and fill the class part of an instance. Returns the block and
/// the word adjustment for the descriptor's static offsets.
fn allocate_class(
    pattern: &GenericMetadataPattern,
    descriptor: Address,
    superclass: Option<&'static Metadata>,
    immediate_members: usize,
) -> ReadResult<(MetadataBlock, usize)> {
    let layout = ClassLayout::native();
    let prefix = pattern.address_point;
    let class_descriptor = TypeContextDescriptor::new(&IN_PROCESS, descriptor);

    let (mut block, adjustment) = match superclass {
        Some(superclass) if class_descriptor.has_resilient_superclass()? => {
            let header_words = (layout.header_end() / WORD as u64) as usize;
            let super_view = ClassMetadata::new(RawMetadata::new(&IN_PROCESS, superclass.address()));
            let super_words = super_view.size_in_words()? as usize;
            if super_words < header_words
                || pattern.template.len() != prefix + header_words + immediate_members
            {
                return Err(ReadError::Malformed {
                    address: descriptor,
                    reason: "resilient class template does not match its superclass",
                });
            }
            let mut block = MetadataBlock::allocate(prefix, super_words + immediate_members);
            block.copy_from(0, &pattern.template[..prefix + header_words]);
            // SAFETY: the superclass reports `super_words` words after its address point.
            let inherited = unsafe {
                std::slice::from_raw_parts(
                    (superclass.address() as usize as *const usize).add(header_words),
                    super_words - header_words,
                )
            };
            block.copy_from(prefix + header_words, inherited);
            block.copy_from(
                prefix + super_words,
                &pattern.template[prefix + header_words..],
            );
            (block, super_words)
        }
        _ => {
            let mut block = MetadataBlock::allocate(prefix, pattern.template.len() - prefix);
            block.copy_from(0, &pattern.template);
            (block, 0)
        }
    };

    let super_address = superclass.map(|s| s.address() as usize).unwrap_or(0);
    block.set_word((layout.superclass() / WORD as u64) as usize, super_address);
    block.set_word((layout.description() / WORD as u64) as usize, descriptor as usize);
    let data_word = (layout.data() / WORD as u64) as usize;
    // SAFETY: reading back a word just copied into the block.
    let data = unsafe { *block.metadata().add(data_word) };
    block.set_word(data_word, data | crate::abi::CLASS_IS_TYPE_METADATA_MASK as usize);
    block.set_u32(layout.class_size(), block.bytes() as u32);
    block.set_u32(layout.class_address_point(), (prefix * WORD) as u32);
    Ok((block, adjustment))
}

/// Write the implementations of the class's own methods into its vtable
fn install_vtable(block: &mut MetadataBlock, descriptor: Address, adjustment: usize) -> ReadResult<()> {
    let descriptor = TypeContextDescriptor::new(&IN_PROCESS, descriptor);
    let Some(header) = descriptor.vtable_header()? else {
        return Ok(());
    };
    for (index, method) in descriptor.method_descriptors()?.into_iter().enumerate() {
        if let Some(implementation) = method.implementation {
            block.set_word(
                adjustment + header.offset as usize + index,
                implementation as usize,
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::MetadataKind;
    use crate::abi::{MethodDescriptorFlags, MethodDescriptorKind};
    use crate::config::RuntimeOptions;
    use crate::emit::{GenericSignature, ImageBuilder, MethodRecord, TypeRecord, VTableRecord};
    use crate::pointer::InProcessReader;
    use crate::witness::builtin::{self, INT64_WITNESSES, NATIVE_OBJECT_WITNESSES};

    fn pair_pattern() -> &'static GenericMetadataPattern {
        let template = vec![
            &INT64_WITNESSES as *const _ as usize,
            MetadataKind::Struct.raw() as usize,
            0,
            0,
            0,
        ];
        Box::leak(Box::new(
            GenericMetadataPattern::value(template, 1, 2)
                .with_fill(0, 2)
                .with_fill(1, 3),
        ))
    }

    #[test]
    fn test_value_instances_are_unique_per_key() {
        let runtime = MetadataRuntime::new(RuntimeOptions::default());
        let pattern = pair_pattern();
        let a = builtin::int8().address() as usize;
        let b = builtin::int32().address() as usize;

        let first = runtime.instantiate_generic_metadata(pattern, &[a, b]).unwrap();
        let again = runtime.instantiate_generic_metadata(pattern, &[a, b]).unwrap();
        let swapped = runtime.instantiate_generic_metadata(pattern, &[b, a]).unwrap();

        assert!(std::ptr::eq(first, again));
        assert!(!std::ptr::eq(first, swapped));
        assert_eq!(first.kind(), MetadataKind::Struct);
        assert_eq!(runtime.generic_cache_len(), 2);

        let words = first as *const Metadata as *const usize;
        assert_eq!(unsafe { *words.add(2) }, a);
        assert_eq!(unsafe { *words.add(3) }, b);
        assert_eq!(first.vw_size(), 8);

        let stats = runtime.stats();
        assert_eq!(stats.instantiations, 2);
        assert_eq!(stats.cache_hits, 1);
    }

    #[test]
    fn test_non_key_arguments_do_not_split_instances() {
        let runtime = MetadataRuntime::new(RuntimeOptions::default());
        let template = vec![
            &INT64_WITNESSES as *const _ as usize,
            MetadataKind::Struct.raw() as usize,
            0,
            0,
            0,
        ];
        let pattern: &'static GenericMetadataPattern = Box::leak(Box::new(
            GenericMetadataPattern::value(template, 1, 1)
                .with_fill(0, 2)
                .with_fill(1, 3),
        ));
        let first = runtime.instantiate_generic_metadata(pattern, &[1, 0x1000]).unwrap();
        let second = runtime.instantiate_generic_metadata(pattern, &[1, 0x2000]).unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_initializer_runs_once_before_publication() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static RUNS: AtomicUsize = AtomicUsize::new(0);

        fn mark(_: &MetadataRuntime, metadata: &'static Metadata, arguments: &[usize]) {
            RUNS.fetch_add(1, Ordering::SeqCst);
            let words = metadata as *const Metadata as *mut usize;
            unsafe { *words.add(2) = arguments[0] + 1 };
        }

        let runtime = MetadataRuntime::new(RuntimeOptions::default());
        let template = vec![
            &INT64_WITNESSES as *const _ as usize,
            MetadataKind::Enum.raw() as usize,
            0,
            0,
        ];
        let pattern: &'static GenericMetadataPattern = Box::leak(Box::new(
            GenericMetadataPattern::value(template, 1, 1).with_initializer(mark),
        ));
        let metadata = runtime.instantiate_generic_metadata(pattern, &[41]).unwrap();
        runtime.instantiate_generic_metadata(pattern, &[41]).unwrap();
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
        assert_eq!(unsafe { *(metadata as *const Metadata as *const usize).add(2) }, 42);
    }

    // ===== Classes =====

    const PREFIX: usize = 2;
    const MEMBERS: usize = 5;
    const FIELD_OFFSETS: [usize; 2] = [16, 24];

    extern "C" fn describe() {}
    extern "C" fn hash() {}

    fn header_words() -> usize {
        (ClassLayout::native().header_end() / WORD as u64) as usize
    }

    fn method(implementation: extern "C" fn()) -> MethodRecord {
        MethodRecord {
            implementation: Some(implementation as usize as Address),
            flags: MethodDescriptorFlags::new(MethodDescriptorKind::Method).with_instance(true),
        }
    }

    /// `Node<T>`: argument at `base`, two field offsets, then two vtable entries
    fn node_descriptor(base: u32, resilient: bool) -> Address {
        let mut image = ImageBuilder::in_process(1024).unwrap();
        let module = image.emit_module("Graph").unwrap();
        let mut record = TypeRecord::class("Node")
            .with_parent(module)
            .with_fields(&["value", "next"], base + 1)
            .with_generic(GenericSignature::new(base, 1))
            .with_vtable(VTableRecord {
                offset: base + 3,
                methods: vec![method(describe), method(hash)],
            });
        if resilient {
            record = record.with_resilient_superclass();
        }
        let descriptor = image.emit_type(&record).unwrap();
        image.finish().unwrap();
        descriptor
    }

    /// A root class object with `extra` words after its fixed header
    fn leak_root_class(extra: usize) -> &'static Metadata {
        let layout = ClassLayout::native();
        let words = header_words() + extra;
        let mut block = vec![0usize; PREFIX + words];
        block[1] = &NATIVE_OBJECT_WITNESSES as *const _ as usize;
        block[PREFIX + (layout.data() / WORD as u64) as usize] =
            crate::abi::CLASS_IS_TYPE_METADATA_MASK as usize;
        for i in 0..extra {
            block[PREFIX + header_words() + i] = 0xAA00 + i;
        }
        let block = Box::leak(block.into_boxed_slice());
        let metadata = unsafe { block.as_mut_ptr().add(PREFIX) };
        unsafe {
            let bytes = metadata as *mut u8;
            *bytes.add(layout.class_size() as usize).cast::<u32>() = ((PREFIX + words) * WORD) as u32;
            *bytes.add(layout.class_address_point() as usize).cast::<u32>() = (PREFIX * WORD) as u32;
            Metadata::from_address(metadata as Address)
        }
    }

    fn class_template(fixed_words: usize) -> Vec<usize> {
        let mut template = vec![0usize; PREFIX + fixed_words];
        template[1] = &NATIVE_OBJECT_WITNESSES as *const _ as usize;
        template.extend_from_slice(&[0, FIELD_OFFSETS[0], FIELD_OFFSETS[1], 0, 0]);
        template
    }

    fn class_view(metadata: &'static Metadata) -> ClassMetadata<'static, InProcessReader> {
        ClassMetadata::new(RawMetadata::new(&IN_PROCESS, metadata.address()))
    }

    fn expected_vtable() -> Vec<Address> {
        vec![describe as usize as Address, hash as usize as Address]
    }

    #[test]
    fn test_class_over_resilient_superclass() {
        let runtime = MetadataRuntime::new(RuntimeOptions::default());
        let inherited = 4;
        let superclass = leak_root_class(inherited);
        let super_words = header_words() + inherited;
        let descriptor = node_descriptor(0, true);
        let pattern: &'static GenericMetadataPattern = Box::leak(Box::new(
            GenericMetadataPattern::class(
                class_template(header_words()),
                PREFIX,
                1,
                descriptor,
                Some(superclass),
                MEMBERS,
            )
            .with_fill(0, 0),
        ));
        let argument = builtin::int64().address() as usize;

        let first = runtime.instantiate_generic_metadata(pattern, &[argument]).unwrap();
        let again = runtime.instantiate_generic_metadata(pattern, &[argument]).unwrap();
        assert!(std::ptr::eq(first, again));
        assert_eq!(first.kind(), MetadataKind::Class);

        let class = class_view(first);
        assert!(class.is_type_metadata().unwrap());
        assert_eq!(class.superclass().unwrap(), Some(superclass.address()));
        assert_eq!(class.description().unwrap(), Some(descriptor));
        assert_eq!(class.class_address_point().unwrap() as usize, PREFIX * WORD);
        assert_eq!(
            class.class_size().unwrap() as usize,
            (PREFIX + super_words + MEMBERS) * WORD
        );
        assert_eq!(class.size_in_words().unwrap() as usize, super_words + MEMBERS);

        let words = first.address() as usize as *const usize;
        for i in 0..inherited {
            assert_eq!(unsafe { *words.add(header_words() + i) }, 0xAA00 + i);
        }
        assert_eq!(unsafe { *words.add(super_words) }, argument);

        assert_eq!(first.generic_arguments().unwrap(), Some(vec![builtin::int64()]));
        assert_eq!(
            class.field_offsets().unwrap(),
            Some(FIELD_OFFSETS.iter().map(|&o| o as u64).collect())
        );
        assert_eq!(class.vtable().unwrap(), expected_vtable());
    }

    #[test]
    fn test_class_with_fixed_layout() {
        let runtime = MetadataRuntime::new(RuntimeOptions::default());
        let base = header_words();
        let descriptor = node_descriptor(base as u32, false);
        let pattern: &'static GenericMetadataPattern = Box::leak(Box::new(
            GenericMetadataPattern::class(class_template(base), PREFIX, 1, descriptor, None, 0)
                .with_fill(0, base),
        ));
        let argument = builtin::int32().address() as usize;

        let first = runtime.instantiate_generic_metadata(pattern, &[argument]).unwrap();
        let again = runtime.instantiate_generic_metadata(pattern, &[argument]).unwrap();
        assert!(std::ptr::eq(first, again));

        let class = class_view(first);
        assert_eq!(class.superclass().unwrap(), None);
        assert_eq!(class.size_in_words().unwrap() as usize, base + MEMBERS);
        assert_eq!(first.generic_arguments().unwrap(), Some(vec![builtin::int32()]));
        assert_eq!(
            class.field_offsets().unwrap(),
            Some(FIELD_OFFSETS.iter().map(|&o| o as u64).collect())
        );
        assert_eq!(class.vtable().unwrap(), expected_vtable());
    }

    #[test]
    fn test_resilient_template_must_match_superclass() {
        let runtime = MetadataRuntime::new(RuntimeOptions::default());
        let superclass = leak_root_class(2);
        let descriptor = node_descriptor(0, true);
        let mut template = class_template(header_words());
        template.pop();
        let pattern: &'static GenericMetadataPattern = Box::leak(Box::new(
            GenericMetadataPattern::class(template, PREFIX, 1, descriptor, Some(superclass), MEMBERS)
                .with_fill(0, 0),
        ));
        let result = runtime.instantiate_generic_metadata(pattern, &[builtin::int8().address() as usize]);
        assert!(matches!(result, Err(ReadError::Malformed { .. })));
        assert_eq!(runtime.stats().instantiations, 0);
    }
}
