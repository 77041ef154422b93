//! Existential containers
//!
//! A value of protocol type is stored in a container whose shape the
//! existential metadata's representation selects:
//!
//! ```text
//! opaque   [ value buffer: 3 words | type | witness tables... ]
//! class    [ object | witness tables... ]
//! error    [ box ] ──> [ type | witness table | value ]
//! metatype [ metatype | witness tables... ]
//! ```
//!
//! The typed containers here fix the witness table count at compile time.
//! The free functions take any container by pointer and read the count and
//! representation from the existential metadata, and back the value
//! witnesses of existential types built by the runtime.

use crate::abi::{
    ExistentialTypeFlags, ExtraInhabitantFlags, ProtocolClassConstraint, SpecialProtocol,
    ValueWitnessFlags, NUM_WORDS_VALUE_BUFFER,
};
use crate::descriptor::WitnessTable;
use crate::metadata::{ExistentialRepresentation, Metadata};
use crate::runtime::alloc::leak;
use crate::witness::builtin::{bitwise_table, NATIVE_OBJECT_WITNESSES};
use crate::witness::inhabitants::{
    get_pointer_extra_inhabitant_index, pointer_extra_inhabitant_count,
    store_pointer_extra_inhabitant,
};
use crate::witness::{
    allocate_in_buffer, destroy_buffer, initialize_buffer_with_copy_of_buffer, project_buffer,
    value_fits_inline, ExtraInhabitantsValueWitnessTable, OpaqueValue, ValueBuffer,
    ValueWitnessTable,
};
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ffi::c_void;
use std::mem::size_of;
use std::ptr::NonNull;

const WORD: usize = size_of::<usize>();

/// Container of an existential with no class constraint
#[repr(C)]
pub struct OpaqueExistentialContainer<const N: usize> {
    /// Inline storage or pointer to out-of-line storage
    pub buffer: ValueBuffer,
    /// Dynamic type of the stored value
    pub metadata: *const Metadata,
    /// One table per protocol that needs one
    pub witness_tables: [*const WitnessTable; N],
}

impl<const N: usize> OpaqueExistentialContainer<N> {
    /// Wrap a copy of `value`
    ///
    /// # Safety
    ///
    /// `value` must be an initialized value of `metadata`'s type.
    pub unsafe fn with_copy_of(
        value: *mut OpaqueValue,
        metadata: &'static Metadata,
        witness_tables: [*const WitnessTable; N],
    ) -> Self {
        let mut container = Self {
            buffer: ValueBuffer::new(),
            metadata,
            witness_tables,
        };
        let storage = allocate_in_buffer(&mut container.buffer, metadata);
        metadata.vw_initialize_with_copy(storage, value);
        container
    }

    /// Dynamic type of the stored value
    pub fn dynamic_type(&self) -> &'static Metadata {
        // SAFETY: a container always records the type it holds.
        unsafe { &*self.metadata }
    }

    /// The stored value
    pub fn project_value(&mut self) -> *mut OpaqueValue {
        // SAFETY: the buffer holds a value of the recorded type.
        unsafe { project_buffer(&mut self.buffer, self.dynamic_type()) }
    }

    /// Destroy the stored value and free its storage
    ///
    /// # Safety
    ///
    /// The container must not be used afterwards.
    pub unsafe fn destroy(&mut self) {
        destroy_buffer(&mut self.buffer, self.dynamic_type());
    }

    /// The container as an opaque value, for value witness calls
    pub fn as_opaque(&mut self) -> *mut OpaqueValue {
        self as *mut Self as *mut OpaqueValue
    }
}

/// Container of a class-bounded existential
#[repr(C)]
pub struct ClassExistentialContainer<const N: usize> {
    /// The object
    pub value: *mut c_void,
    /// One table per protocol that needs one
    pub witness_tables: [*const WitnessTable; N],
}

/// Container of an existential metatype
#[repr(C)]
pub struct ExistentialMetatypeContainer<const N: usize> {
    /// The metatype
    pub metatype: *const Metadata,
    /// One table per protocol that needs one
    pub witness_tables: [*const WitnessTable; N],
}

/// Header of the box an error existential points to. The value follows,
/// aligned for its type.
#[repr(C)]
pub struct ErrorBox {
    /// Type of the boxed value
    pub metadata: *const Metadata,
    /// Its conformance to the error protocol
    pub witness_table: *const WitnessTable,
}

fn error_box_layout(metadata: &Metadata) -> (Layout, usize) {
    let witnesses = metadata.value_witnesses();
    let alignment = witnesses.alignment().max(WORD);
    let value_offset =
        (size_of::<ErrorBox>() + witnesses.alignment() - 1) & !(witnesses.alignment() - 1);
    let size = value_offset + witnesses.size;
    match Layout::from_size_align(size, alignment) {
        Ok(layout) => (layout, value_offset),
        Err(_) => handle_alloc_error(Layout::new::<ErrorBox>()),
    }
}

impl ErrorBox {
    /// Allocate a box for a value of `metadata`'s type. Returns the box and
    /// its uninitialized value storage.
    pub fn allocate(
        metadata: &'static Metadata,
        witness_table: *const WitnessTable,
    ) -> (NonNull<ErrorBox>, *mut OpaqueValue) {
        let (layout, value_offset) = error_box_layout(metadata);
        // SAFETY: the layout is never zero-sized.
        let block = unsafe { alloc(layout) };
        let Some(block) = NonNull::new(block) else {
            handle_alloc_error(layout);
        };
        let header = block.cast::<ErrorBox>();
        // SAFETY: freshly allocated for this header and value.
        unsafe {
            header.as_ptr().write(ErrorBox {
                metadata,
                witness_table,
            });
            (header, block.as_ptr().add(value_offset) as *mut OpaqueValue)
        }
    }

    /// Type of the boxed value
    pub fn dynamic_type(&self) -> &'static Metadata {
        // SAFETY: set at allocation.
        unsafe { &*self.metadata }
    }

    /// The boxed value
    pub fn value(&self) -> *mut OpaqueValue {
        let (_, value_offset) = error_box_layout(self.dynamic_type());
        // SAFETY: the value lives `value_offset` bytes into the box.
        unsafe { (self as *const Self as *mut u8).add(value_offset) as *mut OpaqueValue }
    }

    /// Destroy the value and free the box
    ///
    /// # Safety
    ///
    /// `boxed` must come from [`ErrorBox::allocate`] with an initialized
    /// value, and must not be used afterwards.
    pub unsafe fn destroy(boxed: NonNull<ErrorBox>) {
        let metadata = boxed.as_ref().dynamic_type();
        metadata.vw_destroy(boxed.as_ref().value());
        let (layout, _) = error_box_layout(metadata);
        dealloc(boxed.as_ptr() as *mut u8, layout);
    }
}

/// Flags of in-process existential metadata
fn existential_flags(existential: &Metadata) -> ExistentialTypeFlags {
    // SAFETY: word 1 of existential metadata is its flags word.
    let word = unsafe { *(existential as *const Metadata as *const usize).add(1) };
    ExistentialTypeFlags::from_bits(word as u32)
}

/// Representation of an existential type
pub fn representation(existential: &Metadata) -> ExistentialRepresentation {
    let flags = existential_flags(existential);
    if flags.special_protocol() == SpecialProtocol::Error {
        ExistentialRepresentation::Error
    } else if flags.class_constraint() == ProtocolClassConstraint::Class {
        ExistentialRepresentation::Class
    } else {
        ExistentialRepresentation::Opaque
    }
}

/// Word index of the first witness table in a container
fn first_witness_table_word(representation: ExistentialRepresentation) -> usize {
    match representation {
        ExistentialRepresentation::Opaque => NUM_WORDS_VALUE_BUFFER + 1,
        ExistentialRepresentation::Class => 1,
        ExistentialRepresentation::Error => 0,
    }
}

/// The value stored in an existential container
///
/// # Safety
///
/// `container` must be an initialized container of `existential`'s type.
pub unsafe fn project_value(container: *mut OpaqueValue, existential: &Metadata) -> *mut OpaqueValue {
    match representation(existential) {
        ExistentialRepresentation::Opaque => {
            let buffer = container as *mut ValueBuffer;
            let metadata = *(container as *const *const Metadata).add(NUM_WORDS_VALUE_BUFFER);
            project_buffer(buffer, &*metadata)
        }
        ExistentialRepresentation::Class => container,
        ExistentialRepresentation::Error => {
            let boxed = *(container as *const *const ErrorBox);
            (*boxed).value()
        }
    }
}

/// Dynamic type of the value in an existential container
///
/// # Safety
///
/// `container` must be an initialized container of `existential`'s type.
/// For class-bounded containers the object must start with its isa word.
pub unsafe fn dynamic_type(container: *const OpaqueValue, existential: &Metadata) -> &'static Metadata {
    match representation(existential) {
        ExistentialRepresentation::Opaque => {
            &**(container as *const *const Metadata).add(NUM_WORDS_VALUE_BUFFER)
        }
        ExistentialRepresentation::Class => {
            let object = *(container as *const *const *const Metadata);
            &**object
        }
        ExistentialRepresentation::Error => {
            let boxed = *(container as *const *const ErrorBox);
            (*boxed).dynamic_type()
        }
    }
}

/// Witness table `index` of an existential container
///
/// # Safety
///
/// `container` must be an initialized container of `existential`'s type.
pub unsafe fn witness_table(
    container: *const OpaqueValue,
    existential: &Metadata,
    index: usize,
) -> *const WitnessTable {
    let representation = representation(existential);
    debug_assert!(
        index < existential_flags(existential).num_witness_tables() as usize,
        "witness table index out of range"
    );
    if representation == ExistentialRepresentation::Error {
        let boxed = *(container as *const *const ErrorBox);
        return (*boxed).witness_table;
    }
    *(container as *const *const WitnessTable).add(first_witness_table_word(representation) + index)
}

/// Byte size of an opaque container with `tables` witness tables
pub const fn opaque_container_size(tables: usize) -> usize {
    (NUM_WORDS_VALUE_BUFFER + 1 + tables) * WORD
}

/// Words of an opaque container after its value buffer
unsafe fn opaque_tail_words(existential: *const Metadata) -> usize {
    1 + existential_flags(&*existential).num_witness_tables() as usize
}

unsafe extern "C" fn opaque_destroy(value: *mut OpaqueValue, _existential: *const Metadata) {
    let metadata = *(value as *const *const Metadata).add(NUM_WORDS_VALUE_BUFFER);
    destroy_buffer(value as *mut ValueBuffer, &*metadata);
}

unsafe extern "C" fn opaque_initialize_with_copy(
    dest: *mut OpaqueValue,
    src: *mut OpaqueValue,
    existential: *const Metadata,
) -> *mut OpaqueValue {
    let tail = opaque_tail_words(existential);
    std::ptr::copy_nonoverlapping(
        (src as *const usize).add(NUM_WORDS_VALUE_BUFFER),
        (dest as *mut usize).add(NUM_WORDS_VALUE_BUFFER),
        tail,
    );
    let metadata = *(src as *const *const Metadata).add(NUM_WORDS_VALUE_BUFFER);
    initialize_buffer_with_copy_of_buffer(dest as *mut ValueBuffer, src as *mut ValueBuffer, metadata);
    dest
}

unsafe extern "C" fn opaque_assign_with_copy(
    dest: *mut OpaqueValue,
    src: *mut OpaqueValue,
    existential: *const Metadata,
) -> *mut OpaqueValue {
    if dest == src {
        return dest;
    }
    opaque_destroy(dest, existential);
    opaque_initialize_with_copy(dest, src, existential)
}

unsafe extern "C" fn opaque_initialize_with_take(
    dest: *mut OpaqueValue,
    src: *mut OpaqueValue,
    existential: *const Metadata,
) -> *mut OpaqueValue {
    let words = NUM_WORDS_VALUE_BUFFER + opaque_tail_words(existential);
    std::ptr::copy_nonoverlapping(src as *const usize, dest as *mut usize, words);
    dest
}

unsafe extern "C" fn opaque_assign_with_take(
    dest: *mut OpaqueValue,
    src: *mut OpaqueValue,
    existential: *const Metadata,
) -> *mut OpaqueValue {
    if dest == src {
        return dest;
    }
    opaque_destroy(dest, existential);
    opaque_initialize_with_take(dest, src, existential)
}

/// Value witnesses of an existential container
pub(crate) fn container_witnesses(
    representation: ExistentialRepresentation,
    tables: usize,
) -> &'static ValueWitnessTable {
    match representation {
        ExistentialRepresentation::Opaque => {
            let size = opaque_container_size(tables);
            leak(ValueWitnessTable {
                initialize_buffer_with_copy_of_buffer,
                destroy: opaque_destroy,
                initialize_with_copy: opaque_initialize_with_copy,
                assign_with_copy: opaque_assign_with_copy,
                initialize_with_take: opaque_initialize_with_take,
                assign_with_take: opaque_assign_with_take,
                size,
                flags: ValueWitnessFlags::new()
                    .with_alignment(WORD)
                    .with_pod(false)
                    .with_inline_storage(value_fits_inline(size, WORD)),
                stride: size,
            })
        }
        ExistentialRepresentation::Class => pointer_container_witnesses(1 + tables, false),
        ExistentialRepresentation::Error => &NATIVE_OBJECT_WITNESSES.base,
    }
}

/// Value witnesses of a container led by a pointer with `words` words in
/// total: class existentials and existential metatypes
pub(crate) fn pointer_container_witnesses(words: usize, pod: bool) -> &'static ValueWitnessTable {
    let mut base = bitwise_table(words * WORD, WORD, pod);
    base.flags = base.flags.with_extra_inhabitants(true);
    let table = leak(ExtraInhabitantsValueWitnessTable {
        base,
        extra_inhabitant_flags: ExtraInhabitantFlags::new()
            .with_num_extra_inhabitants(pointer_extra_inhabitant_count()),
        store_extra_inhabitant: store_pointer_extra_inhabitant,
        get_extra_inhabitant_index: get_pointer_extra_inhabitant_index,
    });
    &table.base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::MetadataKind;
    use crate::witness::builtin;

    #[repr(C)]
    struct FakeExistential {
        witnesses: &'static ValueWitnessTable,
        kind: usize,
        flags: usize,
        num_protocols: usize,
    }

    fn existential(flags: ExistentialTypeFlags) -> &'static Metadata {
        let record = leak(FakeExistential {
            witnesses: &builtin::INT64_WITNESSES,
            kind: MetadataKind::Existential.raw() as usize,
            flags: flags.bits() as usize,
            num_protocols: 0,
        });
        unsafe { &*(&record.kind as *const usize as *const Metadata) }
    }

    #[test]
    fn test_opaque_round_trip_inline() {
        let any = existential(
            ExistentialTypeFlags::new()
                .with_class_constraint(ProtocolClassConstraint::Any)
                .with_num_witness_tables(1),
        );
        let table = 0x5000 as *const WitnessTable;
        let mut value: u64 = 0xDEAD_BEEF;
        let mut container = unsafe {
            OpaqueExistentialContainer::<1>::with_copy_of(
                &mut value as *mut u64 as *mut OpaqueValue,
                builtin::int64(),
                [table],
            )
        };
        let opaque = container.as_opaque();
        unsafe {
            assert!(std::ptr::eq(dynamic_type(opaque, any), builtin::int64()));
            assert_eq!(witness_table(opaque, any, 0), table);
            let stored = project_value(opaque, any) as *const u64;
            assert_eq!(*stored, 0xDEAD_BEEF);
            assert_eq!(stored as usize, opaque as usize);
        }
    }

    #[test]
    fn test_opaque_container_witnesses_copy_out_of_line_values() {
        let any = existential(
            ExistentialTypeFlags::new()
                .with_class_constraint(ProtocolClassConstraint::Any)
                .with_num_witness_tables(0),
        );
        let witnesses = container_witnesses(ExistentialRepresentation::Opaque, 0);
        assert_eq!(witnesses.size, opaque_container_size(0));
        assert!(!witnesses.is_pod());

        let mut value = [7u64; 8];
        let mut src = unsafe {
            OpaqueExistentialContainer::<0>::with_copy_of(
                value.as_mut_ptr() as *mut OpaqueValue,
                builtin::int512(),
                [],
            )
        };
        let mut dest = OpaqueExistentialContainer::<0> {
            buffer: ValueBuffer::new(),
            metadata: std::ptr::null(),
            witness_tables: [],
        };
        unsafe {
            (witnesses.initialize_with_copy)(dest.as_opaque(), src.as_opaque(), any);
            let copied = project_value(dest.as_opaque(), any) as *const [u64; 8];
            let original = project_value(src.as_opaque(), any) as *const [u64; 8];
            assert_ne!(copied, original);
            assert_eq!(*copied, [7u64; 8]);
            (witnesses.destroy)(dest.as_opaque(), any);
            src.destroy();
        }
    }

    #[test]
    fn test_error_box_holds_value_and_table() {
        let error = existential(
            ExistentialTypeFlags::new()
                .with_class_constraint(ProtocolClassConstraint::Any)
                .with_special_protocol(SpecialProtocol::Error)
                .with_num_witness_tables(1),
        );
        assert_eq!(representation(error), ExistentialRepresentation::Error);
        let table = 0x6000 as *const WitnessTable;
        let (boxed, storage) = ErrorBox::allocate(builtin::int32(), table);
        unsafe {
            *(storage as *mut u32) = 404;
            let mut container = boxed.as_ptr() as usize;
            let opaque = &mut container as *mut usize as *mut OpaqueValue;
            assert!(std::ptr::eq(dynamic_type(opaque, error), builtin::int32()));
            assert_eq!(witness_table(opaque, error, 0), table);
            assert_eq!(*(project_value(opaque, error) as *const u32), 404);
            ErrorBox::destroy(boxed);
        }
    }

    #[test]
    fn test_class_container_layout() {
        let class_bound = existential(
            ExistentialTypeFlags::new()
                .with_class_constraint(ProtocolClassConstraint::Class)
                .with_num_witness_tables(2),
        );
        let witnesses = container_witnesses(ExistentialRepresentation::Class, 2);
        assert_eq!(witnesses.size, 3 * WORD);
        assert!(witnesses.extra_inhabitants().is_some());

        let isa = builtin::native_object() as *const Metadata;
        let mut object = [isa as usize, 0];
        let mut container = ClassExistentialContainer::<2> {
            value: object.as_mut_ptr() as *mut c_void,
            witness_tables: [0x100 as *const WitnessTable, 0x200 as *const WitnessTable],
        };
        let opaque = &mut container as *mut ClassExistentialContainer<2> as *mut OpaqueValue;
        unsafe {
            assert!(std::ptr::eq(dynamic_type(opaque, class_bound), builtin::native_object()));
            assert_eq!(witness_table(opaque, class_bound, 1), 0x200 as *const WitnessTable);
        }
    }
}
