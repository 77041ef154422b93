//! Standard value witness tables and builtin metadata
//!
//! Builtin integer types of every power-of-two size share one set of bitwise
//! witnesses that read the size from the metadata they are called with.
//! Pointer-represented types (heap objects, raw pointers, functions,
//! metatypes) add the pointer extra inhabitants.
//!
//! Reference counting is not modeled: copying a heap object reference copies
//! the word, destroying it does nothing.

use super::inhabitants::{
    get_pointer_extra_inhabitant_index, pointer_extra_inhabitant_count,
    store_pointer_extra_inhabitant,
};
use super::{
    initialize_buffer_with_copy_of_buffer, stride_for, value_fits_inline,
    ExtraInhabitantsValueWitnessTable, OpaqueValue, ValueWitnessTable,
};
use crate::abi::{ExtraInhabitantFlags, MetadataKind, ValueWitnessFlags};
use crate::metadata::Metadata;
use std::mem::size_of;

const WORD: usize = size_of::<usize>();

/// `destroy` witness of types with trivial destruction
///
/// # Safety
///
/// Always safe to call; declared unsafe to match the witness signature.
pub unsafe extern "C" fn trivial_destroy(_value: *mut OpaqueValue, _metadata: *const Metadata) {}

/// Copy, take and assign witness of bitwise-copyable types
///
/// # Safety
///
/// `dest` and `src` must be valid for `size` bytes of `metadata`'s type.
pub unsafe extern "C" fn bitwise_copy(
    dest: *mut OpaqueValue,
    src: *mut OpaqueValue,
    metadata: *const Metadata,
) -> *mut OpaqueValue {
    let size = (*metadata).value_witnesses().size;
    std::ptr::copy(src as *const u8, dest as *mut u8, size);
    dest
}

/// A table of bitwise witnesses for a type of the given shape
pub const fn bitwise_table(size: usize, alignment: usize, pod: bool) -> ValueWitnessTable {
    ValueWitnessTable {
        initialize_buffer_with_copy_of_buffer,
        destroy: trivial_destroy,
        initialize_with_copy: bitwise_copy,
        assign_with_copy: bitwise_copy,
        initialize_with_take: bitwise_copy,
        assign_with_take: bitwise_copy,
        size,
        flags: ValueWitnessFlags::new()
            .with_alignment(alignment)
            .with_pod(pod)
            .with_inline_storage(value_fits_inline(size, alignment)),
        stride: stride_for(size, alignment),
    }
}

const fn pointer_table(words: usize, pod: bool) -> ExtraInhabitantsValueWitnessTable {
    let mut base = bitwise_table(words * WORD, WORD, pod);
    base.flags = base.flags.with_extra_inhabitants(true);
    ExtraInhabitantsValueWitnessTable {
        base,
        extra_inhabitant_flags: ExtraInhabitantFlags::new()
            .with_num_extra_inhabitants(pointer_extra_inhabitant_count()),
        store_extra_inhabitant: store_pointer_extra_inhabitant,
        get_extra_inhabitant_index: get_pointer_extra_inhabitant_index,
    }
}

const fn integer_alignment(size: usize) -> usize {
    if size > 16 {
        16
    } else {
        size
    }
}

/// 8-bit integer
pub static INT8_WITNESSES: ValueWitnessTable = bitwise_table(1, 1, true);
/// 16-bit integer
pub static INT16_WITNESSES: ValueWitnessTable = bitwise_table(2, 2, true);
/// 32-bit integer
pub static INT32_WITNESSES: ValueWitnessTable = bitwise_table(4, 4, true);
/// 64-bit integer
pub static INT64_WITNESSES: ValueWitnessTable = bitwise_table(8, 8, true);
/// 128-bit integer
pub static INT128_WITNESSES: ValueWitnessTable = bitwise_table(16, integer_alignment(16), true);
/// 256-bit integer
pub static INT256_WITNESSES: ValueWitnessTable = bitwise_table(32, integer_alignment(32), true);
/// 512-bit integer
pub static INT512_WITNESSES: ValueWitnessTable = bitwise_table(64, integer_alignment(64), true);

/// Strong reference to a native heap object
pub static NATIVE_OBJECT_WITNESSES: ExtraInhabitantsValueWitnessTable = pointer_table(1, false);
/// Untyped raw pointer
pub static RAW_POINTER_WITNESSES: ExtraInhabitantsValueWitnessTable = pointer_table(1, true);
/// Thin function pointer
pub static THIN_FUNCTION_WITNESSES: ExtraInhabitantsValueWitnessTable = pointer_table(1, true);
/// Thick function: function pointer plus context object
pub static THICK_FUNCTION_WITNESSES: ExtraInhabitantsValueWitnessTable = pointer_table(2, false);
/// Thick metatype
pub static METATYPE_WITNESSES: ExtraInhabitantsValueWitnessTable = pointer_table(1, true);
/// The empty tuple
pub static EMPTY_TUPLE_WITNESSES: ValueWitnessTable = bitwise_table(0, 1, true);

/// Witnesses of the builtin integer with the given byte size
pub fn pod_witnesses(size: usize) -> Option<&'static ValueWitnessTable> {
    Some(match size {
        1 => &INT8_WITNESSES,
        2 => &INT16_WITNESSES,
        4 => &INT32_WITNESSES,
        8 => &INT64_WITNESSES,
        16 => &INT128_WITNESSES,
        32 => &INT256_WITNESSES,
        64 => &INT512_WITNESSES,
        _ => return None,
    })
}

/// Value witnesses for an unmanaged pointer-sized value
pub fn unmanaged_pointer_witnesses() -> &'static ValueWitnessTable {
    if WORD == 8 {
        &INT64_WITNESSES
    } else {
        &INT32_WITNESSES
    }
}

/// Opaque metadata with its value witness table in front
#[repr(C)]
pub struct FullOpaqueMetadata {
    /// The value witness table
    pub value_witnesses: &'static ValueWitnessTable,
    /// The metadata record
    pub base: Metadata,
}

impl FullOpaqueMetadata {
    const fn new(value_witnesses: &'static ValueWitnessTable) -> Self {
        FullOpaqueMetadata {
            value_witnesses,
            base: Metadata::new(MetadataKind::Opaque),
        }
    }
}

/// Tuple metadata with no elements and its value witness table in front
#[repr(C)]
pub struct FullEmptyTupleMetadata {
    /// The value witness table
    pub value_witnesses: &'static ValueWitnessTable,
    /// The metadata record
    pub base: Metadata,
    num_elements: usize,
    labels: usize,
}

static INT8_METADATA: FullOpaqueMetadata = FullOpaqueMetadata::new(&INT8_WITNESSES);
static INT16_METADATA: FullOpaqueMetadata = FullOpaqueMetadata::new(&INT16_WITNESSES);
static INT32_METADATA: FullOpaqueMetadata = FullOpaqueMetadata::new(&INT32_WITNESSES);
static INT64_METADATA: FullOpaqueMetadata = FullOpaqueMetadata::new(&INT64_WITNESSES);
static INT128_METADATA: FullOpaqueMetadata = FullOpaqueMetadata::new(&INT128_WITNESSES);
static INT256_METADATA: FullOpaqueMetadata = FullOpaqueMetadata::new(&INT256_WITNESSES);
static INT512_METADATA: FullOpaqueMetadata = FullOpaqueMetadata::new(&INT512_WITNESSES);
static NATIVE_OBJECT_METADATA: FullOpaqueMetadata =
    FullOpaqueMetadata::new(&NATIVE_OBJECT_WITNESSES.base);
static RAW_POINTER_METADATA: FullOpaqueMetadata =
    FullOpaqueMetadata::new(&RAW_POINTER_WITNESSES.base);
static EMPTY_TUPLE_METADATA: FullEmptyTupleMetadata = FullEmptyTupleMetadata {
    value_witnesses: &EMPTY_TUPLE_WITNESSES,
    base: Metadata::new(MetadataKind::Tuple),
    num_elements: 0,
    labels: 0,
};

/// `Builtin.Int8`
pub fn int8() -> &'static Metadata {
    &INT8_METADATA.base
}

/// `Builtin.Int16`
pub fn int16() -> &'static Metadata {
    &INT16_METADATA.base
}

/// `Builtin.Int32`
pub fn int32() -> &'static Metadata {
    &INT32_METADATA.base
}

/// `Builtin.Int64`
pub fn int64() -> &'static Metadata {
    &INT64_METADATA.base
}

/// `Builtin.Int128`
pub fn int128() -> &'static Metadata {
    &INT128_METADATA.base
}

/// `Builtin.Int256`
pub fn int256() -> &'static Metadata {
    &INT256_METADATA.base
}

/// `Builtin.Int512`
pub fn int512() -> &'static Metadata {
    &INT512_METADATA.base
}

/// `Builtin.NativeObject`
pub fn native_object() -> &'static Metadata {
    &NATIVE_OBJECT_METADATA.base
}

/// `Builtin.RawPointer`
pub fn raw_pointer() -> &'static Metadata {
    &RAW_POINTER_METADATA.base
}

/// `()`
pub fn empty_tuple() -> &'static Metadata {
    &EMPTY_TUPLE_METADATA.base
}

/// Metadata of the builtin integer with the given byte size
pub fn pod_metadata(size: usize) -> Option<&'static Metadata> {
    Some(match size {
        1 => int8(),
        2 => int16(),
        4 => int32(),
        8 => int64(),
        16 => int128(),
        32 => int256(),
        64 => int512(),
        _ => return None,
    })
}
