//! Extra inhabitants of pointer representations
//!
//! No heap object or function lives below [`LEAST_VALID_POINTER_VALUE`], so
//! every smaller bit pattern of a pointer-sized value is free for enums to
//! use as a case tag. Inhabitant `i` is stored as the value `i`.

use super::OpaqueValue;
use crate::abi::LEAST_VALID_POINTER_VALUE;
use crate::metadata::Metadata;

/// Number of extra inhabitants of a heap object or function pointer
pub const fn pointer_extra_inhabitant_count() -> u32 {
    if LEAST_VALID_POINTER_VALUE > i32::MAX as u64 {
        i32::MAX as u32
    } else {
        LEAST_VALID_POINTER_VALUE as u32
    }
}

/// Extra inhabitant index of a pointer value, or -1 if it is a valid pointer
pub fn pointer_extra_inhabitant_index(value: usize) -> i32 {
    if (value as u64) < LEAST_VALID_POINTER_VALUE {
        value as i32
    } else {
        -1
    }
}

/// Bit pattern of extra inhabitant `index`
pub fn pointer_extra_inhabitant_value(index: i32) -> usize {
    debug_assert!(
        index >= 0 && (index as u32) < pointer_extra_inhabitant_count(),
        "extra inhabitant index {} out of range",
        index
    );
    index as usize
}

/// `storeExtraInhabitant` witness of pointer-represented types
///
/// # Safety
///
/// `dest` must be valid for a pointer-sized write.
pub unsafe extern "C" fn store_pointer_extra_inhabitant(
    dest: *mut OpaqueValue,
    index: i32,
    _metadata: *const Metadata,
) {
    (dest as *mut usize).write_unaligned(pointer_extra_inhabitant_value(index));
}

/// `getExtraInhabitantIndex` witness of pointer-represented types
///
/// # Safety
///
/// `src` must be valid for a pointer-sized read.
pub unsafe extern "C" fn get_pointer_extra_inhabitant_index(
    src: *const OpaqueValue,
    _metadata: *const Metadata,
) -> i32 {
    pointer_extra_inhabitant_index((src as *const usize).read_unaligned())
}
