//! Fixed-size value buffers
//!
//! Existential containers hold their value in a three-word buffer. A value
//! that fits is stored in the buffer itself; anything else lives in a heap
//! allocation whose address is stored in the buffer's first word.

use super::OpaqueValue;
use crate::abi::NUM_WORDS_VALUE_BUFFER;
use crate::metadata::Metadata;
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::mem::{align_of, size_of};

/// Three words of inline storage
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueBuffer {
    /// Raw contents
    pub private_data: [usize; NUM_WORDS_VALUE_BUFFER],
}

impl ValueBuffer {
    /// An empty buffer
    pub const fn new() -> Self {
        ValueBuffer {
            private_data: [0; NUM_WORDS_VALUE_BUFFER],
        }
    }

    /// The buffer's storage as a value pointer
    pub fn as_value_ptr(&mut self) -> *mut OpaqueValue {
        self as *mut Self as *mut OpaqueValue
    }
}

/// Whether a value of this size and alignment is stored inline
pub const fn value_fits_inline(size: usize, alignment: usize) -> bool {
    size <= size_of::<ValueBuffer>() && alignment <= align_of::<ValueBuffer>()
}

fn out_of_line_layout(metadata: &Metadata) -> Layout {
    let witnesses = metadata.value_witnesses();
    // SAFETY: alignments in witness flags are powers of two no larger than 2^16.
    unsafe { Layout::from_size_align_unchecked(witnesses.size.max(1), witnesses.alignment()) }
}

/// Prepare `buffer` to hold a value of `metadata`'s type and return the
/// uninitialized value storage.
///
/// # Safety
///
/// `buffer` must be valid for writes and must not already own storage.
pub unsafe fn allocate_in_buffer(buffer: *mut ValueBuffer, metadata: &Metadata) -> *mut OpaqueValue {
    if metadata.value_witnesses().is_value_inline() {
        return buffer as *mut OpaqueValue;
    }
    let layout = out_of_line_layout(metadata);
    let storage = alloc(layout);
    if storage.is_null() {
        handle_alloc_error(layout);
    }
    (*buffer).private_data[0] = storage as usize;
    storage as *mut OpaqueValue
}

/// The value held by `buffer`
///
/// # Safety
///
/// `buffer` must hold a value of `metadata`'s type.
pub unsafe fn project_buffer(buffer: *mut ValueBuffer, metadata: &Metadata) -> *mut OpaqueValue {
    if metadata.value_witnesses().is_value_inline() {
        buffer as *mut OpaqueValue
    } else {
        (*buffer).private_data[0] as *mut OpaqueValue
    }
}

/// Release out-of-line storage without destroying the value
///
/// # Safety
///
/// `buffer` must own storage allocated by [`allocate_in_buffer`] for the same
/// type, and its value must already be destroyed or moved out.
pub unsafe fn deallocate_buffer(buffer: *mut ValueBuffer, metadata: &Metadata) {
    if metadata.value_witnesses().is_value_inline() {
        return;
    }
    let storage = (*buffer).private_data[0] as *mut u8;
    if !storage.is_null() {
        dealloc(storage, out_of_line_layout(metadata));
        (*buffer).private_data[0] = 0;
    }
}

/// Destroy the value in `buffer` and release its storage
///
/// # Safety
///
/// `buffer` must hold an initialized value of `metadata`'s type.
pub unsafe fn destroy_buffer(buffer: *mut ValueBuffer, metadata: &Metadata) {
    let value = project_buffer(buffer, metadata);
    metadata.vw_destroy(value);
    deallocate_buffer(buffer, metadata);
}

/// Universal `initializeBufferWithCopyOfBuffer` witness
///
/// # Safety
///
/// `src` must hold a value of `metadata`'s type and `dest` must be an
/// uninitialized buffer.
pub unsafe extern "C" fn initialize_buffer_with_copy_of_buffer(
    dest: *mut ValueBuffer,
    src: *mut ValueBuffer,
    metadata: *const Metadata,
) -> *mut OpaqueValue {
    let metadata = &*metadata;
    let src_value = project_buffer(src, metadata);
    let dest_value = allocate_in_buffer(dest, metadata);
    metadata.vw_initialize_with_copy(dest_value, src_value)
}
