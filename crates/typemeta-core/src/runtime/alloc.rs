//! Permanent allocations
//!
//! Everything the runtime builds (metadata, witness tables, value witness
//! tables, label strings) lives for the rest of the process. Allocation
//! failure aborts through the global allocation error handler.

use std::alloc::{alloc_zeroed, handle_alloc_error, Layout};
use std::mem::size_of;
use std::ptr::NonNull;

/// Alignment of every block handed out here
const BLOCK_ALIGN: usize = 16;

/// Layout of a block of `words` words, `None` if it cannot be described
fn block_layout(words: usize) -> Option<Layout> {
    let bytes = words.max(1).checked_mul(size_of::<usize>())?;
    Layout::from_size_align(bytes, BLOCK_ALIGN).ok()
}

/// Allocate `words` zeroed words that are never freed
pub(crate) fn allocate_words(words: usize) -> NonNull<usize> {
    let Some(layout) = block_layout(words) else {
        handle_alloc_error(Layout::new::<usize>())
    };
    // SAFETY: the layout has a non-zero size.
    let block = unsafe { alloc_zeroed(layout) } as *mut usize;
    match NonNull::new(block) {
        Some(block) => block,
        None => handle_alloc_error(layout),
    }
}

/// Move a value into permanent storage
pub(crate) fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// Copy a string into permanent storage with a NUL terminator
pub(crate) fn leak_c_string(text: &str) -> &'static [u8] {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0);
    Box::leak(bytes.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_words_zeroed_and_aligned() {
        let block = allocate_words(5);
        assert_eq!(block.as_ptr() as usize % BLOCK_ALIGN, 0);
        let words = unsafe { std::slice::from_raw_parts(block.as_ptr(), 5) };
        assert!(words.iter().all(|&w| w == 0));
    }

    #[test]
    fn test_block_layout_bounds() {
        let word = size_of::<usize>();
        assert_eq!(block_layout(0).unwrap().size(), word);
        assert_eq!(block_layout(3).unwrap().size(), 3 * word);
        assert_eq!(block_layout(3).unwrap().align(), BLOCK_ALIGN);
        assert!(block_layout(usize::MAX).is_none());
        assert!(block_layout(usize::MAX / word + 1).is_none());
        assert!(block_layout(isize::MAX as usize / word).is_none());
    }

    #[test]
    fn test_leak_c_string_terminates() {
        let bytes = leak_c_string("a b ");
        assert_eq!(bytes, b"a b \0");
    }
}
