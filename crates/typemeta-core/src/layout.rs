//! Trailing array layout
//!
//! Descriptors are a fixed header followed by variable-length arrays whose
//! counts come from the header. [`TrailingLayout`] computes where each array
//! starts: the running offset is aligned to each array's element alignment
//! before the array is placed, so a short array is padded up to the
//! alignment of the one after it.
//!
//! ```text
//! ┌────────────┬──────────┬─────┬────────────────────┬──────────┐
//! │ header     │ params   │ pad │ requirements       │ vtable   │
//! │            │ (u8 × n) │     │ (12 bytes × m)     │ ...      │
//! └────────────┴──────────┴─────┴────────────────────┴──────────┘
//! ```

/// Round `value` up to a multiple of `align` (a power of two)
#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Placement of one trailing array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingArray {
    /// Offset of the first element from the start of the record
    pub offset: u64,
    /// Element size in bytes
    pub element_size: u64,
    /// Number of elements
    pub count: u64,
}

impl TrailingArray {
    /// Offset one past the last element
    pub fn end(&self) -> u64 {
        self.offset + self.element_size * self.count
    }

    /// Offset of element `index`
    pub fn element(&self, index: u64) -> u64 {
        debug_assert!(index < self.count);
        self.offset + self.element_size * index
    }
}

/// Running calculator for a header and its trailing arrays
#[derive(Debug, Clone)]
pub struct TrailingLayout {
    cursor: u64,
    arrays: Vec<TrailingArray>,
}

impl TrailingLayout {
    /// Start after a fixed header of `header_size` bytes
    pub fn new(header_size: u64) -> Self {
        Self {
            cursor: header_size,
            arrays: Vec::new(),
        }
    }

    /// Place the next array and return its placement
    pub fn push(&mut self, element_size: u64, align: u64, count: u64) -> TrailingArray {
        let offset = align_up(self.cursor, align);
        let array = TrailingArray {
            offset,
            element_size,
            count,
        };
        self.cursor = array.end();
        self.arrays.push(array);
        array
    }

    /// Place an array only when `present`, otherwise record an empty one in place
    pub fn push_if(&mut self, present: bool, element_size: u64, align: u64, count: u64) -> TrailingArray {
        self.push(element_size, align, if present { count } else { 0 })
    }

    /// Offset one past the last placed array
    pub fn end(&self) -> u64 {
        self.cursor
    }

    /// Every placed array, in order
    pub fn arrays(&self) -> &[TrailingArray] {
        &self.arrays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 16), 16);
    }

    #[test]
    fn test_generic_context_offsets() {
        // Type generic header (20 bytes), three one-byte params, two requirements.
        let mut layout = TrailingLayout::new(32 + 20);
        let params = layout.push(1, 1, 3);
        let requirements = layout.push(12, 4, 2);
        assert_eq!(params.offset, 52);
        assert_eq!(requirements.offset, 56);
        assert_eq!(layout.end(), 56 + 24);
    }

    #[test]
    fn test_arrays_never_overlap() {
        for header in [8u64, 12, 16, 20, 36] {
            for params in 0..9u64 {
                for requirements in 0..4u64 {
                    let mut layout = TrailingLayout::new(header);
                    layout.push(1, 1, params);
                    layout.push(12, 4, requirements);
                    layout.push(8, 4, 1);
                    let arrays = layout.arrays();
                    assert!(arrays[0].offset >= header);
                    for pair in arrays.windows(2) {
                        assert!(pair[0].end() <= pair[1].offset);
                    }
                    assert_eq!(arrays[1].offset % 4, 0);
                }
            }
        }
    }

    #[test]
    fn test_absent_array_takes_no_space() {
        let mut layout = TrailingLayout::new(16);
        let vtable = layout.push_if(false, 8, 4, 1);
        let methods = layout.push_if(false, 8, 4, 10);
        assert_eq!(vtable.count, 0);
        assert_eq!(methods.offset, 16);
        assert_eq!(layout.end(), 16);
    }
}
