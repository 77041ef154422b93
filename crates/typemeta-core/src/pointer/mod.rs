//! Cross-record references
//!
//! Records refer to each other with small position-independent values
//! instead of absolute pointers, so that images need no relocation and can be
//! walked from another address space. Every reference type here is a plain
//! value holding the stored integer, with a pure `resolve` that turns the
//! address of the field it was read from into a target.
//!
//! ```text
//! RelativeDirectPointer            target = field + offset
//! RelativeIndirectablePointer      bit 0 set: field + (offset & !1) holds the target
//! RelativeIndirectablePointerIntPair
//!                                  bit 0 indirect, bit 1 payload, offset & !3
//! RelativeDirectPointerIntPair     bits 0..2 payload, offset & !3
//! FarRelativeDirectPointer         word-sized offset
//! ```
//!
//! Reading the stored integer out of memory is the job of a
//! [`MemoryReader`](reader::MemoryReader).

pub mod reader;

pub use reader::{ExternalReader, InProcessReader, MemoryReader, PointerWidth};

use crate::error::{EmitError, EmitResult};
use std::fmt;

/// An address in the space a reader serves
pub type Address = u64;

/// Result of resolving a relative reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// The target itself
    Direct(Address),
    /// A pointer-sized slot that holds the target
    Indirect(Address),
}

/// A 32-bit self-relative reference
pub trait RelativeReference: Copy + fmt::Debug {
    /// Whether a zero offset is a legal null
    const NULLABLE: bool;

    /// Wrap a stored integer
    fn from_raw(raw: i32) -> Self;

    /// The stored integer
    fn raw(self) -> i32;

    /// Offset with any tag bits cleared
    fn offset(self) -> i32;

    /// Whether the offset leads to a slot rather than the target
    fn is_indirect(self) -> bool {
        false
    }

    /// Whether the reference is null
    fn is_null(self) -> bool {
        self.offset() == 0
    }

    /// Resolve against the address of the field the value was read from.
    ///
    /// Null gives `None`. A null non-nullable reference is a contract
    /// violation and fails a debug assertion.
    fn resolve(self, field: Address) -> Option<Resolved> {
        if self.is_null() {
            debug_assert!(Self::NULLABLE, "null non-nullable reference at {:#x}", field);
            return None;
        }
        let target = field.wrapping_add_signed(self.offset() as i64);
        Some(if self.is_indirect() {
            Resolved::Indirect(target)
        } else {
            Resolved::Direct(target)
        })
    }
}

/// Signed 32-bit offset from the field to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RelativeDirectPointer<const NULLABLE: bool = true>(i32);

impl<const NULLABLE: bool> RelativeReference for RelativeDirectPointer<NULLABLE> {
    const NULLABLE: bool = NULLABLE;

    fn from_raw(raw: i32) -> Self {
        RelativeDirectPointer(raw)
    }

    fn raw(self) -> i32 {
        self.0
    }

    fn offset(self) -> i32 {
        self.0
    }
}

/// Relative offset whose low bit marks indirection through a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RelativeIndirectablePointer<const NULLABLE: bool = true>(i32);

impl<const NULLABLE: bool> RelativeReference for RelativeIndirectablePointer<NULLABLE> {
    const NULLABLE: bool = NULLABLE;

    fn from_raw(raw: i32) -> Self {
        RelativeIndirectablePointer(raw)
    }

    fn raw(self) -> i32 {
        self.0
    }

    fn offset(self) -> i32 {
        self.0 & !1
    }

    fn is_indirect(self) -> bool {
        self.0 & 1 != 0
    }
}

/// Indirectable relative offset carrying one extra payload bit (bit 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RelativeIndirectablePointerIntPair<const NULLABLE: bool = true>(i32);

impl<const NULLABLE: bool> RelativeIndirectablePointerIntPair<NULLABLE> {
    /// The payload bit
    pub fn int_value(self) -> u32 {
        ((self.0 >> 1) & 1) as u32
    }
}

impl<const NULLABLE: bool> RelativeReference for RelativeIndirectablePointerIntPair<NULLABLE> {
    const NULLABLE: bool = NULLABLE;

    fn from_raw(raw: i32) -> Self {
        RelativeIndirectablePointerIntPair(raw)
    }

    fn raw(self) -> i32 {
        self.0
    }

    fn offset(self) -> i32 {
        self.0 & !3
    }

    fn is_indirect(self) -> bool {
        self.0 & 1 != 0
    }
}

/// Relative offset carrying a two-bit payload in its low bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RelativeDirectPointerIntPair<const NULLABLE: bool = true>(i32);

impl<const NULLABLE: bool> RelativeDirectPointerIntPair<NULLABLE> {
    /// The two payload bits
    pub fn int_value(self) -> u32 {
        (self.0 & 3) as u32
    }
}

impl<const NULLABLE: bool> RelativeReference for RelativeDirectPointerIntPair<NULLABLE> {
    const NULLABLE: bool = NULLABLE;

    fn from_raw(raw: i32) -> Self {
        RelativeDirectPointerIntPair(raw)
    }

    fn raw(self) -> i32 {
        self.0
    }

    fn offset(self) -> i32 {
        self.0 & !3
    }
}

/// Pointer-sized offset from the field to the target.
///
/// Used where the target may be further than 2 GiB away. The stored value
/// is sign-extended from the target's pointer width by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct FarRelativeDirectPointer<const NULLABLE: bool = true>(i64);

impl<const NULLABLE: bool> FarRelativeDirectPointer<NULLABLE> {
    /// Wrap a sign-extended stored offset
    pub fn from_raw(raw: i64) -> Self {
        FarRelativeDirectPointer(raw)
    }

    /// The stored offset
    pub fn raw(self) -> i64 {
        self.0
    }

    /// Resolve against the field address
    pub fn resolve(self, field: Address) -> Option<Address> {
        if self.0 == 0 {
            debug_assert!(NULLABLE, "null non-nullable far reference at {:#x}", field);
            return None;
        }
        Some(field.wrapping_add_signed(self.0))
    }
}

/// Offset to store in a relative field at `from` so that it resolves to `to`
pub fn relative_offset(from: Address, to: Address) -> EmitResult<i32> {
    let delta = (to as i128) - (from as i128);
    i32::try_from(delta).map_err(|_| EmitError::OffsetOutOfRange { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_pointer_resolves_forward_and_back() {
        let forward = RelativeDirectPointer::<true>::from_raw(0x40);
        assert_eq!(forward.resolve(0x1000), Some(Resolved::Direct(0x1040)));

        let backward = RelativeDirectPointer::<true>::from_raw(-0x10);
        assert_eq!(backward.resolve(0x1000), Some(Resolved::Direct(0xFF0)));
    }

    #[test]
    fn test_nullable_zero_is_none() {
        assert_eq!(RelativeDirectPointer::<true>::from_raw(0).resolve(0x1000), None);
        assert_eq!(RelativeIndirectablePointer::<true>::from_raw(0).resolve(0x1000), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "null non-nullable reference")]
    fn test_non_nullable_zero_asserts() {
        let _ = RelativeDirectPointer::<false>::from_raw(0).resolve(0x1000);
    }

    #[test]
    fn test_indirectable_low_bit() {
        let direct = RelativeIndirectablePointer::<true>::from_raw(0x20);
        assert_eq!(direct.resolve(0x100), Some(Resolved::Direct(0x120)));

        let indirect = RelativeIndirectablePointer::<true>::from_raw(0x21);
        assert!(indirect.is_indirect());
        assert_eq!(indirect.resolve(0x100), Some(Resolved::Indirect(0x120)));
    }

    #[test]
    fn test_int_pairs() {
        let pair = RelativeIndirectablePointerIntPair::<true>::from_raw(-0x40 | 3);
        assert!(pair.is_indirect());
        assert_eq!(pair.int_value(), 1);
        assert_eq!(pair.resolve(0x1000), Some(Resolved::Indirect(0xFC0)));

        let record = RelativeDirectPointerIntPair::<true>::from_raw(0x80 | 2);
        assert_eq!(record.int_value(), 2);
        assert_eq!(record.resolve(0x1000), Some(Resolved::Direct(0x1080)));

        // A tag with a zero offset is still null.
        assert!(RelativeDirectPointerIntPair::<true>::from_raw(1).is_null());
    }

    #[test]
    fn test_far_pointer() {
        let far = FarRelativeDirectPointer::<true>::from_raw(0x1_0000_0000);
        assert_eq!(far.resolve(0x10), Some(0x1_0000_0010));
        assert_eq!(FarRelativeDirectPointer::<true>::from_raw(0).resolve(0x10), None);
    }

    #[test]
    fn test_relative_offset_range() {
        assert_eq!(relative_offset(0x1000, 0x1040).unwrap(), 0x40);
        assert_eq!(relative_offset(0x1040, 0x1000).unwrap(), -0x40);
        assert!(matches!(
            relative_offset(0, 0x1_0000_0000),
            Err(EmitError::OffsetOutOfRange { .. })
        ));
    }
}
