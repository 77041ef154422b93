//! Value witness tables
//!
//! Every type's metadata is preceded by a pointer to its value witness table:
//! the functions that copy, move and destroy values of the type, plus its
//! size, alignment and stride. Types with unused bit patterns extend the
//! table with extra inhabitant witnesses, and enums extend that with tag
//! witnesses.
//!
//! ```text
//! ValueWitnessTable                  9 words
//! ExtraInhabitantsValueWitnessTable  + extra inhabitant flags, store, index
//! EnumValueWitnessTable              + get tag, project data, inject tag
//! ```
//!
//! The extended tables are only present when the corresponding flag bit is
//! set, so the checked accessors look at the flags first. The metadata record
//! is always passed as the trailing argument of a witness.

mod buffer;
pub mod builtin;
pub mod inhabitants;

pub use buffer::{
    allocate_in_buffer, deallocate_buffer, destroy_buffer, initialize_buffer_with_copy_of_buffer,
    project_buffer, value_fits_inline, ValueBuffer,
};

use crate::abi::{ExtraInhabitantFlags, ValueWitnessFlags};
use crate::metadata::Metadata;
use static_assertions::const_assert_eq;
use std::fmt;
use std::mem::{offset_of, size_of};

/// An opaque value of some type, only ever handled by pointer
#[repr(C)]
pub struct OpaqueValue {
    _private: [u8; 0],
}

/// Copy the value in `src` buffer into the uninitialized `dest` buffer
pub type InitializeBufferWithCopyOfBufferFn =
    unsafe extern "C" fn(*mut ValueBuffer, *mut ValueBuffer, *const Metadata) -> *mut OpaqueValue;
/// Destroy a value
pub type DestroyFn = unsafe extern "C" fn(*mut OpaqueValue, *const Metadata);
/// Copy, move or assign `src` into `dest`, returning `dest`
pub type CopyFn =
    unsafe extern "C" fn(*mut OpaqueValue, *mut OpaqueValue, *const Metadata) -> *mut OpaqueValue;
/// Store extra inhabitant `index` into uninitialized memory
pub type StoreExtraInhabitantFn = unsafe extern "C" fn(*mut OpaqueValue, i32, *const Metadata);
/// Index of the extra inhabitant stored in a value, or -1 for a valid value
pub type GetExtraInhabitantIndexFn = unsafe extern "C" fn(*const OpaqueValue, *const Metadata) -> i32;
/// Case tag of an enum value
pub type GetEnumTagFn = unsafe extern "C" fn(*const OpaqueValue, *const Metadata) -> i32;
/// Strip the tag so the payload can be taken in place
pub type DestructiveProjectEnumDataFn = unsafe extern "C" fn(*mut OpaqueValue, *const Metadata);
/// Turn a payload in place into a value of the given case
pub type DestructiveInjectEnumTagFn = unsafe extern "C" fn(*mut OpaqueValue, u32, *const Metadata);

/// Base value witness table
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ValueWitnessTable {
    /// Copy a buffer, allocating out-of-line storage when needed
    pub initialize_buffer_with_copy_of_buffer: InitializeBufferWithCopyOfBufferFn,
    /// Destroy a value
    pub destroy: DestroyFn,
    /// Copy-initialize
    pub initialize_with_copy: CopyFn,
    /// Copy-assign
    pub assign_with_copy: CopyFn,
    /// Move-initialize, leaving the source uninitialized
    pub initialize_with_take: CopyFn,
    /// Move-assign, leaving the source uninitialized
    pub assign_with_take: CopyFn,
    /// Size in bytes, excluding tail padding
    pub size: usize,
    /// Alignment and property bits
    pub flags: ValueWitnessFlags,
    /// Distance between array elements
    pub stride: usize,
}

/// Value witness table with extra inhabitant witnesses
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ExtraInhabitantsValueWitnessTable {
    /// The base table
    pub base: ValueWitnessTable,
    /// Number of extra inhabitants
    pub extra_inhabitant_flags: ExtraInhabitantFlags,
    /// Store an extra inhabitant
    pub store_extra_inhabitant: StoreExtraInhabitantFn,
    /// Read back an extra inhabitant index
    pub get_extra_inhabitant_index: GetExtraInhabitantIndexFn,
}

/// Value witness table with enum witnesses
#[repr(C)]
#[derive(Clone, Copy)]
pub struct EnumValueWitnessTable {
    /// The extra inhabitant table
    pub base: ExtraInhabitantsValueWitnessTable,
    /// Read the case tag
    pub get_enum_tag: GetEnumTagFn,
    /// Project the payload
    pub destructive_project_enum_data: DestructiveProjectEnumDataFn,
    /// Inject a case tag
    pub destructive_inject_enum_tag: DestructiveInjectEnumTagFn,
}

const WORD: usize = size_of::<usize>();
const_assert_eq!(size_of::<ValueWitnessTable>(), 9 * WORD);
const_assert_eq!(size_of::<ExtraInhabitantsValueWitnessTable>(), 12 * WORD);
const_assert_eq!(size_of::<EnumValueWitnessTable>(), 15 * WORD);
const_assert_eq!(offset_of!(ValueWitnessTable, size), 6 * WORD);
const_assert_eq!(offset_of!(ValueWitnessTable, stride), 8 * WORD);
const_assert_eq!(offset_of!(ExtraInhabitantsValueWitnessTable, extra_inhabitant_flags), 9 * WORD);

impl ValueWitnessTable {
    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Stride in bytes
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Alignment in bytes
    pub fn alignment(&self) -> usize {
        self.flags.alignment()
    }

    /// Alignment mask
    pub fn alignment_mask(&self) -> usize {
        self.flags.alignment_mask()
    }

    /// Values are stored inline in a [`ValueBuffer`]
    pub fn is_value_inline(&self) -> bool {
        self.flags.is_inline_storage()
    }

    /// POD type
    pub fn is_pod(&self) -> bool {
        self.flags.is_pod()
    }

    /// Bitwise-takable type
    pub fn is_bitwise_takable(&self) -> bool {
        self.flags.is_bitwise_takable()
    }

    /// The extra inhabitant extension, if this table has one
    pub fn extra_inhabitants(&self) -> Option<&ExtraInhabitantsValueWitnessTable> {
        if self.flags.has_extra_inhabitants() {
            // SAFETY: the flag promises the extended layout follows.
            Some(unsafe { &*(self as *const Self as *const ExtraInhabitantsValueWitnessTable) })
        } else {
            None
        }
    }

    /// The extra inhabitant extension without checking the flag.
    ///
    /// # Safety
    ///
    /// The table must have [`ValueWitnessFlags::has_extra_inhabitants`] set.
    pub unsafe fn extra_inhabitants_unchecked(&self) -> &ExtraInhabitantsValueWitnessTable {
        debug_assert!(
            self.flags.has_extra_inhabitants(),
            "value witness table has no extra inhabitant witnesses"
        );
        &*(self as *const Self as *const ExtraInhabitantsValueWitnessTable)
    }

    /// The enum extension, if this table has one
    pub fn enum_witnesses(&self) -> Option<&EnumValueWitnessTable> {
        if self.flags.has_enum_witnesses() {
            // SAFETY: the flag promises the extended layout follows.
            Some(unsafe { &*(self as *const Self as *const EnumValueWitnessTable) })
        } else {
            None
        }
    }

    /// The enum extension without checking the flag.
    ///
    /// # Safety
    ///
    /// The table must have [`ValueWitnessFlags::has_enum_witnesses`] set.
    pub unsafe fn enum_witnesses_unchecked(&self) -> &EnumValueWitnessTable {
        debug_assert!(
            self.flags.has_enum_witnesses(),
            "value witness table has no enum witnesses"
        );
        &*(self as *const Self as *const EnumValueWitnessTable)
    }

    /// Number of extra inhabitants (0 without the extension)
    pub fn num_extra_inhabitants(&self) -> u32 {
        self.extra_inhabitants()
            .map_or(0, |xi| xi.extra_inhabitant_flags.num_extra_inhabitants())
    }

    /// Layout-only view of the table
    pub fn type_layout(&self) -> TypeLayout {
        TypeLayout {
            size: self.size,
            flags: self.flags,
            stride: self.stride,
            extra_inhabitant_flags: self
                .extra_inhabitants()
                .map_or(ExtraInhabitantFlags::new(), |xi| xi.extra_inhabitant_flags),
        }
    }
}

impl fmt::Debug for ValueWitnessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueWitnessTable")
            .field("size", &self.size)
            .field("stride", &self.stride)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ExtraInhabitantsValueWitnessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtraInhabitantsValueWitnessTable")
            .field("base", &self.base)
            .field("extra_inhabitant_flags", &self.extra_inhabitant_flags)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for EnumValueWitnessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnumValueWitnessTable")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

/// The layout words of a value witness table.
///
/// Field order matches the table from `size` onward, so layout algorithms
/// can treat a table with extra inhabitants as a `TypeLayout`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeLayout {
    /// Size in bytes
    pub size: usize,
    /// Alignment and property bits
    pub flags: ValueWitnessFlags,
    /// Stride in bytes
    pub stride: usize,
    /// Extra inhabitant count (meaningful when the flags say so)
    pub extra_inhabitant_flags: ExtraInhabitantFlags,
}

const_assert_eq!(
    offset_of!(ValueWitnessTable, flags) - offset_of!(ValueWitnessTable, size),
    offset_of!(TypeLayout, flags)
);

impl TypeLayout {
    /// Layout of a POD type with the given size and alignment
    pub fn pod(size: usize, alignment: usize) -> Self {
        let flags = ValueWitnessFlags::new()
            .with_alignment(alignment)
            .with_inline_storage(value_fits_inline(size, alignment));
        TypeLayout {
            size,
            flags,
            stride: stride_for(size, alignment),
            extra_inhabitant_flags: ExtraInhabitantFlags::new(),
        }
    }

    /// Alignment in bytes
    pub fn alignment(&self) -> usize {
        self.flags.alignment()
    }

    /// Number of extra inhabitants
    pub fn num_extra_inhabitants(&self) -> u32 {
        if self.flags.has_extra_inhabitants() {
            self.extra_inhabitant_flags.num_extra_inhabitants()
        } else {
            0
        }
    }
}

/// Stride of a type: size rounded up to alignment, never zero
pub const fn stride_for(size: usize, alignment: usize) -> usize {
    let stride = (size + alignment - 1) & !(alignment - 1);
    if stride == 0 {
        1
    } else {
        stride
    }
}
