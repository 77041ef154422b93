//! Flag words stored in metadata records and value witness tables

use std::fmt;

/// Flags word of a value witness table
///
/// Bit polarity is chosen so that the flags of a struct's fields can be
/// or-ed together to get the struct's flags (inline storage and extra
/// inhabitants still need fixing up afterwards).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ValueWitnessFlags(usize);

impl ValueWitnessFlags {
    const ALIGNMENT_MASK: usize = 0x0000_FFFF;
    const IS_NON_POD: usize = 0x0001_0000;
    const IS_NON_INLINE: usize = 0x0002_0000;
    const HAS_EXTRA_INHABITANTS: usize = 0x0004_0000;
    const HAS_SPARE_BITS: usize = 0x0008_0000;
    const IS_NON_BITWISE_TAKABLE: usize = 0x0010_0000;
    const HAS_ENUM_WITNESSES: usize = 0x0020_0000;

    /// Flags of a word-aligned, inline, POD, bitwise-takable type
    pub const fn new() -> Self {
        ValueWitnessFlags(0)
    }

    /// Reinterpret a raw flags word
    pub const fn from_bits(bits: usize) -> Self {
        ValueWitnessFlags(bits)
    }

    /// The raw flags word
    pub const fn bits(self) -> usize {
        self.0
    }

    /// Mask of the low address bits that must be clear, e.g. 7 for 8-byte alignment
    pub const fn alignment_mask(self) -> usize {
        self.0 & Self::ALIGNMENT_MASK
    }

    /// Required alignment in bytes
    pub const fn alignment(self) -> usize {
        self.alignment_mask() + 1
    }

    /// Replace the alignment mask
    pub const fn with_alignment_mask(self, mask: usize) -> Self {
        ValueWitnessFlags((self.0 & !Self::ALIGNMENT_MASK) | (mask & Self::ALIGNMENT_MASK))
    }

    /// Replace the alignment (a power of two)
    pub const fn with_alignment(self, alignment: usize) -> Self {
        self.with_alignment_mask(alignment - 1)
    }

    /// Values fit in a value buffer
    pub const fn is_inline_storage(self) -> bool {
        self.0 & Self::IS_NON_INLINE == 0
    }

    /// Set whether values fit in a value buffer
    pub const fn with_inline_storage(self, inline: bool) -> Self {
        self.set(Self::IS_NON_INLINE, !inline)
    }

    /// Values can be copied with memcpy and destroyed with a no-op
    pub const fn is_pod(self) -> bool {
        self.0 & Self::IS_NON_POD == 0
    }

    /// Set whether the type is POD
    pub const fn with_pod(self, pod: bool) -> Self {
        self.set(Self::IS_NON_POD, !pod)
    }

    /// Values can be moved with memcpy
    pub const fn is_bitwise_takable(self) -> bool {
        self.0 & Self::IS_NON_BITWISE_TAKABLE == 0
    }

    /// Set whether the type is bitwise-takable
    pub const fn with_bitwise_takable(self, takable: bool) -> Self {
        self.set(Self::IS_NON_BITWISE_TAKABLE, !takable)
    }

    /// The table is an [`ExtraInhabitantsValueWitnessTable`](crate::witness::ExtraInhabitantsValueWitnessTable)
    pub const fn has_extra_inhabitants(self) -> bool {
        self.0 & Self::HAS_EXTRA_INHABITANTS != 0
    }

    /// Set the extra inhabitants bit
    pub const fn with_extra_inhabitants(self, has: bool) -> Self {
        self.set(Self::HAS_EXTRA_INHABITANTS, has)
    }

    /// The type's representation has unused bits
    pub const fn has_spare_bits(self) -> bool {
        self.0 & Self::HAS_SPARE_BITS != 0
    }

    /// Set the spare bits bit
    pub const fn with_spare_bits(self, has: bool) -> Self {
        self.set(Self::HAS_SPARE_BITS, has)
    }

    /// The table is an [`EnumValueWitnessTable`](crate::witness::EnumValueWitnessTable)
    pub const fn has_enum_witnesses(self) -> bool {
        self.0 & Self::HAS_ENUM_WITNESSES != 0
    }

    /// Set the enum witnesses bit
    pub const fn with_enum_witnesses(self, has: bool) -> Self {
        self.set(Self::HAS_ENUM_WITNESSES, has)
    }

    const fn set(self, bit: usize, on: bool) -> Self {
        if on {
            ValueWitnessFlags(self.0 | bit)
        } else {
            ValueWitnessFlags(self.0 & !bit)
        }
    }
}

impl fmt::Debug for ValueWitnessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueWitnessFlags")
            .field("alignment", &self.alignment())
            .field("pod", &self.is_pod())
            .field("inline", &self.is_inline_storage())
            .field("bitwise_takable", &self.is_bitwise_takable())
            .field("extra_inhabitants", &self.has_extra_inhabitants())
            .field("enum_witnesses", &self.has_enum_witnesses())
            .finish()
    }
}

/// Extra inhabitant count of an extended value witness table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ExtraInhabitantFlags(usize);

impl ExtraInhabitantFlags {
    const NUM_EXTRA_INHABITANTS_MASK: usize = 0x7FFF_FFFF;

    /// No extra inhabitants
    pub const fn new() -> Self {
        ExtraInhabitantFlags(0)
    }

    /// Reinterpret a raw word
    pub const fn from_bits(bits: usize) -> Self {
        ExtraInhabitantFlags(bits)
    }

    /// The raw word
    pub const fn bits(self) -> usize {
        self.0
    }

    /// Number of bit patterns that are not valid values
    pub const fn num_extra_inhabitants(self) -> u32 {
        (self.0 & Self::NUM_EXTRA_INHABITANTS_MASK) as u32
    }

    /// Replace the count
    pub const fn with_num_extra_inhabitants(self, count: u32) -> Self {
        ExtraInhabitantFlags(
            (self.0 & !Self::NUM_EXTRA_INHABITANTS_MASK)
                | (count as usize & Self::NUM_EXTRA_INHABITANTS_MASK),
        )
    }
}

bitflags::bitflags! {
    /// Flags word of class metadata
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassFlags: u32 {
        /// Class was compiled before the stable ABI
        const IS_SWIFT_PRE_STABLE_ABI = 0x1;
        /// Instances use native reference counting
        const USES_SWIFT_REFCOUNTING = 0x2;
        /// Class has a custom foreign runtime name
        const HAS_CUSTOM_OBJC_NAME = 0x4;
    }
}

bitflags::bitflags! {
    /// Flags of one function parameter
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParameterFlags: u32 {
        /// Passed inout
        const IN_OUT = 1 << 0;
        /// Passed shared (borrowed)
        const SHARED = 1 << 1;
        /// Variadic parameter
        const VARIADIC = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Initialization flags of a foreign type's uniquing cache
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ForeignTypeFlags: usize {
        /// The record has an initialization function to run once uniqued
        const HAS_INITIALIZATION_FUNCTION = 0x1;
    }
}

impl ForeignTypeFlags {
    /// Every flag value is at most this; anything larger is a pointer
    pub const LARGEST_FLAG_MASK: usize = 0xFFF;
}

/// Calling convention of a function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionConvention {
    /// Native thick function
    Swift,
    /// Block object
    Block,
    /// Thin function with no context
    Thin,
    /// Plain C function pointer
    CFunctionPointer,
    /// A convention newer than this runtime
    Unknown(u8),
}

impl FunctionConvention {
    /// Decode the raw convention byte
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => FunctionConvention::Swift,
            1 => FunctionConvention::Block,
            2 => FunctionConvention::Thin,
            3 => FunctionConvention::CFunctionPointer,
            other => FunctionConvention::Unknown(other),
        }
    }

    /// Raw convention byte
    pub fn raw(self) -> u8 {
        match self {
            FunctionConvention::Swift => 0,
            FunctionConvention::Block => 1,
            FunctionConvention::Thin => 2,
            FunctionConvention::CFunctionPointer => 3,
            FunctionConvention::Unknown(raw) => raw,
        }
    }
}

/// Flags word of function type metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct FunctionTypeFlags(u32);

impl FunctionTypeFlags {
    const NUM_PARAMETERS_MASK: u32 = 0x0000_FFFF;
    const CONVENTION_MASK: u32 = 0x00FF_0000;
    const CONVENTION_SHIFT: u32 = 16;
    const THROWS_MASK: u32 = 0x0100_0000;
    const PARAM_FLAGS_MASK: u32 = 0x0200_0000;
    const ESCAPING_MASK: u32 = 0x0400_0000;

    /// Empty flags: no parameters, native convention
    pub const fn new() -> Self {
        FunctionTypeFlags(0)
    }

    /// Reinterpret a raw word
    pub const fn from_bits(bits: u32) -> Self {
        FunctionTypeFlags(bits)
    }

    /// The raw word
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Number of parameters
    pub const fn num_parameters(self) -> u32 {
        self.0 & Self::NUM_PARAMETERS_MASK
    }

    /// Replace the parameter count
    pub const fn with_num_parameters(self, count: u32) -> Self {
        FunctionTypeFlags((self.0 & !Self::NUM_PARAMETERS_MASK) | (count & Self::NUM_PARAMETERS_MASK))
    }

    /// Calling convention
    pub fn convention(self) -> FunctionConvention {
        FunctionConvention::from_raw(((self.0 & Self::CONVENTION_MASK) >> Self::CONVENTION_SHIFT) as u8)
    }

    /// Replace the calling convention
    pub fn with_convention(self, convention: FunctionConvention) -> Self {
        FunctionTypeFlags(
            (self.0 & !Self::CONVENTION_MASK) | ((convention.raw() as u32) << Self::CONVENTION_SHIFT),
        )
    }

    /// The function can throw
    pub const fn throws(self) -> bool {
        self.0 & Self::THROWS_MASK != 0
    }

    /// Set the throws bit
    pub const fn with_throws(self, throws: bool) -> Self {
        self.set(Self::THROWS_MASK, throws)
    }

    /// The metadata carries a parameter flags array
    pub const fn has_parameter_flags(self) -> bool {
        self.0 & Self::PARAM_FLAGS_MASK != 0
    }

    /// Set the parameter flags bit
    pub const fn with_parameter_flags(self, has: bool) -> Self {
        self.set(Self::PARAM_FLAGS_MASK, has)
    }

    /// The function value may escape
    pub const fn is_escaping(self) -> bool {
        self.0 & Self::ESCAPING_MASK != 0
    }

    /// Set the escaping bit
    pub const fn with_escaping(self, escaping: bool) -> Self {
        self.set(Self::ESCAPING_MASK, escaping)
    }

    const fn set(self, bit: u32, on: bool) -> Self {
        if on {
            FunctionTypeFlags(self.0 | bit)
        } else {
            FunctionTypeFlags(self.0 & !bit)
        }
    }
}

/// Flags word of tuple type metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct TupleTypeFlags(u32);

impl TupleTypeFlags {
    const NUM_ELEMENTS_MASK: u32 = 0x0000_FFFF;
    const NON_CONSTANT_LABELS_MASK: u32 = 0x0001_0000;

    /// Reinterpret a raw word
    pub const fn from_bits(bits: u32) -> Self {
        TupleTypeFlags(bits)
    }

    /// The raw word
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Number of elements
    pub const fn num_elements(self) -> u32 {
        self.0 & Self::NUM_ELEMENTS_MASK
    }

    /// Replace the element count
    pub const fn with_num_elements(self, count: u32) -> Self {
        TupleTypeFlags((self.0 & !Self::NUM_ELEMENTS_MASK) | (count & Self::NUM_ELEMENTS_MASK))
    }

    /// The label string is not a constant and must be copied
    pub const fn has_non_constant_labels(self) -> bool {
        self.0 & Self::NON_CONSTANT_LABELS_MASK != 0
    }

    /// Set the non-constant labels bit
    pub const fn with_non_constant_labels(self, on: bool) -> Self {
        if on {
            TupleTypeFlags(self.0 | Self::NON_CONSTANT_LABELS_MASK)
        } else {
            TupleTypeFlags(self.0 & !Self::NON_CONSTANT_LABELS_MASK)
        }
    }
}

/// Flags word of existential type and existential metatype metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ExistentialTypeFlags(u32);

impl ExistentialTypeFlags {
    const NUM_WITNESS_TABLES_MASK: u32 = 0x00FF_FFFF;
    const CLASS_CONSTRAINT_MASK: u32 = 0x8000_0000;
    const HAS_SUPERCLASS_MASK: u32 = 0x4000_0000;
    const SPECIAL_PROTOCOL_MASK: u32 = 0x3F00_0000;
    const SPECIAL_PROTOCOL_SHIFT: u32 = 24;

    /// Class-bounded, no witness tables, no special protocol
    pub const fn new() -> Self {
        ExistentialTypeFlags(0)
    }

    /// Reinterpret a raw word
    pub const fn from_bits(bits: u32) -> Self {
        ExistentialTypeFlags(bits)
    }

    /// The raw word
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Number of witness tables stored in a container
    pub const fn num_witness_tables(self) -> u32 {
        self.0 & Self::NUM_WITNESS_TABLES_MASK
    }

    /// Replace the witness table count
    pub const fn with_num_witness_tables(self, count: u32) -> Self {
        ExistentialTypeFlags(
            (self.0 & !Self::NUM_WITNESS_TABLES_MASK) | (count & Self::NUM_WITNESS_TABLES_MASK),
        )
    }

    /// Class constraint; a clear bit means class-bounded
    pub fn class_constraint(self) -> super::ProtocolClassConstraint {
        if self.0 & Self::CLASS_CONSTRAINT_MASK != 0 {
            super::ProtocolClassConstraint::Any
        } else {
            super::ProtocolClassConstraint::Class
        }
    }

    /// Replace the class constraint
    pub fn with_class_constraint(self, constraint: super::ProtocolClassConstraint) -> Self {
        match constraint {
            super::ProtocolClassConstraint::Any => {
                ExistentialTypeFlags(self.0 | Self::CLASS_CONSTRAINT_MASK)
            }
            super::ProtocolClassConstraint::Class => {
                ExistentialTypeFlags(self.0 & !Self::CLASS_CONSTRAINT_MASK)
            }
        }
    }

    /// A superclass constraint follows the protocol list
    pub const fn has_superclass_constraint(self) -> bool {
        self.0 & Self::HAS_SUPERCLASS_MASK != 0
    }

    /// Set the superclass constraint bit
    pub const fn with_superclass_constraint(self, has: bool) -> Self {
        if has {
            ExistentialTypeFlags(self.0 | Self::HAS_SUPERCLASS_MASK)
        } else {
            ExistentialTypeFlags(self.0 & !Self::HAS_SUPERCLASS_MASK)
        }
    }

    /// Special protocol of the composition
    pub fn special_protocol(self) -> super::SpecialProtocol {
        super::SpecialProtocol::from_raw(
            ((self.0 & Self::SPECIAL_PROTOCOL_MASK) >> Self::SPECIAL_PROTOCOL_SHIFT) as u8,
        )
    }

    /// Replace the special protocol
    pub fn with_special_protocol(self, special: super::SpecialProtocol) -> Self {
        ExistentialTypeFlags(
            (self.0 & !Self::SPECIAL_PROTOCOL_MASK)
                | (((special.raw() as u32) << Self::SPECIAL_PROTOCOL_SHIFT)
                    & Self::SPECIAL_PROTOCOL_MASK),
        )
    }
}

/// One entry of a field type vector: a metadata pointer with flags in its low bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct FieldType(usize);

impl FieldType {
    const INDIRECT: usize = 1;
    const WEAK: usize = 2;
    const TYPE_MASK: usize = !(std::mem::align_of::<usize>() - 1);

    /// A field of the given metadata
    pub fn new(metadata: *const crate::metadata::Metadata) -> Self {
        FieldType(metadata as usize & Self::TYPE_MASK)
    }

    /// Reinterpret a raw word
    pub const fn from_bits(bits: usize) -> Self {
        FieldType(bits)
    }

    /// The raw word
    pub const fn bits(self) -> usize {
        self.0
    }

    /// The field's type metadata address
    pub const fn type_address(self) -> usize {
        self.0 & Self::TYPE_MASK
    }

    /// The field is stored indirectly
    pub const fn is_indirect(self) -> bool {
        self.0 & Self::INDIRECT != 0
    }

    /// Set the indirect bit
    pub const fn with_indirect(self, on: bool) -> Self {
        if on {
            FieldType(self.0 | Self::INDIRECT)
        } else {
            FieldType(self.0 & !Self::INDIRECT)
        }
    }

    /// The field is a weak reference
    pub const fn is_weak(self) -> bool {
        self.0 & Self::WEAK != 0
    }

    /// Set the weak bit
    pub const fn with_weak(self, on: bool) -> Self {
        if on {
            FieldType(self.0 | Self::WEAK)
        } else {
            FieldType(self.0 & !Self::WEAK)
        }
    }
}

/// Layout algorithm selected in struct and enum layout flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutAlgorithm {
    /// The native layout algorithm
    Swift5,
    /// An algorithm this runtime does not implement
    Unknown(u8),
}

macro_rules! layout_flags {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            const ALGORITHM_MASK: usize = 0xFF;
            const IS_VWT_MUTABLE: usize = 0x100;

            /// Native algorithm, immutable witness table
            pub const fn new() -> Self {
                $name(0)
            }

            /// Reinterpret a raw word
            pub const fn from_bits(bits: usize) -> Self {
                $name(bits)
            }

            /// The raw word
            pub const fn bits(self) -> usize {
                self.0
            }

            /// Which layout algorithm to run
            pub fn algorithm(self) -> LayoutAlgorithm {
                match (self.0 & Self::ALGORITHM_MASK) as u8 {
                    0 => LayoutAlgorithm::Swift5,
                    other => LayoutAlgorithm::Unknown(other),
                }
            }

            /// The metadata's value witness table may be updated in place
            pub const fn is_value_witness_table_mutable(self) -> bool {
                self.0 & Self::IS_VWT_MUTABLE != 0
            }

            /// Set the mutable witness table bit
            pub const fn with_value_witness_table_mutable(self, on: bool) -> Self {
                if on {
                    $name(self.0 | Self::IS_VWT_MUTABLE)
                } else {
                    $name(self.0 & !Self::IS_VWT_MUTABLE)
                }
            }
        }
    };
}

layout_flags!(
    /// Flags passed to struct layout initialization
    StructLayoutFlags
);
layout_flags!(
    /// Flags passed to enum layout initialization
    EnumLayoutFlags
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{ProtocolClassConstraint, SpecialProtocol};

    #[test]
    fn test_value_witness_flags_bits() {
        let flags = ValueWitnessFlags::new()
            .with_alignment(8)
            .with_pod(false)
            .with_inline_storage(false)
            .with_extra_inhabitants(true);
        assert_eq!(flags.bits(), 0x7 | 0x10000 | 0x20000 | 0x40000);
        assert_eq!(flags.alignment(), 8);
        assert!(!flags.is_pod());
        assert!(!flags.is_inline_storage());
        assert!(flags.is_bitwise_takable());
        assert!(flags.has_extra_inhabitants());
        assert!(!flags.has_enum_witnesses());

        let flags = flags.with_enum_witnesses(true).with_bitwise_takable(false).with_spare_bits(true);
        assert_eq!(flags.bits() & 0x0038_0000, 0x0038_0000);
    }

    #[test]
    fn test_value_witness_flags_default_is_pod_inline() {
        let flags = ValueWitnessFlags::default();
        assert!(flags.is_pod());
        assert!(flags.is_inline_storage());
        assert_eq!(flags.alignment(), 1);
    }

    #[test]
    fn test_extra_inhabitant_flags_mask() {
        let flags = ExtraInhabitantFlags::new().with_num_extra_inhabitants(u32::MAX);
        assert_eq!(flags.num_extra_inhabitants(), 0x7FFF_FFFF);
    }

    #[test]
    fn test_function_type_flags() {
        let flags = FunctionTypeFlags::new()
            .with_num_parameters(3)
            .with_convention(FunctionConvention::Thin)
            .with_throws(true)
            .with_escaping(true);
        assert_eq!(flags.bits(), 3 | (2 << 16) | 0x0100_0000 | 0x0400_0000);
        assert_eq!(flags.num_parameters(), 3);
        assert_eq!(flags.convention(), FunctionConvention::Thin);
        assert!(!flags.has_parameter_flags());
        assert_eq!(
            FunctionTypeFlags::from_bits(9 << 16).convention(),
            FunctionConvention::Unknown(9)
        );
    }

    #[test]
    fn test_existential_flags() {
        let flags = ExistentialTypeFlags::new();
        assert_eq!(flags.class_constraint(), ProtocolClassConstraint::Class);

        let flags = flags
            .with_class_constraint(ProtocolClassConstraint::Any)
            .with_num_witness_tables(2)
            .with_special_protocol(SpecialProtocol::Error)
            .with_superclass_constraint(true);
        assert_eq!(flags.bits(), 0x8000_0000 | 0x4000_0000 | (1 << 24) | 2);
        assert_eq!(flags.special_protocol(), SpecialProtocol::Error);
        assert_eq!(flags.num_witness_tables(), 2);
    }

    #[test]
    fn test_tuple_flags() {
        let flags = TupleTypeFlags::default().with_num_elements(4).with_non_constant_labels(true);
        assert_eq!(flags.bits(), 0x0001_0004);
    }

    #[test]
    fn test_field_type_flags() {
        let field = FieldType::from_bits(0x1000).with_indirect(true).with_weak(true);
        assert_eq!(field.bits(), 0x1003);
        assert_eq!(field.type_address(), 0x1000);
        assert!(field.is_indirect() && field.is_weak());
    }

    #[test]
    fn test_layout_flags() {
        let flags = StructLayoutFlags::new().with_value_witness_table_mutable(true);
        assert_eq!(flags.bits(), 0x100);
        assert_eq!(flags.algorithm(), LayoutAlgorithm::Swift5);
        assert_eq!(EnumLayoutFlags::from_bits(3).algorithm(), LayoutAlgorithm::Unknown(3));
    }

    #[test]
    fn test_parameter_and_class_flags() {
        assert_eq!((ParameterFlags::IN_OUT | ParameterFlags::VARIADIC).bits(), 5);
        assert_eq!(ClassFlags::USES_SWIFT_REFCOUNTING.bits(), 2);
        assert_eq!(ForeignTypeFlags::HAS_INITIALIZATION_FUNCTION.bits(), 1);
    }
}
