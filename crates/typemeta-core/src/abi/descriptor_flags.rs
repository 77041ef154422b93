//! Flag words stored in context, protocol and conformance descriptors

use super::{ContextDescriptorKind, TypeMetadataRecordKind};

/// First 32-bit word of every context descriptor
///
/// ```text
/// bits 0..5    kind
/// bit  6       unique
/// bit  7       generic
/// bits 8..16   version
/// bits 16..32  kind-specific flags
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ContextDescriptorFlags(u32);

impl ContextDescriptorFlags {
    /// Flags for a descriptor of the given kind
    pub fn new(kind: ContextDescriptorKind) -> Self {
        ContextDescriptorFlags(0).with_kind(kind)
    }

    /// Reinterpret a raw word
    pub const fn from_bits(bits: u32) -> Self {
        ContextDescriptorFlags(bits)
    }

    /// The raw word
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Kind of context described
    pub fn kind(self) -> ContextDescriptorKind {
        ContextDescriptorKind::from_raw((self.0 & 0x1F) as u8)
    }

    /// Replace the kind
    pub fn with_kind(self, kind: ContextDescriptorKind) -> Self {
        debug_assert_eq!(kind.raw() & 0x1F, kind.raw());
        ContextDescriptorFlags((self.0 & 0xFFFF_FFE0) | kind.raw() as u32)
    }

    /// The context has a generic signature
    pub const fn is_generic(self) -> bool {
        self.0 & 0x80 != 0
    }

    /// Set the generic bit
    pub const fn with_generic(self, generic: bool) -> Self {
        ContextDescriptorFlags((self.0 & 0xFFFF_FF7F) | if generic { 0x80 } else { 0 })
    }

    /// This record is the unique descriptor of its context
    pub const fn is_unique(self) -> bool {
        self.0 & 0x40 != 0
    }

    /// Set the unique bit
    pub const fn with_unique(self, unique: bool) -> Self {
        ContextDescriptorFlags((self.0 & 0xFFFF_FFBF) | if unique { 0x40 } else { 0 })
    }

    /// Format version of the descriptor
    pub const fn version(self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    /// Replace the version
    pub const fn with_version(self, version: u8) -> Self {
        ContextDescriptorFlags((self.0 & 0xFFFF_00FF) | ((version as u32) << 8))
    }

    /// Upper half-word, interpreted per kind
    pub const fn kind_specific_flags(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Replace the kind-specific half-word
    pub const fn with_kind_specific_flags(self, flags: u16) -> Self {
        ContextDescriptorFlags((self.0 & 0xFFFF) | ((flags as u32) << 16))
    }

    /// Kind-specific flags of a type descriptor
    pub fn type_flags(self) -> TypeContextDescriptorFlags {
        TypeContextDescriptorFlags::from_bits_retain(self.kind_specific_flags())
    }
}

bitflags::bitflags! {
    /// Kind-specific flags of a nominal type descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeContextDescriptorFlags: u16 {
        /// A vtable header and method descriptors trail the generic context
        const HAS_VTABLE = 0x8000;
        /// The class has an ancestor whose metadata size is only known at runtime
        const HAS_RESILIENT_SUPERCLASS = 0x4000;
        /// Imported C tag type
        const IS_C_TAG = 0x2000;
        /// Imported C typedef
        const IS_C_TYPEDEF = 0x1000;
    }
}

/// Kind of a generic parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericParamKind {
    /// A type parameter
    Type,
    /// A kind this runtime does not know
    Unknown(u8),
}

/// One-byte descriptor of a generic parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct GenericParamDescriptor(u8);

impl GenericParamDescriptor {
    /// A type parameter passed as a key argument
    pub const fn key_type() -> Self {
        GenericParamDescriptor(0x80)
    }

    /// Reinterpret a raw byte
    pub const fn from_bits(bits: u8) -> Self {
        GenericParamDescriptor(bits)
    }

    /// The raw byte
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Parameter kind
    pub fn kind(self) -> GenericParamKind {
        match self.0 & 0x3F {
            0 => GenericParamKind::Type,
            other => GenericParamKind::Unknown(other),
        }
    }

    /// The parameter's metadata is part of the uniquing key
    pub const fn has_key_argument(self) -> bool {
        self.0 & 0x80 != 0
    }

    /// Set the key argument bit
    pub const fn with_key_argument(self, on: bool) -> Self {
        GenericParamDescriptor((self.0 & 0x7F) | if on { 0x80 } else { 0 })
    }

    /// The parameter is passed as an extra (non-key) argument
    pub const fn has_extra_argument(self) -> bool {
        self.0 & 0x40 != 0
    }

    /// Set the extra argument bit
    pub const fn with_extra_argument(self, on: bool) -> Self {
        GenericParamDescriptor((self.0 & 0xBF) | if on { 0x40 } else { 0 })
    }
}

/// Kind of a generic requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericRequirementKind {
    /// The subject conforms to a protocol
    Protocol,
    /// The subject equals a named type
    SameType,
    /// The subject inherits from a named class
    BaseClass,
    /// Conformance implied by a same-type or base-class requirement
    SameConformance,
    /// The subject satisfies a layout constraint
    Layout,
    /// A kind this runtime does not know
    Unknown(u8),
}

impl GenericRequirementKind {
    /// Decode the five kind bits
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x1F {
            0 => GenericRequirementKind::Protocol,
            1 => GenericRequirementKind::SameType,
            2 => GenericRequirementKind::BaseClass,
            3 => GenericRequirementKind::SameConformance,
            0x1F => GenericRequirementKind::Layout,
            other => GenericRequirementKind::Unknown(other),
        }
    }

    /// Raw kind bits
    pub fn raw(self) -> u8 {
        match self {
            GenericRequirementKind::Protocol => 0,
            GenericRequirementKind::SameType => 1,
            GenericRequirementKind::BaseClass => 2,
            GenericRequirementKind::SameConformance => 3,
            GenericRequirementKind::Layout => 0x1F,
            GenericRequirementKind::Unknown(raw) => raw,
        }
    }
}

/// Flags word of a generic requirement descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct GenericRequirementFlags(u32);

impl GenericRequirementFlags {
    /// Flags for a requirement of the given kind
    pub fn new(kind: GenericRequirementKind, key_argument: bool, extra_argument: bool) -> Self {
        GenericRequirementFlags(kind.raw() as u32 & 0x1F)
            .with_key_argument(key_argument)
            .with_extra_argument(extra_argument)
    }

    /// Reinterpret a raw word
    pub const fn from_bits(bits: u32) -> Self {
        GenericRequirementFlags(bits)
    }

    /// The raw word
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Requirement kind
    pub fn kind(self) -> GenericRequirementKind {
        GenericRequirementKind::from_raw((self.0 & 0x1F) as u8)
    }

    /// The requirement contributes a key argument (e.g. a witness table)
    pub const fn has_key_argument(self) -> bool {
        self.0 & 0x80 != 0
    }

    /// Set the key argument bit
    pub const fn with_key_argument(self, on: bool) -> Self {
        GenericRequirementFlags((self.0 & !0x80) | if on { 0x80 } else { 0 })
    }

    /// The requirement contributes an extra argument
    pub const fn has_extra_argument(self) -> bool {
        self.0 & 0x40 != 0
    }

    /// Set the extra argument bit
    pub const fn with_extra_argument(self, on: bool) -> Self {
        GenericRequirementFlags((self.0 & !0x40) | if on { 0x40 } else { 0 })
    }
}

/// Layout constraint named by a layout requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericRequirementLayoutKind {
    /// The subject must be a class
    Class,
    /// A layout this runtime does not know
    Unknown(u32),
}

impl GenericRequirementLayoutKind {
    /// Decode a raw layout word
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => GenericRequirementLayoutKind::Class,
            other => GenericRequirementLayoutKind::Unknown(other),
        }
    }
}

/// Kind of a vtable method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodDescriptorKind {
    /// Ordinary method
    Method,
    /// Initializer
    Init,
    /// Property getter
    Getter,
    /// Property setter
    Setter,
    /// Property materializeForSet accessor
    MaterializeForSet,
    /// A kind this runtime does not know
    Unknown(u8),
}

/// Flags word of a method descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct MethodDescriptorFlags(u32);

impl MethodDescriptorFlags {
    const KIND_MASK: u32 = 0x0F;
    const IS_INSTANCE_MASK: u32 = 0x10;
    const IS_DYNAMIC_MASK: u32 = 0x20;

    /// Flags of a method of the given kind
    pub fn new(kind: MethodDescriptorKind) -> Self {
        let raw = match kind {
            MethodDescriptorKind::Method => 0,
            MethodDescriptorKind::Init => 1,
            MethodDescriptorKind::Getter => 2,
            MethodDescriptorKind::Setter => 3,
            MethodDescriptorKind::MaterializeForSet => 4,
            MethodDescriptorKind::Unknown(raw) => raw as u32,
        };
        MethodDescriptorFlags(raw & Self::KIND_MASK)
    }

    /// Reinterpret a raw word
    pub const fn from_bits(bits: u32) -> Self {
        MethodDescriptorFlags(bits)
    }

    /// The raw word
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Method kind
    pub fn kind(self) -> MethodDescriptorKind {
        match (self.0 & Self::KIND_MASK) as u8 {
            0 => MethodDescriptorKind::Method,
            1 => MethodDescriptorKind::Init,
            2 => MethodDescriptorKind::Getter,
            3 => MethodDescriptorKind::Setter,
            4 => MethodDescriptorKind::MaterializeForSet,
            other => MethodDescriptorKind::Unknown(other),
        }
    }

    /// Instance member (initializers are not instance members)
    pub const fn is_instance(self) -> bool {
        self.0 & Self::IS_INSTANCE_MASK != 0
    }

    /// Set the instance bit
    pub const fn with_instance(self, on: bool) -> Self {
        MethodDescriptorFlags((self.0 & !Self::IS_INSTANCE_MASK) | if on { Self::IS_INSTANCE_MASK } else { 0 })
    }

    /// Dynamically dispatched
    pub const fn is_dynamic(self) -> bool {
        self.0 & Self::IS_DYNAMIC_MASK != 0
    }

    /// Set the dynamic bit
    pub const fn with_dynamic(self, on: bool) -> Self {
        MethodDescriptorFlags((self.0 & !Self::IS_DYNAMIC_MASK) | if on { Self::IS_DYNAMIC_MASK } else { 0 })
    }
}

/// Which kinds of types may conform to a protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolClassConstraint {
    /// Only classes (encoded as a clear bit)
    Class,
    /// Any type
    Any,
}

/// Protocols the runtime treats specially
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialProtocol {
    /// Not special
    None,
    /// The error protocol, which uses a boxed existential representation
    Error,
    /// A special protocol this runtime does not know
    Unknown(u8),
}

impl SpecialProtocol {
    /// Decode a raw value
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => SpecialProtocol::None,
            1 => SpecialProtocol::Error,
            other => SpecialProtocol::Unknown(other),
        }
    }

    /// Raw value
    pub fn raw(self) -> u8 {
        match self {
            SpecialProtocol::None => 0,
            SpecialProtocol::Error => 1,
            SpecialProtocol::Unknown(raw) => raw,
        }
    }
}

/// How requirements of a protocol are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolDispatchStrategy {
    /// Foreign message dispatch, no witness table
    ObjC,
    /// Witness table dispatch
    Swift,
    /// A strategy this runtime does not know
    Unknown(u8),
}

/// Flags word of a protocol descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ProtocolDescriptorFlags(u32);

impl ProtocolDescriptorFlags {
    const IS_SWIFT: u32 = 1 << 0;
    const CLASS_CONSTRAINT: u32 = 1 << 1;
    const DISPATCH_STRATEGY_MASK: u32 = 0xF << 2;
    const DISPATCH_STRATEGY_SHIFT: u32 = 2;
    const SPECIAL_PROTOCOL_MASK: u32 = 0x0000_03C0;
    const SPECIAL_PROTOCOL_SHIFT: u32 = 6;
    const IS_RESILIENT: u32 = 1 << 10;

    /// Empty flags (class-constrained, foreign dispatch)
    pub const fn new() -> Self {
        ProtocolDescriptorFlags(0)
    }

    /// Flags of a native protocol usable by any type with witness table dispatch
    pub fn native() -> Self {
        ProtocolDescriptorFlags::new()
            .with_swift(true)
            .with_class_constraint(ProtocolClassConstraint::Any)
            .with_dispatch_strategy(ProtocolDispatchStrategy::Swift)
    }

    /// Reinterpret a raw word
    pub const fn from_bits(bits: u32) -> Self {
        ProtocolDescriptorFlags(bits)
    }

    /// The raw word
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Native protocol
    pub const fn is_swift(self) -> bool {
        self.0 & Self::IS_SWIFT != 0
    }

    /// Set the native bit
    pub const fn with_swift(self, on: bool) -> Self {
        ProtocolDescriptorFlags((self.0 & !Self::IS_SWIFT) | if on { Self::IS_SWIFT } else { 0 })
    }

    /// Class constraint
    pub fn class_constraint(self) -> ProtocolClassConstraint {
        if self.0 & Self::CLASS_CONSTRAINT != 0 {
            ProtocolClassConstraint::Any
        } else {
            ProtocolClassConstraint::Class
        }
    }

    /// Replace the class constraint
    pub fn with_class_constraint(self, constraint: ProtocolClassConstraint) -> Self {
        let bit = match constraint {
            ProtocolClassConstraint::Any => Self::CLASS_CONSTRAINT,
            ProtocolClassConstraint::Class => 0,
        };
        ProtocolDescriptorFlags((self.0 & !Self::CLASS_CONSTRAINT) | bit)
    }

    /// Dispatch strategy
    pub fn dispatch_strategy(self) -> ProtocolDispatchStrategy {
        match ((self.0 & Self::DISPATCH_STRATEGY_MASK) >> Self::DISPATCH_STRATEGY_SHIFT) as u8 {
            0 => ProtocolDispatchStrategy::ObjC,
            1 => ProtocolDispatchStrategy::Swift,
            other => ProtocolDispatchStrategy::Unknown(other),
        }
    }

    /// Replace the dispatch strategy
    pub fn with_dispatch_strategy(self, strategy: ProtocolDispatchStrategy) -> Self {
        let raw = match strategy {
            ProtocolDispatchStrategy::ObjC => 0,
            ProtocolDispatchStrategy::Swift => 1,
            ProtocolDispatchStrategy::Unknown(raw) => raw as u32,
        };
        ProtocolDescriptorFlags(
            (self.0 & !Self::DISPATCH_STRATEGY_MASK)
                | ((raw << Self::DISPATCH_STRATEGY_SHIFT) & Self::DISPATCH_STRATEGY_MASK),
        )
    }

    /// Conformances need a witness table
    pub fn needs_witness_table(self) -> bool {
        matches!(self.dispatch_strategy(), ProtocolDispatchStrategy::Swift)
    }

    /// Special protocol identifier
    pub fn special_protocol(self) -> SpecialProtocol {
        SpecialProtocol::from_raw(
            ((self.0 & Self::SPECIAL_PROTOCOL_MASK) >> Self::SPECIAL_PROTOCOL_SHIFT) as u8,
        )
    }

    /// Replace the special protocol
    pub fn with_special_protocol(self, special: SpecialProtocol) -> Self {
        ProtocolDescriptorFlags(
            (self.0 & !Self::SPECIAL_PROTOCOL_MASK)
                | (((special.raw() as u32) << Self::SPECIAL_PROTOCOL_SHIFT)
                    & Self::SPECIAL_PROTOCOL_MASK),
        )
    }

    /// Requirements with defaults may be added without recompiling conformers
    pub const fn is_resilient(self) -> bool {
        self.0 & Self::IS_RESILIENT != 0
    }

    /// Set the resilient bit
    pub const fn with_resilient(self, on: bool) -> Self {
        ProtocolDescriptorFlags((self.0 & !Self::IS_RESILIENT) | if on { Self::IS_RESILIENT } else { 0 })
    }
}

/// Kind of a protocol requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolRequirementKind {
    /// Witness table of an inherited protocol
    BaseProtocol,
    /// Method
    Method,
    /// Initializer
    Init,
    /// Property getter
    Getter,
    /// Property setter
    Setter,
    /// materializeForSet accessor
    MaterializeForSet,
    /// Function returning an associated type's metadata
    AssociatedTypeAccessFunction,
    /// Function returning an associated conformance's witness table
    AssociatedConformanceAccessFunction,
    /// A kind this runtime does not know
    Unknown(u8),
}

/// Flags word of a protocol requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ProtocolRequirementFlags(u32);

impl ProtocolRequirementFlags {
    const KIND_MASK: u32 = 0x0F;
    const IS_INSTANCE_MASK: u32 = 0x10;

    /// Flags of a requirement of the given kind
    pub fn new(kind: ProtocolRequirementKind) -> Self {
        let raw = match kind {
            ProtocolRequirementKind::BaseProtocol => 0,
            ProtocolRequirementKind::Method => 1,
            ProtocolRequirementKind::Init => 2,
            ProtocolRequirementKind::Getter => 3,
            ProtocolRequirementKind::Setter => 4,
            ProtocolRequirementKind::MaterializeForSet => 5,
            ProtocolRequirementKind::AssociatedTypeAccessFunction => 6,
            ProtocolRequirementKind::AssociatedConformanceAccessFunction => 7,
            ProtocolRequirementKind::Unknown(raw) => raw as u32,
        };
        ProtocolRequirementFlags(raw & Self::KIND_MASK)
    }

    /// Reinterpret a raw word
    pub const fn from_bits(bits: u32) -> Self {
        ProtocolRequirementFlags(bits)
    }

    /// The raw word
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Requirement kind
    pub fn kind(self) -> ProtocolRequirementKind {
        match (self.0 & Self::KIND_MASK) as u8 {
            0 => ProtocolRequirementKind::BaseProtocol,
            1 => ProtocolRequirementKind::Method,
            2 => ProtocolRequirementKind::Init,
            3 => ProtocolRequirementKind::Getter,
            4 => ProtocolRequirementKind::Setter,
            5 => ProtocolRequirementKind::MaterializeForSet,
            6 => ProtocolRequirementKind::AssociatedTypeAccessFunction,
            7 => ProtocolRequirementKind::AssociatedConformanceAccessFunction,
            other => ProtocolRequirementKind::Unknown(other),
        }
    }

    /// Instance member
    pub const fn is_instance(self) -> bool {
        self.0 & Self::IS_INSTANCE_MASK != 0
    }

    /// Set the instance bit
    pub const fn with_instance(self, on: bool) -> Self {
        ProtocolRequirementFlags((self.0 & !Self::IS_INSTANCE_MASK) | if on { Self::IS_INSTANCE_MASK } else { 0 })
    }
}

/// How a conformance descriptor provides its witness table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConformanceKind {
    /// Relative pointer to a static witness table
    WitnessTable,
    /// Accessor function called with no conditional tables
    WitnessTableAccessor,
    /// Accessor function called with the conditional requirements' tables
    ConditionalWitnessTableAccessor,
    /// A kind this runtime does not know
    Unknown(u8),
}

impl ConformanceKind {
    fn raw(self) -> u32 {
        match self {
            ConformanceKind::WitnessTable => 0,
            ConformanceKind::WitnessTableAccessor => 1,
            ConformanceKind::ConditionalWitnessTableAccessor => 2,
            ConformanceKind::Unknown(raw) => raw as u32,
        }
    }
}

/// Flags word of a protocol conformance descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ConformanceFlags(u32);

impl ConformanceFlags {
    const CONFORMANCE_KIND_MASK: u32 = 0x07;
    const TYPE_METADATA_KIND_MASK: u32 = 0x7 << 3;
    const TYPE_METADATA_KIND_SHIFT: u32 = 3;
    const IS_RETROACTIVE_MASK: u32 = 0x01 << 6;
    const IS_SYNTHESIZED_NON_UNIQUE_MASK: u32 = 0x01 << 7;
    const NUM_CONDITIONAL_REQUIREMENTS_MASK: u32 = 0xFF << 8;
    const NUM_CONDITIONAL_REQUIREMENTS_SHIFT: u32 = 8;

    /// Direct witness table, direct nominal type reference
    pub const fn new() -> Self {
        ConformanceFlags(0)
    }

    /// Reinterpret a raw word
    pub const fn from_bits(bits: u32) -> Self {
        ConformanceFlags(bits)
    }

    /// The raw word
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// How the witness table is provided
    pub fn conformance_kind(self) -> ConformanceKind {
        match (self.0 & Self::CONFORMANCE_KIND_MASK) as u8 {
            0 => ConformanceKind::WitnessTable,
            1 => ConformanceKind::WitnessTableAccessor,
            2 => ConformanceKind::ConditionalWitnessTableAccessor,
            other => ConformanceKind::Unknown(other),
        }
    }

    /// Replace the conformance kind
    pub fn with_conformance_kind(self, kind: ConformanceKind) -> Self {
        ConformanceFlags(
            (self.0 & !Self::CONFORMANCE_KIND_MASK) | (kind.raw() & Self::CONFORMANCE_KIND_MASK),
        )
    }

    /// How the conforming type is referenced
    pub fn type_reference_kind(self) -> TypeMetadataRecordKind {
        TypeMetadataRecordKind::from_raw(
            (self.0 & Self::TYPE_METADATA_KIND_MASK) >> Self::TYPE_METADATA_KIND_SHIFT,
        )
    }

    /// The raw three-bit type reference kind (values above 3 are invalid)
    pub const fn raw_type_reference_kind(self) -> u32 {
        (self.0 & Self::TYPE_METADATA_KIND_MASK) >> Self::TYPE_METADATA_KIND_SHIFT
    }

    /// Replace the type reference kind
    pub fn with_type_reference_kind(self, kind: TypeMetadataRecordKind) -> Self {
        ConformanceFlags(
            (self.0 & !Self::TYPE_METADATA_KIND_MASK)
                | (kind.raw() << Self::TYPE_METADATA_KIND_SHIFT),
        )
    }

    /// Declared outside both the type's and the protocol's module
    pub const fn is_retroactive(self) -> bool {
        self.0 & Self::IS_RETROACTIVE_MASK != 0
    }

    /// Set the retroactive bit
    pub const fn with_retroactive(self, on: bool) -> Self {
        ConformanceFlags((self.0 & !Self::IS_RETROACTIVE_MASK) | if on { Self::IS_RETROACTIVE_MASK } else { 0 })
    }

    /// Synthesized conformance that may be emitted in several images
    pub const fn is_synthesized_non_unique(self) -> bool {
        self.0 & Self::IS_SYNTHESIZED_NON_UNIQUE_MASK != 0
    }

    /// Set the synthesized non-unique bit
    pub const fn with_synthesized_non_unique(self, on: bool) -> Self {
        ConformanceFlags(
            (self.0 & !Self::IS_SYNTHESIZED_NON_UNIQUE_MASK)
                | if on { Self::IS_SYNTHESIZED_NON_UNIQUE_MASK } else { 0 },
        )
    }

    /// Number of trailing conditional requirements
    pub const fn num_conditional_requirements(self) -> u32 {
        (self.0 & Self::NUM_CONDITIONAL_REQUIREMENTS_MASK) >> Self::NUM_CONDITIONAL_REQUIREMENTS_SHIFT
    }

    /// Replace the conditional requirement count
    pub const fn with_num_conditional_requirements(self, count: u32) -> Self {
        ConformanceFlags(
            (self.0 & !Self::NUM_CONDITIONAL_REQUIREMENTS_MASK)
                | ((count << Self::NUM_CONDITIONAL_REQUIREMENTS_SHIFT)
                    & Self::NUM_CONDITIONAL_REQUIREMENTS_MASK),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_descriptor_flags_layout() {
        let flags = ContextDescriptorFlags::new(ContextDescriptorKind::Class)
            .with_generic(true)
            .with_unique(true)
            .with_version(2)
            .with_kind_specific_flags(TypeContextDescriptorFlags::HAS_VTABLE.bits());
        assert_eq!(flags.bits(), 16 | 0x40 | 0x80 | (2 << 8) | (0x8000 << 16));
        assert_eq!(flags.kind(), ContextDescriptorKind::Class);
        assert!(flags.is_generic());
        assert!(flags.is_unique());
        assert_eq!(flags.version(), 2);
        assert!(flags.type_flags().contains(TypeContextDescriptorFlags::HAS_VTABLE));
        assert!(!flags.type_flags().contains(TypeContextDescriptorFlags::HAS_RESILIENT_SUPERCLASS));
    }

    #[test]
    fn test_generic_param_descriptor() {
        let param = GenericParamDescriptor::key_type();
        assert_eq!(param.bits(), 0x80);
        assert_eq!(param.kind(), GenericParamKind::Type);
        assert!(param.has_key_argument());
        assert!(!param.has_extra_argument());
        assert_eq!(param.with_extra_argument(true).bits(), 0xC0);
        assert_eq!(GenericParamDescriptor::from_bits(0x05).kind(), GenericParamKind::Unknown(5));
    }

    #[test]
    fn test_generic_requirement_flags() {
        let flags = GenericRequirementFlags::new(GenericRequirementKind::Protocol, true, false);
        assert_eq!(flags.bits(), 0x80);
        assert_eq!(flags.kind(), GenericRequirementKind::Protocol);
        let layout = GenericRequirementFlags::new(GenericRequirementKind::Layout, false, true);
        assert_eq!(layout.bits(), 0x1F | 0x40);
        assert_eq!(layout.kind(), GenericRequirementKind::Layout);
        assert_eq!(GenericRequirementKind::from_raw(9), GenericRequirementKind::Unknown(9));
    }

    #[test]
    fn test_method_descriptor_flags() {
        let flags = MethodDescriptorFlags::new(MethodDescriptorKind::Getter)
            .with_instance(true)
            .with_dynamic(true);
        assert_eq!(flags.bits(), 2 | 0x10 | 0x20);
        assert_eq!(flags.kind(), MethodDescriptorKind::Getter);
    }

    #[test]
    fn test_protocol_descriptor_flags() {
        let flags = ProtocolDescriptorFlags::native()
            .with_special_protocol(SpecialProtocol::Error)
            .with_resilient(true);
        assert_eq!(flags.bits(), 1 | 2 | (1 << 2) | (1 << 6) | (1 << 10));
        assert_eq!(flags.class_constraint(), ProtocolClassConstraint::Any);
        assert_eq!(flags.dispatch_strategy(), ProtocolDispatchStrategy::Swift);
        assert!(flags.needs_witness_table());
        assert_eq!(flags.special_protocol(), SpecialProtocol::Error);
        assert!(flags.is_resilient());
        assert_eq!(ProtocolDescriptorFlags::new().class_constraint(), ProtocolClassConstraint::Class);
    }

    #[test]
    fn test_protocol_requirement_flags() {
        let flags = ProtocolRequirementFlags::new(ProtocolRequirementKind::AssociatedTypeAccessFunction);
        assert_eq!(flags.bits(), 6);
        assert_eq!(flags.kind(), ProtocolRequirementKind::AssociatedTypeAccessFunction);
        assert!(flags.with_instance(true).is_instance());
    }

    #[test]
    fn test_conformance_flags_layout() {
        let flags = ConformanceFlags::new()
            .with_conformance_kind(ConformanceKind::ConditionalWitnessTableAccessor)
            .with_type_reference_kind(TypeMetadataRecordKind::IndirectNominalTypeDescriptor)
            .with_retroactive(true)
            .with_num_conditional_requirements(3);
        assert_eq!(flags.bits(), 2 | (1 << 3) | 0x40 | (3 << 8));
        assert_eq!(flags.conformance_kind(), ConformanceKind::ConditionalWitnessTableAccessor);
        assert_eq!(
            flags.type_reference_kind(),
            TypeMetadataRecordKind::IndirectNominalTypeDescriptor
        );
        assert!(flags.is_retroactive());
        assert!(!flags.is_synthesized_non_unique());
        assert_eq!(flags.num_conditional_requirements(), 3);
        assert_eq!(ConformanceFlags::from_bits(5).conformance_kind(), ConformanceKind::Unknown(5));
    }
}
