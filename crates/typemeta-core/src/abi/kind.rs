//! Record discriminants

use std::fmt;

/// Largest raw metadata kind that is an enumerated (switchable) value.
///
/// A kind word above this is the isa pointer of a class object.
pub const LAST_ENUMERATED_METADATA_KIND: u64 = 2047;

/// Kind of a metadata record
///
/// Decoding never fails: kinds newer than this runtime map to
/// [`MetadataKind::Unknown`], which every predicate treats as the most
/// conservative family (not a class, not an existential).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    /// A class type (also any isa pointer above the enumerated range)
    Class,
    /// A struct type
    Struct,
    /// An enum type
    Enum,
    /// The optional enum
    Optional,
    /// A builtin opaque type
    Opaque,
    /// A tuple type
    Tuple,
    /// A function type
    Function,
    /// A protocol composition or single-protocol existential
    Existential,
    /// A metatype
    Metatype,
    /// A wrapper around a foreign class object
    ObjCClassWrapper,
    /// An existential metatype
    ExistentialMetatype,
    /// A foreign class imported from another object model
    ForeignClass,
    /// A heap-allocated local variable box
    HeapLocalVariable,
    /// A runtime-instantiated generic local variable box
    HeapGenericLocalVariable,
    /// A boxed error object
    ErrorObject,
    /// An enumerated kind this runtime does not know
    Unknown(u32),
}

impl MetadataKind {
    /// Decode a raw kind word
    pub fn from_raw(raw: u64) -> Self {
        if raw > LAST_ENUMERATED_METADATA_KIND {
            return MetadataKind::Class;
        }
        match raw {
            0 => MetadataKind::Class,
            1 => MetadataKind::Struct,
            2 => MetadataKind::Enum,
            3 => MetadataKind::Optional,
            8 => MetadataKind::Opaque,
            9 => MetadataKind::Tuple,
            10 => MetadataKind::Function,
            12 => MetadataKind::Existential,
            13 => MetadataKind::Metatype,
            14 => MetadataKind::ObjCClassWrapper,
            15 => MetadataKind::ExistentialMetatype,
            16 => MetadataKind::ForeignClass,
            64 => MetadataKind::HeapLocalVariable,
            65 => MetadataKind::HeapGenericLocalVariable,
            128 => MetadataKind::ErrorObject,
            other => MetadataKind::Unknown(other as u32),
        }
    }

    /// The raw value stored in a kind word
    pub const fn raw(self) -> u32 {
        match self {
            MetadataKind::Class => 0,
            MetadataKind::Struct => 1,
            MetadataKind::Enum => 2,
            MetadataKind::Optional => 3,
            MetadataKind::Opaque => 8,
            MetadataKind::Tuple => 9,
            MetadataKind::Function => 10,
            MetadataKind::Existential => 12,
            MetadataKind::Metatype => 13,
            MetadataKind::ObjCClassWrapper => 14,
            MetadataKind::ExistentialMetatype => 15,
            MetadataKind::ForeignClass => 16,
            MetadataKind::HeapLocalVariable => 64,
            MetadataKind::HeapGenericLocalVariable => 65,
            MetadataKind::ErrorObject => 128,
            MetadataKind::Unknown(raw) => raw,
        }
    }

    /// Is this any kind of class (native, wrapped or foreign)?
    pub fn is_any_class(self) -> bool {
        matches!(
            self,
            MetadataKind::Class | MetadataKind::ObjCClassWrapper | MetadataKind::ForeignClass
        )
    }

    /// Is this an existential or existential metatype?
    pub fn is_any_existential(self) -> bool {
        matches!(
            self,
            MetadataKind::Existential | MetadataKind::ExistentialMetatype
        )
    }

    /// Does this kind carry a nominal type context descriptor?
    pub fn is_nominal(self) -> bool {
        matches!(
            self,
            MetadataKind::Class | MetadataKind::Struct | MetadataKind::Enum | MetadataKind::Optional
        )
    }

    /// Is this the metadata of a heap object?
    pub fn is_heap_metadata(self) -> bool {
        matches!(
            self,
            MetadataKind::Class
                | MetadataKind::HeapLocalVariable
                | MetadataKind::HeapGenericLocalVariable
                | MetadataKind::ErrorObject
        )
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataKind::Unknown(raw) => write!(f, "unknown({})", raw),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Kind of a context descriptor (low five bits of its flags)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextDescriptorKind {
    /// A module
    Module,
    /// An extension of another context
    Extension,
    /// An anonymous context such as a function body
    Anonymous,
    /// A class
    Class,
    /// A struct
    Struct,
    /// An enum
    Enum,
    /// A type kind in the reserved type range this runtime does not know
    OtherType(u8),
    /// A non-type kind this runtime does not know
    Unknown(u8),
}

impl ContextDescriptorKind {
    /// First kind value that describes a type
    pub const TYPE_FIRST: u8 = 16;
    /// Last kind value that describes a type
    pub const TYPE_LAST: u8 = 31;

    /// Decode the kind bits
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x1F {
            0 => ContextDescriptorKind::Module,
            1 => ContextDescriptorKind::Extension,
            2 => ContextDescriptorKind::Anonymous,
            16 => ContextDescriptorKind::Class,
            17 => ContextDescriptorKind::Struct,
            18 => ContextDescriptorKind::Enum,
            other if other >= Self::TYPE_FIRST => ContextDescriptorKind::OtherType(other),
            other => ContextDescriptorKind::Unknown(other),
        }
    }

    /// Raw kind bits
    pub fn raw(self) -> u8 {
        match self {
            ContextDescriptorKind::Module => 0,
            ContextDescriptorKind::Extension => 1,
            ContextDescriptorKind::Anonymous => 2,
            ContextDescriptorKind::Class => 16,
            ContextDescriptorKind::Struct => 17,
            ContextDescriptorKind::Enum => 18,
            ContextDescriptorKind::OtherType(raw) | ContextDescriptorKind::Unknown(raw) => raw,
        }
    }

    /// Does this kind describe a nominal type?
    pub fn is_type(self) -> bool {
        (Self::TYPE_FIRST..=Self::TYPE_LAST).contains(&self.raw())
    }
}

/// How a type metadata or conformance record refers to its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeMetadataRecordKind {
    /// Relative pointer to a type context descriptor
    DirectNominalTypeDescriptor,
    /// Relative pointer to a slot holding a type context descriptor pointer
    IndirectNominalTypeDescriptor,
    /// Reserved for future use
    Reserved,
    /// Relative pointer to a slot holding a foreign class object
    IndirectObjCClass,
}

impl TypeMetadataRecordKind {
    /// Decode from the two-bit field
    pub fn from_raw(raw: u32) -> Self {
        match raw & 0x3 {
            0 => TypeMetadataRecordKind::DirectNominalTypeDescriptor,
            1 => TypeMetadataRecordKind::IndirectNominalTypeDescriptor,
            2 => TypeMetadataRecordKind::Reserved,
            _ => TypeMetadataRecordKind::IndirectObjCClass,
        }
    }

    /// Raw field value
    pub fn raw(self) -> u32 {
        match self {
            TypeMetadataRecordKind::DirectNominalTypeDescriptor => 0,
            TypeMetadataRecordKind::IndirectNominalTypeDescriptor => 1,
            TypeMetadataRecordKind::Reserved => 2,
            TypeMetadataRecordKind::IndirectObjCClass => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_kind_round_trip() {
        for raw in [0u64, 1, 2, 3, 8, 9, 10, 12, 13, 14, 15, 16, 64, 65, 128] {
            let kind = MetadataKind::from_raw(raw);
            assert!(!matches!(kind, MetadataKind::Unknown(_)), "kind {} unknown", raw);
            assert_eq!(kind.raw() as u64, raw);
        }
    }

    #[test]
    fn test_metadata_kind_above_ceiling_is_class() {
        assert_eq!(MetadataKind::from_raw(2048), MetadataKind::Class);
        assert_eq!(MetadataKind::from_raw(0x7fff_0000_1000), MetadataKind::Class);
        assert_eq!(
            MetadataKind::from_raw(LAST_ENUMERATED_METADATA_KIND),
            MetadataKind::Unknown(2047)
        );
    }

    #[test]
    fn test_unknown_kind_is_conservative() {
        let kind = MetadataKind::from_raw(200);
        assert_eq!(kind, MetadataKind::Unknown(200));
        assert!(!kind.is_any_class());
        assert!(!kind.is_any_existential());
        assert!(!kind.is_nominal());
        assert_eq!(kind.to_string(), "unknown(200)");
    }

    #[test]
    fn test_context_descriptor_kind() {
        assert_eq!(ContextDescriptorKind::from_raw(0), ContextDescriptorKind::Module);
        assert_eq!(ContextDescriptorKind::from_raw(17), ContextDescriptorKind::Struct);
        assert_eq!(ContextDescriptorKind::from_raw(25), ContextDescriptorKind::OtherType(25));
        assert_eq!(ContextDescriptorKind::from_raw(5), ContextDescriptorKind::Unknown(5));
        assert!(ContextDescriptorKind::OtherType(25).is_type());
        assert!(!ContextDescriptorKind::Extension.is_type());
        // Only the low five bits are the kind.
        assert_eq!(ContextDescriptorKind::from_raw(0x40 | 16), ContextDescriptorKind::Class);
    }

    #[test]
    fn test_type_metadata_record_kind() {
        for raw in 0..4 {
            assert_eq!(TypeMetadataRecordKind::from_raw(raw).raw(), raw);
        }
    }
}
