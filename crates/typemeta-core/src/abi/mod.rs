//! Frozen ABI values
//!
//! Every discriminant and flag word shared between record producers and the
//! runtime lives here. Bit positions in this module are permanent: new
//! meaning may only be assigned to bits that are currently reserved.

mod descriptor_flags;
mod kind;
mod value_flags;

pub use descriptor_flags::{
    ConformanceFlags, ConformanceKind, ContextDescriptorFlags, GenericParamDescriptor,
    GenericParamKind, GenericRequirementFlags, GenericRequirementKind,
    GenericRequirementLayoutKind, MethodDescriptorFlags, MethodDescriptorKind,
    ProtocolClassConstraint, ProtocolDescriptorFlags, ProtocolDispatchStrategy,
    ProtocolRequirementFlags, ProtocolRequirementKind, SpecialProtocol,
    TypeContextDescriptorFlags,
};
pub use kind::{
    ContextDescriptorKind, MetadataKind, TypeMetadataRecordKind, LAST_ENUMERATED_METADATA_KIND,
};
pub use value_flags::{
    ClassFlags, EnumLayoutFlags, ExistentialTypeFlags, ExtraInhabitantFlags, FieldType,
    ForeignTypeFlags, FunctionConvention, FunctionTypeFlags, LayoutAlgorithm, ParameterFlags,
    StructLayoutFlags, TupleTypeFlags, ValueWitnessFlags,
};

/// Number of words in a [`ValueBuffer`](crate::witness::ValueBuffer)
pub const NUM_WORDS_VALUE_BUFFER: usize = 3;

/// Words of runtime-private storage in a generic metadata pattern
pub const NUM_GENERIC_METADATA_PRIVATE_DATA_WORDS: usize = 16;

/// Generic arguments passed directly to a metadata access function
pub const NUM_DIRECT_GENERIC_TYPE_METADATA_ACCESS_FUNCTION_ARGS: usize = 3;

/// Index of the first requirement in a witness table.
///
/// Word 0 holds the conformance descriptor the table was generated from.
pub const WITNESS_TABLE_FIRST_REQUIREMENT_OFFSET: usize = 1;

/// Low bit of a class's data word marking genuine type metadata
pub const CLASS_IS_TYPE_METADATA_MASK: u64 = 1;

/// Smallest address that can hold a heap object.
///
/// Every smaller bit pattern of a heap or function pointer is an extra
/// inhabitant.
pub const LEAST_VALID_POINTER_VALUE: u64 = 4096;
