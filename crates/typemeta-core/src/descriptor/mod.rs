//! Context descriptors
//!
//! Every declaration context (module, extension, anonymous context, nominal
//! type) is described by a record that starts with the same two fields:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────┐
//! │ flags: u32       │ parent: relative indirectable │
//! └──────────────────┴──────────────────────────────┘
//! ```
//!
//! followed by kind-specific fields and then the trailing arrays laid out by
//! [`TrailingLayout`](crate::layout::TrailingLayout). Parent links form a
//! chain that ends at a module.

mod conformance;
mod generic;
mod protocol;
mod types;

pub use conformance::{
    read_conformance_records, read_type_metadata_records, ConformanceDescriptor,
    GenericWitnessTable, TypeReference, WitnessTable, WitnessTableAccessor,
    WitnessTableInstantiator, CONFORMANCE_DESCRIPTOR_SIZE, GENERIC_WITNESS_TABLE_SIZE,
};
pub use generic::{
    AssociatedTypeStep, GenericContext, GenericContextHeader, GenericParamRef, GenericRequirement,
    RequirementContent, TypeGenericContextHeader, GENERIC_REQUIREMENT_SIZE,
};
pub use protocol::{
    protocol_descriptor_size, read_protocol_records, ProtocolDescriptor, ProtocolRequirement,
    PROTOCOL_REQUIREMENT_SIZE,
};
pub use types::{
    FieldTypesAccessor, MetadataAccessFunction, MethodDescriptor, TypeContextDescriptor,
    TypeTrailingLayout, VTableHeader, METHOD_DESCRIPTOR_SIZE, TYPE_DESCRIPTOR_HEADER_SIZE,
};

use crate::abi::{ContextDescriptorFlags, ContextDescriptorKind};
use crate::error::{ReadError, ReadResult};
use crate::pointer::{
    Address, MemoryReader, RelativeDirectPointer, RelativeIndirectablePointer,
};
use std::fmt;

/// Bytes of the flags and parent fields
pub const CONTEXT_DESCRIPTOR_HEADER_SIZE: u64 = 8;

/// Deepest parent chain followed before a record is considered corrupt
pub const MAX_CONTEXT_DEPTH: usize = 256;

/// Shared shape of every descriptor view
macro_rules! descriptor_view {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name<'r, R> {
            reader: &'r R,
            address: crate::pointer::Address,
        }

        impl<'r, R> Clone for $name<'r, R> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<'r, R> Copy for $name<'r, R> {}

        impl<'r, R> std::fmt::Debug for $name<'r, R> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.address)
            }
        }

        impl<'r, R: crate::pointer::MemoryReader> $name<'r, R> {
            /// View the record at `address`
            pub fn new(reader: &'r R, address: crate::pointer::Address) -> Self {
                Self { reader, address }
            }

            /// Address of the record
            pub fn address(&self) -> crate::pointer::Address {
                self.address
            }

            /// The reader
            pub fn reader(&self) -> &'r R {
                self.reader
            }
        }
    };
}
pub(crate) use descriptor_view;

/// Flags of the context descriptor at `address`
fn read_flags<R: MemoryReader>(reader: &R, address: Address) -> ReadResult<ContextDescriptorFlags> {
    Ok(ContextDescriptorFlags::from_bits(reader.read_u32(address)?))
}

/// Parent of the context descriptor at `address`
fn read_parent<'r, R: MemoryReader>(
    reader: &'r R,
    address: Address,
) -> ReadResult<Option<ContextDescriptor<'r, R>>> {
    match reader.resolve_relative::<RelativeIndirectablePointer<true>>(address + 4)? {
        Some(parent) => ContextDescriptor::read(reader, parent).map(Some),
        None => Ok(None),
    }
}

descriptor_view!(
    /// Descriptor of a module
    ModuleDescriptor
);

impl<'r, R: MemoryReader> ModuleDescriptor<'r, R> {
    /// Flags word
    pub fn flags(&self) -> ReadResult<ContextDescriptorFlags> {
        read_flags(self.reader, self.address)
    }

    /// Module name
    pub fn name(&self) -> ReadResult<String> {
        let name = self
            .reader
            .resolve_relative_required::<RelativeDirectPointer<false>>(self.address + 8)?;
        self.reader.read_c_string(name)
    }
}

descriptor_view!(
    /// Descriptor of an extension
    ExtensionDescriptor
);

impl<'r, R: MemoryReader> ExtensionDescriptor<'r, R> {
    /// Flags word
    pub fn flags(&self) -> ReadResult<ContextDescriptorFlags> {
        read_flags(self.reader, self.address)
    }

    /// Mangled name of the extended context, as raw bytes
    pub fn extended_context(&self) -> ReadResult<Vec<u8>> {
        let name = self
            .reader
            .resolve_relative_required::<RelativeDirectPointer<false>>(self.address + 8)?;
        self.reader.read_c_bytes(name)
    }

    /// Generic signature of a constrained extension
    pub fn generic_context(&self) -> ReadResult<Option<GenericContext<'r, R>>> {
        if !self.flags()?.is_generic() {
            return Ok(None);
        }
        GenericContext::read(self.reader, self.address, 12, false).map(Some)
    }
}

descriptor_view!(
    /// Descriptor of an anonymous context
    AnonymousDescriptor
);

impl<'r, R: MemoryReader> AnonymousDescriptor<'r, R> {
    /// Flags word
    pub fn flags(&self) -> ReadResult<ContextDescriptorFlags> {
        read_flags(self.reader, self.address)
    }

    /// Generic signature, if the context is generic
    pub fn generic_context(&self) -> ReadResult<Option<GenericContext<'r, R>>> {
        if !self.flags()?.is_generic() {
            return Ok(None);
        }
        GenericContext::read(self.reader, self.address, CONTEXT_DESCRIPTOR_HEADER_SIZE, false)
            .map(Some)
    }
}

/// A context descriptor decoded by kind
pub enum ContextDescriptor<'r, R> {
    /// Module
    Module(ModuleDescriptor<'r, R>),
    /// Extension
    Extension(ExtensionDescriptor<'r, R>),
    /// Anonymous context
    Anonymous(AnonymousDescriptor<'r, R>),
    /// Nominal type
    Type(TypeContextDescriptor<'r, R>),
    /// A kind this runtime does not know
    Unknown {
        /// Raw kind
        kind: u8,
        /// Record address
        address: Address,
        /// The reader
        reader: &'r R,
    },
}

impl<'r, R> Clone for ContextDescriptor<'r, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'r, R> Copy for ContextDescriptor<'r, R> {}

impl<'r, R: MemoryReader> fmt::Debug for ContextDescriptor<'r, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextDescriptor::Module(d) => d.fmt(f),
            ContextDescriptor::Extension(d) => d.fmt(f),
            ContextDescriptor::Anonymous(d) => d.fmt(f),
            ContextDescriptor::Type(d) => d.fmt(f),
            ContextDescriptor::Unknown { kind, address, .. } => {
                write!(f, "UnknownContext({} @ {:#x})", kind, address)
            }
        }
    }
}

impl<'r, R: MemoryReader> ContextDescriptor<'r, R> {
    /// Read and decode the descriptor at `address`
    pub fn read(reader: &'r R, address: Address) -> ReadResult<Self> {
        let flags = read_flags(reader, address)?;
        Ok(match flags.kind() {
            ContextDescriptorKind::Module => {
                ContextDescriptor::Module(ModuleDescriptor::new(reader, address))
            }
            ContextDescriptorKind::Extension => {
                ContextDescriptor::Extension(ExtensionDescriptor::new(reader, address))
            }
            ContextDescriptorKind::Anonymous => {
                ContextDescriptor::Anonymous(AnonymousDescriptor::new(reader, address))
            }
            kind if kind.is_type() => {
                ContextDescriptor::Type(TypeContextDescriptor::new(reader, address))
            }
            kind => ContextDescriptor::Unknown {
                kind: kind.raw(),
                address,
                reader,
            },
        })
    }

    /// Address of the record
    pub fn address(&self) -> Address {
        match self {
            ContextDescriptor::Module(d) => d.address(),
            ContextDescriptor::Extension(d) => d.address(),
            ContextDescriptor::Anonymous(d) => d.address(),
            ContextDescriptor::Type(d) => d.address(),
            ContextDescriptor::Unknown { address, .. } => *address,
        }
    }

    fn reader(&self) -> &'r R {
        match self {
            ContextDescriptor::Module(d) => d.reader(),
            ContextDescriptor::Extension(d) => d.reader(),
            ContextDescriptor::Anonymous(d) => d.reader(),
            ContextDescriptor::Type(d) => d.reader(),
            ContextDescriptor::Unknown { reader, .. } => reader,
        }
    }

    /// Flags word
    pub fn flags(&self) -> ReadResult<ContextDescriptorFlags> {
        read_flags(self.reader(), self.address())
    }

    /// Enclosing context, `None` at a module
    pub fn parent(&self) -> ReadResult<Option<ContextDescriptor<'r, R>>> {
        read_parent(self.reader(), self.address())
    }

    /// Generic signature of the context, if it has one
    pub fn generic_context(&self) -> ReadResult<Option<GenericContext<'r, R>>> {
        match self {
            ContextDescriptor::Extension(d) => d.generic_context(),
            ContextDescriptor::Anonymous(d) => d.generic_context(),
            ContextDescriptor::Type(d) => d.generic_context(),
            ContextDescriptor::Module(_) | ContextDescriptor::Unknown { .. } => Ok(None),
        }
    }

    /// Name of a module or nominal type
    pub fn name(&self) -> ReadResult<Option<String>> {
        match self {
            ContextDescriptor::Module(d) => d.name().map(Some),
            ContextDescriptor::Type(d) => d.name().map(Some),
            _ => Ok(None),
        }
    }

    /// The chain from this context up to its module, innermost first
    pub fn ancestry(&self) -> ReadResult<Vec<ContextDescriptor<'r, R>>> {
        let mut chain = vec![*self];
        let mut current = *self;
        while let Some(parent) = current.parent()? {
            if chain.len() >= MAX_CONTEXT_DEPTH {
                return Err(ReadError::Malformed {
                    address: self.address(),
                    reason: "context parent chain does not terminate",
                });
            }
            chain.push(parent);
            current = parent;
        }
        Ok(chain)
    }

    /// The module this context belongs to
    pub fn module(&self) -> ReadResult<Option<ModuleDescriptor<'r, R>>> {
        Ok(self.ancestry()?.into_iter().find_map(|context| match context {
            ContextDescriptor::Module(module) => Some(module),
            _ => None,
        }))
    }

    /// Dotted name from the module down, skipping unnamed contexts
    pub fn qualified_name(&self) -> ReadResult<String> {
        let mut components = Vec::new();
        for context in self.ancestry()? {
            if let Some(name) = context.name()? {
                components.push(name);
            }
        }
        components.reverse();
        Ok(components.join("."))
    }
}

/// Read `count` consecutive NUL-terminated names from a name list
pub(crate) fn read_name_list<R: MemoryReader>(
    reader: &R,
    address: Address,
    count: usize,
) -> ReadResult<Vec<String>> {
    let mut names = Vec::with_capacity(count);
    let mut cursor = address;
    for _ in 0..count {
        let bytes = reader.read_c_bytes(cursor)?;
        let next = cursor + bytes.len() as u64 + 1;
        names.push(String::from_utf8(bytes).map_err(|_| ReadError::InvalidUtf8(cursor))?);
        cursor = next;
    }
    Ok(names)
}
