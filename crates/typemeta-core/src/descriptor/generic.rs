//! Generic signatures
//!
//! A generic context is a header followed by one byte per generic parameter
//! and a 12-byte record per requirement:
//!
//! ```text
//! ┌──────────────────────────────┬──────────┬─────┬─────────────────────┐
//! │ [argument_offset] num_params │ params   │ pad │ requirements        │
//! │ num_requirements num_key     │ u8 × n   │ → 4 │ 12 bytes × m        │
//! │ num_extra                    │          │     │                     │
//! └──────────────────────────────┴──────────┴─────┴─────────────────────┘
//! ```
//!
//! A requirement is `flags: u32`, a reference to its subject parameter and
//! a payload whose meaning depends on the requirement kind.

use crate::abi::{
    GenericParamDescriptor, GenericRequirementFlags, GenericRequirementKind,
    GenericRequirementLayoutKind,
};
use crate::error::{ReadError, ReadResult};
use crate::layout::TrailingLayout;
use crate::pointer::{Address, MemoryReader, RelativeDirectPointer, RelativeIndirectablePointer};

/// Bytes of one requirement record
pub const GENERIC_REQUIREMENT_SIZE: u64 = 12;

/// Longest associated type path followed from a parameter reference
const MAX_PATH_LENGTH: usize = 64;

/// Counts shared by every generic context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GenericContextHeader {
    /// Number of generic parameters
    pub num_params: u32,
    /// Number of requirements
    pub num_requirements: u32,
    /// Number of words in the uniquing key of an instantiation
    pub num_key_arguments: u32,
    /// Number of extra argument words after the key
    pub num_extra_arguments: u32,
}

impl GenericContextHeader {
    /// Encoded size
    pub const SIZE: u64 = 16;

    /// Read a header
    pub fn read<R: MemoryReader>(reader: &R, address: Address) -> ReadResult<Self> {
        Ok(Self {
            num_params: reader.read_u32(address)?,
            num_requirements: reader.read_u32(address + 4)?,
            num_key_arguments: reader.read_u32(address + 8)?,
            num_extra_arguments: reader.read_u32(address + 12)?,
        })
    }

    /// Total argument words passed to an instantiation
    pub fn num_arguments(&self) -> u32 {
        self.num_key_arguments + self.num_extra_arguments
    }

    /// Whether an instantiation takes any arguments
    pub fn has_arguments(&self) -> bool {
        self.num_arguments() > 0
    }
}

/// Generic header of a nominal type: the word offset of the argument
/// vector in the type's metadata, then the common counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeGenericContextHeader {
    /// Word offset of the generic arguments from the metadata address point
    pub argument_offset: u32,
    /// The common counts
    pub base: GenericContextHeader,
}

impl TypeGenericContextHeader {
    /// Encoded size
    pub const SIZE: u64 = 4 + GenericContextHeader::SIZE;

    /// Read a header
    pub fn read<R: MemoryReader>(reader: &R, address: Address) -> ReadResult<Self> {
        Ok(Self {
            argument_offset: reader.read_u32(address)?,
            base: GenericContextHeader::read(reader, address + 4)?,
        })
    }
}

/// A decoded generic signature
pub struct GenericContext<'r, R> {
    reader: &'r R,
    header: GenericContextHeader,
    params: Address,
    requirements: Address,
    end: Address,
}

impl<'r, R> Clone for GenericContext<'r, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'r, R> Copy for GenericContext<'r, R> {}

impl<'r, R> std::fmt::Debug for GenericContext<'r, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericContext")
            .field("header", &self.header)
            .field("params", &format_args!("{:#x}", self.params))
            .field("requirements", &format_args!("{:#x}", self.requirements))
            .finish()
    }
}

impl<'r, R: MemoryReader> GenericContext<'r, R> {
    /// Decode the generic context of the descriptor at `descriptor`, whose
    /// generic header starts `header_offset` bytes in. Type descriptors use
    /// the longer header with an argument offset.
    pub fn read(
        reader: &'r R,
        descriptor: Address,
        header_offset: u64,
        type_header: bool,
    ) -> ReadResult<Self> {
        let (header, header_size) = if type_header {
            (
                TypeGenericContextHeader::read(reader, descriptor + header_offset)?.base,
                TypeGenericContextHeader::SIZE,
            )
        } else {
            (
                GenericContextHeader::read(reader, descriptor + header_offset)?,
                GenericContextHeader::SIZE,
            )
        };
        let mut layout = TrailingLayout::new(header_offset + header_size);
        let params = layout.push(1, 1, header.num_params as u64);
        let requirements = layout.push(GENERIC_REQUIREMENT_SIZE, 4, header.num_requirements as u64);
        Ok(Self {
            reader,
            header,
            params: descriptor + params.offset,
            requirements: descriptor + requirements.offset,
            end: descriptor + layout.end(),
        })
    }

    /// The counts
    pub fn header(&self) -> GenericContextHeader {
        self.header
    }

    /// Address one past the last requirement
    pub fn end(&self) -> Address {
        self.end
    }

    /// Parameter descriptors
    pub fn params(&self) -> ReadResult<Vec<GenericParamDescriptor>> {
        (0..self.header.num_params as u64)
            .map(|i| Ok(GenericParamDescriptor::from_bits(self.reader.read_u8(self.params + i)?)))
            .collect()
    }

    /// Requirement records
    pub fn requirements(&self) -> Vec<GenericRequirement<'r, R>> {
        (0..self.header.num_requirements as u64)
            .map(|i| GenericRequirement::new(self.reader, self.requirements + i * GENERIC_REQUIREMENT_SIZE))
            .collect()
    }
}

/// One hop along an associated type path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssociatedTypeStep {
    /// Protocol declaring the associated type
    pub protocol: Address,
    /// Index of the associated type's access function in that protocol's
    /// witness table
    pub index: u32,
}

/// Subject of a requirement: a generic parameter, optionally followed by a
/// path of associated types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericParamRef {
    /// Index of the root generic parameter
    pub root: u32,
    /// Associated types to walk from the root
    pub path: Vec<AssociatedTypeStep>,
}

impl GenericParamRef {
    /// A direct parameter reference
    pub fn direct(root: u32) -> Self {
        Self {
            root,
            path: Vec::new(),
        }
    }

    /// Decode the reference stored at `field`.
    ///
    /// A clear low bit means the word is the root index shifted left by
    /// one; otherwise the word is a relative offset to a path record
    /// `root: u32, (protocol, index)*, 0`.
    pub fn read<R: MemoryReader>(reader: &R, field: Address) -> ReadResult<Self> {
        let raw = reader.read_u32(field)?;
        if raw & 1 == 0 {
            return Ok(Self::direct(raw >> 1));
        }
        let path_address = field.wrapping_add_signed(((raw as i32) & !1) as i64);
        let root = reader.read_u32(path_address)?;
        let mut path = Vec::new();
        let mut cursor = path_address + 4;
        loop {
            if reader.read_u32(cursor)? == 0 {
                break;
            }
            if path.len() >= MAX_PATH_LENGTH {
                return Err(ReadError::Malformed {
                    address: path_address,
                    reason: "associated type path does not terminate",
                });
            }
            let protocol =
                reader.resolve_relative_required::<RelativeIndirectablePointer<false>>(cursor)?;
            let index = reader.read_u32(cursor + 4)?;
            path.push(AssociatedTypeStep { protocol, index });
            cursor += 8;
        }
        Ok(Self { root, path })
    }

    /// Refers to the parameter itself, not an associated type
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

/// Decoded payload of a requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementContent {
    /// The subject conforms to this protocol descriptor
    Protocol(Address),
    /// The subject is the named type
    SameType(String),
    /// The subject is a subclass of the named class
    BaseClass(String),
    /// The conformance described by this conformance record
    SameConformance(Address),
    /// The subject has this layout
    Layout(GenericRequirementLayoutKind),
    /// A kind this runtime does not know
    Unknown(u8),
}

/// One requirement record
pub struct GenericRequirement<'r, R> {
    reader: &'r R,
    address: Address,
}

impl<'r, R> Clone for GenericRequirement<'r, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'r, R> Copy for GenericRequirement<'r, R> {}

impl<'r, R> std::fmt::Debug for GenericRequirement<'r, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GenericRequirement({:#x})", self.address)
    }
}

impl<'r, R: MemoryReader> GenericRequirement<'r, R> {
    /// The requirement at `address`
    pub fn new(reader: &'r R, address: Address) -> Self {
        Self { reader, address }
    }

    /// Address of the record
    pub fn address(&self) -> Address {
        self.address
    }

    /// Flags word
    pub fn flags(&self) -> ReadResult<GenericRequirementFlags> {
        Ok(GenericRequirementFlags::from_bits(self.reader.read_u32(self.address)?))
    }

    /// Requirement kind
    pub fn kind(&self) -> ReadResult<GenericRequirementKind> {
        Ok(self.flags()?.kind())
    }

    /// Subject of the requirement
    pub fn param(&self) -> ReadResult<GenericParamRef> {
        GenericParamRef::read(self.reader, self.address + 4)
    }

    fn payload_field(&self) -> Address {
        self.address + 8
    }

    fn mangled_name(&self) -> ReadResult<String> {
        let name = self
            .reader
            .resolve_relative_required::<RelativeDirectPointer<false>>(self.payload_field())?;
        let bytes = self.reader.read_c_bytes(name)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decode the payload by kind
    pub fn content(&self) -> ReadResult<RequirementContent> {
        let field = self.payload_field();
        Ok(match self.kind()? {
            GenericRequirementKind::Protocol => RequirementContent::Protocol(
                self.reader
                    .resolve_relative_required::<RelativeIndirectablePointer<false>>(field)?,
            ),
            GenericRequirementKind::SameType => RequirementContent::SameType(self.mangled_name()?),
            GenericRequirementKind::BaseClass => {
                RequirementContent::BaseClass(self.mangled_name()?)
            }
            GenericRequirementKind::SameConformance => RequirementContent::SameConformance(
                self.reader
                    .resolve_relative_required::<RelativeIndirectablePointer<false>>(field)?,
            ),
            GenericRequirementKind::Layout => RequirementContent::Layout(
                GenericRequirementLayoutKind::from_raw(self.reader.read_u32(field)?),
            ),
            GenericRequirementKind::Unknown(raw) => RequirementContent::Unknown(raw),
        })
    }
}
