//! Nominal type descriptors
//!
//! ```text
//!   0  flags: u32
//!   4  parent: relative indirectable
//!   8  name: relative
//!  12  access function: relative, nullable
//!  16  class/struct: num_fields, field_offset_vector_offset, field_names, field_types
//!      enum:         payload_cases | payload_size_offset << 24, num_empty_cases,
//!                    case_names, case_types
//!  32  trailing: generic header, params, requirements, vtable header, methods
//! ```

use super::generic::{GenericContext, TypeGenericContextHeader, GENERIC_REQUIREMENT_SIZE};
use super::{descriptor_view, read_name_list, read_parent, ContextDescriptor};
use crate::abi::{
    ContextDescriptorFlags, ContextDescriptorKind, FieldType, MethodDescriptorFlags,
    TypeContextDescriptorFlags,
};
use crate::error::{ReadError, ReadResult};
use crate::layout::{TrailingArray, TrailingLayout};
use crate::metadata::Metadata;
use crate::pointer::{Address, InProcessReader, MemoryReader, RelativeDirectPointer};

/// Bytes of a type descriptor before its trailing arrays
pub const TYPE_DESCRIPTOR_HEADER_SIZE: u64 = 32;

/// Bytes of one method descriptor
pub const METHOD_DESCRIPTOR_SIZE: u64 = 8;

/// Accessor returning the field (or payload case) types of a metadata record
pub type FieldTypesAccessor = unsafe extern "C" fn(*const Metadata) -> *const FieldType;

/// Access function of a non-generic type
pub type MetadataAccessFunction = unsafe extern "C" fn() -> *const Metadata;

/// Location of a class's vtable in its metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VTableHeader {
    /// Word offset of the first entry from the metadata address point
    pub offset: u32,
    /// Number of entries
    pub size: u32,
}

/// A vtable entry as declared by the class that introduces it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Implementation, `None` for an abstract entry
    pub implementation: Option<Address>,
    /// Kind and attributes
    pub flags: MethodDescriptorFlags,
}

/// Positions of every trailing array of a type descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTrailingLayout {
    /// Generic header (count 0 or 1)
    pub generic_header: TrailingArray,
    /// Generic parameter bytes
    pub params: TrailingArray,
    /// Generic requirement records
    pub requirements: TrailingArray,
    /// Vtable header (count 0 or 1)
    pub vtable_header: TrailingArray,
    /// Method descriptors
    pub methods: TrailingArray,
    /// Total size of the descriptor
    pub size: u64,
}

impl TypeTrailingLayout {
    /// Compute placements from the header counts and flags
    pub fn compute(
        generic: Option<&TypeGenericContextHeader>,
        vtable: Option<&VTableHeader>,
    ) -> Self {
        let mut layout = TrailingLayout::new(TYPE_DESCRIPTOR_HEADER_SIZE);
        let generic_header = layout.push_if(generic.is_some(), TypeGenericContextHeader::SIZE, 4, 1);
        let (num_params, num_requirements) = generic
            .map(|header| (header.base.num_params as u64, header.base.num_requirements as u64))
            .unwrap_or((0, 0));
        let params = layout.push(1, 1, num_params);
        let requirements = layout.push(GENERIC_REQUIREMENT_SIZE, 4, num_requirements);
        let vtable_header = layout.push_if(vtable.is_some(), 8, 4, 1);
        let methods = layout.push(
            METHOD_DESCRIPTOR_SIZE,
            4,
            vtable.map(|header| header.size as u64).unwrap_or(0),
        );
        Self {
            generic_header,
            params,
            requirements,
            vtable_header,
            methods,
            size: layout.end(),
        }
    }
}

descriptor_view!(
    /// Descriptor of a class, struct or enum
    TypeContextDescriptor
);

impl<'r, R: MemoryReader> TypeContextDescriptor<'r, R> {
    /// Flags word
    pub fn flags(&self) -> ReadResult<ContextDescriptorFlags> {
        Ok(ContextDescriptorFlags::from_bits(self.reader.read_u32(self.address)?))
    }

    /// Descriptor kind
    pub fn kind(&self) -> ReadResult<ContextDescriptorKind> {
        Ok(self.flags()?.kind())
    }

    /// Kind-specific type flags
    pub fn type_flags(&self) -> ReadResult<TypeContextDescriptorFlags> {
        Ok(self.flags()?.type_flags())
    }

    /// The type is generic
    pub fn is_generic(&self) -> ReadResult<bool> {
        Ok(self.flags()?.is_generic())
    }

    /// Metadata has a vtable
    pub fn has_vtable(&self) -> ReadResult<bool> {
        Ok(self.type_flags()?.contains(TypeContextDescriptorFlags::HAS_VTABLE))
    }

    /// Superclass size is only known at runtime
    pub fn has_resilient_superclass(&self) -> ReadResult<bool> {
        Ok(self
            .type_flags()?
            .contains(TypeContextDescriptorFlags::HAS_RESILIENT_SUPERCLASS))
    }

    /// Enclosing context
    pub fn parent(&self) -> ReadResult<Option<ContextDescriptor<'r, R>>> {
        read_parent(self.reader, self.address)
    }

    /// This descriptor as a generic context descriptor
    pub fn as_context(&self) -> ContextDescriptor<'r, R> {
        ContextDescriptor::Type(*self)
    }

    /// Unqualified type name
    pub fn name(&self) -> ReadResult<String> {
        let name = self
            .reader
            .resolve_relative_required::<RelativeDirectPointer<false>>(self.address + 8)?;
        self.reader.read_c_string(name)
    }

    /// Dotted name from the module down
    pub fn qualified_name(&self) -> ReadResult<String> {
        self.as_context().qualified_name()
    }

    /// Metadata access function
    pub fn access_function(&self) -> ReadResult<Option<Address>> {
        self.reader
            .resolve_relative::<RelativeDirectPointer<true>>(self.address + 12)
    }

    fn require_kind(&self, enum_kind: bool) -> ReadResult<()> {
        let kind = self.kind()?;
        let matches = match kind {
            ContextDescriptorKind::Enum => enum_kind,
            ContextDescriptorKind::Class | ContextDescriptorKind::Struct => !enum_kind,
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(ReadError::Malformed {
                address: self.address,
                reason: if enum_kind {
                    "case layout read from a non-enum descriptor"
                } else {
                    "field layout read from a non-struct, non-class descriptor"
                },
            })
        }
    }

    /// Number of stored properties of a class or struct
    pub fn num_fields(&self) -> ReadResult<u32> {
        self.require_kind(false)?;
        self.reader.read_u32(self.address + 16)
    }

    /// Word offset of the field offset vector, 0 when there is none
    pub fn field_offset_vector_offset(&self) -> ReadResult<u32> {
        self.require_kind(false)?;
        self.reader.read_u32(self.address + 20)
    }

    /// Names of the stored properties
    pub fn field_names(&self) -> ReadResult<Vec<String>> {
        let count = self.num_fields()? as usize;
        match self
            .reader
            .resolve_relative::<RelativeDirectPointer<true>>(self.address + 24)?
        {
            Some(names) => read_name_list(self.reader, names, count),
            None => Ok(Vec::new()),
        }
    }

    /// Address of the field (or payload case) types accessor
    pub fn field_types_accessor(&self) -> ReadResult<Option<Address>> {
        self.reader
            .resolve_relative::<RelativeDirectPointer<true>>(self.address + 28)
    }

    fn enum_word(&self) -> ReadResult<u32> {
        self.require_kind(true)?;
        self.reader.read_u32(self.address + 16)
    }

    /// Number of enum cases with payloads
    pub fn num_payload_cases(&self) -> ReadResult<u32> {
        Ok(self.enum_word()? & 0x00FF_FFFF)
    }

    /// Word offset of the payload size slot in enum metadata, 0 when absent
    pub fn payload_size_offset(&self) -> ReadResult<u32> {
        Ok((self.enum_word()? & 0xFF00_0000) >> 24)
    }

    /// Number of enum cases without payloads
    pub fn num_empty_cases(&self) -> ReadResult<u32> {
        self.require_kind(true)?;
        self.reader.read_u32(self.address + 20)
    }

    /// Total enum cases
    pub fn num_cases(&self) -> ReadResult<u32> {
        Ok(self.num_payload_cases()? + self.num_empty_cases()?)
    }

    /// Names of every enum case, payload cases first
    pub fn case_names(&self) -> ReadResult<Vec<String>> {
        let count = self.num_cases()? as usize;
        match self
            .reader
            .resolve_relative::<RelativeDirectPointer<true>>(self.address + 24)?
        {
            Some(names) => read_name_list(self.reader, names, count),
            None => Ok(Vec::new()),
        }
    }

    /// The generic header, when the type is generic
    pub fn generic_header(&self) -> ReadResult<Option<TypeGenericContextHeader>> {
        if !self.is_generic()? {
            return Ok(None);
        }
        TypeGenericContextHeader::read(self.reader, self.address + TYPE_DESCRIPTOR_HEADER_SIZE)
            .map(Some)
    }

    /// The generic signature, when the type is generic
    pub fn generic_context(&self) -> ReadResult<Option<GenericContext<'r, R>>> {
        if !self.is_generic()? {
            return Ok(None);
        }
        GenericContext::read(self.reader, self.address, TYPE_DESCRIPTOR_HEADER_SIZE, true).map(Some)
    }

    /// Placement of every trailing array
    pub fn trailing_layout(&self) -> ReadResult<TypeTrailingLayout> {
        let generic = self.generic_header()?;
        let without_vtable = TypeTrailingLayout::compute(generic.as_ref(), None);
        let vtable = if self.has_vtable()? {
            let at = self.address + without_vtable.vtable_header.offset;
            Some(VTableHeader {
                offset: self.reader.read_u32(at)?,
                size: self.reader.read_u32(at + 4)?,
            })
        } else {
            None
        };
        Ok(TypeTrailingLayout::compute(generic.as_ref(), vtable.as_ref()))
    }

    /// The vtable header of a class with a vtable
    pub fn vtable_header(&self) -> ReadResult<Option<VTableHeader>> {
        if !self.has_vtable()? {
            return Ok(None);
        }
        let layout = self.trailing_layout()?;
        let at = self.address + layout.vtable_header.offset;
        Ok(Some(VTableHeader {
            offset: self.reader.read_u32(at)?,
            size: self.reader.read_u32(at + 4)?,
        }))
    }

    /// Method descriptors of the vtable entries this class introduces
    pub fn method_descriptors(&self) -> ReadResult<Vec<MethodDescriptor>> {
        let layout = self.trailing_layout()?;
        (0..layout.methods.count)
            .map(|i| {
                let at = self.address + layout.methods.element(i);
                Ok(MethodDescriptor {
                    implementation: self
                        .reader
                        .resolve_relative::<RelativeDirectPointer<true>>(at)?,
                    flags: MethodDescriptorFlags::from_bits(self.reader.read_u32(at + 4)?),
                })
            })
            .collect()
    }

    /// Implementation of method `index`
    pub fn method(&self, index: u32) -> ReadResult<Option<Address>> {
        let methods = self.method_descriptors()?;
        Ok(methods
            .get(index as usize)
            .and_then(|method| method.implementation))
    }
}

impl<'r> TypeContextDescriptor<'r, InProcessReader> {
    /// Call the access function of a non-generic type
    pub fn call_access_function(&self) -> ReadResult<Option<&'static Metadata>> {
        if self.is_generic()? {
            return Ok(None);
        }
        let Some(function) = self.access_function()? else {
            return Ok(None);
        };
        // SAFETY: the access function of a non-generic type takes no
        // arguments and returns its canonical metadata.
        let metadata = unsafe {
            let function: MetadataAccessFunction = std::mem::transmute(function as usize);
            function()
        };
        Ok((!metadata.is_null()).then(|| unsafe { &*metadata }))
    }
}
