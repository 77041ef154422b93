//! Struct and enum metadata
//!
//! Both start with the descriptor pointer in word 1. Everything else is
//! located through the descriptor: the field offset vector of a struct and
//! the payload size slot of a multi-payload enum sit at word offsets the
//! descriptor records.

use super::{metadata_view, Metadata};
use crate::abi::FieldType;
use crate::descriptor::{FieldTypesAccessor, TypeContextDescriptor};
use crate::error::{ReadError, ReadResult};
use crate::pointer::{Address, InProcessReader, MemoryReader};

fn required_description<R: MemoryReader>(raw: &super::RawMetadata<'_, R>) -> ReadResult<Address> {
    let description = raw.word(1)?;
    if description == 0 {
        return Err(ReadError::NullReference(raw.word_address(1)));
    }
    Ok(description)
}

/// Call a descriptor's field type accessor and copy out `count` entries
fn call_field_types(
    descriptor: &TypeContextDescriptor<'_, InProcessReader>,
    metadata: Address,
    count: u32,
) -> ReadResult<Option<Vec<FieldType>>> {
    let Some(accessor) = descriptor.field_types_accessor()? else {
        return Ok(None);
    };
    // SAFETY: the descriptor's accessor slot holds a function of this
    // signature, and `metadata` is a live record of the described type.
    let types = unsafe {
        let accessor: FieldTypesAccessor = std::mem::transmute(accessor as usize);
        accessor(metadata as usize as *const Metadata)
    };
    if types.is_null() && count > 0 {
        return Err(ReadError::NullReference(accessor));
    }
    // SAFETY: the accessor returns at least `count` entries.
    Ok(Some(
        (0..count as usize)
            .map(|i| unsafe { *types.add(i) })
            .collect(),
    ))
}

metadata_view!(
    /// Metadata of a struct
    StructMetadata
);

impl<'r, R: MemoryReader> StructMetadata<'r, R> {
    /// Address of the nominal type descriptor
    pub fn description(&self) -> ReadResult<Address> {
        required_description(&self.raw)
    }

    /// The nominal type descriptor
    pub fn descriptor(&self) -> ReadResult<TypeContextDescriptor<'r, R>> {
        Ok(TypeContextDescriptor::new(self.raw.reader(), self.description()?))
    }

    /// Byte offset of every stored property, `None` when the type has no
    /// field offset vector
    pub fn field_offsets(&self) -> ReadResult<Option<Vec<u64>>> {
        let descriptor = self.descriptor()?;
        let vector_offset = descriptor.field_offset_vector_offset()? as i64;
        if vector_offset == 0 {
            return Ok(None);
        }
        (0..descriptor.num_fields()? as i64)
            .map(|i| self.raw.word(vector_offset + i))
            .collect::<ReadResult<Vec<_>>>()
            .map(Some)
    }
}

impl<'r> StructMetadata<'r, InProcessReader> {
    /// Field types from the descriptor's accessor
    pub fn field_types(&self) -> ReadResult<Option<Vec<FieldType>>> {
        let descriptor = self.descriptor()?;
        call_field_types(&descriptor, self.address(), descriptor.num_fields()?)
    }
}

metadata_view!(
    /// Metadata of an enum or of the optional enum
    EnumMetadata
);

impl<'r, R: MemoryReader> EnumMetadata<'r, R> {
    /// Address of the nominal type descriptor
    pub fn description(&self) -> ReadResult<Address> {
        required_description(&self.raw)
    }

    /// The nominal type descriptor
    pub fn descriptor(&self) -> ReadResult<TypeContextDescriptor<'r, R>> {
        Ok(TypeContextDescriptor::new(self.raw.reader(), self.description()?))
    }

    /// Whether the metadata stores the size of its largest payload
    pub fn has_payload_size(&self) -> ReadResult<bool> {
        Ok(self.descriptor()?.payload_size_offset()? != 0)
    }

    /// Size of the largest payload, when stored
    pub fn payload_size(&self) -> ReadResult<Option<u64>> {
        let offset = self.descriptor()?.payload_size_offset()?;
        if offset == 0 {
            return Ok(None);
        }
        self.raw.word(offset as i64).map(Some)
    }
}

impl<'r> EnumMetadata<'r, InProcessReader> {
    /// Payload types of the cases with payloads
    pub fn case_types(&self) -> ReadResult<Option<Vec<FieldType>>> {
        let descriptor = self.descriptor()?;
        call_field_types(&descriptor, self.address(), descriptor.num_payload_cases()?)
    }
}
