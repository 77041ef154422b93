//! Class metadata
//!
//! ```text
//!   -2 words  destroy
//!   -1 word   &ValueWitnessTable
//!    0        kind / isa
//!    1        superclass
//!    2..4     cache data
//!    4        data (low bit set on native type metadata)
//!    5        flags:u32 instance_address_point:u32
//!             instance_size:u32 instance_align_mask:u16 reserved:u16
//!             class_size:u32 class_address_point:u32
//!             description
//!             ivar_destroyer
//!    ...      generic arguments, field offsets, vtable
//! ```

use super::{metadata_view, RawMetadata};
use crate::abi::{ClassFlags, CLASS_IS_TYPE_METADATA_MASK};
use crate::descriptor::TypeContextDescriptor;
use crate::error::{ReadError, ReadResult};
use crate::pointer::{Address, MemoryReader};

/// Byte offsets of class metadata fields for a given pointer size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLayout {
    pointer_size: u64,
}

impl ClassLayout {
    /// Layout for a target with `pointer_size`-byte words
    pub const fn new(pointer_size: u64) -> Self {
        ClassLayout { pointer_size }
    }

    /// Layout of this process
    pub const fn native() -> Self {
        ClassLayout::new(std::mem::size_of::<usize>() as u64)
    }

    const fn p(self) -> u64 {
        self.pointer_size
    }

    /// Bytes before the address point: destroy and value witnesses
    pub const fn prefix_size(self) -> u64 {
        2 * self.p()
    }

    /// Superclass pointer
    pub const fn superclass(self) -> u64 {
        self.p()
    }

    /// First cache word
    pub const fn cache_data(self) -> u64 {
        2 * self.p()
    }

    /// Data word
    pub const fn data(self) -> u64 {
        4 * self.p()
    }

    /// Class flags
    pub const fn flags(self) -> u64 {
        5 * self.p()
    }

    /// Instance address point
    pub const fn instance_address_point(self) -> u64 {
        5 * self.p() + 4
    }

    /// Instance size
    pub const fn instance_size(self) -> u64 {
        5 * self.p() + 8
    }

    /// Instance alignment mask
    pub const fn instance_align_mask(self) -> u64 {
        5 * self.p() + 12
    }

    /// Total size of the class object including the prefix
    pub const fn class_size(self) -> u64 {
        5 * self.p() + 16
    }

    /// Offset of the address point within the class object
    pub const fn class_address_point(self) -> u64 {
        5 * self.p() + 20
    }

    /// Nominal type descriptor
    pub const fn description(self) -> u64 {
        5 * self.p() + 24
    }

    /// Ivar destroyer
    pub const fn ivar_destroyer(self) -> u64 {
        6 * self.p() + 24
    }

    /// End of the fixed header, relative to the address point
    pub const fn header_end(self) -> u64 {
        7 * self.p() + 24
    }

    /// Words of immediate members in a class with no superclass
    pub const fn root_size_in_words(self) -> u64 {
        (self.prefix_size() + self.header_end()) / self.p()
    }
}

metadata_view!(
    /// Metadata of a class
    ClassMetadata
);

impl<'r, R: MemoryReader> ClassMetadata<'r, R> {
    fn layout(&self) -> ClassLayout {
        ClassLayout::new(self.raw.pointer_size())
    }

    fn read_u32(&self, offset: u64) -> ReadResult<u32> {
        self.raw.reader().read_u32(self.raw.field(offset as i64))
    }

    /// Superclass metadata, `None` for a root class
    pub fn superclass(&self) -> ReadResult<Option<Address>> {
        let superclass = self.raw.word(1)?;
        Ok((superclass != 0).then_some(superclass))
    }

    /// View of the superclass
    pub fn superclass_metadata(&self) -> ReadResult<Option<ClassMetadata<'r, R>>> {
        Ok(self
            .superclass()?
            .map(|address| ClassMetadata::new(RawMetadata::new(self.raw.reader(), address))))
    }

    /// The two cache words
    pub fn cache_data(&self) -> ReadResult<[u64; 2]> {
        Ok([self.raw.word(2)?, self.raw.word(3)?])
    }

    /// The data word
    pub fn data(&self) -> ReadResult<u64> {
        self.raw.word(4)
    }

    /// The class was emitted by the native compiler and carries the
    /// fields after the data word
    pub fn is_type_metadata(&self) -> ReadResult<bool> {
        Ok(self.data()? & CLASS_IS_TYPE_METADATA_MASK != 0)
    }

    fn require_type_metadata(&self) -> ReadResult<()> {
        if self.is_type_metadata()? {
            Ok(())
        } else {
            Err(ReadError::Malformed {
                address: self.address(),
                reason: "class object is not native type metadata",
            })
        }
    }

    /// Class flags
    pub fn flags(&self) -> ReadResult<ClassFlags> {
        self.require_type_metadata()?;
        Ok(ClassFlags::from_bits_retain(self.read_u32(self.layout().flags())?))
    }

    /// Offset of the address point within an instance
    pub fn instance_address_point(&self) -> ReadResult<u32> {
        self.require_type_metadata()?;
        self.read_u32(self.layout().instance_address_point())
    }

    /// Size of an instance
    pub fn instance_size(&self) -> ReadResult<u32> {
        self.require_type_metadata()?;
        self.read_u32(self.layout().instance_size())
    }

    /// Alignment mask of an instance
    pub fn instance_align_mask(&self) -> ReadResult<u16> {
        self.require_type_metadata()?;
        self.raw
            .reader()
            .read_u16(self.raw.field(self.layout().instance_align_mask() as i64))
    }

    /// Total bytes of the class object
    pub fn class_size(&self) -> ReadResult<u32> {
        self.require_type_metadata()?;
        self.read_u32(self.layout().class_size())
    }

    /// Offset of the address point within the class object
    pub fn class_address_point(&self) -> ReadResult<u32> {
        self.require_type_metadata()?;
        self.read_u32(self.layout().class_address_point())
    }

    /// Words of the class object after the address point
    pub fn size_in_words(&self) -> ReadResult<u64> {
        let size = self.class_size()? as u64;
        let address_point = self.class_address_point()? as u64;
        if address_point > size {
            return Err(ReadError::Malformed {
                address: self.address(),
                reason: "class address point beyond class size",
            });
        }
        Ok((size - address_point) / self.raw.pointer_size())
    }

    /// Address of the nominal type descriptor.
    ///
    /// `None` for artificial subclasses and for class objects that are not
    /// native type metadata.
    pub fn description(&self) -> ReadResult<Option<Address>> {
        if !self.is_type_metadata()? {
            return Ok(None);
        }
        let description = self
            .raw
            .reader()
            .read_pointer(self.raw.field(self.layout().description() as i64))?;
        Ok((description != 0).then_some(description))
    }

    /// The nominal type descriptor
    pub fn descriptor(&self) -> ReadResult<Option<TypeContextDescriptor<'r, R>>> {
        Ok(self
            .description()?
            .map(|address| TypeContextDescriptor::new(self.raw.reader(), address)))
    }

    /// A runtime-generated subclass without its own descriptor
    pub fn is_artificial_subclass(&self) -> ReadResult<bool> {
        Ok(self.is_type_metadata()? && self.description()?.is_none())
    }

    /// Address of the ivar destroyer, if any
    pub fn ivar_destroyer(&self) -> ReadResult<Option<Address>> {
        self.require_type_metadata()?;
        let destroyer = self
            .raw
            .reader()
            .read_pointer(self.raw.field(self.layout().ivar_destroyer() as i64))?;
        Ok((destroyer != 0).then_some(destroyer))
    }

    /// Words to add to the descriptor's static offsets.
    ///
    /// Zero unless the descriptor marks the superclass as resilient, in
    /// which case the superclass's runtime size is used.
    pub fn resilient_adjustment(&self, descriptor: &TypeContextDescriptor<'r, R>) -> ReadResult<u64> {
        if !descriptor.has_resilient_superclass()? {
            return Ok(0);
        }
        match self.superclass_metadata()? {
            Some(superclass) => superclass.size_in_words(),
            None => Ok(0),
        }
    }

    /// Word offset of the generic argument vector
    pub fn generic_argument_offset(&self) -> ReadResult<Option<u64>> {
        let Some(descriptor) = self.descriptor()? else {
            return Ok(None);
        };
        let Some(header) = descriptor.generic_header()? else {
            return Ok(None);
        };
        Ok(Some(
            header.argument_offset as u64 + self.resilient_adjustment(&descriptor)?,
        ))
    }

    /// Field offsets of the class's stored properties
    pub fn field_offsets(&self) -> ReadResult<Option<Vec<u64>>> {
        let Some(descriptor) = self.descriptor()? else {
            return Ok(None);
        };
        let vector_offset = descriptor.field_offset_vector_offset()? as u64;
        if vector_offset == 0 {
            return Ok(None);
        }
        let start = vector_offset + self.resilient_adjustment(&descriptor)?;
        let count = descriptor.num_fields()? as u64;
        (0..count)
            .map(|i| self.raw.word((start + i) as i64))
            .collect::<ReadResult<Vec<_>>>()
            .map(Some)
    }

    /// Vtable entries declared by this class's own descriptor
    pub fn vtable(&self) -> ReadResult<Vec<Address>> {
        let Some(descriptor) = self.descriptor()? else {
            return Ok(Vec::new());
        };
        let Some(header) = descriptor.vtable_header()? else {
            return Ok(Vec::new());
        };
        let start = header.offset as u64 + self.resilient_adjustment(&descriptor)?;
        (0..header.size as u64)
            .map(|i| self.raw.word((start + i) as i64))
            .collect()
    }

    /// Walk to the root class, starting with this one
    pub fn ancestry(&self) -> ReadResult<Vec<ClassMetadata<'r, R>>> {
        let mut chain = vec![*self];
        let mut current = *self;
        while let Some(superclass) = current.superclass_metadata()? {
            if chain.len() > 4096 {
                return Err(ReadError::Malformed {
                    address: self.address(),
                    reason: "superclass chain does not terminate",
                });
            }
            chain.push(superclass);
            current = superclass;
        }
        Ok(chain)
    }
}

metadata_view!(
    /// Metadata wrapping a foreign class object
    ObjCClassWrapperMetadata
);

impl<'r, R: MemoryReader> ObjCClassWrapperMetadata<'r, R> {
    /// The wrapped class object
    pub fn class(&self) -> ReadResult<Address> {
        let class = self.raw.word(1)?;
        if class == 0 {
            return Err(ReadError::NullReference(self.raw.word_address(1)));
        }
        Ok(class)
    }
}
