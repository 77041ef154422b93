//! Protocol descriptors and protocol records
//!
//! Protocol descriptors keep the layout of a foreign class object (an isa
//! word, absolute name and inherited-protocol pointers, five reserved
//! pointers) followed by the native fields:
//!
//! ```text
//!   0 words  isa
//!   1        name (absolute C string)
//!   2        inherited protocols (absolute pointer to {count, protocols...})
//!   3..8     reserved
//!   8        descriptor_size: u32   flags: u32
//!            num_mandatory: u16     num_requirements: u16
//!            requirements: relative
//!            superclass constraint: relative, nullable
//!            associated type names: relative, nullable
//! ```

use crate::abi::{ProtocolDescriptorFlags, ProtocolRequirementFlags};
use crate::error::{ReadError, ReadResult};
use crate::pointer::{
    Address, MemoryReader, RelativeDirectPointer, RelativeIndirectablePointerIntPair,
};

use super::descriptor_view;

/// Bytes of one protocol requirement
pub const PROTOCOL_REQUIREMENT_SIZE: u64 = 8;

/// Size of a protocol descriptor for the given pointer size
pub const fn protocol_descriptor_size(pointer_size: u64) -> u64 {
    8 * pointer_size + 24
}

/// One requirement of a protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolRequirement {
    /// Kind and attributes
    pub flags: ProtocolRequirementFlags,
    /// Default witness of a resilient protocol, if any
    pub default_implementation: Option<Address>,
}

descriptor_view!(
    /// Descriptor of a protocol
    ProtocolDescriptor
);

impl<'r, R: MemoryReader> ProtocolDescriptor<'r, R> {
    fn native_field(&self, offset: u64) -> Address {
        self.address + 8 * self.reader.pointer_size() + offset
    }

    /// Protocol name
    pub fn name(&self) -> ReadResult<String> {
        let name = self
            .reader
            .read_pointer(self.reader.word_address(self.address, 1))?;
        self.reader.read_c_string(name)
    }

    /// Protocols this protocol refines
    pub fn inherited_protocols(&self) -> ReadResult<Vec<Address>> {
        let list = self
            .reader
            .read_pointer(self.reader.word_address(self.address, 2))?;
        if list == 0 {
            return Ok(Vec::new());
        }
        let count = self.reader.read_word(list)? as i64;
        (1..=count)
            .map(|i| self.reader.read_pointer(self.reader.word_address(list, i)))
            .collect()
    }

    /// Size the descriptor declares for itself
    pub fn descriptor_size(&self) -> ReadResult<u32> {
        self.reader.read_u32(self.native_field(0))
    }

    /// Flags word
    pub fn flags(&self) -> ReadResult<ProtocolDescriptorFlags> {
        Ok(ProtocolDescriptorFlags::from_bits(
            self.reader.read_u32(self.native_field(4))?,
        ))
    }

    /// Requirements without a default implementation
    pub fn num_mandatory_requirements(&self) -> ReadResult<u16> {
        self.reader.read_u16(self.native_field(8))
    }

    /// Number of requirements
    pub fn num_requirements(&self) -> ReadResult<u16> {
        self.reader.read_u16(self.native_field(10))
    }

    /// Requirement `index`
    pub fn requirement(&self, index: u16) -> ReadResult<ProtocolRequirement> {
        let count = self.num_requirements()?;
        if index >= count {
            return Err(ReadError::Malformed {
                address: self.address,
                reason: "protocol requirement index out of range",
            });
        }
        let array = self
            .reader
            .resolve_relative_required::<RelativeDirectPointer<false>>(self.native_field(12))?;
        let at = array + index as u64 * PROTOCOL_REQUIREMENT_SIZE;
        Ok(ProtocolRequirement {
            flags: ProtocolRequirementFlags::from_bits(self.reader.read_u32(at)?),
            default_implementation: self
                .reader
                .resolve_relative::<RelativeDirectPointer<true>>(at + 4)?,
        })
    }

    /// Every requirement in witness table order
    pub fn requirements(&self) -> ReadResult<Vec<ProtocolRequirement>> {
        (0..self.num_requirements()?)
            .map(|i| self.requirement(i))
            .collect()
    }

    /// Mangled name of the superclass constraint
    pub fn superclass_constraint(&self) -> ReadResult<Option<String>> {
        let Some(name) = self
            .reader
            .resolve_relative::<RelativeDirectPointer<true>>(self.native_field(16))?
        else {
            return Ok(None);
        };
        let bytes = self.reader.read_c_bytes(name)?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Associated type names in declaration order
    pub fn associated_type_names(&self) -> ReadResult<Vec<String>> {
        let Some(names) = self
            .reader
            .resolve_relative::<RelativeDirectPointer<true>>(self.native_field(20))?
        else {
            return Ok(Vec::new());
        };
        Ok(self
            .reader
            .read_c_string(names)?
            .split(' ')
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

/// Read a section of protocol records, each a relative reference to a
/// protocol descriptor
pub fn read_protocol_records<R: MemoryReader>(
    reader: &R,
    start: Address,
    count: usize,
) -> ReadResult<Vec<Address>> {
    (0..count as u64)
        .filter_map(|i| {
            reader
                .resolve_relative::<RelativeIndirectablePointerIntPair<true>>(start + 4 * i)
                .transpose()
        })
        .collect()
}
