//! Protocol conformance records
//!
//! ```text
//! conformance descriptor
//!   0   protocol: relative indirectable
//!   4   type reference: relative (interpreted by flags)
//!   8   witness table or accessor: relative
//!  12   flags: u32
//!  16   [retroactive context: relative indirectable]
//!       [conditional requirements: 12 bytes × n]
//!
//! generic witness table
//!   0   size_in_words: u16   private_size_in_words: u16
//!   4   protocol: relative indirectable
//!   8   pattern: relative
//!  12   instantiator: relative, nullable
//!  16   private data: relative
//! ```

use super::descriptor_view;
use super::generic::{GenericRequirement, GENERIC_REQUIREMENT_SIZE};
use crate::abi::{ConformanceFlags, ConformanceKind, TypeMetadataRecordKind};
use crate::error::{ReadError, ReadResult};
use crate::layout::TrailingLayout;
use crate::metadata::Metadata;
use crate::pointer::{
    Address, MemoryReader, RelativeDirectPointer, RelativeDirectPointerIntPair,
    RelativeIndirectablePointer, RelativeReference, Resolved,
};
use std::ffi::c_void;

/// Bytes of a conformance descriptor before its trailing fields
pub const CONFORMANCE_DESCRIPTOR_SIZE: u64 = 16;

/// Bytes of a generic witness table descriptor
pub const GENERIC_WITNESS_TABLE_SIZE: u64 = 20;

/// A protocol witness table. Word 0 is the conformance descriptor; the
/// requirements' witnesses follow.
#[repr(C)]
pub struct WitnessTable {
    description: usize,
}

impl WitnessTable {
    /// Address of the table
    pub fn address(&self) -> Address {
        self as *const Self as usize as Address
    }

    /// Address of the conformance descriptor this table was built for
    pub fn conformance_address(&self) -> Address {
        self.description as Address
    }

    /// Word `index` of the table
    ///
    /// # Safety
    ///
    /// The table must have more than `index` words.
    pub unsafe fn word(&self, index: usize) -> usize {
        *(self as *const Self as *const usize).add(index)
    }

    /// Reinterpret an address as a witness table
    ///
    /// # Safety
    ///
    /// `address` must point at a witness table that lives for the rest of
    /// the process.
    pub unsafe fn from_address(address: Address) -> &'static WitnessTable {
        &*(address as usize as *const WitnessTable)
    }
}

impl std::fmt::Debug for WitnessTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "WitnessTable({:#x}, conformance {:#x})",
            self.address(),
            self.description
        )
    }
}

/// Witness table accessor: type, conditional tables, table count
pub type WitnessTableAccessor =
    unsafe extern "C" fn(*const Metadata, *const *const WitnessTable, usize) -> *const WitnessTable;

/// Instantiation function of a generic witness table: the new table, the
/// conforming type and the instantiation arguments
pub type WitnessTableInstantiator =
    unsafe extern "C" fn(*mut WitnessTable, *const Metadata, *const *const c_void);

/// What a conformance or type metadata record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeReference {
    /// A nominal type descriptor
    Descriptor(Address),
    /// A foreign class object
    ObjCClass(Address),
}

fn resolve_type_reference<R: MemoryReader>(
    reader: &R,
    target: Option<Address>,
    kind: TypeMetadataRecordKind,
    field: Address,
) -> ReadResult<Option<TypeReference>> {
    let Some(target) = target else {
        return Ok(None);
    };
    Ok(match kind {
        TypeMetadataRecordKind::DirectNominalTypeDescriptor => {
            Some(TypeReference::Descriptor(target))
        }
        TypeMetadataRecordKind::IndirectNominalTypeDescriptor => {
            let descriptor = reader.read_pointer(target)?;
            (descriptor != 0).then_some(TypeReference::Descriptor(descriptor))
        }
        TypeMetadataRecordKind::IndirectObjCClass => {
            let class = reader.read_pointer(target)?;
            (class != 0).then_some(TypeReference::ObjCClass(class))
        }
        TypeMetadataRecordKind::Reserved => {
            return Err(ReadError::Malformed {
                address: field,
                reason: "reserved type reference kind",
            })
        }
    })
}

descriptor_view!(
    /// Declaration that a type conforms to a protocol
    ConformanceDescriptor
);

impl<'r, R: MemoryReader> ConformanceDescriptor<'r, R> {
    /// Flags word
    pub fn flags(&self) -> ReadResult<ConformanceFlags> {
        Ok(ConformanceFlags::from_bits(self.reader.read_u32(self.address + 12)?))
    }

    /// How the witness table is provided
    pub fn kind(&self) -> ReadResult<ConformanceKind> {
        Ok(self.flags()?.conformance_kind())
    }

    /// The protocol descriptor
    pub fn protocol(&self) -> ReadResult<Address> {
        self.reader
            .resolve_relative_required::<RelativeIndirectablePointer<true>>(self.address)
    }

    /// The conforming type, `None` when an indirect slot is still empty
    pub fn type_reference(&self) -> ReadResult<Option<TypeReference>> {
        let field = self.address + 4;
        let target = self
            .reader
            .resolve_relative::<RelativeDirectPointer<true>>(field)?;
        resolve_type_reference(self.reader, target, self.flags()?.type_reference_kind(), field)
    }

    /// The static witness table or the accessor function, depending on kind
    pub fn witness_table_or_accessor(&self) -> ReadResult<Option<Address>> {
        self.reader
            .resolve_relative::<RelativeDirectPointer<true>>(self.address + 8)
    }

    fn trailing(&self) -> ReadResult<(TrailingLayout, u64, u64)> {
        let flags = self.flags()?;
        let mut layout = TrailingLayout::new(CONFORMANCE_DESCRIPTOR_SIZE);
        let retroactive = layout.push_if(flags.is_retroactive(), 4, 4, 1);
        let requirements = layout.push(
            GENERIC_REQUIREMENT_SIZE,
            4,
            flags.num_conditional_requirements() as u64,
        );
        Ok((layout, retroactive.offset, requirements.offset))
    }

    /// The module context that declared a retroactive conformance
    pub fn retroactive_context(&self) -> ReadResult<Option<Address>> {
        if !self.flags()?.is_retroactive() {
            return Ok(None);
        }
        let (_, offset, _) = self.trailing()?;
        self.reader
            .resolve_relative::<RelativeIndirectablePointer<true>>(self.address + offset)
    }

    /// Requirements the conforming type's arguments must meet
    pub fn conditional_requirements(&self) -> ReadResult<Vec<GenericRequirement<'r, R>>> {
        let count = self.flags()?.num_conditional_requirements() as u64;
        let (_, _, offset) = self.trailing()?;
        Ok((0..count)
            .map(|i| {
                GenericRequirement::new(
                    self.reader,
                    self.address + offset + i * GENERIC_REQUIREMENT_SIZE,
                )
            })
            .collect())
    }

    /// Total size including trailing fields
    pub fn size(&self) -> ReadResult<u64> {
        Ok(self.trailing()?.0.end())
    }
}

/// Read a section of conformance records, each a relative reference to a
/// conformance descriptor
pub fn read_conformance_records<R: MemoryReader>(
    reader: &R,
    start: Address,
    count: usize,
) -> ReadResult<Vec<Address>> {
    (0..count as u64)
        .map(|i| {
            let field = start + 4 * i;
            reader
                .resolve_relative::<RelativeDirectPointer<true>>(field)?
                .ok_or(ReadError::NullReference(field))
        })
        .collect()
}

/// Read a section of type metadata records
pub fn read_type_metadata_records<R: MemoryReader>(
    reader: &R,
    start: Address,
    count: usize,
) -> ReadResult<Vec<TypeReference>> {
    let mut types = Vec::with_capacity(count);
    for i in 0..count as u64 {
        let field = start + 4 * i;
        let record: RelativeDirectPointerIntPair<true> = reader.read_reference(field)?;
        let target = record.resolve(field).map(|resolved| match resolved {
            Resolved::Direct(target) | Resolved::Indirect(target) => target,
        });
        let kind = TypeMetadataRecordKind::from_raw(record.int_value());
        if let Some(reference) = resolve_type_reference(reader, target, kind, field)? {
            types.push(reference);
        }
    }
    Ok(types)
}

descriptor_view!(
    /// Template for witness tables instantiated at runtime
    GenericWitnessTable
);

impl<'r, R: MemoryReader> GenericWitnessTable<'r, R> {
    /// Words copied from the pattern
    pub fn witness_table_size_in_words(&self) -> ReadResult<u16> {
        self.reader.read_u16(self.address)
    }

    /// Words allocated before the table's address point
    pub fn witness_table_private_size_in_words(&self) -> ReadResult<u16> {
        self.reader.read_u16(self.address + 2)
    }

    /// Protocol of the tables, when recorded
    pub fn protocol(&self) -> ReadResult<Option<Address>> {
        self.reader
            .resolve_relative::<RelativeIndirectablePointer<true>>(self.address + 4)
    }

    /// The pattern table
    pub fn pattern(&self) -> ReadResult<Address> {
        self.reader
            .resolve_relative::<RelativeDirectPointer<true>>(self.address + 8)?
            .ok_or(ReadError::NullReference(self.address + 8))
    }

    /// Instantiation function
    pub fn instantiator(&self) -> ReadResult<Option<Address>> {
        self.reader
            .resolve_relative::<RelativeDirectPointer<true>>(self.address + 12)
    }

    /// Private data area of the conformance
    pub fn private_data(&self) -> ReadResult<Option<Address>> {
        self.reader
            .resolve_relative::<RelativeDirectPointer<true>>(self.address + 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::reader::IN_PROCESS;

    #[repr(C, align(8))]
    struct Section {
        records: [i32; 2],
        slot: usize,
    }

    #[test]
    fn test_type_metadata_records() {
        let mut section = Section {
            records: [0; 2],
            slot: 0x7000,
        };
        // Record 0: direct +0x40 (kind 0). Record 1: indirect to `slot` (kind 1).
        section.records[0] = 0x40;
        let field1 = &section.records[1] as *const i32 as Address;
        let slot = &section.slot as *const usize as Address;
        section.records[1] = (slot - field1) as i32
            | TypeMetadataRecordKind::IndirectNominalTypeDescriptor.raw() as i32;
        let start = section.records.as_ptr() as Address;

        let types = read_type_metadata_records(&IN_PROCESS, start, 2).unwrap();
        assert_eq!(
            types,
            vec![
                TypeReference::Descriptor(start + 0x40),
                TypeReference::Descriptor(0x7000)
            ]
        );
    }

    #[test]
    fn test_witness_table_header_word() {
        let words: [usize; 3] = [0x1234, 7, 9];
        let table = unsafe { WitnessTable::from_address(words.as_ptr() as Address) };
        assert_eq!(table.conformance_address(), 0x1234);
        assert_eq!(unsafe { table.word(2) }, 9);
    }
}
