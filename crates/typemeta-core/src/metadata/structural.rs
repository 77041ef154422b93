//! Structural type metadata: tuples, functions, existentials and metatypes

use super::metadata_view;
use crate::abi::{
    ExistentialTypeFlags, FunctionTypeFlags, ParameterFlags, ProtocolClassConstraint,
    SpecialProtocol, NUM_WORDS_VALUE_BUFFER,
};
use crate::error::{ReadError, ReadResult};
use crate::pointer::{Address, MemoryReader};

/// One element of a tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleElement {
    /// Element type metadata
    pub metadata: Address,
    /// Byte offset of the element within the tuple
    pub offset: u64,
}

metadata_view!(
    /// Metadata of a tuple
    ///
    /// Word 1 holds the element count, word 2 the label string and the
    /// elements follow as (type, offset) word pairs.
    TupleMetadata
);

impl<'r, R: MemoryReader> TupleMetadata<'r, R> {
    /// Number of elements
    pub fn num_elements(&self) -> ReadResult<u64> {
        self.raw.word(1)
    }

    /// Address of the label string, if the tuple has labels
    pub fn labels_address(&self) -> ReadResult<Option<Address>> {
        let labels = self.raw.word(2)?;
        Ok((labels != 0).then_some(labels))
    }

    /// Element labels, empty strings for unlabeled elements
    pub fn labels(&self) -> ReadResult<Option<Vec<String>>> {
        let Some(address) = self.labels_address()? else {
            return Ok(None);
        };
        let text = self.raw.reader().read_c_string(address)?;
        let count = self.num_elements()? as usize;
        let labels: Vec<String> = text.split(' ').take(count).map(str::to_owned).collect();
        if labels.len() < count {
            return Err(ReadError::Malformed {
                address,
                reason: "tuple label string has fewer labels than elements",
            });
        }
        Ok(Some(labels))
    }

    /// Element `index`
    pub fn element(&self, index: u64) -> ReadResult<TupleElement> {
        let base = 3 + 2 * index as i64;
        Ok(TupleElement {
            metadata: self.raw.word(base)?,
            offset: self.raw.word(base + 1)?,
        })
    }

    /// All elements in order
    pub fn elements(&self) -> ReadResult<Vec<TupleElement>> {
        (0..self.num_elements()?).map(|i| self.element(i)).collect()
    }
}

metadata_view!(
    /// Metadata of a function type
    ///
    /// Word 1 holds the flags, word 2 the result type, then one word per
    /// parameter type and, when flagged, one 32-bit flag word per parameter.
    FunctionMetadata
);

impl<'r, R: MemoryReader> FunctionMetadata<'r, R> {
    /// Flags word
    pub fn flags(&self) -> ReadResult<FunctionTypeFlags> {
        Ok(FunctionTypeFlags::from_bits(self.raw.word(1)? as u32))
    }

    /// Result type
    pub fn result(&self) -> ReadResult<Address> {
        self.raw.word(2)
    }

    /// Parameter types
    pub fn parameters(&self) -> ReadResult<Vec<Address>> {
        let count = self.flags()?.num_parameters() as i64;
        (0..count).map(|i| self.raw.word(3 + i)).collect()
    }

    /// Flags of parameter `index`, empty when the type stores none
    pub fn parameter_flags(&self, index: u32) -> ReadResult<ParameterFlags> {
        let flags = self.flags()?;
        if !flags.has_parameter_flags() || index >= flags.num_parameters() {
            return Ok(ParameterFlags::empty());
        }
        let array = self.raw.word_address(3 + flags.num_parameters() as i64);
        let raw = self.raw.reader().read_u32(array + 4 * index as u64)?;
        Ok(ParameterFlags::from_bits_retain(raw))
    }
}

/// Storage strategy of an existential container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExistentialRepresentation {
    /// Value buffer, type and witness tables
    Opaque,
    /// Object reference and witness tables
    Class,
    /// One reference to an error box
    Error,
}

metadata_view!(
    /// Metadata of a protocol composition
    ///
    /// Word 1 holds the flags, word 2 the protocol count and the protocol
    /// descriptors follow, then the superclass constraint if flagged.
    ExistentialMetadata
);

impl<'r, R: MemoryReader> ExistentialMetadata<'r, R> {
    /// Flags word
    pub fn flags(&self) -> ReadResult<ExistentialTypeFlags> {
        Ok(ExistentialTypeFlags::from_bits(self.raw.word(1)? as u32))
    }

    /// Number of protocols in the composition
    pub fn num_protocols(&self) -> ReadResult<u64> {
        self.raw.word(2)
    }

    /// Protocol descriptors in the composition
    pub fn protocols(&self) -> ReadResult<Vec<Address>> {
        (0..self.num_protocols()? as i64)
            .map(|i| self.raw.word(3 + i))
            .collect()
    }

    /// Superclass constraint, if present
    pub fn superclass_constraint(&self) -> ReadResult<Option<Address>> {
        if !self.flags()?.has_superclass_constraint() {
            return Ok(None);
        }
        let index = 3 + self.num_protocols()? as i64;
        Ok(Some(self.raw.word(index)?))
    }

    /// Only class instances can be stored
    pub fn is_class_bounded(&self) -> ReadResult<bool> {
        Ok(self.flags()?.class_constraint() == ProtocolClassConstraint::Class)
    }

    /// Container representation
    pub fn representation(&self) -> ReadResult<ExistentialRepresentation> {
        let flags = self.flags()?;
        Ok(if flags.special_protocol() == SpecialProtocol::Error {
            ExistentialRepresentation::Error
        } else if flags.class_constraint() == ProtocolClassConstraint::Class {
            ExistentialRepresentation::Class
        } else {
            ExistentialRepresentation::Opaque
        })
    }

    /// Byte size of a container of this type
    pub fn container_size(&self) -> ReadResult<u64> {
        let p = self.raw.pointer_size();
        let tables = self.flags()?.num_witness_tables() as u64;
        Ok(match self.representation()? {
            ExistentialRepresentation::Opaque => (NUM_WORDS_VALUE_BUFFER as u64 + 1 + tables) * p,
            ExistentialRepresentation::Class => (1 + tables) * p,
            ExistentialRepresentation::Error => p,
        })
    }
}

metadata_view!(
    /// Metadata of a metatype
    MetatypeMetadata
);

impl<'r, R: MemoryReader> MetatypeMetadata<'r, R> {
    /// The instance type
    pub fn instance_type(&self) -> ReadResult<Address> {
        self.raw.word(1)
    }
}

metadata_view!(
    /// Metadata of an existential metatype
    ExistentialMetatypeMetadata
);

impl<'r, R: MemoryReader> ExistentialMetatypeMetadata<'r, R> {
    /// The instance type
    pub fn instance_type(&self) -> ReadResult<Address> {
        self.raw.word(1)
    }

    /// Flags of the innermost existential
    pub fn flags(&self) -> ReadResult<ExistentialTypeFlags> {
        Ok(ExistentialTypeFlags::from_bits(self.raw.word(2)? as u32))
    }

    /// Byte size of a container: the metatype plus its witness tables
    pub fn container_size(&self) -> ReadResult<u64> {
        Ok((1 + self.flags()?.num_witness_tables() as u64) * self.raw.pointer_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataView, RawMetadata};
    use crate::pointer::reader::IN_PROCESS;

    #[test]
    fn test_tuple_labels_and_elements() {
        let labels = b"a  c \0";
        // vwt, kind, count, labels, (type, offset) x 3
        let words: [usize; 10] = [
            0,
            9,
            3,
            labels.as_ptr() as usize,
            0x1000,
            0,
            0x2000,
            8,
            0x3000,
            12,
        ];
        let address = &words[1] as *const usize as Address;
        let tuple = TupleMetadata::new(RawMetadata::new(&IN_PROCESS, address));
        assert_eq!(tuple.num_elements().unwrap(), 3);
        assert_eq!(
            tuple.labels().unwrap().unwrap(),
            vec!["a".to_string(), String::new(), "c".to_string()]
        );
        assert_eq!(
            tuple.element(2).unwrap(),
            TupleElement {
                metadata: 0x3000,
                offset: 12
            }
        );
        assert_eq!(tuple.elements().unwrap().len(), 3);
    }

    #[test]
    fn test_function_parameter_flags() {
        let flags = FunctionTypeFlags::new()
            .with_num_parameters(2)
            .with_parameter_flags(true)
            .with_throws(true);
        let mut words: Vec<usize> = vec![0, 10, flags.bits() as usize, 0x5000, 0x6000, 0x7000, 0];
        // Two u32 parameter flags packed into the last word.
        let packed = (ParameterFlags::IN_OUT.bits() as u64) | ((ParameterFlags::SHARED.bits() as u64) << 32);
        words[6] = packed as usize;
        let address = &words[1] as *const usize as Address;
        match MetadataView::read(&IN_PROCESS, address).unwrap() {
            MetadataView::Function(function) => {
                assert!(function.flags().unwrap().throws());
                assert_eq!(function.result().unwrap(), 0x5000);
                assert_eq!(function.parameters().unwrap(), vec![0x6000, 0x7000]);
                if cfg!(all(target_endian = "little", target_pointer_width = "64")) {
                    assert_eq!(function.parameter_flags(0).unwrap(), ParameterFlags::IN_OUT);
                    assert_eq!(function.parameter_flags(1).unwrap(), ParameterFlags::SHARED);
                }
                assert_eq!(function.parameter_flags(2).unwrap(), ParameterFlags::empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_existential_representation() {
        let opaque = ExistentialTypeFlags::new()
            .with_num_witness_tables(1)
            .with_class_constraint(ProtocolClassConstraint::Any);
        let words: [usize; 5] = [0, 12, opaque.bits() as usize, 1, 0x8000];
        let view = ExistentialMetadata::new(RawMetadata::new(&IN_PROCESS, &words[1] as *const usize as Address));
        assert_eq!(view.representation().unwrap(), ExistentialRepresentation::Opaque);
        assert_eq!(view.protocols().unwrap(), vec![0x8000]);
        assert_eq!(view.container_size().unwrap(), 5 * std::mem::size_of::<usize>() as u64);
        assert_eq!(view.superclass_constraint().unwrap(), None);

        let class = ExistentialTypeFlags::new().with_superclass_constraint(true);
        let words: [usize; 6] = [0, 12, class.bits() as usize, 1, 0x8000, 0x9000];
        let view = ExistentialMetadata::new(RawMetadata::new(&IN_PROCESS, &words[1] as *const usize as Address));
        assert!(view.is_class_bounded().unwrap());
        assert_eq!(view.representation().unwrap(), ExistentialRepresentation::Class);
        assert_eq!(view.superclass_constraint().unwrap(), Some(0x9000));

        let error = ExistentialTypeFlags::new()
            .with_class_constraint(ProtocolClassConstraint::Any)
            .with_special_protocol(SpecialProtocol::Error);
        let words: [usize; 4] = [0, 12, error.bits() as usize, 0];
        let view = ExistentialMetadata::new(RawMetadata::new(&IN_PROCESS, &words[1] as *const usize as Address));
        assert_eq!(view.representation().unwrap(), ExistentialRepresentation::Error);
        assert_eq!(view.container_size().unwrap(), std::mem::size_of::<usize>() as u64);
    }
}
