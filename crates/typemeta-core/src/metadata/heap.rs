//! Metadata of runtime heap boxes
//!
//! Boxes are heap objects, so like classes they carry a destroy function
//! two words before the address point.

use super::metadata_view;
use crate::error::ReadResult;
use crate::pointer::{Address, MemoryReader};

metadata_view!(
    /// Box holding captured local variables
    HeapLocalVariableMetadata
);

impl<'r, R: MemoryReader> HeapLocalVariableMetadata<'r, R> {
    /// Byte offset of the first capture from the start of the box
    pub fn offset_to_first_capture(&self) -> ReadResult<u32> {
        self.raw.reader().read_u32(self.raw.word_address(1))
    }

    /// Reflection description of the captures, if emitted
    pub fn capture_description(&self) -> ReadResult<Option<Address>> {
        let description = self.raw.word(2)?;
        Ok((description != 0).then_some(description))
    }

    /// The box's destroy function
    pub fn destroy(&self) -> ReadResult<Address> {
        self.raw.word(-2)
    }
}

metadata_view!(
    /// Box holding one value of a runtime-chosen type
    GenericBoxMetadata
);

impl<'r, R: MemoryReader> GenericBoxMetadata<'r, R> {
    /// Byte offset of the value from the start of the box
    pub fn offset(&self) -> ReadResult<u32> {
        self.raw.reader().read_u32(self.raw.word_address(1))
    }

    /// Metadata of the boxed value
    pub fn boxed_type(&self) -> ReadResult<Address> {
        self.raw.word(2)
    }

    /// The box's destroy function
    pub fn destroy(&self) -> ReadResult<Address> {
        self.raw.word(-2)
    }
}

metadata_view!(
    /// Metadata shared by boxed error objects
    ErrorObjectMetadata
);
