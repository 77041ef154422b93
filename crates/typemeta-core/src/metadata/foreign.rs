//! Foreign type metadata
//!
//! Types imported from another object model are emitted once per image, so
//! several records may describe the same type. They carry a header prefix in
//! front of the usual value witness pointer:
//!
//! ```text
//!   -2 words - 8   initialization function (relative, i32)
//!   -2 words - 4   name (relative, i32)
//!   -2 words       cache word
//!   -1 word        &ValueWitnessTable
//!    0             kind
//! ```
//!
//! The runtime picks one record per name as canonical and stores its
//! address in the cache word of every record it sees.

use super::{metadata_view, RawMetadata};
use crate::abi::ForeignTypeFlags;
use crate::descriptor::TypeContextDescriptor;
use crate::error::ReadResult;
use crate::pointer::{Address, MemoryReader, RelativeDirectPointer};

/// Decoded cache word of a foreign type header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignCacheValue {
    /// Not yet uniqued; the word holds initialization flags
    Uninitialized {
        /// Initialization flags
        flags: ForeignTypeFlags,
    },
    /// Uniqued; the word holds the canonical record
    Initialized {
        /// Address of the canonical record
        canonical: Address,
    },
}

impl ForeignCacheValue {
    /// Decode a raw cache word.
    ///
    /// Words up to the largest flag mask are flag sets, anything larger is a
    /// record address.
    pub fn from_raw(raw: u64) -> Self {
        if raw <= ForeignTypeFlags::LARGEST_FLAG_MASK as u64 {
            ForeignCacheValue::Uninitialized {
                flags: ForeignTypeFlags::from_bits_retain(raw as usize),
            }
        } else {
            ForeignCacheValue::Initialized { canonical: raw }
        }
    }

    /// Encode as a raw cache word
    pub fn raw(self) -> u64 {
        match self {
            ForeignCacheValue::Uninitialized { flags } => flags.bits() as u64,
            ForeignCacheValue::Initialized { canonical } => canonical,
        }
    }

    /// The record has been uniqued
    pub fn is_initialized(self) -> bool {
        matches!(self, ForeignCacheValue::Initialized { .. })
    }

    /// The record's initialization function must run if it becomes canonical
    pub fn has_initialization_function(self) -> bool {
        match self {
            ForeignCacheValue::Uninitialized { flags } => {
                flags.contains(ForeignTypeFlags::HAS_INITIALIZATION_FUNCTION)
            }
            ForeignCacheValue::Initialized { .. } => false,
        }
    }
}

/// The header prefix of a foreign type record
pub struct ForeignTypeHeader<'r, R> {
    raw: RawMetadata<'r, R>,
}

impl<'r, R> Clone for ForeignTypeHeader<'r, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'r, R> Copy for ForeignTypeHeader<'r, R> {}

impl<'r, R: MemoryReader> ForeignTypeHeader<'r, R> {
    /// Header of the foreign record `raw`
    pub fn new(raw: RawMetadata<'r, R>) -> Self {
        Self { raw }
    }

    /// Address of the cache word
    pub fn cache_address(&self) -> Address {
        self.raw.word_address(-2)
    }

    /// Address of the name field
    pub fn name_field(&self) -> Address {
        self.cache_address() - 4
    }

    /// Address of the initialization function field
    pub fn initialization_function_field(&self) -> Address {
        self.cache_address() - 8
    }

    /// Address of the uniquing name
    pub fn name_address(&self) -> ReadResult<Address> {
        self.raw
            .reader()
            .resolve_relative_required::<RelativeDirectPointer<false>>(self.name_field())
    }

    /// The uniquing name
    pub fn name(&self) -> ReadResult<String> {
        self.raw.reader().read_c_string(self.name_address()?)
    }

    /// The cache word
    pub fn cache(&self) -> ReadResult<ForeignCacheValue> {
        Ok(ForeignCacheValue::from_raw(
            self.raw.reader().read_word(self.cache_address())?,
        ))
    }

    /// The initialization function, while the record is uninitialized and
    /// flagged as having one
    pub fn initialization_function(&self) -> ReadResult<Option<Address>> {
        if !self.cache()?.has_initialization_function() {
            return Ok(None);
        }
        self.raw
            .reader()
            .resolve_relative::<RelativeDirectPointer<true>>(self.initialization_function_field())
    }
}

metadata_view!(
    /// Metadata of a foreign class
    ForeignClassMetadata
);

impl<'r, R: MemoryReader> ForeignClassMetadata<'r, R> {
    /// The foreign header prefix
    pub fn header(&self) -> ForeignTypeHeader<'r, R> {
        ForeignTypeHeader::new(self.raw)
    }

    /// Address of the nominal type descriptor, if any
    pub fn description(&self) -> ReadResult<Option<Address>> {
        let description = self.raw.word(1)?;
        Ok((description != 0).then_some(description))
    }

    /// The nominal type descriptor
    pub fn descriptor(&self) -> ReadResult<Option<TypeContextDescriptor<'r, R>>> {
        Ok(self
            .description()?
            .map(|address| TypeContextDescriptor::new(self.raw.reader(), address)))
    }

    /// Superclass, `None` for a root class
    pub fn superclass(&self) -> ReadResult<Option<Address>> {
        let superclass = self.raw.word(2)?;
        Ok((superclass != 0).then_some(superclass))
    }
}
