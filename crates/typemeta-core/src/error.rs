//! Error types
//!
//! Lookup misses are not errors: they come back as `None`. The enums here
//! cover reading records out of memory that may be foreign or damaged, and
//! laying out new records in an image.

use crate::pointer::Address;
use thiserror::Error;

/// Failure to read or decode a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The reader could not supply the requested bytes
    #[error("unreadable memory: {size} bytes at {address:#x}")]
    Unreadable {
        /// Start of the failed read
        address: Address,
        /// Number of bytes requested
        size: usize,
    },

    /// A non-nullable reference resolved to null
    #[error("null reference in field at {0:#x}")]
    NullReference(Address),

    /// A C string ran past the read limit without a terminator
    #[error("unterminated string at {0:#x}")]
    UnterminatedString(Address),

    /// A name was not valid UTF-8
    #[error("invalid UTF-8 in string at {0:#x}")]
    InvalidUtf8(Address),

    /// A record kind or count that no valid record can have
    #[error("malformed record at {address:#x}: {reason}")]
    Malformed {
        /// Record address
        address: Address,
        /// What was wrong
        reason: &'static str,
    },
}

/// Reader result
pub type ReadResult<T> = Result<T, ReadError>;

/// Failure while laying out records in an image
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    /// The static arena backing in-process images is used up
    #[error("image arena exhausted: requested {requested} bytes, {available} available")]
    ArenaExhausted {
        /// Bytes asked for
        requested: usize,
        /// Bytes left in the arena
        available: usize,
    },

    /// The image has no room for another record
    #[error("image capacity exceeded: {needed} bytes needed, capacity {capacity}")]
    CapacityExceeded {
        /// Bytes the image would need
        needed: usize,
        /// Bytes the image holds
        capacity: usize,
    },

    /// A relative reference cannot reach its target in 32 bits
    #[error("relative offset from {from:#x} to {to:#x} does not fit in 32 bits")]
    OffsetOutOfRange {
        /// Address of the referencing field
        from: Address,
        /// Target address
        to: Address,
    },

    /// A tagged reference target is not aligned enough to carry its tag
    #[error("target {target:#x} is not aligned to {align} bytes")]
    Misaligned {
        /// Target address
        target: Address,
        /// Required alignment
        align: u64,
    },

    /// An absolute pointer does not fit in the image's pointer width
    #[error("pointer {0:#x} does not fit in the target pointer width")]
    PointerTooWide(Address),

    /// A write fell outside the image
    #[error("write of {size} bytes at image offset {offset} is out of bounds")]
    OutOfBounds {
        /// Offset into the image
        offset: usize,
        /// Size of the write
        size: usize,
    },
}

/// Image builder result
pub type EmitResult<T> = Result<T, EmitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_messages() {
        let err = ReadError::Unreadable { address: 0x1000, size: 8 };
        assert_eq!(err.to_string(), "unreadable memory: 8 bytes at 0x1000");
        assert_eq!(
            ReadError::NullReference(0x20).to_string(),
            "null reference in field at 0x20"
        );
    }

    #[test]
    fn test_emit_error_messages() {
        let err = EmitError::OffsetOutOfRange { from: 0x10, to: 0x1_0000_0010 };
        assert!(err.to_string().contains("does not fit in 32 bits"));
    }
}
