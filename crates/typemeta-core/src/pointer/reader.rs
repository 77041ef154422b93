//! Memory readers
//!
//! All record parsing reads memory through [`MemoryReader`], so the same
//! code walks records in this process, in another process through a
//! callback, or in a captured snapshot.

use super::{Address, FarRelativeDirectPointer, RelativeReference, Resolved};
use crate::error::{ReadError, ReadResult};
use std::fmt;

/// Longest C string a reader will follow before giving up
pub const MAX_STRING_LENGTH: usize = 4096;

/// Pointer width of the address space being read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    /// 32-bit target
    Four,
    /// 64-bit target
    Eight,
}

impl PointerWidth {
    /// Width of this process
    pub const fn native() -> Self {
        if std::mem::size_of::<usize>() == 8 {
            PointerWidth::Eight
        } else {
            PointerWidth::Four
        }
    }

    /// Width in bytes
    pub const fn bytes(self) -> u64 {
        match self {
            PointerWidth::Four => 4,
            PointerWidth::Eight => 8,
        }
    }
}

/// Reads raw bytes from some address space.
///
/// Implementors supply [`read_bytes`](MemoryReader::read_bytes) and the
/// target's pointer width. Multi-byte values are decoded in host byte order.
pub trait MemoryReader {
    /// Pointer width of the target
    fn pointer_width(&self) -> PointerWidth;

    /// Fill `buf` with the bytes starting at `address`
    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> ReadResult<()>;

    /// Pointer size in bytes
    fn pointer_size(&self) -> u64 {
        self.pointer_width().bytes()
    }

    /// Read one byte
    fn read_u8(&self, address: Address) -> ReadResult<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(address, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a 16-bit value
    fn read_u16(&self, address: Address) -> ReadResult<u16> {
        let mut buf = [0u8; 2];
        self.read_bytes(address, &mut buf)?;
        Ok(u16::from_ne_bytes(buf))
    }

    /// Read a 32-bit value
    fn read_u32(&self, address: Address) -> ReadResult<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(address, &mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }

    /// Read a signed 32-bit value
    fn read_i32(&self, address: Address) -> ReadResult<i32> {
        Ok(self.read_u32(address)? as i32)
    }

    /// Read a 64-bit value
    fn read_u64(&self, address: Address) -> ReadResult<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(address, &mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// Read a target word, zero-extended
    fn read_word(&self, address: Address) -> ReadResult<u64> {
        match self.pointer_width() {
            PointerWidth::Four => Ok(self.read_u32(address)? as u64),
            PointerWidth::Eight => self.read_u64(address),
        }
    }

    /// Read a target word, sign-extended
    fn read_signed_word(&self, address: Address) -> ReadResult<i64> {
        match self.pointer_width() {
            PointerWidth::Four => Ok(self.read_i32(address)? as i64),
            PointerWidth::Eight => Ok(self.read_u64(address)? as i64),
        }
    }

    /// Read an absolute pointer (0 is null)
    fn read_pointer(&self, address: Address) -> ReadResult<Address> {
        self.read_word(address)
    }

    /// Address of word `index` counted from `base`
    fn word_address(&self, base: Address, index: i64) -> Address {
        base.wrapping_add_signed(index * self.pointer_size() as i64)
    }

    /// Read a NUL-terminated UTF-8 string
    fn read_c_string(&self, address: Address) -> ReadResult<String> {
        let bytes = self.read_c_bytes(address)?;
        String::from_utf8(bytes).map_err(|_| ReadError::InvalidUtf8(address))
    }

    /// Read the bytes of a NUL-terminated string, without the terminator
    fn read_c_bytes(&self, address: Address) -> ReadResult<Vec<u8>> {
        if address == 0 {
            return Err(ReadError::NullReference(address));
        }
        let mut bytes = Vec::new();
        for i in 0..MAX_STRING_LENGTH as u64 {
            let at = address
                .checked_add(i)
                .ok_or(ReadError::Unreadable { address, size: 1 })?;
            let byte = self.read_u8(at)?;
            if byte == 0 {
                return Ok(bytes);
            }
            bytes.push(byte);
        }
        Err(ReadError::UnterminatedString(address))
    }

    /// Read a relative reference stored at `field`
    fn read_reference<P: RelativeReference>(&self, field: Address) -> ReadResult<P>
    where
        Self: Sized,
    {
        Ok(P::from_raw(self.read_i32(field)?))
    }

    /// Read and resolve a relative reference, following indirection slots.
    ///
    /// A null reference, or an indirection slot holding null, is `None`.
    fn resolve_relative<P: RelativeReference>(&self, field: Address) -> ReadResult<Option<Address>>
    where
        Self: Sized,
    {
        let reference: P = self.read_reference(field)?;
        match reference.resolve(field) {
            None => Ok(None),
            Some(Resolved::Direct(target)) => Ok(Some(target)),
            Some(Resolved::Indirect(slot)) => {
                let target = self.read_pointer(slot)?;
                Ok((target != 0).then_some(target))
            }
        }
    }

    /// Like [`resolve_relative`](MemoryReader::resolve_relative) but null is an error
    fn resolve_relative_required<P: RelativeReference>(&self, field: Address) -> ReadResult<Address>
    where
        Self: Sized,
    {
        self.resolve_relative::<P>(field)?
            .ok_or(ReadError::NullReference(field))
    }

    /// Read and resolve a word-sized relative offset
    fn resolve_far<const NULLABLE: bool>(&self, field: Address) -> ReadResult<Option<Address>>
    where
        Self: Sized,
    {
        let raw = self.read_signed_word(field)?;
        Ok(FarRelativeDirectPointer::<NULLABLE>::from_raw(raw).resolve(field))
    }
}

impl<R: MemoryReader + ?Sized> MemoryReader for &R {
    fn pointer_width(&self) -> PointerWidth {
        (**self).pointer_width()
    }

    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> ReadResult<()> {
        (**self).read_bytes(address, buf)
    }
}

/// Reads this process's memory with native loads
#[derive(Debug, Clone, Copy)]
pub struct InProcessReader {
    _private: (),
}

impl InProcessReader {
    /// Create an in-process reader.
    ///
    /// # Safety
    ///
    /// Every non-null address later passed to the reader must be valid for
    /// reads of the requested size. The reader performs raw loads.
    pub const unsafe fn new() -> Self {
        InProcessReader { _private: () }
    }
}

/// Reader used by the in-process accessors, whose addresses come from
/// `&'static` records.
pub(crate) static IN_PROCESS: InProcessReader = unsafe { InProcessReader::new() };

impl MemoryReader for InProcessReader {
    fn pointer_width(&self) -> PointerWidth {
        PointerWidth::native()
    }

    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> ReadResult<()> {
        if address == 0 {
            return Err(ReadError::Unreadable {
                address,
                size: buf.len(),
            });
        }
        // SAFETY: the constructor's contract covers every non-null address.
        unsafe {
            std::ptr::copy_nonoverlapping(address as usize as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }
}

/// Reads another address space through a callback.
///
/// The callback fills the buffer and returns `false` when the range is not
/// readable.
pub struct ExternalReader<F> {
    width: PointerWidth,
    read: F,
}

impl<F> ExternalReader<F>
where
    F: Fn(Address, &mut [u8]) -> bool,
{
    /// Create a reader for a target with the given pointer width
    pub fn new(width: PointerWidth, read: F) -> Self {
        Self { width, read }
    }
}

impl<F> MemoryReader for ExternalReader<F>
where
    F: Fn(Address, &mut [u8]) -> bool,
{
    fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> ReadResult<()> {
        if (self.read)(address, buf) {
            Ok(())
        } else {
            Err(ReadError::Unreadable {
                address,
                size: buf.len(),
            })
        }
    }
}

impl<F> fmt::Debug for ExternalReader<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalReader")
            .field("width", &self.width)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::{RelativeDirectPointer, RelativeIndirectablePointer};

    fn image_reader(base: Address, bytes: Vec<u8>, width: PointerWidth) -> impl MemoryReader {
        ExternalReader::new(width, move |address, buf: &mut [u8]| {
            let Some(start) = address.checked_sub(base) else {
                return false;
            };
            let start = start as usize;
            match bytes.get(start..start + buf.len()) {
                Some(src) => {
                    buf.copy_from_slice(src);
                    true
                }
                None => false,
            }
        })
    }

    #[test]
    fn test_in_process_reads() {
        let words: [u64; 2] = [0x1122_3344_5566_7788, 42];
        let base = words.as_ptr() as Address;
        assert_eq!(IN_PROCESS.read_u64(base).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(IN_PROCESS.read_word(base + 8).unwrap(), 42);
        assert!(IN_PROCESS.read_u32(0).is_err());
    }

    #[test]
    fn test_in_process_string() {
        let text = b"Swift\0";
        let name = IN_PROCESS.read_c_string(text.as_ptr() as Address).unwrap();
        assert_eq!(name, "Swift");
    }

    #[test]
    fn test_external_reader_width_four() {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(&0xFFFF_FFF0u32.to_ne_bytes());
        let reader = image_reader(0x1000, bytes, PointerWidth::Four);
        assert_eq!(reader.pointer_size(), 4);
        assert_eq!(reader.read_word(0x1000).unwrap(), 0xFFFF_FFF0);
        assert_eq!(reader.read_signed_word(0x1000).unwrap(), -16);
        assert_eq!(
            reader.read_u32(0x2000),
            Err(ReadError::Unreadable { address: 0x2000, size: 4 })
        );
    }

    #[test]
    fn test_resolve_relative_through_reader() {
        // [0] direct +8 -> 0x1008, [4] indirect +4 -> slot at 0x1008 holding 0x5000
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(&8i32.to_ne_bytes());
        bytes[4..8].copy_from_slice(&5i32.to_ne_bytes());
        bytes[8..16].copy_from_slice(&0x5000u64.to_ne_bytes());
        let reader = image_reader(0x1000, bytes, PointerWidth::Eight);

        let direct = reader
            .resolve_relative::<RelativeDirectPointer<true>>(0x1000)
            .unwrap();
        assert_eq!(direct, Some(0x1008));

        let indirect = reader
            .resolve_relative::<RelativeIndirectablePointer<true>>(0x1004)
            .unwrap();
        assert_eq!(indirect, Some(0x5000));
    }

    #[test]
    fn test_unterminated_and_invalid_strings() {
        let reader = image_reader(0x1000, vec![b'a'; 8], PointerWidth::Eight);
        // Runs off the end of the image before finding a terminator.
        assert!(matches!(
            reader.read_c_string(0x1000),
            Err(ReadError::Unreadable { .. })
        ));

        let reader = image_reader(0x1000, vec![0xFF, 0xFE, 0], PointerWidth::Eight);
        assert_eq!(reader.read_c_string(0x1000), Err(ReadError::InvalidUtf8(0x1000)));

        let reader = image_reader(0, vec![b'x'; MAX_STRING_LENGTH + 1], PointerWidth::Eight);
        assert_eq!(reader.read_c_string(1), Err(ReadError::UnterminatedString(1)));
    }

    #[test]
    fn test_string_at_top_of_address_space() {
        let reader = ExternalReader::new(PointerWidth::Eight, |_, buf: &mut [u8]| {
            buf.fill(b'a');
            true
        });
        let start = u64::MAX - 4;
        assert_eq!(
            reader.read_c_bytes(start),
            Err(ReadError::Unreadable { address: start, size: 1 })
        );
    }
}
