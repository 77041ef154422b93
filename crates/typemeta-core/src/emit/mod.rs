//! Record image builder
//!
//! [`ImageBuilder`] lays records out in a byte image whose base address is
//! fixed before the first byte is written, so relative references can be
//! computed as records are emitted. Two placements are supported:
//!
//! - **In process**: the image is carved out of a static arena inside this
//!   binary. Relative references from the image to functions and statics of
//!   the binary then fit in 32 bits, and the records stay valid for the
//!   rest of the process, which registration requires.
//! - **Virtual**: the image lives at an arbitrary address of a target with
//!   either pointer width. Its bytes are only ever read back through a
//!   [`SnapshotReader`](crate::remote::SnapshotReader).
//!
//! Multi-byte values are written in host byte order, matching the readers.

mod records;

pub use records::{
    ConformanceRecord, GenericSignature, GenericWitnessTableRecord, MethodRecord,
    ProtocolRecord, ProtocolRequirementRecord, RequirementPayload, RequirementRecord, Section,
    TypeRecord, TypeTarget, VTableRecord, WitnessSource,
};

use crate::error::{EmitError, EmitResult};
use crate::layout::align_up;
use crate::pointer::{relative_offset, Address, PointerWidth};
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Bytes available to in-process images over the life of the process
pub const ARENA_SIZE: usize = 1 << 20;

/// Alignment of every in-process image
const ARENA_ALIGN: u64 = 16;

#[repr(C, align(16))]
struct Arena {
    bytes: UnsafeCell<[u8; ARENA_SIZE]>,
    next: AtomicUsize,
}

// SAFETY: regions are handed out once through the atomic bump pointer and
// each is written only by the builder that reserved it.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena {
    bytes: UnsafeCell::new([0; ARENA_SIZE]),
    next: AtomicUsize::new(0),
};

/// Reserve `size` bytes of the arena
fn reserve_arena(size: usize) -> EmitResult<Address> {
    let size = align_up(size as u64, ARENA_ALIGN) as usize;
    let start = ARENA
        .next
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
            next.checked_add(size).filter(|end| *end <= ARENA_SIZE)
        })
        .map_err(|next| EmitError::ArenaExhausted {
            requested: size,
            available: ARENA_SIZE - next,
        })?;
    Ok(ARENA.bytes.get() as *mut u8 as usize as Address + start as Address)
}

/// Where a finished image ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    InProcess,
    Virtual,
}

/// A finished image
#[derive(Clone)]
pub struct Image {
    base: Address,
    width: PointerWidth,
    bytes: Vec<u8>,
}

impl Image {
    /// Address of the first byte
    pub fn base(&self) -> Address {
        self.base
    }

    /// Pointer width the image was laid out for
    pub fn width(&self) -> PointerWidth {
        self.width
    }

    /// The image contents
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing was emitted
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether `[address, address + size)` lies inside the image
    pub fn contains(&self, address: Address, size: usize) -> bool {
        address >= self.base
            && (address - self.base)
                .checked_add(size as u64)
                .is_some_and(|end| end <= self.bytes.len() as u64)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("base", &format_args!("{:#x}", self.base))
            .field("width", &self.width)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Writer that lays records out at known addresses
pub struct ImageBuilder {
    base: Address,
    capacity: usize,
    width: PointerWidth,
    placement: Placement,
    buffer: Vec<u8>,
}

impl ImageBuilder {
    /// Reserve `capacity` bytes of the in-process arena for a new image.
    ///
    /// The region is never returned to the arena.
    pub fn in_process(capacity: usize) -> EmitResult<Self> {
        let base = reserve_arena(capacity)?;
        debug!(base, capacity, "reserved in-process image");
        Ok(Self {
            base,
            capacity,
            width: PointerWidth::native(),
            placement: Placement::InProcess,
            buffer: Vec::with_capacity(capacity),
        })
    }

    /// Lay out an image for a target address space at `base`
    pub fn at(base: Address, width: PointerWidth, capacity: usize) -> Self {
        Self {
            base,
            capacity,
            width,
            placement: Placement::Virtual,
            buffer: Vec::new(),
        }
    }

    /// Address of the first byte
    pub fn base(&self) -> Address {
        self.base
    }

    /// Pointer width of the target
    pub fn width(&self) -> PointerWidth {
        self.width
    }

    /// Pointer size in bytes
    pub fn pointer_size(&self) -> u64 {
        self.width.bytes()
    }

    /// Bytes emitted so far
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Offset of the next byte
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Address of the next byte
    pub fn here(&self) -> Address {
        self.address_of(self.offset())
    }

    /// Address of image offset `offset`
    pub fn address_of(&self, offset: usize) -> Address {
        self.base + offset as u64
    }

    /// Image offset of `address`, if the address lies in what was emitted
    pub fn offset_of(&self, address: Address) -> Option<usize> {
        let offset = address.checked_sub(self.base)? as usize;
        (offset <= self.buffer.len()).then_some(offset)
    }

    /// Bytes still available
    pub fn remaining(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    fn ensure(&self, extra: usize) -> EmitResult<()> {
        let needed = self.buffer.len() + extra;
        if needed > self.capacity {
            return Err(EmitError::CapacityExceeded {
                needed,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn word_bytes(&self, value: u64) -> EmitResult<([u8; 8], usize)> {
        match self.width {
            PointerWidth::Eight => Ok((value.to_ne_bytes(), 8)),
            PointerWidth::Four => {
                let narrow = u32::try_from(value).map_err(|_| EmitError::PointerTooWide(value))?;
                let mut bytes = [0u8; 8];
                bytes[..4].copy_from_slice(&narrow.to_ne_bytes());
                Ok((bytes, 4))
            }
        }
    }

    // ===== Basic Emission =====

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> EmitResult<()> {
        self.ensure(bytes.len())?;
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Emit one byte
    pub fn emit_u8(&mut self, value: u8) -> EmitResult<()> {
        self.emit_bytes(&[value])
    }

    /// Emit a 16-bit value
    pub fn emit_u16(&mut self, value: u16) -> EmitResult<()> {
        self.emit_bytes(&value.to_ne_bytes())
    }

    /// Emit a 32-bit value
    pub fn emit_u32(&mut self, value: u32) -> EmitResult<()> {
        self.emit_bytes(&value.to_ne_bytes())
    }

    /// Emit a signed 32-bit value
    pub fn emit_i32(&mut self, value: i32) -> EmitResult<()> {
        self.emit_bytes(&value.to_ne_bytes())
    }

    /// Emit a 64-bit value
    pub fn emit_u64(&mut self, value: u64) -> EmitResult<()> {
        self.emit_bytes(&value.to_ne_bytes())
    }

    /// Emit a target word
    pub fn emit_word(&mut self, value: u64) -> EmitResult<()> {
        let (bytes, size) = self.word_bytes(value)?;
        self.emit_bytes(&bytes[..size])
    }

    /// Pad with zeros up to a multiple of `align`
    pub fn align_to(&mut self, align: u64) -> EmitResult<()> {
        let aligned = align_up(self.here(), align);
        let padding = (aligned - self.here()) as usize;
        self.ensure(padding)?;
        self.buffer.resize(self.buffer.len() + padding, 0);
        Ok(())
    }

    /// Append `size` zero bytes at the next multiple of `align` and return
    /// their offset, to be filled in with the `patch_*` methods
    pub fn reserve(&mut self, size: usize, align: u64) -> EmitResult<usize> {
        self.align_to(align)?;
        let offset = self.offset();
        self.ensure(size)?;
        self.buffer.resize(offset + size, 0);
        Ok(offset)
    }

    // ===== Patching =====

    /// Overwrite emitted bytes at `offset`
    pub fn patch_bytes(&mut self, offset: usize, bytes: &[u8]) -> EmitResult<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.buffer.len())
            .ok_or(EmitError::OutOfBounds {
                offset,
                size: bytes.len(),
            })?;
        self.buffer[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Overwrite a 16-bit value
    pub fn patch_u16(&mut self, offset: usize, value: u16) -> EmitResult<()> {
        self.patch_bytes(offset, &value.to_ne_bytes())
    }

    /// Overwrite a 32-bit value
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> EmitResult<()> {
        self.patch_bytes(offset, &value.to_ne_bytes())
    }

    /// Overwrite a target word
    pub fn patch_word(&mut self, offset: usize, value: u64) -> EmitResult<()> {
        let (bytes, size) = self.word_bytes(value)?;
        self.patch_bytes(offset, &bytes[..size])
    }

    // ===== References =====

    /// Store a relative reference at `offset` that resolves to `target`.
    /// `None` stores null.
    pub fn patch_relative(&mut self, offset: usize, target: Option<Address>) -> EmitResult<()> {
        let raw = match target {
            Some(target) => relative_offset(self.address_of(offset), target)?,
            None => 0,
        };
        self.patch_bytes(offset, &raw.to_ne_bytes())
    }

    /// Store a relative reference at `offset` to the pointer slot `slot`,
    /// marked indirect
    pub fn patch_relative_indirect(&mut self, offset: usize, slot: Address) -> EmitResult<()> {
        self.patch_relative_tagged(offset, slot, 1, 2)
    }

    /// Store a relative reference whose low bits carry `tag`. `target` must
    /// be aligned to `align`, which leaves the tag bits free.
    pub fn patch_relative_tagged(
        &mut self,
        offset: usize,
        target: Address,
        tag: u32,
        align: u64,
    ) -> EmitResult<()> {
        debug_assert!((tag as u64) < align, "tag {} does not fit below alignment {}", tag, align);
        if target % align != 0 {
            return Err(EmitError::Misaligned { target, align });
        }
        let raw = relative_offset(self.address_of(offset), target)? | tag as i32;
        self.patch_bytes(offset, &raw.to_ne_bytes())
    }

    /// Emit a relative reference to `target` and return its offset
    pub fn emit_relative(&mut self, target: Option<Address>) -> EmitResult<usize> {
        let offset = self.reserve(4, 4)?;
        self.patch_relative(offset, target)?;
        Ok(offset)
    }

    /// Emit a word-aligned absolute pointer and return its address
    pub fn emit_pointer_slot(&mut self, target: Address) -> EmitResult<Address> {
        self.align_to(self.pointer_size())?;
        let address = self.here();
        self.emit_word(target)?;
        Ok(address)
    }

    /// Emit consecutive word-aligned words and return the address of the first
    pub fn emit_words(&mut self, words: &[u64]) -> EmitResult<Address> {
        self.align_to(self.pointer_size())?;
        let address = self.here();
        for word in words {
            self.emit_word(*word)?;
        }
        Ok(address)
    }

    /// Emit a NUL-terminated string and return its address
    pub fn emit_c_string(&mut self, text: &str) -> EmitResult<Address> {
        debug_assert!(!text.contains('\0'), "interior NUL in emitted string");
        let address = self.here();
        self.emit_bytes(text.as_bytes())?;
        self.emit_u8(0)?;
        Ok(address)
    }

    /// Emit names back to back, each NUL-terminated, with a final extra NUL
    pub fn emit_name_list(&mut self, names: &[&str]) -> EmitResult<Address> {
        let address = self.here();
        for name in names {
            self.emit_c_string(name)?;
        }
        self.emit_u8(0)?;
        Ok(address)
    }

    /// Finish the image.
    ///
    /// An in-process image is copied into its arena region, where the
    /// records become readable at the addresses they were laid out for.
    pub fn finish(self) -> EmitResult<Image> {
        if self.placement == Placement::InProcess {
            // SAFETY: the region [base, base + capacity) was reserved for
            // this builder alone and the buffer never exceeds the capacity.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.buffer.as_ptr(),
                    self.base as usize as *mut u8,
                    self.buffer.len(),
                );
            }
        }
        debug!(base = self.base, len = self.buffer.len(), placement = ?self.placement, "finished image");
        Ok(Image {
            base: self.base,
            width: self.width,
            bytes: self.buffer,
        })
    }
}

impl fmt::Debug for ImageBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuilder")
            .field("base", &format_args!("{:#x}", self.base))
            .field("width", &self.width)
            .field("placement", &self.placement)
            .field("len", &self.buffer.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::reader::IN_PROCESS;
    use crate::pointer::{MemoryReader, RelativeDirectPointer, RelativeIndirectablePointer};

    #[test]
    fn test_basic_emission_and_alignment() {
        let mut image = ImageBuilder::at(0x1000, PointerWidth::Eight, 64);
        image.emit_u8(1).unwrap();
        image.align_to(4).unwrap();
        assert_eq!(image.offset(), 4);
        image.emit_u32(0xAABB_CCDD).unwrap();
        let slot = image.emit_pointer_slot(0x1234).unwrap();
        assert_eq!(slot, 0x1008);
        assert_eq!(image.offset(), 16);
        assert_eq!(&image.buffer()[4..8], &0xAABB_CCDDu32.to_ne_bytes());
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut image = ImageBuilder::at(0, PointerWidth::Eight, 6);
        image.emit_u32(1).unwrap();
        assert_eq!(
            image.emit_u32(2),
            Err(EmitError::CapacityExceeded { needed: 8, capacity: 6 })
        );
        assert_eq!(image.offset(), 4);
    }

    #[test]
    fn test_words_follow_pointer_width() {
        let mut narrow = ImageBuilder::at(0x100, PointerWidth::Four, 64);
        narrow.emit_words(&[1, 2]).unwrap();
        assert_eq!(narrow.offset(), 8);
        assert_eq!(narrow.emit_word(0x1_0000_0000), Err(EmitError::PointerTooWide(0x1_0000_0000)));
    }

    #[test]
    fn test_relative_references() {
        let mut image = ImageBuilder::at(0x2000, PointerWidth::Eight, 64);
        let field = image.emit_relative(Some(0x1F00)).unwrap();
        let raw = i32::from_ne_bytes(image.buffer()[field..field + 4].try_into().unwrap());
        assert_eq!(raw, -0x100);

        let null = image.emit_relative(None).unwrap();
        assert_eq!(&image.buffer()[null..null + 4], &[0; 4]);

        image.patch_relative_indirect(null, 0x2010).unwrap();
        let raw = i32::from_ne_bytes(image.buffer()[null..null + 4].try_into().unwrap());
        assert_eq!(raw, 0x0C | 1);

        assert_eq!(
            image.patch_relative_tagged(null, 0x2011, 1, 4),
            Err(EmitError::Misaligned { target: 0x2011, align: 4 })
        );
        assert!(matches!(
            image.patch_relative(null, Some(0x2_0000_0000)),
            Err(EmitError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn test_patch_out_of_bounds() {
        let mut image = ImageBuilder::at(0, PointerWidth::Eight, 16);
        image.emit_u16(7).unwrap();
        assert_eq!(
            image.patch_u32(0, 1),
            Err(EmitError::OutOfBounds { offset: 0, size: 4 })
        );
        image.patch_u16(0, 9).unwrap();
        assert_eq!(&image.buffer()[..2], &9u16.to_ne_bytes());
    }

    #[test]
    fn test_in_process_image_is_readable() {
        let mut builder = ImageBuilder::in_process(128).unwrap();
        assert_eq!(builder.base() % ARENA_ALIGN, 0);
        let name = builder.emit_c_string("Swift").unwrap();
        let field = builder.emit_relative(Some(name)).unwrap();
        let slot = builder.emit_pointer_slot(name).unwrap();
        let indirect = builder.reserve(4, 4).unwrap();
        builder.patch_relative_indirect(indirect, slot).unwrap();
        let image = builder.finish().unwrap();
        assert!(image.contains(name, 6));

        let field = image.base() + field as u64;
        let resolved = IN_PROCESS
            .resolve_relative_required::<RelativeDirectPointer<false>>(field)
            .unwrap();
        assert_eq!(IN_PROCESS.read_c_string(resolved).unwrap(), "Swift");

        let through_slot = IN_PROCESS
            .resolve_relative_required::<RelativeIndirectablePointer<false>>(image.base() + indirect as u64)
            .unwrap();
        assert_eq!(through_slot, name);
    }

    #[test]
    fn test_arena_regions_do_not_overlap() {
        let a = ImageBuilder::in_process(40).unwrap();
        let b = ImageBuilder::in_process(8).unwrap();
        assert!(b.base() >= a.base() + 48 || a.base() >= b.base() + 16);
        assert!(matches!(
            ImageBuilder::in_process(ARENA_SIZE + 1),
            Err(EmitError::ArenaExhausted { .. })
        ));
    }
}
