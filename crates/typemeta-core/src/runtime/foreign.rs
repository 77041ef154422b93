//! Foreign type uniquing
//!
//! Every image that uses a foreign type carries its own copy of the
//! record. The first record registered under a name becomes canonical and
//! its initialization function runs before anyone else can observe it.
//! Each record's cache word then holds the canonical address.

use super::MetadataRuntime;
use crate::error::ReadResult;
use crate::metadata::{ForeignCacheValue, ForeignTypeHeader, Metadata, RawMetadata};
use crate::pointer::reader::IN_PROCESS;
use crate::pointer::Address;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Initialization function of a foreign type record
pub type ForeignTypeInitializer = unsafe extern "C" fn(*const Metadata);

impl MetadataRuntime {
    /// The canonical record for the foreign type `candidate` describes.
    ///
    /// # Safety
    ///
    /// `candidate` must be a foreign type record with its full header
    /// prefix, writable and valid for the rest of the process.
    pub unsafe fn get_foreign_type_metadata(
        &self,
        candidate: &'static Metadata,
    ) -> ReadResult<&'static Metadata> {
        let header = ForeignTypeHeader::new(RawMetadata::new(&IN_PROCESS, candidate.address()));
        let cache = &*(header.cache_address() as usize as *const AtomicUsize);
        if let ForeignCacheValue::Initialized { canonical } =
            ForeignCacheValue::from_raw(cache.load(Ordering::Acquire) as u64)
        {
            trace!(candidate = candidate.address(), canonical, "foreign type already uniqued");
            return Ok(Metadata::from_address(canonical));
        }

        let name = header.name()?;
        let initializer = header.initialization_function()?;
        let lookup = self.foreign.get_or_insert_with(name.clone(), || {
            if let Some(initializer) = initializer {
                let initializer: ForeignTypeInitializer =
                    std::mem::transmute(initializer as usize);
                initializer(candidate);
            }
            candidate.address() as usize
        });
        if lookup.created {
            self.counters.record_miss();
            debug!(name = %name, canonical = lookup.value, "uniqued foreign type");
        } else {
            self.counters.record_hit();
        }

        cache.store(lookup.value, Ordering::Release);
        Ok(Metadata::from_address(lookup.value as Address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{ForeignTypeFlags, MetadataKind};
    use crate::config::RuntimeOptions;
    use crate::witness::builtin::INT64_WITNESSES;
    use std::sync::atomic::AtomicU32;

    /// Header prefix, value witnesses and kind, followed by the name
    #[repr(C, align(8))]
    struct ForeignRecord {
        initializer: i32,
        name: i32,
        cache: usize,
        witnesses: usize,
        kind: usize,
        text: [u8; 8],
    }

    static INITIALIZED: AtomicU32 = AtomicU32::new(0);

    unsafe extern "C" fn count_initialization(_metadata: *const Metadata) {
        INITIALIZED.fetch_add(1, Ordering::SeqCst);
    }

    const fn blank() -> ForeignRecord {
        ForeignRecord {
            initializer: 0,
            name: 0,
            cache: ForeignTypeFlags::HAS_INITIALIZATION_FUNCTION.bits(),
            witnesses: 0,
            kind: 0,
            text: *b"CFThing\0",
        }
    }

    // In the binary's data segment so relative offsets to code fit in 32 bits.
    static mut RECORDS: [ForeignRecord; 2] = [blank(), blank()];

    unsafe fn record(index: usize) -> &'static Metadata {
        let record = std::ptr::addr_of_mut!(RECORDS[index]);
        (*record).witnesses = &INT64_WITNESSES as *const _ as usize;
        (*record).kind = MetadataKind::ForeignClass.raw() as usize;
        let name_field = std::ptr::addr_of!((*record).name) as i64;
        (*record).name = (std::ptr::addr_of!((*record).text) as i64 - name_field) as i32;
        let field = std::ptr::addr_of!((*record).initializer) as i64;
        (*record).initializer = (count_initialization as usize as i64 - field) as i32;
        Metadata::from_address(std::ptr::addr_of!((*record).kind) as Address)
    }

    #[test]
    fn test_first_record_wins_and_initializes_once() {
        let runtime = MetadataRuntime::new(RuntimeOptions::default());
        let (first, second) = unsafe { (record(0), record(1)) };
        let before = INITIALIZED.load(Ordering::SeqCst);

        let canonical = unsafe { runtime.get_foreign_type_metadata(first) }.unwrap();
        assert!(std::ptr::eq(canonical, first));
        let again = unsafe { runtime.get_foreign_type_metadata(second) }.unwrap();
        assert!(std::ptr::eq(again, first));
        assert_eq!(INITIALIZED.load(Ordering::SeqCst) - before, 1);

        let header = ForeignTypeHeader::new(RawMetadata::new(&IN_PROCESS, second.address()));
        assert_eq!(
            header.cache().unwrap(),
            ForeignCacheValue::Initialized {
                canonical: first.address()
            }
        );
    }
}
