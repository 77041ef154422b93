//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::sync::Once;
use tracing_subscriber::EnvFilter;
use typemeta_core::metadata::Metadata;
use typemeta_core::witness::ValueWitnessTable;
use typemeta_core::Address;

static LOGGING: Once = Once::new();

/// Route `tracing` output to the test harness, filtered by `RUST_LOG`
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Address of a value witness table, as stored in a metadata prefix word
pub fn witnesses_word(table: &'static ValueWitnessTable) -> u64 {
    table as *const ValueWitnessTable as usize as u64
}

/// Metadata at an address inside a finished in-process image
pub fn metadata_at(address: Address) -> &'static Metadata {
    // SAFETY: callers pass address points of records in finished images,
    // which stay mapped for the rest of the process.
    unsafe { Metadata::from_address(address) }
}
