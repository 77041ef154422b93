//! Runtime configuration and statistics
//!
//! [`RuntimeOptions`] is fixed when a [`MetadataRuntime`](crate::runtime::MetadataRuntime)
//! is created. [`RuntimeCounters`] is updated concurrently by every cache and
//! read back as a [`RuntimeStats`] snapshot.

use crate::metadata::Metadata;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Resolves a mangled type name appearing in a same-type or base-class
/// requirement.
///
/// Receives the name and the generic arguments of the type whose
/// conformance is being checked.
pub type TypeNameResolver =
    Arc<dyn Fn(&str, &[&'static Metadata]) -> Option<&'static Metadata> + Send + Sync>;

/// Options for a metadata runtime
#[derive(Clone)]
pub struct RuntimeOptions {
    /// Shard count of every concurrent cache (rounded up to a power of two, at least 2)
    pub cache_shards: usize,

    /// Remember failed conformance lookups until the next registration
    pub cache_negative_conformances: bool,

    /// Check record invariants when sections are registered
    pub verify_records: bool,

    /// Resolver for names in same-type and base-class requirements
    pub name_resolver: Option<TypeNameResolver>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            cache_shards: default_shard_count(),
            cache_negative_conformances: true,
            verify_records: cfg!(debug_assertions),
            name_resolver: None,
        }
    }
}

impl RuntimeOptions {
    /// Options with a specific shard count
    pub fn with_cache_shards(cache_shards: usize) -> Self {
        Self {
            cache_shards,
            ..Default::default()
        }
    }

    /// Options with a name resolver installed
    pub fn with_name_resolver(resolver: TypeNameResolver) -> Self {
        Self {
            name_resolver: Some(resolver),
            ..Default::default()
        }
    }

    /// Disable negative conformance caching
    pub fn without_negative_cache(mut self) -> Self {
        self.cache_negative_conformances = false;
        self
    }

    /// Enable or disable record verification at registration
    pub fn verify(mut self, on: bool) -> Self {
        self.verify_records = on;
        self
    }

    /// Shard count normalized for the concurrent map
    pub(crate) fn shard_amount(&self) -> usize {
        self.cache_shards.max(2).next_power_of_two()
    }
}

impl fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOptions")
            .field("cache_shards", &self.cache_shards)
            .field("cache_negative_conformances", &self.cache_negative_conformances)
            .field("verify_records", &self.verify_records)
            .field("has_name_resolver", &self.name_resolver.is_some())
            .finish()
    }
}

fn default_shard_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (cpus * 4).next_power_of_two()
}

/// Usage counters shared by the runtime's caches
#[derive(Debug, Default)]
pub struct RuntimeCounters {
    instantiations: AtomicU64,
    bytes_allocated: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    conformance_lookups: AtomicU64,
    conformance_negative_hits: AtomicU64,
    witness_tables_instantiated: AtomicU64,
    records_rejected: AtomicU64,
}

impl RuntimeCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_instantiation(&self, bytes: usize) {
        self.instantiations.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conformance_lookup(&self) {
        self.conformance_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_negative_hit(&self) {
        self.conformance_negative_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_witness_table(&self, bytes: usize) {
        self.witness_tables_instantiated.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of every counter
    pub fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            instantiations: self.instantiations.load(Ordering::Relaxed),
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            conformance_lookups: self.conformance_lookups.load(Ordering::Relaxed),
            conformance_negative_hits: self.conformance_negative_hits.load(Ordering::Relaxed),
            witness_tables_instantiated: self.witness_tables_instantiated.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RuntimeCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeStats {
    /// Metadata records built by any cache
    pub instantiations: u64,
    /// Bytes of metadata and witness tables allocated
    pub bytes_allocated: u64,
    /// Lookups answered by a published entry
    pub cache_hits: u64,
    /// Lookups that had to instantiate or wait for an instantiation
    pub cache_misses: u64,
    /// Calls to conformance lookup
    pub conformance_lookups: u64,
    /// Conformance lookups answered by a cached failure
    pub conformance_negative_hits: u64,
    /// Generic witness tables instantiated
    pub witness_tables_instantiated: u64,
    /// Records refused by registration verification
    pub records_rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = RuntimeOptions::default();
        assert!(options.cache_negative_conformances);
        assert!(options.name_resolver.is_none());
        assert!(options.shard_amount().is_power_of_two());
    }

    #[test]
    fn test_shard_amount_normalized() {
        assert_eq!(RuntimeOptions::with_cache_shards(0).shard_amount(), 2);
        assert_eq!(RuntimeOptions::with_cache_shards(5).shard_amount(), 8);
        assert_eq!(RuntimeOptions::with_cache_shards(16).shard_amount(), 16);
    }

    #[test]
    fn test_builder_methods() {
        let options = RuntimeOptions::default().without_negative_cache().verify(true);
        assert!(!options.cache_negative_conformances);
        assert!(options.verify_records);

        let resolver: TypeNameResolver = Arc::new(|_, _| None);
        let options = RuntimeOptions::with_name_resolver(resolver);
        assert!(format!("{:?}", options).contains("has_name_resolver: true"));
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = RuntimeCounters::new();
        counters.record_instantiation(64);
        counters.record_instantiation(32);
        counters.record_hit();
        counters.record_miss();
        counters.record_conformance_lookup();
        counters.record_negative_hit();
        counters.record_witness_table(16);

        let stats = counters.snapshot();
        assert_eq!(stats.instantiations, 2);
        assert_eq!(stats.bytes_allocated, 112);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.conformance_lookups, 1);
        assert_eq!(stats.conformance_negative_hits, 1);
        assert_eq!(stats.witness_tables_instantiated, 1);
        assert_eq!(stats.records_rejected, 0);
    }
}
