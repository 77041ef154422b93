//! The metadata runtime
//!
//! [`MetadataRuntime`] owns every cache and registry the runtime keeps:
//! generic instances, instantiated witness tables, structural metadata,
//! foreign types, registered sections and conformance results. All of them
//! are internally synchronized, so a single runtime is shared by reference
//! across threads. Published entries are never removed.
//!
//! Most programs use the process-wide [`MetadataRuntime::global`]; tests
//! and embedders that need isolation create their own.

pub(crate) mod alloc;
pub(crate) mod cache;
mod conformance;
mod foreign;
mod generic;
mod layout_init;
mod structural;

pub use conformance::AssociatedTypeAccessor;
pub use foreign::ForeignTypeInitializer;
pub use generic::{FillOp, GenericMetadataPattern, MetadataInitializer, PatternKind};
pub use layout_init::{perform_basic_layout, BasicLayout, HEAP_OBJECT_HEADER_SIZE};

use crate::config::{RuntimeCounters, RuntimeOptions, RuntimeStats};
use crate::pointer::Address;
use cache::ConcurrentCache;
use conformance::{CachedConformance, Registry};
use dashmap::DashMap;
use generic::GenericKey;
use once_cell::sync::OnceCell;
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::BuildHasherDefault;
use structural::StructuralKey;
use tracing::debug;

type FxBuildHasher = BuildHasherDefault<FxHasher>;

static GLOBAL: OnceCell<MetadataRuntime> = OnceCell::new();

/// Caches and registries of runtime type metadata
pub struct MetadataRuntime {
    options: RuntimeOptions,
    counters: RuntimeCounters,
    generic: ConcurrentCache<GenericKey>,
    witness_tables: ConcurrentCache<(Address, usize)>,
    structural: ConcurrentCache<StructuralKey>,
    foreign: ConcurrentCache<String>,
    registry: Registry,
    conformances: DashMap<(usize, Address), CachedConformance, FxBuildHasher>,
}

impl MetadataRuntime {
    /// Create an empty runtime
    pub fn new(options: RuntimeOptions) -> Self {
        let shards = options.shard_amount();
        debug!(?options, shards, "creating metadata runtime");
        Self {
            counters: RuntimeCounters::new(),
            generic: ConcurrentCache::new(shards),
            witness_tables: ConcurrentCache::new(shards),
            structural: ConcurrentCache::new(shards),
            foreign: ConcurrentCache::new(shards),
            registry: Registry::default(),
            conformances: DashMap::with_hasher_and_shard_amount(FxBuildHasher::default(), shards),
            options,
        }
    }

    /// The process-wide runtime, created with default options on first use
    pub fn global() -> &'static MetadataRuntime {
        GLOBAL.get_or_init(|| MetadataRuntime::new(RuntimeOptions::default()))
    }

    /// Install the process-wide runtime with specific options.
    ///
    /// Returns the options back if the global runtime already exists.
    pub fn init_global(options: RuntimeOptions) -> Result<&'static MetadataRuntime, RuntimeOptions> {
        let mut options = Some(options);
        let runtime = GLOBAL.get_or_init(|| {
            MetadataRuntime::new(options.take().unwrap_or_default())
        });
        match options {
            Some(rejected) => Err(rejected),
            None => Ok(runtime),
        }
    }

    /// Options the runtime was created with
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Snapshot of the usage counters
    pub fn stats(&self) -> RuntimeStats {
        self.counters.snapshot()
    }
}

impl Default for MetadataRuntime {
    fn default() -> Self {
        Self::new(RuntimeOptions::default())
    }
}

impl fmt::Debug for MetadataRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataRuntime")
            .field("options", &self.options)
            .field("generic_instances", &self.generic.len())
            .field("witness_tables", &self.witness_tables.len())
            .field("structural", &self.structural.len())
            .field("foreign", &self.foreign.len())
            .field("generation", &self.registration_generation())
            .finish()
    }
}
