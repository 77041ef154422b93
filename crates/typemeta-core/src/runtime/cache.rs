//! Insert-if-absent cache of published pointers
//!
//! Each key maps to a shared once-cell. The map's shard lock is only held
//! long enough to find or create the cell, so building an entry never blocks
//! unrelated keys, while a second caller for the same key waits on the cell
//! until the first one publishes. Entries are never removed.

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rustc_hash::FxHasher;
use std::hash::{BuildHasherDefault, Hash};
use std::sync::Arc;

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Concurrent map from a key to a pointer published exactly once
pub(crate) struct ConcurrentCache<K> {
    entries: DashMap<K, Arc<OnceCell<usize>>, FxBuildHasher>,
}

/// Result of a cache lookup that may have built the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lookup {
    /// The published pointer
    pub value: usize,
    /// This call built the entry
    pub created: bool,
}

impl<K: Eq + Hash> ConcurrentCache<K> {
    pub(crate) fn new(shard_amount: usize) -> Self {
        Self {
            entries: DashMap::with_hasher_and_shard_amount(FxBuildHasher::default(), shard_amount),
        }
    }

    fn cell(&self, key: K) -> Arc<OnceCell<usize>> {
        if let Some(cell) = self.entries.get(&key) {
            return Arc::clone(cell.value());
        }
        Arc::clone(self.entries.entry(key).or_default().value())
    }

    /// The published pointer for `key`, if any
    pub(crate) fn get(&self, key: &K) -> Option<usize> {
        self.entries.get(key).and_then(|cell| cell.get().copied())
    }

    /// The pointer for `key`, building it with `init` if nobody has.
    ///
    /// Concurrent callers with the same key block until the builder
    /// publishes, then all observe the same pointer.
    pub(crate) fn get_or_insert_with(&self, key: K, init: impl FnOnce() -> usize) -> Lookup {
        let cell = self.cell(key);
        if let Some(&value) = cell.get() {
            return Lookup { value, created: false };
        }
        let mut created = false;
        let value = *cell.get_or_init(|| {
            created = true;
            init()
        });
        Lookup { value, created }
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with) for a fallible
    /// builder. A failed build publishes nothing.
    pub(crate) fn get_or_try_insert_with<E>(
        &self,
        key: K,
        init: impl FnOnce() -> Result<usize, E>,
    ) -> Result<Lookup, E> {
        let cell = self.cell(key);
        if let Some(&value) = cell.get() {
            return Ok(Lookup { value, created: false });
        }
        let mut created = false;
        let value = *cell.get_or_try_init(|| {
            created = true;
            init()
        })?;
        Ok(Lookup { value, created })
    }

    /// Number of keys, including entries still being built
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn test_insert_once() {
        let cache = ConcurrentCache::<u32>::new(4);
        assert_eq!(cache.get(&1), None);
        let first = cache.get_or_insert_with(1, || 0x100);
        assert_eq!(first, Lookup { value: 0x100, created: true });
        let second = cache.get_or_insert_with(1, || 0x200);
        assert_eq!(second, Lookup { value: 0x100, created: false });
        assert_eq!(cache.get(&1), Some(0x100));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_build_publishes_nothing() {
        let cache = ConcurrentCache::<u32>::new(4);
        let failed: Result<Lookup, &str> = cache.get_or_try_insert_with(7, || Err("nope"));
        assert!(failed.is_err());
        assert_eq!(cache.get(&7), None);
        let retried: Result<Lookup, &str> = cache.get_or_try_insert_with(7, || Ok(0x700));
        assert_eq!(retried.unwrap().value, 0x700);
    }

    #[test]
    fn test_concurrent_builders_run_once() {
        let cache = ConcurrentCache::<u32>::new(4);
        let builds = AtomicUsize::new(0);
        let barrier = Barrier::new(8);
        let values: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        cache
                            .get_or_insert_with(42, || {
                                builds.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(std::time::Duration::from_millis(5));
                                0x4200
                            })
                            .value
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(values.iter().all(|&v| v == 0x4200));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}
