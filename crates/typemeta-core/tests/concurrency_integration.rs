//! Many threads racing to build the same metadata

mod common;

use common::init_test_logging;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;
use typemeta_core::metadata::Metadata;
use typemeta_core::runtime::GenericMetadataPattern;
use typemeta_core::witness::builtin::{self, INT64_WITNESSES};
use typemeta_core::{MetadataKind, MetadataRuntime, RuntimeOptions};

const THREADS: usize = 8;
const ROUNDS: usize = 50;

static INITIALIZER_RUNS: AtomicUsize = AtomicUsize::new(0);

fn count_initialization(_: &MetadataRuntime, _: &'static Metadata, _: &[usize]) {
    INITIALIZER_RUNS.fetch_add(1, Ordering::SeqCst);
    thread::yield_now();
}

fn pattern() -> &'static GenericMetadataPattern {
    let template = vec![
        &INT64_WITNESSES as *const _ as usize,
        MetadataKind::Struct.raw() as usize,
        0,
        0,
    ];
    Box::leak(Box::new(
        GenericMetadataPattern::value(template, 1, 1)
            .with_fill(0, 2)
            .with_initializer(count_initialization),
    ))
}

#[test]
fn test_concurrent_instantiation_is_unique() {
    init_test_logging();
    let runtime = MetadataRuntime::new(RuntimeOptions::with_cache_shards(4));
    let pattern = pattern();
    let arguments = [
        builtin::int8().address() as usize,
        builtin::int16().address() as usize,
        builtin::int32().address() as usize,
    ];
    let barrier = Barrier::new(THREADS);

    let results: Vec<Vec<usize>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    let mut seen = Vec::with_capacity(ROUNDS * arguments.len());
                    for round in 0..ROUNDS {
                        let argument = arguments[round % arguments.len()];
                        let metadata = runtime
                            .instantiate_generic_metadata(pattern, &[argument])
                            .unwrap();
                        seen.push(metadata.address() as usize);
                    }
                    seen
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    for seen in &results[1..] {
        assert_eq!(seen, &results[0]);
    }
    assert_eq!(runtime.generic_cache_len(), arguments.len());
    assert_eq!(INITIALIZER_RUNS.load(Ordering::SeqCst), arguments.len());

    let stats = runtime.stats();
    assert_eq!(stats.cache_hits + stats.cache_misses, (THREADS * ROUNDS) as u64);
    assert!(stats.cache_misses >= arguments.len() as u64);
}

#[test]
fn test_concurrent_structural_metadata_is_unique() {
    init_test_logging();
    let runtime = MetadataRuntime::new(RuntimeOptions::default());
    let barrier = Barrier::new(THREADS);

    let tuples: Vec<(usize, usize)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    let pair = runtime.tuple_metadata(&[builtin::int64(), builtin::int8()], None);
                    let metatype = runtime.metatype_metadata(pair);
                    (pair.address() as usize, metatype.address() as usize)
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert!(tuples.iter().all(|entry| *entry == tuples[0]));
    let pair = runtime.tuple_metadata(&[builtin::int64(), builtin::int8()], None);
    assert_eq!(pair.address() as usize, tuples[0].0);
    assert_eq!((pair.vw_size(), pair.vw_stride()), (9, 16));
}
