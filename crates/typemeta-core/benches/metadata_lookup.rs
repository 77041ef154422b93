use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use typemeta_core::emit::{
    ConformanceRecord, ImageBuilder, ProtocolRecord, TypeRecord, TypeTarget, WitnessSource,
};
use typemeta_core::metadata::Metadata;
use typemeta_core::runtime::GenericMetadataPattern;
use typemeta_core::witness::builtin::{self, INT64_WITNESSES};
use typemeta_core::{MetadataKind, MetadataRuntime, RuntimeOptions};

fn pair_pattern() -> &'static GenericMetadataPattern {
    let template = vec![
        &INT64_WITNESSES as *const _ as usize,
        MetadataKind::Struct.raw() as usize,
        0,
        0,
        0,
    ];
    Box::leak(Box::new(
        GenericMetadataPattern::value(template, 1, 2)
            .with_fill(0, 2)
            .with_fill(1, 3),
    ))
}

fn bench_generic_instantiation(c: &mut Criterion) {
    let runtime = MetadataRuntime::new(RuntimeOptions::default());
    let pattern = pair_pattern();
    let arguments = [
        builtin::int8().address() as usize,
        builtin::int64().address() as usize,
    ];
    runtime.instantiate_generic_metadata(pattern, &arguments).unwrap();

    c.bench_function("generic_cache_hit", |b| {
        b.iter(|| {
            runtime
                .instantiate_generic_metadata(pattern, black_box(&arguments))
                .unwrap()
        });
    });
}

fn bench_structural(c: &mut Criterion) {
    let runtime = MetadataRuntime::new(RuntimeOptions::default());
    let mut group = c.benchmark_group("tuple_metadata");

    for width in [1usize, 4, 16] {
        let elements: Vec<&'static Metadata> = (0..width).map(|_| builtin::int32()).collect();
        runtime.tuple_metadata(&elements, None);
        group.bench_with_input(BenchmarkId::new("cached", width), &elements, |b, elements| {
            b.iter(|| runtime.tuple_metadata(black_box(elements), None));
        });
    }

    group.finish();
}

fn bench_conformance(c: &mut Criterion) {
    let mut image = ImageBuilder::in_process(16 * 1024).unwrap();
    let module = image.emit_module("Bench").unwrap();
    let protocol = image.emit_protocol(&ProtocolRecord::new("Hashable")).unwrap();
    let mut conformances = Vec::new();
    let mut last = 0;
    for i in 0..64 {
        let descriptor = image
            .emit_type(&TypeRecord::structure(&format!("T{i}")).with_parent(module))
            .unwrap();
        last = image
            .emit_metadata(
                &[&INT64_WITNESSES as *const _ as usize as u64],
                &[MetadataKind::Struct.raw() as u64, descriptor],
            )
            .unwrap();
        conformances.push(
            image
                .emit_conformance(&ConformanceRecord::new(
                    protocol,
                    TypeTarget::Descriptor(descriptor),
                    WitnessSource::Table(vec![]),
                ))
                .unwrap(),
        );
    }
    let section = image.emit_conformance_records(&conformances).unwrap();
    image.finish().unwrap();

    let runtime = MetadataRuntime::new(RuntimeOptions::default());
    unsafe {
        runtime
            .register_protocol_conformances(section.start, section.count)
            .unwrap();
    }
    // SAFETY: `last` is the address point of metadata in the finished image.
    let ty = unsafe { Metadata::from_address(last) };
    runtime.conforms_to_protocol(ty, protocol).unwrap();

    let mut group = c.benchmark_group("conformance");
    group.bench_function("cached_hit", |b| {
        b.iter(|| runtime.conforms_to_protocol(black_box(ty), protocol).unwrap());
    });
    group.bench_function("cached_miss", |b| {
        b.iter(|| {
            runtime
                .conforms_to_protocol(black_box(builtin::int16()), protocol)
                .unwrap()
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_generic_instantiation,
    bench_structural,
    bench_conformance
);
criterion_main!(benches);
