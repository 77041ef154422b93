//! Registering sections built in-process and looking records up by name

mod common;

use common::{init_test_logging, metadata_at, witnesses_word};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use typemeta_core::emit::{
    ConformanceRecord, ImageBuilder, ProtocolRecord, TypeRecord, TypeTarget, WitnessSource,
};
use typemeta_core::metadata::Metadata;
use typemeta_core::witness::builtin::{self, INT64_WITNESSES};
use typemeta_core::{MetadataKind, MetadataRuntime, RuntimeOptions};

static ANIMAL_METADATA: AtomicU64 = AtomicU64::new(0);

unsafe extern "C" fn animal_access() -> *const Metadata {
    ANIMAL_METADATA.load(Ordering::Acquire) as usize as *const Metadata
}

struct Zoo {
    protocols: (u64, usize),
    conformances: (u64, usize),
    types: (u64, usize),
    named: u64,
    animal: u64,
    animal_descriptor: u64,
    conformance: u64,
}

static ZOO: Lazy<Zoo> = Lazy::new(build_zoo);

fn build_zoo() -> Zoo {
    let mut image = ImageBuilder::in_process(4096).unwrap();
    let module = image.emit_module("Zoo").unwrap();
    let animal_descriptor = image
        .emit_type(
            &TypeRecord::structure("Animal")
                .with_parent(module)
                .with_access_function(animal_access as usize as u64),
        )
        .unwrap();
    let named = image.emit_protocol(&ProtocolRecord::new("Named")).unwrap();
    let animal = image
        .emit_metadata(
            &[witnesses_word(&INT64_WITNESSES)],
            &[MetadataKind::Struct.raw() as u64, animal_descriptor],
        )
        .unwrap();
    let conformance = image
        .emit_conformance(&ConformanceRecord::new(
            named,
            TypeTarget::Descriptor(animal_descriptor),
            WitnessSource::Table(vec![0x1234]),
        ))
        .unwrap();
    let protocols = image.emit_protocol_records(&[named]).unwrap();
    let conformances = image.emit_conformance_records(&[conformance]).unwrap();
    let types = image
        .emit_type_metadata_records(&[TypeTarget::Descriptor(animal_descriptor)])
        .unwrap();
    image.finish().unwrap();
    ANIMAL_METADATA.store(animal, Ordering::Release);

    Zoo {
        protocols: (protocols.start, protocols.count),
        conformances: (conformances.start, conformances.count),
        types: (types.start, types.count),
        named,
        animal,
        animal_descriptor,
        conformance,
    }
}

fn register(runtime: &MetadataRuntime, zoo: &Zoo) {
    unsafe {
        assert_eq!(runtime.register_protocols(zoo.protocols.0, zoo.protocols.1).unwrap(), 1);
        assert_eq!(
            runtime
                .register_protocol_conformances(zoo.conformances.0, zoo.conformances.1)
                .unwrap(),
            1
        );
        assert_eq!(
            runtime
                .register_type_metadata_records(zoo.types.0, zoo.types.1)
                .unwrap(),
            1
        );
    }
}

#[test]
fn test_lookup_by_name() {
    init_test_logging();
    let zoo = &*ZOO;
    let runtime = MetadataRuntime::new(RuntimeOptions::default());
    register(&runtime, zoo);

    assert_eq!(runtime.registration_generation(), 3);
    assert_eq!(runtime.protocol_by_name("Named"), Some(zoo.named));
    assert_eq!(runtime.protocol_by_name("Unnamed"), None);
    assert_eq!(runtime.descriptor_by_name("Zoo.Animal"), Some(zoo.animal_descriptor));
    assert_eq!(runtime.descriptor_by_name("Animal"), None);

    let animal = runtime.metadata_for_name("Zoo.Animal").unwrap().unwrap();
    assert_eq!(animal.address(), zoo.animal);
    assert_eq!(animal.kind(), MetadataKind::Struct);
    assert_eq!(
        animal.type_context_descriptor().unwrap().qualified_name().unwrap(),
        "Zoo.Animal"
    );
    assert!(runtime.metadata_for_name("Zoo.Plant").unwrap().is_none());
}

#[test]
fn test_static_conformance_lookup() {
    init_test_logging();
    let zoo = &*ZOO;
    let runtime = MetadataRuntime::new(RuntimeOptions::default());
    register(&runtime, zoo);

    let animal = metadata_at(zoo.animal);
    let table = runtime.conforms_to_protocol(animal, zoo.named).unwrap().unwrap();
    assert_eq!(table.conformance_address(), zoo.conformance);
    assert_eq!(unsafe { table.word(1) }, 0x1234);

    let again = runtime.conforms_to_protocol(animal, zoo.named).unwrap().unwrap();
    assert!(std::ptr::eq(table, again));

    assert!(runtime
        .conforms_to_protocol(builtin::int64(), zoo.named)
        .unwrap()
        .is_none());
    assert!(runtime
        .conforms_to_protocol(builtin::int64(), zoo.named)
        .unwrap()
        .is_none());

    let stats = runtime.stats();
    assert_eq!(stats.conformance_lookups, 4);
    assert_eq!(stats.conformance_negative_hits, 1);
}

#[test]
fn test_registration_invalidates_failed_lookups() {
    init_test_logging();
    let zoo = &*ZOO;
    let runtime = MetadataRuntime::new(RuntimeOptions::default());
    unsafe {
        runtime.register_protocols(zoo.protocols.0, zoo.protocols.1).unwrap();
    }
    let animal = metadata_at(zoo.animal);
    assert!(runtime.conforms_to_protocol(animal, zoo.named).unwrap().is_none());

    unsafe {
        runtime
            .register_protocol_conformances(zoo.conformances.0, zoo.conformances.1)
            .unwrap();
    }
    let table = runtime.conforms_to_protocol(animal, zoo.named).unwrap();
    assert_eq!(table.map(|t| t.conformance_address()), Some(zoo.conformance));
}

#[test]
fn test_verification_rejects_records_without_witnesses() {
    init_test_logging();
    let mut image = ImageBuilder::in_process(1024).unwrap();
    let module = image.emit_module("Broken").unwrap();
    let descriptor = image
        .emit_type(&TypeRecord::structure("Thing").with_parent(module))
        .unwrap();
    let protocol = image.emit_protocol(&ProtocolRecord::new("Useful")).unwrap();
    let good = image
        .emit_conformance(&ConformanceRecord::new(
            protocol,
            TypeTarget::Descriptor(descriptor),
            WitnessSource::Table(vec![]),
        ))
        .unwrap();
    let missing_accessor = image
        .emit_conformance(&ConformanceRecord::new(
            protocol,
            TypeTarget::Descriptor(descriptor),
            WitnessSource::Accessor(animal_access as usize as u64),
        ))
        .unwrap();
    let witness_field = image.offset_of(missing_accessor).unwrap() + 8;
    image.patch_relative(witness_field, None).unwrap();
    let section = image.emit_conformance_records(&[good, missing_accessor]).unwrap();
    image.finish().unwrap();

    let runtime = MetadataRuntime::new(RuntimeOptions::default());
    let added = unsafe {
        runtime
            .register_protocol_conformances(section.start, section.count)
            .unwrap()
    };
    assert_eq!(added, 1);
    assert_eq!(runtime.stats().records_rejected, 1);
}
