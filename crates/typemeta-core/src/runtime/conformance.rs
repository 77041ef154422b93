//! Protocol conformance lookup
//!
//! Conformance records are registered a section at a time and never
//! removed. A lookup for (type, protocol) scans the records naming the
//! protocol, trying the type and then each of its superclasses, and asks
//! the first match for a witness table. Results are cached per
//! (type, protocol). A failed lookup is cached together with the
//! registration generation it was made in, so registering more records
//! makes it stale.

use super::alloc::allocate_words;
use super::MetadataRuntime;
use crate::abi::{
    ConformanceKind, GenericRequirementLayoutKind, MetadataKind, ProtocolDescriptorFlags,
    WITNESS_TABLE_FIRST_REQUIREMENT_OFFSET,
};
use crate::descriptor::{
    read_conformance_records, read_protocol_records, read_type_metadata_records,
    ConformanceDescriptor, GenericParamRef, GenericWitnessTable, ProtocolDescriptor,
    RequirementContent, TypeContextDescriptor, TypeReference, WitnessTable, WitnessTableAccessor,
    WitnessTableInstantiator,
};
use crate::error::{ReadError, ReadResult};
use crate::metadata::{ClassMetadata, Metadata, MetadataView, RawMetadata};
use crate::pointer::reader::IN_PROCESS;
use crate::pointer::{Address, InProcessReader};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::ffi::c_void;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

const WORD: usize = size_of::<usize>();

/// Associated type witness: the conforming type and its witness table in,
/// the associated type out
pub type AssociatedTypeAccessor =
    unsafe extern "C" fn(*const Metadata, *const WitnessTable) -> *const Metadata;

/// Deepest superclass chain followed during a lookup
const MAX_SUPERCLASS_DEPTH: usize = 256;

/// Sections registered with a runtime
#[derive(Default)]
pub(crate) struct Registry {
    protocols: RwLock<Vec<Address>>,
    /// Conformance records by protocol descriptor
    conformances: RwLock<FxHashMap<Address, Vec<Address>>>,
    types: RwLock<Vec<TypeReference>>,
    generation: AtomicU64,
}

impl Registry {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// Cached outcome of a conformance lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CachedConformance {
    Found(usize),
    Missing { generation: u64 },
}

/// Check the fields a lookup relies on
fn verify_conformance(record: &ConformanceDescriptor<'_, InProcessReader>) -> ReadResult<()> {
    if let ConformanceKind::Unknown(_) = record.kind()? {
        return Err(ReadError::Malformed {
            address: record.address(),
            reason: "unknown conformance kind",
        });
    }
    record.protocol()?;
    record.type_reference()?;
    if record.witness_table_or_accessor()?.is_none() {
        return Err(ReadError::Malformed {
            address: record.address(),
            reason: "conformance has no witness table or accessor",
        });
    }
    Ok(())
}

/// The type and its superclasses, most derived first
fn type_and_superclasses(ty: &'static Metadata) -> ReadResult<Vec<&'static Metadata>> {
    let mut chain = vec![ty];
    let mut current = ty;
    while current.kind() == MetadataKind::Class {
        let view = ClassMetadata::new(RawMetadata::new(&IN_PROCESS, current.address()));
        if !view.is_type_metadata()? {
            break;
        }
        let Some(superclass) = view.superclass()? else {
            break;
        };
        if chain.len() >= MAX_SUPERCLASS_DEPTH {
            return Err(ReadError::Malformed {
                address: ty.address(),
                reason: "superclass chain does not terminate",
            });
        }
        // SAFETY: superclass words of live class metadata point at metadata.
        current = unsafe { Metadata::from_address(superclass) };
        chain.push(current);
    }
    Ok(chain)
}

/// The class object a foreign class reference would name for `ty`
fn class_object(ty: &'static Metadata) -> ReadResult<Option<Address>> {
    Ok(match ty.view() {
        MetadataView::Class(_) => Some(ty.address()),
        MetadataView::ObjCClassWrapper(wrapper) => Some(wrapper.class()?),
        _ => None,
    })
}

fn matches_type(reference: TypeReference, ty: &'static Metadata) -> ReadResult<bool> {
    Ok(match reference {
        TypeReference::Descriptor(descriptor) => ty
            .type_context_descriptor()
            .is_some_and(|d| d.address() == descriptor),
        TypeReference::ObjCClass(class) => class_object(ty)? == Some(class),
    })
}

impl MetadataRuntime {
    /// Register a section of protocol records.
    ///
    /// Returns the number of protocols added.
    ///
    /// # Safety
    ///
    /// `start` must point at `count` protocol records that, like everything
    /// they reference, stay valid for the rest of the process.
    pub unsafe fn register_protocols(&self, start: Address, count: usize) -> ReadResult<usize> {
        let protocols = read_protocol_records(&IN_PROCESS, start, count)?;
        let added = protocols.len();
        self.registry.protocols.write().extend(protocols);
        self.registry.bump();
        debug!(section = start, added, "registered protocol records");
        Ok(added)
    }

    /// Register a section of conformance records.
    ///
    /// With record verification on, records with an unknown conformance
    /// kind, a reserved type reference kind or no witness table are logged
    /// and skipped. Returns the number of conformances added.
    ///
    /// # Safety
    ///
    /// `start` must point at `count` conformance records that, like
    /// everything they reference, stay valid for the rest of the process.
    pub unsafe fn register_protocol_conformances(
        &self,
        start: Address,
        count: usize,
    ) -> ReadResult<usize> {
        let mut accepted = Vec::with_capacity(count);
        for record in read_conformance_records(&IN_PROCESS, start, count)? {
            let descriptor = ConformanceDescriptor::new(&IN_PROCESS, record);
            if self.options.verify_records {
                if let Err(error) = verify_conformance(&descriptor) {
                    warn!(record, %error, "rejected conformance record");
                    self.counters.record_rejected();
                    continue;
                }
            }
            match descriptor.protocol() {
                Ok(protocol) => accepted.push((protocol, record)),
                // Never matches a lookup.
                Err(error) => trace!(record, %error, "conformance record without a protocol"),
            }
        }
        let added = accepted.len();
        {
            let mut index = self.registry.conformances.write();
            for (protocol, record) in accepted {
                index.entry(protocol).or_default().push(record);
            }
        }
        self.registry.bump();
        debug!(section = start, added, "registered conformance records");
        Ok(added)
    }

    /// Register a section of type metadata records.
    ///
    /// Returns the number of types added.
    ///
    /// # Safety
    ///
    /// `start` must point at `count` type metadata records that, like
    /// everything they reference, stay valid for the rest of the process.
    pub unsafe fn register_type_metadata_records(
        &self,
        start: Address,
        count: usize,
    ) -> ReadResult<usize> {
        let types = read_type_metadata_records(&IN_PROCESS, start, count)?;
        let added = types.len();
        self.registry.types.write().extend(types);
        self.registry.bump();
        debug!(section = start, added, "registered type metadata records");
        Ok(added)
    }

    /// Incremented by every registration
    pub fn registration_generation(&self) -> u64 {
        self.registry.generation()
    }

    /// A registered protocol with the given name
    pub fn protocol_by_name(&self, name: &str) -> Option<Address> {
        let protocols = self.registry.protocols.read();
        protocols.iter().copied().find(|&protocol| {
            ProtocolDescriptor::new(&IN_PROCESS, protocol)
                .name()
                .is_ok_and(|candidate| candidate == name)
        })
    }

    /// A registered nominal type descriptor with the given qualified name,
    /// e.g. `Module.Outer.Inner`
    pub fn descriptor_by_name(&self, qualified_name: &str) -> Option<Address> {
        let types = self.registry.types.read();
        types.iter().find_map(|&reference| match reference {
            TypeReference::Descriptor(descriptor) => TypeContextDescriptor::new(&IN_PROCESS, descriptor)
                .qualified_name()
                .is_ok_and(|candidate| candidate == qualified_name)
                .then_some(descriptor),
            TypeReference::ObjCClass(_) => None,
        })
    }

    /// Metadata of the non-generic registered type with the given qualified name
    pub fn metadata_for_name(&self, qualified_name: &str) -> ReadResult<Option<&'static Metadata>> {
        let Some(descriptor) = self.descriptor_by_name(qualified_name) else {
            return Ok(None);
        };
        TypeContextDescriptor::new(&IN_PROCESS, descriptor).call_access_function()
    }

    /// The witness table by which `ty` conforms to `protocol`, if it does.
    ///
    /// Classes also find conformances declared on their superclasses.
    pub fn conforms_to_protocol(
        &self,
        ty: &'static Metadata,
        protocol: Address,
    ) -> ReadResult<Option<&'static WitnessTable>> {
        self.counters.record_conformance_lookup();
        let key = (ty.address() as usize, protocol);
        let generation = self.registry.generation();
        if let Some(cached) = self.conformances.get(&key).map(|entry| *entry) {
            match cached {
                CachedConformance::Found(table) => {
                    trace!(ty = ty.address(), protocol, "conformance cache hit");
                    // SAFETY: only witness tables are cached.
                    return Ok(Some(unsafe { WitnessTable::from_address(table as Address) }));
                }
                CachedConformance::Missing { generation: seen }
                    if seen == generation && self.options.cache_negative_conformances =>
                {
                    self.counters.record_negative_hit();
                    return Ok(None);
                }
                CachedConformance::Missing { .. } => {}
            }
        }

        // Accessors may look conformances up themselves, so the index lock
        // is released before any of them runs.
        let records: Vec<ConformanceDescriptor<'static, InProcessReader>> = self
            .registry
            .conformances
            .read()
            .get(&protocol)
            .map(|records| {
                records
                    .iter()
                    .map(|&record| ConformanceDescriptor::new(&IN_PROCESS, record))
                    .collect()
            })
            .unwrap_or_default();

        for candidate in type_and_superclasses(ty)? {
            for record in &records {
                let Some(reference) = record.type_reference()? else {
                    continue;
                };
                if !matches_type(reference, candidate)? {
                    continue;
                }
                let Some(table) = self.witness_table_for(record, candidate)? else {
                    continue;
                };
                debug!(
                    ty = ty.address(),
                    protocol,
                    conformance = record.address(),
                    table = table.address(),
                    "resolved conformance"
                );
                self.conformances
                    .insert(key, CachedConformance::Found(table.address() as usize));
                return Ok(Some(table));
            }
        }

        debug!(ty = ty.address(), protocol, "no conformance");
        self.conformances
            .insert(key, CachedConformance::Missing { generation });
        Ok(None)
    }

    /// Produce the witness table a conformance record provides for `ty`
    fn witness_table_for(
        &self,
        record: &ConformanceDescriptor<'static, InProcessReader>,
        ty: &'static Metadata,
    ) -> ReadResult<Option<&'static WitnessTable>> {
        let Some(target) = record.witness_table_or_accessor()? else {
            return Ok(None);
        };
        let table = match record.kind()? {
            // SAFETY: the record says the target is a static witness table.
            ConformanceKind::WitnessTable => unsafe { WitnessTable::from_address(target) },
            ConformanceKind::WitnessTableAccessor => {
                // SAFETY: the record says the target is a witness table accessor.
                let table = unsafe {
                    let accessor: WitnessTableAccessor = std::mem::transmute(target as usize);
                    accessor(ty, std::ptr::null(), 0)
                };
                if table.is_null() {
                    return Ok(None);
                }
                // SAFETY: accessors return permanent witness tables.
                unsafe { &*table }
            }
            ConformanceKind::ConditionalWitnessTableAccessor => {
                let Some(arguments) = self.conditional_arguments(record, ty)? else {
                    return Ok(None);
                };
                // SAFETY: as above, with the conditional tables attached.
                let table = unsafe {
                    let accessor: WitnessTableAccessor = std::mem::transmute(target as usize);
                    accessor(ty, arguments.as_ptr(), arguments.len())
                };
                if table.is_null() {
                    return Ok(None);
                }
                // SAFETY: accessors return permanent witness tables.
                unsafe { &*table }
            }
            ConformanceKind::Unknown(_) => return Ok(None),
        };
        Ok(Some(table))
    }

    /// Check the record's conditional requirements against `ty`'s generic
    /// arguments and collect the witness tables they produce. `None` when a
    /// requirement does not hold.
    fn conditional_arguments(
        &self,
        record: &ConformanceDescriptor<'static, InProcessReader>,
        ty: &'static Metadata,
    ) -> ReadResult<Option<Vec<*const WitnessTable>>> {
        let arguments = ty.generic_arguments()?.unwrap_or_default();
        let mut tables = Vec::new();
        for requirement in record.conditional_requirements()? {
            let Some(subject) = self.resolve_param(&requirement.param()?, &arguments)? else {
                return Ok(None);
            };
            let flags = requirement.flags()?;
            let holds = match requirement.content()? {
                RequirementContent::Protocol(protocol) => {
                    match self.conforms_to_protocol(subject, protocol)? {
                        Some(table) => {
                            if flags.has_key_argument() {
                                tables.push(table as *const WitnessTable);
                            }
                            true
                        }
                        None => false,
                    }
                }
                RequirementContent::SameType(name) => self
                    .resolve_name(&name, &arguments)
                    .is_some_and(|expected| std::ptr::eq(expected, subject)),
                RequirementContent::BaseClass(name) => match self.resolve_name(&name, &arguments) {
                    Some(base) => type_and_superclasses(subject)?
                        .into_iter()
                        .any(|class| std::ptr::eq(class, base)),
                    None => false,
                },
                RequirementContent::SameConformance(_) => true,
                RequirementContent::Layout(GenericRequirementLayoutKind::Class) => {
                    subject.kind().is_any_class()
                }
                RequirementContent::Layout(GenericRequirementLayoutKind::Unknown(_))
                | RequirementContent::Unknown(_) => false,
            };
            if !holds {
                trace!(
                    ty = ty.address(),
                    requirement = requirement.address(),
                    "conditional requirement does not hold"
                );
                return Ok(None);
            }
        }
        Ok(Some(tables))
    }

    fn resolve_name(&self, name: &str, arguments: &[&'static Metadata]) -> Option<&'static Metadata> {
        let resolver = self.options.name_resolver.as_ref()?;
        resolver(name, arguments)
    }

    /// The type a requirement subject names: a generic argument, or an
    /// associated type reached from one
    fn resolve_param(
        &self,
        param: &GenericParamRef,
        arguments: &[&'static Metadata],
    ) -> ReadResult<Option<&'static Metadata>> {
        let Some(&root) = arguments.get(param.root as usize) else {
            return Ok(None);
        };
        let mut current = root;
        for step in &param.path {
            let Some(table) = self.conforms_to_protocol(current, step.protocol)? else {
                return Ok(None);
            };
            // SAFETY: the step indexes an associated type witness of the
            // protocol the table was produced for.
            let next = unsafe {
                let accessor: AssociatedTypeAccessor =
                    std::mem::transmute(table.word(step.index as usize));
                accessor(current, table)
            };
            if next.is_null() {
                return Ok(None);
            }
            // SAFETY: associated type witnesses return permanent metadata.
            current = unsafe { &*next };
        }
        Ok(Some(current))
    }

    /// Instantiate the witness table described by a generic witness table
    /// record for `ty`.
    ///
    /// The table gets the record's private words (zeroed) in front of its
    /// address point, then the pattern, then, for a resilient protocol,
    /// the default witnesses of requirements the pattern does not cover.
    /// The instantiation function runs once, before the table is published.
    ///
    /// # Safety
    ///
    /// `generic_table` must be a generic witness table record valid for the
    /// rest of the process and `instantiation_arguments` must be what its
    /// instantiation function expects.
    pub unsafe fn get_generic_witness_table(
        &self,
        generic_table: Address,
        ty: &'static Metadata,
        instantiation_arguments: *const *const c_void,
    ) -> ReadResult<&'static WitnessTable> {
        let key = (generic_table, ty.address() as usize);
        if let Some(existing) = self.witness_tables.get(&key) {
            self.counters.record_hit();
            return Ok(WitnessTable::from_address(existing as Address));
        }
        let lookup = self.witness_tables.get_or_try_insert_with(key, || {
            self.build_witness_table(generic_table, ty, instantiation_arguments)
        })?;
        if lookup.created {
            self.counters.record_miss();
        } else {
            self.counters.record_hit();
        }
        Ok(WitnessTable::from_address(lookup.value as Address))
    }

    unsafe fn build_witness_table(
        &self,
        generic_table: Address,
        ty: &'static Metadata,
        instantiation_arguments: *const *const c_void,
    ) -> ReadResult<usize> {
        let record = GenericWitnessTable::new(&IN_PROCESS, generic_table);
        let size = record.witness_table_size_in_words()? as usize;
        let private = record.witness_table_private_size_in_words()? as usize;
        let pattern = record.pattern()?;

        let defaults = match record.protocol()? {
            Some(protocol) => resilient_defaults(protocol, size)?,
            None => Vec::new(),
        };
        let total = private + size + defaults.len();
        let block = allocate_words(total).as_ptr();
        let table = block.add(private);
        std::ptr::copy_nonoverlapping(pattern as usize as *const usize, table, size);
        for (i, default) in defaults.iter().enumerate() {
            *table.add(size + i) = *default;
        }

        if let Some(instantiator) = record.instantiator()? {
            let instantiator: WitnessTableInstantiator = std::mem::transmute(instantiator as usize);
            instantiator(table as *mut WitnessTable, ty, instantiation_arguments);
        }

        self.counters.record_witness_table(total * WORD);
        debug!(
            generic_table,
            ty = ty.address(),
            table = table as usize,
            words = total,
            "instantiated witness table"
        );
        Ok(table as usize)
    }
}

/// Default witnesses for the requirements of a resilient protocol that lie
/// past the first `size` words of a witness table
fn resilient_defaults(protocol: Address, size: usize) -> ReadResult<Vec<usize>> {
    let descriptor = ProtocolDescriptor::new(&IN_PROCESS, protocol);
    let flags: ProtocolDescriptorFlags = descriptor.flags()?;
    if !flags.is_resilient() {
        return Ok(Vec::new());
    }
    let requirements = descriptor.num_requirements()? as usize;
    let full = WITNESS_TABLE_FIRST_REQUIREMENT_OFFSET + requirements;
    (size..full)
        .map(|word| {
            let index = (word - WITNESS_TABLE_FIRST_REQUIREMENT_OFFSET) as u16;
            let requirement = descriptor.requirement(index)?;
            requirement
                .default_implementation
                .map(|address| address as usize)
                .ok_or(ReadError::Malformed {
                    address: protocol,
                    reason: "resilient requirement missing from witness table has no default",
                })
        })
        .collect()
}
