//! Descriptor record builders
//!
//! Each `emit_*` method computes the record's size from its counts,
//! reserves it, appends the names and side tables the record points at,
//! then fills the fields in. It returns the address of the record.

use super::ImageBuilder;
use crate::abi::{
    ConformanceFlags, ConformanceKind, ContextDescriptorFlags, ContextDescriptorKind,
    GenericParamDescriptor, GenericRequirementFlags, GenericRequirementKind,
    GenericRequirementLayoutKind, MethodDescriptorFlags, ProtocolDescriptorFlags,
    ProtocolRequirementFlags, ProtocolRequirementKind, TypeContextDescriptorFlags,
    TypeMetadataRecordKind,
};
use crate::descriptor::{
    protocol_descriptor_size, GenericContextHeader, GenericParamRef, TypeGenericContextHeader,
    TypeTrailingLayout, VTableHeader, CONFORMANCE_DESCRIPTOR_SIZE,
    CONTEXT_DESCRIPTOR_HEADER_SIZE, GENERIC_REQUIREMENT_SIZE, GENERIC_WITNESS_TABLE_SIZE,
    PROTOCOL_REQUIREMENT_SIZE,
};
use crate::error::EmitResult;
use crate::layout::TrailingLayout;
use crate::pointer::Address;

/// Consecutive 32-bit records, as passed to the registration calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    /// Address of the first record
    pub start: Address,
    /// Number of records
    pub count: usize,
}

/// How a conformance or type metadata record names its type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTarget {
    /// A nominal type descriptor, referenced directly
    Descriptor(Address),
    /// A nominal type descriptor, referenced through an emitted slot
    IndirectDescriptor(Address),
    /// A foreign class object, referenced through an emitted slot
    ObjCClass(Address),
}

impl TypeTarget {
    fn kind(self) -> TypeMetadataRecordKind {
        match self {
            TypeTarget::Descriptor(_) => TypeMetadataRecordKind::DirectNominalTypeDescriptor,
            TypeTarget::IndirectDescriptor(_) => {
                TypeMetadataRecordKind::IndirectNominalTypeDescriptor
            }
            TypeTarget::ObjCClass(_) => TypeMetadataRecordKind::IndirectObjCClass,
        }
    }
}

// ===== Generic Signatures =====

/// Payload of a requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementPayload {
    /// Conformance to a protocol descriptor
    Protocol(Address),
    /// Equality with a named type
    SameType(String),
    /// Subclass of a named class
    BaseClass(String),
    /// A conformance record
    SameConformance(Address),
    /// A layout constraint
    Layout(GenericRequirementLayoutKind),
}

/// One requirement of a generic signature or conditional conformance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementRecord {
    /// Kind and argument flags
    pub flags: GenericRequirementFlags,
    /// Subject
    pub param: GenericParamRef,
    /// Kind-specific payload
    pub payload: RequirementPayload,
}

impl RequirementRecord {
    /// `param` conforms to `protocol`; the witness table is a key argument
    pub fn conforms(param: GenericParamRef, protocol: Address) -> Self {
        Self {
            flags: GenericRequirementFlags::new(GenericRequirementKind::Protocol, true, false),
            param,
            payload: RequirementPayload::Protocol(protocol),
        }
    }

    /// `param` is the type named `name`
    pub fn same_type(param: GenericParamRef, name: &str) -> Self {
        Self {
            flags: GenericRequirementFlags::new(GenericRequirementKind::SameType, false, false),
            param,
            payload: RequirementPayload::SameType(name.to_owned()),
        }
    }

    /// `param` is a subclass of the class named `name`
    pub fn base_class(param: GenericParamRef, name: &str) -> Self {
        Self {
            flags: GenericRequirementFlags::new(GenericRequirementKind::BaseClass, false, false),
            param,
            payload: RequirementPayload::BaseClass(name.to_owned()),
        }
    }

    /// `param` is a class
    pub fn class_layout(param: GenericParamRef) -> Self {
        Self {
            flags: GenericRequirementFlags::new(GenericRequirementKind::Layout, false, false),
            param,
            payload: RequirementPayload::Layout(GenericRequirementLayoutKind::Class),
        }
    }

    /// Replace the key argument bit
    pub fn with_key_argument(mut self, on: bool) -> Self {
        self.flags = self.flags.with_key_argument(on);
        self
    }
}

/// Generic parameters and requirements of a context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericSignature {
    /// Word offset of the arguments in a type's metadata
    pub argument_offset: u32,
    /// One descriptor per parameter
    pub params: Vec<GenericParamDescriptor>,
    /// Requirements, in argument order
    pub requirements: Vec<RequirementRecord>,
}

impl GenericSignature {
    /// `count` key type parameters stored at `argument_offset`
    pub fn new(argument_offset: u32, count: usize) -> Self {
        Self {
            argument_offset,
            params: vec![GenericParamDescriptor::key_type(); count],
            requirements: Vec::new(),
        }
    }

    /// Add a requirement
    pub fn with_requirement(mut self, requirement: RequirementRecord) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Counts as stored in the header
    pub fn header(&self) -> GenericContextHeader {
        let key = self.params.iter().filter(|p| p.has_key_argument()).count()
            + self
                .requirements
                .iter()
                .filter(|r| r.flags.has_key_argument())
                .count();
        let extra = self.params.iter().filter(|p| p.has_extra_argument()).count()
            + self
                .requirements
                .iter()
                .filter(|r| r.flags.has_extra_argument())
                .count();
        GenericContextHeader {
            num_params: self.params.len() as u32,
            num_requirements: self.requirements.len() as u32,
            num_key_arguments: key as u32,
            num_extra_arguments: extra as u32,
        }
    }
}

// ===== Type Descriptors =====

/// One vtable entry a class introduces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRecord {
    /// Implementation, `None` for an abstract entry
    pub implementation: Option<Address>,
    /// Kind and attributes
    pub flags: MethodDescriptorFlags,
}

/// Vtable a class introduces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VTableRecord {
    /// Word offset of the first entry in the class's metadata
    pub offset: u32,
    /// Entries
    pub methods: Vec<MethodRecord>,
}

/// A class, struct or enum descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRecord {
    kind: ContextDescriptorKind,
    name: String,
    parent: Option<Address>,
    access_function: Option<Address>,
    type_flags: TypeContextDescriptorFlags,
    names: Vec<String>,
    field_offset_vector_offset: u32,
    num_payload_cases: u32,
    payload_size_offset: u8,
    field_types: Option<Address>,
    generic: Option<GenericSignature>,
    vtable: Option<VTableRecord>,
}

impl TypeRecord {
    fn new(kind: ContextDescriptorKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_owned(),
            parent: None,
            access_function: None,
            type_flags: TypeContextDescriptorFlags::empty(),
            names: Vec::new(),
            field_offset_vector_offset: 0,
            num_payload_cases: 0,
            payload_size_offset: 0,
            field_types: None,
            generic: None,
            vtable: None,
        }
    }

    /// A struct named `name`
    pub fn structure(name: &str) -> Self {
        Self::new(ContextDescriptorKind::Struct, name)
    }

    /// An enum named `name`
    pub fn enumeration(name: &str) -> Self {
        Self::new(ContextDescriptorKind::Enum, name)
    }

    /// A class named `name`
    pub fn class(name: &str) -> Self {
        Self::new(ContextDescriptorKind::Class, name)
    }

    /// Enclosing context
    pub fn with_parent(mut self, parent: Address) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Metadata access function
    pub fn with_access_function(mut self, function: Address) -> Self {
        self.access_function = Some(function);
        self
    }

    /// Stored properties, with the word offset of the field offset vector
    /// (0 for none)
    pub fn with_fields(mut self, names: &[&str], field_offset_vector_offset: u32) -> Self {
        debug_assert!(self.kind != ContextDescriptorKind::Enum, "fields on an enum");
        self.names = names.iter().map(|name| (*name).to_owned()).collect();
        self.field_offset_vector_offset = field_offset_vector_offset;
        self
    }

    /// Enum cases, payload cases first
    pub fn with_cases(mut self, payload: &[&str], empty: &[&str]) -> Self {
        debug_assert!(self.kind == ContextDescriptorKind::Enum, "cases on a non-enum");
        self.names = payload.iter().chain(empty).map(|name| (*name).to_owned()).collect();
        self.num_payload_cases = payload.len() as u32;
        self
    }

    /// Word offset of the payload size slot in enum metadata
    pub fn with_payload_size_offset(mut self, offset: u8) -> Self {
        self.payload_size_offset = offset;
        self
    }

    /// Accessor for field (or payload case) types
    pub fn with_field_types(mut self, accessor: Address) -> Self {
        self.field_types = Some(accessor);
        self
    }

    /// Make the type generic
    pub fn with_generic(mut self, signature: GenericSignature) -> Self {
        self.generic = Some(signature);
        self
    }

    /// Give a class a vtable
    pub fn with_vtable(mut self, vtable: VTableRecord) -> Self {
        self.vtable = Some(vtable);
        self
    }

    /// Mark the superclass's size as known only at runtime
    pub fn with_resilient_superclass(mut self) -> Self {
        self.type_flags |= TypeContextDescriptorFlags::HAS_RESILIENT_SUPERCLASS;
        self
    }
}

// ===== Protocols =====

/// One protocol requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolRequirementRecord {
    /// Kind and attributes
    pub flags: ProtocolRequirementFlags,
    /// Default witness
    pub default_implementation: Option<Address>,
}

/// A protocol descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolRecord {
    /// Protocol name
    pub name: String,
    /// Flags word
    pub flags: ProtocolDescriptorFlags,
    /// Refined protocols
    pub inherited: Vec<Address>,
    /// Requirements in witness table order
    pub requirements: Vec<ProtocolRequirementRecord>,
    /// Mangled name of a superclass constraint
    pub superclass_constraint: Option<String>,
    /// Associated type names in declaration order
    pub associated_type_names: Vec<String>,
}

impl ProtocolRecord {
    /// A native protocol with no requirements
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            flags: ProtocolDescriptorFlags::native(),
            inherited: Vec::new(),
            requirements: Vec::new(),
            superclass_constraint: None,
            associated_type_names: Vec::new(),
        }
    }

    /// Replace the flags
    pub fn with_flags(mut self, flags: ProtocolDescriptorFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Add a requirement without a default
    pub fn with_requirement(mut self, kind: ProtocolRequirementKind) -> Self {
        self.requirements.push(ProtocolRequirementRecord {
            flags: ProtocolRequirementFlags::new(kind),
            default_implementation: None,
        });
        self
    }

    /// Add a requirement with a default witness
    pub fn with_default(mut self, kind: ProtocolRequirementKind, implementation: Address) -> Self {
        self.requirements.push(ProtocolRequirementRecord {
            flags: ProtocolRequirementFlags::new(kind),
            default_implementation: Some(implementation),
        });
        self
    }

    /// Add a refined protocol
    pub fn inheriting(mut self, protocol: Address) -> Self {
        self.inherited.push(protocol);
        self
    }

    /// Set the associated type names
    pub fn with_associated_types(mut self, names: &[&str]) -> Self {
        self.associated_type_names = names.iter().map(|name| (*name).to_owned()).collect();
        self
    }

    fn num_mandatory(&self) -> u16 {
        self.requirements
            .iter()
            .filter(|r| r.default_implementation.is_none())
            .count() as u16
    }
}

// ===== Conformances =====

/// Where a conformance's witness table comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WitnessSource {
    /// A static table emitted after the descriptor. The words given are the
    /// requirements; word 0 is filled with the descriptor's address.
    Table(Vec<u64>),
    /// An accessor called without conditional tables
    Accessor(Address),
    /// An accessor called with the conditional requirements' tables
    ConditionalAccessor(Address),
}

/// A protocol conformance descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceRecord {
    /// Protocol descriptor
    pub protocol: Address,
    /// Conforming type
    pub target: TypeTarget,
    /// Witness table source
    pub witness: WitnessSource,
    /// Declaring module of a retroactive conformance
    pub retroactive_context: Option<Address>,
    /// Requirements on the type's generic arguments
    pub conditional_requirements: Vec<RequirementRecord>,
    /// May be emitted by several images
    pub synthesized_non_unique: bool,
}

impl ConformanceRecord {
    /// An unconditional conformance
    pub fn new(protocol: Address, target: TypeTarget, witness: WitnessSource) -> Self {
        Self {
            protocol,
            target,
            witness,
            retroactive_context: None,
            conditional_requirements: Vec::new(),
            synthesized_non_unique: false,
        }
    }

    /// Add a conditional requirement
    pub fn with_condition(mut self, requirement: RequirementRecord) -> Self {
        self.conditional_requirements.push(requirement);
        self
    }

    /// Mark the conformance retroactive, declared in `context`
    pub fn retroactive(mut self, context: Address) -> Self {
        self.retroactive_context = Some(context);
        self
    }

    fn flags(&self) -> ConformanceFlags {
        let kind = match self.witness {
            WitnessSource::Table(_) => ConformanceKind::WitnessTable,
            WitnessSource::Accessor(_) => ConformanceKind::WitnessTableAccessor,
            WitnessSource::ConditionalAccessor(_) => {
                ConformanceKind::ConditionalWitnessTableAccessor
            }
        };
        ConformanceFlags::new()
            .with_conformance_kind(kind)
            .with_type_reference_kind(self.target.kind())
            .with_retroactive(self.retroactive_context.is_some())
            .with_synthesized_non_unique(self.synthesized_non_unique)
            .with_num_conditional_requirements(self.conditional_requirements.len() as u32)
    }
}

/// Template for witness tables instantiated at runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericWitnessTableRecord {
    /// Protocol, needed to default the tail of a resilient protocol
    pub protocol: Option<Address>,
    /// Pattern words, starting with the conformance descriptor word
    pub pattern: Vec<u64>,
    /// Zeroed words placed before each instance
    pub private_words: u16,
    /// Instantiation function
    pub instantiator: Option<Address>,
    /// Private data area
    pub private_data: Option<Address>,
}

impl ImageBuilder {
    // ===== Contexts =====

    fn emit_context_header(
        &mut self,
        at: usize,
        flags: ContextDescriptorFlags,
        parent: Option<Address>,
    ) -> EmitResult<()> {
        self.patch_u32(at, flags.bits())?;
        self.patch_relative(at + 4, parent)
    }

    /// Emit a module descriptor
    pub fn emit_module(&mut self, name: &str) -> EmitResult<Address> {
        let at = self.reserve(12, 4)?;
        let flags = ContextDescriptorFlags::new(ContextDescriptorKind::Module).with_unique(true);
        self.emit_context_header(at, flags, None)?;
        let name = self.emit_c_string(name)?;
        self.patch_relative(at + 8, Some(name))?;
        Ok(self.address_of(at))
    }

    /// Emit a context with an optional plain generic signature after a
    /// fixed part of `fixed_size` bytes. Returns the record's offset.
    fn emit_generic_context(
        &mut self,
        kind: ContextDescriptorKind,
        parent: Option<Address>,
        fixed_size: u64,
        generic: Option<&GenericSignature>,
    ) -> EmitResult<usize> {
        let mut layout = TrailingLayout::new(fixed_size);
        let header = layout.push_if(generic.is_some(), GenericContextHeader::SIZE, 4, 1);
        let counts = generic.map(GenericSignature::header).unwrap_or_default();
        let params = layout.push(1, 1, counts.num_params as u64);
        let requirements = layout.push(GENERIC_REQUIREMENT_SIZE, 4, counts.num_requirements as u64);

        let at = self.reserve(layout.end() as usize, 4)?;
        let flags = ContextDescriptorFlags::new(kind)
            .with_unique(true)
            .with_generic(generic.is_some());
        self.emit_context_header(at, flags, parent)?;
        if let Some(signature) = generic {
            self.fill_generic_header(at + header.offset as usize, &counts)?;
            self.fill_generic_arrays(
                at + params.offset as usize,
                at + requirements.offset as usize,
                signature,
            )?;
        }
        Ok(at)
    }

    fn fill_generic_header(&mut self, at: usize, counts: &GenericContextHeader) -> EmitResult<()> {
        self.patch_u32(at, counts.num_params)?;
        self.patch_u32(at + 4, counts.num_requirements)?;
        self.patch_u32(at + 8, counts.num_key_arguments)?;
        self.patch_u32(at + 12, counts.num_extra_arguments)
    }

    fn fill_generic_arrays(
        &mut self,
        params: usize,
        requirements: usize,
        signature: &GenericSignature,
    ) -> EmitResult<()> {
        let bytes: Vec<u8> = signature.params.iter().map(|p| p.bits()).collect();
        self.patch_bytes(params, &bytes)?;
        self.fill_requirements(requirements, &signature.requirements)
    }

    /// Emit an extension of the context named by the mangled `extended_context`
    pub fn emit_extension(
        &mut self,
        parent: Address,
        extended_context: &str,
        generic: Option<&GenericSignature>,
    ) -> EmitResult<Address> {
        let at = self.emit_generic_context(ContextDescriptorKind::Extension, Some(parent), 12, generic)?;
        let name = self.emit_c_string(extended_context)?;
        self.patch_relative(at + 8, Some(name))?;
        Ok(self.address_of(at))
    }

    /// Emit an anonymous context
    pub fn emit_anonymous(
        &mut self,
        parent: Address,
        generic: Option<&GenericSignature>,
    ) -> EmitResult<Address> {
        let at = self.emit_generic_context(
            ContextDescriptorKind::Anonymous,
            Some(parent),
            CONTEXT_DESCRIPTOR_HEADER_SIZE,
            generic,
        )?;
        Ok(self.address_of(at))
    }

    // ===== Requirements =====

    fn fill_requirements(&mut self, at: usize, requirements: &[RequirementRecord]) -> EmitResult<()> {
        for (i, requirement) in requirements.iter().enumerate() {
            let record = at + i * GENERIC_REQUIREMENT_SIZE as usize;
            self.patch_u32(record, requirement.flags.bits())?;
            self.fill_param_ref(record + 4, &requirement.param)?;
            let payload = record + 8;
            match &requirement.payload {
                RequirementPayload::Protocol(target) | RequirementPayload::SameConformance(target) => {
                    self.patch_relative(payload, Some(*target))?
                }
                RequirementPayload::SameType(name) | RequirementPayload::BaseClass(name) => {
                    let name = self.emit_c_string(name)?;
                    self.patch_relative(payload, Some(name))?
                }
                RequirementPayload::Layout(kind) => {
                    let raw = match kind {
                        GenericRequirementLayoutKind::Class => 0,
                        GenericRequirementLayoutKind::Unknown(raw) => *raw,
                    };
                    self.patch_u32(payload, raw)?
                }
            }
        }
        Ok(())
    }

    /// Store a parameter reference, emitting its path record when it has one
    fn fill_param_ref(&mut self, field: usize, param: &GenericParamRef) -> EmitResult<()> {
        if param.is_root() {
            return self.patch_u32(field, param.root << 1);
        }
        let path = self.reserve(8 + 8 * param.path.len(), 4)?;
        self.patch_u32(path, param.root)?;
        for (i, step) in param.path.iter().enumerate() {
            let at = path + 4 + 8 * i;
            self.patch_relative(at, Some(step.protocol))?;
            self.patch_u32(at + 4, step.index)?;
        }
        let target = self.address_of(path);
        self.patch_relative_tagged(field, target, 1, 2)
    }

    // ===== Types =====

    /// Emit a class, struct or enum descriptor
    pub fn emit_type(&mut self, record: &TypeRecord) -> EmitResult<Address> {
        let header = record.generic.as_ref().map(|signature| TypeGenericContextHeader {
            argument_offset: signature.argument_offset,
            base: signature.header(),
        });
        let vtable = record.vtable.as_ref().map(|vtable| VTableHeader {
            offset: vtable.offset,
            size: vtable.methods.len() as u32,
        });
        let layout = TypeTrailingLayout::compute(header.as_ref(), vtable.as_ref());
        let at = self.reserve(layout.size as usize, 4)?;

        let mut type_flags = record.type_flags;
        type_flags.set(TypeContextDescriptorFlags::HAS_VTABLE, vtable.is_some());
        let flags = ContextDescriptorFlags::new(record.kind)
            .with_unique(true)
            .with_generic(header.is_some())
            .with_kind_specific_flags(type_flags.bits());
        self.emit_context_header(at, flags, record.parent)?;

        let name = self.emit_c_string(&record.name)?;
        self.patch_relative(at + 8, Some(name))?;
        self.patch_relative(at + 12, record.access_function)?;

        let count = record.names.len() as u32;
        if record.kind == ContextDescriptorKind::Enum {
            let word = record.num_payload_cases | ((record.payload_size_offset as u32) << 24);
            self.patch_u32(at + 16, word)?;
            self.patch_u32(at + 20, count - record.num_payload_cases)?;
        } else {
            self.patch_u32(at + 16, count)?;
            self.patch_u32(at + 20, record.field_offset_vector_offset)?;
        }
        if !record.names.is_empty() {
            let names: Vec<&str> = record.names.iter().map(String::as_str).collect();
            let list = self.emit_name_list(&names)?;
            self.patch_relative(at + 24, Some(list))?;
        }
        self.patch_relative(at + 28, record.field_types)?;

        if let (Some(header), Some(signature)) = (header, record.generic.as_ref()) {
            let start = at + layout.generic_header.offset as usize;
            self.patch_u32(start, header.argument_offset)?;
            self.fill_generic_header(start + 4, &header.base)?;
            self.fill_generic_arrays(
                at + layout.params.offset as usize,
                at + layout.requirements.offset as usize,
                signature,
            )?;
        }

        if let (Some(header), Some(vtable)) = (vtable, record.vtable.as_ref()) {
            let start = at + layout.vtable_header.offset as usize;
            self.patch_u32(start, header.offset)?;
            self.patch_u32(start + 4, header.size)?;
            for (i, method) in vtable.methods.iter().enumerate() {
                let entry = at + layout.methods.element(i as u64) as usize;
                self.patch_relative(entry, method.implementation)?;
                self.patch_u32(entry + 4, method.flags.bits())?;
            }
        }
        Ok(self.address_of(at))
    }

    /// Emit metadata as `prefix` words before the address point followed by
    /// `body` words, and return the address point
    pub fn emit_metadata(&mut self, prefix: &[u64], body: &[u64]) -> EmitResult<Address> {
        let start = self.emit_words(prefix)?;
        for word in body {
            self.emit_word(*word)?;
        }
        Ok(start + prefix.len() as u64 * self.pointer_size())
    }

    // ===== Protocols =====

    /// Emit a protocol descriptor
    pub fn emit_protocol(&mut self, record: &ProtocolRecord) -> EmitResult<Address> {
        let pointer = self.pointer_size();
        let size = protocol_descriptor_size(pointer);
        let at = self.reserve(size as usize, pointer)?;
        let word = |index: u64| at + (index * pointer) as usize;

        let name = self.emit_c_string(&record.name)?;
        self.patch_word(word(1), name)?;
        if !record.inherited.is_empty() {
            let mut list = vec![record.inherited.len() as u64];
            list.extend(&record.inherited);
            let list = self.emit_words(&list)?;
            self.patch_word(word(2), list)?;
        }

        let native = word(8);
        self.patch_u32(native, size as u32)?;
        self.patch_u32(native + 4, record.flags.bits())?;
        self.patch_u16(native + 8, record.num_mandatory())?;
        self.patch_u16(native + 10, record.requirements.len() as u16)?;

        let array = self.reserve(
            record.requirements.len() * PROTOCOL_REQUIREMENT_SIZE as usize,
            4,
        )?;
        for (i, requirement) in record.requirements.iter().enumerate() {
            let entry = array + i * PROTOCOL_REQUIREMENT_SIZE as usize;
            self.patch_u32(entry, requirement.flags.bits())?;
            self.patch_relative(entry + 4, requirement.default_implementation)?;
        }
        let array = self.address_of(array);
        self.patch_relative(native + 12, Some(array))?;

        if let Some(constraint) = &record.superclass_constraint {
            let name = self.emit_c_string(constraint)?;
            self.patch_relative(native + 16, Some(name))?;
        }
        if !record.associated_type_names.is_empty() {
            let names = self.emit_c_string(&record.associated_type_names.join(" "))?;
            self.patch_relative(native + 20, Some(names))?;
        }
        Ok(self.address_of(at))
    }

    /// Emit a protocol record section
    pub fn emit_protocol_records(&mut self, protocols: &[Address]) -> EmitResult<Section> {
        let at = self.reserve(4 * protocols.len(), 4)?;
        for (i, protocol) in protocols.iter().enumerate() {
            self.patch_relative_tagged(at + 4 * i, *protocol, 0, 4)?;
        }
        Ok(Section {
            start: self.address_of(at),
            count: protocols.len(),
        })
    }

    // ===== Conformances =====

    /// Store a type reference of the kind `target` names at `field`
    fn fill_type_reference(&mut self, field: usize, target: TypeTarget) -> EmitResult<()> {
        let address = match target {
            TypeTarget::Descriptor(descriptor) => descriptor,
            TypeTarget::IndirectDescriptor(object) | TypeTarget::ObjCClass(object) => {
                self.emit_pointer_slot(object)?
            }
        };
        self.patch_relative(field, Some(address))
    }

    /// Emit a conformance descriptor, and its witness table when the
    /// witness source is a static table
    pub fn emit_conformance(&mut self, record: &ConformanceRecord) -> EmitResult<Address> {
        let flags = record.flags();
        debug_assert!(
            record.conditional_requirements.len() <= 0xFF,
            "too many conditional requirements"
        );
        let mut layout = TrailingLayout::new(CONFORMANCE_DESCRIPTOR_SIZE);
        let retroactive = layout.push_if(flags.is_retroactive(), 4, 4, 1);
        let requirements = layout.push(
            GENERIC_REQUIREMENT_SIZE,
            4,
            record.conditional_requirements.len() as u64,
        );

        let at = self.reserve(layout.end() as usize, 4)?;
        let descriptor = self.address_of(at);
        self.patch_relative(at, Some(record.protocol))?;
        self.fill_type_reference(at + 4, record.target)?;
        let witness = match &record.witness {
            WitnessSource::Table(requirements) => {
                let mut words = Vec::with_capacity(requirements.len() + 1);
                words.push(descriptor);
                words.extend(requirements);
                self.emit_words(&words)?
            }
            WitnessSource::Accessor(accessor) | WitnessSource::ConditionalAccessor(accessor) => {
                *accessor
            }
        };
        self.patch_relative(at + 8, Some(witness))?;
        self.patch_u32(at + 12, flags.bits())?;
        if let Some(context) = record.retroactive_context {
            self.patch_relative(at + retroactive.offset as usize, Some(context))?;
        }
        self.fill_requirements(
            at + requirements.offset as usize,
            &record.conditional_requirements,
        )?;
        Ok(descriptor)
    }

    /// Emit a conformance record section
    pub fn emit_conformance_records(&mut self, conformances: &[Address]) -> EmitResult<Section> {
        let at = self.reserve(4 * conformances.len(), 4)?;
        for (i, conformance) in conformances.iter().enumerate() {
            self.patch_relative(at + 4 * i, Some(*conformance))?;
        }
        Ok(Section {
            start: self.address_of(at),
            count: conformances.len(),
        })
    }

    /// Emit a type metadata record section
    pub fn emit_type_metadata_records(&mut self, types: &[TypeTarget]) -> EmitResult<Section> {
        let mut targets = Vec::with_capacity(types.len());
        for target in types {
            let address = match *target {
                TypeTarget::Descriptor(descriptor) => descriptor,
                TypeTarget::IndirectDescriptor(object) | TypeTarget::ObjCClass(object) => {
                    self.emit_pointer_slot(object)?
                }
            };
            targets.push((address, target.kind()));
        }
        let at = self.reserve(4 * targets.len(), 4)?;
        for (i, (address, kind)) in targets.into_iter().enumerate() {
            self.patch_relative_tagged(at + 4 * i, address, kind.raw(), 4)?;
        }
        Ok(Section {
            start: self.address_of(at),
            count: types.len(),
        })
    }

    /// Emit a generic witness table record and its pattern. Returns the
    /// record and the pattern's address.
    pub fn emit_generic_witness_table(
        &mut self,
        record: &GenericWitnessTableRecord,
    ) -> EmitResult<(Address, Address)> {
        let pattern = self.emit_words(&record.pattern)?;
        let at = self.reserve(GENERIC_WITNESS_TABLE_SIZE as usize, 4)?;
        self.patch_u16(at, record.pattern.len() as u16)?;
        self.patch_u16(at + 2, record.private_words)?;
        self.patch_relative(at + 4, record.protocol)?;
        self.patch_relative(at + 8, Some(pattern))?;
        self.patch_relative(at + 12, record.instantiator)?;
        self.patch_relative(at + 16, record.private_data)?;
        Ok((self.address_of(at), pattern))
    }
}
