//! Reflection over metadata in another address space
//!
//! [`SnapshotReader`] serves reads out of captured memory regions, such as
//! the bytes of an [`Image`] or pages copied out of another process.
//! [`ReflectionContext`] turns metadata addresses in any reader into
//! readable type names, field lists and conformance listings, without
//! calling into the target.

use crate::abi::{FunctionConvention, MetadataKind, ParameterFlags};
use crate::descriptor::{
    read_conformance_records, read_protocol_records, read_type_metadata_records,
    ConformanceDescriptor, ProtocolDescriptor, TypeContextDescriptor, TypeReference,
};
use crate::emit::Image;
use crate::error::{ReadError, ReadResult};
use crate::metadata::MetadataView;
use crate::pointer::{Address, MemoryReader, PointerWidth};
use std::fmt;
use tracing::trace;

/// Deepest type nesting a name is rendered for
pub const MAX_NAME_DEPTH: usize = 64;

struct Region {
    base: Address,
    bytes: Vec<u8>,
}

impl Region {
    /// One past the last byte, `None` when the region reaches the top of
    /// the address space
    fn end(&self) -> Option<Address> {
        self.base.checked_add(self.bytes.len() as u64)
    }

    fn contains(&self, address: Address) -> bool {
        address >= self.base && self.end().map_or(true, |end| address < end)
    }
}

/// Reads from a set of captured memory regions.
///
/// A read must fall entirely inside one region. Everything else is
/// reported as unreadable.
pub struct SnapshotReader {
    width: PointerWidth,
    regions: Vec<Region>,
}

impl SnapshotReader {
    /// An empty snapshot of a target with the given pointer width
    pub fn new(width: PointerWidth) -> Self {
        Self {
            width,
            regions: Vec::new(),
        }
    }

    /// A snapshot holding one image
    pub fn from_image(image: &Image) -> Self {
        let mut reader = Self::new(image.width());
        reader.add_image(image);
        reader
    }

    /// Add the bytes of an image at its base address
    pub fn add_image(&mut self, image: &Image) {
        self.add_region(image.base(), image.bytes().to_vec());
    }

    /// Add a region. Regions are kept sorted by base address and must not
    /// overlap.
    pub fn add_region(&mut self, base: Address, bytes: Vec<u8>) {
        let index = self.regions.partition_point(|region| region.base < base);
        debug_assert!(
            index == 0 || self.regions[index - 1].end().is_some_and(|end| end <= base),
            "overlapping snapshot regions"
        );
        trace!(base, len = bytes.len(), "adding snapshot region");
        self.regions.insert(index, Region { base, bytes });
    }

    /// Builder form of [`add_region`](Self::add_region)
    pub fn with_region(mut self, base: Address, bytes: Vec<u8>) -> Self {
        self.add_region(base, bytes);
        self
    }

    /// Number of regions
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    fn region_for(&self, address: Address) -> Option<&Region> {
        let index = self.regions.partition_point(|region| region.base <= address);
        let region = self.regions.get(index.checked_sub(1)?)?;
        region.contains(address).then_some(region)
    }
}

impl MemoryReader for SnapshotReader {
    fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    fn read_bytes(&self, address: Address, buf: &mut [u8]) -> ReadResult<()> {
        let unreadable = || ReadError::Unreadable {
            address,
            size: buf.len(),
        };
        let region = self.region_for(address).ok_or_else(unreadable)?;
        let start = (address - region.base) as usize;
        let src = start
            .checked_add(buf.len())
            .and_then(|end| region.bytes.get(start..end))
            .ok_or_else(unreadable)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

impl fmt::Debug for SnapshotReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ranges: Vec<_> = self
            .regions
            .iter()
            .map(|region| match region.end() {
                Some(end) => format!("{:#x}..{:#x}", region.base, end),
                None => format!("{:#x}..", region.base),
            })
            .collect();
        f.debug_struct("SnapshotReader")
            .field("width", &self.width)
            .field("regions", &ranges)
            .finish()
    }
}

/// A stored property or enum case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Declared name
    pub name: String,
    /// Byte offset in the instance; `None` for enum cases and types
    /// without a field offset vector
    pub offset: Option<u64>,
}

/// One entry of a conformance section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceInfo {
    /// Address of the conformance descriptor
    pub descriptor: Address,
    /// Name of the protocol
    pub protocol: String,
    /// Name of the conforming type
    pub type_name: String,
}

/// Inspects type metadata through a [`MemoryReader`]
pub struct ReflectionContext<R> {
    reader: R,
}

impl<R: MemoryReader> ReflectionContext<R> {
    /// Reflect over the memory `reader` sees
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// The underlying reader
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Give the reader back
    pub fn into_reader(self) -> R {
        self.reader
    }

    /// Decode the metadata record at `address`
    pub fn metadata(&self, address: Address) -> ReadResult<MetadataView<'_, R>> {
        MetadataView::read(&self.reader, address)
    }

    /// Human-readable name of the type whose metadata is at `address`
    pub fn type_name(&self, address: Address) -> ReadResult<String> {
        self.name_at_depth(address, 0)
    }

    /// Stored properties of a struct or class, or cases of an enum
    pub fn fields(&self, address: Address) -> ReadResult<Vec<FieldInfo>> {
        let metadata = self.metadata(address)?;
        let (names, offsets) = match metadata {
            MetadataView::Struct(value) => {
                let descriptor = value.descriptor()?;
                (descriptor.field_names()?, value.field_offsets()?)
            }
            MetadataView::Class(class) => match class.descriptor()? {
                Some(descriptor) => (descriptor.field_names()?, class.field_offsets()?),
                None => return Ok(Vec::new()),
            },
            MetadataView::Enum(value) | MetadataView::Optional(value) => {
                (value.descriptor()?.case_names()?, None)
            }
            _ => return Ok(Vec::new()),
        };
        Ok(names
            .into_iter()
            .enumerate()
            .map(|(i, name)| FieldInfo {
                name,
                offset: offsets.as_ref().and_then(|offsets| offsets.get(i).copied()),
            })
            .collect())
    }

    /// Names of the protocols in a protocol record section
    pub fn protocol_names(&self, start: Address, count: usize) -> ReadResult<Vec<String>> {
        read_protocol_records(&self.reader, start, count)?
            .into_iter()
            .map(|protocol| ProtocolDescriptor::new(&self.reader, protocol).name())
            .collect()
    }

    /// Qualified names of the types in a type metadata record section
    pub fn type_record_names(&self, start: Address, count: usize) -> ReadResult<Vec<String>> {
        read_type_metadata_records(&self.reader, start, count)?
            .into_iter()
            .map(|reference| self.reference_name(reference))
            .collect()
    }

    /// Every conformance in a conformance record section whose conforming
    /// type is known
    pub fn conformances(&self, start: Address, count: usize) -> ReadResult<Vec<ConformanceInfo>> {
        let mut listing = Vec::with_capacity(count);
        for descriptor in read_conformance_records(&self.reader, start, count)? {
            let conformance = ConformanceDescriptor::new(&self.reader, descriptor);
            let Some(reference) = conformance.type_reference()? else {
                continue;
            };
            listing.push(ConformanceInfo {
                descriptor,
                protocol: ProtocolDescriptor::new(&self.reader, conformance.protocol()?).name()?,
                type_name: self.reference_name(reference)?,
            });
        }
        Ok(listing)
    }

    fn reference_name(&self, reference: TypeReference) -> ReadResult<String> {
        match reference {
            TypeReference::Descriptor(address) => {
                TypeContextDescriptor::new(&self.reader, address).qualified_name()
            }
            TypeReference::ObjCClass(address) => Ok(format!("<objc class {:#x}>", address)),
        }
    }

    fn name_at_depth(&self, address: Address, depth: usize) -> ReadResult<String> {
        if depth > MAX_NAME_DEPTH {
            return Err(ReadError::Malformed {
                address,
                reason: "type nesting too deep",
            });
        }
        let child = |address| self.name_at_depth(address, depth + 1);
        let metadata = self.metadata(address)?;
        match metadata {
            MetadataView::Class(_)
            | MetadataView::Struct(_)
            | MetadataView::Enum(_)
            | MetadataView::Optional(_)
            | MetadataView::ForeignClass(_) => self.nominal_name(&metadata, depth),
            MetadataView::Tuple(tuple) => {
                let labels = tuple.labels()?;
                let mut parts = Vec::new();
                for (i, element) in tuple.elements()?.into_iter().enumerate() {
                    let name = child(element.metadata)?;
                    match labels.as_ref().map(|labels| labels[i].as_str()) {
                        Some(label) if !label.is_empty() => parts.push(format!("{label}: {name}")),
                        _ => parts.push(name),
                    }
                }
                Ok(format!("({})", parts.join(", ")))
            }
            MetadataView::Function(function) => {
                let flags = function.flags()?;
                let mut parameters = Vec::new();
                for (i, parameter) in function.parameters()?.into_iter().enumerate() {
                    let mut name = child(parameter)?;
                    let parameter_flags = function.parameter_flags(i as u32)?;
                    if parameter_flags.contains(ParameterFlags::IN_OUT) {
                        name = format!("inout {name}");
                    } else if parameter_flags.contains(ParameterFlags::SHARED) {
                        name = format!("__shared {name}");
                    }
                    if parameter_flags.contains(ParameterFlags::VARIADIC) {
                        name.push_str("...");
                    }
                    parameters.push(name);
                }
                let convention = match flags.convention() {
                    FunctionConvention::Swift => "",
                    FunctionConvention::Block => "@convention(block) ",
                    FunctionConvention::Thin => "@convention(thin) ",
                    FunctionConvention::CFunctionPointer => "@convention(c) ",
                    FunctionConvention::Unknown(_) => "@convention(unknown) ",
                };
                let throws = if flags.throws() { " throws" } else { "" };
                Ok(format!(
                    "{convention}({}){throws} -> {}",
                    parameters.join(", "),
                    child(function.result()?)?
                ))
            }
            MetadataView::Existential(existential) => {
                let mut parts = Vec::new();
                if let Some(superclass) = existential.superclass_constraint()? {
                    parts.push(child(superclass)?);
                }
                for protocol in existential.protocols()? {
                    parts.push(ProtocolDescriptor::new(&self.reader, protocol).name()?);
                }
                if parts.is_empty() {
                    let bound = if existential.is_class_bounded()? { "AnyObject" } else { "Any" };
                    return Ok(bound.to_owned());
                }
                Ok(parts.join(" & "))
            }
            MetadataView::Metatype(metatype) => {
                Ok(format!("{}.Type", parenthesized(child(metatype.instance_type()?)?)))
            }
            MetadataView::ExistentialMetatype(metatype) => {
                Ok(format!("{}.Type", parenthesized(child(metatype.instance_type()?)?)))
            }
            MetadataView::ObjCClassWrapper(wrapper) => {
                Ok(format!("<objc class {:#x}>", wrapper.class()?))
            }
            MetadataView::Opaque(_) => {
                let layout = metadata.value_layout()?;
                Ok(format!("<opaque {} bytes @ {:#x}>", layout.size, address))
            }
            MetadataView::Unknown { kind, .. } => Ok(format!("<unknown kind {kind}>")),
            other => Ok(format!("<{} @ {:#x}>", other.kind(), address)),
        }
    }

    fn nominal_name(&self, metadata: &MetadataView<'_, R>, depth: usize) -> ReadResult<String> {
        let Some(descriptor) = metadata.type_context_descriptor()? else {
            return match metadata {
                MetadataView::ForeignClass(foreign) => foreign.header().name(),
                // Artificial subclasses take the name of the class they wrap.
                MetadataView::Class(class) => match class.superclass()? {
                    Some(superclass) => self.name_at_depth(superclass, depth + 1),
                    None => Ok(format!("<class @ {:#x}>", metadata.address())),
                },
                _ => Ok(format!("<{} @ {:#x}>", metadata.kind(), metadata.address())),
            };
        };
        let mut name = descriptor.qualified_name()?;
        if let Some(arguments) = metadata.generic_arguments()? {
            if !arguments.is_empty() {
                let arguments = arguments
                    .into_iter()
                    .map(|argument| self.name_at_depth(argument, depth + 1))
                    .collect::<ReadResult<Vec<_>>>()?;
                name = format!("{name}<{}>", arguments.join(", "));
            }
        }
        Ok(name)
    }
}

impl<R: MemoryReader + fmt::Debug> fmt::Debug for ReflectionContext<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectionContext")
            .field("reader", &self.reader)
            .finish()
    }
}

fn parenthesized(name: String) -> String {
    if name.contains(" & ") || name.contains(" -> ") {
        format!("({name})")
    } else {
        name
    }
}

/// Kind of the metadata at `address`, or `None` if it cannot be read
pub fn peek_kind<R: MemoryReader>(reader: &R, address: Address) -> Option<MetadataKind> {
    reader
        .read_word(address)
        .ok()
        .map(MetadataKind::from_raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{ExistentialTypeFlags, FunctionTypeFlags, ProtocolClassConstraint};
    use crate::emit::{
        ConformanceRecord, GenericSignature, ImageBuilder, ProtocolRecord, TypeRecord, TypeTarget,
        WitnessSource,
    };

    /// Emit a value witness table with only the layout words filled in
    fn emit_layout(image: &mut ImageBuilder, size: u64, alignment: u64) -> Address {
        let stride = size.max(1).div_ceil(alignment) * alignment;
        image
            .emit_words(&[0, 0, 0, 0, 0, 0, size, alignment - 1, stride])
            .unwrap()
    }

    fn kind(kind: MetadataKind) -> u64 {
        kind.raw() as u64
    }

    struct Fixture {
        reader: SnapshotReader,
        int: Address,
        point: Address,
        pair_of_int: Address,
        tuple: Address,
        function: Address,
        existential: Address,
        metatype: Address,
        conformances: (Address, usize),
        protocols: (Address, usize),
    }

    fn build(width: PointerWidth) -> Fixture {
        let mut image = ImageBuilder::at(0x7000_0000, width, 8192);
        let p = width.bytes();
        let module = image.emit_module("Geometry").unwrap();
        let int_descriptor = image
            .emit_type(&TypeRecord::structure("Int").with_parent(module))
            .unwrap();
        let point_descriptor = image
            .emit_type(
                &TypeRecord::structure("Point")
                    .with_parent(module)
                    .with_fields(&["x", "y"], 2),
            )
            .unwrap();
        let pair_descriptor = image
            .emit_type(
                &TypeRecord::structure("Pair")
                    .with_parent(module)
                    .with_generic(GenericSignature::new(2, 1)),
            )
            .unwrap();
        let shape = image.emit_protocol(&ProtocolRecord::new("Shape")).unwrap();
        let drawable = image.emit_protocol(&ProtocolRecord::new("Drawable")).unwrap();

        let word_layout = emit_layout(&mut image, p, p);
        let point_layout = emit_layout(&mut image, 2 * p, p);
        let int = image
            .emit_metadata(&[word_layout], &[kind(MetadataKind::Struct), int_descriptor])
            .unwrap();
        let point = image
            .emit_metadata(
                &[point_layout],
                &[kind(MetadataKind::Struct), point_descriptor, 0, p],
            )
            .unwrap();
        let pair_of_int = image
            .emit_metadata(
                &[point_layout],
                &[kind(MetadataKind::Struct), pair_descriptor, int],
            )
            .unwrap();

        let labels = image.emit_c_string("origin ").unwrap();
        let tuple = image
            .emit_metadata(
                &[point_layout],
                &[kind(MetadataKind::Tuple), 2, labels, point, 0, int, 2 * p],
            )
            .unwrap();
        let function_flags = FunctionTypeFlags::new()
            .with_num_parameters(2)
            .with_throws(true)
            .with_parameter_flags(true);
        let function = image
            .emit_metadata(
                &[word_layout],
                &[
                    kind(MetadataKind::Function),
                    function_flags.bits() as u64,
                    int,
                    point,
                    int,
                ],
            )
            .unwrap();
        // Parameter flags follow the parameters as 32-bit words.
        image.emit_u32(0).unwrap();
        image.emit_u32(ParameterFlags::IN_OUT.bits()).unwrap();

        let existential_flags = ExistentialTypeFlags::new()
            .with_class_constraint(ProtocolClassConstraint::Any)
            .with_num_witness_tables(2);
        let existential = image
            .emit_metadata(
                &[word_layout],
                &[
                    kind(MetadataKind::Existential),
                    existential_flags.bits() as u64,
                    2,
                    shape,
                    drawable,
                ],
            )
            .unwrap();
        let metatype = image
            .emit_metadata(&[word_layout], &[kind(MetadataKind::Metatype), existential])
            .unwrap();

        let conformance = image
            .emit_conformance(&ConformanceRecord::new(
                shape,
                TypeTarget::Descriptor(point_descriptor),
                WitnessSource::Table(vec![]),
            ))
            .unwrap();
        let conformances = image.emit_conformance_records(&[conformance]).unwrap();
        let protocols = image.emit_protocol_records(&[shape, drawable]).unwrap();

        Fixture {
            reader: SnapshotReader::from_image(&image.finish().unwrap()),
            int,
            point,
            pair_of_int,
            tuple,
            function,
            existential,
            metatype,
            conformances: (conformances.start, conformances.count),
            protocols: (protocols.start, protocols.count),
        }
    }

    #[test]
    fn test_snapshot_reads_inside_regions_only() {
        let reader = SnapshotReader::new(PointerWidth::Eight)
            .with_region(0x2000, vec![9; 16])
            .with_region(0x1000, 7u64.to_ne_bytes().to_vec());
        assert_eq!(reader.num_regions(), 2);
        assert_eq!(reader.read_u64(0x1000).unwrap(), 7);
        assert_eq!(reader.read_u8(0x200F).unwrap(), 9);
        assert_eq!(
            reader.read_u64(0x200C),
            Err(ReadError::Unreadable {
                address: 0x200C,
                size: 8
            })
        );
        assert!(reader.read_u8(0x1008).is_err());
        assert!(reader.read_u8(0xFFF).is_err());
    }

    #[test]
    fn test_region_at_top_of_address_space() {
        let base = u64::MAX - 7;
        let reader = SnapshotReader::new(PointerWidth::Eight).with_region(base, vec![b'a'; 8]);
        assert_eq!(reader.read_u8(u64::MAX).unwrap(), b'a');
        assert_eq!(reader.read_u64(base).unwrap(), u64::from_ne_bytes([b'a'; 8]));
        assert!(reader.read_u32(u64::MAX - 1).is_err());
        assert!(reader.read_u8(base - 1).is_err());
        assert!(matches!(
            reader.read_c_string(base + 4),
            Err(ReadError::Unreadable { .. })
        ));
        assert!(format!("{reader:?}").contains("0xfffffffffffffff8.."));
    }

    #[test]
    fn test_type_names_at_both_widths() {
        for width in [PointerWidth::Four, PointerWidth::Eight] {
            let fixture = build(width);
            let context = ReflectionContext::new(fixture.reader);
            assert_eq!(context.type_name(fixture.int).unwrap(), "Geometry.Int");
            assert_eq!(context.type_name(fixture.point).unwrap(), "Geometry.Point");
            assert_eq!(
                context.type_name(fixture.pair_of_int).unwrap(),
                "Geometry.Pair<Geometry.Int>"
            );
            assert_eq!(
                context.type_name(fixture.tuple).unwrap(),
                "(origin: Geometry.Point, Geometry.Int)"
            );
            assert_eq!(
                context.type_name(fixture.function).unwrap(),
                "(Geometry.Point, inout Geometry.Int) throws -> Geometry.Int"
            );
            assert_eq!(
                context.type_name(fixture.existential).unwrap(),
                "Shape & Drawable"
            );
            assert_eq!(
                context.type_name(fixture.metatype).unwrap(),
                "(Shape & Drawable).Type"
            );
        }
    }

    #[test]
    fn test_fields_and_layout() {
        let fixture = build(PointerWidth::Four);
        let context = ReflectionContext::new(fixture.reader);
        let fields = context.fields(fixture.point).unwrap();
        assert_eq!(
            fields,
            vec![
                FieldInfo {
                    name: "x".into(),
                    offset: Some(0)
                },
                FieldInfo {
                    name: "y".into(),
                    offset: Some(4)
                },
            ]
        );
        assert!(context.fields(fixture.tuple).unwrap().is_empty());
        let layout = context.metadata(fixture.point).unwrap().value_layout().unwrap();
        assert_eq!((layout.size, layout.stride), (8, 8));
        assert_eq!(peek_kind(context.reader(), fixture.tuple), Some(MetadataKind::Tuple));
    }

    #[test]
    fn test_section_listings() {
        let fixture = build(PointerWidth::Eight);
        let context = ReflectionContext::new(fixture.reader);
        let (start, count) = fixture.protocols;
        assert_eq!(context.protocol_names(start, count).unwrap(), vec!["Shape", "Drawable"]);
        let (start, count) = fixture.conformances;
        let listing = context.conformances(start, count).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].protocol, "Shape");
        assert_eq!(listing[0].type_name, "Geometry.Point");
    }

    #[test]
    fn test_unreadable_metadata_is_an_error() {
        let fixture = build(PointerWidth::Eight);
        let context = ReflectionContext::new(fixture.reader);
        assert!(matches!(
            context.type_name(0x10),
            Err(ReadError::Unreadable { .. })
        ));
    }
}
