//! Type metadata records
//!
//! A metadata record starts with a kind word. Everything after it depends on
//! the kind, and the word before it points at the type's value witness
//! table.
//!
//! ```text
//!            ┌───────────────────────────┐
//!  -1 word   │ &ValueWitnessTable        │
//!            ├───────────────────────────┤  ← address point
//!   0        │ kind (or class isa)       │
//!   1..      │ kind-specific fields      │
//!            └───────────────────────────┘
//! ```
//!
//! [`Metadata`] is the in-process record, used as `&'static Metadata`.
//! [`MetadataView`] decodes any record through a [`MemoryReader`] into one
//! variant per kind, so the same accessors work on this process and on a
//! remote one.

mod class;
mod foreign;
mod heap;
mod structural;
mod value;

pub use class::{ClassLayout, ClassMetadata, ObjCClassWrapperMetadata};
pub use foreign::{ForeignCacheValue, ForeignClassMetadata, ForeignTypeHeader};
pub use heap::{ErrorObjectMetadata, GenericBoxMetadata, HeapLocalVariableMetadata};
pub use structural::{
    ExistentialMetadata, ExistentialMetatypeMetadata, ExistentialRepresentation,
    FunctionMetadata, MetatypeMetadata, TupleElement, TupleMetadata,
};
pub use value::{EnumMetadata, StructMetadata};

use crate::abi::{MetadataKind, ValueWitnessFlags};
use crate::descriptor::TypeContextDescriptor;
use crate::error::ReadResult;
use crate::pointer::reader::IN_PROCESS;
use crate::pointer::{Address, InProcessReader, MemoryReader};
use crate::witness::{
    EnumValueWitnessTable, ExtraInhabitantsValueWitnessTable, OpaqueValue, TypeLayout, ValueBuffer,
    ValueWitnessTable,
};
use std::fmt;
use std::hash::{Hash, Hasher};

/// The common header of every in-process metadata record
#[repr(C)]
pub struct Metadata {
    kind: usize,
}

impl Metadata {
    /// A header with the given kind
    pub const fn new(kind: MetadataKind) -> Self {
        Metadata {
            kind: kind.raw() as usize,
        }
    }

    /// Reinterpret an address as a metadata record.
    ///
    /// # Safety
    ///
    /// `address` must point at a metadata record that lives for the rest of
    /// the process, preceded by its value witness table pointer.
    pub unsafe fn from_address(address: Address) -> &'static Metadata {
        &*(address as usize as *const Metadata)
    }

    /// Kind of the record
    pub fn kind(&self) -> MetadataKind {
        MetadataKind::from_raw(self.kind as u64)
    }

    /// Address of the record
    pub fn address(&self) -> Address {
        self as *const Self as usize as Address
    }

    /// The value witness table stored before the address point
    pub fn value_witnesses(&self) -> &'static ValueWitnessTable {
        // SAFETY: every record is allocated as full metadata.
        unsafe { *(self as *const Self as *const &'static ValueWitnessTable).sub(1) }
    }

    /// Decode the record by kind
    pub fn view(&'static self) -> MetadataView<'static, InProcessReader> {
        MetadataView::from_kind(RawMetadata::new(&IN_PROCESS, self.address()), self.kind())
    }

    /// The nominal type descriptor, for struct, enum, optional and class
    /// metadata. A record whose descriptor cannot be read also gives `None`.
    pub fn type_context_descriptor(
        &'static self,
    ) -> Option<TypeContextDescriptor<'static, InProcessReader>> {
        self.view().type_context_descriptor().ok().flatten()
    }

    /// Generic arguments of a nominal type, `None` if it has none.
    ///
    /// A descriptor that cannot be read is an error, not a non-generic type.
    pub fn generic_arguments(&'static self) -> ReadResult<Option<Vec<&'static Metadata>>> {
        let Some(arguments) = self.view().generic_arguments()? else {
            return Ok(None);
        };
        // SAFETY: generic argument slots hold metadata pointers.
        Ok(Some(
            arguments
                .into_iter()
                .map(|address| unsafe { Metadata::from_address(address) })
                .collect(),
        ))
    }

    /// Layout words of the value witness table
    pub fn type_layout(&self) -> TypeLayout {
        self.value_witnesses().type_layout()
    }

    /// Size of a value
    pub fn vw_size(&self) -> usize {
        self.value_witnesses().size
    }

    /// Stride of a value
    pub fn vw_stride(&self) -> usize {
        self.value_witnesses().stride
    }

    /// Alignment of a value
    pub fn vw_alignment(&self) -> usize {
        self.value_witnesses().alignment()
    }

    /// Witness flags
    pub fn vw_flags(&self) -> ValueWitnessFlags {
        self.value_witnesses().flags
    }

    /// The extra inhabitant table, if the type has one
    pub fn extra_inhabitant_witnesses(&self) -> Option<&'static ExtraInhabitantsValueWitnessTable> {
        self.value_witnesses().extra_inhabitants()
    }

    /// The enum table, if the type has one
    pub fn enum_witnesses(&self) -> Option<&'static EnumValueWitnessTable> {
        self.value_witnesses().enum_witnesses()
    }

    /// Copy the value held by `src` into the uninitialized buffer `dest`
    ///
    /// # Safety
    ///
    /// `src` must hold a value of this type and `dest` must be uninitialized.
    pub unsafe fn vw_initialize_buffer_with_copy_of_buffer(
        &self,
        dest: *mut ValueBuffer,
        src: *mut ValueBuffer,
    ) -> *mut OpaqueValue {
        (self.value_witnesses().initialize_buffer_with_copy_of_buffer)(dest, src, self)
    }

    /// Destroy a value
    ///
    /// # Safety
    ///
    /// `value` must be an initialized value of this type.
    pub unsafe fn vw_destroy(&self, value: *mut OpaqueValue) {
        (self.value_witnesses().destroy)(value, self)
    }

    /// Copy-initialize `dest` from `src`
    ///
    /// # Safety
    ///
    /// `src` must be initialized and `dest` uninitialized storage for this type.
    pub unsafe fn vw_initialize_with_copy(
        &self,
        dest: *mut OpaqueValue,
        src: *mut OpaqueValue,
    ) -> *mut OpaqueValue {
        (self.value_witnesses().initialize_with_copy)(dest, src, self)
    }

    /// Copy-assign `src` over `dest`
    ///
    /// # Safety
    ///
    /// Both values must be initialized values of this type.
    pub unsafe fn vw_assign_with_copy(&self, dest: *mut OpaqueValue, src: *mut OpaqueValue) -> *mut OpaqueValue {
        (self.value_witnesses().assign_with_copy)(dest, src, self)
    }

    /// Move-initialize `dest` from `src`
    ///
    /// # Safety
    ///
    /// `src` must be initialized and is left uninitialized; `dest` must be
    /// uninitialized.
    pub unsafe fn vw_initialize_with_take(
        &self,
        dest: *mut OpaqueValue,
        src: *mut OpaqueValue,
    ) -> *mut OpaqueValue {
        (self.value_witnesses().initialize_with_take)(dest, src, self)
    }

    /// Move-assign `src` over `dest`
    ///
    /// # Safety
    ///
    /// Both values must be initialized; `src` is left uninitialized.
    pub unsafe fn vw_assign_with_take(&self, dest: *mut OpaqueValue, src: *mut OpaqueValue) -> *mut OpaqueValue {
        (self.value_witnesses().assign_with_take)(dest, src, self)
    }

    /// Store extra inhabitant `index` into `dest`
    ///
    /// # Safety
    ///
    /// The type must have extra inhabitant witnesses (checked only by a debug
    /// assertion) and `dest` must be storage for this type.
    pub unsafe fn vw_store_extra_inhabitant(&self, dest: *mut OpaqueValue, index: i32) {
        let table = self.value_witnesses().extra_inhabitants_unchecked();
        (table.store_extra_inhabitant)(dest, index, self)
    }

    /// Extra inhabitant index of `src`, or -1
    ///
    /// # Safety
    ///
    /// The type must have extra inhabitant witnesses (checked only by a debug
    /// assertion) and `src` must hold a bit pattern of this type.
    pub unsafe fn vw_get_extra_inhabitant_index(&self, src: *const OpaqueValue) -> i32 {
        let table = self.value_witnesses().extra_inhabitants_unchecked();
        (table.get_extra_inhabitant_index)(src, self)
    }

    /// Case tag of an enum value
    ///
    /// # Safety
    ///
    /// The type must have enum witnesses (checked only by a debug assertion).
    pub unsafe fn vw_get_enum_tag(&self, src: *const OpaqueValue) -> i32 {
        let table = self.value_witnesses().enum_witnesses_unchecked();
        (table.get_enum_tag)(src, self)
    }

    /// Strip an enum value down to its payload
    ///
    /// # Safety
    ///
    /// The type must have enum witnesses (checked only by a debug assertion).
    pub unsafe fn vw_destructive_project_enum_data(&self, value: *mut OpaqueValue) {
        let table = self.value_witnesses().enum_witnesses_unchecked();
        (table.destructive_project_enum_data)(value, self)
    }

    /// Turn a payload into an enum value of case `tag`
    ///
    /// # Safety
    ///
    /// The type must have enum witnesses (checked only by a debug assertion).
    pub unsafe fn vw_destructive_inject_enum_tag(&self, value: *mut OpaqueValue, tag: u32) {
        let table = self.value_witnesses().enum_witnesses_unchecked();
        (table.destructive_inject_enum_tag)(value, tag, self)
    }
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for Metadata {}

impl Hash for Metadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Metadata({} @ {:#x})", self.kind(), self.address())
    }
}

/// An undecoded record in some address space
pub struct RawMetadata<'r, R> {
    reader: &'r R,
    address: Address,
}

impl<'r, R> Clone for RawMetadata<'r, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'r, R> Copy for RawMetadata<'r, R> {}

impl<'r, R> fmt::Debug for RawMetadata<'r, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawMetadata({:#x})", self.address)
    }
}

/// Value layout read out of a value witness table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLayout {
    /// Size in bytes
    pub size: u64,
    /// Stride in bytes
    pub stride: u64,
    /// Witness flags
    pub flags: ValueWitnessFlags,
    /// Extra inhabitant count
    pub num_extra_inhabitants: u32,
}

impl<'r, R: MemoryReader> RawMetadata<'r, R> {
    /// A record at `address`
    pub fn new(reader: &'r R, address: Address) -> Self {
        Self { reader, address }
    }

    /// The reader
    pub fn reader(&self) -> &'r R {
        self.reader
    }

    /// Address point of the record
    pub fn address(&self) -> Address {
        self.address
    }

    /// Target pointer size
    pub fn pointer_size(&self) -> u64 {
        self.reader.pointer_size()
    }

    /// Address of word `index` relative to the address point
    pub fn word_address(&self, index: i64) -> Address {
        self.reader.word_address(self.address, index)
    }

    /// Word `index` relative to the address point
    pub fn word(&self, index: i64) -> ReadResult<u64> {
        self.reader.read_word(self.word_address(index))
    }

    /// Address `offset` bytes from the address point
    pub fn field(&self, offset: i64) -> Address {
        self.address.wrapping_add_signed(offset)
    }

    /// The raw kind word
    pub fn kind_word(&self) -> ReadResult<u64> {
        self.word(0)
    }

    /// Address of the value witness table
    pub fn value_witnesses(&self) -> ReadResult<Address> {
        self.word(-1)
    }

    /// Layout fields of the value witness table
    pub fn value_layout(&self) -> ReadResult<ValueLayout> {
        let table = self.value_witnesses()?;
        let p = self.pointer_size();
        let size = self.reader.read_word(table + 6 * p)?;
        let flags = ValueWitnessFlags::from_bits(self.reader.read_word(table + 7 * p)? as usize);
        let stride = self.reader.read_word(table + 8 * p)?;
        let num_extra_inhabitants = if flags.has_extra_inhabitants() {
            (self.reader.read_word(table + 9 * p)? & 0x7FFF_FFFF) as u32
        } else {
            0
        };
        Ok(ValueLayout {
            size,
            stride,
            flags,
            num_extra_inhabitants,
        })
    }

    /// Decode by reading the kind word
    pub fn decode(self) -> ReadResult<MetadataView<'r, R>> {
        let kind = MetadataKind::from_raw(self.kind_word()?);
        Ok(MetadataView::from_kind(self, kind))
    }
}

/// Shared shape of every per-kind view: a typed wrapper over [`RawMetadata`]
macro_rules! metadata_view {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name<'r, R> {
            raw: crate::metadata::RawMetadata<'r, R>,
        }

        impl<'r, R> Clone for $name<'r, R> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<'r, R> Copy for $name<'r, R> {}

        impl<'r, R> std::fmt::Debug for $name<'r, R>
        where
            R: crate::pointer::MemoryReader,
        {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.raw.address())
            }
        }

        impl<'r, R: crate::pointer::MemoryReader> $name<'r, R> {
            /// Wrap a record already known to have this kind
            pub fn new(raw: crate::metadata::RawMetadata<'r, R>) -> Self {
                Self { raw }
            }

            /// The undecoded record
            pub fn raw(&self) -> crate::metadata::RawMetadata<'r, R> {
                self.raw
            }

            /// Address point of the record
            pub fn address(&self) -> crate::pointer::Address {
                self.raw.address()
            }
        }
    };
}
pub(crate) use metadata_view;

metadata_view!(
    /// Metadata of a builtin opaque type
    OpaqueMetadata
);

/// A metadata record decoded by kind
pub enum MetadataView<'r, R> {
    /// Class
    Class(ClassMetadata<'r, R>),
    /// Struct
    Struct(StructMetadata<'r, R>),
    /// Enum
    Enum(EnumMetadata<'r, R>),
    /// The optional enum
    Optional(EnumMetadata<'r, R>),
    /// Foreign class
    ForeignClass(ForeignClassMetadata<'r, R>),
    /// Builtin opaque type
    Opaque(OpaqueMetadata<'r, R>),
    /// Tuple
    Tuple(TupleMetadata<'r, R>),
    /// Function
    Function(FunctionMetadata<'r, R>),
    /// Existential
    Existential(ExistentialMetadata<'r, R>),
    /// Metatype
    Metatype(MetatypeMetadata<'r, R>),
    /// Wrapper around a foreign class object
    ObjCClassWrapper(ObjCClassWrapperMetadata<'r, R>),
    /// Existential metatype
    ExistentialMetatype(ExistentialMetatypeMetadata<'r, R>),
    /// Heap local variable box
    HeapLocalVariable(HeapLocalVariableMetadata<'r, R>),
    /// Generic heap box
    HeapGenericLocalVariable(GenericBoxMetadata<'r, R>),
    /// Boxed error
    ErrorObject(ErrorObjectMetadata<'r, R>),
    /// A kind this runtime does not know
    Unknown {
        /// The raw kind
        kind: u32,
        /// The record
        raw: RawMetadata<'r, R>,
    },
}

impl<'r, R> Clone for MetadataView<'r, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'r, R> Copy for MetadataView<'r, R> {}

impl<'r, R: MemoryReader> fmt::Debug for MetadataView<'r, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetadataView({} @ {:#x})", self.kind(), self.address())
    }
}

impl<'r, R: MemoryReader> MetadataView<'r, R> {
    /// Read and decode the record at `address`
    pub fn read(reader: &'r R, address: Address) -> ReadResult<Self> {
        RawMetadata::new(reader, address).decode()
    }

    fn from_kind(raw: RawMetadata<'r, R>, kind: MetadataKind) -> Self {
        match kind {
            MetadataKind::Class => MetadataView::Class(ClassMetadata::new(raw)),
            MetadataKind::Struct => MetadataView::Struct(StructMetadata::new(raw)),
            MetadataKind::Enum => MetadataView::Enum(EnumMetadata::new(raw)),
            MetadataKind::Optional => MetadataView::Optional(EnumMetadata::new(raw)),
            MetadataKind::ForeignClass => MetadataView::ForeignClass(ForeignClassMetadata::new(raw)),
            MetadataKind::Opaque => MetadataView::Opaque(OpaqueMetadata::new(raw)),
            MetadataKind::Tuple => MetadataView::Tuple(TupleMetadata::new(raw)),
            MetadataKind::Function => MetadataView::Function(FunctionMetadata::new(raw)),
            MetadataKind::Existential => MetadataView::Existential(ExistentialMetadata::new(raw)),
            MetadataKind::Metatype => MetadataView::Metatype(MetatypeMetadata::new(raw)),
            MetadataKind::ObjCClassWrapper => {
                MetadataView::ObjCClassWrapper(ObjCClassWrapperMetadata::new(raw))
            }
            MetadataKind::ExistentialMetatype => {
                MetadataView::ExistentialMetatype(ExistentialMetatypeMetadata::new(raw))
            }
            MetadataKind::HeapLocalVariable => {
                MetadataView::HeapLocalVariable(HeapLocalVariableMetadata::new(raw))
            }
            MetadataKind::HeapGenericLocalVariable => {
                MetadataView::HeapGenericLocalVariable(GenericBoxMetadata::new(raw))
            }
            MetadataKind::ErrorObject => MetadataView::ErrorObject(ErrorObjectMetadata::new(raw)),
            MetadataKind::Unknown(kind) => MetadataView::Unknown { kind, raw },
        }
    }

    /// The undecoded record
    pub fn raw(&self) -> RawMetadata<'r, R> {
        match self {
            MetadataView::Class(view) => view.raw(),
            MetadataView::Struct(view) => view.raw(),
            MetadataView::Enum(view) | MetadataView::Optional(view) => view.raw(),
            MetadataView::ForeignClass(view) => view.raw(),
            MetadataView::Opaque(view) => view.raw(),
            MetadataView::Tuple(view) => view.raw(),
            MetadataView::Function(view) => view.raw(),
            MetadataView::Existential(view) => view.raw(),
            MetadataView::Metatype(view) => view.raw(),
            MetadataView::ObjCClassWrapper(view) => view.raw(),
            MetadataView::ExistentialMetatype(view) => view.raw(),
            MetadataView::HeapLocalVariable(view) => view.raw(),
            MetadataView::HeapGenericLocalVariable(view) => view.raw(),
            MetadataView::ErrorObject(view) => view.raw(),
            MetadataView::Unknown { raw, .. } => *raw,
        }
    }

    /// Address point of the record
    pub fn address(&self) -> Address {
        self.raw().address()
    }

    /// Kind of the record
    pub fn kind(&self) -> MetadataKind {
        match self {
            MetadataView::Class(_) => MetadataKind::Class,
            MetadataView::Struct(_) => MetadataKind::Struct,
            MetadataView::Enum(_) => MetadataKind::Enum,
            MetadataView::Optional(_) => MetadataKind::Optional,
            MetadataView::ForeignClass(_) => MetadataKind::ForeignClass,
            MetadataView::Opaque(_) => MetadataKind::Opaque,
            MetadataView::Tuple(_) => MetadataKind::Tuple,
            MetadataView::Function(_) => MetadataKind::Function,
            MetadataView::Existential(_) => MetadataKind::Existential,
            MetadataView::Metatype(_) => MetadataKind::Metatype,
            MetadataView::ObjCClassWrapper(_) => MetadataKind::ObjCClassWrapper,
            MetadataView::ExistentialMetatype(_) => MetadataKind::ExistentialMetatype,
            MetadataView::HeapLocalVariable(_) => MetadataKind::HeapLocalVariable,
            MetadataView::HeapGenericLocalVariable(_) => MetadataKind::HeapGenericLocalVariable,
            MetadataView::ErrorObject(_) => MetadataKind::ErrorObject,
            MetadataView::Unknown { kind, .. } => MetadataKind::Unknown(*kind),
        }
    }

    /// Nominal type descriptor of class, struct, enum, optional and foreign
    /// class metadata
    pub fn type_context_descriptor(&self) -> ReadResult<Option<TypeContextDescriptor<'r, R>>> {
        match self {
            MetadataView::Class(class) => class.descriptor(),
            MetadataView::Struct(value) => value.descriptor().map(Some),
            MetadataView::Enum(value) | MetadataView::Optional(value) => value.descriptor().map(Some),
            MetadataView::ForeignClass(foreign) => foreign.descriptor(),
            _ => Ok(None),
        }
    }

    /// Offset in words of the generic argument vector, for generic nominal types
    pub fn generic_argument_offset(&self) -> ReadResult<Option<u64>> {
        match self {
            MetadataView::Class(class) => class.generic_argument_offset(),
            MetadataView::Struct(_) | MetadataView::Enum(_) | MetadataView::Optional(_) => {
                let Some(descriptor) = self.type_context_descriptor()? else {
                    return Ok(None);
                };
                Ok(descriptor
                    .generic_header()?
                    .map(|header| header.argument_offset as u64))
            }
            _ => Ok(None),
        }
    }

    /// Type metadata among the generic arguments, in parameter order.
    ///
    /// `None` for non-generic types, non-nominal kinds and artificial
    /// subclasses.
    pub fn generic_arguments(&self) -> ReadResult<Option<Vec<Address>>> {
        let Some(offset) = self.generic_argument_offset()? else {
            return Ok(None);
        };
        let Some(descriptor) = self.type_context_descriptor()? else {
            return Ok(None);
        };
        let Some(context) = descriptor.generic_context()? else {
            return Ok(None);
        };
        let count = context
            .params()?
            .iter()
            .filter(|param| param.has_key_argument())
            .count() as i64;
        let raw = self.raw();
        let mut arguments = Vec::with_capacity(count as usize);
        for i in 0..count {
            arguments.push(raw.word(offset as i64 + i)?);
        }
        Ok(Some(arguments))
    }

    /// Layout fields of the value witness table
    pub fn value_layout(&self) -> ReadResult<ValueLayout> {
        self.raw().value_layout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::witness::builtin;

    #[test]
    fn test_metadata_identity() {
        let a = builtin::int32();
        let b = builtin::int32();
        assert_eq!(a, b);
        assert_ne!(a, builtin::int64());
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_unreadable_descriptor_is_not_non_generic() {
        let block: &'static [usize] = Box::leak(Box::new([
            &crate::witness::builtin::INT64_WITNESSES as *const _ as usize,
            MetadataKind::Struct.raw() as usize,
            0,
        ]));
        let metadata = unsafe { Metadata::from_address(&block[1] as *const usize as Address) };
        assert_eq!(
            metadata.generic_arguments(),
            Err(crate::error::ReadError::NullReference(&block[2] as *const usize as Address))
        );
        assert!(metadata.type_context_descriptor().is_none());
    }

    #[test]
    fn test_view_of_builtin() {
        let view = builtin::int64().view();
        assert!(matches!(view, MetadataView::Opaque(_)));
        assert_eq!(view.kind(), MetadataKind::Opaque);
        assert!(view.type_context_descriptor().unwrap().is_none());
        assert!(view.generic_arguments().unwrap().is_none());
        assert!(builtin::int64().generic_arguments().unwrap().is_none());

        let layout = view.value_layout().unwrap();
        assert_eq!(layout.size, 8);
        assert_eq!(layout.stride, 8);
        assert_eq!(layout.num_extra_inhabitants, 0);
    }

    #[test]
    fn test_unknown_kind_decodes() {
        #[repr(C)]
        struct Record {
            witnesses: &'static ValueWitnessTable,
            kind: usize,
        }
        let record = Record {
            witnesses: &builtin::INT8_WITNESSES,
            kind: 300,
        };
        let address = &record.kind as *const usize as Address;
        let view = MetadataView::read(&IN_PROCESS, address).unwrap();
        match view {
            MetadataView::Unknown { kind, .. } => assert_eq!(kind, 300),
            other => panic!("expected unknown, got {:?}", other),
        }
        assert!(!view.kind().is_any_class());
        assert!(!view.kind().is_any_existential());
    }

    #[test]
    fn test_pointer_layout_reports_inhabitants() {
        let layout = builtin::raw_pointer().view().value_layout().unwrap();
        assert_eq!(layout.num_extra_inhabitants, 4096);
        assert!(layout.flags.has_extra_inhabitants());
    }

    #[test]
    fn test_extra_inhabitant_forwarders() {
        let pointer = builtin::raw_pointer();
        let mut slot: usize = 0;
        let value = &mut slot as *mut usize as *mut OpaqueValue;
        unsafe {
            pointer.vw_store_extra_inhabitant(value, 3);
            assert_eq!(pointer.vw_get_extra_inhabitant_index(value), 3);
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "no enum witnesses")]
    fn test_enum_forwarder_rejects_non_enum() {
        let value: u64 = 0;
        unsafe {
            builtin::int64().vw_get_enum_tag(&value as *const u64 as *const OpaqueValue);
        }
    }
}
