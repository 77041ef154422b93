//! Runtime layout of structs, tuples and class instances
//!
//! The universal layout places fields in declaration order, each at the
//! next offset aligned for it. The aggregate's alignment is the largest
//! field alignment, it is POD or bitwise-takable only if every field is,
//! and it borrows the extra inhabitants of its first field.

use super::alloc::leak;
use super::MetadataRuntime;
use crate::abi::{
    ExtraInhabitantFlags, LayoutAlgorithm, StructLayoutFlags, ValueWitnessFlags,
};
use crate::error::ReadResult;
use crate::metadata::{ClassLayout, ClassMetadata, Metadata, RawMetadata};
use crate::pointer::reader::IN_PROCESS;
use crate::witness::{
    stride_for, value_fits_inline, ExtraInhabitantsValueWitnessTable, TypeLayout,
    ValueWitnessTable,
};
use std::mem::size_of;
use tracing::debug;

const WORD: usize = size_of::<usize>();

/// Bytes of the header every heap object starts with
pub const HEAP_OBJECT_HEADER_SIZE: usize = 2 * WORD;

/// Result of laying out a sequence of fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicLayout {
    /// Layout of the aggregate
    pub layout: TypeLayout,
    /// Offset of each field
    pub offsets: Vec<usize>,
}

fn align_to(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Lay out `fields` starting at offset zero
pub fn perform_basic_layout(fields: &[TypeLayout]) -> BasicLayout {
    let mut offset = 0;
    let mut alignment = 1;
    let mut pod = true;
    let mut bitwise_takable = true;
    let mut offsets = Vec::with_capacity(fields.len());

    for field in fields {
        let field_alignment = field.alignment();
        offset = align_to(offset, field_alignment);
        offsets.push(offset);
        offset += field.size;
        alignment = alignment.max(field_alignment);
        pod &= field.flags.is_pod();
        bitwise_takable &= field.flags.is_bitwise_takable();
    }

    let extra_inhabitants = fields.first().map_or(0, TypeLayout::num_extra_inhabitants);
    let flags = ValueWitnessFlags::new()
        .with_alignment(alignment)
        .with_pod(pod)
        .with_bitwise_takable(bitwise_takable)
        .with_inline_storage(value_fits_inline(offset, alignment) && bitwise_takable)
        .with_extra_inhabitants(extra_inhabitants > 0);

    BasicLayout {
        layout: TypeLayout {
            size: offset,
            flags,
            stride: stride_for(offset, alignment),
            extra_inhabitant_flags: ExtraInhabitantFlags::new()
                .with_num_extra_inhabitants(extra_inhabitants),
        },
        offsets,
    }
}

/// A copy of `witnesses` with its layout words replaced by `layout`.
///
/// The extra inhabitant witnesses are kept only if `witnesses` has them and
/// the new layout still has extra inhabitants.
pub(crate) fn retarget_witnesses(
    witnesses: &ValueWitnessTable,
    layout: &TypeLayout,
) -> &'static ValueWitnessTable {
    let base = ValueWitnessTable {
        size: layout.size,
        flags: layout.flags,
        stride: layout.stride,
        ..*witnesses
    };
    match witnesses.extra_inhabitants() {
        Some(xi) if layout.num_extra_inhabitants() > 0 => {
            let table = leak(ExtraInhabitantsValueWitnessTable {
                base,
                extra_inhabitant_flags: layout.extra_inhabitant_flags,
                ..*xi
            });
            &table.base
        }
        _ => {
            let mut base = base;
            base.flags = base.flags.with_extra_inhabitants(false);
            leak(base)
        }
    }
}

/// Replace the value witness pointer of metadata that is not yet published
///
/// # Safety
///
/// `metadata` must be runtime-allocated and not yet visible to other threads.
unsafe fn install_witnesses(metadata: &'static Metadata, witnesses: &'static ValueWitnessTable) {
    let slot = (metadata as *const Metadata as *mut *const ValueWitnessTable).sub(1);
    *slot = witnesses;
}

/// Write `offsets` into the metadata word vector starting at `start`
///
/// # Safety
///
/// The vector must lie inside `metadata`'s allocation.
unsafe fn write_offsets(metadata: &'static Metadata, start: usize, offsets: &[usize]) {
    let words = (metadata as *const Metadata as *mut usize).add(start);
    for (i, offset) in offsets.iter().enumerate() {
        *words.add(i) = *offset;
    }
}

impl MetadataRuntime {
    /// Compute the layout of a struct instance from its field layouts.
    ///
    /// Installs a value witness table with the computed layout (keeping the
    /// struct's witness functions) and fills the field offset vector the
    /// descriptor declares. Meant to run from a pattern initializer, before
    /// the metadata is published.
    ///
    /// # Safety
    ///
    /// `metadata` must be runtime-allocated struct metadata that no other
    /// thread can see yet.
    pub unsafe fn init_struct_metadata(
        &self,
        metadata: &'static Metadata,
        flags: StructLayoutFlags,
        fields: &[TypeLayout],
    ) -> ReadResult<Vec<usize>> {
        debug_assert!(
            matches!(flags.algorithm(), LayoutAlgorithm::Swift5),
            "unsupported struct layout algorithm"
        );
        let BasicLayout { layout, offsets } = perform_basic_layout(fields);
        install_witnesses(metadata, retarget_witnesses(metadata.value_witnesses(), &layout));

        if let Some(descriptor) = metadata.type_context_descriptor() {
            let vector = descriptor.field_offset_vector_offset()? as usize;
            if vector != 0 {
                write_offsets(metadata, vector, &offsets);
            }
        }
        debug!(
            metadata = metadata.address(),
            size = layout.size,
            alignment = layout.alignment(),
            "initialized struct layout"
        );
        Ok(offsets)
    }

    /// Lay out the stored properties a class adds to its superclass.
    ///
    /// Fields start after the superclass's instance (or the heap object
    /// header for a root class). Writes the instance size and alignment
    /// mask and the class's field offset vector.
    ///
    /// # Safety
    ///
    /// `class` must be runtime-allocated class metadata that no other
    /// thread can see yet.
    pub unsafe fn init_class_metadata(
        &self,
        class: &'static Metadata,
        fields: &[TypeLayout],
    ) -> ReadResult<Vec<usize>> {
        let view = ClassMetadata::new(RawMetadata::new(&IN_PROCESS, class.address()));
        let (mut offset, mut align_mask) = match view.superclass_metadata()? {
            Some(superclass) => (
                superclass.instance_size()? as usize,
                superclass.instance_align_mask()? as usize,
            ),
            None => (HEAP_OBJECT_HEADER_SIZE, WORD - 1),
        };

        let mut offsets = Vec::with_capacity(fields.len());
        for field in fields {
            offset = align_to(offset, field.alignment());
            offsets.push(offset);
            offset += field.size;
            align_mask = align_mask.max(field.flags.alignment_mask());
        }

        let layout = ClassLayout::native();
        let base = class as *const Metadata as *mut u8;
        *base.add(layout.instance_size() as usize).cast::<u32>() = offset as u32;
        *base.add(layout.instance_align_mask() as usize).cast::<u16>() = align_mask as u16;

        if let Some(descriptor) = view.descriptor()? {
            let vector = descriptor.field_offset_vector_offset()? as usize;
            if vector != 0 {
                let start = vector + view.resilient_adjustment(&descriptor)? as usize;
                write_offsets(class, start, &offsets);
            }
        }
        debug!(
            class = class.address(),
            instance_size = offset,
            "initialized class layout"
        );
        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::witness::builtin;

    #[test]
    fn test_basic_layout_pads_fields() {
        let fields = [
            builtin::int8().type_layout(),
            builtin::int32().type_layout(),
            builtin::int16().type_layout(),
        ];
        let BasicLayout { layout, offsets } = perform_basic_layout(&fields);
        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(layout.size, 10);
        assert_eq!(layout.alignment(), 4);
        assert_eq!(layout.stride, 12);
        assert!(layout.flags.is_pod());
        assert!(layout.flags.is_inline_storage());
        assert_eq!(layout.num_extra_inhabitants(), 0);
    }

    #[test]
    fn test_first_field_extra_inhabitants_carry_over() {
        let fields = [
            builtin::native_object().type_layout(),
            builtin::int8().type_layout(),
        ];
        let BasicLayout { layout, .. } = perform_basic_layout(&fields);
        assert!(!layout.flags.is_pod());
        assert_eq!(
            layout.num_extra_inhabitants(),
            builtin::native_object().value_witnesses().num_extra_inhabitants()
        );

        let swapped = perform_basic_layout(&[fields[1], fields[0]]);
        assert_eq!(swapped.layout.num_extra_inhabitants(), 0);
    }

    #[test]
    fn test_large_aggregate_is_out_of_line() {
        let int64 = builtin::int64().type_layout();
        let BasicLayout { layout, .. } = perform_basic_layout(&[int64; 4]);
        assert_eq!(layout.size, 32);
        assert!(!layout.flags.is_inline_storage());
    }

    #[test]
    fn test_empty_layout() {
        let BasicLayout { layout, offsets } = perform_basic_layout(&[]);
        assert!(offsets.is_empty());
        assert_eq!(layout.size, 0);
        assert_eq!(layout.stride, 1);
    }

    #[test]
    fn test_retarget_drops_unavailable_extra_inhabitants() {
        let layout = perform_basic_layout(&[builtin::int8().type_layout()]).layout;
        let table = retarget_witnesses(builtin::native_object().value_witnesses(), &layout);
        assert_eq!(table.size, 1);
        assert!(table.extra_inhabitants().is_none());
    }
}
