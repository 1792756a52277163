//! Byte layout of the per-slot transform buffers.
//!
//! ```text
//! legacy uniform buffer     [obj 0 | pad][obj 1 | pad] ...      object_stride apart
//! instance storage buffer   [m0 m1 m2 .][m3 m4 . .] ...  x2     batches start aligned
//! view-proj uniform buffer  [vp 0 | pad][vp 1 | pad] ...        one block per batch
//! ```
//!
//! The storage buffer is twice the binding window: a batch may start
//! anywhere in the first half and the window bound at its offset must still
//! fit inside the buffer.

use crate::backend::{align_up, BackendLimits};
use crate::transforms::{ObjectTransform, ViewProjection, MODEL_MATRIX_SIZE};

/// Strides and alignments derived from device limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferLayout {
    /// Bytes between consecutive legacy blocks.
    pub object_stride: u64,
    /// Bytes between consecutive view-projection blocks.
    pub view_proj_stride: u64,
    /// Model-matrix entries an instanced batch start is aligned to.
    pub instance_alignment: usize,
    /// Largest `model[]` binding window, in entries.
    pub max_instances: usize,
    /// Most legacy blocks one buffer holds with every offset fitting a `u32`.
    pub max_objects: usize,
}

impl BufferLayout {
    /// Derives the layout from device limits.
    #[must_use]
    pub fn from_limits(limits: &BackendLimits) -> Self {
        let uniform_align = u64::from(limits.uniform_offset_alignment.max(1));
        let storage_align = u64::from(limits.storage_offset_alignment.max(1));

        #[allow(clippy::cast_possible_truncation)]
        let instance_alignment = (storage_align / MODEL_MATRIX_SIZE).max(1) as usize;
        #[allow(clippy::cast_possible_truncation)]
        let max_instances = (u64::from(limits.max_storage_binding_size) / MODEL_MATRIX_SIZE)
            .min(limits.max_buffer_size / (2 * MODEL_MATRIX_SIZE))
            as usize;

        let object_stride = align_up(ObjectTransform::SIZE, uniform_align);
        let max_objects = (limits.max_buffer_size / object_stride)
            .min(u64::from(u32::MAX) / object_stride + 1);

        Self {
            object_stride,
            view_proj_stride: align_up(ViewProjection::SIZE, uniform_align),
            instance_alignment,
            max_instances: max_instances - max_instances % instance_alignment,
            max_objects: usize::try_from(max_objects).unwrap_or(usize::MAX),
        }
    }

    /// [`Self::object_stride`] as `usize`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn object_stride_bytes(&self) -> usize {
        self.object_stride as usize
    }

    /// [`Self::view_proj_stride`] as `usize`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn view_proj_stride_bytes(&self) -> usize {
        self.view_proj_stride as usize
    }

    /// Rounds an instance count up to the batch alignment (at least one batch).
    #[inline]
    #[must_use]
    pub const fn align_instances(&self, count: usize) -> usize {
        let count = if count == 0 { 1 } else { count };
        count.next_multiple_of(self.instance_alignment)
    }

    /// View-projection blocks needed for an instance capacity.
    ///
    /// Every non-empty batch starts on an aligned entry, so a capacity of
    /// `n` entries holds at most `n / instance_alignment` batches.
    #[inline]
    #[must_use]
    pub const fn view_proj_blocks(&self, instances: usize) -> usize {
        let blocks = instances / self.instance_alignment;
        if blocks == 0 {
            1
        } else {
            blocks
        }
    }

    /// Size of the legacy uniform buffer for `objects` blocks.
    #[inline]
    #[must_use]
    pub const fn object_buffer_size(&self, objects: usize) -> u64 {
        self.object_stride * objects as u64
    }

    /// Size of the storage buffer for an instance capacity.
    #[inline]
    #[must_use]
    pub const fn model_buffer_size(&self, instances: usize) -> u64 {
        2 * self.model_window(instances)
    }

    /// Bytes of `model[]` visible through one binding.
    #[inline]
    #[must_use]
    pub const fn model_window(&self, instances: usize) -> u64 {
        MODEL_MATRIX_SIZE * instances as u64
    }

    /// Size of the view-projection uniform buffer for an instance capacity.
    #[inline]
    #[must_use]
    pub const fn view_proj_buffer_size(&self, instances: usize) -> u64 {
        self.view_proj_stride * self.view_proj_blocks(instances) as u64
    }
}
