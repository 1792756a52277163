//! Per-slot CPU staging.
//!
//! Regions are packed at their final GPU offsets so a flush is one
//! contiguous `write_buffer` per buffer.

use orrery_core::math::Mat4;

use super::data::{ObjectTransform, ViewProjection};
use super::layout::BufferLayout;

#[derive(Debug, Default)]
pub(crate) struct SlotStaging {
    /// Legacy blocks, `object_stride` apart.
    pub objects: Vec<u8>,
    pub object_count: usize,
    /// Model matrices including alignment padding between batches.
    pub models: Vec<Mat4>,
    /// View-projection blocks, `view_proj_stride` apart.
    pub view_proj: Vec<u8>,
    pub batch_count: usize,
    pub flushed: bool,
}

impl SlotStaging {
    pub fn with_capacity(layout: &BufferLayout, objects: usize, instances: usize) -> Self {
        let mut staging = Self::default();
        staging.reserve(layout, objects, instances);
        staging
    }

    /// Grows the backing storage, keeping staged content.
    pub fn reserve(&mut self, layout: &BufferLayout, objects: usize, instances: usize) {
        let object_bytes = objects * layout.object_stride_bytes();
        self.objects
            .reserve(object_bytes.saturating_sub(self.objects.len()));
        self.models
            .reserve(instances.saturating_sub(self.models.len()));
        let block_bytes = layout.view_proj_blocks(instances) * layout.view_proj_stride_bytes();
        self.view_proj
            .reserve(block_bytes.saturating_sub(self.view_proj.len()));
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.object_count = 0;
        self.models.clear();
        self.view_proj.clear();
        self.batch_count = 0;
        self.flushed = false;
    }

    /// Appends legacy blocks; returns the index of the first.
    pub fn push_objects(&mut self, layout: &BufferLayout, objects: &[ObjectTransform]) -> usize {
        let first = self.object_count;
        let stride = layout.object_stride_bytes();
        for object in objects {
            let start = self.object_count * stride;
            self.objects.resize(start + stride, 0);
            self.objects[start..start + bytemuck::bytes_of(object).len()]
                .copy_from_slice(bytemuck::bytes_of(object));
            self.object_count += 1;
        }
        self.flushed = false;
        first
    }

    /// Entry index the next batch would start at.
    pub fn next_batch_start(&self, layout: &BufferLayout) -> usize {
        self.models.len().next_multiple_of(layout.instance_alignment)
    }

    /// Appends one instanced batch; returns `(first entry, block)`.
    pub fn push_batch(
        &mut self,
        layout: &BufferLayout,
        view_proj: &ViewProjection,
        models: &[Mat4],
    ) -> (usize, usize) {
        let first = self.next_batch_start(layout);
        self.models.resize(first, [[0.0; 4]; 4]);
        self.models.extend_from_slice(models);

        let block = self.batch_count;
        let stride = layout.view_proj_stride_bytes();
        let start = block * stride;
        self.view_proj.resize(start + stride, 0);
        self.view_proj[start..start + bytemuck::bytes_of(view_proj).len()]
            .copy_from_slice(bytemuck::bytes_of(view_proj));
        self.batch_count += 1;

        self.flushed = false;
        (first, block)
    }

    /// Bytes of the legacy staging up to the end of the last block.
    pub fn object_bytes(&self, layout: &BufferLayout) -> &[u8] {
        used(
            &self.objects,
            self.object_count,
            layout.object_stride_bytes(),
            ObjectTransform::SIZE,
        )
    }

    /// Bytes of the view-projection staging up to the end of the last block.
    pub fn view_proj_bytes(&self, layout: &BufferLayout) -> &[u8] {
        used(
            &self.view_proj,
            self.batch_count,
            layout.view_proj_stride_bytes(),
            ViewProjection::SIZE,
        )
    }
}

/// Cuts the stride padding after the last of `count` blocks.
fn used(bytes: &[u8], count: usize, stride: usize, block: u64) -> &[u8] {
    match count {
        0 => &[],
        n => &bytes[..(n - 1) * stride + block as usize],
    }
}
