//! # GPU Backend Seam
//!
//! Everything the transform pipeline needs from a GPU, and nothing more:
//!
//! ```text
//!   TransformBufferManager ──create/write──▶ ┌─────────────┐
//!   MeshRegistry           ──create/write──▶ │ GpuBackend  │──▶ WgpuBackend   (device + queue)
//!   TransformPipeline      ──fence/poll───▶  └─────────────┘──▶ HeadlessBackend (in-memory)
//!
//!   binder ──set_pipeline/set_bind_group/draw──▶ DrawPass ──▶ wgpu::RenderPass | HeadlessPass
//! ```
//!
//! Pipelines, render passes and command submission stay with the host; the
//! backend only creates buffers and bind groups, uploads bytes, and hands
//! out completion fences for submitted work.

mod headless;
mod wgpu_backend;

use std::ops::Range;
use std::time::Duration;

use orrery_core::{BindingMode, Fence, TransformResult};

pub use self::headless::{
    BoundBuffer, DrawCommand, HeadlessBackend, HeadlessBindGroup, HeadlessBuffer, HeadlessPass,
    HeadlessPipeline, WriteRecord,
};
pub use self::wgpu_backend::{WgpuBackend, VERTEX_LAYOUT};

/// What a buffer is bound as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Uniform blocks.
    Uniform,
    /// Read-only storage array.
    Storage,
    /// Vertex data.
    Vertex,
    /// `u32` indices.
    Index,
}

/// Device limits the buffer layout depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackendLimits {
    /// Alignment of uniform dynamic offsets, in bytes.
    pub uniform_offset_alignment: u32,
    /// Alignment of storage dynamic offsets, in bytes.
    pub storage_offset_alignment: u32,
    /// Largest storage binding, in bytes.
    pub max_storage_binding_size: u32,
    /// Largest buffer, in bytes.
    pub max_buffer_size: u64,
}

impl Default for BackendLimits {
    fn default() -> Self {
        Self {
            uniform_offset_alignment: 256,
            storage_offset_alignment: 256,
            max_storage_binding_size: 128 << 20,
            max_buffer_size: 256 << 20,
        }
    }
}

/// Buffers a transform bind group points at, with their binding windows.
#[derive(Debug)]
pub enum TransformBindings<'a, Buf> {
    /// binding 0: one `{ model, view, proj }` block.
    Legacy {
        /// Uniform buffer holding one aligned region per object.
        objects: &'a Buf,
    },
    /// binding 0: `model[]`, binding 1: `{ view_proj }`.
    Instanced {
        /// Storage buffer of model matrices.
        models: &'a Buf,
        /// Bytes of `model[]` visible from one dynamic offset.
        models_window: u64,
        /// Uniform buffer holding one aligned block per batch.
        view_proj: &'a Buf,
    },
}

impl<Buf> TransformBindings<'_, Buf> {
    /// The binding mode these resources are laid out for.
    #[must_use]
    pub const fn mode(&self) -> BindingMode {
        match self {
            Self::Legacy { .. } => BindingMode::Legacy,
            Self::Instanced { .. } => BindingMode::Instanced,
        }
    }
}

/// GPU operations used by the transform pipeline.
pub trait GpuBackend {
    /// Buffer handle.
    type Buffer;
    /// Bind group handle for set 0.
    type BindGroup;
    /// Compiled render pipeline, created by the host.
    type Pipeline;

    /// Device limits.
    fn limits(&self) -> BackendLimits;

    /// Allocates an uninitialized buffer of `size` bytes.
    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsage) -> Self::Buffer;

    /// Queues `data` to be copied into `buffer` at `offset`.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    /// Creates the set 0 bind group for one binding mode.
    fn create_transform_bind_group(
        &self,
        label: &str,
        bindings: TransformBindings<'_, Self::Buffer>,
    ) -> Self::BindGroup;

    /// Returns a fence that signals once all work submitted so far completes.
    ///
    /// Called after the host submitted the frame's command buffers.
    fn completion_fence(&self) -> Fence;

    /// Waits up to `timeout` for `fence`, driving the device meanwhile.
    fn wait_for(&self, fence: &Fence, timeout: Duration) -> bool;

    /// Reports a lost device.
    ///
    /// # Errors
    ///
    /// [`orrery_core::TransformError::DeviceLost`] once the device has failed.
    fn check_device(&self) -> TransformResult<()>;
}

/// Command recording surface the binder draws into.
///
/// `'a` is the lifetime of the resources referenced by the recorded
/// commands, as with `wgpu::RenderPass<'a>`.
pub trait DrawPass<'a, B: GpuBackend + ?Sized> {
    /// Binds a render pipeline.
    fn set_pipeline(&mut self, pipeline: &'a B::Pipeline);

    /// Binds a mesh's vertex buffer (slot 0) and `u32` index buffer.
    fn set_mesh(&mut self, vertices: &'a B::Buffer, indices: &'a B::Buffer);

    /// Binds a bind group with dynamic offsets.
    fn set_bind_group(&mut self, index: u32, group: &'a B::BindGroup, offsets: &[u32]);

    /// Issues an indexed draw.
    fn draw_indexed(&mut self, indices: Range<u32>, instances: Range<u32>);
}

/// Rounds `value` up to a multiple of `alignment`.
#[inline]
#[must_use]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(192, 256), 256);
        assert_eq!(align_up(512, 256), 512);
        assert_eq!(align_up(7, 0), 7);
    }
}
