//! # Descriptor / Resource Binder
//!
//! Binds one planned region to the fixed shader contract and draws it:
//!
//! ```text
//! Legacy region [first, count]        Instanced region [first, count, block]
//!   for i in 0..count                   set_bind_group(0, group,
//!     set_bind_group(0, group,              [first · 64, block · vp_stride])
//!         [(first + i) · stride])       draw_indexed(0..n_idx, 0..count)
//!     draw_indexed(0..n_idx, 0..1)
//! ```
//!
//! Instances always start at 0; the batch's start in `model[]` travels in
//! the dynamic offset, so the shader's `instance_index` is the submission
//! position inside the batch.

use orrery_core::layout::TRANSFORM_SET;
use orrery_core::{BindingMode, FrameSlot, ShaderVariant, TransformError, TransformResult};

use crate::backend::{DrawPass, GpuBackend};
use crate::mesh::Mesh;
use crate::transforms::{Region, TransformBufferManager};

/// A host-created pipeline tagged with the shader it was compiled from.
#[derive(Debug)]
pub struct ActivePipeline<'p, P> {
    /// The pipeline object.
    pub pipeline: &'p P,
    /// Shader variant the pipeline was built from.
    pub variant: ShaderVariant,
}

impl<P> Clone for ActivePipeline<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for ActivePipeline<'_, P> {}

/// The pipelines a frame is recorded with, one slot per binding mode.
#[derive(Debug)]
pub struct PipelineSet<'p, P> {
    /// Pipeline used for legacy draws.
    pub legacy: Option<ActivePipeline<'p, P>>,
    /// Pipeline used for instanced draws.
    pub instanced: Option<ActivePipeline<'p, P>>,
}

impl<'p, P> PipelineSet<'p, P> {
    /// A set with no pipelines.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            legacy: None,
            instanced: None,
        }
    }

    /// A set whose pipelines are built from the matching variants.
    #[must_use]
    pub const fn new(legacy: &'p P, instanced: &'p P) -> Self {
        Self {
            legacy: Some(ActivePipeline {
                pipeline: legacy,
                variant: ShaderVariant::LegacyTransform,
            }),
            instanced: Some(ActivePipeline {
                pipeline: instanced,
                variant: ShaderVariant::InstancedTransform,
            }),
        }
    }

    /// Puts `pipeline`, built from `variant`, in the slot for `mode`.
    #[must_use]
    pub fn with(mut self, mode: BindingMode, pipeline: &'p P, variant: ShaderVariant) -> Self {
        let active = Some(ActivePipeline { pipeline, variant });
        match mode {
            BindingMode::Legacy => self.legacy = active,
            BindingMode::Instanced => self.instanced = active,
        }
        self
    }

    /// The pipeline in the slot for `mode`.
    #[inline]
    #[must_use]
    pub fn for_mode(&self, mode: BindingMode) -> Option<ActivePipeline<'p, P>> {
        match mode {
            BindingMode::Legacy => self.legacy,
            BindingMode::Instanced => self.instanced,
        }
    }
}

/// Binds `region` of `slot` with `mesh` and issues its draws.
///
/// Returns the number of draws issued.
///
/// # Errors
///
/// - [`TransformError::BindingMismatch`] if the pipeline for the region's
///   mode is missing or was built from the other shader variant.
/// - [`TransformError::SlotNotFlushed`] if the slot's staging has not been
///   uploaded.
pub fn bind_and_draw<'a, B, D>(
    pass: &mut D,
    pipelines: &PipelineSet<'a, B::Pipeline>,
    buffers: &'a TransformBufferManager<B>,
    slot: FrameSlot,
    mesh: &'a Mesh<B>,
    region: &Region,
) -> TransformResult<u32>
where
    B: GpuBackend,
    D: DrawPass<'a, B> + ?Sized,
{
    let mode = region.mode();
    let expected = mode.shader_variant();
    let active = pipelines.for_mode(mode);
    let Some(active) = active.filter(|a| a.variant == expected) else {
        let found = active.map(|a| a.variant);
        tracing::warn!(?expected, ?found, "Pipeline does not match binding mode");
        return Err(TransformError::BindingMismatch { expected, found });
    };

    if !buffers.is_flushed(slot) {
        return Err(TransformError::SlotNotFlushed(slot.index()));
    }
    if region.draw_count() == 0 {
        return Ok(0);
    }

    let group = buffers.bind_group(slot, mode);
    let indices = 0..mesh.index_count();
    pass.set_pipeline(active.pipeline);
    pass.set_mesh(mesh.vertices(), mesh.indices());

    match *region {
        Region::Legacy { count, .. } => {
            for draw in 0..count {
                let offsets = buffers.dynamic_offsets(region, draw)?;
                pass.set_bind_group(TRANSFORM_SET, group, offsets.as_slice());
                pass.draw_indexed(indices.clone(), 0..1);
            }
            Ok(u32::try_from(count).unwrap_or(u32::MAX))
        }
        Region::Instanced { count, .. } => {
            let offsets = buffers.dynamic_offsets(region, 0)?;
            pass.set_bind_group(TRANSFORM_SET, group, offsets.as_slice());
            pass.draw_indexed(indices, 0..u32::try_from(count).unwrap_or(u32::MAX));
            Ok(1)
        }
    }
}
