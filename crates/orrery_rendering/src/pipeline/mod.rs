//! # Transform Pipeline
//!
//! The host-facing frame loop tying the tracker, buffers, selector and
//! binder together:
//!
//! ```text
//! begin_frame ──▶ submit_* ──▶ prepare_frame ──▶ record ──▶ (host submits) ──▶ end_frame
//!   acquire        queue         select           bind_and_draw                 fence
//!   slot           draws         ensure_capacity                                submit slot
//!                                write + flush                                  collect garbage
//! ```
//!
//! The first submit begins a frame implicitly. Submitting after
//! `prepare_frame` makes the frame unprepared again.

mod frame;
mod stats;

pub use stats::FrameStats;

use orrery_core::math::Mat4;
use orrery_core::{
    BindingMode, FrameRing, FrameSlot, PipelineConfig, TransformError, TransformResult,
};

use self::frame::{FrameWork, Planned, PreparedDraw};
use crate::backend::{DrawPass, GpuBackend};
use crate::binder::{bind_and_draw, PipelineSet};
use crate::mesh::{MeshId, MeshRegistry};
use crate::transforms::{TransformBufferManager, TransformData, Vertex};

#[derive(Clone, Copy, Debug)]
struct ActiveFrame {
    slot: FrameSlot,
    prepared: bool,
    stats: FrameStats,
}

/// Instance transform pipeline over a GPU backend.
pub struct TransformPipeline<B: GpuBackend> {
    backend: B,
    config: PipelineConfig,
    ring: FrameRing,
    buffers: TransformBufferManager<B>,
    meshes: MeshRegistry<B>,
    active: Option<ActiveFrame>,
    work: FrameWork,
}

impl<B: GpuBackend> TransformPipeline<B> {
    /// Creates a pipeline with buffers for every frame slot.
    ///
    /// # Errors
    ///
    /// [`TransformError::Config`] if the configuration is invalid.
    pub fn new(backend: B, config: PipelineConfig) -> TransformResult<Self> {
        config.validate()?;

        let ring = FrameRing::new(config.frames_in_flight, config.acquire_policy());
        let buffers = TransformBufferManager::new(
            &backend,
            config.frames_in_flight,
            config.initial_object_capacity,
            config.initial_instance_capacity,
        );
        let meshes = MeshRegistry::new(config.max_meshes);

        tracing::debug!(
            frames_in_flight = config.frames_in_flight,
            auto_instance = config.auto_instance,
            "Transform pipeline created"
        );

        Ok(Self {
            backend,
            config,
            ring,
            buffers,
            meshes,
            active: None,
            work: FrameWork::default(),
        })
    }

    /// The GPU backend.
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The configuration the pipeline was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The frame-slot ring.
    #[inline]
    #[must_use]
    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    /// The transform buffers.
    #[inline]
    #[must_use]
    pub fn buffers(&self) -> &TransformBufferManager<B> {
        &self.buffers
    }

    /// The mesh registry.
    #[inline]
    #[must_use]
    pub fn meshes(&self) -> &MeshRegistry<B> {
        &self.meshes
    }

    /// The slot being recorded, if a frame is active.
    #[inline]
    #[must_use]
    pub fn current_slot(&self) -> Option<FrameSlot> {
        self.active.map(|active| active.slot)
    }

    /// Uploads geometry under a fresh id.
    ///
    /// # Errors
    ///
    /// [`TransformError::MeshLimitReached`] when the registry is full.
    pub fn register_mesh(
        &mut self,
        vertices: &[Vertex],
        indices: &[u32],
        index_count: u32,
    ) -> TransformResult<MeshId> {
        self.meshes
            .register_mesh(&self.backend, vertices, indices, index_count)
    }

    /// Uploads geometry under its content id, reusing identical geometry.
    ///
    /// # Errors
    ///
    /// [`TransformError::MeshLimitReached`] when the registry is full.
    pub fn register_geometry(&mut self, vertices: &[Vertex], indices: &[u32]) -> TransformResult<MeshId> {
        self.meshes.register_geometry(&self.backend, vertices, indices)
    }

    /// Unregisters a mesh; its buffers outlive the frames that used it.
    ///
    /// # Errors
    ///
    /// [`TransformError::UnknownMesh`] if `id` is not registered.
    pub fn remove_mesh(&mut self, id: MeshId) -> TransformResult<()> {
        self.meshes.remove_mesh(&self.ring, id)
    }

    /// Acquires a frame slot for recording.
    ///
    /// # Errors
    ///
    /// - [`TransformError::DeviceLost`] if the device failed.
    /// - [`TransformError::FrameInProgress`] if a frame is already active.
    /// - [`TransformError::NoSlotAvailable`] or
    ///   [`TransformError::SlotAcquireTimeout`] if the slot is still in flight.
    pub fn begin_frame(&mut self) -> TransformResult<FrameSlot> {
        self.backend.check_device()?;
        if self.active.is_some() {
            return Err(TransformError::FrameInProgress);
        }

        let backend = &self.backend;
        let slot = self
            .ring
            .acquire_slot_with(|fence, timeout| backend.wait_for(fence, timeout))?;

        self.buffers.reset(slot);
        self.work.clear();
        self.collect_garbage();
        self.active = Some(ActiveFrame {
            slot,
            prepared: false,
            stats: FrameStats {
                frame: slot.frame(),
                slot: slot.index(),
                ..FrameStats::default()
            },
        });
        Ok(slot)
    }

    /// Queues one object with its own camera.
    ///
    /// Objects sharing a mesh and a bitwise-identical camera are drawn
    /// instanced when `auto_instance` is enabled.
    ///
    /// # Errors
    ///
    /// [`TransformError::UnknownMesh`], or any error of [`Self::begin_frame`]
    /// when this starts the frame.
    pub fn submit_object(&mut self, mesh: MeshId, model: Mat4, view: Mat4, proj: Mat4) -> TransformResult<()> {
        self.meshes.get(mesh)?;
        self.ensure_frame()?;
        self.work.push_object(mesh, model, view, proj);
        Ok(())
    }

    /// Queues `models.len()` instances of one mesh under a shared camera.
    ///
    /// Instance `i` reads `models[i]`. A batch of one is drawn legacy and an
    /// empty batch draws nothing.
    ///
    /// # Errors
    ///
    /// As [`Self::submit_object`].
    pub fn submit_instanced_batch(&mut self, mesh: MeshId, view_proj: Mat4, models: &[Mat4]) -> TransformResult<()> {
        self.meshes.get(mesh)?;
        self.ensure_frame()?;
        self.work
            .push_batch(view_proj, models.iter().map(|&model| (mesh, model)));
        Ok(())
    }

    /// Queues objects of several meshes under a shared camera.
    ///
    /// The batch is split per mesh in order of first appearance; each part
    /// keeps submission order.
    ///
    /// # Errors
    ///
    /// As [`Self::submit_object`]; nothing is queued if any mesh is unknown.
    pub fn submit_mixed_batch(&mut self, view_proj: Mat4, objects: &[(MeshId, Mat4)]) -> TransformResult<()> {
        for &(mesh, _) in objects {
            self.meshes.get(mesh)?;
        }
        self.ensure_frame()?;
        self.work.push_batch(view_proj, objects.iter().copied());
        Ok(())
    }

    /// Plans the frame's draws and uploads their transforms.
    ///
    /// Calling it again without new submissions is a no-op.
    ///
    /// # Errors
    ///
    /// - [`TransformError::NoActiveFrame`] without an active frame.
    /// - [`TransformError::CapacityExceeded`] if an instanced batch exceeds
    ///   the device's largest storage binding, or the frame's legacy draws
    ///   exceed the largest uniform buffer.
    pub fn prepare_frame(&mut self) -> TransformResult<FrameStats> {
        let active = self.active.as_mut().ok_or(TransformError::NoActiveFrame)?;
        if active.prepared {
            return Ok(active.stats);
        }
        let slot = active.slot;

        self.work.plan(self.config.auto_instance);
        let (legacy, instanced) = self.work.totals(self.buffers.layout());

        self.buffers.reset(slot);
        self.buffers
            .ensure_capacity(&self.backend, &self.ring, BindingMode::Legacy, legacy)?;
        self.buffers
            .ensure_capacity(&self.backend, &self.ring, BindingMode::Instanced, instanced)?;

        let mut stats = FrameStats {
            frame: slot.frame(),
            slot: slot.index(),
            ..FrameStats::default()
        };
        self.work.draws.clear();
        for (mesh, planned) in &self.work.planned {
            let data = match planned {
                Planned::Legacy(object) => TransformData::Legacy(std::slice::from_ref(object)),
                Planned::Instanced { view_proj, models } => TransformData::Instanced {
                    view_proj: *view_proj,
                    models: &self.work.models[models.clone()],
                },
            };
            let region = self.buffers.write(slot, data)?;
            stats.record(&region);
            self.work.draws.push(PreparedDraw { mesh: *mesh, region });
        }
        stats.bytes_uploaded = self.buffers.flush(&self.backend, slot);

        tracing::trace!(
            frame = stats.frame,
            draws = stats.draw_calls,
            instances = stats.instances,
            "Frame prepared"
        );
        active.prepared = true;
        active.stats = stats;
        Ok(stats)
    }

    /// Records every prepared draw into `pass`. Returns the draw count.
    ///
    /// Draws are recorded in plan order, not submission order: every
    /// [`Self::submit_object`] draw comes first, then the batches in the
    /// order they were submitted, each split per mesh in order of first
    /// appearance. Hosts that depend on draw order, for blending, should
    /// submit order-sensitive objects as one kind.
    ///
    /// # Errors
    ///
    /// - [`TransformError::NoActiveFrame`] without an active frame.
    /// - [`TransformError::SlotNotFlushed`] if the frame is not prepared.
    /// - [`TransformError::BindingMismatch`] from the binder.
    /// - [`TransformError::UnknownMesh`] if a mesh was removed after
    ///   preparation.
    pub fn record<'a, D>(&'a self, pass: &mut D, pipelines: &PipelineSet<'a, B::Pipeline>) -> TransformResult<u32>
    where
        D: DrawPass<'a, B> + ?Sized,
    {
        let active = self.active.ok_or(TransformError::NoActiveFrame)?;
        if !active.prepared {
            return Err(TransformError::SlotNotFlushed(active.slot.index()));
        }

        let mut draws = 0;
        for draw in &self.work.draws {
            let mesh = self.meshes.get(draw.mesh)?;
            draws += bind_and_draw(pass, pipelines, &self.buffers, active.slot, mesh, &draw.region)?;
        }
        Ok(draws)
    }

    /// Hands the frame to the GPU after the host submitted its commands.
    ///
    /// # Errors
    ///
    /// - [`TransformError::NoActiveFrame`] without an active frame.
    /// - [`TransformError::DeviceLost`] if the device failed; the frame is
    ///   abandoned.
    pub fn end_frame(&mut self) -> TransformResult<FrameStats> {
        let active = self.active.take().ok_or(TransformError::NoActiveFrame)?;

        if let Err(err) = self.backend.check_device() {
            tracing::error!(%err, frame = active.slot.frame(), "Device lost, abandoning frame");
            self.ring.abandon(active.slot)?;
            self.work.clear();
            return Err(err);
        }
        if !active.prepared && !self.work.is_empty() {
            tracing::warn!(frame = active.slot.frame(), "Ending a frame whose submissions were never prepared");
        }

        let fence = self.backend.completion_fence();
        self.ring.submit(active.slot, fence)?;
        self.ring.poll_retirements();
        self.collect_garbage();
        Ok(active.stats)
    }

    /// Drops the active frame without submitting it.
    ///
    /// # Errors
    ///
    /// [`TransformError::NoActiveFrame`] without an active frame.
    pub fn abandon_frame(&mut self) -> TransformResult<()> {
        let active = self.active.take().ok_or(TransformError::NoActiveFrame)?;
        self.ring.abandon(active.slot)?;
        self.buffers.reset(active.slot);
        self.work.clear();
        Ok(())
    }

    /// Retires finished frames and releases buffers they no longer need.
    ///
    /// Returns the number of buffers and meshes released.
    pub fn collect_garbage(&mut self) -> usize {
        self.ring.poll_retirements();
        self.buffers.collect_garbage(&self.ring) + self.meshes.collect_garbage(&self.ring)
    }

    fn ensure_frame(&mut self) -> TransformResult<()> {
        match self.active.as_mut() {
            Some(active) => {
                active.prepared = false;
                Ok(())
            }
            None => self.begin_frame().map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, HeadlessPass, HeadlessPipeline};
    use orrery_core::math::{self, IDENTITY};
    use orrery_core::{AcquireConfig, AcquireMode, ConfigError};

    fn pipeline() -> TransformPipeline<HeadlessBackend> {
        let config = PipelineConfig {
            acquire: AcquireConfig {
                policy: AcquireMode::NonBlocking,
                ..AcquireConfig::default()
            },
            ..PipelineConfig::default()
        };
        TransformPipeline::new(HeadlessBackend::new(), config).unwrap()
    }

    fn triangle(pipeline: &mut TransformPipeline<HeadlessBackend>) -> MeshId {
        let v = Vertex::default();
        pipeline.register_geometry(&[v; 3], &[0, 1, 2]).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            frames_in_flight: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            TransformPipeline::new(HeadlessBackend::new(), config),
            Err(TransformError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_first_submit_begins_frame() {
        let mut pipeline = pipeline();
        let mesh = triangle(&mut pipeline);
        assert!(pipeline.current_slot().is_none());

        pipeline.submit_object(mesh, IDENTITY, IDENTITY, IDENTITY).unwrap();
        assert_eq!(pipeline.current_slot().map(FrameSlot::frame), Some(0));
        assert!(matches!(pipeline.begin_frame(), Err(TransformError::FrameInProgress)));
    }

    #[test]
    fn test_unknown_mesh_does_not_begin_frame() {
        let mut pipeline = pipeline();
        let bogus = MeshId::of_geometry(&[], &[]);
        assert!(matches!(
            pipeline.submit_object(bogus, IDENTITY, IDENTITY, IDENTITY),
            Err(TransformError::UnknownMesh(_))
        ));
        assert!(pipeline.current_slot().is_none());
    }

    #[test]
    fn test_submit_after_prepare_requires_prepare() {
        let mut pipeline = pipeline();
        let mesh = triangle(&mut pipeline);
        let legacy = HeadlessPipeline::new("legacy");
        let instanced = HeadlessPipeline::new("instanced");

        pipeline.submit_object(mesh, IDENTITY, IDENTITY, IDENTITY).unwrap();
        pipeline.prepare_frame().unwrap();
        pipeline.submit_object(mesh, IDENTITY, IDENTITY, IDENTITY).unwrap();

        let mut pass = HeadlessPass::new();
        assert!(matches!(
            pipeline.record(&mut pass, &PipelineSet::new(&legacy, &instanced)),
            Err(TransformError::SlotNotFlushed(0))
        ));

        let stats = pipeline.prepare_frame().unwrap();
        assert_eq!(stats.instanced_draws, 1);
        assert_eq!(stats.instances, 2);
        let mut pass = HeadlessPass::new();
        assert_eq!(pipeline.record(&mut pass, &PipelineSet::new(&legacy, &instanced)).unwrap(), 1);
    }

    #[test]
    fn test_ring_wraps_after_retirement() {
        let mut pipeline = pipeline();
        let mesh = triangle(&mut pipeline);

        for _ in 0..2 {
            pipeline.submit_object(mesh, IDENTITY, IDENTITY, IDENTITY).unwrap();
            pipeline.prepare_frame().unwrap();
            pipeline.end_frame().unwrap();
        }
        assert!(matches!(
            pipeline.begin_frame(),
            Err(TransformError::NoSlotAvailable { slot: 0 })
        ));

        pipeline.backend().retire_all();
        assert_eq!(pipeline.begin_frame().unwrap().frame(), 2);
    }

    #[test]
    fn test_abandon_reuses_frame() {
        let mut pipeline = pipeline();
        let mesh = triangle(&mut pipeline);
        pipeline.submit_object(mesh, IDENTITY, IDENTITY, IDENTITY).unwrap();
        pipeline.abandon_frame().unwrap();

        assert!(pipeline.current_slot().is_none());
        assert_eq!(pipeline.begin_frame().unwrap().frame(), 0);
        assert!(matches!(pipeline.abandon_frame(), Ok(())));
        assert!(matches!(pipeline.abandon_frame(), Err(TransformError::NoActiveFrame)));
    }

    #[test]
    fn test_growth_keeps_in_flight_buffers() {
        let mut pipeline = pipeline();
        let mesh = triangle(&mut pipeline);
        let models: Vec<Mat4> = (0..300)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let x = i as f32;
                math::translation(x, 0.0, 0.0)
            })
            .collect();

        pipeline.submit_instanced_batch(mesh, IDENTITY, &models[..2]).unwrap();
        pipeline.prepare_frame().unwrap();
        pipeline.end_frame().unwrap();

        pipeline.submit_instanced_batch(mesh, IDENTITY, &models).unwrap();
        pipeline.prepare_frame().unwrap();
        assert_eq!(pipeline.buffers().capacity(BindingMode::Instanced), 1024);
        assert_eq!(pipeline.buffers().deferred_releases(), 1);
        pipeline.end_frame().unwrap();

        pipeline.backend().retire_all();
        assert!(pipeline.collect_garbage() >= 2);
        assert_eq!(pipeline.buffers().deferred_releases(), 0);
    }

    #[test]
    fn test_objects_record_before_batches() {
        let mut pipeline = pipeline();
        let mesh = triangle(&mut pipeline);
        let legacy = HeadlessPipeline::new("legacy");
        let instanced = HeadlessPipeline::new("instanced");

        pipeline
            .submit_instanced_batch(mesh, IDENTITY, &[IDENTITY, IDENTITY])
            .unwrap();
        pipeline.submit_object(mesh, IDENTITY, IDENTITY, IDENTITY).unwrap();
        pipeline.prepare_frame().unwrap();

        let mut pass = HeadlessPass::new();
        pipeline
            .record(&mut pass, &PipelineSet::new(&legacy, &instanced))
            .unwrap();
        let order: Vec<(Option<&str>, u32)> = pass
            .commands()
            .iter()
            .map(|c| (c.pipeline.as_deref(), c.instance_count()))
            .collect();
        assert_eq!(order, vec![(Some("legacy"), 1), (Some("instanced"), 2)]);
    }
}
