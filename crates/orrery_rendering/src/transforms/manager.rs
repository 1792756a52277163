//! # Transform Buffer Manager
//!
//! Owns, per frame slot, the staging and GPU buffers of both binding modes.
//! Capacity is shared by all slots and only changes in
//! [`TransformBufferManager::ensure_capacity`]; writes never grow anything.
//!
//! ## Growth while frames are in flight
//!
//! ```text
//! slot 0 Submitted (frame 7)    old buffers ──▶ deferred until frame 7 retires
//! slot 1 Recording (frame 8)    old buffers ──▶ dropped now, staging re-uploaded on flush
//! ```

use orrery_core::math::Mat4;
use orrery_core::{BindingMode, FrameRing, FrameSlot, SlotState, TransformError, TransformResult};

use super::data::{ObjectTransform, ViewProjection};
use super::layout::BufferLayout;
use super::staging::SlotStaging;
use crate::backend::{BufferUsage, GpuBackend, TransformBindings};

/// Transform data for one write.
#[derive(Clone, Copy, Debug)]
pub enum TransformData<'a> {
    /// Legacy blocks, appended to the slot in order.
    Legacy(&'a [ObjectTransform]),
    /// One instanced batch; `models[i]` is read by instance `i`.
    Instanced {
        /// Shared `projection · view`.
        view_proj: Mat4,
        /// Per-instance model matrices in draw order.
        models: &'a [Mat4],
    },
}

impl TransformData<'_> {
    /// Binding mode of the data.
    #[must_use]
    pub const fn mode(&self) -> BindingMode {
        match self {
            Self::Legacy(_) => BindingMode::Legacy,
            Self::Instanced { .. } => BindingMode::Instanced,
        }
    }
}

/// Where a write landed inside its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    /// Legacy blocks `first..first + count`, one draw each.
    Legacy {
        /// Index of the first block.
        first: usize,
        /// Number of blocks.
        count: usize,
    },
    /// Model entries `first..first + count` and view-projection `block`.
    Instanced {
        /// Entry index of `model[0]` for this batch.
        first: usize,
        /// Instance count.
        count: usize,
        /// View-projection block index.
        block: usize,
    },
}

impl Region {
    /// Binding mode of the region.
    #[must_use]
    pub const fn mode(&self) -> BindingMode {
        match self {
            Self::Legacy { .. } => BindingMode::Legacy,
            Self::Instanced { .. } => BindingMode::Instanced,
        }
    }

    /// Number of draws the region needs.
    #[must_use]
    pub const fn draw_count(&self) -> usize {
        match self {
            Self::Legacy { count, .. } => *count,
            Self::Instanced { count, .. } => {
                if *count == 0 {
                    0
                } else {
                    1
                }
            }
        }
    }
}

/// Dynamic offsets for one `set_bind_group` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DynamicOffsets {
    offsets: [u32; 2],
    len: usize,
}

impl DynamicOffsets {
    /// Offsets in binding order.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.offsets[..self.len]
    }
}

struct LegacyBuffers<B: GpuBackend> {
    objects: B::Buffer,
    group: B::BindGroup,
}

impl<B: GpuBackend> LegacyBuffers<B> {
    fn create(backend: &B, layout: &BufferLayout, capacity: usize, slot: usize) -> Self {
        let objects = backend.create_buffer(
            &format!("Legacy Objects (slot {slot})"),
            layout.object_buffer_size(capacity),
            BufferUsage::Uniform,
        );
        let group = backend.create_transform_bind_group(
            &format!("Legacy Transform Group (slot {slot})"),
            TransformBindings::Legacy { objects: &objects },
        );
        Self { objects, group }
    }
}

struct InstancedBuffers<B: GpuBackend> {
    models: B::Buffer,
    view_proj: B::Buffer,
    group: B::BindGroup,
}

impl<B: GpuBackend> InstancedBuffers<B> {
    fn create(backend: &B, layout: &BufferLayout, capacity: usize, slot: usize) -> Self {
        let models = backend.create_buffer(
            &format!("Instance Models (slot {slot})"),
            layout.model_buffer_size(capacity),
            BufferUsage::Storage,
        );
        let view_proj = backend.create_buffer(
            &format!("Instance ViewProj (slot {slot})"),
            layout.view_proj_buffer_size(capacity),
            BufferUsage::Uniform,
        );
        let group = backend.create_transform_bind_group(
            &format!("Instanced Transform Group (slot {slot})"),
            TransformBindings::Instanced {
                models: &models,
                models_window: layout.model_window(capacity),
                view_proj: &view_proj,
            },
        );
        Self {
            models,
            view_proj,
            group,
        }
    }
}

struct SlotResources<B: GpuBackend> {
    legacy: LegacyBuffers<B>,
    instanced: InstancedBuffers<B>,
    staging: SlotStaging,
}

/// Buffers replaced while the GPU may still read them.
struct DeferredRelease<B: GpuBackend> {
    frame: u64,
    buffers: Vec<B::Buffer>,
    groups: Vec<B::BindGroup>,
}

/// Owns the transform buffers of every frame slot.
pub struct TransformBufferManager<B: GpuBackend> {
    layout: BufferLayout,
    object_capacity: usize,
    instance_capacity: usize,
    slots: Vec<SlotResources<B>>,
    deferred: Vec<DeferredRelease<B>>,
}

impl<B: GpuBackend> TransformBufferManager<B> {
    /// Creates buffers for `frames_in_flight` slots.
    ///
    /// Capacities are raised to at least one object and one aligned batch.
    #[must_use]
    pub fn new(
        backend: &B,
        frames_in_flight: usize,
        object_capacity: usize,
        instance_capacity: usize,
    ) -> Self {
        let layout = BufferLayout::from_limits(&backend.limits());
        let object_capacity = object_capacity.max(1).min(layout.max_objects.max(1));
        let instance_capacity = layout
            .align_instances(instance_capacity)
            .min(layout.max_instances.max(layout.instance_alignment));

        let slots = (0..frames_in_flight)
            .map(|slot| SlotResources {
                legacy: LegacyBuffers::create(backend, &layout, object_capacity, slot),
                instanced: InstancedBuffers::create(backend, &layout, instance_capacity, slot),
                staging: SlotStaging::with_capacity(&layout, object_capacity, instance_capacity),
            })
            .collect();

        Self {
            layout,
            object_capacity,
            instance_capacity,
            slots,
            deferred: Vec::new(),
        }
    }

    /// Buffer layout in use.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Capacity per slot: legacy blocks or model-matrix entries.
    #[inline]
    #[must_use]
    pub fn capacity(&self, mode: BindingMode) -> usize {
        match mode {
            BindingMode::Legacy => self.object_capacity,
            BindingMode::Instanced => self.instance_capacity,
        }
    }

    /// Number of replaced buffer sets waiting for their frame to retire.
    #[inline]
    #[must_use]
    pub fn deferred_releases(&self) -> usize {
        self.deferred.len()
    }

    /// Grows every slot so that `count` items of `mode` fit in one slot.
    ///
    /// Growth doubles to the next power of two above `count`. Buffers of
    /// slots the GPU may still read are released once their frame retires;
    /// the others are dropped right away.
    ///
    /// # Errors
    ///
    /// [`TransformError::CapacityExceeded`] if `count` instances exceed the
    /// device's largest storage binding, or `count` legacy blocks exceed the
    /// largest buffer or the reach of a `u32` dynamic offset.
    pub fn ensure_capacity(
        &mut self,
        backend: &B,
        ring: &FrameRing,
        mode: BindingMode,
        count: usize,
    ) -> TransformResult<()> {
        if count <= self.capacity(mode) {
            return Ok(());
        }

        let grown = count
            .checked_mul(2)
            .and_then(usize::checked_next_power_of_two)
            .unwrap_or(count);

        match mode {
            BindingMode::Legacy => {
                let max = self.layout.max_objects;
                if count > max {
                    return Err(TransformError::CapacityExceeded {
                        mode,
                        requested: count,
                        capacity: max,
                    });
                }
                let grown = grown.min(max);
                tracing::debug!(
                    "Growing legacy object buffers: {} → {}",
                    self.object_capacity,
                    grown
                );
                for index in 0..self.slots.len() {
                    let fresh = LegacyBuffers::create(backend, &self.layout, grown, index);
                    let old = std::mem::replace(&mut self.slots[index].legacy, fresh);
                    self.retire(ring, index, vec![old.objects], vec![old.group]);
                }
                self.object_capacity = grown;
            }
            BindingMode::Instanced => {
                let max = self.layout.max_instances;
                if count > max {
                    return Err(TransformError::CapacityExceeded {
                        mode,
                        requested: count,
                        capacity: max,
                    });
                }
                let grown = self.layout.align_instances(grown).min(max);
                tracing::debug!(
                    "Growing instance model buffers: {} → {}",
                    self.instance_capacity,
                    grown
                );
                for index in 0..self.slots.len() {
                    let fresh = InstancedBuffers::create(backend, &self.layout, grown, index);
                    let old = std::mem::replace(&mut self.slots[index].instanced, fresh);
                    self.retire(ring, index, vec![old.models, old.view_proj], vec![old.group]);
                }
                self.instance_capacity = grown;
            }
        }

        let (objects, instances) = (self.object_capacity, self.instance_capacity);
        for slot in &mut self.slots {
            slot.staging.reserve(&self.layout, objects, instances);
            slot.staging.flushed = false;
        }
        Ok(())
    }

    fn retire(
        &mut self,
        ring: &FrameRing,
        index: usize,
        buffers: Vec<B::Buffer>,
        groups: Vec<B::BindGroup>,
    ) {
        if index < ring.frames_in_flight() && ring.state(index) == SlotState::Submitted {
            let frame = ring.slot_frame(index);
            tracing::debug!(slot = index, frame, "Deferring release of replaced buffers");
            self.deferred.push(DeferredRelease {
                frame,
                buffers,
                groups,
            });
        }
    }

    /// Clears a slot's staging for a new frame.
    pub fn reset(&mut self, slot: FrameSlot) {
        self.slots[slot.index()].staging.clear();
    }

    /// Copies `data` into the slot's staging.
    ///
    /// # Errors
    ///
    /// [`TransformError::CapacityExceeded`] if the data does not fit the
    /// reserved capacity. Nothing is staged in that case.
    pub fn write(&mut self, slot: FrameSlot, data: TransformData<'_>) -> TransformResult<Region> {
        let layout = self.layout;
        let staging = &mut self.slots[slot.index()].staging;

        match data {
            TransformData::Legacy(objects) => {
                let requested = staging.object_count + objects.len();
                if requested > self.object_capacity {
                    return Err(TransformError::CapacityExceeded {
                        mode: BindingMode::Legacy,
                        requested,
                        capacity: self.object_capacity,
                    });
                }
                let first = staging.push_objects(&layout, objects);
                Ok(Region::Legacy {
                    first,
                    count: objects.len(),
                })
            }
            TransformData::Instanced { view_proj, models } => {
                let requested = staging.next_batch_start(&layout) + models.len();
                let blocks = layout.view_proj_blocks(self.instance_capacity);
                if requested > self.instance_capacity || staging.batch_count >= blocks {
                    return Err(TransformError::CapacityExceeded {
                        mode: BindingMode::Instanced,
                        requested,
                        capacity: self.instance_capacity,
                    });
                }
                let (first, block) =
                    staging.push_batch(&layout, &ViewProjection { view_proj }, models);
                Ok(Region::Instanced {
                    first,
                    count: models.len(),
                    block,
                })
            }
        }
    }

    /// Uploads the slot's staged regions. Returns the bytes uploaded.
    ///
    /// Buffers with nothing staged are not touched.
    pub fn flush(&mut self, backend: &B, slot: FrameSlot) -> u64 {
        let layout = self.layout;
        let resources = &mut self.slots[slot.index()];
        let staging = &resources.staging;
        let mut uploaded = 0u64;

        let objects = staging.object_bytes(&layout);
        if !objects.is_empty() {
            backend.write_buffer(&resources.legacy.objects, 0, objects);
            uploaded += objects.len() as u64;
        }

        if staging.batch_count > 0 {
            let models: &[u8] = bytemuck::cast_slice(&staging.models);
            if !models.is_empty() {
                backend.write_buffer(&resources.instanced.models, 0, models);
                uploaded += models.len() as u64;
            }
            let view_proj = staging.view_proj_bytes(&layout);
            backend.write_buffer(&resources.instanced.view_proj, 0, view_proj);
            uploaded += view_proj.len() as u64;
        }

        resources.staging.flushed = true;
        tracing::trace!(slot = slot.index(), frame = slot.frame(), uploaded, "Flushed transform staging");
        uploaded
    }

    /// Whether the slot's staging has been uploaded since its last change.
    #[inline]
    #[must_use]
    pub fn is_flushed(&self, slot: FrameSlot) -> bool {
        self.slots[slot.index()].staging.flushed
    }

    /// Set 0 bind group of a slot for one mode.
    #[must_use]
    pub fn bind_group(&self, slot: FrameSlot, mode: BindingMode) -> &B::BindGroup {
        let resources = &self.slots[slot.index()];
        match mode {
            BindingMode::Legacy => &resources.legacy.group,
            BindingMode::Instanced => &resources.instanced.group,
        }
    }

    /// Dynamic offsets of the `draw`-th draw of `region`, in binding order.
    ///
    /// # Errors
    ///
    /// [`TransformError::CapacityExceeded`] if an offset does not fit a `u32`.
    pub fn dynamic_offsets(&self, region: &Region, draw: usize) -> TransformResult<DynamicOffsets> {
        let mode = region.mode();
        let offset = |bytes: u64, requested: usize| {
            u32::try_from(bytes).map_err(|_| TransformError::CapacityExceeded {
                mode,
                requested,
                capacity: self.capacity(mode),
            })
        };

        match *region {
            Region::Legacy { first, .. } => {
                let index = first + draw;
                Ok(DynamicOffsets {
                    offsets: [offset(self.layout.object_stride * index as u64, index + 1)?, 0],
                    len: 1,
                })
            }
            Region::Instanced { first, count, block } => Ok(DynamicOffsets {
                offsets: [
                    offset(super::MODEL_MATRIX_SIZE * first as u64, first + count)?,
                    offset(self.layout.view_proj_stride * block as u64, first + count)?,
                ],
                len: 2,
            }),
        }
    }

    /// Releases deferred buffers whose frame has retired.
    ///
    /// Returns the number of buffers released.
    pub fn collect_garbage(&mut self, ring: &FrameRing) -> usize {
        let mut released = 0;
        self.deferred.retain(|entry| {
            if ring.is_frame_retired(entry.frame) {
                released += entry.buffers.len();
                false
            } else {
                true
            }
        });
        if released > 0 {
            tracing::debug!(released, "Released deferred transform buffers");
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendLimits, HeadlessBackend};
    use orrery_core::math::{self, IDENTITY};
    use orrery_core::{AcquirePolicy, Fence};

    fn setup(objects: usize, instances: usize) -> (HeadlessBackend, FrameRing, TransformBufferManager<HeadlessBackend>) {
        let backend = HeadlessBackend::new();
        let ring = FrameRing::new(2, AcquirePolicy::NonBlocking);
        let manager = TransformBufferManager::new(&backend, 2, objects, instances);
        (backend, ring, manager)
    }

    #[test]
    fn test_write_never_grows() {
        let (_backend, mut ring, mut manager) = setup(2, 4);
        let slot = ring.acquire_slot_for_writing().unwrap();
        let objects = [ObjectTransform::new(IDENTITY, IDENTITY, IDENTITY); 3];

        let err = manager.write(slot, TransformData::Legacy(&objects)).unwrap_err();
        assert!(matches!(
            err,
            TransformError::CapacityExceeded { mode: BindingMode::Legacy, requested: 3, capacity: 2 }
        ));
        assert_eq!(manager.capacity(BindingMode::Legacy), 2);
    }

    #[test]
    fn test_growth_doubles() {
        let (backend, ring, mut manager) = setup(1, 4);
        manager.ensure_capacity(&backend, &ring, BindingMode::Legacy, 5).unwrap();
        assert_eq!(manager.capacity(BindingMode::Legacy), 16);

        manager.ensure_capacity(&backend, &ring, BindingMode::Instanced, 9).unwrap();
        assert_eq!(manager.capacity(BindingMode::Instanced), 32);
    }

    #[test]
    fn test_instanced_regions() {
        let (backend, mut ring, mut manager) = setup(1, 16);
        let slot = ring.acquire_slot_for_writing().unwrap();
        let models = [math::translation(1.0, 0.0, 0.0); 3];

        let a = manager
            .write(slot, TransformData::Instanced { view_proj: IDENTITY, models: &models })
            .unwrap();
        let b = manager
            .write(slot, TransformData::Instanced { view_proj: IDENTITY, models: &models[..2] })
            .unwrap();
        assert_eq!(a, Region::Instanced { first: 0, count: 3, block: 0 });
        assert_eq!(b, Region::Instanced { first: 4, count: 2, block: 1 });
        assert_eq!(manager.dynamic_offsets(&b, 0).unwrap().as_slice(), &[256, 256]);

        assert!(!manager.is_flushed(slot));
        let uploaded = manager.flush(&backend, slot);
        assert_eq!(uploaded, 6 * 64 + 256 + 64);
        assert!(manager.is_flushed(slot));
    }

    #[test]
    fn test_flush_skips_untouched_buffers() {
        let (backend, mut ring, mut manager) = setup(4, 4);
        let slot = ring.acquire_slot_for_writing().unwrap();
        manager
            .write(slot, TransformData::Legacy(&[ObjectTransform::new(IDENTITY, IDENTITY, IDENTITY)]))
            .unwrap();
        manager.flush(&backend, slot);

        let writes = backend.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].usage, BufferUsage::Uniform);
        assert_eq!(writes[0].len, ObjectTransform::SIZE);
    }

    #[test]
    fn test_growth_defers_in_flight_buffers() {
        let (backend, mut ring, mut manager) = setup(1, 4);
        let fence = Fence::new();
        let slot = ring.acquire_slot_for_writing().unwrap();
        ring.submit(slot, fence.clone()).unwrap();
        let live_before = backend.live_buffers();

        manager.ensure_capacity(&backend, &ring, BindingMode::Legacy, 4).unwrap();
        // Slot 1 was idle: its old buffer is gone. Slot 0's is still held.
        assert_eq!(manager.deferred_releases(), 1);
        assert_eq!(backend.live_buffers(), live_before + 1);
        assert_eq!(manager.collect_garbage(&ring), 0);

        fence.signal();
        ring.poll_retirements();
        assert_eq!(manager.collect_garbage(&ring), 1);
        assert_eq!(backend.live_buffers(), live_before);
    }

    #[test]
    fn test_legacy_growth_bounded_by_buffer_size() {
        let backend = HeadlessBackend::with_limits(BackendLimits {
            max_buffer_size: 256 * 10,
            ..BackendLimits::default()
        });
        let ring = FrameRing::new(1, AcquirePolicy::NonBlocking);
        let mut manager = TransformBufferManager::new(&backend, 1, 1, 4);

        manager.ensure_capacity(&backend, &ring, BindingMode::Legacy, 6).unwrap();
        assert_eq!(manager.capacity(BindingMode::Legacy), 10);

        let err = manager
            .ensure_capacity(&backend, &ring, BindingMode::Legacy, 11)
            .unwrap_err();
        assert!(matches!(
            err,
            TransformError::CapacityExceeded { mode: BindingMode::Legacy, requested: 11, capacity: 10 }
        ));
        assert_eq!(manager.capacity(BindingMode::Legacy), 10);
    }

    #[test]
    fn test_dynamic_offset_past_u32_rejected() {
        let (_backend, _ring, manager) = setup(1, 4);
        let last = (1usize << 24) - 1;

        let fits = manager
            .dynamic_offsets(&Region::Legacy { first: last, count: 1 }, 0)
            .unwrap();
        assert_eq!(fits.as_slice(), &[u32::MAX - 255]);

        assert!(matches!(
            manager.dynamic_offsets(&Region::Legacy { first: last, count: 2 }, 1),
            Err(TransformError::CapacityExceeded { mode: BindingMode::Legacy, .. })
        ));
    }
}
