//! `wgpu` device backend.
//!
//! Fences are signaled from `Queue::on_submitted_work_done`, which runs on
//! whichever thread polls the device; blocking waits therefore keep calling
//! `Device::poll` until the fence flips or the deadline passes.
//!
//! A lost device may never complete the work its fences wait on, so the
//! device-lost callback and out-of-memory errors both latch into a
//! `DeviceHealth` that [`GpuBackend::check_device`] reports from.

use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use orrery_core::layout::{
    COLOR_LOCATION, INSTANCED_MODELS_BINDING, INSTANCED_VIEW_PROJ_BINDING, LEGACY_OBJECT_BINDING,
    POSITION_LOCATION, TEX_COORD_LOCATION,
};
use orrery_core::{BindingMode, Fence, TransformError, TransformResult};
use parking_lot::Mutex;

use super::{BackendLimits, BufferUsage, DrawPass, GpuBackend, TransformBindings};
use crate::transforms::{ObjectTransform, Vertex, ViewProjection, MODEL_MATRIX_SIZE};

/// Longest single sleep between device polls while waiting on a fence.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
    POSITION_LOCATION => Float32x3,
    COLOR_LOCATION => Float32x3,
    TEX_COORD_LOCATION => Float32x2
];

/// Vertex buffer layout of [`Vertex`] for pipeline creation.
pub const VERTEX_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: Vertex::SIZE,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &VERTEX_ATTRIBUTES,
};

/// Backend driving a real `wgpu` device.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    legacy_layout: wgpu::BindGroupLayout,
    instanced_layout: wgpu::BindGroupLayout,
    health: DeviceHealth,
}

/// First fatal device failure, shared with the device's callbacks.
#[derive(Clone, Debug, Default)]
struct DeviceHealth {
    error: Arc<Mutex<Option<String>>>,
}

impl DeviceHealth {
    fn report_lost(&self, reason: wgpu::DeviceLostReason, message: &str) {
        if let wgpu::DeviceLostReason::ReplacedCallback = reason {
            tracing::debug!("Device-lost callback replaced by the host");
            return;
        }
        tracing::error!(?reason, detail = message, "GPU device lost");
        self.latch(format!("{reason:?}: {message}"));
    }

    fn report_error(&self, error: &wgpu::Error) {
        if let wgpu::Error::OutOfMemory { .. } = error {
            tracing::error!(%error, "GPU device out of memory");
            self.latch(error.to_string());
        } else {
            tracing::error!(%error, "Uncaptured GPU error");
        }
    }

    fn latch(&self, message: String) {
        self.error.lock().get_or_insert(message);
    }

    fn check(&self) -> TransformResult<()> {
        match self.error.lock().as_ref() {
            Some(message) => Err(TransformError::DeviceLost(message.clone())),
            None => Ok(()),
        }
    }
}

impl WgpuBackend {
    /// Wraps a device and queue and creates the two transform layouts.
    ///
    /// Installs the device-lost callback and an uncaptured-error handler;
    /// a lost device and out-of-memory errors are both reported as
    /// [`TransformError::DeviceLost`] by [`GpuBackend::check_device`].
    /// Hosts that install their own device-lost callback afterwards take
    /// over loss reporting.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let legacy_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Legacy Transform Layout"),
            entries: &[buffer_entry(
                LEGACY_OBJECT_BINDING,
                wgpu::BufferBindingType::Uniform,
                ObjectTransform::SIZE,
            )],
        });

        let instanced_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Instanced Transform Layout"),
            entries: &[
                buffer_entry(
                    INSTANCED_MODELS_BINDING,
                    wgpu::BufferBindingType::Storage { read_only: true },
                    MODEL_MATRIX_SIZE,
                ),
                buffer_entry(
                    INSTANCED_VIEW_PROJ_BINDING,
                    wgpu::BufferBindingType::Uniform,
                    ViewProjection::SIZE,
                ),
            ],
        });

        let health = DeviceHealth::default();
        let sink = health.clone();
        device.on_uncaptured_error(Box::new(move |error: wgpu::Error| sink.report_error(&error)));
        let sink = health.clone();
        device.set_device_lost_callback(move |reason, message| sink.report_lost(reason, &message));

        Self {
            device,
            queue,
            legacy_layout,
            instanced_layout,
            health,
        }
    }

    /// The wrapped device.
    #[inline]
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The wrapped queue.
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Set 0 layout of a binding mode, for building pipeline layouts.
    #[must_use]
    pub fn bind_group_layout(&self, mode: BindingMode) -> &wgpu::BindGroupLayout {
        match mode {
            BindingMode::Legacy => &self.legacy_layout,
            BindingMode::Instanced => &self.instanced_layout,
        }
    }
}

fn buffer_entry(
    binding: u32,
    ty: wgpu::BufferBindingType,
    min_size: u64,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: true,
            min_binding_size: NonZeroU64::new(min_size),
        },
        count: None,
    }
}

fn buffer_binding(buffer: &wgpu::Buffer, window: u64) -> wgpu::BindingResource<'_> {
    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
        buffer,
        offset: 0,
        size: NonZeroU64::new(window),
    })
}

impl GpuBackend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type BindGroup = wgpu::BindGroup;
    type Pipeline = wgpu::RenderPipeline;

    fn limits(&self) -> BackendLimits {
        let limits = self.device.limits();
        BackendLimits {
            uniform_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            storage_offset_alignment: limits.min_storage_buffer_offset_alignment,
            max_storage_binding_size: limits.max_storage_buffer_binding_size,
            max_buffer_size: limits.max_buffer_size,
        }
    }

    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsage) -> wgpu::Buffer {
        let usage = match usage {
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
            BufferUsage::Storage => wgpu::BufferUsages::STORAGE,
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
        } | wgpu::BufferUsages::COPY_DST;

        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    fn create_transform_bind_group(
        &self,
        label: &str,
        bindings: TransformBindings<'_, wgpu::Buffer>,
    ) -> wgpu::BindGroup {
        match bindings {
            TransformBindings::Legacy { objects } => {
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(label),
                    layout: &self.legacy_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: LEGACY_OBJECT_BINDING,
                        resource: buffer_binding(objects, ObjectTransform::SIZE),
                    }],
                })
            }
            TransformBindings::Instanced {
                models,
                models_window,
                view_proj,
            } => self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &self.instanced_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: INSTANCED_MODELS_BINDING,
                        resource: buffer_binding(models, models_window),
                    },
                    wgpu::BindGroupEntry {
                        binding: INSTANCED_VIEW_PROJ_BINDING,
                        resource: buffer_binding(view_proj, ViewProjection::SIZE),
                    },
                ],
            }),
        }
    }

    fn completion_fence(&self) -> Fence {
        let fence = Fence::new();
        let signal = fence.clone();
        self.queue.on_submitted_work_done(move || signal.signal());
        fence
    }

    fn wait_for(&self, fence: &Fence, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let _ = self.device.poll(wgpu::Maintain::Poll);
            if fence.is_signaled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            fence.wait_timeout((deadline - now).min(POLL_INTERVAL));
        }
    }

    fn check_device(&self) -> TransformResult<()> {
        self.health.check()
    }
}

impl<'a> DrawPass<'a, WgpuBackend> for wgpu::RenderPass<'a> {
    fn set_pipeline(&mut self, pipeline: &'a wgpu::RenderPipeline) {
        wgpu::RenderPass::set_pipeline(self, pipeline);
    }

    fn set_mesh(&mut self, vertices: &'a wgpu::Buffer, indices: &'a wgpu::Buffer) {
        wgpu::RenderPass::set_vertex_buffer(self, 0, vertices.slice(..));
        wgpu::RenderPass::set_index_buffer(self, indices.slice(..), wgpu::IndexFormat::Uint32);
    }

    fn set_bind_group(&mut self, index: u32, group: &'a wgpu::BindGroup, offsets: &[u32]) {
        wgpu::RenderPass::set_bind_group(self, index, group, offsets);
    }

    fn draw_indexed(&mut self, indices: Range<u32>, instances: Range<u32>) {
        wgpu::RenderPass::draw_indexed(self, indices, 0, instances);
    }
}
