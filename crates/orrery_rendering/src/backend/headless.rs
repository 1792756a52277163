//! In-memory backend.
//!
//! Keeps the bytes of every buffer, logs every upload and records draws
//! instead of executing them. Fences are only signaled when the test (or
//! tool) says the "GPU" finished, via [`HeadlessBackend::retire_all`].

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use orrery_core::layout::{
    INSTANCED_MODELS_BINDING, INSTANCED_VIEW_PROJ_BINDING, LEGACY_OBJECT_BINDING,
};
use orrery_core::{BindingMode, Fence, TransformError, TransformResult};
use parking_lot::Mutex;

use super::{BackendLimits, BufferUsage, DrawPass, GpuBackend, TransformBindings};
use crate::transforms::{ObjectTransform, ViewProjection};

#[derive(Debug)]
struct BufferRecord {
    label: String,
    usage: BufferUsage,
    contents: Vec<u8>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_id: u64,
    buffers: HashMap<u64, BufferRecord>,
    writes: Vec<WriteRecord>,
    released: Vec<u64>,
    pending: Vec<Fence>,
    lost: Option<String>,
}

/// One `write_buffer` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    /// Buffer id.
    pub buffer: u64,
    /// Buffer label.
    pub label: String,
    /// Buffer usage.
    pub usage: BufferUsage,
    /// Destination offset in bytes.
    pub offset: u64,
    /// Bytes written.
    pub len: u64,
}

/// Buffer handle. Dropping it releases the buffer.
#[derive(Debug)]
pub struct HeadlessBuffer {
    id: u64,
    size: u64,
    usage: BufferUsage,
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessBuffer {
    /// Unique id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Usage the buffer was created with.
    #[inline]
    #[must_use]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.buffers.remove(&self.id);
        state.released.push(self.id);
    }
}

/// One buffer binding inside a bind group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundBuffer {
    /// Binding index.
    pub binding: u32,
    /// Buffer id.
    pub buffer: u64,
    /// Visible bytes from the dynamic offset.
    pub window: u64,
}

/// Bind group snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadlessBindGroup {
    /// Layout the group was created for.
    pub mode: BindingMode,
    /// Bindings in binding order.
    pub buffers: Vec<BoundBuffer>,
}

impl HeadlessBindGroup {
    /// The buffer bound at `binding`, if any.
    #[must_use]
    pub fn buffer_at(&self, binding: u32) -> Option<BoundBuffer> {
        self.buffers.iter().copied().find(|b| b.binding == binding)
    }
}

/// Stand-in for a compiled pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadlessPipeline {
    label: String,
}

impl HeadlessPipeline {
    /// Creates a pipeline stand-in.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    /// Pipeline label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// A recorded indexed draw with the state bound at the time.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCommand {
    /// Label of the bound pipeline.
    pub pipeline: Option<String>,
    /// Bound vertex buffer id.
    pub vertex_buffer: Option<u64>,
    /// Bound index buffer id.
    pub index_buffer: Option<u64>,
    /// Bound set 0.
    pub bind_group: Option<HeadlessBindGroup>,
    /// Dynamic offsets passed with set 0.
    pub dynamic_offsets: Vec<u32>,
    /// Index range.
    pub indices: Range<u32>,
    /// Instance range.
    pub instances: Range<u32>,
}

impl DrawCommand {
    /// Number of instances drawn.
    #[must_use]
    pub fn instance_count(&self) -> u32 {
        self.instances.end - self.instances.start
    }
}

/// Records commands instead of executing them.
#[derive(Debug, Default)]
pub struct HeadlessPass {
    commands: Vec<DrawCommand>,
    pipeline: Option<String>,
    mesh: Option<(u64, u64)>,
    bind_group: Option<(HeadlessBindGroup, Vec<u32>)>,
}

impl HeadlessPass {
    /// Creates an empty pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded draws in order.
    #[must_use]
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }
}

impl<'a> DrawPass<'a, HeadlessBackend> for HeadlessPass {
    fn set_pipeline(&mut self, pipeline: &'a HeadlessPipeline) {
        self.pipeline = Some(pipeline.label.clone());
    }

    fn set_mesh(&mut self, vertices: &'a HeadlessBuffer, indices: &'a HeadlessBuffer) {
        self.mesh = Some((vertices.id, indices.id));
    }

    fn set_bind_group(&mut self, _index: u32, group: &'a HeadlessBindGroup, offsets: &[u32]) {
        self.bind_group = Some((group.clone(), offsets.to_vec()));
    }

    fn draw_indexed(&mut self, indices: Range<u32>, instances: Range<u32>) {
        let (bind_group, dynamic_offsets) = match &self.bind_group {
            Some((group, offsets)) => (Some(group.clone()), offsets.clone()),
            None => (None, Vec::new()),
        };
        self.commands.push(DrawCommand {
            pipeline: self.pipeline.clone(),
            vertex_buffer: self.mesh.map(|(v, _)| v),
            index_buffer: self.mesh.map(|(_, i)| i),
            bind_group,
            dynamic_offsets,
            indices,
            instances,
        });
    }
}

/// Backend that keeps everything in memory.
#[derive(Debug)]
pub struct HeadlessBackend {
    state: Arc<Mutex<HeadlessState>>,
    limits: BackendLimits,
}

impl HeadlessBackend {
    /// Creates a backend with default (256-byte alignment) limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(BackendLimits::default())
    }

    /// Creates a backend reporting `limits`.
    #[must_use]
    pub fn with_limits(limits: BackendLimits) -> Self {
        Self {
            state: Arc::new(Mutex::new(HeadlessState::default())),
            limits,
        }
    }

    /// Reads `len` bytes of buffer `id` at `offset`.
    ///
    /// Returns `None` if the buffer was released or the range is out of
    /// bounds.
    #[must_use]
    pub fn read_buffer(&self, id: u64, offset: u64, len: u64) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let record = state.buffers.get(&id)?;
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        record.contents.get(start..end).map(<[u8]>::to_vec)
    }

    /// Every upload since the last [`Self::clear_writes`].
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Forgets the upload log.
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Whether buffer `id` is still alive.
    #[must_use]
    pub fn is_live(&self, id: u64) -> bool {
        self.state.lock().buffers.contains_key(&id)
    }

    /// Number of live buffers.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Label of a live buffer.
    #[must_use]
    pub fn buffer_label(&self, id: u64) -> Option<String> {
        self.state.lock().buffers.get(&id).map(|b| b.label.clone())
    }

    /// Ids of released buffers, in release order.
    #[must_use]
    pub fn released(&self) -> Vec<u64> {
        self.state.lock().released.clone()
    }

    /// Completes all submitted work. Returns the number of fences signaled.
    pub fn retire_all(&self) -> usize {
        let pending = std::mem::take(&mut self.state.lock().pending);
        for fence in &pending {
            fence.signal();
        }
        pending.len()
    }

    /// Number of fences handed out and not yet signaled.
    #[must_use]
    pub fn pending_fences(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Marks the device as lost.
    pub fn lose_device(&self, reason: impl Into<String>) {
        self.state.lock().lost = Some(reason.into());
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for HeadlessBackend {
    type Buffer = HeadlessBuffer;
    type BindGroup = HeadlessBindGroup;
    type Pipeline = HeadlessPipeline;

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsage) -> HeadlessBuffer {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let len = usize::try_from(size).unwrap_or(usize::MAX);
        state.buffers.insert(
            id,
            BufferRecord {
                label: label.to_owned(),
                usage,
                contents: vec![0; len],
            },
        );
        HeadlessBuffer {
            id,
            size,
            usage,
            state: Arc::clone(&self.state),
        }
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) {
        let mut state = self.state.lock();
        let Some(record) = state.buffers.get_mut(&buffer.id) else {
            return;
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(data.len());
        assert!(
            end <= record.contents.len(),
            "write of {} bytes at {offset} overruns buffer '{}' ({} bytes)",
            data.len(),
            record.label,
            record.contents.len()
        );
        record.contents[start..end].copy_from_slice(data);
        let write = WriteRecord {
            buffer: buffer.id,
            label: record.label.clone(),
            usage: record.usage,
            offset,
            len: data.len() as u64,
        };
        state.writes.push(write);
    }

    fn create_transform_bind_group(
        &self,
        _label: &str,
        bindings: TransformBindings<'_, HeadlessBuffer>,
    ) -> HeadlessBindGroup {
        let mode = bindings.mode();
        let buffers = match bindings {
            TransformBindings::Legacy { objects } => vec![BoundBuffer {
                binding: LEGACY_OBJECT_BINDING,
                buffer: objects.id,
                window: ObjectTransform::SIZE,
            }],
            TransformBindings::Instanced {
                models,
                models_window,
                view_proj,
            } => vec![
                BoundBuffer {
                    binding: INSTANCED_MODELS_BINDING,
                    buffer: models.id,
                    window: models_window,
                },
                BoundBuffer {
                    binding: INSTANCED_VIEW_PROJ_BINDING,
                    buffer: view_proj.id,
                    window: ViewProjection::SIZE,
                },
            ],
        };
        HeadlessBindGroup { mode, buffers }
    }

    fn completion_fence(&self) -> Fence {
        let fence = Fence::new();
        self.state.lock().pending.push(fence.clone());
        fence
    }

    fn wait_for(&self, fence: &Fence, timeout: Duration) -> bool {
        fence.wait_timeout(timeout)
    }

    fn check_device(&self) -> TransformResult<()> {
        match &self.state.lock().lost {
            Some(reason) => Err(TransformError::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }
}
