//! # Mesh Registry
//!
//! Vertex and index buffers keyed by [`MeshId`]. The id is the draw key the
//! selector groups by, so two draws can only share an instanced draw when
//! they reference the same id.
//!
//! Ids come from two places:
//!
//! ```text
//! register_mesh       ──▶ 1xxx…  sequential, always a new mesh
//! register_geometry   ──▶ 0xxx…  SipHash-1-3 of the vertex + index bytes,
//!                                identical geometry returns the same id
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hasher;

use orrery_core::{FrameRing, TransformError, TransformResult};
use siphasher::sip::SipHasher13;

use crate::backend::{BufferUsage, GpuBackend};
use crate::transforms::Vertex;

const ASSIGNED_BIT: u64 = 1 << 63;

/// Geometry identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

impl MeshId {
    /// Content id of a piece of geometry.
    #[must_use]
    pub fn of_geometry(vertices: &[Vertex], indices: &[u32]) -> Self {
        let mut hasher = SipHasher13::new_with_keys(0, 0);
        hasher.write(bytemuck::cast_slice(vertices));
        hasher.write_u64(vertices.len() as u64);
        hasher.write(bytemuck::cast_slice(indices));
        Self(hasher.finish() & !ASSIGNED_BIT)
    }

    const fn assigned(sequence: u64) -> Self {
        Self(sequence | ASSIGNED_BIT)
    }

    /// Raw id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether the id was handed out by [`MeshRegistry::register_mesh`].
    #[inline]
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 & ASSIGNED_BIT != 0
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Uploaded geometry.
pub struct Mesh<B: GpuBackend> {
    vertices: B::Buffer,
    indices: B::Buffer,
    index_count: u32,
}

impl<B: GpuBackend> Mesh<B> {
    /// Vertex buffer.
    #[inline]
    #[must_use]
    pub fn vertices(&self) -> &B::Buffer {
        &self.vertices
    }

    /// `u32` index buffer.
    #[inline]
    #[must_use]
    pub fn indices(&self) -> &B::Buffer {
        &self.indices
    }

    /// Indices drawn per instance.
    #[inline]
    #[must_use]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Meshes by id, with releases deferred past in-flight frames.
pub struct MeshRegistry<B: GpuBackend> {
    meshes: HashMap<MeshId, Mesh<B>>,
    next_sequence: u64,
    max_meshes: usize,
    deferred: Vec<(u64, Mesh<B>)>,
}

impl<B: GpuBackend> MeshRegistry<B> {
    /// Creates an empty registry holding at most `max_meshes` meshes.
    #[must_use]
    pub fn new(max_meshes: usize) -> Self {
        Self {
            meshes: HashMap::new(),
            next_sequence: 0,
            max_meshes,
            deferred: Vec::new(),
        }
    }

    /// Number of registered meshes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// Whether no mesh is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Number of removed meshes still waiting for their frame to retire.
    #[inline]
    #[must_use]
    pub fn pending_releases(&self) -> usize {
        self.deferred.len()
    }

    /// Uploads geometry under a fresh id.
    ///
    /// `index_count` larger than `indices.len()` is clamped.
    ///
    /// # Errors
    ///
    /// [`TransformError::MeshLimitReached`] when the registry is full.
    pub fn register_mesh(
        &mut self,
        backend: &B,
        vertices: &[Vertex],
        indices: &[u32],
        index_count: u32,
    ) -> TransformResult<MeshId> {
        self.check_limit()?;
        let id = MeshId::assigned(self.next_sequence);
        self.next_sequence += 1;
        let mesh = upload(backend, id, vertices, indices, index_count);
        self.meshes.insert(id, mesh);
        Ok(id)
    }

    /// Uploads geometry under its content id, reusing an identical mesh.
    ///
    /// # Errors
    ///
    /// [`TransformError::MeshLimitReached`] when the geometry is new and the
    /// registry is full.
    pub fn register_geometry(
        &mut self,
        backend: &B,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> TransformResult<MeshId> {
        let id = MeshId::of_geometry(vertices, indices);
        if self.meshes.contains_key(&id) {
            tracing::trace!(mesh = %id, "Geometry already registered");
            return Ok(id);
        }
        self.check_limit()?;
        let count = u32::try_from(indices.len()).unwrap_or(u32::MAX);
        let mesh = upload(backend, id, vertices, indices, count);
        self.meshes.insert(id, mesh);
        Ok(id)
    }

    /// Looks up a mesh.
    ///
    /// # Errors
    ///
    /// [`TransformError::UnknownMesh`] if `id` is not registered.
    pub fn get(&self, id: MeshId) -> TransformResult<&Mesh<B>> {
        self.meshes
            .get(&id)
            .ok_or(TransformError::UnknownMesh(id.raw()))
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: MeshId) -> bool {
        self.meshes.contains_key(&id)
    }

    /// Unregisters a mesh.
    ///
    /// Its buffers are released once every frame acquired so far retired.
    ///
    /// # Errors
    ///
    /// [`TransformError::UnknownMesh`] if `id` is not registered.
    pub fn remove_mesh(&mut self, ring: &FrameRing, id: MeshId) -> TransformResult<()> {
        let mesh = self
            .meshes
            .remove(&id)
            .ok_or(TransformError::UnknownMesh(id.raw()))?;

        let busy = ring.in_flight() > 0 || ring.current().is_some();
        if busy {
            let frame = ring.next_frame().saturating_sub(1);
            tracing::debug!(mesh = %id, frame, "Deferring mesh release");
            self.deferred.push((frame, mesh));
        }
        Ok(())
    }

    /// Releases removed meshes whose last frame retired.
    ///
    /// A mesh removed while its frame was still being recorded stays until
    /// that frame was submitted and completed.
    pub fn collect_garbage(&mut self, ring: &FrameRing) -> usize {
        let recording = ring.current().map(|slot| slot.frame());
        let before = self.deferred.len();
        self.deferred.retain(|(frame, _)| {
            recording.is_some_and(|current| current <= *frame) || !ring.is_frame_retired(*frame)
        });
        let released = before - self.deferred.len();
        if released > 0 {
            tracing::debug!(released, "Released removed meshes");
        }
        released
    }

    fn check_limit(&self) -> TransformResult<()> {
        if self.meshes.len() >= self.max_meshes {
            tracing::warn!(max = self.max_meshes, "Mesh registry full");
            return Err(TransformError::MeshLimitReached(self.max_meshes));
        }
        Ok(())
    }
}

fn upload<B: GpuBackend>(
    backend: &B,
    id: MeshId,
    vertices: &[Vertex],
    indices: &[u32],
    index_count: u32,
) -> Mesh<B> {
    let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
    let index_bytes: &[u8] = bytemuck::cast_slice(indices);

    let vertex_buffer = backend.create_buffer(
        &format!("Mesh {id} Vertices"),
        vertex_bytes.len() as u64,
        BufferUsage::Vertex,
    );
    backend.write_buffer(&vertex_buffer, 0, vertex_bytes);

    let index_buffer = backend.create_buffer(
        &format!("Mesh {id} Indices"),
        index_bytes.len() as u64,
        BufferUsage::Index,
    );
    backend.write_buffer(&index_buffer, 0, index_bytes);

    let available = u32::try_from(indices.len()).unwrap_or(u32::MAX);
    if index_count > available {
        tracing::warn!(mesh = %id, index_count, available, "Clamping index count");
    }

    Mesh {
        vertices: vertex_buffer,
        indices: index_buffer,
        index_count: index_count.min(available),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use orrery_core::{AcquirePolicy, Fence};

    fn triangle() -> (Vec<Vertex>, Vec<u32>) {
        let vertices = vec![
            Vertex::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0]),
            Vertex::new([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        ];
        (vertices, vec![0, 1, 2])
    }

    #[test]
    fn test_geometry_dedup() {
        let backend = HeadlessBackend::new();
        let mut registry = MeshRegistry::new(8);
        let (vertices, indices) = triangle();

        let a = registry.register_geometry(&backend, &vertices, &indices).unwrap();
        let b = registry.register_geometry(&backend, &vertices, &indices).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_assigned());
        assert_eq!(registry.len(), 1);
        assert_eq!(backend.live_buffers(), 2);
    }

    #[test]
    fn test_assigned_ids_are_distinct() {
        let backend = HeadlessBackend::new();
        let mut registry = MeshRegistry::new(8);
        let (vertices, indices) = triangle();

        let a = registry.register_mesh(&backend, &vertices, &indices, 3).unwrap();
        let b = registry.register_mesh(&backend, &vertices, &indices, 3).unwrap();
        assert_ne!(a, b);
        assert!(a.is_assigned());
        assert_ne!(a, MeshId::of_geometry(&vertices, &indices));
    }

    #[test]
    fn test_index_count_clamped() {
        let backend = HeadlessBackend::new();
        let mut registry = MeshRegistry::new(8);
        let (vertices, indices) = triangle();
        let id = registry.register_mesh(&backend, &vertices, &indices, 99).unwrap();
        assert_eq!(registry.get(id).unwrap().index_count(), 3);
    }

    #[test]
    fn test_limit_and_unknown() {
        let backend = HeadlessBackend::new();
        let mut registry = MeshRegistry::new(1);
        let (vertices, indices) = triangle();
        registry.register_mesh(&backend, &vertices, &indices, 3).unwrap();

        assert!(matches!(
            registry.register_mesh(&backend, &vertices, &indices, 3),
            Err(TransformError::MeshLimitReached(1))
        ));
        assert!(matches!(
            registry.get(MeshId::of_geometry(&[], &[])),
            Err(TransformError::UnknownMesh(_))
        ));
    }

    #[test]
    fn test_removal_waits_for_frame() {
        let backend = HeadlessBackend::new();
        let mut ring = FrameRing::new(2, AcquirePolicy::NonBlocking);
        let mut registry = MeshRegistry::new(4);
        let (vertices, indices) = triangle();
        let id = registry.register_mesh(&backend, &vertices, &indices, 3).unwrap();

        let slot = ring.acquire_slot_for_writing().unwrap();
        registry.remove_mesh(&ring, id).unwrap();
        assert!(!registry.contains(id));
        assert_eq!(registry.pending_releases(), 1);
        assert_eq!(registry.collect_garbage(&ring), 0);

        let fence = Fence::new();
        ring.submit(slot, fence.clone()).unwrap();
        assert_eq!(registry.collect_garbage(&ring), 0);
        assert_eq!(backend.live_buffers(), 2);

        fence.signal();
        ring.poll_retirements();
        assert_eq!(registry.collect_garbage(&ring), 1);
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_idle_removal_is_immediate() {
        let backend = HeadlessBackend::new();
        let ring = FrameRing::new(2, AcquirePolicy::NonBlocking);
        let mut registry = MeshRegistry::new(4);
        let (vertices, indices) = triangle();
        let id = registry.register_mesh(&backend, &vertices, &indices, 3).unwrap();

        registry.remove_mesh(&ring, id).unwrap();
        assert_eq!(registry.pending_releases(), 0);
        assert_eq!(backend.live_buffers(), 0);
    }
}
