//! GPU-visible transform and vertex layouts.
//!
//! All of these are `#[repr(C)]` + `Pod` and are copied to the GPU as raw
//! bytes; their layout must match the shader declarations exactly.

use bytemuck::{Pod, Zeroable};
use orrery_core::math::{self, Mat4, IDENTITY};

/// Legacy per-object uniform block, `{ model; view; proj }`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectTransform {
    /// Object to world.
    pub model: Mat4,
    /// World to camera.
    pub view: Mat4,
    /// Camera to clip.
    pub proj: Mat4,
}

impl ObjectTransform {
    /// Size in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Creates a block from the three matrices.
    #[inline]
    #[must_use]
    pub const fn new(model: Mat4, view: Mat4, proj: Mat4) -> Self {
        Self { model, view, proj }
    }

    /// Block carrying a pre-composed view-projection.
    ///
    /// The shader computes `proj · view · model`; putting `view_proj` in the
    /// view slot and identity in the projection slot yields the same clip
    /// position as the instanced path.
    #[inline]
    #[must_use]
    pub const fn with_view_proj(model: Mat4, view_proj: Mat4) -> Self {
        Self {
            model,
            view: view_proj,
            proj: IDENTITY,
        }
    }

    /// The full clip-space transform this block produces in the shader.
    #[must_use]
    pub fn clip_transform(&self) -> Mat4 {
        math::compose(&self.model, &self.view, &self.proj)
    }
}

/// Instanced shared uniform block, `{ view_proj }`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    /// `projection · view`.
    pub view_proj: Mat4,
}

impl ViewProjection {
    /// Size in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Composes the block from separate view and projection.
    #[inline]
    #[must_use]
    pub fn from_camera(view: &Mat4, proj: &Mat4) -> Self {
        Self {
            view_proj: math::compose_view_proj(view, proj),
        }
    }
}

/// Size in bytes of one entry of the instanced `model[]` array.
pub const MODEL_MATRIX_SIZE: u64 = std::mem::size_of::<Mat4>() as u64;

/// Shared vertex layout: position, color, texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Location 0.
    pub position: [f32; 3],
    /// Location 1.
    pub color: [f32; 3],
    /// Location 2.
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Size in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Creates a vertex.
    #[inline]
    #[must_use]
    pub const fn new(position: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            color,
            tex_coord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_core::layout::{assign_locations, VERTEX_ATTRIBUTES};

    #[test]
    fn test_block_sizes() {
        assert_eq!(ObjectTransform::SIZE, 192);
        assert_eq!(ViewProjection::SIZE, 64);
        assert_eq!(MODEL_MATRIX_SIZE, 64);
        assert_eq!(Vertex::SIZE, 32);
    }

    #[test]
    fn test_vertex_matches_attribute_offsets() {
        let slots = assign_locations(&VERTEX_ATTRIBUTES);
        let packed: u64 = VERTEX_ATTRIBUTES.iter().map(|f| f.size()).sum();
        assert_eq!(packed, Vertex::SIZE);

        let v = Vertex::new([1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0]);
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&v));
        assert_eq!(floats[slots[1].offset as usize / 4], 4.0);
        assert_eq!(floats[slots[2].offset as usize / 4], 7.0);
    }

    #[test]
    fn test_view_proj_block_equivalent_to_instanced() {
        let model = math::translation(1.0, 2.0, 3.0);
        let view = math::look_at([0.0, 2.0, 8.0], [0.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let proj = math::perspective(1.0, 1.5, 0.1, 50.0);

        let vp = ViewProjection::from_camera(&view, &proj);
        let legacy = ObjectTransform::with_view_proj(model, vp.view_proj);
        let direct = ObjectTransform::new(model, view, proj);

        assert!(math::approx_eq(
            &legacy.clip_transform(),
            &direct.clip_transform(),
            1e-4
        ));
    }
}
