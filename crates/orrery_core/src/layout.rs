//! # Shader Contract
//!
//! The binding slots and vertex attribute locations the two compiled shader
//! variants declare. These are fixed: they must match the compiled shaders,
//! so nothing here is configurable at runtime.
//!
//! ```text
//! Legacy variant                      Instanced variant
//! ──────────────                      ─────────────────
//! set 0 binding 0  uniform            set 0 binding 0  storage  model[]
//!   { model, view, proj }             set 0 binding 1  uniform  { view_proj }
//!
//! location 0  position  vec3          (same for both)
//! location 1  color     vec3
//! location 2  texcoord  vec2
//! ```

use std::fmt;

/// Descriptor set holding every transform binding.
pub const TRANSFORM_SET: u32 = 0;

/// Legacy: uniform block `{ model; view; proj }`.
pub const LEGACY_OBJECT_BINDING: u32 = 0;

/// Instanced: storage buffer of per-instance model matrices.
pub const INSTANCED_MODELS_BINDING: u32 = 0;

/// Instanced: uniform block `{ view_proj }`.
pub const INSTANCED_VIEW_PROJ_BINDING: u32 = 1;

/// Vertex attribute location of the position.
pub const POSITION_LOCATION: u32 = 0;

/// Vertex attribute location of the color.
pub const COLOR_LOCATION: u32 = 1;

/// Vertex attribute location of the texture coordinate.
pub const TEX_COORD_LOCATION: u32 = 2;

/// The two ways transforms reach the vertex shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingMode {
    /// One `{ model, view, proj }` uniform block per object, one draw per object.
    Legacy,
    /// One model-matrix storage array plus a shared view-projection uniform,
    /// one draw for N instances.
    Instanced,
}

impl BindingMode {
    /// The bindings this mode requires in set 0, in binding order.
    #[must_use]
    pub const fn bindings(self) -> &'static [BindingSlot] {
        match self {
            Self::Legacy => &[BindingSlot {
                binding: LEGACY_OBJECT_BINDING,
                kind: BindingKind::Uniform,
            }],
            Self::Instanced => &[
                BindingSlot {
                    binding: INSTANCED_MODELS_BINDING,
                    kind: BindingKind::ReadOnlyStorage,
                },
                BindingSlot {
                    binding: INSTANCED_VIEW_PROJ_BINDING,
                    kind: BindingKind::Uniform,
                },
            ],
        }
    }

    /// The shader variant that declares this mode's bindings.
    #[inline]
    #[must_use]
    pub const fn shader_variant(self) -> ShaderVariant {
        match self {
            Self::Legacy => ShaderVariant::LegacyTransform,
            Self::Instanced => ShaderVariant::InstancedTransform,
        }
    }
}

impl fmt::Display for BindingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Instanced => f.write_str("instanced"),
        }
    }
}

/// Kind of buffer a binding slot expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Uniform block.
    Uniform,
    /// Read-only storage buffer.
    ReadOnlyStorage,
}

/// One slot of the transform descriptor set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    /// Binding index inside [`TRANSFORM_SET`].
    pub binding: u32,
    /// Expected buffer kind.
    pub kind: BindingKind,
}

/// Which compiled shader a pipeline object was built from.
///
/// Pipelines are created outside this crate; the host tags each one with
/// the variant it was compiled from so draws can be checked against the
/// binding mode they were planned for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderVariant {
    /// The single-object shader: one `{ model, view, proj }` block.
    LegacyTransform,
    /// The instanced shader: `model[]` storage + `{ view_proj }` uniform.
    InstancedTransform,
}

impl ShaderVariant {
    /// The binding mode whose layout this variant declares.
    #[must_use]
    pub const fn binding_mode(self) -> BindingMode {
        match self {
            Self::LegacyTransform => BindingMode::Legacy,
            Self::InstancedTransform => BindingMode::Instanced,
        }
    }
}

/// Vertex attribute component formats understood by the location allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    /// `f32`
    Float32,
    /// `vec2<f32>`
    Float32x2,
    /// `vec3<f32>`
    Float32x3,
    /// `vec4<f32>`
    Float32x4,
    /// `f64`
    Float64,
    /// `dvec2`
    Float64x2,
    /// `dvec3`
    Float64x3,
    /// `dvec4`
    Float64x4,
}

impl AttributeFormat {
    /// Size of one attribute of this format in bytes.
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            Self::Float32 => 4,
            Self::Float32x2 | Self::Float64 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 | Self::Float64x2 => 16,
            Self::Float64x3 => 24,
            Self::Float64x4 => 32,
        }
    }

    /// Whether the components are 64-bit.
    #[must_use]
    pub const fn is_double(self) -> bool {
        matches!(
            self,
            Self::Float64 | Self::Float64x2 | Self::Float64x3 | Self::Float64x4
        )
    }

    /// Number of consecutive locations the attribute occupies.
    ///
    /// 64-bit attributes double their slot width: a double-precision
    /// attribute at location L also consumes L + 1.
    #[must_use]
    pub const fn location_span(self) -> u32 {
        if self.is_double() {
            2
        } else {
            1
        }
    }
}

/// One attribute with its assigned location and byte offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttributeSlot {
    /// Shader location.
    pub location: u32,
    /// Offset in bytes from the start of the vertex.
    pub offset: u64,
    /// Attribute format.
    pub format: AttributeFormat,
}

/// Assigns shader locations and packed offsets to a list of attributes.
///
/// Locations are handed out in order, starting at 0, each attribute
/// advancing the next location by its [`AttributeFormat::location_span`].
#[must_use]
pub fn assign_locations(formats: &[AttributeFormat]) -> Vec<AttributeSlot> {
    let mut location = 0;
    let mut offset = 0;
    formats
        .iter()
        .map(|&format| {
            let slot = AttributeSlot {
                location,
                offset,
                format,
            };
            location += format.location_span();
            offset += format.size();
            slot
        })
        .collect()
}

/// Attribute formats of the shared vertex: position, color, texcoord.
pub const VERTEX_ATTRIBUTES: [AttributeFormat; 3] = [
    AttributeFormat::Float32x3,
    AttributeFormat::Float32x3,
    AttributeFormat::Float32x2,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_attributes_match_contract() {
        let slots = assign_locations(&VERTEX_ATTRIBUTES);
        assert_eq!(slots[0].location, POSITION_LOCATION);
        assert_eq!(slots[1].location, COLOR_LOCATION);
        assert_eq!(slots[2].location, TEX_COORD_LOCATION);
        assert_eq!(slots[2].offset, 24);
    }

    #[test]
    fn test_wide_double_attribute_consumes_two_locations() {
        let slots = assign_locations(&[
            AttributeFormat::Float64x3,
            AttributeFormat::Float32x3,
            AttributeFormat::Float64x4,
            AttributeFormat::Float32,
        ]);
        assert_eq!(slots[0].location, 0);
        assert_eq!(slots[1].location, 2);
        assert_eq!(slots[2].location, 3);
        assert_eq!(slots[3].location, 5);
    }

    #[test]
    fn test_every_double_attribute_doubles_its_span() {
        assert!(AttributeFormat::Float64x2.is_double());
        assert_eq!(AttributeFormat::Float64.location_span(), 2);
        assert_eq!(AttributeFormat::Float64x2.location_span(), 2);
        assert_eq!(AttributeFormat::Float32x4.location_span(), 1);
    }

    #[test]
    fn test_mode_bindings() {
        let instanced = BindingMode::Instanced.bindings();
        assert_eq!(instanced.len(), 2);
        assert_eq!(instanced[0].kind, BindingKind::ReadOnlyStorage);
        assert_eq!(instanced[1].binding, INSTANCED_VIEW_PROJ_BINDING);

        let legacy = BindingMode::Legacy.bindings();
        assert_eq!(legacy, &[BindingSlot { binding: 0, kind: BindingKind::Uniform }]);
    }

    #[test]
    fn test_variant_modes() {
        assert_eq!(ShaderVariant::LegacyTransform.binding_mode(), BindingMode::Legacy);
        assert_eq!(ShaderVariant::InstancedTransform.binding_mode(), BindingMode::Instanced);
        for mode in [BindingMode::Legacy, BindingMode::Instanced] {
            assert_eq!(mode.shader_variant().binding_mode(), mode);
        }
    }
}
