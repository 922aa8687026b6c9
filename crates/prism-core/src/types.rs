//! Plain data records shared between the CPU side and GPU shaders.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};

/// Mesh vertex as read by the raster pipeline and the hit shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    /// Create a vertex.
    #[inline]
    pub const fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// Surface material.
///
/// Texture indices refer to the texture range of the view's descriptor heap
/// and are resolved by the renderer when it snapshots the scene. A value of
/// `-1` means no texture.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Material {
    /// Non-zero places rasterized instances in the background pass
    pub background: u32,
    /// Texture filter mode (0 = point, 1 = linear)
    pub filter_mode: u32,
    pub diffuse_texture_index: i32,
    pub normal_texture_index: i32,
    pub normal_map_scale: f32,
    pub reflection_factor: f32,
    pub reflection_shine_factor: f32,
    pub refraction_factor: f32,
    pub specular_intensity: f32,
    pub specular_exponent: f32,
    pub solid_alpha_multiplier: f32,
    pub shadow_alpha_multiplier: f32,
    pub diffuse_color_mix: [f32; 4],
    pub self_light: [f32; 3],
    pub light_group_mask: u32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            background: 0,
            filter_mode: 1,
            diffuse_texture_index: -1,
            normal_texture_index: -1,
            normal_map_scale: 1.0,
            reflection_factor: 0.0,
            reflection_shine_factor: 0.0,
            refraction_factor: 0.0,
            specular_intensity: 1.0,
            specular_exponent: 1.0,
            solid_alpha_multiplier: 1.0,
            shadow_alpha_multiplier: 1.0,
            diffuse_color_mix: [0.0; 4],
            self_light: [0.0; 3],
            light_group_mask: u32::MAX,
        }
    }
}

impl Material {
    /// Whether a rasterized instance with this material draws behind the
    /// ray-traced image.
    #[inline]
    pub const fn is_background(&self) -> bool {
        self.background != 0
    }
}

/// Point light as stored in a scene's light buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Light {
    pub position: [f32; 3],
    pub attenuation_radius: f32,
    pub diffuse_color: [f32; 3],
    pub point_radius: f32,
    pub specular_intensity: f32,
    pub shadow_offset: f32,
    pub attenuation_exponent: f32,
    pub flicker_intensity: f32,
    pub group_bits: u32,
    pub _padding: [u32; 3],
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            attenuation_radius: 1.0,
            diffuse_color: [1.0; 3],
            point_radius: 1.0,
            specular_intensity: 1.0,
            shadow_offset: 0.0,
            attenuation_exponent: 1.0,
            flicker_intensity: 0.0,
            group_bits: u32::MAX,
            _padding: [0; 3],
        }
    }
}

bitflags! {
    /// Mesh creation flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MeshFlags: u32 {
        /// Build a bottom-level acceleration structure so instances of the
        /// mesh are ray traced instead of rasterized.
        const RAYTRACE = 1 << 0;
    }
}

/// Size of a presentable surface or render target in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width over height, or 1.0 for an empty extent.
    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        if self.is_empty() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Number of pixels covered.
    #[inline]
    pub const fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Check that `indices` describe a triangle list over `vertex_count` vertices.
pub fn validate_triangle_list(vertex_count: usize, indices: &[u32]) -> Result<()> {
    if vertex_count == 0 || indices.is_empty() {
        return Err(Error::InvalidData("mesh has no geometry".to_string()));
    }
    if indices.len() % 3 != 0 {
        return Err(Error::InvalidData(format!(
            "index count {} is not a multiple of 3",
            indices.len()
        )));
    }
    if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(Error::OutOfBounds(format!(
            "index {index} exceeds vertex count {vertex_count}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_record_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::size_of::<Material>(), 80);
        assert_eq!(std::mem::size_of::<Light>(), 64);
    }

    #[test]
    fn default_material_has_no_textures() {
        let material = Material::default();
        assert_eq!(material.diffuse_texture_index, -1);
        assert_eq!(material.normal_texture_index, -1);
        assert!(!material.is_background());
    }

    #[test]
    fn extent_aspect_ratio() {
        assert_eq!(Extent::new(1920, 1080).aspect_ratio(), 1920.0 / 1080.0);
        assert_eq!(Extent::new(0, 600).aspect_ratio(), 1.0);
        assert!(Extent::new(800, 0).is_empty());
        assert_eq!(Extent::new(800, 600).pixel_count(), 480_000);
    }

    #[test]
    fn triangle_list_validation() {
        assert!(validate_triangle_list(3, &[0, 1, 2]).is_ok());
        assert!(matches!(
            validate_triangle_list(3, &[0, 1]),
            Err(Error::InvalidData(_))
        ));
        assert!(matches!(
            validate_triangle_list(3, &[0, 1, 3]),
            Err(Error::OutOfBounds(_))
        ));
        assert!(validate_triangle_list(0, &[]).is_err());
    }
}
