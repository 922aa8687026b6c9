//! Per-instance shader data.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use prism_core::constants::CONSTANT_BUFFER_ALIGNMENT;
use prism_core::math::{align_up, normal_matrix};
use prism_core::Material;

/// One entry of a view's instance-properties buffer (208 bytes).
///
/// Ray-traced entries carry both transforms. Rasterized entries leave them
/// zeroed; the raster pipeline reads the transform from its vertex data.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceProperties {
    pub object_to_world: [[f32; 4]; 4],
    pub object_to_world_normal: [[f32; 4]; 4],
    pub material: Material,
}

impl InstanceProperties {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn ray_traced(transform: &Mat4, material: Material) -> Self {
        Self {
            object_to_world: transform.to_cols_array_2d(),
            object_to_world_normal: normal_matrix(transform).to_cols_array_2d(),
            material,
        }
    }

    pub fn rasterized(material: Material) -> Self {
        Self {
            material,
            ..Self::zeroed()
        }
    }
}

/// Byte size of a properties buffer holding `count` entries.
pub const fn properties_buffer_size(count: usize) -> u64 {
    align_up(count as u64 * InstanceProperties::SIZE, CONSTANT_BUFFER_ALIGNMENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn layout() {
        assert_eq!(InstanceProperties::SIZE, 208);
        assert_eq!(std::mem::size_of::<Material>(), 80);
    }

    #[test]
    fn buffer_size_rounds_to_constant_alignment() {
        assert_eq!(properties_buffer_size(0), 0);
        assert_eq!(properties_buffer_size(1), 256);
        assert_eq!(properties_buffer_size(2), 512);
        assert_eq!(properties_buffer_size(5), 1280);
        assert_eq!(properties_buffer_size(6), 1280);
    }

    #[test]
    fn raster_entries_have_zero_transforms() {
        let material = Material {
            diffuse_texture_index: 3,
            ..Material::default()
        };
        let entry = InstanceProperties::rasterized(material);
        assert_eq!(entry.object_to_world, [[0.0; 4]; 4]);
        assert_eq!(entry.object_to_world_normal, [[0.0; 4]; 4]);
        assert_eq!(entry.material, material);
    }

    #[test]
    fn ray_traced_entries_carry_the_normal_matrix() {
        let transform = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let entry = InstanceProperties::ray_traced(&transform, Material::default());
        assert_eq!(entry.object_to_world, transform.to_cols_array_2d());
        assert_eq!(entry.object_to_world_normal[0][0], 0.5);
        assert_eq!(entry.object_to_world_normal[3][3], 1.0);
    }
}
