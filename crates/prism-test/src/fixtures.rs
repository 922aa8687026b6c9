//! Geometry, textures and lights shared by the integration tests.

use image::{ImageBuffer, Rgba, RgbaImage};
use prism_core::{Light, Material, Vertex};

/// A single triangle in the XY plane facing +Z.
pub fn triangle() -> (Vec<Vertex>, Vec<u32>) {
    let normal = [0.0, 0.0, 1.0];
    let vertices = vec![
        Vertex::new([-0.5, -0.5, 0.0], normal, [0.0, 1.0]),
        Vertex::new([0.5, -0.5, 0.0], normal, [1.0, 1.0]),
        Vertex::new([0.0, 0.5, 0.0], normal, [0.5, 0.0]),
    ];
    (vertices, vec![0, 1, 2])
}

/// A unit quad in the XY plane facing +Z, two triangles.
pub fn quad() -> (Vec<Vertex>, Vec<u32>) {
    let normal = [0.0, 0.0, 1.0];
    let vertices = vec![
        Vertex::new([-0.5, -0.5, 0.0], normal, [0.0, 1.0]),
        Vertex::new([0.5, -0.5, 0.0], normal, [1.0, 1.0]),
        Vertex::new([0.5, 0.5, 0.0], normal, [1.0, 0.0]),
        Vertex::new([-0.5, 0.5, 0.0], normal, [0.0, 0.0]),
    ];
    (vertices, vec![0, 1, 2, 0, 2, 3])
}

/// A `size`x`size` checkerboard with `cell`-pixel squares.
pub fn checkerboard(size: u32, cell: u32) -> RgbaImage {
    let cell = cell.max(1);
    ImageBuffer::from_fn(size, size, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Rgba([230, 230, 230, 255])
        } else {
            Rgba([40, 40, 40, 255])
        }
    })
}

/// A texture filled with one color.
pub fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    ImageBuffer::from_pixel(width, height, Rgba(color))
}

/// A white point light.
pub fn point_light(position: [f32; 3], radius: f32) -> Light {
    Light {
        position,
        attenuation_radius: radius,
        ..Light::default()
    }
}

/// Material that draws rasterized instances behind the ray-traced image.
pub fn background_material() -> Material {
    Material {
        background: 1,
        ..Material::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_indices_stay_in_range() {
        let (vertices, indices) = quad();
        assert_eq!(indices.len() % 3, 0);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn checkerboard_alternates() {
        let image = checkerboard(4, 2);
        assert_eq!(image.get_pixel(0, 0), image.get_pixel(1, 1));
        assert_ne!(image.get_pixel(0, 0), image.get_pixel(2, 0));
        assert_eq!(image.as_raw().len(), 4 * 4 * 4);
    }
}
