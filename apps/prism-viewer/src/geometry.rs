//! Demo meshes.

use prism_core::Vertex;

/// A unit cube centered on the origin, four vertices per face so every face
/// has its own normal.
pub fn cube() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, tangent u, tangent v)
    const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in FACES {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = [
                0.5 * (normal[0] + su * u[0] + sv * v[0]),
                0.5 * (normal[1] + su * u[1] + sv * v[1]),
                0.5 * (normal[2] + su * u[2] + sv * v[2]),
            ];
            let uv = [0.5 * (su + 1.0), 0.5 * (1.0 - sv)];
            vertices.push(Vertex::new(position, normal, uv));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// A square in the XZ plane facing +Y with `repeat` texture tiles per side.
pub fn plane(half_extent: f32, repeat: f32) -> (Vec<Vertex>, Vec<u32>) {
    let normal = [0.0, 1.0, 0.0];
    let h = half_extent;
    let vertices = vec![
        Vertex::new([-h, 0.0, h], normal, [0.0, repeat]),
        Vertex::new([h, 0.0, h], normal, [repeat, repeat]),
        Vertex::new([h, 0.0, -h], normal, [repeat, 0.0]),
        Vertex::new([-h, 0.0, -h], normal, [0.0, 0.0]),
    ];
    (vertices, vec![0, 1, 2, 0, 2, 3])
}
