//! Triangle meshes.

use prism_core::{validate_triangle_list, MeshFlags, Vertex};
use prism_gpu::{Backend, BufferDesc, BufferUsage, GpuBuffer, TriangleGeometry};
use prism_rt::BottomLevelAccelerationStructure;

use crate::error::{RenderError, Result};

const VERTEX_STRIDE: u64 = std::mem::size_of::<Vertex>() as u64;

/// Vertex and index data in upload-heap buffers, plus a bottom level when
/// the mesh is ray traced.
pub struct Mesh<B: Backend + ?Sized> {
    vertex_buffer: GpuBuffer<B>,
    index_buffer: GpuBuffer<B>,
    vertex_count: u32,
    index_count: u32,
    bottom_level: Option<BottomLevelAccelerationStructure<B>>,
}

impl<B: Backend + ?Sized> Mesh<B> {
    /// Upload the geometry. With [`MeshFlags::RAYTRACE`] the bottom-level
    /// build is recorded into the open command list.
    pub fn new(
        backend: &mut B,
        vertices: &[Vertex],
        indices: &[u32],
        flags: MeshFlags,
        name: &str,
    ) -> Result<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RenderError::InvalidMesh(format!(
                "{name}: {} vertices, {} indices",
                vertices.len(),
                indices.len()
            )));
        }
        validate_triangle_list(vertices.len(), indices)?;

        let mut mesh = Self {
            vertex_buffer: GpuBuffer::null(),
            index_buffer: GpuBuffer::null(),
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
            bottom_level: None,
        };
        if let Err(e) = mesh.upload(backend, vertices, indices, flags, name) {
            mesh.release(backend);
            return Err(e);
        }
        Ok(mesh)
    }

    fn upload(
        &mut self,
        backend: &mut B,
        vertices: &[Vertex],
        indices: &[u32],
        flags: MeshFlags,
        name: &str,
    ) -> Result<()> {
        let geometry_usage =
            BufferUsage::STORAGE | BufferUsage::ACCELERATION_STRUCTURE_INPUT | BufferUsage::DEVICE_ADDRESS;

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        self.vertex_buffer = GpuBuffer::allocate(
            backend,
            &BufferDesc::upload(
                &format!("{name}-vertices"),
                vertex_bytes.len() as u64,
                BufferUsage::VERTEX | geometry_usage,
            ),
        )?;
        if let Some(buffer) = self.vertex_buffer.get() {
            backend.write_buffer(buffer, 0, vertex_bytes)?;
        }

        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        self.index_buffer = GpuBuffer::allocate(
            backend,
            &BufferDesc::upload(
                &format!("{name}-indices"),
                index_bytes.len() as u64,
                BufferUsage::INDEX | geometry_usage,
            ),
        )?;
        if let Some(buffer) = self.index_buffer.get() {
            backend.write_buffer(buffer, 0, index_bytes)?;
        }

        if flags.contains(MeshFlags::RAYTRACE) {
            if let Some(geometry) = self.geometry() {
                self.bottom_level = Some(BottomLevelAccelerationStructure::build(
                    backend,
                    &geometry,
                    &format!("{name}-blas"),
                )?);
            }
        }
        Ok(())
    }

    /// The geometry as a bottom-level build input.
    pub fn geometry(&self) -> Option<TriangleGeometry<B>> {
        Some(TriangleGeometry {
            vertex_buffer: self.vertex_buffer.get()?,
            vertex_count: self.vertex_count,
            vertex_stride: VERTEX_STRIDE,
            index_buffer: self.index_buffer.get()?,
            index_count: self.index_count,
        })
    }

    pub const fn vertex_buffer(&self) -> Option<B::Buffer> {
        self.vertex_buffer.get()
    }

    pub const fn index_buffer(&self) -> Option<B::Buffer> {
        self.index_buffer.get()
    }

    pub const fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub const fn index_count(&self) -> u32 {
        self.index_count
    }

    pub const fn bottom_level(&self) -> Option<&BottomLevelAccelerationStructure<B>> {
        self.bottom_level.as_ref()
    }

    pub fn release(&mut self, backend: &mut B) {
        if let Some(mut bottom_level) = self.bottom_level.take() {
            bottom_level.release(backend);
        }
        self.index_buffer.release(backend);
        self.vertex_buffer.release(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::Extent;
    use prism_gpu::headless::{Command, HeadlessBackend};

    fn triangle() -> [Vertex; 3] {
        [
            Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
            Vertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
            Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        ]
    }

    fn open_backend() -> HeadlessBackend {
        let mut backend = HeadlessBackend::new(Extent::new(4, 4));
        backend.reset_command_list().unwrap();
        backend
    }

    #[test]
    fn raster_meshes_have_no_bottom_level() {
        let mut backend = open_backend();
        let mut mesh = Mesh::new(&mut backend, &triangle(), &[0, 1, 2], MeshFlags::empty(), "quad").unwrap();

        assert!(mesh.bottom_level().is_none());
        assert_eq!(mesh.index_count(), 3);
        assert_eq!(backend.live_buffers(), 2);
        assert!(backend.recorded().is_empty());

        let (_, vertices) = backend.find_buffer("quad-vertices").unwrap();
        assert_eq!(vertices.size, 96);
        assert_eq!(&vertices.data[12..16], &0.0f32.to_le_bytes());

        mesh.release(&mut backend);
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn ray_traced_meshes_build_once_at_creation() {
        let mut backend = open_backend();
        let mut mesh = Mesh::new(&mut backend, &triangle(), &[0, 1, 2], MeshFlags::RAYTRACE, "tri").unwrap();

        assert!(mesh.bottom_level().is_some());
        assert_eq!(backend.live_structures(), 1);
        assert!(matches!(
            &backend.recorded()[0],
            Command::BuildBottomLevel { destination, triangle_count: 1 } if destination == "tri-blas"
        ));

        mesh.release(&mut backend);
        assert_eq!(backend.live_structures(), 0);
        assert_eq!(backend.live_buffers(), 0);
        assert!(backend.misuse().is_empty());
    }

    #[test]
    fn invalid_geometry_is_rejected_without_leaks() {
        let mut backend = open_backend();
        assert!(matches!(
            Mesh::new(&mut backend, &[], &[], MeshFlags::empty(), "empty"),
            Err(RenderError::InvalidMesh(_))
        ));
        assert!(matches!(
            Mesh::new(&mut backend, &triangle(), &[0, 1, 7], MeshFlags::empty(), "bad"),
            Err(RenderError::Core(_))
        ));
        assert_eq!(backend.live_buffers(), 0);
    }
}
