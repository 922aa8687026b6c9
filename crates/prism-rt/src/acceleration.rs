//! Acceleration structure management for hardware ray tracing.
//!
//! Bottom levels are built once per ray-traced mesh and never touched again.
//! The top level belongs to a view and is rebuilt from scratch every frame
//! from that frame's instance list; its buffers only ever grow.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use prism_core::math::to_row_major_3x4;
use prism_gpu::{
    AccelerationStructureLevel, Backend, Barrier, BarrierTarget, BottomLevelBuild, BufferDesc,
    BufferUsage, GpuAccelerationStructure, GpuBuffer, ResourceState, Result, TopLevelBuild,
    TriangleGeometry,
};

/// Instance record consumed by a top-level build (64 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceDescriptor {
    /// Object-to-world transform, row-major 3x4.
    pub transform: [f32; 12],
    /// Custom index in the low 24 bits, visibility mask in the high 8.
    pub custom_index_and_mask: u32,
    /// Binding-table record offset in the low 24 bits, flags in the high 8.
    pub sbt_offset_and_flags: u32,
    pub bottom_level_address: u64,
}

impl InstanceDescriptor {
    pub const MASK_ALL: u8 = 0xFF;
    /// Disable back-face culling for the instance.
    pub const FLAG_CULL_DISABLE: u8 = 0x1;

    const LOW_24: u32 = 0x00FF_FFFF;

    pub fn new(transform: &Mat4, custom_index: u32, sbt_offset: u32, bottom_level_address: u64) -> Self {
        Self {
            transform: to_row_major_3x4(transform),
            custom_index_and_mask: (custom_index & Self::LOW_24)
                | (u32::from(Self::MASK_ALL) << 24),
            sbt_offset_and_flags: (sbt_offset & Self::LOW_24)
                | (u32::from(Self::FLAG_CULL_DISABLE) << 24),
            bottom_level_address,
        }
    }

    pub const fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & Self::LOW_24
    }

    pub const fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }

    pub const fn sbt_offset(&self) -> u32 {
        self.sbt_offset_and_flags & Self::LOW_24
    }

    pub const fn flags(&self) -> u8 {
        (self.sbt_offset_and_flags >> 24) as u8
    }
}

/// Bottom-level acceleration structure over one indexed triangle mesh.
pub struct BottomLevelAccelerationStructure<B: Backend + ?Sized> {
    scratch: GpuBuffer<B>,
    result: GpuBuffer<B>,
    structure: GpuAccelerationStructure<B>,
    triangle_count: u32,
}

impl<B: Backend + ?Sized> BottomLevelAccelerationStructure<B> {
    /// Allocate exactly what the backend asks for and record the build
    /// into the open command list, followed by a UAV barrier on the result.
    pub fn build(backend: &mut B, geometry: &TriangleGeometry<B>, name: &str) -> Result<Self> {
        let sizes = backend.bottom_level_sizes(geometry);

        let mut scratch = GpuBuffer::allocate(
            backend,
            &BufferDesc::device(
                &format!("{name}-scratch"),
                sizes.scratch,
                BufferUsage::STORAGE | BufferUsage::DEVICE_ADDRESS,
                ResourceState::UnorderedAccess,
            ),
        )?;
        let mut result = match GpuBuffer::allocate(
            backend,
            &BufferDesc::device(
                &format!("{name}-result"),
                sizes.result,
                BufferUsage::ACCELERATION_STRUCTURE_STORAGE,
                ResourceState::AccelerationStructure,
            ),
        ) {
            Ok(result) => result,
            Err(e) => {
                scratch.release(backend);
                return Err(e);
            }
        };
        let structure = match GpuAccelerationStructure::allocate(
            backend,
            AccelerationStructureLevel::Bottom,
            &result,
            name,
        ) {
            Ok(structure) => structure,
            Err(e) => {
                scratch.release(backend);
                result.release(backend);
                return Err(e);
            }
        };

        if let (Some(scratch_buffer), Some(destination)) = (scratch.get(), structure.get()) {
            backend.cmd_build_bottom_level(&BottomLevelBuild {
                geometry,
                scratch: scratch_buffer,
                destination,
            });
            backend.cmd_barriers(&[Barrier::uav(BarrierTarget::AccelerationStructure(
                destination,
            ))]);
        }

        tracing::debug!(
            "Built bottom level {name}: {} triangles, {} bytes",
            geometry.triangle_count(),
            sizes.result
        );

        Ok(Self {
            scratch,
            result,
            structure,
            triangle_count: geometry.triangle_count(),
        })
    }

    pub const fn handle(&self) -> Option<B::AccelerationStructure> {
        self.structure.get()
    }

    /// GPU address referenced by top-level instance records.
    pub fn address(&self, backend: &B) -> u64 {
        self.structure
            .get()
            .map_or(0, |s| backend.acceleration_structure_address(s))
    }

    pub const fn triangle_count(&self) -> u32 {
        self.triangle_count
    }

    pub const fn result_size(&self) -> u64 {
        self.result.size()
    }

    pub const fn scratch_size(&self) -> u64 {
        self.scratch.size()
    }

    pub fn release(&mut self, backend: &mut B) {
        self.structure.release(backend);
        self.result.release(backend);
        self.scratch.release(backend);
    }
}

/// Scratch, result and instance-descriptor buffers of a top level.
///
/// Capacities only grow. When any required size exceeds its capacity all
/// three buffers are released and reallocated at exactly the required sizes.
pub struct AccelerationStructureBuffers<B: Backend + ?Sized> {
    scratch: GpuBuffer<B>,
    result: GpuBuffer<B>,
    instance_descriptors: GpuBuffer<B>,
}

impl<B: Backend + ?Sized> Default for AccelerationStructureBuffers<B> {
    fn default() -> Self {
        Self {
            scratch: GpuBuffer::null(),
            result: GpuBuffer::null(),
            instance_descriptors: GpuBuffer::null(),
        }
    }
}

impl<B: Backend + ?Sized> AccelerationStructureBuffers<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the buffers hold the given sizes. Returns `true` when they
    /// were reallocated.
    pub fn ensure(
        &mut self,
        backend: &mut B,
        scratch: u64,
        result: u64,
        instance_descriptors: u64,
        name: &str,
    ) -> Result<bool> {
        if scratch <= self.scratch.size()
            && result <= self.result.size()
            && instance_descriptors <= self.instance_descriptors.size()
        {
            return Ok(false);
        }

        tracing::debug!(
            "Growing {name} buffers: scratch {} -> {scratch}, result {} -> {result}, instances {} -> {instance_descriptors}",
            self.scratch.size(),
            self.result.size(),
            self.instance_descriptors.size()
        );
        self.release(backend);

        self.scratch = GpuBuffer::allocate(
            backend,
            &BufferDesc::device(
                &format!("{name}-scratch"),
                scratch,
                BufferUsage::STORAGE | BufferUsage::DEVICE_ADDRESS,
                ResourceState::UnorderedAccess,
            ),
        )?;
        self.result = GpuBuffer::allocate(
            backend,
            &BufferDesc::device(
                &format!("{name}-result"),
                result,
                BufferUsage::ACCELERATION_STRUCTURE_STORAGE,
                ResourceState::AccelerationStructure,
            ),
        )?;
        self.instance_descriptors = GpuBuffer::allocate(
            backend,
            &BufferDesc::upload(
                &format!("{name}-instances"),
                instance_descriptors,
                BufferUsage::ACCELERATION_STRUCTURE_INPUT | BufferUsage::DEVICE_ADDRESS,
            ),
        )?;
        Ok(true)
    }

    pub const fn scratch(&self) -> &GpuBuffer<B> {
        &self.scratch
    }

    pub const fn result(&self) -> &GpuBuffer<B> {
        &self.result
    }

    pub const fn instance_descriptors(&self) -> &GpuBuffer<B> {
        &self.instance_descriptors
    }

    /// `(scratch, result, instance descriptors)` capacities in bytes.
    pub const fn capacities(&self) -> (u64, u64, u64) {
        (
            self.scratch.size(),
            self.result.size(),
            self.instance_descriptors.size(),
        )
    }

    pub fn release(&mut self, backend: &mut B) {
        self.scratch.release(backend);
        self.result.release(backend);
        self.instance_descriptors.release(backend);
    }
}

/// Per-view top-level acceleration structure.
pub struct TopLevelAccelerationStructure<B: Backend + ?Sized> {
    name: String,
    instances: Vec<InstanceDescriptor>,
    buffers: AccelerationStructureBuffers<B>,
    structure: GpuAccelerationStructure<B>,
}

impl<B: Backend + ?Sized> TopLevelAccelerationStructure<B> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instances: Vec::new(),
            buffers: AccelerationStructureBuffers::new(),
            structure: GpuAccelerationStructure::null(),
        }
    }

    /// Drop the instance list of the previous build.
    pub fn reset(&mut self) {
        self.instances.clear();
    }

    pub fn add_instance(
        &mut self,
        bottom_level_address: u64,
        transform: &Mat4,
        instance_index: u32,
        hit_group_index: u32,
    ) {
        self.instances.push(InstanceDescriptor::new(
            transform,
            instance_index,
            hit_group_index,
            bottom_level_address,
        ));
    }

    pub fn instances(&self) -> &[InstanceDescriptor] {
        &self.instances
    }

    /// Upload the instance list and record a full build into the open
    /// command list, followed by a UAV barrier on the result.
    pub fn build(&mut self, backend: &mut B) -> Result<()> {
        let count = self.instances.len() as u32;
        let sizes = backend.top_level_sizes(count);
        let descriptor_bytes = (self.instances.len() * std::mem::size_of::<InstanceDescriptor>()) as u64;

        let grown = self.buffers.ensure(
            backend,
            sizes.scratch,
            sizes.result,
            descriptor_bytes.max(std::mem::size_of::<InstanceDescriptor>() as u64),
            &self.name,
        )?;
        if grown || self.structure.is_null() {
            self.structure.release(backend);
            self.structure = GpuAccelerationStructure::allocate(
                backend,
                AccelerationStructureLevel::Top,
                self.buffers.result(),
                &self.name,
            )?;
        }

        let (Some(instances), Some(scratch), Some(destination)) = (
            self.buffers.instance_descriptors().get(),
            self.buffers.scratch().get(),
            self.structure.get(),
        ) else {
            return Ok(());
        };

        backend.write_buffer(instances, 0, bytemuck::cast_slice(&self.instances))?;
        backend.cmd_build_top_level(&TopLevelBuild {
            instances,
            instance_count: count,
            scratch,
            destination,
        });
        backend.cmd_barriers(&[Barrier::uav(BarrierTarget::AccelerationStructure(destination))]);
        Ok(())
    }

    pub const fn handle(&self) -> Option<B::AccelerationStructure> {
        self.structure.get()
    }

    pub const fn buffers(&self) -> &AccelerationStructureBuffers<B> {
        &self.buffers
    }

    pub fn release(&mut self, backend: &mut B) {
        self.structure.release(backend);
        self.buffers.release(backend);
        self.instances.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;
    use prism_core::Extent;
    use prism_gpu::headless::{Command, HeadlessBackend};
    use prism_gpu::HeapKind;

    fn open_backend() -> HeadlessBackend {
        let mut backend = HeadlessBackend::new(Extent::new(8, 8));
        backend.reset_command_list().unwrap();
        backend
    }

    type Buffers = (GpuBuffer<HeadlessBackend>, GpuBuffer<HeadlessBackend>);

    fn geometry(
        backend: &mut HeadlessBackend,
        triangles: u32,
    ) -> (Buffers, TriangleGeometry<HeadlessBackend>) {
        let vertices = GpuBuffer::allocate(
            backend,
            &BufferDesc::upload("vertices", 96, BufferUsage::VERTEX),
        )
        .unwrap();
        let indices = GpuBuffer::allocate(
            backend,
            &BufferDesc::upload("indices", u64::from(triangles) * 12, BufferUsage::INDEX),
        )
        .unwrap();
        let geometry = TriangleGeometry {
            vertex_buffer: vertices.get().unwrap(),
            vertex_count: 3,
            vertex_stride: 32,
            index_buffer: indices.get().unwrap(),
            index_count: triangles * 3,
        };
        ((vertices, indices), geometry)
    }

    #[test]
    fn instance_descriptor_is_64_bytes() {
        assert_eq!(std::mem::size_of::<InstanceDescriptor>(), 64);
    }

    #[test]
    fn instance_descriptor_packs_fields() {
        let transform = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let desc = InstanceDescriptor::new(&transform, 7, 14, 0xDEAD_0000);
        assert_eq!(desc.custom_index(), 7);
        assert_eq!(desc.mask(), 0xFF);
        assert_eq!(desc.sbt_offset(), 14);
        assert_eq!(desc.flags(), InstanceDescriptor::FLAG_CULL_DISABLE);
        assert_eq!(desc.bottom_level_address, 0xDEAD_0000);
        assert_eq!(desc.transform[3], 1.0);
        assert_eq!(desc.transform[7], 2.0);
        assert_eq!(desc.transform[11], 3.0);
    }

    #[test]
    fn instance_descriptor_rows_follow_the_transform() {
        let transform = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 1.0, 0.5),
            glam::Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            Vec3::new(4.0, 5.0, 6.0),
        );
        let desc = InstanceDescriptor::new(&transform, 0, 0, 0);
        for row in 0..3 {
            let expected = transform.row(row).to_array();
            for column in 0..4 {
                assert_relative_eq!(desc.transform[row * 4 + column], expected[column], epsilon = 1e-6);
            }
        }
        // Rotating +X a quarter turn about +Y lands on -Z, scaled by 2.
        assert_relative_eq!(desc.transform[8], -2.0, epsilon = 1e-6);
        assert_relative_eq!(desc.transform[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn bottom_level_build_is_followed_by_uav_barrier() {
        let mut backend = open_backend();
        let ((mut vertices, mut indices), geometry) = geometry(&mut backend, 4);

        let mut blas = BottomLevelAccelerationStructure::build(&mut backend, &geometry, "mesh").unwrap();
        assert_eq!(blas.triangle_count(), 4);
        assert_eq!(blas.result_size(), backend.bottom_level_sizes(&geometry).result);
        assert_ne!(blas.address(&backend), 0);

        let recorded = backend.recorded();
        assert!(matches!(
            &recorded[0],
            Command::BuildBottomLevel { triangle_count: 4, .. }
        ));
        assert_eq!(recorded[1].to_string(), "uav mesh");

        blas.release(&mut backend);
        vertices.release(&mut backend);
        indices.release(&mut backend);
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(backend.live_structures(), 0);
    }

    #[test]
    fn top_level_buffers_only_grow() {
        let mut backend = open_backend();
        let mut tlas = TopLevelAccelerationStructure::new("view-tlas");

        for i in 0..4 {
            tlas.add_instance(0x1000, &Mat4::IDENTITY, i, 2 * i);
        }
        tlas.build(&mut backend).unwrap();
        let large = tlas.buffers().capacities();
        let structures = backend.stats().structures_created;

        tlas.reset();
        tlas.add_instance(0x1000, &Mat4::IDENTITY, 0, 0);
        tlas.build(&mut backend).unwrap();
        assert_eq!(tlas.buffers().capacities(), large);
        assert_eq!(backend.stats().structures_created, structures);

        tlas.reset();
        for i in 0..16 {
            tlas.add_instance(0x1000, &Mat4::IDENTITY, i, 2 * i);
        }
        tlas.build(&mut backend).unwrap();
        let grown = tlas.buffers().capacities();
        assert!(grown.0 > large.0 && grown.1 > large.1 && grown.2 > large.2);
        assert_eq!(grown.2, 16 * 64);

        tlas.release(&mut backend);
        assert_eq!(backend.live_buffers(), 0);
        assert!(backend.misuse().is_empty());
    }

    #[test]
    fn top_level_uploads_instance_records() {
        let mut backend = open_backend();
        let mut tlas = TopLevelAccelerationStructure::new("view-tlas");
        tlas.add_instance(0xABCD, &Mat4::IDENTITY, 0, 0);
        tlas.add_instance(0xBCDE, &Mat4::IDENTITY, 1, 2);
        tlas.build(&mut backend).unwrap();

        let (_, record) = backend.find_buffer("view-tlas-instances").unwrap();
        assert_eq!(record.heap, HeapKind::Upload);
        let uploaded: Vec<InstanceDescriptor> = record.data[..128]
            .chunks_exact(64)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(uploaded, tlas.instances());
        assert_eq!(uploaded[1].sbt_offset(), 2);

        let lines: Vec<String> = backend.recorded().iter().map(ToString::to_string).collect();
        assert_eq!(lines, ["build-top view-tlas instances=2", "uav view-tlas"]);

        tlas.release(&mut backend);
    }
}
