//! The backend seam.
//!
//! Everything the renderer asks of a GPU goes through [`Backend`]: resource
//! creation, descriptor writes, pipeline creation, command recording and the
//! queue. Handles are small copyable identifiers; the backend owns the memory
//! behind them and frees it only when the matching `destroy_*` call arrives.

use std::fmt;
use std::hash::Hash;

use bitflags::bitflags;
use prism_core::Extent;

use crate::barrier::{Barrier, ResourceState};
use crate::error::Result;

/// Memory heap a resource lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// Device-local memory, not CPU visible.
    Default,
    /// CPU-writable memory read by the GPU.
    Upload,
    /// GPU-writable memory read back by the CPU.
    Readback,
}

bitflags! {
    /// How a buffer will be used.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const SHADER_BINDING_TABLE = 1 << 4;
        const ACCELERATION_STRUCTURE_STORAGE = 1 << 5;
        const ACCELERATION_STRUCTURE_INPUT = 1 << 6;
        const TRANSFER_SRC = 1 << 7;
        const TRANSFER_DST = 1 << 8;
        const DEVICE_ADDRESS = 1 << 9;
    }
}

bitflags! {
    /// How a texture will be used.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const TRANSFER_SRC = 1 << 3;
        const TRANSFER_DST = 1 << 4;
    }
}

/// Buffer allocation request.
#[derive(Clone, Copy, Debug)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub usage: BufferUsage,
    pub heap: HeapKind,
    pub initial_state: ResourceState,
    /// Request a dedicated allocation.
    pub committed: bool,
    /// Allow access from more than one queue family.
    pub shared: bool,
}

impl<'a> BufferDesc<'a> {
    /// Upload-heap buffer readable by shaders and the acceleration-structure
    /// builder.
    pub const fn upload(name: &'a str, size: u64, usage: BufferUsage) -> Self {
        Self {
            name,
            size,
            usage,
            heap: HeapKind::Upload,
            initial_state: ResourceState::GenericRead,
            committed: false,
            shared: false,
        }
    }

    /// Device-local buffer.
    pub const fn device(
        name: &'a str,
        size: u64,
        usage: BufferUsage,
        initial_state: ResourceState,
    ) -> Self {
        Self {
            name,
            size,
            usage,
            heap: HeapKind::Default,
            initial_state,
            committed: false,
            shared: false,
        }
    }
}

/// Texture allocation request. Textures are two-dimensional RGBA8 images with
/// a single mip level.
#[derive(Clone, Copy, Debug)]
pub struct TextureDesc<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
    pub usage: TextureUsage,
    pub heap: HeapKind,
    pub initial_state: ResourceState,
    /// Optimized clear color for render targets.
    pub clear_value: Option<[f32; 4]>,
    pub committed: bool,
    pub shared: bool,
}

/// Element format of a typed storage buffer view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementFormat {
    R32Float,
    Rgba16Float,
    R16Uint,
}

impl ElementFormat {
    /// Size of one element in bytes.
    pub const fn size(self) -> u64 {
        match self {
            Self::R32Float => 4,
            Self::Rgba16Float => 8,
            Self::R16Uint => 2,
        }
    }
}

/// Acceleration-structure level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccelerationStructureLevel {
    Bottom,
    Top,
}

/// Memory a build requires, as reported by the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccelerationStructureSizes {
    pub scratch: u64,
    pub result: u64,
}

/// Indexed triangle geometry for a bottom-level build.
pub struct TriangleGeometry<B: Backend + ?Sized> {
    pub vertex_buffer: B::Buffer,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub index_buffer: B::Buffer,
    pub index_count: u32,
}

impl<B: Backend + ?Sized> TriangleGeometry<B> {
    pub const fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// Bottom-level build command.
pub struct BottomLevelBuild<'a, B: Backend + ?Sized> {
    pub geometry: &'a TriangleGeometry<B>,
    pub scratch: B::Buffer,
    pub destination: B::AccelerationStructure,
}

/// Top-level build command. `instances` holds `instance_count` packed
/// instance records.
pub struct TopLevelBuild<B: Backend + ?Sized> {
    pub instances: B::Buffer,
    pub instance_count: u32,
    pub scratch: B::Buffer,
    pub destination: B::AccelerationStructure,
}

/// What a descriptor slot points at.
pub enum DescriptorBinding<B: Backend + ?Sized> {
    /// Read-write image.
    StorageTexture(B::Texture),
    /// Read-write typed buffer.
    StorageBuffer {
        buffer: B::Buffer,
        elements: u64,
        format: ElementFormat,
    },
    /// Sampled image.
    SampledTexture(B::Texture),
    /// Top-level acceleration structure.
    AccelerationStructure(B::AccelerationStructure),
    /// Constant buffer.
    UniformBuffer { buffer: B::Buffer, size: u64 },
    /// Read-only structured buffer.
    StructuredBuffer {
        buffer: B::Buffer,
        elements: u64,
        stride: u64,
    },
}

/// One descriptor write into a table.
pub struct DescriptorWrite<B: Backend + ?Sized> {
    pub slot: u32,
    pub binding: DescriptorBinding<B>,
}

/// Opaque shader-group identifier copied into binding-table records.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderIdentifier(pub Vec<u8>);

impl ShaderIdentifier {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// SPIR-V for one hit group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HitGroupCode {
    pub closest_hit: Vec<u32>,
    pub any_hit: Option<Vec<u32>>,
}

/// The two hit groups a material shader contributes: one for primary
/// surface rays, one for shadow rays.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HitGroupPair {
    pub surface: HitGroupCode,
    pub shadow: HitGroupCode,
}

/// Ray-tracing pipeline creation request.
pub struct RayTracingPipelineDesc<'a> {
    /// User hit-group pairs, appended after the backend's default pair.
    pub hit_groups: &'a [HitGroupPair],
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
}

/// A created ray-tracing pipeline and its shader-group identifiers.
#[derive(Clone, Debug)]
pub struct RayTracingPipelineInfo<P> {
    pub pipeline: P,
    pub ray_generation: ShaderIdentifier,
    pub surface_miss: ShaderIdentifier,
    pub shadow_miss: ShaderIdentifier,
    /// `(surface, shadow)` per pair; index 0 is the default pair.
    pub hit_groups: Vec<(ShaderIdentifier, ShaderIdentifier)>,
}

/// Shader-group handle geometry reported by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbtLayout {
    pub handle_size: u64,
    pub handle_alignment: u64,
    pub base_alignment: u64,
}

/// A section of the binding table, relative to its storage buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SbtRegion {
    pub offset: u64,
    pub size: u64,
    pub stride: u64,
}

/// Ray dispatch command.
pub struct DispatchRays<B: Backend + ?Sized> {
    pub pipeline: B::RayTracingPipeline,
    pub table: B::DescriptorTable,
    pub sbt: B::Buffer,
    pub ray_generation: SbtRegion,
    pub miss: SbtRegion,
    pub hit_groups: SbtRegion,
    pub width: u32,
    pub height: u32,
}

/// Indexed draw with the per-draw instance constant.
pub struct IndexedDraw<B: Backend + ?Sized> {
    pub vertex_buffer: B::Buffer,
    pub index_buffer: B::Buffer,
    pub index_count: u32,
    /// Index into the instance-properties buffer.
    pub instance_index: u32,
}

/// A GPU device as seen by the renderer.
///
/// There is one queue and one command list. Recording methods (`cmd_*`)
/// append to the open list; the frame synchronizer decides when it is
/// closed, executed and reopened.
pub trait Backend {
    type Buffer: Copy + Eq + Hash + fmt::Debug;
    type Texture: Copy + Eq + Hash + fmt::Debug;
    type AccelerationStructure: Copy + Eq + Hash + fmt::Debug;
    type DescriptorTable: Copy + Eq + Hash + fmt::Debug;
    type RayTracingPipeline: Copy + Eq + Hash + fmt::Debug;

    // Presentation

    /// Current size of the presentable surface.
    fn surface_extent(&self) -> Extent;
    /// Size of the swap targets.
    fn swap_extent(&self) -> Extent;
    /// Recreate the swap targets at `extent`.
    fn resize_swap_targets(&mut self, extent: Extent) -> Result<()>;
    /// The swap target the next frame renders into.
    fn swap_target(&self) -> Self::Texture;
    fn sbt_layout(&self) -> SbtLayout;

    // Resources

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<Self::Buffer>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);
    /// Copy `data` into an upload-heap buffer at `offset`.
    fn write_buffer(&mut self, buffer: Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;
    fn buffer_address(&self, buffer: Self::Buffer) -> u64;
    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<Self::Texture>;
    fn destroy_texture(&mut self, texture: Self::Texture);

    // Acceleration structures

    fn bottom_level_sizes(&self, geometry: &TriangleGeometry<Self>) -> AccelerationStructureSizes;
    fn top_level_sizes(&self, instance_count: u32) -> AccelerationStructureSizes;
    /// Create an acceleration structure over `size` bytes at the start of
    /// `storage`.
    fn create_acceleration_structure(
        &mut self,
        level: AccelerationStructureLevel,
        storage: Self::Buffer,
        size: u64,
        name: &str,
    ) -> Result<Self::AccelerationStructure>;
    fn destroy_acceleration_structure(&mut self, structure: Self::AccelerationStructure);
    fn acceleration_structure_address(&self, structure: Self::AccelerationStructure) -> u64;

    // Descriptors and pipelines

    /// Create a descriptor table with `capacity` slots.
    fn create_descriptor_table(&mut self, capacity: u32) -> Result<Self::DescriptorTable>;
    fn destroy_descriptor_table(&mut self, table: Self::DescriptorTable);
    fn write_descriptors(&mut self, table: Self::DescriptorTable, writes: &[DescriptorWrite<Self>]);
    fn create_ray_tracing_pipeline(
        &mut self,
        desc: &RayTracingPipelineDesc<'_>,
    ) -> Result<RayTracingPipelineInfo<Self::RayTracingPipeline>>;
    fn destroy_ray_tracing_pipeline(&mut self, pipeline: Self::RayTracingPipeline);

    // Queue

    /// Reopen the command list for recording.
    fn reset_command_list(&mut self) -> Result<()>;
    /// Close the command list and submit it.
    fn execute_command_list(&mut self) -> Result<()>;
    /// Signal the fence to `value` after all submitted work.
    fn signal(&mut self, value: u64) -> Result<()>;
    /// Block until the fence reaches `value`.
    fn wait(&mut self, value: u64) -> Result<()>;
    /// Present the current swap target.
    fn present(&mut self, vsync_interval: u32) -> Result<()>;
    /// Move to the next swap target.
    fn advance_swap_target(&mut self) -> Result<()>;

    // Recording

    fn cmd_barriers(&mut self, barriers: &[Barrier<Self>]);
    fn cmd_begin_render_pass(&mut self, target: Self::Texture, clear: Option<[f32; 4]>, extent: Extent);
    fn cmd_end_render_pass(&mut self);
    /// Bind the raster pipeline and `table` for subsequent draws.
    fn cmd_bind_raster(&mut self, table: Self::DescriptorTable);
    fn cmd_draw_indexed(&mut self, draw: &IndexedDraw<Self>);
    fn cmd_build_bottom_level(&mut self, build: &BottomLevelBuild<'_, Self>);
    fn cmd_build_top_level(&mut self, build: &TopLevelBuild<Self>);
    fn cmd_dispatch_rays(&mut self, dispatch: &DispatchRays<Self>);
    fn cmd_copy_texture(&mut self, dst: Self::Texture, src: Self::Texture);
    fn cmd_copy_buffer_to_texture(&mut self, dst: Self::Texture, src: Self::Buffer);
}
