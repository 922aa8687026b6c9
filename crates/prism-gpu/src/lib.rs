//! GPU layer for the Prism hybrid renderer.
//!
//! This crate provides:
//! - The [`Backend`] seam every renderer operation goes through
//! - Single-owner resource handles and deferred barriers
//! - Command-list state and fence synchronization
//! - A Vulkan ray-tracing backend with swapchain presentation
//! - A headless backend that records commands for tests (feature `headless`)

pub mod backend;
pub mod barrier;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod frame;
#[cfg(feature = "headless")]
pub mod headless;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod resource;
pub mod shaders;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use backend::{
    AccelerationStructureLevel, AccelerationStructureSizes, Backend, BottomLevelBuild,
    BufferDesc, BufferUsage, DescriptorBinding, DescriptorWrite, DispatchRays, ElementFormat,
    HeapKind, HitGroupCode, HitGroupPair, IndexedDraw, RayTracingPipelineDesc,
    RayTracingPipelineInfo, SbtLayout, SbtRegion, ShaderIdentifier, TextureDesc, TextureUsage,
    TopLevelBuild, TriangleGeometry,
};
pub use barrier::{Barrier, BarrierTarget, QueueKind, ResourceState};
pub use capabilities::{GpuCapabilities, GpuVendor, RayTracingCapabilities};
pub use error::{GpuError, Result};
pub use frame::{CommandListState, FrameSynchronizer};
pub use resource::{GpuAccelerationStructure, GpuBuffer, GpuResource, GpuTexture};
pub use shaders::ShaderLibrary;
pub use vulkan::{VulkanBackend, VulkanBackendBuilder};
