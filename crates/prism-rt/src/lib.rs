//! Ray-tracing building blocks for the Prism renderer.
//!
//! This crate provides:
//! - Bottom-level and top-level acceleration structures with grow-only buffers
//! - Shader binding table layout and storage
//! - The per-view descriptor heap and its fixed slots

pub mod acceleration;
pub mod descriptors;
pub mod sbt;

pub use acceleration::{
    AccelerationStructureBuffers, BottomLevelAccelerationStructure, InstanceDescriptor,
    TopLevelAccelerationStructure,
};
pub use descriptors::{DescriptorHeap, HeapSlot};
pub use sbt::{SbtRecord, SbtSections, ShaderBindingTable, ShaderBindingTableBuilder};
