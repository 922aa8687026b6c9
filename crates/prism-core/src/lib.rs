//! Core types and math for the Prism hybrid renderer.
//!
//! This crate provides the plain data shared by every layer of the renderer:
//! - Vertex, material and light records laid out for GPU upload
//! - Mesh flags and surface extents
//! - Matrix helpers for instance transforms
//! - Common error types and renderer-wide constants

pub mod error;
pub mod math;
pub mod types;

pub use error::{Error, Result};
pub use types::{validate_triangle_list, Extent, Light, Material, MeshFlags, Vertex};

/// Renderer-wide constants
pub mod constants {
    /// Hit-buffer entries per pixel (twelve queries plus one terminator)
    pub const MAX_QUERIES_PER_PIXEL: u64 = 12 + 1;
    /// Upper bound on distinct textures a view may bind in one frame
    pub const MAX_TEXTURES: usize = 1024;
    /// Fixed descriptor entries that precede the texture range
    pub const BASELINE_DESCRIPTORS: u32 = 11;
    /// Alignment required for constant and structured upload buffers
    pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;
    /// Swap targets requested from the presentation engine
    pub const FRAME_COUNT: u32 = 2;
}
