//! Renderer error types.

use prism_gpu::GpuError;
use thiserror::Error;

/// Errors raised by scene, view and device operations.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Core(#[from] prism_core::Error),

    /// A handle that is stale or belongs to another renderer.
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),

    /// A view referenced more distinct textures than a heap can hold.
    #[error("Too many textures in one view: {0} (limit {limit})", limit = prism_core::constants::MAX_TEXTURES)]
    TooManyTextures(usize),

    /// Destroying a resource that a live instance still uses.
    #[error("{0} is still used by an instance")]
    ResourceInUse(&'static str),

    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;
