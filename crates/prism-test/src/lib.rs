//! Test harness for the Prism renderer.
//!
//! Drives a [`Device`](prism_render::Device) on the headless backend so the
//! frame sequence, resource lifetimes and per-view buffers can be checked
//! without a GPU.

pub mod fixtures;
pub mod harness;

pub use harness::{HeadlessHarness, TestScene};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("Render error: {0}")]
    Render(#[from] prism_render::RenderError),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Backend misuse: {0:?}")]
    Misuse(Vec<String>),
}

pub type Result<T> = std::result::Result<T, TestError>;
