//! Windowed application framework for the Prism renderer.
//!
//! This crate handles the boilerplate around a [`Renderer`]:
//! - Logging setup
//! - Window creation and resize tracking
//! - Vulkan backend and shader library initialization
//! - The per-frame update and draw loop
//!
//! # Example
//!
//! ```no_run
//! use prism_app::{run_app, AppConfig, AppContext, PrismApp};
//!
//! struct MyApp;
//!
//! impl PrismApp for MyApp {
//!     fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         let _scene = ctx.renderer.create_scene();
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, ctx: &mut AppContext, dt: f32) {
//!         // Move instances, cameras and lights
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::new("My App").with_shader_dir("shaders"))
//! }
//! ```

mod app;
mod context;
mod runner;

pub use app::PrismApp;
pub use context::AppContext;
pub use runner::{init_logging, run_app, AppConfig};

// Re-export commonly used types for convenience
pub use prism_gpu::{ShaderLibrary, VulkanBackend};
pub use prism_render::Renderer;
pub use winit::event::{DeviceEvent, DeviceId, WindowEvent};
