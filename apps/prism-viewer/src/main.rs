//! Prism Demo Viewer
//!
//! Renders a small hybrid scene: ray-traced cubes on a ray-traced floor,
//! a rasterized backdrop behind them and a rasterized marker in front, lit
//! by two point lights and seen through an orbiting camera.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p prism-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--shaders <DIR>`: Directory with the precompiled SPIR-V library (default: shaders)
//! - `--texture <PATH>`: Image used for the floor instead of the generated checkerboard
//! - `--vsync <N>`: Presentation interval, 0 disables vsync (default: 1)
//! - `--size <WxH>`: Window size (default: 1280x720)
//! - `-h, --help`: Print help message
//!
//! ## Controls
//!
//! - `Space`: Pause or resume the orbit
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod geometry;

use prism_app::{run_app, AppConfig};

use crate::app::{Viewer, ViewerParams};

fn main() -> anyhow::Result<()> {
    // Check for help flag before starting the app
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let params = ViewerParams::from_args();
    run_app::<Viewer>(
        AppConfig::new("Prism - Hybrid Demo")
            .with_size(params.width, params.height)
            .with_vsync_interval(params.vsync_interval)
            .with_shader_dir(params.shader_dir),
    )
}

fn print_help() {
    eprintln!(
        "Prism Demo Viewer

USAGE:
    cargo run -p prism-viewer -- [OPTIONS]

OPTIONS:
    --shaders <DIR>     Directory with the precompiled SPIR-V library
                        Default: shaders
    --texture <PATH>    Image used for the floor
                        Default: a generated checkerboard
    --vsync <N>         Presentation interval, 0 disables vsync (default: 1)
    --size <WxH>        Window size (default: 1280x720)
    -h, --help          Print this help message

CONTROLS:
    Space               Pause or resume the camera orbit

ENVIRONMENT VARIABLES:
    RUST_LOG            Set log level (e.g., info, debug, trace)"
    );
}
