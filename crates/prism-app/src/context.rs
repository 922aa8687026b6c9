//! Application context.

use std::sync::Arc;
use std::time::Instant;

use prism_core::Extent;
use prism_gpu::VulkanBackend;
use prism_render::Renderer;
use winit::window::Window;

/// Application context shared across all app methods.
///
/// Field order matters: the renderer owns the surface and swapchain, so it
/// drops before the window it was created from.
pub struct AppContext {
    /// The renderer, backed by Vulkan.
    pub renderer: Renderer<VulkanBackend>,
    /// The window handle.
    pub window: Arc<Window>,
    /// Presentation interval handed to every draw. Zero presents immediately.
    pub vsync_interval: u32,
    /// Total frames rendered.
    pub frame_count: u64,
    /// Time of last frame (for delta time calculation).
    pub(crate) last_frame_time: Instant,
}

impl AppContext {
    pub(crate) fn new(
        renderer: Renderer<VulkanBackend>,
        window: Arc<Window>,
        vsync_interval: u32,
    ) -> Self {
        Self {
            renderer,
            window,
            vsync_interval,
            frame_count: 0,
            last_frame_time: Instant::now(),
        }
    }

    /// Current window size in physical pixels.
    pub fn window_extent(&self) -> Extent {
        let size = self.window.inner_size();
        Extent::new(size.width, size.height)
    }

    /// Width over height of the swap chain, as views see it.
    pub fn aspect_ratio(&self) -> f32 {
        self.renderer.device().aspect_ratio()
    }

    /// Block until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> anyhow::Result<()> {
        self.renderer.device().backend().wait_idle()?;
        Ok(())
    }
}
