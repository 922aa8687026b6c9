//! `PrismApp` trait definition.

use crate::context::AppContext;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};

/// Trait for Prism applications.
///
/// The framework creates the window, the Vulkan backend and the
/// [`Renderer`](prism_render::Renderer), then calls [`update`](Self::update)
/// and draws every frame. Applications only describe their scenes.
pub trait PrismApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window and renderer exist. Create scenes, views,
    /// meshes and instances here.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before the renderer draws.
    ///
    /// # Arguments
    /// * `ctx` - Application context with renderer and window access
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, ctx: &mut AppContext, dt: f32);

    /// Handle window resize.
    ///
    /// The renderer resizes its views on the next draw. Default
    /// implementation does nothing.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further. Default implementation returns `false`.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Handle device events (raw input).
    #[allow(unused_variables)]
    fn on_device_event(&mut self, device_id: DeviceId, event: &DeviceEvent) {}

    /// Cleanup before shutdown.
    ///
    /// The GPU is idle when this is called. Anything left alive is destroyed
    /// with the renderer.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
