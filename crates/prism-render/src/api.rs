//! Opaque-handle boundary over [`Device`].
//!
//! Every call either succeeds or logs the failure and returns `None` (or does
//! nothing). Stale handles are never dereferenced.

use glam::Vec3;
use prism_core::{Light, MeshFlags, Vertex};
use prism_gpu::Backend;

use crate::device::Device;
use crate::error::Result;
use crate::instance::InstanceDesc;
use crate::registry::{
    InstanceHandle, MeshHandle, SceneHandle, ShaderHandle, TextureHandle, ViewHandle,
};
use crate::shader::ShaderDesc;

/// The renderer as applications see it.
pub struct Renderer<B: Backend> {
    device: Device<B>,
}

fn logged<T>(operation: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!("{operation} failed: {e}");
            None
        }
    }
}

impl<B: Backend> Renderer<B> {
    pub fn new(backend: B) -> Option<Self> {
        logged("Renderer creation", Device::new(backend)).map(|device| Self { device })
    }

    /// Build the backend with `factory` and wrap it. Any failure is logged.
    pub fn create<E: std::fmt::Display>(factory: impl FnOnce() -> std::result::Result<B, E>) -> Option<Self> {
        match factory() {
            Ok(backend) => Self::new(backend),
            Err(e) => {
                tracing::error!("Backend creation failed: {e}");
                None
            }
        }
    }

    pub const fn device(&self) -> &Device<B> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device<B> {
        &mut self.device
    }

    pub fn create_scene(&mut self) -> SceneHandle {
        self.device.create_scene()
    }

    pub fn destroy_scene(&mut self, scene: SceneHandle) {
        logged("destroy_scene", self.device.destroy_scene(scene));
    }

    pub fn set_scene_lights(&mut self, scene: SceneHandle, lights: &[Light]) {
        logged("set_scene_lights", self.device.set_scene_lights(scene, lights));
    }

    pub fn create_view(&mut self, scene: SceneHandle) -> Option<ViewHandle> {
        logged("create_view", self.device.create_view(scene))
    }

    pub fn destroy_view(&mut self, view: ViewHandle) {
        logged("destroy_view", self.device.destroy_view(view));
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_view_perspective(
        &mut self,
        view: ViewHandle,
        eye: Vec3,
        focus: Vec3,
        up: Vec3,
        fov: f32,
        near: f32,
        far: f32,
    ) {
        logged(
            "set_view_perspective",
            self.device.set_view_perspective(view, eye, focus, up, fov, near, far),
        );
    }

    pub fn create_mesh(
        &mut self,
        vertices: &[Vertex],
        indices: &[u32],
        flags: MeshFlags,
    ) -> Option<MeshHandle> {
        logged("create_mesh", self.device.create_mesh(vertices, indices, flags))
    }

    pub fn destroy_mesh(&mut self, mesh: MeshHandle) {
        logged("destroy_mesh", self.device.destroy_mesh(mesh));
    }

    pub fn create_texture(&mut self, width: u32, height: u32, rgba8: &[u8]) -> Option<TextureHandle> {
        logged("create_texture", self.device.create_texture(width, height, rgba8))
    }

    pub fn destroy_texture(&mut self, texture: TextureHandle) {
        logged("destroy_texture", self.device.destroy_texture(texture));
    }

    pub fn create_shader(&mut self, desc: ShaderDesc) -> ShaderHandle {
        self.device.create_shader(desc)
    }

    pub fn destroy_shader(&mut self, shader: ShaderHandle) {
        logged("destroy_shader", self.device.destroy_shader(shader));
    }

    pub fn create_instance(&mut self, scene: SceneHandle, desc: InstanceDesc) -> Option<InstanceHandle> {
        logged("create_instance", self.device.create_instance(scene, desc))
    }

    pub fn set_instance(&mut self, instance: InstanceHandle, desc: InstanceDesc) {
        logged("set_instance", self.device.set_instance(instance, desc));
    }

    pub fn destroy_instance(&mut self, instance: InstanceHandle) {
        logged("destroy_instance", self.device.destroy_instance(instance));
    }

    pub fn draw(&mut self, vsync_interval: u32) {
        logged("draw", self.device.draw(vsync_interval));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::Extent;
    use prism_gpu::headless::HeadlessBackend;

    #[test]
    fn failed_factory_yields_none() {
        let renderer = Renderer::<HeadlessBackend>::create(|| Err("no adapter"));
        assert!(renderer.is_none());
    }

    #[test]
    fn stale_handles_are_no_ops() {
        let mut renderer = Renderer::create(|| {
            Ok::<_, std::convert::Infallible>(HeadlessBackend::new(Extent::new(4, 4)))
        })
        .unwrap();
        let scene = renderer.create_scene();
        renderer.destroy_scene(scene);

        assert!(renderer.create_view(scene).is_none());
        renderer.destroy_scene(scene);
        renderer.set_scene_lights(scene, &[Light::default()]);
        renderer.draw(1);
        assert_eq!(renderer.device().backend().presents(), &[1]);
        assert!(renderer.device().backend().misuse().is_empty());
    }
}
