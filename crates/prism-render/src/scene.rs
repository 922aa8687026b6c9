//! Scenes: instance and view membership plus the light buffer.

use prism_core::Light;
use prism_gpu::{Backend, BufferDesc, BufferUsage, GpuBuffer};

use crate::error::Result;
use crate::registry::{InstanceHandle, ViewHandle};

/// Light buffer binding handed to views.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightsBinding<Buf> {
    pub buffer: Buf,
    pub count: u32,
}

/// A scene. Membership lists keep creation order, which is the order views
/// snapshot instances and the device updates views.
pub struct Scene<B: Backend + ?Sized> {
    instances: Vec<InstanceHandle>,
    views: Vec<ViewHandle>,
    lights: Vec<Light>,
    lights_buffer: GpuBuffer<B>,
}

impl<B: Backend + ?Sized> Default for Scene<B> {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
            views: Vec::new(),
            lights: Vec::new(),
            lights_buffer: GpuBuffer::null(),
        }
    }
}

impl<B: Backend + ?Sized> Scene<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instances(&self) -> &[InstanceHandle] {
        &self.instances
    }

    pub fn views(&self) -> &[ViewHandle] {
        &self.views
    }

    pub(crate) fn add_instance(&mut self, instance: InstanceHandle) {
        self.instances.push(instance);
    }

    pub(crate) fn remove_instance(&mut self, instance: InstanceHandle) {
        self.instances.retain(|&i| i != instance);
    }

    pub(crate) fn add_view(&mut self, view: ViewHandle) {
        self.views.push(view);
    }

    pub(crate) fn remove_view(&mut self, view: ViewHandle) {
        self.views.retain(|&v| v != view);
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// Replace the scene's lights. The upload buffer is reallocated only when
    /// the new set does not fit.
    pub fn set_lights(&mut self, backend: &mut B, lights: &[Light]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(lights);
        if bytes.len() as u64 > self.lights_buffer.size() {
            self.lights_buffer.release(backend);
            self.lights_buffer = GpuBuffer::allocate(
                backend,
                &BufferDesc::upload("scene-lights", bytes.len() as u64, BufferUsage::STORAGE),
            )?;
            tracing::debug!("Grew light buffer to {} lights", lights.len());
        }
        if let (Some(buffer), false) = (self.lights_buffer.get(), bytes.is_empty()) {
            backend.write_buffer(buffer, 0, bytes)?;
        }
        self.lights = lights.to_vec();
        Ok(())
    }

    /// The light buffer, when the scene has lights.
    pub fn lights_binding(&self) -> Option<LightsBinding<B::Buffer>> {
        if self.lights.is_empty() {
            return None;
        }
        self.lights_buffer.get().map(|buffer| LightsBinding {
            buffer,
            count: self.lights.len() as u32,
        })
    }

    pub fn release(&mut self, backend: &mut B) {
        self.lights_buffer.release(backend);
        self.lights.clear();
    }
}
