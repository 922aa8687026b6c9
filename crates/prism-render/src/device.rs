//! The device: owns the backend and drives frames.
//!
//! A frame is `draw`:
//! 1. Rebuild the ray-tracing pipeline if a shader with hit groups changed
//! 2. Flush deferred barriers and pick up surface size changes
//! 3. Update every view of every scene
//! 4. `pre_render`, render every view, `post_render`
//!
//! Only one frame is ever in flight. `post_render` waits for the GPU, so
//! between two draws every resource may be released or reallocated.

use glam::Vec3;
use prism_core::{Extent, Light, MeshFlags, Vertex};
use prism_gpu::{
    Backend, Barrier, FrameSynchronizer, QueueKind, RayTracingPipelineDesc,
    RayTracingPipelineInfo, ResourceState,
};

use crate::error::{RenderError, Result};
use crate::instance::{Instance, InstanceDesc};
use crate::mesh::Mesh;
use crate::registry::{
    InstanceHandle, Key, MeshHandle, Registry, SceneHandle, ShaderHandle, TextureHandle, ViewHandle,
};
use crate::scene::Scene;
use crate::shader::{Shader, ShaderDesc};
use crate::texture::Texture;
use crate::view::{FrameInputs, InstanceSource, View};

/// Ray payload: two floats.
const MAX_PAYLOAD_SIZE: u32 = 2 * std::mem::size_of::<f32>() as u32;
/// Barycentric hit attributes.
const MAX_ATTRIBUTE_SIZE: u32 = 2 * std::mem::size_of::<f32>() as u32;
const MAX_RECURSION_DEPTH: u32 = 1;

/// Swap-target clear color at the start of a frame.
const FRAME_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Whether the ray-tracing pipeline matches the registered shaders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Clean,
    Dirty,
}

struct ViewEntry<B: Backend> {
    scene: SceneHandle,
    view: View<B>,
}

/// Owns the backend, the command-list state and every renderer object.
pub struct Device<B: Backend> {
    backend: B,
    frame: FrameSynchronizer<B>,
    extent: Extent,
    aspect_ratio: f32,
    pipeline_state: PipelineState,
    pipeline: RayTracingPipelineInfo<B::RayTracingPipeline>,
    scene_order: Vec<SceneHandle>,
    scenes: Registry<SceneHandle, Scene<B>>,
    views: Registry<ViewHandle, ViewEntry<B>>,
    instances: Registry<InstanceHandle, Instance>,
    meshes: Registry<MeshHandle, Mesh<B>>,
    textures: Registry<TextureHandle, Texture<B>>,
    shaders: Registry<ShaderHandle, Shader>,
    meshes_created: u32,
    textures_created: u32,
}

impl<B: Backend> Device<B> {
    /// Take ownership of `backend`, open the command list and create the
    /// pipeline with the built-in hit groups.
    pub fn new(mut backend: B) -> Result<Self> {
        let mut frame = FrameSynchronizer::new();
        frame.reset(&mut backend)?;
        let pipeline = create_pipeline(&mut backend, &[])?;

        let mut device = Self {
            backend,
            frame,
            extent: Extent::default(),
            aspect_ratio: 1.0,
            pipeline_state: PipelineState::Clean,
            pipeline,
            scene_order: Vec::new(),
            scenes: Registry::new(),
            views: Registry::new(),
            instances: Registry::new(),
            meshes: Registry::new(),
            textures: Registry::new(),
            shaders: Registry::new(),
            meshes_created: 0,
            textures_created: 0,
        };
        device.update_size()?;
        Ok(device)
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub const fn frame(&self) -> &FrameSynchronizer<B> {
        &self.frame
    }

    pub const fn extent(&self) -> Extent {
        self.extent
    }

    pub const fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    pub const fn pipeline_state(&self) -> PipelineState {
        self.pipeline_state
    }

    pub const fn pipeline(&self) -> &RayTracingPipelineInfo<B::RayTracingPipeline> {
        &self.pipeline
    }

    // Scenes

    pub fn create_scene(&mut self) -> SceneHandle {
        let scene = self.scenes.insert(Scene::new());
        self.scene_order.push(scene);
        scene
    }

    /// Destroy a scene with its views and instances.
    pub fn destroy_scene(&mut self, scene: SceneHandle) -> Result<()> {
        let (views, instances) = {
            let entry = self.scenes.get(scene).ok_or_else(invalid(scene))?;
            (entry.views().to_vec(), entry.instances().to_vec())
        };
        for view in views {
            self.destroy_view(view)?;
        }
        for instance in instances {
            self.destroy_instance(instance)?;
        }
        if let Some(mut entry) = self.scenes.remove(scene) {
            entry.release(&mut self.backend);
        }
        self.scene_order.retain(|&s| s != scene);
        Ok(())
    }

    pub fn scene(&self, scene: SceneHandle) -> Option<&Scene<B>> {
        self.scenes.get(scene)
    }

    pub fn set_scene_lights(&mut self, scene: SceneHandle, lights: &[Light]) -> Result<()> {
        let entry = self.scenes.get_mut(scene).ok_or_else(invalid(scene))?;
        entry.set_lights(&mut self.backend, lights)
    }

    // Views

    pub fn create_view(&mut self, scene: SceneHandle) -> Result<ViewHandle> {
        if !self.scenes.contains(scene) {
            return Err(invalid(scene)());
        }
        let view = View::new(&mut self.backend, self.extent)?;
        let handle = self.views.insert(ViewEntry { scene, view });
        if let Some(entry) = self.scenes.get_mut(scene) {
            entry.add_view(handle);
        }
        Ok(handle)
    }

    pub fn destroy_view(&mut self, view: ViewHandle) -> Result<()> {
        let mut entry = self.views.remove(view).ok_or_else(invalid(view))?;
        entry.view.release(&mut self.backend);
        if let Some(scene) = self.scenes.get_mut(entry.scene) {
            scene.remove_view(view);
        }
        Ok(())
    }

    pub fn view(&self, view: ViewHandle) -> Option<&View<B>> {
        self.views.get(view).map(|entry| &entry.view)
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
    ) -> Result<()> {
        let entry = self.views.get_mut(view).ok_or_else(invalid(view))?;
        entry.view.set_perspective(eye, focus, up, fov, near, far);
        Ok(())
    }

    // Meshes

    /// Upload a mesh. Ray-traced meshes record their bottom-level build into
    /// the open command list; it executes with the next frame.
    pub fn create_mesh(
        &mut self,
        vertices: &[Vertex],
        indices: &[u32],
        flags: MeshFlags,
    ) -> Result<MeshHandle> {
        let name = format!("mesh-{}", self.meshes_created);
        let mesh = Mesh::new(&mut self.backend, vertices, indices, flags, &name)?;
        self.meshes_created += 1;
        Ok(self.meshes.insert(mesh))
    }

    pub fn destroy_mesh(&mut self, mesh: MeshHandle) -> Result<()> {
        if !self.meshes.contains(mesh) {
            return Err(invalid(mesh)());
        }
        self.refuse_if_used(MeshHandle::KIND, |desc| desc.uses_mesh(mesh))?;
        self.finish_recorded_work()?;
        if let Some(mut entry) = self.meshes.remove(mesh) {
            entry.release(&mut self.backend);
        }
        Ok(())
    }

    pub fn mesh(&self, mesh: MeshHandle) -> Option<&Mesh<B>> {
        self.meshes.get(mesh)
    }

    // Textures

    pub fn create_texture(&mut self, width: u32, height: u32, rgba8: &[u8]) -> Result<TextureHandle> {
        let name = format!("texture-{}", self.textures_created);
        let texture = Texture::new(&mut self.backend, &mut self.frame, width, height, rgba8, &name)?;
        self.textures_created += 1;
        Ok(self.textures.insert(texture))
    }

    pub fn destroy_texture(&mut self, texture: TextureHandle) -> Result<()> {
        if !self.textures.contains(texture) {
            return Err(invalid(texture)());
        }
        self.refuse_if_used(TextureHandle::KIND, |desc| desc.uses_texture(texture))?;
        self.finish_recorded_work()?;
        if let Some(mut entry) = self.textures.remove(texture) {
            entry.release(&mut self.backend);
        }
        Ok(())
    }

    pub fn texture(&self, texture: TextureHandle) -> Option<&Texture<B>> {
        self.textures.get(texture)
    }

    // Shaders

    pub fn create_shader(&mut self, desc: ShaderDesc) -> ShaderHandle {
        let shader = Shader::new(desc);
        if shader.has_hit_groups() {
            self.pipeline_state = PipelineState::Dirty;
        }
        self.shaders.insert(shader)
    }

    pub fn destroy_shader(&mut self, shader: ShaderHandle) -> Result<()> {
        if !self.shaders.contains(shader) {
            return Err(invalid(shader)());
        }
        self.refuse_if_used(ShaderHandle::KIND, |desc| desc.uses_shader(shader))?;
        if let Some(entry) = self.shaders.remove(shader) {
            if entry.has_hit_groups() {
                self.pipeline_state = PipelineState::Dirty;
            }
        }
        Ok(())
    }

    pub fn shader(&self, shader: ShaderHandle) -> Option<&Shader> {
        self.shaders.get(shader)
    }

    // Instances

    pub fn create_instance(&mut self, scene: SceneHandle, desc: InstanceDesc) -> Result<InstanceHandle> {
        if !self.scenes.contains(scene) {
            return Err(invalid(scene)());
        }
        self.validate_instance(&desc)?;
        let handle = self.instances.insert(Instance { scene, desc });
        if let Some(entry) = self.scenes.get_mut(scene) {
            entry.add_instance(handle);
        }
        Ok(handle)
    }

    pub fn set_instance(&mut self, instance: InstanceHandle, desc: InstanceDesc) -> Result<()> {
        if !self.instances.contains(instance) {
            return Err(invalid(instance)());
        }
        self.validate_instance(&desc)?;
        if let Some(entry) = self.instances.get_mut(instance) {
            entry.desc = desc;
        }
        Ok(())
    }

    pub fn destroy_instance(&mut self, instance: InstanceHandle) -> Result<()> {
        let entry = self.instances.remove(instance).ok_or_else(invalid(instance))?;
        if let Some(scene) = self.scenes.get_mut(entry.scene) {
            scene.remove_instance(instance);
        }
        Ok(())
    }

    pub fn instance(&self, instance: InstanceHandle) -> Option<&InstanceDesc> {
        self.instances.get(instance).map(|entry| &entry.desc)
    }

    fn validate_instance(&self, desc: &InstanceDesc) -> Result<()> {
        if !self.meshes.contains(desc.mesh) {
            return Err(invalid(desc.mesh)());
        }
        if !self.textures.contains(desc.diffuse_texture) {
            return Err(invalid(desc.diffuse_texture)());
        }
        if let Some(texture) = desc.normal_texture.filter(|&t| !self.textures.contains(t)) {
            return Err(invalid(texture)());
        }
        if let Some(shader) = desc.shader.filter(|&s| !self.shaders.contains(s)) {
            return Err(invalid(shader)());
        }
        Ok(())
    }

    fn refuse_if_used(&self, kind: &'static str, uses: impl Fn(&InstanceDesc) -> bool) -> Result<()> {
        let users = self.instances.iter().filter(|(_, i)| uses(&i.desc)).count();
        if users > 0 {
            tracing::warn!("Refusing to destroy a {kind} still used by {users} instance(s)");
            return Err(RenderError::ResourceInUse(kind));
        }
        Ok(())
    }

    /// Execute whatever the open list holds so resources it references can
    /// be freed.
    fn finish_recorded_work(&mut self) -> Result<()> {
        if self.frame.is_open() {
            self.frame.submit(&mut self.backend)?;
            self.frame.wait_for_gpu(&mut self.backend)?;
            self.frame.reset(&mut self.backend)?;
        }
        Ok(())
    }

    // Frames

    /// Render one frame of every view and present it.
    pub fn draw(&mut self, vsync_interval: u32) -> Result<()> {
        if self.pipeline_state == PipelineState::Dirty {
            self.rebuild_pipeline()?;
        }
        self.frame.flush_pending(&mut self.backend, QueueKind::Graphics);
        self.frame.flush_pending(&mut self.backend, QueueKind::Copy);

        self.update_size()?;
        self.update_views();
        self.pre_render()?;
        self.render_views();
        self.post_render(vsync_interval)
    }

    /// Track the surface size. Zero-sized surfaces are ignored.
    pub fn update_size(&mut self) -> Result<()> {
        let extent = self.backend.surface_extent();
        if extent == self.extent || extent.is_empty() {
            return Ok(());
        }

        tracing::info!("Device size {}x{}", extent.width, extent.height);
        self.backend.resize_swap_targets(extent)?;
        let mut first_error = None;
        for (handle, entry) in self.views.iter_mut() {
            if let Err(e) = entry.view.resize(&mut self.backend, extent) {
                tracing::error!("Failed to resize {handle:?}: {e}");
                first_error.get_or_insert(e);
            }
        }
        // The size is only recorded once everything follows it, so a failed
        // resize is retried by the next frame.
        if let Some(e) = first_error {
            return Err(e);
        }
        self.extent = extent;
        self.aspect_ratio = extent.aspect_ratio();
        Ok(())
    }

    /// Views in scene creation order, then view creation order.
    fn ordered_views(&self) -> Vec<ViewHandle> {
        self.scene_order
            .iter()
            .filter_map(|&scene| self.scenes.get(scene))
            .flat_map(|scene| scene.views().iter().copied())
            .collect()
    }

    fn instance_sources(&self, scene: &Scene<B>) -> Vec<InstanceSource<B>> {
        scene
            .instances()
            .iter()
            .filter_map(|&handle| {
                let desc = &self.instances.get(handle)?.desc;
                let mesh = self.meshes.get(desc.mesh)?;
                let diffuse_texture = self.textures.get(desc.diffuse_texture)?.handle()?;
                let normal_texture = match desc.normal_texture {
                    Some(texture) => Some(self.textures.get(texture)?.handle()?),
                    None => None,
                };
                let hit_group_index = desc
                    .shader
                    .and_then(|shader| self.shaders.get(shader))
                    .map_or(0, Shader::hit_group_index);
                Some(InstanceSource {
                    transform: desc.transform,
                    material: desc.material,
                    vertex_buffer: mesh.vertex_buffer()?,
                    index_buffer: mesh.index_buffer()?,
                    index_count: mesh.index_count(),
                    bottom_level_address: mesh.bottom_level().map(|b| b.address(&self.backend)),
                    diffuse_texture,
                    normal_texture,
                    hit_group_index,
                })
            })
            .collect()
    }

    fn update_views(&mut self) {
        for handle in self.ordered_views() {
            let Some(scene_handle) = self.views.get(handle).map(|entry| entry.scene) else {
                continue;
            };
            let Some(scene) = self.scenes.get(scene_handle) else {
                continue;
            };
            let sources = self.instance_sources(scene);
            let lights = scene.lights_binding();

            let Some(entry) = self.views.get_mut(handle) else {
                continue;
            };
            let inputs = FrameInputs {
                instances: &sources,
                lights,
                pipeline: &self.pipeline,
                aspect: self.aspect_ratio,
            };
            if let Err(e) = entry.view.update(&mut self.backend, &inputs) {
                tracing::error!("Failed to update {handle:?}: {e}");
            }
        }
    }

    fn render_views(&mut self) {
        let pipeline = self.pipeline.pipeline;
        for handle in self.ordered_views() {
            if let Some(entry) = self.views.get_mut(handle) {
                entry.view.render(&mut self.backend, pipeline);
            }
        }
    }

    /// Finish any outstanding work, reopen the list and clear the swap
    /// target.
    pub fn pre_render(&mut self) -> Result<()> {
        if self.frame.is_open() {
            self.frame.submit(&mut self.backend)?;
            self.frame.wait_for_gpu(&mut self.backend)?;
        }
        self.frame.reset(&mut self.backend)?;

        let target = self.backend.swap_target();
        self.backend.cmd_barriers(&[Barrier::texture(
            target,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )]);
        self.backend
            .cmd_begin_render_pass(target, Some(FRAME_CLEAR_COLOR), self.extent);
        self.backend.cmd_end_render_pass();
        Ok(())
    }

    /// Submit the frame, present it and wait for the GPU. Leaves the list
    /// open for resource creation before the next frame.
    pub fn post_render(&mut self, vsync_interval: u32) -> Result<()> {
        let target = self.backend.swap_target();
        self.backend.cmd_barriers(&[Barrier::texture(
            target,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )]);
        self.frame.submit(&mut self.backend)?;
        self.backend.present(vsync_interval)?;
        self.frame.wait_for_gpu(&mut self.backend)?;
        self.backend.advance_swap_target()?;
        self.frame.reset(&mut self.backend)?;
        Ok(())
    }

    /// Recreate the pipeline from the shaders that carry hit groups, in
    /// registration order. Pair 0 stays the built-in default.
    fn rebuild_pipeline(&mut self) -> Result<()> {
        let mut pairs = Vec::new();
        for (_, shader) in self.shaders.iter_mut() {
            match shader.hit_groups() {
                Some(hit_groups) => {
                    pairs.push(hit_groups.clone());
                    shader.set_hit_group_index(pairs.len() as u32);
                }
                None => shader.set_hit_group_index(0),
            }
        }

        let pipeline = create_pipeline(&mut self.backend, &pairs)?;
        let old = std::mem::replace(&mut self.pipeline, pipeline);
        self.backend.destroy_ray_tracing_pipeline(old.pipeline);
        self.pipeline_state = PipelineState::Clean;
        tracing::info!("Rebuilt ray-tracing pipeline with {} shader hit group pairs", pairs.len());
        Ok(())
    }

    fn destroy_all(&mut self) {
        if let Err(e) = self.frame.drain(&mut self.backend) {
            tracing::error!("Failed to drain the GPU before teardown: {e}");
        }
        for mut entry in self.views.drain() {
            entry.view.release(&mut self.backend);
        }
        for mut scene in self.scenes.drain() {
            scene.release(&mut self.backend);
        }
        self.scene_order.clear();
        self.instances.drain();
        for mut mesh in self.meshes.drain() {
            mesh.release(&mut self.backend);
        }
        for mut texture in self.textures.drain() {
            texture.release(&mut self.backend);
        }
        self.shaders.drain();
        self.backend.destroy_ray_tracing_pipeline(self.pipeline.pipeline);
    }
}

impl<B: Backend> Drop for Device<B> {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

fn create_pipeline<B: Backend>(
    backend: &mut B,
    hit_groups: &[prism_gpu::HitGroupPair],
) -> Result<RayTracingPipelineInfo<B::RayTracingPipeline>> {
    Ok(backend.create_ray_tracing_pipeline(&RayTracingPipelineDesc {
        hit_groups,
        max_payload_size: MAX_PAYLOAD_SIZE,
        max_attribute_size: MAX_ATTRIBUTE_SIZE,
        max_recursion_depth: MAX_RECURSION_DEPTH,
    })?)
}

fn invalid<K: Key>(_key: K) -> impl FnOnce() -> RenderError {
    || RenderError::InvalidHandle(K::KIND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_gpu::headless::{Command, HeadlessBackend};
    use prism_gpu::{CommandListState, HitGroupCode, HitGroupPair};

    fn device() -> Device<HeadlessBackend> {
        Device::new(HeadlessBackend::new(Extent::new(8, 6))).unwrap()
    }

    fn hit_groups() -> HitGroupPair {
        HitGroupPair {
            surface: HitGroupCode {
                closest_hit: vec![0x0723_0203],
                any_hit: None,
            },
            shadow: HitGroupCode::default(),
        }
    }

    #[test]
    fn new_device_is_open_and_sized() {
        let device = device();
        assert_eq!(device.frame().state(), CommandListState::Open);
        assert_eq!(device.extent(), Extent::new(8, 6));
        approx::assert_relative_eq!(device.aspect_ratio(), 8.0 / 6.0);
        assert_eq!(device.pipeline_state(), PipelineState::Clean);
        assert_eq!(device.pipeline().hit_groups.len(), 1);
    }

    #[test]
    fn frame_lifecycle() {
        let mut device = device();
        device.draw(1).unwrap();

        let backend = device.backend();
        assert_eq!(backend.presents(), &[1]);
        assert_eq!(device.frame().fence_value(), 3);
        assert_eq!(backend.swap_index(), 1);
        assert!(backend.is_recording());

        let frame = backend.submissions().last().unwrap();
        assert_eq!(
            frame.iter().map(ToString::to_string).collect::<Vec<_>>(),
            [
                "barrier swap-target-0 Present -> RenderTarget",
                "begin-pass swap-target-0 8x6 clear [0.0, 0.0, 0.0, 1.0]",
                "end-pass",
                "barrier swap-target-0 RenderTarget -> Present",
            ]
        );
    }

    #[test]
    fn only_hit_group_shaders_dirty_the_pipeline() {
        let mut device = device();
        let raster_only = device.create_shader(ShaderDesc::new("flat"));
        assert_eq!(device.pipeline_state(), PipelineState::Clean);

        let glossy = device.create_shader(ShaderDesc::new("glossy").with_hit_groups(hit_groups()));
        assert_eq!(device.pipeline_state(), PipelineState::Dirty);

        device.draw(0).unwrap();
        assert_eq!(device.pipeline_state(), PipelineState::Clean);
        assert_eq!(device.pipeline().hit_groups.len(), 2);
        assert_eq!(device.shader(glossy).unwrap().hit_group_index(), 1);
        assert_eq!(device.shader(raster_only).unwrap().hit_group_index(), 0);
        assert_eq!(device.backend().live_pipelines(), 1);

        device.destroy_shader(raster_only).unwrap();
        assert_eq!(device.pipeline_state(), PipelineState::Clean);
        device.destroy_shader(glossy).unwrap();
        assert_eq!(device.pipeline_state(), PipelineState::Dirty);
    }

    #[test]
    fn resources_in_use_are_not_destroyed() {
        let mut device = device();
        let scene = device.create_scene();
        let mesh = device
            .create_mesh(
                &[Vertex::default(); 3],
                &[0, 1, 2],
                MeshFlags::empty(),
            )
            .unwrap();
        let texture = device.create_texture(1, 1, &[255; 4]).unwrap();
        let instance = device
            .create_instance(scene, InstanceDesc::new(mesh, texture))
            .unwrap();

        assert!(matches!(device.destroy_mesh(mesh), Err(RenderError::ResourceInUse("mesh"))));
        assert!(matches!(
            device.destroy_texture(texture),
            Err(RenderError::ResourceInUse("texture"))
        ));

        device.destroy_instance(instance).unwrap();
        device.destroy_mesh(mesh).unwrap();
        device.destroy_texture(texture).unwrap();
        assert!(matches!(device.destroy_mesh(mesh), Err(RenderError::InvalidHandle("mesh"))));
    }

    #[test]
    fn destroying_a_scene_destroys_its_views_and_instances() {
        let mut device = device();
        let scene = device.create_scene();
        let view = device.create_view(scene).unwrap();
        let mesh = device
            .create_mesh(&[Vertex::default(); 3], &[0, 1, 2], MeshFlags::RAYTRACE)
            .unwrap();
        let texture = device.create_texture(1, 1, &[0; 4]).unwrap();
        let instance = device
            .create_instance(scene, InstanceDesc::new(mesh, texture))
            .unwrap();
        device.draw(1).unwrap();

        device.destroy_scene(scene).unwrap();
        assert!(device.view(view).is_none());
        assert!(device.instance(instance).is_none());
        assert!(device.scene(scene).is_none());
        assert!(device.create_view(scene).is_err());

        // Only the mesh and texture remain.
        device.destroy_mesh(mesh).unwrap();
        device.destroy_texture(texture).unwrap();
        assert_eq!(device.backend().live_buffers(), 0);
        assert_eq!(device.backend().live_textures(), 0);
        assert_eq!(device.backend().live_structures(), 0);
        assert_eq!(device.backend().live_tables(), 0);
        assert!(device.backend().misuse().is_empty());
    }

    #[test]
    fn surface_changes_resize_views() {
        let mut device = device();
        let scene = device.create_scene();
        let view = device.create_view(scene).unwrap();

        device.backend_mut().set_surface_extent(Extent::new(0, 0));
        device.draw(1).unwrap();
        assert_eq!(device.extent(), Extent::new(8, 6));

        device.backend_mut().set_surface_extent(Extent::new(32, 16));
        device.draw(1).unwrap();
        assert_eq!(device.extent(), Extent::new(32, 16));
        assert_eq!(device.backend().swap_extent(), Extent::new(32, 16));
        assert_eq!(device.view(view).unwrap().extent(), Extent::new(32, 16));
        approx::assert_relative_eq!(device.aspect_ratio(), 2.0);
    }

    #[test]
    fn failed_resize_is_retried_next_frame() {
        let mut device = device();
        let scene = device.create_scene();
        let first = device.create_view(scene).unwrap();
        let second = device.create_view(scene).unwrap();

        device.backend_mut().fail_allocations_named("hit-color");
        device.backend_mut().set_surface_extent(Extent::new(16, 8));
        assert!(device.draw(1).is_err());
        assert_eq!(device.extent(), Extent::new(8, 6));
        approx::assert_relative_eq!(device.aspect_ratio(), 8.0 / 6.0);
        // Every view was attempted, not only the first.
        assert_eq!(device.view(second).unwrap().extent(), Extent::new(16, 8));

        device.backend_mut().clear_allocation_failures();
        device.draw(1).unwrap();
        assert_eq!(device.extent(), Extent::new(16, 8));
        approx::assert_relative_eq!(device.aspect_ratio(), 2.0);
        for view in [first, second] {
            let view = device.view(view).unwrap();
            assert_eq!(view.extent(), Extent::new(16, 8));
            assert!(view.outputs().is_complete());
        }
        let (_, colors) = device.backend().find_buffer("hit-color").unwrap();
        assert_eq!(colors.size, 16 * 8 * 13 * 8);
        assert_eq!(device.backend().live_textures(), 2 * 3);
    }

    #[test]
    fn one_swap_rebuild_per_size_change() {
        let mut device = device();
        assert_eq!(device.backend().stats().swap_chains_created, 1);

        device.backend_mut().set_surface_extent(Extent::new(12, 12));
        device.draw(1).unwrap();
        device.draw(1).unwrap();
        assert_eq!(device.backend().stats().swap_chains_created, 2);
        assert_eq!(device.backend().swap_extent(), Extent::new(12, 12));
    }

    #[test]
    fn texture_transition_is_flushed_by_draw() {
        let mut device = device();
        device.create_texture(1, 1, &[0; 4]).unwrap();
        device.draw(1).unwrap();

        let first = &device.backend().submissions()[0];
        assert!(matches!(&first[0], Command::CopyBufferToTexture { dst, .. } if dst == "texture-0"));
        assert_eq!(first[1].to_string(), "barrier texture-0 CopyDest -> ShaderResource");
    }
}
