//! Per-camera view pipeline.
//!
//! Every frame a view snapshots its scene into three buckets, rebuilds its
//! top level, refreshes the instance properties, rewrites the descriptor
//! heap and shader binding table, and then records:
//! 1. Raster background and foreground passes into two render targets
//! 2. A ray dispatch into the output image when anything is ray traced
//! 3. A copy of the output onto the current swap target
//!
//! Resources that depend on instance or texture counts only grow; output
//! buffers follow the device size.

use glam::{Mat4, Vec3};
use hashbrown::HashMap;
use prism_core::constants::{MAX_QUERIES_PER_PIXEL, MAX_TEXTURES};
use prism_core::{Extent, Material};
use prism_gpu::{
    Backend, Barrier, BufferDesc, BufferUsage, DescriptorBinding, DescriptorWrite, DispatchRays,
    ElementFormat, GpuBuffer, GpuTexture, HeapKind, IndexedDraw, RayTracingPipelineInfo,
    ResourceState, TextureDesc, TextureUsage,
};
use prism_rt::{
    DescriptorHeap, HeapSlot, ShaderBindingTable, ShaderBindingTableBuilder,
    TopLevelAccelerationStructure,
};

use crate::camera::{Camera, CameraState, CAMERA_BUFFER_SIZE};
use crate::error::{RenderError, Result};
use crate::properties::{properties_buffer_size, InstanceProperties};
use crate::scene::LightsBinding;

/// Where a view is within its frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewStage {
    Idle,
    Snapshotting,
    GeometryBuilt,
    HeapAndTableBuilt,
    Rendered,
}

/// An instance as the device resolved it for this frame.
pub struct InstanceSource<B: Backend + ?Sized> {
    pub transform: Mat4,
    pub material: Material,
    pub vertex_buffer: B::Buffer,
    pub index_buffer: B::Buffer,
    pub index_count: u32,
    /// Set for meshes built with a bottom level.
    pub bottom_level_address: Option<u64>,
    pub diffuse_texture: B::Texture,
    pub normal_texture: Option<B::Texture>,
    pub hit_group_index: u32,
}

/// One instance of a frame snapshot, with texture indices resolved against
/// the snapshot's texture list.
pub struct RenderInstance<B: Backend + ?Sized> {
    pub transform: Mat4,
    pub material: Material,
    pub vertex_buffer: B::Buffer,
    pub index_buffer: B::Buffer,
    pub index_count: u32,
    pub bottom_level_address: Option<u64>,
    pub hit_group_index: u32,
}

/// The three instance buckets and the textures they use.
pub struct Snapshot<B: Backend + ?Sized> {
    pub ray_traced: Vec<RenderInstance<B>>,
    pub background: Vec<RenderInstance<B>>,
    pub foreground: Vec<RenderInstance<B>>,
    pub textures: Vec<B::Texture>,
}

impl<B: Backend + ?Sized> Default for Snapshot<B> {
    fn default() -> Self {
        Self {
            ray_traced: Vec::new(),
            background: Vec::new(),
            foreground: Vec::new(),
            textures: Vec::new(),
        }
    }
}

impl<B: Backend + ?Sized> Snapshot<B> {
    /// Partition `sources` in order. Instances with a bottom level are ray
    /// traced; the rest go to the background or foreground pass by their
    /// material's background flag.
    pub fn build(sources: &[InstanceSource<B>]) -> Result<Self> {
        let mut snapshot = Self::default();
        let mut texture_indices: HashMap<B::Texture, i32> = HashMap::new();
        let mut resolve = |texture: B::Texture, textures: &mut Vec<B::Texture>| {
            *texture_indices.entry(texture).or_insert_with(|| {
                textures.push(texture);
                (textures.len() - 1) as i32
            })
        };

        for source in sources {
            let mut material = source.material;
            material.diffuse_texture_index = resolve(source.diffuse_texture, &mut snapshot.textures);
            material.normal_texture_index = source
                .normal_texture
                .map_or(-1, |texture| resolve(texture, &mut snapshot.textures));

            let instance = RenderInstance {
                transform: source.transform,
                material,
                vertex_buffer: source.vertex_buffer,
                index_buffer: source.index_buffer,
                index_count: source.index_count,
                bottom_level_address: source.bottom_level_address,
                hit_group_index: source.hit_group_index,
            };
            if instance.bottom_level_address.is_some() {
                snapshot.ray_traced.push(instance);
            } else if material.is_background() {
                snapshot.background.push(instance);
            } else {
                snapshot.foreground.push(instance);
            }
        }

        if snapshot.textures.len() > MAX_TEXTURES {
            return Err(RenderError::TooManyTextures(snapshot.textures.len()));
        }
        Ok(snapshot)
    }

    pub fn total(&self) -> usize {
        self.ray_traced.len() + self.background.len() + self.foreground.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Properties in buffer order: ray traced, then background, then
    /// foreground.
    pub fn properties(&self) -> Vec<InstanceProperties> {
        let ray_traced = self
            .ray_traced
            .iter()
            .map(|i| InstanceProperties::ray_traced(&i.transform, i.material));
        let rasterized = self
            .background
            .iter()
            .chain(&self.foreground)
            .map(|i| InstanceProperties::rasterized(i.material));
        ray_traced.chain(rasterized).collect()
    }
}

/// The view's size-dependent images and hit buffers.
pub struct OutputBuffers<B: Backend + ?Sized> {
    pub raster: [GpuTexture<B>; 2],
    pub output: GpuTexture<B>,
    pub hit_distance: GpuBuffer<B>,
    pub hit_color: GpuBuffer<B>,
    pub hit_normal: GpuBuffer<B>,
    pub hit_instance_id: GpuBuffer<B>,
}

impl<B: Backend + ?Sized> Default for OutputBuffers<B> {
    fn default() -> Self {
        Self {
            raster: [GpuTexture::null(), GpuTexture::null()],
            output: GpuTexture::null(),
            hit_distance: GpuBuffer::null(),
            hit_color: GpuBuffer::null(),
            hit_normal: GpuBuffer::null(),
            hit_instance_id: GpuBuffer::null(),
        }
    }
}

/// Raw handles of a complete set of outputs.
struct OutputHandles<B: Backend + ?Sized> {
    raster: [B::Texture; 2],
    output: B::Texture,
    hit_distance: B::Buffer,
    hit_color: B::Buffer,
    hit_normal: B::Buffer,
    hit_instance_id: B::Buffer,
}

impl<B: Backend + ?Sized> OutputBuffers<B> {
    /// Elements per hit buffer for `extent`.
    pub const fn hit_elements(extent: Extent) -> u64 {
        extent.pixel_count() * MAX_QUERIES_PER_PIXEL
    }

    /// Release whatever is held and allocate for `extent`.
    pub fn reallocate(&mut self, backend: &mut B, extent: Extent) -> Result<()> {
        self.release(backend);

        for (target, name) in self.raster.iter_mut().zip(["raster-background", "raster-foreground"]) {
            *target = GpuTexture::allocate(
                backend,
                &TextureDesc {
                    name,
                    width: extent.width,
                    height: extent.height,
                    usage: TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
                    heap: HeapKind::Default,
                    initial_state: ResourceState::ShaderResource,
                    clear_value: Some([0.0; 4]),
                    committed: true,
                    shared: false,
                },
            )?;
        }

        self.output = GpuTexture::allocate(
            backend,
            &TextureDesc {
                name: "ray-output",
                width: extent.width,
                height: extent.height,
                usage: TextureUsage::STORAGE | TextureUsage::TRANSFER_SRC,
                heap: HeapKind::Default,
                initial_state: ResourceState::CopySource,
                clear_value: None,
                committed: true,
                shared: false,
            },
        )?;

        let elements = Self::hit_elements(extent);
        let hit_buffers = [
            (&mut self.hit_distance, "hit-distance", ElementFormat::R32Float),
            (&mut self.hit_color, "hit-color", ElementFormat::Rgba16Float),
            (&mut self.hit_normal, "hit-normal", ElementFormat::Rgba16Float),
            (&mut self.hit_instance_id, "hit-instance-id", ElementFormat::R16Uint),
        ];
        for (buffer, name, format) in hit_buffers {
            *buffer = GpuBuffer::allocate(
                backend,
                &BufferDesc::device(
                    name,
                    elements * format.size(),
                    BufferUsage::STORAGE,
                    ResourceState::UnorderedAccess,
                ),
            )?;
        }
        Ok(())
    }

    fn handles(&self) -> Option<OutputHandles<B>> {
        Some(OutputHandles {
            raster: [self.raster[0].get()?, self.raster[1].get()?],
            output: self.output.get()?,
            hit_distance: self.hit_distance.get()?,
            hit_color: self.hit_color.get()?,
            hit_normal: self.hit_normal.get()?,
            hit_instance_id: self.hit_instance_id.get()?,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.handles().is_some()
    }

    pub fn release(&mut self, backend: &mut B) {
        for target in &mut self.raster {
            target.release(backend);
        }
        self.output.release(backend);
        self.hit_distance.release(backend);
        self.hit_color.release(backend);
        self.hit_normal.release(backend);
        self.hit_instance_id.release(backend);
    }
}

/// Per-frame inputs a view reads from its device and scene.
pub struct FrameInputs<'a, B: Backend + ?Sized> {
    pub instances: &'a [InstanceSource<B>],
    pub lights: Option<LightsBinding<B::Buffer>>,
    pub pipeline: &'a RayTracingPipelineInfo<B::RayTracingPipeline>,
    pub aspect: f32,
}

/// A camera over one scene and everything it renders with.
pub struct View<B: Backend + ?Sized> {
    camera: Camera,
    stage: ViewStage,
    /// Set when this frame's update failed; render skips the view
    update_failed: bool,
    extent: Extent,
    snapshot: Snapshot<B>,
    top_level: TopLevelAccelerationStructure<B>,
    top_level_built: bool,
    properties: GpuBuffer<B>,
    camera_buffer: GpuBuffer<B>,
    heap: DescriptorHeap<B>,
    sbt: ShaderBindingTable<B>,
    outputs: OutputBuffers<B>,
}

impl<B: Backend + ?Sized> View<B> {
    /// Create a view sized to `extent`. A zero extent leaves the outputs
    /// unallocated until the next resize.
    pub fn new(backend: &mut B, extent: Extent) -> Result<Self> {
        let mut view = Self {
            camera: Camera::new(),
            stage: ViewStage::Idle,
            update_failed: false,
            extent: Extent::default(),
            snapshot: Snapshot::default(),
            top_level: TopLevelAccelerationStructure::new("top-level"),
            top_level_built: false,
            properties: GpuBuffer::null(),
            camera_buffer: GpuBuffer::null(),
            heap: DescriptorHeap::new(),
            sbt: ShaderBindingTable::new(),
            outputs: OutputBuffers::default(),
        };
        let created = GpuBuffer::allocate(
            backend,
            &BufferDesc::upload("camera", CAMERA_BUFFER_SIZE, BufferUsage::UNIFORM),
        )
        .map_err(RenderError::from)
        .and_then(|buffer| {
            view.camera_buffer = buffer;
            view.resize(backend, extent)
        });
        if let Err(e) = created {
            view.release(backend);
            return Err(e);
        }
        Ok(view)
    }

    pub const fn stage(&self) -> ViewStage {
        self.stage
    }

    pub const fn extent(&self) -> Extent {
        self.extent
    }

    pub const fn camera(&self) -> &CameraState {
        &self.camera.state
    }

    pub const fn snapshot(&self) -> &Snapshot<B> {
        &self.snapshot
    }

    pub const fn top_level(&self) -> &TopLevelAccelerationStructure<B> {
        &self.top_level
    }

    pub const fn heap(&self) -> &DescriptorHeap<B> {
        &self.heap
    }

    pub const fn shader_binding_table(&self) -> &ShaderBindingTable<B> {
        &self.sbt
    }

    pub const fn outputs(&self) -> &OutputBuffers<B> {
        &self.outputs
    }

    pub const fn properties_buffer(&self) -> Option<B::Buffer> {
        self.properties.get()
    }

    pub const fn camera_buffer(&self) -> Option<B::Buffer> {
        self.camera_buffer.get()
    }

    pub fn set_perspective(
        &mut self,
        eye: Vec3,
        focus: Vec3,
        up: Vec3,
        fov: f32,
        near: f32,
        far: f32,
    ) {
        self.camera.state = CameraState::new(eye, focus, up, fov, near, far);
    }

    /// Reallocate the size-dependent outputs. The heap and binding table
    /// pick the new resources up on the next update.
    pub fn resize(&mut self, backend: &mut B, extent: Extent) -> Result<()> {
        self.outputs.release(backend);
        self.extent = extent;
        if extent.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.outputs.reallocate(backend, extent) {
            self.outputs.release(backend);
            return Err(e);
        }
        // An existing heap must not keep pointing at the released outputs,
        // even when the next update stops early on an empty scene.
        let writes = self.output_writes();
        self.heap.write(backend, &writes);
        Ok(())
    }

    /// Snapshot the scene and rebuild everything the next render reads.
    pub fn update(&mut self, backend: &mut B, inputs: &FrameInputs<'_, B>) -> Result<()> {
        self.stage = ViewStage::Snapshotting;
        let result = self.rebuild(backend, inputs);
        self.update_failed = result.is_err();
        if result.is_err() {
            self.snapshot = Snapshot::default();
            self.top_level_built = false;
            self.stage = ViewStage::Idle;
        }
        // The camera follows even when the snapshot failed.
        let uniforms = self.camera.update(inputs.aspect);
        if let Some(buffer) = self.camera_buffer.get() {
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&uniforms))?;
        }
        result
    }

    fn rebuild(&mut self, backend: &mut B, inputs: &FrameInputs<'_, B>) -> Result<()> {
        self.snapshot = Snapshot::build(inputs.instances)?;
        if self.snapshot.is_empty() {
            self.top_level_built = false;
            self.stage = ViewStage::Idle;
            return Ok(());
        }

        self.top_level_built = false;
        if !self.snapshot.ray_traced.is_empty() {
            self.top_level.reset();
            for (i, instance) in self.snapshot.ray_traced.iter().enumerate() {
                let i = i as u32;
                self.top_level.add_instance(
                    instance.bottom_level_address.unwrap_or(0),
                    &instance.transform,
                    i,
                    2 * i,
                );
            }
            self.top_level.build(backend)?;
            self.top_level_built = true;
        }

        let properties_size = properties_buffer_size(self.snapshot.total());
        if properties_size != self.properties.size() {
            self.properties.release(backend);
            self.properties = GpuBuffer::allocate(
                backend,
                &BufferDesc::upload("instance-properties", properties_size, BufferUsage::STORAGE),
            )?;
        }
        self.stage = ViewStage::GeometryBuilt;

        if self.heap.ensure_capacity(backend, self.snapshot.textures.len())? {
            tracing::debug!("Descriptor heap now holds {} entries", self.heap.capacity());
        }
        let writes = self.descriptor_writes(inputs.lights);
        self.heap.write(backend, &writes);

        let builder = self.binding_table(backend, inputs.pipeline);
        self.sbt.update(backend, &builder)?;
        self.stage = ViewStage::HeapAndTableBuilt;

        if let Some(buffer) = self.properties.get() {
            let properties = self.snapshot.properties();
            backend.write_buffer(buffer, 0, bytemuck::cast_slice(&properties))?;
        }
        Ok(())
    }

    /// Slots of the size-dependent outputs, empty while they are
    /// unallocated.
    fn output_writes(&self) -> Vec<DescriptorWrite<B>> {
        let Some(outputs) = self.outputs.handles() else {
            return Vec::new();
        };
        let elements = OutputBuffers::<B>::hit_elements(self.extent);
        let storage = |buffer: B::Buffer, format: ElementFormat| DescriptorBinding::<B>::StorageBuffer {
            buffer,
            elements,
            format,
        };
        [
            (HeapSlot::Output, DescriptorBinding::StorageTexture(outputs.output)),
            (HeapSlot::HitDistance, storage(outputs.hit_distance, ElementFormat::R32Float)),
            (HeapSlot::HitColor, storage(outputs.hit_color, ElementFormat::Rgba16Float)),
            (HeapSlot::HitNormal, storage(outputs.hit_normal, ElementFormat::Rgba16Float)),
            (HeapSlot::HitInstanceId, storage(outputs.hit_instance_id, ElementFormat::R16Uint)),
            (HeapSlot::RasterBackground, DescriptorBinding::SampledTexture(outputs.raster[0])),
            (HeapSlot::RasterForeground, DescriptorBinding::SampledTexture(outputs.raster[1])),
        ]
        .into_iter()
        .map(|(slot, binding)| DescriptorWrite {
            slot: slot.index(),
            binding,
        })
        .collect()
    }

    fn descriptor_writes(&self, lights: Option<LightsBinding<B::Buffer>>) -> Vec<DescriptorWrite<B>> {
        let mut writes = Vec::with_capacity(HeapSlot::texture(0) as usize + self.snapshot.textures.len());
        writes.extend(self.output_writes());
        let mut push = |slot: HeapSlot, binding: DescriptorBinding<B>| {
            writes.push(DescriptorWrite {
                slot: slot.index(),
                binding,
            });
        };

        if let (true, Some(top_level)) = (self.top_level_built, self.top_level.handle()) {
            push(HeapSlot::TopLevel, DescriptorBinding::AccelerationStructure(top_level));
        }
        if let Some(buffer) = self.camera_buffer.get() {
            push(
                HeapSlot::Camera,
                DescriptorBinding::UniformBuffer {
                    buffer,
                    size: CAMERA_BUFFER_SIZE,
                },
            );
        }
        if let Some(lights) = lights.filter(|l| l.count > 0) {
            push(
                HeapSlot::Lights,
                DescriptorBinding::StructuredBuffer {
                    buffer: lights.buffer,
                    elements: u64::from(lights.count),
                    stride: std::mem::size_of::<prism_core::Light>() as u64,
                },
            );
        }
        if let Some(buffer) = self.properties.get() {
            push(
                HeapSlot::InstanceProperties,
                DescriptorBinding::StructuredBuffer {
                    buffer,
                    elements: self.snapshot.total() as u64,
                    stride: InstanceProperties::SIZE,
                },
            );
        }

        writes.extend(self.snapshot.textures.iter().enumerate().map(|(i, &texture)| {
            DescriptorWrite {
                slot: HeapSlot::texture(i as u32),
                binding: DescriptorBinding::SampledTexture(texture),
            }
        }));
        writes
    }

    fn binding_table(
        &self,
        backend: &B,
        pipeline: &RayTracingPipelineInfo<B::RayTracingPipeline>,
    ) -> ShaderBindingTableBuilder {
        let mut builder = ShaderBindingTableBuilder::new(backend.sbt_layout());
        builder.add_ray_generation(pipeline.ray_generation.clone(), &[]);
        builder.add_miss(pipeline.shadow_miss.clone(), &[]);

        for instance in &self.snapshot.ray_traced {
            let pair = pipeline
                .hit_groups
                .get(instance.hit_group_index as usize)
                .or_else(|| pipeline.hit_groups.first());
            let Some((surface, shadow)) = pair else {
                continue;
            };
            let arguments = [
                backend.buffer_address(instance.vertex_buffer),
                backend.buffer_address(instance.index_buffer),
            ];
            builder.add_hit_group(surface.clone(), &arguments);
            builder.add_hit_group(shadow.clone(), &arguments);
        }
        builder
    }

    /// Record this frame's raster passes, ray dispatch and composite into the
    /// open command list.
    pub fn render(&mut self, backend: &mut B, pipeline: B::RayTracingPipeline) {
        if self.update_failed {
            return;
        }
        let Some(table) = self.heap.table() else {
            return;
        };
        let Some(outputs) = self.outputs.handles() else {
            return;
        };

        let [background, foreground] = outputs.raster;
        backend.cmd_barriers(&[
            Barrier::texture(background, ResourceState::ShaderResource, ResourceState::RenderTarget),
            Barrier::texture(foreground, ResourceState::ShaderResource, ResourceState::RenderTarget),
        ]);

        let mut instance_index = self.snapshot.ray_traced.len() as u32;
        for (target, instances) in [
            (background, &self.snapshot.background),
            (foreground, &self.snapshot.foreground),
        ] {
            backend.cmd_begin_render_pass(target, Some([0.0; 4]), self.extent);
            backend.cmd_bind_raster(table);
            for instance in instances {
                backend.cmd_draw_indexed(&IndexedDraw {
                    vertex_buffer: instance.vertex_buffer,
                    index_buffer: instance.index_buffer,
                    index_count: instance.index_count,
                    instance_index,
                });
                instance_index += 1;
            }
            backend.cmd_end_render_pass();
        }

        backend.cmd_barriers(&[
            Barrier::texture(background, ResourceState::RenderTarget, ResourceState::ShaderResource),
            Barrier::texture(foreground, ResourceState::RenderTarget, ResourceState::ShaderResource),
        ]);

        backend.cmd_barriers(&[Barrier::texture(
            outputs.output,
            ResourceState::CopySource,
            ResourceState::UnorderedAccess,
        )]);
        if let (false, Some(sbt)) = (self.snapshot.ray_traced.is_empty(), self.sbt.buffer()) {
            let sections = self.sbt.sections();
            backend.cmd_dispatch_rays(&DispatchRays {
                pipeline,
                table,
                sbt,
                ray_generation: sections.ray_generation,
                miss: sections.miss,
                hit_groups: sections.hit_groups,
                width: self.extent.width,
                height: self.extent.height,
            });
        }
        backend.cmd_barriers(&[Barrier::texture(
            outputs.output,
            ResourceState::UnorderedAccess,
            ResourceState::CopySource,
        )]);

        let swap_target = backend.swap_target();
        backend.cmd_barriers(&[Barrier::texture(
            swap_target,
            ResourceState::RenderTarget,
            ResourceState::CopyDest,
        )]);
        backend.cmd_copy_texture(swap_target, outputs.output);
        backend.cmd_barriers(&[Barrier::texture(
            swap_target,
            ResourceState::CopyDest,
            ResourceState::RenderTarget,
        )]);

        self.stage = ViewStage::Rendered;
    }

    pub fn release(&mut self, backend: &mut B) {
        self.outputs.release(backend);
        self.sbt.release(backend);
        self.heap.release(backend);
        self.properties.release(backend);
        self.camera_buffer.release(backend);
        self.top_level.release(backend);
        self.snapshot = Snapshot::default();
        self.top_level_built = false;
        self.update_failed = false;
        self.stage = ViewStage::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_gpu::headless::{Descriptor, HeadlessBackend};
    use prism_gpu::RayTracingPipelineDesc;

    type Headless = HeadlessBackend;

    struct Fixture {
        backend: Headless,
        pipeline: RayTracingPipelineInfo<<Headless as Backend>::RayTracingPipeline>,
        textures: Vec<<Headless as Backend>::Texture>,
        buffers: Vec<<Headless as Backend>::Buffer>,
    }

    impl Fixture {
        fn new(extent: Extent) -> Self {
            let mut backend = HeadlessBackend::new(extent);
            backend.reset_command_list().unwrap();
            let pipeline = backend
                .create_ray_tracing_pipeline(&RayTracingPipelineDesc {
                    hit_groups: &[],
                    max_payload_size: 8,
                    max_attribute_size: 8,
                    max_recursion_depth: 1,
                })
                .unwrap();
            let textures = (0..4)
                .map(|i| {
                    backend
                        .create_texture(&TextureDesc {
                            name: &format!("texture-{i}"),
                            width: 1,
                            height: 1,
                            usage: TextureUsage::SAMPLED,
                            heap: HeapKind::Default,
                            initial_state: ResourceState::ShaderResource,
                            clear_value: None,
                            committed: false,
                            shared: false,
                        })
                        .unwrap()
                })
                .collect();
            let buffers = (0..2)
                .map(|i| {
                    backend
                        .create_buffer(&BufferDesc::upload(&format!("geometry-{i}"), 64, BufferUsage::VERTEX))
                        .unwrap()
                })
                .collect();
            Self {
                backend,
                pipeline,
                textures,
                buffers,
            }
        }

        fn source(&self, ray_traced: bool, background: bool, diffuse: usize) -> InstanceSource<Headless> {
            InstanceSource {
                transform: Mat4::IDENTITY,
                material: Material {
                    background: u32::from(background),
                    ..Material::default()
                },
                vertex_buffer: self.buffers[0],
                index_buffer: self.buffers[1],
                index_count: 3,
                bottom_level_address: ray_traced.then_some(0xB000),
                diffuse_texture: self.textures[diffuse],
                normal_texture: None,
                hit_group_index: 0,
            }
        }
    }

    #[test]
    fn partition_and_texture_indices() {
        let fixture = Fixture::new(Extent::new(4, 4));
        let mut with_normal = fixture.source(false, false, 2);
        with_normal.normal_texture = Some(fixture.textures[0]);
        let sources = [
            fixture.source(false, true, 0),
            fixture.source(true, true, 1),
            with_normal,
            fixture.source(true, false, 0),
        ];

        let snapshot = Snapshot::build(&sources).unwrap();
        assert_eq!(snapshot.ray_traced.len(), 2);
        assert_eq!(snapshot.background.len(), 1);
        assert_eq!(snapshot.foreground.len(), 1);
        assert_eq!(snapshot.textures, [fixture.textures[0], fixture.textures[1], fixture.textures[2]]);

        assert_eq!(snapshot.ray_traced[0].material.diffuse_texture_index, 1);
        assert_eq!(snapshot.ray_traced[1].material.diffuse_texture_index, 0);
        assert_eq!(snapshot.foreground[0].material.diffuse_texture_index, 2);
        assert_eq!(snapshot.foreground[0].material.normal_texture_index, 0);
        assert_eq!(snapshot.background[0].material.normal_texture_index, -1);

        let properties = snapshot.properties();
        assert_eq!(properties.len(), 4);
        assert_eq!(properties[0].object_to_world, Mat4::IDENTITY.to_cols_array_2d());
        assert_eq!(properties[2].object_to_world, [[0.0; 4]; 4]);
        assert_eq!(properties[2].material.background, 1);
        assert_eq!(properties[3].material.normal_texture_index, 0);
    }

    #[test]
    fn update_writes_fixed_slots_then_textures() {
        let mut fixture = Fixture::new(Extent::new(8, 4));
        let sources = [fixture.source(true, false, 3), fixture.source(false, false, 1)];
        let mut view = View::new(&mut fixture.backend, Extent::new(8, 4)).unwrap();
        view.update(
            &mut fixture.backend,
            &FrameInputs {
                instances: &sources,
                lights: None,
                pipeline: &fixture.pipeline,
                aspect: 2.0,
            },
        )
        .unwrap();
        assert_eq!(view.stage(), ViewStage::HeapAndTableBuilt);

        let table = fixture.backend.table(view.heap().table().unwrap()).unwrap();
        assert_eq!(table.capacity, 13);
        assert!(table.slots.contains_key(&HeapSlot::TopLevel.index()));
        assert!(!table.slots.contains_key(&HeapSlot::Lights.index()));
        assert_eq!(
            table.slots[&HeapSlot::HitColor.index()],
            Descriptor::StorageBuffer {
                buffer: view.outputs().hit_color.get().unwrap(),
                elements: 8 * 4 * 13,
                format: ElementFormat::Rgba16Float,
            }
        );
        assert_eq!(
            table.slots[&HeapSlot::InstanceProperties.index()],
            Descriptor::StructuredBuffer {
                buffer: view.properties_buffer().unwrap(),
                elements: 2,
                stride: 208,
            }
        );
        assert_eq!(table.slots[&11], Descriptor::SampledTexture(fixture.textures[3]));
        assert_eq!(table.slots[&12], Descriptor::SampledTexture(fixture.textures[1]));

        let properties = fixture.backend.buffer(view.properties_buffer().unwrap()).unwrap();
        assert_eq!(properties.size, 512);

        view.release(&mut fixture.backend);
    }

    #[test]
    fn empty_scene_only_touches_the_camera() {
        let mut fixture = Fixture::new(Extent::new(4, 4));
        let mut view = View::new(&mut fixture.backend, Extent::new(4, 4)).unwrap();
        view.update(
            &mut fixture.backend,
            &FrameInputs {
                instances: &[],
                lights: None,
                pipeline: &fixture.pipeline,
                aspect: 1.0,
            },
        )
        .unwrap();

        assert!(view.heap().table().is_none());
        assert!(view.properties_buffer().is_none());
        assert!(view.top_level().handle().is_none());
        let camera = fixture.backend.buffer(view.camera_buffer().unwrap()).unwrap();
        assert_ne!(camera.data[..64], [0u8; 64]);

        // Nothing to render with yet.
        let before = fixture.backend.recorded().len();
        view.render(&mut fixture.backend, fixture.pipeline.pipeline);
        assert_eq!(fixture.backend.recorded().len(), before);
        view.release(&mut fixture.backend);
    }

    #[test]
    fn too_many_textures_fails_the_update() {
        let mut fixture = Fixture::new(Extent::new(4, 4));
        let textures: Vec<_> = (0..=MAX_TEXTURES)
            .map(|_| {
                fixture
                    .backend
                    .create_texture(&TextureDesc {
                        name: "many",
                        width: 1,
                        height: 1,
                        usage: TextureUsage::SAMPLED,
                        heap: HeapKind::Default,
                        initial_state: ResourceState::ShaderResource,
                        clear_value: None,
                        committed: false,
                        shared: false,
                    })
                    .unwrap()
            })
            .collect();
        let sources: Vec<_> = textures
            .iter()
            .map(|&texture| InstanceSource {
                diffuse_texture: texture,
                ..fixture.source(false, false, 0)
            })
            .collect();

        let mut view = View::new(&mut fixture.backend, Extent::new(4, 4)).unwrap();
        let result = view.update(
            &mut fixture.backend,
            &FrameInputs {
                instances: &sources,
                lights: None,
                pipeline: &fixture.pipeline,
                aspect: 1.0,
            },
        );
        assert!(matches!(result, Err(RenderError::TooManyTextures(1025))));
        assert!(view.snapshot().is_empty());
        assert_eq!(view.stage(), ViewStage::Idle);
        view.release(&mut fixture.backend);
    }

    #[test]
    fn failed_update_skips_render() {
        fn inputs<'a>(
            instances: &'a [InstanceSource<Headless>],
            pipeline: &'a RayTracingPipelineInfo<<Headless as Backend>::RayTracingPipeline>,
        ) -> FrameInputs<'a, Headless> {
            FrameInputs {
                instances,
                lights: None,
                pipeline,
                aspect: 1.0,
            }
        }

        let mut fixture = Fixture::new(Extent::new(4, 4));
        let textures: Vec<_> = (0..=MAX_TEXTURES)
            .map(|_| {
                fixture
                    .backend
                    .create_texture(&TextureDesc {
                        name: "many",
                        width: 1,
                        height: 1,
                        usage: TextureUsage::SAMPLED,
                        heap: HeapKind::Default,
                        initial_state: ResourceState::ShaderResource,
                        clear_value: None,
                        committed: false,
                        shared: false,
                    })
                    .unwrap()
            })
            .collect();
        let good = [fixture.source(true, false, 0)];
        let too_many: Vec<_> = textures
            .iter()
            .map(|&texture| InstanceSource {
                diffuse_texture: texture,
                ..fixture.source(false, false, 0)
            })
            .collect();
        let pipeline = fixture.pipeline.clone();

        let mut view = View::new(&mut fixture.backend, Extent::new(4, 4)).unwrap();
        view.update(&mut fixture.backend, &inputs(&good, &pipeline)).unwrap();
        assert!(view.update(&mut fixture.backend, &inputs(&too_many, &pipeline)).is_err());
        // The heap of the last good frame is still allocated.
        assert!(view.heap().table().is_some());

        let before = fixture.backend.recorded().len();
        view.render(&mut fixture.backend, pipeline.pipeline);
        assert_eq!(fixture.backend.recorded().len(), before);
        assert_eq!(view.stage(), ViewStage::Idle);

        view.update(&mut fixture.backend, &inputs(&good, &pipeline)).unwrap();
        view.render(&mut fixture.backend, pipeline.pipeline);
        assert!(fixture.backend.recorded().len() > before);
        assert_eq!(view.stage(), ViewStage::Rendered);
        view.release(&mut fixture.backend);
    }

    #[test]
    fn resize_rewrites_output_slots_of_an_existing_heap() {
        let mut fixture = Fixture::new(Extent::new(4, 4));
        let sources = [fixture.source(true, false, 0)];
        let mut view = View::new(&mut fixture.backend, Extent::new(4, 4)).unwrap();
        let empty: [InstanceSource<Headless>; 0] = [];
        for instances in [&sources[..], &empty[..]] {
            view.update(
                &mut fixture.backend,
                &FrameInputs {
                    instances,
                    lights: None,
                    pipeline: &fixture.pipeline,
                    aspect: 1.0,
                },
            )
            .unwrap();
        }

        view.resize(&mut fixture.backend, Extent::new(8, 8)).unwrap();
        let table = fixture.backend.table(view.heap().table().unwrap()).unwrap();
        assert_eq!(
            table.slots[&HeapSlot::HitColor.index()],
            Descriptor::StorageBuffer {
                buffer: view.outputs().hit_color.get().unwrap(),
                elements: 8 * 8 * 13,
                format: ElementFormat::Rgba16Float,
            }
        );
        assert_eq!(
            table.slots[&HeapSlot::Output.index()],
            Descriptor::StorageTexture(view.outputs().output.get().unwrap())
        );
        view.release(&mut fixture.backend);
        assert!(fixture.backend.misuse().is_empty());
    }

    #[test]
    fn resize_reallocates_outputs() {
        let mut fixture = Fixture::new(Extent::new(4, 4));
        let mut view = View::new(&mut fixture.backend, Extent::new(4, 4)).unwrap();
        view.resize(&mut fixture.backend, Extent::new(16, 8)).unwrap();

        let (_, output) = fixture.backend.find_texture("ray-output").unwrap();
        assert_eq!((output.width, output.height), (16, 8));
        assert_eq!(output.initial_state, ResourceState::CopySource);
        let (_, normals) = fixture.backend.find_buffer("hit-normal").unwrap();
        assert_eq!(normals.size, 16 * 8 * 13 * 8);
        assert_eq!(fixture.backend.buffers_named("hit-distance").len(), 1);

        view.resize(&mut fixture.backend, Extent::default()).unwrap();
        assert!(!view.outputs().is_complete());
        view.release(&mut fixture.backend);
        assert!(fixture.backend.misuse().is_empty());
    }
}
