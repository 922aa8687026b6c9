//! The Vulkan implementation of [`Backend`].

use ash::vk;
use hashbrown::{HashMap, HashSet};
use prism_core::constants::FRAME_COUNT;
use prism_core::Extent;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::{
    AccelerationStructureLevel, AccelerationStructureSizes, Backend, BottomLevelBuild,
    BufferDesc, BufferUsage, DescriptorBinding, DescriptorWrite, DispatchRays, IndexedDraw,
    RayTracingPipelineDesc, RayTracingPipelineInfo, SbtLayout, SbtRegion, TextureDesc,
    TopLevelBuild, TriangleGeometry,
};
use crate::barrier::{Barrier, BarrierTarget, ResourceState};
use crate::capabilities::GpuCapabilities;
use crate::command::{begin_command_buffer, end_command_buffer, execute_single_time_commands, CommandPool};
use crate::context::VulkanContext;
use crate::descriptors::{slot_binding, slot_descriptor_type, TableLayout, TablePool};
use crate::error::{GpuError, Result};
use crate::memory::{
    buffer_usage_flags, memory_location, texture_usage_flags, AllocatedBuffer, AllocatedImage,
};
use crate::pipeline::{
    create_raster_pipeline, create_ray_tracing_pipeline, create_shared_layout,
    RayTracingBaseShaders, RayTracingLimits, PUSH_CONSTANT_SIZE,
};
use crate::shaders::ShaderLibrary;
use crate::surface::SurfaceContext;
use crate::swapchain::{color_subresource_range, Swapchain};
use crate::sync::{wait_and_reset_fence, PresentSync, TimelineFence};

/// Format of every texture the renderer creates.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Layout, access and stage a [`ResourceState`] stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateInfo {
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags2,
    pub stage: vk::PipelineStageFlags2,
}

/// Map a resource state onto Vulkan synchronization terms.
pub fn state_info(state: ResourceState) -> StateInfo {
    let (layout, access, stage) = match state {
        ResourceState::Common => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
            vk::PipelineStageFlags2::ALL_COMMANDS,
        ),
        ResourceState::Present => (
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags2::NONE,
            vk::PipelineStageFlags2::ALL_COMMANDS,
        ),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        ),
        ResourceState::ShaderResource => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags2::SHADER_SAMPLED_READ | vk::AccessFlags2::SHADER_STORAGE_READ,
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        ),
        ResourceState::UnorderedAccess => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        ),
        ResourceState::CopySource => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags2::TRANSFER_READ,
            vk::PipelineStageFlags2::ALL_TRANSFER,
        ),
        ResourceState::CopyDest => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::ALL_TRANSFER,
        ),
        ResourceState::GenericRead => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags2::MEMORY_READ,
            vk::PipelineStageFlags2::ALL_COMMANDS,
        ),
        ResourceState::AccelerationStructure => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        ),
    };
    StateInfo {
        layout,
        access,
        stage,
    }
}

/// Builder for creating a [`VulkanBackend`].
pub struct VulkanBackendBuilder {
    app_name: String,
    enable_validation: bool,
    shaders: Option<ShaderLibrary>,
    frame_count: u32,
    vsync_interval: u32,
}

impl Default for VulkanBackendBuilder {
    fn default() -> Self {
        Self {
            app_name: "Prism".to_string(),
            enable_validation: cfg!(debug_assertions),
            shaders: None,
            frame_count: FRAME_COUNT,
            vsync_interval: 1,
        }
    }
}

impl VulkanBackendBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// SPIR-V for the fixed stages. Required.
    pub fn shader_library(mut self, shaders: ShaderLibrary) -> Self {
        self.shaders = Some(shaders);
        self
    }

    /// Number of swap targets to request.
    pub fn frame_count(mut self, count: u32) -> Self {
        self.frame_count = count.max(2);
        self
    }

    /// Vsync interval the swapchain starts with.
    pub fn vsync_interval(mut self, interval: u32) -> Self {
        self.vsync_interval = interval;
        self
    }

    /// Create the device, surface and swapchain for `window`, sized
    /// `extent` when the surface does not dictate a size.
    pub fn build<W>(self, window: &W, extent: Extent) -> Result<VulkanBackend>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let shaders = self
            .shaders
            .ok_or_else(|| GpuError::ShaderLoading("No shader library configured".to_string()))?;

        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        let context = VulkanContext::new(&self.app_name, self.enable_validation, display)?;
        let surface = unsafe { SurfaceContext::from_window(&context, window) }?;

        VulkanBackend::new(
            context,
            surface,
            shaders,
            extent,
            self.frame_count,
            self.vsync_interval,
        )
    }
}

struct TextureRecord {
    /// `None` for swapchain images
    image: Option<AllocatedImage>,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
}

/// [`Backend`] on a Vulkan 1.3 device with the KHR ray-tracing extensions.
///
/// One queue, one command buffer and a timeline semaphore as the fence.
pub struct VulkanBackend {
    context: VulkanContext,
    surface: SurfaceContext,
    swapchain: Option<Swapchain>,
    swap_index: u32,
    /// Swap images whose contents are undefined until first transitioned
    fresh_swap_images: HashSet<vk::Image>,
    window_extent: Extent,
    /// Size last asked for through `resize_swap_targets`
    requested_extent: Extent,
    frame_count: u32,
    vsync_interval: u32,
    recreate_swapchain: bool,

    command_pool: CommandPool,
    command_buffer: vk::CommandBuffer,
    recording: bool,
    timeline: TimelineFence,
    present_sync: PresentSync,

    table_layout: TableLayout,
    pipeline_layout: vk::PipelineLayout,
    raster_pipeline: vk::Pipeline,
    shaders: ShaderLibrary,

    buffers: HashMap<vk::Buffer, AllocatedBuffer>,
    textures: HashMap<vk::Image, TextureRecord>,
    structures: HashMap<vk::AccelerationStructureKHR, vk::DeviceAddress>,
    tables: HashMap<vk::DescriptorSet, TablePool>,
    pipelines: HashSet<vk::Pipeline>,
}

impl VulkanBackend {
    fn new(
        context: VulkanContext,
        surface: SurfaceContext,
        shaders: ShaderLibrary,
        window_extent: Extent,
        frame_count: u32,
        vsync_interval: u32,
    ) -> Result<Self> {
        let device = context.device();
        let (command_pool, command_buffer, timeline, present_sync, table_layout) = unsafe {
            let command_pool = CommandPool::new(device, context.queue_family())?;
            let command_buffer = command_pool.allocate_command_buffer(device)?;
            (
                command_pool,
                command_buffer,
                TimelineFence::new(device)?,
                PresentSync::new(device)?,
                TableLayout::new(device)?,
            )
        };
        let pipeline_layout = unsafe { create_shared_layout(device, table_layout.set_layout) }?;
        let raster_pipeline = unsafe {
            create_raster_pipeline(
                device,
                &shaders.raster_vertex,
                &shaders.raster_fragment,
                pipeline_layout,
                TEXTURE_FORMAT,
            )
        }?;

        let mut backend = Self {
            context,
            surface,
            swapchain: None,
            swap_index: 0,
            fresh_swap_images: HashSet::new(),
            window_extent,
            requested_extent: Extent::default(),
            frame_count,
            vsync_interval,
            recreate_swapchain: false,
            command_pool,
            command_buffer,
            recording: false,
            timeline,
            present_sync,
            table_layout,
            pipeline_layout,
            raster_pipeline,
            shaders,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            structures: HashMap::new(),
            tables: HashMap::new(),
            pipelines: HashSet::new(),
        };
        let extent = backend.surface_extent();
        backend.requested_extent = extent;
        backend.rebuild_swapchain(extent)?;
        Ok(backend)
    }

    pub const fn capabilities(&self) -> &GpuCapabilities {
        self.context.capabilities()
    }

    /// Window size used when the surface leaves the extent to the
    /// application.
    pub fn set_window_extent(&mut self, extent: Extent) {
        self.window_extent = extent;
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        self.context.wait_idle()
    }

    fn device(&self) -> &ash::Device {
        self.context.device()
    }

    fn release_swapchain(&mut self) -> Option<vk::SwapchainKHR> {
        let swapchain = self.swapchain.as_ref()?;
        for image in &swapchain.images {
            self.textures.remove(image);
        }
        self.fresh_swap_images.clear();
        Some(swapchain.swapchain)
    }

    fn rebuild_swapchain(&mut self, extent: Extent) -> Result<()> {
        if extent.is_empty() {
            return Ok(());
        }
        self.context.wait_idle()?;

        let old = self.release_swapchain();
        let swapchain = unsafe {
            self.surface.create_swapchain(
                &self.context,
                extent.width,
                extent.height,
                self.frame_count,
                self.vsync_interval,
                old,
            )
        }?;
        if let Some(old) = self.swapchain.take() {
            unsafe { old.destroy(self.context.device(), &self.surface.swapchain_loader) };
        }

        tracing::debug!(
            "Swapchain {}x{} with {} images ({:?})",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len(),
            swapchain.present_mode
        );

        for (&image, &view) in swapchain.images.iter().zip(&swapchain.image_views) {
            self.textures.insert(
                image,
                TextureRecord {
                    image: None,
                    view,
                    format: swapchain.format,
                    extent: swapchain.extent,
                },
            );
            self.fresh_swap_images.insert(image);
        }
        self.swapchain = Some(swapchain);
        self.recreate_swapchain = false;
        self.acquire()
    }

    fn acquire(&mut self) -> Result<()> {
        let Some(swapchain) = &self.swapchain else {
            return Err(GpuError::InvalidState("No swapchain".to_string()));
        };
        let fence = self.present_sync.image_acquired;
        let (index, suboptimal) =
            unsafe { swapchain.acquire_next_image(&self.surface.swapchain_loader, fence) }?;
        unsafe { wait_and_reset_fence(self.context.device(), fence) }?;
        if suboptimal {
            self.recreate_swapchain = true;
        }
        self.swap_index = index;
        Ok(())
    }

    fn texture_view(&self, texture: vk::Image) -> vk::ImageView {
        self.textures
            .get(&texture)
            .map_or_else(vk::ImageView::null, |t| t.view)
    }

    fn address_of(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        self.buffers.get(&buffer).map_or(0, |b| b.address)
    }

    fn triangle_geometry(
        &self,
        geometry: &TriangleGeometry<Self>,
    ) -> vk::AccelerationStructureGeometryKHR<'static> {
        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.address_of(geometry.vertex_buffer),
            })
            .vertex_stride(geometry.vertex_stride)
            .max_vertex(geometry.vertex_count.saturating_sub(1))
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.address_of(geometry.index_buffer),
            });
        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
    }

    fn instance_geometry(instances: vk::DeviceAddress) -> vk::AccelerationStructureGeometryKHR<'static> {
        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: instances,
                    }),
            })
    }

    fn build_sizes(
        &self,
        ty: vk::AccelerationStructureTypeKHR,
        geometry: &vk::AccelerationStructureGeometryKHR<'_>,
        primitive_count: u32,
    ) -> AccelerationStructureSizes {
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(ty)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(geometry));

        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            self.context
                .acceleration_structure
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &[primitive_count],
                    &mut sizes,
                );
        }
        AccelerationStructureSizes {
            scratch: sizes.build_scratch_size,
            result: sizes.acceleration_structure_size,
        }
    }

    fn record_build(
        &self,
        ty: vk::AccelerationStructureTypeKHR,
        geometry: &vk::AccelerationStructureGeometryKHR<'_>,
        primitive_count: u32,
        scratch: vk::Buffer,
        destination: vk::AccelerationStructureKHR,
    ) {
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(ty)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .dst_acceleration_structure(destination)
            .geometries(std::slice::from_ref(geometry))
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: self.address_of(scratch),
            });

        let build_range =
            vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(primitive_count);

        unsafe {
            self.context
                .acceleration_structure
                .cmd_build_acceleration_structures(
                    self.command_buffer,
                    &[build_info],
                    &[std::slice::from_ref(&build_range)],
                );
        }
    }

    fn region(&self, sbt: vk::Buffer, region: SbtRegion) -> vk::StridedDeviceAddressRegionKHR {
        if region.size == 0 {
            return vk::StridedDeviceAddressRegionKHR::default();
        }
        vk::StridedDeviceAddressRegionKHR {
            device_address: self.address_of(sbt) + region.offset,
            stride: region.stride,
            size: region.size,
        }
    }

    fn write_descriptor(&self, set: vk::DescriptorSet, slot: u32, binding: &DescriptorBinding<Self>) {
        let (dst_binding, array_element) = slot_binding(slot);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(dst_binding)
            .dst_array_element(array_element)
            .descriptor_type(slot_descriptor_type(slot));

        let device = self.device();
        match *binding {
            DescriptorBinding::StorageTexture(texture) => {
                let info = vk::DescriptorImageInfo::default()
                    .image_view(self.texture_view(texture))
                    .image_layout(vk::ImageLayout::GENERAL);
                let write = write.image_info(std::slice::from_ref(&info));
                unsafe { device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorBinding::SampledTexture(texture) => {
                let info = vk::DescriptorImageInfo::default()
                    .image_view(self.texture_view(texture))
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
                let write = write
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(std::slice::from_ref(&info));
                unsafe { device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorBinding::StorageBuffer {
                buffer,
                elements,
                format,
            } => {
                let info = vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(0)
                    .range(elements * format.size());
                let write = write.buffer_info(std::slice::from_ref(&info));
                unsafe { device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorBinding::UniformBuffer { buffer, size } => {
                let info = vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(0)
                    .range(size);
                let write = write.buffer_info(std::slice::from_ref(&info));
                unsafe { device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorBinding::StructuredBuffer {
                buffer,
                elements,
                stride,
            } => {
                let info = vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(0)
                    .range(elements * stride);
                let write = write.buffer_info(std::slice::from_ref(&info));
                unsafe { device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorBinding::AccelerationStructure(structure) => {
                let mut info = vk::WriteDescriptorSetAccelerationStructureKHR::default()
                    .acceleration_structures(std::slice::from_ref(&structure));
                let write = write.descriptor_count(1).push_next(&mut info);
                unsafe { device.update_descriptor_sets(&[write], &[]) };
            }
        }
    }

    fn image_barrier(
        &mut self,
        image: vk::Image,
        before: ResourceState,
        after: ResourceState,
    ) -> vk::ImageMemoryBarrier2<'static> {
        let src = state_info(before);
        let dst = state_info(after);
        let old_layout = if self.fresh_swap_images.remove(&image) {
            vk::ImageLayout::UNDEFINED
        } else {
            src.layout
        };
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src.stage)
            .src_access_mask(src.access)
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .old_layout(old_layout)
            .new_layout(dst.layout)
            .image(image)
            .subresource_range(color_subresource_range())
    }

    fn record_image_init(&mut self, image: vk::Image, state: ResourceState) -> Result<()> {
        let dst = state_info(state);
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::NONE)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(dst.layout)
            .image(image)
            .subresource_range(color_subresource_range());
        let record = |cmd: vk::CommandBuffer| unsafe {
            let dependency_info =
                vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
            self.device().cmd_pipeline_barrier2(cmd, &dependency_info);
        };

        if self.recording {
            record(self.command_buffer);
            Ok(())
        } else {
            unsafe {
                execute_single_time_commands(
                    self.device(),
                    &self.command_pool,
                    self.context.queue(),
                    record,
                )
            }
        }
    }

    fn submit(&self, command_buffers: &[vk::CommandBuffer], signal: &[vk::Semaphore]) -> Result<()> {
        let command_infos: Vec<_> = command_buffers
            .iter()
            .map(|&cmd| vk::CommandBufferSubmitInfo::default().command_buffer(cmd))
            .collect();
        let signal_infos: Vec<_> = signal
            .iter()
            .map(|&semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe {
            self.device()
                .queue_submit2(self.context.queue(), &[submit_info], vk::Fence::null())?;
        }
        Ok(())
    }
}

impl Backend for VulkanBackend {
    type Buffer = vk::Buffer;
    type Texture = vk::Image;
    type AccelerationStructure = vk::AccelerationStructureKHR;
    type DescriptorTable = vk::DescriptorSet;
    type RayTracingPipeline = vk::Pipeline;

    fn surface_extent(&self) -> Extent {
        match self.surface.capabilities(&self.context) {
            Ok(caps) if caps.capabilities.current_extent.width != u32::MAX => Extent::new(
                caps.capabilities.current_extent.width,
                caps.capabilities.current_extent.height,
            ),
            Ok(_) => self.window_extent,
            Err(e) => {
                tracing::warn!("Surface query failed: {e}");
                self.window_extent
            }
        }
    }

    fn swap_extent(&self) -> Extent {
        self.swapchain
            .as_ref()
            .map_or_else(Extent::default, |s| Extent::new(s.extent.width, s.extent.height))
    }

    fn resize_swap_targets(&mut self, extent: Extent) -> Result<()> {
        self.requested_extent = extent;
        if extent == self.swap_extent() && !self.recreate_swapchain {
            return Ok(());
        }
        self.rebuild_swapchain(extent)
    }

    fn swap_target(&self) -> vk::Image {
        self.swapchain
            .as_ref()
            .and_then(|s| s.images.get(self.swap_index as usize).copied())
            .unwrap_or_default()
    }

    fn sbt_layout(&self) -> SbtLayout {
        let rt = self.context.ray_tracing();
        SbtLayout {
            handle_size: u64::from(rt.shader_group_handle_size),
            handle_alignment: u64::from(rt.shader_group_handle_alignment),
            base_alignment: u64::from(rt.shader_group_base_alignment),
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<vk::Buffer> {
        let mut usage = desc.usage;
        if usage.intersects(
            BufferUsage::SHADER_BINDING_TABLE
                | BufferUsage::ACCELERATION_STRUCTURE_STORAGE
                | BufferUsage::ACCELERATION_STRUCTURE_INPUT,
        ) {
            usage |= BufferUsage::DEVICE_ADDRESS;
        }
        let families = [self.context.queue_family()];
        let buffer = self.context.allocator().lock().create_buffer(
            desc.size,
            buffer_usage_flags(usage),
            memory_location(desc.heap),
            desc.committed,
            if desc.shared { &families[..] } else { &[] },
            desc.name,
        )?;
        let handle = buffer.buffer;
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        let Some(mut record) = self.buffers.remove(&buffer) else {
            tracing::warn!("Destroying unknown buffer {:?}", buffer);
            return;
        };
        if let Err(e) = self.context.allocator().lock().free_buffer(&mut record) {
            tracing::error!("Failed to free buffer: {e}");
        }
    }

    fn write_buffer(&mut self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        self.buffers
            .get(&buffer)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {buffer:?}")))?
            .write_bytes(offset, data)
    }

    fn buffer_address(&self, buffer: vk::Buffer) -> u64 {
        self.address_of(buffer)
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<vk::Image> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(texture_usage_flags(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = self.context.allocator().lock().create_image(
            &image_info,
            memory_location(desc.heap),
            desc.committed,
            desc.name,
        )?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .subresource_range(color_subresource_range());
        let view = match unsafe { self.device().create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                let _ = self.context.allocator().lock().free_image(&mut image);
                return Err(GpuError::Other(format!("Failed to create image view: {e}")));
            }
        };

        let handle = image.image;
        self.textures.insert(
            handle,
            TextureRecord {
                image: Some(image),
                view,
                format: TEXTURE_FORMAT,
                extent: vk::Extent2D {
                    width: desc.width,
                    height: desc.height,
                },
            },
        );
        self.record_image_init(handle, desc.initial_state)?;
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: vk::Image) {
        let Some(record) = self.textures.get(&texture) else {
            tracing::warn!("Destroying unknown texture {:?}", texture);
            return;
        };
        if record.image.is_none() {
            tracing::warn!("Swap target {:?} is owned by the swapchain", texture);
            return;
        }
        if let Some(TextureRecord {
            image: Some(mut image),
            view,
            ..
        }) = self.textures.remove(&texture)
        {
            unsafe { self.device().destroy_image_view(view, None) };
            if let Err(e) = self.context.allocator().lock().free_image(&mut image) {
                tracing::error!("Failed to free texture: {e}");
            }
        }
    }

    fn bottom_level_sizes(&self, geometry: &TriangleGeometry<Self>) -> AccelerationStructureSizes {
        let vk_geometry = self.triangle_geometry(geometry);
        self.build_sizes(
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            &vk_geometry,
            geometry.triangle_count(),
        )
    }

    fn top_level_sizes(&self, instance_count: u32) -> AccelerationStructureSizes {
        self.build_sizes(
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            &Self::instance_geometry(0),
            instance_count,
        )
    }

    fn create_acceleration_structure(
        &mut self,
        level: AccelerationStructureLevel,
        storage: vk::Buffer,
        size: u64,
        name: &str,
    ) -> Result<vk::AccelerationStructureKHR> {
        let ty = match level {
            AccelerationStructureLevel::Bottom => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            AccelerationStructureLevel::Top => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        };
        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(storage)
            .offset(0)
            .size(size)
            .ty(ty);

        let loader = &self.context.acceleration_structure;
        let structure = unsafe { loader.create_acceleration_structure(&create_info, None) }
            .map_err(|e| GpuError::AllocationFailed(format!("{name}: {e}")))?;
        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(structure);
        let address = unsafe { loader.get_acceleration_structure_device_address(&address_info) };

        self.structures.insert(structure, address);
        Ok(structure)
    }

    fn destroy_acceleration_structure(&mut self, structure: vk::AccelerationStructureKHR) {
        if self.structures.remove(&structure).is_none() {
            tracing::warn!("Destroying unknown acceleration structure {:?}", structure);
            return;
        }
        unsafe {
            self.context
                .acceleration_structure
                .destroy_acceleration_structure(structure, None);
        }
    }

    fn acceleration_structure_address(&self, structure: vk::AccelerationStructureKHR) -> u64 {
        self.structures.get(&structure).copied().unwrap_or(0)
    }

    fn create_descriptor_table(&mut self, capacity: u32) -> Result<vk::DescriptorSet> {
        let table = unsafe { TablePool::new(self.device(), &self.table_layout, capacity) }?;
        let set = table.set;
        self.tables.insert(set, table);
        Ok(set)
    }

    fn destroy_descriptor_table(&mut self, table: vk::DescriptorSet) {
        match self.tables.remove(&table) {
            Some(pool) => unsafe { pool.destroy(self.device()) },
            None => tracing::warn!("Destroying unknown descriptor table {:?}", table),
        }
    }

    fn write_descriptors(&mut self, table: vk::DescriptorSet, writes: &[DescriptorWrite<Self>]) {
        for write in writes {
            self.write_descriptor(table, write.slot, &write.binding);
        }
    }

    fn create_ray_tracing_pipeline(
        &mut self,
        desc: &RayTracingPipelineDesc<'_>,
    ) -> Result<RayTracingPipelineInfo<vk::Pipeline>> {
        let base = RayTracingBaseShaders {
            ray_generation: &self.shaders.ray_generation,
            surface_miss: &self.shaders.surface_miss,
            shadow_miss: &self.shaders.shadow_miss,
            default_hit_groups: &self.shaders.default_hit_groups,
        };
        let limits = RayTracingLimits {
            max_payload_size: desc.max_payload_size,
            max_attribute_size: desc.max_attribute_size,
            max_recursion_depth: desc
                .max_recursion_depth
                .min(self.context.ray_tracing().max_ray_recursion_depth),
            handle_size: self.context.ray_tracing().shader_group_handle_size,
        };
        let info = unsafe {
            create_ray_tracing_pipeline(
                self.device(),
                &self.context.ray_tracing_pipeline,
                self.pipeline_layout,
                &base,
                desc.hit_groups,
                limits,
            )
        }?;
        tracing::debug!(
            "Created ray tracing pipeline with {} hit group pairs",
            info.hit_groups.len()
        );
        self.pipelines.insert(info.pipeline);
        Ok(info)
    }

    fn destroy_ray_tracing_pipeline(&mut self, pipeline: vk::Pipeline) {
        if self.pipelines.remove(&pipeline) {
            unsafe { self.device().destroy_pipeline(pipeline, None) };
        } else {
            tracing::warn!("Destroying unknown pipeline {:?}", pipeline);
        }
    }

    fn reset_command_list(&mut self) -> Result<()> {
        unsafe {
            begin_command_buffer(
                self.device(),
                self.command_buffer,
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )
        }?;
        self.recording = true;
        Ok(())
    }

    fn execute_command_list(&mut self) -> Result<()> {
        if !self.recording {
            return Err(GpuError::InvalidState("Command buffer is not recording".to_string()));
        }
        unsafe { end_command_buffer(self.device(), self.command_buffer) }?;
        self.recording = false;
        self.submit(&[self.command_buffer], &[])
    }

    fn signal(&mut self, value: u64) -> Result<()> {
        unsafe {
            self.timeline
                .signal(self.context.device(), self.context.queue(), value)
        }
    }

    fn wait(&mut self, value: u64) -> Result<()> {
        unsafe { self.timeline.wait(self.context.device(), value) }
    }

    fn present(&mut self, vsync_interval: u32) -> Result<()> {
        let Some(swapchain) = &self.swapchain else {
            return Err(GpuError::InvalidState("No swapchain".to_string()));
        };
        self.submit(&[], &[self.present_sync.render_finished])?;
        let outdated = unsafe {
            swapchain.present(
                &self.surface.swapchain_loader,
                self.context.queue(),
                self.swap_index,
                &[self.present_sync.render_finished],
            )
        }?;
        if (vsync_interval > 0) != (self.vsync_interval > 0) {
            tracing::debug!("Vsync interval changed to {vsync_interval}");
            self.vsync_interval = vsync_interval;
            self.recreate_swapchain = true;
        }
        self.recreate_swapchain |= outdated;
        Ok(())
    }

    /// Acquire the next image. Rebuilds here cover vsync changes and
    /// out-of-date swapchains at the current size; a new surface size is left
    /// to the `resize_swap_targets` call of the next frame.
    fn advance_swap_target(&mut self) -> Result<()> {
        if !self.recreate_swapchain {
            match self.acquire() {
                Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
                    self.recreate_swapchain = true;
                }
                other => return other,
            }
        }
        let surface = self.surface_extent();
        if surface != self.requested_extent && !surface.is_empty() {
            tracing::debug!(
                "Deferring swapchain rebuild to the {}x{} resize",
                surface.width,
                surface.height
            );
            return Ok(());
        }
        self.rebuild_swapchain(self.requested_extent)
    }

    fn cmd_barriers(&mut self, barriers: &[Barrier<Self>]) {
        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();
        let mut memory_barriers = Vec::new();

        for barrier in barriers {
            match *barrier {
                Barrier::Transition {
                    target: BarrierTarget::Texture(image),
                    before,
                    after,
                } => image_barriers.push(self.image_barrier(image, before, after)),
                Barrier::Transition {
                    target: BarrierTarget::Buffer(buffer),
                    before,
                    after,
                } => {
                    let (src, dst) = (state_info(before), state_info(after));
                    buffer_barriers.push(
                        vk::BufferMemoryBarrier2::default()
                            .src_stage_mask(src.stage)
                            .src_access_mask(src.access)
                            .dst_stage_mask(dst.stage)
                            .dst_access_mask(dst.access)
                            .buffer(buffer)
                            .offset(0)
                            .size(vk::WHOLE_SIZE),
                    );
                }
                Barrier::Transition {
                    target: BarrierTarget::AccelerationStructure(_),
                    before,
                    after,
                } => {
                    let (src, dst) = (state_info(before), state_info(after));
                    memory_barriers.push(
                        vk::MemoryBarrier2::default()
                            .src_stage_mask(src.stage)
                            .src_access_mask(src.access)
                            .dst_stage_mask(dst.stage)
                            .dst_access_mask(dst.access),
                    );
                }
                Barrier::Uav {
                    target: BarrierTarget::AccelerationStructure(_),
                } => {
                    let info = state_info(ResourceState::AccelerationStructure);
                    memory_barriers.push(
                        vk::MemoryBarrier2::default()
                            .src_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
                            .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
                            .dst_stage_mask(info.stage)
                            .dst_access_mask(info.access),
                    );
                }
                Barrier::Uav { .. } => {
                    let info = state_info(ResourceState::UnorderedAccess);
                    memory_barriers.push(
                        vk::MemoryBarrier2::default()
                            .src_stage_mask(info.stage)
                            .src_access_mask(info.access)
                            .dst_stage_mask(info.stage)
                            .dst_access_mask(info.access),
                    );
                }
            }
        }

        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers)
            .memory_barriers(&memory_barriers);
        unsafe {
            self.device()
                .cmd_pipeline_barrier2(self.command_buffer, &dependency_info);
        }
    }

    fn cmd_begin_render_pass(&mut self, target: vk::Image, clear: Option<[f32; 4]>, extent: Extent) {
        let mut attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.texture_view(target))
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .store_op(vk::AttachmentStoreOp::STORE);
        attachment = match clear {
            Some(color) => attachment
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .clear_value(vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                }),
            None => attachment.load_op(vk::AttachmentLoadOp::LOAD),
        };

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        };
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&attachment));

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let device = self.device();
        unsafe {
            device.cmd_begin_rendering(self.command_buffer, &rendering_info);
            device.cmd_set_viewport(self.command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(self.command_buffer, 0, &[render_area]);
        }
    }

    fn cmd_end_render_pass(&mut self) {
        unsafe { self.device().cmd_end_rendering(self.command_buffer) };
    }

    fn cmd_bind_raster(&mut self, table: vk::DescriptorSet) {
        let device = self.device();
        unsafe {
            device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.raster_pipeline,
            );
            device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[table],
                &[],
            );
        }
    }

    fn cmd_draw_indexed(&mut self, draw: &IndexedDraw<Self>) {
        let device = self.device();
        let cmd = self.command_buffer;
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                &draw.instance_index.to_ne_bytes()[..PUSH_CONSTANT_SIZE as usize],
            );
            device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);
        }
    }

    fn cmd_build_bottom_level(&mut self, build: &BottomLevelBuild<'_, Self>) {
        let geometry = self.triangle_geometry(build.geometry);
        self.record_build(
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            &geometry,
            build.geometry.triangle_count(),
            build.scratch,
            build.destination,
        );
    }

    fn cmd_build_top_level(&mut self, build: &TopLevelBuild<Self>) {
        let geometry = Self::instance_geometry(self.address_of(build.instances));
        self.record_build(
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            &geometry,
            build.instance_count,
            build.scratch,
            build.destination,
        );
    }

    fn cmd_dispatch_rays(&mut self, dispatch: &DispatchRays<Self>) {
        let ray_generation = self.region(dispatch.sbt, dispatch.ray_generation);
        let miss = self.region(dispatch.sbt, dispatch.miss);
        let hit_groups = self.region(dispatch.sbt, dispatch.hit_groups);
        let callable = vk::StridedDeviceAddressRegionKHR::default();

        let cmd = self.command_buffer;
        unsafe {
            self.device().cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                dispatch.pipeline,
            );
            self.device().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.pipeline_layout,
                0,
                &[dispatch.table],
                &[],
            );
            self.context.ray_tracing_pipeline.cmd_trace_rays(
                cmd,
                &ray_generation,
                &miss,
                &hit_groups,
                &callable,
                dispatch.width,
                dispatch.height,
                1,
            );
        }
    }

    fn cmd_copy_texture(&mut self, dst: vk::Image, src: vk::Image) {
        let (Some(dst_record), Some(src_record)) = (self.textures.get(&dst), self.textures.get(&src))
        else {
            tracing::warn!("Copy between unknown textures {:?} <- {:?}", dst, src);
            return;
        };

        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let device = self.device();
        let cmd = self.command_buffer;

        if dst_record.format == src_record.format && dst_record.extent == src_record.extent {
            let region = vk::ImageCopy {
                src_subresource: layers,
                src_offset: vk::Offset3D::default(),
                dst_subresource: layers,
                dst_offset: vk::Offset3D::default(),
                extent: vk::Extent3D {
                    width: src_record.extent.width,
                    height: src_record.extent.height,
                    depth: 1,
                },
            };
            unsafe {
                device.cmd_copy_image(
                    cmd,
                    src,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
        } else {
            let corner = |extent: vk::Extent2D| vk::Offset3D {
                x: extent.width as i32,
                y: extent.height as i32,
                z: 1,
            };
            let region = vk::ImageBlit {
                src_subresource: layers,
                src_offsets: [vk::Offset3D::default(), corner(src_record.extent)],
                dst_subresource: layers,
                dst_offsets: [vk::Offset3D::default(), corner(dst_record.extent)],
            };
            unsafe {
                device.cmd_blit_image(
                    cmd,
                    src,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                    vk::Filter::NEAREST,
                );
            }
        }
    }

    fn cmd_copy_buffer_to_texture(&mut self, dst: vk::Image, src: vk::Buffer) {
        let Some(record) = self.textures.get(&dst) else {
            tracing::warn!("Upload into unknown texture {:?}", dst);
            return;
        };
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: record.extent.width,
                height: record.extent.height,
                depth: 1,
            },
        };
        unsafe {
            self.device().cmd_copy_buffer_to_image(
                self.command_buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            tracing::error!("Device wait failed during shutdown: {e}");
        }

        let leaked = self.buffers.len()
            + self.structures.len()
            + self.tables.len()
            + self.pipelines.len()
            + self.textures.values().filter(|t| t.image.is_some()).count();
        if leaked > 0 {
            tracing::warn!("{leaked} GPU objects still alive at shutdown");
        }

        let device = self.context.device();
        let mut allocator = self.context.allocator().lock();
        unsafe {
            for (_, mut buffer) in self.buffers.drain() {
                let _ = allocator.free_buffer(&mut buffer);
            }
            for (_, record) in self.textures.drain() {
                if let Some(mut image) = record.image {
                    device.destroy_image_view(record.view, None);
                    let _ = allocator.free_image(&mut image);
                }
            }
            for (structure, _) in self.structures.drain() {
                self.context
                    .acceleration_structure
                    .destroy_acceleration_structure(structure, None);
            }
            for (_, table) in self.tables.drain() {
                table.destroy(device);
            }
            for pipeline in self.pipelines.drain() {
                device.destroy_pipeline(pipeline, None);
            }
            device.destroy_pipeline(self.raster_pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.table_layout.destroy(device);
            self.timeline.destroy(device);
            self.present_sync.destroy(device);
            self.command_pool.destroy(device);
            if let Some(swapchain) = self.swapchain.take() {
                swapchain.destroy(device, &self.surface.swapchain_loader);
            }
            self.surface.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_target_state_is_color_attachment() {
        let info = state_info(ResourceState::RenderTarget);
        assert_eq!(info.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert!(info
            .access
            .contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn copy_states_use_transfer_layouts() {
        assert_eq!(
            state_info(ResourceState::CopySource).layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL
        );
        assert_eq!(
            state_info(ResourceState::CopyDest).layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
    }

    #[test]
    fn unordered_access_is_general() {
        assert_eq!(
            state_info(ResourceState::UnorderedAccess).layout,
            vk::ImageLayout::GENERAL
        );
        assert_eq!(
            state_info(ResourceState::Present).layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }
}
