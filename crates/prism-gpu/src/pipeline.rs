//! Raster and ray-tracing pipeline creation.

use ash::vk;
use prism_core::Vertex;

use crate::backend::{HitGroupCode, HitGroupPair, RayTracingPipelineInfo, ShaderIdentifier};
use crate::error::{GpuError, Result};

/// Size of the per-draw push constant holding the instance index.
pub const PUSH_CONSTANT_SIZE: u32 = 4;

/// Create the pipeline layout shared by the raster and ray-tracing
/// pipelines.
///
/// # Safety
/// The device and set layout must be valid.
pub unsafe fn create_shared_layout(
    device: &ash::Device,
    set_layout: vk::DescriptorSetLayout,
) -> Result<vk::PipelineLayout> {
    let push_constant_range = vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .offset(0)
        .size(PUSH_CONSTANT_SIZE);

    let layouts = [set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&layouts)
        .push_constant_ranges(std::slice::from_ref(&push_constant_range));

    device
        .create_pipeline_layout(&layout_info, None)
        .map_err(|e| GpuError::PipelineCreation(e.to_string()))
}

/// Create a shader module from SPIR-V code.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    device
        .create_shader_module(&create_info, None)
        .map_err(|e| GpuError::ShaderLoading(format!("Failed to create shader module: {e}")))
}

/// Alpha-blended triangle pipeline drawing into RGBA8 raster targets.
///
/// No depth attachment and no culling: instances are drawn in submission
/// order.
///
/// # Safety
/// The device must be valid and shader code must be valid SPIR-V.
pub unsafe fn create_raster_pipeline(
    device: &ash::Device,
    vertex_shader: &[u32],
    fragment_shader: &[u32],
    layout: vk::PipelineLayout,
    color_format: vk::Format,
) -> Result<vk::Pipeline> {
    let vert_module = create_shader_module(device, vertex_shader)?;
    let frag_module = match create_shader_module(device, fragment_shader) {
        Ok(module) => module,
        Err(e) => {
            device.destroy_shader_module(vert_module, None);
            return Err(e);
        }
    };

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(c"main"),
    ];

    let vertex_bindings = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let vertex_attributes = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 12,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 24,
        },
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(false)
        .depth_write_enable(false);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .attachments(std::slice::from_ref(&color_blend_attachment));

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_formats = [color_format];
    let mut rendering_info =
        vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let result =
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None);

    device.destroy_shader_module(vert_module, None);
    device.destroy_shader_module(frag_module, None);

    let pipelines = result.map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()))?;
    Ok(pipelines[0])
}

/// Stages and groups of a ray-tracing pipeline, in group order: ray
/// generation, surface miss, shadow miss, then a surface and a shadow hit
/// group per pair.
struct RayTracingStages {
    modules: Vec<vk::ShaderModule>,
    stages: Vec<vk::PipelineShaderStageCreateInfo<'static>>,
    groups: Vec<vk::RayTracingShaderGroupCreateInfoKHR<'static>>,
}

impl RayTracingStages {
    const fn new() -> Self {
        Self {
            modules: Vec::new(),
            stages: Vec::new(),
            groups: Vec::new(),
        }
    }

    unsafe fn add_stage(
        &mut self,
        device: &ash::Device,
        stage: vk::ShaderStageFlags,
        code: &[u32],
    ) -> Result<u32> {
        let module = create_shader_module(device, code)?;
        self.modules.push(module);
        self.stages.push(
            vk::PipelineShaderStageCreateInfo::default()
                .stage(stage)
                .module(module)
                .name(c"main"),
        );
        Ok(self.stages.len() as u32 - 1)
    }

    unsafe fn add_general(
        &mut self,
        device: &ash::Device,
        stage: vk::ShaderStageFlags,
        code: &[u32],
    ) -> Result<()> {
        let index = self.add_stage(device, stage, code)?;
        self.groups.push(
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(index)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
        );
        Ok(())
    }

    unsafe fn add_hit_group(&mut self, device: &ash::Device, code: &HitGroupCode) -> Result<()> {
        let closest_hit =
            self.add_stage(device, vk::ShaderStageFlags::CLOSEST_HIT_KHR, &code.closest_hit)?;
        let any_hit = match &code.any_hit {
            Some(any_hit) => self.add_stage(device, vk::ShaderStageFlags::ANY_HIT_KHR, any_hit)?,
            None => vk::SHADER_UNUSED_KHR,
        };
        self.groups.push(
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(closest_hit)
                .any_hit_shader(any_hit)
                .intersection_shader(vk::SHADER_UNUSED_KHR),
        );
        Ok(())
    }

    unsafe fn destroy_modules(&self, device: &ash::Device) {
        for &module in &self.modules {
            device.destroy_shader_module(module, None);
        }
    }
}

/// Shaders that every ray-tracing pipeline contains.
pub struct RayTracingBaseShaders<'a> {
    pub ray_generation: &'a [u32],
    pub surface_miss: &'a [u32],
    pub shadow_miss: &'a [u32],
    /// Pair used by instances whose shader has no hit groups
    pub default_hit_groups: &'a HitGroupPair,
}

/// Limits baked into a ray-tracing pipeline.
#[derive(Clone, Copy, Debug)]
pub struct RayTracingLimits {
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
    pub handle_size: u32,
}

/// Create a ray-tracing pipeline and read back its group identifiers.
///
/// # Safety
/// The device, loader and layout must be valid and every shader must be
/// valid SPIR-V.
pub unsafe fn create_ray_tracing_pipeline(
    device: &ash::Device,
    loader: &ash::khr::ray_tracing_pipeline::Device,
    layout: vk::PipelineLayout,
    base: &RayTracingBaseShaders<'_>,
    hit_groups: &[HitGroupPair],
    limits: RayTracingLimits,
) -> Result<RayTracingPipelineInfo<vk::Pipeline>> {
    let mut stages = RayTracingStages::new();
    let built = (|| -> Result<vk::Pipeline> {
        stages.add_general(device, vk::ShaderStageFlags::RAYGEN_KHR, base.ray_generation)?;
        stages.add_general(device, vk::ShaderStageFlags::MISS_KHR, base.surface_miss)?;
        stages.add_general(device, vk::ShaderStageFlags::MISS_KHR, base.shadow_miss)?;
        for pair in std::iter::once(base.default_hit_groups).chain(hit_groups) {
            stages.add_hit_group(device, &pair.surface)?;
            stages.add_hit_group(device, &pair.shadow)?;
        }

        let interface = vk::RayTracingPipelineInterfaceCreateInfoKHR::default()
            .max_pipeline_ray_payload_size(limits.max_payload_size)
            .max_pipeline_ray_hit_attribute_size(limits.max_attribute_size);
        let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages.stages)
            .groups(&stages.groups)
            .max_pipeline_ray_recursion_depth(limits.max_recursion_depth)
            .library_interface(&interface)
            .layout(layout);

        let pipelines = loader
            .create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
            .map_err(|(_pipelines, e)| {
                GpuError::PipelineCreation(format!("Ray tracing pipeline: {e:?}"))
            })?;
        Ok(pipelines[0])
    })();
    stages.destroy_modules(device);
    let pipeline = built?;

    let group_count = stages.groups.len() as u32;
    let handle_size = limits.handle_size as usize;
    let handles = match loader.get_ray_tracing_shader_group_handles(
        pipeline,
        0,
        group_count,
        handle_size * group_count as usize,
    ) {
        Ok(handles) => handles,
        Err(e) => {
            device.destroy_pipeline(pipeline, None);
            return Err(e.into());
        }
    };

    let mut identifiers = handles
        .chunks_exact(handle_size)
        .map(|chunk| ShaderIdentifier(chunk.to_vec()));
    let mut next = || identifiers.next().unwrap_or_default();

    let ray_generation = next();
    let surface_miss = next();
    let shadow_miss = next();
    let hit_groups = (0..=hit_groups.len()).map(|_| (next(), next())).collect();

    Ok(RayTracingPipelineInfo {
        pipeline,
        ray_generation,
        surface_miss,
        shadow_miss,
        hit_groups,
    })
}
