//! Device context: instance, adapter, logical device, queue and allocator.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;

use crate::capabilities::{required_device_extensions, GpuCapabilities, RayTracingCapabilities};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;

/// Vulkan objects shared by every part of the backend.
pub struct VulkanContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) ray_tracing: RayTracingCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) acceleration_structure: ash::khr::acceleration_structure::Device,
    pub(crate) ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device,

    pub(crate) queue_family: u32,
    pub(crate) queue: vk::Queue,
}

impl VulkanContext {
    /// Load Vulkan, pick a ray-tracing adapter and create the device.
    pub fn new(app_name: &str, enable_validation: bool, display: RawDisplayHandle) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe { create_instance(&entry, app_name, enable_validation, display) }?;

        let (physical_device, capabilities) = match unsafe { select_physical_device(&instance) } {
            Ok(selected) => selected,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };
        let ray_tracing = capabilities.ray_tracing.ok_or_else(|| {
            GpuError::NoRayTracingDevice(format!(
                "{}: ray-tracing features not supported",
                capabilities.device_name
            ))
        })?;

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let queue_family = unsafe { find_queue_family(&instance, physical_device) }?;
        let device = unsafe { create_device(&instance, physical_device, queue_family) }?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let acceleration_structure =
            ash::khr::acceleration_structure::Device::new(&instance, &device);
        let ray_tracing_pipeline = ash::khr::ray_tracing_pipeline::Device::new(&instance, &device);

        let device = Arc::new(device);
        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            ray_tracing,
            allocator: Mutex::new(allocator),
            acceleration_structure,
            ray_tracing_pipeline,
            queue_family,
            queue,
        })
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub const fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    pub const fn ray_tracing(&self) -> &RayTracingCapabilities {
        &self.ray_tracing
    }

    pub const fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub const fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Find a queue family that supports graphics and compute. Ray dispatch,
/// raster passes and copies all share one queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32> {
    instance
        .get_physical_device_queue_family_properties(physical_device)
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
        .ok_or_else(|| GpuError::Other("No graphics queue family".to_string()))
}

/// Create the logical device with the ray-tracing feature chain.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let extension_names: Vec<_> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let mut acceleration_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);
    let mut pipeline_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true)
        .maintenance4(true);

    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(true)
        .timeline_semaphore(true)
        .descriptor_indexing(true)
        .scalar_block_layout(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_variable_descriptor_count(true)
        .shader_sampled_image_array_non_uniform_indexing(true);

    let features = vk::PhysicalDeviceFeatures::default().shader_int64(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features)
        .push_next(&mut acceleration_features)
        .push_next(&mut pipeline_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    Ok(device)
}
