//! Adapter capability detection.

use std::collections::HashSet;
use std::ffi::CStr;

use ash::vk;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Device extensions the renderer cannot run without.
pub fn required_device_extensions() -> [&'static CStr; 4] {
    [
        ash::khr::swapchain::NAME,
        ash::khr::acceleration_structure::NAME,
        ash::khr::ray_tracing_pipeline::NAME,
        ash::khr::deferred_host_operations::NAME,
    ]
}

/// Ray-tracing pipeline limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayTracingCapabilities {
    pub shader_group_handle_size: u32,
    pub shader_group_handle_alignment: u32,
    pub shader_group_base_alignment: u32,
    pub max_ray_recursion_depth: u32,
}

/// Detected adapter capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub driver_version: u32,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    /// Present when every ray-tracing extension and feature is supported
    pub ray_tracing: Option<RayTracingCapabilities>,

    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let has_extensions = required_device_extensions().iter().all(|name| {
            name.to_str()
                .is_ok_and(|name| available_extensions.contains(name))
        });

        let ray_tracing = if has_extensions {
            query_ray_tracing(instance, physical_device)
        } else {
            None
        };

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            device_local_memory_mb,
            ray_tracing,
            available_extensions,
        }
    }

    /// Extensions from [`required_device_extensions`] the adapter lacks.
    pub fn missing_extensions(&self) -> Vec<&'static str> {
        required_device_extensions()
            .iter()
            .filter_map(|name| name.to_str().ok())
            .filter(|name| !self.available_extensions.contains(*name))
            .collect()
    }

    /// Why this adapter cannot run the renderer, or `None` if it can.
    pub fn rejection_reason(&self) -> Option<String> {
        if self.device_type == vk::PhysicalDeviceType::CPU {
            return Some("software adapter".to_string());
        }

        let api_major = vk::api_version_major(self.api_version);
        let api_minor = vk::api_version_minor(self.api_version);
        if api_major < 1 || (api_major == 1 && api_minor < 3) {
            return Some(format!("Vulkan {api_major}.{api_minor} is older than 1.3"));
        }

        let missing = self.missing_extensions();
        if !missing.is_empty() {
            return Some(format!("missing {}", missing.join(", ")));
        }

        if self.ray_tracing.is_none() {
            return Some("ray-tracing features not supported".to_string());
        }

        None
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

/// Ray-tracing limits, if the acceleration-structure and pipeline features
/// are both supported.
unsafe fn query_ray_tracing(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<RayTracingCapabilities> {
    let mut acceleration_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut pipeline_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut acceleration_features)
        .push_next(&mut pipeline_features)
        .push_next(&mut vulkan_1_2_features);
    instance.get_physical_device_features2(physical_device, &mut features2);

    if acceleration_features.acceleration_structure != vk::TRUE
        || pipeline_features.ray_tracing_pipeline != vk::TRUE
        || vulkan_1_2_features.buffer_device_address != vk::TRUE
        || vulkan_1_2_features.timeline_semaphore != vk::TRUE
        || vulkan_1_2_features.descriptor_binding_partially_bound != vk::TRUE
        || vulkan_1_2_features.descriptor_binding_variable_descriptor_count != vk::TRUE
    {
        return None;
    }

    let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
    let mut properties2 = vk::PhysicalDeviceProperties2::default().push_next(&mut rt_properties);
    instance.get_physical_device_properties2(physical_device, &mut properties2);

    Some(RayTracingCapabilities {
        shader_group_handle_size: rt_properties.shader_group_handle_size,
        shader_group_handle_alignment: rt_properties.shader_group_handle_alignment,
        shader_group_base_alignment: rt_properties.shader_group_base_alignment,
        max_ray_recursion_depth: rt_properties.max_ray_recursion_depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(device_type: vk::PhysicalDeviceType) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Nvidia,
            device_name: "Test Adapter".to_string(),
            device_type,
            api_version: vk::make_api_version(0, 1, 3, 0),
            driver_version: 0,
            device_local_memory_mb: 8192,
            ray_tracing: Some(RayTracingCapabilities::default()),
            available_extensions: required_device_extensions()
                .iter()
                .filter_map(|name| name.to_str().ok().map(String::from))
                .collect(),
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
    }

    #[test]
    fn capable_adapter_is_accepted() {
        assert_eq!(
            capabilities(vk::PhysicalDeviceType::DISCRETE_GPU).rejection_reason(),
            None
        );
    }

    #[test]
    fn software_adapter_is_rejected() {
        let reason = capabilities(vk::PhysicalDeviceType::CPU).rejection_reason();
        assert_eq!(reason.as_deref(), Some("software adapter"));
    }

    #[test]
    fn missing_extension_is_named() {
        let mut caps = capabilities(vk::PhysicalDeviceType::INTEGRATED_GPU);
        caps.available_extensions
            .remove("VK_KHR_ray_tracing_pipeline");
        let reason = caps.rejection_reason().unwrap();
        assert!(reason.contains("VK_KHR_ray_tracing_pipeline"), "{reason}");
    }
}
