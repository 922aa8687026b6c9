//! Vulkan instance creation and adapter selection.

use std::ffi::{c_char, CStr, CString};

use ash::vk;
use raw_window_handle::RawDisplayHandle;

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};

/// Validation layers to enable when requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance with the surface extensions `display` needs.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    display: RawDisplayHandle,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Prism")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let mut extension_names = ash_window::enumerate_required_extensions(display)
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?
        .to_vec();
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let layers = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    let available_layers = entry.enumerate_instance_layer_properties()?;
    for layer in &layers {
        let found = available_layers
            .iter()
            .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == *layer);
        if !found {
            tracing::warn!("Validation layer {:?} not available", layer);
        }
    }

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(instance)
}

/// Pick the first adapter able to ray trace, preferring discrete GPUs.
///
/// When none qualifies the error lists every adapter with the reason it was
/// rejected.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, GpuCapabilities)> {
    let devices = instance.enumerate_physical_devices()?;

    let mut report = Vec::new();
    let mut best: Option<(i32, vk::PhysicalDevice, GpuCapabilities)> = None;

    for device in devices {
        let capabilities = GpuCapabilities::query(instance, device);
        if let Some(reason) = capabilities.rejection_reason() {
            tracing::debug!("Skipping {}: {}", capabilities.device_name, reason);
            report.push(format!("{}: {}", capabilities.device_name, reason));
            continue;
        }

        let score = score_physical_device(&capabilities);
        if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
            best = Some((score, device, capabilities));
        }
    }

    match best {
        Some((_, device, capabilities)) => Ok((device, capabilities)),
        None if report.is_empty() => Err(GpuError::NoRayTracingDevice(
            "No Vulkan adapters found".to_string(),
        )),
        None => Err(GpuError::NoRayTracingDevice(report.join("\n"))),
    }
}

/// Score an accepted adapter.
fn score_physical_device(capabilities: &GpuCapabilities) -> i32 {
    let mut score = match capabilities.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };

    // +1 per GB
    score += i32::try_from(capabilities.device_local_memory_mb / 1024).unwrap_or(i32::MAX / 2);
    score
}
