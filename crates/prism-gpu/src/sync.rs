//! Synchronization primitives.

use ash::vk;

use crate::error::Result;

/// Create a binary semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence and reset it.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_and_reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.wait_for_fences(&[fence], true, u64::MAX)?;
    device.reset_fences(&[fence])?;
    Ok(())
}

/// A timeline semaphore used as a monotonically increasing fence.
pub struct TimelineFence {
    semaphore: vk::Semaphore,
}

impl TimelineFence {
    /// Create a timeline starting at zero.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = device.create_semaphore(&create_info, None)?;
        Ok(Self { semaphore })
    }

    /// Queue a signal of `value` after all work submitted to `queue`.
    ///
    /// # Safety
    /// The device and queue must be valid.
    pub unsafe fn signal(&self, device: &ash::Device, queue: vk::Queue, value: u64) -> Result<()> {
        let signal_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(self.semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        let submit_info =
            vk::SubmitInfo2::default().signal_semaphore_infos(std::slice::from_ref(&signal_info));
        device.queue_submit2(queue, &[submit_info], vk::Fence::null())?;
        Ok(())
    }

    /// Block until the timeline reaches `value`.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device, value: u64) -> Result<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        device.wait_semaphores(&wait_info, u64::MAX)?;
        Ok(())
    }

    /// Last value the GPU reached.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn completed_value(&self, device: &ash::Device) -> Result<u64> {
        Ok(device.get_semaphore_counter_value(self.semaphore)?)
    }

    /// # Safety
    /// The device must be valid and the semaphore must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.semaphore, None);
    }
}

/// Presentation synchronization objects.
pub struct PresentSync {
    /// Signaled when the rendered frame may be presented
    pub render_finished: vk::Semaphore,
    /// Signaled when the next swap image has been acquired
    pub image_acquired: vk::Fence,
}

impl PresentSync {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        Ok(Self {
            render_finished: create_semaphore(device)?,
            image_acquired: create_fence(device, false)?,
        })
    }

    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.image_acquired, None);
    }
}
