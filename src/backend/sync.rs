// Synchronization primitives
//
// One FrameSync per in-flight slot: the fence gates CPU reuse of that
// slot's command buffer, the semaphores order acquire -> render -> present
// on the GPU side.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::error::RendererError;
use super::VulkanDevice;

/// Frame synchronization set - one per frame in flight
pub struct FrameSync {
    /// Signaled when the presentation engine releases the acquired image
    pub image_available: vk::Semaphore,
    /// Signaled when this slot's submitted commands finish executing
    pub render_finished: vk::Semaphore,
    /// CPU-visible completion fence for this slot's submission
    pub in_flight: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Created signaled so the very first wait returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device
                    .device
                    .create_semaphore(&semaphore_info, None)
                    .map_err(RendererError::creating("semaphore"))?,
                render_finished: device
                    .device
                    .create_semaphore(&semaphore_info, None)
                    .map_err(RendererError::creating("semaphore"))?,
                in_flight: device
                    .device
                    .create_fence(&fence_info, None)
                    .map_err(RendererError::creating("fence"))?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}
