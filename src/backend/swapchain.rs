// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Selection rules (format, present mode, extent, image count) are pure
// functions over the queried surface support so they stay testable.

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::error::RendererError;
use super::VulkanDevice;

/// Surface support as reported by the host for one device/surface pair.
/// Always re-queried, never cached: it is a query result, not state.
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(
        surface_loader: &ash::extensions::khr::Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            })
        }
    }
}

/// Prefer 8-bit BGRA with sRGB nonlinear color space; otherwise fall back to
/// the first supported format. Returns None only for an empty list, which
/// device selection already rules out.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Prefer MAILBOX (low-latency triple buffering); otherwise FIFO, which the
/// platform contract guarantees. No other modes are considered.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// If the surface reports the "track window size" sentinel, derive the
/// extent from the framebuffer size, clamping each axis independently.
/// Otherwise the surface dictates the extent and the window size is ignored.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum so the driver rarely makes us wait, clamped to
/// the maximum when one exists (zero means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

/// Outcome of an image acquisition. Out-of-date is a recoverable condition
/// that demands swapchain recreation, not an error.
pub enum AcquiredImage {
    Ready { index: u32, suboptimal: bool },
    OutOfDate,
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(device: Arc<VulkanDevice>, width: u32, height: u32) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let support = SwapchainSupport::query(
            &device.surface_loader,
            device.physical_device,
            device.surface,
        )
        .context("Failed to query swapchain support")?;

        let surface_format =
            choose_surface_format(&support.formats).context("No surface formats reported")?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Surface format: {:?} / {:?}, present mode: {:?}",
            surface_format.format,
            surface_format.color_space,
            present_mode
        );

        // Distinct graphics/present families share images concurrently so no
        // ownership transfer is needed; a single family owns them exclusively.
        let family_indices = [device.graphics_family, device.present_family];
        let (sharing_mode, queue_family_indices): (vk::SharingMode, &[u32]) =
            if device.graphics_family != device.present_family {
                (vk::SharingMode::CONCURRENT, &family_indices)
            } else {
                (vk::SharingMode::EXCLUSIVE, &[])
            };

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(RendererError::SwapchainCreation)?;

        // Get swapchain images
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(RendererError::SwapchainCreation)?;

        log::info!("Created swapchain with {} images", images.len());

        // Create image views
        let image_views: Result<Vec<_>> = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe {
                    device
                        .device
                        .create_image_view(&create_info, None)
                        .map_err(RendererError::creating("image view"))
                        .map_err(Into::into)
                }
            })
            .collect();

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views: image_views?,
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// Acquire the next image for rendering. The semaphore is signaled when
    /// the presentation engine actually releases the image, which may be
    /// after this call returns.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<AcquiredImage> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquiredImage::Ready { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage::OutOfDate),
            Err(code) => Err(RendererError::Frame {
                op: "image acquire",
                code,
            }
            .into()),
        }
    }

    /// Present a rendered image. Returns true when the swapchain should be
    /// recreated (suboptimal or out of date).
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(code) => Err(RendererError::Frame {
                op: "present",
                code,
            }
            .into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    const PREFERRED: (vk::Format, vk::ColorSpaceKHR) =
        (vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);

    #[test]
    fn format_selection_prefers_bgra_srgb_regardless_of_position() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(PREFERRED.0, PREFERRED.1),
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, PREFERRED.0);
        assert_eq!(chosen.color_space, PREFERRED.1);
    }

    #[test]
    fn format_selection_falls_back_to_first_entry() {
        // Preferred combination absent: first supported format wins
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn format_selection_returns_a_member_of_the_input_list() {
        let formats = [
            format(vk::Format::R5G6B5_UNORM_PACK16, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert!(formats.iter().any(|f| f.format == chosen.format
            && f.color_space == chosen.color_space));
    }

    #[test]
    fn format_selection_yields_none_for_empty_list() {
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_prefers_mailbox_when_supported() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn present_mode_falls_back_to_fifo_only() {
        // IMMEDIATE is supported but never considered
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);

        let modes = [vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_sentinel_clamps_each_axis_independently() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 10000, 5);
        assert_eq!(extent.width, 4096);
        assert_eq!(extent.height, 5);
    }

    #[test]
    fn extent_uses_current_extent_when_not_sentinel() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };

        // Framebuffer size is ignored: the surface dictates the extent
        let extent = choose_extent(&capabilities, 12345, 6789);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn image_count_is_clamped_by_maximum() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capabilities), 2);
    }

    #[test]
    fn image_count_zero_maximum_means_unbounded() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capabilities), 3);
    }
}
