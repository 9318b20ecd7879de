// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Surface creation (via ash-window, portable across platforms)
// - Physical device selection (first device passing every predicate)
// - Logical device + queue creation

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;
use winit::window::Window;

use super::error::RendererError;
use super::swapchain::SwapchainSupport;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions every candidate must provide. Swapchain support is the
/// floor: without it the device cannot present at all.
fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Queue family indices a device will use: one family for graphics commands,
/// one for presentation to the surface. They may coincide.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Scan queue families in enumeration order, recording the first index
    /// supporting graphics and the first supporting presentation, stopping
    /// early once both are found. Present support is an injected predicate
    /// because it needs a surface query per index.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> VkResult<bool>,
    ) -> VkResult<Self> {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if indices.graphics_family.is_none()
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.graphics_family = Some(index);
            }

            if indices.present_family.is_none() && supports_present(index)? {
                indices.present_family = Some(index);
            }

            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }
}

/// Extensions from `required` that are absent from `available`.
fn missing_device_extensions(available: &[CString], required: &[&CStr]) -> Vec<CString> {
    required
        .iter()
        .filter(|needed| !available.iter().any(|have| have.as_c_str() == **needed))
        .map(|needed| CString::from(*needed))
        .collect()
}

/// Everything the selector needs to know about one candidate device.
/// Computed fresh per candidate; the first suitable candidate wins.
struct SuitabilityReport {
    queue_families: QueueFamilyIndices,
    missing_extensions: Vec<CString>,
    format_count: usize,
    present_mode_count: usize,
}

impl SuitabilityReport {
    /// All four predicates: graphics family, present family, required
    /// extensions, and at least one surface format and present mode.
    fn is_suitable(&self) -> bool {
        self.queue_families.is_complete()
            && self.missing_extensions.is_empty()
            && self.format_count > 0
            && self.present_mode_count > 0
    }

    fn rejection_reason(&self) -> &'static str {
        if !self.queue_families.is_complete() {
            "missing graphics or present queue family"
        } else if !self.missing_extensions.is_empty() {
            "missing required device extensions"
        } else if self.format_count == 0 {
            "no supported surface formats"
        } else {
            "no supported present modes"
        }
    }
}

/// Vulkan device wrapper with automatic cleanup.
///
/// Owns the whole instance-to-device chain (entry, instance, debug
/// messenger, surface, logical device) and releases it in reverse order
/// on drop, so partial construction failures never leak earlier stages.
pub struct VulkanDevice {
    // Vulkan handles (order matters for drop!)
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_family: u32,
    pub present_family: u32,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached for diagnostics)
    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Create the full Vulkan context for a window.
    ///
    /// # Arguments
    /// * `window` - target window; supplies the surface and the required
    ///   platform instance extensions
    /// * `app_name` - application name reported to the driver
    /// * `enable_validation` - enable Vulkan validation layers (debug only)
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        log_instance_extensions(&entry)?;

        // Step 2: Create instance
        if enable_validation && !check_validation_layer_support(&entry)? {
            return Err(RendererError::ValidationLayersUnavailable.into());
        }
        let instance = Self::create_instance(&entry, window, app_name, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Create surface (platform handled by ash-window)
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .map_err(RendererError::creating("surface"))?;
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);

        // Step 5: Pick physical device (GPU)
        let (physical_device, indices) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;
        let (graphics_family, present_family) = match indices {
            QueueFamilyIndices {
                graphics_family: Some(g),
                present_family: Some(p),
            } => (g, p),
            // pick_physical_device only returns complete indices
            _ => return Err(RendererError::NoSuitableDevice.into()),
        };

        // Step 6: Create logical device
        let device =
            Self::create_logical_device(&instance, physical_device, graphics_family, present_family)?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        // Step 7: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={}, present={}",
            graphics_family,
            present_family
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            surface,
            surface_loader,
            instance,
            _entry: entry,
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
            debug_utils,
            properties,
        }))
    }

    fn create_instance(
        entry: &Entry,
        window: &Window,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("No Engine")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions for this platform, plus debug utils if validating
        let mut extensions =
            ash_window::enumerate_required_extensions(window.raw_display_handle())
                .context("No surface extensions for this platform")?
                .to_vec();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(RendererError::creating("instance"))?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(RendererError::creating("debug messenger"))?;

        Ok((debug_utils, messenger))
    }

    /// Keep the first enumerated device passing every suitability predicate.
    ///
    /// Greedy first-match, no scoring: with the predicates satisfied, any
    /// candidate can run this workload, so enumeration order decides.
    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            log::error!("No Vulkan-capable GPU found");
            return Err(RendererError::NoSuitableDevice.into());
        }

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();

            let report = Self::evaluate_device(instance, surface_loader, surface, device)?;
            if report.is_suitable() {
                log::info!("Device '{}' passes all suitability checks", name);
                return Ok((device, report.queue_families));
            }
            log::debug!("Device '{}' rejected: {}", name, report.rejection_reason());
        }

        Err(RendererError::NoSuitableDevice.into())
    }

    fn evaluate_device(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Result<SuitabilityReport> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let queue_families = QueueFamilyIndices::find(&families, |index| unsafe {
            surface_loader.get_physical_device_surface_support(device, index, surface)
        })
        .context("Failed to query surface support")?;

        let available = unsafe { instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.into())
            .collect::<Vec<CString>>();
        let missing_extensions =
            missing_device_extensions(&available, &required_device_extensions());

        // Only meaningful once the swapchain extension is present
        let (format_count, present_mode_count) = if missing_extensions.is_empty() {
            let support = SwapchainSupport::query(surface_loader, device, surface)
                .context("Failed to query swapchain support")?;
            (support.formats.len(), support.present_modes.len())
        } else {
            (0, 0)
        };

        Ok(SuitabilityReport {
            queue_families,
            missing_extensions,
            format_count,
            present_mode_count,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_family: u32,
        present_family: u32,
    ) -> Result<ash::Device> {
        let mut unique_families = vec![graphics_family];
        if present_family != graphics_family {
            unique_families.push(present_family);
        }

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .map_err(RendererError::creating("logical device"))?;

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup or recreation)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(RendererError::during("device idle wait"))?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order of creation
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Log every instance extension the loader reports. Read-only diagnostic.
fn log_instance_extensions(entry: &Entry) -> Result<()> {
    let extensions = entry
        .enumerate_instance_extension_properties(None)
        .context("Failed to enumerate instance extensions")?;

    log::debug!("Available instance extensions:");
    for extension in &extensions {
        let name = unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) };
        log::debug!("  {}", name.to_string_lossy());
    }

    Ok(())
}

fn check_validation_layer_support(entry: &Entry) -> Result<bool> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .context("Failed to enumerate instance layers")?;

    Ok(contains_validation_layer(&layers))
}

fn contains_validation_layer(layers: &[vk::LayerProperties]) -> bool {
    layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER
    })
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn find_records_first_graphics_and_present_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];

        let indices = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics_family, Some(1));
        // Every family reports present support, so the first one wins
        assert_eq!(indices.present_family, Some(0));
        assert!(indices.is_complete());
    }

    #[test]
    fn find_handles_distinct_graphics_and_present_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];

        // Only the second family can present
        let indices = QueueFamilyIndices::find(&families, |i| Ok(i == 1)).unwrap();
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
        assert!(indices.is_complete());
    }

    #[test]
    fn find_stops_scanning_once_both_indices_are_populated() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];

        let mut queries = 0;
        let indices = QueueFamilyIndices::find(&families, |_| {
            queries += 1;
            Ok(true)
        })
        .unwrap();

        assert!(indices.is_complete());
        assert_eq!(queries, 1);
    }

    #[test]
    fn find_is_incomplete_without_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, None);
        assert!(!indices.is_complete());
    }

    #[test]
    fn find_propagates_query_errors() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result =
            QueueFamilyIndices::find(&families, |_| Err(vk::Result::ERROR_SURFACE_LOST_KHR));
        assert_eq!(result.unwrap_err(), vk::Result::ERROR_SURFACE_LOST_KHR);
    }

    #[test]
    fn missing_extensions_reports_absent_names_only() {
        let available = vec![
            CString::new("VK_KHR_swapchain").unwrap(),
            CString::new("VK_KHR_maintenance1").unwrap(),
        ];
        let required = required_device_extensions();

        assert!(missing_device_extensions(&available, &required).is_empty());

        let missing = missing_device_extensions(&[], &required);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].as_c_str(), required[0]);
    }

    fn complete_indices() -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        }
    }

    #[test]
    fn selection_skips_earlier_device_missing_swapchain_extension() {
        // Device A: fine queues, but no swapchain extension
        let device_a = SuitabilityReport {
            queue_families: complete_indices(),
            missing_extensions: vec![CString::new("VK_KHR_swapchain").unwrap()],
            format_count: 0,
            present_mode_count: 0,
        };
        // Device B: passes all four predicates
        let device_b = SuitabilityReport {
            queue_families: complete_indices(),
            missing_extensions: vec![],
            format_count: 3,
            present_mode_count: 2,
        };

        let candidates = [device_a, device_b];
        let chosen = candidates.iter().position(|r| r.is_suitable());
        assert_eq!(chosen, Some(1));
    }

    #[test]
    fn device_without_formats_or_present_modes_is_rejected() {
        let report = SuitabilityReport {
            queue_families: complete_indices(),
            missing_extensions: vec![],
            format_count: 0,
            present_mode_count: 1,
        };
        assert!(!report.is_suitable());
        assert_eq!(report.rejection_reason(), "no supported surface formats");
    }

    fn layer(name: &CStr) -> vk::LayerProperties {
        let mut properties = vk::LayerProperties::default();
        for (i, &byte) in name.to_bytes_with_nul().iter().enumerate() {
            properties.layer_name[i] = byte as std::os::raw::c_char;
        }
        properties
    }

    #[test]
    fn validation_layer_is_found_among_reported_layers() {
        let layers = [layer(c"VK_LAYER_LUNARG_api_dump"), layer(VALIDATION_LAYER)];
        assert!(contains_validation_layer(&layers));
    }

    #[test]
    fn validation_layer_absence_is_detected() {
        let layers = [layer(c"VK_LAYER_LUNARG_api_dump")];
        assert!(!contains_validation_layer(&layers));
        assert!(!contains_validation_layer(&[]));
    }

    #[test]
    fn window_handles_satisfy_the_surface_creation_traits() {
        // ash-window consumes raw-window-handle 0.5 handles; this fails to
        // compile if winit stops providing the matching trait impls.
        fn assert_handle_sources<W: HasRawDisplayHandle + HasRawWindowHandle>() {}
        assert_handle_sources::<winit::window::Window>();
    }
}
