// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Each stage consumes the previous stage's output, so the implicit
// instance -> surface -> device -> swapchain ordering is enforced by types.

pub mod device;
pub mod error;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
