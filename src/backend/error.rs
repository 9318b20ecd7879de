// Error taxonomy for the Vulkan backend
//
// Startup errors are fatal: hardware capabilities do not change mid-run, so
// there is no retry path. Frame-loop errors carry the native result code so
// callers can distinguish a stale swapchain from a true failure.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    /// No enumerated physical device passed every suitability predicate.
    #[error("no Vulkan-capable device satisfies the renderer requirements")]
    NoSuitableDevice,

    /// Validation layers were requested but the loader does not provide them.
    #[error("validation layers requested, but not available")]
    ValidationLayersUnavailable,

    /// Swapchain construction failed; carries the native result for diagnosis.
    #[error("swapchain creation failed: {0}")]
    SwapchainCreation(vk::Result),

    /// A create call for any other owned resource failed during startup.
    #[error("failed to create {what}: {code}")]
    ResourceCreation {
        what: &'static str,
        code: vk::Result,
    },

    /// A wait/acquire/submit/present call failed inside the frame loop.
    #[error("frame {op} failed: {code}")]
    Frame {
        op: &'static str,
        code: vk::Result,
    },
}

impl RendererError {
    pub(crate) fn creating(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |code| Self::ResourceCreation { what, code }
    }

    pub(crate) fn during(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |code| Self::Frame { op, code }
    }
}
