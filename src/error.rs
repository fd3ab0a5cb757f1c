//! Error types for device negotiation

use ash::vk;
use thiserror::Error;

/// Failures surfaced by the runtime, device and swapchain layers.
///
/// A capability that no queue family can serve is not an error: it shows up as
/// `None` in the queue assignments and the caller decides whether that matters.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("Vulkan runtime has not been initialized")]
    RuntimeUnavailable,

    #[error("No suitable GPU found among {0} devices")]
    NoSuitableDevice(usize),

    #[error("Logical device creation failed: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("Swapchain creation failed: {0}")]
    SwapchainCreationFailed(vk::Result),

    #[error("The selected device has no usable presentation queue for this surface")]
    PresentationUnsupported,

    #[error("Failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Vulkan instance creation failed: {0}")]
    InstanceCreationFailed(vk::Result),

    #[error("Vulkan query failed: {0}")]
    Query(vk::Result),

    #[error("Surface creation failed: {0}")]
    SurfaceCreationFailed(vk::Result),

    #[error("Couldn't get window or display handle: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("Unsupported windowing platform")]
    UnsupportedPlatform,

    #[error("Runtime was initialized without the surface extensions")]
    SurfaceExtensionMissing,
}

/// Convenience type alias for Results with [`GpuError`]
pub type Result<T> = std::result::Result<T, GpuError>;
