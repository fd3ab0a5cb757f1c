// Backend module - Vulkan device negotiation
//
// Design: Thin wrapper around ash; selection and negotiation logic is plain
// data in, decision out, so it runs without a GPU.

pub mod device;
pub mod instance;
pub mod physical_device;
pub mod queue;
pub mod surface;
pub mod swapchain;

pub use device::{create_logical_device, LogicalDevice};
pub use instance::{enumerate_devices, Runtime, RuntimeSettings};
pub use physical_device::{select_best_device, select_best_device_supporting, DeviceType, PhysicalDevice};
pub use queue::{Assignment, Capability, Queue, QueueAllocation, QueueFamily, QueueSelection};
pub use surface::{FramebufferSize, Surface};
pub use swapchain::{create_swapchain, presentation_families, SharingMode, Swapchain, SwapchainConfig};
