//! Vulkan device, queue and swapchain negotiation on top of [`ash`].
//!
//! ```text
//! Runtime (process-wide instance)
//! ├── PhysicalDevice snapshots ── select_best_device
//! ├── Surface
//! └── LogicalDevice (queues selected per capability)
//!     └── Swapchain (needs graphics + presentation queues)
//! ```
//!
//! Children hold their parent through an `Arc`, so destruction always runs
//! swapchain, then device and surface, then the runtime.

pub mod backend;
pub mod config;
pub mod error;

pub use backend::{
    create_logical_device, create_swapchain, enumerate_devices, select_best_device, Capability,
    LogicalDevice, PhysicalDevice, Surface, Swapchain,
};
pub use error::{GpuError, Result};

pub use ash;
