// Swapchain - Window presentation
//
// Negotiates format, present mode, extent, image count and sharing mode
// against what the device and surface support, then owns the resulting
// chain of presentable images.

use ash::vk;
use glam::UVec2;
use std::sync::Arc;

use super::device::LogicalDevice;
use super::queue::{Capability, Queue};
use super::surface::{Surface, SurfaceSupport};
use crate::error::{GpuError, Result};

/// Prefer 8-bit BGRA with a non-linear sRGB color space, else the first format.
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Pick the present mode.
///
/// `preferred` wins when available, then MAILBOX (triple buffered, no
/// tearing), then FIFO which every surface supports.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: Option<vk::PresentModeKHR>,
) -> vk::PresentModeKHR {
    preferred
        .into_iter()
        .chain(std::iter::once(vk::PresentModeKHR::MAILBOX))
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface's current extent unless it reports the "undefined"
/// sentinel (width == u32::MAX), in which case the framebuffer size is
/// clamped into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = UVec2::new(
        capabilities.min_image_extent.width,
        capabilities.min_image_extent.height,
    );
    let max = UVec2::new(
        capabilities.max_image_extent.width,
        capabilities.max_image_extent.height,
    );
    // max() then min() rather than clamp(): a bogus min > max must not panic
    let extent = UVec2::new(framebuffer_size.0, framebuffer_size.1)
        .max(min)
        .min(max);

    vk::Extent2D {
        width: extent.x,
        height: extent.y,
    }
}

/// One more image than the minimum, bounded by the maximum (0 = unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count.saturating_add(1);
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

/// `(graphics family, presentation family)` for a swapchain build. Both
/// queues must exist.
pub fn presentation_families(
    graphics: Option<&Queue>,
    present: Option<&Queue>,
) -> Result<(u32, u32)> {
    match (graphics, present) {
        (Some(graphics), Some(present)) => Ok((graphics.family_index(), present.family_index())),
        _ => Err(GpuError::PresentationUnsupported),
    }
}

/// How swapchain images are shared between queue families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingMode {
    Exclusive,
    /// Graphics family first, presentation family second
    Concurrent([u32; 2]),
}

impl SharingMode {
    pub fn between(graphics_family: u32, present_family: u32) -> Self {
        if graphics_family == present_family {
            SharingMode::Exclusive
        } else {
            SharingMode::Concurrent([graphics_family, present_family])
        }
    }

    pub fn vk_mode(&self) -> vk::SharingMode {
        match self {
            SharingMode::Exclusive => vk::SharingMode::EXCLUSIVE,
            SharingMode::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn queue_family_indices(&self) -> &[u32] {
        match self {
            SharingMode::Exclusive => &[],
            SharingMode::Concurrent(families) => families,
        }
    }
}

/// Parameters negotiated for one swapchain build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing: SharingMode,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainConfig {
    pub fn negotiate(
        support: &SurfaceSupport,
        graphics_family: u32,
        present_family: u32,
        framebuffer_size: (u32, u32),
        preferred_present_mode: Option<vk::PresentModeKHR>,
    ) -> Result<Self> {
        let format = choose_surface_format(&support.formats).ok_or(
            GpuError::SwapchainCreationFailed(vk::Result::ERROR_FORMAT_NOT_SUPPORTED),
        )?;

        Ok(Self {
            format,
            present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
            extent: choose_extent(&support.capabilities, framebuffer_size),
            image_count: choose_image_count(&support.capabilities),
            sharing: SharingMode::between(graphics_family, present_family),
            pre_transform: support.capabilities.current_transform,
        })
    }
}

pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    swapchain_loader: ash::extensions::khr::Swapchain,
    images: Vec<vk::Image>,
    config: SwapchainConfig,
    preferred_present_mode: Option<vk::PresentModeKHR>,
    surface: Arc<Surface>,
    device: Arc<LogicalDevice>,
}

impl Swapchain {
    /// Build a swapchain for `surface` on `device`.
    ///
    /// The device must have both a graphics and a presentation queue.
    pub fn new(
        device: Arc<LogicalDevice>,
        surface: Arc<Surface>,
        preferred_present_mode: Option<vk::PresentModeKHR>,
    ) -> Result<Self> {
        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(device.runtime().instance(), device.raw());

        let (swapchain, images, config) = Self::build(
            &device,
            &surface,
            &swapchain_loader,
            preferred_present_mode,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            config,
            preferred_present_mode,
            surface,
            device,
        })
    }

    /// Rebuild against the surface's current size, e.g. after a resize.
    /// The old swapchain is handed to the driver and then destroyed.
    pub fn recreate(&mut self) -> Result<()> {
        let (swapchain, images, config) = Self::build(
            &self.device,
            &self.surface,
            &self.swapchain_loader,
            self.preferred_present_mode,
            self.swapchain,
        )?;

        unsafe { self.swapchain_loader.destroy_swapchain(self.swapchain, None) };
        self.swapchain = swapchain;
        self.images = images;
        self.config = config;
        Ok(())
    }

    fn build(
        device: &LogicalDevice,
        surface: &Surface,
        swapchain_loader: &ash::extensions::khr::Swapchain,
        preferred_present_mode: Option<vk::PresentModeKHR>,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>, SwapchainConfig)> {
        let (graphics_family, present_family) = presentation_families(
            device.queue(Capability::Graphics),
            device.queue(Capability::Presentation),
        )?;

        let support = surface.query_support(device.physical_device().raw())?;
        let framebuffer_size = surface.framebuffer_size();
        let config = SwapchainConfig::negotiate(
            &support,
            graphics_family,
            present_family,
            framebuffer_size,
            preferred_present_mode,
        )?;

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}, {:?}",
            config.extent.width,
            config.extent.height,
            config.image_count,
            config.format.format,
            config.present_mode,
            config.sharing
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.raw())
            .min_image_count(config.image_count)
            .image_format(config.format.format)
            .image_color_space(config.format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(config.sharing.vk_mode())
            .queue_family_indices(config.sharing.queue_family_indices())
            .pre_transform(config.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(GpuError::SwapchainCreationFailed)?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(GpuError::SwapchainCreationFailed(e));
            }
        };

        log::info!("Created swapchain with {} images", images.len());
        Ok((swapchain, images, config))
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn loader(&self) -> &ash::extensions::khr::Swapchain {
        &self.swapchain_loader
    }

    /// Images owned by the swapchain; valid until it is recreated or dropped.
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn config(&self) -> &SwapchainConfig {
        &self.config
    }

    pub fn format(&self) -> vk::Format {
        self.config.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        log::debug!("Destroying swapchain {:?}", self.swapchain);
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Build a swapchain with the default present-mode preference.
pub fn create_swapchain(device: Arc<LogicalDevice>, surface: Arc<Surface>) -> Result<Swapchain> {
    Swapchain::new(device, surface, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn undefined_extent_clamps_framebuffer_size() {
        let capabilities = caps((u32::MAX, u32::MAX), (100, 100), (800, 600));
        let extent = choose_extent(&capabilities, (1000, 50));
        assert_eq!(extent, vk::Extent2D { width: 800, height: 100 });
    }

    #[test]
    fn defined_extent_is_used_verbatim() {
        let capabilities = caps((640, 480), (100, 100), (800, 600));
        let extent = choose_extent(&capabilities, (1000, 50));
        assert_eq!(extent, vk::Extent2D { width: 640, height: 480 });
    }

    #[test]
    fn srgb_bgra_preferred() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&available), Some(available[1]));
    }

    #[test]
    fn first_format_is_the_fallback() {
        let available = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&available), Some(available[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_preferences() {
        use vk::PresentModeKHR as P;
        assert_eq!(choose_present_mode(&[P::FIFO, P::MAILBOX], None), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE], None), P::FIFO);
        assert_eq!(
            choose_present_mode(&[P::FIFO, P::MAILBOX, P::IMMEDIATE], Some(P::IMMEDIATE)),
            P::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&[P::FIFO, P::MAILBOX], Some(P::FIFO_RELAXED)),
            P::MAILBOX
        );
        assert_eq!(choose_present_mode(&[], None), P::FIFO);
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        let mut capabilities = caps((640, 480), (1, 1), (4096, 4096));
        assert_eq!(choose_image_count(&capabilities), 3);

        capabilities.max_image_count = 2;
        assert_eq!(choose_image_count(&capabilities), 2);

        capabilities.max_image_count = 8;
        assert_eq!(choose_image_count(&capabilities), 3);
    }

    #[test]
    fn image_count_does_not_overflow() {
        let mut capabilities = caps((800, 600), (1, 1), (4096, 4096));
        capabilities.min_image_count = u32::MAX;
        assert_eq!(choose_image_count(&capabilities), u32::MAX);
        capabilities.max_image_count = 8;
        assert_eq!(choose_image_count(&capabilities), 8);
    }

    #[test]
    fn swapchain_needs_graphics_and_presentation_queues() {
        let graphics = Queue::new(vk::Queue::null(), 0, 0);
        let present = Queue::new(vk::Queue::null(), 2, 0);

        assert_eq!(presentation_families(Some(&graphics), Some(&present)).unwrap(), (0, 2));
        assert_eq!(presentation_families(Some(&graphics), Some(&graphics)).unwrap(), (0, 0));
        assert!(matches!(
            presentation_families(None, Some(&present)),
            Err(GpuError::PresentationUnsupported)
        ));
        assert!(matches!(
            presentation_families(Some(&graphics), None),
            Err(GpuError::PresentationUnsupported)
        ));
        assert!(matches!(
            presentation_families(None, None),
            Err(GpuError::PresentationUnsupported)
        ));
    }

    #[test]
    fn sharing_mode_follows_family_equality() {
        let same = SharingMode::between(0, 0);
        assert_eq!(same, SharingMode::Exclusive);
        assert_eq!(same.vk_mode(), vk::SharingMode::EXCLUSIVE);
        assert!(same.queue_family_indices().is_empty());

        let split = SharingMode::between(0, 2);
        assert_eq!(split, SharingMode::Concurrent([0, 2]));
        assert_eq!(split.vk_mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(split.queue_family_indices(), &[0, 2]);
    }

    #[test]
    fn negotiation_combines_all_choices() {
        let support = SurfaceSupport {
            capabilities: caps((u32::MAX, u32::MAX), (1, 1), (1920, 1080)),
            formats: vec![format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let config = SwapchainConfig::negotiate(&support, 0, 1, (1280, 720), None).unwrap();

        assert_eq!(config.extent, vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(config.image_count, 3);
        assert_eq!(config.sharing, SharingMode::Concurrent([0, 1]));
    }

    #[test]
    fn negotiation_without_formats_fails() {
        let support = SurfaceSupport {
            capabilities: caps((640, 480), (1, 1), (640, 480)),
            formats: Vec::new(),
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(matches!(
            SwapchainConfig::negotiate(&support, 0, 0, (640, 480), None),
            Err(GpuError::SwapchainCreationFailed(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))
        ));
    }
}
