// Presentation surface
//
// Connects a window to the Vulkan runtime and reports the window's current
// framebuffer size when the swapchain needs it.

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;
use std::fmt;
use std::ptr;
use std::sync::Arc;

use super::instance::Runtime;
use crate::error::{GpuError, Result};

/// Source of the framebuffer size in pixels.
pub trait FramebufferSize {
    fn framebuffer_size(&self) -> (u32, u32);
}

impl FramebufferSize for winit::window::Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }
}

/// Instance extensions needed to create surfaces on `display`.
pub fn required_instance_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display {
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        _ => return Err(GpuError::UnsupportedPlatform),
    };
    Ok(vec![khr::Surface::name(), platform])
}

/// Capabilities, formats and present modes of a (device, surface) pair.
///
/// Queried fresh for every swapchain build; never cached.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub struct Surface {
    raw: vk::SurfaceKHR,
    source: Arc<dyn FramebufferSize + Send + Sync>,
    runtime: Arc<Runtime>,
}

impl Surface {
    /// Create a surface for `window`. The window is kept alive until the
    /// surface is dropped.
    pub fn new<T>(runtime: &Arc<Runtime>, window: Arc<T>) -> Result<Arc<Self>>
    where
        T: HasWindowHandle + HasDisplayHandle + FramebufferSize + Send + Sync + 'static,
    {
        // fails early if the runtime has no surface extensions
        runtime.surface_loader()?;

        let display_handle = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        // SAFETY: the handles come from a live window that this surface keeps
        // alive through `source`.
        let raw = unsafe { create_raw_surface(runtime, display_handle, window_handle) }?;
        log::info!("Created presentation surface {:?}", raw);

        Ok(Arc::new(Self {
            raw,
            source: window,
            runtime: Arc::clone(runtime),
        }))
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.raw
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Current framebuffer size in pixels.
    pub fn framebuffer_size(&self) -> (u32, u32) {
        self.source.framebuffer_size()
    }

    /// Whether `queue_family` of `physical_device` can present here.
    pub fn supports_queue_family(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        let loader = self.runtime.surface_loader()?;
        unsafe {
            loader.get_physical_device_surface_support(physical_device, queue_family, self.raw)
        }
        .map_err(GpuError::Query)
    }

    pub fn query_support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        let loader = self.runtime.surface_loader()?;
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, self.raw)
                    .map_err(GpuError::Query)?,
                formats: loader
                    .get_physical_device_surface_formats(physical_device, self.raw)
                    .map_err(GpuError::Query)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, self.raw)
                    .map_err(GpuError::Query)?,
            })
        }
    }
}

unsafe fn create_raw_surface(
    runtime: &Runtime,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let entry = runtime.entry();
    let instance = runtime.instance();

    let surface = match (display_handle, window_handle) {
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let dpy = display.display.map_or(ptr::null_mut(), |d| d.as_ptr());
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut _)
                .window(window.window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
            let connection = display.connection.map_or(ptr::null_mut(), |c| c.as_ptr());
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection as *mut _)
                .window(window.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr() as *mut _)
                .surface(window.surface.as_ptr() as *mut _);
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)
        }
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(window)) => {
            let hinstance =
                window.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
            let hwnd = window.hwnd.get() as *const std::ffi::c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)
        }
        _ => return Err(GpuError::UnsupportedPlatform),
    };

    surface.map_err(GpuError::SurfaceCreationFailed)
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("raw", &self.raw)
            .field("framebuffer_size", &self.framebuffer_size())
            .finish_non_exhaustive()
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("Destroying surface {:?}", self.raw);
        if let Ok(loader) = self.runtime.surface_loader() {
            unsafe { loader.destroy_surface(self.raw, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandDisplayHandle, WindowsDisplayHandle};
    use std::ptr::NonNull;

    #[test]
    fn surface_extensions_follow_the_display() {
        let mut display = 0u8;
        let wayland = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(
            NonNull::from(&mut display).cast(),
        ));
        let names = required_instance_extensions(wayland).unwrap();
        assert_eq!(names, vec![khr::Surface::name(), khr::WaylandSurface::name()]);

        let windows = RawDisplayHandle::Windows(WindowsDisplayHandle::new());
        let names = required_instance_extensions(windows).unwrap();
        assert_eq!(names[1], khr::Win32Surface::name());
    }

    #[test]
    fn unknown_display_is_unsupported() {
        let web = RawDisplayHandle::Web(raw_window_handle::WebDisplayHandle::new());
        assert!(matches!(
            required_instance_extensions(web),
            Err(GpuError::UnsupportedPlatform)
        ));
    }
}
