// Vulkan runtime - process-wide bootstrap
//
// Responsibilities:
// - Load the Vulkan library and create the instance
// - Validation layers + debug messenger (when available)
// - Surface extension loader for presentation
// - Process-wide slot so callers can ask "is the runtime initialized?"

use ash::{vk, Entry};
use parking_lot::RwLock;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::physical_device::PhysicalDevice;
use super::surface;
use crate::error::{GpuError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

static RUNTIME: RwLock<Option<Arc<Runtime>>> = parking_lot::const_rwlock(None);

/// How the runtime should be brought up.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub app_name: String,
    /// Request the Khronos validation layer (skipped with a warning if missing)
    pub enable_validation: bool,
    /// Display the surfaces will live on; `None` for headless use
    pub display: Option<RawDisplayHandle>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            app_name: "gpu-negotiator".to_string(),
            enable_validation: false,
            display: None,
        }
    }
}

/// Vulkan instance wrapper with automatic cleanup.
///
/// Everything created from the instance holds an `Arc<Runtime>`, so the
/// instance is destroyed only after its last child.
pub struct Runtime {
    // Field order matters for drop: loaders before the instance, entry last
    surface_loader: Option<ash::extensions::khr::Surface>,
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    instance: ash::Instance,
    entry: Entry,
}

impl Runtime {
    /// Create a standalone runtime, outside the process-wide slot.
    pub fn new(settings: &RuntimeSettings) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan runtime: {}", settings.app_name);

        let entry = unsafe { Entry::load() }?;

        let surface_extensions = match settings.display {
            Some(display) => surface::required_instance_extensions(display)?,
            None => Vec::new(),
        };

        let validation = settings.enable_validation && Self::validation_available(&entry);
        if settings.enable_validation && !validation {
            log::warn!("Validation layer requested but not installed, continuing without it");
        }

        let instance = Self::create_instance(&entry, &settings.app_name, validation, &surface_extensions)?;

        let debug_utils = if validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug_utils) => Some(debug_utils),
                Err(e) => {
                    log::warn!("Failed to create debug messenger: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = (!surface_extensions.is_empty())
            .then(|| ash::extensions::khr::Surface::new(&entry, &instance));

        Ok(Arc::new(Self {
            surface_loader,
            debug_utils,
            instance,
            entry,
        }))
    }

    fn validation_available(entry: &Entry) -> bool {
        #[allow(unused_unsafe)]
        let layers = unsafe { entry.enumerate_instance_layer_properties() };
        layers
            .map(|layers| has_layer(&layers, VALIDATION_LAYER))
            .unwrap_or(false)
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        surface_extensions: &[&'static CStr],
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name.replace('\0', ""))
            .unwrap_or_else(|_| CString::from(c"gpu-negotiator"));
        let engine_name = c"gpu-negotiator";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extensions: Vec<*const std::os::raw::c_char> =
            surface_extensions.iter().map(|name| name.as_ptr()).collect();
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

        unsafe { entry.create_instance(&create_info, None) }
            .map_err(GpuError::InstanceCreationFailed)
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
            .map_err(GpuError::InstanceCreationFailed)?;

        Ok((debug_utils, messenger))
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Loader for `VK_KHR_surface`, present only when the runtime was created
    /// with a display.
    pub fn surface_loader(&self) -> Result<&ash::extensions::khr::Surface> {
        self.surface_loader
            .as_ref()
            .ok_or(GpuError::SurfaceExtensionMissing)
    }

    /// Snapshot every physical device the driver reports, in driver order.
    pub fn enumerate_devices(&self) -> Result<Vec<PhysicalDevice>> {
        let handles = unsafe { self.instance.enumerate_physical_devices() }
            .map_err(GpuError::Query)?;

        let devices = handles
            .into_iter()
            // SAFETY: handles were just enumerated from this instance
            .map(|raw| unsafe { PhysicalDevice::query(&self.instance, raw) })
            .collect::<Result<Vec<_>>>()?;

        for device in &devices {
            log::info!("Found GPU: {}", device);
        }
        Ok(devices)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan runtime...");

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Whether `name` is among the reported instance layers.
fn has_layer(layers: &[vk::LayerProperties], name: &CStr) -> bool {
    layers.iter().any(|layer| {
        // SAFETY: layer_name is NUL-terminated, by the loader or by zeroed defaults
        let layer_name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        layer_name == name
    })
}

/// Bring up the process-wide runtime. Returns the existing one if already
/// initialized; `settings` are ignored in that case.
pub fn initialize(settings: &RuntimeSettings) -> Result<Arc<Runtime>> {
    let mut slot = RUNTIME.write();
    if let Some(runtime) = slot.as_ref() {
        return Ok(Arc::clone(runtime));
    }
    let runtime = Runtime::new(settings)?;
    *slot = Some(Arc::clone(&runtime));
    Ok(runtime)
}

/// The process-wide runtime, or `RuntimeUnavailable` before [`initialize`].
pub fn current() -> Result<Arc<Runtime>> {
    RUNTIME.read().clone().ok_or(GpuError::RuntimeUnavailable)
}

pub fn is_initialized() -> bool {
    RUNTIME.read().is_some()
}

/// Release the process-wide slot. The instance itself is destroyed once the
/// last device, surface or swapchain holding it is dropped.
pub fn terminate() {
    if RUNTIME.write().take().is_some() {
        log::info!("Vulkan runtime released");
    }
}

/// List the physical devices of the process-wide runtime.
pub fn enumerate_devices() -> Result<Vec<PhysicalDevice>> {
    current()?.enumerate_devices()
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
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
