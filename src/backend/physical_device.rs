// Physical devices - enumeration snapshot and ranking
//
// A `PhysicalDevice` is a read-only snapshot taken at enumeration time. The
// driver owns the underlying handle; nothing here destroys it.

use ash::vk;
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::fmt;

use super::queue::{Capability, QueueFamily};
use crate::error::{GpuError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Integrated,
    Discrete,
    Virtual,
    Cpu,
    Unknown,
}

impl From<vk::PhysicalDeviceType> for DeviceType {
    fn from(device_type: vk::PhysicalDeviceType) -> Self {
        match device_type {
            vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceType::Integrated,
            vk::PhysicalDeviceType::DISCRETE_GPU => DeviceType::Discrete,
            vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceType::Virtual,
            vk::PhysicalDeviceType::CPU => DeviceType::Cpu,
            _ => DeviceType::Unknown,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Integrated => "integrated GPU",
            DeviceType::Discrete => "discrete GPU",
            DeviceType::Virtual => "virtual GPU",
            DeviceType::Cpu => "CPU",
            DeviceType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Display name for a PCI vendor id.
pub fn vendor_name(vendor_id: u32) -> &'static str {
    match vendor_id {
        0x1002 => "AMD",
        0x1010 => "ImgTec",
        0x10DE => "NVIDIA",
        0x13B5 => "ARM",
        0x5143 => "Qualcomm",
        0x8086 => "Intel",
        _ => "Unknown",
    }
}

/// Sum of the heaps flagged `DEVICE_LOCAL`.
pub fn device_local_memory(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    let count = (memory.memory_heap_count as usize).min(memory.memory_heaps.len());
    memory.memory_heaps[..count]
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

/// Snapshot of a physical device taken during enumeration.
#[derive(Clone)]
pub struct PhysicalDevice {
    raw: vk::PhysicalDevice,
    name: String,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device_local_memory: u64,
    queue_families: Vec<QueueFamily>,
    extensions: BTreeSet<String>,
}

impl PhysicalDevice {
    /// Capture everything selection needs from a live handle.
    ///
    /// # Safety
    /// `raw` must have been enumerated from `instance`.
    pub unsafe fn query(instance: &ash::Instance, raw: vk::PhysicalDevice) -> Result<Self> {
        let properties = instance.get_physical_device_properties(raw);
        let features = instance.get_physical_device_features(raw);
        let memory_properties = instance.get_physical_device_memory_properties(raw);
        let queue_families = instance.get_physical_device_queue_family_properties(raw);

        let extensions = instance
            .enumerate_device_extension_properties(raw)
            .map_err(GpuError::Query)?
            .iter()
            .map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        Ok(Self::from_parts(
            raw,
            properties,
            features,
            memory_properties,
            QueueFamily::table(&queue_families),
            extensions,
        ))
    }

    /// Assemble a descriptor from already-queried data.
    pub fn from_parts(
        raw: vk::PhysicalDevice,
        properties: vk::PhysicalDeviceProperties,
        features: vk::PhysicalDeviceFeatures,
        memory_properties: vk::PhysicalDeviceMemoryProperties,
        queue_families: Vec<QueueFamily>,
        extensions: BTreeSet<String>,
    ) -> Self {
        // SAFETY: the driver fills device_name with a NUL-terminated string; a
        // zeroed array (synthetic descriptors) is an empty string.
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        Self {
            raw,
            name,
            properties,
            features,
            device_local_memory: device_local_memory(&memory_properties),
            memory_properties,
            queue_families,
            extensions,
        }
    }

    pub fn raw(&self) -> vk::PhysicalDevice {
        self.raw
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vendor_id(&self) -> u32 {
        self.properties.vendor_id
    }

    pub fn vendor_name(&self) -> &'static str {
        vendor_name(self.properties.vendor_id)
    }

    pub fn device_type(&self) -> DeviceType {
        self.properties.device_type.into()
    }

    /// Total device-local memory in bytes.
    pub fn memory(&self) -> u64 {
        self.device_local_memory
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    pub fn features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Queue family table in driver order. The order breaks selection ties.
    pub fn queue_families(&self) -> &[QueueFamily] {
        &self.queue_families
    }

    pub fn supported_extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    /// Whether some family's flags cover `capability`. Presentation always
    /// passes since it depends on the surface.
    pub fn supports(&self, capability: Capability) -> bool {
        capability == Capability::Presentation
            || self.queue_families.iter().any(|f| f.supports(capability))
    }

    /// Keep the requested extensions the device supports, in request order.
    ///
    /// Unsupported names are dropped, not reported as errors.
    pub fn filter_extensions<S: AsRef<str>>(&self, requested: &[S]) -> Vec<CString> {
        let mut enabled: Vec<CString> = Vec::with_capacity(requested.len());
        for name in requested.iter().map(AsRef::as_ref) {
            if !self.extensions.contains(name) {
                log::debug!("{}: extension {} not supported, skipping", self.name, name);
                continue;
            }
            match CString::new(name) {
                Ok(name) if !enabled.contains(&name) => enabled.push(name),
                Ok(_) => {}
                Err(_) => log::debug!("extension name {:?} contains a NUL byte, skipping", name),
            }
        }
        enabled
    }
}

impl fmt::Debug for PhysicalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalDevice")
            .field("raw", &self.raw)
            .field("name", &self.name)
            .field("vendor", &self.vendor_name())
            .field("device_type", &self.device_type())
            .field("memory", &self.device_local_memory)
            .field("queue_families", &self.queue_families)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PhysicalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} : {} MiB ({})",
            self.vendor_name(),
            self.name,
            self.device_local_memory / (1024 * 1024),
            self.device_type()
        )
    }
}

/// Pick the device to run on.
///
/// Discrete GPUs are preferred whenever one exists; within the preferred
/// tier the device with the most device-local memory wins, and the first
/// listed device wins ties.
pub fn select_best_device(devices: &[PhysicalDevice]) -> Result<&PhysicalDevice> {
    let candidates: Vec<&PhysicalDevice> = devices.iter().collect();
    rank(candidates).ok_or(GpuError::NoSuitableDevice(devices.len()))
}

/// Like [`select_best_device`], but only among devices with a queue family
/// for every requested graphics/compute/transfer capability.
pub fn select_best_device_supporting<'a>(
    devices: &'a [PhysicalDevice],
    capabilities: &[Capability],
) -> Result<&'a PhysicalDevice> {
    let candidates: Vec<&PhysicalDevice> = devices
        .iter()
        .filter(|device| {
            let missing: Vec<_> = capabilities
                .iter()
                .filter(|c| !device.supports(**c))
                .collect();
            if !missing.is_empty() {
                log::debug!("{} lacks {:?}, not considered", device.name(), missing);
            }
            missing.is_empty()
        })
        .collect();
    rank(candidates).ok_or(GpuError::NoSuitableDevice(devices.len()))
}

fn rank(candidates: Vec<&PhysicalDevice>) -> Option<&PhysicalDevice> {
    let (discrete, others): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|device| device.device_type() == DeviceType::Discrete);
    let tier = if discrete.is_empty() { others } else { discrete };

    // strict comparison keeps the first device among equals
    let mut best: Option<&PhysicalDevice> = None;
    for device in tier {
        if best.map_or(true, |b| device.memory() > b.memory()) {
            best = Some(device);
        }
    }
    best
}
