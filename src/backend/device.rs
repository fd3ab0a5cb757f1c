// Logical device - materialization of a queue selection
//
// Responsibilities:
// - Queue family selection for the requested capabilities
// - Logical device creation with exactly the claimed queue counts
// - Resolution of concrete queue handles, in claim order

use ash::vk;
use std::collections::{BTreeMap, HashMap};
use std::ffi::CString;
use std::sync::Arc;

use super::instance::Runtime;
use super::physical_device::PhysicalDevice;
use super::queue::{select_queues, Assignment, Capability, Queue, QueueAllocation, QueueSelection};
use super::surface::Surface;
use crate::error::{GpuError, Result};

/// Priority given to every created queue
const QUEUE_PRIORITY: f32 = 1.0;

/// Hands out queue indices inside each family, in claim order.
///
/// Mirrors the claims made during selection: the n-th claim on a family gets
/// queue index n, and no family hands out more indices than it claimed.
#[derive(Debug)]
pub struct QueueResolver {
    remaining: BTreeMap<u32, u32>,
    next_index: BTreeMap<u32, u32>,
}

impl QueueResolver {
    pub fn new(allocation: &QueueAllocation) -> Self {
        Self {
            remaining: allocation.iter().collect(),
            next_index: BTreeMap::new(),
        }
    }

    /// Next unclaimed queue index in `family`, or `None` once the family's
    /// claims are used up.
    pub fn next(&mut self, family: u32) -> Option<u32> {
        let remaining = self.remaining.get_mut(&family)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;

        let next = self.next_index.entry(family).or_insert(0);
        let index = *next;
        *next += 1;
        Some(index)
    }
}

/// Resolve every assignment of `selection` to a queue, in claim order.
///
/// `get_queue(family, index)` fetches the native handle. Presentation that
/// shares the graphics family reuses the graphics queue.
pub fn resolve_queues<F>(selection: &QueueSelection, mut get_queue: F) -> HashMap<Capability, Queue>
where
    F: FnMut(u32, u32) -> vk::Queue,
{
    let mut resolver = QueueResolver::new(selection.allocation());
    let mut queues: HashMap<Capability, Queue> = HashMap::new();

    for &(capability, assignment) in selection.assignments() {
        let queue = match assignment {
            Some(Assignment::Claimed { family }) => resolver
                .next(family)
                .map(|index| Queue::new(get_queue(family, index), family, index)),
            Some(Assignment::SharesGraphics { .. }) => queues.get(&Capability::Graphics).cloned(),
            None => None,
        };
        if let Some(queue) = queue {
            log::debug!(
                "{} queue: family {} index {}",
                capability,
                queue.family_index(),
                queue.queue_index()
            );
            queues.insert(capability, queue);
        }
    }
    queues
}

/// A device needs at least one queue; an allocation where every request
/// came back absent cannot be materialized.
pub fn ensure_queues_claimed(allocation: &QueueAllocation) -> Result<()> {
    if allocation.is_empty() {
        log::warn!("no queue was claimed, refusing to create a queueless device");
        return Err(GpuError::DeviceCreationFailed(
            vk::Result::ERROR_INITIALIZATION_FAILED,
        ));
    }
    Ok(())
}

/// Create the native device with one queue-create request per allocated
/// family, requesting exactly the claimed count.
///
/// # Safety
/// `physical_device` must have been enumerated from `instance`.
pub unsafe fn materialize(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    allocation: &QueueAllocation,
    extensions: &[CString],
) -> Result<ash::Device> {
    ensure_queues_claimed(allocation)?;

    let priorities: Vec<Vec<f32>> = allocation
        .iter()
        .map(|(_, count)| vec![QUEUE_PRIORITY; count as usize])
        .collect();

    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = allocation
        .iter()
        .zip(&priorities)
        .map(|((family, _), priorities)| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(priorities)
                .build()
        })
        .collect();

    let extension_names: Vec<*const std::os::raw::c_char> =
        extensions.iter().map(|name| name.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    instance
        .create_device(physical_device, &create_info, None)
        .map_err(GpuError::DeviceCreationFailed)
}

/// Logical device with its resolved queues and automatic cleanup.
///
/// Queue handles are borrowed from the device and become invalid once it is
/// dropped; swapchains hold an `Arc<LogicalDevice>` for that reason.
pub struct LogicalDevice {
    device: ash::Device,
    physical_device: PhysicalDevice,
    enabled_extensions: Vec<String>,
    selection: QueueSelection,
    queues: HashMap<Capability, Queue>,
    runtime: Arc<Runtime>,
}

impl LogicalDevice {
    /// Select queue families, create the device and fetch its queues.
    ///
    /// `surface` is only consulted for [`Capability::Presentation`]; without
    /// one, presentation resolves to no queue.
    pub fn new<S: AsRef<str>>(
        runtime: &Arc<Runtime>,
        physical_device: &PhysicalDevice,
        requested_extensions: &[S],
        capabilities: &[Capability],
        surface: Option<&Surface>,
    ) -> Result<Arc<Self>> {
        log::info!("Creating logical device on {}", physical_device.name());

        let raw = physical_device.raw();
        let selection = select_queues(physical_device.queue_families(), capabilities, |family| {
            match surface {
                Some(surface) => surface.supports_queue_family(raw, family),
                None => Ok(false),
            }
        })?;

        for &(capability, assignment) in selection.assignments() {
            if assignment.is_none() {
                log::warn!("{}: no queue family available for {}", physical_device.name(), capability);
            }
        }

        let extensions = physical_device.filter_extensions(requested_extensions);
        // SAFETY: the physical device was enumerated from this runtime's instance
        let device =
            unsafe { materialize(runtime.instance(), raw, selection.allocation(), &extensions) }?;

        // SAFETY: every (family, index) pair handed out by the resolver lies
        // within the queue counts requested at creation.
        let queues = resolve_queues(&selection, |family, index| unsafe {
            device.get_device_queue(family, index)
        });

        let enabled_extensions = extensions
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        log::info!(
            "Logical device ready: {} queue(s), extensions {:?}",
            selection.allocation().total(),
            enabled_extensions
        );

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device.clone(),
            enabled_extensions,
            selection,
            queues,
            runtime: Arc::clone(runtime),
        }))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Requested extensions the device supports, i.e. the ones enabled.
    pub fn enabled_extensions(&self) -> &[String] {
        &self.enabled_extensions
    }

    pub fn queue(&self, capability: Capability) -> Option<&Queue> {
        self.queues.get(&capability)
    }

    pub fn family_index(&self, capability: Capability) -> Option<u32> {
        self.selection.family(capability)
    }

    pub fn selection(&self) -> &QueueSelection {
        &self.selection
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(GpuError::Query)
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        log::info!("Destroying logical device on {}...", self.physical_device.name());

        let _ = self.wait_idle();
        unsafe { self.device.destroy_device(None) };
    }
}

/// Build a logical device on the process-wide runtime.
pub fn create_logical_device<S: AsRef<str>>(
    physical_device: &PhysicalDevice,
    requested_extensions: &[S],
    capabilities: &[Capability],
    surface: Option<&Surface>,
) -> Result<Arc<LogicalDevice>> {
    let runtime = super::instance::current()?;
    LogicalDevice::new(&runtime, physical_device, requested_extensions, capabilities, surface)
}
