//! End-to-end negotiation over synthetic device descriptors: rank devices,
//! select queues, resolve them and negotiate a swapchain, all without a GPU.

use ash::vk::{self, Handle};
use gpu_negotiator::backend::device::resolve_queues;
use gpu_negotiator::backend::queue::select_queues;
use gpu_negotiator::backend::surface::SurfaceSupport;
use gpu_negotiator::backend::{
    select_best_device, select_best_device_supporting, Capability, DeviceType, PhysicalDevice,
    QueueFamily, SharingMode, SwapchainConfig,
};
use gpu_negotiator::GpuError;
use std::collections::BTreeSet;
use std::convert::Infallible;

const MIB: u64 = 1024 * 1024;

fn device(
    id: u64,
    name: &str,
    device_type: vk::PhysicalDeviceType,
    local_heaps: &[u64],
    families: &[(vk::QueueFlags, u32)],
) -> PhysicalDevice {
    let mut properties = vk::PhysicalDeviceProperties {
        device_type,
        vendor_id: 0x10DE,
        ..Default::default()
    };
    for (dst, src) in properties.device_name.iter_mut().zip(name.bytes()) {
        *dst = src as std::os::raw::c_char;
    }

    let mut memory = vk::PhysicalDeviceMemoryProperties {
        memory_heap_count: local_heaps.len() as u32,
        ..Default::default()
    };
    for (heap, &size) in memory.memory_heaps.iter_mut().zip(local_heaps) {
        *heap = vk::MemoryHeap {
            size,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
    }

    let queue_families = families
        .iter()
        .enumerate()
        .map(|(i, &(flags, queue_count))| QueueFamily {
            index: i as u32,
            flags,
            queue_count,
        })
        .collect();

    PhysicalDevice::from_parts(
        vk::PhysicalDevice::from_raw(id),
        properties,
        vk::PhysicalDeviceFeatures::default(),
        memory,
        queue_families,
        BTreeSet::from(["VK_KHR_swapchain".to_string()]),
    )
}

#[test]
fn discrete_gpu_beats_larger_integrated_gpu() {
    let g = vk::QueueFlags::GRAPHICS;
    let devices = vec![
        device(1, "igpu", vk::PhysicalDeviceType::INTEGRATED_GPU, &[8192 * MIB], &[(g, 1)]),
        device(2, "dgpu", vk::PhysicalDeviceType::DISCRETE_GPU, &[4096 * MIB], &[(g, 1)]),
    ];

    let best = select_best_device(&devices).unwrap();
    assert_eq!(best.name(), "dgpu");
    assert_eq!(best.device_type(), DeviceType::Discrete);
    assert_eq!(best.memory(), 4096 * MIB);
}

#[test]
fn devices_missing_a_capability_are_skipped() {
    let c = vk::QueueFlags::COMPUTE;
    let g = vk::QueueFlags::GRAPHICS;
    let devices = vec![
        device(1, "compute-only", vk::PhysicalDeviceType::DISCRETE_GPU, &[16384 * MIB], &[(c, 4)]),
        device(2, "laptop", vk::PhysicalDeviceType::INTEGRATED_GPU, &[2048 * MIB], &[(g | c, 1)]),
    ];

    let best = select_best_device_supporting(&devices, &[Capability::Graphics]).unwrap();
    assert_eq!(best.name(), "laptop");

    let none = select_best_device_supporting(&devices[..1], &[Capability::Graphics]);
    assert!(matches!(none, Err(GpuError::NoSuitableDevice(1))));
}

#[test]
fn full_negotiation_on_a_split_presentation_device() {
    let g = vk::QueueFlags::GRAPHICS;
    let c = vk::QueueFlags::COMPUTE;
    let t = vk::QueueFlags::TRANSFER;
    let devices = vec![device(
        7,
        "split",
        vk::PhysicalDeviceType::DISCRETE_GPU,
        &[6144 * MIB],
        &[(g | c | t, 1), (c | t, 2), (t, 1)],
    )];
    let best = select_best_device(&devices).unwrap();

    // only family 1 can present
    let selection = select_queues(
        best.queue_families(),
        &Capability::ALL,
        |family| Ok::<_, Infallible>(family == 1),
    )
    .unwrap();

    assert_eq!(selection.family(Capability::Graphics), Some(0));
    assert_eq!(selection.family(Capability::Compute), Some(1));
    assert_eq!(selection.family(Capability::Transfer), Some(2));
    assert_eq!(selection.family(Capability::Presentation), Some(1));
    assert_eq!(selection.allocation().claimed(1), 2);
    assert_eq!(selection.allocation().total(), 4);

    let queues = resolve_queues(&selection, |family, index| {
        vk::Queue::from_raw(((family as u64) << 8) | (index as u64 + 1))
    });
    assert_eq!(queues[&Capability::Compute].queue_index(), 0);
    assert_eq!(queues[&Capability::Presentation].queue_index(), 1);
    assert!(!queues[&Capability::Graphics].same_queue(&queues[&Capability::Presentation]));

    let support = SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO],
    };

    let config = SwapchainConfig::negotiate(
        &support,
        selection.family(Capability::Graphics).unwrap(),
        selection.family(Capability::Presentation).unwrap(),
        (2560, 1440),
        Some(vk::PresentModeKHR::IMMEDIATE),
    )
    .unwrap();

    assert_eq!(config.format.format, vk::Format::R8G8B8A8_UNORM);
    assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
    assert_eq!(config.extent, vk::Extent2D { width: 1920, height: 1080 });
    assert_eq!(config.image_count, 3);
    assert_eq!(config.sharing, SharingMode::Concurrent([0, 1]));
}

#[test]
fn shared_graphics_and_presentation_are_exclusive() {
    let g = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
    let devices = vec![device(3, "single", vk::PhysicalDeviceType::INTEGRATED_GPU, &[512 * MIB], &[(g, 1)])];
    let best = select_best_device(&devices).unwrap();

    let selection = select_queues(
        best.queue_families(),
        &[Capability::Presentation, Capability::Graphics, Capability::Compute],
        |_| Ok::<_, Infallible>(true),
    )
    .unwrap();

    // presentation rides on graphics; compute finds the only queue taken
    assert_eq!(selection.family(Capability::Presentation), Some(0));
    assert_eq!(selection.family(Capability::Compute), None);
    assert_eq!(selection.allocation().total(), 1);
    assert_eq!(SharingMode::between(0, 0), SharingMode::Exclusive);
}
