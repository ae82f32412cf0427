//! Physical device (GPU) selection.
//!
//! Selection enumerates all GPUs, keeps the ones that have a queue family
//! able to run both graphics and compute work, can present to the surface,
//! speak Vulkan 1.3 and expose the features the frame loop depends on
//! (dynamic rendering, synchronization2, buffer device address, descriptor
//! indexing), then prefers discrete GPUs.

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Queue family indices used by the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family supporting graphics and compute; all frame work is submitted here.
    pub graphics_family: Option<u32>,
    /// Family that can present to the window surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both graphics and present families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Unique family indices, for creating one queue per family.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);

        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }

        families
    }
}

/// Feature bits the engine requires from a device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequiredFeatures {
    pub dynamic_rendering: bool,
    pub synchronization2: bool,
    pub buffer_device_address: bool,
    pub descriptor_indexing: bool,
}

impl RequiredFeatures {
    /// Reads the relevant bits out of the 1.2/1.3 feature structs.
    pub fn from_vk(
        features_1_2: &vk::PhysicalDeviceVulkan12Features<'_>,
        features_1_3: &vk::PhysicalDeviceVulkan13Features<'_>,
    ) -> Self {
        Self {
            dynamic_rendering: features_1_3.dynamic_rendering == vk::TRUE,
            synchronization2: features_1_3.synchronization2 == vk::TRUE,
            buffer_device_address: features_1_2.buffer_device_address == vk::TRUE,
            descriptor_indexing: features_1_2.descriptor_indexing == vk::TRUE,
        }
    }

    /// Names of the missing features, empty when everything is supported.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.dynamic_rendering {
            missing.push("dynamicRendering");
        }
        if !self.synchronization2 {
            missing.push("synchronization2");
        }
        if !self.buffer_device_address {
            missing.push("bufferDeviceAddress");
        }
        if !self.descriptor_indexing {
            missing.push("descriptorIndexing");
        }
        missing
    }
}

/// The chosen GPU and the queue families work is submitted to.
#[derive(Clone, Copy, Debug)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub device_type: vk::PhysicalDeviceType,
    pub device_local_memory: u64,
    pub queue_families: QueueFamilyIndices,
}

/// Picks the best GPU that can drive `surface`.
///
/// # Errors
///
/// [`RhiError::NoSuitableGpu`] when no device passes the checks.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!(count = devices.len(), "enumerated GPUs");

    let best = devices
        .into_iter()
        .filter_map(|device| {
            let name = gpu_name(instance, device);
            match inspect_device(instance, device, surface, surface_loader) {
                Ok(info) => {
                    let score = rate_device(info.device_type, info.device_local_memory);
                    debug!(gpu = %name, score, "candidate GPU");
                    Some((name, info, score))
                }
                Err(reason) => {
                    debug!(gpu = %name, "skipped: {reason}");
                    None
                }
            }
        })
        .max_by_key(|(_, _, score)| *score);

    match best {
        Some((name, info, _)) => {
            info!(gpu = %name, kind = ?info.device_type, "selected GPU");
            Ok(info)
        }
        None => {
            warn!("no GPU supports Vulkan 1.3 with the required features and a present queue");
            Err(RhiError::NoSuitableGpu)
        }
    }
}

fn gpu_name(instance: &ash::Instance, device: vk::PhysicalDevice) -> String {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unnamed GPU".to_string())
}

/// Checks one device, returning why it was rejected on failure.
fn inspect_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, String> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    if !supports_api_1_3(properties.api_version) {
        return Err(format!(
            "Vulkan {}.{} only",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version)
        ));
    }

    let mut vk12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut vk13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut vk12)
        .push_next(&mut vk13);
    unsafe { instance.get_physical_device_features2(device, &mut features) };

    let missing = RequiredFeatures::from_vk(&vk12, &vk13).missing();
    if !missing.is_empty() {
        return Err(format!("missing features {missing:?}"));
    }

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        return Err(format!("incomplete queue families {queue_families:?}"));
    }

    let memory = unsafe { instance.get_physical_device_memory_properties(device) };
    let device_local_memory = memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum();

    Ok(PhysicalDeviceInfo {
        device,
        device_type: properties.device_type,
        device_local_memory,
        queue_families,
    })
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let flags: Vec<vk::QueueFlags> = families
        .iter()
        .map(|family| {
            if family.queue_count == 0 {
                vk::QueueFlags::empty()
            } else {
                family.queue_flags
            }
        })
        .collect();

    pick_queue_families(&flags, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, index, surface)
            .unwrap_or(false)
    })
}

/// Picks queue families from their flags and a present-support query.
///
/// Prefers a single family doing graphics, compute and present, which keeps
/// the swapchain in exclusive sharing mode.
fn pick_queue_families(
    flags: &[vk::QueueFlags],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    let wanted = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;

    for (i, family_flags) in flags.iter().enumerate() {
        let i = i as u32;
        let graphics = family_flags.contains(wanted);
        let present = supports_present(i);

        if graphics && present {
            return QueueFamilyIndices {
                graphics_family: Some(i),
                present_family: Some(i),
            };
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

fn supports_api_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    major > 1 || (major == 1 && minor >= 3)
}

/// Higher is better: device type dominates, VRAM breaks ties.
fn rate_device(device_type: vk::PhysicalDeviceType, device_local_memory: u64) -> u64 {
    let type_score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 10_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1_000,
        vk::PhysicalDeviceType::CPU => 100,
        _ => 1,
    };
    // VRAM in MiB, capped so it never outweighs the device type.
    let vram_mb = (device_local_memory / (1024 * 1024)).min(16_000);
    type_score + vram_mb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(indices.graphics_family.is_none());
        assert!(indices.present_family.is_none());
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_unique_families_deduplicates() {
        let same = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(same.unique_families(), vec![0]);

        let split = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(split.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_pick_prefers_combined_family() {
        let flags = [
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        ];
        // Family 1 cannot present, family 2 can.
        let indices = pick_queue_families(&flags, |i| i != 1);
        assert_eq!(indices.graphics_family, Some(2));
        assert_eq!(indices.present_family, Some(2));
    }

    #[test]
    fn test_pick_falls_back_to_split_families() {
        let flags = [
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            vk::QueueFlags::TRANSFER,
        ];
        let indices = pick_queue_families(&flags, |i| i == 1);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
        assert!(indices.is_complete());
    }

    #[test]
    fn test_graphics_without_compute_is_rejected() {
        let flags = [vk::QueueFlags::GRAPHICS];
        let indices = pick_queue_families(&flags, |_| true);
        assert!(indices.graphics_family.is_none());
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_required_features_missing() {
        let f12 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .descriptor_indexing(true);
        let f13 = vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);

        let features = RequiredFeatures::from_vk(&f12, &f13);
        assert_eq!(features.missing(), vec!["synchronization2"]);

        let f13 = f13.synchronization2(true);
        assert!(RequiredFeatures::from_vk(&f12, &f13).missing().is_empty());
    }

    #[test]
    fn test_api_version_gate() {
        assert!(supports_api_1_3(vk::make_api_version(0, 1, 3, 0)));
        assert!(supports_api_1_3(vk::make_api_version(0, 1, 4, 309)));
        assert!(!supports_api_1_3(vk::make_api_version(0, 1, 2, 198)));
    }

    #[test]
    fn test_rate_device_prefers_discrete() {
        let discrete = rate_device(vk::PhysicalDeviceType::DISCRETE_GPU, 0);
        let integrated = rate_device(vk::PhysicalDeviceType::INTEGRATED_GPU, 64 << 30);
        assert!(discrete > integrated);
    }
}
