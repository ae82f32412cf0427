//! Logical device, its queues and the shared GPU allocator.

use std::ffi::{CStr, c_char};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Dynamic rendering and synchronization2 are core in 1.3 and come in
/// through the feature chain, so only the swapchain is listed here.
const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Logical device with its graphics/present queues.
///
/// The allocator sits behind `Arc<Mutex<_>>` so the UI renderer can share
/// it, and is torn down right before the device.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
}

impl Device {
    /// Creates the device with descriptor indexing, buffer device address,
    /// dynamic rendering and synchronization2 switched on.
    pub fn new(instance: &Instance, gpu: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let families = gpu.queue_families;
        let (Some(graphics), Some(present)) = (families.graphics_family, families.present_family)
        else {
            return Err(RhiError::InvalidArgument(
                "physical device has incomplete queue families".to_string(),
            ));
        };

        let priority = [1.0f32];
        let queue_infos: Vec<_> = families
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priority)
            })
            .collect();

        let mut vk12 = vk::PhysicalDeviceVulkan12Features::default()
            .descriptor_indexing(true)
            .buffer_device_address(true);
        let mut vk13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let extensions: Vec<*const c_char> = DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
        let info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut vk12)
            .push_next(&mut vk13);

        let device = unsafe { instance.handle().create_device(gpu.device, &info, None)? };
        let graphics_queue = unsafe { device.get_device_queue(graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(present, 0) };
        debug!(graphics, present, "device queues ready");

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: gpu.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .inspect_err(|_| unsafe { device.destroy_device(None) })?;

        info!("logical device and allocator created");

        Ok(Arc::new(Self {
            device,
            physical_device: gpu.device,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
            graphics_queue,
            present_queue,
            queue_families: families,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Used for frame, compute and immediate submissions alike.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    #[inline]
    pub fn allocator(&self) -> &Arc<Mutex<Allocator>> {
        &self.allocator
    }

    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// `vkQueueSubmit2` on the graphics queue.
    ///
    /// # Safety
    ///
    /// Every command buffer referenced by `submits` must be fully recorded,
    /// and `fence`, unless null, must be unsignaled and not pending.
    pub unsafe fn submit2_graphics(
        &self,
        submits: &[vk::SubmitInfo2<'_>],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe { self.device.queue_submit2(self.graphics_queue, submits, fence)? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            error!("device wait idle failed during teardown: {e:?}");
        }
        if Arc::strong_count(&self.allocator) > 1 {
            error!("GPU allocator still shared while the device is destroyed");
        }
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("logical device destroyed");
    }
}

// The allocator is behind a Mutex; everything else is plain handles.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}
