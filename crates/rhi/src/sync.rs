//! Fences and binary semaphores.
//!
//! Each frame slot owns two semaphores (image acquired, rendering done)
//! and one fence the host blocks on before it reuses the slot.

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use crate::device::Device;
use crate::error::RhiResult;

/// Timeout meaning "wait without bound". A wait that never returns here
/// points at device loss or a missing submit, not a transient stall.
pub const FOREVER: u64 = u64::MAX;

/// Binary semaphore, destroyed on drop.
pub struct Semaphore {
    device: Arc<Device>,
    raw: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let raw = unsafe {
            device
                .handle()
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        trace!(?raw, "semaphore created");
        Ok(Self { device, raw })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.raw
    }

    /// Submit info for waiting on or signaling this semaphore at `stage`.
    pub fn submit_info(&self, stage: vk::PipelineStageFlags2) -> vk::SemaphoreSubmitInfo<'static> {
        vk::SemaphoreSubmitInfo::default()
            .semaphore(self.raw)
            .stage_mask(stage)
            .value(1)
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        trace!(raw = ?self.raw, "semaphore destroyed");
        unsafe { self.device.handle().destroy_semaphore(self.raw, None) };
    }
}

/// Host-visible completion signal.
///
/// Frame fences start signaled so the first wait on a fresh slot returns
/// at once.
pub struct Fence {
    device: Arc<Device>,
    raw: vk::Fence,
}

impl Fence {
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let info = vk::FenceCreateInfo::default().flags(fence_flags(signaled));
        let raw = unsafe { device.handle().create_fence(&info, None)? };
        trace!(?raw, signaled, "fence created");
        Ok(Self { device, raw })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.raw
    }

    /// Blocks until signaled. `TIMEOUT` comes back as an error when
    /// `timeout` nanoseconds pass first.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        let fences = [self.raw];
        unsafe { self.device.handle().wait_for_fences(&fences, true, timeout)? };
        Ok(())
    }

    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.raw];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }

    pub fn is_signaled(&self) -> RhiResult<bool> {
        Ok(unsafe { self.device.handle().get_fence_status(self.raw)? })
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        trace!(raw = ?self.raw, "fence destroyed");
        unsafe { self.device.handle().destroy_fence(self.raw, None) };
    }
}

fn fence_flags(signaled: bool) -> vk::FenceCreateFlags {
    if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    }
}
