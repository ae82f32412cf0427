//! One-shot GPU submissions for setup work (uploads, initial clears).
//!
//! Not for the per-frame path: every call blocks the host until the GPU has
//! finished the recorded work.

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::sync::{FOREVER, Fence};

/// A reusable command buffer and fence pair on the graphics queue.
///
/// `submit` takes `&mut self`, so two submissions can never overlap.
pub struct ImmediateSubmit {
    device: Arc<Device>,
    // Field order matters: the buffer is freed with the pool.
    command_buffer: CommandBuffer,
    command_pool: CommandPool,
    fence: Fence,
}

impl ImmediateSubmit {
    /// # Errors
    ///
    /// Returns an error if the pool, buffer or fence cannot be created.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let family = device.queue_families().graphics_family.ok_or_else(|| {
            RhiError::InvalidArgument("device has no graphics queue family".to_string())
        })?;

        let command_pool = CommandPool::new(device.clone(), family)?;
        let command_buffer = CommandBuffer::new(device.clone(), &command_pool)?;
        let fence = Fence::new(device.clone(), true)?;

        Ok(Self {
            device,
            command_buffer,
            command_pool,
            fence,
        })
    }

    /// Records `record` into the shared buffer, submits it with no
    /// semaphores and blocks until it completes.
    ///
    /// # Errors
    ///
    /// Returns an error from any Vulkan call in the sequence. The fence is
    /// left unsignaled if the submit itself failed.
    pub fn submit(&mut self, record: impl FnOnce(&mut CommandBuffer)) -> RhiResult<()> {
        self.fence.reset()?;
        self.command_buffer.reset()?;

        self.command_buffer.begin()?;
        record(&mut self.command_buffer);
        self.command_buffer.end()?;

        let command_infos = [self.command_buffer.submit_info()];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&command_infos);

        unsafe {
            self.device
                .submit2_graphics(&[submit], self.fence.handle())?;
        }
        self.fence.wait(FOREVER)?;

        trace!("Immediate submit completed");
        Ok(())
    }

    /// Pool the immediate buffer is allocated from, also used by the UI
    /// renderer for its texture uploads.
    #[inline]
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool.handle()
    }
}
