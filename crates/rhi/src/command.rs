//! Command pools, primary command buffers and the [`CommandRecorder`]
//! surface frame code records through.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;
use crate::image;
use crate::rendering;

/// Pool created with `RESET_COMMAND_BUFFER`, so a frame slot can reset its
/// buffer without touching the rest of the pool.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    family: u32,
}

impl CommandPool {
    pub fn new(device: Arc<Device>, family: u32) -> RhiResult<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(family);
        let pool = unsafe { device.handle().create_command_pool(&info, None)? };
        debug!(family, "command pool created");
        Ok(Self { device, pool, family })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.family
    }

    fn allocate_primary(&self) -> RhiResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let mut buffers = unsafe { self.device.handle().allocate_command_buffers(&info)? };
        buffers.pop().ok_or_else(|| vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.into())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Frees every buffer allocated from the pool as well.
        unsafe { self.device.handle().destroy_command_pool(self.pool, None) };
        debug!(family = self.family, "command pool destroyed");
    }
}

/// Primary command buffer. The handle belongs to its [`CommandPool`], which
/// must outlive this wrapper.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let buffer = pool.allocate_primary()?;
        Ok(Self { device, buffer })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Starts a one-time-submit recording.
    pub fn begin(&self) -> RhiResult<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.handle().begin_command_buffer(self.buffer, &info)? };
        Ok(())
    }

    pub fn end(&self) -> RhiResult<()> {
        unsafe { self.device.handle().end_command_buffer(self.buffer)? };
        Ok(())
    }

    /// Back to the initial state. The fence guarding the last submit of
    /// this buffer must already be signaled.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    /// Entry for `vkQueueSubmit2`.
    pub fn submit_info(&self) -> vk::CommandBufferSubmitInfo<'static> {
        vk::CommandBufferSubmitInfo::default().command_buffer(self.buffer)
    }
}

/// Commands a frame is built from.
///
/// [`CommandBuffer`] issues them to Vulkan; tests log them to check
/// ordering and layouts without a device.
pub trait CommandRecorder {
    /// Full-barrier layout change of the whole color image.
    fn transition_image(&mut self, image: vk::Image, current: vk::ImageLayout, new: vk::ImageLayout);

    /// Linear blit of the full color region. `src` must be in
    /// `TRANSFER_SRC_OPTIMAL`, `dst` in `TRANSFER_DST_OPTIMAL`.
    fn copy_image_to_image(
        &mut self,
        src: vk::Image,
        dst: vk::Image,
        src_size: vk::Extent2D,
        dst_size: vk::Extent2D,
    );

    /// `layout` must be `GENERAL` or `TRANSFER_DST_OPTIMAL`.
    fn clear_color_image(&mut self, image: vk::Image, layout: vk::ImageLayout, color: [f32; 4]);

    fn bind_compute_pipeline(&mut self, pipeline: vk::Pipeline);

    fn bind_compute_descriptor_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet);

    fn push_compute_constants(&mut self, layout: vk::PipelineLayout, bytes: &[u8]);

    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    /// Dynamic rendering into `view`, keeping what is already there.
    fn begin_rendering(&mut self, view: vk::ImageView, extent: vk::Extent2D);

    fn end_rendering(&mut self);
}

impl CommandRecorder for CommandBuffer {
    fn transition_image(&mut self, image: vk::Image, current: vk::ImageLayout, new: vk::ImageLayout) {
        image::transition_image(self.device.handle(), self.buffer, image, current, new);
    }

    fn copy_image_to_image(
        &mut self,
        src: vk::Image,
        dst: vk::Image,
        src_size: vk::Extent2D,
        dst_size: vk::Extent2D,
    ) {
        image::copy_image_to_image(self.device.handle(), self.buffer, src, dst, src_size, dst_size);
    }

    fn clear_color_image(&mut self, image: vk::Image, layout: vk::ImageLayout, color: [f32; 4]) {
        let value = vk::ClearColorValue { float32: color };
        let ranges = [image::subresource_range(vk::ImageAspectFlags::COLOR)];
        unsafe {
            self.device
                .handle()
                .cmd_clear_color_image(self.buffer, image, layout, &value, &ranges)
        };
    }

    fn bind_compute_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.buffer, vk::PipelineBindPoint::COMPUTE, pipeline)
        };
    }

    fn bind_compute_descriptor_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                &[set],
                &[],
            )
        };
    }

    fn push_compute_constants(&mut self, layout: vk::PipelineLayout, bytes: &[u8]) {
        unsafe {
            self.device.handle().cmd_push_constants(
                self.buffer,
                layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytes,
            )
        };
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe { self.device.handle().cmd_dispatch(self.buffer, x, y, z) };
    }

    fn begin_rendering(&mut self, view: vk::ImageView, extent: vk::Extent2D) {
        let attachments = [rendering::color_attachment_info(
            view,
            None,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )];
        let info = rendering::rendering_info(extent, &attachments);
        unsafe { self.device.handle().cmd_begin_rendering(self.buffer, &info) };
    }

    fn end_rendering(&mut self) {
        unsafe { self.device.handle().cmd_end_rendering(self.buffer) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_types_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
        assert_send::<CommandPool>();
    }

    #[test]
    fn test_command_buffer_is_a_recorder() {
        fn assert_recorder<T: CommandRecorder>() {}
        assert_recorder::<CommandBuffer>();
    }
}
