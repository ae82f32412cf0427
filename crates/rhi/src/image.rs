//! GPU images and the layout transition / blit helpers.
//!
//! The barrier and blit builders are pure functions; the `transition_image`
//! and `copy_image_to_image` wrappers only record into a command buffer and
//! never stall the GPU.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Image handles plus the data needed to describe it.
///
/// Plain handle data: the image, its view and its memory are released via
/// the deletion queue, not by dropping this struct.
#[derive(Clone, Copy, Debug)]
pub struct AllocatedImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
}

impl AllocatedImage {
    /// Creates a 2D, single-mip, device-local image with a full color view.
    ///
    /// The returned allocation must be freed after the image is destroyed.
    ///
    /// # Errors
    ///
    /// Returns an error if image creation, allocation, binding or view
    /// creation fails. Partially created objects are released first.
    pub fn create(
        device: &Device,
        name: &str,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> RhiResult<(Self, Allocation)> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = device.handle();
        let image = unsafe { handle.create_image(&create_info, None)? };
        let requirements = unsafe { handle.get_image_memory_requirements(image) };

        let allocation = {
            let Ok(mut allocator) = device.allocator().lock() else {
                unsafe { handle.destroy_image(image, None) };
                return Err(RhiError::InvalidHandle("allocator lock poisoned".to_string()));
            };
            allocator.allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { handle.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe { handle.bind_image_memory(image, allocation.memory(), allocation.offset()) };
        let view = bound.and_then(|()| {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR));
            unsafe { handle.create_image_view(&view_info, None) }
        });
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe { handle.destroy_image(image, None) };
                if let Ok(mut allocator) = device.allocator().lock() {
                    let _ = allocator.free(allocation);
                }
                return Err(e.into());
            }
        };

        debug!(
            "Image '{}' created: {}x{} {:?}",
            name, extent.width, extent.height, format
        );

        Ok((
            Self {
                image,
                view,
                extent,
                format,
            },
            allocation,
        ))
    }

    /// Width and height as a 2D extent.
    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}

/// Every mip level and array layer of the image for `aspect`.
pub fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
}

/// Full-range barrier moving `image` from `current` to `new`.
///
/// Stage masks are ALL_COMMANDS on both sides. That over-synchronizes, which
/// is fine for a handful of transitions per frame.
pub fn layout_barrier(
    image: vk::Image,
    current: vk::ImageLayout,
    new: vk::ImageLayout,
) -> vk::ImageMemoryBarrier2<'static> {
    let aspect = if new == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    };

    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
        .old_layout(current)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect))
}

/// Blit region mapping all of `src_size` onto all of `dst_size` (mip 0, layer 0).
pub fn blit_region(src_size: vk::Extent2D, dst_size: vk::Extent2D) -> vk::ImageBlit2<'static> {
    let layers = vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);

    vk::ImageBlit2::default()
        .src_subresource(layers)
        .src_offsets([vk::Offset3D::default(), far_corner(src_size)])
        .dst_subresource(layers)
        .dst_offsets([vk::Offset3D::default(), far_corner(dst_size)])
}

/// Blit offsets are signed; extents past `i32::MAX` clamp rather than wrap.
fn far_corner(size: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: i32::try_from(size.width).unwrap_or(i32::MAX),
        y: i32::try_from(size.height).unwrap_or(i32::MAX),
        z: 1,
    }
}

/// Records a layout transition for `image`.
pub fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    current: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let barriers = [layout_barrier(image, current, new)];
    let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);

    unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
}

/// Records a linear-filtered blit of `src` into `dst`, scaling when the
/// extents differ. `src` must be TRANSFER_SRC_OPTIMAL, `dst` TRANSFER_DST_OPTIMAL.
pub fn copy_image_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Image,
    dst: vk::Image,
    src_size: vk::Extent2D,
    dst_size: vk::Extent2D,
) {
    let regions = [blit_region(src_size, dst_size)];
    let blit = vk::BlitImageInfo2::default()
        .src_image(src)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(dst)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .filter(vk::Filter::LINEAR)
        .regions(&regions);

    unsafe { device.cmd_blit_image2(cmd, &blit) };
}
