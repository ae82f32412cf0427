//! Swapchain creation, rebuild, acquire and present.
//!
//! Swapchain images are blit destinations for the offscreen draw image and
//! color attachments for the UI pass, hence [`SWAPCHAIN_IMAGE_USAGE`].
//! Everything the driver lets us choose is decided up front by
//! [`SwapchainConfig::select`] from the surface's reported support.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::sync::FOREVER;

/// Usage of every swapchain image.
pub const SWAPCHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// What a surface supports on one physical device.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// # Errors
    ///
    /// Returns an error if any surface query fails.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// Creation parameters derived from [`SurfaceSupport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SwapchainConfig {
    /// Picks format, present mode, extent and image count for a window of
    /// `width` x `height`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if the surface reports no formats.
    pub fn select(support: &SurfaceSupport, width: u32, height: u32) -> RhiResult<Self> {
        let surface_format = choose_surface_format(&support.formats).ok_or_else(|| {
            RhiError::SwapchainError("surface reports no formats".to_string())
        })?;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, width, height),
            image_count: choose_image_count(&support.capabilities),
        })
    }
}

/// A swapchain plus one view per image.
///
/// Used only from the render thread.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// # Errors
    ///
    /// Returns an error if the surface queries, swapchain creation or image
    /// view creation fail.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let mut swapchain = Self {
            device,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
        };
        swapchain.build(instance, surface, width, height)?;
        Ok(swapchain)
    }

    /// Rebuilds for a new window size. The old handle is passed as
    /// `old_swapchain` and destroyed once the new one exists.
    ///
    /// Waits for the device to go idle: no in-flight frame may still use the
    /// old images.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait or creation fails. The old handle is
    /// kept in that case so the rebuild can be retried.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        self.device.wait_idle()?;
        info!("Recreating swapchain at {}x{}", width, height);
        self.build(instance, surface, width, height)
    }

    /// Creates a swapchain (retiring the current one, if any) and its views.
    fn build(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let support = SurfaceSupport::query(self.device.physical_device(), surface, &surface_loader)?;
        let config = SwapchainConfig::select(&support, width, height)?;

        let families = self.device.queue_families();
        let (Some(graphics), Some(present)) = (families.graphics_family, families.present_family)
        else {
            return Err(RhiError::SwapchainError(
                "device has no graphics/present queue family".to_string(),
            ));
        };
        let shared_families = [graphics, present];
        let (sharing_mode, family_indices): (_, &[u32]) = if graphics == present {
            (vk::SharingMode::EXCLUSIVE, &[])
        } else {
            (vk::SharingMode::CONCURRENT, &shared_families)
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(SWAPCHAIN_IMAGE_USAGE)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(self.swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };

        let views = unsafe { self.loader.get_swapchain_images(swapchain) }
            .map_err(RhiError::from)
            .and_then(|images| {
                let views = create_image_views(&self.device, &images, config.surface_format.format)?;
                Ok((images, views))
            });
        let (images, image_views) = match views {
            Ok(created) => created,
            Err(e) => {
                unsafe { self.loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
        }

        self.swapchain = swapchain;
        self.images = images;
        self.image_views = image_views;
        self.format = config.surface_format.format;
        self.extent = config.extent;
        self.present_mode = config.present_mode;

        info!(
            "Swapchain ready: {}x{}, {:?}, {:?}, {} images",
            self.extent.width,
            self.extent.height,
            self.format,
            self.present_mode,
            self.images.len()
        );
        Ok(())
    }

    /// Returns `(image_index, suboptimal)`, signaling `semaphore` when the
    /// image is ready to be written.
    ///
    /// # Errors
    ///
    /// Returns the raw result code. `ERROR_OUT_OF_DATE_KHR` means the
    /// swapchain must be rebuilt before the next acquire.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, FOREVER, semaphore, vk::Fence::null())
        }
    }

    /// Queues `image_index` for display once `wait_semaphore` signals.
    /// Returns true when the swapchain is suboptimal.
    ///
    /// # Errors
    ///
    /// Returns the raw result code, `ERROR_OUT_OF_DATE_KHR` included.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Panics if `index` was not returned by [`acquire_next_image`](Self::acquire_next_image).
    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    fn destroy_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            debug!("Swapchain destroyed");
        }
    }
}

/// B8G8R8A8_UNORM first: the draw image is blitted in as-is, so no sRGB
/// encode should happen on write. Then B8G8R8A8_SRGB, then whatever is first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let srgb_nonlinear = |format: vk::Format| {
        formats
            .iter()
            .copied()
            .find(|f| f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
    };

    srgb_nonlinear(vk::Format::B8G8R8A8_UNORM).or_else(|| {
        let fallback = srgb_nonlinear(vk::Format::B8G8R8A8_SRGB).or_else(|| formats.first().copied());
        if let Some(format) = fallback {
            warn!("Preferred surface format unavailable, using {:?}", format.format);
        }
        fallback
    })
}

/// MAILBOX when offered, otherwise FIFO, which every driver supports.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or the window size clamped to the
/// surface limits when the surface leaves it to us (`u32::MAX`).
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: width.clamp(min.width, max.width),
        height: height.clamp(min.height, max.height),
    }
}

/// One above the minimum, capped by the maximum (0 = no cap).
fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    match capabilities.max_image_count {
        0 => wanted,
        max => wanted.min(max),
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(crate::image::subresource_range(vk::ImageAspectFlags::COLOR));

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(e.into());
            }
        }
    }

    Ok(views)
}
