//! The presentation window and its Vulkan surface.

use std::ffi::{CStr, c_char};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use sim_core::{Error, Result};

/// `VkSurfaceKHR` destroyed on drop. The instance it was created from must
/// still be alive at that point.
pub struct Surface {
    raw: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.raw
    }

    /// Loader for capability, format and present-mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.raw, None) };
        debug!("surface destroyed");
    }
}

/// winit window plus the last known client size.
///
/// winit never attaches a GL context, which is the "no client API" mode a
/// Vulkan swapchain needs.
pub struct Window {
    window: WinitWindow,
    size: PhysicalSize<u32>,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let size = PhysicalSize::new(width, height);
        let window = event_loop
            .create_window(
                WindowAttributes::default()
                    .with_title(title)
                    .with_inner_size(size)
                    .with_resizable(true),
            )
            .map_err(|e| Error::Window(e.to_string()))?;

        info!(title, width, height, "window created");
        Ok(Self { window, size })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    /// Records the size from a `Resized` event.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = PhysicalSize::new(width, height);
    }

    /// Minimized windows report a zero-sized client area.
    pub fn is_minimized(&self) -> bool {
        self.size.width == 0 || self.size.height == 0
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions a surface for this window needs.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let (display, _) = self.raw_handles()?;
        required_extensions(display)
    }

    /// Bridges the window to a presentable surface. Failing here is a fatal
    /// startup error.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let (display, window) = self.raw_handles()?;

        // SAFETY: both raw handles belong to `self.window`, which outlives
        // this call, and the instance is live.
        let raw = unsafe { ash_window::create_surface(entry, instance, display, window, None) }
            .map_err(|e| Error::Vulkan(format!("surface creation failed: {e:?}")))?;

        info!("surface created");
        Ok(Surface {
            raw,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }

    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("no display handle: {e}")))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("no window handle: {e}")))?;
        Ok((display.as_raw(), window.as_raw()))
    }
}

/// Surface instance extensions for `display`. The pointers are static
/// strings owned by `ash_window`.
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| Error::Vulkan(format!("cannot enumerate surface extensions: {e:?}")))?;

    // SAFETY: ash_window only returns static NUL-terminated names.
    let names: Vec<&CStr> = extensions.iter().map(|&p| unsafe { CStr::from_ptr(p) }).collect();
    debug!(?names, "surface extensions");

    Ok(extensions.to_vec())
}
