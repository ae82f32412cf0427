//! Engine orchestration.
//!
//! Vulkan objects must be destroyed in reverse creation order:
//! 1. Per-frame deletion queues, then the global deletion queue
//! 2. UI overlay, immediate-submit channel, frame slots
//! 3. Swapchain
//! 4. Device (frees the allocator)
//! 5. Surface
//! 6. Instance
//!
//! `ManuallyDrop` keeps that order explicit; [`Engine::cleanup`] performs it
//! once, gated by a [`TeardownGate`].

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};
#[cfg(feature = "ui")]
use tracing::warn;

use sim_core::EngineConfig;
use sim_platform::{Surface, Window, WindowEvent};
use sim_rhi::command::{CommandBuffer, CommandRecorder};
use sim_rhi::deletion::{DeletionQueue, Disposable};
use sim_rhi::descriptor::{
    DescriptorAllocator, DescriptorLayoutBuilder, PoolSizeRatio, image_info, storage_image_write,
    update_descriptor_sets,
};
use sim_rhi::device::Device;
use sim_rhi::image::AllocatedImage;
use sim_rhi::immediate::ImmediateSubmit;
use sim_rhi::instance::Instance;
use sim_rhi::physical_device::select_physical_device;
use sim_rhi::swapchain::Swapchain;
use sim_rhi::RhiError;

use crate::FRAME_OVERLAP;
use crate::background::{BackgroundPipelines, EffectRegistry, record_background};
use crate::error::RendererResult;
use crate::frame::{FrameRing, FrameSlot, VulkanFrames, draw_frame};
#[cfg(feature = "ui")]
use crate::overlay::UiOverlay;
use crate::record::{FrameTargets, draw_extent, record_frame};
use crate::swapchain_state::SwapchainState;

/// Format of the offscreen image every effect writes to.
pub const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Descriptor sets the global pool is sized for.
const GLOBAL_DESCRIPTOR_SETS: u32 = 10;

pub fn draw_image_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::TRANSFER_SRC
        | vk::ImageUsageFlags::TRANSFER_DST
        | vk::ImageUsageFlags::STORAGE
        | vk::ImageUsageFlags::COLOR_ATTACHMENT
}

/// Armed once init succeeds. [`TeardownGate::disarm`] reports true exactly
/// once, so teardown cannot run twice.
#[derive(Debug)]
pub(crate) struct TeardownGate {
    armed: bool,
}

impl TeardownGate {
    pub(crate) fn armed() -> Self {
        Self { armed: true }
    }

    #[inline]
    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    /// Returns true if the caller should tear down.
    pub(crate) fn disarm(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }
}

pub struct Engine {
    instance: ManuallyDrop<Instance>,
    surface: ManuallyDrop<Surface>,
    device: ManuallyDrop<Arc<Device>>,
    swapchain: ManuallyDrop<Swapchain>,
    frames: ManuallyDrop<FrameRing<FrameSlot>>,
    immediate: ManuallyDrop<ImmediateSubmit>,
    #[cfg(feature = "ui")]
    overlay: Option<UiOverlay>,

    /// Resources living until shutdown.
    main_deletion_queue: DeletionQueue,

    draw_image: AllocatedImage,
    draw_image_descriptors: vk::DescriptorSet,
    effects: EffectRegistry,

    swapchain_state: SwapchainState,
    frame_number: u64,
    minimized: bool,
    teardown: TeardownGate,
}

impl Engine {
    /// Brings up every GPU object for `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the surface cannot
    /// be created, no GPU qualifies, or any Vulkan creation call fails.
    pub fn init(window: &Window, config: &EngineConfig) -> RendererResult<Self> {
        config.validate()?;
        let (width, height) = (window.width(), window.height());
        info!("Initializing engine ({}x{})", width, height);

        let surface_extensions = window.required_extensions()?;
        let instance = Instance::new(&config.app_name, config.enable_validation, &surface_extensions)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device_info)?;

        let swapchain = Swapchain::new(&instance, device.clone(), surface.handle(), width, height)?;

        let graphics_family = device.queue_families().graphics_family.ok_or_else(|| {
            RhiError::InvalidArgument("device has no graphics queue family".to_string())
        })?;
        let frames = FrameRing::new(|_| FrameSlot::new(device.clone(), graphics_family))?;
        let mut immediate = ImmediateSubmit::new(device.clone())?;

        // Anything queued before a failure is destroyed here; the RAII
        // objects above release themselves as the error propagates.
        let mut main_deletion_queue = DeletionQueue::new();
        let mut waited = false;
        let (draw_image, draw_image_descriptors, effects) = main_deletion_queue.fill_or_unwind(
            |queue| create_scene_resources(&device, &mut immediate, queue, config),
            |resource| {
                if !std::mem::replace(&mut waited, true)
                    && let Err(e) = device.wait_idle()
                {
                    error!("Wait idle before unwinding init failed: {:?}", e);
                }
                unsafe { resource.destroy(&device) }
            },
        )?;

        #[cfg(feature = "ui")]
        let overlay = match UiOverlay::new(device.clone(), window.inner(), swapchain.format()) {
            Ok(overlay) => Some(overlay),
            Err(e) => {
                warn!("Running without UI overlay: {}", e);
                None
            }
        };

        info!(
            "Engine initialized: {} swapchain images, {} frame slots, {} effects",
            swapchain.image_count(),
            FRAME_OVERLAP,
            effects.len()
        );

        Ok(Self {
            instance: ManuallyDrop::new(instance),
            surface: ManuallyDrop::new(surface),
            device: ManuallyDrop::new(device),
            swapchain: ManuallyDrop::new(swapchain),
            frames: ManuallyDrop::new(frames),
            immediate: ManuallyDrop::new(immediate),
            #[cfg(feature = "ui")]
            overlay,
            main_deletion_queue,
            draw_image,
            draw_image_descriptors,
            effects,
            swapchain_state: SwapchainState::Ready,
            frame_number: 0,
            minimized: false,
            teardown: TeardownGate::armed(),
        })
    }

    /// Renders one frame.
    ///
    /// Does nothing while minimized or after cleanup. A stale swapchain is
    /// rebuilt before drawing.
    ///
    /// # Errors
    ///
    /// Returns any GPU-call failure; callers treat these as fatal.
    pub fn draw(&mut self, window: &Window) -> RendererResult<()> {
        if !self.teardown.is_armed() || self.minimized {
            return Ok(());
        }

        if self.swapchain_state.needs_rebuild() {
            if window.is_minimized() {
                return Ok(());
            }
            self.rebuild_swapchain(window.width(), window.height())?;
        }

        #[cfg(feature = "ui")]
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.prepare(
                window.inner(),
                &mut self.effects,
                self.device.graphics_queue(),
                self.immediate.command_pool(),
            )?;
        }

        let slot = self.frames.slot_index(self.frame_number);
        let frame_number = self.frame_number;
        let draw_image = self.draw_image;
        let descriptor_set = self.draw_image_descriptors;
        let effects = &self.effects;
        let swapchain: &Swapchain = &self.swapchain;
        #[cfg(feature = "ui")]
        let mut overlay = self.overlay.as_mut();
        #[cfg_attr(not(feature = "ui"), allow(unused_mut))]
        let mut overlay_result: RendererResult<()> = Ok(());

        let mut backend = VulkanFrames {
            device: &self.device,
            swapchain,
            slots: &mut self.frames,
        };

        let outcome = draw_frame(&mut backend, slot, |cmd: &mut CommandBuffer, image_index| {
            let targets = FrameTargets {
                draw_image: draw_image.image,
                draw_extent: draw_extent(draw_image.extent_2d(), swapchain.extent()),
                swapchain_image: swapchain.image(image_index as usize),
                swapchain_view: swapchain.image_view(image_index as usize),
                swapchain_extent: swapchain.extent(),
            };

            let background = |cmd: &mut CommandBuffer| {
                record_background(
                    cmd,
                    effects.selected(),
                    draw_image.image,
                    descriptor_set,
                    targets.draw_extent,
                    frame_number,
                );
            };

            #[cfg(feature = "ui")]
            let ui = overlay.as_mut().map(|overlay| {
                let result = &mut overlay_result;
                move |cmd: &mut CommandBuffer| {
                    *result = overlay.record(cmd.handle(), targets.swapchain_extent);
                }
            });
            #[cfg(not(feature = "ui"))]
            let ui = None::<fn(&mut CommandBuffer)>;

            record_frame(cmd, &targets, background, ui);
            Ok(())
        })?;
        overlay_result?;

        // Textures egui freed this frame may still be sampled by the submitted
        // work, so they wait on this slot's fence.
        #[cfg(feature = "ui")]
        if outcome.advances_frame()
            && let Some(overlay) = self.overlay.as_mut()
        {
            overlay.retire_textures(&mut self.frames.get_mut(slot).deletion_queue);
        }

        if outcome.swapchain_stale() {
            self.swapchain_state.mark_stale();
        }
        if outcome.advances_frame() {
            self.frame_number += 1;
        }
        Ok(())
    }

    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> RendererResult<()> {
        if !self.swapchain_state.begin_rebuild() {
            return Ok(());
        }

        let result = self.recreate_swapchain(width, height);
        self.swapchain_state.finish_rebuild(result.is_ok());
        result
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> RendererResult<()> {
        self.device.wait_idle()?;

        self.swapchain
            .recreate(&self.instance, self.surface.handle(), width, height)?;

        // A skipped frame leaves its slot fence reset with nothing submitted.
        for slot in self.frames.iter_mut() {
            slot.rearm_fence(Arc::clone(&self.device))?;
        }

        debug!(
            "Swapchain rebuilt at {}x{}",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(())
    }

    /// Records a window size change. A zero size pauses rendering.
    pub fn resize(&mut self, width: u32, height: u32) {
        if !self.teardown.is_armed() {
            return;
        }
        if width == 0 || height == 0 {
            debug!("Window minimized, pausing rendering");
            self.minimized = true;
            return;
        }
        self.minimized = false;

        let extent = self.swapchain.extent();
        if width != extent.width || height != extent.height {
            debug!(
                "Resize triggered: {}x{} -> {}x{}",
                extent.width, extent.height, width, height
            );
            self.swapchain_state.mark_stale();
        }
    }

    pub fn set_minimized(&mut self, minimized: bool) {
        if self.minimized != minimized {
            debug!("Rendering {}", if minimized { "paused" } else { "resumed" });
        }
        self.minimized = minimized;
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Forwards input to the overlay. Returns true if the overlay consumed it.
    #[cfg_attr(not(feature = "ui"), allow(unused_variables))]
    pub fn handle_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        #[cfg(feature = "ui")]
        if let Some(overlay) = self.overlay.as_mut() {
            return overlay.on_window_event(window.inner(), event);
        }
        false
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn effects(&self) -> &EffectRegistry {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectRegistry {
        &mut self.effects
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.teardown.is_armed()
    }

    pub fn swapchain_state(&self) -> SwapchainState {
        self.swapchain_state
    }

    /// Destroys every GPU object. Later calls do nothing.
    pub fn cleanup(&mut self) {
        if !self.teardown.disarm() {
            return;
        }

        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during cleanup: {:?}", e);
        }

        unsafe {
            for slot in self.frames.iter_mut() {
                slot.deletion_queue.flush(&self.device);
            }
            self.main_deletion_queue.flush(&self.device);
        }

        #[cfg(feature = "ui")]
        if let Some(mut overlay) = self.overlay.take() {
            overlay.destroy();
        }

        // SAFETY: the teardown gate guards this block, so each field is dropped once
        // and never touched again.
        unsafe {
            ManuallyDrop::drop(&mut self.immediate);
            ManuallyDrop::drop(&mut self.frames);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Engine cleaned up after {} frames", self.frame_number);
    }
}

/// Creates the draw image, its descriptor set and the background pipelines,
/// queueing each on `queue`, and leaves the draw image cleared in GENERAL.
fn create_scene_resources(
    device: &Arc<Device>,
    immediate: &mut ImmediateSubmit,
    queue: &mut DeletionQueue,
    config: &EngineConfig,
) -> RendererResult<(AllocatedImage, vk::DescriptorSet, EffectRegistry)> {
    let (config_width, config_height) = config.window_extent();
    let (draw_image, allocation) = AllocatedImage::create(
        device,
        "draw image",
        vk::Extent3D {
            width: config_width,
            height: config_height,
            depth: 1,
        },
        DRAW_IMAGE_FORMAT,
        draw_image_usage(),
    )?;
    queue.push(Disposable::Image {
        image: draw_image.image,
        allocation,
    });
    queue.push(draw_image.view);

    let set_layout = DescriptorLayoutBuilder::new()
        .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
        .build(Arc::clone(device), vk::ShaderStageFlags::COMPUTE)?;
    let descriptor_allocator = DescriptorAllocator::init_pool(
        Arc::clone(device),
        GLOBAL_DESCRIPTOR_SETS,
        &[PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0)],
    )?;
    let draw_image_descriptors = descriptor_allocator.allocate(set_layout.handle())?;

    let image_infos = [image_info(draw_image.view, vk::ImageLayout::GENERAL)];
    update_descriptor_sets(
        device,
        &[storage_image_write(draw_image_descriptors, 0, &image_infos)],
    );

    let (pipelines, effects) = BackgroundPipelines::new(Arc::clone(device), set_layout.handle(), config)?;

    queue.push(Disposable::owned(descriptor_allocator));
    queue.push(Disposable::owned(set_layout));
    queue.push(Disposable::owned(pipelines));

    // Leave the draw image in GENERAL with defined contents.
    immediate.submit(|cmd| {
        cmd.transition_image(
            draw_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );
        cmd.clear_color_image(draw_image.image, vk::ImageLayout::GENERAL, [0.0, 0.0, 0.0, 1.0]);
    })?;

    Ok((draw_image, draw_image_descriptors, effects))
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cleanup();
    }
}
