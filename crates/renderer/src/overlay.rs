//! egui overlay for editing the background effects.
//!
//! The overlay is drawn with dynamic rendering straight onto the swapchain
//! image after the draw image has been blitted there.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ash::vk;
use egui_ash_renderer::{DynamicRendering, Options, Renderer};
use tracing::{debug, warn};
use winit::event::WindowEvent;
use winit::window::Window;

use sim_rhi::deletion::{DeletionQueue, Disposable};
use sim_rhi::device::Device;

use crate::FRAME_OVERLAP;
use crate::background::EffectRegistry;
use crate::error::{RendererError, RendererResult};

pub struct UiOverlay {
    ctx: egui::Context,
    winit_state: egui_winit::State,
    /// Dropped before `device`; it shares the device's allocator.
    renderer: Option<Renderer>,
    paint_jobs: Vec<egui::ClippedPrimitive>,
    pixels_per_point: f32,
    textures_to_set: Vec<(egui::TextureId, egui::epaint::ImageDelta)>,
    retirement: TextureRetirement,
    device: Arc<Device>,
}

impl UiOverlay {
    /// # Errors
    ///
    /// Returns [`RendererError::Overlay`] if the egui renderer cannot be created.
    pub fn new(
        device: Arc<Device>,
        window: &Window,
        color_format: vk::Format,
    ) -> RendererResult<Self> {
        let ctx = egui::Context::default();
        let winit_state = egui_winit::State::new(
            ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let renderer = Renderer::with_gpu_allocator(
            device.allocator().clone(),
            device.handle().clone(),
            DynamicRendering {
                color_attachment_format: color_format,
                depth_attachment_format: None,
            },
            Options {
                in_flight_frames: FRAME_OVERLAP,
                srgb_framebuffer: false,
                ..Default::default()
            },
        )
        .map_err(|e| RendererError::Overlay(e.to_string()))?;

        debug!("UI overlay created for {:?}", color_format);

        Ok(Self {
            ctx,
            winit_state,
            renderer: Some(renderer),
            paint_jobs: Vec::new(),
            pixels_per_point: 1.0,
            textures_to_set: Vec::new(),
            retirement: TextureRetirement::default(),
            device,
        })
    }

    /// Returns true when egui consumed the event.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.winit_state.on_window_event(window, event).consumed
    }

    /// Builds this frame's UI and uploads any new textures.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::Overlay`] if a texture upload fails.
    pub fn prepare(
        &mut self,
        window: &Window,
        effects: &mut EffectRegistry,
        queue: vk::Queue,
        command_pool: vk::CommandPool,
    ) -> RendererResult<()> {
        let raw_input = self.winit_state.take_egui_input(window);
        let output = self.ctx.run(raw_input, |ctx| effect_window(ctx, effects));

        self.winit_state
            .handle_platform_output(window, output.platform_output);
        self.paint_jobs = self.ctx.tessellate(output.shapes, output.pixels_per_point);
        self.pixels_per_point = output.pixels_per_point;
        self.textures_to_set.extend(output.textures_delta.set);
        self.retirement.defer(output.textures_delta.free);

        if self.textures_to_set.is_empty() {
            return Ok(());
        }
        if let Some(renderer) = self.renderer.as_mut() {
            renderer
                .set_textures(queue, command_pool, &self.textures_to_set)
                .map_err(|e| RendererError::Overlay(e.to_string()))?;
        }
        self.textures_to_set.clear();
        Ok(())
    }

    /// Draws the prepared UI. Must be called inside a rendering scope on the
    /// swapchain image, after this frame's slot has been waited on and its
    /// deletion queue flushed.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::Overlay`] if drawing or freeing fails.
    pub fn record(&mut self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) -> RendererResult<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        let released = self.retirement.take_released();
        if !released.is_empty() {
            renderer
                .free_textures(&released)
                .map_err(|e| RendererError::Overlay(e.to_string()))?;
        }

        renderer
            .cmd_draw(command_buffer, extent, self.pixels_per_point, &self.paint_jobs)
            .map_err(|e| RendererError::Overlay(e.to_string()))
    }

    /// Hands the textures freed since the last submit to the deletion queue of
    /// the slot that just submitted. They are freed once that slot comes round
    /// again and its fence has been waited on.
    pub fn retire_textures(&mut self, slot_queue: &mut DeletionQueue) {
        self.retirement.retire_into(slot_queue);
    }

    /// Releases the egui renderer. The device must be idle.
    pub fn destroy(&mut self) {
        if self.renderer.take().is_some() {
            debug!("UI overlay destroyed");
        }
    }
}

impl Drop for UiOverlay {
    fn drop(&mut self) {
        if self.renderer.is_some() {
            warn!("UiOverlay dropped without destroy()");
            if let Err(e) = self.device.wait_idle() {
                warn!("Wait idle before overlay drop failed: {}", e);
            }
        }
    }
}

/// Texture ids egui asked to free, tracked until no in-flight frame can
/// sample them.
#[derive(Default)]
struct TextureRetirement {
    /// Freed by egui but not yet covered by a submitted frame.
    pending: Vec<egui::TextureId>,
    /// Moved here when the owning slot's deletion queue is flushed.
    released: Rc<RefCell<Vec<egui::TextureId>>>,
}

impl TextureRetirement {
    fn defer(&mut self, ids: impl IntoIterator<Item = egui::TextureId>) {
        self.pending.extend(ids);
    }

    fn retire_into(&mut self, slot_queue: &mut DeletionQueue) {
        if self.pending.is_empty() {
            return;
        }
        slot_queue.push(Disposable::owned(RetiredTextures {
            ids: std::mem::take(&mut self.pending),
            released: Rc::clone(&self.released),
        }));
    }

    fn take_released(&mut self) -> Vec<egui::TextureId> {
        std::mem::take(&mut *self.released.borrow_mut())
    }
}

/// Deletion-queue entry that marks its textures free when destroyed.
struct RetiredTextures {
    ids: Vec<egui::TextureId>,
    released: Rc<RefCell<Vec<egui::TextureId>>>,
}

impl Drop for RetiredTextures {
    fn drop(&mut self) {
        self.released.borrow_mut().append(&mut self.ids);
    }
}

fn effect_window(ctx: &egui::Context, effects: &mut EffectRegistry) {
    egui::Window::new("Background").show(ctx, |ui| {
        let Some(name) = effects.selected().map(|e| e.name.clone()) else {
            ui.label("No effects loaded");
            return;
        };
        ui.label(format!("Selected effect: {}", name));

        let mut index = effects.current_index();
        let max = effects.len().saturating_sub(1);
        if ui
            .add(egui::Slider::new(&mut index, 0..=max).text("Effect Index"))
            .changed()
            && let Err(e) = effects.select(index)
        {
            warn!("{}", e);
        }

        if let Some(effect) = effects.selected_mut() {
            for (i, row) in effect.data.rows_mut().into_iter().enumerate() {
                ui.horizontal(|ui| {
                    ui.label(format!("data{}", i + 1));
                    ui.add(egui::DragValue::new(&mut row.x).speed(0.01));
                    ui.add(egui::DragValue::new(&mut row.y).speed(0.01));
                    ui.add(egui::DragValue::new(&mut row.z).speed(0.01));
                    ui.add(egui::DragValue::new(&mut row.w).speed(0.01));
                });
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameRing;

    fn texture(id: u64) -> egui::TextureId {
        egui::TextureId::Managed(id)
    }

    /// Frame loop without a GPU: wait on the slot, flush its queue, record
    /// (which frees released textures), submit, then retire.
    struct Frames {
        queues: FrameRing<DeletionQueue>,
        retirement: TextureRetirement,
        freed: Vec<(u64, egui::TextureId)>,
    }

    impl Frames {
        fn new() -> Self {
            Self {
                queues: FrameRing::new(|_| Ok::<_, ()>(DeletionQueue::new())).unwrap(),
                retirement: TextureRetirement::default(),
                freed: Vec::new(),
            }
        }

        fn frame(&mut self, frame: u64, egui_frees: &[egui::TextureId]) {
            self.retirement.defer(egui_frees.iter().copied());
            let slot = self.queues.slot_index(frame);
            self.queues.get_mut(slot).flush_with(drop);
            for id in self.retirement.take_released() {
                self.freed.push((frame, id));
            }
            self.retirement.retire_into(self.queues.get_mut(slot));
        }
    }

    #[test]
    fn test_texture_freed_after_slot_comes_round() {
        let mut frames = Frames::new();

        frames.frame(0, &[texture(7)]);
        frames.frame(1, &[]);
        assert!(frames.freed.is_empty());

        frames.frame(2, &[]);
        assert_eq!(frames.freed, vec![(2, texture(7))]);
    }

    #[test]
    fn test_texture_not_freed_while_other_slot_in_flight() {
        let mut frames = Frames::new();

        frames.frame(0, &[]);
        frames.frame(1, &[texture(3)]);
        frames.frame(2, &[texture(4)]);
        assert!(frames.freed.is_empty());

        frames.frame(3, &[]);
        assert_eq!(frames.freed, vec![(3, texture(3))]);

        frames.frame(4, &[]);
        assert_eq!(frames.freed, vec![(3, texture(3)), (4, texture(4))]);
    }

    #[test]
    fn test_unsubmitted_frees_stay_pending() {
        let mut retirement = TextureRetirement::default();
        retirement.defer([texture(1), texture(2)]);

        assert!(retirement.take_released().is_empty());
        assert_eq!(retirement.pending.len(), 2);
    }

    #[test]
    fn test_retire_with_nothing_pending_queues_nothing() {
        let mut retirement = TextureRetirement::default();
        let mut queue = DeletionQueue::new();

        retirement.retire_into(&mut queue);

        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_flush_releases_textures() {
        let mut retirement = TextureRetirement::default();
        let mut queue = DeletionQueue::new();
        retirement.defer([texture(9)]);

        retirement.retire_into(&mut queue);
        assert_eq!(queue.len(), 1);
        assert!(retirement.take_released().is_empty());

        queue.flush_with(drop);
        assert_eq!(retirement.take_released(), vec![texture(9)]);
    }
}
