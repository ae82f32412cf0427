//! Command recording for one frame.
//!
//! The scene is rendered into an offscreen draw image, then blitted to the
//! acquired swapchain image. The optional overlay is drawn directly on the
//! swapchain image before it is handed to presentation.

use ash::vk;

use sim_rhi::command::CommandRecorder;

/// Images a frame records against.
#[derive(Clone, Copy, Debug)]
pub struct FrameTargets {
    pub draw_image: vk::Image,
    /// Region of the draw image that is rendered and copied.
    pub draw_extent: vk::Extent2D,
    pub swapchain_image: vk::Image,
    pub swapchain_view: vk::ImageView,
    pub swapchain_extent: vk::Extent2D,
}

/// Records the full frame into `cmd`.
///
/// Layout sequence:
///
/// ```text
/// draw:      UNDEFINED -> GENERAL -> (background) -> TRANSFER_SRC_OPTIMAL
/// swapchain: UNDEFINED -> TRANSFER_DST_OPTIMAL -> (blit)
///            [-> COLOR_ATTACHMENT_OPTIMAL -> (overlay)] -> PRESENT_SRC_KHR
/// ```
///
/// The draw image's previous contents are discarded every frame.
pub fn record_frame<R, B, U>(cmd: &mut R, targets: &FrameTargets, background: B, overlay: Option<U>)
where
    R: CommandRecorder,
    B: FnOnce(&mut R),
    U: FnOnce(&mut R),
{
    cmd.transition_image(
        targets.draw_image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::GENERAL,
    );

    background(cmd);

    cmd.transition_image(
        targets.draw_image,
        vk::ImageLayout::GENERAL,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );
    cmd.transition_image(
        targets.swapchain_image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    cmd.copy_image_to_image(
        targets.draw_image,
        targets.swapchain_image,
        targets.draw_extent,
        targets.swapchain_extent,
    );

    match overlay {
        Some(draw_overlay) => {
            cmd.transition_image(
                targets.swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            );
            cmd.begin_rendering(targets.swapchain_view, targets.swapchain_extent);
            draw_overlay(cmd);
            cmd.end_rendering();
            cmd.transition_image(
                targets.swapchain_image,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            );
        }
        None => {
            cmd.transition_image(
                targets.swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            );
        }
    }
}

/// Draw extent for a frame: the draw image clamped to the swapchain.
pub fn draw_extent(draw_image: vk::Extent2D, swapchain: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: draw_image.width.min(swapchain.width),
        height: draw_image.height.min(swapchain.height),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Cmd {
        Transition(u64, vk::ImageLayout, vk::ImageLayout),
        Blit(u64, u64, vk::Extent2D, vk::Extent2D),
        Clear(u64, vk::ImageLayout, [f32; 4]),
        BindPipeline(u64),
        BindSet(u64, u64),
        Push(u64, Vec<u8>),
        Dispatch(u32, u32, u32),
        BeginRendering(u64, vk::Extent2D),
        EndRendering,
        Marker(&'static str),
    }

    /// Recorder that logs every call.
    #[derive(Default)]
    pub(crate) struct LogRecorder {
        pub cmds: Vec<Cmd>,
    }

    impl CommandRecorder for LogRecorder {
        fn transition_image(&mut self, image: vk::Image, current: vk::ImageLayout, new: vk::ImageLayout) {
            self.cmds.push(Cmd::Transition(image.as_raw(), current, new));
        }
        fn copy_image_to_image(
            &mut self,
            src: vk::Image,
            dst: vk::Image,
            src_size: vk::Extent2D,
            dst_size: vk::Extent2D,
        ) {
            self.cmds
                .push(Cmd::Blit(src.as_raw(), dst.as_raw(), src_size, dst_size));
        }
        fn clear_color_image(&mut self, image: vk::Image, layout: vk::ImageLayout, color: [f32; 4]) {
            self.cmds.push(Cmd::Clear(image.as_raw(), layout, color));
        }
        fn bind_compute_pipeline(&mut self, pipeline: vk::Pipeline) {
            self.cmds.push(Cmd::BindPipeline(pipeline.as_raw()));
        }
        fn bind_compute_descriptor_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
            self.cmds.push(Cmd::BindSet(layout.as_raw(), set.as_raw()));
        }
        fn push_compute_constants(&mut self, layout: vk::PipelineLayout, bytes: &[u8]) {
            self.cmds.push(Cmd::Push(layout.as_raw(), bytes.to_vec()));
        }
        fn dispatch(&mut self, x: u32, y: u32, z: u32) {
            self.cmds.push(Cmd::Dispatch(x, y, z));
        }
        fn begin_rendering(&mut self, view: vk::ImageView, extent: vk::Extent2D) {
            self.cmds.push(Cmd::BeginRendering(view.as_raw(), extent));
        }
        fn end_rendering(&mut self) {
            self.cmds.push(Cmd::EndRendering);
        }
    }

    const DRAW: u64 = 0x10;
    const SWAP: u64 = 0x20;
    const SWAP_VIEW: u64 = 0x21;

    fn targets() -> FrameTargets {
        FrameTargets {
            draw_image: vk::Image::from_raw(DRAW),
            draw_extent: vk::Extent2D {
                width: 1700,
                height: 900,
            },
            swapchain_image: vk::Image::from_raw(SWAP),
            swapchain_view: vk::ImageView::from_raw(SWAP_VIEW),
            swapchain_extent: vk::Extent2D {
                width: 1700,
                height: 900,
            },
        }
    }

    fn no_overlay() -> Option<fn(&mut LogRecorder)> {
        None
    }

    #[test]
    fn test_frame_without_overlay() {
        let mut rec = LogRecorder::default();
        let t = targets();
        record_frame(&mut rec, &t, |r| r.cmds.push(Cmd::Marker("background")), no_overlay());

        use vk::ImageLayout as L;
        assert_eq!(
            rec.cmds,
            vec![
                Cmd::Transition(DRAW, L::UNDEFINED, L::GENERAL),
                Cmd::Marker("background"),
                Cmd::Transition(DRAW, L::GENERAL, L::TRANSFER_SRC_OPTIMAL),
                Cmd::Transition(SWAP, L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
                Cmd::Blit(DRAW, SWAP, t.draw_extent, t.swapchain_extent),
                Cmd::Transition(SWAP, L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR),
            ]
        );
    }

    #[test]
    fn test_frame_with_overlay_renders_on_swapchain() {
        let mut rec = LogRecorder::default();
        let t = targets();
        record_frame(
            &mut rec,
            &t,
            |_| {},
            Some(|r: &mut LogRecorder| r.cmds.push(Cmd::Marker("overlay"))),
        );

        use vk::ImageLayout as L;
        assert_eq!(
            &rec.cmds[4..],
            &[
                Cmd::Transition(SWAP, L::TRANSFER_DST_OPTIMAL, L::COLOR_ATTACHMENT_OPTIMAL),
                Cmd::BeginRendering(SWAP_VIEW, t.swapchain_extent),
                Cmd::Marker("overlay"),
                Cmd::EndRendering,
                Cmd::Transition(SWAP, L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR),
            ]
        );
    }

    #[test]
    fn test_swapchain_ends_in_present_layout() {
        let mut rec = LogRecorder::default();
        record_frame(&mut rec, &targets(), |_| {}, no_overlay());

        let last_swap = rec
            .cmds
            .iter()
            .rev()
            .find_map(|c| match c {
                Cmd::Transition(SWAP, _, new) => Some(*new),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_swap, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_draw_extent_clamps_to_swapchain() {
        let draw = vk::Extent2D {
            width: 1700,
            height: 900,
        };
        let small = vk::Extent2D {
            width: 800,
            height: 1200,
        };
        assert_eq!(
            draw_extent(draw, small),
            vk::Extent2D {
                width: 800,
                height: 900
            }
        );
        assert_eq!(draw_extent(draw, draw), draw);
    }
}
