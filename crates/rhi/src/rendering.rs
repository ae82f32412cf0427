//! Dynamic rendering helpers (Vulkan 1.3).
//!
//! Only color attachments are needed: the UI pass draws straight onto the
//! swapchain image after the background has been blitted into it.

use ash::vk;

/// Color attachment info for `view`.
///
/// With `clear` set the attachment is cleared on load, otherwise its
/// current contents are kept. The result is always stored.
pub fn color_attachment_info(
    view: vk::ImageView,
    clear: Option<vk::ClearValue>,
    layout: vk::ImageLayout,
) -> vk::RenderingAttachmentInfo<'static> {
    let load_op = if clear.is_some() {
        vk::AttachmentLoadOp::CLEAR
    } else {
        vk::AttachmentLoadOp::LOAD
    };

    let info = vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(layout)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE);

    match clear {
        Some(value) => info.clear_value(value),
        None => info,
    }
}

/// Rendering info covering the full `extent` with the given color attachments.
pub fn rendering_info<'a>(
    extent: vk::Extent2D,
    color_attachments: &'a [vk::RenderingAttachmentInfo<'a>],
) -> vk::RenderingInfo<'a> {
    vk::RenderingInfo::default()
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        })
        .layer_count(1)
        .color_attachments(color_attachments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_color_attachment_loads_without_clear() {
        let view = vk::ImageView::from_raw(7);
        let info = color_attachment_info(view, None, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        assert_eq!(info.image_view, view);
        assert_eq!(info.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(info.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(info.image_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_color_attachment_clears_when_requested() {
        let clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 1.0, 1.0],
            },
        };
        let info = color_attachment_info(
            vk::ImageView::null(),
            Some(clear),
            vk::ImageLayout::GENERAL,
        );

        assert_eq!(info.load_op, vk::AttachmentLoadOp::CLEAR);
        let color = unsafe { info.clear_value.color.float32 };
        assert_eq!(color, [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_rendering_info_covers_extent() {
        let attachments = [color_attachment_info(
            vk::ImageView::null(),
            None,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )];
        let extent = vk::Extent2D {
            width: 1700,
            height: 900,
        };
        let info = rendering_info(extent, &attachments);

        assert_eq!(info.render_area.extent, extent);
        assert_eq!(info.render_area.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(info.layer_count, 1);
        assert_eq!(info.color_attachment_count, 1);
    }
}
