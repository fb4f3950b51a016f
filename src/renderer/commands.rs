//! Command buffer allocation and per-frame recording.

use super::devices::QueueFamilyIndices;
use crate::{app::AppData, stage::Stage, vertex::INDEX_TYPE, MAX_FRAMES_IN_FLIGHT};
use ash::{vk, Device, Entry, Instance};
use color_eyre::Result;

/// Create a command pool whose buffers can be reset and re-recorded one at a
/// time, since each frame records its slot's buffer from scratch.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_command_pool(
    entry: &Entry,
    instance: &Instance,
    device: &Device,
    data: &mut AppData,
) -> Result<()> {
    let qf_indices = QueueFamilyIndices::get(entry, instance, data, data.physical_device)?;

    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(qf_indices.graphics);

    data.command_pool = device.create_command_pool(&info, None)?;

    Ok(())
}

/// Allocate one command buffer per frame slot.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_command_buffers(device: &Device, data: &mut AppData) -> Result<()> {
    let allocate_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(data.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);

    data.command_buffers = device.allocate_command_buffers(&allocate_info)?;

    Ok(())
}

/// Record one frame into `slot`'s command buffer: a single render pass that
/// clears color and depth and, if the stage has geometry, issues one draw
/// reading the uniforms in `slot`.
///
/// The previous frame recorded into this buffer must have completed.
pub(crate) unsafe fn record_frame(
    device: &Device,
    data: &AppData,
    stage: Stage,
    image_index: usize,
    slot: usize,
) -> Result<vk::CommandBuffer> {
    let command_buffer = data.command_buffers[slot];

    device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;

    let info =
        vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(command_buffer, &info)?;

    // Render to the entire available image
    let render_area = vk::Rect2D::builder()
        .offset(vk::Offset2D::default())
        .extent(data.swapchain_extent);

    let color_clear_value = vk::ClearValue {
        color: vk::ClearColorValue {
            float32: stage.clear_color(),
        },
    };
    // Everything drawn is nearer than the far plane.
    let depth_clear_value = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
    };
    let clear_values = &[color_clear_value, depth_clear_value];

    let info = vk::RenderPassBeginInfo::builder()
        .render_pass(data.render_pass)
        .framebuffer(data.framebuffers[image_index])
        .render_area(*render_area)
        .clear_values(clear_values);
    device.cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);

    if let Some(mesh) = data.mesh {
        device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, data.pipeline);
        device.cmd_bind_vertex_buffers(command_buffer, 0, &[data.vertex_buffer], &[0]);
        device.cmd_bind_descriptor_sets(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            data.pipeline_layout,
            0,
            &[data.descriptor_set],
            &[data.uniform_ring.offset(slot)],
        );

        if mesh.indices.is_some() {
            device.cmd_bind_index_buffer(command_buffer, data.index_buffer, 0, INDEX_TYPE);
            device.cmd_draw_indexed(command_buffer, mesh.draw_count(), 1, 0, 0, 0);
        } else {
            device.cmd_draw(command_buffer, mesh.draw_count(), 1, 0, 0);
        }
    }

    device.cmd_end_render_pass(command_buffer);
    device.end_command_buffer(command_buffer)?;

    Ok(command_buffer)
}
