//! Tools for setting up the render pass, the graphics pipeline and the
//! framebuffers they draw into.

use std::ffi::CStr;
use std::io::Cursor;

use crate::{app::AppData, vertex::Vertex};
use ash::{vk, Device};
use color_eyre::{eyre::Context, Result};
use thiserror::Error;
use tracing::error;

/// SPIR-V compiled from `shaders/cube.wgsl` by the build script.
const CUBE_SHADER: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/cube.spv"));

/// Why building a pipeline (or one of its shader modules) failed.
#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("The pipeline description is invalid: {0}")]
    InvalidInput(vk::Result),
    #[error("Building the pipeline caused an internal error: {0}")]
    Internal(vk::Result),
    #[error("The pipeline configuration is unsupported: {0}")]
    Unsupported(vk::Result),
}

impl From<vk::Result> for PipelineError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_INVALID_SHADER_NV
            | vk::Result::ERROR_VALIDATION_FAILED_EXT
            | vk::Result::ERROR_INITIALIZATION_FAILED => Self::InvalidInput(result),
            vk::Result::ERROR_FEATURE_NOT_PRESENT
            | vk::Result::ERROR_FORMAT_NOT_SUPPORTED
            | vk::Result::ERROR_EXTENSION_NOT_PRESENT
            | vk::Result::ERROR_INCOMPATIBLE_DRIVER
            | vk::Result::PIPELINE_COMPILE_REQUIRED => Self::Unsupported(result),
            _ => Self::Internal(result),
        }
    }
}

/// Log a pipeline failure with its category before handing it up.
fn report(err: PipelineError) -> PipelineError {
    let category = match err {
        PipelineError::InvalidInput(_) => "invalid input",
        PipelineError::Internal(_) => "internal error",
        PipelineError::Unsupported(_) => "unsupported",
    };
    error!(category, %err, "Failed to build graphics pipeline");
    err
}

/// Create the render pass: a color attachment presented to the screen, and a
/// depth attachment that's thrown away at the end of the pass.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_render_pass(device: &Device, data: &mut AppData) -> Result<()> {
    let color_attachment = vk::AttachmentDescription::builder()
        // Color attachment format MUST match swapchain image format!!
        .format(data.swapchain_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    // Cleared to 1.0 on load; nobody reads it afterwards.
    let depth_attachment = vk::AttachmentDescription::builder()
        .format(data.depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_attachment_ref))
        .depth_stencil_attachment(&depth_attachment_ref);

    // Wait for the swapchain to stop reading the image, and for the previous
    // frame's depth writes, before clearing either.
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_stage_mask(stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let attachments = &[*color_attachment, *depth_attachment];
    let subpasses = &[*subpass];
    let dependencies = &[*dependency];
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    data.render_pass = device.create_render_pass(&info, None)?;

    Ok(())
}

/// Create the graphics pipeline drawing colored, depth-tested, back-face
/// culled triangles.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_pipeline(device: &Device, data: &mut AppData) -> Result<()> {
    let shader_module = create_shader_module(device, CUBE_SHADER).map_err(report)?;

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(shader_module)
        .name(CStr::from_bytes_with_nul(b"vertex_main\0")?);
    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(shader_module)
        .name(CStr::from_bytes_with_nul(b"fragment_main\0")?);

    let binding_descriptions = &[Vertex::binding_description()];
    let attribute_descriptions = Vertex::attribute_descriptions();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Take up the entire rendering surface for the viewport
    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(data.swapchain_extent.width as f32)
        .height(data.swapchain_extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0);

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(data.swapchain_extent);

    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(std::slice::from_ref(&viewport))
        .scissors(std::slice::from_ref(&scissor));

    // The shaders flip Y back to the usual Y-up convention, so front faces
    // are counter-clockwise on screen.
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Keep the nearest fragment.
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    // Opaque geometry, so no blending.
    let attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false);

    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(std::slice::from_ref(&attachment))
        .blend_constants([0.0, 0.0, 0.0, 0.0]);

    let set_layouts = &[data.descriptor_set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);

    data.pipeline_layout = device.create_pipeline_layout(&layout_info, None)?;

    let stages = &[*vert_stage, *frag_stage];
    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .layout(data.pipeline_layout)
        .render_pass(data.render_pass)
        .subpass(0);

    let result = device.create_graphics_pipelines(vk::PipelineCache::null(), &[*info], None);

    // The module is only needed while the pipeline is being built.
    device.destroy_shader_module(shader_module, None);

    data.pipeline = result
        .map_err(|(_, err)| report(PipelineError::from(err)))
        .wrap_err("Failed to create graphics pipeline")?[0];

    Ok(())
}

/// Create a shader module from SPIR-V bytecode.
unsafe fn create_shader_module(
    device: &Device,
    bytecode: &[u8],
) -> Result<vk::ShaderModule, PipelineError> {
    // Copies into a u32-aligned buffer, checking the magic number on the way.
    let code = ash::util::read_spv(&mut Cursor::new(bytecode))
        .map_err(|_| PipelineError::InvalidInput(vk::Result::ERROR_INVALID_SHADER_NV))?;

    let info = vk::ShaderModuleCreateInfo::builder().code(&code);

    Ok(device.create_shader_module(&info, None)?)
}

/// Create a framebuffer for every image in the swapchain, sharing the single
/// depth buffer.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_framebuffers(device: &Device, data: &mut AppData) -> Result<()> {
    data.framebuffers = data
        .swapchain_image_views
        .iter()
        .map(|i| {
            let attachments = &[*i, data.depth_image_view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(data.render_pass)
                .attachments(attachments)
                .width(data.swapchain_extent.width)
                .height(data.swapchain_extent.height)
                .layers(1);

            device.create_framebuffer(&create_info, None)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_are_sorted_into_categories() {
        assert!(matches!(
            PipelineError::from(vk::Result::ERROR_INVALID_SHADER_NV),
            PipelineError::InvalidInput(_)
        ));
        assert!(matches!(
            PipelineError::from(vk::Result::ERROR_FORMAT_NOT_SUPPORTED),
            PipelineError::Unsupported(_)
        ));
        assert!(matches!(
            PipelineError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            PipelineError::Internal(_)
        ));
    }

    #[test]
    fn embedded_shader_is_spirv() {
        let code = ash::util::read_spv(&mut Cursor::new(CUBE_SHADER)).unwrap();
        assert_eq!(code[0], 0x0723_0203);
    }
}
