// Graphics pipeline creation and management
//
// Render pass, framebuffers and the fixed-function pipeline state for
// drawing directly into the swapchain's color attachment.

use anyhow::Result;
use ash::vk;

use super::error::RendererError;
use super::VulkanDevice;

/// Create the render pass: a single color attachment cleared on load and
/// kept for presentation, with one subpass.
///
/// The EXTERNAL -> 0 dependency holds color-attachment writes until the
/// acquire semaphore's wait stage is reached, so the subpass never writes an
/// image the presentation engine still owns.
pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .map_err(RendererError::creating("render pass"))?;

    Ok(render_pass)
}

/// Create one framebuffer per swapchain image view. Rebuilt whenever the
/// swapchain is recreated, since they bind to a specific extent and view.
pub fn create_framebuffers(
    device: &VulkanDevice,
    image_views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    image_views
        .iter()
        .map(|&image_view| {
            let attachments = &[image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer =
                unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
                    .map_err(RendererError::creating("framebuffer"))?;
            Ok(framebuffer)
        })
        .collect()
}

/// Create the fixed-function graphics pipeline.
///
/// No vertex input: the triangle's vertices are hardcoded in the vertex
/// shader. Viewport and scissor are dynamic and set per frame, so the
/// pipeline survives swapchain recreation.
pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
    // Shader stages, both entering at "main"
    let entry_point = std::ffi::CString::new("main")?;

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_shader)
        .name(&entry_point)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_shader)
        .name(&entry_point)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    // Vertex input: nothing to bind
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

    // Input assembly
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor are dynamic; only the counts are baked in
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    // Rasterization: standard opaque fill
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    // Multisampling (disabled)
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Color blending (no blending, opaque)
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    // Pipeline layout: no descriptors, no push constants
    let layout_info = vk::PipelineLayoutCreateInfo::builder();

    let pipeline_layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
        .map_err(RendererError::creating("pipeline layout"))?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(pipeline_layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device.device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            &[pipeline_info],
            None,
        )
    }
    .map_err(|(_, code)| RendererError::creating("graphics pipeline")(code))?;

    Ok((pipelines[0], pipeline_layout))
}
