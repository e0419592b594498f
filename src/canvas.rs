//! Offscreen render target reused for every face of a bake.

use ash::vk;
use log::debug;

use crate::texture::Texture2D;
use crate::transitions::{ImageState, StageScope};
use crate::vulkan_context::GpuContext;

/// Tracks whether a canvas render pass is open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassTracker {
    recording: bool,
}

impl PassTracker {
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn begin(&mut self) {
        assert!(!self.recording, "canvas begin while already recording");
        self.recording = true;
    }

    pub fn end(&mut self) {
        assert!(self.recording, "canvas end without a matching begin");
        self.recording = false;
    }
}

/// A colour texture plus the render pass and framebuffer that draw into it.
///
/// The render pass leaves the texture in `ShaderReadOnly` after every `end`.
pub struct Canvas<'a> {
    ctx: &'a GpuContext,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    texture: Texture2D<'a>,
    pass: PassTracker,
}

impl<'a> Canvas<'a> {
    pub fn new(
        ctx: &'a GpuContext,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> Result<Self, String> {
        let device = &ctx.device;

        let texture = Texture2D::new(
            ctx,
            width,
            height,
            format,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            "canvas_color",
        )?;

        let color_attachment = vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let color_ref = vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_ref));

        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::MEMORY_READ)
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                .src_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        ];

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(std::slice::from_ref(&color_attachment))
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(&dependencies);

        let render_pass = unsafe {
            device
                .create_render_pass(&render_pass_info, None)
                .map_err(|e| format!("Failed to create canvas render pass: {:?}", e))?
        };

        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(std::slice::from_ref(&texture.view))
            .width(width)
            .height(height)
            .layers(1);

        let framebuffer = unsafe {
            match device.create_framebuffer(&framebuffer_info, None) {
                Ok(fb) => fb,
                Err(e) => {
                    device.destroy_render_pass(render_pass, None);
                    return Err(format!("Failed to create canvas framebuffer: {:?}", e));
                }
            }
        };

        debug!("Created canvas {}x{} {:?}", width, height, format);

        Ok(Canvas {
            ctx,
            render_pass,
            framebuffer,
            texture,
            pass: PassTracker::default(),
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.texture.extent()
    }

    pub fn image(&self) -> vk::Image {
        self.texture.image
    }

    pub fn state(&self) -> ImageState {
        self.texture.state()
    }

    pub fn is_recording(&self) -> bool {
        self.pass.is_recording()
    }

    /// Begin the render pass and set the full-extent viewport and scissor.
    pub fn begin(&mut self, cmd: vk::CommandBuffer) {
        self.pass.begin();

        let extent = self.extent();
        let device = &self.ctx.device;

        // The second value is a depth clear for a depth attachment the pass
        // does not have yet; Vulkan ignores entries past the attachment count.
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_begin = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .clear_values(&clear_values);

        let viewport = vk::Viewport::default()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);

        let scissor = vk::Rect2D::default().extent(extent);

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    /// End the render pass. The texture is left in `ShaderReadOnly`.
    pub fn end(&mut self, cmd: vk::CommandBuffer) {
        self.pass.end();
        unsafe {
            self.ctx.device.cmd_end_render_pass(cmd);
        }
        self.texture.set_state_from_render_pass(ImageState::ShaderReadOnly);
    }

    /// Record a transition of the canvas texture outside a render pass.
    pub fn transition(&mut self, cmd: vk::CommandBuffer, new: ImageState, stages: StageScope) {
        assert!(!self.pass.is_recording(), "canvas transition inside its render pass");
        self.texture.transition(cmd, new, stages);
    }

    /// Release all handles now instead of at scope end.
    pub fn destroy(self) {}
}

impl Drop for Canvas<'_> {
    fn drop(&mut self) {
        self.ctx.wait_idle();
        unsafe {
            self.ctx.device.destroy_framebuffer(self.framebuffer, None);
            self.ctx.device.destroy_render_pass(self.render_pass, None);
        }
        // texture is released after this, by its own Drop
    }
}
