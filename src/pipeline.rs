//! Graphics pipeline and descriptor set for one bake.

use ash::vk;
use log::{debug, warn};

use crate::camera::CameraUniform;
use crate::spv_loader;
use crate::vulkan_context::GpuContext;

/// Vertices of the procedural cube drawn per face (12 triangles).
pub const CUBE_VERTEX_COUNT: u32 = 36;

/// Source-over alpha blending; plain writes when blending is unsupported.
pub fn color_blend_attachment(blend: bool) -> vk::PipelineColorBlendAttachmentState {
    let attachment = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA);

    if !blend {
        return attachment;
    }

    attachment
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD)
}

/// Push-constant range carrying one `CameraUniform`.
pub fn camera_push_range() -> vk::PushConstantRange {
    vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .offset(0)
        .size(CameraUniform::SIZE)
}

/// Everything bound while drawing the faces of one bake. Released on drop.
pub struct BakePass<'a> {
    ctx: &'a GpuContext,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    vert_module: vk::ShaderModule,
    frag_module: vk::ShaderModule,
}

impl<'a> BakePass<'a> {
    /// Build the pipeline for `render_pass` and bind the source image at
    /// binding 0. The source must already be in `ShaderReadOnly`.
    pub fn new(
        ctx: &'a GpuContext,
        render_pass: vk::RenderPass,
        vert_code: &[u32],
        frag_code: &[u32],
        source_view: vk::ImageView,
        source_sampler: vk::Sampler,
    ) -> Result<Self, String> {
        let device = &ctx.device;

        let mut pass = BakePass {
            ctx,
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_set: vk::DescriptorSet::null(),
            vert_module: vk::ShaderModule::null(),
            frag_module: vk::ShaderModule::null(),
        };

        pass.vert_module = spv_loader::create_shader_module(device, vert_code)?;
        pass.frag_module = spv_loader::create_shader_module(device, frag_code)?;

        // --- Descriptor set ---
        let set_layouts = [ctx.bake_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(ctx.descriptor_pool)
            .set_layouts(&set_layouts);

        pass.descriptor_set = unsafe {
            device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| format!("Failed to allocate bake descriptor set: {:?}", e))?[0]
        };

        let image_info = vk::DescriptorImageInfo::default()
            .sampler(source_sampler)
            .image_view(source_view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let write = vk::WriteDescriptorSet::default()
            .dst_set(pass.descriptor_set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(&image_info));

        unsafe {
            device.update_descriptor_sets(&[write], &[]);
        }

        // --- Layout ---
        let push_ranges = [camera_push_range()];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);

        pass.pipeline_layout = unsafe {
            device
                .create_pipeline_layout(&pipeline_layout_info, None)
                .map_err(|e| format!("Failed to create bake pipeline layout: {:?}", e))?
        };

        // --- Pipeline ---
        let entry_name = c"main";

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(pass.vert_module)
                .name(entry_name),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(pass.frag_module)
                .name(entry_name),
        ];

        // Cube corners are generated from gl_VertexIndex
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .back(vk::StencilOpState::default().compare_op(vk::CompareOp::ALWAYS));

        if !ctx.hdr_blend_supported {
            warn!("Bake pipeline created without blending");
        }
        let color_blend_attachments = [color_blend_attachment(ctx.hdr_blend_supported)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(pass.pipeline_layout)
            .render_pass(render_pass)
            .subpass(0);

        pass.pipeline = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| format!("Failed to create bake pipeline: {:?}", e))?[0]
        };

        debug!("Bake pipeline ready");

        Ok(pass)
    }

    /// Bind the pipeline and set, push `camera` and draw the cube.
    pub fn draw(&self, cmd: vk::CommandBuffer, camera: &CameraUniform) {
        let device = &self.ctx.device;
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[self.descriptor_set],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(camera),
            );
            device.cmd_draw(cmd, CUBE_VERTEX_COUNT, 1, 0, 0);
        }
    }
}

impl Drop for BakePass<'_> {
    fn drop(&mut self) {
        let device = &self.ctx.device;
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            if self.descriptor_set != vk::DescriptorSet::null() {
                if let Err(e) =
                    device.free_descriptor_sets(self.ctx.descriptor_pool, &[self.descriptor_set])
                {
                    warn!("Failed to free bake descriptor set: {:?}", e);
                }
            }
            if self.frag_module != vk::ShaderModule::null() {
                device.destroy_shader_module(self.frag_module, None);
            }
            if self.vert_module != vk::ShaderModule::null() {
                device.destroy_shader_module(self.vert_module, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blending_is_source_over() {
        let state = color_blend_attachment(true);
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    fn factor(f: vk::BlendFactor, src: [f32; 4], dst: [f32; 4]) -> f32 {
        match f {
            vk::BlendFactor::ZERO => 0.0,
            vk::BlendFactor::ONE => 1.0,
            vk::BlendFactor::SRC_ALPHA => src[3],
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA => 1.0 - src[3],
            vk::BlendFactor::DST_ALPHA => dst[3],
            vk::BlendFactor::ONE_MINUS_DST_ALPHA => 1.0 - dst[3],
            other => panic!("unexpected blend factor {:?}", other),
        }
    }

    /// Evaluate an ADD blend state for one fragment over one texel.
    fn blend(
        state: &vk::PipelineColorBlendAttachmentState,
        src: [f32; 4],
        dst: [f32; 4],
    ) -> [f32; 4] {
        assert_eq!(state.color_blend_op, vk::BlendOp::ADD);
        assert_eq!(state.alpha_blend_op, vk::BlendOp::ADD);
        let sc = factor(state.src_color_blend_factor, src, dst);
        let dc = factor(state.dst_color_blend_factor, src, dst);
        let sa = factor(state.src_alpha_blend_factor, src, dst);
        let da = factor(state.dst_alpha_blend_factor, src, dst);
        [
            src[0] * sc + dst[0] * dc,
            src[1] * sc + dst[1] * dc,
            src[2] * sc + dst[2] * dc,
            src[3] * sa + dst[3] * da,
        ]
    }

    #[test]
    fn opaque_fragment_over_clear_colour_stays_opaque() {
        let state = color_blend_attachment(true);
        let out = blend(&state, [0.5, 0.5, 0.5, 1.0], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(out, [0.5, 0.5, 0.5, 1.0]);
    }

    #[test]
    fn translucent_fragment_composites_over_opaque_target() {
        let state = color_blend_attachment(true);
        let out = blend(&state, [1.0, 0.0, 0.0, 0.25], [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(out, [0.25, 0.0, 0.75, 1.0]);
    }

    #[test]
    fn unsupported_blending_falls_back_to_writes() {
        let state = color_blend_attachment(false);
        assert_eq!(state.blend_enable, vk::FALSE);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn push_range_holds_one_camera() {
        let range = camera_push_range();
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 128);
        assert!(range.stage_flags.contains(vk::ShaderStageFlags::FRAGMENT));
    }
}
