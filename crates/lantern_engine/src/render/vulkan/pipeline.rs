//! Graphics pipeline creation
//!
//! [`PipelineConfig`] carries every fixed-function state block. Start from
//! [`PipelineConfig::default_config`], adjust fields, set the layout and
//! render pass, then build a [`GraphicsPipeline`]. Viewport and scissor are
//! dynamic, so pipelines survive swap chain recreation.

use ash::{vk, Device};
use std::ffi::CStr;
use std::path::Path;

use crate::render::model::Vertex;
use crate::render::vulkan::shader::ShaderModule;
use crate::render::vulkan::{VulkanError, VulkanResult};

const SHADER_ENTRY: &[u8] = b"main\0";

/// Fixed-function state of a graphics pipeline
#[derive(Clone)]
pub struct PipelineConfig {
    /// Vertex buffer bindings; empty for shaders that generate their own geometry
    pub binding_descriptions: Vec<vk::VertexInputBindingDescription>,
    /// Vertex attributes
    pub attribute_descriptions: Vec<vk::VertexInputAttributeDescription>,
    /// Primitive assembly
    pub input_assembly: vk::PipelineInputAssemblyStateCreateInfo,
    /// Rasterizer state
    pub rasterization: vk::PipelineRasterizationStateCreateInfo,
    /// Multisampling
    pub multisample: vk::PipelineMultisampleStateCreateInfo,
    /// Blending of the single color attachment
    pub color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    /// Depth and stencil testing
    pub depth_stencil: vk::PipelineDepthStencilStateCreateInfo,
    /// States set at record time
    pub dynamic_states: Vec<vk::DynamicState>,
    /// Layout; must be set before building
    pub pipeline_layout: vk::PipelineLayout,
    /// Render pass; must be set before building
    pub render_pass: vk::RenderPass,
    /// Subpass index inside `render_pass`
    pub subpass: u32,
}

impl PipelineConfig {
    /// Opaque triangle rendering with depth test and write, no culling
    pub fn default_config() -> Self {
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
            .build();

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false)
            .build();

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false)
            .build();

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ZERO)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build();

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false)
            .build();

        Self {
            binding_descriptions: Vertex::binding_descriptions(),
            attribute_descriptions: Vertex::attribute_descriptions(),
            input_assembly,
            rasterization,
            multisample,
            color_blend_attachment,
            depth_stencil,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            pipeline_layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,
        }
    }

    /// Blend color by source alpha, keep the source alpha
    #[must_use]
    pub fn enable_alpha_blending(mut self) -> Self {
        self.color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build();
        self
    }

    /// Drop all vertex input
    #[must_use]
    pub fn without_vertex_input(mut self) -> Self {
        self.binding_descriptions.clear();
        self.attribute_descriptions.clear();
        self
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout from descriptor set layouts and push constant ranges
    pub fn new(
        device: Device,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe {
            device
                .create_pipeline_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, layout })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Compile a pipeline from a vertex/fragment SPIR-V pair and `config`
    pub fn new(
        device: Device,
        vertex_shader_path: impl AsRef<Path>,
        fragment_shader_path: impl AsRef<Path>,
        config: &PipelineConfig,
    ) -> VulkanResult<Self> {
        if config.pipeline_layout == vk::PipelineLayout::null() {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot create graphics pipeline: no pipeline layout in config".to_string(),
            });
        }
        if config.render_pass == vk::RenderPass::null() {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot create graphics pipeline: no render pass in config".to_string(),
            });
        }

        let vertex_shader = ShaderModule::from_file(device.clone(), vertex_shader_path)?;
        let fragment_shader = ShaderModule::from_file(device.clone(), fragment_shader_path)?;

        let entry = CStr::from_bytes_with_nul(SHADER_ENTRY)
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader.handle())
                .name(entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader.handle())
                .name(entry)
                .build(),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&config.binding_descriptions)
            .vertex_attribute_descriptions(&config.attribute_descriptions);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let blend_attachments = [config.color_blend_attachment];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments)
            .blend_constants([0.0; 4]);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&config.dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&config.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&config.rasterization)
            .multisample_state(&config.multisample)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&config.depth_stencil)
            .dynamic_state(&dynamic_state)
            .layout(config.pipeline_layout)
            .render_pass(config.render_pass)
            .subpass(config.subpass)
            .base_pipeline_index(-1)
            .build();

        let pipeline = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        }
        .into_iter()
        .next()
        .ok_or_else(|| VulkanError::InitializationFailed("No pipeline returned".to_string()))?;

        log::debug!("Created graphics pipeline");
        Ok(Self { device, pipeline })
    }

    /// Bind for subsequent draws in `command_buffer`
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
    }

    /// Get the pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_opaque_with_depth() {
        let config = PipelineConfig::default_config();

        assert_eq!(config.input_assembly.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(config.rasterization.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(config.rasterization.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(config.multisample.rasterization_samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(config.color_blend_attachment.blend_enable, vk::FALSE);
        assert_eq!(config.depth_stencil.depth_test_enable, vk::TRUE);
        assert_eq!(config.depth_stencil.depth_write_enable, vk::TRUE);
        assert_eq!(config.depth_stencil.depth_compare_op, vk::CompareOp::LESS);
        assert_eq!(
            config.dynamic_states,
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
        assert_eq!(config.attribute_descriptions.len(), 4);
        assert_eq!(config.pipeline_layout, vk::PipelineLayout::null());
    }

    #[test]
    fn test_alpha_blending_factors() {
        let blend = PipelineConfig::default_config()
            .enable_alpha_blending()
            .color_blend_attachment;

        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(blend.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(blend.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(blend.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
        assert_eq!(blend.color_blend_op, vk::BlendOp::ADD);
        assert_eq!(blend.alpha_blend_op, vk::BlendOp::ADD);
    }

    #[test]
    fn test_without_vertex_input_clears_descriptions() {
        let config = PipelineConfig::default_config().without_vertex_input();
        assert!(config.binding_descriptions.is_empty());
        assert!(config.attribute_descriptions.is_empty());
    }
}
