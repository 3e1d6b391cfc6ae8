//! Opaque mesh pass
//!
//! Draws every object that has a model. Per draw it pushes the model matrix
//! and the normal matrix; camera and lights come from the global set.

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use crate::core::config::ShaderConfig;
use crate::foundation::math::{mat3_to_mat4, mat4_to_cols};
use crate::render::frame::FrameInfo;
use crate::render::systems::{bind_global_set, push_constant_range, push_constants};
use crate::render::vulkan::{
    GraphicsPipeline, PipelineConfig, PipelineLayout, VulkanContext, VulkanResult,
};
use crate::scene::Transform;

/// Per-draw constants of the geometry shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GeometryPushConstants {
    /// Object to world
    pub model_matrix: [[f32; 4]; 4],
    /// Normal transform, upper 3x3 used
    pub normal_matrix: [[f32; 4]; 4],
}

impl GeometryPushConstants {
    /// Constants for an object placed by `transform`
    pub fn from_transform(transform: &Transform) -> Self {
        Self {
            model_matrix: mat4_to_cols(&transform.mat4()),
            normal_matrix: mat4_to_cols(&mat3_to_mat4(&transform.normal_matrix())),
        }
    }
}

/// Opaque geometry pass
pub struct GeometrySystem {
    device: Device,
    pipeline: GraphicsPipeline,
    pipeline_layout: PipelineLayout,
}

impl GeometrySystem {
    /// Build the pipeline for `render_pass` reading the global set laid out by `global_set_layout`
    pub fn new(
        context: &VulkanContext,
        render_pass: vk::RenderPass,
        global_set_layout: vk::DescriptorSetLayout,
        shaders: &ShaderConfig,
    ) -> VulkanResult<Self> {
        let device = context.device().clone();
        let pipeline_layout = PipelineLayout::new(
            device.clone(),
            &[global_set_layout],
            &[push_constant_range::<GeometryPushConstants>()],
        )?;

        let mut config = PipelineConfig::default_config();
        config.render_pass = render_pass;
        config.pipeline_layout = pipeline_layout.handle();

        let pipeline = GraphicsPipeline::new(
            device.clone(),
            &shaders.vertex_shader_path,
            &shaders.fragment_shader_path,
            &config,
        )?;

        log::info!("Geometry system ready");
        Ok(Self {
            device,
            pipeline,
            pipeline_layout,
        })
    }

    /// Record one draw per object that has a model
    pub fn render(&self, frame: &FrameInfo<'_>) -> VulkanResult<()> {
        frame.uniforms.ensure_flushed()?;

        self.pipeline.bind(frame.command_buffer);
        bind_global_set(
            &self.device,
            frame.command_buffer,
            &self.pipeline_layout,
            frame.global_descriptor_set,
        );

        for object in frame.game_objects.values() {
            let Some(model) = &object.model else {
                continue;
            };

            let push = GeometryPushConstants::from_transform(&object.transform);
            push_constants(&self.device, frame.command_buffer, &self.pipeline_layout, &push);
            model.bind(frame.command_buffer);
            model.draw(frame.command_buffer);
        }
        Ok(())
    }
}
