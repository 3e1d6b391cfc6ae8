//! Point light pass
//!
//! [`PointLightSystem::update`] orbits the lights and copies them into the
//! frame's uniform block. After the block is flushed,
//! [`PointLightSystem::render`] draws one camera-facing quad per light,
//! farthest first so alpha blending composes correctly. The quad corners are
//! generated in the vertex shader, so no vertex buffer is bound.

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};
use nalgebra::Rotation3;

use crate::core::config::ShaderConfig;
use crate::foundation::math::{vec4_from, Vec3, Vector3};
use crate::render::frame::{FrameInfo, GlobalUbo, PointLightUbo, MAX_LIGHTS};
use crate::render::systems::{bind_global_set, push_constant_range, push_constants};
use crate::render::vulkan::{
    GraphicsPipeline, PipelineConfig, PipelineLayout, VulkanContext, VulkanError, VulkanResult,
};
use crate::scene::{GameObjectId, GameObjectMap};

/// Per-light constants of the billboard shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointLightPushConstants {
    /// World position, w = 1
    pub position: [f32; 4],
    /// RGB color, w is intensity
    pub color: [f32; 4],
    /// Billboard radius in world units
    pub radius: f32,
}

const QUAD_VERTEX_COUNT: u32 = 6;

/// Alpha-blended light billboards
pub struct PointLightSystem {
    device: Device,
    pipeline: GraphicsPipeline,
    pipeline_layout: PipelineLayout,
    orbit_speed: f32,
}

impl PointLightSystem {
    /// Build the pipeline for `render_pass`; lights orbit at `orbit_speed` radians per second
    pub fn new(
        context: &VulkanContext,
        render_pass: vk::RenderPass,
        global_set_layout: vk::DescriptorSetLayout,
        shaders: &ShaderConfig,
        orbit_speed: f32,
    ) -> VulkanResult<Self> {
        let device = context.device().clone();
        let pipeline_layout = PipelineLayout::new(
            device.clone(),
            &[global_set_layout],
            &[push_constant_range::<PointLightPushConstants>()],
        )?;

        let mut config = PipelineConfig::default_config()
            .without_vertex_input()
            .enable_alpha_blending();
        config.render_pass = render_pass;
        config.pipeline_layout = pipeline_layout.handle();

        let pipeline = GraphicsPipeline::new(
            device.clone(),
            &shaders.vertex_shader_path,
            &shaders.fragment_shader_path,
            &config,
        )?;

        log::info!("Point light system ready");
        Ok(Self {
            device,
            pipeline,
            pipeline_layout,
            orbit_speed,
        })
    }

    /// Orbit lights for this frame's elapsed time and load them into the uniform block
    pub fn update(&self, frame: &mut FrameInfo<'_>) -> VulkanResult<()> {
        let angle = self.orbit_speed * frame.frame_time;
        let ubo = frame.uniforms.ubo_mut()?;
        Self::update_lights(frame.game_objects, ubo, angle)?;
        Ok(())
    }

    /// Rotate every light by `angle` about the vertical axis and copy it into `ubo`
    ///
    /// Returns the number of lights written. More than [`MAX_LIGHTS`] lights is
    /// an error and leaves the light count untouched.
    pub fn update_lights(
        objects: &mut GameObjectMap,
        ubo: &mut GlobalUbo,
        angle: f32,
    ) -> VulkanResult<usize> {
        let light_count = objects.values().filter(|o| o.point_light.is_some()).count();
        if light_count > MAX_LIGHTS {
            return Err(VulkanError::LightCapacityExceeded { max: MAX_LIGHTS });
        }

        // Positive angles turn about -Y
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), -angle);
        let lights = objects
            .values_mut()
            .filter_map(|object| object.point_light.map(|light| (object, light)));

        for (index, (object, light)) in lights.enumerate() {
            object.transform.translation = rotation * object.transform.translation;
            ubo.set_point_light(
                index,
                PointLightUbo {
                    position: vec4_from(&object.transform.translation, 1.0),
                    color: vec4_from(&object.color, light.light_intensity),
                },
            )?;
        }

        ubo.set_light_count(light_count)?;
        Ok(light_count)
    }

    /// Light ids ordered farthest from `camera_position` first
    pub fn draw_order(
        camera_position: &Vec3,
        lights: impl IntoIterator<Item = (GameObjectId, Vec3)>,
    ) -> Vec<GameObjectId> {
        let mut by_distance: Vec<(f32, GameObjectId)> = lights
            .into_iter()
            .map(|(id, position)| ((position - camera_position).norm_squared(), id))
            .collect();
        by_distance.sort_by(|a, b| b.0.total_cmp(&a.0));
        by_distance.into_iter().map(|(_, id)| id).collect()
    }

    /// Record one billboard per light, back to front
    pub fn render(&self, frame: &FrameInfo<'_>) -> VulkanResult<()> {
        frame.uniforms.ensure_flushed()?;

        let lights = frame
            .game_objects
            .values()
            .filter(|object| object.point_light.is_some())
            .map(|object| (object.id(), object.transform.translation));
        let order = Self::draw_order(&frame.camera.position(), lights);

        self.pipeline.bind(frame.command_buffer);
        bind_global_set(
            &self.device,
            frame.command_buffer,
            &self.pipeline_layout,
            frame.global_descriptor_set,
        );

        for id in order {
            let Some(object) = frame.game_objects.get(&id) else {
                continue;
            };
            let Some(light) = object.point_light else {
                continue;
            };

            let push = PointLightPushConstants {
                position: vec4_from(&object.transform.translation, 1.0),
                color: vec4_from(&object.color, light.light_intensity),
                radius: object.transform.scale.x,
            };
            push_constants(&self.device, frame.command_buffer, &self.pipeline_layout, &push);
            unsafe {
                self.device
                    .cmd_draw(frame.command_buffer, QUAD_VERTEX_COUNT, 1, 0, 0);
            }
        }
        Ok(())
    }
}
