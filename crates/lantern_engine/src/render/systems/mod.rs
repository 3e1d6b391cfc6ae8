//! Render systems
//!
//! Each system owns a pipeline layout and pipeline built against the swap
//! chain's render pass and records its draws into the current frame.

pub mod geometry;
pub mod point_light;

pub use geometry::{GeometryPushConstants, GeometrySystem};
pub use point_light::{PointLightPushConstants, PointLightSystem};

use ash::vk;
use bytemuck::Pod;

use crate::render::vulkan::PipelineLayout;

/// Stages that see the push constants of both systems
pub(crate) const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags =
    vk::ShaderStageFlags::from_raw(
        vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
    );

/// Single push constant range covering all of `T`
pub(crate) fn push_constant_range<T: Pod>() -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: PUSH_CONSTANT_STAGES,
        offset: 0,
        size: std::mem::size_of::<T>() as u32,
    }
}

/// Record `value` as the push constants of `layout`
pub(crate) fn push_constants<T: Pod>(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    layout: &PipelineLayout,
    value: &T,
) {
    unsafe {
        device.cmd_push_constants(
            command_buffer,
            layout.handle(),
            PUSH_CONSTANT_STAGES,
            0,
            bytemuck::bytes_of(value),
        );
    }
}

/// Bind the frame's global descriptor set at set 0
pub(crate) fn bind_global_set(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    layout: &PipelineLayout,
    set: vk::DescriptorSet,
) {
    unsafe {
        device.cmd_bind_descriptor_sets(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            layout.handle(),
            0,
            &[set],
            &[],
        );
    }
}
