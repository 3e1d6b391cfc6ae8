//! Per-frame data shared by the render systems
//!
//! Every frame follows the same order: [`FrameUniforms::begin`] loads the
//! camera, systems write lights through [`FrameUniforms::ubo_mut`],
//! [`FrameUniforms::flush`] copies the block into the slot's uniform buffer,
//! and only then may systems record draws that read it. Writing after the
//! flush or drawing before it is rejected.

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{mat4_to_cols, Mat4};
use crate::render::vulkan::{Buffer, VulkanError, VulkanResult};
use crate::scene::{Camera, GameObjectMap};

/// Capacity of the point light array in [`GlobalUbo`]
pub const MAX_LIGHTS: usize = 10;

/// One point light as laid out in the uniform block
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PointLightUbo {
    /// World position, w ignored
    pub position: [f32; 4],
    /// RGB color, w is intensity
    pub color: [f32; 4],
}

/// Global uniform block, std140 compatible
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlobalUbo {
    /// Camera projection
    pub projection: [[f32; 4]; 4],
    /// Camera view
    pub view: [[f32; 4]; 4],
    /// RGB ambient color, w is intensity
    pub ambient_light_color: [f32; 4],
    /// Active lights occupy the first `num_lights` entries
    pub point_lights: [PointLightUbo; MAX_LIGHTS],
    /// Number of active lights
    pub num_lights: i32,
    _padding: [i32; 3],
}

impl Default for GlobalUbo {
    fn default() -> Self {
        let identity = mat4_to_cols(&Mat4::identity());
        Self {
            projection: identity,
            view: identity,
            ambient_light_color: [1.0, 1.0, 1.0, 0.02],
            point_lights: [PointLightUbo::default(); MAX_LIGHTS],
            num_lights: 0,
            _padding: [0; 3],
        }
    }
}

impl GlobalUbo {
    /// Store light `index`, rejecting indices past [`MAX_LIGHTS`]
    pub fn set_point_light(&mut self, index: usize, light: PointLightUbo) -> VulkanResult<()> {
        let slot = self
            .point_lights
            .get_mut(index)
            .ok_or(VulkanError::LightCapacityExceeded { max: MAX_LIGHTS })?;
        *slot = light;
        Ok(())
    }

    /// Set the active light count
    pub fn set_light_count(&mut self, count: usize) -> VulkanResult<()> {
        if count > MAX_LIGHTS {
            return Err(VulkanError::LightCapacityExceeded { max: MAX_LIGHTS });
        }
        self.num_lights = i32::try_from(count).unwrap_or(i32::MAX);
        Ok(())
    }
}

/// Destination of the per-frame uniform block, one element per in-flight slot
pub trait UniformSink {
    /// Copy `data` into slot `index`
    fn write_slot(&mut self, data: &[u8], index: u32) -> VulkanResult<()>;
    /// Make slot `index` visible to the device
    fn flush_slot(&self, index: u32) -> VulkanResult<()>;
}

impl UniformSink for Buffer {
    fn write_slot(&mut self, data: &[u8], index: u32) -> VulkanResult<()> {
        self.write_to_index(data, index)
    }

    fn flush_slot(&self, index: u32) -> VulkanResult<()> {
        self.flush_index(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UniformPhase {
    Writing,
    Flushed,
}

/// CPU copy of the global uniform block plus where it is in the frame
#[derive(Debug, Clone)]
pub struct FrameUniforms {
    ubo: GlobalUbo,
    phase: UniformPhase,
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameUniforms {
    /// Empty block, open for writing
    pub fn new() -> Self {
        Self {
            ubo: GlobalUbo::default(),
            phase: UniformPhase::Writing,
        }
    }

    /// Start a new frame: load camera matrices and reopen the block for writing
    pub fn begin(&mut self, camera: &Camera) {
        self.ubo.projection = mat4_to_cols(camera.projection());
        self.ubo.view = mat4_to_cols(camera.view());
        self.ubo.num_lights = 0;
        self.phase = UniformPhase::Writing;
    }

    /// Read access, valid in any phase
    pub const fn ubo(&self) -> &GlobalUbo {
        &self.ubo
    }

    /// Write access; fails once the block has been flushed for this frame
    pub fn ubo_mut(&mut self) -> VulkanResult<&mut GlobalUbo> {
        match self.phase {
            UniformPhase::Writing => Ok(&mut self.ubo),
            UniformPhase::Flushed => Err(VulkanError::InvalidOperation {
                reason: "Frame uniforms were already flushed this frame".to_string(),
            }),
        }
    }

    /// Copy the block into `slot` of `sink` and flush it
    pub fn flush(&mut self, sink: &mut impl UniformSink, slot: u32) -> VulkanResult<()> {
        sink.write_slot(bytemuck::bytes_of(&self.ubo), slot)?;
        sink.flush_slot(slot)?;
        self.phase = UniformPhase::Flushed;
        Ok(())
    }

    /// Whether the block has been flushed this frame
    pub fn is_flushed(&self) -> bool {
        self.phase == UniformPhase::Flushed
    }

    /// Fail unless the block has been flushed this frame
    pub fn ensure_flushed(&self) -> VulkanResult<()> {
        if self.is_flushed() {
            Ok(())
        } else {
            Err(VulkanError::InvalidOperation {
                reason: "Frame uniforms must be flushed before recording draws".to_string(),
            })
        }
    }
}

/// Everything a render system needs to record one frame
pub struct FrameInfo<'a> {
    /// In-flight slot of this frame
    pub frame_index: usize,
    /// Seconds since the previous frame
    pub frame_time: f32,
    /// Command buffer being recorded
    pub command_buffer: vk::CommandBuffer,
    /// Active camera
    pub camera: &'a Camera,
    /// Descriptor set of this slot's uniform buffer
    pub global_descriptor_set: vk::DescriptorSet,
    /// Scene objects
    pub game_objects: &'a mut GameObjectMap,
    /// This frame's global uniform block
    pub uniforms: &'a mut FrameUniforms,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<(u32, usize)>,
        flushes: RefCell<Vec<u32>>,
    }

    impl UniformSink for RecordingSink {
        fn write_slot(&mut self, data: &[u8], index: u32) -> VulkanResult<()> {
            self.writes.push((index, data.len()));
            Ok(())
        }

        fn flush_slot(&self, index: u32) -> VulkanResult<()> {
            self.flushes.borrow_mut().push(index);
            Ok(())
        }
    }

    #[test]
    fn test_global_ubo_is_std140_sized() {
        // 2 mat4 + vec4 + 10 * 2 vec4 + int padded to 16
        assert_eq!(std::mem::size_of::<GlobalUbo>(), 64 + 64 + 16 + MAX_LIGHTS * 32 + 16);
        assert_eq!(std::mem::size_of::<GlobalUbo>() % 16, 0);
    }

    #[test]
    fn test_default_ambient_light() {
        let ubo = GlobalUbo::default();
        assert_relative_eq!(ubo.ambient_light_color[3], 0.02);
        assert_eq!(ubo.num_lights, 0);
    }

    #[test]
    fn test_light_cap_is_enforced() {
        let mut ubo = GlobalUbo::default();
        assert!(ubo.set_point_light(MAX_LIGHTS - 1, PointLightUbo::default()).is_ok());
        assert!(matches!(
            ubo.set_point_light(MAX_LIGHTS, PointLightUbo::default()),
            Err(VulkanError::LightCapacityExceeded { max: MAX_LIGHTS })
        ));
        assert!(ubo.set_light_count(MAX_LIGHTS + 1).is_err());
    }

    #[test]
    fn test_write_after_flush_is_rejected() {
        let mut uniforms = FrameUniforms::new();
        let mut sink = RecordingSink::default();

        assert!(uniforms.ensure_flushed().is_err());
        uniforms.ubo_mut().unwrap().num_lights = 3;
        uniforms.flush(&mut sink, 1).unwrap();

        assert!(uniforms.ensure_flushed().is_ok());
        assert!(uniforms.ubo_mut().is_err());
        assert_eq!(sink.writes, vec![(1, std::mem::size_of::<GlobalUbo>())]);
        assert_eq!(*sink.flushes.borrow(), vec![1]);
    }

    #[test]
    fn test_begin_reopens_and_loads_camera() {
        let mut camera = Camera::default();
        camera.set_orthographic_projection(-1.0, 1.0, -1.0, 1.0, 0.0, 1.0);

        let mut uniforms = FrameUniforms::new();
        let mut sink = RecordingSink::default();
        uniforms.ubo_mut().unwrap().num_lights = 4;
        uniforms.flush(&mut sink, 0).unwrap();

        uniforms.begin(&camera);
        assert!(!uniforms.is_flushed());
        assert_eq!(uniforms.ubo().num_lights, 0);
        assert_eq!(uniforms.ubo().projection, mat4_to_cols(camera.projection()));
        assert!(uniforms.ubo_mut().is_ok());
    }
}
