//! Frame orchestration
//!
//! [`Renderer`] drives one frame at a time:
//!
//! ```text
//! begin_frame -> begin_swap_chain_render_pass -> (draws) -> end_swap_chain_render_pass -> end_frame
//! ```
//!
//! `begin_frame` returns `None` when the swap chain had to be rebuilt; the
//! caller skips that iteration. Both the renderer and the swap chain count
//! in-flight slots; each advances exactly once per completed frame, and a
//! rebuilt chain continues from its predecessor's slot, so the two never
//! drift apart.

use ash::vk;
use std::sync::Arc;

use crate::render::vulkan::window::wait_for_drawable_extent;
use crate::render::vulkan::{
    PresentStatus, SurfaceSource, SwapChain, VulkanContext, VulkanError,
    VulkanResult, MAX_FRAMES_IN_FLIGHT,
};

const CLEAR_COLOR: [f32; 4] = [0.1, 0.1, 0.1, 1.0];

/// Frame state: open or not, which slot and which image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameCycle {
    frame_index: usize,
    image_index: u32,
    frame_started: bool,
}

impl FrameCycle {
    /// Idle at slot 0
    pub const fn new() -> Self {
        Self {
            frame_index: 0,
            image_index: 0,
            frame_started: false,
        }
    }

    /// Fail if a frame is open
    pub fn ensure_idle(&self) -> VulkanResult<()> {
        if self.frame_started {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot begin a frame while one is already in progress".to_string(),
            });
        }
        Ok(())
    }

    /// Fail unless a frame is open
    pub fn ensure_started(&self) -> VulkanResult<()> {
        if !self.frame_started {
            return Err(VulkanError::InvalidOperation {
                reason: "No frame is in progress".to_string(),
            });
        }
        Ok(())
    }

    /// Open a frame rendering into `image_index`
    pub fn begin(&mut self, image_index: u32) -> VulkanResult<()> {
        self.ensure_idle()?;
        self.image_index = image_index;
        self.frame_started = true;
        Ok(())
    }

    /// Close the frame and move to the next in-flight slot
    pub fn finish(&mut self) -> VulkanResult<()> {
        self.ensure_started()?;
        self.frame_started = false;
        self.frame_index = (self.frame_index + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(())
    }

    /// In-flight slot of the current or next frame
    pub const fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Swap chain image of the open frame
    pub const fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Whether a frame is open
    pub const fn is_started(&self) -> bool {
        self.frame_started
    }
}

/// Decide whether presentation requires a new chain, consuming a pending resize
pub fn take_recreation_request(status: PresentStatus, surface: &mut impl SurfaceSource) -> bool {
    let resized = surface.was_resized();
    if resized {
        surface.reset_resized_flag();
    }
    status.needs_recreation() || resized
}

/// Owns the swap chain and one command buffer per in-flight slot
pub struct Renderer {
    command_buffers: Vec<vk::CommandBuffer>,
    swap_chain: Option<SwapChain>,
    cycle: FrameCycle,
    context: Arc<VulkanContext>,
}

impl Renderer {
    /// Build the first swap chain and allocate command buffers
    pub fn new(context: Arc<VulkanContext>, surface: &mut impl SurfaceSource) -> VulkanResult<Self> {
        let mut renderer = Self {
            command_buffers: Vec::new(),
            swap_chain: None,
            cycle: FrameCycle::new(),
            context,
        };
        renderer.recreate_swap_chain(surface)?;
        renderer.create_command_buffers()?;
        Ok(renderer)
    }

    fn create_command_buffers(&mut self) -> VulkanResult<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.context.command_pool())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);

        self.command_buffers = unsafe {
            self.context
                .device()
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
        };
        log::debug!("Allocated {} frame command buffers", self.command_buffers.len());
        Ok(())
    }

    /// Wait for a drawable surface, then rebuild the chain from its predecessor
    fn recreate_swap_chain(&mut self, surface: &mut impl SurfaceSource) -> VulkanResult<()> {
        let extent = wait_for_drawable_extent(surface);
        self.context.wait_idle()?;

        let context = Arc::clone(&self.context);
        let swap_chain = match self.swap_chain.take() {
            None => SwapChain::new(context, extent)?,
            Some(previous) => SwapChain::with_predecessor(context, extent, previous)?,
        };
        log::info!(
            "Swap chain ready: {}x{}, {} images",
            swap_chain.width(),
            swap_chain.height(),
            swap_chain.image_count()
        );
        self.swap_chain = Some(swap_chain);
        Ok(())
    }

    fn swap_chain(&self) -> VulkanResult<&SwapChain> {
        self.swap_chain
            .as_ref()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "Swap chain is missing".to_string(),
            })
    }

    fn swap_chain_mut(&mut self) -> VulkanResult<&mut SwapChain> {
        self.swap_chain
            .as_mut()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "Swap chain is missing".to_string(),
            })
    }

    /// Acquire an image and start recording
    ///
    /// Returns `None` when the chain was out of date and has been rebuilt; no
    /// frame is open in that case.
    pub fn begin_frame(
        &mut self,
        surface: &mut impl SurfaceSource,
    ) -> VulkanResult<Option<vk::CommandBuffer>> {
        self.cycle.ensure_idle()?;

        let acquire = self.swap_chain()?.acquire_next_image()?;
        let Some(image_index) = acquire.image_index() else {
            self.recreate_swap_chain(surface)?;
            return Ok(None);
        };

        self.cycle.begin(image_index)?;
        let command_buffer = self.current_command_buffer()?;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.context
                .device()
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        Ok(Some(command_buffer))
    }

    /// Finish recording, submit and present; rebuild the chain if it went stale
    pub fn end_frame(&mut self, surface: &mut impl SurfaceSource) -> VulkanResult<()> {
        let command_buffer = self.current_command_buffer()?;
        unsafe {
            self.context
                .device()
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)?;
        }

        let image_index = self.cycle.image_index();
        let status = self
            .swap_chain_mut()?
            .submit_command_buffers(command_buffer, image_index)?;

        if take_recreation_request(status, surface) {
            self.recreate_swap_chain(surface)?;
        }

        self.cycle.finish()
    }

    fn ensure_current(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        if command_buffer != self.current_command_buffer()? {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer belongs to a different frame".to_string(),
            });
        }
        Ok(())
    }

    /// Begin the swap chain render pass and set viewport and scissor to the chain extent
    pub fn begin_swap_chain_render_pass(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.ensure_current(command_buffer)?;

        let swap_chain = self.swap_chain()?;
        let image_index = self.cycle.image_index();
        let framebuffer = swap_chain
            .framebuffer(image_index as usize)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("No framebuffer for image {image_index}"),
            })?;
        let extent = swap_chain.extent();

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(swap_chain.render_pass())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let device = self.context.device();
        unsafe {
            device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
        Ok(())
    }

    /// End the swap chain render pass
    pub fn end_swap_chain_render_pass(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.ensure_current(command_buffer)?;
        unsafe {
            self.context.device().cmd_end_render_pass(command_buffer);
        }
        Ok(())
    }

    /// Command buffer of the open frame
    pub fn current_command_buffer(&self) -> VulkanResult<vk::CommandBuffer> {
        self.cycle.ensure_started()?;
        self.command_buffers
            .get(self.cycle.frame_index())
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "Frame command buffers were not allocated".to_string(),
            })
    }

    /// Whether a frame is open
    pub const fn is_frame_in_progress(&self) -> bool {
        self.cycle.is_started()
    }

    /// In-flight slot of the current or next frame
    pub const fn frame_index(&self) -> usize {
        self.cycle.frame_index()
    }

    /// Width over height of the swap chain, 1.0 before one exists
    pub fn aspect_ratio(&self) -> f32 {
        self.swap_chain
            .as_ref()
            .map_or(1.0, SwapChain::extent_aspect_ratio)
    }

    /// Render pass every pipeline must be compatible with
    pub fn swap_chain_render_pass(&self) -> VulkanResult<vk::RenderPass> {
        Ok(self.swap_chain()?.render_pass())
    }

    /// Current swap chain extent
    pub fn swap_chain_extent(&self) -> VulkanResult<vk::Extent2D> {
        Ok(self.swap_chain()?.extent())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if !self.command_buffers.is_empty() {
            unsafe {
                self.context
                    .device()
                    .free_command_buffers(self.context.command_pool(), &self.command_buffers);
            }
        }
        log::debug!("Renderer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::sync::tests::{recording_fences, RecordingFence};
    use crate::render::vulkan::window::tests::ScriptedSurface;
    use crate::render::vulkan::{FrameAcquire, InFlightFrames};

    /// Renderer and chain slot counters driven the way `begin_frame` and `end_frame` drive them
    struct FrameLoop {
        cycle: FrameCycle,
        frames: InFlightFrames<RecordingFence>,
        recreations: usize,
    }

    impl FrameLoop {
        fn new() -> Self {
            let (fences, _) = recording_fences(MAX_FRAMES_IN_FLIGHT);
            Self {
                cycle: FrameCycle::new(),
                frames: InFlightFrames::continuing::<RecordingFence>(fences, None).unwrap(),
                recreations: 0,
            }
        }

        fn recreate(&mut self) {
            let (fences, _) = recording_fences(MAX_FRAMES_IN_FLIGHT);
            self.frames = InFlightFrames::continuing(fences, Some(&self.frames)).unwrap();
            self.recreations += 1;
        }

        /// Run one iteration, returning the slot that recorded a frame
        fn frame(
            &mut self,
            acquire: FrameAcquire,
            status: PresentStatus,
            surface: &mut ScriptedSurface,
        ) -> Option<usize> {
            self.cycle.ensure_idle().unwrap();
            self.frames.wait_current().unwrap();
            let Some(image_index) = acquire.image_index() else {
                self.recreate();
                return None;
            };

            self.cycle.begin(image_index).unwrap();
            let slot = self.cycle.frame_index();
            assert_eq!(slot, self.frames.current());

            self.frames.advance();
            if take_recreation_request(status, surface) {
                self.recreate();
            }
            self.cycle.finish().unwrap();
            Some(slot)
        }
    }

    #[test]
    fn test_slot_returns_to_start_after_k_frames() {
        let mut cycle = FrameCycle::new();
        for image in 0..MAX_FRAMES_IN_FLIGHT as u32 {
            cycle.begin(image).unwrap();
            cycle.finish().unwrap();
        }
        assert_eq!(cycle.frame_index(), 0);
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut cycle = FrameCycle::new();
        cycle.begin(0).unwrap();
        assert!(cycle.begin(1).is_err());
        assert_eq!(cycle.image_index(), 0);
    }

    #[test]
    fn test_finish_without_begin_is_rejected() {
        let mut cycle = FrameCycle::new();
        assert!(cycle.finish().is_err());
        assert_eq!(cycle.frame_index(), 0);
    }

    #[test]
    fn test_skipped_frame_does_not_advance_slot() {
        // An out-of-date acquire returns before begin, so the slot stays put
        let mut cycle = FrameCycle::new();
        cycle.begin(2).unwrap();
        cycle.finish().unwrap();
        assert!(cycle.ensure_idle().is_ok());
        assert_eq!(cycle.frame_index(), 1);
        assert!(!cycle.is_started());
    }

    #[test]
    fn test_pending_resize_forces_recreation() {
        let mut surface = ScriptedSurface::new(&[(800, 600)]);
        surface.resized = true;

        assert!(take_recreation_request(PresentStatus::Presented, &mut surface));
        assert!(!surface.resized);
        assert!(!take_recreation_request(PresentStatus::Presented, &mut surface));
    }

    #[test]
    fn test_stale_presentation_forces_recreation() {
        let mut surface = ScriptedSurface::new(&[(800, 600)]);
        assert!(take_recreation_request(PresentStatus::OutOfDate, &mut surface));
        assert!(take_recreation_request(PresentStatus::Suboptimal, &mut surface));
    }

    #[test]
    fn test_minimized_then_restored_window_resumes() {
        let mut surface = ScriptedSurface::new(&[(0, 0), (0, 0), (800, 600)]);
        surface.resized = true;

        assert!(take_recreation_request(PresentStatus::Presented, &mut surface));
        let extent = wait_for_drawable_extent(&mut surface);

        assert_eq!((extent.width, extent.height), (800, 600));
        assert_eq!(surface.waits, 2);

        // Frames continue on the restored surface
        let mut cycle = FrameCycle::new();
        cycle.begin(0).unwrap();
        cycle.finish().unwrap();
        assert_eq!(cycle.frame_index(), 1);
    }

    #[test]
    fn test_slots_stay_in_step_across_resize() {
        let mut surface = ScriptedSurface::new(&[(800, 600)]);
        let mut frames = FrameLoop::new();
        let ready = FrameAcquire::Ready(0);

        let mut slots = Vec::new();
        slots.extend(frames.frame(ready, PresentStatus::Presented, &mut surface));
        surface.resized = true;
        slots.extend(frames.frame(ready, PresentStatus::Presented, &mut surface));
        slots.extend(frames.frame(ready, PresentStatus::Presented, &mut surface));
        slots.extend(frames.frame(ready, PresentStatus::Presented, &mut surface));

        assert_eq!(frames.recreations, 1);
        assert_eq!(slots, vec![0, 1, 0, 1]);
        assert!(!surface.resized);
    }

    #[test]
    fn test_out_of_date_acquire_skips_frame_without_advancing() {
        let mut surface = ScriptedSurface::new(&[(800, 600)]);
        let mut frames = FrameLoop::new();

        let first = frames.frame(FrameAcquire::Ready(0), PresentStatus::Presented, &mut surface);
        let skipped = frames.frame(FrameAcquire::OutOfDate, PresentStatus::Presented, &mut surface);
        assert_eq!(first, Some(0));
        assert_eq!(skipped, None);
        assert!(!frames.cycle.is_started());
        assert_eq!(frames.cycle.frame_index(), 1);
        assert_eq!(frames.frames.current(), 1);

        // The retry lands on the slot that was skipped
        let retry = frames.frame(FrameAcquire::Ready(1), PresentStatus::Presented, &mut surface);
        assert_eq!(retry, Some(1));
        assert_eq!(frames.recreations, 1);
    }

    #[test]
    fn test_stale_presentation_recreates_once_per_frame() {
        let mut surface = ScriptedSurface::new(&[(800, 600)]);
        surface.resized = true;
        let mut frames = FrameLoop::new();

        let slot = frames.frame(FrameAcquire::Suboptimal(2), PresentStatus::OutOfDate, &mut surface);
        assert_eq!(slot, Some(0));
        assert_eq!(frames.recreations, 1);
        assert!(!surface.resized);

        let slot = frames.frame(FrameAcquire::Ready(0), PresentStatus::Presented, &mut surface);
        assert_eq!(slot, Some(1));
        assert_eq!(frames.recreations, 1);
    }
}
