//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for semaphores and fences, plus [`InFlightFrames`], the ring
//! of per-slot fences that keeps the CPU at most
//! [`MAX_FRAMES_IN_FLIGHT`](super::MAX_FRAMES_IN_FLIGHT) frames ahead of the GPU.
//!
//! ```text
//! slot 0: [record] -> submit(fence 0) ------------ wait(fence 0) -> [record] ...
//! slot 1:             [record] -> submit(fence 1) ------------ wait(fence 1) ...
//! ```

use ash::{vk, Device};

use crate::render::vulkan::{VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// The two operations the in-flight ring performs on a fence
pub trait FrameFence {
    /// Block until signaled or `timeout` nanoseconds pass
    fn wait(&self, timeout: u64) -> VulkanResult<()>;
    /// Return to the unsignaled state
    fn reset(&self) -> VulkanResult<()>;
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl FrameFence for Fence {
    fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]).map_err(VulkanError::Api) }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// One fence per in-flight slot and the index of the slot being recorded
///
/// Fences start signaled so the first pass over every slot does not block.
pub struct InFlightFrames<F> {
    fences: Vec<F>,
    current: usize,
}

impl<F: FrameFence> InFlightFrames<F> {
    /// Build the ring starting at slot `start`
    pub fn new(fences: Vec<F>, start: usize) -> VulkanResult<Self> {
        if fences.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "In-flight ring needs at least one fence".to_string(),
            });
        }
        let current = start % fences.len();
        Ok(Self { fences, current })
    }

    /// Build a ring that picks up at `previous`'s current slot, or at 0 without one
    ///
    /// A recreated chain continues where its predecessor stopped so that the
    /// renderer's own slot counter and this one keep matching.
    pub fn continuing<G>(fences: Vec<F>, previous: Option<&InFlightFrames<G>>) -> VulkanResult<Self> {
        Self::new(fences, previous.map_or(0, |frames| frames.current))
    }

    /// Slot currently being recorded
    pub const fn current(&self) -> usize {
        self.current
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.fences.len()
    }

    /// Always false, the ring holds at least one slot
    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    /// Fence guarding the current slot
    pub fn current_fence(&self) -> &F {
        &self.fences[self.current]
    }

    /// Wait, without timeout, for the previous use of the current slot, then reset its fence
    pub fn wait_current(&self) -> VulkanResult<()> {
        let fence = self.current_fence();
        fence.wait(u64::MAX)?;
        fence.reset()
    }

    /// Move to the next slot
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.fences.len();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub(crate) type FenceLog = Rc<RefCell<Vec<Event>>>;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Event {
        Wait(usize, u64),
        Reset(usize),
    }

    /// Fence that appends every wait and reset to a shared log
    pub(crate) struct RecordingFence {
        id: usize,
        log: FenceLog,
    }

    impl FrameFence for RecordingFence {
        fn wait(&self, timeout: u64) -> VulkanResult<()> {
            self.log.borrow_mut().push(Event::Wait(self.id, timeout));
            Ok(())
        }

        fn reset(&self) -> VulkanResult<()> {
            self.log.borrow_mut().push(Event::Reset(self.id));
            Ok(())
        }
    }

    /// `count` fences logging into a fresh log
    pub(crate) fn recording_fences(count: usize) -> (Vec<RecordingFence>, FenceLog) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let fences = (0..count)
            .map(|id| RecordingFence { id, log: Rc::clone(&log) })
            .collect();
        (fences, log)
    }

    pub(crate) fn ring(count: usize, start: usize) -> (InFlightFrames<RecordingFence>, FenceLog) {
        let (fences, log) = recording_fences(count);
        (InFlightFrames::new(fences, start).unwrap(), log)
    }

    #[test]
    fn test_slot_returns_to_start_after_k_frames() {
        let (mut frames, _) = ring(crate::render::vulkan::MAX_FRAMES_IN_FLIGHT, 0);
        let start = frames.current();
        for _ in 0..frames.len() {
            frames.advance();
        }
        assert_eq!(frames.current(), start);
    }

    #[test]
    fn test_each_slot_waits_on_its_own_fence_before_reuse() {
        let (mut frames, log) = ring(2, 0);
        for _ in 0..4 {
            frames.wait_current().unwrap();
            frames.advance();
        }

        let expected = vec![
            Event::Wait(0, u64::MAX),
            Event::Reset(0),
            Event::Wait(1, u64::MAX),
            Event::Reset(1),
            Event::Wait(0, u64::MAX),
            Event::Reset(0),
            Event::Wait(1, u64::MAX),
            Event::Reset(1),
        ];
        assert_eq!(*log.borrow(), expected);
    }

    #[test]
    fn test_start_slot_is_seeded_and_wrapped() {
        let (frames, _) = ring(2, 1);
        assert_eq!(frames.current(), 1);

        let (frames, _) = ring(2, 3);
        assert_eq!(frames.current(), 1);
    }

    #[test]
    fn test_replacement_ring_continues_rotation() {
        let (mut frames, _) = ring(2, 0);
        let mut slots = Vec::new();
        for _ in 0..3 {
            frames.wait_current().unwrap();
            slots.push(frames.current());
            frames.advance();
        }

        let (fences, log) = recording_fences(2);
        let mut frames = InFlightFrames::continuing(fences, Some(&frames)).unwrap();
        for _ in 0..3 {
            frames.wait_current().unwrap();
            slots.push(frames.current());
            frames.advance();
        }

        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(log.borrow()[..2], [Event::Wait(1, u64::MAX), Event::Reset(1)]);
    }

    #[test]
    fn test_replacement_after_unused_wait_keeps_slot() {
        // The old ring waited on slot 1 but never submitted
        let (mut frames, _) = ring(2, 0);
        frames.advance();
        frames.wait_current().unwrap();

        let (fences, log) = recording_fences(2);
        let frames = InFlightFrames::continuing(fences, Some(&frames)).unwrap();
        assert_eq!(frames.current(), 1);

        frames.wait_current().unwrap();
        assert_eq!(*log.borrow(), vec![Event::Wait(1, u64::MAX), Event::Reset(1)]);
    }

    #[test]
    fn test_first_ring_starts_at_zero() {
        let (fences, _) = recording_fences(2);
        let frames = InFlightFrames::continuing::<RecordingFence>(fences, None).unwrap();
        assert_eq!(frames.current(), 0);
    }

    #[test]
    fn test_empty_ring_is_rejected() {
        let result = InFlightFrames::<RecordingFence>::new(Vec::new(), 0);
        assert!(result.is_err());
    }
}
