//! Vulkan swapchain management
//!
//! [`SwapChain`] owns everything tied to one set of presentable images: the
//! image views, one depth image per image, the render pass, the framebuffers
//! and the per-slot synchronization objects. Fields are declared in
//! destruction order (sync objects, framebuffers, depth images, render pass,
//! views, chain), so dropping a chain tears it down in reverse creation order.
//!
//! Resizing replaces the whole chain. The replacement is built with
//! [`SwapChain::with_predecessor`], which hands the old native chain to the
//! driver, checks that the pixel formats did not change, continues the old
//! chain's in-flight slot, and then drops the predecessor.

use ash::vk;
use std::sync::Arc;

use crate::render::vulkan::framebuffer::{DepthBuffer, Framebuffer, ImageView};
use crate::render::vulkan::render_pass::RenderPass;
use crate::render::vulkan::sync::{Fence, InFlightFrames, Semaphore};
use crate::render::vulkan::{VulkanContext, VulkanError, VulkanResult, MAX_FRAMES_IN_FLIGHT};

/// Color and depth formats of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapFormats {
    /// Format of the presentable images
    pub image: vk::Format,
    /// Format of the depth attachments
    pub depth: vk::Format,
}

impl SwapFormats {
    /// Fail unless `new` uses the same formats as `self`
    ///
    /// Pipelines are built against the render pass of the first chain, so a
    /// replacement chain must keep both formats.
    pub fn ensure_compatible(&self, new: &Self) -> VulkanResult<()> {
        if self == new {
            Ok(())
        } else {
            Err(VulkanError::IncompatibleSwapChain {
                old_image: self.image,
                new_image: new.image,
                old_depth: self.depth,
                new_depth: new.depth,
            })
        }
    }
}

/// Outcome of acquiring the next presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAcquire {
    /// Image acquired, render to it
    Ready(u32),
    /// Image acquired but the chain no longer matches the surface exactly
    Suboptimal(u32),
    /// The chain must be recreated before rendering
    OutOfDate,
}

impl FrameAcquire {
    /// Classify the result of `vkAcquireNextImageKHR`
    pub fn from_vk(result: Result<(u32, bool), vk::Result>) -> VulkanResult<Self> {
        match result {
            Ok((index, false)) => Ok(Self::Ready(index)),
            Ok((index, true)) => Ok(Self::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Image to render to, `None` when the chain must be rebuilt first
    pub const fn image_index(self) -> Option<u32> {
        match self {
            Self::Ready(index) | Self::Suboptimal(index) => Some(index),
            Self::OutOfDate => None,
        }
    }
}

/// Outcome of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    /// Presented normally
    Presented,
    /// Presented, but the chain should be recreated
    Suboptimal,
    /// Not presented, the chain must be recreated
    OutOfDate,
}

impl PresentStatus {
    /// Classify the result of `vkQueuePresentKHR`
    pub fn from_vk(result: Result<bool, vk::Result>) -> VulkanResult<Self> {
        match result {
            Ok(false) => Ok(Self::Presented),
            Ok(true) => Ok(Self::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Whether the chain should be rebuilt
    pub const fn needs_recreation(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Prefer `B8G8R8A8_SRGB` with the sRGB nonlinear color space, else the first format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> VulkanResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or(VulkanError::NoSupportedFormat)
}

/// Prefer mailbox, fall back to FIFO which every implementation supports
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        log::info!("Present mode: Mailbox");
        vk::PresentModeKHR::MAILBOX
    } else {
        log::info!("Present mode: V-Sync");
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's current extent when it is defined, else clamp the window size
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    let current = capabilities.current_extent;
    if current.width != u32::MAX || current.height != u32::MAX {
        return current;
    }

    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: window_extent.width.max(min.width).min(max.width),
        height: window_extent.height.max(min.height).min(max.height),
    }
}

/// One image more than the minimum, limited by the maximum when there is one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Native swapchain handle; holds the context alive until the chain is gone
struct SwapchainHandle {
    context: Arc<VulkanContext>,
    handle: vk::SwapchainKHR,
}

impl Drop for SwapchainHandle {
    fn drop(&mut self) {
        unsafe {
            self.context
                .swapchain_loader()
                .destroy_swapchain(self.handle, None);
        }
    }
}

/// Presentation chain with its attachments, render pass and frame synchronization
pub struct SwapChain {
    frames: InFlightFrames<Fence>,
    image_available: Vec<Semaphore>,
    render_finished: Vec<Semaphore>,
    framebuffers: Vec<Framebuffer>,
    depth_buffers: Vec<DepthBuffer>,
    render_pass: RenderPass,
    image_views: Vec<ImageView>,
    swapchain: SwapchainHandle,
    images: Vec<vk::Image>,
    formats: SwapFormats,
    extent: vk::Extent2D,
    window_extent: vk::Extent2D,
}

impl SwapChain {
    /// Build a chain for a window of `window_extent` pixels
    pub fn new(context: Arc<VulkanContext>, window_extent: vk::Extent2D) -> VulkanResult<Self> {
        Self::create(context, window_extent, None)
    }

    /// Build a replacement for `previous`, which is released once the new chain is ready
    pub fn with_predecessor(
        context: Arc<VulkanContext>,
        window_extent: vk::Extent2D,
        previous: Self,
    ) -> VulkanResult<Self> {
        let chain = Self::create(context, window_extent, Some(&previous))?;
        previous.formats.ensure_compatible(&chain.formats)?;
        drop(previous);
        Ok(chain)
    }

    fn create(
        context: Arc<VulkanContext>,
        window_extent: vk::Extent2D,
        previous: Option<&Self>,
    ) -> VulkanResult<Self> {
        let device = context.device().clone();
        let support = context.swap_chain_support()?;

        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, window_extent);
        let image_count = choose_image_count(&support.capabilities);

        let families = context.queue_families();
        let family_indices = [families.graphics_family, families.present_family];
        let old_swapchain = previous.map_or_else(vk::SwapchainKHR::null, |p| p.swapchain.handle);

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        create_info = if families.is_split() {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let handle = unsafe {
            context
                .swapchain_loader()
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        let swapchain = SwapchainHandle {
            context: Arc::clone(&context),
            handle,
        };

        let images = unsafe {
            context
                .swapchain_loader()
                .get_swapchain_images(swapchain.handle)
                .map_err(VulkanError::Api)?
        };

        let image_views = images
            .iter()
            .map(|&image| {
                ImageView::new(
                    device.clone(),
                    image,
                    surface_format.format,
                    vk::ImageAspectFlags::COLOR,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let depth_format = context.depth_format();
        let render_pass =
            RenderPass::new_forward_pass(device.clone(), surface_format.format, depth_format)?;

        let depth_buffers = images
            .iter()
            .map(|_| DepthBuffer::new(&context, extent, depth_format))
            .collect::<VulkanResult<Vec<_>>>()?;

        let framebuffers = image_views
            .iter()
            .zip(&depth_buffers)
            .map(|(view, depth)| {
                Framebuffer::new(
                    device.clone(),
                    render_pass.handle(),
                    &[view.handle(), depth.image_view()],
                    extent,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let image_available = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Semaphore::new(device.clone()))
            .collect::<VulkanResult<Vec<_>>>()?;
        let render_finished = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Semaphore::new(device.clone()))
            .collect::<VulkanResult<Vec<_>>>()?;
        let fences = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Fence::new(device.clone(), true))
            .collect::<VulkanResult<Vec<_>>>()?;
        let frames = InFlightFrames::continuing(fences, previous.map(|p| &p.frames))?;

        log::info!(
            "Swap chain {}: {}x{}, {} images, {:?}, depth {:?}",
            if previous.is_some() { "recreated" } else { "created" },
            extent.width,
            extent.height,
            images.len(),
            surface_format.format,
            depth_format,
        );

        Ok(Self {
            frames,
            image_available,
            render_finished,
            framebuffers,
            depth_buffers,
            render_pass,
            image_views,
            swapchain,
            images,
            formats: SwapFormats {
                image: surface_format.format,
                depth: depth_format,
            },
            extent,
            window_extent,
        })
    }

    /// Wait for the current slot's previous frame, then acquire the next image
    ///
    /// Both waits are unbounded.
    pub fn acquire_next_image(&self) -> VulkanResult<FrameAcquire> {
        self.frames.wait_current()?;

        let result = unsafe {
            self.swapchain.context.swapchain_loader().acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                self.image_available[self.frames.current()].handle(),
                vk::Fence::null(),
            )
        };
        FrameAcquire::from_vk(result)
    }

    /// Submit `command_buffer` for `image_index`, present it and advance to the next slot
    ///
    /// The slot advances even when presentation reports the chain as stale.
    pub fn submit_command_buffers(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> VulkanResult<PresentStatus> {
        let context = &self.swapchain.context;
        let slot = self.frames.current();

        let wait_semaphores = [self.image_available[slot].handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.render_finished[slot].handle()];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            context
                .device()
                .queue_submit(
                    context.graphics_queue(),
                    &[submit_info],
                    self.frames.current_fence().handle(),
                )
                .map_err(VulkanError::Api)?;
        }

        let swapchains = [self.swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            context
                .swapchain_loader()
                .queue_present(context.present_queue(), &present_info)
        };

        self.frames.advance();

        let status = PresentStatus::from_vk(result)?;
        if status == PresentStatus::Suboptimal {
            log::warn!("Presentation is suboptimal, recreating swap chain");
        }
        Ok(status)
    }

    /// In-flight slot the next frame will use
    pub const fn current_frame(&self) -> usize {
        self.frames.current()
    }

    /// Render pass compatible with every framebuffer of this chain
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    /// Framebuffer for presentable image `index`
    pub fn framebuffer(&self, index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index).map(Framebuffer::handle)
    }

    /// Color view of presentable image `index`
    pub fn image_view(&self, index: usize) -> Option<vk::ImageView> {
        self.image_views.get(index).map(ImageView::handle)
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Format of the presentable images
    pub const fn image_format(&self) -> vk::Format {
        self.formats.image
    }

    /// Format of the depth attachments
    pub const fn depth_format(&self) -> vk::Format {
        self.formats.depth
    }

    /// Both formats
    pub const fn formats(&self) -> SwapFormats {
        self.formats
    }

    /// Whether `other` uses the same color and depth formats
    pub fn compare_formats(&self, other: &Self) -> bool {
        self.formats == other.formats
    }

    /// Size of the presentable images
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Width of the presentable images
    pub const fn width(&self) -> u32 {
        self.extent.width
    }

    /// Height of the presentable images
    pub const fn height(&self) -> u32 {
        self.extent.height
    }

    /// Window size the chain was requested for
    pub const fn window_extent(&self) -> vk::Extent2D {
        self.window_extent
    }

    /// Width divided by height
    #[allow(clippy::cast_precision_loss)]
    pub fn extent_aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    /// Number of depth attachments, one per presentable image
    pub fn depth_buffer_count(&self) -> usize {
        self.depth_buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            ..Default::default()
        }
    }

    fn window(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_defined_current_extent_wins() {
        let caps = capabilities((1280, 720), (1, 1), (4096, 4096));
        assert_eq!(choose_extent(&caps, window(800, 600)), window(1280, 720));
    }

    #[test]
    fn test_undefined_current_extent_clamps_window() {
        let caps = capabilities((u32::MAX, u32::MAX), (200, 200), (1000, 1000));
        assert_eq!(choose_extent(&caps, window(800, 600)), window(800, 600));
        assert_eq!(choose_extent(&caps, window(50, 5000)), window(200, 1000));
    }

    #[test]
    fn test_preferred_surface_format_is_chosen() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(matches!(choose_surface_format(&[]), Err(VulkanError::NoSupportedFormat)));
    }

    #[test]
    fn test_present_mode_prefers_mailbox() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_image_count_is_clamped_to_maximum() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn test_mismatched_depth_format_is_fatal() {
        let old = SwapFormats {
            image: vk::Format::B8G8R8A8_SRGB,
            depth: vk::Format::D32_SFLOAT,
        };
        let new = SwapFormats {
            depth: vk::Format::D24_UNORM_S8_UINT,
            ..old
        };

        assert!(old.ensure_compatible(&old).is_ok());
        assert!(matches!(
            old.ensure_compatible(&new),
            Err(VulkanError::IncompatibleSwapChain {
                old_depth: vk::Format::D32_SFLOAT,
                new_depth: vk::Format::D24_UNORM_S8_UINT,
                ..
            })
        ));
    }

    #[test]
    fn test_acquire_status_mapping() {
        assert_eq!(FrameAcquire::from_vk(Ok((2, false))).unwrap(), FrameAcquire::Ready(2));
        assert_eq!(FrameAcquire::from_vk(Ok((1, true))).unwrap(), FrameAcquire::Suboptimal(1));
        assert_eq!(
            FrameAcquire::from_vk(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            FrameAcquire::OutOfDate
        );
        assert!(FrameAcquire::from_vk(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());

        assert_eq!(FrameAcquire::Suboptimal(1).image_index(), Some(1));
        assert_eq!(FrameAcquire::OutOfDate.image_index(), None);
    }

    #[test]
    fn test_present_status_mapping() {
        assert_eq!(PresentStatus::from_vk(Ok(false)).unwrap(), PresentStatus::Presented);
        assert_eq!(PresentStatus::from_vk(Ok(true)).unwrap(), PresentStatus::Suboptimal);
        assert_eq!(
            PresentStatus::from_vk(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentStatus::OutOfDate
        );
        assert!(!PresentStatus::Presented.needs_recreation());
        assert!(PresentStatus::Suboptimal.needs_recreation());
        assert!(PresentStatus::from_vk(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }
}
