//! Vulkan rendering backend
//!
//! RAII wrappers over the raw `ash` handles. Every wrapper keeps a clone of the
//! `ash::Device` it was created from and destroys its handle on drop, so the
//! owning [`VulkanContext`] must outlive all of them.

pub mod buffer;
pub mod context;
pub mod descriptors;
pub mod framebuffer;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod window;

/// Number of frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

pub use buffer::{Buffer, BufferLayout};
pub use context::{
    PhysicalDeviceInfo, QueueFamilyIndices, SwapChainSupport, VulkanContext, VulkanError,
    VulkanResult,
};
pub use descriptors::{
    DescriptorPool, DescriptorPoolBuilder, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorWriter,
};
pub use framebuffer::{DepthBuffer, Framebuffer};
pub use pipeline::{GraphicsPipeline, PipelineConfig, PipelineLayout};
pub use render_pass::RenderPass;
pub use shader::ShaderModule;
pub use swapchain::{FrameAcquire, PresentStatus, SwapChain, SwapFormats};
pub use sync::{Fence, FrameFence, InFlightFrames, Semaphore};
pub use window::{SurfaceSource, Window, WindowError};
