//! Window management using GLFW
//!
//! Provides window creation, event handling and surface creation for Vulkan.
//! The renderer only sees the window through [`SurfaceSource`].

use ash::vk;
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// What the frame loop needs from the platform window
///
/// Implemented by [`Window`]; tests substitute scripted implementations.
pub trait SurfaceSource {
    /// Current drawable size in pixels
    fn extent(&self) -> vk::Extent2D;
    /// Whether the framebuffer was resized since the flag was last reset
    fn was_resized(&self) -> bool;
    /// Clear the resize flag
    fn reset_resized_flag(&mut self);
    /// Block until at least one window event arrives
    fn wait_events(&mut self);
}

/// Block until the surface has a non-zero drawable area
///
/// A minimized window reports a zero extent; the chain cannot be created
/// until it is restored.
pub fn wait_for_drawable_extent(source: &mut impl SurfaceSource) -> vk::Extent2D {
    let mut extent = source.extent();
    while extent.width == 0 || extent.height == 0 {
        source.wait_events();
        extent = source.extent();
    }
    extent
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    framebuffer_resized: bool,
}

impl Window {
    /// Create a resizable window without a client API
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw =
            glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Created window '{title}' ({width}x{height})");
        Ok(Self {
            glfw,
            window,
            events,
            framebuffer_resized: false,
        })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request or cancel closing
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Process pending events without blocking
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
        self.drain_events();
    }

    fn drain_events(&mut self) {
        for (_, event) in glfw::flush_messages(&self.events) {
            if let glfw::WindowEvent::FramebufferSize(width, height) = event {
                log::debug!("Framebuffer resized to {width}x{height}");
                self.framebuffer_resized = true;
            }
        }
    }

    /// Whether `key` is currently held down
    pub fn is_key_pressed(&self, key: glfw::Key) -> bool {
        matches!(self.window.get_key(key), glfw::Action::Press | glfw::Action::Repeat)
    }

    /// Framebuffer size in pixels
    pub fn get_framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0).unsigned_abs(), height.max(0).unsigned_abs())
    }

    /// Get required Vulkan instance extensions from GLFW
    pub fn get_required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()))
    }

    /// Create Vulkan surface using GLFW's built-in functionality
    pub fn create_vulkan_surface(&mut self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {result:?}")))
        }
    }
}

impl SurfaceSource for Window {
    fn extent(&self) -> vk::Extent2D {
        let (width, height) = self.get_framebuffer_size();
        vk::Extent2D { width, height }
    }

    fn was_resized(&self) -> bool {
        self.framebuffer_resized
    }

    fn reset_resized_flag(&mut self) {
        self.framebuffer_resized = false;
    }

    fn wait_events(&mut self) {
        self.glfw.wait_events();
        self.drain_events();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Window stand-in that replays a list of extents
    pub(crate) struct ScriptedSurface {
        pub extents: Vec<(u32, u32)>,
        pub cursor: usize,
        pub resized: bool,
        pub waits: usize,
    }

    impl ScriptedSurface {
        pub(crate) fn new(extents: &[(u32, u32)]) -> Self {
            Self {
                extents: extents.to_vec(),
                cursor: 0,
                resized: false,
                waits: 0,
            }
        }
    }

    impl SurfaceSource for ScriptedSurface {
        fn extent(&self) -> vk::Extent2D {
            let index = self.cursor.min(self.extents.len() - 1);
            let (width, height) = self.extents[index];
            vk::Extent2D { width, height }
        }

        fn was_resized(&self) -> bool {
            self.resized
        }

        fn reset_resized_flag(&mut self) {
            self.resized = false;
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            self.cursor += 1;
        }
    }

    #[test]
    fn test_drawable_extent_returns_immediately_when_visible() {
        let mut surface = ScriptedSurface::new(&[(1024, 768)]);
        let extent = wait_for_drawable_extent(&mut surface);
        assert_eq!((extent.width, extent.height), (1024, 768));
        assert_eq!(surface.waits, 0);
    }

    #[test]
    fn test_minimized_window_blocks_until_restored() {
        let mut surface = ScriptedSurface::new(&[(0, 0), (0, 0), (800, 600)]);
        let extent = wait_for_drawable_extent(&mut surface);
        assert_eq!((extent.width, extent.height), (800, 600));
        assert_eq!(surface.waits, 2);
    }

    #[test]
    fn test_one_zero_dimension_still_waits() {
        let mut surface = ScriptedSurface::new(&[(800, 0), (800, 600)]);
        let extent = wait_for_drawable_extent(&mut surface);
        assert_eq!(extent.height, 600);
        assert_eq!(surface.waits, 1);
    }
}
