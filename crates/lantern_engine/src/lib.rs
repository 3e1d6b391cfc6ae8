//! # Lantern Engine
//!
//! A small Vulkan renderer built around a correct frame loop: a presentation
//! chain that survives resizes, two frames in flight, per-slot uniform buffers
//! and two render systems (an opaque geometry pass and an alpha-blended,
//! distance-sorted point-light pass).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lantern_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     lantern_engine::foundation::logging::init();
//!
//!     let config = ApplicationConfig::default();
//!     let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
//!     let context = Arc::new(VulkanContext::new(&mut window, &config.renderer)?);
//!     let mut renderer = Renderer::new(Arc::clone(&context), &mut window)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         if let Some(command_buffer) = renderer.begin_frame(&mut window)? {
//!             renderer.begin_swap_chain_render_pass(command_buffer)?;
//!             // record draws here
//!             renderer.end_swap_chain_render_pass(command_buffer)?;
//!             renderer.end_frame(&mut window)?;
//!         }
//!     }
//!
//!     context.wait_idle()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod assets;
pub mod config;
pub mod core;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        core::config::{ApplicationConfig, RendererConfig, SceneConfig, ShaderConfig, WindowConfig},
        config::{Config, ConfigError},
        foundation::math::{Mat3, Mat4, Vec2, Vec3, Vec4},
        render::{
            frame::{FrameInfo, FrameUniforms, GlobalUbo, UniformSink, MAX_LIGHTS},
            model::{MeshData, Model, Vertex},
            renderer::Renderer,
            systems::{GeometrySystem, PointLightSystem},
            vulkan::{
                Buffer, DescriptorPool, DescriptorSetLayout, DescriptorWriter, SurfaceSource,
                VulkanContext, VulkanError, VulkanResult, Window, WindowError, MAX_FRAMES_IN_FLIGHT,
            },
        },
        scene::{Camera, GameObject, GameObjectId, PointLightComponent, SceneWorld, Transform},
    };
}
