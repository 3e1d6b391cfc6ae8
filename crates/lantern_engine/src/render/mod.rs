//! Rendering
//!
//! [`vulkan`] holds the device-level wrappers; [`renderer`] drives the frame
//! protocol on top of them; [`systems`] record the two render passes.

pub mod frame;
pub mod model;
pub mod renderer;
pub mod systems;
pub mod vulkan;
