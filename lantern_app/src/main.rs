//! Lantern demo
//!
//! Two vases on a floor lit by a ring of orbiting point lights. WASD/E/Q move
//! the camera, arrow keys look around, Escape quits.

mod keyboard;
mod scene_setup;

use ash::vk;
use std::sync::Arc;
use std::time::Instant;

use lantern_engine::assets::ObjError;
use lantern_engine::prelude::*;
use lantern_engine::scene::CameraError;

use keyboard::{KeyboardController, MovementInput};

/// Optional configuration file read from the working directory
const CONFIG_PATH: &str = "lantern.toml";

const FIELD_OF_VIEW: f32 = 0.872_664_6; // 50 degrees
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 100.0;

/// Anything that stops the demo
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Vulkan failure
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
    /// Window failure
    #[error(transparent)]
    Window(#[from] WindowError),
    /// Bad or unreadable configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Unreadable model
    #[error(transparent)]
    Model(#[from] ObjError),
    /// Degenerate projection
    #[error(transparent)]
    Camera(#[from] CameraError),
    /// The descriptor pool ran out of sets
    #[error("Descriptor pool exhausted while allocating frame sets")]
    DescriptorPoolExhausted,
}

fn main() {
    lantern_engine::foundation::logging::init();

    if let Err(e) = run() {
        log::error!("Lantern failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let config = ApplicationConfig::load_or_default(CONFIG_PATH)?;
    config.validate()?;

    let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
    let context = Arc::new(VulkanContext::new(&mut window, &config.renderer)?);

    render_loop(&config, &mut window, &context)
}

/// Waits for the device to go idle when dropped
///
/// Declared after the GPU resources of the loop so it drops before them, on
/// the error path as well as on a normal exit.
struct IdleOnDrop<'a>(&'a VulkanContext);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.wait_idle() {
            log::error!("Failed to wait for device idle: {e}");
        }
    }
}

fn render_loop(
    config: &ApplicationConfig,
    window: &mut Window,
    context: &Arc<VulkanContext>,
) -> Result<(), AppError> {
    let mut renderer = Renderer::new(Arc::clone(context), window)?;

    let frames = MAX_FRAMES_IN_FLIGHT as u32;
    let global_pool = DescriptorPool::builder()
        .set_max_sets(frames)
        .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, frames)
        .build(context.device())?;

    let global_set_layout = DescriptorSetLayout::builder()
        .add_binding(
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::ALL_GRAPHICS,
            1,
        )?
        .build(context.device())?;

    let mut uniform_buffer = Buffer::new(
        context,
        std::mem::size_of::<GlobalUbo>() as vk::DeviceSize,
        frames,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE,
        context.uniform_slot_alignment(),
    )?;
    uniform_buffer.map_all()?;

    let mut global_sets = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
    for slot in 0..frames {
        let set = DescriptorWriter::new(&global_set_layout, &global_pool)
            .write_buffer(0, uniform_buffer.descriptor_info_for_index(slot)?)?
            .build()?
            .ok_or(AppError::DescriptorPoolExhausted)?;
        global_sets.push(set);
    }

    let render_pass = renderer.swap_chain_render_pass()?;
    let geometry = GeometrySystem::new(
        context,
        render_pass,
        global_set_layout.handle(),
        &config.renderer.geometry_shaders,
    )?;
    let point_lights = PointLightSystem::new(
        context,
        render_pass,
        global_set_layout.handle(),
        &config.renderer.point_light_shaders,
        config.scene.light_orbit_speed,
    )?;

    let mut world = SceneWorld::new();
    scene_setup::build_scene(context, &config.scene, &mut world)?;

    let mut camera = Camera::default();
    let mut viewer = Transform {
        translation: Vec3::from(config.scene.camera_start),
        ..Transform::default()
    };
    let controller = KeyboardController::default();
    let mut uniforms = FrameUniforms::new();

    let _idle = IdleOnDrop(context);
    let mut last_frame = Instant::now();
    while !window.should_close() {
        window.poll_events();
        if window.is_key_pressed(glfw::Key::Escape) {
            window.set_should_close(true);
        }

        let now = Instant::now();
        let frame_time = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        controller.move_in_plane_xz(MovementInput::from_window(window), frame_time, &mut viewer);
        camera.set_view_yxz(viewer.translation, viewer.rotation);
        camera.set_perspective_projection(
            FIELD_OF_VIEW,
            renderer.aspect_ratio(),
            NEAR_PLANE,
            FAR_PLANE,
        )?;

        let Some(command_buffer) = renderer.begin_frame(window)? else {
            continue;
        };

        let frame_index = renderer.frame_index();
        uniforms.begin(&camera);
        let mut frame = FrameInfo {
            frame_index,
            frame_time,
            command_buffer,
            camera: &camera,
            global_descriptor_set: global_sets[frame_index],
            game_objects: world.objects_mut(),
            uniforms: &mut uniforms,
        };

        point_lights.update(&mut frame)?;
        frame.uniforms.flush(&mut uniform_buffer, frame_index as u32)?;

        renderer.begin_swap_chain_render_pass(command_buffer)?;
        geometry.render(&frame)?;
        point_lights.render(&frame)?;
        renderer.end_swap_chain_render_pass(command_buffer)?;
        renderer.end_frame(window)?;
    }

    log::info!("Window closed, shutting down");
    Ok(())
}
