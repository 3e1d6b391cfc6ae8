//! Demo scene: two vases on a floor, circled by coloured lights

use std::f32::consts::TAU;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use lantern_engine::foundation::math::Vector3;
use lantern_engine::prelude::*;
use nalgebra::Rotation3;

use crate::AppError;

const LIGHT_COLORS: [[f32; 3]; 6] = [
    [1.0, 0.1, 0.1],
    [0.1, 0.1, 1.0],
    [0.1, 1.0, 0.1],
    [1.0, 1.0, 0.1],
    [0.1, 1.0, 1.0],
    [1.0, 1.0, 1.0],
];

const LIGHT_INTENSITY: f32 = 0.2;
const LIGHT_RADIUS: f32 = 0.1;
// Position of the first light; the others are rotated copies
const LIGHT_RING: [f32; 3] = [-1.0, -1.0, -1.0];

fn ring_start() -> Vec3 {
    Vec3::from(LIGHT_RING)
}

/// Find `path` from the working directory or from this crate's directory
pub fn resolve_asset(path: &str) -> PathBuf {
    let direct = PathBuf::from(path);
    if direct.exists() {
        return direct;
    }
    Path::new(env!("CARGO_MANIFEST_DIR")).join(path)
}

/// Unit quad in the XZ plane facing -Y
pub fn floor_mesh() -> MeshData {
    let corner = |x: f32, z: f32| Vertex {
        position: [x, 0.0, z],
        color: [1.0, 1.0, 1.0],
        normal: [0.0, -1.0, 0.0],
        uv: [(x + 1.0) * 0.5, (z + 1.0) * 0.5],
    };
    MeshData::new(
        vec![
            corner(-1.0, -1.0),
            corner(1.0, 1.0),
            corner(-1.0, 1.0),
            corner(1.0, -1.0),
        ],
        vec![0, 1, 2, 0, 3, 1],
    )
}

/// Position of light `index` out of `count`, evenly spaced around the vertical axis
pub fn light_position(index: usize, count: usize) -> Vec3 {
    let angle = index as f32 * TAU / count.max(1) as f32;
    let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), -angle);
    rotation * ring_start()
}

/// Colour of light `index`, cycling through the palette
pub fn light_color(index: usize) -> Vec3 {
    let [r, g, b] = LIGHT_COLORS[index % LIGHT_COLORS.len()];
    Vec3::new(r, g, b)
}

/// Populate `world` with the configured vases, the floor and the light ring
pub fn build_scene(
    context: &VulkanContext,
    config: &SceneConfig,
    world: &mut SceneWorld,
) -> Result<(), AppError> {
    let count = config.model_paths.len();
    for (i, path) in config.model_paths.iter().enumerate() {
        let mesh = MeshData::from_obj_file(resolve_asset(path))?;
        log::info!("Loaded {path}: {} vertices", mesh.vertices.len());

        let mut vase = world.create_object();
        vase.model = Some(Rc::new(Model::new(context, &mesh)?));
        // Spread the vases 0.5 apart around x = 0
        vase.transform.translation = Vec3::new(
            0.5 * (i as f32 - (count as f32 - 1.0) / 2.0),
            0.5,
            0.0,
        );
        vase.transform.scale = Vec3::new(3.0, 1.5, 3.0);
        world.insert(vase);
    }

    let mut floor = world.create_object();
    floor.model = Some(Rc::new(Model::new(context, &floor_mesh())?));
    floor.transform.translation = Vec3::new(0.0, 0.5, 0.0);
    floor.transform.scale = Vec3::new(3.0, 1.0, 3.0);
    world.insert(floor);

    for i in 0..config.light_count {
        let mut light = world.make_point_light(LIGHT_INTENSITY, LIGHT_RADIUS, light_color(i));
        light.transform.translation = light_position(i, config.light_count);
        world.insert(light);
    }

    log::info!(
        "Scene ready: {} objects, {} lights",
        world.len(),
        config.light_count
    );
    Ok(())
}
