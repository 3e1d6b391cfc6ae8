//! Scene entities and the camera

pub mod camera;
pub mod game_object;

pub use camera::{Camera, CameraError};
pub use game_object::{
    GameObject, GameObjectId, GameObjectMap, PointLightComponent, SceneWorld, Transform,
};
