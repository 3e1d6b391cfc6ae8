//! Game objects
//!
//! A [`GameObject`] is a transform plus optional parts: a shared mesh and an
//! owned point light. Objects cannot be cloned; their ids come from the
//! [`SceneWorld`] that created them and are never handed out twice.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::foundation::math::{Mat3, Mat4, Vec3};
use crate::render::model::Model;

/// Unique object identity within one [`SceneWorld`]
pub type GameObjectId = u32;

/// Objects keyed by id, iterated in creation order
pub type GameObjectMap = BTreeMap<GameObjectId, GameObject>;

/// Translation, scale and Y-X-Z Tait-Bryan rotation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Position offset
    pub translation: Vec3,
    /// Per-axis scale
    pub scale: Vec3,
    /// Rotation in radians about X, Y and Z, applied Y first, then X, then Z
    pub rotation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
            rotation: Vec3::zeros(),
        }
    }
}

impl Transform {
    fn rotation_basis(&self) -> [Vec3; 3] {
        let (s3, c3) = self.rotation.z.sin_cos();
        let (s2, c2) = self.rotation.x.sin_cos();
        let (s1, c1) = self.rotation.y.sin_cos();
        [
            Vec3::new(c1 * c3 + s1 * s2 * s3, c2 * s3, c1 * s2 * s3 - c3 * s1),
            Vec3::new(c3 * s1 * s2 - c1 * s3, c2 * c3, c1 * c3 * s2 + s1 * s3),
            Vec3::new(c2 * s1, -s2, c1 * c2),
        ]
    }

    /// Translate * Ry * Rx * Rz * Scale
    pub fn mat4(&self) -> Mat4 {
        let [x, y, z] = self.rotation_basis();
        let (x, y, z) = (x * self.scale.x, y * self.scale.y, z * self.scale.z);
        let t = self.translation;
        Mat4::new(
            x.x, y.x, z.x, t.x, //
            x.y, y.y, z.y, t.y, //
            x.z, y.z, z.z, t.z, //
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Inverse transpose of the upper 3x3 of [`Transform::mat4`]
    ///
    /// Same rotation basis weighted by the inverse scale, exact for any
    /// non-zero scale since the transform has no shear.
    pub fn normal_matrix(&self) -> Mat3 {
        let [x, y, z] = self.rotation_basis();
        let inverse_scale = self.scale.map(|s| 1.0 / s);
        Mat3::from_columns(&[
            x * inverse_scale.x,
            y * inverse_scale.y,
            z * inverse_scale.z,
        ])
    }
}

/// Marks an object as a point light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLightComponent {
    /// Scales the light color
    pub light_intensity: f32,
}

impl Default for PointLightComponent {
    fn default() -> Self {
        Self {
            light_intensity: 1.0,
        }
    }
}

/// Scene entity
#[derive(Debug)]
pub struct GameObject {
    id: GameObjectId,
    /// Placement in the world
    pub transform: Transform,
    /// Base color; light color for point lights
    pub color: Vec3,
    /// Mesh shared with other objects
    pub model: Option<Rc<Model>>,
    /// Present when the object emits light
    pub point_light: Option<PointLightComponent>,
}

impl GameObject {
    fn new(id: GameObjectId) -> Self {
        Self {
            id,
            transform: Transform::default(),
            color: Vec3::zeros(),
            model: None,
            point_light: None,
        }
    }

    /// Identity assigned by the world
    pub const fn id(&self) -> GameObjectId {
        self.id
    }
}

/// Owner of the id counter and of every object in the scene
#[derive(Debug, Default)]
pub struct SceneWorld {
    next_id: GameObjectId,
    objects: GameObjectMap,
}

impl SceneWorld {
    /// Empty world
    pub fn new() -> Self {
        Self::default()
    }

    /// New object with a fresh id, not yet inserted
    pub fn create_object(&mut self) -> GameObject {
        let id = self.next_id;
        self.next_id += 1;
        GameObject::new(id)
    }

    /// New point light object; `radius` is stored as the x scale
    pub fn make_point_light(&mut self, intensity: f32, radius: f32, color: Vec3) -> GameObject {
        let mut object = self.create_object();
        object.color = color;
        object.transform.scale.x = radius;
        object.point_light = Some(PointLightComponent {
            light_intensity: intensity,
        });
        object
    }

    /// Take ownership of `object`
    ///
    /// An object already stored under the same id, which only happens when
    /// `object` came from another world, is replaced and returned.
    pub fn insert(&mut self, object: GameObject) -> Option<GameObject> {
        let id = object.id;
        let replaced = self.objects.insert(id, object);
        if replaced.is_some() {
            log::warn!("Game object {id} replaced an existing object with the same id");
        }
        replaced
    }

    /// Look up an object
    pub fn get(&self, id: GameObjectId) -> Option<&GameObject> {
        self.objects.get(&id)
    }

    /// Look up an object for modification
    pub fn get_mut(&mut self, id: GameObjectId) -> Option<&mut GameObject> {
        self.objects.get_mut(&id)
    }

    /// Objects in id order
    pub fn iter(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.values()
    }

    /// The map handed to render systems each frame
    pub fn objects_mut(&mut self) -> &mut GameObjectMap {
        &mut self.objects
    }

    /// Number of inserted objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no object has been inserted
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{mat3_to_mat4, Vector3};
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn sample_transform() -> Transform {
        Transform {
            translation: Vec3::new(1.0, -2.0, 3.0),
            scale: Vec3::new(2.0, 0.5, 3.0),
            rotation: Vec3::new(0.4, -1.1, 0.7),
        }
    }

    #[test]
    fn test_model_matrix_is_translate_ry_rx_rz_scale() {
        let t = sample_transform();
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), t.rotation.y)
            * Rotation3::from_axis_angle(&Vector3::x_axis(), t.rotation.x)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), t.rotation.z);
        let expected = Mat4::new_translation(&t.translation)
            * mat3_to_mat4(rotation.matrix())
            * Mat4::new_nonuniform_scaling(&t.scale);

        assert_relative_eq!(t.mat4(), expected, epsilon = 1e-5);
    }

    #[test]
    fn test_normal_matrix_is_inverse_transpose() {
        let t = sample_transform();
        let upper = t.mat4().fixed_view::<3, 3>(0, 0).into_owned();
        let expected = upper.try_inverse().unwrap().transpose();

        assert_relative_eq!(t.normal_matrix(), expected, epsilon = 1e-5);
    }

    #[test]
    fn test_ids_are_unique_and_monotonic() {
        let mut world = SceneWorld::new();
        let a = world.create_object();
        let b = world.create_object();
        let light = world.make_point_light(0.2, 0.1, Vec3::new(1.0, 0.0, 0.0));

        assert_eq!((a.id(), b.id(), light.id()), (0, 1, 2));
        world.insert(b);
        assert_eq!(world.create_object().id(), 3);
    }

    #[test]
    fn test_worlds_count_independently() {
        let mut first = SceneWorld::new();
        let mut second = SceneWorld::new();
        first.create_object();
        assert_eq!(second.create_object().id(), 0);
    }

    #[test]
    fn test_point_light_factory() {
        let mut world = SceneWorld::new();
        let light = world.make_point_light(0.5, 0.05, Vec3::new(0.1, 0.2, 0.3));
        let id = light.id();
        assert!(world.insert(light).is_none());
        let light = world.get(id).unwrap();

        assert_relative_eq!(light.transform.scale.x, 0.05);
        assert_relative_eq!(light.point_light.unwrap().light_intensity, 0.5);
        assert!(light.model.is_none());
        assert_eq!(world.len(), 1);
    }

    #[test]
    fn test_insert_with_taken_id_returns_previous_object() {
        let mut world = SceneWorld::new();
        let mut other = SceneWorld::new();

        let mut floor = world.create_object();
        floor.color = Vec3::new(1.0, 1.0, 1.0);
        assert!(world.insert(floor).is_none());

        let stranger = other.create_object();
        assert_eq!(stranger.id(), 0);
        let replaced = world.insert(stranger).unwrap();

        assert_relative_eq!(replaced.color, Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(world.len(), 1);
        assert_relative_eq!(world.get(0).unwrap().color, Vec3::zeros());
    }
}
