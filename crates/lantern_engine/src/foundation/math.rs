//! Math utilities and types
//!
//! Thin nalgebra aliases plus the conversions needed to hand matrices to the
//! GPU as plain column arrays.

pub use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Column-major array form of a 4x4 matrix, as laid out in GLSL `mat4`
pub fn mat4_to_cols(m: &Mat4) -> [[f32; 4]; 4] {
    (*m).into()
}

/// Embed a 3x3 matrix into the upper-left corner of a 4x4 identity
pub fn mat3_to_mat4(m: &Mat3) -> Mat4 {
    m.to_homogeneous()
}

/// Homogeneous extension of a 3D vector
pub fn vec4_from(v: &Vec3, w: f32) -> [f32; 4] {
    [v.x, v.y, v.z, w]
}
