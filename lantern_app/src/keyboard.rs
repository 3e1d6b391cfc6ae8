//! First-person camera control
//!
//! WASD moves in the horizontal plane, E and Q move up and down, arrow keys
//! look around. Y points down in world space, so "up" is -Y.

use glfw::Key;
use lantern_engine::prelude::*;
use std::f32::consts::TAU;

/// Keys held during one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementInput {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub look_left: bool,
    pub look_right: bool,
    pub look_up: bool,
    pub look_down: bool,
}

impl MovementInput {
    /// Sample the keyboard
    pub fn from_window(window: &Window) -> Self {
        Self {
            forward: window.is_key_pressed(Key::W),
            backward: window.is_key_pressed(Key::S),
            left: window.is_key_pressed(Key::A),
            right: window.is_key_pressed(Key::D),
            up: window.is_key_pressed(Key::E),
            down: window.is_key_pressed(Key::Q),
            look_left: window.is_key_pressed(Key::Left),
            look_right: window.is_key_pressed(Key::Right),
            look_up: window.is_key_pressed(Key::Up),
            look_down: window.is_key_pressed(Key::Down),
        }
    }
}

fn axis(positive: bool, negative: bool) -> f32 {
    f32::from(u8::from(positive)) - f32::from(u8::from(negative))
}

/// Moves a transform in response to held keys
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyboardController {
    pub move_speed: f32,
    pub turn_speed: f32,
}

impl Default for KeyboardController {
    fn default() -> Self {
        Self {
            move_speed: 3.0,
            turn_speed: 1.5,
        }
    }
}

impl KeyboardController {
    /// Pitch limit in radians, short of straight up or down
    pub const PITCH_LIMIT: f32 = 1.5;

    /// Apply `input` held for `dt` seconds to `transform`
    pub fn move_in_plane_xz(&self, input: MovementInput, dt: f32, transform: &mut Transform) {
        let look = Vec3::new(
            axis(input.look_up, input.look_down),
            axis(input.look_right, input.look_left),
            0.0,
        );
        if look.norm_squared() > f32::EPSILON {
            transform.rotation += self.turn_speed * dt * look.normalize();
        }

        transform.rotation.x = transform
            .rotation
            .x
            .clamp(-Self::PITCH_LIMIT, Self::PITCH_LIMIT);
        transform.rotation.y = transform.rotation.y.rem_euclid(TAU);

        let yaw = transform.rotation.y;
        let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
        let right = Vec3::new(forward.z, 0.0, -forward.x);
        let up = Vec3::new(0.0, -1.0, 0.0);

        let direction = forward * axis(input.forward, input.backward)
            + right * axis(input.right, input.left)
            + up * axis(input.up, input.down);
        if direction.norm_squared() > f32::EPSILON {
            transform.translation += self.move_speed * dt * direction.normalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_forward_moves_along_z_at_zero_yaw() {
        let controller = KeyboardController::default();
        let mut transform = Transform::default();
        let input = MovementInput {
            forward: true,
            ..MovementInput::default()
        };

        controller.move_in_plane_xz(input, 0.5, &mut transform);

        assert_relative_eq!(transform.translation, Vec3::new(0.0, 0.0, 1.5), epsilon = 1e-6);
    }

    #[test]
    fn test_up_key_moves_toward_negative_y() {
        let controller = KeyboardController::default();
        let mut transform = Transform::default();
        let input = MovementInput {
            up: true,
            ..MovementInput::default()
        };

        controller.move_in_plane_xz(input, 1.0, &mut transform);

        assert_relative_eq!(transform.translation.y, -3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let controller = KeyboardController::default();
        let mut transform = Transform::default();
        let input = MovementInput {
            look_up: true,
            ..MovementInput::default()
        };

        controller.move_in_plane_xz(input, 10.0, &mut transform);

        assert_relative_eq!(transform.rotation.x, KeyboardController::PITCH_LIMIT);
    }

    #[test]
    fn test_yaw_wraps_to_full_turn() {
        let controller = KeyboardController::default();
        let mut transform = Transform::default();
        transform.rotation.y = TAU - 0.1;
        let input = MovementInput {
            look_right: true,
            ..MovementInput::default()
        };

        controller.move_in_plane_xz(input, 0.2, &mut transform);

        assert_relative_eq!(transform.rotation.y, 0.2, epsilon = 1e-5);
    }

    #[test]
    fn test_idle_input_leaves_transform_alone() {
        let controller = KeyboardController::default();
        let mut transform = Transform::default();
        controller.move_in_plane_xz(MovementInput::default(), 1.0, &mut transform);
        assert_eq!(transform, Transform::default());
    }
}
