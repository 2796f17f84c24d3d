use glam::{Mat4, Vec3};

use crate::config::CameraConfig;

/// Directions the camera is moving in during a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Movement {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
}

impl Movement {
    pub fn is_idle(&self) -> bool {
        !(self.forward || self.backward || self.left || self.right)
    }
}

/// First-person camera.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    position: Vec3,

    /// Euler angles in degrees.
    rotation: Vec3,

    fov: f32,
    aspect: f32,
    near: f32,
    far: f32,
    flip_y: bool,

    movement_speed: f32,
    rotation_speed: f32,

    view: Mat4,
    projection: Mat4,
    changed: bool,
}

impl Camera {
    pub fn new(config: &CameraConfig, aspect: f32) -> Self {
        let mut camera = Camera {
            position: Vec3::from(config.position),
            rotation: Vec3::from(config.rotation),
            fov: config.fov,
            aspect,
            near: config.near,
            far: config.far,
            flip_y: config.flip_y,
            movement_speed: config.movement_speed,
            rotation_speed: config.rotation_speed,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            changed: false,
        };
        camera.update_view();
        camera.update_projection();
        camera
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    /// Unit vector camera looks along.
    pub fn front(&self) -> Vec3 {
        let pitch = self.rotation.x.to_radians();
        let yaw = self.rotation.y.to_radians();
        Vec3::new(-pitch.cos() * yaw.sin(), pitch.sin(), pitch.cos() * yaw.cos()).normalize()
    }

    pub fn translate(&mut self, delta: Vec3) {
        self.position += delta;
        self.update_view();
    }

    /// Adds `delta` degrees to rotation.
    pub fn rotate(&mut self, delta: Vec3) {
        self.rotation += delta;
        self.update_view();
    }

    /// Rotates camera by cursor movement in pixels.
    pub fn look(&mut self, dx: f32, dy: f32) {
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        self.rotate(Vec3::new(
            dy * self.rotation_speed,
            -dx * self.rotation_speed,
            0.0,
        ));
    }

    /// Moves camera for `dt` seconds.
    pub fn advance(&mut self, movement: Movement, dt: f32) {
        if movement.is_idle() {
            return;
        }

        let front = self.front();
        let side = front.cross(Vec3::Y).normalize();
        let step = dt * self.movement_speed;

        let mut delta = Vec3::ZERO;
        if movement.forward {
            delta += front * step;
        }
        if movement.backward {
            delta -= front * step;
        }
        if movement.left {
            delta -= side * step;
        }
        if movement.right {
            delta += side * step;
        }
        self.translate(delta);
    }

    /// Called on viewport resize.
    pub fn set_aspect(&mut self, aspect: f32) {
        if self.aspect != aspect {
            self.aspect = aspect;
            self.update_projection();
        }
    }

    /// Returns `true` once after each change of view or projection.
    pub fn take_changed(&mut self) -> bool {
        std::mem::replace(&mut self.changed, false)
    }

    fn update_view(&mut self) {
        let sign = if self.flip_y { -1.0 } else { 1.0 };

        let rotation = Mat4::from_rotation_x((self.rotation.x * sign).to_radians())
            * Mat4::from_rotation_y(self.rotation.y.to_radians())
            * Mat4::from_rotation_z(self.rotation.z.to_radians());

        let mut translation = self.position;
        if self.flip_y {
            translation.y = -translation.y;
        }

        self.view = rotation * Mat4::from_translation(translation);
        self.changed = true;
    }

    fn update_projection(&mut self) {
        let mut projection =
            Mat4::perspective_rh_gl(self.fov.to_radians(), self.aspect, self.near, self.far);
        if self.flip_y {
            projection.y_axis.y = -projection.y_axis.y;
        }
        self.projection = projection;
        self.changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        let config = CameraConfig {
            position: [0.0; 3],
            rotation: [0.0; 3],
            ..CameraConfig::default()
        };
        Camera::new(&config, 16.0 / 9.0)
    }

    #[test]
    fn projection_flips_y() {
        let camera = camera();
        let projection = camera.projection();
        assert!(projection.y_axis.y < 0.0);
        assert!(projection.x_axis.x > 0.0);

        let unflipped = Mat4::perspective_rh_gl(60f32.to_radians(), 16.0 / 9.0, 0.1, 512.0);
        assert!((projection.y_axis.y + unflipped.y_axis.y).abs() < 1e-6);
    }

    #[test]
    fn view_translation_negates_y() {
        let mut camera = camera();
        camera.translate(Vec3::new(1.0, 2.0, 3.0));

        let view = camera.view();
        assert!(view
            .w_axis
            .truncate()
            .abs_diff_eq(Vec3::new(1.0, -2.0, 3.0), 1e-6));
    }

    #[test]
    fn changes_are_reported_once() {
        let mut camera = camera();
        assert!(camera.take_changed());
        assert!(!camera.take_changed());

        camera.look(0.0, 0.0);
        camera.advance(Movement::default(), 1.0);
        assert!(!camera.take_changed());

        camera.look(4.0, 0.0);
        assert!(camera.take_changed());
        assert!((camera.rotation().y + 1.0).abs() < 1e-6);

        camera.set_aspect(16.0 / 9.0);
        assert!(!camera.take_changed());
        camera.set_aspect(1.0);
        assert!(camera.take_changed());
    }

    #[test]
    fn forward_moves_along_front() {
        let mut camera = camera();
        let front = camera.front();
        camera.advance(
            Movement {
                forward: true,
                ..Movement::default()
            },
            0.5,
        );

        assert!(camera.position().abs_diff_eq(front * 1.5, 1e-6));
    }
}
