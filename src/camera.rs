// camera.rs — view camera (position, yaw/pitch/fov) and picking rays

use glam::{EulerRot, Mat4, Quat, Vec2, Vec3};

use crate::config::CameraConfig;

/// A ray with a normalized direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or(Vec3::NEG_Z),
        }
    }

    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Head orientation reported by a VR device, in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeadPose {
    pub yaw: f32,
    pub pitch: f32,
}

/// First-person camera. Yaw 0 / pitch 0 looks down -Z; positive yaw turns left.
#[derive(Debug, Clone)]
pub struct ViewCamera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    /// Multiplier on drag turning speed.
    pub sensitivity: f32,
}

impl ViewCamera {
    pub fn new(config: &CameraConfig, aspect: f32) -> Self {
        Self {
            position: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            fov: config.fov,
            aspect,
            near: config.near,
            far: config.far,
            sensitivity: config.sensitivity,
        }
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_euler(
            EulerRot::YXZ,
            self.yaw.to_radians(),
            self.pitch.to_radians(),
            0.0,
        )
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation() * Vec3::NEG_Z
    }

    /// Turn so that `dir` is straight ahead.
    pub fn look_along(&mut self, dir: Vec3) {
        let dir = dir.normalize_or(Vec3::NEG_Z);
        self.yaw = (-dir.x).atan2(-dir.z).to_degrees();
        self.pitch = dir.y.clamp(-1.0, 1.0).asin().to_degrees();
    }

    pub fn view(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation(), self.position).inverse()
    }

    pub fn projection(&self) -> Mat4 {
        // tan(fov/2) blows up at 180°
        let fov = self.fov.clamp(1.0, 179.0).to_radians();
        Mat4::perspective_rh(fov, self.aspect.max(1e-3), self.near, self.far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Ray from the eye through a point given in normalized device coordinates.
    pub fn ray_through(&self, ndc: Vec2) -> Ray {
        let inv = self.view_proj().inverse();
        let near = inv.project_point3(Vec3::new(ndc.x, ndc.y, 0.0));
        let far = inv.project_point3(Vec3::new(ndc.x, ndc.y, 1.0));
        Ray::new(self.position, far - near)
    }

    /// Convert a window pixel position to NDC.
    pub fn pixel_to_ndc(x: f32, y: f32, width: f32, height: f32) -> Vec2 {
        if width <= 0.0 || height <= 0.0 {
            return Vec2::ZERO;
        }
        Vec2::new(2.0 * x / width - 1.0, 1.0 - 2.0 * y / height)
    }

    /// Mouse drag in pixels; one pixel turns by one pixel's worth of field of view.
    pub fn drag(&mut self, dx: f32, dy: f32, width: f32, height: f32) {
        if width <= 0.0 || height <= 0.0 {
            return;
        }
        let v_f = self.fov.to_radians();
        let aspect = width / height;
        let h_f = 2.0 * ((v_f / 2.0).tan() * aspect).atan();

        let yaw_per_px_deg = (h_f / width).to_degrees();
        let pitch_per_px_deg = (v_f / height).to_degrees();

        self.yaw += dx * yaw_per_px_deg * self.sensitivity;
        self.pitch = (self.pitch + dy * pitch_per_px_deg * self.sensitivity).clamp(-89.9, 89.9);
    }

    pub fn zoom(&mut self, scroll: f32) {
        self.fov = (self.fov - scroll * 2.5).clamp(5.0, 120.0);
    }

    pub fn apply_head_pose(&mut self, pose: HeadPose) {
        self.yaw = pose.yaw;
        self.pitch = pose.pitch.clamp(-89.9, 89.9);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> ViewCamera {
        ViewCamera::new(&CameraConfig::default(), 16.0 / 9.0)
    }

    #[test]
    fn default_looks_down_negative_z() {
        let cam = camera();
        assert!((cam.forward() - Vec3::NEG_Z).length() < 1e-5);
        let ray = cam.ray_through(Vec2::ZERO);
        assert!((ray.direction - Vec3::NEG_Z).length() < 1e-4);
    }

    #[test]
    fn look_along_round_trips() {
        let mut cam = camera();
        for dir in [Vec3::X, Vec3::NEG_X, Vec3::new(0.3, 0.4, -0.8), Vec3::Z] {
            cam.look_along(dir);
            assert!((cam.forward() - dir.normalize()).length() < 1e-4, "{dir:?}");
            assert!((cam.ray_through(Vec2::ZERO).direction - dir.normalize()).length() < 1e-3);
        }
    }

    #[test]
    fn ray_origin_follows_camera() {
        let mut cam = camera();
        cam.position = Vec3::new(1.0, 2.0, 3.0);
        let ray = cam.ray_through(Vec2::new(0.5, -0.5));
        assert_eq!(ray.origin, cam.position);
        assert!((ray.direction.length() - 1.0).abs() < 1e-5);
        assert!(ray.direction.x > 0.0 && ray.direction.y < 0.0);
    }

    #[test]
    fn pixel_to_ndc_center_and_corners() {
        assert_eq!(ViewCamera::pixel_to_ndc(640.0, 360.0, 1280.0, 720.0), Vec2::ZERO);
        assert_eq!(ViewCamera::pixel_to_ndc(0.0, 0.0, 1280.0, 720.0), Vec2::new(-1.0, 1.0));
    }

    #[test]
    fn sensitivity_scales_drag() {
        let mut slow = camera();
        let mut fast = ViewCamera::new(&CameraConfig { sensitivity: 2.0, ..CameraConfig::default() }, 16.0 / 9.0);
        slow.drag(10.0, 5.0, 1280.0, 720.0);
        fast.drag(10.0, 5.0, 1280.0, 720.0);
        assert!(slow.yaw > 0.0);
        assert!((fast.yaw - 2.0 * slow.yaw).abs() < 1e-4);
        assert!((fast.pitch - 2.0 * slow.pitch).abs() < 1e-4);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut cam = camera();
        cam.drag(0.0, 1.0e6, 1280.0, 720.0);
        assert!(cam.pitch <= 89.9);
    }
}
