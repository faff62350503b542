// pose.rs — shot pose math: axis-angle rotation, optical centers, projector matrices
//
// Reconstruction convention: a world point p lands in camera space at R·p + t, where R is
// the exponential map of the shot's axis-angle `rotation`. Reconstructions are z-up; the
// viewer's world is y-up, so positions optionally go through `Basis::YUp`.

use glam::{Mat3, Mat4, Vec3};

use crate::house::{Camera, Shot};

/// Rotation of -90° about X: (x, y, z) -> (x, z, -y).
#[rustfmt::skip]
pub const Y_UP: Mat4 = Mat4::from_cols_array(&[
    1.0, 0.0,  0.0, 0.0,
    0.0, 0.0, -1.0, 0.0,
    0.0, 1.0,  0.0, 0.0,
    0.0, 0.0,  0.0, 1.0,
]);

/// Mapping from reconstruction coordinates to viewer coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    Native,
    YUp,
}

impl Basis {
    pub fn from_config(y_up: bool) -> Self {
        if y_up {
            Basis::YUp
        } else {
            Basis::Native
        }
    }

    /// Reconstruction -> viewer.
    pub fn matrix(self) -> Mat4 {
        match self {
            Basis::Native => Mat4::IDENTITY,
            Basis::YUp => Y_UP,
        }
    }

    /// Viewer -> reconstruction. The basis is orthonormal so this is a transpose.
    pub fn inverse(self) -> Mat4 {
        self.matrix().transpose()
    }

    pub fn apply(self, p: Vec3) -> Vec3 {
        self.matrix().transform_point3(p)
    }
}

/// Rodrigues rotation of `v` about `normalize(aa)` by `|aa|` radians.
/// A zero-length `aa` is the identity.
pub fn rotate(v: Vec3, aa: Vec3) -> Vec3 {
    let angle = aa.length();
    if angle < f32::EPSILON {
        return v;
    }
    let k = aa / angle;
    let (s, c) = angle.sin_cos();
    v * c + k.cross(v) * s + k * k.dot(v) * (1.0 - c)
}

pub fn rotation_matrix(aa: Vec3) -> Mat3 {
    Mat3::from_cols(rotate(Vec3::X, aa), rotate(Vec3::Y, aa), rotate(Vec3::Z, aa))
}

/// World position of the shot's lens, in viewer coordinates.
pub fn optical_center(shot: &Shot, basis: Basis) -> Vec3 {
    let r = Vec3::from(shot.rotation);
    let t = Vec3::from(shot.translation);
    basis.apply(-rotate(t, -r))
}

/// Viewer world -> shot camera space.
pub fn projector_matrix(shot: &Shot, basis: Basis) -> Mat4 {
    let r = rotation_matrix(Vec3::from(shot.rotation));
    let t = Vec3::from(shot.translation);
    Mat4::from_translation(t) * Mat4::from_mat3(r) * basis.inverse()
}

/// Inverse-project a pixel offset from the image center at depth `scale` into the world.
pub fn pixel_to_vertex(camera: &Camera, shot: &Shot, u: f32, v: f32, scale: f32, basis: Basis) -> Vec3 {
    let norm = camera.width.max(camera.height).max(1) as f32;
    let focal = if camera.focal.abs() < f32::EPSILON { 1.0 } else { camera.focal };
    let bearing = Vec3::new(u / norm / focal, v / norm / focal, 1.0);
    let p = bearing * scale;

    let r = Vec3::from(shot.rotation);
    let t = Vec3::from(shot.translation);
    basis.apply(rotate(p - t, -r))
}

/// Projector for a room panorama rotated by `heading` degrees about the up axis.
pub fn heading_projector(heading_deg: f32) -> Mat4 {
    Mat4::from_rotation_y(-heading_deg.to_radians())
}

/// Rotation applied to a room's door anchors.
pub fn heading_rotation(heading_deg: f32) -> Mat3 {
    Mat3::from_rotation_y(heading_deg.to_radians())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::house::ProjectionType;

    fn shot(rotation: [f32; 3], translation: [f32; 3]) -> Shot {
        Shot {
            rotation,
            translation,
            camera: "cam".to_string(),
            vertices: None,
            faces: None,
        }
    }

    fn camera() -> Camera {
        Camera {
            focal: 0.8,
            k1: 0.0,
            k2: 0.0,
            width: 4000,
            height: 3000,
            projection_type: ProjectionType::Perspective,
        }
    }

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn zero_axis_is_identity() {
        for v in [Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO, Vec3::new(-4.5, 0.25, 9.0)] {
            assert_eq!(rotate(v, Vec3::ZERO), v);
        }
        assert_eq!(rotation_matrix(Vec3::ZERO), Mat3::IDENTITY);
    }

    #[test]
    fn quarter_turn_about_z() {
        let aa = Vec3::new(0.0, 0.0, std::f32::consts::FRAC_PI_2);
        assert!(close(rotate(Vec3::X, aa), Vec3::Y));
        assert!(close(rotate(Vec3::Y, aa), -Vec3::X));
    }

    #[test]
    fn rotation_matches_glam_axis_angle() {
        let aa = Vec3::new(0.3, -1.2, 0.7);
        let expected = Mat3::from_axis_angle(aa.normalize(), aa.length());
        let v = Vec3::new(1.0, -2.0, 0.5);
        assert!(close(rotation_matrix(aa) * v, expected * v));
    }

    #[test]
    fn y_up_maps_z_to_y() {
        assert!(close(Basis::YUp.apply(Vec3::Z), Vec3::Y));
        assert!(close(Basis::YUp.apply(Vec3::Y), -Vec3::Z));
    }

    #[test]
    fn projector_sends_optical_center_to_origin() {
        let cases = [
            ([0.0, 0.0, 0.0], [1.0, 2.0, 3.0]),
            ([0.4, -0.2, 1.3], [-5.0, 0.5, 2.0]),
            ([3.0, 0.0, 0.0], [0.0, 0.0, 10.0]),
        ];
        for basis in [Basis::Native, Basis::YUp] {
            for (r, t) in cases {
                let s = shot(r, t);
                let center = optical_center(&s, basis);
                let m = projector_matrix(&s, basis);
                assert!(close(m.transform_point3(center), Vec3::ZERO));
                assert!(close(m.inverse().transform_point3(Vec3::ZERO), center));
            }
        }
    }

    #[test]
    fn principal_point_lies_on_optical_axis() {
        let s = shot([0.2, 0.5, -0.1], [1.0, -1.0, 4.0]);
        let cam = camera();
        for basis in [Basis::Native, Basis::YUp] {
            let center = optical_center(&s, basis);
            assert!(close(pixel_to_vertex(&cam, &s, 0.0, 0.0, 0.0, basis), center));

            let p = pixel_to_vertex(&cam, &s, 0.0, 0.0, 50.0, basis);
            assert!(((p - center).length() - 50.0).abs() < 1e-3);

            // Back through the projector it sits straight ahead of the lens.
            let local = projector_matrix(&s, basis).transform_point3(p);
            assert!(close(local, Vec3::new(0.0, 0.0, 50.0)));
        }
    }

    #[test]
    fn pixel_offset_scales_with_focal() {
        let s = shot([0.0, 0.0, 0.0], [0.0, 0.0, 0.0]);
        let cam = camera();
        let p = pixel_to_vertex(&cam, &s, 400.0, 0.0, 1.0, Basis::Native);
        assert!(close(p, Vec3::new(400.0 / 4000.0 / 0.8, 0.0, 1.0)));
    }

    #[test]
    fn heading_rotates_doors_and_projector_consistently() {
        let heading = 90.0;
        let door = heading_rotation(heading) * Vec3::new(-1.0, 0.0, 0.0);
        let local = heading_projector(heading).transform_point3(door);
        assert!(close(local, Vec3::new(-1.0, 0.0, 0.0)));
    }
}
