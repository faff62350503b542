// mesh.rs — projection surface geometry: UV spheres, reconstructed meshes, ray hits

use glam::Vec3;

use crate::camera::Ray;
use crate::error::{Result, ViewerError};
use crate::pose::Basis;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Sphere { center: Vec3, radius: f32 },
    Mesh,
}

#[derive(Debug, Clone)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub shape: Shape,
}

pub fn build_sphere(center: Vec3, radius: f32, lat: usize, lon: usize) -> Geometry {
    let lat = lat.max(2);
    let lon = lon.max(3);
    let mut positions = Vec::with_capacity((lat + 1) * (lon + 1));
    let mut indices = Vec::with_capacity(lat * lon * 6);

    for i in 0..=lat {
        let theta = std::f32::consts::PI * (i as f32) / (lat as f32);
        let y = radius * theta.cos();
        let sin_t = theta.sin();

        for j in 0..=lon {
            let phi = 2.0 * std::f32::consts::PI * (j as f32) / (lon as f32);

            let x = radius * phi.cos() * sin_t;
            let z = radius * phi.sin() * sin_t;

            positions.push((center + Vec3::new(x, y, z)).to_array());
        }
    }

    for i in 0..lat {
        for j in 0..lon {
            let a = (i * (lon + 1) + j) as u32;
            let b = a + (lon + 1) as u32;

            indices.extend_from_slice(&[
                a, b, a + 1,
                b, b + 1, a + 1,
            ]);
        }
    }

    Geometry {
        positions,
        indices,
        shape: Shape::Sphere { center, radius },
    }
}

/// Triangle mesh from reconstructed vertices/faces, mapped into viewer coordinates.
pub fn build_mesh(vertices: &[[f32; 3]], faces: &[[u32; 3]], basis: Basis) -> Result<Geometry> {
    for (face, tri) in faces.iter().enumerate() {
        if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(ViewerError::BadFace {
                face,
                index,
                count: vertices.len(),
            });
        }
    }

    let positions = vertices
        .iter()
        .map(|&v| basis.apply(Vec3::from(v)).to_array())
        .collect();
    let indices = faces.iter().flatten().copied().collect();

    Ok(Geometry {
        positions,
        indices,
        shape: Shape::Mesh,
    })
}

/// Nearest hit strictly in front of the origin. A ray starting inside the sphere hits its
/// far wall; a ray starting on the sphere never hits at its own origin.
pub fn ray_sphere(ray: &Ray, center: Vec3, radius: f32) -> Option<f32> {
    let eps = radius.abs().max(1.0) * 1e-4;
    let oc = ray.origin - center;
    let b = oc.dot(ray.direction);
    let c = oc.length_squared() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    let t0 = -b - sq;
    let t1 = -b + sq;
    if t0 > eps {
        Some(t0)
    } else if t1 > eps {
        Some(t1)
    } else {
        None
    }
}

/// Möller–Trumbore, double sided.
pub fn ray_triangle(ray: &Ray, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-7;
    let e1 = b - a;
    let e2 = c - a;
    let p = ray.direction.cross(e2);
    let det = e1.dot(p);
    if det.abs() < EPS {
        return None;
    }
    let inv = 1.0 / det;
    let s = ray.origin - a;
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = ray.direction.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv;
    (t > EPS).then_some(t)
}

impl Geometry {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Distance along `ray` to the closest surface hit.
    pub fn intersect(&self, ray: &Ray) -> Option<f32> {
        match self.shape {
            Shape::Sphere { center, radius } => ray_sphere(ray, center, radius),
            Shape::Mesh => self
                .indices
                .chunks_exact(3)
                .filter_map(|tri| {
                    let [a, b, c] = [tri[0], tri[1], tri[2]]
                        .map(|i| Vec3::from(self.positions[i as usize]));
                    ray_triangle(ray, a, b, c)
                })
                .min_by(f32::total_cmp),
        }
    }
}
