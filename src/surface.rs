// surface.rs — projection surfaces: geometry + projector material + tile atlas
//
// The fragment stage lives in shader_projector.wgsl. `equirect_uv`, `perspective_uv` and
// `blend` below are the same math on the CPU; keep them in sync with the shader.

use glam::{Mat4, Vec2, Vec3, Vec4};
use std::f32::consts::TAU;

use crate::config::{SurfaceConfig, TileConfig};
use crate::error::Result;
use crate::house::{Camera, ProjectionType, Room, Shot};
use crate::mesh::{build_mesh, build_sphere, Geometry};
use crate::pose::{self, Basis};
use crate::tiles::TileAtlas;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurfaceId(pub u64);

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ProjectorUniforms {
    pub projector: [[f32; 4]; 4],
    pub opacity: f32,
    pub focal: f32,
    pub k1: f32,
    pub k2: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub kind: u32, // 0=perspective, 1=equirectangular
    pub pad: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectorMaterial {
    pub projector: Mat4,
    pub opacity: f32,
    pub focal: f32,
    pub k1: f32,
    pub k2: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub projection: ProjectionType,
}

impl ProjectorMaterial {
    /// Panorama material: equirectangular, no lens model.
    pub fn equirectangular(projector: Mat4) -> Self {
        Self {
            projector,
            opacity: 1.0,
            focal: 1.0,
            k1: 0.0,
            k2: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            projection: ProjectionType::Equirectangular,
        }
    }

    pub fn for_shot(camera: &Camera, shot: &Shot, basis: Basis) -> Self {
        let (scale_x, scale_y) = camera.aspect_scale();
        Self {
            projector: pose::projector_matrix(shot, basis),
            opacity: 1.0,
            focal: camera.focal,
            k1: camera.k1,
            k2: camera.k2,
            scale_x,
            scale_y,
            projection: camera.projection_type,
        }
    }

    pub fn uniforms(&self) -> ProjectorUniforms {
        ProjectorUniforms {
            projector: self.projector.to_cols_array_2d(),
            opacity: self.opacity,
            focal: self.focal,
            k1: self.k1,
            k2: self.k2,
            scale_x: self.scale_x,
            scale_y: self.scale_y,
            kind: match self.projection {
                ProjectionType::Perspective => 0,
                ProjectionType::Equirectangular => 1,
            },
            pad: 0.0,
        }
    }

    /// Texture coordinate for a world position, or `None` where the projector sees nothing.
    pub fn texture_coord(&self, world: Vec3) -> Option<Vec2> {
        let p = self.projector.transform_point3(world);
        match self.projection {
            ProjectionType::Equirectangular => Some(equirect_uv(p)),
            ProjectionType::Perspective => perspective_uv(p, self.focal, self.k1, self.k2, self.scale_x, self.scale_y),
        }
    }
}

/// Ray direction -> equirectangular texture coordinate.
pub fn equirect_uv(dir: Vec3) -> Vec2 {
    let b = dir.normalize();
    let lat = -b.y.asin();
    let lon = b.x.atan2(b.z);
    Vec2::new(lon / TAU + 0.5, lat / TAU * 2.0 + 0.5)
}

/// Camera-space point -> image coordinate through focal length and k1/k2 radial distortion.
pub fn perspective_uv(p: Vec3, focal: f32, k1: f32, k2: f32, scale_x: f32, scale_y: f32) -> Option<Vec2> {
    if p.z <= 0.0 {
        return None;
    }
    let x = p.x / p.z;
    let y = p.y / p.z;
    let r2 = x * x + y * y;
    let d = 1.0 + k1 * r2 + k2 * r2 * r2;
    let uv = Vec2::new(scale_x * focal * d * x + 0.5, -scale_y * focal * d * y + 0.5);
    let inside = (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y);
    inside.then_some(uv)
}

/// Tiles over preview: `high·high.a + low·low.a·(1 − high.a)`, alpha replaced by `opacity`.
pub fn blend(low: Vec4, high: Vec4, opacity: f32) -> Vec4 {
    let merged = high * high.w + low * low.w * (1.0 - high.w);
    merged.truncate().extend(opacity)
}

/// Geometry and material for one target, before it is bound to an id.
#[derive(Debug, Clone)]
pub struct SurfaceParts {
    pub geometry: Geometry,
    pub material: ProjectorMaterial,
}

#[derive(Debug, Clone)]
pub struct SurfaceBuilder {
    config: SurfaceConfig,
    basis: Basis,
}

impl SurfaceBuilder {
    pub fn new(config: &SurfaceConfig) -> Self {
        Self {
            config: config.clone(),
            basis: Basis::from_config(config.y_up),
        }
    }

    pub fn basis(&self) -> Basis {
        self.basis
    }

    /// A room panorama on a sphere around the origin, turned by the room's heading.
    pub fn build_room(&self, room: &Room) -> SurfaceParts {
        SurfaceParts {
            geometry: build_sphere(
                Vec3::ZERO,
                self.config.room_radius,
                self.config.sphere_lat_segments,
                self.config.sphere_lon_segments,
            ),
            material: ProjectorMaterial::equirectangular(pose::heading_projector(room.heading)),
        }
    }

    /// The shot's reconstructed mesh, or a sphere when the shot has none.
    pub fn build_shot(&self, camera: &Camera, shot: &Shot) -> Result<SurfaceParts> {
        let geometry = match (&shot.vertices, &shot.faces) {
            (Some(vertices), Some(faces)) if shot.has_mesh() => build_mesh(vertices, faces, self.basis)?,
            _ => {
                let size = self.config.shot_plane_size;
                let center = match camera.projection_type {
                    ProjectionType::Perspective => {
                        pose::pixel_to_vertex(camera, shot, 0.0, 0.0, size, self.basis)
                    }
                    ProjectionType::Equirectangular => pose::optical_center(shot, self.basis),
                };
                build_sphere(
                    center,
                    size,
                    self.config.sphere_lat_segments,
                    self.config.sphere_lon_segments,
                )
            }
        };

        Ok(SurfaceParts {
            geometry,
            material: ProjectorMaterial::for_shot(camera, shot, self.basis),
        })
    }
}

/// A surface the viewer can show: geometry, projector material and tile atlas.
#[derive(Debug, Clone)]
pub struct ProjectionSurface {
    pub id: SurfaceId,
    pub target: String,
    pub geometry: Geometry,
    pub material: ProjectorMaterial,
    pub atlas: TileAtlas,
    pub preview_ready: bool,
}

impl ProjectionSurface {
    pub fn new(id: SurfaceId, target: impl Into<String>, parts: SurfaceParts, tiles: &TileConfig) -> Self {
        Self {
            id,
            target: target.into(),
            geometry: parts.geometry,
            material: parts.material,
            atlas: TileAtlas::new(tiles),
            preview_ready: false,
        }
    }

    pub fn opacity(&self) -> f32 {
        self.material.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.material.opacity = opacity.clamp(0.0, 1.0);
    }
}
