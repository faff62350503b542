// navigation.rs — picking: door hotspots in room graphs, nearest shot in reconstructions

use glam::{Vec2, Vec3};

use crate::camera::{Ray, ViewCamera};
use crate::config::NavigationConfig;
use crate::house::Room;
use crate::mesh::{ray_sphere, Geometry};
use crate::pose;

/// Clickable door leading to another room.
#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    pub target: String,
    pub position: Vec3,
    pub radius: f32,
}

/// Doors of `room`. Anchors are mirrored on X (the pano is viewed from inside) and
/// turned by the room heading.
pub fn door_hotspots(room: &Room, radius: f32) -> Vec<Hotspot> {
    let rot = pose::heading_rotation(room.heading);
    room.passages
        .iter()
        .map(|p| Hotspot {
            target: p.room_id.clone(),
            position: rot * Vec3::new(-p.position[0], p.position[1], p.position[2]),
            radius,
        })
        .collect()
}

/// A shot id with its optical center in viewer coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotAnchor {
    pub id: String,
    pub center: Vec3,
}

/// What a ray can hit.
pub enum PickScene<'a> {
    Doors(&'a [Hotspot]),
    Surface {
        geometry: &'a Geometry,
        shots: &'a [ShotAnchor],
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub target: String,
    pub point: Vec3,
    pub distance: f32,
}

/// Shot whose optical center is closest to `point`. Ties keep the earlier anchor.
pub fn nearest_shot<'a>(point: Vec3, shots: &'a [ShotAnchor]) -> Option<&'a ShotAnchor> {
    let mut best: Option<(&ShotAnchor, f32)> = None;
    for anchor in shots {
        let d = anchor.center.distance_squared(point);
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((anchor, d));
        }
    }
    best.map(|(a, _)| a)
}

pub fn pick(ray: &Ray, scene: &PickScene<'_>) -> Option<Hit> {
    match scene {
        PickScene::Doors(doors) => doors
            .iter()
            .filter_map(|door| {
                ray_sphere(ray, door.position, door.radius).map(|t| Hit {
                    target: door.target.clone(),
                    point: ray.point_at(t),
                    distance: t,
                })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance)),
        PickScene::Surface { geometry, shots } => {
            let t = geometry.intersect(ray)?;
            let point = ray.point_at(t);
            nearest_shot(point, shots).map(|anchor| Hit {
                target: anchor.id.clone(),
                point,
                distance: t,
            })
        }
    }
}

/// Tracks the hover target under the configured screen point.
#[derive(Debug, Clone)]
pub struct NavigationEngine {
    hit_point: Vec2,
    hover: Option<Hit>,
}

impl NavigationEngine {
    pub fn new(config: &NavigationConfig) -> Self {
        Self {
            hit_point: Vec2::from(config.hit_point),
            hover: None,
        }
    }

    pub fn hover(&self) -> Option<&Hit> {
        self.hover.as_ref()
    }

    pub fn clear(&mut self) {
        self.hover = None;
    }

    /// Per-frame hover update.
    pub fn update(&mut self, camera: &ViewCamera, scene: &PickScene<'_>) -> Option<&Hit> {
        let hit = pick(&camera.ray_through(self.hit_point), scene);
        if hit.as_ref().map(|h| &h.target) != self.hover.as_ref().map(|h| &h.target) {
            log::debug!("hover target: {:?}", hit.as_ref().map(|h| h.target.as_str()));
        }
        self.hover = hit;
        self.hover.as_ref()
    }

    pub fn pick_at(&self, camera: &ViewCamera, ndc: Vec2, scene: &PickScene<'_>) -> Option<Hit> {
        pick(&camera.ray_through(ndc), scene)
    }
}
