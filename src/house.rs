// house.rs — house descriptions: room graphs and photogrammetry reconstructions
//
// Two JSON shapes are accepted:
//   A) {"data": {"house": {"id", "rooms": [...]}}}         -> room graph
//   B) [{"shots": {...}, "cameras": {...}}] or the object -> reconstruction

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, ViewerError};

/// Which kind of house a viewer navigates. Chosen when the viewer is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerMode {
    RoomGraph,
    Reconstruction,
}

impl ViewerMode {
    pub fn name(self) -> &'static str {
        match self {
            ViewerMode::RoomGraph => "room-graph",
            ViewerMode::Reconstruction => "reconstruction",
        }
    }
}

/// Room and shot ids show up both as JSON numbers and strings.
fn de_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Num(serde_json::Number),
        Str(String),
    }

    Ok(match RawId::deserialize(d)? {
        RawId::Num(n) => n.to_string(),
        RawId::Str(s) => s,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct Passage {
    pub position: [f32; 3],
    #[serde(rename = "roomId", deserialize_with = "de_id")]
    pub room_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Room {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub image: String,
    /// Rotation of the panorama about the up axis, in degrees.
    #[serde(default)]
    pub heading: f32,
    #[serde(default)]
    pub passages: Vec<Passage>,
}

#[derive(Debug, Clone)]
pub struct RoomGraph {
    pub id: String,
    pub rooms: Vec<Room>,
}

impl RoomGraph {
    pub fn room(&self, id: &str) -> Result<&Room> {
        self.rooms
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| ViewerError::UnknownRoom(id.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionType {
    #[default]
    Perspective,
    #[serde(alias = "spherical")]
    Equirectangular,
}

/// Intrinsic calibration shared by every shot that references it.
#[derive(Debug, Clone, Deserialize)]
pub struct Camera {
    /// Focal length normalized by `max(width, height)`.
    #[serde(default = "default_focal")]
    pub focal: f32,
    #[serde(default)]
    pub k1: f32,
    #[serde(default)]
    pub k2: f32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub projection_type: ProjectionType,
}

fn default_focal() -> f32 {
    1.0
}

impl Camera {
    /// Anisotropic scale compensating for a non-square sensor.
    pub fn aspect_scale(&self) -> (f32, f32) {
        let w = self.width.max(1) as f32;
        let h = self.height.max(1) as f32;
        let m = w.max(h);
        (m / w, m / h)
    }
}

/// One captured photo and its pose. `rotation` is axis-angle.
#[derive(Debug, Clone, Deserialize)]
pub struct Shot {
    pub rotation: [f32; 3],
    pub translation: [f32; 3],
    pub camera: String,
    #[serde(default)]
    pub vertices: Option<Vec<[f32; 3]>>,
    #[serde(default)]
    pub faces: Option<Vec<[u32; 3]>>,
}

impl Shot {
    pub fn has_mesh(&self) -> bool {
        matches!((&self.vertices, &self.faces), (Some(v), Some(f)) if !v.is_empty() && !f.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub id: String,
    pub shots: BTreeMap<String, Shot>,
    pub cameras: BTreeMap<String, Camera>,
}

impl Reconstruction {
    pub fn shot(&self, id: &str) -> Result<&Shot> {
        self.shots
            .get(id)
            .ok_or_else(|| ViewerError::UnknownShot(id.to_string()))
    }

    pub fn camera_for(&self, shot_id: &str) -> Result<(&Shot, &Camera)> {
        let shot = self.shot(shot_id)?;
        let camera = self
            .cameras
            .get(&shot.camera)
            .ok_or_else(|| ViewerError::UnknownCamera {
                shot: shot_id.to_string(),
                camera: shot.camera.clone(),
            })?;
        Ok((shot, camera))
    }
}

#[derive(Debug, Clone)]
pub enum House {
    RoomGraph(RoomGraph),
    Reconstruction(Reconstruction),
}

#[derive(Deserialize)]
struct RoomGraphDoc {
    data: RoomGraphData,
}

#[derive(Deserialize)]
struct RoomGraphData {
    house: RoomGraphHouse,
}

#[derive(Deserialize)]
struct RoomGraphHouse {
    #[serde(deserialize_with = "de_id")]
    id: String,
    rooms: Vec<Room>,
}

#[derive(Deserialize)]
struct ReconstructionDoc {
    shots: BTreeMap<String, Shot>,
    #[serde(default)]
    cameras: BTreeMap<String, Camera>,
}

impl House {
    /// Parse either schema. `fallback_id` names reconstructions, which carry no id.
    pub fn from_json(text: &str, fallback_id: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(value, fallback_id)
    }

    pub fn from_value(value: serde_json::Value, fallback_id: &str) -> Result<Self> {
        let value = match value {
            serde_json::Value::Array(mut items) => {
                if items.is_empty() {
                    return Err(ViewerError::EmptyHouse);
                }
                if items.len() > 1 {
                    log::warn!(
                        "reconstruction file holds {} parts, only the first is used",
                        items.len()
                    );
                }
                items.swap_remove(0)
            }
            other => other,
        };

        let house = if value.get("data").is_some() {
            let doc: RoomGraphDoc = serde_json::from_value(value)?;
            House::RoomGraph(RoomGraph {
                id: doc.data.house.id,
                rooms: doc.data.house.rooms,
            })
        } else if value.get("shots").is_some() {
            let doc: ReconstructionDoc = serde_json::from_value(value)?;
            House::Reconstruction(Reconstruction {
                id: fallback_id.to_string(),
                shots: doc.shots,
                cameras: doc.cameras,
            })
        } else {
            return Err(ViewerError::Schema(
                "expected a `data.house` object or a `shots` map".to_string(),
            ));
        };

        if house.is_empty() {
            return Err(ViewerError::EmptyHouse);
        }
        Ok(house)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ViewerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_json(&text, &stem)
    }

    pub fn id(&self) -> &str {
        match self {
            House::RoomGraph(g) => &g.id,
            House::Reconstruction(r) => &r.id,
        }
    }

    pub fn mode(&self) -> ViewerMode {
        match self {
            House::RoomGraph(_) => ViewerMode::RoomGraph,
            House::Reconstruction(_) => ViewerMode::Reconstruction,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            House::RoomGraph(g) => g.rooms.is_empty(),
            House::Reconstruction(r) => r.shots.is_empty(),
        }
    }

    /// Id of the room or shot a viewer starts in.
    pub fn first_target(&self) -> Option<&str> {
        match self {
            House::RoomGraph(g) => g.rooms.first().map(|r| r.id.as_str()),
            House::Reconstruction(r) => r.shots.keys().next().map(String::as_str),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_ROOMS: &str = r#"{"data":{"house":{"id":1003,"rooms":[
        {"id":1,"image":"a.jpg","heading":0,"passages":[{"position":[1,0,0],"roomId":2}]},
        {"id":2,"image":"b.jpg","heading":180,"passages":[{"position":[-1,0,0],"roomId":1}]}
    ]}}}"#;

    const RECONSTRUCTION: &str = r#"[{
        "cameras": {"cam": {"focal": 0.9, "k1": -0.1, "k2": 0.01, "width": 4000, "height": 3000,
                            "projection_type": "perspective"}},
        "shots": {
            "b.jpg": {"rotation": [0, 0, 0], "translation": [0, 0, 0], "camera": "cam"},
            "a.jpg": {"rotation": [0.1, 0, 0], "translation": [1, 2, 3], "camera": "cam",
                      "vertices": [[0,0,1],[1,0,1],[0,1,1]], "faces": [[0,1,2]]}
        }
    }]"#;

    #[test]
    fn parses_room_graph() {
        let house = House::from_json(TWO_ROOMS, "unused").unwrap();
        assert_eq!(house.mode(), ViewerMode::RoomGraph);
        assert_eq!(house.id(), "1003");
        let House::RoomGraph(graph) = &house else {
            panic!("expected room graph");
        };
        let room = graph.room("2").unwrap();
        assert_eq!(room.heading, 180.0);
        assert_eq!(room.passages[0].room_id, "1");
        assert!(matches!(graph.room("9"), Err(ViewerError::UnknownRoom(_))));
    }

    #[test]
    fn parses_reconstruction() {
        let house = House::from_json(RECONSTRUCTION, "1003").unwrap();
        assert_eq!(house.mode(), ViewerMode::Reconstruction);
        assert_eq!(house.id(), "1003");
        assert_eq!(house.first_target(), Some("a.jpg"));
        let House::Reconstruction(rec) = &house else {
            panic!("expected reconstruction");
        };
        let (shot, camera) = rec.camera_for("a.jpg").unwrap();
        assert!(shot.has_mesh());
        assert_eq!(camera.projection_type, ProjectionType::Perspective);
        let (sx, sy) = camera.aspect_scale();
        assert_eq!(sx, 1.0);
        assert!((sy - 4.0 / 3.0).abs() < 1e-6);
        assert!(!rec.shot("b.jpg").unwrap().has_mesh());
    }

    #[test]
    fn missing_camera_is_reported() {
        let text = r#"{"shots": {"s": {"rotation": [0,0,0], "translation": [0,0,0], "camera": "x"}}}"#;
        let House::Reconstruction(rec) = House::from_json(text, "h").unwrap() else {
            panic!("expected reconstruction");
        };
        assert!(matches!(
            rec.camera_for("s"),
            Err(ViewerError::UnknownCamera { .. })
        ));
    }

    #[test]
    fn spherical_is_equirectangular() {
        let cam: Camera = serde_json::from_str(
            r#"{"width": 2, "height": 1, "projection_type": "spherical"}"#,
        )
        .unwrap();
        assert_eq!(cam.projection_type, ProjectionType::Equirectangular);
        assert_eq!(cam.focal, 1.0);
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert!(matches!(
            House::from_json(r#"{"rooms": []}"#, "h"),
            Err(ViewerError::Schema(_))
        ));
        assert!(matches!(House::from_json("[]", "h"), Err(ViewerError::EmptyHouse)));
    }
}
