// config.rs — viewer configuration
//
// Lookup order:
// - CLI: --config <path>
// - Env: HOUSE_VIEWER_CONFIG
// - <exe_dir>/assets/house_viewer.json
// - ./assets/house_viewer.json
// - built-in defaults
//
// Every field is optional in the JSON file; missing fields keep their defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, ViewerError};

/// Number of tile rows and columns per target. Fixed by the tile URL scheme.
pub const TILE_GRID: u32 = 16;

const CONFIG_FILE: &str = "house_viewer.json";
const CONFIG_ENV: &str = "HOUSE_VIEWER_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub tiles: TileConfig,
    pub surface: SurfaceConfig,
    pub navigation: NavigationConfig,
    pub transition: TransitionConfig,
    pub camera: CameraConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    /// Start delay added per tile, in milliseconds.
    pub stagger_ms: u64,
    /// Number of fetch worker threads.
    pub max_concurrent: usize,
    /// Extra attempts after a failed fetch.
    pub max_retries: u32,
    /// Preview URL template. Rooms use their own `image` field instead.
    pub preview_url: String,
    /// Tile URL template. Empty disables tile streaming.
    pub tile_url: String,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            tile_width: 256,
            tile_height: 128,
            stagger_ms: 8,
            max_concurrent: 6,
            max_retries: 0,
            preview_url: "{house}/{target}/preview.jpg".to_string(),
            tile_url: "{house}/{target}/tiles/{row}_{col}.jpg".to_string(),
        }
    }
}

impl TileConfig {
    pub fn atlas_width(&self) -> u32 {
        self.tile_width * TILE_GRID
    }

    pub fn atlas_height(&self) -> u32 {
        self.tile_height * TILE_GRID
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Radius of the sphere a room panorama is projected onto.
    pub room_radius: f32,
    /// Radius of the fallback sphere for shots without a reconstructed mesh.
    pub shot_plane_size: f32,
    pub sphere_lat_segments: usize,
    pub sphere_lon_segments: usize,
    /// Map z-up reconstruction coordinates into the viewer's y-up world.
    pub y_up: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            room_radius: 500.0,
            shot_plane_size: 50.0,
            sphere_lat_segments: 40,
            sphere_lon_segments: 60,
            y_up: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub door_radius: f32,
    /// Screen point used for hover picking, in NDC. (0, 0) is the center.
    pub hit_point: [f32; 2],
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            door_radius: 2.0,
            hit_point: [0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    /// Transition time per unit of travelled distance, in milliseconds.
    pub ms_per_unit: f64,
    pub min_duration_ms: f64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            ms_per_unit: 200.0,
            min_duration_ms: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    /// Drag turning speed multiplier.
    pub sensitivity: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov: 75.0,
            near: 0.1,
            far: 10000.0,
            sensitivity: 1.0,
        }
    }
}

impl ViewerConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ViewerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Resolve the config file from CLI/env/assets and load it, falling back to defaults.
    pub fn resolve() -> Result<Self> {
        match resolve_config_path() {
            Some(path) => {
                log::info!("loading config from {}", path.display());
                Self::load(&path)
            }
            None => {
                log::debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

fn resolve_config_path() -> Option<PathBuf> {
    // CLI: --config <path>
    let mut it = std::env::args();
    while let Some(a) = it.next() {
        if a == "--config" {
            if let Some(v) = it.next() {
                return Some(PathBuf::from(v));
            }
        }
    }

    if let Ok(v) = std::env::var(CONFIG_ENV) {
        if !v.trim().is_empty() {
            return Some(PathBuf::from(v));
        }
    }

    find_asset_file(CONFIG_FILE)
}

/// Find assets/<name> next to the executable or in the working directory.
fn find_asset_file(name: &str) -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let p = dir.join("assets").join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    let p = PathBuf::from("assets").join(name);
    if p.exists() {
        return Some(p);
    }

    None
}

/// Substitute `{name}` placeholders. Placeholders without a value are kept as-is.
pub fn expand_template(template: &str, args: &[(&str, String)]) -> String {
    let mut s = template.to_string();
    for (k, v) in args {
        let placeholder = format!("{{{}}}", k);
        s = s.replace(&placeholder, v);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ViewerConfig::from_json(r#"{ "tiles": { "stagger_ms": 0 } }"#).unwrap();
        assert_eq!(cfg.tiles.stagger_ms, 0);
        assert_eq!(cfg.tiles.tile_width, 256);
        assert_eq!(cfg.transition.ms_per_unit, 200.0);
        assert!(cfg.surface.y_up);
        assert_eq!(cfg.camera.sensitivity, 1.0);
    }

    #[test]
    fn camera_sensitivity_is_configurable() {
        let cfg = ViewerConfig::from_json(r#"{ "camera": { "sensitivity": 0.5 } }"#).unwrap();
        assert_eq!(cfg.camera.sensitivity, 0.5);
        assert_eq!(cfg.camera.fov, 75.0);
    }

    #[test]
    fn atlas_is_sixteen_tiles_wide() {
        let tiles = TileConfig::default();
        assert_eq!(tiles.atlas_width(), 4096);
        assert_eq!(tiles.atlas_height(), 2048);
    }

    #[test]
    fn template_substitution() {
        let url = expand_template(
            "{house}/{target}/tiles/{row}_{col}.jpg",
            &[
                ("house", "1003".to_string()),
                ("target", "7".to_string()),
                ("row", "3".to_string()),
                ("col", "12".to_string()),
            ],
        );
        assert_eq!(url, "1003/7/tiles/3_12.jpg");
    }

    #[test]
    fn unknown_placeholders_are_kept() {
        assert_eq!(expand_template("{house}/{lod}", &[("house", "a".to_string())]), "a/{lod}");
    }
}
