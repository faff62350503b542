// viewer.rs — HouseViewer: one viewer for room graphs and reconstructions
//
// Per tick: advance the transition, apply finished fetches, upload dirty atlas regions,
// update the hover target. Time is in milliseconds on any monotonic clock.

use glam::{Vec2, Vec3};
use std::sync::Arc;

use crate::backend::SceneBackend;
use crate::camera::{HeadPose, ViewCamera};
use crate::config::ViewerConfig;
use crate::error::{FetchError, Result, ViewerError};
use crate::fetch::ImageFetcher;
use crate::house::{House, ViewerMode};
use crate::navigation::{self, Hit, Hotspot, NavigationEngine, PickScene, ShotAnchor};
use crate::pose;
use crate::streamer::{Completion, Request, TileSource, TileStreamer};
use crate::surface::{ProjectionSurface, SurfaceBuilder, SurfaceId, SurfaceParts};
use crate::tiles::TileState;
use crate::transition::TransitionController;

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    NavigationStarted {
        from: Option<String>,
        to: String,
        duration_ms: f64,
    },
    NavigationCompleted {
        target: String,
    },
    PreviewReady {
        target: String,
    },
    TileProgress {
        target: String,
        filled: usize,
        failed: usize,
        total: usize,
    },
    TilesComplete {
        target: String,
    },
    LoadFailed {
        target: String,
        error: FetchError,
    },
}

/// Everything needed to show one room or shot.
struct Destination {
    parts: SurfaceParts,
    position: Vec3,
    hotspots: Vec<Hotspot>,
    source: TileSource,
}

pub struct HouseViewer<B: SceneBackend> {
    mode: ViewerMode,
    config: ViewerConfig,
    backend: B,
    builder: SurfaceBuilder,
    streamer: TileStreamer,
    navigation: NavigationEngine,
    transitions: TransitionController,
    camera: ViewCamera,
    house: Option<House>,
    anchors: Vec<ShotAnchor>,
    hotspots: Vec<Hotspot>,
    pending_hotspots: Vec<Hotspot>,
    current: Option<String>,
    next_surface: u64,
    events: Vec<ViewerEvent>,
}

impl<B: SceneBackend> HouseViewer<B> {
    pub fn new(mode: ViewerMode, config: ViewerConfig, backend: B, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            mode,
            builder: SurfaceBuilder::new(&config.surface),
            streamer: TileStreamer::new(fetcher, &config.tiles),
            navigation: NavigationEngine::new(&config.navigation),
            transitions: TransitionController::new(&config.transition),
            camera: ViewCamera::new(&config.camera, 16.0 / 9.0),
            config,
            backend,
            house: None,
            anchors: Vec::new(),
            hotspots: Vec::new(),
            pending_hotspots: Vec::new(),
            current: None,
            next_surface: 1,
            events: Vec::new(),
        }
    }

    pub fn mode(&self) -> ViewerMode {
        self.mode
    }

    pub fn camera(&self) -> &ViewCamera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut ViewCamera {
        &mut self.camera
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn house(&self) -> Option<&House> {
        self.house.as_ref()
    }

    /// Room or shot currently shown (after its transition completed).
    pub fn current_target(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn hover(&self) -> Option<&Hit> {
        self.navigation.hover()
    }

    pub fn hotspots(&self) -> &[Hotspot] {
        &self.hotspots
    }

    pub fn is_transitioning(&self) -> bool {
        self.transitions.is_transitioning()
    }

    pub fn active_surface(&self) -> Option<&ProjectionSurface> {
        self.transitions.active()
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &ProjectionSurface> {
        self.transitions.surfaces()
    }

    pub fn apply_head_pose(&mut self, pose: HeadPose) {
        self.camera.apply_head_pose(pose);
    }

    /// Replace the house. Everything shown for the previous one is released.
    pub fn set_house(&mut self, house: House) -> Result<()> {
        if house.mode() != self.mode {
            return Err(ViewerError::ModeMismatch {
                expected: self.mode.name(),
                found: house.mode().name(),
            });
        }

        for surface in self.transitions.clear() {
            self.release(surface.id);
        }
        self.streamer.cancel_all();
        self.navigation.clear();

        self.anchors = match &house {
            House::Reconstruction(rec) => rec
                .shots
                .iter()
                .map(|(id, shot)| ShotAnchor {
                    id: id.clone(),
                    center: pose::optical_center(shot, self.builder.basis()),
                })
                .collect(),
            House::RoomGraph(_) => Vec::new(),
        };
        self.hotspots.clear();
        self.pending_hotspots.clear();
        self.backend.set_hotspots(&[]);
        self.current = None;

        log::info!("house {} loaded ({} mode)", house.id(), self.mode.name());
        self.house = Some(house);
        Ok(())
    }

    pub fn load_room(&mut self, room_id: &str, now: f64) -> Result<()> {
        self.expect_mode(ViewerMode::RoomGraph)?;
        self.load_target(room_id, now)
    }

    pub fn load_shot(&mut self, shot_id: &str, now: f64) -> Result<()> {
        self.expect_mode(ViewerMode::Reconstruction)?;
        self.load_target(shot_id, now)
    }

    fn expect_mode(&self, mode: ViewerMode) -> Result<()> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(ViewerError::ModeMismatch {
                expected: self.mode.name(),
                found: mode.name(),
            })
        }
    }

    fn destination(&self, target: &str) -> Result<Destination> {
        let house = self.house.as_ref().ok_or(ViewerError::NoHouse)?;
        let tiles = &self.config.tiles;

        match house {
            House::RoomGraph(graph) => {
                let room = graph.room(target)?;
                let mut source = TileSource::new(&graph.id, &room.id, tiles);
                if !room.image.is_empty() {
                    source.preview_url = Some(room.image.clone());
                }
                Ok(Destination {
                    parts: self.builder.build_room(room),
                    position: Vec3::ZERO,
                    hotspots: navigation::door_hotspots(room, self.config.navigation.door_radius),
                    source,
                })
            }
            House::Reconstruction(rec) => {
                let (shot, camera) = rec.camera_for(target)?;
                Ok(Destination {
                    parts: self.builder.build_shot(camera, shot)?,
                    position: pose::optical_center(shot, self.builder.basis()),
                    hotspots: Vec::new(),
                    source: TileSource::new(&rec.id, target, tiles),
                })
            }
        }
    }

    /// Build the target's surface, start its preview and tiles, and transition to it.
    /// Unknown ids are rejected before anything is created.
    pub fn load_target(&mut self, target: &str, now: f64) -> Result<()> {
        let dest = self.destination(target)?;

        let id = SurfaceId(self.next_surface);
        self.next_surface += 1;
        let mut surface = ProjectionSurface::new(id, target, dest.parts, &self.config.tiles);
        surface.set_opacity(0.0);
        self.backend.create_surface(&surface);

        if self.streamer.load_preview(id, &dest.source).is_none() {
            log::debug!("no preview for {target}");
        }
        self.streamer.load_tiles(id, &dest.source, &mut surface.atlas.grid);

        let released = self
            .transitions
            .start(now, self.camera.position, dest.position, surface);
        for old in released {
            self.release(old.id);
        }

        let duration_ms = self
            .transitions
            .timeline()
            .map_or(0.0, |t| t.duration);
        log::info!(
            "navigating {} -> {} ({:.0} ms)",
            self.current.as_deref().unwrap_or("-"),
            target,
            duration_ms
        );
        self.events.push(ViewerEvent::NavigationStarted {
            from: self.current.clone(),
            to: target.to_string(),
            duration_ms,
        });

        self.pending_hotspots = dest.hotspots;
        self.navigation.clear();
        Ok(())
    }

    fn release(&mut self, id: SurfaceId) {
        self.streamer.cancel_surface(id);
        self.backend.dispose_surface(id);
    }

    /// Advance one frame and return the events raised since the last tick.
    pub fn tick(&mut self, now: f64) -> Vec<ViewerEvent> {
        self.step_transition(now);
        for completion in self.streamer.drain() {
            self.apply_completion(completion);
        }
        self.upload_dirty();

        match pick_scene(self.mode, &self.transitions, &self.hotspots, &self.anchors) {
            Some(scene) => {
                self.navigation.update(&self.camera, &scene);
            }
            None => self.navigation.clear(),
        }

        self.backend.set_camera(&self.camera);
        std::mem::take(&mut self.events)
    }

    fn step_transition(&mut self, now: f64) {
        let frame = self.transitions.advance(now);
        if let Some(position) = frame.camera_position {
            self.camera.position = position;
            for surface in self.transitions.surfaces() {
                self.backend.update_uniforms(surface.id, &surface.material.uniforms());
            }
        }

        if let Some(done) = frame.completed {
            if let Some(old) = done.released {
                self.release(old.id);
            }
            self.hotspots = std::mem::take(&mut self.pending_hotspots);
            self.backend.set_hotspots(&self.hotspots);
            log::info!("arrived at {}", done.target);
            self.current = Some(done.target.clone());
            self.events.push(ViewerEvent::NavigationCompleted { target: done.target });
        }
    }

    fn apply_completion(&mut self, completion: Completion) {
        let Some(surface) = self.transitions.surface_mut(completion.surface) else {
            return;
        };
        let target = surface.target.clone();

        match (completion.request, completion.result) {
            (Request::Preview, Ok(image)) => {
                self.backend.bind_preview(surface.id, &image);
                surface.preview_ready = true;
                self.events.push(ViewerEvent::PreviewReady { target });
            }
            (Request::Preview, Err(error)) => {
                log::warn!("preview for {target} unavailable: {error}");
                self.events.push(ViewerEvent::LoadFailed { target, error });
            }
            (Request::Tile(key), result) => {
                let was_settled = surface.atlas.grid.is_settled();
                match result {
                    Ok(tile) => {
                        surface.atlas.patch(key, &tile);
                    }
                    Err(error) => {
                        log::warn!("tile {}/{} of {target} missing: {error}", key.row, key.col);
                        surface.atlas.grid.set(key, TileState::Failed);
                    }
                }

                let grid = &surface.atlas.grid;
                self.events.push(ViewerEvent::TileProgress {
                    target: target.clone(),
                    filled: grid.count(TileState::Filled),
                    failed: grid.count(TileState::Failed),
                    total: grid.total(),
                });
                if !was_settled && grid.is_settled() {
                    log::debug!("all tiles of {target} settled");
                    self.events.push(ViewerEvent::TilesComplete { target });
                }
            }
        }
    }

    fn upload_dirty(&mut self) {
        for surface in self.transitions.surfaces_mut() {
            for region in surface.atlas.take_dirty() {
                let bytes = surface.atlas.region_bytes(region);
                self.backend.write_atlas(surface.id, region, &bytes);
            }
        }
    }

    /// Navigate to the hover target. Returns whether a navigation started.
    pub fn activate(&mut self, now: f64) -> Result<bool> {
        let target = self.navigation.hover().map(|h| h.target.clone());
        self.navigate_to(target, now)
    }

    /// Navigate to whatever lies under a click, given in NDC.
    pub fn activate_at(&mut self, ndc: Vec2, now: f64) -> Result<bool> {
        let target = pick_scene(self.mode, &self.transitions, &self.hotspots, &self.anchors)
            .and_then(|scene| self.navigation.pick_at(&self.camera, ndc, &scene))
            .map(|h| h.target);
        self.navigate_to(target, now)
    }

    fn navigate_to(&mut self, target: Option<String>, now: f64) -> Result<bool> {
        match target {
            Some(t) if self.current.as_deref() != Some(t.as_str()) => {
                self.load_target(&t, now)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Nothing is pickable mid-transition or before the first surface arrives.
fn pick_scene<'a>(
    mode: ViewerMode,
    transitions: &'a TransitionController,
    hotspots: &'a [Hotspot],
    anchors: &'a [ShotAnchor],
) -> Option<PickScene<'a>> {
    if transitions.is_transitioning() {
        return None;
    }
    let active = transitions.active()?;
    Some(match mode {
        ViewerMode::RoomGraph => PickScene::Doors(hotspots),
        ViewerMode::Reconstruction => PickScene::Surface {
            geometry: &active.geometry,
            shots: anchors,
        },
    })
}

impl<B: SceneBackend> Drop for HouseViewer<B> {
    fn drop(&mut self) {
        self.streamer.cancel_all();
    }
}
