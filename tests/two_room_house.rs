// Walk a two-room house headlessly and check what the backend is asked to do.

use glam::{Vec2, Vec3};
use image::{Rgba, RgbaImage};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use house_viewer::backend::{BackendCall, RecordingBackend};
use house_viewer::config::TileConfig;
use house_viewer::surface::SurfaceId;
use house_viewer::{FetchError, House, HouseViewer, ViewerConfig, ViewerError, ViewerEvent, ViewerMode};

const HOUSE: &str = r#"{"data":{"house":{"id":1003,"rooms":[
    {"id":1,"image":"1.jpg","heading":0,"passages":[{"position":[0,0,-20],"roomId":2}]},
    {"id":2,"image":"2.jpg","heading":0,"passages":[{"position":[0,0,-20],"roomId":1}]}
]}}}"#;

type Log = Arc<Mutex<Vec<String>>>;

fn viewer() -> (HouseViewer<RecordingBackend>, Log) {
    let config = ViewerConfig {
        tiles: TileConfig {
            tile_width: 4,
            tile_height: 2,
            stagger_ms: 0,
            ..TileConfig::default()
        },
        ..ViewerConfig::default()
    };

    let fetched: Log = Arc::default();
    let log = fetched.clone();
    let fetcher = move |url: &str| -> Result<RgbaImage, FetchError> {
        log.lock().unwrap().push(url.to_string());
        if url.ends_with("16_16.jpg") {
            return Err(FetchError::NotFound(url.to_string()));
        }
        Ok(RgbaImage::from_pixel(4, 2, Rgba([200, 100, 50, 255])))
    };

    let mut viewer = HouseViewer::new(ViewerMode::RoomGraph, config, RecordingBackend::default(), Arc::new(fetcher));
    viewer.set_house(House::from_json(HOUSE, "fallback").unwrap()).unwrap();
    (viewer, fetched)
}

/// Tick until `target` has both its preview and every tile settled.
fn tick_until_loaded(viewer: &mut HouseViewer<RecordingBackend>, now: f64, target: &str) -> Vec<ViewerEvent> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut events = Vec::new();
    while Instant::now() < deadline {
        events.extend(viewer.tick(now));
        let tiles = events
            .iter()
            .any(|e| matches!(e, ViewerEvent::TilesComplete { target: t } if t == target));
        let preview = events
            .iter()
            .any(|e| matches!(e, ViewerEvent::PreviewReady { target: t } if t == target));
        if tiles && preview {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    events
}

#[test]
fn walks_through_the_door_and_back() {
    let (mut viewer, fetched) = viewer();

    viewer.load_room("1", 0.0).unwrap();
    let events = viewer.tick(0.0);
    assert!(events.contains(&ViewerEvent::NavigationCompleted { target: "1".to_string() }));
    assert_eq!(viewer.current_target(), Some("1"));
    assert_eq!(viewer.hotspots().len(), 1);

    // the door is straight ahead of the default camera
    assert_eq!(viewer.hover().map(|h| h.target.as_str()), Some("2"));

    assert!(viewer.activate_at(Vec2::ZERO, 10.0).unwrap());
    viewer.tick(10.0);
    assert_eq!(viewer.current_target(), Some("2"));

    assert!(viewer.activate(20.0).unwrap());
    viewer.tick(20.0);
    assert_eq!(viewer.current_target(), Some("1"));

    let backend = viewer.backend();
    assert_eq!(backend.created(), vec![SurfaceId(1), SurfaceId(2), SurfaceId(3)]);
    assert_eq!(backend.disposed(), vec![SurfaceId(1), SurfaceId(2)]);
    assert_eq!(viewer.surfaces().count(), 1);

    let urls = fetched.lock().unwrap().clone();
    assert!(urls.iter().any(|u| u == "1.jpg"));
    assert!(urls.iter().any(|u| u == "1003/1/tiles/16_1.jpg"));
}

#[test]
fn walks_between_rooms_standing_inside_the_doors() {
    // room 2 is turned half way round, so both doors land at -X
    const FACING_ROOMS: &str = r#"{"data":{"house":{"id":1003,"rooms":[
        {"id":1,"image":"a.jpg","heading":0,"passages":[{"position":[1,0,0],"roomId":2}]},
        {"id":2,"image":"b.jpg","heading":180,"passages":[{"position":[-1,0,0],"roomId":1}]}
    ]}}}"#;

    let config = ViewerConfig {
        tiles: TileConfig {
            tile_width: 4,
            tile_height: 2,
            tile_url: String::new(),
            ..TileConfig::default()
        },
        ..ViewerConfig::default()
    };
    let fetcher = |_: &str| -> Result<RgbaImage, FetchError> { Ok(RgbaImage::new(4, 2)) };
    let mut viewer = HouseViewer::new(
        ViewerMode::RoomGraph,
        config,
        RecordingBackend::default(),
        Arc::new(fetcher),
    );
    viewer.set_house(House::from_json(FACING_ROOMS, "fallback").unwrap()).unwrap();

    viewer.load_room("1", 0.0).unwrap();
    viewer.tick(0.0);
    let door = &viewer.hotspots()[0];
    assert!((door.position - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-5);
    // the camera is inside the door sphere, so whatever it faces picks the door
    assert_eq!(viewer.hover().map(|h| h.target.as_str()), Some("2"));

    assert!(viewer.activate(10.0).unwrap());
    viewer.tick(10.0);
    assert_eq!(viewer.current_target(), Some("2"));
    let door = &viewer.hotspots()[0];
    assert_eq!(door.target, "1");
    assert!((door.position - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-5);

    viewer.camera_mut().look_along(Vec3::new(0.3, -0.2, 1.0));
    viewer.tick(15.0);
    assert!(viewer.activate(20.0).unwrap());
    viewer.tick(20.0);
    assert_eq!(viewer.current_target(), Some("1"));
}

#[test]
fn released_surfaces_get_no_more_updates() {
    let (mut viewer, _) = viewer();
    viewer.load_room("1", 0.0).unwrap();
    viewer.tick(0.0);
    viewer.load_room("2", 1.0).unwrap();
    tick_until_loaded(&mut viewer, 1.0, "2");

    let mut disposed = HashSet::new();
    for call in &viewer.backend().calls {
        match call {
            BackendCall::Dispose(id) => {
                assert!(disposed.insert(*id), "{id:?} disposed twice");
            }
            BackendCall::Uniforms { id, .. } | BackendCall::Preview { id, .. } | BackendCall::Atlas { id, .. } => {
                assert!(!disposed.contains(id), "{id:?} updated after release");
            }
            _ => {}
        }
    }
    assert!(disposed.contains(&SurfaceId(1)));
}

#[test]
fn tiles_fill_the_atlas_and_failures_are_counted() {
    let (mut viewer, _) = viewer();
    viewer.load_room("1", 0.0).unwrap();
    let events = tick_until_loaded(&mut viewer, 0.0, "1");

    assert!(events.contains(&ViewerEvent::PreviewReady { target: "1".to_string() }));
    assert!(events.contains(&ViewerEvent::TilesComplete { target: "1".to_string() }));
    let last = events
        .iter()
        .rev()
        .find_map(|e| match e {
            ViewerEvent::TileProgress { filled, failed, total, .. } => Some((*filled, *failed, *total)),
            _ => None,
        })
        .unwrap();
    assert_eq!(last, (255, 1, 256));

    let surface = viewer.active_surface().unwrap();
    assert_eq!(viewer.backend().atlas_writes(surface.id), 255);
    // tile row 16 col 16 is the top-right corner; it stays transparent
    let atlas = surface.atlas.image();
    assert_eq!(atlas.get_pixel(63, 0)[3], 0);
    assert_eq!(atlas.get_pixel(0, 31)[3], 255);
}

#[test]
fn unknown_room_is_rejected_up_front() {
    let (mut viewer, fetched) = viewer();
    assert!(matches!(viewer.load_room("9", 0.0), Err(ViewerError::UnknownRoom(_))));
    assert!(viewer.backend().created().is_empty());
    assert!(viewer.tick(0.0).is_empty());
    assert!(fetched.lock().unwrap().is_empty());
}
