// streamer.rs — background preview/tile fetching with generation-tagged cancellation
//
// Worker threads fetch; the render thread drains completions and is the only one that
// touches atlases. Every load gets a fresh generation and a cancel token. Stale work is
// dropped before the fetch, after the fetch, and once more in `drain`.

use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{expand_template, TileConfig};
use crate::error::FetchError;
use crate::fetch::ImageFetcher;
use crate::surface::SurfaceId;
use crate::tiles::{TileGrid, TileKey, TileState};

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Preview,
    Tile(TileKey),
}

/// Handle for one `load_preview`/`load_tiles` call. Cancelling it drops all of its work.
#[derive(Debug, Clone)]
pub struct LoadHandle {
    pub generation: Generation,
    pub surface: SurfaceId,
    pub target: String,
    token: CancelToken,
}

impl LoadHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Where a target's images live.
#[derive(Debug, Clone)]
pub struct TileSource {
    pub house_id: String,
    pub target_id: String,
    pub preview_url: Option<String>,
    /// Empty disables tiles for this target.
    pub tile_template: String,
}

impl TileSource {
    pub fn new(house_id: &str, target_id: &str, config: &TileConfig) -> Self {
        let preview_url = (!config.preview_url.is_empty())
            .then(|| expand_template(&config.preview_url, &Self::args(house_id, target_id)));
        Self {
            house_id: house_id.to_string(),
            target_id: target_id.to_string(),
            preview_url,
            tile_template: config.tile_url.clone(),
        }
    }

    fn args(house_id: &str, target_id: &str) -> Vec<(&'static str, String)> {
        vec![("house", house_id.to_string()), ("target", target_id.to_string())]
    }

    pub fn tile_url(&self, key: TileKey) -> String {
        let mut args = Self::args(&self.house_id, &self.target_id);
        args.push(("row", key.row.to_string()));
        args.push(("col", key.col.to_string()));
        expand_template(&self.tile_template, &args)
    }
}

struct Job {
    generation: Generation,
    surface: SurfaceId,
    request: Request,
    url: String,
    not_before: Instant,
    token: CancelToken,
}

/// A finished fetch, delivered on the render thread.
#[derive(Debug)]
pub struct Completion {
    pub generation: Generation,
    pub surface: SurfaceId,
    pub request: Request,
    pub result: Result<RgbaImage, FetchError>,
}

pub struct TileStreamer {
    job_tx: Option<Sender<Job>>,
    done_rx: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
    stagger: Duration,
    next_generation: u64,
    preview: Option<LoadHandle>,
    tiles: Option<LoadHandle>,
}

impl TileStreamer {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, config: &TileConfig) -> Self {
        let (job_tx, job_rx) = channel::<Job>();
        let (done_tx, done_rx) = channel::<Completion>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let workers = (0..config.max_concurrent.max(1))
            .map(|i| {
                let jobs = Arc::clone(&job_rx);
                let done = done_tx.clone();
                let fetcher = Arc::clone(&fetcher);
                let retries = config.max_retries;
                thread::Builder::new()
                    .name(format!("tile-fetch-{i}"))
                    .spawn(move || worker_loop(jobs, done, fetcher, retries))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::warn!("failed to spawn tile worker: {e}");
                    None
                }
            })
            .collect();

        Self {
            job_tx: Some(job_tx),
            done_rx,
            workers,
            stagger: Duration::from_millis(config.stagger_ms),
            next_generation: 1,
            preview: None,
            tiles: None,
        }
    }

    fn new_handle(&mut self, surface: SurfaceId, target: &str) -> LoadHandle {
        let generation = Generation(self.next_generation);
        self.next_generation += 1;
        LoadHandle {
            generation,
            surface,
            target: target.to_string(),
            token: CancelToken::default(),
        }
    }

    fn submit(&self, job: Job) {
        let Some(tx) = &self.job_tx else {
            return;
        };
        if tx.send(job).is_err() {
            log::warn!("tile workers are gone, request dropped");
        }
    }

    /// Fetch the low-resolution preview for `surface`. Supersedes any preview in flight
    /// for another surface.
    pub fn load_preview(&mut self, surface: SurfaceId, source: &TileSource) -> Option<LoadHandle> {
        let url = source.preview_url.clone()?;
        if let Some(old) = self.preview.take() {
            old.cancel();
        }

        let handle = self.new_handle(surface, &source.target_id);
        log::debug!("preview {} for surface {:?} ({:?})", url, surface, handle.generation);
        self.submit(Job {
            generation: handle.generation,
            surface,
            request: Request::Preview,
            url,
            not_before: Instant::now(),
            token: handle.token.clone(),
        });
        self.preview = Some(handle.clone());
        Some(handle)
    }

    /// Request every cell of `grid` that is not filled yet, staggering start times.
    /// A live load for the same surface and target is reused instead of re-requested.
    pub fn load_tiles(
        &mut self,
        surface: SurfaceId,
        source: &TileSource,
        grid: &mut TileGrid,
    ) -> Option<LoadHandle> {
        if source.tile_template.is_empty() {
            return None;
        }
        if let Some(live) = &self.tiles {
            if live.surface == surface && live.target == source.target_id && !live.is_cancelled() {
                return Some(live.clone());
            }
        }
        if let Some(old) = self.tiles.take() {
            old.cancel();
        }

        let handle = self.new_handle(surface, &source.target_id);
        let start = Instant::now();
        let mut issued = 0u32;
        for key in TileKey::enumerate() {
            if grid.state(key) == TileState::Filled {
                continue;
            }
            grid.set(key, TileState::Loading);
            self.submit(Job {
                generation: handle.generation,
                surface,
                request: Request::Tile(key),
                url: source.tile_url(key),
                not_before: start + self.stagger * issued,
                token: handle.token.clone(),
            });
            issued += 1;
        }
        log::debug!(
            "{} tiles of {} for surface {:?} ({:?})",
            issued,
            source.target_id,
            surface,
            handle.generation
        );

        self.tiles = Some(handle.clone());
        Some(handle)
    }

    /// Cancel every load bound to `surface`.
    pub fn cancel_surface(&mut self, surface: SurfaceId) {
        for slot in [&mut self.preview, &mut self.tiles] {
            if slot.as_ref().is_some_and(|h| h.surface == surface) {
                if let Some(h) = slot.take() {
                    h.cancel();
                }
            }
        }
    }

    pub fn cancel_all(&mut self) {
        for h in [self.preview.take(), self.tiles.take()].into_iter().flatten() {
            h.cancel();
        }
    }

    fn is_live(&self, c: &Completion) -> bool {
        let current = match c.request {
            Request::Preview => &self.preview,
            Request::Tile(_) => &self.tiles,
        };
        current
            .as_ref()
            .is_some_and(|h| h.generation == c.generation && !h.is_cancelled())
    }

    /// Completions of live loads that arrived since the last call.
    pub fn drain(&mut self) -> Vec<Completion> {
        let arrived: Vec<Completion> = self.done_rx.try_iter().collect();
        arrived.into_iter().filter(|c| self.is_live(c)).collect()
    }
}

impl Drop for TileStreamer {
    fn drop(&mut self) {
        self.cancel_all();
        self.job_tx = None;
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

fn worker_loop(
    jobs: Arc<Mutex<Receiver<Job>>>,
    done: Sender<Completion>,
    fetcher: Arc<dyn ImageFetcher>,
    max_retries: u32,
) {
    loop {
        let next = match jobs.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        let Ok(job) = next else {
            return;
        };

        if !wait_until(job.not_before, &job.token) {
            continue;
        }

        let result = fetch_with_retries(fetcher.as_ref(), &job.url, max_retries, &job.token);
        if job.token.is_cancelled() {
            continue;
        }

        let completion = Completion {
            generation: job.generation,
            surface: job.surface,
            request: job.request,
            result,
        };
        if done.send(completion).is_err() {
            return;
        }
    }
}

/// Sleep until `deadline`. Returns false as soon as the token is cancelled.
fn wait_until(deadline: Instant, token: &CancelToken) -> bool {
    const SLICE: Duration = Duration::from_millis(20);
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLICE));
    }
}

fn fetch_with_retries(
    fetcher: &dyn ImageFetcher,
    url: &str,
    max_retries: u32,
    token: &CancelToken,
) -> Result<RgbaImage, FetchError> {
    let mut attempt = 0;
    loop {
        match fetcher.fetch(url) {
            Ok(img) => return Ok(img),
            Err(e) if attempt < max_retries && !token.is_cancelled() => {
                attempt += 1;
                log::debug!("retrying {url} ({attempt}/{max_retries}): {e}");
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::collections::HashSet;

    fn config() -> TileConfig {
        TileConfig {
            tile_width: 2,
            tile_height: 2,
            stagger_ms: 0,
            max_concurrent: 4,
            ..TileConfig::default()
        }
    }

    fn source(target: &str) -> TileSource {
        TileSource::new("house", target, &config())
    }

    #[derive(Default)]
    struct Recorder {
        urls: Mutex<Vec<String>>,
    }

    impl ImageFetcher for Recorder {
        fn fetch(&self, url: &str) -> Result<RgbaImage, FetchError> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255])))
        }
    }

    fn drain_until(streamer: &mut TileStreamer, want: usize) -> Vec<Completion> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut out = Vec::new();
        while out.len() < want && Instant::now() < deadline {
            out.extend(streamer.drain());
            thread::sleep(Duration::from_millis(2));
        }
        out
    }

    #[test]
    fn tile_urls_come_from_template() {
        let src = source("shot_7");
        assert_eq!(src.preview_url.as_deref(), Some("house/shot_7/preview.jpg"));
        assert_eq!(src.tile_url(TileKey::new(3, 14)), "house/shot_7/tiles/3_14.jpg");
    }

    #[test]
    fn requests_every_cell_exactly_once() {
        let recorder = Arc::new(Recorder::default());
        let mut streamer = TileStreamer::new(recorder.clone(), &config());
        let mut grid = TileGrid::default();

        streamer.load_tiles(SurfaceId(1), &source("a"), &mut grid).unwrap();
        assert_eq!(grid.count(TileState::Loading), 256);

        let done = drain_until(&mut streamer, 256);
        assert_eq!(done.len(), 256);
        let keys: HashSet<_> = done
            .iter()
            .map(|c| match c.request {
                Request::Tile(k) => k,
                Request::Preview => panic!("unexpected preview"),
            })
            .collect();
        assert_eq!(keys.len(), 256);

        drop(streamer);
        let urls = recorder.urls.lock().unwrap();
        assert_eq!(urls.len(), 256);
        assert_eq!(urls.iter().collect::<HashSet<_>>().len(), 256);
    }

    #[test]
    fn filled_cells_are_not_requested_again() {
        let recorder = Arc::new(Recorder::default());
        let mut streamer = TileStreamer::new(recorder.clone(), &config());
        let mut grid = TileGrid::default();
        grid.set(TileKey::new(1, 1), TileState::Filled);
        grid.set(TileKey::new(16, 16), TileState::Filled);

        streamer.load_tiles(SurfaceId(1), &source("a"), &mut grid).unwrap();
        assert_eq!(drain_until(&mut streamer, 254).len(), 254);
        drop(streamer);
        assert_eq!(recorder.urls.lock().unwrap().len(), 254);
    }

    #[test]
    fn reloading_the_same_target_reuses_the_live_handle() {
        let mut streamer = TileStreamer::new(Arc::new(Recorder::default()), &TileConfig {
            stagger_ms: 1000,
            ..config()
        });
        let mut grid = TileGrid::default();
        let first = streamer.load_tiles(SurfaceId(1), &source("a"), &mut grid).unwrap();
        let second = streamer.load_tiles(SurfaceId(1), &source("a"), &mut grid).unwrap();
        assert_eq!(first.generation, second.generation);
        assert!(!first.is_cancelled());
    }

    #[test]
    fn cancelled_load_delivers_nothing() {
        let mut streamer = TileStreamer::new(Arc::new(Recorder::default()), &config());
        let mut grid = TileGrid::default();
        let handle = streamer.load_tiles(SurfaceId(1), &source("a"), &mut grid).unwrap();
        handle.cancel();

        let deadline = Instant::now() + Duration::from_millis(300);
        while Instant::now() < deadline {
            assert!(streamer.drain().is_empty());
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn new_target_supersedes_old_one() {
        let mut streamer = TileStreamer::new(Arc::new(Recorder::default()), &config());
        let mut old_grid = TileGrid::default();
        let mut new_grid = TileGrid::default();

        let old = streamer.load_tiles(SurfaceId(1), &source("a"), &mut old_grid).unwrap();
        let new = streamer.load_tiles(SurfaceId(2), &source("b"), &mut new_grid).unwrap();
        assert!(old.is_cancelled());
        assert!(new.generation > old.generation);

        let done = drain_until(&mut streamer, 256);
        assert_eq!(done.len(), 256);
        assert!(done.iter().all(|c| c.surface == SurfaceId(2) && c.generation == new.generation));
    }

    #[test]
    fn cancel_surface_only_touches_that_surface() {
        let mut streamer = TileStreamer::new(Arc::new(Recorder::default()), &TileConfig {
            stagger_ms: 1000,
            ..config()
        });
        let mut grid = TileGrid::default();
        let preview = streamer.load_preview(SurfaceId(1), &source("a")).unwrap();
        let tiles = streamer.load_tiles(SurfaceId(2), &source("b"), &mut grid).unwrap();

        streamer.cancel_surface(SurfaceId(1));
        assert!(preview.is_cancelled());
        assert!(!tiles.is_cancelled());
    }

    #[test]
    fn failures_are_retried_up_to_the_limit() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        let flaky = move |url: &str| -> Result<RgbaImage, FetchError> {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n < 3 {
                Err(FetchError::Io { url: url.to_string(), reason: "reset".to_string() })
            } else {
                Ok(RgbaImage::new(1, 1))
            }
        };

        let mut streamer = TileStreamer::new(Arc::new(flaky), &TileConfig {
            max_retries: 2,
            max_concurrent: 1,
            ..config()
        });
        streamer.load_preview(SurfaceId(1), &source("a")).unwrap();
        let done = drain_until(&mut streamer, 1);
        assert!(done[0].result.is_ok());
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[test]
    fn no_retries_by_default() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        let broken = move |url: &str| -> Result<RgbaImage, FetchError> {
            *counter.lock().unwrap() += 1;
            Err(FetchError::NotFound(url.to_string()))
        };

        let mut streamer = TileStreamer::new(Arc::new(broken), &config());
        streamer.load_preview(SurfaceId(1), &source("a")).unwrap();
        let done = drain_until(&mut streamer, 1);
        assert!(matches!(done[0].result, Err(FetchError::NotFound(_))));
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
