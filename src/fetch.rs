// fetch.rs — image sources for previews and tiles

use image::io::Reader as ImageReader;
use image::RgbaImage;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use crate::error::FetchError;

/// Blocking image fetch. Called from streamer worker threads.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<RgbaImage, FetchError>;
}

impl<F> ImageFetcher for F
where
    F: Fn(&str) -> Result<RgbaImage, FetchError> + Send + Sync,
{
    fn fetch(&self, url: &str) -> Result<RgbaImage, FetchError> {
        self(url)
    }
}

/// Reads images from disk. Relative URLs resolve against `root`.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, url: &str) -> PathBuf {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        }
    }
}

impl ImageFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<RgbaImage, FetchError> {
        let path = self.resolve(url);
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(url.to_string()),
            _ => FetchError::Io {
                url: url.to_string(),
                reason: e.to_string(),
            },
        })?;
        let reader = BufReader::new(file);

        let img = ImageReader::new(reader)
            .with_guessed_format()
            .map_err(image::ImageError::IoError)
            .and_then(|mut r| {
                r.no_limits();
                r.decode()
            })
            .map_err(|e| FetchError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(img.to_rgba8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("house_viewer_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn reads_relative_png() {
        let dir = scratch_dir("fetch_png");
        let img = RgbaImage::from_pixel(4, 2, Rgba([10, 20, 30, 255]));
        img.save(dir.join("tile.png")).unwrap();

        let fetched = FileFetcher::new(&dir).fetch("tile.png").unwrap();
        assert_eq!(fetched.dimensions(), (4, 2));
        assert_eq!(fetched.get_pixel(3, 1), &Rgba([10, 20, 30, 255]));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = scratch_dir("fetch_missing");
        let err = FileFetcher::new(&dir).fetch("nope.jpg").unwrap_err();
        assert_eq!(err, FetchError::NotFound("nope.jpg".to_string()));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = scratch_dir("fetch_garbage");
        std::fs::write(dir.join("bad.jpg"), b"not an image").unwrap();
        let err = FileFetcher::new(&dir).fetch("bad.jpg").unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn file_scheme_and_absolute_paths() {
        let f = FileFetcher::new("/data/houses");
        assert_eq!(f.resolve("1003/a.jpg"), PathBuf::from("/data/houses/1003/a.jpg"));
        assert_eq!(f.resolve("file:///tmp/a.jpg"), PathBuf::from("/tmp/a.jpg"));
    }
}
