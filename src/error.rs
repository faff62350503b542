// error.rs — library error types

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ViewerError>;

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("room {0} not found in house")]
    UnknownRoom(String),

    #[error("shot {0} not found in reconstruction")]
    UnknownShot(String),

    #[error("camera {camera} referenced by shot {shot} not found")]
    UnknownCamera { shot: String, camera: String },

    #[error("house is a {found} description but the viewer runs in {expected} mode")]
    ModeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("no house has been set")]
    NoHouse,

    #[error("house description contains no rooms or shots")]
    EmptyHouse,

    #[error("unrecognized house description: {0}")]
    Schema(String),

    #[error("face {face} references vertex {index} but the mesh has {count} vertices")]
    BadFace {
        face: usize,
        index: u32,
        count: usize,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single preview or tile fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("resource {0} not found")]
    NotFound(String),

    #[error("failed to read {url}: {reason}")]
    Io { url: String, reason: String },

    #[error("failed to decode {url}: {reason}")]
    Decode { url: String, reason: String },
}
