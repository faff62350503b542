//! Streaming house viewer: walk a house through room panoramas or reconstructed camera shots,
//! with imagery streamed in as a 16x16 tile grid over a low-resolution preview.
//!
//! [`viewer::HouseViewer`] is the entry point. It drives any [`backend::SceneBackend`]; the
//! wgpu one lives in [`renderer`], and [`backend::RecordingBackend`] runs headless.

pub mod backend;
pub mod camera;
pub mod config;
pub mod error;
pub mod fetch;
pub mod house;
pub mod mesh;
pub mod navigation;
pub mod pose;
pub mod renderer;
pub mod streamer;
pub mod surface;
pub mod tiles;
pub mod transition;
pub mod viewer;

pub use config::ViewerConfig;
pub use error::{FetchError, Result, ViewerError};
pub use house::{House, ViewerMode};
pub use viewer::{HouseViewer, ViewerEvent};
