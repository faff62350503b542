// backend.rs — what the viewer needs from a rendering library

use image::RgbaImage;

use crate::camera::ViewCamera;
use crate::navigation::Hotspot;
use crate::surface::{ProjectionSurface, ProjectorUniforms, SurfaceId};
use crate::tiles::TextureRegion;

/// Scene-graph operations the viewer drives. Every call happens on the render thread.
pub trait SceneBackend {
    /// Upload geometry and create the material/texture set for a new surface.
    /// The atlas texture starts out transparent at the surface's atlas size.
    fn create_surface(&mut self, surface: &ProjectionSurface);

    fn update_uniforms(&mut self, id: SurfaceId, uniforms: &ProjectorUniforms);

    /// Bind a low-resolution preview as the surface's fallback texture.
    fn bind_preview(&mut self, id: SurfaceId, image: &RgbaImage);

    /// Overwrite `region` of the atlas texture with tightly packed RGBA bytes.
    fn write_atlas(&mut self, id: SurfaceId, region: TextureRegion, rgba: &[u8]);

    fn set_hotspots(&mut self, hotspots: &[Hotspot]);

    /// Release geometry, material and textures. The id is never used again.
    fn dispose_surface(&mut self, id: SurfaceId);

    fn set_camera(&mut self, camera: &ViewCamera);
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Create(SurfaceId),
    Uniforms { id: SurfaceId, opacity: f32 },
    Preview { id: SurfaceId, width: u32, height: u32 },
    Atlas { id: SurfaceId, region: TextureRegion },
    Hotspots(Vec<String>),
    Dispose(SurfaceId),
}

/// Headless backend that only records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub calls: Vec<BackendCall>,
}

impl RecordingBackend {
    pub fn created(&self) -> Vec<SurfaceId> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Create(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn disposed(&self) -> Vec<SurfaceId> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Dispose(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn atlas_writes(&self, surface: SurfaceId) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, BackendCall::Atlas { id, .. } if *id == surface))
            .count()
    }
}

impl SceneBackend for RecordingBackend {
    fn create_surface(&mut self, surface: &ProjectionSurface) {
        self.calls.push(BackendCall::Create(surface.id));
    }

    fn update_uniforms(&mut self, id: SurfaceId, uniforms: &ProjectorUniforms) {
        self.calls.push(BackendCall::Uniforms {
            id,
            opacity: uniforms.opacity,
        });
    }

    fn bind_preview(&mut self, id: SurfaceId, image: &RgbaImage) {
        self.calls.push(BackendCall::Preview {
            id,
            width: image.width(),
            height: image.height(),
        });
    }

    fn write_atlas(&mut self, id: SurfaceId, region: TextureRegion, _rgba: &[u8]) {
        self.calls.push(BackendCall::Atlas { id, region });
    }

    fn set_hotspots(&mut self, hotspots: &[Hotspot]) {
        self.calls
            .push(BackendCall::Hotspots(hotspots.iter().map(|h| h.target.clone()).collect()));
    }

    fn dispose_surface(&mut self, id: SurfaceId) {
        self.calls.push(BackendCall::Dispose(id));
    }

    fn set_camera(&mut self, _camera: &ViewCamera) {}
}
