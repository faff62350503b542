// transition.rs — camera moves and surface cross-fades between viewpoints
//
// The controller owns the active surface and at most one incoming surface. Surfaces that
// leave the controller are handed back to the caller, who releases their GPU resources.
// Starting a transition while one is running cancels it: the old outgoing surface is
// released right away and the half-faded incoming surface becomes the new outgoing one.

use glam::Vec3;

use crate::config::TransitionConfig;
use crate::surface::{ProjectionSurface, SurfaceId};

/// `distance · ms_per_unit`, never shorter than `min_ms`.
pub fn transition_duration(from: Vec3, to: Vec3, ms_per_unit: f64, min_ms: f64) -> f64 {
    (from.distance(to) as f64 * ms_per_unit).max(min_ms)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeline {
    pub start: f64,
    pub duration: f64,
    pub from: Vec3,
    pub to: Vec3,
}

impl Timeline {
    /// Normalized progress in [0, 1].
    pub fn progress(&self, now: f64) -> f32 {
        if self.duration <= 0.0 {
            return 1.0;
        }
        ((now - self.start) / self.duration).clamp(0.0, 1.0) as f32
    }

    pub fn position(&self, now: f64) -> Vec3 {
        self.from.lerp(self.to, self.progress(now))
    }

    pub fn is_done(&self, now: f64) -> bool {
        self.progress(now) >= 1.0
    }
}

#[derive(Debug)]
struct InFlight {
    timeline: Timeline,
    incoming: ProjectionSurface,
    outgoing_opacity: f32,
}

#[derive(Debug)]
pub struct Completed {
    pub promoted: SurfaceId,
    pub target: String,
    pub released: Option<ProjectionSurface>,
}

#[derive(Debug, Default)]
pub struct Frame {
    pub camera_position: Option<Vec3>,
    pub completed: Option<Completed>,
}

#[derive(Debug)]
pub struct TransitionController {
    ms_per_unit: f64,
    min_duration_ms: f64,
    active: Option<ProjectionSurface>,
    in_flight: Option<InFlight>,
}

impl TransitionController {
    pub fn new(config: &TransitionConfig) -> Self {
        Self {
            ms_per_unit: config.ms_per_unit,
            min_duration_ms: config.min_duration_ms,
            active: None,
            in_flight: None,
        }
    }

    pub fn active(&self) -> Option<&ProjectionSurface> {
        self.active.as_ref()
    }

    pub fn incoming(&self) -> Option<&ProjectionSurface> {
        self.in_flight.as_ref().map(|f| &f.incoming)
    }

    pub fn timeline(&self) -> Option<&Timeline> {
        self.in_flight.as_ref().map(|f| &f.timeline)
    }

    pub fn is_transitioning(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &ProjectionSurface> {
        self.active.iter().chain(self.in_flight.iter().map(|f| &f.incoming))
    }

    pub fn surfaces_mut(&mut self) -> impl Iterator<Item = &mut ProjectionSurface> {
        self.active
            .iter_mut()
            .chain(self.in_flight.iter_mut().map(|f| &mut f.incoming))
    }

    pub fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut ProjectionSurface> {
        self.surfaces_mut().find(|s| s.id == id)
    }

    /// Begin moving from `camera_position` to `target` while fading `incoming` in.
    /// Returns surfaces released by cancelling a running transition.
    pub fn start(
        &mut self,
        now: f64,
        camera_position: Vec3,
        target: Vec3,
        mut incoming: ProjectionSurface,
    ) -> Vec<ProjectionSurface> {
        let mut released = Vec::new();
        if let Some(flight) = self.in_flight.take() {
            log::debug!(
                "transition to {} superseded by {}",
                flight.incoming.target,
                incoming.target
            );
            released.extend(self.active.take());
            self.active = Some(flight.incoming);
        }

        let duration = transition_duration(camera_position, target, self.ms_per_unit, self.min_duration_ms);
        incoming.set_opacity(0.0);
        let outgoing_opacity = self.active.as_ref().map_or(0.0, |s| s.opacity());

        self.in_flight = Some(InFlight {
            timeline: Timeline {
                start: now,
                duration,
                from: camera_position,
                to: target,
            },
            incoming,
            outgoing_opacity,
        });
        released
    }

    /// Step the running transition to `now`.
    pub fn advance(&mut self, now: f64) -> Frame {
        let Some(flight) = self.in_flight.as_mut() else {
            return Frame::default();
        };

        let t = flight.timeline.progress(now);
        let position = flight.timeline.position(now);
        flight.incoming.set_opacity(t);
        if let Some(outgoing) = self.active.as_mut() {
            outgoing.set_opacity(flight.outgoing_opacity * (1.0 - t));
        }

        let completed = if flight.timeline.is_done(now) {
            self.in_flight.take().map(|flight| {
                let mut incoming = flight.incoming;
                incoming.set_opacity(1.0);
                let promoted = incoming.id;
                let target = incoming.target.clone();
                let released = self.active.replace(incoming);
                Completed {
                    promoted,
                    target,
                    released,
                }
            })
        } else {
            None
        };

        Frame {
            camera_position: Some(position),
            completed,
        }
    }

    /// Drop everything, e.g. when the house is replaced.
    pub fn clear(&mut self) -> Vec<ProjectionSurface> {
        let mut released: Vec<_> = self.active.take().into_iter().collect();
        released.extend(self.in_flight.take().map(|f| f.incoming));
        released
    }
}
