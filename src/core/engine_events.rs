//! Notifications emitted by a render engine.
//!
//! Emitted synchronously on the rendering thread through the engine's
//! [`EventBus`](super::event_bus::EventBus). Observers never take part in the
//! engine's correctness: they are telemetry and UI refresh hooks.

use crate::entities::session::EngineId;

/// A run started. `working` is already true when this fires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineStartedEvent {
    pub engine: EngineId,
    pub forward: bool,
    pub frame_count: i32,
}

/// Why a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Requested frames produced, range boundary reached, or a frame failed.
    Finished,
    /// An abort request was drained by this stop.
    Aborted,
}

/// A run ended. `working` is already false when this fires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineStoppedEvent {
    pub engine: EngineId,
    pub reason: StopReason,
}

impl EngineStoppedEvent {
    pub fn was_aborted(&self) -> bool {
        self.reason == StopReason::Aborted
    }
}

/// One frame was computed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRenderedEvent {
    pub engine: EngineId,
    pub frame: i32,
}

/// Playback throughput (advisory).
#[derive(Clone, Debug, PartialEq)]
pub struct FpsChangedEvent {
    pub engine: EngineId,
    pub actual: f64,
    pub desired: f64,
}

/// A display sink produced a new image and should be redrawn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedrawRequestedEvent {
    pub engine: EngineId,
    pub frame: i32,
}
