//! Render scheduling - dependency tree, playback clock, the per-output
//! engine and its events.
//!
//! Independent of any UI: an embedding application wraps its output node in
//! a [`RenderOutput`](crate::entities::output::RenderOutput) and drives it
//! through [`RenderEngine`].

pub mod clock;
pub mod engine;
pub mod engine_events;
pub mod event_bus;
pub mod frame_cache;
pub mod frame_range;
pub mod render_tree;
pub mod run_args;
pub mod sync;

pub use clock::{ClockMode, PlaybackClock};
pub use engine::{EngineError, RenderEngine, RenderRequest, StartRejected};
pub use engine_events::{
    EngineStartedEvent, EngineStoppedEvent, FpsChangedEvent, FrameRenderedEvent, RedrawRequestedEvent, StopReason,
};
pub use event_bus::EventBus;
pub use frame_cache::{Frame, FrameCache, FrameKey, LruFrameCache};
pub use frame_range::resolve_frame_range;
pub use render_tree::RenderTree;
pub use run_args::{PlaybackMode, RunArgs, UNBOUNDED_FRAME_COUNT};
