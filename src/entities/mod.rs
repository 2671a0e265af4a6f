//! Entities the engine renders against: the node contract, output sinks,
//! the playback timeline and the hosting session.

pub mod node;
pub mod output;
pub mod session;
pub mod timeline;

pub use node::{FrameRange, Node, NodeId, RenderError, RenderResult, Status};
pub use output::{RenderOutput, ViewerSink, WriterSink};
pub use session::{AppMode, EngineId, Session};
pub use timeline::Timeline;
