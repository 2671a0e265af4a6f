//! Output sinks - the root node of a render tree.
//!
//! An engine renders into exactly one output, either a display sink
//! (viewer) or a persistence sink (writer). The variant is fixed when the
//! output is wrapped, so the per-frame path branches on a tag instead of
//! inspecting node types.

use std::sync::Arc;

use super::node::{Node, NodeId, RenderResult};
use super::timeline::Timeline;

/// Display sink: shows frames interactively and drives its own timeline.
pub trait ViewerSink: Node {
    /// Timeline this viewer plays back.
    fn timeline(&self) -> Arc<Timeline>;

    /// Render `time` for display. Implementations consult the frame cache
    /// before computing upstream.
    fn render_viewer(&self, time: i32, single_threaded: bool, is_sequential: bool) -> RenderResult<()>;

    /// Show the "no image" state after a failure.
    fn disconnect_viewer(&self);

    /// True when the timeline range follows the rendered node's own range.
    fn is_frame_range_locked(&self) -> bool {
        true
    }

    fn notify_render_finished(&self) {}
}

/// Persistence sink: writes every frame of a bounded sequence.
pub trait WriterSink: Node {
    fn set_first_frame(&self, frame: i32);
    fn set_last_frame(&self, frame: i32);
    fn first_frame(&self) -> i32;
    fn last_frame(&self) -> i32;

    fn set_current_frame(&self, frame: i32);
    fn current_frame(&self) -> i32;

    /// Marks a whole-sequence render in progress (released at stop).
    fn set_doing_full_sequence_render(&self, doing: bool);

    /// Unattended runs: the whole sequence is done (success or not).
    fn notify_render_finished(&self) {}
}

/// Output of a render tree, tagged once at construction.
#[derive(Clone)]
pub enum RenderOutput {
    Viewer {
        node: Arc<dyn Node>,
        sink: Arc<dyn ViewerSink>,
    },
    Writer {
        node: Arc<dyn Node>,
        sink: Arc<dyn WriterSink>,
    },
}

impl RenderOutput {
    pub fn viewer<V: ViewerSink + 'static>(viewer: Arc<V>) -> Self {
        Self::Viewer {
            node: viewer.clone(),
            sink: viewer,
        }
    }

    pub fn writer<W: WriterSink + 'static>(writer: Arc<W>) -> Self {
        Self::Writer {
            node: writer.clone(),
            sink: writer,
        }
    }

    /// The output as a plain graph node.
    pub fn node(&self) -> &Arc<dyn Node> {
        match self {
            Self::Viewer { node, .. } | Self::Writer { node, .. } => node,
        }
    }

    pub fn id(&self) -> NodeId {
        self.node().id()
    }

    pub fn is_viewer(&self) -> bool {
        matches!(self, Self::Viewer { .. })
    }

    pub fn as_viewer(&self) -> Option<&Arc<dyn ViewerSink>> {
        match self {
            Self::Viewer { sink, .. } => Some(sink),
            Self::Writer { .. } => None,
        }
    }

    pub fn as_writer(&self) -> Option<&Arc<dyn WriterSink>> {
        match self {
            Self::Writer { sink, .. } => Some(sink),
            Self::Viewer { .. } => None,
        }
    }

    pub fn notify_render_finished(&self) {
        match self {
            Self::Viewer { sink, .. } => sink.notify_render_finished(),
            Self::Writer { sink, .. } => sink.notify_render_finished(),
        }
    }
}

impl std::fmt::Debug for RenderOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_viewer() { "Viewer" } else { "Writer" };
        f.debug_struct("RenderOutput")
            .field("kind", &kind)
            .field("node", &self.node().name())
            .finish()
    }
}
