//! Node trait - the per-frame compute contract every graph node exposes to the engine.
//!
//! Nodes belong to the surrounding graph/document. The engine only holds
//! `Arc<dyn Node>` handles for the lifetime of one render tree build and talks
//! to them through this trait:
//! - topology: `inputs()` (live) and `render_inputs()` (point-in-time snapshot)
//! - timing: `frame_range()` with unbounded sentinels
//! - compute: `region_of_definition()` + `render_roi()`
//! - cooperative control: `set_aborted()`, `set_knobs_frozen()`, sequence hooks
//!
//! All methods take `&self`: nodes are shared between the UI/document thread
//! and the render thread, so implementations use interior mutability.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Stable node identity (membership in a render tree is tested by identity).
pub type NodeId = Uuid;

/// Sentinel reported by `frame_range()`: "no natural first frame, defer to context".
pub const UNBOUNDED_FIRST: i32 = i32::MIN;

/// Sentinel reported by `frame_range()`: "no natural last frame, defer to context".
pub const UNBOUNDED_LAST: i32 = i32::MAX;

/// Outcome of a hook that can only succeed or refuse (sequence begin/end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failed,
}

impl Status {
    pub fn is_failed(self) -> bool {
        self == Status::Failed
    }
}

/// Failure of a per-frame computation.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The node returned a failure status. It is expected to have reported
    /// the reason through its own diagnostic channel already.
    #[error("render failed")]
    Failed,
    /// Native error raised while computing (plugin error, I/O, panic payload).
    #[error("{0}")]
    Exception(#[from] anyhow::Error),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Inclusive frame range as declared by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub first: i32,
    pub last: i32,
}

impl FrameRange {
    pub fn new(first: i32, last: i32) -> Self {
        Self { first, last }
    }

    /// Fully unbounded range: both ends defer to the timeline.
    pub fn unbounded() -> Self {
        Self {
            first: UNBOUNDED_FIRST,
            last: UNBOUNDED_LAST,
        }
    }

    pub fn is_unbounded_first(&self) -> bool {
        self.first == UNBOUNDED_FIRST
    }

    pub fn is_unbounded_last(&self) -> bool {
        self.last == UNBOUNDED_LAST
    }

    /// Number of frames (inclusive), 0 for inverted ranges.
    pub fn len(&self) -> i64 {
        (self.last as i64 - self.first as i64 + 1).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_single_frame(&self) -> bool {
        self.first == self.last
    }
}

/// Scale applied to canonical coordinates when rendering (1.0 = full resolution).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderScale {
    pub x: f64,
    pub y: f64,
}

impl RenderScale {
    pub fn identity() -> Self {
        Self { x: 1.0, y: 1.0 }
    }

    /// Scale for a mipmap level: level 0 = 1.0, level 1 = 0.5, ...
    pub fn from_mipmap_level(level: u32) -> Self {
        let s = 1.0 / (1u64 << level.min(31)) as f64;
        Self { x: s, y: s }
    }
}

impl Default for RenderScale {
    fn default() -> Self {
        Self::identity()
    }
}

/// Rectangle in canonical (project) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RectD {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl RectD {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_null(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Smallest pixel rectangle enclosing this one at the given scale.
    pub fn to_pixel_enclosing(&self, scale: RenderScale) -> RectI {
        RectI {
            x1: (self.x1 * scale.x).floor() as i32,
            y1: (self.y1 * scale.y).floor() as i32,
            x2: (self.x2 * scale.x).ceil() as i32,
            y2: (self.y2 * scale.y).ceil() as i32,
        }
    }
}

/// Rectangle in pixel coordinates (x2/y2 exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RectI {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl RectI {
    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }
}

/// Full extent a node can produce at a time/scale/view.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RegionOfDefinition {
    pub rect: RectD,
    /// True when the extent is the project format rather than the node's own.
    pub is_project_format: bool,
}

/// Parameters of one region-of-interest render request.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRoIArgs {
    pub time: i32,
    pub scale: RenderScale,
    pub mipmap_level: u32,
    pub view: usize,
    /// Region of interest in pixel coordinates.
    pub render_window: RectI,
    pub is_sequential: bool,
    pub user_interaction: bool,
    pub bypass_cache: bool,
    /// Precomputed region of definition, canonical coordinates.
    pub rod: RectD,
}

/// Base trait for all nodes taking part in a render tree.
pub trait Node: Send + Sync {
    /// Unique identifier for this node
    fn id(&self) -> NodeId;

    /// Display name (used in logs and diagnostics)
    fn name(&self) -> String;

    /// Live input slots in slot order, `None` for disconnected slots.
    fn inputs(&self) -> Vec<Option<Arc<dyn Node>>>;

    /// Inputs as of the last `update_render_inputs()` call.
    ///
    /// Nodes that support concurrent graph edits keep a separate copy here;
    /// the default reads the live slots.
    fn render_inputs(&self) -> Vec<Option<Arc<dyn Node>>> {
        self.inputs()
    }

    /// Re-snapshot the live inputs into `render_inputs()`.
    fn update_render_inputs(&self) {}

    /// Declared valid range, possibly with `UNBOUNDED_FIRST`/`UNBOUNDED_LAST`.
    fn frame_range(&self) -> FrameRange {
        FrameRange::unbounded()
    }

    fn region_of_definition(
        &self,
        time: i32,
        scale: RenderScale,
        view: usize,
    ) -> RenderResult<RegionOfDefinition>;

    fn render_roi(&self, args: &RenderRoIArgs) -> RenderResult<()>;

    /// A bounded sequential pass over `[first, last]` is about to start.
    fn begin_sequence_render(&self, _first: i32, _last: i32, _view: usize) -> Status {
        Status::Ok
    }

    /// The bounded sequential pass over `[first, last]` ended.
    fn end_sequence_render(&self, _first: i32, _last: i32, _view: usize) -> Status {
        Status::Ok
    }

    /// Advisory abort flag. Compute routines poll it and stop early.
    fn set_aborted(&self, aborted: bool);

    fn is_aborted(&self) -> bool;

    /// Lock parameter editing while a non-interactive output renders.
    fn set_knobs_frozen(&self, _frozen: bool) {}

    /// Drop any non-fatal diagnostic left from a previous frame.
    fn clear_persistent_message(&self) {}

    fn is_preview_enabled(&self) -> bool {
        false
    }

    /// Render the preview thumbnail unconditionally.
    fn compute_preview_image(&self, _frame: i32) {}

    /// Render the preview thumbnail if it is stale.
    fn refresh_preview_image(&self, _frame: i32) {}

    /// True when the node's compute goes through the plugin host.
    fn is_plugin_hosted(&self) -> bool {
        false
    }

    /// True when the node only supports one uninterrupted begin → frames → end pass.
    fn is_sequential_only(&self) -> bool {
        false
    }
}

/// Depth-first search upstream of `node` for a sequential-only node.
/// Returns the first one found (the node itself included).
pub fn find_sequential_only_upstream(node: &Arc<dyn Node>) -> Option<String> {
    let mut visited = indexmap::IndexSet::new();
    find_sequential_only(node, &mut visited)
}

fn find_sequential_only(
    node: &Arc<dyn Node>,
    visited: &mut indexmap::IndexSet<NodeId>,
) -> Option<String> {
    if !visited.insert(node.id()) {
        return None;
    }
    if node.is_sequential_only() {
        return Some(node.name());
    }
    node.inputs()
        .iter()
        .flatten()
        .find_map(|input| find_sequential_only(input, visited))
}
