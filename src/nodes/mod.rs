//! Concrete nodes: procedural sources, a merge, a sequential-only reader and
//! the two output sinks.
//!
//! Pixels are single-channel `f32` planes ([`Frame`]) over the project
//! format. Nodes pull their inputs through [`ImageNode::produce`], checking
//! their abort flag once per row.

pub mod generator;
pub mod merge;
pub mod sequence;
pub mod viewer;
pub mod writer;

pub use generator::{Generator, Pattern};
pub use merge::{Merge, MergeOp};
pub use sequence::SequenceReader;
pub use viewer::Viewer;
pub use writer::Writer;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::trace;
use uuid::Uuid;

use crate::core::frame_cache::Frame;
use crate::entities::node::{Node, NodeId, RectD, RectI, RegionOfDefinition, RenderError, RenderResult};

/// Canonical project format shared by the built-in nodes.
pub const PROJECT_FORMAT: RectD = RectD {
    x1: 0.0,
    y1: 0.0,
    x2: 160.0,
    y2: 90.0,
};

pub fn project_rod() -> RegionOfDefinition {
    RegionOfDefinition {
        rect: PROJECT_FORMAT,
        is_project_format: true,
    }
}

/// A node able to hand its pixels to a downstream node.
pub trait ImageNode: Node {
    fn produce(&self, time: i32, view: usize, window: RectI) -> RenderResult<Frame>;

    fn node_base(&self) -> &NodeBase;

    /// Hash of everything feeding this node's pixels: its own parameters
    /// and, recursively, the nodes in its render-input slots.
    /// Changes on any parameter edit or rewire upstream.
    fn render_hash(&self) -> u64 {
        let base = self.node_base();
        let mut hasher = DefaultHasher::new();
        base.id().hash(&mut hasher);
        base.revision().hash(&mut hasher);
        for slot in base.render_input_slots() {
            // Empty slots still shift the hash so a disconnect is seen
            slot.map(|input| input.render_hash()).hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Connected input: the same node seen as graph node and as pixel source.
#[derive(Clone)]
pub struct ImageInput {
    node: Arc<dyn Node>,
    image: Arc<dyn ImageNode>,
}

impl ImageInput {
    pub fn new<N: ImageNode + 'static>(node: Arc<N>) -> Self {
        Self {
            node: node.clone(),
            image: node,
        }
    }

    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    pub fn produce(&self, time: i32, view: usize, window: RectI) -> RenderResult<Frame> {
        self.image.produce(time, view, window)
    }

    pub fn render_hash(&self) -> u64 {
        self.image.render_hash()
    }
}

impl std::fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ImageInput({})", self.node.name())
    }
}

/// State every built-in node carries: identity, flags, and input slots
/// with their render-time snapshot.
#[derive(Debug)]
pub struct NodeBase {
    id: NodeId,
    name: String,
    aborted: AtomicBool,
    knobs_frozen: AtomicBool,
    /// Bumped on every parameter edit and reconnection
    revision: AtomicU64,
    inputs: Mutex<Vec<Option<ImageInput>>>,
    render_inputs: Mutex<Vec<Option<ImageInput>>>,
}

impl NodeBase {
    pub fn new(name: &str, slots: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            aborted: AtomicBool::new(false),
            knobs_frozen: AtomicBool::new(false),
            revision: AtomicU64::new(0),
            inputs: Mutex::new(vec![None; slots]),
            render_inputs: Mutex::new(vec![None; slots]),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.clone()
    }

    /// Connect (or with `None`, disconnect) slot `index`. Out of range slots are ignored.
    pub fn connect(&self, index: usize, input: Option<ImageInput>) {
        let mut inputs = self.inputs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = inputs.get_mut(index) {
            *slot = input;
            self.touch();
        }
    }

    /// Record a change that alters this node's output.
    pub fn touch(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn graph_inputs(&self) -> Vec<Option<Arc<dyn Node>>> {
        Self::as_nodes(&self.inputs.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn graph_render_inputs(&self) -> Vec<Option<Arc<dyn Node>>> {
        Self::as_nodes(&self.render_inputs.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn as_nodes(slots: &[Option<ImageInput>]) -> Vec<Option<Arc<dyn Node>>> {
        slots.iter().map(|s| s.as_ref().map(|i| Arc::clone(i.node()))).collect()
    }

    /// Copy the live slots into the render snapshot.
    pub fn snapshot_inputs(&self) {
        let live = self.inputs.lock().unwrap_or_else(|e| e.into_inner()).clone();
        *self.render_inputs.lock().unwrap_or_else(|e| e.into_inner()) = live;
    }

    /// All slots as of the last snapshot.
    pub fn render_input_slots(&self) -> Vec<Option<ImageInput>> {
        self.render_inputs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Slot as of the last snapshot.
    pub fn render_input(&self, index: usize) -> Option<ImageInput> {
        self.render_inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(index)
            .cloned()
            .flatten()
    }

    pub fn set_aborted(&self, aborted: bool) {
        self.aborted.store(aborted, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Fail fast once the engine asked this node to stop.
    pub fn check_aborted(&self, time: i32) -> RenderResult<()> {
        if self.is_aborted() {
            trace!("{}: frame {} aborted", self.name, time);
            return Err(RenderError::Failed);
        }
        Ok(())
    }

    pub fn set_knobs_frozen(&self, frozen: bool) {
        self.knobs_frozen.store(frozen, Ordering::SeqCst);
    }

    pub fn knobs_frozen(&self) -> bool {
        self.knobs_frozen.load(Ordering::SeqCst)
    }
}

/// Fill `window` row by row with `f(x, y)`, polling the abort flag.
pub fn fill_frame(base: &NodeBase, time: i32, window: RectI, f: impl Fn(i32, i32) -> f32) -> RenderResult<Frame> {
    let mut pixels = Vec::with_capacity(window.area() as usize);
    for y in window.y1..window.y2 {
        base.check_aborted(time)?;
        for x in window.x1..window.x2 {
            pixels.push(f(x, y));
        }
    }
    Ok(Frame::new(window, pixels))
}
