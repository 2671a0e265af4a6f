//! Two-input merge.

use std::sync::{Arc, Mutex};

use super::{project_rod, ImageInput, ImageNode, NodeBase};
use crate::core::frame_cache::Frame;
use crate::entities::node::{Node, NodeId, RectI, RegionOfDefinition, RenderResult, RenderRoIArgs, RenderScale};

pub const INPUT_A: usize = 0;
pub const INPUT_B: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOp {
    Plus,
    Multiply,
    Average,
    Max,
}

impl MergeOp {
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            MergeOp::Plus => a + b,
            MergeOp::Multiply => a * b,
            MergeOp::Average => (a + b) * 0.5,
            MergeOp::Max => a.max(b),
        }
    }
}

#[derive(Debug)]
pub struct Merge {
    base: NodeBase,
    op: Mutex<MergeOp>,
}

impl Merge {
    pub fn new(name: &str, op: MergeOp) -> Arc<Self> {
        Arc::new(Self {
            base: NodeBase::new(name, 2),
            op: Mutex::new(op),
        })
    }

    pub fn connect(&self, slot: usize, input: Option<ImageInput>) {
        self.base.connect(slot, input);
    }

    pub fn op(&self) -> MergeOp {
        *self.op.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_op(&self, op: MergeOp) -> bool {
        if self.base.knobs_frozen() {
            return false;
        }
        *self.op.lock().unwrap_or_else(|e| e.into_inner()) = op;
        self.base.touch();
        true
    }
}

impl ImageNode for Merge {
    fn node_base(&self) -> &NodeBase {
        &self.base
    }

    fn produce(&self, time: i32, view: usize, window: RectI) -> RenderResult<Frame> {
        self.base.check_aborted(time)?;
        let a = self.base.render_input(INPUT_A);
        let b = self.base.render_input(INPUT_B);
        match (a, b) {
            (None, None) => Ok(Frame::filled(window, 0.0)),
            (Some(only), None) | (None, Some(only)) => only.produce(time, view, window),
            (Some(a), Some(b)) => {
                let fa = a.produce(time, view, window)?;
                self.base.check_aborted(time)?;
                let fb = b.produce(time, view, window)?;
                let op = self.op();
                let pixels = fa.pixels.iter().zip(&fb.pixels).map(|(&x, &y)| op.apply(x, y)).collect();
                Ok(Frame::new(window, pixels))
            }
        }
    }
}

impl Node for Merge {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn name(&self) -> String {
        self.base.name()
    }

    fn inputs(&self) -> Vec<Option<Arc<dyn Node>>> {
        self.base.graph_inputs()
    }

    fn render_inputs(&self) -> Vec<Option<Arc<dyn Node>>> {
        self.base.graph_render_inputs()
    }

    fn update_render_inputs(&self) {
        self.base.snapshot_inputs();
    }

    fn region_of_definition(&self, _time: i32, _scale: RenderScale, _view: usize) -> RenderResult<RegionOfDefinition> {
        Ok(project_rod())
    }

    fn render_roi(&self, args: &RenderRoIArgs) -> RenderResult<()> {
        self.produce(args.time, args.view, args.render_window).map(|_| ())
    }

    fn set_aborted(&self, aborted: bool) {
        self.base.set_aborted(aborted);
    }

    fn is_aborted(&self) -> bool {
        self.base.is_aborted()
    }

    fn set_knobs_frozen(&self, frozen: bool) {
        self.base.set_knobs_frozen(frozen);
    }
}
