//! Sequential-only source: decodes a fixed frame sequence in one
//! begin → frames → end pass, like a stream decoder that cannot seek cheaply.

use std::sync::{Arc, Mutex};

use log::{debug, warn};

use super::{fill_frame, project_rod, ImageNode, NodeBase};
use crate::core::frame_cache::Frame;
use crate::entities::node::{
    FrameRange, Node, NodeId, RectI, RegionOfDefinition, RenderResult, RenderRoIArgs, RenderScale, Status,
};

#[derive(Debug, Default)]
struct DecoderState {
    /// Open pass `[first, last]`
    pass: Option<(i32, i32)>,
    next: Option<i32>,
    seeks: u32,
    passes: u32,
}

#[derive(Debug)]
pub struct SequenceReader {
    base: NodeBase,
    range: FrameRange,
    state: Mutex<DecoderState>,
}

impl SequenceReader {
    pub fn new(name: &str, first: i32, last: i32) -> Arc<Self> {
        Arc::new(Self {
            base: NodeBase::new(name, 0),
            range: FrameRange::new(first, last),
            state: Mutex::new(DecoderState::default()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DecoderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Out-of-order reads since creation.
    pub fn seeks(&self) -> u32 {
        self.lock().seeks
    }

    /// Completed begin/end passes.
    pub fn passes(&self) -> u32 {
        self.lock().passes
    }

    pub fn is_pass_open(&self) -> bool {
        self.lock().pass.is_some()
    }
}

impl ImageNode for SequenceReader {
    fn node_base(&self) -> &NodeBase {
        &self.base
    }

    fn produce(&self, time: i32, _view: usize, window: RectI) -> RenderResult<Frame> {
        {
            let mut s = self.lock();
            if s.next.is_some_and(|n| n != time) {
                s.seeks += 1;
                debug!("{}: seek to frame {}", self.base.name(), time);
            }
            s.next = Some(time + 1);
        }
        let clamped = time.clamp(self.range.first, self.range.last);
        let value = (clamped - self.range.first) as f32 / (self.range.len().max(1) as f32);
        fill_frame(&self.base, time, window, |_, _| value)
    }
}

impl Node for SequenceReader {
    fn id(&self) -> NodeId {
        self.base.id()
    }

    fn name(&self) -> String {
        self.base.name()
    }

    fn inputs(&self) -> Vec<Option<Arc<dyn Node>>> {
        Vec::new()
    }

    fn frame_range(&self) -> FrameRange {
        self.range
    }

    fn region_of_definition(&self, _time: i32, _scale: RenderScale, _view: usize) -> RenderResult<RegionOfDefinition> {
        Ok(project_rod())
    }

    fn render_roi(&self, args: &RenderRoIArgs) -> RenderResult<()> {
        self.produce(args.time, args.view, args.render_window).map(|_| ())
    }

    fn begin_sequence_render(&self, first: i32, last: i32, _view: usize) -> Status {
        let mut s = self.lock();
        if s.pass.is_some() {
            warn!("{}: a sequential pass is already open", self.base.name());
            return Status::Failed;
        }
        s.pass = Some((first, last));
        s.next = Some(first);
        Status::Ok
    }

    fn end_sequence_render(&self, first: i32, last: i32, _view: usize) -> Status {
        let mut s = self.lock();
        if s.pass != Some((first, last)) {
            warn!("{}: no sequential pass [{}, {}] to end", self.base.name(), first, last);
            return Status::Failed;
        }
        s.pass = None;
        s.passes += 1;
        Status::Ok
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

    fn is_sequential_only(&self) -> bool {
        true
    }
}
