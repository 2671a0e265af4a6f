//! Recording nodes and sinks shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use crossbeam_channel::{Receiver, Sender};
use uuid::Uuid;

use crate::entities::node::{
    FrameRange, Node, NodeId, RectD, RegionOfDefinition, RenderError, RenderResult, RenderRoIArgs, RenderScale,
    Status,
};
use crate::entities::output::{ViewerSink, WriterSink};
use crate::entities::timeline::Timeline;

/// Process-wide sequence so abort order can be compared across nodes.
static ABORT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Wrap a concrete node as a connected input slot.
pub fn input<N: Node + 'static>(node: &Arc<N>) -> Option<Arc<dyn Node>> {
    let node: Arc<dyn Node> = node.clone();
    Some(node)
}

/// Calls observed on a [`TestNode`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub render_input_updates: u32,
    pub begin_sequence: u32,
    pub end_sequence: u32,
    pub persistent_messages_cleared: u32,
    pub previews_computed: u32,
    pub previews_refreshed: u32,
    pub knob_freezes: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct Failures {
    render_at: Option<i32>,
    rod_at: Option<i32>,
    panic_at: Option<i32>,
    exception_at: Option<i32>,
}

/// Node recording every call the engine makes.
pub struct TestNode {
    id: NodeId,
    name: String,
    inputs: Mutex<Vec<Option<Arc<dyn Node>>>>,
    render_inputs: Mutex<Vec<Option<Arc<dyn Node>>>>,
    frame_range: Mutex<FrameRange>,
    sequential_only: AtomicBool,
    refuse_sequence: AtomicBool,
    preview: AtomicBool,
    plugin_hosted: AtomicBool,
    aborted: AtomicBool,
    abort_stamp: AtomicU64,
    knobs_frozen: AtomicBool,
    failures: Mutex<Failures>,
    counters: Mutex<Counters>,
    rendered: Mutex<Vec<(i32, usize)>>,
    last_roi: Mutex<Option<RenderRoIArgs>>,
    input_update_gate: Mutex<Option<Gate>>,
}

/// Parks one `update_render_inputs` call until released.
struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl TestNode {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_inputs(name, Vec::new())
    }

    pub fn with_inputs(name: &str, inputs: Vec<Option<Arc<dyn Node>>>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            render_inputs: Mutex::new(inputs.clone()),
            inputs: Mutex::new(inputs),
            frame_range: Mutex::new(FrameRange::unbounded()),
            sequential_only: AtomicBool::new(false),
            refuse_sequence: AtomicBool::new(false),
            preview: AtomicBool::new(false),
            plugin_hosted: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            abort_stamp: AtomicU64::new(0),
            knobs_frozen: AtomicBool::new(false),
            failures: Mutex::new(Failures::default()),
            counters: Mutex::new(Counters::default()),
            rendered: Mutex::new(Vec::new()),
            last_roi: Mutex::new(None),
            input_update_gate: Mutex::new(None),
        })
    }

    pub fn sequential_only(self: Arc<Self>) -> Arc<Self> {
        self.sequential_only.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_frame_range(self: Arc<Self>, first: i32, last: i32) -> Arc<Self> {
        self.set_frame_range(first, last);
        self
    }

    pub fn with_preview(self: Arc<Self>) -> Arc<Self> {
        self.preview.store(true, Ordering::SeqCst);
        self
    }

    /// Edit the live inputs (render inputs change at the next snapshot).
    pub fn set_inputs(&self, inputs: Vec<Option<Arc<dyn Node>>>) {
        *self.inputs.lock().unwrap() = inputs;
    }

    pub fn set_frame_range(&self, first: i32, last: i32) {
        *self.frame_range.lock().unwrap() = FrameRange::new(first, last);
    }

    pub fn set_plugin_hosted(&self, hosted: bool) {
        self.plugin_hosted.store(hosted, Ordering::SeqCst);
    }

    pub fn refuse_sequence_render(&self) {
        self.refuse_sequence.store(true, Ordering::SeqCst);
    }

    pub fn fail_render_at(&self, frame: i32) {
        self.failures.lock().unwrap().render_at = Some(frame);
    }

    pub fn fail_rod_at(&self, frame: i32) {
        self.failures.lock().unwrap().rod_at = Some(frame);
    }

    pub fn panic_render_at(&self, frame: i32) {
        self.failures.lock().unwrap().panic_at = Some(frame);
    }

    pub fn throw_render_at(&self, frame: i32) {
        self.failures.lock().unwrap().exception_at = Some(frame);
    }

    /// Make the next `update_render_inputs` block. The first receiver fires
    /// when the call is parked; sending on the returned sender releases it.
    pub fn hold_next_input_update(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        *self.input_update_gate.lock().unwrap() = Some(Gate {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }

    pub fn clear_failures(&self) {
        *self.failures.lock().unwrap() = Failures::default();
    }

    pub fn counters(&self) -> Counters {
        *self.counters.lock().unwrap()
    }

    pub fn knobs_frozen(&self) -> bool {
        self.knobs_frozen.load(Ordering::SeqCst)
    }

    /// `(time, view)` of every successful `render_roi`.
    pub fn rendered(&self) -> Vec<(i32, usize)> {
        self.rendered.lock().unwrap().clone()
    }

    pub fn rendered_frames(&self) -> Vec<i32> {
        self.rendered().into_iter().map(|(t, _)| t).collect()
    }

    pub fn last_roi(&self) -> Option<RenderRoIArgs> {
        self.last_roi.lock().unwrap().clone()
    }

    /// Sequence number of the last `set_aborted(true)`.
    pub fn abort_stamp(&self) -> Option<u64> {
        match self.abort_stamp.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    fn count(&self, f: impl FnOnce(&mut Counters)) {
        f(&mut self.counters.lock().unwrap());
    }
}

impl Node for TestNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn inputs(&self) -> Vec<Option<Arc<dyn Node>>> {
        self.inputs.lock().unwrap().clone()
    }

    fn render_inputs(&self) -> Vec<Option<Arc<dyn Node>>> {
        self.render_inputs.lock().unwrap().clone()
    }

    fn update_render_inputs(&self) {
        let gate = self.input_update_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv_timeout(Duration::from_secs(10));
        }
        *self.render_inputs.lock().unwrap() = self.inputs();
        self.count(|c| c.render_input_updates += 1);
    }

    fn frame_range(&self) -> FrameRange {
        *self.frame_range.lock().unwrap()
    }

    fn region_of_definition(&self, time: i32, _scale: RenderScale, _view: usize) -> RenderResult<RegionOfDefinition> {
        if self.failures.lock().unwrap().rod_at == Some(time) {
            return Err(RenderError::Failed);
        }
        Ok(RegionOfDefinition {
            rect: RectD::new(0.0, 0.0, 64.0, 36.0),
            is_project_format: true,
        })
    }

    fn render_roi(&self, args: &RenderRoIArgs) -> RenderResult<()> {
        let failures = *self.failures.lock().unwrap();
        if failures.panic_at == Some(args.time) {
            panic!("{} exploded at frame {}", self.name, args.time);
        }
        if failures.exception_at == Some(args.time) {
            return Err(RenderError::Exception(anyhow!("disk full")));
        }
        if failures.render_at == Some(args.time) {
            return Err(RenderError::Failed);
        }
        self.rendered.lock().unwrap().push((args.time, args.view));
        *self.last_roi.lock().unwrap() = Some(args.clone());
        Ok(())
    }

    fn begin_sequence_render(&self, _first: i32, _last: i32, _view: usize) -> Status {
        self.count(|c| c.begin_sequence += 1);
        if self.refuse_sequence.load(Ordering::SeqCst) {
            Status::Failed
        } else {
            Status::Ok
        }
    }

    fn end_sequence_render(&self, _first: i32, _last: i32, _view: usize) -> Status {
        self.count(|c| c.end_sequence += 1);
        Status::Ok
    }

    fn set_aborted(&self, aborted: bool) {
        if aborted {
            self.abort_stamp.store(ABORT_SEQ.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
        }
        self.aborted.store(aborted, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn set_knobs_frozen(&self, frozen: bool) {
        if frozen {
            self.count(|c| c.knob_freezes += 1);
        }
        self.knobs_frozen.store(frozen, Ordering::SeqCst);
    }

    fn clear_persistent_message(&self) {
        self.count(|c| c.persistent_messages_cleared += 1);
    }

    fn is_preview_enabled(&self) -> bool {
        self.preview.load(Ordering::SeqCst)
    }

    fn compute_preview_image(&self, _frame: i32) {
        self.count(|c| c.previews_computed += 1);
    }

    fn refresh_preview_image(&self, _frame: i32) {
        self.count(|c| c.previews_refreshed += 1);
    }

    fn is_plugin_hosted(&self) -> bool {
        self.plugin_hosted.load(Ordering::SeqCst)
    }

    fn is_sequential_only(&self) -> bool {
        self.sequential_only.load(Ordering::SeqCst)
    }
}

/// Forward every `Node` method to the wrapped `TestNode` in field `node`.
macro_rules! delegate_node {
    ($ty:ty) => {
        impl Node for $ty {
            fn id(&self) -> NodeId {
                self.node.id()
            }
            fn name(&self) -> String {
                self.node.name()
            }
            fn inputs(&self) -> Vec<Option<Arc<dyn Node>>> {
                self.node.inputs()
            }
            fn render_inputs(&self) -> Vec<Option<Arc<dyn Node>>> {
                self.node.render_inputs()
            }
            fn update_render_inputs(&self) {
                self.node.update_render_inputs()
            }
            fn frame_range(&self) -> FrameRange {
                Node::frame_range(&*self.node)
            }
            fn region_of_definition(
                &self,
                time: i32,
                scale: RenderScale,
                view: usize,
            ) -> RenderResult<RegionOfDefinition> {
                self.node.region_of_definition(time, scale, view)
            }
            fn render_roi(&self, args: &RenderRoIArgs) -> RenderResult<()> {
                self.node.render_roi(args)
            }
            fn begin_sequence_render(&self, first: i32, last: i32, view: usize) -> Status {
                self.node.begin_sequence_render(first, last, view)
            }
            fn end_sequence_render(&self, first: i32, last: i32, view: usize) -> Status {
                self.node.end_sequence_render(first, last, view)
            }
            fn set_aborted(&self, aborted: bool) {
                self.node.set_aborted(aborted)
            }
            fn is_aborted(&self) -> bool {
                self.node.is_aborted()
            }
            fn set_knobs_frozen(&self, frozen: bool) {
                self.node.set_knobs_frozen(frozen)
            }
            fn clear_persistent_message(&self) {
                self.node.clear_persistent_message()
            }
            fn is_preview_enabled(&self) -> bool {
                self.node.is_preview_enabled()
            }
            fn compute_preview_image(&self, frame: i32) {
                self.node.compute_preview_image(frame)
            }
            fn refresh_preview_image(&self, frame: i32) {
                self.node.refresh_preview_image(frame)
            }
            fn is_plugin_hosted(&self) -> bool {
                self.node.is_plugin_hosted()
            }
            fn is_sequential_only(&self) -> bool {
                self.node.is_sequential_only()
            }
        }
    };
}

/// Display sink recording `render_viewer` calls; every displayed frame is
/// also sent on `frames()`.
pub struct TestViewer {
    pub node: Arc<TestNode>,
    timeline: Arc<Timeline>,
    displayed: Mutex<Vec<i32>>,
    frames_tx: Sender<i32>,
    frames_rx: Receiver<i32>,
    fail_at: Mutex<Option<i32>>,
    render_delay: Mutex<Duration>,
    disconnects: AtomicU32,
}

delegate_node!(TestViewer);

impl TestViewer {
    /// Viewer over its own `[1, 10]` timeline.
    pub fn new(name: &str, inputs: Vec<Option<Arc<dyn Node>>>) -> Arc<Self> {
        Self::with_timeline(name, inputs, Arc::new(Timeline::new(1, 10)))
    }

    pub fn with_timeline(name: &str, inputs: Vec<Option<Arc<dyn Node>>>, timeline: Arc<Timeline>) -> Arc<Self> {
        let (frames_tx, frames_rx) = crossbeam_channel::unbounded();
        Arc::new(Self {
            node: TestNode::with_inputs(name, inputs),
            timeline,
            displayed: Mutex::new(Vec::new()),
            frames_tx,
            frames_rx,
            fail_at: Mutex::new(None),
            render_delay: Mutex::new(Duration::ZERO),
            disconnects: AtomicU32::new(0),
        })
    }

    pub fn fail_at(&self, frame: i32) {
        *self.fail_at.lock().unwrap() = Some(frame);
    }

    pub fn set_render_delay(&self, delay: Duration) {
        *self.render_delay.lock().unwrap() = delay;
    }

    pub fn rendered_frames(&self) -> Vec<i32> {
        self.displayed.lock().unwrap().clone()
    }

    pub fn frames(&self) -> &Receiver<i32> {
        &self.frames_rx
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl ViewerSink for TestViewer {
    fn timeline(&self) -> Arc<Timeline> {
        Arc::clone(&self.timeline)
    }

    fn render_viewer(&self, time: i32, _single_threaded: bool, _is_sequential: bool) -> RenderResult<()> {
        let delay = *self.render_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if *self.fail_at.lock().unwrap() == Some(time) {
            return Err(RenderError::Failed);
        }
        self.displayed.lock().unwrap().push(time);
        let _ = self.frames_tx.send(time);
        Ok(())
    }

    fn disconnect_viewer(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Persistence sink; frames are rendered through its `TestNode`.
pub struct TestWriter {
    pub node: Arc<TestNode>,
    first: AtomicI32,
    last: AtomicI32,
    current: AtomicI32,
    doing_full_sequence: AtomicBool,
    finished: AtomicU32,
}

delegate_node!(TestWriter);

impl TestWriter {
    pub fn new(name: &str, inputs: Vec<Option<Arc<dyn Node>>>) -> Arc<Self> {
        Arc::new(Self {
            node: TestNode::with_inputs(name, inputs),
            first: AtomicI32::new(0),
            last: AtomicI32::new(0),
            current: AtomicI32::new(0),
            doing_full_sequence: AtomicBool::new(false),
            finished: AtomicU32::new(0),
        })
    }

    pub fn is_doing_full_sequence_render(&self) -> bool {
        self.doing_full_sequence.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> u32 {
        self.finished.load(Ordering::SeqCst)
    }
}

impl WriterSink for TestWriter {
    fn set_first_frame(&self, frame: i32) {
        self.first.store(frame, Ordering::SeqCst);
    }

    fn set_last_frame(&self, frame: i32) {
        self.last.store(frame, Ordering::SeqCst);
    }

    fn first_frame(&self) -> i32 {
        self.first.load(Ordering::SeqCst)
    }

    fn last_frame(&self) -> i32 {
        self.last.load(Ordering::SeqCst)
    }

    fn set_current_frame(&self, frame: i32) {
        self.current.store(frame, Ordering::SeqCst);
    }

    fn current_frame(&self) -> i32 {
        self.current.load(Ordering::SeqCst)
    }

    fn set_doing_full_sequence_render(&self, doing: bool) {
        self.doing_full_sequence.store(doing, Ordering::SeqCst);
    }

    fn notify_render_finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}
