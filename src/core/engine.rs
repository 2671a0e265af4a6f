//! Render engine - the per-output render scheduler.
//!
//! One engine per renderable output. It owns a single named worker thread
//! (or runs inline on the caller's thread when the session's thread policy
//! says so) that loops:
//!
//! ```text
//!   Idle ──wake──> Starting ──ok──> Rendering ──stop condition──> Stopping ──> Idle
//!                     │                                              │
//!                     └──────────────rejected────────────────────────┘
//!                                        must_quit at top or in Stopping ──> Quit
//! ```
//!
//! Every `render()` call records the *last requested* args. The worker
//! promotes them to the *current* args when a run starts, so several calls
//! while a run is in progress coalesce into one more run with the latest
//! args.
//!
//! Abort is cooperative: node flags are raised output-to-input, the worker
//! notices the pending counter between frames and drains it in `stop_engine`.
//! Start, stop and abort are serialised by the abort processing guard.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::anyhow;
use log::{debug, error, info, trace, warn};
use thiserror::Error;
use uuid::Uuid;

use super::clock::PlaybackClock;
use super::engine_events::{
    EngineStartedEvent, EngineStoppedEvent, FpsChangedEvent, FrameRenderedEvent, RedrawRequestedEvent,
    StopReason,
};
use super::event_bus::EventBus;
use super::frame_range::resolve_frame_range;
use super::render_tree::RenderTree;
use super::run_args::{PlaybackMode, RunArgs};
use super::sync::{AbortState, QuitState, WakeSignal};
use crate::entities::node::{
    find_sequential_only_upstream, RenderError, RenderResult, RenderRoIArgs, RenderScale,
};
use crate::entities::output::RenderOutput;
use crate::entities::session::{
    AppMode, EngineId, Session, FRAME_RENDERED_LONG, FRAME_RENDERED_SHORT, RENDERING_STARTED_LONG,
    RENDERING_STARTED_SHORT,
};
use crate::entities::timeline::Timeline;

/// Why a run was refused before its first frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StartRejected {
    #[error("an abort was requested before the run started")]
    AbortPending,
    #[error("the engine is quitting")]
    Quitting,
    #[error("node '{node}' refused to begin the sequential render")]
    SequenceRejected { node: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("render engine has quit and cannot be restarted")]
    HasQuit,
    #[error("failed to spawn render thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error(transparent)]
    StartRejected(#[from] StartRejected),
}

/// Parameters of one `render()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    /// Frames to produce, `UNBOUNDED_FRAME_COUNT` to play until stopped.
    pub frame_count: i32,
    pub seek_timeline: bool,
    pub refresh_tree: bool,
    pub forward: bool,
    pub same_frame: bool,
    pub force_preview: bool,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            frame_count: 1,
            seek_timeline: true,
            refresh_tree: false,
            forward: true,
            same_frame: false,
            force_preview: false,
        }
    }
}

impl RenderRequest {
    /// Sequential playback of `frame_count` frames.
    pub fn playback(frame_count: i32, forward: bool) -> Self {
        Self {
            frame_count,
            forward,
            ..Default::default()
        }
    }

    /// Recompute the frame under the cursor.
    pub fn current_frame(refresh_tree: bool, force_preview: bool) -> Self {
        Self {
            frame_count: 1,
            seek_timeline: false,
            refresh_tree,
            forward: true,
            same_frame: true,
            force_preview,
        }
    }
}

/// Render scheduler for one output.
pub struct RenderEngine {
    inner: Arc<EngineInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct EngineInner {
    id: EngineId,
    session: Arc<Session>,
    output: RenderOutput,
    tree: Mutex<RenderTree>,
    clock: PlaybackClock,
    events: EventBus,
    abort: AbortState,
    quit: QuitState,
    wake: WakeSignal,
    /// Written only inside the abort processing guard
    working: AtomicBool,
    playback_mode: Mutex<PlaybackMode>,
    last_requested: Mutex<RunArgs>,
    current: Mutex<RunArgs>,
    frame_range: Mutex<(i32, i32)>,
    timer_frame_count: AtomicU32,
    sequential_begun: AtomicBool,
    inline_busy: AtomicBool,
    worker_thread: Mutex<Option<ThreadId>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("id", &self.inner.id)
            .field("output", &self.inner.output)
            .field("working", &self.is_working())
            .field("thread_running", &self.is_thread_running())
            .field("has_quit", &self.has_quit())
            .finish()
    }
}

impl RenderEngine {
    pub fn new(output: RenderOutput, session: Arc<Session>) -> Self {
        let desired_fps = session.settings().desired_fps;
        let playback_mode = session.settings().playback_mode;
        // Unattended runs have no UI loop to poll the queue
        let events = if session.is_background() {
            EventBus::immediate()
        } else {
            EventBus::new()
        };
        let inner = EngineInner {
            id: Uuid::new_v4(),
            clock: PlaybackClock::new(desired_fps),
            playback_mode: Mutex::new(playback_mode),
            tree: Mutex::new(RenderTree::new(output.clone())),
            output,
            events,
            abort: AbortState::new(),
            quit: QuitState::new(),
            wake: WakeSignal::new(),
            working: AtomicBool::new(false),
            last_requested: Mutex::new(RunArgs::default()),
            current: Mutex::new(RunArgs::default()),
            frame_range: Mutex::new((0, 0)),
            timer_frame_count: AtomicU32::new(1),
            sequential_begun: AtomicBool::new(false),
            inline_busy: AtomicBool::new(false),
            worker_thread: Mutex::new(None),
            session,
        };
        debug!("Render engine {} created for {:?}", inner.id, inner.output);
        Self {
            inner: Arc::new(inner),
            handle: Mutex::new(None),
        }
    }

    pub fn id(&self) -> EngineId {
        self.inner.id
    }

    pub fn output(&self) -> &RenderOutput {
        &self.inner.output
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    /// Event bus for observers (also `poll()`-able unless unattended).
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn on_engine_started(&self, f: impl Fn(&EngineStartedEvent) + Send + Sync + 'static) {
        self.inner.events.subscribe::<EngineStartedEvent, _>(f);
    }

    pub fn on_engine_stopped(&self, f: impl Fn(&EngineStoppedEvent) + Send + Sync + 'static) {
        self.inner.events.subscribe::<EngineStoppedEvent, _>(f);
    }

    pub fn on_frame_rendered(&self, f: impl Fn(&FrameRenderedEvent) + Send + Sync + 'static) {
        self.inner.events.subscribe::<FrameRenderedEvent, _>(f);
    }

    pub fn on_fps_changed(&self, f: impl Fn(&FpsChangedEvent) + Send + Sync + 'static) {
        self.inner.events.subscribe::<FpsChangedEvent, _>(f);
    }

    pub fn on_redraw_requested(&self, f: impl Fn(&RedrawRequestedEvent) + Send + Sync + 'static) {
        self.inner.events.subscribe::<RedrawRequestedEvent, _>(f);
    }

    pub fn is_working(&self) -> bool {
        self.inner.is_working()
    }

    pub fn is_thread_running(&self) -> bool {
        self.inner.quit.is_thread_started()
    }

    pub fn must_quit(&self) -> bool {
        self.inner.quit.must_quit()
    }

    pub fn has_quit(&self) -> bool {
        self.inner.quit.has_quit()
    }

    pub fn playback_mode(&self) -> PlaybackMode {
        *lock(&self.inner.playback_mode)
    }

    pub fn set_playback_mode(&self, mode: PlaybackMode) {
        *lock(&self.inner.playback_mode) = mode;
    }

    pub fn set_desired_fps(&self, fps: f64) {
        self.inner.clock.set_desired_frame_rate(fps);
    }

    pub fn desired_fps(&self) -> f64 {
        self.inner.clock.desired_frame_rate()
    }

    /// Args of the run in progress (or of the last run).
    pub fn current_run_args(&self) -> RunArgs {
        self.inner.current_args()
    }

    pub fn last_requested_run_args(&self) -> RunArgs {
        *lock(&self.inner.last_requested)
    }

    /// Range resolved by the last start/iteration.
    pub fn frame_range(&self) -> (i32, i32) {
        *lock(&self.inner.frame_range)
    }

    /// Render order of the last tree build.
    pub fn tree_nodes(&self) -> Vec<String> {
        lock(&self.inner.tree).node_names()
    }

    /// Timeline this engine plays back.
    pub fn timeline(&self) -> Arc<Timeline> {
        self.inner.timeline()
    }

    /// Request a run. Returns once the run is started, woken or (inline
    /// mode) finished.
    pub fn render(&self, request: RenderRequest) -> Result<(), EngineError> {
        let inner = &self.inner;
        if inner.quit.has_quit() || inner.quit.must_quit() {
            return Err(EngineError::HasQuit);
        }

        let refresh_tree = request.refresh_tree || !lock(&inner.tree).was_ever_built();
        let force_sequential = match find_sequential_only_upstream(inner.output.node()) {
            Some(node) => {
                debug!("{} only supports sequential rendering, main view only", node);
                true
            }
            None => false,
        };
        let args = RunArgs {
            same_frame: request.same_frame,
            forward: request.forward,
            seek_timeline: request.seek_timeline,
            refresh_tree,
            recursive_call: false,
            frame_requests_count: request.frame_count,
            frame_request_index: 0,
            force_sequential,
            force_preview: request.force_preview,
        };
        *lock(&inner.last_requested) = args;
        trace!("Engine {} render requested: {:?}", inner.id, args);

        if inner.session.is_single_threaded() {
            inner.run_same_thread();
            return Ok(());
        }

        if inner.quit.try_mark_thread_started() {
            self.spawn_worker()
        } else {
            inner.wake.notify();
            Ok(())
        }
    }

    fn spawn_worker(&self) -> Result<(), EngineError> {
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("compflow-render-{}", &self.inner.id.simple().to_string()[..8]))
            .spawn(move || {
                let _exit = WorkerExit(Arc::clone(&inner));
                inner.run();
            });
        match spawned {
            Ok(handle) => {
                *lock(&self.inner.worker_thread) = Some(handle.thread().id());
                // A previous worker may have exited; reap it
                if let Some(old) = lock(&self.handle).replace(handle) {
                    let _ = old.join();
                }
                Ok(())
            }
            Err(e) => {
                self.inner.quit.clear_thread_started();
                error!("Engine {}: cannot spawn render thread: {}", self.inner.id, e);
                Err(EngineError::Spawn(e))
            }
        }
    }

    /// Interrupt the run in progress. No-op while idle.
    ///
    /// With `blocking`, a call from a thread other than the worker returns
    /// only after the worker's stop has drained the request.
    pub fn abort_rendering(&self, blocking: bool) {
        self.inner.abort_rendering(blocking);
    }

    /// Stop the worker for good. Blocks until it acknowledges.
    pub fn quit_engine_thread(&self) {
        self.inner.quit_engine_thread();
    }

    /// Recompute the current frame after a parameter change, unless bounded
    /// playback is mid-run (it picks the change up on its next frame).
    pub fn refresh_and_continue_render(&self, force_preview: bool, abort_previous: bool) -> Result<(), EngineError> {
        let args = self.inner.current_args();
        if self.is_working() && args.is_playback_running() {
            trace!("Playback running, refresh deferred to the next frame");
            return Ok(());
        }
        if abort_previous {
            self.abort_rendering(false);
        }
        self.render(RenderRequest::current_frame(false, force_preview))
    }

    /// Rebuild the tree after a topology change and keep going: a playback
    /// run restarts for its remaining frames, otherwise the current frame is
    /// recomputed.
    pub fn update_tree_and_continue_render(&self) -> Result<(), EngineError> {
        let args = self.inner.current_args();
        if self.is_working() && args.is_playback_running() {
            self.abort_rendering(true);
            self.render(RenderRequest {
                frame_count: args.remaining_count(),
                seek_timeline: true,
                refresh_tree: true,
                forward: args.forward,
                same_frame: false,
                force_preview: false,
            })
        } else {
            self.render(RenderRequest::current_frame(true, false))
        }
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        self.inner.quit_engine_thread();
        if let Some(handle) = lock(&self.handle).take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Marks the worker as gone however its loop ends (including a panic
/// outside frame computation), so quit never waits forever.
struct WorkerExit(Arc<EngineInner>);

impl Drop for WorkerExit {
    fn drop(&mut self) {
        let inner = &self.0;
        if thread::panicking() {
            error!("Render thread of engine {} panicked", inner.id);
            let _guard = inner.abort.lock_processing();
            let mut requested = inner.abort.lock_requested();
            *requested = 0;
            inner.working.store(false, Ordering::SeqCst);
            inner.abort.notify_drained();
        }
        inner.quit.acknowledge();
        trace!("Render thread of engine {} exited", inner.id);
    }
}

/// Run `f`, turning a panic into `RenderError::Exception`.
fn guarded<T>(f: impl FnOnce() -> RenderResult<T>) -> RenderResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(RenderError::Exception(anyhow!("panic: {}", message)))
        }
    }
}

/// Next frame decided by the advance policy.
enum Advance {
    Render(i32),
    Stop,
}

impl EngineInner {
    fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    fn current_args(&self) -> RunArgs {
        *lock(&self.current)
    }

    fn set_current_args(&self, args: RunArgs) {
        *lock(&self.current) = args;
    }

    fn timeline(&self) -> Arc<Timeline> {
        match &self.output {
            RenderOutput::Viewer { sink, .. } => sink.timeline(),
            RenderOutput::Writer { .. } => Arc::clone(self.session.timeline()),
        }
    }

    fn is_foreign_thread(&self) -> bool {
        lock(&self.worker_thread).is_some_and(|id| id != thread::current().id())
    }

    // ---- worker loops ----

    fn run(&self) {
        *lock(&self.worker_thread) = Some(thread::current().id());
        debug!("Render thread of engine {} started", self.id);
        loop {
            if self.quit.must_quit() {
                self.quit.acknowledge();
                return;
            }
            match self.start_engine() {
                Ok(()) => self.iterate_kernel(),
                Err(reason) => debug!("Engine {}: start rejected: {}", self.id, reason),
            }
            if self.stop_engine() {
                return;
            }
            self.wake.wait();
        }
    }

    /// Inline mode: start, iterate and stop on the caller's thread, pumping
    /// the host's events between steps.
    fn run_same_thread(&self) {
        if self.inline_busy.swap(true, Ordering::SeqCst) {
            // Re-entered from an event pump: run again with the latest args
            self.wake.notify();
            return;
        }
        loop {
            self.session.process_events();
            if self.quit.must_quit() {
                break;
            }
            match self.start_engine() {
                Ok(()) => {
                    self.session.process_events();
                    if !self.quit.must_quit() {
                        self.iterate_kernel();
                    }
                }
                Err(reason) => debug!("Engine {}: start rejected: {}", self.id, reason),
            }
            if self.stop_engine() || !self.wake.take() {
                break;
            }
        }
        self.inline_busy.store(false, Ordering::SeqCst);
    }

    // ---- start / stop ----

    fn start_engine(&self) -> Result<(), StartRejected> {
        let args = {
            let _guard = self.abort.lock_processing();
            if self.quit.must_quit() {
                return Err(StartRejected::Quitting);
            }
            if self.abort.is_pending() {
                return Err(StartRejected::AbortPending);
            }

            let args = *lock(&self.last_requested);
            self.set_current_args(args);
            self.timer_frame_count.store(1, Ordering::Relaxed);

            let mut tree = lock(&self.tree);
            if args.refresh_tree {
                tree.rebuild();
            }

            if let RenderOutput::Writer { node, sink } = &self.output {
                let timeline = self.timeline();
                let (first, last) = resolve_frame_range(Some(node.as_ref()), &timeline);
                *lock(&self.frame_range) = (first, last);
                sink.set_first_frame(first);
                sink.set_last_frame(last);
                sink.set_doing_full_sequence_render(true);

                if args.force_sequential {
                    if let Err(node) = tree.begin_sequential_render(first, last, self.session.main_view()) {
                        warn!("Engine {}: {} refused to begin sequential render [{}, {}]", self.id, node, first, last);
                        return Err(StartRejected::SequenceRejected { node });
                    }
                    self.sequential_begun.store(true, Ordering::SeqCst);
                }
                if !self.session.is_background() {
                    tree.set_nodes_knobs_frozen(true);
                }
            }

            // Quit may have been requested during the rebuild; its abort saw an idle engine
            if self.quit.must_quit() {
                return Err(StartRejected::Quitting);
            }
            self.working.store(true, Ordering::SeqCst);
            args
        };

        info!(
            "Engine {} started: {} frame(s), {}",
            self.id,
            args.frame_requests_count,
            if args.forward { "forward" } else { "backward" }
        );
        if !args.same_frame {
            self.events.emit(EngineStartedEvent {
                engine: self.id,
                forward: args.forward,
                frame_count: args.frame_requests_count,
            });
            self.clock.start();
        }
        if self.session.is_background() {
            self.session.write_to_output_pipe(RENDERING_STARTED_LONG, RENDERING_STARTED_SHORT);
        }
        Ok(())
    }

    /// End the run. Returns true when the worker must exit (quit completed).
    fn stop_engine(&self) -> bool {
        let quitting = self.quit.must_quit();
        let was_aborted = {
            let _guard = self.abort.lock_processing();
            let tree = lock(&self.tree);
            let args = self.current_args();

            if !quitting {
                if self.session.should_refresh_preview() || args.force_preview {
                    let frame = self.timeline().current_frame();
                    for node in tree.nodes().iter().filter(|n| n.is_preview_enabled()) {
                        if args.force_preview {
                            node.compute_preview_image(frame);
                        } else {
                            node.refresh_preview_image(frame);
                        }
                    }
                }
                for node in tree.nodes() {
                    node.set_aborted(false);
                }
            }

            let mut requested = self.abort.lock_requested();
            let was_aborted = *requested > 0;
            *requested = 0;
            self.working.store(false, Ordering::SeqCst);
            self.abort.notify_drained();
            was_aborted
        };

        let mut args = self.current_args();
        args.frame_requests_count = 0;
        self.set_current_args(args);
        self.clock.pause();

        if let RenderOutput::Writer { sink, .. } = &self.output {
            sink.set_doing_full_sequence_render(false);
            let tree = lock(&self.tree);
            if !self.session.is_background() {
                tree.set_nodes_knobs_frozen(false);
            }
            if self.sequential_begun.swap(false, Ordering::SeqCst) {
                let (first, last) = *lock(&self.frame_range);
                if let Err(node) = tree.end_sequential_render(first, last, self.session.main_view()) {
                    warn!("Engine {}: {} refused to end sequential render [{}, {}]", self.id, node, first, last);
                }
            }
        }

        let reason = if was_aborted { StopReason::Aborted } else { StopReason::Finished };
        info!("Engine {} stopped ({:?})", self.id, reason);
        self.events.emit(EngineStoppedEvent { engine: self.id, reason });

        if self.session.is_background() {
            self.output.notify_render_finished();
        }

        if self.quit.must_quit() {
            self.quit.acknowledge();
            debug!("Engine {} quit", self.id);
            return true;
        }
        false
    }

    // ---- iteration ----

    fn iterate_kernel(&self) {
        let timeline = self.timeline();
        loop {
            let mut args = self.current_args();

            if self.quit.must_quit() || self.abort.is_pending() || args.frame_requests_count == 0 {
                return;
            }
            {
                let _guard = self.abort.lock_processing();
                if self.abort.is_pending() {
                    return;
                }
                lock(&self.tree).refresh_render_inputs();
            }

            let (first, last) = match &self.output {
                RenderOutput::Viewer { node, sink } => {
                    let (first, last) = resolve_frame_range(Some(node.as_ref()), &timeline);
                    if sink.is_frame_range_locked() && timeline.last_seek_caller() != Some(node.id()) {
                        timeline.set_frame_range(first, last);
                    }
                    timeline.bounds()
                }
                RenderOutput::Writer { sink, .. } => (sink.first_frame(), sink.last_frame()),
            };
            *lock(&self.frame_range) = (first, last);

            let current = match self.advance(&mut args, first, last, &timeline) {
                Advance::Render(frame) => frame,
                Advance::Stop => {
                    self.set_current_args(args);
                    return;
                }
            };
            self.set_current_args(args);

            if self.should_stop(&args, first, last) {
                return;
            }

            lock(&self.tree).clear_persistent_messages();

            trace!("Engine {}: rendering frame {}", self.id, current);
            if let Err(err) = self.render_frame(current, &args) {
                if self.abort.is_pending() {
                    debug!("Engine {}: frame {} interrupted by abort", self.id, current);
                    return;
                }
                match &self.output {
                    RenderOutput::Viewer { sink, .. } => {
                        debug!("Engine {}: frame {} failed, disconnecting viewer: {}", self.id, current, err);
                        sink.disconnect_viewer();
                    }
                    RenderOutput::Writer { .. } => match &err {
                        RenderError::Exception(e) => error!("Error while rendering frame {}: {}", current, e),
                        RenderError::Failed => debug!("Engine {}: frame {} failed", self.id, current),
                    },
                }
                return;
            }

            self.events.emit(FrameRenderedEvent {
                engine: self.id,
                frame: current,
            });
            if self.session.is_background() {
                let long = format!("{}{}", FRAME_RENDERED_LONG, current);
                let short = format!("{}{}", FRAME_RENDERED_SHORT, current);
                self.session.write_to_output_pipe(&long, &short);
            }
            if self.session.is_single_threaded() {
                self.session.process_events();
            }

            args.frame_done();
            self.set_current_args(args);
        }
    }

    /// Frame-advance policy. Mutates `args.forward` on bounce.
    fn advance(&self, args: &mut RunArgs, first: i32, last: i32, timeline: &Timeline) -> Advance {
        match &self.output {
            RenderOutput::Writer { sink, .. } => {
                if !args.recursive_call {
                    sink.set_current_frame(first);
                    return Advance::Render(first);
                }
                if args.same_frame || !args.seek_timeline {
                    return Advance::Render(sink.current_frame());
                }
                let next = sink.current_frame().saturating_add(1);
                if next > last {
                    return Advance::Stop;
                }
                sink.set_current_frame(next);
                Advance::Render(next)
            }
            RenderOutput::Viewer { node, .. } => {
                if !args.recursive_call || args.same_frame || !args.seek_timeline {
                    return Advance::Render(timeline.current_frame());
                }
                let id = node.id();
                let current = timeline.current_frame();
                let mode = *lock(&self.playback_mode);
                if args.forward {
                    if current < last {
                        timeline.increment_current_frame(id);
                    } else {
                        match mode {
                            PlaybackMode::Loop => timeline.seek_frame(first, Some(id)),
                            PlaybackMode::Bounce => {
                                args.forward = false;
                                if current > first {
                                    timeline.decrement_current_frame(id);
                                }
                            }
                            PlaybackMode::Once => return Advance::Stop,
                        }
                    }
                } else if current > first {
                    timeline.decrement_current_frame(id);
                } else {
                    match mode {
                        PlaybackMode::Loop => timeline.seek_frame(last, Some(id)),
                        PlaybackMode::Bounce => {
                            args.forward = true;
                            if current < last {
                                timeline.increment_current_frame(id);
                            }
                        }
                        PlaybackMode::Once => return Advance::Stop,
                    }
                }
                Advance::Render(timeline.current_frame())
            }
        }
    }

    fn should_stop(&self, args: &RunArgs, first: i32, last: i32) -> bool {
        let requested = self.abort.lock_requested();
        if *requested > 0 {
            return true;
        }
        // A single-frame range played "forever" renders once
        if self.output.is_viewer()
            && args.recursive_call
            && first == last
            && args.is_unbounded()
            && args.frame_request_index == 1
        {
            return true;
        }
        if args.frame_requests_count == 0 {
            return true;
        }
        self.session.mode() == AppMode::BackgroundAutoRun && self.session.has_abort_any_processing_been_called()
    }

    fn render_frame(&self, time: i32, args: &RunArgs) -> RenderResult<()> {
        let is_sequential = args.is_sequential_render();
        let plugin_hosted = lock(&self.tree).is_output_plugin_hosted();
        match &self.output {
            RenderOutput::Viewer { sink, .. } if !plugin_hosted => {
                let single_threaded = self.session.is_single_threaded();
                guarded(|| sink.render_viewer(time, single_threaded, is_sequential))?;
                self.events.emit(RedrawRequestedEvent { engine: self.id, frame: time });
                if !args.same_frame && !self.abort.is_pending() {
                    self.pace(args);
                }
                Ok(())
            }
            _ => self.render_views(time, args, is_sequential),
        }
    }

    /// Wait for the next frame slot and report throughput every
    /// `fps_refresh_rate` frames of an unbounded run.
    fn pace(&self, args: &RunArgs) {
        self.clock.wait_until_next_frame_due();
        let refresh_rate = self.session.settings().fps_refresh_rate.max(1);
        let count = self.timer_frame_count.load(Ordering::Relaxed);
        if count % refresh_rate == 0 && args.is_unbounded() {
            self.events.emit(FpsChangedEvent {
                engine: self.id,
                actual: self.clock.actual_frame_rate(),
                desired: self.clock.desired_frame_rate(),
            });
            self.timer_frame_count.store(1, Ordering::Relaxed);
        } else {
            self.timer_frame_count.store(count + 1, Ordering::Relaxed);
        }
    }

    fn render_views(&self, time: i32, args: &RunArgs, is_sequential: bool) -> RenderResult<()> {
        let node = self.output.node();
        let views: Vec<usize> = if args.force_sequential {
            vec![self.session.main_view()]
        } else {
            (0..self.session.views_count()).collect()
        };
        let scale = RenderScale::identity();
        for view in views {
            let rod = guarded(|| node.region_of_definition(time, scale, view))?;
            let roi = RenderRoIArgs {
                time,
                scale,
                mipmap_level: 0,
                view,
                render_window: rod.rect.to_pixel_enclosing(scale),
                is_sequential,
                user_interaction: !self.session.is_background(),
                bypass_cache: false,
                rod: rod.rect,
            };
            guarded(|| node.render_roi(&roi))?;
        }
        Ok(())
    }

    // ---- control from other threads ----

    fn abort_rendering(&self, blocking: bool) {
        if !self.is_working() {
            return;
        }
        {
            let _guard = self.abort.lock_processing();
            if !self.is_working() {
                return;
            }
            self.session.register_engine_being_aborted(self.id);
            // Output first so inputs never start work that is about to be discarded
            let tree = lock(&self.tree);
            for node in tree.nodes().iter().rev() {
                node.set_aborted(true);
            }
        }

        let foreign = self.is_foreign_thread();
        if foreign && self.output.is_viewer() {
            // The worker may be waiting on this very thread
            self.session.process_events();
        }

        {
            let _guard = self.abort.lock_processing();
            if !self.is_working() {
                self.session.unregister_engine_being_aborted(self.id);
                return;
            }
            let pending = self.abort.request();
            debug!("Engine {}: abort requested ({} pending)", self.id, pending);
        }
        self.clock.interrupt();

        if blocking && foreign && self.quit.is_thread_started() {
            self.abort.wait_drained();
        }
        self.session.unregister_engine_being_aborted(self.id);
    }

    fn quit_engine_thread(&self) {
        if !self.quit.is_thread_started() {
            self.quit.request();
            return;
        }
        self.quit.request();
        if !self.is_foreign_thread() {
            // Called from the worker itself: it exits at its next check
            return;
        }
        self.abort_rendering(true);
        self.wake.notify();
        self.quit.wait_has_quit();
        debug!("Engine {} thread quit", self.id);
    }
}
