//! Display sink backed by the shared frame cache.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::trace;

use super::{project_rod, ImageInput, ImageNode, NodeBase, PROJECT_FORMAT};
use crate::core::frame_cache::{Frame, FrameCache, FrameKey};
use crate::entities::node::{
    FrameRange, Node, NodeId, RectI, RegionOfDefinition, RenderError, RenderResult, RenderRoIArgs, RenderScale,
};
use crate::entities::output::ViewerSink;
use crate::entities::timeline::Timeline;

pub struct Viewer {
    base: NodeBase,
    timeline: Arc<Timeline>,
    cache: Arc<dyn FrameCache>,
    view: usize,
    displayed: Mutex<Option<(i32, Arc<Frame>)>>,
    disconnected: AtomicBool,
    frame_range_locked: AtomicBool,
    frames_shown: AtomicU64,
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("name", &self.base.name())
            .field("displayed", &self.displayed_frame())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

impl Viewer {
    pub fn new(name: &str, timeline: Arc<Timeline>, cache: Arc<dyn FrameCache>, view: usize) -> Arc<Self> {
        Arc::new(Self {
            base: NodeBase::new(name, 1),
            timeline,
            cache,
            view,
            displayed: Mutex::new(None),
            disconnected: AtomicBool::new(true),
            frame_range_locked: AtomicBool::new(true),
            frames_shown: AtomicU64::new(0),
        })
    }

    pub fn connect(&self, input: Option<ImageInput>) {
        self.base.connect(0, input);
    }

    pub fn set_frame_range_locked(&self, locked: bool) {
        self.frame_range_locked.store(locked, Ordering::SeqCst);
    }

    /// Frame number currently on screen.
    pub fn displayed_frame(&self) -> Option<i32> {
        self.lock_displayed().as_ref().map(|(t, _)| *t)
    }

    pub fn displayed_image(&self) -> Option<Arc<Frame>> {
        self.lock_displayed().as_ref().map(|(_, f)| Arc::clone(f))
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown.load(Ordering::Relaxed)
    }

    pub fn cache(&self) -> &Arc<dyn FrameCache> {
        &self.cache
    }

    fn lock_displayed(&self) -> std::sync::MutexGuard<'_, Option<(i32, Arc<Frame>)>> {
        self.displayed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn display(&self, time: i32, frame: Arc<Frame>) {
        *self.lock_displayed() = Some((time, frame));
        self.disconnected.store(false, Ordering::SeqCst);
        self.frames_shown.fetch_add(1, Ordering::Relaxed);
    }

    fn full_window() -> RectI {
        PROJECT_FORMAT.to_pixel_enclosing(RenderScale::identity())
    }
}

impl ImageNode for Viewer {
    fn node_base(&self) -> &NodeBase {
        &self.base
    }

    fn produce(&self, time: i32, view: usize, window: RectI) -> RenderResult<Frame> {
        self.base.check_aborted(time)?;
        match self.base.render_input(0) {
            Some(input) => input.produce(time, view, window),
            None => Err(RenderError::Failed),
        }
    }
}

impl ViewerSink for Viewer {
    fn timeline(&self) -> Arc<Timeline> {
        Arc::clone(&self.timeline)
    }

    fn render_viewer(&self, time: i32, _single_threaded: bool, _is_sequential: bool) -> RenderResult<()> {
        let key = FrameKey::new(self.base.id(), time, self.view, 0).with_tree_hash(self.render_hash());
        if let Some(frame) = self.cache.get(&key) {
            trace!("{}: frame {} from cache", self.base.name(), time);
            self.display(time, frame);
            return Ok(());
        }
        let frame = Arc::new(self.produce(time, self.view, Self::full_window())?);
        self.cache.insert(key, Arc::clone(&frame));
        self.display(time, frame);
        Ok(())
    }

    fn disconnect_viewer(&self) {
        *self.lock_displayed() = None;
        self.disconnected.store(true, Ordering::SeqCst);
    }

    fn is_frame_range_locked(&self) -> bool {
        self.frame_range_locked.load(Ordering::SeqCst)
    }
}

impl Node for Viewer {
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

    /// The connected input's range.
    fn frame_range(&self) -> FrameRange {
        self.base
            .render_input(0)
            .map(|i| i.node().frame_range())
            .unwrap_or_else(FrameRange::unbounded)
    }

    fn region_of_definition(&self, _time: i32, _scale: RenderScale, _view: usize) -> RenderResult<RegionOfDefinition> {
        Ok(project_rod())
    }

    fn render_roi(&self, args: &RenderRoIArgs) -> RenderResult<()> {
        let frame = self.produce(args.time, args.view, args.render_window)?;
        self.display(args.time, Arc::new(frame));
        Ok(())
    }

    fn set_aborted(&self, aborted: bool) {
        self.base.set_aborted(aborted);
    }

    fn is_aborted(&self) -> bool {
        self.base.is_aborted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineSettings, INLINE_RENDERING};
    use crate::core::engine::{RenderEngine, RenderRequest};
    use crate::core::frame_cache::LruFrameCache;
    use crate::entities::output::RenderOutput;
    use crate::entities::session::{AppMode, Session};
    use crate::nodes::merge::{INPUT_A, INPUT_B};
    use crate::nodes::{Generator, Merge, MergeOp, Pattern};

    fn viewer_with_source() -> (Arc<Viewer>, Arc<LruFrameCache>) {
        let cache = Arc::new(LruFrameCache::new(8));
        let viewer = Viewer::new("viewer", Arc::new(Timeline::new(1, 10)), cache.clone(), 0);
        viewer.connect(Some(ImageInput::new(Generator::new("ramp", Pattern::Ramp))));
        viewer.update_render_inputs();
        (viewer, cache)
    }

    #[test]
    fn test_second_render_hits_cache() {
        let (viewer, cache) = viewer_with_source();
        viewer.render_viewer(3, false, false).unwrap();
        viewer.render_viewer(3, false, false).unwrap();

        assert_eq!(viewer.displayed_frame(), Some(3));
        assert_eq!(viewer.frames_shown(), 2);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!(!viewer.is_disconnected());
    }

    fn mean(viewer: &Viewer) -> Option<f32> {
        viewer.displayed_image().map(|f| f.mean())
    }

    #[test]
    fn test_parameter_edit_misses_cache() {
        let cache = Arc::new(LruFrameCache::new(8));
        let viewer = Viewer::new("viewer", Arc::new(Timeline::new(1, 10)), cache.clone(), 0);
        let source = Generator::new("flat", Pattern::Constant(0.5));
        viewer.connect(Some(ImageInput::new(source.clone())));
        viewer.update_render_inputs();

        viewer.render_viewer(1, false, false).unwrap();
        assert_eq!(mean(&viewer), Some(0.5));

        assert!(source.set_gain(0.0));
        viewer.render_viewer(1, false, false).unwrap();
        assert_eq!(mean(&viewer), Some(0.0));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 2));
    }

    #[test]
    fn test_rewire_changes_render_hash() {
        let cache = Arc::new(LruFrameCache::new(8));
        let viewer = Viewer::new("viewer", Arc::new(Timeline::new(1, 10)), cache, 0);
        let merge = Merge::new("merge", MergeOp::Average);
        merge.connect(INPUT_A, Some(ImageInput::new(Generator::new("a", Pattern::Constant(1.0)))));
        viewer.connect(Some(ImageInput::new(merge.clone())));
        viewer.update_render_inputs();
        merge.update_render_inputs();
        let before = viewer.render_hash();
        assert_eq!(before, viewer.render_hash());

        merge.connect(INPUT_B, Some(ImageInput::new(Generator::new("b", Pattern::Constant(0.0)))));
        merge.update_render_inputs();
        assert_ne!(before, viewer.render_hash());
    }

    #[test]
    fn test_refresh_after_edit_shows_new_image() {
        let cache = Arc::new(LruFrameCache::new(8));
        let timeline = Arc::new(Timeline::new(1, 10));
        let viewer = Viewer::new("viewer", Arc::clone(&timeline), cache, 0);
        let source = Generator::new("flat", Pattern::Constant(0.5));
        viewer.connect(Some(ImageInput::new(source.clone())));

        let settings = EngineSettings {
            number_of_threads: INLINE_RENDERING,
            ..Default::default()
        };
        let session = Arc::new(Session::new(settings, AppMode::Interactive, timeline));
        let engine = RenderEngine::new(RenderOutput::viewer(viewer.clone()), session);

        engine.render(RenderRequest::current_frame(true, false)).unwrap();
        assert_eq!(mean(&viewer), Some(0.5));

        assert!(source.set_gain(0.0));
        engine.refresh_and_continue_render(false, true).unwrap();
        assert_eq!(mean(&viewer), Some(0.0));
    }

    #[test]
    fn test_no_input_fails_and_disconnects() {
        let cache = Arc::new(LruFrameCache::new(8));
        let viewer = Viewer::new("viewer", Arc::new(Timeline::default()), cache, 0);
        assert!(viewer.render_viewer(1, false, false).is_err());
        viewer.disconnect_viewer();
        assert!(viewer.is_disconnected());
        assert!(viewer.displayed_image().is_none());
    }

    #[test]
    fn test_frame_range_follows_input() {
        let cache = Arc::new(LruFrameCache::new(1));
        let viewer = Viewer::new("viewer", Arc::new(Timeline::default()), cache, 0);
        assert!(viewer.frame_range().is_unbounded_first());

        let clip = Generator::new("clip", Pattern::Constant(1.0)).with_frame_range(20, 40);
        viewer.connect(Some(ImageInput::new(clip)));
        viewer.update_render_inputs();
        assert_eq!(viewer.frame_range(), FrameRange::new(20, 40));
    }
}
