//! Persistence sink writing 8-bit PGM frames.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use log::{debug, info};

use super::{project_rod, ImageInput, ImageNode, NodeBase};
use crate::core::frame_cache::Frame;
use crate::entities::node::{
    FrameRange, Node, NodeId, RectI, RegionOfDefinition, RenderError, RenderResult, RenderRoIArgs, RenderScale,
};
use crate::entities::output::WriterSink;

/// One written frame.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenFrame {
    pub time: i32,
    pub view: usize,
    pub mean: f32,
    pub path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Writer {
    base: NodeBase,
    output_dir: Option<PathBuf>,
    range: Mutex<FrameRange>,
    first: AtomicI32,
    last: AtomicI32,
    current: AtomicI32,
    doing_full_sequence: AtomicBool,
    written: Mutex<Vec<WrittenFrame>>,
    finished: AtomicU32,
}

impl Writer {
    /// Writer keeping frames in memory only, or saving them under `output_dir`.
    pub fn new(name: &str, output_dir: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            base: NodeBase::new(name, 1),
            output_dir,
            range: Mutex::new(FrameRange::unbounded()),
            first: AtomicI32::new(0),
            last: AtomicI32::new(0),
            current: AtomicI32::new(0),
            doing_full_sequence: AtomicBool::new(false),
            written: Mutex::new(Vec::new()),
            finished: AtomicU32::new(0),
        })
    }

    pub fn connect(&self, input: Option<ImageInput>) {
        self.base.connect(0, input);
    }

    /// Render range; unbounded ends follow the input, then the timeline.
    pub fn set_render_range(&self, first: i32, last: i32) {
        *self.range.lock().unwrap_or_else(|e| e.into_inner()) = FrameRange::new(first, last);
    }

    pub fn written(&self) -> Vec<WrittenFrame> {
        self.written.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_doing_full_sequence_render(&self) -> bool {
        self.doing_full_sequence.load(Ordering::SeqCst)
    }

    pub fn renders_finished(&self) -> u32 {
        self.finished.load(Ordering::SeqCst)
    }

    fn frame_path(&self, dir: &Path, time: i32, view: usize) -> PathBuf {
        dir.join(format!("{}.v{}.{:04}.pgm", self.base.name(), view, time))
    }
}

/// Binary PGM (P5), values clamped to [0, 1].
fn write_pgm(path: &Path, frame: &Frame) -> anyhow::Result<()> {
    let mut bytes = format!("P5\n{} {}\n255\n", frame.window.width(), frame.window.height()).into_bytes();
    bytes.extend(frame.pixels.iter().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8));
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

impl ImageNode for Writer {
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

impl WriterSink for Writer {
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
        info!("{}: {} frame(s) written", self.base.name(), self.written().len());
    }
}

impl Node for Writer {
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

    fn frame_range(&self) -> FrameRange {
        let own = *self.range.lock().unwrap_or_else(|e| e.into_inner());
        let upstream = self
            .base
            .render_input(0)
            .map(|i| i.node().frame_range())
            .unwrap_or_else(FrameRange::unbounded);
        FrameRange::new(
            if own.is_unbounded_first() { upstream.first } else { own.first },
            if own.is_unbounded_last() { upstream.last } else { own.last },
        )
    }

    fn region_of_definition(&self, _time: i32, _scale: RenderScale, _view: usize) -> RenderResult<RegionOfDefinition> {
        Ok(project_rod())
    }

    fn render_roi(&self, args: &RenderRoIArgs) -> RenderResult<()> {
        let frame = self.produce(args.time, args.view, args.render_window)?;
        let path = match &self.output_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
                let path = self.frame_path(dir, args.time, args.view);
                write_pgm(&path, &frame)?;
                debug!("{}: wrote {}", self.base.name(), path.display());
                Some(path)
            }
            None => None,
        };
        self.written.lock().unwrap_or_else(|e| e.into_inner()).push(WrittenFrame {
            time: args.time,
            view: args.view,
            mean: frame.mean(),
            path,
        });
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::node::{RectD, UNBOUNDED_FIRST, UNBOUNDED_LAST};
    use crate::nodes::{Generator, Pattern, SequenceReader};

    fn roi(time: i32) -> RenderRoIArgs {
        RenderRoIArgs {
            time,
            scale: RenderScale::identity(),
            mipmap_level: 0,
            view: 0,
            render_window: RectI { x1: 0, y1: 0, x2: 4, y2: 2 },
            is_sequential: true,
            user_interaction: false,
            bypass_cache: false,
            rod: RectD::new(0.0, 0.0, 4.0, 2.0),
        }
    }

    #[test]
    fn test_writes_pgm_files() {
        let dir = std::env::temp_dir().join(format!("compflow_writer_{}", uuid::Uuid::new_v4()));
        let writer = Writer::new("out", Some(dir.clone()));
        writer.connect(Some(ImageInput::new(Generator::new("white", Pattern::Constant(1.0)))));
        writer.update_render_inputs();

        writer.render_roi(&roi(7)).unwrap();

        let written = writer.written();
        assert_eq!(written.len(), 1);
        let path = written[0].path.clone().unwrap();
        assert!(path.ends_with("out.v0.0007.pgm"));
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P5\n4 2\n255\n"));
        assert_eq!(&bytes[bytes.len() - 8..], &[255u8; 8]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_frame_range_merges_own_and_upstream() {
        let writer = Writer::new("out", None);
        writer.connect(Some(ImageInput::new(SequenceReader::new("mov", 10, 20))));
        writer.update_render_inputs();
        assert_eq!(writer.frame_range(), FrameRange::new(10, 20));

        writer.set_render_range(UNBOUNDED_FIRST, 15);
        assert_eq!(writer.frame_range(), FrameRange::new(10, 15));

        writer.set_render_range(12, UNBOUNDED_LAST);
        assert_eq!(writer.frame_range(), FrameRange::new(12, 20));
    }

    #[test]
    fn test_disconnected_writer_fails() {
        let writer = Writer::new("out", None);
        assert!(matches!(writer.render_roi(&roi(1)), Err(RenderError::Failed)));
    }
}
