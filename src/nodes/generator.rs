//! Procedural source node.

use std::sync::{Arc, Mutex};

use log::warn;

use super::{fill_frame, project_rod, ImageNode, NodeBase};
use crate::core::frame_cache::Frame;
use crate::entities::node::{
    FrameRange, Node, NodeId, RectI, RegionOfDefinition, RenderResult, RenderRoIArgs, RenderScale,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pattern {
    Constant(f32),
    /// Horizontal 0..1 ramp scrolling one pixel per frame.
    Ramp,
    /// Alternating 0/1 squares of `size` pixels, shifting each frame.
    Checker { size: i32 },
}

#[derive(Debug, Clone, Copy)]
struct GeneratorParams {
    pattern: Pattern,
    gain: f32,
    range: FrameRange,
}

#[derive(Debug)]
pub struct Generator {
    base: NodeBase,
    params: Mutex<GeneratorParams>,
}

impl Generator {
    pub fn new(name: &str, pattern: Pattern) -> Arc<Self> {
        Arc::new(Self {
            base: NodeBase::new(name, 0),
            params: Mutex::new(GeneratorParams {
                pattern,
                gain: 1.0,
                range: FrameRange::unbounded(),
            }),
        })
    }

    /// Declare a natural frame range (default: unbounded).
    pub fn with_frame_range(self: Arc<Self>, first: i32, last: i32) -> Arc<Self> {
        self.lock().range = FrameRange::new(first, last);
        self.base.touch();
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GeneratorParams> {
        self.params.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns false (and changes nothing) while knobs are frozen.
    pub fn set_pattern(&self, pattern: Pattern) -> bool {
        if self.base.knobs_frozen() {
            warn!("{}: parameters are locked during rendering", self.base.name());
            return false;
        }
        self.lock().pattern = pattern;
        self.base.touch();
        true
    }

    pub fn set_gain(&self, gain: f32) -> bool {
        if self.base.knobs_frozen() {
            warn!("{}: parameters are locked during rendering", self.base.name());
            return false;
        }
        self.lock().gain = gain;
        self.base.touch();
        true
    }

    pub fn knobs_frozen(&self) -> bool {
        self.base.knobs_frozen()
    }
}

impl ImageNode for Generator {
    fn node_base(&self) -> &NodeBase {
        &self.base
    }

    fn produce(&self, time: i32, _view: usize, window: RectI) -> RenderResult<Frame> {
        let params = *self.lock();
        let width = (window.width().max(1)) as f32;
        fill_frame(&self.base, time, window, |x, y| {
            let v = match params.pattern {
                Pattern::Constant(c) => c,
                Pattern::Ramp => ((x + time).rem_euclid(width as i32)) as f32 / width,
                Pattern::Checker { size } => {
                    let size = size.max(1);
                    if ((x + time).div_euclid(size) + y.div_euclid(size)) % 2 == 0 {
                        1.0
                    } else {
                        0.0
                    }
                }
            };
            v * params.gain
        })
    }
}

impl Node for Generator {
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
        self.lock().range
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

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> RectI {
        RectI { x1: 0, y1: 0, x2: 8, y2: 4 }
    }

    #[test]
    fn test_constant_and_gain() {
        let g = Generator::new("const", Pattern::Constant(0.5));
        assert!(g.set_gain(2.0));
        let frame = g.produce(1, 0, window()).unwrap();
        assert_eq!(frame.pixels.len(), 32);
        assert_eq!(frame.mean(), 1.0);
    }

    #[test]
    fn test_ramp_moves_with_time() {
        let g = Generator::new("ramp", Pattern::Ramp);
        let a = g.produce(1, 0, window()).unwrap();
        let b = g.produce(2, 0, window()).unwrap();
        assert_ne!(a.pixels, b.pixels);
    }

    #[test]
    fn test_frozen_knobs_reject_edits() {
        let g = Generator::new("checker", Pattern::Checker { size: 2 });
        g.set_knobs_frozen(true);
        assert!(!g.set_pattern(Pattern::Ramp));
        g.set_knobs_frozen(false);
        assert!(g.set_pattern(Pattern::Ramp));
    }

    #[test]
    fn test_aborted_produce_fails() {
        let g = Generator::new("const", Pattern::Constant(1.0));
        g.set_aborted(true);
        assert!(g.produce(1, 0, window()).is_err());
    }
}
