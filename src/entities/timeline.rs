//! Shared playback cursor over `[left_bound, right_bound]`.
//!
//! Owned by the session/document and referenced (never owned) by render
//! engines. Every mutation records who repositioned the cursor so that a
//! viewer can tell whether it was the last one to seek.

use std::sync::Mutex;

use log::trace;

use super::node::NodeId;

#[derive(Debug, Clone, Copy)]
struct TimelineState {
    left: i32,
    right: i32,
    current: i32,
    last_seek_caller: Option<NodeId>,
}

/// Thread-safe timeline cursor.
#[derive(Debug)]
pub struct Timeline {
    state: Mutex<TimelineState>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(1, 100)
    }
}

impl Timeline {
    /// Create timeline over `[left, right]` with the cursor at `left`.
    pub fn new(left: i32, right: i32) -> Self {
        let (left, right) = if right < left { (right, left) } else { (left, right) };
        Self {
            state: Mutex::new(TimelineState {
                left,
                right,
                current: left,
                last_seek_caller: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn left_bound(&self) -> i32 {
        self.lock().left
    }

    pub fn right_bound(&self) -> i32 {
        self.lock().right
    }

    pub fn bounds(&self) -> (i32, i32) {
        let s = self.lock();
        (s.left, s.right)
    }

    pub fn current_frame(&self) -> i32 {
        self.lock().current
    }

    /// Replace the bounds. The cursor is left untouched: playback decides
    /// what to do when it sits outside the new range.
    pub fn set_frame_range(&self, first: i32, last: i32) {
        let mut s = self.lock();
        let (first, last) = if last < first { (last, first) } else { (first, last) };
        s.left = first;
        s.right = last;
        trace!("Timeline range set to [{}, {}]", first, last);
    }

    pub fn increment_current_frame(&self, caller: NodeId) {
        let mut s = self.lock();
        s.current = s.current.saturating_add(1);
        s.last_seek_caller = Some(caller);
    }

    pub fn decrement_current_frame(&self, caller: NodeId) {
        let mut s = self.lock();
        s.current = s.current.saturating_sub(1);
        s.last_seek_caller = Some(caller);
    }

    pub fn seek_frame(&self, frame: i32, caller: Option<NodeId>) {
        let mut s = self.lock();
        s.current = frame;
        s.last_seek_caller = caller;
        trace!("Timeline seek to {} by {:?}", frame, caller);
    }

    /// Who last repositioned the cursor (`None` = user/UI).
    pub fn last_seek_caller(&self) -> Option<NodeId> {
        self.lock().last_seek_caller
    }
}
