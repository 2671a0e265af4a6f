//! Render request parameters and playback boundary policy.

use serde::{Deserialize, Serialize};

/// Frame count meaning "run until stopped" (looping playback).
pub const UNBOUNDED_FRAME_COUNT: i32 = -1;

/// What sequential playback does when the cursor reaches a range boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Wrap around to the opposite bound.
    #[default]
    Loop,
    /// Step back inside the range and reverse direction.
    Bounce,
    /// Stop the run.
    Once,
}

impl std::str::FromStr for PlaybackMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "loop" => Ok(Self::Loop),
            "bounce" => Ok(Self::Bounce),
            "once" => Ok(Self::Once),
            other => anyhow::bail!("Unknown playback mode '{}' (expected loop, bounce or once)", other),
        }
    }
}

/// Snapshot of one `render()` invocation.
///
/// Captured when the request is made; only the engine's own worker mutates
/// the running copy (direction flips, counters) between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunArgs {
    /// Recompute the current frame without moving the cursor.
    pub same_frame: bool,
    pub forward: bool,
    /// Move the timeline cursor while playing.
    pub seek_timeline: bool,
    pub refresh_tree: bool,
    /// False on the first iteration of a run.
    pub recursive_call: bool,
    /// Frames still requested, `UNBOUNDED_FRAME_COUNT` for looping runs.
    pub frame_requests_count: i32,
    /// Zero-based number of frames produced so far in this run.
    pub frame_request_index: i32,
    /// The tree holds a sequential-only node: render the main view only.
    pub force_sequential: bool,
    pub force_preview: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            same_frame: false,
            forward: true,
            seek_timeline: false,
            refresh_tree: false,
            recursive_call: false,
            frame_requests_count: 0,
            frame_request_index: 0,
            force_sequential: false,
            force_preview: false,
        }
    }
}

impl RunArgs {
    pub fn is_unbounded(&self) -> bool {
        self.frame_requests_count == UNBOUNDED_FRAME_COUNT
    }

    /// Playback still has frames to produce after the current one.
    ///
    /// `frame_requests_count` is the remaining counter: it only drops after
    /// a frame is produced, so it reads 1 while the final frame renders.
    pub fn is_playback_running(&self) -> bool {
        self.is_unbounded() || self.frame_requests_count > 1
    }

    /// Computations see a sequential render when more than one frame is
    /// requested or the tree forces it.
    pub fn is_sequential_render(&self) -> bool {
        self.frame_requests_count > 1 || self.is_unbounded() || self.force_sequential
    }

    /// Account for one produced frame.
    pub fn frame_done(&mut self) {
        if self.frame_request_index == 0 && self.frame_requests_count == 1 && !self.same_frame {
            self.frame_requests_count = 0;
        } else if !self.is_unbounded() {
            self.frame_requests_count -= 1;
        }
        self.frame_request_index += 1;
        self.recursive_call = true;
    }

    /// Frames still owed to the caller when a run is interrupted.
    pub fn remaining_count(&self) -> i32 {
        self.frame_requests_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_done_counts_down() {
        let mut args = RunArgs {
            frame_requests_count: 3,
            ..Default::default()
        };
        args.frame_done();
        assert_eq!(args.frame_requests_count, 2);
        assert_eq!(args.frame_request_index, 1);
        assert!(args.recursive_call);
        args.frame_done();
        args.frame_done();
        assert_eq!(args.frame_requests_count, 0);
    }

    #[test]
    fn test_unbounded_never_counts_down() {
        let mut args = RunArgs {
            frame_requests_count: UNBOUNDED_FRAME_COUNT,
            ..Default::default()
        };
        for _ in 0..5 {
            args.frame_done();
        }
        assert!(args.is_unbounded());
        assert_eq!(args.frame_request_index, 5);
        assert!(args.is_playback_running());
    }

    #[test]
    fn test_playback_running_on_last_frame() {
        let mut args = RunArgs {
            frame_requests_count: 2,
            ..Default::default()
        };
        assert!(args.is_playback_running());
        args.frame_done();
        assert_eq!(args.remaining_count(), 1);
        assert!(!args.is_playback_running());
    }

    #[test]
    fn test_playback_mode_parse() {
        assert_eq!("Bounce".parse::<PlaybackMode>().unwrap(), PlaybackMode::Bounce);
        assert!("sideways".parse::<PlaybackMode>().is_err());
    }
}
