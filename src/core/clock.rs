//! Playback clock - paces frame production at a target rate.
//!
//! FPS-based: each frame has a fixed duration (1/fps seconds). The first
//! `wait_until_next_frame_due()` after `start()` returns immediately and
//! anchors the schedule; every later call sleeps until one frame duration
//! after the previous deadline. When the caller falls behind by more than a
//! frame the schedule is re-anchored instead of bursting to catch up.
//!
//! The wait is a condvar timeout, so `interrupt()` (called on abort) ends it
//! early.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::trace;

/// Samples used for the actual frame rate (sliding window).
const FPS_WINDOW: usize = 30;

/// Lowest accepted target rate.
const MIN_FPS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    Running,
    Paused,
}

#[derive(Debug)]
struct ClockState {
    mode: ClockMode,
    desired_fps: f64,
    /// Deadline of the previous frame
    last_tick: Option<Instant>,
    intervals: VecDeque<Duration>,
    interrupted: bool,
}

#[derive(Debug)]
pub struct PlaybackClock {
    state: Mutex<ClockState>,
    wakeup: Condvar,
}

impl PlaybackClock {
    pub fn new(desired_fps: f64) -> Self {
        Self {
            state: Mutex::new(ClockState {
                mode: ClockMode::Paused,
                desired_fps: desired_fps.max(MIN_FPS),
                last_tick: None,
                intervals: VecDeque::with_capacity(FPS_WINDOW),
                interrupted: false,
            }),
            wakeup: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm the clock for a new playback run.
    pub fn start(&self) {
        let mut s = self.lock();
        s.mode = ClockMode::Running;
        s.last_tick = None;
        s.intervals.clear();
        s.interrupted = false;
    }

    pub fn pause(&self) {
        self.lock().mode = ClockMode::Paused;
        self.wakeup.notify_all();
    }

    pub fn mode(&self) -> ClockMode {
        self.lock().mode
    }

    /// End a wait in progress (the caller sees the frame as due).
    pub fn interrupt(&self) {
        self.lock().interrupted = true;
        self.wakeup.notify_all();
    }

    pub fn set_desired_frame_rate(&self, fps: f64) {
        let fps = if fps.is_finite() { fps.max(MIN_FPS) } else { MIN_FPS };
        self.lock().desired_fps = fps;
        trace!("Desired frame rate set to {:.2}", fps);
    }

    pub fn desired_frame_rate(&self) -> f64 {
        self.lock().desired_fps
    }

    /// Measured rate over the recent frames (0 until two frames were paced).
    pub fn actual_frame_rate(&self) -> f64 {
        let s = self.lock();
        let total: Duration = s.intervals.iter().sum();
        if s.intervals.is_empty() || total.is_zero() {
            return 0.0;
        }
        s.intervals.len() as f64 / total.as_secs_f64()
    }

    /// Block until one frame duration has elapsed since the previous call.
    /// Returns immediately while paused.
    pub fn wait_until_next_frame_due(&self) {
        let mut s = self.lock();
        if s.mode == ClockMode::Paused {
            return;
        }
        let Some(last) = s.last_tick else {
            s.last_tick = Some(Instant::now());
            return;
        };

        let frame_duration = Duration::from_secs_f64(1.0 / s.desired_fps);
        let deadline = last + frame_duration;
        // An interrupt raised before this call counts too
        loop {
            let now = Instant::now();
            if now >= deadline || s.interrupted || s.mode == ClockMode::Paused {
                break;
            }
            let (guard, _) = self
                .wakeup
                .wait_timeout(s, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            s = guard;
        }
        s.interrupted = false;

        let now = Instant::now();
        // Late by more than a frame: re-anchor instead of bursting
        let tick = if now.duration_since(deadline) > frame_duration { now } else { deadline };
        let interval = now.duration_since(last);
        if s.intervals.len() == FPS_WINDOW {
            s.intervals.pop_front();
        }
        s.intervals.push_back(interval);
        s.last_tick = Some(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_paused_never_blocks() {
        let clock = PlaybackClock::new(1.0);
        let t0 = Instant::now();
        clock.wait_until_next_frame_due();
        clock.wait_until_next_frame_due();
        assert!(t0.elapsed() < Duration::from_millis(500));
        assert_eq!(clock.mode(), ClockMode::Paused);
    }

    #[test]
    fn test_paces_to_desired_rate() {
        let clock = PlaybackClock::new(50.0); // 20ms per frame
        clock.start();
        let t0 = Instant::now();
        for _ in 0..6 {
            clock.wait_until_next_frame_due();
        }
        // First call anchors, five paced intervals follow
        assert!(t0.elapsed() >= Duration::from_millis(95));
        let actual = clock.actual_frame_rate();
        assert!(actual > 10.0 && actual <= 55.0, "actual fps {actual}");
    }

    #[test]
    fn test_interrupt_ends_wait() {
        let clock = Arc::new(PlaybackClock::new(MIN_FPS)); // 10s per frame
        clock.start();
        clock.wait_until_next_frame_due();

        let (tx, rx) = crossbeam_channel::bounded(1);
        let c = Arc::clone(&clock);
        thread::spawn(move || {
            let t0 = Instant::now();
            c.wait_until_next_frame_due();
            let _ = tx.send(t0.elapsed());
        });
        // Keep interrupting until the waiter reports back
        let waited = loop {
            clock.interrupt();
            if let Ok(waited) = rx.recv_timeout(Duration::from_millis(20)) {
                break waited;
            }
        };
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn test_interrupt_before_wait_is_not_lost() {
        let clock = PlaybackClock::new(MIN_FPS); // 10s per frame
        clock.start();
        clock.wait_until_next_frame_due();

        clock.interrupt();
        let t0 = Instant::now();
        clock.wait_until_next_frame_due();
        assert!(t0.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_interrupt_is_consumed_by_one_wait() {
        let clock = PlaybackClock::new(20.0); // 50ms per frame
        clock.start();
        clock.wait_until_next_frame_due();
        clock.interrupt();
        clock.wait_until_next_frame_due();

        let t0 = Instant::now();
        clock.wait_until_next_frame_due();
        assert!(t0.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_rejects_invalid_rate() {
        let clock = PlaybackClock::new(24.0);
        clock.set_desired_frame_rate(0.0);
        assert_eq!(clock.desired_frame_rate(), MIN_FPS);
        clock.set_desired_frame_rate(f64::NAN);
        assert_eq!(clock.desired_frame_rate(), MIN_FPS);
        assert_eq!(clock.actual_frame_rate(), 0.0);
    }
}
