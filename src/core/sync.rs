//! Synchronisation state shared between a render engine's worker and the
//! threads that control it.
//!
//! - [`AbortState`]: pending abort counter + "abort being processed" guard
//! - [`QuitState`]: must-quit / has-quit handshake
//! - [`WakeSignal`]: coalesced start signal for a parked worker
//!
//! Lock order where two are held together: processing guard, then the
//! engine's tree, then the abort counter.

use std::sync::{Condvar, Mutex, MutexGuard};

/// Pending abort requests.
///
/// The processing guard makes start, stop and abort mutually exclusive.
/// It is never held while waiting for an abort to drain.
#[derive(Debug, Default)]
pub struct AbortState {
    processing: Mutex<()>,
    requested: Mutex<u32>,
    drained: Condvar,
}

impl AbortState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the start/stop/abort critical section.
    pub fn lock_processing(&self) -> MutexGuard<'_, ()> {
        self.processing.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lock_requested(&self) -> MutexGuard<'_, u32> {
        self.requested.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn requested_count(&self) -> u32 {
        *self.lock_requested()
    }

    pub fn is_pending(&self) -> bool {
        self.requested_count() > 0
    }

    /// Add one request, returns the new count.
    pub fn request(&self) -> u32 {
        let mut n = self.lock_requested();
        *n += 1;
        *n
    }

    /// Wake every thread in `wait_drained()`. Call after resetting the counter.
    pub fn notify_drained(&self) {
        self.drained.notify_all();
    }

    /// Block until the counter is back to zero.
    pub fn wait_drained(&self) {
        let mut n = self.lock_requested();
        while *n > 0 {
            n = self.drained.wait(n).unwrap_or_else(|e| e.into_inner());
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct QuitFlags {
    must_quit: bool,
    has_quit: bool,
    thread_started: bool,
}

/// Quit handshake. Once `has_quit` is set the worker is gone for good.
#[derive(Debug, Default)]
pub struct QuitState {
    flags: Mutex<QuitFlags>,
    acknowledged: Condvar,
}

impl QuitState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QuitFlags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn must_quit(&self) -> bool {
        self.lock().must_quit
    }

    pub fn has_quit(&self) -> bool {
        self.lock().has_quit
    }

    pub fn is_thread_started(&self) -> bool {
        self.lock().thread_started
    }

    pub fn request(&self) {
        self.lock().must_quit = true;
    }

    /// Claim the right to spawn the worker. False if it already runs or quit.
    pub fn try_mark_thread_started(&self) -> bool {
        let mut f = self.lock();
        if f.thread_started || f.has_quit {
            return false;
        }
        f.thread_started = true;
        true
    }

    /// Undo `try_mark_thread_started()` after a failed spawn.
    pub fn clear_thread_started(&self) {
        self.lock().thread_started = false;
    }

    /// Worker side: quit is complete. Idempotent.
    pub fn acknowledge(&self) {
        let mut f = self.lock();
        f.must_quit = false;
        f.has_quit = true;
        f.thread_started = false;
        self.acknowledged.notify_all();
    }

    pub fn wait_has_quit(&self) {
        let mut f = self.lock();
        while !f.has_quit {
            f = self.acknowledged.wait(f).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Coalesced wake-up: any number of `notify()` calls while the worker is
/// busy become a single extra run.
#[derive(Debug, Default)]
pub struct WakeSignal {
    count: Mutex<u32>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut n = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *n += 1;
        self.cond.notify_one();
    }

    /// Park until notified, then consume every pending notification.
    pub fn wait(&self) {
        let mut n = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *n == 0 {
            n = self.cond.wait(n).unwrap_or_else(|e| e.into_inner());
        }
        *n = 0;
    }

    /// Consume pending notifications without blocking.
    pub fn take(&self) -> bool {
        let mut n = self.count.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *n) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_abort_wait_returns_after_reset() {
        let state = Arc::new(AbortState::new());
        assert_eq!(state.request(), 1);
        assert_eq!(state.request(), 2);

        let s = Arc::clone(&state);
        let waiter = thread::spawn(move || {
            s.wait_drained();
            s.requested_count()
        });
        thread::sleep(Duration::from_millis(20));
        {
            let mut n = state.lock_requested();
            *n = 0;
            state.notify_drained();
        }
        assert_eq!(waiter.join().unwrap(), 0);
        assert!(!state.is_pending());
    }

    #[test]
    fn test_wait_drained_without_requests_returns() {
        let state = AbortState::new();
        state.wait_drained();
    }

    #[test]
    fn test_quit_handshake() {
        let quit = Arc::new(QuitState::new());
        assert!(quit.try_mark_thread_started());
        assert!(!quit.try_mark_thread_started());

        quit.request();
        assert!(quit.must_quit());

        let q = Arc::clone(&quit);
        let worker = thread::spawn(move || q.acknowledge());
        quit.wait_has_quit();
        worker.join().unwrap();

        assert!(quit.has_quit());
        assert!(!quit.must_quit());
        assert!(!quit.is_thread_started());
        // Not restartable
        assert!(!quit.try_mark_thread_started());
    }

    #[test]
    fn test_wake_coalesces() {
        let wake = WakeSignal::new();
        wake.notify();
        wake.notify();
        wake.notify();
        wake.wait();
        assert!(!wake.take());
        wake.notify();
        assert!(wake.take());
    }
}
