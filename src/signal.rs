//! Stop flag shared by the worker pools
//!
//! Workers poll [`StopSignal::is_stopped`] between parts and sleep through
//! [`StopSignal::sleep`] during backoff, so a stop request wakes every
//! sleeping worker at once instead of waiting out its delay.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One-shot stop flag with interruptible sleeps
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake all sleepers. Idempotent.
    pub fn stop(&self) {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            *stopped = true;
            self.wake.notify_all();
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `duration` or until stopped; returns true if stopped
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

#[derive(Debug, Default)]
struct CancelState {
    requested: AtomicBool,
    current: Mutex<Option<Arc<StopSignal>>>,
}

/// Caller-side handle for cancelling transfers
///
/// Cancellation is sticky: once requested, the run in progress stops and
/// every later run on the same orchestrator stops immediately.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.state.requested.store(true, Ordering::SeqCst);
        if let Some(signal) = self.state.current.lock().as_ref() {
            signal.stop();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// Route cancellation to the stop signal of a run
    pub(crate) fn attach(&self, signal: Arc<StopSignal>) {
        let mut current = self.state.current.lock();
        if self.is_cancelled() {
            signal.stop();
        }
        *current = Some(signal);
    }

    pub(crate) fn detach(&self) {
        self.state.current.lock().take();
    }
}
