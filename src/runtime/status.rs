//! Running flags and the one-shot readiness gate shared between a subsystem
//! and the coordinator that started it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Whether a subsystem's loop is alive.
///
/// Starts cleared; [`RunningFlag::mark_started`] sets it and
/// [`RunningFlag::mark_stopped`] clears it for good. A flag never goes back to
/// running once stopped, so each subsystem instance has at most one
/// true-to-false transition.
#[derive(Debug, Clone)]
pub struct RunningFlag {
    inner: Arc<RunningInner>,
}

#[derive(Debug)]
struct RunningInner {
    stopped_once: AtomicBool,
    state: watch::Sender<bool>,
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningFlag {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            inner: Arc::new(RunningInner {
                stopped_once: AtomicBool::new(false),
                state,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Returns `false` if the flag was already stopped, in which case nothing changes.
    pub fn mark_started(&self) -> bool {
        if self.inner.stopped_once.load(Ordering::SeqCst) {
            return false;
        }
        self.inner.state.send_replace(true);
        true
    }

    /// Returns `true` only for the call that performed the transition.
    pub fn mark_stopped(&self) -> bool {
        if self.inner.stopped_once.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.state.send_replace(false);
        true
    }

    /// Resolves once the flag has been cleared by [`RunningFlag::mark_stopped`].
    ///
    /// A flag that was never started counts as stopped.
    pub async fn wait_stopped(&self) {
        let mut rx = self.inner.state.subscribe();
        // `wait_for` only errors when the sender is gone, and `self` holds it.
        let _ = rx.wait_for(|running| !*running).await;
    }
}

/// One-shot signal fired by the data server after its first full tracker cycle.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    inner: Arc<watch::Sender<bool>>,
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(tx),
        }
    }

    /// Fires the signal. Returns `true` only for the first call.
    pub fn fire(&self) -> bool {
        self.inner.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.inner.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
