use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::core::AbortSignal;

/// Set of in-flight task labels.
///
/// Clones share the same set, so several cache instances can be made to
/// wait on each other by handing them the same tracker.
#[derive(Debug, Clone, Default)]
pub struct BusyTasks {
    tasks: Arc<Mutex<Vec<String>>>,
}

/// Removes its label from the tracker when dropped
#[must_use = "the task is only tracked while the guard is alive"]
pub struct BusyGuard {
    tasks: Arc<Mutex<Vec<String>>>,
    label: String,
}

/// How a `wait_idle` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Idle,
    Aborted,
    TimedOut,
}

impl BusyTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, label: impl Into<String>) -> BusyGuard {
        let label = label.into();
        self.tasks.lock().push(label.clone());
        BusyGuard {
            tasks: Arc::clone(&self.tasks),
            label,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_idle()
    }

    /// Labels currently in flight
    pub fn snapshot(&self) -> Vec<String> {
        self.tasks.lock().clone()
    }

    /// Poll until no task is in flight, abort is requested, or `timeout` elapses
    pub fn wait_idle(&self, abort: &AbortSignal, poll: Duration, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return WaitOutcome::Idle;
            }
            if abort.is_aborted() {
                debug!("Abort requested while waiting on {} busy tasks", self.len());
                return WaitOutcome::Aborted;
            }
            if Instant::now() >= deadline {
                warn!(tasks = ?self.snapshot(), "Timed out waiting for busy tasks");
                return WaitOutcome::TimedOut;
            }
            std::thread::sleep(poll);
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut tasks = self.tasks.lock();
        if let Some(pos) = tasks.iter().position(|t| *t == self.label) {
            tasks.remove(pos);
        }
    }
}
