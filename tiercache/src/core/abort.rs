use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const POLL_SLICE: Duration = Duration::from_millis(25);

/// Cooperative, application-wide "should abort" flag.
///
/// Every wait or retry loop in the cache polls this on each iteration.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request abort; observed by every holder of a clone
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `timeout`, waking early if abort is requested.
    ///
    /// Returns `true` if abort was requested before or during the wait.
    pub fn wait_for_abort(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_aborted() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(POLL_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_shared_between_clones() {
        let signal = AbortSignal::new();
        let other = signal.clone();
        assert!(!other.is_aborted());

        signal.abort();
        assert!(other.is_aborted());
    }

    #[test]
    fn test_wait_for_abort_times_out() {
        let signal = AbortSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_for_abort(Duration::from_millis(60)));
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_wait_for_abort_wakes_early() {
        let signal = AbortSignal::new();
        let remote = signal.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.abort();
        });

        let start = Instant::now();
        assert!(signal.wait_for_abort(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
