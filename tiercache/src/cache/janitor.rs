//! Janitor
//!
//! Expired rows are removed by a full sweep of the durable table followed by
//! `VACUUM`. The time of the last sweep and a "sweep running" marker live in
//! the fast tier, so any instance sharing the namespace can decide on its own
//! whether a sweep is due. The marker is best-effort: two instances can still
//! race past it.

use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::fast_tier::FastTier;
use super::manager::TieredCache;
use crate::core::StoreError;

/// Outcome of a completed sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Rows visited
    pub scanned: usize,
    /// Rows deleted
    pub deleted: usize,
    pub vacuumed: bool,
}

/// Clears the "sweep running" marker on every exit path
struct CleaningMarker<'a>(&'a FastTier);

impl<'a> CleaningMarker<'a> {
    fn set(fast: &'a FastTier) -> Self {
        fast.set_cleaning(true);
        Self(fast)
    }
}

impl Drop for CleaningMarker<'_> {
    fn drop(&mut self) {
        self.0.set_cleaning(false);
    }
}

impl TieredCache {
    /// Run the janitor if the cleanup interval has elapsed.
    ///
    /// The first call for a namespace only records the current time.
    pub fn check_cleanup(&self) -> Option<CleanupReport> {
        if self.config.mem_only {
            return None;
        }
        let now = self.clock.now();
        let secs = self.config.cleanup_interval_secs;
        let interval = i64::try_from(secs).unwrap_or(i64::MAX);
        match self.fast.last_cleanup() {
            None => {
                self.fast.set_last_cleanup(now);
                None
            }
            Some(last) if last.saturating_add(interval) < now => self.cleanup(false),
            Some(_) => None,
        }
    }

    /// Sweep the durable tier.
    ///
    /// Clears the fast-tier entry of every row and deletes rows that have
    /// expired, or all rows when `force` is set. Returns `None` when the sweep
    /// was skipped or interrupted.
    pub fn cleanup(&self, force: bool) -> Option<CleanupReport> {
        let durable = self.durable.as_ref()?;
        if self.should_stop() {
            return None;
        }
        if force {
            self.flush();
        }

        let _busy = self.busy.acquire("cleanup");
        if self.fast.is_cleaning() {
            debug!("Cleanup of {} already running", self.namespace());
            return None;
        }
        let _marker = CleaningMarker::set(&self.fast);

        let now = self.clock.now();
        info!("Running cleanup of {} (force={})", self.namespace(), force);

        let rows = match durable.expiries() {
            Ok(rows) => rows,
            Err(e) => {
                self.record_failure("cleanup", &e);
                return None;
            }
        };

        let mut report = CleanupReport::default();
        for (id, expires) in rows {
            if self.should_stop() {
                info!("Cleanup of {} interrupted", self.namespace());
                return None;
            }
            report.scanned += 1;
            self.fast.clear(&id);

            if force || expires <= now {
                match durable.delete(&id) {
                    Ok(true) => {
                        debug!("Deleted {} from {}", id, self.namespace());
                        report.deleted += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.record_failure("delete", &e);
                        if matches!(e, StoreError::Aborted) {
                            return None;
                        }
                    }
                }
            }
        }

        if force {
            self.fast.clear_all();
        }
        report.vacuumed = match durable.vacuum() {
            Ok(()) => true,
            Err(e) => {
                self.record_failure("vacuum", &e);
                false
            }
        };

        self.fast.set_last_cleanup(now);
        self.stats.write().cleanups += 1;
        info!(
            "Cleanup of {} done: scanned={}, deleted={}",
            self.namespace(),
            report.scanned,
            report.deleted
        );
        Some(report)
    }

    /// Delete every entry from both tiers, including writes still queued.
    ///
    /// Returns the number of durable rows removed, or `None` if the durable
    /// tier was unavailable.
    pub fn purge(&self) -> Option<usize> {
        self.discard_pending();
        self.fast.clear_all();
        let durable = self.durable.as_ref()?;
        if self.should_stop() {
            return None;
        }

        let _busy = self.busy.acquire("purge");
        let _marker = CleaningMarker::set(&self.fast);
        let now = self.clock.now();
        info!("Deleting all entries of {}", self.namespace());

        let deleted = match durable.delete_all() {
            Ok(deleted) => deleted,
            Err(e) => {
                self.record_failure("purge", &e);
                return None;
            }
        };
        if let Err(e) = durable.vacuum() {
            self.record_failure("vacuum", &e);
        }

        self.fast.set_last_cleanup(now);
        info!("Deleted {} entries of {}", deleted, self.namespace());
        Some(deleted)
    }
}

/// Run `check_cleanup` on `cache` every `every` on a blocking worker.
///
/// The task holds only a weak reference and stops once the cache is dropped,
/// closed, or its abort signal fires.
pub fn spawn_janitor(cache: &Arc<TieredCache>, every: Duration) -> tokio::task::JoinHandle<()> {
    info!(
        "Starting janitor task for {} (interval={:?})",
        cache.namespace(),
        every
    );
    let weak: Weak<TieredCache> = Arc::downgrade(cache);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;

            let Some(cache) = weak.upgrade() else {
                break;
            };
            if cache.should_stop() {
                break;
            }

            let pass = tokio::task::spawn_blocking(move || cache.check_cleanup());
            match pass.await {
                Ok(Some(report)) => debug!(?report, "Janitor pass finished"),
                Ok(None) => {}
                Err(e) => warn!("Janitor pass failed: {}", e),
            }
        }
        debug!("Janitor task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::manager::CacheContext;
    use crate::cache::properties::{MemoryProperties, PropertyStore};
    use crate::config::CacheConfig;
    use crate::core::{AbortSignal, Clock, ManualClock, TIME_HOURS};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn open(
        dir: &std::path::Path,
        props: Arc<MemoryProperties>,
        clock: &ManualClock,
    ) -> TieredCache {
        let config = CacheConfig::named(dir, "database", "janitor.db");
        let context = CacheContext::default()
            .with_properties(props)
            .with_clock(Arc::new(clock.clone()));
        TieredCache::with_context(config, context).unwrap()
    }

    #[test]
    fn test_first_check_only_records_time() {
        let dir = tempdir().unwrap();
        let props = Arc::new(MemoryProperties::new());
        let clock = ManualClock::new(10_000);
        let cache = open(dir.path(), props, &clock);

        assert_eq!(cache.fast.last_cleanup(), Some(10_000));
        assert_eq!(cache.check_cleanup(), None);
    }

    #[test]
    fn test_cleanup_deletes_only_expired() {
        let dir = tempdir().unwrap();
        let props = Arc::new(MemoryProperties::new());
        let clock = ManualClock::new(10_000);
        let cache = open(dir.path(), props, &clock);

        cache.set("short", &1u32, 1).unwrap();
        cache.set("long", &2u32, 30).unwrap();
        clock.advance_days(2);

        let report = cache.cleanup(false).unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.deleted, 1);
        assert!(report.vacuumed);

        assert_eq!(cache.ids().unwrap().len(), 1);
        // Fast tier was cleared but the live row is promoted again
        assert_eq!(cache.get_fast::<u32>("long").unwrap(), None);
        assert_eq!(cache.get::<u32>("long").unwrap(), Some(2));
        assert_eq!(cache.fast.last_cleanup(), Some(clock.now()));
        assert!(!cache.fast.is_cleaning());
    }

    #[test]
    fn test_interval_triggers_cleanup() {
        let dir = tempdir().unwrap();
        let props = Arc::new(MemoryProperties::new());
        let clock = ManualClock::new(10_000);
        let cache = open(dir.path(), props, &clock);
        cache.set("k", &1u32, 0).unwrap();

        clock.advance_secs(4 * TIME_HOURS);
        assert_eq!(cache.check_cleanup(), None);

        clock.advance_secs(1);
        let report = cache.check_cleanup().unwrap();
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn test_huge_interval_never_triggers() {
        let dir = tempdir().unwrap();
        let props = Arc::new(MemoryProperties::new());
        let clock = ManualClock::new(10_000);
        let mut config = CacheConfig::named(dir.path(), "database", "huge.db");
        config.cleanup_interval_secs = u64::MAX;
        let context = CacheContext::default()
            .with_properties(props)
            .with_clock(Arc::new(clock.clone()));
        let cache = TieredCache::with_context(config, context).unwrap();
        cache.set("k", &1u32, 0).unwrap();

        clock.advance_days(365 * 100);
        assert_eq!(cache.check_cleanup(), None);
        assert_eq!(cache.durable_len(), Some(1));
    }

    #[test]
    fn test_busy_marker_skips_cleanup() {
        let dir = tempdir().unwrap();
        let props = Arc::new(MemoryProperties::new());
        let clock = ManualClock::new(10_000);
        let cache = open(dir.path(), props, &clock);

        cache.fast.set_cleaning(true);
        assert_eq!(cache.cleanup(true), None);
        assert_eq!(cache.fast.last_cleanup(), Some(10_000));
        // Marker belongs to whoever set it
        assert!(cache.fast.is_cleaning());
    }

    #[test]
    fn test_purge_discards_queue_and_rows() {
        let dir = tempdir().unwrap();
        let props = Arc::new(MemoryProperties::new());
        let clock = ManualClock::new(10_000);
        let mut config = CacheConfig::named(dir.path(), "database", "purge.db");
        config.delay_write = true;
        let context = CacheContext::default()
            .with_properties(props)
            .with_clock(Arc::new(clock.clone()));
        let cache = TieredCache::with_context(config, context).unwrap();

        cache.set("a", &1u32, 1).unwrap();
        cache.flush();
        cache.set("b", &2u32, 1).unwrap();

        assert_eq!(cache.purge(), Some(1));
        assert_eq!(cache.pending(), 0);
        assert_eq!(cache.get::<u32>("a").unwrap(), None);
        assert_eq!(cache.get::<u32>("b").unwrap(), None);
        assert_eq!(cache.durable_len(), Some(0));
    }

    #[test]
    fn test_abort_stops_cleanup() {
        let dir = tempdir().unwrap();
        let props = Arc::new(MemoryProperties::new());
        let clock = ManualClock::new(10_000);
        let cache = open(dir.path(), props, &clock);
        cache.set("k", &1u32, 1).unwrap();

        cache.abort_signal().abort();
        assert_eq!(cache.cleanup(true), None);
    }

    /// Property space that fires an abort signal on the nth expiry clear
    struct AbortingProperties {
        inner: MemoryProperties,
        abort: AbortSignal,
        abort_on: usize,
        expiry_clears: AtomicUsize,
    }

    impl PropertyStore for AbortingProperties {
        fn get(&self, name: &str) -> Option<String> {
            self.inner.get(name)
        }

        fn set(&self, name: &str, value: String) {
            self.inner.set(name, value)
        }

        fn clear(&self, name: &str) {
            if name.contains("_expr_") {
                let n = self.expiry_clears.fetch_add(1, Ordering::SeqCst) + 1;
                if n == self.abort_on {
                    self.abort.abort();
                }
            }
            self.inner.clear(name)
        }

        fn clear_prefix(&self, prefix: &str) -> usize {
            self.inner.clear_prefix(prefix)
        }
    }

    #[test]
    fn test_abort_mid_sweep_leaves_remaining_rows() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(10_000);
        let abort = AbortSignal::new();
        let props = Arc::new(AbortingProperties {
            inner: MemoryProperties::new(),
            abort: abort.clone(),
            abort_on: 3,
            expiry_clears: AtomicUsize::new(0),
        });
        let mut config = CacheConfig::named(dir.path(), "database", "sweep.db");
        config.shutdown.timeout_ms = 1_000;
        let context = CacheContext::default()
            .with_properties(props.clone())
            .with_clock(Arc::new(clock.clone()))
            .with_abort(abort.clone());
        let cache = TieredCache::with_context(config, context).unwrap();

        for i in 0..5u32 {
            cache.set(&format!("row/{}", i), &i, 30).unwrap();
        }
        clock.advance_secs(TIME_HOURS);

        assert_eq!(cache.cleanup(true), None);
        assert!(abort.is_aborted());
        // Two rows deleted before the abort landed on the third
        let path = cache.durable.as_ref().unwrap().path().to_path_buf();
        let conn = rusqlite::Connection::open(path).unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM simplecache", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 3);
        assert_eq!(cache.fast.last_cleanup(), Some(10_000));
        assert!(!cache.fast.is_cleaning());
        assert_eq!(cache.stats().cleanups, 0);
    }
}
