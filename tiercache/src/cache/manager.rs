use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::busy::{BusyTasks, WaitOutcome};
use super::durable::DurableStore;
use super::fast_tier::FastTier;
use super::properties::{MemoryProperties, PropertyStore};
use crate::codec;
use crate::config::CacheConfig;
use crate::core::{
    AbortSignal, CacheEntry, CacheStats, Clock, Result, StoreError, SystemClock, expiry_from_days,
};

/// Collaborators a cache instance runs against.
///
/// The defaults give each instance its own busy tracker and abort signal and
/// the process-wide property space. Clone a context to share any of them.
#[derive(Clone)]
pub struct CacheContext {
    pub properties: Arc<dyn PropertyStore>,
    pub clock: Arc<dyn Clock>,
    pub abort: AbortSignal,
    pub busy: BusyTasks,
}

impl Default for CacheContext {
    fn default() -> Self {
        Self {
            properties: MemoryProperties::shared(),
            clock: Arc::new(SystemClock),
            abort: AbortSignal::new(),
            busy: BusyTasks::new(),
        }
    }
}

impl CacheContext {
    pub fn with_properties(mut self, properties: Arc<dyn PropertyStore>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_busy(mut self, busy: BusyTasks) -> Self {
        self.busy = busy;
        self
    }
}

/// Two-tier cache: shared properties in front of a SQLite file.
///
/// Reads try the fast tier, then the durable tier (promoting hits). Writes
/// always land in the fast tier and, unless memory-only, in the durable tier
/// either immediately or on the next `flush`/`close`. Durable failures never
/// reach the caller; they only cost a miss.
pub struct TieredCache {
    pub(super) config: CacheConfig,
    pub(super) fast: FastTier,
    pub(super) durable: Option<DurableStore>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) abort: AbortSignal,
    pub(super) busy: BusyTasks,
    queue: Mutex<Vec<CacheEntry>>,
    pub(super) stats: RwLock<CacheStats>,
    closed: AtomicBool,
}

impl TieredCache {
    /// Open a cache against the process-wide property space and wall clock
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_context(config, CacheContext::default())
    }

    pub fn with_context(config: CacheConfig, context: CacheContext) -> Result<Self> {
        config.validate()?;

        let fast = FastTier::new(context.properties, config.namespace());
        let durable = (!config.mem_only).then(|| {
            DurableStore::new(
                config.database_path(),
                config.delay_write,
                config.retry.clone(),
                config.open.clone(),
                context.abort.clone(),
            )
        });

        let cache = Self {
            config,
            fast,
            durable,
            clock: context.clock,
            abort: context.abort,
            busy: context.busy,
            queue: Mutex::new(Vec::new()),
            stats: RwLock::new(CacheStats::default()),
            closed: AtomicBool::new(false),
        };

        cache.check_cleanup();
        info!(
            "Cache {} initialized (mem_only={}, delay_write={})",
            cache.namespace(),
            cache.config.mem_only,
            cache.config.delay_write
        );
        Ok(cache)
    }

    /// Run `f` against a cache that is flushed and closed on every exit path
    pub fn scoped<R>(config: CacheConfig, f: impl FnOnce(&TieredCache) -> R) -> Result<R> {
        let cache = Self::new(config)?;
        let result = f(&cache);
        cache.close();
        Ok(result)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        self.fast.namespace()
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(super) fn should_stop(&self) -> bool {
        self.is_closed() || self.abort.is_aborted()
    }

    /// Get a value, falling back to the durable tier.
    ///
    /// `Ok(None)` is a miss. A stored JSON `null` read as `Option<_>` comes
    /// back as `Ok(Some(None))`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_payload(key)
            .map(|payload| codec::decode(&payload))
            .transpose()
            .map_err(Into::into)
    }

    /// Get a value from the fast tier only
    pub fn get_fast<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.lookup(key, false)
            .map(|payload| codec::decode(&payload))
            .transpose()
            .map_err(Into::into)
    }

    /// Raw JSON payload for `key` from either tier
    pub fn get_payload(&self, key: &str) -> Option<String> {
        self.lookup(key, true)
    }

    fn lookup(&self, key: &str, allow_durable: bool) -> Option<String> {
        let now = self.clock.now();
        self.stats.write().gets += 1;

        if let Some(payload) = self.fast.get(key, now) {
            debug!("Fast tier hit: {}", key);
            self.stats.write().fast_hits += 1;
            return Some(payload);
        }

        let hit = match (&self.durable, allow_durable) {
            (Some(durable), true) => self.read_durable(durable, key, now),
            _ => None,
        };

        let mut stats = self.stats.write();
        match hit {
            Some(entry) => {
                debug!("Durable tier hit: {}", key);
                stats.durable_hits += 1;
                drop(stats);
                self.fast.set(&entry);
                Some(entry.payload)
            }
            None => {
                debug!("Cache miss: {}", key);
                stats.misses += 1;
                None
            }
        }
    }

    fn read_durable(&self, durable: &DurableStore, key: &str, now: i64) -> Option<CacheEntry> {
        let row = match durable.get(key) {
            Ok(row) => row?,
            Err(e) => {
                self.record_failure("get", &e);
                return None;
            }
        };
        if !row.entry.is_live(now) {
            return None;
        }
        if self.config.verify_checksums
            && row.checksum != 0
            && row.checksum != codec::checksum(&row.entry.payload)
        {
            warn!("Checksum mismatch for {} in {}", key, self.namespace());
            self.stats.write().checksum_mismatches += 1;
            return None;
        }
        Some(row.entry)
    }

    /// Cache `value` for `ttl_days` days.
    ///
    /// Only serialization errors are returned; durable failures are logged.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_days: u32) -> Result<()> {
        let _busy = self.busy.acquire(format!("set.{}", key));

        let payload = codec::encode(value)?;
        let entry = CacheEntry::new(key, expiry_from_days(self.clock.now(), ttl_days), payload);
        self.fast.set(&entry);
        self.stats.write().sets += 1;

        let Some(durable) = &self.durable else {
            return Ok(());
        };
        if self.is_closed() {
            debug!(
                "Cache {} closed; {} kept in fast tier only",
                self.namespace(),
                key
            );
            return Ok(());
        }
        if self.config.delay_write {
            self.queue.lock().push(entry);
            return Ok(());
        }

        match durable.upsert(&entry, codec::checksum(&entry.payload)) {
            Ok(()) => self.stats.write().durable_writes += 1,
            Err(e) => self.record_failure("set", &e),
        }
        Ok(())
    }

    /// `set` with the configured default TTL
    pub fn set_default<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, value, self.config.default_ttl_days)
    }

    /// Return the cached value or compute, cache and return it.
    ///
    /// `None` from `fetch` is returned as-is and not cached.
    pub fn get_or_fetch<T, F>(&self, key: &str, ttl_days: u32, fetch: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Option<T>,
    {
        if let Some(value) = self.get::<T>(key)? {
            return Ok(Some(value));
        }
        let Some(value) = fetch() else {
            return Ok(None);
        };
        self.set(key, &value, ttl_days)?;
        Ok(Some(value))
    }

    /// Number of writes waiting for `flush`
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Forget queued writes without persisting them
    pub fn discard_pending(&self) -> usize {
        let discarded = std::mem::take(&mut *self.queue.lock()).len();
        if discarded > 0 {
            debug!(
                "Discarded {} queued writes for {}",
                discarded,
                self.namespace()
            );
        }
        discarded
    }

    /// Write queued entries to the durable tier in one batch.
    ///
    /// Returns the number of rows written. A failed batch is dropped.
    pub fn flush(&self) -> usize {
        let entries = std::mem::take(&mut *self.queue.lock());
        if entries.is_empty() {
            return 0;
        }
        let Some(durable) = &self.durable else {
            return 0;
        };

        let _busy = self.busy.acquire("flush");
        info!(
            "Writing {} queued items to {}",
            entries.len(),
            self.namespace()
        );
        let rows: Vec<(CacheEntry, i64)> = entries
            .into_iter()
            .map(|entry| {
                let checksum = codec::checksum(&entry.payload);
                (entry, checksum)
            })
            .collect();

        match durable.upsert_batch(&rows) {
            Ok(written) => {
                self.stats.write().durable_writes += written as u64;
                written
            }
            Err(e) => {
                warn!("Dropped {} queued writes", rows.len());
                self.record_failure("flush", &e);
                0
            }
        }
    }

    /// Every key in the durable tier, or `None` if it is unavailable
    pub fn ids(&self) -> Option<HashSet<String>> {
        let durable = self.durable.as_ref()?;
        match durable.ids() {
            Ok(ids) => Some(ids.into_iter().collect()),
            Err(e) => {
                self.record_failure("ids", &e);
                None
            }
        }
    }

    /// Row count of the durable tier
    pub fn durable_len(&self) -> Option<u64> {
        let durable = self.durable.as_ref()?;
        match durable.count() {
            Ok(count) => Some(count),
            Err(e) => {
                self.record_failure("count", &e);
                None
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    /// Flush pending writes, stop new durable work and wait for in-flight tasks.
    ///
    /// Safe to call more than once; only the first call does anything.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flush();

        if let Some(durable) = &self.durable {
            durable.mark_exiting();
        }

        let shutdown = &self.config.shutdown;
        match self
            .busy
            .wait_idle(&self.abort, shutdown.poll_interval(), shutdown.timeout())
        {
            WaitOutcome::Idle => {}
            outcome => warn!(
                "Closing {} with busy tasks still running ({:?})",
                self.namespace(),
                outcome
            ),
        }

        let dropped = self.queue.lock().len();
        if dropped > 0 {
            warn!("Dropping {} writes queued during close", dropped);
        }
        if let Some(durable) = &self.durable {
            durable.release();
        }
        info!("Cache {} closed", self.namespace());
    }

    pub(super) fn record_failure(&self, operation: &str, err: &StoreError) {
        match err {
            StoreError::Aborted => debug!("Durable {} skipped: shutting down", operation),
            e => warn!(
                "Durable {} failed for {}, continuing without it: {}",
                operation,
                self.namespace(),
                e
            ),
        }
        self.stats.write().durable_failures += 1;
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.close();
        }
    }
}
