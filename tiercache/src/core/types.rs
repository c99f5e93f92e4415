use serde::Serialize;

pub const TIME_MINUTES: i64 = 60;
pub const TIME_HOURS: i64 = 60 * TIME_MINUTES;
pub const TIME_DAYS: i64 = 24 * TIME_HOURS;

/// A serialized entry as stored by either tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Caller-constructed key, unique within a cache instance
    pub key: String,
    /// Epoch seconds after which the entry is absent
    pub expires_at: i64,
    /// JSON payload
    pub payload: String,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, expires_at: i64, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expires_at,
            payload: payload.into(),
        }
    }

    /// An entry is live strictly before its expiry timestamp
    pub fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// Compute the expiry timestamp for a TTL given in days
pub fn expiry_from_days(now: i64, ttl_days: u32) -> i64 {
    now.saturating_add(i64::from(ttl_days).saturating_mul(TIME_DAYS))
}

/// Statistics for a cache instance
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    /// Number of GET operations
    pub gets: u64,
    /// Number of SET operations
    pub sets: u64,
    /// Hits served by the fast tier
    pub fast_hits: u64,
    /// Hits served by the durable tier (and promoted)
    pub durable_hits: u64,
    /// Number of misses
    pub misses: u64,
    /// Rows written to the durable tier
    pub durable_writes: u64,
    /// Durable operations that degraded to a no-op
    pub durable_failures: u64,
    /// Durable reads rejected by checksum verification
    pub checksum_mismatches: u64,
    /// Janitor passes completed
    pub cleanups: u64,
}

impl CacheStats {
    /// Calculate hit rate across both tiers
    pub fn hit_rate(&self) -> f64 {
        let hits = self.fast_hits + self.durable_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
