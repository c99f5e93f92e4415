//! Test helper utilities for creating cache instances

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tiercache::{CacheConfig, CacheContext, ManualClock, MemoryProperties, TieredCache};

/// Scratch directory, private property space and manual clock for one test
pub struct TestEnv {
    pub dir: TempDir,
    pub props: Arc<MemoryProperties>,
    pub clock: ManualClock,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            props: Arc::new(MemoryProperties::new()),
            clock: ManualClock::new(1_700_000_000),
        }
    }

    /// Config with short backoffs so failure paths finish quickly
    pub fn config(&self, filename: &str) -> CacheConfig {
        let mut config = CacheConfig::named(self.dir.path(), "database_v4", filename);
        config.retry.backoff_ms = 20;
        config.open.backoff_ms = 20;
        config.shutdown.timeout_ms = 2_000;
        config
    }

    pub fn context(&self) -> CacheContext {
        CacheContext::default()
            .with_properties(self.props.clone())
            .with_clock(Arc::new(self.clock.clone()))
    }

    pub fn open(&self, config: CacheConfig) -> TieredCache {
        TieredCache::with_context(config, self.context()).unwrap()
    }
}

/// Count rows straight from the file, bypassing the cache
#[allow(dead_code)]
pub fn row_count(path: &Path) -> i64 {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.query_row("SELECT COUNT(*) FROM simplecache", [], |row| row.get(0))
        .unwrap()
}

/// Payload of one row straight from the file
#[allow(dead_code)]
pub fn row_payload(path: &Path, key: &str) -> Option<String> {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.query_row(
        "SELECT data FROM simplecache WHERE id = ?1",
        [key],
        |row| row.get(0),
    )
    .ok()
}
