//! Durable tier
//!
//! One SQLite file per cache instance with a single `simplecache` table.
//! Every statement goes through [`DurableStore::run`], which retries on
//! lock contention with a fixed backoff and gives up early on abort or
//! instance exit. Deferred-write instances keep one connection open; all
//! others open a fresh connection per statement so rows written by other
//! instances are always visible.

use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::config::{OpenConfig, RetryConfig};
use crate::core::{AbortSignal, CacheEntry, StoreError, StoreResult};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS simplecache(
    id TEXT UNIQUE, expires INTEGER, data TEXT, checksum INTEGER)";
const CREATE_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx ON simplecache(id)";
const PROBE: &str = "SELECT id FROM simplecache LIMIT 1";
const SELECT_ONE: &str = "SELECT expires, data, checksum FROM simplecache WHERE id = ?1 LIMIT 1";
const UPSERT: &str =
    "INSERT OR REPLACE INTO simplecache(id, expires, data, checksum) VALUES (?1, ?2, ?3, ?4)";

/// A row read back from the durable tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableRow {
    pub entry: CacheEntry,
    /// 0 when the writer did not record a checksum
    pub checksum: i64,
}

pub struct DurableStore {
    path: PathBuf,
    reuse_connection: bool,
    connection: Mutex<Option<Connection>>,
    retry: RetryConfig,
    open: OpenConfig,
    abort: AbortSignal,
    exiting: AtomicBool,
}

impl DurableStore {
    pub fn new(
        path: impl Into<PathBuf>,
        reuse_connection: bool,
        retry: RetryConfig,
        open: OpenConfig,
        abort: AbortSignal,
    ) -> Self {
        Self {
            path: path.into(),
            reuse_connection,
            connection: Mutex::new(None),
            retry,
            open,
            abort,
            exiting: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make every later statement return `Aborted` without touching the file
    pub fn mark_exiting(&self) {
        self.exiting.store(true, Ordering::SeqCst);
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    fn should_stop(&self) -> bool {
        self.is_exiting() || self.abort.is_aborted()
    }

    /// Drop the cached connection, if any
    pub fn release(&self) {
        if self.connection.lock().take().is_some() {
            debug!("Released durable connection for {:?}", self.path);
        }
    }

    /// Open the file, recreating it when missing or corrupt.
    ///
    /// Lock contention is returned as `Locked` so callers retry instead of
    /// deleting a file another process is using.
    fn connect(&self) -> StoreResult<Connection> {
        let attempts = self.open.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.open_existing() {
                Ok(conn) => return Ok(conn),
                Err(StoreError::Locked) => return Err(StoreError::Locked),
                Err(e) => {
                    if is_corrupt(&e) {
                        self.remove_files()?;
                    }
                    debug!("Durable store {:?} not ready: {}", self.path, e);
                }
            }

            match self.initialise() {
                Ok(conn) => return Ok(conn),
                Err(StoreError::Locked) => return Err(StoreError::Locked),
                Err(e) => {
                    warn!(
                        "Failed to initialise {:?} (attempt {}/{}): {}",
                        self.path, attempt, attempts, e
                    );
                    // Start from an empty file next time
                    let _ = self.remove_files();
                    last_error = Some(e);
                }
            }

            if attempt < attempts && self.abort.wait_for_abort(self.open.backoff()) {
                return Err(StoreError::Aborted);
            }
        }

        error!("Giving up on durable store {:?}", self.path);
        match last_error {
            Some(StoreError::Io(e)) => Err(StoreError::Io(e)),
            _ => Err(StoreError::Corrupt {
                path: self.path.clone(),
            }),
        }
    }

    fn open_existing(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.retry.busy_timeout())?;
        conn.query_row(PROBE, [], |_| Ok(())).optional()?;
        configure_connection(&conn)?;
        Ok(conn)
    }

    fn initialise(&self) -> StoreResult<Connection> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        info!("Initialising durable store {:?}", self.path);

        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.retry.busy_timeout())?;
        conn.execute(CREATE_TABLE, [])?;
        conn.execute(CREATE_INDEX, [])?;
        configure_connection(&conn)?;
        Ok(conn)
    }

    fn remove_files(&self) -> StoreResult<()> {
        if self.path.exists() {
            warn!("Deleting corrupt durable store {:?}", self.path);
            fs::remove_file(&self.path)?;
        }
        for suffix in ["-wal", "-shm", "-journal"] {
            let mut sidecar = self.path.clone().into_os_string();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                fs::remove_file(&sidecar)?;
            }
        }
        Ok(())
    }

    /// Execute `op` with lock retry.
    ///
    /// Retries only on `Locked`, up to `retry.max_attempts` times with
    /// `retry.backoff` between attempts. Abort and instance exit are checked
    /// before each attempt and during each backoff.
    pub fn run<T>(
        &self,
        label: &str,
        mut op: impl FnMut(&mut Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if self.should_stop() {
                debug!("Skipping {} on {:?}: shutting down", label, self.path);
                return Err(StoreError::Aborted);
            }

            match self.attempt(&mut op) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Database locked during {} (attempt {}/{}), retrying",
                        label, attempt, max_attempts
                    );
                    if attempt < max_attempts && self.abort.wait_for_abort(self.retry.backoff()) {
                        return Err(StoreError::Aborted);
                    }
                }
                Err(e) => {
                    error!("Durable {} failed on {:?}: {}", label, self.path, e);
                    return Err(e);
                }
            }
        }

        warn!("Durable {} gave up after {} attempts", label, max_attempts);
        Err(StoreError::LockTimeout {
            attempts: max_attempts,
        })
    }

    fn attempt<T>(
        &self,
        op: &mut impl FnMut(&mut Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        if !self.reuse_connection {
            let mut conn = self.connect()?;
            return op(&mut conn).map_err(StoreError::from);
        }

        let mut slot = self.connection.lock();
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        let result = op(&mut conn).map_err(StoreError::from);
        // A connection that hit a hard error is reopened (and probed) next time
        if !matches!(result, Err(StoreError::Sqlite(_))) {
            *slot = Some(conn);
        }
        result
    }

    pub fn get(&self, key: &str) -> StoreResult<Option<DurableRow>> {
        self.run("get", |conn| {
            conn.query_row(SELECT_ONE, params![key], |row| {
                Ok(DurableRow {
                    entry: CacheEntry::new(key, row.get::<_, i64>(0)?, row.get::<_, String>(1)?),
                    checksum: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                })
            })
            .optional()
        })
    }

    pub fn upsert(&self, entry: &CacheEntry, checksum: i64) -> StoreResult<()> {
        self.run("upsert", |conn| {
            conn.execute(
                UPSERT,
                params![entry.key, entry.expires_at, entry.payload, checksum],
            )
            .map(|_| ())
        })
    }

    /// Upsert many rows in one transaction, in order; later rows win on key clashes
    pub fn upsert_batch(&self, rows: &[(CacheEntry, i64)]) -> StoreResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.run("upsert_batch", |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(UPSERT)?;
                for (entry, checksum) in rows {
                    stmt.execute(params![
                        entry.key,
                        entry.expires_at,
                        entry.payload,
                        checksum
                    ])?;
                }
            }
            tx.commit()?;
            Ok(rows.len())
        })
    }

    /// Every `(id, expires)` pair in the table
    pub fn expiries(&self) -> StoreResult<Vec<(String, i64)>> {
        self.run("expiries", |conn| {
            let mut stmt = conn.prepare("SELECT id, expires FROM simplecache")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }

    pub fn ids(&self) -> StoreResult<Vec<String>> {
        self.run("ids", |conn| {
            let mut stmt = conn.prepare("SELECT id FROM simplecache")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
    }

    pub fn count(&self) -> StoreResult<u64> {
        self.run("count", |conn| {
            conn.query_row("SELECT COUNT(*) FROM simplecache", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n.max(0) as u64)
        })
    }

    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        self.run("delete", |conn| {
            conn.execute("DELETE FROM simplecache WHERE id = ?1", params![key])
                .map(|n| n > 0)
        })
    }

    pub fn delete_all(&self) -> StoreResult<usize> {
        self.run("delete_all", |conn| {
            conn.execute("DELETE FROM simplecache", [])
        })
    }

    /// Compact the file
    pub fn vacuum(&self) -> StoreResult<()> {
        self.run("vacuum", |conn| conn.execute_batch("VACUUM"))
    }
}

/// WAL journal with relaxed fsync
fn configure_connection(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        debug!("journal_mode is {} instead of wal", mode);
    }
    Ok(())
}

fn is_corrupt(err: &StoreError) -> bool {
    match err {
        StoreError::Sqlite(e) => matches!(
            e.sqlite_error_code(),
            Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt)
        ),
        _ => false,
    }
}
