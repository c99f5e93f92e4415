use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{CacheError, Result, TIME_HOURS};

/// Configuration for one named cache instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Base directory holding every cache folder
    pub root_dir: PathBuf,
    pub folder: String,
    pub filename: String,
    /// Never touch the durable tier
    pub mem_only: bool,
    /// Queue durable writes until `flush`/`close`
    pub delay_write: bool,
    pub default_ttl_days: u32,
    pub cleanup_interval_secs: u64,
    /// Verify the payload CRC on durable reads
    pub verify_checksums: bool,
    pub retry: RetryConfig,
    pub open: OpenConfig,
    pub shutdown: ShutdownConfig,
}

/// Lock-contention retry policy for durable statements
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// SQLite busy handler timeout per attempt
    pub busy_timeout_ms: u64,
}

/// Attempts to open (and if needed recreate) the durable file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenConfig {
    pub attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data"),
            folder: "database".to_string(),
            filename: "defaultcache.db".to_string(),
            mem_only: false,
            delay_write: false,
            default_ttl_days: 30,
            cleanup_interval_secs: (4 * TIME_HOURS) as u64,
            verify_checksums: true,
            retry: RetryConfig::default(),
            open: OpenConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_ms: 500,
            busy_timeout_ms: 0,
        }
    }
}

impl Default for OpenConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 1000,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 25,
            timeout_ms: 30_000,
        }
    }
}

impl CacheConfig {
    /// Config for `<root_dir>/<folder>/<filename>` with every other field defaulted
    pub fn named(
        root_dir: impl Into<PathBuf>,
        folder: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            folder: folder.into(),
            filename: filename.into(),
            ..Default::default()
        }
    }

    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: CacheConfig =
            serde_yaml::from_str(&content).map_err(|e| CacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.folder.is_empty() || self.filename.is_empty() {
            return Err(CacheError::Config(
                "folder and filename must not be empty".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(CacheError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.open.attempts == 0 {
            return Err(CacheError::Config(
                "open.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Namespace for this instance's properties in the fast tier
    pub fn namespace(&self) -> String {
        format!("{}_{}_cache", self.folder, self.filename)
    }

    /// Directory holding the durable file
    pub fn directory(&self) -> PathBuf {
        self.root_dir.join(&self.folder)
    }

    /// Path of the durable file
    pub fn database_path(&self) -> PathBuf {
        self.directory().join(&self.filename)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl OpenConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl ShutdownConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl_days, 30);
        assert_eq!(config.cleanup_interval(), Duration::from_secs(4 * 3600));
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry.backoff(), Duration::from_millis(500));
        assert!(!config.mem_only);
        assert!(!config.delay_write);
    }

    #[test]
    fn test_paths_and_namespace() {
        let config = CacheConfig::named("/tmp/addon", "database_v4", "ItemDetails.db");
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/addon/database_v4/ItemDetails.db")
        );
        assert_eq!(config.namespace(), "database_v4_ItemDetails.db_cache");
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        let config = CacheConfig::named("/tmp", "", "x.db");
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));

        let mut config = CacheConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
