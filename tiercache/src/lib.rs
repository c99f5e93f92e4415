pub mod cache;
pub mod codec;
pub mod config;
pub mod core;
pub mod keys;

// Re-export commonly used types
pub use crate::core::{
    AbortSignal, CacheError, CacheStats, Clock, ManualClock, StoreError, SystemClock, TIME_DAYS,
};
pub use cache::{
    BusyTasks, CacheContext, CleanupReport, MemoryProperties, PropertyStore, TieredCache,
    spawn_janitor,
};
pub use config::CacheConfig;
pub use keys::{CacheKey, KeyPart};
