//! Cache Module
//!
//! Two tiers behind one manager:
//! - Fast: namespaced properties in a process-wide shared property space
//! - Durable: one SQLite file per cache instance
//!
//! plus the janitor that sweeps expired rows and the busy-task tracker that
//! lets shutdown wait for in-flight writes.

pub mod busy;
pub mod durable;
pub mod fast_tier;
pub mod janitor;
pub mod manager;
pub mod properties;

pub use busy::{BusyGuard, BusyTasks, WaitOutcome};
pub use durable::{DurableRow, DurableStore};
pub use fast_tier::FastTier;
pub use janitor::{CleanupReport, spawn_janitor};
pub use manager::{CacheContext, TieredCache};
pub use properties::{MemoryProperties, PropertyStore};
