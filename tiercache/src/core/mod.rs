pub mod abort;
pub mod clock;
pub mod error;
pub mod types;

pub use abort::AbortSignal;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, Result, StoreError, StoreResult};
pub use types::{CacheEntry, CacheStats, TIME_DAYS, TIME_HOURS, TIME_MINUTES, expiry_from_days};
