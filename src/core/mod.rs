pub mod cache;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod fund;
pub mod log;
pub mod market;
pub mod quota;

pub use cache::{CacheEntry, CacheStore};
pub use clock::{Checkpoint, Clock, ClockWindow, FixedClock, SystemClock};
pub use decision::{Decision, FetchDecisionEngine, FetchRecord, Hold};
pub use error::{FetchError, ServiceError, ServiceResult};
pub use quota::{QuotaStatus, QuotaTracker};
