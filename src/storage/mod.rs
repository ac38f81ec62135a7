//! Persisted run state
//!
//! Two files survive across runs: the delivery history (which posts
//! were already forwarded) and the run lock (which prevents two runs
//! from overlapping). Everything else is discarded at end of run.

pub mod history;
pub mod lock;

pub use history::{History, HISTORY_CAP};
pub use lock::{LockGuard, RunLock, STALE_AFTER};
