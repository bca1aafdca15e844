//! Quota shared by independent processes on one host.
//!
//! See [`CrossProcessLimiter`] for the locking protocol.

mod limiter;
mod lock;
mod state;
mod status;

pub use limiter::{
    CrossProcessLimiter, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL,
    DEFAULT_SKEW_TOLERANCE, LOCK_FILE_NAME, STATE_FILE_NAME,
};
pub use state::SharedQuotaState;
pub use status::{HealthReport, QuotaStatus};
