//! Concurrent, resilient file uploads.
//!
//! - [`UploadPool`] - fixed set of workers draining a shared path queue
//! - [`RetryPolicy`] / [`with_retry`] - backoff for transient storage errors
//! - [`UploadOutcome`] - one record per processed file

mod outcome;
mod pool;
mod retry;

pub use outcome::{UploadError, UploadOutcome};
pub use pool::{join_workers, UploadPool};
pub use retry::{
    equal_jitter, with_retry, RetryOutcome, RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER,
    DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_SECS,
};
