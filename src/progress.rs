//! Progress-callback trait for per-job lifecycle events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::convert::ConversionDriver::with_progress`] to receive events as a
//! job moves through readiness, submit and polling. The CLI uses it to drive
//! a terminal spinner; a host could forward the same events to its own
//! progress-reporting channel.
//!
//! # Example
//!
//! ```rust
//! use docling_worker::JobProgressCallback;
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! struct PollCounter(AtomicU32);
//!
//! impl JobProgressCallback for PollCounter {
//!     fn on_poll(&self, _job_id: &str, _attempt: u32, _max: u32, _status: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the conversion driver as a job advances.
///
/// Implementations must be `Send + Sync`: several jobs can run concurrently
/// against one driver. All methods default to no-ops so callers only
/// override what they care about.
pub trait JobProgressCallback: Send + Sync {
    /// Called once the job input has been validated and decoded.
    fn on_job_start(&self, job_id: &str) {
        let _ = job_id;
    }

    /// Called when the supervisor reports the conversion server ready.
    fn on_server_ready(&self, job_id: &str) {
        let _ = job_id;
    }

    /// Called after the service accepted the upload.
    fn on_submitted(&self, job_id: &str, task_id: &str) {
        let _ = (job_id, task_id);
    }

    /// Called after each status poll that produced a status value.
    ///
    /// # Arguments
    /// * `attempt`      — 1-indexed poll number
    /// * `max_attempts` — poll budget for this task
    /// * `status`       — normalised (upper-case) status value
    fn on_poll(&self, job_id: &str, attempt: u32, max_attempts: u32, status: &str) {
        let _ = (job_id, attempt, max_attempts, status);
    }

    /// Called when the result payload has been fetched.
    fn on_job_complete(&self, job_id: &str) {
        let _ = job_id;
    }

    /// Called when the job ends in an error report.
    fn on_job_error(&self, job_id: &str, error: &str) {
        let _ = (job_id, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type stored by the driver.
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
