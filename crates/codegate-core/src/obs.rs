//! Structured lifecycle events for validation runs and jobs.
//!
//! Every event carries an `event` field (`job.started`, `check.finished`, ...)
//! so log pipelines can filter on it. Job-scoped fields come from [`JobSpan`].

use std::fmt::Display;
use std::future::Future;

use tracing::instrument::Instrumented;
use tracing::{info, warn, Instrument};

/// Span carrying `job_id` and `version_id` for every event of one job.
///
/// Attached with [`JobSpan::instrument`] rather than entered, so the job
/// future stays `Send`:
///
/// ```ignore
/// JobSpan::new(&job_id, 42).instrument(async { /* ... */ }).await;
/// ```
pub struct JobSpan {
    span: tracing::Span,
}

impl JobSpan {
    pub fn new(job_id: &str, version_id: i64) -> Self {
        Self {
            span: tracing::info_span!("codegate.job", job_id = %job_id, version_id = version_id),
        }
    }

    pub fn instrument<F: Future>(self, fut: F) -> Instrumented<F> {
        fut.instrument(self.span)
    }
}

pub fn emit_job_started(version_id: i64, storage_key: &str) {
    info!(event = "job.started", version_id = version_id, storage_key = %storage_key);
}

pub fn emit_attempt_started(version_id: i64, attempt: u32) {
    info!(event = "job.attempt_started", version_id = version_id, attempt = attempt);
}

/// Attempt failed; a retry follows after `delay_ms`.
pub fn emit_retry_scheduled(version_id: i64, attempt: u32, delay_ms: u64, error: &dyn Display) {
    warn!(
        event = "job.retry_scheduled",
        version_id = version_id,
        attempt = attempt,
        delay_ms = delay_ms,
        error = %error,
    );
}

pub fn emit_job_finished(version_id: i64, attempts: u32, status: &str, duration_ms: u64) {
    info!(
        event = "job.finished",
        version_id = version_id,
        attempts = attempts,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_job_exhausted(version_id: i64, attempts: u32, error: &dyn Display) {
    warn!(
        event = "job.exhausted",
        version_id = version_id,
        attempts = attempts,
        error = %error,
    );
}

pub fn emit_check_finished(check: &str, passed: bool, duration_secs: f64) {
    info!(
        event = "check.finished",
        check = %check,
        passed = passed,
        duration_secs = duration_secs,
    );
}

/// A check could not produce a verdict.
pub fn emit_check_error(check: &str, error: &dyn Display) {
    warn!(event = "check.error", check = %check, error = %error);
}

pub fn emit_validation_finished(status: &str, duration_secs: f64) {
    info!(
        event = "validation.finished",
        status = %status,
        duration_secs = duration_secs,
    );
}
