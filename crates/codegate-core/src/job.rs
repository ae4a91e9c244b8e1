//! Background validation jobs with retry, backoff and a per-job timeout.
//!
//! A job is `(version_id, storage_key)`. Each attempt marks the version
//! running, downloads and extracts the artifact into a scratch directory,
//! validates it and persists the record. Failed attempts are retried with
//! capped exponential backoff; once retries are exhausted the version is
//! marked failed and the job is never retried again.
//!
//! State machine:
//!
//! ```text
//! Scheduled -> Running -> Completed
//!                      -> RetryScheduled -> Running ...
//!                      -> FailedPermanent
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use codegate_state::{
    ArtifactStore, StorageError, ValidationRecord, ValidationStatus, VersionId, VersionStore,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::extract::{extract_zip_until, ExtractError};
use crate::obs::{self, JobSpan};
use crate::orchestrator::Validator;

/// Retry behaviour for failed attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failed attempts before the job fails permanently. One
    /// attempt always runs, so `0` behaves like `1`.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each later one.
    pub backoff_base_ms: u64,
    /// Upper bound on any single delay.
    pub backoff_max_ms: u64,
    /// Pick each delay uniformly from `[0, capped delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 600_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Capped delay before retry number `retry` (1-based), without jitter.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling(retry);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let ms = rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
        Duration::from_millis(ms)
    }
}

/// Job-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Wall-clock limit for one attempt, independent of check timeouts.
    pub timeout_secs: u64,
    /// Parent directory for scratch directories (system temp when `None`).
    pub work_root: Option<PathBuf>,
    pub retry: RetryPolicy,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 900,
            work_root: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl JobConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Queue message asking for one version to be validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationJob {
    pub version_id: VersionId,
    pub storage_key: String,
}

impl ValidationJob {
    pub fn new(version_id: VersionId, storage_key: impl Into<String>) -> Self {
        Self {
            version_id,
            storage_key: storage_key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    Running,
    Completed,
    RetryScheduled,
    FailedPermanent,
}

/// Errors from a single attempt, or from reporting the final failure.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to extract artifact: {0}")]
    Extract(#[from] ExtractError),

    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("job timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl JobError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, JobError::Timeout(_))
    }
}

/// What happened to one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub version_id: VersionId,
    pub final_state: JobState,
    pub attempts: u32,
    /// Every state the job passed through, in order.
    pub history: Vec<JobState>,
    /// Persisted record when the job completed.
    pub record: Option<ValidationRecord>,
    /// SHA-256 of the last downloaded artifact.
    pub artifact_digest: Option<String>,
    pub last_error: Option<String>,
}

impl JobReport {
    pub fn completed(&self) -> bool {
        self.final_state == JobState::Completed
    }
}

/// Blocking extraction task; hands the scratch directory back when done.
type Extraction = JoinHandle<(TempDir, Result<usize, ExtractError>)>;

/// Runs validation jobs against the storage collaborators.
pub struct JobRunner {
    artifacts: Arc<dyn ArtifactStore>,
    versions: Arc<dyn VersionStore>,
    validator: Arc<Validator>,
    config: JobConfig,
}

impl JobRunner {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        versions: Arc<dyn VersionStore>,
        validator: Arc<Validator>,
        config: JobConfig,
    ) -> Self {
        Self {
            artifacts,
            versions,
            validator,
            config,
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Run `job` to completion or permanent failure.
    ///
    /// Returns `Err` only when the terminal failure itself could not be
    /// recorded in the version store.
    pub async fn run(&self, job: &ValidationJob) -> Result<JobReport, JobError> {
        let job_id = Uuid::new_v4().to_string();
        JobSpan::new(&job_id, job.version_id)
            .instrument(self.run_attempts(job_id, job))
            .await
    }

    async fn run_attempts(&self, job_id: String, job: &ValidationJob) -> Result<JobReport, JobError> {
        let start = Instant::now();
        let policy = &self.config.retry;
        let mut report = JobReport {
            job_id,
            version_id: job.version_id,
            final_state: JobState::Scheduled,
            attempts: 0,
            history: vec![JobState::Scheduled],
            record: None,
            artifact_digest: None,
            last_error: None,
        };
        obs::emit_job_started(job.version_id, &job.storage_key);

        for attempt in 1..=policy.attempt_budget() {
            report.attempts = attempt;
            report.history.push(JobState::Running);
            obs::emit_attempt_started(job.version_id, attempt);

            match self.attempt(job, &mut report.artifact_digest).await {
                Ok(record) => {
                    obs::emit_job_finished(
                        job.version_id,
                        attempt,
                        record.status.as_str(),
                        start.elapsed().as_millis() as u64,
                    );
                    report.record = Some(record);
                    report.final_state = JobState::Completed;
                    report.history.push(JobState::Completed);
                    return Ok(report);
                }
                Err(e) => {
                    report.last_error = Some(e.to_string());
                    if attempt < policy.attempt_budget() {
                        let delay = policy.delay_for(attempt);
                        obs::emit_retry_scheduled(
                            job.version_id,
                            attempt,
                            delay.as_millis() as u64,
                            &e,
                        );
                        report.history.push(JobState::RetryScheduled);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let exhausted = JobError::MaxRetriesExceeded {
            attempts: report.attempts,
            last_error: report.last_error.clone().unwrap_or_default(),
        };
        obs::emit_job_exhausted(job.version_id, report.attempts, &exhausted);
        self.versions
            .set_status(
                job.version_id,
                ValidationStatus::Failed,
                Some(exhausted.to_string()),
            )
            .await?;

        report.final_state = JobState::FailedPermanent;
        report.history.push(JobState::FailedPermanent);
        Ok(report)
    }

    /// One attempt under the job timeout. The scratch directory is removed
    /// on every exit path, including timeout.
    ///
    /// Extraction runs on the blocking pool and owns the scratch directory
    /// while it does. On timeout the extraction is cancelled and awaited, so
    /// the directory is dropped only after nothing can write into it.
    async fn attempt(
        &self,
        job: &ValidationJob,
        digest: &mut Option<String>,
    ) -> Result<ValidationRecord, JobError> {
        let timeout = self.config.timeout();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut extraction: Option<Extraction> = None;

        let outcome = tokio::time::timeout(
            timeout,
            self.attempt_inner(job, digest, &cancel, &mut extraction),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                if let Some(handle) = extraction.take() {
                    debug!("waiting for cancelled extraction");
                    // The scratch directory comes back with the task and is
                    // dropped here.
                    let _ = handle.await;
                }
                Err(JobError::Timeout(timeout))
            }
        }
    }

    async fn attempt_inner(
        &self,
        job: &ValidationJob,
        digest: &mut Option<String>,
        cancel: &Arc<AtomicBool>,
        extraction: &mut Option<Extraction>,
    ) -> Result<ValidationRecord, JobError> {
        self.versions
            .set_status(job.version_id, ValidationStatus::Running, None)
            .await?;

        let bytes = self.artifacts.download(&job.storage_key).await?;
        *digest = Some(hex::encode(Sha256::digest(&bytes)));
        debug!(bytes = bytes.len(), "downloaded artifact");

        let workspace = self.workspace()?;
        let code_dir = workspace.path().join("extracted");
        let dest = code_dir.clone();
        let cancel = Arc::clone(cancel);
        let handle = extraction.insert(tokio::task::spawn_blocking(move || {
            let extracted = extract_zip_until(&bytes, &dest, &cancel);
            (workspace, extracted)
        }));
        let joined = handle.await;
        *extraction = None;
        let (workspace, extracted) = joined.map_err(|e| JobError::Task(e.to_string()))?;
        extracted?;

        let result = self.validator.validate(&code_dir).await;
        let record = result.to_record();
        self.versions.set_result(job.version_id, &record).await?;
        info!(status = %record.status, "validation recorded");

        drop(workspace);
        Ok(record)
    }

    fn workspace(&self) -> Result<TempDir, JobError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("codegate-");
        match &self.config.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(JobError::Workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, max: u64, jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: base,
            backoff_max_ms: max,
            jitter,
        }
    }

    #[test]
    fn test_defaults() {
        let config = JobConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(900));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.attempt_budget(), 3);
        assert_eq!(config.retry.backoff_max_ms, 600_000);
        assert!(config.retry.jitter);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let p = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(p.attempt_budget(), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy(1_000, 5_000, false);
        assert_eq!(p.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(p.delay_for(3), Duration::from_millis(4_000));
        assert_eq!(p.delay_for(4), Duration::from_millis(5_000));
        assert_eq!(p.delay_for(200), Duration::from_millis(5_000));
    }

    #[test]
    fn test_jitter_stays_within_ceiling() {
        let p = policy(100, 10_000, true);
        for retry in 1..=8 {
            for _ in 0..20 {
                assert!(p.delay_for(retry) <= p.ceiling(retry));
            }
        }
    }

    #[test]
    fn test_job_message_json() {
        let job: ValidationJob =
            serde_json::from_str(r#"{"version_id": 42, "storage_key": "agents/a/1.zip"}"#)
                .unwrap();
        assert_eq!(job, ValidationJob::new(42, "agents/a/1.zip"));
    }

    #[test]
    fn test_max_retries_message() {
        let err = JobError::MaxRetriesExceeded {
            attempts: 3,
            last_error: "artifact not found: k".to_string(),
        };
        assert!(err.to_string().contains("max retries exceeded"));
    }
}
