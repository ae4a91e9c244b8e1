//! Storage trait definitions for codegate
//!
//! These traits define the two collaborators the validation pipeline talks to:
//! - `ArtifactStore`: read-only access to uploaded code archives by key
//! - `VersionStore`: validation status and results per version id
//!
//! Both traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Identifier of an uploaded agent version.
pub type VersionId = i64;

// ---------------------------------------------------------------------------
// ValidationStatus
// ---------------------------------------------------------------------------

/// Validation lifecycle of a version.
///
/// `Pending` and `Running` are transient job states; `Passed`, `Failed` and
/// `Error` are terminal verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Error,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Running => "running",
            ValidationStatus::Passed => "passed",
            ValidationStatus::Failed => "failed",
            ValidationStatus::Error => "error",
        }
    }

    /// Whether this status is a final verdict.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ValidationStatus::Passed | ValidationStatus::Failed | ValidationStatus::Error
        )
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ValidationStatus::Pending),
            "running" => Ok(ValidationStatus::Running),
            "passed" => Ok(ValidationStatus::Passed),
            "failed" => Ok(ValidationStatus::Failed),
            "error" => Ok(ValidationStatus::Error),
            other => Err(StorageError::UnknownStatus(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationRecord: persisted shape of one validation run
// ---------------------------------------------------------------------------

/// Per-check pass flags. A check that did not run reports `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDetails {
    pub security: bool,
    pub quality: bool,
    pub tests: bool,
}

/// Security scan summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecuritySummary {
    pub passed: bool,
    pub issues_count: usize,
    pub critical_count: usize,
    pub high_count: usize,
}

/// Quality check summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub passed: bool,
    pub lint_score: f64,
    pub issues_count: usize,
}

/// Test run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestsSummary {
    pub passed: bool,
    pub total: u32,
    pub passed_count: u32,
    pub failed_count: u32,
    pub coverage: Option<f64>,
}

/// Serialized result of one validation run, as persisted and returned to API
/// consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub status: ValidationStatus,
    pub passed: bool,
    pub details: CheckDetails,
    pub error_message: Option<String>,
    pub total_duration_seconds: f64,
    pub security: Option<SecuritySummary>,
    pub quality: Option<QualitySummary>,
    pub tests: Option<TestsSummary>,
}

/// Current validation state of a version as held by a `VersionStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version_id: VersionId,
    pub status: ValidationStatus,
    pub message: Option<String>,
    pub result: Option<ValidationRecord>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// Read access to uploaded code artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Download the artifact stored under `key`. Returns
    /// `StorageError::NotFound` if absent.
    async fn download(&self, key: &str) -> StorageResult<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// VersionStore
// ---------------------------------------------------------------------------

/// Validation state per version.
///
/// Semantics:
/// - Writes are last-write-wins per `version_id`; no cross-version locking.
/// - `set_status` replaces status and message and clears any stored result.
/// - `set_result` stores the record and takes status/message from it.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Record a status change (e.g. `Running`, or a terminal `Failed`).
    async fn set_status(
        &self,
        version_id: VersionId,
        status: ValidationStatus,
        message: Option<String>,
    ) -> StorageResult<()>;

    /// Record the result of a completed validation run.
    async fn set_result(&self, version_id: VersionId, record: &ValidationRecord)
        -> StorageResult<()>;

    /// Read the current entry for a version, if any.
    async fn get(&self, version_id: VersionId) -> StorageResult<Option<VersionEntry>>;
}
