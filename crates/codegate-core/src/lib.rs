//! codegate-core - validation pipeline for uploaded agent code
//!
//! Provides:
//! - Security scanning, quality checking and test execution against a code
//!   directory, each through external tools with hard timeouts
//! - A `Validator` that aggregates the checks into one verdict
//! - A `JobRunner` that downloads, extracts and validates an artifact with
//!   retry and backoff, and a `WorkerPool` that runs jobs concurrently

pub mod config;
pub mod extract;
pub mod fakes;
pub mod job;
pub mod model;
pub mod obs;
pub mod orchestrator;
pub mod pool;
pub mod process;
pub mod quality;
pub mod scanner;
pub mod telemetry;
pub mod test_runner;

// Re-export key types
pub use config::{ToolCommands, ValidationConfig};
pub use extract::{extract_zip, extract_zip_until, ExtractError};
pub use job::{JobConfig, JobError, JobReport, JobRunner, JobState, RetryPolicy, ValidationJob};
pub use model::{Finding, IssueCategory, QualityIssue, SecurityIssue, Severity, TestCase, TestStatus};
pub use orchestrator::{ValidationResult, Validator};
pub use pool::{FinishedJob, PoolError, WorkerPool, DEFAULT_WORKERS};
pub use process::{
    Invocation, ProcessError, ProcessOutput, ProcessRunner, TokioProcessRunner, ToolOutcome,
};
pub use quality::{QualityChecker, QualityError, QualityResult};
pub use scanner::{ScanError, ScanResult, SecurityScanner};
pub use telemetry::init_tracing;
pub use test_runner::{RunnerError, TestResult, TestRunner};

pub use codegate_state::{ValidationRecord, ValidationStatus, VersionId};
