//! Validation orchestration.
//!
//! [`Validator`] composes the three checkers according to a
//! [`ValidationConfig`], runs the enabled ones concurrently under a
//! per-validation limit, and folds their results into one verdict.
//!
//! Timeouts of individual checks become non-passing sub-results, so the run
//! is `Failed`. Any other checker error turns the run into `Error`; results of
//! checks that did complete are kept.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use codegate_state::{
    CheckDetails, QualitySummary, SecuritySummary, TestsSummary, ValidationRecord,
    ValidationStatus,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::ValidationConfig;
use crate::model::Finding;
use crate::obs;
use crate::process::ProcessRunner;
use crate::quality::{QualityChecker, QualityError, QualityResult};
use crate::scanner::{ScanError, ScanResult, SecurityScanner};
use crate::test_runner::{RunnerError, TestResult, TestRunner};

/// Complete result of one validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub security: Option<ScanResult>,
    pub quality: Option<QualityResult>,
    pub tests: Option<TestResult>,
    pub error_message: Option<String>,
    pub total_duration_seconds: f64,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.status == ValidationStatus::Passed
    }

    /// Per-check pass flags; a check that did not run reports `false`.
    pub fn details(&self) -> CheckDetails {
        CheckDetails {
            security: self.security.as_ref().is_some_and(|r| r.passed),
            quality: self.quality.as_ref().is_some_and(|r| r.passed),
            tests: self.tests.as_ref().is_some_and(|r| r.passed),
        }
    }

    /// Security and quality findings of every check that ran.
    pub fn findings(&self) -> Vec<Finding> {
        let security = self
            .security
            .iter()
            .flat_map(|r| r.issues.iter().cloned().map(Finding::from));
        let quality = self
            .quality
            .iter()
            .flat_map(|r| r.issues.iter().cloned().map(Finding::from));
        security.chain(quality).collect()
    }

    /// Persisted shape of this result.
    pub fn to_record(&self) -> ValidationRecord {
        ValidationRecord {
            status: self.status,
            passed: self.passed(),
            details: self.details(),
            error_message: self.error_message.clone(),
            total_duration_seconds: self.total_duration_seconds,
            security: self.security.as_ref().map(|r| SecuritySummary {
                passed: r.passed,
                issues_count: r.issues.len(),
                critical_count: r.critical_count(),
                high_count: r.high_count(),
            }),
            quality: self.quality.as_ref().map(|r| QualitySummary {
                passed: r.passed,
                lint_score: r.lint_score,
                issues_count: r.issues.len(),
            }),
            tests: self.tests.as_ref().map(|r| TestsSummary {
                passed: r.passed,
                total: r.total,
                passed_count: r.passed_count,
                failed_count: r.failed_count,
                coverage: r.coverage_percent,
            }),
        }
    }
}

/// Outcome of one check before aggregation.
enum CheckOutcome<T> {
    Skipped,
    Done(T),
    Error(String),
}

impl<T> CheckOutcome<T> {
    fn into_parts(self) -> (Option<T>, Option<String>) {
        match self {
            CheckOutcome::Skipped => (None, None),
            CheckOutcome::Done(result) => (Some(result), None),
            CheckOutcome::Error(message) => (None, Some(message)),
        }
    }
}

/// Checker error that may be a timeout.
trait CheckError: std::fmt::Display {
    fn timed_out(&self) -> bool;
}

impl CheckError for ScanError {
    fn timed_out(&self) -> bool {
        self.is_timeout()
    }
}

impl CheckError for QualityError {
    fn timed_out(&self) -> bool {
        self.is_timeout()
    }
}

impl CheckError for RunnerError {
    fn timed_out(&self) -> bool {
        self.is_timeout()
    }
}

/// Runs the configured checks against a code directory.
pub struct Validator {
    config: ValidationConfig,
    scanner: SecurityScanner,
    quality: QualityChecker,
    tests: TestRunner,
    permits: Semaphore,
}

impl Validator {
    pub fn new(config: ValidationConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            scanner: SecurityScanner::from_config(runner.clone(), &config),
            quality: QualityChecker::from_config(runner.clone(), &config),
            tests: TestRunner::from_config(runner, &config),
            permits: Semaphore::new(config.max_concurrent_checks.max(1)),
            config,
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Run every enabled check against `path` and aggregate the verdict.
    pub async fn validate(&self, path: &Path) -> ValidationResult {
        let start = Instant::now();

        let (security, quality, tests) = tokio::join!(
            self.bounded(
                "security",
                !self.config.skip_security,
                self.scanner.scan(path),
                |msg, elapsed| ScanResult::incomplete(msg, elapsed),
            ),
            self.bounded(
                "quality",
                !self.config.skip_quality,
                self.quality.check(path),
                |msg, elapsed| QualityResult::incomplete(msg, elapsed),
            ),
            self.bounded(
                "tests",
                !self.config.skip_tests,
                self.tests.run(path),
                |msg, elapsed| TestResult::incomplete(msg, elapsed),
            ),
        );

        let (security, security_err) = security.into_parts();
        let (quality, quality_err) = quality.into_parts();
        let (tests, tests_err) = tests.into_parts();

        let error_message = security_err.or(quality_err).or(tests_err);
        let status = if error_message.is_some() {
            ValidationStatus::Error
        } else {
            let all_passed = security.as_ref().map_or(true, |r| r.passed)
                && quality.as_ref().map_or(true, |r| r.passed)
                && tests.as_ref().map_or(true, |r| r.passed);
            if all_passed {
                ValidationStatus::Passed
            } else {
                ValidationStatus::Failed
            }
        };

        let total_duration_seconds = start.elapsed().as_secs_f64();
        obs::emit_validation_finished(status.as_str(), total_duration_seconds);

        ValidationResult {
            status,
            security,
            quality,
            tests,
            error_message,
            total_duration_seconds,
        }
    }

    pub async fn validate_security_only(&self, path: &Path) -> Result<ScanResult, ScanError> {
        self.scanner.scan(path).await
    }

    pub async fn validate_quality_only(&self, path: &Path) -> Result<QualityResult, QualityError> {
        self.quality.check(path).await
    }

    pub async fn validate_tests_only(&self, path: &Path) -> Result<TestResult, RunnerError> {
        self.tests.run(path).await
    }

    /// Run one check while holding a permit. Timeouts map to a non-passing
    /// result built by `on_timeout`.
    async fn bounded<T, E, F, G>(
        &self,
        check: &'static str,
        enabled: bool,
        fut: F,
        on_timeout: G,
    ) -> CheckOutcome<T>
    where
        F: Future<Output = Result<T, E>>,
        G: FnOnce(String, Duration) -> T,
        E: CheckError,
        T: Passing,
    {
        if !enabled {
            return CheckOutcome::Skipped;
        }
        // The semaphore is never closed, so acquire only fails in theory;
        // the check then runs unbounded.
        let _permit = self.permits.acquire().await;
        let start = Instant::now();

        match fut.await {
            Ok(result) => {
                obs::emit_check_finished(check, result.passed(), start.elapsed().as_secs_f64());
                CheckOutcome::Done(result)
            }
            Err(e) if e.timed_out() => {
                obs::emit_check_error(check, &e);
                CheckOutcome::Done(on_timeout(e.to_string(), start.elapsed()))
            }
            Err(e) => {
                obs::emit_check_error(check, &e);
                CheckOutcome::Error(e.to_string())
            }
        }
    }
}

/// Sub-result with a pass flag.
trait Passing {
    fn passed(&self) -> bool;
}

impl Passing for ScanResult {
    fn passed(&self) -> bool {
        self.passed
    }
}

impl Passing for QualityResult {
    fn passed(&self) -> bool {
        self.passed
    }
}

impl Passing for TestResult {
    fn passed(&self) -> bool {
        self.passed
    }
}
