//! Code quality checking: linter findings and an optional type check.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ValidationConfig;
use crate::model::{IssueCategory, QualityIssue};
use crate::process::{Invocation, ProcessError, ProcessRunner, ToolOutcome};

/// Points deducted from the lint score per lint finding.
const LINT_PENALTY: f64 = 5.0;

#[derive(Debug, thiserror::Error)]
pub enum QualityError {
    #[error("Path does not exist: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("{check} timed out after {}s", .timeout.as_secs())]
    Timeout {
        check: &'static str,
        timeout: Duration,
    },

    #[error("quality tool failed: {0}")]
    Process(#[source] ProcessError),
}

impl QualityError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, QualityError::Timeout { .. })
    }
}

/// Result of quality checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityResult {
    pub passed: bool,
    pub issues: Vec<QualityIssue>,
    /// 100 is clean; each lint finding costs five points, floored at 0.
    pub lint_score: f64,
    pub type_check_passed: bool,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QualityResult {
    /// A non-passing result for a check that was cut short.
    pub fn incomplete(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            passed: false,
            issues: Vec::new(),
            lint_score: 0.0,
            type_check_passed: false,
            duration_seconds: duration.as_secs_f64(),
            error: Some(message.into()),
        }
    }

    fn by_category(&self, category: IssueCategory) -> Vec<&QualityIssue> {
        self.issues
            .iter()
            .filter(|i| i.category == category)
            .collect()
    }

    pub fn lint_issues(&self) -> Vec<&QualityIssue> {
        self.by_category(IssueCategory::Lint)
    }

    pub fn type_issues(&self) -> Vec<&QualityIssue> {
        self.by_category(IssueCategory::Type)
    }

    pub fn style_issues(&self) -> Vec<&QualityIssue> {
        self.by_category(IssueCategory::Style)
    }
}

pub fn lint_score(lint_count: usize) -> f64 {
    (100.0 - lint_count as f64 * LINT_PENALTY).clamp(0.0, 100.0)
}

/// Quality checker for uploaded agent code.
pub struct QualityChecker {
    runner: Arc<dyn ProcessRunner>,
    lint_program: String,
    type_program: String,
    max_lint_issues: usize,
    require_type_hints: bool,
    timeout: Duration,
}

impl QualityChecker {
    pub fn from_config(runner: Arc<dyn ProcessRunner>, config: &ValidationConfig) -> Self {
        Self {
            runner,
            lint_program: config.tools.lint.clone(),
            type_program: config.tools.type_check.clone(),
            max_lint_issues: config.max_lint_issues,
            require_type_hints: config.require_type_hints,
            timeout: config.quality_timeout(),
        }
    }

    pub async fn check(&self, path: &Path) -> Result<QualityResult, QualityError> {
        let start = Instant::now();

        if !path.exists() {
            return Err(QualityError::PathNotFound(path.to_path_buf()));
        }

        let mut issues = self.run_linter(path).await?;
        let lint_count = issues.len();

        let mut type_check_passed = true;
        if self.require_type_hints {
            let (type_issues, ok) = self.run_type_checker(path).await?;
            issues.extend(type_issues);
            type_check_passed = ok;
        }

        let passed = lint_count <= self.max_lint_issues
            && (!self.require_type_hints || type_check_passed);
        debug!(lint_count, type_check_passed, passed, "quality check finished");

        Ok(QualityResult {
            passed,
            issues,
            lint_score: lint_score(lint_count),
            type_check_passed,
            duration_seconds: start.elapsed().as_secs_f64(),
            error: None,
        })
    }

    async fn run_linter(&self, path: &Path) -> Result<Vec<QualityIssue>, QualityError> {
        let invocation = Invocation::new(&self.lint_program, self.timeout)
            .arg("check")
            .arg(path.to_string_lossy())
            .args(["--output-format", "json"]);

        match self.runner.run(&invocation).await {
            Ok(ToolOutcome::Completed(output)) => Ok(parse_lint_report(&output.stdout)),
            Ok(ToolOutcome::Missing { .. }) => Ok(Vec::new()),
            Err(e) if e.is_timeout() => Err(QualityError::Timeout {
                check: "Lint check",
                timeout: self.timeout,
            }),
            Err(e) => Err(QualityError::Process(e)),
        }
    }

    async fn run_type_checker(
        &self,
        path: &Path,
    ) -> Result<(Vec<QualityIssue>, bool), QualityError> {
        let invocation = Invocation::new(&self.type_program, self.timeout)
            .arg(path.to_string_lossy())
            .args(["--ignore-missing-imports", "--no-error-summary"]);

        match self.runner.run(&invocation).await {
            Ok(ToolOutcome::Completed(output)) => {
                let (issues, no_errors) = parse_type_report(&output.stdout);
                Ok((issues, no_errors && output.success()))
            }
            Ok(ToolOutcome::Missing { .. }) => Ok((Vec::new(), true)),
            Err(e) if e.is_timeout() => Err(QualityError::Timeout {
                check: "Type check",
                timeout: self.timeout,
            }),
            Err(e) => Err(QualityError::Process(e)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LintLocation {
    row: Option<u32>,
    column: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct LintFinding {
    code: Option<String>,
    message: Option<String>,
    filename: Option<String>,
    #[serde(default)]
    location: Option<LintLocation>,
}

/// Parse the linter's JSON array. Malformed output yields no findings.
pub fn parse_lint_report(stdout: &str) -> Vec<QualityIssue> {
    if stdout.trim().is_empty() {
        return Vec::new();
    }
    let findings: Vec<serde_json::Value> = match serde_json::from_str(stdout) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "lint output is not a JSON array, ignoring");
            return Vec::new();
        }
    };

    findings
        .into_iter()
        .filter_map(|v| serde_json::from_value::<LintFinding>(v).ok())
        .map(|f| {
            let location = f.location.unwrap_or_default();
            QualityIssue {
                category: IssueCategory::Lint,
                code: f.code.unwrap_or_else(|| "unknown".to_string()),
                message: f.message.unwrap_or_else(|| "Unknown issue".to_string()),
                file_path: f.filename,
                line: location.row,
                column: location.column,
            }
        })
        .collect()
}

fn type_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.+):(\d+): (\w+): (.+)$").expect("valid type checker pattern")
    })
}

/// Parse `path:line: severity: message` lines. The flag is false when any
/// line has severity `error`.
pub fn parse_type_report(stdout: &str) -> (Vec<QualityIssue>, bool) {
    let mut passed = true;
    let mut issues = Vec::new();

    for line in stdout.lines() {
        let Some(caps) = type_line_pattern().captures(line) else {
            continue;
        };
        let severity = &caps[3];
        if severity == "error" {
            passed = false;
        }
        issues.push(QualityIssue {
            category: IssueCategory::Type,
            code: format!("mypy-{severity}"),
            message: caps[4].to_string(),
            file_path: Some(caps[1].to_string()),
            line: caps[2].parse().ok(),
            column: None,
        });
    }

    (issues, passed)
}
