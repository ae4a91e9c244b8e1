//! Findings, severities and test cases shared by the checkers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Finding severity, ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parse a severity reported by an external tool. Case-insensitive;
    /// anything unrecognised is treated as `Medium`.
    pub fn from_tool(s: &str) -> Severity {
        s.trim().parse().unwrap_or(Severity::Medium)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!(
                "unknown severity '{other}' (expected low, medium, high or critical)"
            )),
        }
    }
}

/// A security issue reported by the security tool or the secret scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIssue {
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub file_path: Option<String>,
    pub line: Option<u32>,
}

/// Kind of quality issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    Lint,
    Type,
    Style,
}

/// A quality issue reported by the linter or type checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub category: IssueCategory,
    /// Rule code, e.g. `E501` or `mypy-error`.
    pub code: String,
    pub message: String,
    pub file_path: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// A single reported issue, from either the security or the quality check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    Security(SecurityIssue),
    Quality(QualityIssue),
}

impl Finding {
    pub fn message(&self) -> &str {
        match self {
            Finding::Security(issue) => &issue.title,
            Finding::Quality(issue) => &issue.message,
        }
    }

    /// `path:line` when known.
    pub fn location(&self) -> Option<String> {
        let (path, line) = match self {
            Finding::Security(issue) => (issue.file_path.as_deref(), issue.line),
            Finding::Quality(issue) => (issue.file_path.as_deref(), issue.line),
        };
        match (path, line) {
            (Some(p), Some(l)) => Some(format!("{p}:{l}")),
            (Some(p), None) => Some(p.to_string()),
            _ => None,
        }
    }
}

impl From<SecurityIssue> for Finding {
    fn from(issue: SecurityIssue) -> Self {
        Finding::Security(issue)
    }
}

impl From<QualityIssue> for Finding {
    fn from(issue: QualityIssue) -> Self {
        Finding::Quality(issue)
    }
}

/// Outcome of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl TestStatus {
    /// Parse the upper-case status word printed by the test tool.
    pub fn from_tool(s: &str) -> Option<TestStatus> {
        match s {
            "PASSED" => Some(TestStatus::Passed),
            "FAILED" => Some(TestStatus::Failed),
            "SKIPPED" => Some(TestStatus::Skipped),
            "ERROR" => Some(TestStatus::Error),
            _ => None,
        }
    }
}

/// A single test case result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Node id, e.g. `tests/test_agent.py::test_reply`.
    pub name: String,
    pub status: TestStatus,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
    pub file_path: Option<String>,
}
