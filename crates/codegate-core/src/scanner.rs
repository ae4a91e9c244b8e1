//! Security scanning: external analyzer plus a hardcoded-secret text scan.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ValidationConfig;
use crate::model::{SecurityIssue, Severity};
use crate::process::{Invocation, ProcessError, ProcessRunner, ToolOutcome};

/// Files larger than this are not searched for secrets.
const MAX_SECRET_SCAN_BYTES: u64 = 1024 * 1024;

/// Errors that abort a security scan.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Path does not exist: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Security scan timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("security tool failed: {0}")]
    Process(#[source] ProcessError),

    #[error("secret scan aborted: {0}")]
    Task(String),
}

impl ScanError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScanError::Timeout(_))
    }
}

/// Result of a security scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// No issue at or above the configured severity threshold.
    pub passed: bool,
    pub issues: Vec<SecurityIssue>,
    pub scanner_version: String,
    pub duration_seconds: f64,
    /// Why the scan could not complete (e.g. timeout), if it didn't.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanResult {
    /// A non-passing result for a scan that was cut short.
    pub fn incomplete(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            passed: false,
            issues: Vec::new(),
            scanner_version: scanner_version(),
            duration_seconds: duration.as_secs_f64(),
            error: Some(message.into()),
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn critical_count(&self) -> usize {
        self.count(Severity::Critical)
    }

    pub fn high_count(&self) -> usize {
        self.count(Severity::High)
    }

    pub fn medium_count(&self) -> usize {
        self.count(Severity::Medium)
    }

    pub fn low_count(&self) -> usize {
        self.count(Severity::Low)
    }
}

/// Whether a set of issues passes: no issue at or above `threshold`.
pub fn passes_threshold(issues: &[SecurityIssue], threshold: Severity) -> bool {
    !issues.iter().any(|i| i.severity >= threshold)
}

fn scanner_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Security scanner for uploaded agent code.
pub struct SecurityScanner {
    runner: Arc<dyn ProcessRunner>,
    program: String,
    severity_threshold: Severity,
    timeout: Duration,
}

impl SecurityScanner {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        program: impl Into<String>,
        severity_threshold: Severity,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            severity_threshold,
            timeout,
        }
    }

    pub fn from_config(runner: Arc<dyn ProcessRunner>, config: &ValidationConfig) -> Self {
        Self::new(
            runner,
            config.tools.security.clone(),
            config.security_severity_threshold,
            config.security_timeout(),
        )
    }

    /// Scan a directory or single file.
    pub async fn scan(&self, path: &Path) -> Result<ScanResult, ScanError> {
        let start = Instant::now();

        if !path.exists() {
            return Err(ScanError::PathNotFound(path.to_path_buf()));
        }

        let mut issues = self.run_tool(path).await?;

        let root = path.to_path_buf();
        let secret_issues = tokio::task::spawn_blocking(move || scan_secrets(&root))
            .await
            .map_err(|e| ScanError::Task(e.to_string()))?;
        issues.extend(secret_issues);

        let passed = passes_threshold(&issues, self.severity_threshold);
        debug!(
            issues = issues.len(),
            threshold = %self.severity_threshold,
            passed,
            "security scan finished"
        );

        Ok(ScanResult {
            passed,
            issues,
            scanner_version: scanner_version(),
            duration_seconds: start.elapsed().as_secs_f64(),
            error: None,
        })
    }

    async fn run_tool(&self, path: &Path) -> Result<Vec<SecurityIssue>, ScanError> {
        let invocation = Invocation::new(&self.program, self.timeout)
            .arg("-r")
            .arg(path.to_string_lossy())
            .args(["-f", "json", "-ll"]);

        match self.runner.run(&invocation).await {
            // The analyzer exits non-zero when it finds issues; only the
            // report matters.
            Ok(ToolOutcome::Completed(output)) => Ok(parse_security_report(&output.stdout)),
            Ok(ToolOutcome::Missing { program }) => {
                debug!(program = %program, "security tool not installed, skipping");
                Ok(Vec::new())
            }
            Err(e) if e.is_timeout() => Err(ScanError::Timeout(self.timeout)),
            Err(e) => Err(ScanError::Process(e)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolFinding {
    issue_severity: Option<String>,
    issue_text: Option<String>,
    more_info: Option<String>,
    filename: Option<String>,
    line_number: Option<u32>,
}

/// Parse the analyzer's JSON report. Malformed documents yield no issues;
/// malformed entries are skipped.
pub fn parse_security_report(stdout: &str) -> Vec<SecurityIssue> {
    if stdout.trim().is_empty() {
        return Vec::new();
    }
    let report: serde_json::Value = match serde_json::from_str(stdout) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "security tool output is not JSON, ignoring");
            return Vec::new();
        }
    };
    let Some(results) = report.get("results").and_then(|r| r.as_array()) else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|entry| serde_json::from_value::<ToolFinding>(entry.clone()).ok())
        .map(|f| SecurityIssue {
            severity: f
                .issue_severity
                .as_deref()
                .map(Severity::from_tool)
                .unwrap_or(Severity::Medium),
            title: f.issue_text.unwrap_or_else(|| "Unknown issue".to_string()),
            description: f.more_info.unwrap_or_default(),
            file_path: f.filename,
            line: f.line_number,
        })
        .collect()
}

fn secret_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                r#"(?i)(api[_-]?key|apikey)\s*[=:]\s*["'][^"']{10,}["']"#,
                "Potential API key",
            ),
            (
                r#"(?i)(secret[_-]?key|secretkey)\s*[=:]\s*["'][^"']{10,}["']"#,
                "Potential secret key",
            ),
            (
                r#"(?i)(password|passwd|pwd)\s*[=:]\s*["'][^"']{4,}["']"#,
                "Potential hardcoded password",
            ),
            (
                r#"(?i)(token)\s*[=:]\s*["'][^"']{10,}["']"#,
                "Potential hardcoded token",
            ),
            (r"(?i)(aws[_-]?access[_-]?key)", "Potential AWS access key"),
            (r"(?i)(private[_-]?key)", "Potential private key reference"),
        ]
        .into_iter()
        .map(|(pattern, title)| (Regex::new(pattern).expect("valid secret pattern"), title))
        .collect()
    })
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#') || trimmed.starts_with("//")
}

/// Scan one file's text. One issue per matching line; the first matching
/// pattern wins.
pub fn scan_text(content: &str, file_path: &str) -> Vec<SecurityIssue> {
    let mut issues = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if is_comment(line) {
            continue;
        }
        if let Some((pattern, title)) = secret_patterns().iter().find(|(re, _)| re.is_match(line))
        {
            issues.push(SecurityIssue {
                severity: Severity::High,
                title: title.to_string(),
                description: format!(
                    "Found pattern matching potential secret: {}",
                    pattern.as_str()
                ),
                file_path: Some(file_path.to_string()),
                line: Some(idx as u32 + 1),
            });
        }
    }
    issues
}

/// Scan every readable text file under `root` (or `root` itself).
fn scan_secrets(root: &Path) -> Vec<SecurityIssue> {
    let mut issues = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git");

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let too_large = entry
            .metadata()
            .map(|m| m.len() > MAX_SECRET_SCAN_BYTES)
            .unwrap_or(true);
        if too_large {
            continue;
        }
        // Binary or unreadable files are skipped.
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        issues.extend(scan_text(&content, &entry.path().to_string_lossy()));
    }
    issues
}
