//! Test discovery, execution and output parsing.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::ValidationConfig;
use crate::model::{TestCase, TestStatus};
use crate::process::{Invocation, ProcessError, ProcessRunner, ToolOutcome};

/// Extension of files considered for test discovery.
const TEST_FILE_EXTENSION: &str = "py";

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Path does not exist: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Tests timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("test tool failed: {0}")]
    Process(#[source] ProcessError),

    #[error("test discovery aborted: {0}")]
    Task(String),
}

impl RunnerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunnerError::Timeout(_))
    }
}

/// Result of running the test suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    pub total: u32,
    pub passed_count: u32,
    pub failed_count: u32,
    pub skipped_count: u32,
    pub error_count: u32,
    pub coverage_percent: Option<f64>,
    pub cases: Vec<TestCase>,
    pub duration_seconds: f64,
    /// Explanation when the suite did not run normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Captured tool output (stdout then stderr).
    #[serde(default)]
    pub output: String,
}

impl TestResult {
    fn empty(passed: bool, message: impl Into<String>) -> Self {
        Self {
            passed,
            total: 0,
            passed_count: 0,
            failed_count: 0,
            skipped_count: 0,
            error_count: 0,
            coverage_percent: None,
            cases: Vec::new(),
            duration_seconds: 0.0,
            message: Some(message.into()),
            output: String::new(),
        }
    }

    /// A non-passing result for a run that was cut short.
    pub fn incomplete(message: impl Into<String>, duration: Duration) -> Self {
        let mut result = Self::empty(false, message);
        result.duration_seconds = duration.as_secs_f64();
        result
    }

    /// Percentage of tests that passed; 0 when nothing ran.
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.passed_count) / f64::from(self.total) * 100.0
    }
}

pub struct TestRunner {
    runner: Arc<dyn ProcessRunner>,
    program: String,
    require_tests: bool,
    min_coverage: Option<f64>,
    timeout: Duration,
}

impl TestRunner {
    pub fn from_config(runner: Arc<dyn ProcessRunner>, config: &ValidationConfig) -> Self {
        Self {
            runner,
            program: config.tools.test.clone(),
            require_tests: config.require_tests,
            min_coverage: config.min_coverage,
            timeout: config.test_timeout(),
        }
    }

    pub async fn run(&self, path: &Path) -> Result<TestResult, RunnerError> {
        let start = Instant::now();

        if !path.exists() {
            return Err(RunnerError::PathNotFound(path.to_path_buf()));
        }

        let root = path.to_path_buf();
        let test_files = tokio::task::spawn_blocking(move || discover_tests(&root))
            .await
            .map_err(|e| RunnerError::Task(e.to_string()))?;
        debug!(count = test_files.len(), "discovered test files");

        let mut result = if test_files.is_empty() {
            if self.require_tests {
                TestResult::empty(false, "No test files found")
            } else {
                TestResult::empty(true, "No tests to run")
            }
        } else {
            self.run_tool(path).await?
        };

        if let (Some(min), Some(measured)) = (self.min_coverage, result.coverage_percent) {
            if measured < min {
                debug!(measured, min, "coverage below minimum");
                result.passed = false;
                result.message = Some(format!(
                    "Coverage {measured:.1}% is below the required {min:.1}%"
                ));
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        Ok(result)
    }

    async fn run_tool(&self, path: &Path) -> Result<TestResult, RunnerError> {
        let path_arg = path.to_string_lossy().to_string();
        let mut invocation = Invocation::new(&self.program, self.timeout)
            .arg(&path_arg)
            .args(["-v", "--tb=short", "-q"]);
        if self.min_coverage.is_some() {
            invocation = invocation.args([
                format!("--cov={path_arg}"),
                "--cov-report=term-missing".to_string(),
            ]);
        }
        let cwd = if path.is_file() {
            path.parent().map(Path::to_path_buf)
        } else {
            Some(path.to_path_buf())
        };
        if let Some(cwd) = cwd.filter(|p| !p.as_os_str().is_empty()) {
            invocation = invocation.current_dir(cwd);
        }

        match self.runner.run(&invocation).await {
            Ok(ToolOutcome::Completed(output)) => Ok(parse_test_output(
                &output.stdout,
                &output.stderr,
                output.exit_code,
            )),
            Ok(ToolOutcome::Missing { program }) => {
                Ok(TestResult::empty(false, format!("{program} not available")))
            }
            Err(e) if e.is_timeout() => Err(RunnerError::Timeout(self.timeout)),
            Err(e) => Err(RunnerError::Process(e)),
        }
    }
}

fn is_test_file_name(path: &Path) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some(TEST_FILE_EXTENSION) {
        return false;
    }
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    stem.starts_with("test_") || stem.ends_with("_test")
}

fn under_tests_dir(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|first| first == Component::Normal("tests".as_ref()))
        .unwrap_or(false)
}

/// Test files under `root`. A single file is returned when its own name
/// marks it as a test.
pub fn discover_tests(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return if is_test_file_name(root) {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        };
    }

    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            is_test_file_name(p)
                || (under_tests_dir(root, p)
                    && p.extension().and_then(|e| e.to_str()) == Some(TEST_FILE_EXTENSION))
        })
        .collect()
}

fn case_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\S+::\S+)\s+(PASSED|FAILED|SKIPPED|ERROR)").expect("valid case pattern")
    })
}

fn summary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d+) (passed|failed|skipped|errors?)\b").expect("valid summary pattern")
    })
}

fn coverage_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^TOTAL\b.*?(\d+(?:\.\d+)?)%\s*$").expect("valid coverage pattern")
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    passed: u32,
    failed: u32,
    skipped: u32,
    errors: u32,
}

/// Counts from the last summary line, e.g. `2 passed, 1 failed in 0.1s`.
fn parse_summary(output: &str) -> Option<Counts> {
    let line = output
        .lines()
        .rev()
        .find(|line| summary_pattern().is_match(line))?;

    let mut counts = Counts::default();
    for caps in summary_pattern().captures_iter(line) {
        let n: u32 = caps[1].parse().unwrap_or(0);
        match &caps[2] {
            "passed" => counts.passed += n,
            "failed" => counts.failed += n,
            "skipped" => counts.skipped += n,
            _ => counts.errors += n,
        }
    }
    Some(counts)
}

/// Parse the test tool's output into a [`TestResult`]. The summary line
/// takes precedence over per-case counts.
pub fn parse_test_output(stdout: &str, stderr: &str, exit_code: i32) -> TestResult {
    let output = format!("{stdout}\n{stderr}");

    let mut cases = Vec::new();
    let mut counts = Counts::default();
    for caps in case_pattern().captures_iter(&output) {
        let Some(status) = TestStatus::from_tool(&caps[2]) else {
            continue;
        };
        match status {
            TestStatus::Passed => counts.passed += 1,
            TestStatus::Failed => counts.failed += 1,
            TestStatus::Skipped => counts.skipped += 1,
            TestStatus::Error => counts.errors += 1,
        }
        let name = caps[1].to_string();
        let file_path = name.split("::").next().map(str::to_string);
        cases.push(TestCase {
            name,
            status,
            duration_seconds: 0.0,
            error_message: None,
            file_path,
        });
    }

    if let Some(summary) = parse_summary(&output) {
        counts = summary;
    }

    let coverage_percent = coverage_pattern()
        .captures_iter(&output)
        .last()
        .and_then(|caps| caps[1].parse().ok());

    TestResult {
        passed: exit_code == 0 && counts.failed == 0 && counts.errors == 0,
        total: counts.passed + counts.failed + counts.skipped + counts.errors,
        passed_count: counts.passed,
        failed_count: counts.failed,
        skipped_count: counts.skipped,
        error_count: counts.errors,
        coverage_percent,
        cases,
        duration_seconds: 0.0,
        message: None,
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedRunner;

    fn runner_with(script: ScriptedRunner, config: &ValidationConfig) -> TestRunner {
        TestRunner::from_config(Arc::new(script), config)
    }

    fn write(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "def test_ok():\n    assert True\n").unwrap();
    }

    #[test]
    fn test_summary_counts() {
        let result = parse_test_output("2 passed, 1 failed in 0.1s", "", 1);
        assert_eq!(result.passed_count, 2);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.total, 3);
        assert!(!result.passed);
    }

    #[test]
    fn test_summary_order_independent() {
        let result = parse_test_output("==== 1 failed, 4 passed, 2 skipped, 1 error in 2.3s ====", "", 1);
        assert_eq!(result.passed_count, 4);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.skipped_count, 2);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.total, 8);
    }

    #[test]
    fn test_summary_overrides_case_counts() {
        let stdout = "tests/test_a.py::test_one PASSED\n3 passed in 0.2s\n";
        let result = parse_test_output(stdout, "", 0);
        assert_eq!(result.cases.len(), 1);
        assert_eq!(result.passed_count, 3);
        assert!(result.passed);
        assert_eq!(result.pass_rate(), 100.0);
    }

    #[test]
    fn test_case_lines_without_summary() {
        let stdout = "tests/test_a.py::test_one PASSED\ntests/test_a.py::test_two ERROR\n";
        let result = parse_test_output(stdout, "", 1);
        assert_eq!(result.passed_count, 1);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.cases[1].status, TestStatus::Error);
        assert_eq!(result.cases[0].file_path.as_deref(), Some("tests/test_a.py"));
        assert!(!result.passed);
    }

    #[test]
    fn test_passed_false_on_failures_even_with_zero_exit() {
        assert!(!parse_test_output("1 passed, 1 failed", "", 0).passed);
        assert!(!parse_test_output("1 passed, 2 errors", "", 0).passed);
        assert!(!parse_test_output("3 passed", "", 1).passed);
    }

    #[test]
    fn test_coverage_parsed() {
        let stdout = "Name    Stmts   Miss  Cover\nagent.py   20   2   90%\nTOTAL   20   2   90%\n1 passed in 0.1s\n";
        let result = parse_test_output(stdout, "", 0);
        assert_eq!(result.coverage_percent, Some(90.0));
    }

    #[test]
    fn test_pass_rate_zero_when_empty() {
        assert_eq!(TestResult::empty(true, "none").pass_rate(), 0.0);
    }

    #[test]
    fn test_discovery() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "agent.py");
        write(dir.path(), "pkg/test_agent.py");
        write(dir.path(), "pkg/agent_test.py");
        write(dir.path(), "tests/helpers.py");
        write(dir.path(), "tests/fixtures/data.json");
        write(dir.path(), "docs/test_notes.txt");

        let found: Vec<String> = discover_tests(dir.path())
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            found,
            vec!["pkg/agent_test.py", "pkg/test_agent.py", "tests/helpers.py"]
        );
    }

    #[test]
    fn test_discovery_single_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "test_agent.py");
        write(dir.path(), "agent.py");
        assert_eq!(discover_tests(&dir.path().join("test_agent.py")).len(), 1);
        assert!(discover_tests(&dir.path().join("agent.py")).is_empty());
    }

    #[tokio::test]
    async fn test_no_tests_not_required_passes() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner_with(ScriptedRunner::new(), &ValidationConfig::default())
            .run(dir.path())
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.total, 0);
    }

    #[tokio::test]
    async fn test_no_tests_required_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = ValidationConfig {
            require_tests: true,
            ..Default::default()
        };
        let result = runner_with(ScriptedRunner::new(), &config)
            .run(dir.path())
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.message.as_deref(), Some("No test files found"));
    }

    #[tokio::test]
    async fn test_missing_tool_fails_with_message() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "test_agent.py");
        let result = runner_with(ScriptedRunner::new(), &ValidationConfig::default())
            .run(dir.path())
            .await
            .unwrap();
        assert!(!result.passed);
        assert_eq!(result.message.as_deref(), Some("pytest not available"));
    }

    #[tokio::test]
    async fn test_invocation_and_coverage_threshold() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "test_agent.py");
        let config = ValidationConfig {
            min_coverage: Some(80.0),
            ..Default::default()
        };
        let script = Arc::new(ScriptedRunner::new().with_output(
            "pytest",
            0,
            "test_agent.py::test_ok PASSED\nTOTAL   10   5   50%\n1 passed in 0.1s\n",
        ));
        let runner = TestRunner::from_config(script.clone(), &config);

        let result = runner.run(dir.path()).await.unwrap();
        assert!(!result.passed, "50% coverage is below 80%");
        assert_eq!(result.coverage_percent, Some(50.0));

        let calls = script.calls_to("pytest");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].cwd.as_deref(), Some(dir.path()));
        assert!(calls[0].args.contains(&"--tb=short".to_string()));
        assert!(calls[0].args.iter().any(|a| a.starts_with("--cov=")));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "test_agent.py");
        let config = ValidationConfig {
            test_timeout_secs: 0,
            ..Default::default()
        };
        let script = ScriptedRunner::new().with_delayed_output(
            "pytest",
            Duration::from_millis(50),
            0,
            "",
        );
        let err = runner_with(script, &config).run(dir.path()).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_process_error_keeps_source() {
        let err = RunnerError::Process(ProcessError::Spawn {
            program: "pytest".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("failed to spawn pytest"));
    }
}
