//! Integration tests for the validation pipeline with a scripted process runner.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use codegate_core::fakes::ScriptedRunner;
use codegate_core::{
    Finding, Severity, TokioProcessRunner, ToolCommands, ValidationConfig, ValidationStatus,
    Validator,
};

const LONG_LINE_REPORT: &str = r#"[{"code": "E501", "message": "Line too long (150 > 88)", "filename": "agent.py", "location": {"row": 1, "column": 89}}]"#;

fn write(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// Test: nothing enabled means nothing can fail
#[tokio::test]
async fn test_all_checks_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let validator = Validator::new(ValidationConfig::default().skip_all(), runner.clone());

    let result = validator.validate(dir.path()).await;

    assert_eq!(result.status, ValidationStatus::Passed);
    assert!(result.security.is_none());
    assert!(result.quality.is_none());
    assert!(result.tests.is_none());
    assert!(result.total_duration_seconds >= 0.0);
    assert!(runner.calls().is_empty(), "no tool should be invoked");
}

/// Test: empty directory with clean tools passes every check
#[tokio::test]
async fn test_empty_directory_passes() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new()
        .with_output("bandit", 0, r#"{"results": []}"#)
        .with_output("ruff", 0, "[]");
    let validator = Validator::new(ValidationConfig::default(), Arc::new(runner));

    let result = validator.validate(dir.path()).await;

    assert_eq!(result.status, ValidationStatus::Passed);
    assert!(result.security.as_ref().unwrap().passed);
    assert!(result.quality.as_ref().unwrap().passed);
    let tests = result.tests.as_ref().unwrap();
    assert!(tests.passed);
    assert_eq!(tests.total, 0);

    let record = result.to_record();
    assert!(record.passed);
    assert!(record.details.security && record.details.quality && record.details.tests);
}

/// Test: one long line is a single lint finding and still passes
#[tokio::test]
async fn test_single_lint_finding_within_budget() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "agent.py", &format!("x = '{}'\n", "a".repeat(144)));
    let runner = ScriptedRunner::new().with_output("ruff", 1, LONG_LINE_REPORT);
    let config = ValidationConfig {
        skip_security: true,
        skip_tests: true,
        ..Default::default()
    };

    let result = Validator::new(config, Arc::new(runner)).validate(dir.path()).await;

    let quality = result.quality.as_ref().unwrap();
    assert_eq!(quality.issues.len(), 1);
    assert_eq!(quality.lint_score, 95.0);
    assert!(quality.passed);
    assert_eq!(result.status, ValidationStatus::Passed);
    assert!(matches!(result.findings()[0], Finding::Quality(_)));
}

/// Test: hardcoded API key fails the default medium threshold
#[tokio::test]
async fn test_hardcoded_api_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "agent.py",
        "import os\n\nAPI_KEY = \"sk-abcdefghijklmnopqrstuvwxyz\"\n",
    );
    let config = ValidationConfig {
        skip_quality: true,
        skip_tests: true,
        ..Default::default()
    };

    let result = Validator::new(config, Arc::new(ScriptedRunner::new()))
        .validate(dir.path())
        .await;

    let security = result.security.as_ref().unwrap();
    assert!(security.high_count() >= 1);
    assert!(security
        .issues
        .iter()
        .any(|i| i.severity == Severity::High && i.line == Some(3)));
    assert!(!security.passed);
    assert_eq!(result.status, ValidationStatus::Failed);
    assert_eq!(result.to_record().security.unwrap().high_count, security.high_count());
}

/// Test: summary line drives the test counts
#[tokio::test]
async fn test_failing_test_summary() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tests/test_agent.py", "def test_a():\n    assert False\n");
    let runner = ScriptedRunner::new().with_output("pytest", 1, "2 passed, 1 failed in 0.1s\n");
    let config = ValidationConfig {
        skip_security: true,
        skip_quality: true,
        ..Default::default()
    };

    let result = Validator::new(config, Arc::new(runner)).validate(dir.path()).await;

    let tests = result.tests.as_ref().unwrap();
    assert_eq!(tests.passed_count, 2);
    assert_eq!(tests.failed_count, 1);
    assert_eq!(tests.total, 3);
    assert!(!tests.passed);
    assert_eq!(result.status, ValidationStatus::Failed);

    let record = result.to_record().tests.unwrap();
    assert_eq!(record.total, 3);
    assert_eq!(record.failed_count, 1);
}

/// Test: validating the same directory twice gives the same verdict
#[tokio::test]
async fn test_validate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "agent.py", "PASSWORD = \"hunter22\"\n");
    let runner = ScriptedRunner::new().with_output("ruff", 0, "[]");
    let validator = Validator::new(ValidationConfig::default(), Arc::new(runner));

    let first = validator.validate(dir.path()).await;
    let second = validator.validate(dir.path()).await;

    assert_eq!(first.status, second.status);
    assert_eq!(first.passed(), second.passed());
    assert_eq!(first.details(), second.details());
}

/// Test: a check timing out fails the run instead of erroring it
#[tokio::test]
async fn test_check_timeout_is_failed_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new()
        .with_output("bandit", 0, r#"{"results": []}"#)
        .with_delayed_output("ruff", Duration::from_secs(60), 0, "[]");
    let config = ValidationConfig {
        quality_timeout_secs: 0,
        skip_tests: true,
        ..Default::default()
    };

    let result = Validator::new(config, Arc::new(runner)).validate(dir.path()).await;

    assert_eq!(result.status, ValidationStatus::Failed);
    assert!(result.error_message.is_none());
    let quality = result.quality.as_ref().unwrap();
    assert!(!quality.passed);
    assert!(quality.error.as_deref().unwrap().contains("timed out"));
    assert!(result.security.as_ref().unwrap().passed);
}

/// Test: a security scan timing out fails the run instead of erroring it
#[tokio::test]
async fn test_security_timeout_is_failed_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new()
        .with_delayed_output("bandit", Duration::from_secs(60), 0, r#"{"results": []}"#)
        .with_output("ruff", 0, "[]");
    let config = ValidationConfig {
        security_timeout_secs: 0,
        skip_tests: true,
        ..Default::default()
    };

    let result = Validator::new(config, Arc::new(runner)).validate(dir.path()).await;

    assert_eq!(result.status, ValidationStatus::Failed);
    assert!(result.error_message.is_none());
    let security = result.security.as_ref().unwrap();
    assert!(!security.passed);
    assert!(security.error.as_deref().unwrap().contains("timed out"));
    assert!(result.quality.as_ref().unwrap().passed);
}

/// Test: a test suite timing out fails the run instead of erroring it
#[tokio::test]
async fn test_tests_timeout_is_failed_not_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tests/test_agent.py", "def test_a():\n    pass\n");
    let runner = ScriptedRunner::new()
        .with_output("bandit", 0, r#"{"results": []}"#)
        .with_output("ruff", 0, "[]")
        .with_delayed_output("pytest", Duration::from_secs(60), 0, "1 passed in 0.01s\n");
    let config = ValidationConfig {
        test_timeout_secs: 0,
        ..Default::default()
    };

    let result = Validator::new(config, Arc::new(runner)).validate(dir.path()).await;

    assert_eq!(result.status, ValidationStatus::Failed);
    assert!(result.error_message.is_none());
    let tests = result.tests.as_ref().unwrap();
    assert!(!tests.passed);
    assert!(tests.message.as_deref().unwrap().contains("timed out"));
    assert!(result.security.as_ref().unwrap().passed);
    assert!(result.quality.as_ref().unwrap().passed);
}

/// Test: an unexpected tool failure errors the run but keeps other results
#[tokio::test]
async fn test_unexpected_error_keeps_partial_results() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new()
        .with_output("bandit", 0, r#"{"results": []}"#)
        .with_spawn_error("ruff", "permission denied");
    let config = ValidationConfig {
        skip_tests: true,
        ..Default::default()
    };

    let result = Validator::new(config, Arc::new(runner)).validate(dir.path()).await;

    assert_eq!(result.status, ValidationStatus::Error);
    assert!(!result.passed());
    assert!(result
        .error_message
        .as_deref()
        .unwrap()
        .contains("permission denied"));
    assert!(result.security.is_some(), "completed check is preserved");
    assert!(result.quality.is_none());
}

/// Test: coverage below the minimum fails the tests check
#[tokio::test]
async fn test_coverage_threshold() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "test_agent.py", "def test_a():\n    pass\n");
    let runner = ScriptedRunner::new().with_output(
        "pytest",
        0,
        "test_agent.py::test_a PASSED\nTOTAL    40    20    50%\n1 passed in 0.05s\n",
    );
    let config = ValidationConfig {
        skip_security: true,
        skip_quality: true,
        min_coverage: Some(75.0),
        ..Default::default()
    };

    let result = Validator::new(config, Arc::new(runner)).validate(dir.path()).await;

    assert_eq!(result.status, ValidationStatus::Failed);
    let record = result.to_record().tests.unwrap();
    assert_eq!(record.coverage, Some(50.0));
    assert!(!record.passed);
}

/// Test: real process runner with tools that are not installed degrades cleanly
#[tokio::test]
async fn test_real_runner_with_missing_tools() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "agent.py", "print('hello')\n");
    let config = ValidationConfig {
        tools: ToolCommands {
            security: "codegate-missing-bandit".to_string(),
            lint: "codegate-missing-ruff".to_string(),
            type_check: "codegate-missing-mypy".to_string(),
            test: "codegate-missing-pytest".to_string(),
        },
        ..Default::default()
    };

    let result = Validator::new(config, Arc::new(TokioProcessRunner))
        .validate(dir.path())
        .await;

    assert_eq!(result.status, ValidationStatus::Passed);
    assert!(result.findings().is_empty());
}
