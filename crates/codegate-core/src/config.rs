//! Validation pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::Severity;

/// Executable names of the external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCommands {
    /// Security analyzer emitting `{"results": [...]}` JSON.
    pub security: String,

    /// Linter emitting a JSON array of findings.
    pub lint: String,

    /// Type checker emitting `path:line: severity: message` lines.
    pub type_check: String,

    /// Test tool emitting `path::name STATUS` lines and a summary.
    pub test: String,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            security: "bandit".to_string(),
            lint: "ruff".to_string(),
            type_check: "mypy".to_string(),
            test: "pytest".to_string(),
        }
    }
}

/// Configuration for one validation run. Immutable once handed to a
/// [`Validator`](crate::Validator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    // Security settings
    /// Minimum finding severity that fails the security scan.
    pub security_severity_threshold: Severity,
    pub security_timeout_secs: u64,

    // Quality settings
    /// Lint findings above this count fail the quality check.
    pub max_lint_issues: usize,
    pub require_type_hints: bool,
    pub quality_timeout_secs: u64,

    // Test settings
    pub require_tests: bool,
    /// Minimum coverage percentage; `None` disables coverage measurement.
    pub min_coverage: Option<f64>,
    pub test_timeout_secs: u64,

    // Pipeline settings
    pub skip_security: bool,
    pub skip_quality: bool,
    pub skip_tests: bool,
    /// Checks allowed to run at the same time within one validation.
    pub max_concurrent_checks: usize,

    pub tools: ToolCommands,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            security_severity_threshold: Severity::Medium,
            security_timeout_secs: 300,
            max_lint_issues: 10,
            require_type_hints: false,
            quality_timeout_secs: 300,
            require_tests: false,
            min_coverage: None,
            test_timeout_secs: 600,
            skip_security: false,
            skip_quality: false,
            skip_tests: false,
            max_concurrent_checks: 3,
            tools: ToolCommands::default(),
        }
    }
}

impl ValidationConfig {
    /// Parse a (possibly partial) JSON document; missing fields take defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn security_timeout(&self) -> Duration {
        Duration::from_secs(self.security_timeout_secs)
    }

    pub fn quality_timeout(&self) -> Duration {
        Duration::from_secs(self.quality_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    /// Disable every check.
    pub fn skip_all(mut self) -> Self {
        self.skip_security = true;
        self.skip_quality = true;
        self.skip_tests = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ValidationConfig::default();
        assert_eq!(config.security_severity_threshold, Severity::Medium);
        assert_eq!(config.security_timeout(), Duration::from_secs(300));
        assert_eq!(config.max_lint_issues, 10);
        assert_eq!(config.test_timeout(), Duration::from_secs(600));
        assert!(!config.require_tests);
        assert!(config.min_coverage.is_none());
        assert_eq!(config.max_concurrent_checks, 3);
        assert_eq!(config.tools.test, "pytest");
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = ValidationConfig::from_json(
            r#"{"security_severity_threshold": "high", "skip_tests": true, "tools": {"lint": "flake8-json"}}"#,
        )
        .unwrap();
        assert_eq!(config.security_severity_threshold, Severity::High);
        assert!(config.skip_tests);
        assert_eq!(config.tools.lint, "flake8-json");
        assert_eq!(config.tools.security, "bandit");
        assert_eq!(config.max_lint_issues, 10);
    }

    #[test]
    fn test_skip_all() {
        let config = ValidationConfig::default().skip_all();
        assert!(config.skip_security && config.skip_quality && config.skip_tests);
    }
}
