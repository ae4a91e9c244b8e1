//! codegate CLI - validate agent code from the command line
//!
//! ## Commands
//!
//! - `validate`: run every enabled check and print the validation record
//! - `security` / `quality` / `tests`: run a single check
//! - `job`: run one background validation job against a local artifact root

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use codegate_core::{
    Finding, JobConfig, JobRunner, RetryPolicy, Severity, TokioProcessRunner, ValidationConfig,
    ValidationJob, Validator,
};
use codegate_state::{FsArtifactStore, SurrealVersionStore};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "codegate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validate uploaded agent code: security, quality and tests", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that builds a `ValidationConfig`.
#[derive(Args, Debug, Clone, Default)]
struct ConfigArgs {
    /// JSON file with validation settings (missing fields take defaults)
    #[arg(long, env = "CODEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Minimum finding severity that fails the security scan
    #[arg(long, env = "CODEGATE_SEVERITY_THRESHOLD")]
    severity_threshold: Option<Severity>,

    /// Lint findings allowed before the quality check fails
    #[arg(long, env = "CODEGATE_MAX_LINT_ISSUES")]
    max_lint_issues: Option<usize>,

    /// Run the type checker and fail on type errors
    #[arg(long)]
    require_type_hints: bool,

    /// Fail when no test files are found
    #[arg(long)]
    require_tests: bool,

    /// Minimum coverage percentage
    #[arg(long, env = "CODEGATE_MIN_COVERAGE")]
    min_coverage: Option<f64>,

    #[arg(long)]
    skip_security: bool,

    #[arg(long)]
    skip_quality: bool,

    #[arg(long)]
    skip_tests: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full validation pipeline and print the record as JSON
    Validate {
        /// Code directory or file
        path: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Run only the security scan
    Security {
        path: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Run only the quality check
    Quality {
        path: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Run only the tests
    Tests {
        path: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Run one validation job: download, extract, validate, record
    Job {
        /// Version id the result is recorded under
        #[arg(long)]
        version_id: i64,

        /// Artifact key relative to the artifact root
        #[arg(long)]
        storage_key: String,

        /// Directory holding uploaded artifacts
        #[arg(long, env = "CODEGATE_ARTIFACTS_DIR", default_value = ".codegate/artifacts")]
        artifacts_dir: PathBuf,

        /// Failed attempts before a job fails permanently
        #[arg(long, env = "CODEGATE_MAX_ATTEMPTS", default_value = "3")]
        max_attempts: u32,

        /// Per-attempt timeout in seconds
        #[arg(long, env = "CODEGATE_JOB_TIMEOUT", default_value = "900")]
        timeout_secs: u64,

        /// Parent directory for scratch directories
        #[arg(long, env = "CODEGATE_WORK_ROOT")]
        work_root: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    codegate_core::init_tracing(cli.json, level);

    let passed = match cli.command {
        Commands::Validate { path, config } => cmd_validate(&path, load_config(&config)?).await?,
        Commands::Security { path, config } => cmd_security(&path, load_config(&config)?).await?,
        Commands::Quality { path, config } => cmd_quality(&path, load_config(&config)?).await?,
        Commands::Tests { path, config } => cmd_tests(&path, load_config(&config)?).await?,
        Commands::Job {
            version_id,
            storage_key,
            artifacts_dir,
            max_attempts,
            timeout_secs,
            work_root,
            config,
        } => {
            let job_config = JobConfig {
                timeout_secs,
                work_root,
                retry: RetryPolicy {
                    max_attempts,
                    ..Default::default()
                },
            };
            cmd_job(
                ValidationJob::new(version_id, storage_key),
                &artifacts_dir,
                load_config(&config)?,
                job_config,
            )
            .await?
        }
    };

    if passed {
        Ok(())
    } else {
        anyhow::bail!("validation did not pass")
    }
}

/// Defaults, overridden by the config file, overridden by flags.
fn load_config(args: &ConfigArgs) -> Result<ValidationConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            ValidationConfig::from_json(&raw)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => ValidationConfig::default(),
    };

    if let Some(threshold) = args.severity_threshold {
        config.security_severity_threshold = threshold;
    }
    if let Some(max) = args.max_lint_issues {
        config.max_lint_issues = max;
    }
    if let Some(min) = args.min_coverage {
        config.min_coverage = Some(min);
    }
    config.require_type_hints |= args.require_type_hints;
    config.require_tests |= args.require_tests;
    config.skip_security |= args.skip_security;
    config.skip_quality |= args.skip_quality;
    config.skip_tests |= args.skip_tests;

    Ok(config)
}

fn validator(config: ValidationConfig) -> Validator {
    Validator::new(config, Arc::new(TokioProcessRunner))
}

fn mark(passed: bool) -> &'static str {
    if passed {
        "✓"
    } else {
        "✗"
    }
}

fn print_findings(findings: &[Finding]) {
    for finding in findings {
        let location = finding.location().unwrap_or_else(|| "-".to_string());
        match finding {
            Finding::Security(issue) => {
                println!("  [{}] {} ({})", issue.severity, issue.title, location)
            }
            Finding::Quality(issue) => println!("  [{}] {} ({})", issue.code, issue.message, location),
        }
    }
}

async fn cmd_validate(path: &Path, config: ValidationConfig) -> Result<bool> {
    info!(path = %path.display(), "validating");
    let result = validator(config).validate(path).await;
    let record = result.to_record();
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(record.passed)
}

async fn cmd_security(path: &Path, config: ValidationConfig) -> Result<bool> {
    let threshold = config.security_severity_threshold;
    let result = validator(config)
        .validate_security_only(path)
        .await
        .context("Security scan failed")?;

    println!(
        "Security: {} {} (threshold: {})",
        mark(result.passed),
        if result.passed { "PASSED" } else { "FAILED" },
        threshold
    );
    println!(
        "Issues: {} (critical: {}, high: {}, medium: {}, low: {})",
        result.issues.len(),
        result.critical_count(),
        result.high_count(),
        result.medium_count(),
        result.low_count()
    );
    let findings: Vec<Finding> = result.issues.iter().cloned().map(Finding::from).collect();
    print_findings(&findings);
    Ok(result.passed)
}

async fn cmd_quality(path: &Path, config: ValidationConfig) -> Result<bool> {
    let result = validator(config)
        .validate_quality_only(path)
        .await
        .context("Quality check failed")?;

    println!(
        "Quality: {} {}",
        mark(result.passed),
        if result.passed { "PASSED" } else { "FAILED" }
    );
    println!("Lint score: {:.1}", result.lint_score);
    println!(
        "Issues: {} (lint: {}, type: {}, style: {})",
        result.issues.len(),
        result.lint_issues().len(),
        result.type_issues().len(),
        result.style_issues().len()
    );
    let findings: Vec<Finding> = result.issues.iter().cloned().map(Finding::from).collect();
    print_findings(&findings);
    Ok(result.passed)
}

async fn cmd_tests(path: &Path, config: ValidationConfig) -> Result<bool> {
    let result = validator(config)
        .validate_tests_only(path)
        .await
        .context("Test run failed")?;

    println!(
        "Tests: {} {}",
        mark(result.passed),
        if result.passed { "PASSED" } else { "FAILED" }
    );
    if let Some(message) = &result.message {
        println!("{message}");
    }
    println!(
        "Total: {} (passed: {}, failed: {}, skipped: {}, errors: {}), pass rate {:.1}%",
        result.total,
        result.passed_count,
        result.failed_count,
        result.skipped_count,
        result.error_count,
        result.pass_rate()
    );
    if let Some(coverage) = result.coverage_percent {
        println!("Coverage: {coverage:.1}%");
    }
    for case in &result.cases {
        println!("  {:?} {}", case.status, case.name);
    }
    Ok(result.passed)
}

async fn cmd_job(
    job: ValidationJob,
    artifacts_dir: &Path,
    config: ValidationConfig,
    job_config: JobConfig,
) -> Result<bool> {
    let versions = SurrealVersionStore::from_env()
        .await
        .context("Failed to connect to version store")?;
    let runner = JobRunner::new(
        Arc::new(FsArtifactStore::new(artifacts_dir)),
        Arc::new(versions),
        Arc::new(validator(config)),
        job_config,
    );

    let report = runner
        .run(&job)
        .await
        .context("Failed to record job failure")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(report.record.as_ref().is_some_and(|r| r.passed))
}
