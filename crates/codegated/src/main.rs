//! codegated - validation worker daemon
//!
//! Reads job messages (`{"version_id": 1, "storage_key": "..."}`), one JSON
//! object per line, from stdin and runs them on a worker pool. On EOF or
//! Ctrl-C the pool stops accepting jobs and drains what is queued.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use codegate_core::{
    JobConfig, JobRunner, RetryPolicy, TokioProcessRunner, ValidationConfig, ValidationJob,
    Validator, WorkerPool, DEFAULT_WORKERS,
};
use codegate_state::{FsArtifactStore, SurrealVersionStore};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "codegated")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "codegate validation worker daemon", long_about = None)]
struct Args {
    /// Number of concurrent jobs
    #[arg(long, env = "CODEGATE_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Directory holding uploaded artifacts
    #[arg(long, env = "CODEGATE_ARTIFACTS_DIR", default_value = ".codegate/artifacts")]
    artifacts_dir: PathBuf,

    /// JSON file with validation settings
    #[arg(long, env = "CODEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Failed attempts before a job fails permanently
    #[arg(long, env = "CODEGATE_MAX_ATTEMPTS", default_value = "3")]
    max_attempts: u32,

    /// Per-attempt timeout in seconds
    #[arg(long, env = "CODEGATE_JOB_TIMEOUT", default_value = "900")]
    timeout_secs: u64,

    /// Parent directory for scratch directories
    #[arg(long, env = "CODEGATE_WORK_ROOT")]
    work_root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

/// Parse one queue line. Blank lines are ignored; malformed ones are logged
/// and dropped.
fn parse_job(line: &str) -> Option<ValidationJob> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(job) => Some(job),
        Err(e) => {
            warn!(error = %e, line = %line, "ignoring malformed job message");
            None
        }
    }
}

/// Submit every job read from `reader` until it closes or `shutdown`
/// resolves. A full queue blocks the reader, never the shutdown signal.
async fn feed_jobs<R, S>(reader: R, pool: &WorkerPool, shutdown: S) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut lines = reader.lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read job queue")? else {
                    info!("job queue closed");
                    return Ok(());
                };
                let Some(job) = parse_job(&line) else {
                    continue;
                };
                let version_id = job.version_id;
                tokio::select! {
                    submitted = pool.submit(job) => submitted?,
                    _ = &mut shutdown => {
                        warn!(version_id, "shutdown requested while queue was full; job dropped");
                        return Ok(());
                    }
                }
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                return Ok(());
            }
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ValidationConfig> {
    let Some(path) = path else {
        return Ok(ValidationConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    ValidationConfig::from_json(&raw)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    codegate_core::init_tracing(args.json, level);

    let config = load_config(args.config.as_ref())?;
    let versions = SurrealVersionStore::from_env()
        .await
        .context("Failed to connect to version store")?;
    let runner = JobRunner::new(
        Arc::new(FsArtifactStore::new(&args.artifacts_dir)),
        Arc::new(versions),
        Arc::new(Validator::new(config, Arc::new(TokioProcessRunner))),
        JobConfig {
            timeout_secs: args.timeout_secs,
            work_root: args.work_root.clone(),
            retry: RetryPolicy {
                max_attempts: args.max_attempts,
                ..Default::default()
            },
        },
    );

    let (pool, mut finished) = WorkerPool::spawn(Arc::new(runner), args.workers);
    let reporter = tokio::spawn(async move {
        while let Some(done) = finished.recv().await {
            match done.outcome {
                Ok(report) => info!(
                    version_id = done.job.version_id,
                    state = ?report.final_state,
                    attempts = report.attempts,
                    passed = report.record.as_ref().is_some_and(|r| r.passed),
                    "job finished"
                ),
                Err(e) => warn!(version_id = done.job.version_id, error = %e, "job failed"),
            }
        }
    });

    info!(
        workers = pool.size(),
        artifacts = %args.artifacts_dir.display(),
        "codegated started, reading jobs from stdin"
    );

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    feed_jobs(BufReader::new(tokio::io::stdin()), &pool, ctrl_c).await?;

    pool.close_and_join().await;
    reporter.await.context("Reporter task failed")?;
    info!("codegated stopped");
    Ok(())
}
