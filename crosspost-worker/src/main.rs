//! crosspost-worker - Worker pool for publish jobs
//!
//! Reads publish jobs from stdin, runs them through the crosspost pipeline
//! with bounded concurrency and reports each outcome on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use libcrosspost::config::resolve_config_path;
use libcrosspost::logging::{LogFormat, LoggingConfig};
use libcrosspost::transport::ReqwestTransport;
use libcrosspost::{
    Config, CrosspostError, InMemoryRepository, JobHandler, JobReport, PipelineContext,
    PublishJob, PublisherRegistry, WorkerPool,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing::{error, info, warn};

/// Per-request timeout for platform HTTP calls
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(name = "crosspost-worker")]
#[command(version)]
#[command(about = "Worker pool that publishes queued posts to social platforms")]
#[command(long_about = "\
crosspost-worker - Worker pool for publish jobs

DESCRIPTION:
    crosspost-worker consumes publish jobs and drives each one through the
    crosspost pipeline: validation, token refresh, rate limiting, media
    upload and post creation with retry.

    Jobs are read from stdin, one JSON object per line:

        {\"post_id\": \"p-123\", \"platform\": \"linkedin\", \"attempt\": 1}

    One JSON report per job is written to stdout. A report with status
    \"requeue\" failed in a way another attempt may fix; the queue should
    deliver the job again (after retry_after_secs when present).

USAGE:
    # Run jobs against a state snapshot
    crosspost-worker --state state.json < jobs.jsonl

    # Eight jobs in flight, five minute deadline per job
    crosspost-worker --state state.json --concurrency 8 --deadline 5m

    # Structured logs on stderr
    crosspost-worker --state state.json --log-format json

SIGNALS:
    SIGTERM, SIGINT - Stop reading jobs, finish the ones in flight,
                      save state and exit

CONFIGURATION:
    Configuration file: ~/.config/crosspost/config.toml
    Override with --config or CROSSPOST_CONFIG.

    [worker]
    concurrency = 4
    job_deadline_secs = 600

    [rate_limits.twitter]
    capacity = 50
    window_secs = 900

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Configuration file (defaults to the XDG config location)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON snapshot holding posts, connections and publications
    #[arg(long, value_name = "FILE", env = "CROSSPOST_STATE")]
    state: PathBuf,

    /// Maximum number of jobs in flight (overrides config)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Deadline for a single job, e.g. "90s" or "10m" (overrides config)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    deadline: Option<Duration>,

    /// Log output format: text, json or pretty (overrides config)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(exit_code(&e));
        }
    };

    LoggingConfig::new(
        cli.log_format.unwrap_or(config.logging.format),
        config.logging.level.clone(),
        cli.verbose,
    )
    .init();

    // Exit explicitly: a pending stdin read would otherwise hold the runtime open
    let code = match run(&cli, config).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            exit_code(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<CrosspostError>()
        .map_or(1, CrosspostError::exit_code)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let path = resolve_config_path()?;
            if path.exists() {
                Config::load_from_path(&path)
                    .with_context(|| format!("loading config from {}", path.display()))?
            } else {
                Config::default_config()
            }
        }
    };

    if let Some(concurrency) = cli.concurrency {
        config.worker.concurrency = concurrency;
    }
    if let Some(deadline) = cli.deadline {
        config.worker.job_deadline_secs = deadline.as_secs();
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: &Cli, config: Config) -> Result<()> {
    let repo = Arc::new(
        InMemoryRepository::load(&cli.state)
            .await
            .with_context(|| format!("loading state from {}", cli.state.display()))?,
    );
    let transport = Arc::new(ReqwestTransport::new(HTTP_TIMEOUT)?);
    let ctx = PipelineContext::from_config(&config, transport, repo.clone());
    let registry = PublisherRegistry::from_config(&config, ctx);
    let handler = Arc::new(JobHandler::new(
        repo.clone(),
        registry,
        config.worker.job_deadline(),
    ));
    let mut pool = WorkerPool::new(handler, config.worker.concurrency);

    info!(
        "crosspost-worker starting ({} workers, {}s job deadline)",
        pool.concurrency(),
        config.worker.job_deadline_secs
    );

    let outcome = process_jobs(&mut pool).await;

    // In-flight jobs are finished and their publications saved even when
    // reading jobs failed
    let mut stdout = tokio::io::stdout();
    for report in pool.drain().await {
        emit(&mut stdout, &report).await?;
    }
    save_state(&repo, &cli.state).await?;

    info!("crosspost-worker stopped");
    outcome
}

/// Feed stdin jobs into the pool until input ends or a shutdown signal arrives
async fn process_jobs(pool: &mut WorkerPool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut input_open = true;

    while input_open || pool.in_flight() > 0 {
        tokio::select! {
            signal = &mut shutdown => {
                signal?;
                info!("Shutdown requested, no longer accepting jobs");
                return Ok(());
            }
            line = lines.next_line(), if input_open => {
                match line.context("reading jobs from stdin")? {
                    Some(line) => {
                        if let Some(job) = parse_job(&line) {
                            pool.submit(job).await?;
                        }
                    }
                    None => input_open = false,
                }
            }
            report = pool.next_report(), if pool.in_flight() > 0 => {
                if let Some(report) = report {
                    emit(&mut stdout, &report).await?;
                }
            }
        }
    }
    Ok(())
}

fn parse_job(line: &str) -> Option<PublishJob> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<PublishJob>(line) {
        Ok(job) => Some(job),
        Err(e) => {
            warn!("Skipping malformed job line: {}", e);
            None
        }
    }
}

async fn emit(stdout: &mut Stdout, report: &JobReport) -> Result<()> {
    let mut line = serde_json::to_string(report).context("serializing job report")?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn save_state(repo: &InMemoryRepository, path: &Path) -> Result<()> {
    repo.save(path)
        .await
        .with_context(|| format!("saving state to {}", path.display()))
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handlers")?;
    let handle = signals.handle();
    if let Some(signal) = signals.next().await {
        info!("Received signal {}, draining in-flight jobs", signal);
    }
    handle.close();
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("Received Ctrl-C, draining in-flight jobs");
    Ok(())
}
