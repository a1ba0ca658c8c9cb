//! Sumi-Mirror main entry point
//!
//! This is the command-line interface for the Sumi-Mirror site cloner.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use sumi_mirror::config::{load_config_with_hash, Config, JobOptions};
use sumi_mirror::crawler::{channel, Orchestrator, ProgressStatus, ResumeMode};
use sumi_mirror::output::{load_statistics, print_statistics, CloneStatistics};
use tracing_subscriber::EnvFilter;

/// Sumi-Mirror: a resumable full-site cloner
///
/// Sumi-Mirror renders every page reachable from a root URL, captures the
/// assets they reference and writes a browsable offline copy. Interrupted
/// clones pick up where they left off.
#[derive(Parser, Debug)]
#[command(name = "sumi-mirror")]
#[command(version = "1.0.0")]
#[command(about = "A resumable full-site cloner", long_about = None)]
struct Cli {
    /// Root URL to clone (overrides `url` in the config file)
    #[arg(value_name = "URL")]
    url: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory the offline copy is written to
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Maximum number of pages to clone
    #[arg(long)]
    max_pages: Option<usize>,

    /// Maximum link depth from the root
    #[arg(long)]
    max_depth: Option<u32>,

    /// Pages processed at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Stop crawling after this many minutes (0 = no limit)
    #[arg(long, value_name = "MINUTES")]
    time_limit: Option<u64>,

    /// Ignore page and depth limits
    #[arg(long)]
    unlimited: bool,

    /// Always render pages, never reuse cached content
    #[arg(long, conflicts_with = "incremental")]
    no_cache: bool,

    /// Reuse cached pages only if the server reports them unchanged
    #[arg(long)]
    incremental: bool,

    /// Require an existing checkpoint and resume from it
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh clone, discarding any checkpoint
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Show statistics for the clone in DIR and exit
    #[arg(long, value_name = "DIR")]
    stats: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    /// Job options given on the command line
    fn job_options(&self) -> JobOptions {
        JobOptions {
            max_pages: self.max_pages,
            max_depth: self.max_depth,
            concurrency: self.concurrency,
            time_limit_minutes: self.time_limit,
            use_cache: self.no_cache.then_some(false),
            incremental: self.incremental.then_some(true),
            unlimited: self.unlimited.then_some(true),
        }
    }

    fn resume_mode(&self) -> ResumeMode {
        if self.fresh {
            ResumeMode::Fresh
        } else if self.resume {
            ResumeMode::Require
        } else {
            ResumeMode::Auto
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    if let Some(dir) = &cli.stats {
        return handle_stats(dir).await;
    }

    let (mut config, config_hash) = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (cfg, hash) = load_config_with_hash(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, Some(hash))
        }
        None => (Config::default(), None),
    };

    if let Some(url) = &cli.url {
        config.url = Some(url.clone());
    }
    if let Some(output) = &cli.output {
        config.output.directory = output.clone();
    }
    if config.url.is_none() {
        bail!("no root URL given; pass one on the command line or set `url` in the config");
    }

    handle_clone(config, config_hash, &cli).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_mirror=info,warn"),
            1 => EnvFilter::new("sumi_mirror=debug,info"),
            2 => EnvFilter::new("sumi_mirror=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --stats mode: shows statistics for an existing clone
async fn handle_stats(dir: &std::path::Path) -> anyhow::Result<()> {
    println!("Output directory: {}\n", dir.display());

    match load_statistics(dir).await? {
        Some(stats) => {
            print_statistics(&stats);
            Ok(())
        }
        None => bail!("no clone found in {}", dir.display()),
    }
}

/// Handles the main clone operation
async fn handle_clone(config: Config, config_hash: Option<String>, cli: &Cli) -> anyhow::Result<()> {
    match cli.resume_mode() {
        ResumeMode::Fresh => tracing::info!("Starting fresh clone (ignoring previous state)"),
        ResumeMode::Require => tracing::info!("Resuming interrupted clone"),
        ResumeMode::Auto => {
            tracing::info!("Starting clone (will resume if a checkpoint exists)")
        }
    }
    tracing::info!("Output directory: {}", config.output.directory.display());

    let (progress, mut events) = channel();
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.status {
                ProgressStatus::Phase { phase } => tracing::info!("Phase: {}", phase),
                ProgressStatus::Page { status } => tracing::debug!(
                    "[{}/{}] {} {}",
                    event.current_page,
                    event.total_pages,
                    status,
                    event.current_url.unwrap_or_default()
                ),
            }
        }
    });

    let mut orchestrator = Orchestrator::from_config(config)?
        .with_options(cli.job_options())
        .with_resume_mode(cli.resume_mode())
        .with_progress(progress);
    if let Some(hash) = config_hash {
        orchestrator = orchestrator.with_config_hash(hash);
    }

    let result = orchestrator.run().await;
    // The sender is gone once the orchestrator is, so the reporter drains and exits
    let _ = reporter.await;

    match result {
        Ok(summary) => {
            if let Some(note) = &summary.resume_note {
                tracing::warn!("{}", note);
            }
            tracing::info!(
                "Clone finished ({}): {} pages, {} assets",
                summary.stop_reason,
                summary.pages_cloned,
                summary.assets_captured
            );
            if !cli.quiet {
                println!();
                print_statistics(&CloneStatistics::from(&summary));
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Clone failed: {}", e);
            Err(e.into())
        }
    }
}
