//! # bq-pulse CLI (`bqp`)
//!
//! ## Usage
//!
//! ```bash
//! bqp [--config ./config/bqp.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bqp serve` | Start the HTTP server |
//! | `bqp analyze <project>` | Run one analysis and print the report |
//! | `bqp projects` | List accessible projects |
//!
//! Without `--config` every setting takes its default and credentials come
//! from the environment.

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use bq_pulse::backend::{CloudBackend, GcpBackend};
use bq_pulse::config::{self, Config};
use bq_pulse::pipeline::{AnalysisPipeline, PipelineOutcome};
use bq_pulse::progress::{ProgressEmitter, ProgressEvent, ProgressMode};
use bq_pulse::server;

/// bq-pulse: health analysis for BigQuery projects.
#[derive(Parser)]
#[command(
    name = "bqp",
    about = "bq-pulse: health analysis for BigQuery projects",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When omitted, defaults apply and credentials are read from the
    /// environment. See `config/bqp.example.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Analyze one project.
    ///
    /// Progress goes to stderr; the final report and reading list are
    /// printed to stdout as JSON. Ctrl-C stops the run at its next
    /// checkpoint.
    Analyze {
        /// Google Cloud project id.
        project_id: String,

        /// Progress output: `human`, `json` or `off`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// List the projects the access token can see.
    Projects,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::minimal(),
    };

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Analyze {
            project_id,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            run_analyze(cfg, &project_id, mode).await?;
        }
        Commands::Projects => {
            let backend = GcpBackend::new(Arc::new(cfg))?;
            for project in backend.list_projects().await? {
                println!("{}", project.project_id);
            }
        }
    }

    Ok(())
}

async fn run_analyze(cfg: Config, project_id: &str, mode: ProgressMode) -> anyhow::Result<()> {
    let cfg = Arc::new(cfg);
    let backend = Arc::new(GcpBackend::new(cfg.clone())?);
    let (emitter, mut rx) = ProgressEmitter::channel(cfg.server.event_buffer);

    let token = emitter.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling analysis");
            token.cancel();
        }
    });

    let pipeline = AnalysisPipeline::new(backend, cfg.discovery.clone(), project_id);
    let run = tokio::spawn(async move { pipeline.run(&emitter).await });

    let reporter = mode.reporter();
    let mut failure = None;
    while let Some(event) = rx.recv().await {
        reporter.report(&event);
        match &event {
            ProgressEvent::Complete { .. } => {
                println!("{}", serde_json::to_string_pretty(&event.payload())?);
            }
            ProgressEvent::Error { details } => failure = Some(details.clone()),
            _ => {}
        }
    }

    match run.await? {
        PipelineOutcome::Completed => Ok(()),
        PipelineOutcome::Cancelled => bail!("analysis cancelled"),
        PipelineOutcome::Failed => bail!(failure.unwrap_or_else(|| "analysis failed".to_string())),
    }
}
