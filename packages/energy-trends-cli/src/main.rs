//! CLI for the energy trends refresh pipeline
//!
//! Prints one JSON document per command on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use energy_trends::marker::effective_marker;
use energy_trends::{
    CheckReport, Config, FileMarkerStore, MarkerStore, Pipeline, ProgressMarker, Quarter,
    RunOptions, RunOutcome,
};

#[derive(Parser)]
#[command(name = "energy-trends")]
#[command(about = "Publish new quarterly energy trends releases as tidy CSV")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish the latest release if it is newer than the progress marker
    Run {
        /// Publish even if the release is not newer
        #[arg(long)]
        force: bool,

        /// Compare against this quarter instead of the stored marker
        #[arg(long, value_parser = parse_quarter)]
        since: Option<Quarter>,

        /// Download and transform, but write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Report whether a newer release is available
    Check {
        #[arg(long, value_parser = parse_quarter)]
        since: Option<Quarter>,
    },

    /// Print the stored progress marker
    Marker,
}

// ============================================================================
// JSON Response Types
// ============================================================================

#[derive(Serialize)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<RunOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<CheckReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    marker: Option<MarkerResponse>,
}

impl Response {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
            run: None,
            check: None,
            marker: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            message: Some(message),
            ..Self::ok()
        }
    }
}

#[derive(Serialize)]
struct MarkerResponse {
    path: PathBuf,
    /// Stored marker, absent before the first publish
    stored: Option<ProgressMarker>,
    /// What the next run compares against
    effective: Quarter,
}

fn output(resp: &Response) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(resp).context("Failed to serialize response")?
    );
    Ok(())
}

fn parse_quarter(raw: &str) -> std::result::Result<Quarter, String> {
    Quarter::parse_any(raw).map_err(|e| e.to_string())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,energy_trends=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = dispatch(cli).await;
    if let Err(e) = &result {
        output(&Response::failed(format!("{e:#}")))?;
    }
    result
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!(config = %cli.config.display(), url = %config.url, "Configuration loaded");

    match cli.command {
        Commands::Run {
            force,
            since,
            dry_run,
        } => {
            cmd_run(
                config,
                RunOptions {
                    force,
                    since,
                    dry_run,
                },
            )
            .await
        }
        Commands::Check { since } => {
            cmd_check(
                config,
                RunOptions {
                    since,
                    ..RunOptions::default()
                },
            )
            .await
        }
        Commands::Marker => cmd_marker(config).await,
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_run(config: Config, options: RunOptions) -> Result<()> {
    let pipeline = Pipeline::from_config(config).context("Failed to build pipeline")?;
    let outcome = pipeline.run(options).await.context("Pipeline run failed")?;

    output(&Response {
        run: Some(outcome),
        ..Response::ok()
    })
}

async fn cmd_check(config: Config, options: RunOptions) -> Result<()> {
    let pipeline = Pipeline::from_config(config).context("Failed to build pipeline")?;
    let report = pipeline.check(options).await.context("Check failed")?;

    output(&Response {
        check: Some(report),
        ..Response::ok()
    })
}

async fn cmd_marker(config: Config) -> Result<()> {
    let store = FileMarkerStore::new(config.marker_path());
    let stored = store.load().await.context("Failed to read progress marker")?;
    let effective = effective_marker(stored.as_ref(), config.latest_quarter, None);

    output(&Response {
        marker: Some(MarkerResponse {
            path: store.path().to_path_buf(),
            stored,
            effective,
        }),
        ..Response::ok()
    })
}
