//! CLI definition and batch entry point for imgmin.
//!
//! Parses flags into a [`DispatchConfig`], resolves the plugin chain and the
//! input, runs the batch, and maps the outcome to a process exit code.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::BatchError;
use crate::pipeline::{input, BatchOrchestrator, BatchSummary, DispatchConfig, SinkMode};
use crate::plugin::{PluginRegistry, PluginSpec, DEFAULT_PLUGINS};

/// Minify images with a chain of external optimisers.
#[derive(Parser, Debug)]
#[command(name = "imgmin")]
#[command(about = "Minify images")]
#[command(version)]
#[command(
    long_about = "imgmin runs every input through an ordered chain of optimiser plugins.\n\nWith no --out-dir or --write the single result is written to stdout.\n\nExample usage:\n  imgmin images/* --out-dir=build\n  imgmin foo.png > foo-optimized.png\n  cat foo.png | imgmin > foo-optimized.png\n  imgmin --plugin=optipng:level=5 '**/*.png' --write"
)]
pub struct Cli {
    /// Paths or glob patterns; stdin is read when none are given.
    #[arg(value_name = "INPUT")]
    pub input: Vec<String>,

    /// Plugin to apply, as NAME or NAME:KEY=VALUE,... (repeatable, replaces the defaults).
    #[arg(short, long = "plugin", value_name = "NAME", value_parser = parse_plugin_spec)]
    pub plugins: Vec<PluginSpec>,

    /// Output directory.
    #[arg(short, long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Overwrite the input files.
    #[arg(short, long, conflicts_with = "out_dir")]
    pub write: bool,

    /// Maximum number of images processed at once.
    #[arg(short = 'j', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Print the batch summary as JSON.
    #[arg(long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,
}

fn parse_plugin_spec(raw: &str) -> Result<PluginSpec, String> {
    raw.parse().map_err(|e: crate::error::ResolveError| e.to_string())
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running the batch.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the batch.
pub async fn run() -> anyhow::Result<ExitCode> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// Configuration problems (unknown plugins, missing input, several results
/// bound for stdout) are printed to stderr and yield exit code 1. Errors that
/// are not about the user's request propagate to the caller.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    match run_batch(cli).await {
        Ok(code) => Ok(code),
        Err(err) if err.is_fatal_config() => {
            eprintln!("{}", err);
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}

async fn run_batch(cli: Cli) -> Result<ExitCode, BatchError> {
    let config = build_config(&cli)?;
    debug!(?config, "Dispatch configuration");

    let registry = PluginRegistry::with_builtins().with_timeout(config.plugin_timeout);
    let plugins = match registry.resolve(&config.plugins) {
        Ok(plugins) => plugins,
        Err(err) => {
            eprintln!("{}", err);
            eprintln!("{}", registry.hint(&err));
            return Ok(ExitCode::FAILURE);
        }
    };
    if config.plugins.is_empty() {
        info!("Using default plugins: {}", DEFAULT_PLUGINS.join(", "));
    }

    let interactive = std::io::stdin().is_terminal();
    let raw = input::acquire(cli.input, tokio::io::stdin(), interactive).await?;
    let items = input::resolve(raw, &config.sink);

    let orchestrator = BatchOrchestrator::new(plugins, &config)?;
    let summary = orchestrator.run(items).await?;

    report(&summary, &config.sink, cli.json).await?;
    Ok(ExitCode::from(summary.exit_code()))
}

fn build_config(cli: &Cli) -> Result<DispatchConfig, BatchError> {
    let mut config = DispatchConfig::from_env()?
        .with_sink(SinkMode::from_flags(cli.out_dir.clone(), cli.write)?);
    if !cli.plugins.is_empty() {
        config = config.with_plugins(cli.plugins.clone());
    }
    if let Some(concurrency) = cli.concurrency {
        config = config.with_max_concurrency(concurrency);
    }
    config.validate()?;
    Ok(config)
}

/// Writes the batch result: raw bytes for a stdout item, otherwise the
/// summary (batch modes only). Failures always go to stderr.
async fn report(summary: &BatchSummary, sink: &SinkMode, json: bool) -> Result<(), BatchError> {
    for failure in &summary.failures {
        eprintln!("{}: {}", failure.source, failure.reason);
    }

    if let Some(bytes) = &summary.stdout {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(bytes).await.map_err(write_failed)?;
        stdout.flush().await.map_err(write_failed)?;
        return Ok(());
    }

    if sink.is_stdout() {
        return Ok(());
    }

    if json {
        let json_output = serde_json::to_string_pretty(summary)
            .map_err(|e| BatchError::Internal(format!("Failed to serialize summary: {}", e)))?;
        println!("{}", json_output);
    } else {
        println!("{}", summary.message());
    }
    Ok(())
}

fn write_failed(err: std::io::Error) -> BatchError {
    BatchError::Internal(format!("Failed to write to stdout: {}", err))
}
