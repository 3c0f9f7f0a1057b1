// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{debug, error, info};
use zonesync::{
    batch::BatchSize,
    config::Config,
    constants::{DEFAULT_CONFIG_PATH, ENV_LOG_FORMAT},
    controller::{run, Mode, RunOptions, RunReport},
    errors::ReconcileError,
};

/// Converge DNS zones to the records declared in a file.
#[derive(Parser, Debug)]
#[command(name = "zonesync", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Only reconcile this zone
    #[arg(long, global = true)]
    zone: Option<String>,

    /// Summary format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Validate the configuration, fetch each zone and show the pending changes
    Check,
    /// Apply the pending changes
    Insert {
        /// Maximum number of operations per update transaction
        #[arg(long, allow_negative_numbers = true)]
        batch: Option<i64>,

        /// Stop after the first zone that fails
        #[arg(long)]
        exit_error: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    fn run_options(&self) -> Result<RunOptions, ReconcileError> {
        let mut options = match &self.command {
            Command::Check => RunOptions::new(Mode::Check),
            Command::Insert { batch, exit_error } => {
                let mut options = RunOptions::new(Mode::Apply);
                options.batch_size = batch.map(BatchSize::new).transpose()?.unwrap_or_default();
                options.exit_error = *exit_error;
                options
            }
        };
        options.zone.clone_from(&self.zone);
        Ok(options)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("zonesync")
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    let code = runtime.block_on(async_main(&cli))?;
    drop(runtime);
    std::process::exit(code)
}

fn init_logging() {
    // Logs go to stderr so that stdout only carries the summary.
    // RUST_LOG selects the level (default info), RUST_LOG_FORMAT=json switches to JSON.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var(ENV_LOG_FORMAT).unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(cli: &Cli) -> Result<i32> {
    init_logging();
    debug!("Logging initialized with file and line number tracking");

    let report = match prepare_and_run(cli).await {
        Ok(report) => report,
        Err(e) => {
            error!(stage = e.stage(), reason = e.reason(), error = %e, "Run aborted");
            print_failure(cli.output, &e)?;
            return Ok(e.exit_code());
        }
    };

    print_report(cli.output, &report)?;
    let code = report.exit_code();
    info!(zones = report.zones.len(), exit_code = code, "Run finished");
    Ok(code)
}

async fn prepare_and_run(cli: &Cli) -> Result<RunReport, ReconcileError> {
    let options = cli.run_options()?;
    let config = Config::load(&cli.config)?;
    info!(
        config = %cli.config.display(),
        mode = %options.mode,
        batch_size = %options.batch_size,
        "Starting zonesync"
    );
    run(&config, &options).await
}

fn print_report(format: OutputFormat, report: &RunReport) -> Result<()> {
    let summaries = report.summaries();
    match format {
        OutputFormat::Text => {
            for summary in &summaries {
                println!("{summary}");
            }
        }
        OutputFormat::Json => {
            let rendered =
                serde_json::to_string_pretty(&summaries).context("failed to render summary")?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn print_failure(format: OutputFormat, e: &ReconcileError) -> Result<()> {
    match format {
        OutputFormat::Text => eprintln!("zonesync: failed at {}: {e}", e.stage()),
        OutputFormat::Json => {
            let rendered = serde_json::to_string_pretty(&serde_json::json!({
                "success": false,
                "stage": e.stage(),
                "reason": e.reason(),
                "error": e.to_string(),
            }))
            .context("failed to render summary")?;
            println!("{rendered}");
        }
    }
    Ok(())
}
