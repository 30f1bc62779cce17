//! signal-lab command line
//!
//! Uso:
//!   signal-lab predict [--input FILE] [--output STEM]
//!   signal-lab train   [--input FILE] [--models-dir DIR]
//!   signal-lab signals [--input FILE] [--output FILE] [--grid FILE] [--resume] [--sequential]

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use signal_lab::config::AppConfig;
use signal_lab::pipeline::{
    run_predict, run_signals, run_train, PredictOptions, SignalsOptions, TrainOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "signal-lab",
    version,
    about = "Rolling label predictions and trade-signal grid search"
)]
struct Cli {
    /// Extra configuration file layered over config/default and config/local
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Walk forward through the input, retraining and predicting every step
    Predict(PredictArgs),
    /// Train one model per label and history on the latest rows
    Train(TrainArgs),
    /// Grid-search trade-signal parameters over predicted scores
    Signals(SignalsArgs),
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// Input table (.csv, .parquet, .parq)
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Output path without extension
    #[arg(long, value_name = "STEM")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    #[arg(long = "models-dir", value_name = "DIR")]
    models_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SignalsArgs {
    /// Predictions table
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Results CSV (appended)
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// YAML grid replacing signals.grid
    #[arg(long, value_name = "FILE")]
    grid: Option<PathBuf>,

    /// Skip grid points already in the results file
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// Evaluate configs on the current thread only
    #[arg(long, default_value_t = false)]
    sequential: bool,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };
    installed.map_err(|err| anyhow!("failed to initialize tracing: {err}"))
}

fn run(command: Commands, config: AppConfig) -> Result<()> {
    match command {
        Commands::Predict(args) => {
            let summary = run_predict(
                &config,
                &PredictOptions {
                    input: args.input,
                    output: args.output,
                },
            )?;
            info!(
                "✅ {} iterations, {} rows written to {} ({})",
                summary.iterations,
                summary.rows,
                summary.table_path.display(),
                summary.report.summary_line()
            );
        }
        Commands::Train(args) => {
            let summary = run_train(
                &config,
                &TrainOptions {
                    input: args.input,
                    models_dir: args.models_dir,
                },
            )?;
            info!("✅ {} models saved", summary.artifacts.len());
        }
        Commands::Signals(args) => {
            let summary = run_signals(
                &config,
                &SignalsOptions {
                    input: args.input,
                    output: args.output,
                    grid: args.grid,
                    resume: args.resume,
                    sequential: args.sequential,
                },
            )?;
            info!(
                "✅ {} configs evaluated ({} skipped), results in {}",
                summary.evaluated,
                summary.skipped,
                summary.results_path.display()
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref());
    let json = config.as_ref().map(|c| c.logging.json).unwrap_or(false);
    if let Err(e) = init_tracing(json) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    let result = config.and_then(|config| {
        info!("🚀 signal-lab {} ({})", env!("CARGO_PKG_VERSION"), config.digest());
        run(cli.command, config)
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
