mod cli;
mod commands;
mod config;
mod error;
mod progress;

use std::path::Path;
use std::process;

use clap::Parser;
use tracing::{debug, error};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::AppConfig,
    error::{AppError, Result},
};

const DEFAULT_LOG_FILTER: &str = "vodmux=info,vodmux_engine=info,manifest=info,mp4=info";
const VERBOSE_LOG_FILTER: &str = "vodmux=debug,vodmux_engine=debug,manifest=debug,mp4=debug";

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _guard = match init_logging(args.verbose, args.quiet, args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    debug!(?config, "Effective configuration");
    let executor = CommandExecutor::new(config);

    match args.command {
        Commands::Download(download) => {
            let output = executor.download(download, args.quiet).await?;
            println!("{}", output.display());
        }
        Commands::Inspect {
            source,
            base_url,
            output,
        } => {
            executor
                .inspect(&source, base_url.as_deref(), output)
                .await?;
        }
        Commands::Config { show, reset, path } => {
            executor.config_command(args.config.as_deref(), show, reset, path)?;
        }
    }

    Ok(())
}

/// Console logging, plus a daily-rolling file when `log_dir` is set. The
/// returned guard flushes the file writer and must live until exit.
fn init_logging(verbose: bool, quiet: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "vodmux.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Config(format!("failed to install log subscriber: {e}")))?;

    Ok(guard)
}
