//! Kiln CLI
//!
//! Builds container images from a pipeline file, reusing images of earlier
//! runs for every step whose configuration is unchanged.

mod commands;
mod config;
mod progress;

use clap::Parser;
use colored::*;
use commands::{Commands, handle_command};
use config::Config;
use kiln_builder::BuildError;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Cached, step-by-step container image builds", long_about = None)]
struct Cli {
    /// Docker-compatible engine binary
    #[arg(long, env = "KILN_ENGINE", default_value = "docker")]
    engine: String,

    /// Log debug output, cache decisions included
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = Config { engine: cli.engine };

    match handle_command(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Initialize logging to stderr, keeping stdout for results
fn init_logging(verbose: bool) {
    let default = if verbose {
        "kiln=debug,kiln_builder=debug,kiln_engine=debug"
    } else {
        "kiln=info,kiln_builder=info,kiln_engine=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Process exit code for a failed command
///
/// A failed command step exits with the command's status, anything else
/// with 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<BuildError>())
        .map(|build| build.exit_code())
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}
