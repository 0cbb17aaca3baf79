//! fetchport command-line entry point.
//!
//! Prints the command result as JSON on stdout; diagnostics go to stderr.
//! Exit codes: 0 on success, 2 when the request fails validation, 1 otherwise.

use std::process::ExitCode;

use clap::Parser;
use fetchport_cli::{Cli, EXIT_FAILURE, execute, exit_code, output};
use fetchport_core::logging::init_logging;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.global.verbose, cli.global.quiet, cli.global.log_format) {
        eprintln!("Error: {}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    let result = match execute(&cli).await {
        Ok(value) => output::write_json(std::io::stdout().lock(), &value),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}
