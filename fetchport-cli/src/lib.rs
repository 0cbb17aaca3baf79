//! Library module for fetchport-cli
//!
//! Argument parsing and command execution live here so they can be tested
//! without spawning the binary. `main.rs` only wires logging and exit codes.

pub mod output;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use fetchport_core::logging::LogFormat;
use fetchport_core::{
    ErrorKind, FetchportConfig, FetchportError, Pipeline, PipelineError, TaskRequest,
    parse_task_request, task_status,
};
use serde_json::Value;
use tracing::info;

/// Exit code for requests rejected during validation
pub const EXIT_VALIDATION: u8 = 2;

/// Exit code for every other failure
pub const EXIT_FAILURE: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "fetchport")]
#[command(about = "Fetch rows from a database or JSON API, reshape columns, export a file")]
#[command(version)]
#[command(long_about = "
fetchport - run data export tasks

A task reads rows from one source, renames and reorders columns, and writes
{task_id}.{csv|json|xlsx|zip} into the output directory.

SOURCES (configuration.db_config.kind):
- external: PostgreSQL, MySQL, SQL Server [if compiled with --features mssql]
- embedded: SQLite file or :memory:, with an optional init script
- http: paginated JSON API (?page=N&limit=M)

EXAMPLES:
  fetchport run request.json
  fetchport run request.json --task-id nightly --temp-dir /srv/exports
  fetchport fetch request.json --limit 20
  fetchport status nightly --temp-dir /srv/exports
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a task end to end
    Run(RunArgs),
    /// Preview the rows of a request's source without exporting
    Fetch(FetchArgs),
    /// Look up the outcome of a task
    Status(StatusArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Task request file
    #[arg(value_name = "REQUEST.json")]
    pub request: PathBuf,

    /// Task id (overrides the request; generated when neither sets one)
    #[arg(long)]
    pub task_id: Option<String>,

    /// Output directory (overrides configuration, not the request's tmp_dir)
    #[arg(long, env = "FETCHPORT_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Task request file
    #[arg(value_name = "REQUEST.json")]
    pub request: PathBuf,

    /// Maximum number of rows to print
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Task id to look up
    pub task_id: String,

    /// Output directory the task wrote to
    #[arg(long, env = "FETCHPORT_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,

    /// Log output format
    #[arg(long, global = true, default_value = "text", env = "FETCHPORT_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Configuration file (JSON)
    #[arg(long, global = true, env = "FETCHPORT_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Loads the configuration file, or defaults when none is given.
///
/// # Errors
/// Returns an error if the file cannot be read or is invalid.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<FetchportConfig> {
    match path {
        Some(path) => FetchportConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(FetchportConfig::default()),
    }
}

/// Reads and validates a task request file.
///
/// # Errors
/// Returns an error if the file cannot be read or the request is invalid.
pub fn read_request(path: &Path) -> anyhow::Result<TaskRequest> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| FetchportError::io(format!("Failed to read {}", path.display()), e))?;
    parse_task_request(&raw).with_context(|| format!("Invalid request {}", path.display()))
}

/// Runs the selected command and returns the JSON to print.
///
/// # Errors
/// Returns the command's failure with context attached.
pub async fn execute(cli: &Cli) -> anyhow::Result<Value> {
    let mut config = load_config(cli.global.config.as_deref())?;

    match &cli.command {
        Command::Run(args) => {
            if let Some(dir) = &args.temp_dir {
                config = config.with_temp_dir(dir);
            }
            let mut request = read_request(&args.request)?;
            if let Some(task_id) = &args.task_id {
                request.task_id = Some(task_id.clone());
            }

            let result = Pipeline::new(config).run_request(&request).await?;
            info!("Wrote {}", result.output_path.display());
            Ok(serde_json::to_value(&result)?)
        }
        Command::Fetch(args) => {
            let request = read_request(&args.request)?;
            let source = request
                .export
                .as_ref()
                .and_then(|export| export.source.as_ref())
                .ok_or_else(|| FetchportError::validation("source descriptor (db_config) is missing"))?;

            let table = Pipeline::new(config)
                .fetch_preview(source, args.limit)
                .await
                .context("Fetch preview failed")?;
            Ok(output::records_json(&table))
        }
        Command::Status(args) => {
            let dir = args.temp_dir.clone().unwrap_or(config.temp_dir);
            let status = task_status(&dir, &args.task_id)?;
            Ok(output::status_json(&args.task_id, &status))
        }
    }
}

/// Classifies a failure: validation problems exit with 2, everything else with 1.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    let kind = error.chain().find_map(|cause| {
        cause
            .downcast_ref::<PipelineError>()
            .map(PipelineError::kind)
            .or_else(|| cause.downcast_ref::<FetchportError>().map(FetchportError::kind))
    });

    match kind {
        Some(ErrorKind::Validation) => EXIT_VALIDATION,
        _ => EXIT_FAILURE,
    }
}
