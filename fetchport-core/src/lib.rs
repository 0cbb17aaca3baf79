//! Core library for fetchport.
//!
//! A task reads rows from one source (a server database in chunks, an
//! embedded SQLite file seeded by an init script, or a paginated JSON API),
//! renames and reorders columns, and exports the result as CSV, JSON, XLSX
//! or a zipped CSV.
//!
//! # Security Guarantees
//! - Passwords are zeroized on drop and never logged or serialized
//! - Connection strings appear in logs and errors in masked form only
//! - Output files are keyed by validated task ids and stay inside the output directory
//!
//! # Example
//! ```rust,no_run
//! use fetchport_core::{FetchportConfig, Pipeline, parse_task_request};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = parse_task_request(&std::fs::read_to_string("request.json")?)?;
//! let result = Pipeline::new(FetchportConfig::default())
//!     .run_request(&request)
//!     .await?;
//! println!("{}", result.output_path.display());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod security;
pub mod source;
pub mod transform;
pub mod validation;

// Re-export commonly used types
pub use config::FetchportConfig;
pub use error::{ErrorKind, FetchportError, PipelineError, PipelineStep, Result};
pub use export::{ExportedFile, export_table};
pub use models::{
    ColumnInstruction, DatabaseType, EmbeddedDatabase, ExportFormat, ExportRequest,
    ExternalDatabase, HttpSource, LazyTable, SourceDescriptor, Table, TaskRequest, TaskResult,
};
pub use pipeline::{Pipeline, TaskStatus, task_status};
pub use source::connection::{ConnectionString, build_connection_string, mask_connection_string};
pub use source::read_source;
pub use transform::{TransformConflict, TransformReport, Transformed, apply_instructions};
pub use validation::{parse_task_request, validate_request};
