//! Pipeline orchestrator: Validate, Fetch, Transform, Export.
//!
//! Each run is keyed by a task id. Outputs land at
//! `{output_dir}/{task_id}.{ext}` together with a `.done` marker on success
//! or an `.error` marker holding the failure message.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::config::FetchportConfig;
use crate::error::{PipelineError, PipelineStep};
use crate::export::{self, ExportedFile};
use crate::models::{
    ColumnInstruction, ExportFormat, ExportRequest, SourceDescriptor, Table, TaskRequest,
    TaskResult,
};
use crate::source::read_source;
use crate::transform::apply_instructions;
use crate::validation::{validate_export, validate_source, validate_task_id};
use crate::{FetchportError, Result};

/// Runs tasks against one configuration.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: FetchportConfig,
}

impl Pipeline {
    pub const fn new(config: FetchportConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &FetchportConfig {
        &self.config
    }

    /// Runs a parsed request, generating a task id when it has none.
    ///
    /// # Errors
    /// See [`Pipeline::run`].
    pub async fn run_request(&self, request: &TaskRequest) -> std::result::Result<TaskResult, PipelineError> {
        let task_id = request
            .task_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.run(&task_id, &request.instructions, request.export.as_ref())
            .await
    }

    /// Runs one task end to end.
    ///
    /// # Errors
    /// Returns a [`PipelineError`] naming the failing step. Validation
    /// failures happen before any I/O. Later failures leave a
    /// `{task_id}.error` marker in the output directory.
    #[instrument(name = "pipeline", skip_all, fields(task_id = %task_id))]
    pub async fn run(
        &self,
        task_id: &str,
        instructions: &[ColumnInstruction],
        export: Option<&ExportRequest>,
    ) -> std::result::Result<TaskResult, PipelineError> {
        let fail = |step: PipelineStep| {
            move |e: FetchportError| PipelineError::new(task_id, step, e)
        };

        let (format, source, output_dir) = self
            .validate(task_id, export)
            .map_err(fail(PipelineStep::Validate))?;
        info!(
            "Validated task: {} source, {} export to {}",
            source.label(),
            format,
            output_dir.display()
        );
        clear_markers(&output_dir, task_id);

        let marked = |step: PipelineStep| {
            let output_dir = output_dir.clone();
            move |e: FetchportError| {
                export::write_error_marker(&output_dir, task_id, &e.to_string());
                PipelineError::new(task_id, step, e)
            }
        };

        let lazy = read_source(source, &self.config)
            .await
            .map_err(marked(PipelineStep::Fetch))?;
        debug!("Fetched {} chunks", lazy.chunk_count());
        let fetched = lazy.collect().map_err(marked(PipelineStep::Fetch))?;

        let transformed =
            apply_instructions(fetched, instructions).map_err(marked(PipelineStep::Transform))?;
        if !transformed.report.is_clean() {
            warn!(
                "Transform applied with {} conflicts",
                transformed.report.conflicts.len()
            );
        }
        let table = transformed.table;

        // The dispatcher writes its own error marker.
        let exported = export_blocking(table, task_id, format, &output_dir)
            .await
            .map_err(fail(PipelineStep::Export))?;

        let result = finish(task_id, &exported, &output_dir).map_err(marked(PipelineStep::Export))?;
        info!(
            "Task complete: {} ({} bytes)",
            result.output_path.display(),
            result.file_size
        );
        Ok(result)
    }

    fn validate<'a>(
        &self,
        task_id: &str,
        export: Option<&'a ExportRequest>,
    ) -> Result<(ExportFormat, &'a SourceDescriptor, PathBuf)> {
        validate_task_id(task_id)?;
        let (format, source) = validate_export(export)?;
        let output_dir = export
            .and_then(|request| request.tmp_dir.clone())
            .unwrap_or_else(|| self.config.temp_dir.clone());
        Ok((format, source, output_dir))
    }

    /// Fetches and materializes a source without transforming or exporting it.
    ///
    /// # Errors
    /// Returns a validation error for an unusable descriptor, otherwise the
    /// reader's error.
    pub async fn fetch_preview(&self, source: &SourceDescriptor, limit: Option<usize>) -> Result<Table> {
        validate_source(source)?;
        let mut table = read_source(source, &self.config).await?.collect()?;
        if let Some(limit) = limit {
            table.truncate(limit);
        }
        Ok(table)
    }
}

async fn export_blocking(
    table: Table,
    task_id: &str,
    format: ExportFormat,
    output_dir: &Path,
) -> Result<ExportedFile> {
    let task_id = task_id.to_string();
    let output_dir = output_dir.to_path_buf();
    tokio::task::spawn_blocking(move || export::export_table(&table, &task_id, format, &output_dir))
        .await
        .map_err(|e| FetchportError::export("Export task did not complete", e))?
}

/// Confirms the artifact exists, resolves its absolute path and writes the
/// completion marker.
fn finish(task_id: &str, exported: &ExportedFile, output_dir: &Path) -> Result<TaskResult> {
    let metadata = fs::metadata(&exported.path).map_err(|e| {
        FetchportError::io(
            format!("Output {} is missing after export", exported.path.display()),
            e,
        )
    })?;
    let output_path = exported.path.canonicalize().map_err(|e| {
        FetchportError::io(
            format!("Failed to resolve {}", exported.path.display()),
            e,
        )
    })?;

    let marker = export::done_marker_path(output_dir, task_id);
    fs::write(&marker, output_path.to_string_lossy().as_bytes())
        .map_err(|e| FetchportError::io(format!("Failed to write {}", marker.display()), e))?;

    Ok(TaskResult {
        task_id: task_id.to_string(),
        output_path,
        file_type: exported.format,
        file_size: metadata.len(),
    })
}

fn clear_markers(output_dir: &Path, task_id: &str) {
    for marker in [
        export::done_marker_path(output_dir, task_id),
        export::error_marker_path(output_dir, task_id),
    ] {
        match fs::remove_file(&marker) {
            Ok(()) => debug!("Removed stale marker {}", marker.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove stale marker {}: {}", marker.display(), e),
        }
    }
}

/// Outcome of a task as seen from its output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Completed { path: PathBuf },
    Failed { message: String },
    Unknown,
}

/// Looks up a task by its markers and outputs.
///
/// A `.done` marker wins, then an `.error` marker, then any output file
/// named after the task.
///
/// # Errors
/// Returns a validation error for an unusable task id and an I/O error if a
/// marker exists but cannot be read.
pub fn task_status(output_dir: &Path, task_id: &str) -> Result<TaskStatus> {
    validate_task_id(task_id)?;

    let read_marker = |path: &Path| {
        fs::read_to_string(path)
            .map_err(|e| FetchportError::io(format!("Failed to read {}", path.display()), e))
    };

    let done = export::done_marker_path(output_dir, task_id);
    if done.is_file() {
        let recorded = PathBuf::from(read_marker(&done)?.trim());
        if recorded.is_file() {
            return Ok(TaskStatus::Completed { path: recorded });
        }
        warn!(
            "Marker {} points at missing output {}",
            done.display(),
            recorded.display()
        );
    }

    let error = export::error_marker_path(output_dir, task_id);
    if error.is_file() {
        return Ok(TaskStatus::Failed {
            message: read_marker(&error)?,
        });
    }

    Ok(ExportFormat::ALL
        .into_iter()
        .map(|format| export::output_path(output_dir, task_id, format))
        .find(|path| path.is_file())
        .map_or(TaskStatus::Unknown, |path| TaskStatus::Completed { path }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::HttpSource;

    fn pipeline(dir: &Path) -> Pipeline {
        Pipeline::new(FetchportConfig::default().with_temp_dir(dir))
    }

    fn http_export() -> ExportRequest {
        ExportRequest::new(SourceDescriptor::Http(HttpSource {
            base_url: "http://127.0.0.1:9/items".to_string(),
        }))
    }

    #[tokio::test]
    async fn test_unknown_format_fails_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("never-created");
        let export = http_export()
            .with_file_type("parquet")
            .with_tmp_dir(&output_dir);

        let error = pipeline(dir.path())
            .run("t1", &[], Some(&export))
            .await
            .unwrap_err();

        assert_eq!(error.step, PipelineStep::Validate);
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.task_id, "t1");
        assert!(!output_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_export_request() {
        let dir = tempfile::tempdir().unwrap();
        let error = pipeline(dir.path()).run("t2", &[], None).await.unwrap_err();
        assert_eq!(error.step, PipelineStep::Validate);
    }

    #[tokio::test]
    async fn test_path_like_task_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let error = pipeline(dir.path())
            .run("../t3", &[], Some(&http_export()))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_task_status_lookup() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(task_status(dir.path(), "none").unwrap(), TaskStatus::Unknown);

        fs::write(dir.path().join("bad.error"), "Export failed: disk full").unwrap();
        assert_eq!(
            task_status(dir.path(), "bad").unwrap(),
            TaskStatus::Failed {
                message: "Export failed: disk full".to_string()
            }
        );

        let output = dir.path().join("good.csv");
        fs::write(&output, "a\n1\n").unwrap();
        assert_eq!(
            task_status(dir.path(), "good").unwrap(),
            TaskStatus::Completed { path: output }
        );

        assert!(task_status(dir.path(), "a/b").is_err());
    }
}
