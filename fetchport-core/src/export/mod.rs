//! Export dispatcher.
//!
//! Writes a [`Table`] to `{task_id}.{ext}` in the output directory. A failed
//! export leaves no partial artifact behind, only a `{task_id}.error` marker
//! holding the error message, and the error is returned to the caller.

mod archive;
mod delimited;
mod json;
mod workbook;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::models::{ExportFormat, Table};
use crate::{FetchportError, Result};

pub use archive::ARCHIVE_ENTRY;
pub use delimited::cell_text;

/// Suffix of the failure marker written next to the outputs.
pub const ERROR_MARKER_EXTENSION: &str = "error";

/// Suffix of the completion marker written by the pipeline.
pub const DONE_MARKER_EXTENSION: &str = "done";

/// A successfully written artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub format: ExportFormat,
    /// Size in bytes, read back from the filesystem
    pub size: u64,
}

/// `{output_dir}/{task_id}.{ext}`
pub fn output_path(output_dir: &Path, task_id: &str, format: ExportFormat) -> PathBuf {
    output_dir.join(format!("{}.{}", task_id, format.extension()))
}

/// `{output_dir}/{task_id}.error`
pub fn error_marker_path(output_dir: &Path, task_id: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", task_id, ERROR_MARKER_EXTENSION))
}

/// `{output_dir}/{task_id}.done`
pub fn done_marker_path(output_dir: &Path, task_id: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", task_id, DONE_MARKER_EXTENSION))
}

/// Deletes a file when dropped unless [`TempFileGuard::keep`] was called.
///
/// Removal failures are logged; a file that is already gone is fine.
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keeps the file and returns its path.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// Writes `table` as `format` into `output_dir`.
///
/// The directory is created if needed.
///
/// # Errors
/// Returns [`FetchportError::Export`] or [`FetchportError::Io`] when any
/// write fails. In that case the `{task_id}.error` marker has been written
/// (best effort) and no partial artifact remains.
pub fn export_table(
    table: &Table,
    task_id: &str,
    format: ExportFormat,
    output_dir: &Path,
) -> Result<ExportedFile> {
    match write_artifact(table, task_id, format, output_dir) {
        Ok(exported) => {
            info!(
                "Exported {} rows to {} ({} bytes)",
                table.row_count(),
                exported.path.display(),
                exported.size
            );
            Ok(exported)
        }
        Err(e) => {
            warn!("Export of task '{}' as {} failed: {}", task_id, format, e);
            write_error_marker(output_dir, task_id, &e.to_string());
            Err(e)
        }
    }
}

fn write_artifact(
    table: &Table,
    task_id: &str,
    format: ExportFormat,
    output_dir: &Path,
) -> Result<ExportedFile> {
    fs::create_dir_all(output_dir).map_err(|e| {
        FetchportError::io(
            format!("Failed to create output directory {}", output_dir.display()),
            e,
        )
    })?;

    let final_path = output_path(output_dir, task_id, format);
    let guard = TempFileGuard::new(&final_path);

    match format {
        ExportFormat::Csv => delimited::write_csv(table, guard.path())?,
        ExportFormat::Json => json::write_json(table, guard.path())?,
        ExportFormat::Xlsx => workbook::write_xlsx(table, guard.path())?,
        ExportFormat::Zip => archive::write_zip(table, task_id, output_dir, guard.path())?,
    }

    let size = fs::metadata(guard.path())
        .map_err(|e| {
            FetchportError::io(format!("Output {} is missing", final_path.display()), e)
        })?
        .len();

    Ok(ExportedFile {
        path: guard.keep(),
        format,
        size,
    })
}

/// Writes the failure marker. Never fails; problems are logged.
pub fn write_error_marker(output_dir: &Path, task_id: &str, message: &str) {
    let marker = error_marker_path(output_dir, task_id);
    if let Err(e) = fs::create_dir_all(output_dir).and_then(|()| fs::write(&marker, message)) {
        warn!("Failed to write error marker {}: {}", marker.display(), e);
    }
}

fn io_error(action: &str, path: &Path, error: io::Error) -> FetchportError {
    FetchportError::io(format!("Failed to {} {}", action, path.display()), error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::{json, Value};

    fn sample() -> Table {
        Table::from_rows(
            vec!["id".into(), "name".into(), "active".into()],
            vec![
                vec![json!(1), json!("alice"), json!(true)],
                vec![json!(2), Value::Null, json!(false)],
            ],
        )
        .unwrap()
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_output_naming() {
        let dir = Path::new("/tmp/out");
        assert_eq!(
            output_path(dir, "task-1", ExportFormat::Xlsx),
            PathBuf::from("/tmp/out/task-1.xlsx")
        );
        assert_eq!(
            error_marker_path(dir, "task-1"),
            PathBuf::from("/tmp/out/task-1.error")
        );
    }

    #[test]
    fn test_every_format_writes_named_file() {
        let dir = tempfile::tempdir().unwrap();
        for format in ExportFormat::ALL {
            let exported = export_table(&sample(), "all", format, dir.path()).unwrap();
            assert_eq!(exported.path, output_path(dir.path(), "all", format));
            assert_eq!(exported.size, fs::metadata(&exported.path).unwrap().len());
            assert!(exported.size > 0);
        }
        assert_eq!(
            entries(dir.path()),
            ["all.csv", "all.json", "all.xlsx", "all.zip"]
        );
    }

    #[test]
    fn test_output_directory_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let exported = export_table(&sample(), "t", ExportFormat::Csv, &nested).unwrap();
        assert!(exported.path.starts_with(&nested));
    }

    #[test]
    fn test_zip_intermediate_removed_on_success() {
        let dir = tempfile::tempdir().unwrap();
        export_table(&sample(), "zipped", ExportFormat::Zip, dir.path()).unwrap();
        assert_eq!(entries(dir.path()), ["zipped.zip"]);
    }

    #[test]
    fn test_zip_failure_cleans_up_and_marks_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the archive should go makes the final write fail.
        fs::create_dir(dir.path().join("broken.zip")).unwrap();

        let error = export_table(&sample(), "broken", ExportFormat::Zip, dir.path()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Export);

        assert_eq!(entries(dir.path()), ["broken.error", "broken.zip"]);
        let marker = fs::read_to_string(error_marker_path(dir.path(), "broken")).unwrap();
        assert_eq!(marker, error.to_string());
    }

    #[test]
    fn test_temp_file_guard() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = dir.path().join("dropped.tmp");
        let kept = dir.path().join("kept.tmp");
        fs::write(&dropped, "x").unwrap();
        fs::write(&kept, "x").unwrap();

        drop(TempFileGuard::new(&dropped));
        let path = TempFileGuard::new(&kept).keep();

        assert!(!dropped.exists());
        assert!(path.exists());

        // Missing files are not an error.
        drop(TempFileGuard::new(dir.path().join("never-created")));
    }
}
