//! ZIP output: the CSV rendition, deflated, as a single entry.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{delimited, io_error, TempFileGuard};
use crate::models::Table;
use crate::{FetchportError, Result};

/// Name of the single entry inside the archive.
pub const ARCHIVE_ENTRY: &str = "data.csv";

/// Writes the CSV to a staging file next to the archive, then deflates it
/// into `path`. The staging file is removed on every path.
pub(super) fn write_zip(table: &Table, task_id: &str, output_dir: &Path, path: &Path) -> Result<()> {
    let staging = TempFileGuard::new(output_dir.join(format!(".{}.zip-staging.csv", task_id)));
    delimited::write_csv(table, staging.path())?;
    debug!("Staged CSV at {}", staging.path().display());

    let file = File::create(path).map_err(|e| io_error("create", path, e))?;
    let mut archive = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    archive
        .start_file(ARCHIVE_ENTRY, options)
        .map_err(|e| FetchportError::export("Failed to start archive entry", e))?;

    let mut source = File::open(staging.path()).map_err(|e| io_error("open", staging.path(), e))?;
    io::copy(&mut source, &mut archive).map_err(|e| io_error("archive", staging.path(), e))?;

    let mut writer = archive
        .finish()
        .map_err(|e| FetchportError::export("Failed to finalize archive", e))?;
    writer.flush().map_err(|e| io_error("flush", path, e))
}
