//! JSON output: one array of row objects, keys in column order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::io_error;
use crate::models::Table;
use crate::{FetchportError, Result};

/// Repeated column names would collapse into one key, so they are refused.
pub(super) fn write_json(table: &Table, path: &Path) -> Result<()> {
    if let Some((first, second, name)) = table.duplicate_column() {
        return Err(FetchportError::Export {
            context: format!("Cannot write {}", path.display()),
            source: format!(
                "column name '{}' is used by columns {} and {}",
                name, first, second
            )
            .into(),
        });
    }

    let file = File::create(path).map_err(|e| io_error("create", path, e))?;
    let mut writer = BufWriter::new(file);

    serde_json::to_writer_pretty(&mut writer, &table.to_records())
        .map_err(|e| FetchportError::export(format!("Failed to write {}", path.display()), e))?;
    writer.flush().map_err(|e| io_error("flush", path, e))
}
