//! CSV output.

use std::path::Path;

use serde_json::Value;

use super::io_error;
use crate::models::Table;
use crate::{FetchportError, Result};

/// Text of one cell: null is empty, strings are raw, everything else is JSON.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Writes a header row and one record per row.
///
/// A table without columns produces an empty file.
pub(super) fn write_csv(table: &Table, path: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .from_path(path)
        .map_err(|e| FetchportError::export(format!("Failed to create {}", path.display()), e))?;

    if table.column_count() > 0 {
        writer
            .write_record(table.columns())
            .map_err(|e| FetchportError::export("Failed to write CSV header", e))?;
        for (index, row) in table.rows().iter().enumerate() {
            writer
                .write_record(row.iter().map(cell_text))
                .map_err(|e| FetchportError::export(format!("Failed to write CSV row {}", index), e))?;
        }
    }

    writer.flush().map_err(|e| io_error("flush", path, e))
}
