//! JSON rendering of command results.

use std::io::Write;

use fetchport_core::{Table, TaskStatus};
use serde_json::{Value, json};

/// Rows as an array of objects keyed by column name.
pub fn records_json(table: &Table) -> Value {
    Value::Array(table.to_records().into_iter().map(Value::Object).collect())
}

/// Status report for one task.
pub fn status_json(task_id: &str, status: &TaskStatus) -> Value {
    match status {
        TaskStatus::Completed { path } => json!({
            "task_id": task_id,
            "status": "completed",
            "output_path": path,
        }),
        TaskStatus::Failed { message } => json!({
            "task_id": task_id,
            "status": "failed",
            "message": message,
        }),
        TaskStatus::Unknown => json!({
            "task_id": task_id,
            "status": "unknown",
        }),
    }
}

/// Writes pretty JSON and a trailing newline to `writer`.
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_json<W: Write>(mut writer: W, value: &Value) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
