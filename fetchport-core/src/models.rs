//! Data model shared by readers, the transform engine and exporters.
//!
//! Request types keep the wire names of the trigger payload
//! (`inputs`, `configuration`, `db_config`, `sql_query` ...) while the Rust
//! field names describe what the value is.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::security::SecretString;
use crate::{FetchportError, Result};

// ============================================================================
// Tables
// ============================================================================

/// A materialized table: ordered column names and row-homogeneous values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Creates an empty table with the given schema.
    pub const fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Creates a table, checking that every row matches the column count.
    ///
    /// # Errors
    /// Returns a transform integrity error naming the first ragged row.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(FetchportError::transform_integrity(format!(
                "row {} has {} values but the table has {} columns",
                index,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Builds a table from JSON objects.
    ///
    /// Columns are the union of keys in first-seen order; a key missing from
    /// a record becomes null in that row.
    pub fn from_records(records: Vec<Map<String, Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|column| record.remove(column).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    /// Converts rows into JSON objects keyed by column name, in column order.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row values in order.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First column name that occurs twice, with both positions.
    pub fn duplicate_column(&self) -> Option<(usize, usize, &str)> {
        self.columns.iter().enumerate().find_map(|(later, name)| {
            self.columns[..later]
                .iter()
                .position(|earlier| earlier == name)
                .map(|earlier| (earlier, later, name.as_str()))
        })
    }

    /// Keeps only the first `limit` rows.
    pub fn truncate(&mut self, limit: usize) {
        self.rows.truncate(limit);
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<Vec<Value>>) {
        (self.columns, self.rows)
    }
}

/// Deferred result of a reader: the fetched chunks, concatenated on demand.
#[derive(Debug, Default)]
pub struct LazyTable {
    chunks: Vec<Table>,
}

impl LazyTable {
    /// Wraps chunks in fetch order.
    pub const fn from_chunks(chunks: Vec<Table>) -> Self {
        Self { chunks }
    }

    /// Wraps a single already-materialized table.
    pub fn from_table(table: Table) -> Self {
        Self {
            chunks: vec![table],
        }
    }

    /// Number of chunks held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Concatenates all chunks, preserving their order.
    ///
    /// The schema is taken from the first chunk that has one. Chunks without
    /// rows never contribute a schema conflict.
    ///
    /// # Errors
    /// Returns a fetch error if two non-empty chunks disagree on columns, or
    /// if a column name repeats (`SELECT a.id, b.id ...`).
    pub fn collect(self) -> Result<Table> {
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();

        for (index, chunk) in self.chunks.into_iter().enumerate() {
            let (chunk_columns, chunk_rows) = chunk.into_parts();
            if columns.is_empty() {
                columns = chunk_columns;
            } else if !chunk_rows.is_empty() && chunk_columns != columns {
                return Err(FetchportError::Fetch {
                    context: format!("chunk {} returned a different column set", index),
                    source: format!("expected {:?}, got {:?}", columns, chunk_columns).into(),
                });
            }
            rows.extend(chunk_rows);
        }

        let table = Table::from_rows(columns, rows)?;
        if let Some((first, second, name)) = table.duplicate_column() {
            return Err(FetchportError::Fetch {
                context: format!("column name '{}' is not unique", name),
                source: format!(
                    "columns {} and {} share the name; alias one of them in the query",
                    first, second
                )
                .into(),
            });
        }
        Ok(table)
    }
}

// ============================================================================
// Column instructions
// ============================================================================

/// One rename and/or reposition request for a source column.
///
/// Instructions without an index are inert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInstruction {
    /// Zero-based index of the source column
    #[serde(rename = "column", default)]
    pub index: Option<usize>,
    /// New column name
    #[serde(rename = "name", default)]
    pub new_name: Option<String>,
    /// Zero-based target position
    #[serde(rename = "change_order", default)]
    pub new_position: Option<usize>,
}

impl ColumnInstruction {
    /// Renames the column at `index`.
    pub fn rename(index: usize, new_name: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            new_name: Some(new_name.into()),
            new_position: None,
        }
    }

    /// Moves the column at `index` to `position`.
    pub const fn reposition(index: usize, position: usize) -> Self {
        Self {
            index: Some(index),
            new_name: None,
            new_position: Some(position),
        }
    }

    /// True when the instruction cannot have any effect.
    pub const fn is_inert(&self) -> bool {
        self.index.is_none() || (self.new_name.is_none() && self.new_position.is_none())
    }
}

// ============================================================================
// Source descriptors
// ============================================================================

/// SQL dialect of an external database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    SqlServer,
    /// Any dialect without a dedicated driver
    Other(String),
}

impl DatabaseType {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::SqlServer => "mssql",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for DatabaseType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Self::PostgreSQL,
            "mysql" | "mariadb" => Self::MySQL,
            "mssql" | "sqlserver" | "sql_server" => Self::SqlServer,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<DatabaseType> for String {
    fn from(value: DatabaseType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection details and query for a server database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDatabase {
    /// SQL dialect
    pub db_type: DatabaseType,
    /// Login name
    pub username: String,
    /// Login password, never logged
    #[serde(default)]
    pub password: SecretString,
    /// Server host name or address
    pub host: String,
    /// Server port; accepts a number or a numeric string
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    /// Database name
    #[serde(rename = "db_name")]
    pub database: String,
    /// Query whose result is exported
    #[serde(rename = "sql_query")]
    pub query: String,
    /// ODBC driver name, honored for SQL Server only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Extra connection parameters appended to the connection string
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

/// Embedded SQLite database with an optional seed script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedDatabase {
    /// File path, or `:memory:` for a throwaway store
    #[serde(rename = "db_file_path", default = "default_embedded_path")]
    pub path: String,
    /// Schema/seed SQL run and committed before the query
    #[serde(rename = "initial_sql", default, skip_serializing_if = "Option::is_none")]
    pub init_script: Option<String>,
    /// Query whose result is exported
    #[serde(rename = "sql_query")]
    pub query: String,
}

fn default_embedded_path() -> String {
    ":memory:".to_string()
}

/// Paginated JSON API returning arrays of objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSource {
    /// Endpoint; `page` and `limit` are appended as query parameters
    pub base_url: String,
}

/// Where a task reads its rows from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    External(ExternalDatabase),
    Embedded(EmbeddedDatabase),
    Http(HttpSource),
}

impl SourceDescriptor {
    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::External(db) => format!("external {}", db.db_type),
            Self::Embedded(db) => format!("embedded sqlite ({})", db.path),
            Self::Http(_) => "http".to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortRepr {
    Number(u16),
    Text(String),
}

fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u16, D::Error> {
    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}

// ============================================================================
// Export
// ============================================================================

/// Output formats the exporter can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Xlsx,
    Zip,
}

impl ExportFormat {
    /// Every supported format.
    pub const ALL: [Self; 4] = [Self::Csv, Self::Json, Self::Xlsx, Self::Zip];

    /// File extension of the final artifact.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xlsx => "xlsx",
            Self::Zip => "zip",
        }
    }

    /// Resolves an optional format string.
    ///
    /// An absent format means CSV. A present but unknown one is rejected.
    ///
    /// # Errors
    /// Returns a validation error for unrecognized values.
    pub fn resolve(value: Option<&str>) -> Result<Self> {
        value.map_or(Ok(Self::Csv), str::parse)
    }
}

impl FromStr for ExportFormat {
    type Err = FetchportError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.extension() == normalized)
            .ok_or_else(|| {
                FetchportError::validation(format!(
                    "unsupported export format '{}', expected one of csv, json, xlsx, zip",
                    s
                ))
            })
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Export target plus the source it reads from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Requested format; absent means csv
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// Output directory override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmp_dir: Option<PathBuf>,
    /// Source descriptor
    #[serde(rename = "db_config", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceDescriptor>,
}

impl ExportRequest {
    /// Creates a request for `source` in the default format.
    pub fn new(source: SourceDescriptor) -> Self {
        Self {
            file_type: None,
            tmp_dir: None,
            source: Some(source),
        }
    }

    /// Builder method to set the format string.
    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }

    /// Builder method to set the output directory.
    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(tmp_dir.into());
        self
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Payload of one pipeline trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Caller-supplied id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Column instructions in application order
    #[serde(rename = "inputs", default)]
    pub instructions: Vec<ColumnInstruction>,
    /// Export target and source
    #[serde(rename = "configuration", default)]
    pub export: Option<ExportRequest>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    /// Absolute path of the final artifact
    pub output_path: PathBuf,
    pub file_type: ExportFormat,
    /// Size in bytes as read from the filesystem
    pub file_size: u64,
}
