//! Embedded SQLite reader.
//!
//! One connection per read: the optional init script runs in autocommit mode
//! and is committed before the main query. The connection is closed on every
//! path.

use std::str::FromStr;

use base64::Engine as _;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::{debug, info, warn};

use crate::models::{EmbeddedDatabase, LazyTable, Table};
use crate::source::external::pagination::strip_statement_terminator;
use crate::{FetchportError, Result};

/// In-memory marker accepted for `db_file_path`.
pub const MEMORY_PATH: &str = ":memory:";

/// Runs the init script (if any) and the query of an embedded database.
///
/// # Errors
/// - [`FetchportError::Validation`] for a blank query or path
/// - [`FetchportError::Connection`] if the database cannot be opened
/// - [`FetchportError::InitScript`] if the init script fails; the query is not run
/// - [`FetchportError::Fetch`] if the query fails
pub async fn read_embedded(db: &EmbeddedDatabase) -> Result<LazyTable> {
    let query = strip_statement_terminator(&db.query);
    if query.is_empty() {
        return Err(FetchportError::validation("sql_query cannot be empty"));
    }

    let options = connect_options(&db.path)?;
    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .map_err(|e| {
            FetchportError::connection(format!("Failed to open SQLite database '{}'", db.path), e)
        })?;

    let result = run_embedded(&mut conn, db.init_script.as_deref(), query).await;

    if let Err(e) = conn.close().await {
        warn!("Failed to close SQLite connection cleanly: {}", e);
    }

    let table = result?;
    info!(
        "Fetched {} rows with {} columns from embedded database '{}'",
        table.row_count(),
        table.column_count(),
        db.path
    );
    Ok(LazyTable::from_table(table))
}

fn connect_options(path: &str) -> Result<SqliteConnectOptions> {
    let path = path.trim();
    if path.is_empty() {
        return Err(FetchportError::validation("db_file_path cannot be empty"));
    }

    if path == MEMORY_PATH || path.eq_ignore_ascii_case("sqlite::memory:") {
        SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            FetchportError::connection("Failed to configure in-memory SQLite database", e)
        })
    } else {
        Ok(SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true))
    }
}

async fn run_embedded(
    conn: &mut SqliteConnection,
    init_script: Option<&str>,
    query: &str,
) -> Result<Table> {
    if let Some(script) = init_script.filter(|s| !s.trim().is_empty()) {
        // Autocommit, so a script that brings its own BEGIN/COMMIT (a
        // `sqlite3 .dump`) runs as written.
        sqlx::raw_sql(script)
            .execute(&mut *conn)
            .await
            .map_err(|e| FetchportError::init_script("Init script execution failed", e))?;
        debug!("Init script committed");
    }

    let statement = (&mut *conn)
        .prepare(query)
        .await
        .map_err(|e| FetchportError::fetch("Failed to prepare embedded query", e))?;
    let columns: Vec<String> = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let rows = statement
        .query()
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| FetchportError::fetch("Embedded query failed", e))?;

    let values = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(index, name)| column_value(row, index, name))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    Table::from_rows(columns, values)
}

/// Maps a SQLite value to JSON using its storage class.
fn column_value(row: &SqliteRow, index: usize, name: &str) -> Result<Value> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| FetchportError::decode_column(name, e))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();
    let decode_err = |e: sqlx::Error| FetchportError::decode_column(name, e);

    let value = match type_name.as_str() {
        "INTEGER" => Value::from(row.try_get::<i64, _>(index).map_err(decode_err)?),
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index).map_err(decode_err)?),
        "REAL" => Value::from(row.try_get::<f64, _>(index).map_err(decode_err)?),
        "BLOB" => {
            let bytes = row.try_get::<Vec<u8>, _>(index).map_err(decode_err)?;
            Value::String(format!(
                "base64:{}",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            ))
        }
        "TEXT" | "DATE" | "TIME" | "DATETIME" => {
            Value::String(row.try_get::<String, _>(index).map_err(decode_err)?)
        }
        // Dynamically typed SQLite: try the likely representations in turn.
        _ => {
            if let Ok(v) = row.try_get::<i64, _>(index) {
                Value::from(v)
            } else if let Ok(v) = row.try_get::<f64, _>(index) {
                Value::from(v)
            } else if let Ok(v) = row.try_get::<String, _>(index) {
                Value::String(v)
            } else {
                warn!(
                    "Column '{}' has unsupported type {}; exporting null",
                    name, type_name
                );
                Value::Null
            }
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn embedded(init_script: Option<&str>, query: &str) -> EmbeddedDatabase {
        EmbeddedDatabase {
            path: MEMORY_PATH.to_string(),
            init_script: init_script.map(str::to_string),
            query: query.to_string(),
        }
    }

    const SEED: &str = "
        CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, avatar BLOB);
        INSERT INTO users (id, name, score, avatar) VALUES (1, 'alice', 9.5, x'DEADBEEF');
        INSERT INTO users (id, name, score, avatar) VALUES (2, 'bob', NULL, NULL);
    ";

    #[tokio::test]
    async fn test_init_script_then_query() {
        let table = read_embedded(&embedded(Some(SEED), "SELECT id, name, score, avatar FROM users ORDER BY id;"))
            .await
            .unwrap()
            .collect()
            .unwrap();

        assert_eq!(table.columns(), ["id", "name", "score", "avatar"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows()[0][0], json!(1));
        assert_eq!(table.rows()[0][1], json!("alice"));
        assert_eq!(table.rows()[0][2], json!(9.5));
        assert_eq!(table.rows()[0][3], json!("base64:3q2+7w=="));
        assert_eq!(table.rows()[1][2], Value::Null);
    }

    #[tokio::test]
    async fn test_query_without_init_script() {
        let table = read_embedded(&embedded(None, "SELECT 1 AS one, 'x' AS letter"))
            .await
            .unwrap()
            .collect()
            .unwrap();

        assert_eq!(table.columns(), ["one", "letter"]);
        assert_eq!(table.rows(), [vec![json!(1), json!("x")]]);
    }

    #[tokio::test]
    async fn test_zero_rows_keep_column_names() {
        let table = read_embedded(&embedded(Some(SEED), "SELECT id, name FROM users WHERE id > 100"))
            .await
            .unwrap()
            .collect()
            .unwrap();

        assert_eq!(table.row_count(), 0);
        assert_eq!(table.columns(), ["id", "name"]);
    }

    #[tokio::test]
    async fn test_init_failure_is_distinct_kind() {
        let error = read_embedded(&embedded(Some("CREATE TABLE broken ("), "SELECT 1"))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InitScript);
    }

    #[tokio::test]
    async fn test_query_failure_is_fetch_kind() {
        let error = read_embedded(&embedded(Some(SEED), "SELECT * FROM missing_table"))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Fetch);
    }

    #[tokio::test]
    async fn test_blank_query_rejected() {
        let error = read_embedded(&embedded(None, " ; ")).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_dump_style_init_script_with_own_transaction() {
        let script = "PRAGMA foreign_keys=OFF;
            BEGIN TRANSACTION;
            CREATE TABLE t (a INTEGER);
            INSERT INTO t VALUES (1);
            INSERT INTO t VALUES (2);
            COMMIT;";

        let table = read_embedded(&embedded(Some(script), "SELECT a FROM t ORDER BY a"))
            .await
            .unwrap()
            .collect()
            .unwrap();

        assert_eq!(table.rows(), [vec![json!(1)], vec![json!(2)]]);
    }

    #[tokio::test]
    async fn test_dump_style_init_script_is_committed_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.db").to_string_lossy().into_owned();

        let seeded = EmbeddedDatabase {
            path: path.clone(),
            init_script: Some("BEGIN TRANSACTION; CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (7); COMMIT;".to_string()),
            query: "SELECT 1".to_string(),
        };
        read_embedded(&seeded).await.unwrap();

        let reopened = EmbeddedDatabase {
            path,
            init_script: None,
            query: "SELECT a FROM t".to_string(),
        };
        let table = read_embedded(&reopened).await.unwrap().collect().unwrap();
        assert_eq!(table.rows(), [vec![json!(7)]]);
    }

    #[tokio::test]
    async fn test_init_script_is_committed_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db").to_string_lossy().into_owned();

        let seeded = EmbeddedDatabase {
            path: path.clone(),
            init_script: Some(SEED.to_string()),
            query: "SELECT COUNT(*) AS n FROM users".to_string(),
        };
        read_embedded(&seeded).await.unwrap();

        let reopened = EmbeddedDatabase {
            path,
            init_script: None,
            query: "SELECT name FROM users ORDER BY id".to_string(),
        };
        let table = read_embedded(&reopened).await.unwrap().collect().unwrap();
        assert_eq!(table.rows(), [vec![json!("alice")], vec![json!("bob")]]);
    }
}
