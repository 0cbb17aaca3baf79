//! PostgreSQL chunk source.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::BigDecimal;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};

use super::ChunkSource;
use crate::config::ExternalReaderConfig;
use crate::models::Table;
use crate::source::connection::ConnectionString;
use crate::{FetchportError, Result};

pub(super) struct PostgresChunkSource {
    pool: PgPool,
}

impl PostgresChunkSource {
    pub(super) async fn connect(
        connection: &ConnectionString,
        config: &ExternalReaderConfig,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.connect_timeout())
            .connect(connection.expose())
            .await
            .map_err(|e| {
                FetchportError::connection(
                    format!("Failed to connect to {}", connection.masked()),
                    e,
                )
            })?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ChunkSource for PostgresChunkSource {
    async fn fetch_chunk(&mut self, sql: &str) -> Result<Table> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| FetchportError::connection("Failed to acquire PostgreSQL connection", e))?;

        let statement = (&mut *conn)
            .prepare(sql)
            .await
            .map_err(|e| FetchportError::fetch("Failed to prepare PostgreSQL chunk query", e))?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let rows = statement
            .query()
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| FetchportError::fetch("PostgreSQL chunk query failed", e))?;

        let values = rows
            .iter()
            .map(|row| row_values(row, &columns))
            .collect::<Result<Vec<_>>>()?;
        Table::from_rows(columns, values)
    }

    async fn close(&mut self) {
        self.pool.close().await;
    }
}

fn row_values(row: &PgRow, columns: &[String]) -> Result<Vec<Value>> {
    columns
        .iter()
        .enumerate()
        .map(|(index, name)| column_value(row, index, name))
        .collect()
}

/// Maps a PostgreSQL value to JSON based on its runtime type.
fn column_value(row: &PgRow, index: usize, name: &str) -> Result<Value> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| FetchportError::decode_column(name, e))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let decode_err = |e: sqlx::Error| FetchportError::decode_column(name, e);
    let value = match type_name.as_str() {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(index).map_err(decode_err)?),
        "INT2" => Value::from(row.try_get::<i16, _>(index).map_err(decode_err)?),
        "INT4" => Value::from(row.try_get::<i32, _>(index).map_err(decode_err)?),
        "INT8" => Value::from(row.try_get::<i64, _>(index).map_err(decode_err)?),
        "FLOAT4" => Value::from(f64::from(
            row.try_get::<f32, _>(index).map_err(decode_err)?,
        )),
        "FLOAT8" => Value::from(row.try_get::<f64, _>(index).map_err(decode_err)?),
        "NUMERIC" => Value::String(
            row.try_get::<BigDecimal, _>(index)
                .map_err(decode_err)?
                .to_string(),
        ),
        "TIMESTAMPTZ" => Value::String(
            row.try_get::<DateTime<Utc>, _>(index)
                .map_err(decode_err)?
                .to_rfc3339(),
        ),
        "TIMESTAMP" => Value::String(
            row.try_get::<NaiveDateTime, _>(index)
                .map_err(decode_err)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        "DATE" => Value::String(
            row.try_get::<NaiveDate, _>(index)
                .map_err(decode_err)?
                .to_string(),
        ),
        "TIME" => Value::String(
            row.try_get::<NaiveTime, _>(index)
                .map_err(decode_err)?
                .to_string(),
        ),
        "UUID" => Value::String(
            row.try_get::<sqlx::types::Uuid, _>(index)
                .map_err(decode_err)?
                .to_string(),
        ),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index).map_err(decode_err)?,
        "BYTEA" => {
            let bytes = row.try_get::<Vec<u8>, _>(index).map_err(decode_err)?;
            Value::String(format!(
                "base64:{}",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            ))
        }
        _ => match row.try_get::<String, _>(index) {
            Ok(text) => Value::String(text),
            Err(e) => {
                tracing::warn!(
                    "Column '{}' has unsupported type {}; exporting null: {}",
                    name,
                    type_name,
                    e
                );
                Value::Null
            }
        },
    };
    Ok(value)
}
