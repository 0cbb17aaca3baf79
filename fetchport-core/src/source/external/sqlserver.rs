//! SQL Server chunk source over tiberius.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use super::ChunkSource;
use crate::config::ExternalReaderConfig;
use crate::models::{ExternalDatabase, Table};
use crate::source::connection::ConnectionString;
use crate::{FetchportError, Result};

pub(super) struct SqlServerChunkSource {
    /// `None` once the session has been closed.
    client: Option<Client<Compat<TcpStream>>>,
}

impl SqlServerChunkSource {
    pub(super) async fn connect(
        db: &ExternalDatabase,
        connection: &ConnectionString,
        config: &ExternalReaderConfig,
    ) -> Result<Self> {
        let mut tds = Config::new();
        tds.host(&db.host);
        tds.port(db.port);
        tds.database(&db.database);
        tds.authentication(AuthMethod::sql_server(&db.username, db.password.expose()));
        if db
            .params
            .get("TrustServerCertificate")
            .or_else(|| db.params.get("trust_server_certificate"))
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        {
            tds.trust_cert();
        }

        let connect_failed = |e: std::io::Error| {
            FetchportError::connection(format!("Failed to connect to {}", connection.masked()), e)
        };

        let tcp = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(tds.get_addr()))
            .await
            .map_err(|_| {
                connect_failed(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connection attempt timed out",
                ))
            })?
            .map_err(connect_failed)?;
        tcp.set_nodelay(true).map_err(connect_failed)?;

        let client = Client::connect(tds, tcp.compat_write())
            .await
            .map_err(|e| {
                FetchportError::connection(
                    format!("Failed to open session on {}", connection.masked()),
                    e,
                )
            })?;
        Ok(Self {
            client: Some(client),
        })
    }
}

#[async_trait]
impl ChunkSource for SqlServerChunkSource {
    async fn fetch_chunk(&mut self, sql: &str) -> Result<Table> {
        let client = self.client.as_mut().ok_or_else(|| FetchportError::Fetch {
            context: "SQL Server chunk query failed".to_string(),
            source: "session already closed".into(),
        })?;
        let mut stream = client
            .simple_query(sql)
            .await
            .map_err(|e| FetchportError::fetch("SQL Server chunk query failed", e))?;

        let columns: Vec<String> = stream
            .columns()
            .await
            .map_err(|e| FetchportError::fetch("Failed to read SQL Server result metadata", e))?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = stream
            .into_first_result()
            .await
            .map_err(|e| FetchportError::fetch("SQL Server chunk query failed", e))?;

        let values = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(columns.iter())
                    .map(|(data, name)| column_value(&data, name))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Table::from_rows(columns, values)
    }

    async fn close(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        match client.close().await {
            Ok(()) => debug!("SQL Server session closed"),
            Err(e) => warn!("Failed to close SQL Server session cleanly: {}", e),
        }
    }
}

fn decode<'a, T: FromSql<'a>>(data: &'a ColumnData<'static>, name: &str) -> Result<Option<T>> {
    T::from_sql(data).map_err(|e| FetchportError::decode_column(name, e))
}

/// Maps a TDS value to JSON.
fn column_value(data: &ColumnData<'static>, name: &str) -> Result<Value> {
    let value = match data {
        ColumnData::U8(v) => v.map(Value::from),
        ColumnData::I16(v) => v.map(Value::from),
        ColumnData::I32(v) => v.map(Value::from),
        ColumnData::I64(v) => v.map(Value::from),
        ColumnData::F32(v) => v.map(|f| Value::from(f64::from(f))),
        ColumnData::F64(v) => v.map(Value::from),
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| Value::String(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map(|g| Value::String(g.to_string())),
        ColumnData::Numeric(v) => v.as_ref().map(|n| Value::String(n.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|bytes| {
            Value::String(format!(
                "base64:{}",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            ))
        }),
        ColumnData::Xml(v) => v.as_ref().map(|xml| Value::String(xml.to_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            decode::<NaiveDateTime>(data, name)?
                .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
        }
        ColumnData::Date(_) => {
            decode::<NaiveDate>(data, name)?.map(|d| Value::String(d.to_string()))
        }
        ColumnData::Time(_) => {
            decode::<NaiveTime>(data, name)?.map(|t| Value::String(t.to_string()))
        }
        ColumnData::DateTimeOffset(_) => decode::<DateTime<FixedOffset>>(data, name)?
            .map(|dt| Value::String(dt.to_rfc3339())),
    };
    Ok(value.unwrap_or(Value::Null))
}
