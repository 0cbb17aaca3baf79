//! Chunked reader for server databases.
//!
//! A query is fetched window by window until the first empty chunk. Each
//! chunk has its own deadline; a timeout is reported with the offset it
//! happened at and discards everything fetched so far.

pub mod pagination;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgresql")]
mod postgres;
#[cfg(feature = "mssql")]
mod sqlserver;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::ExternalReaderConfig;
use crate::error::FetchPosition;
use crate::models::{DatabaseType, ExternalDatabase, LazyTable, Table};
use crate::source::connection::build_connection_string;
use crate::{FetchportError, Result};

pub use pagination::{ChunkPlan, PaginationStyle};

/// An open connection able to run one chunk query at a time.
#[async_trait]
pub trait ChunkSource: Send {
    /// Runs a complete chunk query and returns its rows with column names.
    async fn fetch_chunk(&mut self, sql: &str) -> Result<Table>;

    /// Releases the underlying connection.
    async fn close(&mut self) {}
}

/// Reads `query` from `source` chunk by chunk.
///
/// Offsets advance by `chunk_size` and the loop stops at the first chunk
/// with no rows. For a result of exactly `k * chunk_size` rows this issues
/// `k + 1` requests; for an empty result, one.
///
/// # Errors
/// Returns [`FetchportError::FetchTimeout`] with the offending offset when a
/// chunk exceeds `query_timeout`, or the source's own error otherwise.
pub async fn read_chunked<S>(
    source: &mut S,
    db_type: &DatabaseType,
    query: &str,
    config: &ExternalReaderConfig,
) -> Result<LazyTable>
where
    S: ChunkSource + ?Sized,
{
    if config.chunk_size == 0 {
        return Err(FetchportError::validation("chunk_size must be greater than 0"));
    }

    let plan = ChunkPlan::new(db_type, query)?;
    let timeout = config.query_timeout();
    let mut chunks: Vec<Table> = Vec::new();
    let mut offset: u64 = 0;
    let mut total_rows: usize = 0;

    loop {
        let sql = plan.chunk_sql(offset, config.chunk_size);
        debug!("Fetching chunk at offset {}", offset);

        let chunk = match tokio::time::timeout(timeout, source.fetch_chunk(&sql)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchportError::FetchTimeout {
                    position: FetchPosition::Offset(offset),
                    timeout,
                });
            }
        };

        if chunk.row_count() == 0 {
            // Keep the schema of an empty result.
            if chunks.is_empty() {
                chunks.push(chunk);
            }
            break;
        }

        total_rows = total_rows.saturating_add(chunk.row_count());
        chunks.push(chunk);
        offset = offset.saturating_add(config.chunk_size);
    }

    info!(
        "Fetched {} rows in {} chunks from {} source",
        total_rows,
        chunks.len(),
        db_type
    );
    Ok(LazyTable::from_chunks(chunks))
}

/// Connects to an external database and reads its query in chunks.
///
/// The connection is released whether or not the read succeeds.
///
/// # Errors
/// Returns a connection error when the dialect has no compiled-in driver or
/// the connection cannot be opened, and any error of [`read_chunked`].
pub async fn read_external(db: &ExternalDatabase, config: &ExternalReaderConfig) -> Result<LazyTable> {
    let connection = build_connection_string(db)?;
    info!("Reading {} source {}", db.db_type, connection.masked());

    let mut source = open_chunk_source(db, &connection, config).await?;
    read_then_close(source.as_mut(), &db.db_type, &db.query, config).await
}

/// Runs [`read_chunked`] and closes `source` whatever the outcome.
///
/// # Errors
/// Returns the error of [`read_chunked`] after the source is closed.
pub async fn read_then_close<S>(
    source: &mut S,
    db_type: &DatabaseType,
    query: &str,
    config: &ExternalReaderConfig,
) -> Result<LazyTable>
where
    S: ChunkSource + ?Sized,
{
    let result = read_chunked(source, db_type, query, config).await;
    source.close().await;
    result
}

#[allow(unused_variables)]
async fn open_chunk_source(
    db: &ExternalDatabase,
    connection: &crate::source::connection::ConnectionString,
    config: &ExternalReaderConfig,
) -> Result<Box<dyn ChunkSource>> {
    match &db.db_type {
        #[cfg(feature = "postgresql")]
        DatabaseType::PostgreSQL => Ok(Box::new(
            postgres::PostgresChunkSource::connect(connection, config).await?,
        )),
        #[cfg(feature = "mysql")]
        DatabaseType::MySQL => Ok(Box::new(
            mysql::MySqlChunkSource::connect(connection, config).await?,
        )),
        #[cfg(feature = "mssql")]
        DatabaseType::SqlServer => Ok(Box::new(
            sqlserver::SqlServerChunkSource::connect(db, connection, config).await?,
        )),
        other => Err(FetchportError::missing_driver(other.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    /// In-memory source that serves windows of a fixed row set.
    struct MockChunkSource {
        rows: Vec<i64>,
        chunk_size: usize,
        issued: Vec<String>,
        stall_at_call: Option<usize>,
        closed: bool,
    }

    impl MockChunkSource {
        fn new(row_count: i64, chunk_size: usize) -> Self {
            Self {
                rows: (0..row_count).collect(),
                chunk_size,
                issued: Vec::new(),
                stall_at_call: None,
                closed: false,
            }
        }
    }

    #[async_trait]
    impl ChunkSource for MockChunkSource {
        async fn fetch_chunk(&mut self, sql: &str) -> Result<Table> {
            let call = self.issued.len();
            self.issued.push(sql.to_string());
            if self.stall_at_call == Some(call) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let start = call * self.chunk_size;
            let rows = self
                .rows
                .iter()
                .skip(start)
                .take(self.chunk_size)
                .map(|n| vec![json!(n)])
                .collect();
            Table::from_rows(vec!["n".to_string()], rows)
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    fn config(chunk_size: u64) -> ExternalReaderConfig {
        ExternalReaderConfig {
            chunk_size,
            query_timeout_secs: 5,
            connect_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_exact_multiple_issues_k_plus_one_requests() {
        let mut source = MockChunkSource::new(30, 10);
        let lazy = read_chunked(&mut source, &DatabaseType::PostgreSQL, "SELECT n FROM t", &config(10))
            .await
            .unwrap();

        assert_eq!(source.issued.len(), 4);
        assert!(source.issued[3].ends_with("LIMIT 10 OFFSET 30"));
        let table = lazy.collect().unwrap();
        assert_eq!(table.row_count(), 30);
        assert_eq!(table.rows()[29], vec![json!(29)]);
    }

    #[tokio::test]
    async fn test_partial_last_chunk() {
        let mut source = MockChunkSource::new(25, 10);
        let table = read_chunked(&mut source, &DatabaseType::MySQL, "SELECT n FROM t;", &config(10))
            .await
            .unwrap()
            .collect()
            .unwrap();

        assert_eq!(table.row_count(), 25);
        assert_eq!(source.issued.len(), 4);
        assert!(source.issued.iter().all(|sql| !sql.contains(';')));
    }

    #[tokio::test]
    async fn test_empty_source_issues_one_request() {
        let mut source = MockChunkSource::new(0, 10);
        let table = read_chunked(&mut source, &DatabaseType::PostgreSQL, "SELECT n FROM t", &config(10))
            .await
            .unwrap()
            .collect()
            .unwrap();

        assert_eq!(source.issued.len(), 1);
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.columns(), ["n"]);
    }

    #[tokio::test]
    async fn test_mssql_chunk_queries_are_ordered() {
        let mut source = MockChunkSource::new(5, 10);
        read_chunked(&mut source, &DatabaseType::SqlServer, "SELECT n FROM t", &config(10))
            .await
            .unwrap();

        assert_eq!(
            source.issued[0],
            "SELECT n FROM t ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        assert_eq!(
            source.issued[1],
            "SELECT n FROM t ORDER BY (SELECT NULL) OFFSET 10 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_offset() {
        let mut source = MockChunkSource::new(50, 10);
        source.stall_at_call = Some(2);

        let error = read_chunked(&mut source, &DatabaseType::PostgreSQL, "SELECT n FROM t", &config(10))
            .await
            .unwrap_err();

        match error {
            FetchportError::FetchTimeout { position, timeout } => {
                assert_eq!(position, FetchPosition::Offset(20));
                assert_eq!(timeout, Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let mut source = MockChunkSource::new(5, 10);
        let result = read_chunked(&mut source, &DatabaseType::PostgreSQL, "SELECT 1", &config(0)).await;
        assert!(matches!(result, Err(FetchportError::Validation { .. })));
        assert!(source.issued.is_empty());
        assert!(!source.closed);
    }

    #[tokio::test]
    async fn test_source_closed_after_read() {
        let mut source = MockChunkSource::new(3, 10);
        let lazy = read_then_close(&mut source, &DatabaseType::SqlServer, "SELECT n FROM t", &config(10))
            .await
            .unwrap();

        assert_eq!(lazy.collect().unwrap().row_count(), 3);
        assert!(source.closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_closed_after_timeout() {
        let mut source = MockChunkSource::new(30, 10);
        source.stall_at_call = Some(1);

        let error = read_then_close(&mut source, &DatabaseType::SqlServer, "SELECT n FROM t", &config(10))
            .await
            .unwrap_err();

        assert!(matches!(error, FetchportError::FetchTimeout { .. }));
        assert!(source.closed);
    }

    #[tokio::test]
    async fn test_unknown_dialect_has_no_driver() {
        let db = ExternalDatabase {
            db_type: DatabaseType::Other("oracle".to_string()),
            username: "scott".to_string(),
            password: crate::security::SecretString::new("tiger"),
            host: "localhost".to_string(),
            port: 1521,
            database: "orcl".to_string(),
            query: "SELECT 1 FROM dual".to_string(),
            driver: None,
            params: Default::default(),
        };

        let error = read_external(&db, &config(10)).await.unwrap_err();
        assert!(matches!(error, FetchportError::Connection { .. }));
        assert!(!error.to_string().contains("tiger"));
    }
}
