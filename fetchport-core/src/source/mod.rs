//! Source readers.
//!
//! Every backend produces a [`LazyTable`]; [`read_source`] is the single
//! dispatch point over [`SourceDescriptor`].

pub mod connection;
#[cfg(feature = "sqlite")]
pub mod embedded;
pub mod external;
pub mod http;

use tracing::info;

use crate::config::FetchportConfig;
use crate::models::{LazyTable, SourceDescriptor};
use crate::Result;

/// Reads rows from whichever backend `source` describes.
///
/// # Errors
/// Propagates the reader's error. HTTP page failures are absorbed by the
/// HTTP reader and never surface here.
pub async fn read_source(source: &SourceDescriptor, config: &FetchportConfig) -> Result<LazyTable> {
    info!("Reading from {}", source.label());
    match source {
        SourceDescriptor::External(db) => external::read_external(db, &config.external).await,
        SourceDescriptor::Embedded(db) => read_embedded_source(db).await,
        SourceDescriptor::Http(http_source) => http::read_http(http_source, &config.http).await,
    }
}

#[cfg(feature = "sqlite")]
async fn read_embedded_source(db: &crate::models::EmbeddedDatabase) -> Result<LazyTable> {
    embedded::read_embedded(db).await
}

#[cfg(not(feature = "sqlite"))]
async fn read_embedded_source(_db: &crate::models::EmbeddedDatabase) -> Result<LazyTable> {
    Err(crate::FetchportError::missing_driver("sqlite"))
}
