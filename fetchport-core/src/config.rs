//! Runtime configuration for readers and exporters.
//!
//! Values come from an optional JSON file; any key left out falls back to
//! its default. CLI flags override individual values through the `with_*`
//! builders.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{FetchportError, Result};

/// Default number of rows per external SQL chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 10_000;

/// Settings for the chunked external SQL reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalReaderConfig {
    /// Rows requested per chunk
    pub chunk_size: u64,
    /// Deadline for a single chunk query, in seconds
    pub query_timeout_secs: u64,
    /// Deadline for opening the connection, in seconds
    pub connect_timeout_secs: u64,
}

impl Default for ExternalReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            query_timeout_secs: 30,
            connect_timeout_secs: 30,
        }
    }
}

impl ExternalReaderConfig {
    /// Per-chunk deadline.
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Connection deadline.
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Settings for the paginated HTTP reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpReaderConfig {
    /// Highest page number requested (pages are 1-based)
    pub max_pages: u32,
    /// Value of the `limit` query parameter
    pub page_size: u32,
    /// Simultaneous in-flight page requests
    pub max_concurrency: usize,
    /// Deadline for a single page request, in seconds
    pub request_timeout_secs: u64,
}

impl Default for HttpReaderConfig {
    fn default() -> Self {
        Self {
            max_pages: 10,
            page_size: 100,
            max_concurrency: 10,
            request_timeout_secs: 30,
        }
    }
}

impl HttpReaderConfig {
    /// Per-page deadline.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Top-level configuration.
///
/// # Example
/// ```rust
/// use fetchport_core::config::FetchportConfig;
///
/// let config = FetchportConfig::default()
///     .with_chunk_size(500)
///     .with_temp_dir("/tmp/fetchport-test");
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.external.chunk_size, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchportConfig {
    /// Root directory for task output files
    #[serde(alias = "TEMP_DIR")]
    pub temp_dir: PathBuf,
    /// External SQL reader settings
    pub external: ExternalReaderConfig,
    /// HTTP reader settings
    pub http: HttpReaderConfig,
}

impl Default for FetchportConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("fetchport"),
            external: ExternalReaderConfig::default(),
            http: HttpReaderConfig::default(),
        }
    }
}

impl FetchportConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be read and a serialization
    /// error if it is not valid configuration JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FetchportError::io(
                format!("Failed to read configuration file {}", path.display()),
                e,
            )
        })?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|e| FetchportError::Serialization {
                context: format!("Invalid configuration file {}", path.display()),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values.
    ///
    /// # Errors
    /// Returns a validation error for zero sizes, counts or timeouts.
    pub fn validate(&self) -> Result<()> {
        if self.temp_dir.as_os_str().is_empty() {
            return Err(FetchportError::validation("temp_dir cannot be empty"));
        }

        if self.external.chunk_size == 0 {
            return Err(FetchportError::validation(
                "external.chunk_size must be greater than 0",
            ));
        }

        if self.external.query_timeout_secs == 0 {
            return Err(FetchportError::validation(
                "external.query_timeout_secs must be greater than 0",
            ));
        }

        if self.external.connect_timeout_secs == 0 {
            return Err(FetchportError::validation(
                "external.connect_timeout_secs must be greater than 0",
            ));
        }

        if self.http.max_pages == 0 {
            return Err(FetchportError::validation(
                "http.max_pages must be greater than 0",
            ));
        }

        if self.http.page_size == 0 {
            return Err(FetchportError::validation(
                "http.page_size must be greater than 0",
            ));
        }

        if self.http.max_concurrency == 0 {
            return Err(FetchportError::validation(
                "http.max_concurrency must be greater than 0",
            ));
        }

        if self.http.request_timeout_secs == 0 {
            return Err(FetchportError::validation(
                "http.request_timeout_secs must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Builder method to set the output root.
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    /// Builder method to set the external chunk size.
    pub const fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.external.chunk_size = chunk_size;
        self
    }

    /// Builder method to set the per-chunk query timeout.
    pub const fn with_query_timeout_secs(mut self, secs: u64) -> Self {
        self.external.query_timeout_secs = secs;
        self
    }

    /// Builder method to set the HTTP page bounds.
    pub const fn with_http_pages(mut self, max_pages: u32, page_size: u32) -> Self {
        self.http.max_pages = max_pages;
        self.http.page_size = page_size;
        self
    }

    /// Builder method to set the HTTP concurrency limit.
    pub const fn with_http_concurrency(mut self, max_concurrency: usize) -> Self {
        self.http.max_concurrency = max_concurrency;
        self
    }

    /// Builder method to set the per-page HTTP timeout.
    pub const fn with_http_timeout_secs(mut self, secs: u64) -> Self {
        self.http.request_timeout_secs = secs;
        self
    }
}
