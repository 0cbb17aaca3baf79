//! Paginated HTTP reader.
//!
//! Pages `1..=max_pages` are requested concurrently, at most
//! `max_concurrency` at a time. A page that times out or fails contributes no
//! rows and is logged; it never fails the whole read. Results are
//! concatenated in page order regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HttpReaderConfig;
use crate::error::FetchPosition;
use crate::models::{HttpSource, LazyTable, Table};
use crate::{FetchportError, Result};

/// One JSON object per row.
pub type Record = Map<String, Value>;

/// Parses and checks the base URL of an HTTP source.
///
/// # Errors
/// Returns a validation error unless the URL is absolute http(s).
pub fn parse_base_url(base_url: &str) -> Result<Url> {
    let url = Url::parse(base_url.trim()).map_err(|e| {
        FetchportError::validation(format!("invalid base_url: {}", e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchportError::validation(format!(
            "base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Scheme, host, port and path of a URL, for logs.
///
/// Userinfo and the query string are left out, since either may carry
/// credentials or API keys.
pub fn endpoint_for_log(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, url.path()),
        None => format!("{}://{}{}", url.scheme(), host, url.path()),
    }
}

/// `base_url?page=N&limit=size`, keeping any query the base already has.
pub fn page_url(base: &Url, page: u32, page_size: u32) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("page", &page.to_string())
        .append_pair("limit", &page_size.to_string());
    url
}

/// Reads all pages of an HTTP source into one table.
///
/// # Errors
/// Only setup failures are returned: an invalid base URL or an HTTP client
/// that cannot be built. Page-level failures degrade to empty pages.
pub async fn read_http(source: &HttpSource, config: &HttpReaderConfig) -> Result<LazyTable> {
    let base = parse_base_url(&source.base_url)?;
    let timeout = config.request_timeout();
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| FetchportError::connection("Failed to build HTTP client", e))?;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let mut handles = Vec::new();

    for page in 1..=config.max_pages {
        let client = client.clone();
        let semaphore = Arc::clone(&semaphore);
        let url = page_url(&base, page, config.page_size);

        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| FetchportError::fetch("HTTP page semaphore closed", e))?;
            fetch_page(&client, url, page, timeout).await
        }));
    }

    let mut records: Vec<Record> = Vec::new();
    let mut first_empty_page: Option<u32> = None;

    let outcomes = futures::future::join_all(handles).await;
    for (page, outcome) in (1..=config.max_pages).zip(outcomes) {
        let page_records = match outcome {
            Ok(Ok(page_records)) => page_records,
            Ok(Err(e)) => {
                warn!("Page {} contributes no rows: {}", page, e);
                Vec::new()
            }
            Err(e) => {
                warn!("Page {} task failed: {}", page, e);
                Vec::new()
            }
        };

        if page_records.is_empty() {
            first_empty_page.get_or_insert(page);
        } else if let Some(empty) = first_empty_page {
            debug!(
                "Page {} returned rows after empty page {}; keeping them",
                page, empty
            );
        }
        records.extend(page_records);
    }

    info!(
        "Fetched {} records from {} (pages 1..={})",
        records.len(),
        endpoint_for_log(&base),
        config.max_pages
    );
    Ok(LazyTable::from_table(Table::from_records(records)))
}

/// Fetches one page and parses it as a JSON array of objects.
///
/// A `null` body counts as an empty page.
///
/// # Errors
/// Returns [`FetchportError::FetchTimeout`] on timeout and
/// [`FetchportError::Fetch`] for transport, status or body errors.
pub async fn fetch_page(
    client: &reqwest::Client,
    url: Url,
    page: u32,
    timeout: Duration,
) -> Result<Vec<Record>> {
    debug!("Requesting page {} from {}", page, endpoint_for_log(&url));

    let classify = |e: reqwest::Error| {
        let e = e.without_url();
        if e.is_timeout() {
            FetchportError::FetchTimeout {
                position: FetchPosition::Page(page),
                timeout,
            }
        } else {
            FetchportError::fetch(format!("Request for page {} failed", page), e)
        }
    };

    let response = client.get(url).send().await.map_err(classify)?;
    let response = response.error_for_status().map_err(classify)?;
    let body: Value = response.json().await.map_err(classify)?;

    match body {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                other => Err(FetchportError::Fetch {
                    context: format!("Page {} contains a non-object record", page),
                    source: format!("unexpected value {}", other).into(),
                }),
            })
            .collect(),
        _ => Err(FetchportError::Fetch {
            context: format!("Page {} body is not a JSON array", page),
            source: "expected an array of records".into(),
        }),
    }
}
