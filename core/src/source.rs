//! # Range Sources
//!
//! Where the list of published CIDR blocks comes from: the provider's HTTP
//! endpoint, or a local copy of it. Both use the same plain-text format, one
//! block per line.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rangeping_common::network::range::AddressRange;
use thiserror::Error;
use tracing::{debug, info};

pub const CLOUDFLARE_IPV4_URL: &str = "https://www.cloudflare.com/ips-v4";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("the range list is empty")]
    Empty,
}

#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<AddressRange>, SourceError>;
}

/// The published list, downloaded over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpRangeSource {
    url: String,
}

impl HttpRangeSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn download(&self) -> Result<String, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

impl Default for HttpRangeSource {
    fn default() -> Self {
        Self::new(CLOUDFLARE_IPV4_URL)
    }
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    async fn fetch(&self) -> Result<Vec<AddressRange>, SourceError> {
        info!("Fetching ranges from {}", self.url);
        let body = self.download().await.map_err(|source| SourceError::Http {
            url: self.url.clone(),
            source,
        })?;
        parse_range_list(&body)
    }
}

/// A local file in the published format.
#[derive(Debug, Clone)]
pub struct FileRangeSource {
    path: PathBuf,
}

impl FileRangeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RangeSource for FileRangeSource {
    async fn fetch(&self) -> Result<Vec<AddressRange>, SourceError> {
        debug!("Reading ranges from {}", self.path.display());
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        parse_range_list(&body)
    }
}

/// Splits a range list into blocks: one per line, trimmed, blank lines skipped.
///
/// Lines are not validated here; a malformed block simply expands to nothing.
pub fn parse_range_list(body: &str) -> Result<Vec<AddressRange>, SourceError> {
    let ranges: Vec<AddressRange> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(AddressRange::new)
        .collect();

    if ranges.is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(ranges)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
