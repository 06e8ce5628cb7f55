//! One-shot scraping of the rendered queue page.
//!
//! The page embeds the initial queue document as a JavaScript string
//! assignment with HTML-escaped quotes:
//!
//! ```text
//! var queueOnlineDataFirst = '{&quot;currentQueue&quot;:{...}}';
//! ```

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::{Result, SourceError};
use crate::payload::decode_snapshot;
use crate::snapshot::{QueueSnapshot, SnapshotSource};

static QUEUE_DATA_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)var\s+queueOnlineDataFirst\s*=\s*'((?:[^'\\]|\\.)*)'\s*;").unwrap()
});

const QUEUE_DATA_MARKER: &str = "queueOnlineDataFirst";

/// A source that can produce one snapshot per call.
#[async_trait]
pub trait QueuePage: Send + Sync {
    /// Fetch and decode the page once. Never touches any store.
    async fn fetch_once(&self) -> Result<QueueSnapshot>;
}

pub struct ScrapeClient {
    client: Client,
    page_url: Url,
    timeout: Duration,
}

impl ScrapeClient {
    pub fn new(client: Client, page_url: &str, timeout: Duration) -> Result<Self> {
        let page_url =
            Url::parse(page_url).map_err(|e| SourceError::InvalidUrl(format!("{page_url}: {e}")))?;
        Ok(Self {
            client,
            page_url,
            timeout,
        })
    }

    pub fn page_url(&self) -> &Url {
        &self.page_url
    }

    async fn get_page(&self) -> Result<String> {
        let response = self.client.get(self.page_url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl QueuePage for ScrapeClient {
    async fn fetch_once(&self) -> Result<QueueSnapshot> {
        let html = tokio::time::timeout(self.timeout, self.get_page())
            .await
            .map_err(|_| SourceError::Timeout(self.timeout))??;

        debug!(url = %self.page_url, bytes = html.len(), "Fetched queue page");
        parse_page(&html)
    }
}

/// Locate the embedded assignment and return its raw (still escaped) text.
pub fn extract_embedded_state(html: &str) -> Result<&str> {
    if !html.contains(QUEUE_DATA_MARKER) {
        return Err(SourceError::NotFound);
    }

    QUEUE_DATA_REGEX
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| SourceError::decode("queue data marker present but assignment malformed"))
}

/// Undo the HTML entity and JavaScript quote escaping applied by the page.
pub fn unescape_embedded(raw: &str) -> String {
    raw.replace("\\'", "'")
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Parse a full page into a `scraped` snapshot.
pub fn parse_page(html: &str) -> Result<QueueSnapshot> {
    let raw = extract_embedded_state(html)?;
    let json = unescape_embedded(raw);
    decode_snapshot(&json, SnapshotSource::Scraped)
}
