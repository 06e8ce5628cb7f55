//! Shared HTTP client construction.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

/// Desktop Chrome user agent; the upstream rejects obvious bots.
pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Headers sent with every upstream request.
const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("accept-language", "th-TH,th;q=0.9,en;q=0.8"),
    ("cache-control", "no-cache"),
    ("pragma", "no-cache"),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-user", "?1"),
    ("upgrade-insecure-requests", "1"),
    (
        "sec-ch-ua",
        "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
    ),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
];

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(BROWSER_HEADERS.len());
    for (name, value) in BROWSER_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    headers
}

/// Options for the shared upstream client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// TCP/TLS connect timeout. Whole-request timeouts are set per request,
    /// since the push stream is long-lived.
    pub connect_timeout: Duration,
    /// Accept invalid upstream certificates. The government host has served
    /// broken chains before.
    pub accept_invalid_certs: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            accept_invalid_certs: false,
        }
    }
}

/// Builder preconfigured for the upstream: browser headers, keep-alive and
/// a connect timeout.
pub fn create_client_builder(options: &ClientOptions) -> reqwest::ClientBuilder {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(DEFAULT_UA)
        .default_headers(default_headers())
        .connect_timeout(options.connect_timeout)
        .tcp_keepalive(Duration::from_secs(30))
        .pool_max_idle_per_host(10);

    if options.accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
}

pub fn build_client(options: &ClientOptions) -> crate::Result<reqwest::Client> {
    Ok(create_client_builder(options).build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers() {
        let headers = default_headers();
        assert_eq!(headers.get("accept-language").unwrap(), "th-TH,th;q=0.9,en;q=0.8");
        assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
        assert_eq!(headers.len(), BROWSER_HEADERS.len());
    }

    #[test]
    fn test_build_client() {
        let options = ClientOptions {
            accept_invalid_certs: true,
            ..Default::default()
        };
        assert!(build_client(&options).is_ok());
    }
}
