//! Resource fetching.
//!
//! The [`Transport`] trait is the I/O boundary of the client: it retrieves one
//! document and reports the expiry declared by the server. It knows nothing
//! about caching. [`HttpTransport`] is the production implementation; tests
//! substitute their own.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{CACHE_CONTROL, EXPIRES, HeaderMap, HeaderValue, REFERER};
use tracing::{debug, info, instrument};

use crate::config::{ClientConfig, MAX_CACHE_SECS};
use crate::error::{Error, Result};

/// A retrieved document.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDocument {
    /// HTTP status code (200 for `file:` URLs).
    pub status: u16,

    /// Raw document bytes.
    pub body: Vec<u8>,

    /// Expiry from the server's cache directive, if it sent one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl FetchedDocument {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Retrieves documents by URL.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url`.
    ///
    /// Fails with [`Error::Retrieval`] when the resource cannot be reached.
    /// A response with a non-success status is still returned; judging it is
    /// up to the caller.
    async fn fetch(&self, url: &str) -> Result<FetchedDocument>;
}

/// `reqwest`-backed transport.
///
/// User agent, referer and timeout are fixed when the transport is built and
/// apply to every request it makes.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport from client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(referer) = &config.referer {
            let value = HeaderValue::from_str(referer)
                .map_err(|e| Error::Config(format!("invalid referer '{referer}': {e}")))?;
            headers.insert(REFERER, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("could not build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    async fn fetch_file(&self, url: &str, path: &str) -> Result<FetchedDocument> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| Error::retrieval(url, e))?;
        debug!(path, bytes = body.len(), "Read local document");

        Ok(FetchedDocument {
            status: 200,
            body,
            expires_at: None,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<FetchedDocument> {
        if let Some(path) = local_path(url) {
            return self.fetch_file(url, path).await;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::retrieval(url, e))?;

        let status = response.status().as_u16();
        let expires_at = cache_expiry(response.headers(), Utc::now());
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::retrieval(url, e))?
            .to_vec();

        info!(
            status,
            bytes = body.len(),
            expires_at = ?expires_at,
            "Fetched document"
        );

        Ok(FetchedDocument {
            status,
            body,
            expires_at,
        })
    }
}

/// Filesystem path of a `file:` URL.
fn local_path(url: &str) -> Option<&str> {
    url.strip_prefix("file://")
        .or_else(|| url.strip_prefix("file:"))
}

/// Expiry declared by response headers.
///
/// `Cache-Control` wins over `Expires`, and within it `no-cache` or
/// `no-store` win over `max-age` wherever they appear. Those directives and
/// an unparsable `Expires` all mean the document is already stale.
/// `max-age` is capped at [`MAX_CACHE_SECS`].
pub fn cache_expiry(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(directives) = headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()) {
        let directives: Vec<String> = directives
            .split(',')
            .map(|d| d.trim().to_ascii_lowercase())
            .collect();

        if directives.iter().any(|d| d == "no-cache" || d == "no-store") {
            return Some(now);
        }
        if let Some(max_age) = directives
            .iter()
            .find_map(|d| d.strip_prefix("max-age=").and_then(parse_max_age))
        {
            return Some(now.checked_add_signed(max_age).unwrap_or(now));
        }
    }

    let expires = headers.get(EXPIRES)?;
    let parsed = expires
        .to_str()
        .ok()
        .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok());

    Some(parsed.map(|dt| dt.with_timezone(&Utc)).unwrap_or(now))
}

/// Delta-seconds of a `max-age` directive, capped at [`MAX_CACHE_SECS`].
fn parse_max_age(value: &str) -> Option<TimeDelta> {
    let digits = value.trim_matches('"');
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Too many digits for u64 still means "longer than the cap".
    let seconds = digits.parse::<u64>().unwrap_or(u64::MAX);
    let capped = i64::try_from(seconds).unwrap_or(i64::MAX).min(MAX_CACHE_SECS);
    TimeDelta::try_seconds(capped)
}
