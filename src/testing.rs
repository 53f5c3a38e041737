//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::transport::{FetchedDocument, Transport};

pub const TEST_BASE_URL: &str = "http://api.test/0.2/";

/// Configuration pointing at [`TEST_BASE_URL`] with the disk cache off.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        base_url: TEST_BASE_URL.to_string(),
        use_disk_cache: false,
        ..ClientConfig::default()
    }
}

/// Transport serving scripted responses and counting requests per URL.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, Result<FetchedDocument>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 from `url`.
    pub fn respond(&self, url: &str, body: impl Into<Vec<u8>>, expires_at: Option<DateTime<Utc>>) {
        self.respond_with(
            url,
            Ok(FetchedDocument {
                status: 200,
                body: body.into(),
                expires_at,
            }),
        );
    }

    pub fn respond_with(&self, url: &str, response: Result<FetchedDocument>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// Make `url` unreachable.
    pub fn fail(&self, url: &str) {
        self.respond_with(url, Err(Error::retrieval(url, "connection refused")));
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;

        // Give concurrent readers a chance to pile up behind the fetch.
        tokio::task::yield_now().await;

        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(Error::retrieval(url, "no response scripted")))
    }
}
