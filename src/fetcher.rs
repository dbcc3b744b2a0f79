//! Remote content fetching.
//!
//! [`Fetcher`] is the seam between the registry and the network. The
//! provided [`HttpFetcher`] performs a single conditional GET per call with a
//! client-level timeout; retry policy belongs to the caller.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default timeout for a whole request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = concat!("k2filter/", env!("CARGO_PKG_VERSION"));

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The server returned a body
    Content {
        body: Vec<u8>,
        etag: Option<String>,
    },
    /// The server confirmed the cached copy is current (304)
    NotModified,
}

/// Fetches filter list content from a URL.
pub trait Fetcher: Send + Sync {
    /// Fetch `url`. When `etag` is given, the request is conditional and may
    /// return [`FetchOutcome::NotModified`].
    fn fetch(&self, url: &str, etag: Option<&str>) -> Result<FetchOutcome>;
}

impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    fn fetch(&self, url: &str, etag: Option<&str>) -> Result<FetchOutcome> {
        (**self).fetch(url, etag)
    }
}

/// Blocking HTTP fetcher.
pub struct HttpFetcher {
    agent: ureq::Agent,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeout and User-Agent.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a fetcher with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_config(timeout, DEFAULT_USER_AGENT)
    }

    /// Create a fetcher with a custom timeout and User-Agent.
    pub fn with_config(timeout: Duration, user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(user_agent)
            .build();
        Self { agent, timeout }
    }

    /// Get the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, etag: Option<&str>) -> Result<FetchOutcome> {
        let mut request = self.agent.get(url);
        if let Some(etag) = etag {
            request = request.set("If-None-Match", etag);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(304, _)) => return Ok(FetchOutcome::NotModified),
            Err(ureq::Error::Status(code, _)) => return Err(Error::Status(code)),
            Err(ureq::Error::Transport(t)) => return Err(Error::Fetch(t.to_string())),
        };

        match response.status() {
            304 => return Ok(FetchOutcome::NotModified),
            200..=299 => {}
            code => return Err(Error::Status(code)),
        }

        let etag = response.header("ETag").map(str::to_string);

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| Error::Fetch(format!("failed to read response: {}", e)))?;

        log::debug!("Fetched {} bytes from {}", body.len(), url);

        Ok(FetchOutcome::Content { body, etag })
    }
}
