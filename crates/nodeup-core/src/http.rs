//! Blocking HTTP retrieval behind a narrow trait.
//!
//! Genesis resolution, release resolution and artifact downloads all go
//! through [`HttpFetch`] so they can be exercised against in-memory fakes.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single HTTP retrieval.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Connection, TLS or timeout failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not complete within its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Server answered with a non-success status.
    #[error("HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
}

/// Retrieves a URL body.
pub trait HttpFetch: Send + Sync {
    /// Performs a GET and returns the body of a 2xx response.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure, timeout or non-2xx status.
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

/// Production fetcher backed by `reqwest`'s blocking client.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestFetcher {
    /// Builds a fetcher with a bounded connect timeout.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the HTTP client cannot be initialized.
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("nodeup/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetch for ReqwestFetcher {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|e| classify(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| classify(&e, timeout))
    }
}

fn classify(err: &reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Transport(err.to_string())
    }
}

/// Joins a base URL and a path segment with exactly one slash.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
