use std::io::Write;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use thiserror::Error;

pub(crate) mod entries;

/// Error types for requests sent to the upstream APIs and media hosts
#[derive(Error, Debug)]
pub(crate) enum SenderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid header: {0}")]
    Header(String),
}

impl SenderError {
    /// True when the remote answered 404, or a stub had nothing for the url.
    pub(crate) fn is_not_found(&self) -> bool {
        match self {
            SenderError::Http(err) => err.status() == Some(reqwest::StatusCode::NOT_FOUND),
            SenderError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type for sender operations
pub(crate) type SenderResult<T> = Result<T, SenderError>;

/// The plain HTTP primitive every collaborator goes through.
///
/// Kept as a trait so the listing, image-host, redirect and fetch code can be exercised without a network.
pub(crate) trait HttpClient: Send + Sync {
    /// Sends a GET request and parses the body as JSON.
    ///
    /// # Arguments
    ///
    /// * `url`: The url to request.
    /// * `headers`: Extra headers to attach to this request only.
    fn get_json(&self, url: &str, headers: &[(&str, &str)]) -> SenderResult<Value>;

    /// Sends a GET request and streams the body into `sink` chunk by chunk.
    ///
    /// returns: the number of bytes written.
    fn stream_to(&self, url: &str, sink: &mut dyn Write) -> SenderResult<u64>;
}

/// Blocking request sender backed by a single pooled [Client].
#[derive(Clone, Debug)]
pub(crate) struct RequestSender {
    client: Client,
}

impl RequestSender {
    /// Creates a sender identifying itself with `user_agent`.
    pub(crate) fn new(user_agent: &str, timeout: Duration) -> SenderResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }

    fn header_map(headers: &[(&str, &str)]) -> SenderResult<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SenderError::Header(format!("{}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SenderError::Header(format!("{}: {}", name, e)))?;
            map.insert(name, value);
        }

        Ok(map)
    }
}

impl HttpClient for RequestSender {
    fn get_json(&self, url: &str, headers: &[(&str, &str)]) -> SenderResult<Value> {
        trace!("GET (json) {}", url);
        let response = self
            .client
            .get(url)
            .headers(Self::header_map(headers)?)
            .send()?
            .error_for_status()?;

        Ok(response.json::<Value>()?)
    }

    fn stream_to(&self, url: &str, sink: &mut dyn Write) -> SenderResult<u64> {
        trace!("GET (stream) {}", url);
        let mut response = self.client.get(url).send()?.error_for_status()?;
        let written = response.copy_to(sink)?;
        sink.flush()?;

        Ok(written)
    }
}
