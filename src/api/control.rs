//! AirPlay control protocol client
//!
//! Three plain HTTP requests against a receiver:
//! - `POST /play`  start streaming a URL
//! - `POST /stop`  stop playback
//! - `GET /scrub`  report position and duration

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use crate::models::{Receiver, TransportState};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Control protocol error types
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("{operation}: bad response code {status}")]
    BadStatus { operation: &'static str, status: u16 },

    #[error("{operation}: request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Malformed transport state: {0}")]
    MalformedState(String),
}

impl ControlError {
    /// Status code, for `BadStatus` errors
    pub fn status(&self) -> Option<u16> {
        match self {
            ControlError::BadStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Body of a `/play` request
pub fn play_body(url: &str) -> String {
    format!("Content-Location: {}\nStart-Position: 0.000000\n\n", url)
}

/// Control client for one receiver
///
/// Holds a pooled HTTP client for its lifetime and nothing else.
#[derive(Debug, Clone)]
pub struct ControlClient {
    base_url: String,
    client: reqwest::Client,
}

impl ControlClient {
    /// Create a client for the given receiver
    pub fn new(receiver: &Receiver) -> Self {
        Self::with_timeout(receiver, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(receiver: &Receiver, timeout: Duration) -> Self {
        Self::with_base_url(receiver.base_url(), timeout)
    }

    /// Create a client with a custom base URL (for testing)
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Tell the receiver to fetch and play `url` from the beginning
    pub async fn start_stream(&self, url: &str) -> Result<(), ControlError> {
        const OP: &str = "play";
        debug!("Starting stream of {} on {}", url, self.base_url);

        let response = self
            .client
            .post(self.url("/play"))
            .header(CONTENT_TYPE, "text/plain")
            .body(play_body(url))
            .send()
            .await
            .map_err(|source| ControlError::Transport { operation: OP, source })?;

        Self::expect_ok(OP, response).await.map(|_| ())
    }

    /// Tell the receiver to stop playback
    pub async fn stop_stream(&self) -> Result<(), ControlError> {
        const OP: &str = "stop";
        debug!("Stopping stream on {}", self.base_url);

        let response = self
            .client
            .post(self.url("/stop"))
            .body("")
            .send()
            .await
            .map_err(|source| ControlError::Transport { operation: OP, source })?;

        Self::expect_ok(OP, response).await.map(|_| ())
    }

    /// Fetch the receiver's current position and duration
    pub async fn query_state(&self) -> Result<TransportState, ControlError> {
        const OP: &str = "scrub";

        let response = self
            .client
            .get(self.url("/scrub"))
            .send()
            .await
            .map_err(|source| ControlError::Transport { operation: OP, source })?;

        let body = Self::expect_ok(OP, response).await?;
        trace!("scrub response: {:?}", body);
        Ok(TransportState::parse(&body))
    }

    /// Drain the response and fail on anything but 200
    async fn expect_ok(operation: &'static str, response: reqwest::Response) -> Result<String, ControlError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ControlError::Transport { operation, source })?;

        match status {
            StatusCode::OK => Ok(body),
            status => Err(ControlError::BadStatus {
                operation,
                status: status.as_u16(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_body_format() {
        assert_eq!(
            play_body("http://10.0.0.5:41234/song.mp3"),
            "Content-Location: http://10.0.0.5:41234/song.mp3\nStart-Position: 0.000000\n\n"
        );
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let client = ControlClient::with_base_url("http://127.0.0.1:7000/", DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(client.base_url(), "http://127.0.0.1:7000");
        assert_eq!(client.url("/scrub"), "http://127.0.0.1:7000/scrub");
    }

    #[test]
    fn test_bad_status_message() {
        let err = ControlError::BadStatus {
            operation: "play",
            status: 403,
        };
        assert_eq!(err.to_string(), "play: bad response code 403");
        assert_eq!(err.status(), Some(403));
    }
}
