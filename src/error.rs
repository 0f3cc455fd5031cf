//! Error types shared by the relay server and the terminal client.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::protocol::ErrorBody;

/// Failures of the upstream completion source
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Upstream answered with a non-success status
    #[error("Upstream HTTP error (status {status}): {body}")]
    Http { status: u16, body: String },

    /// Connection, TLS or body transfer failures
    #[error("Upstream transport error: {0}")]
    Transport(String),

    /// Malformed server-sent event framing
    #[error("Upstream stream error: {0}")]
    Stream(String),

    /// JSON encoding/decoding issues
    #[error("Upstream serialization error: {0}")]
    Serialization(String),

    /// Error object reported in-band by the provider
    #[error("Upstream provider error: {0}")]
    Provider(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => UpstreamError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => UpstreamError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        UpstreamError::Serialization(err.to_string())
    }
}

/// Errors surfaced by the HTTP handlers before any response body is committed
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidRequest(String),

    /// Buffered completion failed
    #[error("{0}")]
    Upstream(UpstreamError),

    /// The upstream stream could not be opened
    #[error("{0}")]
    StreamOpen(UpstreamError),

    #[error("{0}")]
    Multipart(#[from] MultipartError),

    #[error("Failed to store upload: {0}")]
    Storage(#[from] std::io::Error),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream(_) | RelayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::StreamOpen(_) => StatusCode::BAD_GATEWAY,
            RelayError::Multipart(err) => err.status(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Startup configuration problems; the process exits before binding.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Missing NVIDIA_API_KEY in environment. Create a .env file and add NVIDIA_API_KEY=your_key"
    )]
    MissingApiKey,
}

/// Failures seen by the terminal client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context}: {status} - {body}")]
    Rejected {
        context: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: String,
        source: std::io::Error,
    },
}
