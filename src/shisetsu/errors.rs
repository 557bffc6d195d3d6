//! Error types for the reservation-site client.
//!
//! Every failure that leaves [`ShisetsuApi::search`](super::ShisetsuApi::search)
//! is classified into [`SearchError`]. Server-side refusals are not errors at
//! this level; they travel as data in [`ProtocolError`].

use http::StatusCode;
use url::Url;

/// A single transport-level failure (one attempt).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("network error: {0}")]
    Network(String),
    /// Only produced when the caller opted into treating error statuses as failures.
    #[error("server returned {0}")]
    Status(StatusCode),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("{method} {url} failed after {attempts} attempt(s)")]
    Exhausted {
        method: http::Method,
        url: Url,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("request cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("anti-forgery token not found on the landing page")]
    TokenNotFound,
    #[error("landing page unreachable")]
    Unreachable(#[source] RequestError),
    #[error("session token expired")]
    Expired,
    #[error("session initialization cancelled")]
    Cancelled,
}

impl From<RequestError> for SessionError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Cancelled => Self::Cancelled,
            other => Self::Unreachable(other),
        }
    }
}

/// The server answered, but refused to continue processing.
///
/// Retrying does not help: the session has been rejected server-side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("server refused to continue: {message}")]
pub struct ProtocolError {
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Request(RequestError),
    #[error("Failed to parse search response")]
    InvalidResponse {
        status: u16,
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("detail page {url} returned {status}")]
    DetailStatus { url: Url, status: StatusCode },
    #[error("search cancelled")]
    Cancelled,
}

impl From<RequestError> for SearchError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Cancelled => Self::Cancelled,
            other => Self::Request(other),
        }
    }
}
