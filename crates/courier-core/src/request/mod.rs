mod engine;
mod http;
mod response;

pub use engine::{ProbeOutcome, ProgressFn, Request, RequestEngine, PROBE_RANGE};
pub use http::HttpTransport;
pub use response::{Headers, ResponseHandle, ResponseSource};

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::Method;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Request to {url} was superseded")]
    Cancelled { url: String },
    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("Timeout fetching {url}")]
    Timeout { url: String },
    #[error("Gave up on {url} after {attempts} attempts: {reason}")]
    NetworkExhausted {
        url: String,
        attempts: u32,
        reason: String,
    },
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl RequestError {
    /// Superseded operations are not failures from the user's point of view.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Network-level failures that a retrying request re-issues.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Cancelled { url }
            | Self::UnexpectedStatus { url, .. }
            | Self::Network { url, .. }
            | Self::Timeout { url }
            | Self::NetworkExhausted { url, .. }
            | Self::InvalidUrl { url, .. } => url,
        }
    }

    fn from_transport(url: &str, err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::Timeout {
                url: url.to_string(),
            },
            TransportError::Connect(reason) | TransportError::Body(reason) => Self::Network {
                url: url.to_string(),
                reason,
            },
        }
    }
}

/// Failure of a single transport attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out")]
    Timeout,
    #[error("body stream failed: {0}")]
    Body(String),
}

pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// One attempt as handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    /// Overall deadline for the attempt, body included. `None` streams without a bound.
    pub timeout: Option<Duration>,
}

/// Response head plus a body that is still streaming.
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Executes single network attempts for the [`RequestEngine`].
///
/// Retry, cancellation and progress reporting live in the engine; implementations
/// only move bytes. The trait is object-safe and Send + Sync for use across tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
