use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::{
    Headers, HttpTransport, RequestError, ResponseHandle, Transport, TransportRequest,
};
use crate::config::{CourierConfig, RetryPolicy};

/// Range asked for by a probe: the first two bytes.
pub const PROBE_RANGE: &str = "bytes=0-1";

/// Preallocation cap for bodies announcing a content length.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Called with `(bytes_loaded, bytes_total)` after every received chunk.
/// `bytes_total` is `None` when the response carries no content length.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// What a range probe revealed about the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// `200 OK`: ranges are ignored, the resource is fetched whole.
    RangesIgnored,
    /// `206 Partial Content`: safe to stream progressively.
    RangesSupported,
}

impl ProbeOutcome {
    pub fn supports_ranges(self) -> bool {
        self == Self::RangesSupported
    }
}

/// Issues logical fetches on top of a [`Transport`], adding cancellation,
/// bounded retries and byte progress.
#[derive(Clone)]
pub struct RequestEngine {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl RequestEngine {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            request_timeout: None,
        }
    }

    pub fn from_config(config: &CourierConfig) -> Self {
        Self::new(Arc::new(HttpTransport::from_config(config)), config.retry)
            .with_request_timeout(config.request_timeout)
    }

    /// Deadline applied to requests that do not stream with progress.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn request(&self, method: Method, url: impl Into<String>) -> Request {
        Request {
            engine: self.clone(),
            method,
            url: url.into(),
            headers: Headers::new(),
            cancel: None,
            retry: false,
            progress: None,
            timeout: self.request_timeout,
            head_only: false,
            reported: AtomicU64::new(0),
        }
    }

    pub fn get(&self, url: impl Into<String>) -> Request {
        self.request(Method::GET, url)
    }

    /// Two-byte range probe. Any status other than 200 or 206 is a hard failure.
    /// Settles on the response head, so an origin that ignores the range and
    /// streams the whole resource is never read past its status line.
    pub async fn probe(
        &self,
        url: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<ProbeOutcome, RequestError> {
        let mut req = self.get(url).header("range", PROBE_RANGE);
        if let Some(token) = cancel {
            req = req.with_cancel(token);
        }

        let res = req.send_head().await?;

        match res.status() {
            200 => Ok(ProbeOutcome::RangesIgnored),
            206 => Ok(ProbeOutcome::RangesSupported),
            status => {
                warn!(url, status, "Range probe returned unexpected status");
                Err(RequestError::UnexpectedStatus {
                    url: url.to_string(),
                    status,
                })
            }
        }
    }
}

/// A single logical fetch under construction.
pub struct Request {
    engine: RequestEngine,
    method: Method,
    url: String,
    headers: Headers,
    cancel: Option<CancellationToken>,
    retry: bool,
    progress: Option<ProgressFn>,
    timeout: Option<Duration>,
    head_only: bool,
    /// Highest `bytes_loaded` handed to the progress callback across attempts.
    reported: AtomicU64,
}

impl Request {
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Abort the in-flight call as soon as `token` fires.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Re-issue on network-level failures, following the engine's retry policy.
    pub fn with_retry(mut self) -> Self {
        self.retry = true;
        self
    }

    /// Stream the body, reporting progress on every chunk. Progress-tracked
    /// bodies have no overall deadline.
    pub fn with_progress_func<F>(mut self, f: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(f));
        self.timeout = None;
        self
    }

    pub async fn send(self) -> Result<ResponseHandle, RequestError> {
        self.send_with(Headers::new()).await
    }

    /// Resolve once status and headers arrive. The body is dropped unread and
    /// the returned handle is empty.
    pub async fn send_head(mut self) -> Result<ResponseHandle, RequestError> {
        self.head_only = true;
        self.send_with(Headers::new()).await
    }

    /// Issue the request with `headers` merged over the builder's own.
    pub async fn send_with(mut self, headers: Headers) -> Result<ResponseHandle, RequestError> {
        let url = Url::parse(&self.url).map_err(|e| RequestError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        self.headers.merge(&headers);

        let request = TransportRequest {
            method: self.method.clone(),
            url,
            headers: self.headers.clone(),
            timeout: self.timeout,
        };

        let attempts = if self.retry {
            self.engine.retry.max_attempts.max(1)
        } else {
            1
        };
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = self.engine.retry.backoff_for(attempt - 1);
                debug!(url = %self.url, attempt, backoff_ms = backoff.as_millis(), "Retrying fetch");
                self.cancellable(async {
                    tokio::time::sleep(backoff).await;
                    Ok(())
                })
                .await?;
            }

            match self.cancellable(self.attempt(request.clone())).await {
                Ok(res) => return Ok(res),
                Err(e) if self.retry && e.is_retryable() => {
                    warn!(url = %self.url, attempt, error = %e, "Fetch attempt failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(RequestError::NetworkExhausted {
            url: self.url.clone(),
            attempts,
            reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn cancellable<T, F>(&self, fut: F) -> Result<T, RequestError>
    where
        F: std::future::Future<Output = Result<T, RequestError>>,
    {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(url = %self.url, "Fetch cancelled");
                        Err(RequestError::Cancelled { url: self.url.clone() })
                    }
                    res = fut => res,
                }
            }
            None => fut.await,
        }
    }

    async fn attempt(&self, request: TransportRequest) -> Result<ResponseHandle, RequestError> {
        let res = self
            .engine
            .transport
            .execute(request)
            .await
            .map_err(|e| RequestError::from_transport(&self.url, e))?;

        if self.head_only {
            debug!(url = %self.url, status = res.status, "Response head received");
            return Ok(ResponseHandle::live(res.status, res.headers, Bytes::new()));
        }

        let total = res.content_length.or_else(|| res.headers.content_length());
        let mut body = BytesMut::with_capacity(total.unwrap_or(0).min(MAX_PREALLOC) as usize);
        let mut stream = res.body;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RequestError::from_transport(&self.url, e))?;
            body.extend_from_slice(&chunk);
            if let Some(progress) = &self.progress {
                // A retried attempt restarts from zero; stay quiet until it
                // catches up with what was already reported.
                let loaded = body.len() as u64;
                if loaded >= self.reported.fetch_max(loaded, Ordering::Relaxed) {
                    progress(loaded, total);
                }
            }
        }

        debug!(url = %self.url, status = res.status, bytes = body.len(), "Fetch complete");
        Ok(ResponseHandle::live(res.status, res.headers, body.freeze()))
    }
}
