use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use tracing::{debug, warn};

use super::{Headers, Transport, TransportError, TransportRequest, TransportResponse};
use crate::config::CourierConfig;

/// reqwest-backed transport with connection pooling.
///
/// The client carries no overall timeout: streaming fetches run unbounded and
/// short requests set their own deadline through [`TransportRequest::timeout`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self::with_client(Self::build_client(connect_timeout))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &CourierConfig) -> Self {
        Self::new(config.connect_timeout)
    }

    pub fn build_client(connect_timeout: Duration) -> Client {
        Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(20)
            .gzip(true)
            .build()
            .expect("Failed to build HTTP client")
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let uri = request.url.as_str().to_string();
        let mut req = self.client.request(request.method, request.url);
        for (name, value) in request.headers.iter() {
            req = req.header(name, value);
        }
        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(uri = %uri, "Fetch timed out");
                TransportError::Timeout
            } else {
                warn!(uri = %uri, error = %e, "Fetch network error");
                TransportError::Connect(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.to_string())))
            .collect();
        debug!(uri = %uri, status, content_length = ?content_length, "Response headers received");

        let body = response
            .bytes_stream()
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Body(e.to_string())
                }
            })
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            content_length,
            body,
        })
    }
}
