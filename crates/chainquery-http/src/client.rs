//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! One POST per request, or one POST carrying a JSON array for
//! [`send_batch`](RpcTransport::send_batch). The client never retries; the
//! request timeout is the only deadline anywhere in the stack.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use chainquery_core::error::TransportError;
use chainquery_core::request::{JsonRpcRequest, JsonRpcResponse};
use chainquery_core::transport::{HealthStatus, RpcTransport};

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Whole-request deadline in milliseconds.
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Consecutive transport failures after which `health()` reports
    /// `Degraded`.
    pub degraded_after: u32,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            degraded_after: 3,
        }
    }
}

impl HttpClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_degraded_after(mut self, failures: u32) -> Self {
        self.degraded_after = failures;
        self
    }
}

const NEVER_USED: u8 = 0;
const USED: u8 = 1;

/// HTTP JSON-RPC client.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    config: HttpClientConfig,
    consecutive_failures: AtomicU32,
    state: AtomicU8,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            config,
            consecutive_failures: AtomicU32::new(0),
            state: AtomicU8::new(NEVER_USED),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    async fn post<B, R>(&self, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned + Send,
    {
        let result = self.post_once(body).await;
        self.state.store(USED, Ordering::Relaxed);
        match &result {
            Ok(_) => self.consecutive_failures.store(0, Ordering::Relaxed),
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(url = %self.url, failures, error = %e, "HTTP request failed");
            }
        }
        result
    }

    async fn post_once<B, R>(&self, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned + Send,
    {
        let resp = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        let bytes = resp.bytes().await.map_err(|e| self.classify(e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                ms: self.config.request_timeout_ms,
            }
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

/// Put batch responses back in request order.
///
/// Nodes may answer out of order, but every request id must be answered
/// exactly once.
fn match_responses(
    reqs: &[JsonRpcRequest],
    responses: Vec<JsonRpcResponse>,
) -> Result<Vec<JsonRpcResponse>, TransportError> {
    let mut ordered: Vec<Option<JsonRpcResponse>> = vec![None; reqs.len()];
    for resp in responses {
        let position = reqs
            .iter()
            .position(|r| r.id == resp.id)
            .ok_or_else(|| TransportError::Other(format!("batch response for unknown id {}", resp.id)))?;
        if ordered[position].is_some() {
            return Err(TransportError::Other(format!(
                "duplicate batch response for id {}",
                resp.id
            )));
        }
        ordered[position] = Some(resp);
    }
    ordered
        .into_iter()
        .zip(reqs)
        .map(|(resp, req)| {
            resp.ok_or_else(|| {
                TransportError::Other(format!("batch response missing for id {}", req.id))
            })
        })
        .collect()
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        tracing::trace!(url = %self.url, method = %req.method, id = %req.id, "sending request");
        self.post(&req).await
    }

    /// True HTTP batch: send all requests as a JSON array in one HTTP call.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }
        let responses: Vec<JsonRpcResponse> = self.post(&reqs).await?;
        match_responses(&reqs, responses)
    }

    fn health(&self) -> HealthStatus {
        if self.state.load(Ordering::Relaxed) == NEVER_USED {
            return HealthStatus::Unknown;
        }
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures > 0 && failures >= self.config.degraded_after {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for HttpRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRpcClient")
            .field("url", &self.url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
