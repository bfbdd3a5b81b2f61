//! Transport seams: raw JSON-RPC and the aggregated batch endpoint.

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{BlockTag, JsonRpcRequest, JsonRpcResponse};

/// How a transport judges its node from recent traffic.
///
/// A batch endpoint refuses new shards while its transport is `Unhealthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// No request has completed yet.
    Unknown,
}

impl HealthStatus {
    pub fn accepts_work(self) -> bool {
        self != Self::Unhealthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        })
    }
}

/// A JSON-RPC node connection, shared as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Responses come back in request order. The fallback issues one
    /// request at a time.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError> {
        let mut out = Vec::with_capacity(reqs.len());
        for req in reqs {
            out.push(self.send(req).await?);
        }
        Ok(out)
    }

    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Endpoint identifier used in logs and errors.
    fn url(&self) -> &str;

    /// `send` with the envelope stripped: the `result` member, or the node's
    /// error as [`TransportError::Rpc`].
    async fn call(&self, id: u64, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        self.send(JsonRpcRequest::new(id, method, params))
            .await?
            .into_result()
            .map_err(TransportError::Rpc)
    }
}

/// One encoded read request as submitted to the batch endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCall {
    pub target: Address,
    pub calldata: Bytes,
}

/// The endpoint's verdict for one [`EncodedCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub success: bool,
    pub return_data: Bytes,
}

impl CallOutcome {
    pub fn success(return_data: impl Into<Bytes>) -> Self {
        Self {
            success: true,
            return_data: return_data.into(),
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            return_data: Bytes::new(),
        }
    }
}

/// A remote endpoint that executes an ordered list of calls in one round trip.
#[async_trait]
pub trait BatchEndpoint: Send + Sync + 'static {
    /// Check the endpoint can accept a new batch at all.
    ///
    /// Called once per shard before any call is registered; a failure here
    /// becomes [`QueryError::ShardDispatch`](crate::QueryError::ShardDispatch).
    fn ensure_ready(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Execute `calls` and return exactly one outcome per call, in order.
    ///
    /// With `require_success` the endpoint may fail the whole round trip if
    /// any sub-call fails.
    async fn aggregate(
        &self,
        calls: Vec<EncodedCall>,
        require_success: bool,
        block: BlockTag,
    ) -> Result<Vec<CallOutcome>, TransportError>;

    fn name(&self) -> &str;
}
