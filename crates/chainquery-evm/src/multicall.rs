//! `BatchEndpoint` over the on-chain `tryAggregate` bundling contract.
//!
//! ```text
//! tryAggregate(bool requireSuccess, (address target, bytes callData)[] calls)
//!     returns ((bool success, bytes returnData)[])
//! ```
//!
//! Issued as a single `eth_call` at the requested block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{address, keccak256, Address, Bytes};
use async_trait::async_trait;
use serde_json::{json, Value};

use chainquery_core::error::TransportError;
use chainquery_core::request::BlockTag;
use chainquery_core::transport::{BatchEndpoint, CallOutcome, EncodedCall, RpcTransport};

/// Canonical Multicall2 deployment, present on mainnet and most testnets.
pub const MULTICALL2_ADDRESS: Address = address!("5BA1e12693Dc8F9c48aAD8770482f4739bEeD696");

const TRY_AGGREGATE: &str = "tryAggregate(bool,(address,bytes)[])";

pub struct Multicall {
    transport: Arc<dyn RpcTransport>,
    address: Address,
    next_id: AtomicU64,
}

impl Multicall {
    pub fn new(transport: Arc<dyn RpcTransport>, address: Address) -> Self {
        Self {
            transport,
            address,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Calldata for `tryAggregate(require_success, calls)`.
    pub fn encode(calls: &[EncodedCall], require_success: bool) -> Bytes {
        let entries = calls
            .iter()
            .map(|c| {
                DynSolValue::Tuple(vec![
                    DynSolValue::Address(c.target),
                    DynSolValue::Bytes(c.calldata.to_vec()),
                ])
            })
            .collect();
        let mut data = keccak256(TRY_AGGREGATE)[..4].to_vec();
        data.extend(
            DynSolValue::Tuple(vec![
                DynSolValue::Bool(require_success),
                DynSolValue::Array(entries),
            ])
            .abi_encode_params(),
        );
        data.into()
    }

    /// Decode `tryAggregate` return data into outcomes.
    pub fn decode(data: &[u8]) -> Result<Vec<CallOutcome>, TransportError> {
        let ty = DynSolType::Tuple(vec![DynSolType::Array(Box::new(DynSolType::Tuple(vec![
            DynSolType::Bool,
            DynSolType::Bytes,
        ])))]);
        let decoded = ty
            .abi_decode_params(data)
            .map_err(|e| TransportError::Other(format!("malformed tryAggregate result: {e}")))?;

        let malformed = || TransportError::Other("unexpected tryAggregate result shape".into());
        let results = match decoded {
            DynSolValue::Tuple(mut outer) if outer.len() == 1 => match outer.pop() {
                Some(DynSolValue::Array(results)) => results,
                _ => return Err(malformed()),
            },
            _ => return Err(malformed()),
        };

        results
            .into_iter()
            .map(|entry| match entry {
                DynSolValue::Tuple(fields) => match fields.as_slice() {
                    [DynSolValue::Bool(true), DynSolValue::Bytes(data)] => {
                        Ok(CallOutcome::success(data.clone()))
                    }
                    [DynSolValue::Bool(false), DynSolValue::Bytes(_)] => Ok(CallOutcome::failure()),
                    _ => Err(malformed()),
                },
                _ => Err(malformed()),
            })
            .collect()
    }
}

#[async_trait]
impl BatchEndpoint for Multicall {
    fn ensure_ready(&self) -> Result<(), TransportError> {
        if self.address == Address::ZERO {
            return Err(TransportError::Other("multicall address is not set".into()));
        }
        if !self.transport.health().accepts_work() {
            return Err(TransportError::Other(format!(
                "transport {} is unhealthy",
                self.transport.url()
            )));
        }
        Ok(())
    }

    async fn aggregate(
        &self,
        calls: Vec<EncodedCall>,
        require_success: bool,
        block: BlockTag,
    ) -> Result<Vec<CallOutcome>, TransportError> {
        let data = Self::encode(&calls, require_success);
        let params = vec![
            json!({
                "to": self.address.to_string(),
                "data": format!("0x{}", hex::encode(&data)),
            }),
            block.to_param(),
        ];
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(calls = calls.len(), require_success, ?block, "eth_call tryAggregate");
        let result = self.transport.call(id, "eth_call", params).await?;
        let raw = decode_hex_result(&result)?;
        Self::decode(&raw)
    }

    fn name(&self) -> &str {
        "multicall"
    }
}

pub(crate) fn decode_hex_result(value: &Value) -> Result<Vec<u8>, TransportError> {
    let s = value
        .as_str()
        .ok_or_else(|| TransportError::Other(format!("expected hex string, got {value}")))?;
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| TransportError::Other(format!("invalid hex in result: {e}")))
}

impl std::fmt::Debug for Multicall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multicall")
            .field("transport", &self.transport.url())
            .field("address", &self.address)
            .finish()
    }
}
