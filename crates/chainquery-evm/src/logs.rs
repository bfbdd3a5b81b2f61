//! `LogSource` over `eth_blockNumber` / `eth_getLogs`.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainquery_core::error::TransportError;
use chainquery_core::logs::{Log, LogFilter, LogSource};
use chainquery_core::transport::RpcTransport;

use crate::multicall::decode_hex_result;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash", default)]
    pub tx_hash: Option<String>,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl TryFrom<RawLog> for Log {
    type Error = TransportError;

    fn try_from(raw: RawLog) -> Result<Self, Self::Error> {
        let topics = raw
            .topics
            .iter()
            .map(|t| parse_word(t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Log {
            address: Address::from_str(&raw.address)
                .map_err(|e| malformed("address", &raw.address, e))?,
            topics,
            data: decode_hex_result(&Value::String(raw.data))?.into(),
            block_number: parse_hex_u64(&raw.block_number)?,
            log_index: parse_hex_u64(&raw.log_index)?,
            tx_hash: raw.tx_hash.as_deref().map(parse_word).transpose()?,
            removed: raw.removed.unwrap_or(false),
        })
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64, TransportError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| malformed("quantity", s, e))
}

fn parse_word(s: &str) -> Result<B256, TransportError> {
    B256::from_str(s).map_err(|e| malformed("word", s, e))
}

fn malformed(what: &str, value: &str, err: impl std::fmt::Display) -> TransportError {
    TransportError::Other(format!("malformed {what} {value:?} in log: {err}"))
}

/// Fetches logs and the chain head from a JSON-RPC node.
pub struct RpcLogSource {
    transport: Arc<dyn RpcTransport>,
    next_id: AtomicU64,
}

impl RpcLogSource {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// The `eth_getLogs` filter object for `filter` over `[from, to]`.
pub fn filter_params(filter: &LogFilter, from: u64, to: u64) -> Value {
    let topics: Vec<Value> = filter
        .topics
        .iter()
        .map(|accepted| {
            if accepted.is_empty() {
                Value::Null
            } else {
                Value::Array(accepted.iter().map(|t| json!(t.to_string())).collect())
            }
        })
        .collect();
    let addresses: Vec<String> = filter.addresses.iter().map(|a| a.to_string()).collect();

    let mut params = json!({
        "fromBlock": format!("{from:#x}"),
        "toBlock": format!("{to:#x}"),
        "topics": topics,
    });
    if !addresses.is_empty() {
        params["address"] = json!(addresses);
    }
    params
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn block_number(&self) -> Result<u64, TransportError> {
        let result = self.transport.call(self.id(), "eth_blockNumber", vec![]).await?;
        let s = result
            .as_str()
            .ok_or_else(|| TransportError::Other(format!("expected hex quantity, got {result}")))?;
        parse_hex_u64(s)
    }

    async fn logs(&self, filter: &LogFilter, from: u64, to: u64) -> Result<Vec<Log>, TransportError> {
        let result = self
            .transport
            .call(self.id(), "eth_getLogs", vec![filter_params(filter, from, to)])
            .await?;
        let raw: Vec<RawLog> = serde_json::from_value(result)?;
        raw.into_iter()
            .map(Log::try_from)
            .filter(|log| !matches!(log, Ok(l) if l.removed))
            .collect()
    }
}
