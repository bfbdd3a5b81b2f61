//! Event log filters, the `LogSource` seam and range-chunked scanning.

use std::sync::Mutex;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use tracing::debug;

use crate::error::TransportError;

/// Address/topic filter for an `eth_getLogs` style query.
///
/// `topics[i]` lists the accepted values for topic position `i`; an empty
/// list accepts any value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topics: Vec<Vec<B256>>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: Address) -> Self {
        self.addresses.push(address);
        self
    }

    /// Accept any of `values` at topic position `position`.
    pub fn topic(mut self, position: usize, values: impl IntoIterator<Item = B256>) -> Self {
        if self.topics.len() <= position {
            self.topics.resize(position + 1, Vec::new());
        }
        self.topics[position].extend(values);
        self
    }

    pub fn matches(&self, log: &Log) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, accepted)| {
            accepted.is_empty() || log.topics.get(i).is_some_and(|t| accepted.contains(t))
        })
    }
}

/// A decoded-envelope event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: Option<B256>,
    pub removed: bool,
}

impl Log {
    pub fn new(address: Address, topics: Vec<B256>, data: impl Into<Bytes>, block_number: u64) -> Self {
        Self {
            address,
            topics,
            data: data.into(),
            block_number,
            log_index: 0,
            tx_hash: None,
            removed: false,
        }
    }
}

/// A source of chain head and event logs.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// The current head block number.
    async fn block_number(&self) -> Result<u64, TransportError>;

    /// All logs in `[from, to]` matching `filter`.
    async fn logs(&self, filter: &LogFilter, from: u64, to: u64) -> Result<Vec<Log>, TransportError>;
}

/// Fetch logs in `[from, to]`, splitting the range into requests of at most
/// `max_range` blocks.
///
/// `to = None` scans up to the current head. `max_range = None` issues one
/// request for the whole range.
pub async fn scan_logs<S>(
    source: &S,
    filter: &LogFilter,
    from: u64,
    to: Option<u64>,
    max_range: Option<u64>,
) -> Result<Vec<Log>, TransportError>
where
    S: LogSource + ?Sized,
{
    let to = match to {
        Some(to) => to,
        None => source.block_number().await?,
    };
    if to < from {
        return Ok(Vec::new());
    }

    let span = match max_range {
        Some(0) => {
            return Err(TransportError::Other(
                "log scan range must be at least 1 block".into(),
            ))
        }
        Some(span) => span,
        None => return source.logs(filter, from, to).await,
    };

    let mut all_logs = Vec::new();
    let mut start = from;
    loop {
        let end = start.saturating_add(span - 1).min(to);
        let chunk = source.logs(filter, start, end).await?;
        debug!(from = start, to = end, logs = chunk.len(), "scanned log range");
        all_logs.extend(chunk);
        if end >= to {
            break;
        }
        start = end + 1;
    }
    Ok(all_logs)
}

/// In-memory [`LogSource`] for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryLogSource {
    head: Mutex<u64>,
    logs: Mutex<Vec<Log>>,
    requests: Mutex<Vec<(u64, u64)>>,
}

impl MemoryLogSource {
    pub fn new(head: u64) -> Self {
        Self {
            head: Mutex::new(head),
            ..Self::default()
        }
    }

    pub fn set_head(&self, head: u64) {
        *self.head.lock().unwrap_or_else(|p| p.into_inner()) = head;
    }

    pub fn push(&self, log: Log) {
        self.logs.lock().unwrap_or_else(|p| p.into_inner()).push(log);
    }

    /// The `(from, to)` ranges requested so far, in order.
    pub fn requests(&self) -> Vec<(u64, u64)> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl LogSource for MemoryLogSource {
    async fn block_number(&self) -> Result<u64, TransportError> {
        Ok(*self.head.lock().unwrap_or_else(|p| p.into_inner()))
    }

    async fn logs(&self, filter: &LogFilter, from: u64, to: u64) -> Result<Vec<Log>, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((from, to));
        let logs = self.logs.lock().unwrap_or_else(|p| p.into_inner());
        Ok(logs
            .iter()
            .filter(|log| (from..=to).contains(&log.block_number) && filter.matches(log))
            .cloned()
            .collect())
    }
}
