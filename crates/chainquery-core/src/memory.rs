//! In-memory [`BatchEndpoint`] for tests and local development.
//!
//! Responses are keyed by `(target, calldata)`. Calls with no registered
//! response fail, the way a revert would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;

use crate::error::TransportError;
use crate::request::{BlockTag, JsonRpcError};
use crate::transport::{BatchEndpoint, CallOutcome, EncodedCall};

type CallKey = (Address, Bytes);

#[derive(Default)]
pub struct MemoryEndpoint {
    responses: Mutex<HashMap<CallKey, Option<Bytes>>>,
    latency: Mutex<Option<Duration>>,
    revert_on_failure: AtomicBool,
    down: AtomicBool,
    not_ready: AtomicBool,
    round_trips: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `(target, calldata)` with `return_data`.
    pub fn respond(&self, target: Address, calldata: impl Into<Bytes>, return_data: impl Into<Bytes>) {
        self.table()
            .insert((target, calldata.into()), Some(return_data.into()));
    }

    /// Make `(target, calldata)` fail.
    pub fn fail(&self, target: Address, calldata: impl Into<Bytes>) {
        self.table().insert((target, calldata.into()), None);
    }

    /// Delay every round trip, so overlapping shards can be observed.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|p| p.into_inner()) = Some(latency);
    }

    /// Emulate `tryAggregate(true, ..)` reverting the whole call when any
    /// sub-call fails under `require_success`.
    pub fn set_revert_on_failure(&self, revert: bool) {
        self.revert_on_failure.store(revert, Ordering::SeqCst);
    }

    /// Fail every round trip at the transport level.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail `ensure_ready`.
    pub fn set_not_ready(&self, not_ready: bool) {
        self.not_ready.store(not_ready, Ordering::SeqCst);
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    /// Highest number of round trips observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<CallKey, Option<Bytes>>> {
        self.responses.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl BatchEndpoint for MemoryEndpoint {
    fn ensure_ready(&self) -> Result<(), TransportError> {
        if self.not_ready.load(Ordering::SeqCst) {
            return Err(TransportError::Other("memory endpoint not ready".into()));
        }
        Ok(())
    }

    async fn aggregate(
        &self,
        calls: Vec<EncodedCall>,
        require_success: bool,
        _block: BlockTag,
    ) -> Result<Vec<CallOutcome>, TransportError> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::Http("memory endpoint down".into()));
        }

        let outcomes: Vec<CallOutcome> = {
            let table = self.table();
            calls
                .into_iter()
                .map(|call| match table.get(&(call.target, call.calldata)) {
                    Some(Some(data)) => CallOutcome::success(data.clone()),
                    _ => CallOutcome::failure(),
                })
                .collect()
        };

        if require_success
            && self.revert_on_failure.load(Ordering::SeqCst)
            && outcomes.iter().any(|o| !o.success)
        {
            return Err(TransportError::Rpc(JsonRpcError {
                code: 3,
                message: "execution reverted: Multicall aggregate: call failed".into(),
                data: None,
            }));
        }
        Ok(outcomes)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
