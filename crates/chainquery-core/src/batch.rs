//! The batch aggregator: many descriptors, one round trip.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::call::CallDescriptor;
use crate::error::{QueryError, TransportError};
use crate::request::BlockTag;
use crate::transport::BatchEndpoint;

/// How sub-call failures inside a batch are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Any failing sub-call voids the whole batch.
    #[default]
    Strict,
    /// Sub-call failures are reported per index and never escalated.
    Flexible,
}

impl ExecutionMode {
    pub fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// An ordered group of call descriptors executed as one aggregated call.
pub struct Batch {
    endpoint: Arc<dyn BatchEndpoint>,
    calls: Vec<CallDescriptor>,
    max_size: usize,
}

impl Batch {
    pub fn new(endpoint: Arc<dyn BatchEndpoint>, max_size: usize) -> Self {
        Self {
            endpoint,
            calls: Vec::new(),
            max_size,
        }
    }

    /// Register a call. Fails once the batch holds `max_size` calls.
    pub fn add(&mut self, call: CallDescriptor) -> Result<(), QueryError> {
        if self.calls.len() >= self.max_size {
            return Err(QueryError::BatchFull {
                limit: self.max_size,
            });
        }
        self.calls.push(call);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn calls(&self) -> &[CallDescriptor] {
        &self.calls
    }

    /// Perform the round trip and route results into the bound slots.
    ///
    /// Returns one success flag per registered call, in registration order.
    /// Every successful result is decoded before any slot is written.
    ///
    /// Strict mode returns [`QueryError::PartialFailure`] for a failed
    /// sub-call and [`QueryError::Encoding`] for undecodable return data,
    /// both without writing any slot. Flexible mode reports either case as a
    /// `false` flag and leaves that slot untouched.
    pub async fn execute(
        &self,
        mode: ExecutionMode,
        block: BlockTag,
    ) -> Result<Vec<bool>, QueryError> {
        if self.calls.is_empty() {
            return Ok(Vec::new());
        }

        let encoded = self.calls.iter().map(CallDescriptor::encoded).collect();
        let outcomes = self
            .endpoint
            .aggregate(encoded, mode.is_strict(), block)
            .await?;

        if outcomes.len() != self.calls.len() {
            return Err(TransportError::Other(format!(
                "{} returned {} outcomes for {} calls",
                self.endpoint.name(),
                outcomes.len(),
                self.calls.len()
            ))
            .into());
        }

        if mode.is_strict() {
            if let Some(index) = outcomes.iter().position(|o| !o.success) {
                return Err(QueryError::PartialFailure {
                    index,
                    total: outcomes.len(),
                });
            }
        }

        let mut flags = Vec::with_capacity(outcomes.len());
        let mut commits = Vec::with_capacity(outcomes.len());
        for (index, (call, outcome)) in self.calls.iter().zip(&outcomes).enumerate() {
            if !outcome.success {
                flags.push(false);
                continue;
            }
            match call.decode(&outcome.return_data) {
                Ok(commit) => {
                    commits.push(commit);
                    flags.push(true);
                }
                Err(err) if mode.is_strict() => return Err(err),
                Err(err) => {
                    warn!(
                        endpoint = self.endpoint.name(),
                        index,
                        target = %call.target(),
                        error = %err,
                        "undecodable return data, marking call failed"
                    );
                    flags.push(false);
                }
            }
        }
        for commit in commits {
            commit();
        }

        debug!(
            endpoint = self.endpoint.name(),
            calls = flags.len(),
            failed = flags.iter().filter(|ok| !**ok).count(),
            ?mode,
            "batch executed"
        );
        Ok(flags)
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("endpoint", &self.endpoint.name())
            .field("calls", &self.calls.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Slot;
    use crate::memory::MemoryEndpoint;
    use alloy_primitives::{Address, Bytes};

    fn target(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn u64_call(target: Address, slot: &Slot<u64>) -> CallDescriptor {
        CallDescriptor::new(target, Bytes::new(), slot, |data| {
            let raw: [u8; 8] = data
                .try_into()
                .map_err(|_| QueryError::encoding("expected 8 bytes"))?;
            Ok(u64::from_be_bytes(raw))
        })
    }

    fn respond(endpoint: &MemoryEndpoint, target: Address, value: u64) {
        endpoint.respond(target, Bytes::new(), value.to_be_bytes().to_vec());
    }

    #[tokio::test]
    async fn empty_batch_skips_round_trip() {
        let endpoint = Arc::new(MemoryEndpoint::new());
        let batch = Batch::new(endpoint.clone(), 10);
        let flags = batch.execute(ExecutionMode::Strict, BlockTag::Latest).await.unwrap();
        assert!(flags.is_empty());
        assert_eq!(endpoint.round_trips(), 0);
    }

    #[tokio::test]
    async fn strict_success_fills_every_slot() {
        let endpoint = Arc::new(MemoryEndpoint::new());
        respond(&endpoint, target(1), 10);
        respond(&endpoint, target(2), 20);

        let slots = Slot::many(2);
        let mut batch = Batch::new(endpoint.clone(), 10);
        batch.add(u64_call(target(1), &slots[0])).unwrap();
        batch.add(u64_call(target(2), &slots[1])).unwrap();

        let flags = batch.execute(ExecutionMode::Strict, BlockTag::Latest).await.unwrap();
        assert_eq!(flags, vec![true, true]);
        assert_eq!(slots[0].get(), Some(10));
        assert_eq!(slots[1].get(), Some(20));
        assert_eq!(endpoint.round_trips(), 1);
    }

    #[tokio::test]
    async fn strict_partial_failure_writes_nothing() {
        let endpoint = Arc::new(MemoryEndpoint::new());
        respond(&endpoint, target(1), 10);
        endpoint.fail(target(2), Bytes::new());

        let slots = Slot::many(2);
        let mut batch = Batch::new(endpoint, 10);
        batch.add(u64_call(target(1), &slots[0])).unwrap();
        batch.add(u64_call(target(2), &slots[1])).unwrap();

        let err = batch
            .execute(ExecutionMode::Strict, BlockTag::Latest)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::PartialFailure { index: 1, total: 2 }));
        assert!(!slots[0].is_set());
        assert!(!slots[1].is_set());
    }

    #[tokio::test]
    async fn flexible_reports_per_index() {
        let endpoint = Arc::new(MemoryEndpoint::new());
        endpoint.fail(target(1), Bytes::new());
        respond(&endpoint, target(2), 20);

        let slots = Slot::many(2);
        let mut batch = Batch::new(endpoint, 10);
        batch.add(u64_call(target(1), &slots[0])).unwrap();
        batch.add(u64_call(target(2), &slots[1])).unwrap();

        let flags = batch.execute(ExecutionMode::Flexible, BlockTag::Latest).await.unwrap();
        assert_eq!(flags, vec![false, true]);
        assert!(!slots[0].is_set());
        assert_eq!(slots[1].get(), Some(20));
    }

    #[tokio::test]
    async fn flexible_undecodable_result_is_a_false_flag() {
        let endpoint = Arc::new(MemoryEndpoint::new());
        respond(&endpoint, target(1), 1);
        endpoint.respond(target(2), Bytes::new(), Vec::new());
        respond(&endpoint, target(3), 3);

        let slots = Slot::many(3);
        let mut batch = Batch::new(endpoint, 10);
        for (i, slot) in slots.iter().enumerate() {
            batch.add(u64_call(target(i as u8 + 1), slot)).unwrap();
        }

        let flags = batch.execute(ExecutionMode::Flexible, BlockTag::Latest).await.unwrap();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(slots[0].get(), Some(1));
        assert!(!slots[1].is_set());
        assert_eq!(slots[2].get(), Some(3));
    }

    #[tokio::test]
    async fn strict_undecodable_result_writes_nothing() {
        let endpoint = Arc::new(MemoryEndpoint::new());
        respond(&endpoint, target(1), 1);
        endpoint.respond(target(2), Bytes::new(), Vec::new());
        respond(&endpoint, target(3), 3);

        let slots = Slot::many(3);
        let mut batch = Batch::new(endpoint, 10);
        for (i, slot) in slots.iter().enumerate() {
            batch.add(u64_call(target(i as u8 + 1), slot)).unwrap();
        }

        let err = batch
            .execute(ExecutionMode::Strict, BlockTag::Latest)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Encoding { .. }));
        assert!(slots.iter().all(|slot| !slot.is_set()));
    }

    #[tokio::test]
    async fn transport_failure_is_an_error_in_both_modes() {
        let endpoint = Arc::new(MemoryEndpoint::new());
        respond(&endpoint, target(1), 1);
        endpoint.set_down(true);

        let slot = Slot::new();
        let mut batch = Batch::new(endpoint, 10);
        batch.add(u64_call(target(1), &slot)).unwrap();

        for mode in [ExecutionMode::Strict, ExecutionMode::Flexible] {
            let err = batch.execute(mode, BlockTag::Latest).await.unwrap_err();
            assert!(err.is_transport());
        }
        assert!(!slot.is_set());
    }

    #[tokio::test]
    async fn add_respects_size_limit() {
        let endpoint = Arc::new(MemoryEndpoint::new());
        let mut batch = Batch::new(endpoint, 2);
        let slots = Slot::many(3);
        batch.add(u64_call(target(1), &slots[0])).unwrap();
        batch.add(u64_call(target(2), &slots[1])).unwrap();
        let err = batch.add(u64_call(target(3), &slots[2])).unwrap_err();
        assert!(matches!(err, QueryError::BatchFull { limit: 2 }));
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn re_execution_is_idempotent() {
        let endpoint = Arc::new(MemoryEndpoint::new());
        respond(&endpoint, target(1), 7);
        endpoint.fail(target(2), Bytes::new());

        let slots = Slot::many(2);
        let mut batch = Batch::new(endpoint, 10);
        batch.add(u64_call(target(1), &slots[0])).unwrap();
        batch.add(u64_call(target(2), &slots[1])).unwrap();

        let first = batch.execute(ExecutionMode::Flexible, BlockTag::Latest).await.unwrap();
        let second = batch.execute(ExecutionMode::Flexible, BlockTag::Latest).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(slots[0].get(), Some(7));
    }
}
