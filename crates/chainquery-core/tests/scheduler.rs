//! Scheduler and engine properties observed through the in-memory endpoint.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use chainquery_core::{
    Batch, BlockTag, CallDescriptor, EngineConfig, ExecutionMode, FailurePolicy, MemoryEndpoint,
    QueryEngine, QueryError, Scheduler, Slot,
};

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn target(i: usize) -> Address {
    let mut raw = [0u8; 20];
    raw[12..].copy_from_slice(&(i as u64 + 1).to_be_bytes());
    Address::from(raw)
}

fn value_of(i: usize) -> u64 {
    i as u64 * 7 + 1
}

/// An endpoint answering `target(i)` with `value_of(i)` except for `failing`.
fn endpoint(n: usize, failing: &[usize]) -> Arc<MemoryEndpoint> {
    let endpoint = Arc::new(MemoryEndpoint::new());
    for i in 0..n {
        if failing.contains(&i) {
            endpoint.fail(target(i), Bytes::new());
        } else {
            endpoint.respond(target(i), Bytes::new(), value_of(i).to_be_bytes().to_vec());
        }
    }
    endpoint
}

fn be_u64(data: &[u8]) -> Result<u64, QueryError> {
    let raw: [u8; 8] = data
        .try_into()
        .map_err(|_| QueryError::encoding("expected 8 bytes"))?;
    Ok(u64::from_be_bytes(raw))
}

fn registrar(
    slots: Arc<Vec<Slot<u64>>>,
) -> impl Fn(&mut Batch, usize) -> Result<(), QueryError> + Send + Sync + 'static {
    move |batch, i| batch.add(CallDescriptor::new(target(i), Bytes::new(), &slots[i], be_u64))
}

fn values(slots: &[Slot<u64>]) -> Vec<Option<u64>> {
    slots.iter().map(Slot::get).collect()
}

// ─── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn flexible_results_do_not_depend_on_concurrency() {
    // 70 items in shards of 7: exactly 10 shards.
    let failing = [3, 17, 18, 40, 69];
    let mut runs = Vec::new();

    for concurrency in [1, 10] {
        let endpoint = endpoint(70, &failing);
        endpoint.set_latency(Duration::from_millis(2));
        let slots = Arc::new(Slot::many(70));
        let flags = Scheduler::new(endpoint.clone(), concurrency, 100)
            .run(70, 7, ExecutionMode::Flexible, BlockTag::Latest, registrar(slots.clone()))
            .await
            .unwrap();
        assert_eq!(endpoint.round_trips(), 10);
        runs.push((flags, values(&slots)));
    }

    assert_eq!(runs[0], runs[1]);
    let (flags, vals) = &runs[0];
    assert_eq!(flags.len(), 70);
    for i in 0..70 {
        assert_eq!(flags[i], !failing.contains(&i), "flag {i}");
        assert_eq!(vals[i].is_some(), flags[i], "slot {i}");
    }
}

#[tokio::test]
async fn flexible_undecodable_item_keeps_the_flag_vector() {
    let endpoint = endpoint(3, &[]);
    endpoint.respond(target(1), Bytes::new(), Vec::new());
    let slots = Arc::new(Slot::many(3));

    let flags = Scheduler::new(endpoint, 2, 100)
        .run(3, 1, ExecutionMode::Flexible, BlockTag::Latest, registrar(slots.clone()))
        .await
        .unwrap();

    assert_eq!(flags, vec![true, false, true]);
    assert_eq!(values(&slots), vec![Some(value_of(0)), None, Some(value_of(2))]);
}

#[tokio::test]
async fn in_flight_round_trips_never_exceed_limit() {
    let endpoint = endpoint(200, &[]);
    endpoint.set_latency(Duration::from_millis(5));
    let slots = Arc::new(Slot::many(200));

    Scheduler::new(endpoint.clone(), 3, 100)
        .run(200, 10, ExecutionMode::Strict, BlockTag::Latest, registrar(slots))
        .await
        .unwrap();

    assert_eq!(endpoint.round_trips(), 20);
    assert!(endpoint.peak_in_flight() <= 3, "peak {}", endpoint.peak_in_flight());
    assert!(endpoint.peak_in_flight() >= 1);
}

#[tokio::test]
async fn strict_failure_leaves_other_shards_written() {
    // Item 12 sits in shard 1 of [0,10) [10,20) [20,30).
    let endpoint = endpoint(30, &[12]);
    let slots = Arc::new(Slot::many(30));

    let err = Scheduler::new(endpoint, 3, 100)
        .run(30, 10, ExecutionMode::Strict, BlockTag::Latest, registrar(slots.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::PartialFailure { index: 2, total: 10 }));
    for i in 10..20 {
        assert!(!slots[i].is_set(), "failed shard wrote slot {i}");
    }
    for i in (0..10).chain(20..30) {
        assert_eq!(slots[i].get(), Some(value_of(i)));
    }
}

#[tokio::test]
async fn cancel_on_first_error_stops_pending_shards() {
    let endpoint = endpoint(100, &[0]);
    endpoint.set_latency(Duration::from_millis(20));
    let slots = Arc::new(Slot::many(100));

    let err = Scheduler::new(endpoint.clone(), 1, 100)
        .with_failure_policy(FailurePolicy::CancelOnFirstError)
        .run(100, 10, ExecutionMode::Strict, BlockTag::Latest, registrar(slots))
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::PartialFailure { .. }));
    assert!(endpoint.round_trips() < 10, "round trips {}", endpoint.round_trips());
}

#[tokio::test]
async fn multi_call_item_flag_is_conjunction() {
    let endpoint = endpoint(6, &[4]);
    let slots = Arc::new(Slot::many(6));
    let register = {
        let slots = Arc::clone(&slots);
        move |batch: &mut Batch, i: usize| -> Result<(), QueryError> {
            // Item i reads targets 2i and 2i+1; item 2 has no calls.
            if i == 2 {
                return Ok(());
            }
            for t in [2 * i, 2 * i + 1] {
                batch.add(CallDescriptor::new(target(t), Bytes::new(), &slots[t], be_u64))?;
            }
            Ok(())
        }
    };

    let flags = Scheduler::new(endpoint, 2, 100)
        .run(3, 2, ExecutionMode::Flexible, BlockTag::Latest, register)
        .await
        .unwrap();

    assert_eq!(flags, vec![true, true, true]);

    let endpoint = self::endpoint(6, &[3]);
    let slots = Arc::new(Slot::<u64>::many(6));
    let register = {
        let slots = Arc::clone(&slots);
        move |batch: &mut Batch, i: usize| -> Result<(), QueryError> {
            for t in [2 * i, 2 * i + 1] {
                batch.add(CallDescriptor::new(target(t), Bytes::new(), &slots[t], be_u64))?;
            }
            Ok(())
        }
    };
    let flags = Scheduler::new(endpoint, 2, 100)
        .run(3, 2, ExecutionMode::Flexible, BlockTag::Latest, register)
        .await
        .unwrap();
    assert_eq!(flags, vec![true, false, true]);
}

#[tokio::test]
async fn flex_batch_query_handles_items_in_order() {
    let endpoint = endpoint(25, &[0, 24]);
    endpoint.set_latency(Duration::from_millis(1));
    let engine = QueryEngine::new(endpoint, EngineConfig::default().with_concurrent_call_limit(4)).unwrap();
    let slots = Arc::new(Slot::many(25));

    let mut seen = Vec::new();
    engine
        .flex_batch_query(
            25,
            4,
            registrar(slots.clone()),
            |success, index| {
                seen.push((index, success));
                Ok(())
            },
            BlockTag::Number(1),
        )
        .await
        .unwrap();

    let indices: Vec<_> = seen.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (0..25).collect::<Vec<_>>());
    assert!(!seen[0].1 && !seen[24].1);
    assert!(seen[1..24].iter().all(|(_, ok)| *ok));
}

#[tokio::test]
async fn strict_batch_query_fills_everything() {
    let endpoint = endpoint(1000, &[]);
    let engine = QueryEngine::new(endpoint.clone(), EngineConfig::default()).unwrap();
    let slots = Arc::new(Slot::many(1000));

    engine
        .batch_query(1000, 120, registrar(slots.clone()), BlockTag::Latest)
        .await
        .unwrap();

    assert_eq!(endpoint.round_trips(), 9);
    assert!(slots.iter().enumerate().all(|(i, s)| s.get() == Some(value_of(i))));
}
