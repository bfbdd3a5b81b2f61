//! Sharded, concurrency-bounded execution of large queries.
//!
//! # Model
//!
//! ```text
//! items [0, N) ──ShardPlan──► shard 0 ─┐
//!                             shard 1 ─┼─► Semaphore(C) ─► Batch::execute ─► join
//!                             shard k ─┘
//! ```
//!
//! Every shard is a tokio task. A task holds one semaphore permit while it
//! registers its items and performs its single round trip, so at most `C`
//! round trips are in flight regardless of `N`.
//!
//! Under [`FailurePolicy::RunToCompletion`] a failing shard does not cancel
//! its siblings: they finish and keep whatever they wrote into their slots,
//! and only the first error is returned. Callers must not read a strict
//! failure as "nothing was written".

use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::batch::{Batch, ExecutionMode};
use crate::error::QueryError;
use crate::request::BlockTag;
use crate::shard::ShardPlan;
use crate::transport::BatchEndpoint;

/// What happens to the remaining shards once one has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let every dispatched shard finish, then return the first error.
    #[default]
    RunToCompletion,
    /// Abort outstanding shard tasks as soon as an error is seen.
    CancelOnFirstError,
}

type ShardResult = (usize, Range<usize>, Result<Vec<bool>, QueryError>);

/// Dispatches shards of a large query against one batch endpoint.
#[derive(Clone)]
pub struct Scheduler {
    endpoint: Arc<dyn BatchEndpoint>,
    concurrency: usize,
    max_batch_size: usize,
    failure_policy: FailurePolicy,
}

impl Scheduler {
    pub fn new(endpoint: Arc<dyn BatchEndpoint>, concurrency: usize, max_batch_size: usize) -> Self {
        Self {
            endpoint,
            concurrency: concurrency.max(1),
            max_batch_size,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `register` for every item in `[0, total)`, shard by shard.
    ///
    /// Returns one flag per item, positioned by global item index. An item's
    /// flag is `true` when every call it registered succeeded. In strict mode
    /// a successful return therefore holds only `true`.
    pub async fn run<R>(
        &self,
        total: usize,
        shard_size: usize,
        mode: ExecutionMode,
        block: BlockTag,
        register: R,
    ) -> Result<Vec<bool>, QueryError>
    where
        R: Fn(&mut Batch, usize) -> Result<(), QueryError> + Send + Sync + 'static,
    {
        let plan = ShardPlan::new(total, shard_size)?;
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let register = Arc::new(register);
        let mut tasks: JoinSet<ShardResult> = JoinSet::new();

        debug!(
            total,
            shard_size,
            shards = plan.len(),
            concurrency = self.concurrency,
            ?mode,
            "dispatching shards"
        );

        for (shard, range) in plan.ranges().enumerate() {
            let permits = Arc::clone(&permits);
            let register = Arc::clone(&register);
            let endpoint = Arc::clone(&self.endpoint);
            let max_batch_size = self.max_batch_size;

            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        run_shard(
                            endpoint,
                            max_batch_size,
                            shard,
                            range.clone(),
                            mode,
                            block,
                            register.as_ref(),
                        )
                        .await
                    }
                    Err(_) => Err(QueryError::ShardDispatch {
                        shard,
                        reason: "scheduler closed".into(),
                    }),
                };
                (shard, range, result)
            });
        }

        let mut success = vec![false; total];
        let mut first_error: Option<QueryError> = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, range, Ok(flags))) => success[range].copy_from_slice(&flags),
                Ok((shard, range, Err(err))) => {
                    warn!(shard, start = range.start, end = range.end, error = %err, "shard failed");
                    self.record_failure(&mut first_error, err, &mut tasks);
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    warn!(error = %join_err, "shard task failed");
                    self.record_failure(
                        &mut first_error,
                        QueryError::TaskFailed(join_err.to_string()),
                        &mut tasks,
                    );
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        info!(
            total,
            shards = plan.len(),
            failed_items = success.iter().filter(|ok| !**ok).count(),
            "sharded query complete"
        );
        Ok(success)
    }

    fn record_failure(
        &self,
        first_error: &mut Option<QueryError>,
        err: QueryError,
        tasks: &mut JoinSet<ShardResult>,
    ) {
        if first_error.is_some() {
            return;
        }
        *first_error = Some(err);
        if self.failure_policy == FailurePolicy::CancelOnFirstError {
            tasks.abort_all();
        }
    }
}

async fn run_shard<R>(
    endpoint: Arc<dyn BatchEndpoint>,
    max_batch_size: usize,
    shard: usize,
    items: Range<usize>,
    mode: ExecutionMode,
    block: BlockTag,
    register: &R,
) -> Result<Vec<bool>, QueryError>
where
    R: Fn(&mut Batch, usize) -> Result<(), QueryError>,
{
    endpoint
        .ensure_ready()
        .map_err(|e| QueryError::ShardDispatch {
            shard,
            reason: e.to_string(),
        })?;

    let mut batch = Batch::new(endpoint, max_batch_size);
    let mut spans = Vec::with_capacity(items.len());
    for item in items {
        let start = batch.len();
        register(&mut batch, item)?;
        spans.push(start..batch.len());
    }

    let flags = batch.execute(mode, block).await?;
    Ok(spans
        .into_iter()
        .map(|span| flags[span].iter().all(|ok| *ok))
        .collect())
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("endpoint", &self.endpoint.name())
            .field("concurrency", &self.concurrency)
            .field("max_batch_size", &self.max_batch_size)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}
