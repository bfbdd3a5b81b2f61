//! `QueryEngine`: the entry point tying a batch endpoint to the scheduler.
//!
//! The four query shapes mirror the two axes of the engine:
//!
//! | | one round trip | sharded |
//! |---|---|---|
//! | strict | [`query`](QueryEngine::query) | [`batch_query`](QueryEngine::batch_query) |
//! | flexible | [`flex_query`](QueryEngine::flex_query) | [`flex_batch_query`](QueryEngine::flex_batch_query) |

use std::sync::Arc;

use tracing::debug;

use crate::batch::{Batch, ExecutionMode};
use crate::config::EngineConfig;
use crate::error::QueryError;
use crate::request::BlockTag;
use crate::scheduler::Scheduler;
use crate::transport::BatchEndpoint;

#[derive(Clone)]
pub struct QueryEngine {
    endpoint: Arc<dyn BatchEndpoint>,
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(endpoint: Arc<dyn BatchEndpoint>, config: EngineConfig) -> Result<Self, QueryError> {
        config.validate()?;
        Ok(Self { endpoint, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Arc<dyn BatchEndpoint> {
        &self.endpoint
    }

    /// An empty batch bound to this engine's endpoint.
    pub fn batch(&self) -> Batch {
        Batch::new(Arc::clone(&self.endpoint), self.config.max_batch_size)
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.endpoint),
            self.config.concurrent_call_limit,
            self.config.max_batch_size,
        )
        .with_failure_policy(self.config.failure_policy)
    }

    /// Register calls into one batch and execute it strictly.
    pub async fn query<R>(&self, register: R, block: impl Into<BlockTag>) -> Result<(), QueryError>
    where
        R: FnOnce(&mut Batch) -> Result<(), QueryError>,
    {
        self.single(register, ExecutionMode::Strict, block.into())
            .await
            .map(|_| ())
    }

    /// Register calls into one batch and execute it flexibly.
    ///
    /// Returns one success flag per registered call.
    pub async fn flex_query<R>(
        &self,
        register: R,
        block: impl Into<BlockTag>,
    ) -> Result<Vec<bool>, QueryError>
    where
        R: FnOnce(&mut Batch) -> Result<(), QueryError>,
    {
        self.single(register, ExecutionMode::Flexible, block.into()).await
    }

    /// Strict sharded query over `count` items.
    pub async fn batch_query<R>(
        &self,
        count: usize,
        shard_size: usize,
        register: R,
        block: impl Into<BlockTag>,
    ) -> Result<(), QueryError>
    where
        R: Fn(&mut Batch, usize) -> Result<(), QueryError> + Send + Sync + 'static,
    {
        self.scheduler()
            .run(count, shard_size, ExecutionMode::Strict, block.into(), register)
            .await
            .map(|_| ())
    }

    /// Flexible sharded query over `count` items.
    ///
    /// Once every shard has joined, `handle(success, index)` is called once
    /// per item in index order. The first handler error stops iteration and
    /// is returned.
    pub async fn flex_batch_query<R, H>(
        &self,
        count: usize,
        shard_size: usize,
        register: R,
        mut handle: H,
        block: impl Into<BlockTag>,
    ) -> Result<(), QueryError>
    where
        R: Fn(&mut Batch, usize) -> Result<(), QueryError> + Send + Sync + 'static,
        H: FnMut(bool, usize) -> Result<(), QueryError>,
    {
        let flags = self
            .scheduler()
            .run(count, shard_size, ExecutionMode::Flexible, block.into(), register)
            .await?;
        for (index, success) in flags.into_iter().enumerate() {
            handle(success, index)?;
        }
        Ok(())
    }

    async fn single<R>(
        &self,
        register: R,
        mode: ExecutionMode,
        block: BlockTag,
    ) -> Result<Vec<bool>, QueryError>
    where
        R: FnOnce(&mut Batch) -> Result<(), QueryError>,
    {
        self.endpoint.ensure_ready()?;
        let mut batch = self.batch();
        register(&mut batch)?;
        debug!(calls = batch.len(), ?mode, ?block, "single-batch query");
        batch.execute(mode, block).await
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("endpoint", &self.endpoint.name())
            .field("config", &self.config)
            .finish()
    }
}
