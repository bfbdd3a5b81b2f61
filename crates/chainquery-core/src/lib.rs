//! chainquery-core: the batched, concurrency-bounded query engine.
//!
//! # Overview
//!
//! Reads against a contract-based ledger are expensive one at a time. This
//! crate bundles them:
//!
//! - [`CallDescriptor`] / [`Slot`]: one encoded read plus the cell its
//!   decoded result lands in
//! - [`Batch`]: an ordered group of descriptors executed in one round trip
//! - [`ShardPlan`] / [`Scheduler`]: split large item sets into shards and
//!   run them under a concurrency bound
//! - [`QueryEngine`]: strict and flexible query entry points
//! - [`RpcTransport`] / [`BatchEndpoint`] / [`LogSource`]: the network seams
//! - [`telemetry`]: tracing subscriber setup

pub mod batch;
pub mod call;
pub mod config;
pub mod engine;
pub mod error;
pub mod logs;
pub mod memory;
pub mod request;
pub mod scheduler;
pub mod shard;
pub mod telemetry;
pub mod transport;

pub use batch::{Batch, ExecutionMode};
pub use call::{CallDescriptor, Slot};
pub use config::EngineConfig;
pub use engine::QueryEngine;
pub use error::{QueryError, TransportError};
pub use logs::{scan_logs, Log, LogFilter, LogSource, MemoryLogSource};
pub use memory::MemoryEndpoint;
pub use request::{BlockTag, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use scheduler::{FailurePolicy, Scheduler};
pub use shard::ShardPlan;
pub use telemetry::{init_tracing, LogConfig, TelemetryError};
pub use transport::{BatchEndpoint, CallOutcome, EncodedCall, HealthStatus, RpcTransport};
