//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::scheduler::FailurePolicy;

/// Tuning knobs for [`QueryEngine`](crate::QueryEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of shard round trips in flight at once.
    pub concurrent_call_limit: usize,
    /// Shard size used when resolving address lists.
    pub address_batch_size: usize,
    /// Shard size used when reading contract versions.
    pub contract_version_batch_size: usize,
    /// Upper bound on calls registered against one batch.
    pub max_batch_size: usize,
    /// Maximum block span of one `eth_getLogs` request. `None` = unbounded.
    pub log_interval_size: Option<u64>,
    pub failure_policy: FailurePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrent_call_limit: 6,
            address_batch_size: 1000,
            contract_version_batch_size: 500,
            max_batch_size: 2000,
            log_interval_size: None,
            failure_policy: FailurePolicy::RunToCompletion,
        }
    }
}

impl EngineConfig {
    pub fn with_concurrent_call_limit(mut self, limit: usize) -> Self {
        self.concurrent_call_limit = limit;
        self
    }

    pub fn with_address_batch_size(mut self, size: usize) -> Self {
        self.address_batch_size = size;
        self
    }

    pub fn with_contract_version_batch_size(mut self, size: usize) -> Self {
        self.contract_version_batch_size = size;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_log_interval_size(mut self, blocks: Option<u64>) -> Self {
        self.log_interval_size = blocks;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.concurrent_call_limit == 0 {
            return Err(QueryError::InvalidConfig(
                "concurrent_call_limit must be at least 1".into(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(QueryError::InvalidConfig(
                "max_batch_size must be at least 1".into(),
            ));
        }
        for (name, size) in [
            ("address_batch_size", self.address_batch_size),
            ("contract_version_batch_size", self.contract_version_batch_size),
        ] {
            if size == 0 || size > self.max_batch_size {
                return Err(QueryError::InvalidConfig(format!(
                    "{name} must be between 1 and max_batch_size ({})",
                    self.max_batch_size
                )));
            }
        }
        if self.log_interval_size == Some(0) {
            return Err(QueryError::InvalidConfig(
                "log_interval_size must be at least 1 block".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrent_call_limit, 6);
        assert_eq!(config.address_batch_size, 1000);
        assert_eq!(config.contract_version_batch_size, 500);
        config.validate().unwrap();
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = EngineConfig::default().with_concurrent_call_limit(0);
        assert!(matches!(config.validate(), Err(QueryError::InvalidConfig(_))));
    }

    #[test]
    fn shard_size_above_batch_limit_rejected() {
        let config = EngineConfig::default()
            .with_max_batch_size(100)
            .with_address_batch_size(200)
            .with_contract_version_batch_size(50);
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"concurrent_call_limit": 2, "failure_policy": "cancel_on_first_error"}"#)
                .unwrap();
        assert_eq!(config.concurrent_call_limit, 2);
        assert_eq!(config.max_batch_size, 2000);
        assert_eq!(config.failure_policy, FailurePolicy::CancelOnFirstError);
    }
}
