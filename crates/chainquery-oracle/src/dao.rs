//! Oracle DAO membership: member count, member addresses and the block at
//! which membership last changed.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use tracing::debug;

use chainquery_core::{scan_logs, BlockTag, Batch, LogFilter, LogSource, QueryEngine, QueryError, Slot};
use chainquery_evm::{Contract, ContractName, ContractRegistry, IntoSolValue};

/// Events after which the member count may differ.
const MEMBERSHIP_EVENTS: [&str; 4] = [
    "ActionJoined",
    "ActionLeave",
    "ActionKick",
    "ActionChallengeDecided",
];

const CHALLENGE_DECIDED: &str = "ActionChallengeDecided";

/// Read access to the trusted-node DAO and its actions contract.
#[derive(Debug, Clone)]
pub struct OracleDao {
    dao: Contract,
    actions: Contract,
}

impl OracleDao {
    pub fn new(dao: Contract, actions: Contract) -> Self {
        Self { dao, actions }
    }

    pub fn from_registry(registry: &ContractRegistry) -> Result<Self, QueryError> {
        let [dao, actions] = registry.get_all([
            &ContractName::DAO_NODE_TRUSTED,
            &ContractName::DAO_NODE_TRUSTED_ACTIONS,
        ])?;
        Ok(Self::new(dao.clone(), actions.clone()))
    }

    pub fn dao(&self) -> &Contract {
        &self.dao
    }

    pub fn actions(&self) -> &Contract {
        &self.actions
    }

    pub fn add_member_count(&self, batch: &mut Batch, slot: &Slot<u64>) -> Result<(), QueryError> {
        self.dao.add_call(batch, slot, "getMemberCount", &[])
    }

    pub fn add_member_at(&self, batch: &mut Batch, slot: &Slot<Address>, index: u64) -> Result<(), QueryError> {
        self.dao
            .add_call(batch, slot, "getMemberAt", &[U256::from(index).into_sol_value()])
    }

    pub async fn member_count(&self, engine: &QueryEngine, block: BlockTag) -> Result<u64, QueryError> {
        let count = Slot::new();
        engine
            .query(|batch| self.add_member_count(batch, &count), block)
            .await?;
        count
            .get()
            .ok_or_else(|| QueryError::encoding("getMemberCount returned nothing"))
    }

    /// Addresses of members `0..count`, read in strict shards of `shard_size`.
    pub async fn member_addresses(
        &self,
        engine: &QueryEngine,
        count: usize,
        shard_size: usize,
        block: BlockTag,
    ) -> Result<Vec<Address>, QueryError> {
        let slots = Arc::new(Slot::<Address>::many(count));
        let dao = self.clone();
        let register_slots = Arc::clone(&slots);
        engine
            .batch_query(
                count,
                shard_size,
                move |batch, i| dao.add_member_at(batch, &register_slots[i], i as u64),
                block,
            )
            .await?;

        slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.get()
                    .ok_or_else(|| QueryError::encoding(format!("member {i} address missing")))
            })
            .collect()
    }

    /// Filter for every membership-changing event of the actions contract.
    pub fn membership_filter(&self) -> Result<LogFilter, QueryError> {
        let topics = MEMBERSHIP_EVENTS
            .iter()
            .map(|name| self.actions.event_topic(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LogFilter::new().address(self.actions.address()).topic(0, topics))
    }

    /// The block of the most recent join, leave, kick or successful
    /// challenge in `[from, to]`, or `from` if there was none.
    pub async fn latest_member_count_changed_block<S>(
        &self,
        source: &S,
        from: u64,
        to: u64,
        max_range: Option<u64>,
    ) -> Result<u64, QueryError>
    where
        S: LogSource + ?Sized,
    {
        let filter = self.membership_filter()?;
        let mut logs = scan_logs(source, &filter, from, Some(to), max_range).await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        for log in logs.iter().rev().filter(|log| !log.removed) {
            let event = self.actions.decode_event(log)?;
            if event.name != CHALLENGE_DECIDED || event.get::<bool>("success")? {
                debug!(event = %event.name, block = log.block_number, "membership changed");
                return Ok(log.block_number);
            }
        }

        debug!(from, to, "no membership change in range, using range start");
        Ok(from)
    }
}
