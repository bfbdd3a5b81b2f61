//! Network submission contracts: submit frequencies and submission logs.

use std::fmt;

use alloy_primitives::Address;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use chainquery_core::{scan_logs, Batch, LogFilter, LogSource, QueryError, Slot};
use chainquery_evm::{paths, Contract, ContractName, ContractRegistry, IntoSolValue};

/// A kind of periodic oracle submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Prices,
    Balances,
}

impl SubmissionKind {
    /// The contract members submit to.
    pub fn contract_name(self) -> ContractName {
        match self {
            Self::Prices => ContractName::NETWORK_PRICES,
            Self::Balances => ContractName::NETWORK_BALANCES,
        }
    }

    /// The event emitted for each member submission.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Prices => "PricesSubmitted",
            Self::Balances => "BalancesSubmitted",
        }
    }

    /// Setting path of the submission frequency, in blocks.
    pub fn frequency_path(self) -> &'static str {
        match self {
            Self::Prices => paths::SUBMIT_PRICES_FREQUENCY,
            Self::Balances => paths::SUBMIT_BALANCES_FREQUENCY,
        }
    }
}

impl fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prices => "prices",
            Self::Balances => "balances",
        })
    }
}

/// The protocol DAO's network settings contract.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    contract: Contract,
}

impl NetworkSettings {
    pub fn new(contract: Contract) -> Self {
        Self { contract }
    }

    pub fn from_registry(registry: &ContractRegistry) -> Result<Self, QueryError> {
        Ok(Self::new(
            registry.get(&ContractName::DAO_PROTOCOL_SETTINGS_NETWORK)?.clone(),
        ))
    }

    pub fn add_submit_frequency(
        &self,
        batch: &mut Batch,
        slot: &Slot<u64>,
        kind: SubmissionKind,
    ) -> Result<(), QueryError> {
        self.contract.add_call(
            batch,
            slot,
            "getSettingUint",
            &[kind.frequency_path().into_sol_value()],
        )
    }
}

/// Reader for one kind of member submission log.
#[derive(Debug, Clone)]
pub struct SubmissionLog {
    kind: SubmissionKind,
    contract: Contract,
}

impl SubmissionLog {
    pub fn new(kind: SubmissionKind, contract: Contract) -> Self {
        Self { kind, contract }
    }

    pub fn from_registry(registry: &ContractRegistry, kind: SubmissionKind) -> Result<Self, QueryError> {
        Ok(Self::new(kind, registry.get(&kind.contract_name())?.clone()))
    }

    pub fn kind(&self) -> SubmissionKind {
        self.kind
    }

    /// Submission events, optionally restricted to one submitter.
    pub fn filter(&self, submitter: Option<Address>) -> Result<LogFilter, QueryError> {
        let topic = self.contract.event_topic(self.kind.event_name())?;
        let filter = LogFilter::new()
            .address(self.contract.address())
            .topic(0, [topic]);
        Ok(match submitter {
            Some(member) => filter.topic(1, [member.into_word()]),
            None => filter,
        })
    }

    /// The `block` field of every submission `member` made in `[from, to]`.
    pub async fn submission_blocks<S>(
        &self,
        source: &S,
        member: Address,
        from: u64,
        to: u64,
        max_range: Option<u64>,
    ) -> Result<Vec<u64>, QueryError>
    where
        S: LogSource + ?Sized,
    {
        let logs = scan_logs(source, &self.filter(Some(member))?, from, Some(to), max_range).await?;
        logs.iter()
            .filter(|log| !log.removed)
            .map(|log| self.contract.decode_event(log)?.get::<u64>("block"))
            .collect()
    }

    /// Everyone who submitted in `[from, to]`, in order of first submission.
    pub async fn submitters<S>(
        &self,
        source: &S,
        from: u64,
        to: u64,
        max_range: Option<u64>,
    ) -> Result<IndexSet<Address>, QueryError>
    where
        S: LogSource + ?Sized,
    {
        let logs = scan_logs(source, &self.filter(None)?, from, Some(to), max_range).await?;
        logs.iter()
            .filter(|log| !log.removed)
            .map(|log| self.contract.decode_event(log)?.get::<Address>("from"))
            .collect()
    }
}
