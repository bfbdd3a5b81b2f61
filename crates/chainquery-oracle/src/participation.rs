//! Oracle DAO submission participation.
//!
//! # Method
//!
//! Members are expected to submit once per interval of `f` blocks, and an
//! interval needs `⌊m/2⌋ + 1` of the `m` members to reach consensus. If
//! members shared that load at random, each would be expected to submit
//! `intervals · consensus / m` times since membership last changed.
//!
//! The actual per-member counts are compared against that expectation with
//! a chi-square test over `m − 1` degrees of freedom. A low probability
//! means participation is unevenly spread across members.
//!
//! Only the last `lookback_intervals` intervals are searched for the most
//! recent membership change.

use std::sync::Arc;

use alloy_primitives::Address;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use chainquery_core::{BlockTag, LogSource, QueryEngine, QueryError, Slot};
use chainquery_evm::ContractRegistry;

use crate::dao::OracleDao;
use crate::network::{NetworkSettings, SubmissionKind, SubmissionLog};
use crate::stats::{chi_square, fit_probability, SpecialFunctions, Statrs};

/// Tuning for [`ParticipationCalculator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipationConfig {
    /// How many intervals back to look for a membership change.
    pub lookback_intervals: u64,
    /// Shard size for reading member addresses.
    pub member_batch_size: usize,
    /// Maximum block span per log request. `None` falls back to the engine's
    /// `log_interval_size`.
    pub log_interval_size: Option<u64>,
}

impl Default for ParticipationConfig {
    fn default() -> Self {
        Self {
            lookback_intervals: 50,
            member_batch_size: 200,
            log_interval_size: None,
        }
    }
}

impl ParticipationConfig {
    pub fn with_lookback_intervals(mut self, intervals: u64) -> Self {
        self.lookback_intervals = intervals;
        self
    }

    pub fn with_member_batch_size(mut self, size: usize) -> Self {
        self.member_batch_size = size;
        self
    }

    pub fn with_log_interval_size(mut self, blocks: Option<u64>) -> Self {
        self.log_interval_size = blocks;
        self
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.member_batch_size == 0 {
            return Err(QueryError::InvalidConfig(
                "member_batch_size must be at least 1".into(),
            ));
        }
        if self.log_interval_size == Some(0) {
            return Err(QueryError::InvalidConfig(
                "log_interval_size must be at least 1 block".into(),
            ));
        }
        Ok(())
    }
}

/// The intervals counted since the last membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First aligned block after the baseline.
    pub start_block: u64,
    pub frequency: u64,
    /// Number of intervals from `start_block` up to the evaluated block.
    pub intervals: u64,
}

impl Window {
    pub fn new(baseline: u64, block: u64, frequency: u64) -> Result<Self, QueryError> {
        if frequency == 0 {
            return Err(QueryError::InvalidConfig("submit frequency is 0".into()));
        }
        let start_block = (baseline / frequency + 1) * frequency;
        let intervals = if block > start_block {
            (block - start_block) / frequency + 1
        } else {
            0
        };
        Ok(Self {
            start_block,
            frequency,
            intervals,
        })
    }

    /// Interval index of a submission for `submission_block`, if that block
    /// is aligned and inside the window.
    pub fn index_of(&self, submission_block: u64) -> Option<usize> {
        if submission_block % self.frequency != 0 || submission_block < self.start_block {
            return None;
        }
        let index = submission_block / self.frequency - self.start_block / self.frequency;
        (index < self.intervals).then(|| index as usize)
    }
}

/// The earliest block searched for a membership change: `lookback`
/// intervals before the one containing `block`, clamped at genesis.
pub fn lookback_floor(block: u64, frequency: u64, lookback: u64) -> u64 {
    block
        .checked_div(frequency)
        .map_or(0, |interval| interval.saturating_sub(lookback) * frequency)
}

/// Members needed for an interval to reach consensus.
pub fn consensus(members: u64) -> u64 {
    members / 2 + 1
}

/// Submissions expected per member if consensus load were spread at random.
pub fn expected_submissions(intervals: u64, members: u64) -> f64 {
    if members == 0 {
        return 0.0;
    }
    intervals as f64 * consensus(members) as f64 / members as f64
}

/// Per-member participation since the last membership change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participation {
    pub kind: SubmissionKind,
    /// The block the calculation was evaluated at.
    pub block: u64,
    pub start_block: u64,
    pub update_frequency: u64,
    /// Intervals elapsed since `start_block`.
    pub update_count: u64,
    pub expected_submissions: f64,
    pub chi_square: f64,
    /// Probability of a chi-square statistic at least this large.
    pub probability: f64,
    /// Aligned in-window submissions per member.
    pub actual_submissions: IndexMap<Address, u64>,
    /// Per member, whether they submitted for each interval.
    pub participation: IndexMap<Address, Vec<bool>>,
}

impl Participation {
    /// Fraction of intervals `member` submitted for.
    pub fn rate(&self, member: &Address) -> Option<f64> {
        let actual = *self.actual_submissions.get(member)?;
        if self.update_count == 0 {
            return Some(0.0);
        }
        Some(actual as f64 / self.update_count as f64)
    }
}

/// Computes [`Participation`] from chain state and submission logs.
pub struct ParticipationCalculator {
    engine: QueryEngine,
    logs: Arc<dyn LogSource>,
    dao: OracleDao,
    settings: NetworkSettings,
    prices: SubmissionLog,
    balances: SubmissionLog,
    config: ParticipationConfig,
    functions: Arc<dyn SpecialFunctions>,
}

impl ParticipationCalculator {
    pub fn new(
        engine: QueryEngine,
        logs: Arc<dyn LogSource>,
        registry: &ContractRegistry,
        config: ParticipationConfig,
    ) -> Result<Self, QueryError> {
        config.validate()?;
        if config.member_batch_size > engine.config().max_batch_size {
            return Err(QueryError::InvalidConfig(format!(
                "member_batch_size must not exceed max_batch_size ({})",
                engine.config().max_batch_size
            )));
        }
        Ok(Self {
            engine,
            logs,
            dao: OracleDao::from_registry(registry)?,
            settings: NetworkSettings::from_registry(registry)?,
            prices: SubmissionLog::from_registry(registry, SubmissionKind::Prices)?,
            balances: SubmissionLog::from_registry(registry, SubmissionKind::Balances)?,
            config,
            functions: Arc::new(Statrs),
        })
    }

    pub fn with_special_functions(mut self, functions: impl SpecialFunctions + 'static) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    pub fn config(&self) -> &ParticipationConfig {
        &self.config
    }

    /// Participation of every member in `kind` submissions at `block`
    /// (default: the current head).
    pub async fn calculate(&self, kind: SubmissionKind, block: Option<u64>) -> Result<Participation, QueryError> {
        let block = self.resolve_block(block).await?;
        let tag = BlockTag::Number(block);
        let (frequency, member_count) = self.read_parameters(kind, tag).await?;

        let floor = lookback_floor(block, frequency, self.config.lookback_intervals);
        let baseline = self
            .dao
            .latest_member_count_changed_block(self.logs.as_ref(), floor, block, self.max_range())
            .await?;
        let window = Window::new(baseline, block, frequency)?;
        let expected = expected_submissions(window.intervals, member_count);
        debug!(%kind, block, floor, baseline, start = window.start_block, intervals = window.intervals, "participation window");

        let members = self.members(member_count, tag).await?;
        let submissions = self.submissions(kind);
        let intervals = usize::try_from(window.intervals)
            .map_err(|_| QueryError::InvalidConfig(format!("{} intervals do not fit in memory", window.intervals)))?;

        let mut participation = IndexMap::with_capacity(members.len());
        let mut actual_submissions = IndexMap::with_capacity(members.len());
        for &member in &members {
            let mut row = vec![false; intervals];
            if intervals > 0 {
                let blocks = submissions
                    .submission_blocks(self.logs.as_ref(), member, window.start_block, block, self.max_range())
                    .await?;
                for submitted in blocks {
                    if let Some(index) = window.index_of(submitted) {
                        row[index] = true;
                    }
                }
            }
            actual_submissions.insert(member, row.iter().filter(|s| **s).count() as u64);
            participation.insert(member, row);
        }

        let (chi, probability) = if intervals == 0 {
            (0.0, 1.0)
        } else {
            let chi = chi_square(actual_submissions.values().copied(), expected);
            (chi, fit_probability(self.functions.as_ref(), members.len(), chi)?)
        };

        info!(
            %kind,
            block,
            members = members.len(),
            intervals = window.intervals,
            expected,
            chi_square = chi,
            probability,
            "participation calculated"
        );
        Ok(Participation {
            kind,
            block,
            start_block: window.start_block,
            update_frequency: frequency,
            update_count: window.intervals,
            expected_submissions: expected,
            chi_square: chi,
            probability,
            actual_submissions,
            participation,
        })
    }

    /// Whether each member has submitted `kind` during the interval that
    /// contains `block` (default: the current head).
    pub async fn latest(&self, kind: SubmissionKind, block: Option<u64>) -> Result<IndexMap<Address, bool>, QueryError> {
        let block = self.resolve_block(block).await?;
        let tag = BlockTag::Number(block);
        let (frequency, member_count) = self.read_parameters(kind, tag).await?;
        let members = self.members(member_count, tag).await?;

        let from = block / frequency * frequency;
        let submitters = self
            .submissions(kind)
            .submitters(self.logs.as_ref(), from, block, self.max_range())
            .await?;
        debug!(%kind, from, to = block, submitters = submitters.len(), "latest interval submissions");

        Ok(members
            .into_iter()
            .map(|member| (member, submitters.contains(&member)))
            .collect())
    }

    async fn resolve_block(&self, block: Option<u64>) -> Result<u64, QueryError> {
        match block {
            Some(block) => Ok(block),
            None => Ok(self.logs.block_number().await?),
        }
    }

    /// Submit frequency and member count, read in one strict batch.
    async fn read_parameters(&self, kind: SubmissionKind, block: BlockTag) -> Result<(u64, u64), QueryError> {
        let frequency = Slot::new();
        let member_count = Slot::new();
        self.engine
            .query(
                |batch| {
                    self.settings.add_submit_frequency(batch, &frequency, kind)?;
                    self.dao.add_member_count(batch, &member_count)
                },
                block,
            )
            .await?;

        let frequency = frequency
            .get()
            .ok_or_else(|| QueryError::encoding("submit frequency missing"))?;
        let member_count = member_count
            .get()
            .ok_or_else(|| QueryError::encoding("member count missing"))?;
        if frequency == 0 {
            return Err(QueryError::InvalidConfig(format!("{kind} submit frequency is 0")));
        }
        if member_count == 0 {
            return Err(QueryError::InvalidConfig("oracle DAO has no members".into()));
        }
        Ok((frequency, member_count))
    }

    async fn members(&self, count: u64, block: BlockTag) -> Result<Vec<Address>, QueryError> {
        let count = usize::try_from(count)
            .map_err(|_| QueryError::InvalidConfig(format!("member count {count} out of range")))?;
        self.dao
            .member_addresses(&self.engine, count, self.config.member_batch_size, block)
            .await
    }

    fn submissions(&self, kind: SubmissionKind) -> &SubmissionLog {
        match kind {
            SubmissionKind::Prices => &self.prices,
            SubmissionKind::Balances => &self.balances,
        }
    }

    fn max_range(&self) -> Option<u64> {
        self.config
            .log_interval_size
            .or(self.engine.config().log_interval_size)
    }
}

impl std::fmt::Debug for ParticipationCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipationCalculator")
            .field("dao", &self.dao.dao().address())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
