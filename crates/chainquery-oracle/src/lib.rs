//! chainquery-oracle: oracle DAO queries and submission participation.
//!
//! - [`OracleDao`]: member count, member addresses, last membership change
//! - [`SubmissionLog`] / [`NetworkSettings`]: submission events and frequencies
//! - [`ParticipationCalculator`]: chi-square participation statistics

pub mod dao;
pub mod network;
pub mod participation;
pub mod stats;

pub use dao::OracleDao;
pub use network::{NetworkSettings, SubmissionKind, SubmissionLog};
pub use participation::{
    consensus, expected_submissions, lookback_floor, Participation, ParticipationCalculator,
    ParticipationConfig, Window,
};
pub use stats::{chi_square, fit_probability, SpecialFunctions, Statrs};
