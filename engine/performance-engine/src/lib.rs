//! # Performance Engine
//!
//! Statistical core for per-game skater performance signals.
//!
//! The engine consumes a fully materialized batch of per-game records,
//! season totals and the team schedule, and produces:
//! - rolling all-time and trailing-window totals, averages and per-60 rates,
//!   with team-participation rates from a schedule ledger
//! - multi-season period tables (prior year, trailing averages, weighted)
//! - personalized Bayesian z-scores, blended with a population PCA component
//!   into a sustainability classification
//! - tiered rankings against per-period population baselines
//!
//! It owns no storage and performs no I/O; the `performance-cli` binary is
//! the only filesystem boundary.

pub mod bayes;
pub mod cli;
pub mod config;
pub mod derivation;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod pca;
pub mod periods;
pub mod ranking;
pub mod rolling;
pub mod sustainability;

// Re-export main types for easy usage
pub use bayes::{BayesianBaselineUpdater, BayesianPosterior};
pub use crate::config::{EngineConfig, LoggingConfig, RankingConfig, ValidatedConfig};
pub use engine::{PerformanceEngine, RunOutput};
pub use error::{EngineError, Result};
pub use ledger::{TeamGameEntry, TeamParticipationLedger};
pub use models::{
    EntityBaseline, EntityFailure, GamePerformanceRecord, Metric, PlayerId, PriorSpec, RunInput, ScheduledGame,
    SeasonTotal, StatLine, StrengthContext,
};
pub use pca::{PCAReducer, PcaModel};
pub use periods::{MissingPeriodPolicy, MultiPeriodSeasonAggregator, Period, PeriodAggregate};
pub use ranking::{Direction, RankingClassifier, RankingGranularity, RankingResult, SeasonRankingSummary, Tier};
pub use rolling::{RollingWindowAccumulator, WindowSize, WindowSnapshot};
pub use sustainability::{Classification, Signal, SustainabilityResult, SustainabilityScorer};
