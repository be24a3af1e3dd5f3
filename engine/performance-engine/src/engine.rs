//! # Performance Engine
//!
//! Runs one batch end to end. Every player's stream is processed
//! independently and in parallel; the PCA fit and the population ranking
//! baselines are the only steps that look across players.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::bayes::BayesianBaselineUpdater;
use crate::config::{EngineConfig, ValidatedConfig};
use crate::derivation::evaluate;
use crate::error::{EngineError, Result};
use crate::ledger::TeamParticipationLedger;
use crate::models::{
    EntityBaseline, EntityFailure, GamePerformanceRecord, Metric, PlayerId, PriorSpec, RunInput,
    SeasonTotal, StrengthContext,
};
use crate::pca::{PCAReducer, PcaModel};
use crate::periods::{MultiPeriodSeasonAggregator, PeriodAggregate};
use crate::ranking::{group_observations, summarize, RankingClassifier, RankingResult, SeasonRankingSummary};
use crate::rolling::{RollingWindowAccumulator, WindowSnapshot};
use crate::sustainability::{Signal, SustainabilityResult, SustainabilityScorer};

/// Everything one run produces
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOutput {
    pub window_snapshots: Vec<WindowSnapshot>,
    pub period_aggregates: Vec<PeriodAggregate>,
    pub sustainability: Vec<SustainabilityResult>,
    pub rankings: Vec<RankingResult>,
    pub ranking_summaries: Vec<SeasonRankingSummary>,
    pub pca_model: Option<PcaModel>,
    pub failures: Vec<EntityFailure>,
}

/// One player's slice of the batch
#[derive(Debug, Default)]
struct EntityInput {
    records: Vec<GamePerformanceRecord>,
    seasons: Vec<SeasonTotal>,
    baseline: Option<EntityBaseline>,
}

/// A scoring-strength game awaiting the PCA signal
#[derive(Debug, Clone)]
struct PendingScore {
    player_id: PlayerId,
    game_id: i64,
    game_date: NaiveDate,
    signals: BTreeMap<Signal, f64>,
    features: Vec<Option<f64>>,
}

#[derive(Debug, Default)]
struct EntityOutcome {
    snapshots: Vec<WindowSnapshot>,
    periods: Vec<PeriodAggregate>,
    pending: Vec<PendingScore>,
    records: Vec<GamePerformanceRecord>,
}

/// Batch runner over a validated configuration
pub struct PerformanceEngine {
    config: ValidatedConfig,
    aggregator: MultiPeriodSeasonAggregator,
    reducer: PCAReducer,
    scorer: SustainabilityScorer,
    classifier: RankingClassifier,
}

impl PerformanceEngine {
    /// Validate `config` and build the engine. Any configuration problem is
    /// fatal here, before a single record is touched.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Self::from_validated(config.validate()?)
    }

    pub fn from_validated(config: ValidatedConfig) -> Result<Self> {
        let aggregator = MultiPeriodSeasonAggregator::new(config.missing_period_policy);
        let reducer = PCAReducer::new(config.pca_features.clone(), config.pca_components);
        let scorer = SustainabilityScorer::new(config.importance_weights.clone(), config.significance_level)?;
        let classifier = RankingClassifier::new(config.ranked_metrics.clone());

        debug!(
            "Engine ready: windows {:?}, {} scored metrics, {} pca features",
            config.window_sizes,
            config.scored_metrics().len(),
            config.pca_features.len()
        );
        Ok(Self { config, aggregator, reducer, scorer, classifier })
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// Process one batch. Per-player problems land in `failures`; only
    /// batch-level faults are returned as errors.
    pub fn run(&self, input: RunInput) -> Result<RunOutput> {
        let started = Instant::now();
        info!(
            "🚀 Starting run for season {}: {} records, {} season totals, {} scheduled games",
            input.current_season,
            input.records.len(),
            input.season_totals.len(),
            input.schedule.len()
        );

        let ledger = TeamParticipationLedger::from_schedule(&input.schedule);
        let current_season = input.current_season;
        let entities = group_by_entity(input);

        let results: Vec<(PlayerId, Result<EntityOutcome>)> = entities
            .into_par_iter()
            .map(|(player_id, entity)| (player_id, self.process_entity(player_id, entity, &ledger, current_season)))
            .collect();

        let mut output = RunOutput::default();
        let mut pending = Vec::new();
        let mut scored_records = Vec::new();

        for (player_id, result) in results {
            match result {
                Ok(outcome) => {
                    output.window_snapshots.extend(outcome.snapshots);
                    output.period_aggregates.extend(outcome.periods);
                    pending.extend(outcome.pending);
                    scored_records.extend(outcome.records);
                }
                Err(e) if e.is_entity_scoped() => {
                    warn!("Skipping player {}: {}", player_id, e);
                    output.failures.push(EntityFailure { player_id, reason: e.to_string() });
                }
                Err(e) => return Err(e),
            }
        }

        output.pca_model = self.fit_pca(&pending)?;
        output.sustainability = self.score(pending, output.pca_model.as_ref())?;
        let (rankings, summaries) = self.rank(&scored_records);
        output.rankings = rankings;
        output.ranking_summaries = summaries;

        info!(
            "✅ Run finished in {:?}: {} snapshots, {} periods, {} sustainability rows, {} rankings, {} failures",
            started.elapsed(),
            output.window_snapshots.len(),
            output.period_aggregates.len(),
            output.sustainability.len(),
            output.rankings.len(),
            output.failures.len()
        );
        Ok(output)
    }

    /// Sequential pipeline for one player
    fn process_entity(
        &self,
        player_id: PlayerId,
        entity: EntityInput,
        ledger: &TeamParticipationLedger,
        current_season: i32,
    ) -> Result<EntityOutcome> {
        for record in &entity.records {
            validate_record(record)?;
        }
        for season in &entity.seasons {
            season.stats.validate().map_err(|reason| EngineError::MalformedRecord {
                player_id,
                game_id: 0,
                reason: format!("season {} total: {}", season.season, reason),
            })?;
        }

        let priors = self.priors_for(&entity, current_season);
        let mut updater = BayesianBaselineUpdater::new(player_id, &priors, &self.config.observation_variance);
        let scored_metrics = self.config.scored_metrics();

        let mut accumulators: BTreeMap<StrengthContext, RollingWindowAccumulator> = BTreeMap::new();
        let mut outcome = EntityOutcome::default();

        for record in entity.records {
            let accumulator = accumulators
                .entry(record.strength)
                .or_insert_with(|| RollingWindowAccumulator::new(player_id, record.strength, &self.config.window_sizes));
            outcome.snapshots.extend(accumulator.observe(&record, ledger)?);

            if record.strength != self.config.scoring_strength {
                continue;
            }

            let z_scores = updater.observe_all(scored_metrics.iter().map(|&m| (m, evaluate(m, &record.stats))));
            outcome.pending.push(PendingScore {
                player_id,
                game_id: record.game_id,
                game_date: record.game_date,
                signals: z_scores.into_iter().map(|(m, z)| (Signal::Metric(m), z)).collect(),
                features: self.reducer.features().iter().map(|&m| evaluate(m, &record.stats)).collect(),
            });
            outcome.records.push(record);
        }

        outcome.periods = self.aggregator.aggregate(player_id, &entity.seasons, current_season);

        debug!(
            "Player {}: {} snapshots, {} scored games, {} priors",
            player_id,
            outcome.snapshots.len(),
            outcome.pending.len(),
            priors.len()
        );
        Ok(outcome)
    }

    /// Explicit baseline per metric, else the player's own history
    fn priors_for(&self, entity: &EntityInput, current_season: i32) -> BTreeMap<Metric, PriorSpec> {
        self.config
            .scored_metrics()
            .into_iter()
            .filter_map(|metric| {
                let explicit = entity.baseline.as_ref().and_then(|b| b.priors.get(&metric).copied());
                explicit
                    .or_else(|| self.aggregator.historical_prior(&entity.seasons, current_season, metric))
                    .map(|prior| (metric, prior))
            })
            .collect()
    }

    fn fit_pca(&self, pending: &[PendingScore]) -> Result<Option<PcaModel>> {
        if self.reducer.features().is_empty() {
            return Ok(None);
        }
        let rows: Vec<Vec<Option<f64>>> = pending.iter().map(|p| p.features.clone()).collect();
        let model = self.reducer.fit(&rows)?;
        if model.is_none() && self.config.uses_pca() {
            warn!("PCA signal unavailable for this batch ({} scored games)", rows.len());
        }
        Ok(model)
    }

    fn score(&self, pending: Vec<PendingScore>, model: Option<&PcaModel>) -> Result<Vec<SustainabilityResult>> {
        let mut results = Vec::with_capacity(pending.len());
        let mut skipped = 0usize;

        for mut game in pending {
            if let (Some(model), true) = (model, self.config.uses_pca()) {
                if let Some(score) = model.whitened_score(&game.features, 0)? {
                    game.signals.insert(Signal::PrincipalComponent, score);
                }
            }
            match self.scorer.score(game.player_id, game.game_id, game.game_date, &game.signals) {
                Some(result) => results.push(result),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            debug!("{} scored games had no usable signal", skipped);
        }
        Ok(results)
    }

    fn rank(&self, records: &[GamePerformanceRecord]) -> (Vec<RankingResult>, Vec<SeasonRankingSummary>) {
        if self.classifier.metrics().is_empty() {
            return (Vec::new(), Vec::new());
        }
        let observations = group_observations(records, self.config.ranking_granularity);
        let rankings = self.classifier.rank_all(&observations);

        let mut by_player: BTreeMap<PlayerId, Vec<&RankingResult>> = BTreeMap::new();
        for result in &rankings {
            by_player.entry(result.player_id).or_default().push(result);
        }
        let summaries = by_player.into_iter().map(|(player_id, results)| summarize(player_id, &results)).collect();

        (rankings, summaries)
    }
}

fn validate_record(record: &GamePerformanceRecord) -> Result<()> {
    let malformed = |reason: String| EngineError::MalformedRecord {
        player_id: record.player_id,
        game_id: record.game_id,
        reason,
    };
    if record.team.trim().is_empty() {
        return Err(malformed("empty team id".to_string()));
    }
    record.stats.validate().map_err(malformed)
}

/// Split the batch per player, keeping each player's records in input order
fn group_by_entity(input: RunInput) -> Vec<(PlayerId, EntityInput)> {
    let mut entities: BTreeMap<PlayerId, EntityInput> = BTreeMap::new();

    for record in input.records {
        entities.entry(record.player_id).or_default().records.push(record);
    }
    for season in input.season_totals {
        entities.entry(season.player_id).or_default().seasons.push(season);
    }
    let mut baselines: HashMap<PlayerId, EntityBaseline> =
        input.baselines.into_iter().map(|b| (b.player_id, b)).collect();
    for (player_id, entity) in entities.iter_mut() {
        entity.baseline = baselines.remove(player_id);
    }

    entities.into_iter().collect()
}
