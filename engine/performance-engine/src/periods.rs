//! # Multi-Period Season Aggregation
//!
//! Season totals rolled into named periods. Multi-season periods average each
//! season's own rate ("average of averages") so one high-volume season cannot
//! dominate the baseline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::derivation::{average, evaluate, safe_divide, sample_std_dev};
use crate::models::{Metric, PlayerId, PriorSpec, SeasonTotal};

/// Weights of the weighted period, most recent sub-period first
pub const WEIGHTED_PERIOD_WEIGHTS: [f64; 3] = [3.0, 2.0, 1.0];

/// Fixed divisor of the weighted period
pub const WEIGHTED_PERIOD_DIVISOR: f64 = 6.0;

/// Averaged values, seasons used, combined games played
pub type SeasonAggregation = (BTreeMap<Metric, Option<f64>>, usize, u32);

/// Named aggregation period
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    /// The season being scored
    Current,
    /// Most recent season strictly before the current one
    Prior,
    /// Average of up to three most recent prior seasons
    TrailingThreeAvg,
    /// Average of every prior season
    AllPriorAvg,
    /// `(prior×3 + two-season avg×2 + three-season avg×1) / 6`
    Weighted,
}

impl Period {
    pub const ALL: [Period; 5] = [
        Period::Current,
        Period::Prior,
        Period::TrailingThreeAvg,
        Period::AllPriorAvg,
        Period::Weighted,
    ];
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Period::Current => "current",
            Period::Prior => "prior",
            Period::TrailingThreeAvg => "trailing_3_avg",
            Period::AllPriorAvg => "all_prior_avg",
            Period::Weighted => "weighted",
        };
        f.write_str(name)
    }
}

/// How the weighted period treats a sub-period that lacks enough seasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingPeriodPolicy {
    /// Divide by the weights actually present
    #[default]
    Renormalize,
    /// Absent sub-periods contribute zero against the fixed divisor of 6
    ZeroFill,
}

/// Per-game and per-60 values of one player over one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodAggregate {
    pub player_id: PlayerId,
    pub period: Period,
    /// Seasons that contributed; fewer than the period asks for is reported, not padded
    pub seasons_used: usize,
    pub games_played: u32,
    /// Counting metrics per game, derived metrics as rates
    pub values: BTreeMap<Metric, Option<f64>>,
}

impl PeriodAggregate {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied().flatten()
    }
}

/// One season's own rate for every metric
pub fn season_values(total: &SeasonTotal) -> BTreeMap<Metric, Option<f64>> {
    let games = Some(f64::from(total.games_played));
    Metric::all()
        .map(|metric| {
            let value = if metric.is_counting() {
                safe_divide(total.stats.get(metric), games)
            } else {
                evaluate(metric, &total.stats)
            };
            (metric, value)
        })
        .collect()
}

/// Average each season's own rate over the seasons the predicate keeps.
///
/// `seasons` must be sorted most recent first; the predicate receives the
/// position in that order. Returns the averaged values, the seasons used, and
/// their combined games.
pub fn aggregate_over_seasons<F>(seasons: &[&SeasonTotal], predicate: F) -> SeasonAggregation
where
    F: Fn(usize, &SeasonTotal) -> bool,
{
    let selected: Vec<&SeasonTotal> = seasons
        .iter()
        .enumerate()
        .filter(|(i, s)| predicate(*i, s))
        .map(|(_, s)| *s)
        .collect();

    let per_season: Vec<BTreeMap<Metric, Option<f64>>> =
        selected.iter().map(|s| season_values(s)).collect();

    let values = Metric::all()
        .map(|metric| (metric, average(per_season.iter().map(|v| v.get(&metric).copied().flatten()))))
        .collect();
    let games = selected.iter().map(|s| s.games_played).sum();

    (values, selected.len(), games)
}

/// Blend `(weight, value)` parts under the given policy.
///
/// Returns `None` when no part is present.
pub fn weighted_blend(parts: &[(f64, Option<f64>)], policy: MissingPeriodPolicy) -> Option<f64> {
    let present: Vec<(f64, f64)> = parts.iter().filter_map(|(w, v)| v.map(|v| (*w, v))).collect();
    if present.is_empty() {
        return None;
    }

    let numerator: f64 = present.iter().map(|(w, v)| w * v).sum();
    let denominator = match policy {
        MissingPeriodPolicy::Renormalize => present.iter().map(|(w, _)| w).sum(),
        MissingPeriodPolicy::ZeroFill => WEIGHTED_PERIOD_DIVISOR,
    };
    safe_divide(Some(numerator), Some(denominator))
}

/// Builds the period table for one player
#[derive(Debug, Clone, Default)]
pub struct MultiPeriodSeasonAggregator {
    policy: MissingPeriodPolicy,
}

impl MultiPeriodSeasonAggregator {
    pub fn new(policy: MissingPeriodPolicy) -> Self {
        Self { policy }
    }

    /// Every period for one player. Periods with no usable seasons are still
    /// emitted, with absent values and `seasons_used == 0`.
    pub fn aggregate(
        &self,
        player_id: PlayerId,
        seasons: &[SeasonTotal],
        current_season: i32,
    ) -> Vec<PeriodAggregate> {
        let current: Vec<&SeasonTotal> = seasons.iter().filter(|s| s.season == current_season).collect();
        let prior = prior_seasons(seasons, current_season);

        let build = |period: Period, (values, seasons_used, games_played): SeasonAggregation| PeriodAggregate {
            player_id,
            period,
            seasons_used,
            games_played,
            values,
        };

        let rows = vec![
            build(Period::Current, aggregate_over_seasons(&current, |_, _| true)),
            build(Period::Prior, aggregate_over_seasons(&prior, |i, _| i == 0)),
            build(Period::TrailingThreeAvg, aggregate_over_seasons(&prior, |i, _| i < 3)),
            build(Period::AllPriorAvg, aggregate_over_seasons(&prior, |_, _| true)),
            self.weighted(player_id, &prior),
        ];

        debug!(
            "Aggregated {} periods for player {} ({} prior seasons)",
            rows.len(),
            player_id,
            prior.len()
        );
        rows
    }

    fn weighted(&self, player_id: PlayerId, prior: &[&SeasonTotal]) -> PeriodAggregate {
        // each sub-period needs its full complement of seasons, otherwise it is absent
        let sub_period = |required: usize| {
            (prior.len() >= required).then(|| aggregate_over_seasons(prior, |i, _| i < required).0)
        };
        let last = sub_period(1);
        let two = sub_period(2);
        let three = sub_period(3);

        let values = Metric::all()
            .map(|metric| {
                let pick = |table: &Option<BTreeMap<Metric, Option<f64>>>| {
                    table.as_ref().and_then(|t| t.get(&metric).copied().flatten())
                };
                let parts = [
                    (WEIGHTED_PERIOD_WEIGHTS[0], pick(&last)),
                    (WEIGHTED_PERIOD_WEIGHTS[1], pick(&two)),
                    (WEIGHTED_PERIOD_WEIGHTS[2], pick(&three)),
                ];
                (metric, weighted_blend(&parts, self.policy))
            })
            .collect();

        let used = prior.len().min(3);
        PeriodAggregate {
            player_id,
            period: Period::Weighted,
            seasons_used: used,
            games_played: prior.iter().take(used).map(|s| s.games_played).sum(),
            values,
        }
    }

    /// Prior for the Bayesian baseline from a player's history: mean of the
    /// prior seasons' own values, spread as their sample standard deviation
    /// (unknown with fewer than two seasons).
    pub fn historical_prior(
        &self,
        seasons: &[SeasonTotal],
        current_season: i32,
        metric: Metric,
    ) -> Option<PriorSpec> {
        let values: Vec<f64> = prior_seasons(seasons, current_season)
            .into_iter()
            .filter_map(|s| season_values(s).get(&metric).copied().flatten())
            .collect();

        let mean = average(values.iter().map(|v| Some(*v)))?;
        let std_dev = (values.len() >= 2).then(|| sample_std_dev(&values));
        Some(PriorSpec { mean, std_dev })
    }
}

/// Seasons strictly before `current_season`, most recent first
fn prior_seasons(seasons: &[SeasonTotal], current_season: i32) -> Vec<&SeasonTotal> {
    let mut prior: Vec<&SeasonTotal> = seasons.iter().filter(|s| s.season < current_season).collect();
    prior.sort_by(|a, b| b.season.cmp(&a.season));
    prior
}
