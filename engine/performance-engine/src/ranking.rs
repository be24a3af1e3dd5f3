//! # Ranking Classifier
//!
//! Compares a player's period line against the population average for the
//! same period, buckets the share of metrics met into a tier, and rolls
//! per-period points up into a season summary with a consistency measure.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

use crate::derivation::{average, evaluate_pooled, sample_std_dev};
use crate::models::{GamePerformanceRecord, Metric, PlayerId, StatLine};

/// Per-period baseline: population average per metric
pub type BaselineTable = BTreeMap<Metric, f64>;

/// Which side of the baseline counts as "met"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[serde(alias = "larger-is-better", alias = "larger")]
    LargerIsBetter,
    #[serde(alias = "smaller-is-better", alias = "smaller")]
    SmallerIsBetter,
}

impl Direction {
    /// Meet-or-beat; ties count in the player's favor
    pub fn meets(self, value: f64, baseline: f64) -> bool {
        match self {
            Direction::LargerIsBetter => value >= baseline,
            Direction::SmallerIsBetter => value <= baseline,
        }
    }
}

/// A metric selected for ranking, with its favorable direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedMetric {
    pub metric: Metric,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Elite,
    Quality,
    Average,
    Bad,
    ReallyBad,
}

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::Elite, Tier::Quality, Tier::Average, Tier::Bad, Tier::ReallyBad];

    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 80.0 {
            Tier::Elite
        } else if percentage >= 60.0 {
            Tier::Quality
        } else if percentage >= 45.0 {
            Tier::Average
        } else if percentage >= 30.0 {
            Tier::Bad
        } else {
            Tier::ReallyBad
        }
    }

    pub fn points(self) -> u32 {
        match self {
            Tier::Elite => 20,
            Tier::Quality => 10,
            Tier::Average => 5,
            Tier::Bad => 3,
            Tier::ReallyBad => 1,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Elite => write!(f, "Elite"),
            Tier::Quality => write!(f, "Quality"),
            Tier::Average => write!(f, "Average"),
            Tier::Bad => write!(f, "Bad"),
            Tier::ReallyBad => write!(f, "Really-Bad"),
        }
    }
}

/// How observations are grouped into ranking periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingGranularity {
    #[default]
    Game,
    Week,
}

impl RankingGranularity {
    /// Period label for a game date: the date itself, or its ISO week
    pub fn period_key(self, date: NaiveDate) -> String {
        match self {
            RankingGranularity::Game => date.format("%Y-%m-%d").to_string(),
            RankingGranularity::Week => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
        }
    }
}

/// Ranking of one player over one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    pub player_id: PlayerId,
    pub period: String,
    pub percentage_better_than_baseline: f64,
    pub tier: Tier,
    pub points: u32,
    pub metrics_met: usize,
    pub metrics_compared: usize,
}

/// Season roll-up of a player's per-period rankings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonRankingSummary {
    pub player_id: PlayerId,
    pub total_points: u32,
    pub tier_counts: BTreeMap<Tier, u32>,
    /// Sample std-dev of per-period points; lower is more consistent
    pub points_std_dev: f64,
    pub periods: usize,
}

/// Each player's game lines per period, keyed by (period, player)
pub type PeriodObservations = BTreeMap<(String, PlayerId), Vec<StatLine>>;

/// Group records into ranking periods, collecting each player's lines per period
pub fn group_observations<'a, I>(records: I, granularity: RankingGranularity) -> PeriodObservations
where
    I: IntoIterator<Item = &'a GamePerformanceRecord>,
{
    let mut grouped = PeriodObservations::new();
    for record in records {
        let key = (granularity.period_key(record.game_date), record.player_id);
        grouped.entry(key).or_default().push(record.stats.clone());
    }
    grouped
}

pub struct RankingClassifier {
    metrics: Vec<RankedMetric>,
}

impl RankingClassifier {
    pub fn new(metrics: Vec<RankedMetric>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &[RankedMetric] {
        &self.metrics
    }

    /// Population average of every selected metric, per period
    pub fn population_baselines(&self, observations: &PeriodObservations) -> HashMap<String, BaselineTable> {
        let mut by_period: HashMap<&str, Vec<&[StatLine]>> = HashMap::new();
        for ((period, _), games) in observations {
            by_period.entry(period.as_str()).or_default().push(games);
        }

        by_period
            .into_iter()
            .map(|(period, lines)| {
                let table: BaselineTable = self
                    .metrics
                    .iter()
                    .filter_map(|rm| {
                        average(lines.iter().map(|games| evaluate_pooled(rm.metric, *games))).map(|avg| (rm.metric, avg))
                    })
                    .collect();
                debug!("Baseline for {} covers {} metrics over {} players", period, table.len(), lines.len());
                (period.to_string(), table)
            })
            .collect()
    }

    /// Count selected metrics meeting the baseline over a period's games.
    /// Returns (met, compared).
    pub fn compare(&self, games: &[StatLine], baseline: &BaselineTable) -> (usize, usize) {
        self.metrics
            .iter()
            .filter_map(|rm| {
                let value = evaluate_pooled(rm.metric, games)?;
                let base = baseline.get(&rm.metric).copied().filter(|b| b.is_finite())?;
                Some(rm.direction.meets(value, base))
            })
            .fold((0, 0), |(met, compared), hit| (met + usize::from(hit), compared + 1))
    }

    pub fn rank(
        &self,
        player_id: PlayerId,
        period: &str,
        games: &[StatLine],
        baseline: &BaselineTable,
    ) -> RankingResult {
        let (metrics_met, metrics_compared) = self.compare(games, baseline);
        let percentage = if metrics_compared == 0 {
            0.0
        } else {
            metrics_met as f64 / metrics_compared as f64 * 100.0
        };
        let tier = Tier::from_percentage(percentage);

        RankingResult {
            player_id,
            period: period.to_string(),
            percentage_better_than_baseline: percentage,
            tier,
            points: tier.points(),
            metrics_met,
            metrics_compared,
        }
    }

    /// Rank every grouped observation against its period's baseline
    pub fn rank_all(&self, observations: &PeriodObservations) -> Vec<RankingResult> {
        let baselines = self.population_baselines(observations);
        let empty = BaselineTable::new();

        observations
            .iter()
            .map(|((period, player_id), games)| {
                let baseline = baselines.get(period).unwrap_or(&empty);
                self.rank(*player_id, period, games, baseline)
            })
            .collect()
    }
}

/// Roll one player's period results into a season summary
pub fn summarize(player_id: PlayerId, results: &[&RankingResult]) -> SeasonRankingSummary {
    let mut tier_counts: BTreeMap<Tier, u32> = Tier::ALL.iter().map(|t| (*t, 0)).collect();
    for result in results {
        *tier_counts.entry(result.tier).or_insert(0) += 1;
    }
    let points: Vec<f64> = results.iter().map(|r| r.points as f64).collect();

    SeasonRankingSummary {
        player_id,
        total_points: results.iter().map(|r| r.points).sum(),
        tier_counts,
        points_std_dev: sample_std_dev(&points),
        periods: results.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StrengthContext;

    fn create_test_classifier() -> RankingClassifier {
        RankingClassifier::new(vec![
            RankedMetric { metric: Metric::Goals, direction: Direction::LargerIsBetter },
            RankedMetric { metric: Metric::Shots, direction: Direction::LargerIsBetter },
            RankedMetric { metric: Metric::PenaltyMinutes, direction: Direction::SmallerIsBetter },
        ])
    }

    fn line(goals: Option<f64>, shots: Option<f64>, pim: Option<f64>) -> [StatLine; 1] {
        [StatLine { goals, shots, penalty_minutes: pim, ..Default::default() }]
    }

    fn record(player_id: PlayerId, day: u32, goals: f64) -> GamePerformanceRecord {
        GamePerformanceRecord {
            player_id,
            game_id: day as i64,
            game_date: NaiveDate::from_ymd_opt(2024, 10, day).unwrap(),
            season: 2024,
            team: "TOR".into(),
            strength: StrengthContext::All,
            stats: StatLine { goals: Some(goals), ..Default::default() },
        }
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(Tier::from_percentage(100.0), Tier::Elite);
        assert_eq!(Tier::from_percentage(80.0), Tier::Elite);
        assert_eq!(Tier::from_percentage(79.999), Tier::Quality);
        assert_eq!(Tier::from_percentage(60.0), Tier::Quality);
        assert_eq!(Tier::from_percentage(45.0), Tier::Average);
        assert_eq!(Tier::from_percentage(30.0), Tier::Bad);
        assert_eq!(Tier::from_percentage(29.999), Tier::ReallyBad);
        assert_eq!(Tier::from_percentage(0.0), Tier::ReallyBad);
    }

    #[test]
    fn test_tier_points() {
        let points: Vec<u32> = Tier::ALL.iter().map(|t| t.points()).collect();
        assert_eq!(points, vec![20, 10, 5, 3, 1]);
    }

    #[test]
    fn test_meet_or_beat_in_both_directions() {
        let classifier = create_test_classifier();
        let baseline = BaselineTable::from([
            (Metric::Goals, 1.0),
            (Metric::Shots, 3.0),
            (Metric::PenaltyMinutes, 2.0),
        ]);

        // ties count as met in both directions
        let result = classifier.rank(1, "2024-10-12", &line(Some(1.0), Some(2.0), Some(2.0)), &baseline);
        assert_eq!((result.metrics_met, result.metrics_compared), (2, 3));
        assert!((result.percentage_better_than_baseline - 66.666_666).abs() < 1e-4);
        assert_eq!(result.tier, Tier::Quality);
        assert_eq!(result.points, 10);
    }

    #[test]
    fn test_missing_values_leave_the_denominator() {
        let classifier = create_test_classifier();
        let baseline = BaselineTable::from([(Metric::Goals, 1.0), (Metric::Shots, f64::NAN)]);

        let result = classifier.rank(1, "p", &line(Some(2.0), Some(5.0), Some(0.0)), &baseline);
        assert_eq!((result.metrics_met, result.metrics_compared), (1, 1));
        assert_eq!(result.tier, Tier::Elite);

        let nothing = classifier.rank(1, "p", &line(None, None, None), &baseline);
        assert_eq!(nothing.metrics_compared, 0);
        assert_eq!(nothing.percentage_better_than_baseline, 0.0);
        assert_eq!(nothing.tier, Tier::ReallyBad);
    }

    #[test]
    fn test_weekly_grouping_and_population_baseline() {
        // Oct 7 and Oct 9 2024 share ISO week 41; Oct 14 starts week 42
        let records = vec![record(1, 7, 1.0), record(1, 9, 2.0), record(2, 8, 1.0), record(1, 14, 0.0)];
        let observations = group_observations(&records, RankingGranularity::Week);

        assert_eq!(observations.len(), 3);
        let week41 = &observations[&("2024-W41".to_string(), 1)];
        assert_eq!(week41.len(), 2);
        assert_eq!(evaluate_pooled(Metric::Goals, week41), Some(3.0));

        let classifier = RankingClassifier::new(vec![RankedMetric {
            metric: Metric::Goals,
            direction: Direction::LargerIsBetter,
        }]);
        let baselines = classifier.population_baselines(&observations);
        assert_eq!(baselines["2024-W41"][&Metric::Goals], 2.0);

        let results = classifier.rank_all(&observations);
        let tiers: Vec<(PlayerId, Tier)> = results.iter().map(|r| (r.player_id, r.tier)).collect();
        // player 1 alone in week 42 meets their own baseline
        assert_eq!(tiers, vec![(1, Tier::Elite), (2, Tier::ReallyBad), (1, Tier::Elite)]);
    }

    #[test]
    fn test_season_summary() {
        let classifier = create_test_classifier();
        let baseline = BaselineTable::from([(Metric::Goals, 1.0)]);
        let results = vec![
            classifier.rank(1, "a", &line(Some(2.0), None, None), &baseline),
            classifier.rank(1, "b", &line(Some(0.0), None, None), &baseline),
            classifier.rank(1, "c", &line(Some(1.0), None, None), &baseline),
        ];
        let refs: Vec<&RankingResult> = results.iter().collect();
        let summary = summarize(1, &refs);

        assert_eq!(summary.total_points, 41);
        assert_eq!(summary.tier_counts[&Tier::Elite], 2);
        assert_eq!(summary.tier_counts[&Tier::ReallyBad], 1);
        assert_eq!(summary.tier_counts[&Tier::Quality], 0);
        // sample std-dev of [20, 1, 20]
        assert!((summary.points_std_dev - 10.969_655).abs() < 1e-5);
        assert_eq!(summary.periods, 3);

        let single = summarize(1, &refs[..1]);
        assert_eq!(single.points_std_dev, 0.0);
    }

    #[test]
    fn test_direction_names() {
        let d: Direction = serde_json::from_str("\"smaller-is-better\"").unwrap();
        assert_eq!(d, Direction::SmallerIsBetter);
        let d: Direction = serde_json::from_str("\"larger_is_better\"").unwrap();
        assert_eq!(d, Direction::LargerIsBetter);
    }

    #[test]
    fn test_weekly_rate_skips_games_without_ice_time() {
        let mut with_toi = record(1, 7, 1.0);
        with_toi.stats.toi_seconds = Some(1200.0);
        // three goals but no ice time recorded
        let without_toi = record(1, 9, 3.0);
        let observations = group_observations(&[with_toi, without_toi], RankingGranularity::Week);
        let week = &observations[&("2024-W41".to_string(), 1)];

        assert_eq!(evaluate_pooled(Metric::Goals, week), Some(4.0));
        assert_eq!(evaluate_pooled(Metric::GoalsPer60, week), Some(3.0));

        let classifier = RankingClassifier::new(vec![RankedMetric {
            metric: Metric::GoalsPer60,
            direction: Direction::LargerIsBetter,
        }]);
        let baselines = classifier.population_baselines(&observations);
        assert_eq!(baselines["2024-W41"][&Metric::GoalsPer60], 3.0);
    }
}
