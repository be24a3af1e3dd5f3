//! # Sustainability Scorer
//!
//! Blends per-metric z-scores and the leading PCA component into one
//! composite, then asks whether a performance that far from baseline is
//! likely to hold up.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::derivation::finite;
use crate::error::{EngineError, Result};
use crate::models::{Metric, PlayerId};

/// Key used for the PCA signal in importance rankings
pub const PCA_SIGNAL: &str = "pca";

/// One input to the composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Signal {
    Metric(Metric),
    PrincipalComponent,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Metric(m) => f.write_str(m.as_str()),
            Signal::PrincipalComponent => f.write_str(PCA_SIGNAL),
        }
    }
}

impl FromStr for Signal {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case(PCA_SIGNAL) {
            return Ok(Signal::PrincipalComponent);
        }
        s.parse::<Metric>().map(Signal::Metric).map_err(|_| EngineError::UnknownMetric {
            name: s.to_string(),
            context: "metric_importance_ranking".to_string(),
        })
    }
}

impl TryFrom<String> for Signal {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Signal> for String {
    fn from(signal: Signal) -> Self {
        signal.to_string()
    }
}

/// Normalize 1-based importance ranks into weights summing to 1.
///
/// `w_i = (1/rank_i) / Σ(1/rank_j)`; callers reject rank 0 beforehand.
pub fn importance_weights(ranking: &BTreeMap<Signal, u32>) -> BTreeMap<Signal, f64> {
    let total: f64 = ranking.values().map(|r| 1.0 / *r as f64).sum();
    ranking.iter().map(|(signal, rank)| (*signal, (1.0 / *rank as f64) / total)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Sustainable,
    UnsustainableAboveAverage,
    UnsustainableBelowAverage,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Sustainable => write!(f, "Sustainable"),
            Classification::UnsustainableAboveAverage => write!(f, "Unsustainable-Above-Average"),
            Classification::UnsustainableBelowAverage => write!(f, "Unsustainable-Below-Average"),
        }
    }
}

/// Output row for one player-game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SustainabilityResult {
    pub player_id: PlayerId,
    pub game_id: i64,
    pub game_date: NaiveDate,
    pub composite_score: f64,
    pub p_value: f64,
    pub classification: Classification,
    pub signals_used: Vec<Signal>,
}

#[derive(Debug, Clone)]
pub struct SustainabilityScorer {
    weights: BTreeMap<Signal, f64>,
    significance_level: f64,
    standard_normal: Normal,
}

impl SustainabilityScorer {
    pub fn new(weights: BTreeMap<Signal, f64>, significance_level: f64) -> Result<Self> {
        let standard_normal = Normal::new(0.0, 1.0)
            .map_err(|e| EngineError::Configuration(format!("standard normal: {}", e)))?;
        Ok(Self { weights, significance_level, standard_normal })
    }

    /// Weighted mean of the signals that are present and weighted.
    ///
    /// Returns the composite and the signals that contributed, or `None` when
    /// nothing usable remains.
    pub fn composite(&self, signals: &BTreeMap<Signal, f64>) -> Option<(f64, Vec<Signal>)> {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut used = Vec::new();

        for (signal, z) in signals {
            let (Some(weight), Some(z)) = (self.weights.get(signal), finite(*z)) else {
                continue;
            };
            weighted_sum += weight * z;
            weight_total += weight;
            used.push(*signal);
        }

        if used.is_empty() || weight_total <= 0.0 {
            return None;
        }
        finite(weighted_sum / weight_total).map(|c| (c, used))
    }

    /// Two-tailed p-value of a standard-normal score
    pub fn p_value(&self, z: f64) -> f64 {
        (2.0 * (1.0 - self.standard_normal.cdf(z.abs()))).clamp(0.0, 1.0)
    }

    pub fn classify(&self, composite: f64, p_value: f64) -> Classification {
        if p_value < self.significance_level {
            if composite > 0.0 {
                Classification::UnsustainableAboveAverage
            } else {
                Classification::UnsustainableBelowAverage
            }
        } else {
            Classification::Sustainable
        }
    }

    /// Score one player-game; `None` when no signal is usable
    pub fn score(
        &self,
        player_id: PlayerId,
        game_id: i64,
        game_date: NaiveDate,
        signals: &BTreeMap<Signal, f64>,
    ) -> Option<SustainabilityResult> {
        let (composite_score, signals_used) = self.composite(signals)?;
        let p_value = self.p_value(composite_score);

        Some(SustainabilityResult {
            player_id,
            game_id,
            game_date,
            composite_score,
            p_value,
            classification: self.classify(composite_score, p_value),
            signals_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_scorer() -> SustainabilityScorer {
        let ranking = BTreeMap::from([
            (Signal::Metric(Metric::GoalsPer60), 1),
            (Signal::Metric(Metric::ShotsPer60), 2),
            (Signal::PrincipalComponent, 2),
        ]);
        SustainabilityScorer::new(importance_weights(&ranking), 0.05).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, 2).unwrap()
    }

    #[test]
    fn test_importance_weights_normalize() {
        let ranking = BTreeMap::from([
            (Signal::Metric(Metric::GoalsPer60), 1),
            (Signal::Metric(Metric::ShotsPer60), 2),
        ]);
        let weights = importance_weights(&ranking);

        assert!((weights[&Signal::Metric(Metric::GoalsPer60)] - 2.0 / 3.0).abs() < 1e-12);
        assert!((weights[&Signal::Metric(Metric::ShotsPer60)] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_large_positive_composite_is_unsustainable_above() {
        let scorer = create_test_scorer();
        let signals = BTreeMap::from([(Signal::Metric(Metric::GoalsPer60), 3.0)]);
        let result = scorer.score(1, 10, date(), &signals).unwrap();

        assert!((result.composite_score - 3.0).abs() < 1e-12);
        assert!((result.p_value - 0.0027).abs() < 1e-4);
        assert_eq!(result.classification, Classification::UnsustainableAboveAverage);
    }

    #[test]
    fn test_small_composite_is_sustainable() {
        let scorer = create_test_scorer();
        let signals = BTreeMap::from([(Signal::Metric(Metric::GoalsPer60), 0.1)]);
        let result = scorer.score(1, 10, date(), &signals).unwrap();

        assert!((result.p_value - 0.92).abs() < 1e-2);
        assert_eq!(result.classification, Classification::Sustainable);
    }

    #[test]
    fn test_large_negative_composite_is_unsustainable_below() {
        let scorer = create_test_scorer();
        let signals = BTreeMap::from([(Signal::PrincipalComponent, -2.5)]);
        let result = scorer.score(1, 10, date(), &signals).unwrap();
        assert_eq!(result.classification, Classification::UnsustainableBelowAverage);
    }

    #[test]
    fn test_composite_reweights_over_present_signals() {
        let scorer = create_test_scorer();
        // weights 0.5 / 0.25 / 0.25; the NaN and unweighted signals drop out
        let signals = BTreeMap::from([
            (Signal::Metric(Metric::GoalsPer60), 2.0),
            (Signal::Metric(Metric::ShotsPer60), f64::NAN),
            (Signal::Metric(Metric::Hits), 9.0),
            (Signal::PrincipalComponent, -1.0),
        ]);
        let (composite, used) = scorer.composite(&signals).unwrap();

        assert!((composite - 1.0).abs() < 1e-12);
        assert_eq!(used, vec![Signal::Metric(Metric::GoalsPer60), Signal::PrincipalComponent]);
    }

    #[test]
    fn test_no_usable_signal_yields_no_result() {
        let scorer = create_test_scorer();
        assert!(scorer.score(1, 10, date(), &BTreeMap::new()).is_none());

        let unweighted = BTreeMap::from([(Signal::Metric(Metric::Hits), 4.0)]);
        assert!(scorer.score(1, 10, date(), &unweighted).is_none());
    }

    #[test]
    fn test_signal_names() {
        assert_eq!("pca".parse::<Signal>().unwrap(), Signal::PrincipalComponent);
        assert_eq!(
            "goals_per_60".parse::<Signal>().unwrap(),
            Signal::Metric(Metric::GoalsPer60)
        );
        assert!("expected_wins".parse::<Signal>().is_err());
        assert_eq!(serde_json::to_string(&Signal::PrincipalComponent).unwrap(), "\"pca\"");
    }
}
