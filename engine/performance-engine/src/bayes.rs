//! Personalized Bayesian baselines
//!
//! One conjugate Normal-Normal posterior per (player, metric). Each game is
//! scored against the posterior as it stood before the game, then folded in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::derivation::finite;
use crate::models::{Metric, PlayerId, PriorSpec};

/// Belief about a player's true per-game level of one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BayesianPosterior {
    pub mean: f64,
    pub variance: f64,
}

impl BayesianPosterior {
    /// Prior variance is the historical std-dev squared, or 1 when that is
    /// unknown or degenerate.
    pub fn from_prior(prior: PriorSpec) -> Self {
        let variance = prior
            .std_dev
            .map(|sd| sd * sd)
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(1.0);
        Self { mean: prior.mean, variance }
    }

    /// Standardized distance of `observation` from the current belief
    pub fn z_score(&self, observation: f64) -> Option<f64> {
        finite((observation - self.mean) / self.variance.sqrt())
    }

    /// Fold one observation in; `observation_variance` must be positive
    pub fn update(&mut self, observation: f64, observation_variance: f64) {
        let prior_precision = 1.0 / self.variance;
        let obs_precision = 1.0 / observation_variance;
        let posterior_precision = prior_precision + obs_precision;

        self.mean = (self.mean * prior_precision + observation * obs_precision) / posterior_precision;
        self.variance = 1.0 / posterior_precision;
    }
}

/// All posteriors for one player
#[derive(Debug, Clone)]
pub struct BayesianBaselineUpdater {
    player_id: PlayerId,
    posteriors: BTreeMap<Metric, BayesianPosterior>,
    observation_variance: BTreeMap<Metric, f64>,
}

impl BayesianBaselineUpdater {
    /// Track every metric that has both a prior and an observation variance
    pub fn new(
        player_id: PlayerId,
        priors: &BTreeMap<Metric, PriorSpec>,
        observation_variance: &BTreeMap<Metric, f64>,
    ) -> Self {
        let posteriors: BTreeMap<Metric, BayesianPosterior> = priors
            .iter()
            .filter(|(m, p)| observation_variance.contains_key(m) && p.mean.is_finite())
            .map(|(m, p)| (*m, BayesianPosterior::from_prior(*p)))
            .collect();

        debug!("Initialized {} posteriors for player {}", posteriors.len(), player_id);
        Self { player_id, posteriors, observation_variance: observation_variance.clone() }
    }

    /// Score one observation against the pre-update posterior, then update.
    ///
    /// Returns `None` (and leaves the posterior untouched) when the value is
    /// absent or the metric is untracked.
    pub fn observe(&mut self, metric: Metric, value: Option<f64>) -> Option<f64> {
        let value = value.filter(|v| v.is_finite())?;
        let obs_variance = *self.observation_variance.get(&metric)?;
        let posterior = self.posteriors.get_mut(&metric)?;

        let z = posterior.z_score(value);
        posterior.update(value, obs_variance);
        z
    }

    /// Observe several metrics of the same game; returns the z-scores produced
    pub fn observe_all<I>(&mut self, values: I) -> BTreeMap<Metric, f64>
    where
        I: IntoIterator<Item = (Metric, Option<f64>)>,
    {
        values.into_iter().filter_map(|(m, v)| self.observe(m, v).map(|z| (m, z))).collect()
    }

    pub fn posterior(&self, metric: Metric) -> Option<&BayesianPosterior> {
        self.posteriors.get(&metric)
    }

    pub fn tracked_metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.posteriors.keys().copied()
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn updater(mean: f64, std_dev: Option<f64>, obs_var: f64) -> BayesianBaselineUpdater {
        let priors = BTreeMap::from([(Metric::GoalsPer60, PriorSpec { mean, std_dev })]);
        let variance = BTreeMap::from([(Metric::GoalsPer60, obs_var)]);
        BayesianBaselineUpdater::new(8478402, &priors, &variance)
    }

    #[test]
    fn test_conjugate_update() {
        // prior N(1, 1), observation 3 with variance 1 -> N(2, 0.5)
        let mut posterior = BayesianPosterior { mean: 1.0, variance: 1.0 };
        posterior.update(3.0, 1.0);

        assert!((posterior.mean - 2.0).abs() < 1e-12);
        assert!((posterior.variance - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_prior_variance_defaults_to_one() {
        let none = BayesianPosterior::from_prior(PriorSpec { mean: 2.0, std_dev: None });
        let zero = BayesianPosterior::from_prior(PriorSpec { mean: 2.0, std_dev: Some(0.0) });
        let set = BayesianPosterior::from_prior(PriorSpec { mean: 2.0, std_dev: Some(0.5) });

        assert_eq!(none.variance, 1.0);
        assert_eq!(zero.variance, 1.0);
        assert_eq!(set.variance, 0.25);
    }

    #[test]
    fn test_z_score_uses_pre_update_posterior() {
        let mut updater = updater(1.0, Some(2.0), 4.0);

        let z = updater.observe(Metric::GoalsPer60, Some(5.0)).unwrap();
        assert!((z - 2.0).abs() < 1e-12);

        // N(1, 4) + obs 5 with variance 4 -> N(3, 2)
        let posterior = updater.posterior(Metric::GoalsPer60).unwrap();
        assert!((posterior.mean - 3.0).abs() < 1e-12);
        assert!((posterior.variance - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_absent_and_untracked_observations_are_skipped() {
        let mut updater = updater(1.0, Some(1.0), 1.0);

        assert_eq!(updater.observe(Metric::GoalsPer60, None), None);
        assert_eq!(updater.posterior(Metric::GoalsPer60).unwrap().variance, 1.0);
        assert_eq!(updater.observe(Metric::ShotsPer60, Some(10.0)), None);

        let scores = updater.observe_all([
            (Metric::GoalsPer60, Some(1.0)),
            (Metric::ShotsPer60, Some(3.0)),
        ]);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[&Metric::GoalsPer60], 0.0);
    }

    #[test]
    fn test_prior_without_observation_variance_is_not_tracked() {
        let priors = BTreeMap::from([(Metric::Hits, PriorSpec { mean: 2.0, std_dev: None })]);
        let updater = BayesianBaselineUpdater::new(1, &priors, &BTreeMap::new());
        assert_eq!(updater.player_id(), 1);
        assert_eq!(updater.tracked_metrics().count(), 0);
    }

    proptest! {
        #[test]
        fn prop_posterior_variance_never_increases(
            mean in -10.0f64..10.0,
            sd in 0.01f64..10.0,
            obs_var in 0.01f64..25.0,
            observations in proptest::collection::vec(-50.0f64..50.0, 1..100),
        ) {
            let mut posterior = BayesianPosterior::from_prior(PriorSpec { mean, std_dev: Some(sd) });
            let mut previous = posterior.variance;

            for x in observations {
                posterior.update(x, obs_var);
                prop_assert!(posterior.variance <= previous);
                prop_assert!(posterior.variance > 0.0);
                previous = posterior.variance;
            }
        }
    }
}
