//! # Metric Derivation
//!
//! Stateless safe-math used by every layer above it. An undefined ratio is
//! `None`, never `0.0`: zero is a real measurement and must stay
//! distinguishable from "could not be computed".

use crate::models::{Metric, StatLine};

/// Divide, returning `None` when either side is absent, the denominator is
/// exactly zero, or the result is not finite.
pub fn safe_divide(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let (n, d) = (numerator?, denominator?);
    if d == 0.0 {
        return None;
    }
    finite(n / d)
}

/// Count normalized to 60 minutes of ice time
pub fn per_60(count: Option<f64>, minutes: Option<f64>) -> Option<f64> {
    safe_divide(count.map(|c| c * 60.0), minutes)
}

/// [`per_60`] with the ice time given in seconds
pub fn per_60_from_seconds(count: Option<f64>, seconds: Option<f64>) -> Option<f64> {
    per_60(count, seconds.map(|s| s / 60.0))
}

/// `part / whole * 100`
pub fn percentage(part: Option<f64>, whole: Option<f64>) -> Option<f64> {
    safe_divide(part, whole).map(|ratio| ratio * 100.0)
}

/// Mean of the present, finite entries; `None` if nothing remains
pub fn average<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Bessel-corrected (n − 1) standard deviation; 0 for fewer than two samples
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

pub(crate) fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Evaluate any catalogue metric against a stat line.
///
/// Counting metrics are read straight off the line; derived metrics are
/// computed from its totals.
pub fn evaluate(metric: Metric, line: &StatLine) -> Option<f64> {
    let toi = line.toi_seconds;
    match metric {
        Metric::GoalsPer60 => per_60_from_seconds(line.goals, toi),
        Metric::AssistsPer60 => per_60_from_seconds(line.assists, toi),
        Metric::PointsPer60 => per_60_from_seconds(line.points, toi),
        Metric::ShotsPer60 => per_60_from_seconds(line.shots, toi),
        Metric::ShotAttemptsPer60 => per_60_from_seconds(line.shot_attempts, toi),
        Metric::IxgPer60 => per_60_from_seconds(line.ixg, toi),
        Metric::HitsPer60 => per_60_from_seconds(line.hits, toi),
        Metric::BlockedShotsPer60 => per_60_from_seconds(line.blocked_shots, toi),
        Metric::ShootingPct => percentage(line.goals, line.shots),
        Metric::OnIceShootingPct => percentage(line.on_ice_goals_for, line.on_ice_shots_for),
        Metric::IndividualPointsPct => percentage(line.points, line.on_ice_goals_for),
        Metric::CorsiForPct => {
            let total = match (line.on_ice_shot_attempts_for, line.on_ice_shot_attempts_against) {
                (Some(cf), Some(ca)) => Some(cf + ca),
                _ => None,
            };
            percentage(line.on_ice_shot_attempts_for, total)
        }
        counting => line.get(counting).and_then(finite),
    }
}

/// Evaluate a metric over several games pooled together.
///
/// Only games carrying every input of the metric contribute, so a rate's
/// numerator and denominator always cover the same games. `None` when no
/// game qualifies.
pub fn evaluate_pooled<'a, I>(metric: Metric, lines: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a StatLine>,
{
    let inputs = metric.inputs();
    let mut sums = vec![0.0; inputs.len()];
    let mut games = 0usize;
    for values in lines.into_iter().filter_map(|line| metric.input_values(line)) {
        for (sum, value) in sums.iter_mut().zip(values) {
            *sum += value;
        }
        games += 1;
    }
    if games == 0 {
        return None;
    }
    evaluate(metric, &pooled_line(inputs, &sums))
}

/// Stat line holding only the given inputs, set to their sums
pub(crate) fn pooled_line(inputs: &[Metric], sums: &[f64]) -> StatLine {
    let mut line = StatLine::default();
    for (&metric, &sum) in inputs.iter().zip(sums) {
        line.set(metric, Some(sum));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_divide_null_semantics() {
        for x in [-3.0, 0.0, 1.0, 42.5] {
            assert_eq!(safe_divide(Some(x), Some(0.0)), None);
            assert_eq!(safe_divide(Some(x), None), None);
        }
        assert_eq!(safe_divide(None, Some(2.0)), None);
        assert_eq!(safe_divide(Some(0.0), Some(5.0)), Some(0.0));
        assert_eq!(safe_divide(Some(10.0), Some(4.0)), Some(2.5));
    }

    #[test]
    fn test_per_60_variants() {
        assert_eq!(per_60(Some(1.0), Some(20.0)), Some(3.0));
        assert_eq!(per_60_from_seconds(Some(1.0), Some(1200.0)), Some(3.0));
        assert_eq!(per_60_from_seconds(Some(1.0), Some(0.0)), None);
        assert_eq!(per_60_from_seconds(None, Some(1200.0)), None);
    }

    #[test]
    fn test_average_ignores_absent_entries() {
        assert_eq!(average([Some(1.0), None, Some(3.0)]), Some(2.0));
        assert_eq!(average([None, None]), None);
        assert_eq!(average(Vec::<Option<f64>>::new()), None);
        assert_eq!(average([Some(f64::NAN), Some(4.0)]), Some(4.0));
    }

    #[test]
    fn test_sample_std_dev() {
        assert_eq!(sample_std_dev(&[]), 0.0);
        assert_eq!(sample_std_dev(&[7.0]), 0.0);
        assert_eq!(sample_std_dev(&[10.0, 10.0, 10.0]), 0.0);
        assert!((sample_std_dev(&[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_derived_metrics() {
        let line = StatLine {
            goals: Some(1.0),
            points: Some(2.0),
            shots: Some(4.0),
            toi_seconds: Some(1200.0),
            on_ice_goals_for: Some(2.0),
            on_ice_shots_for: Some(10.0),
            on_ice_shot_attempts_for: Some(15.0),
            on_ice_shot_attempts_against: Some(5.0),
            ..Default::default()
        };

        assert_eq!(evaluate(Metric::GoalsPer60, &line), Some(3.0));
        assert_eq!(evaluate(Metric::ShootingPct, &line), Some(25.0));
        assert_eq!(evaluate(Metric::OnIceShootingPct, &line), Some(20.0));
        assert_eq!(evaluate(Metric::IndividualPointsPct, &line), Some(100.0));
        assert_eq!(evaluate(Metric::CorsiForPct, &line), Some(75.0));
        assert_eq!(evaluate(Metric::Goals, &line), Some(1.0));
        // no hits recorded: absent, not zero
        assert_eq!(evaluate(Metric::HitsPer60, &line), None);
    }

    #[test]
    fn test_zero_shots_leaves_shooting_pct_undefined() {
        let line = StatLine { goals: Some(0.0), shots: Some(0.0), ..Default::default() };
        assert_eq!(evaluate(Metric::ShootingPct, &line), None);
    }

    #[test]
    fn test_pooled_rate_only_uses_games_with_every_input() {
        let games = [
            StatLine { goals: Some(0.0), toi_seconds: Some(1200.0), ..Default::default() },
            StatLine { goals: Some(1.0), toi_seconds: Some(1200.0), ..Default::default() },
            // goals without ice time stay out of the rate
            StatLine { goals: Some(3.0), ..Default::default() },
        ];

        assert_eq!(evaluate_pooled(Metric::GoalsPer60, &games), Some(1.5));
        assert_eq!(evaluate_pooled(Metric::Goals, &games), Some(4.0));
        assert_eq!(evaluate_pooled(Metric::Hits, &games), None);
        assert_eq!(evaluate_pooled(Metric::GoalsPer60, &games[2..]), None);
    }
}
