//! Engine configuration management

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::models::{Metric, StrengthContext};
use crate::periods::MissingPeriodPolicy;
use crate::ranking::{Direction, RankedMetric, RankingGranularity};
use crate::sustainability::{importance_weights, Signal};

/// Environment variable prefix, e.g. `PERF_ENGINE__SIGNIFICANCE_LEVEL=0.01`
pub const ENV_PREFIX: &str = "PERF_ENGINE";
pub const ENV_SEPARATOR: &str = "__";

/// Main engine configuration, as written in TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed trailing window sizes; the all-time window is always kept
    pub window_sizes: Vec<usize>,

    /// Upper bound on any fixed window
    pub rolling_window_size_for_queue: usize,

    /// Two-tailed significance threshold for the sustainability test
    pub significance_level: f64,

    /// Strength context whose records feed the baselines, PCA and rankings
    pub scoring_strength: StrengthContext,

    pub missing_period_policy: MissingPeriodPolicy,

    /// Number of principal components to keep
    pub pca_components: usize,

    /// Metrics forming the PCA feature matrix
    pub pca_features: Vec<String>,

    /// Signal name (metric or `pca`) to 1-based importance rank
    pub metric_importance_ranking: BTreeMap<String, u32>,

    /// Metric name to the variance of a single-game observation
    pub observation_variance_per_metric: BTreeMap<String, f64>,

    pub ranking: RankingConfig,

    pub logging: LoggingConfig,
}

/// Ranking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Period granularity (game, week)
    pub granularity: RankingGranularity,

    /// Metric name to favorable direction
    pub metrics: BTreeMap<String, Direction>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let ranking = [
            ("goals_per_60", 1),
            ("ixg_per_60", 2),
            ("shots_per_60", 3),
            ("points_per_60", 4),
            ("pca", 5),
        ];
        // variance of one game's per-60 rate
        let variance = [
            ("goals_per_60", 4.0),
            ("ixg_per_60", 2.0),
            ("shots_per_60", 36.0),
            ("points_per_60", 9.0),
        ];

        Self {
            window_sizes: vec![3, 5, 10, 20],
            rolling_window_size_for_queue: 20,
            significance_level: 0.05,
            scoring_strength: StrengthContext::All,
            missing_period_policy: MissingPeriodPolicy::Renormalize,
            pca_components: 2,
            pca_features: ["goals_per_60", "assists_per_60", "shots_per_60", "ixg_per_60", "shot_attempts_per_60"]
                .into_iter()
                .map(String::from)
                .collect(),
            metric_importance_ranking: ranking.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            observation_variance_per_metric: variance.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            ranking: RankingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        let larger = ["goals", "assists", "points", "shots", "hits", "blocked_shots"];
        let mut metrics: BTreeMap<String, Direction> =
            larger.into_iter().map(|m| (m.to_string(), Direction::LargerIsBetter)).collect();
        metrics.insert("penalty_minutes".to_string(), Direction::SmallerIsBetter);

        Self { granularity: RankingGranularity::Game, metrics }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Configuration with every name resolved and every bound checked
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub window_sizes: Vec<usize>,
    pub queue_capacity: usize,
    pub significance_level: f64,
    pub scoring_strength: StrengthContext,
    pub missing_period_policy: MissingPeriodPolicy,
    pub pca_components: usize,
    pub pca_features: Vec<Metric>,
    /// Normalized importance weights, summing to 1
    pub importance_weights: BTreeMap<Signal, f64>,
    pub observation_variance: BTreeMap<Metric, f64>,
    pub ranking_granularity: RankingGranularity,
    pub ranked_metrics: Vec<RankedMetric>,
}

impl ValidatedConfig {
    /// Metrics that carry a z-score signal
    pub fn scored_metrics(&self) -> Vec<Metric> {
        self.importance_weights
            .keys()
            .filter_map(|s| match s {
                Signal::Metric(m) => Some(*m),
                Signal::PrincipalComponent => None,
            })
            .collect()
    }

    pub fn uses_pca(&self) -> bool {
        self.importance_weights.contains_key(&Signal::PrincipalComponent)
    }
}

fn config_error(message: impl Into<String>) -> EngineError {
    EngineError::Configuration(message.into())
}

fn parse_metric(name: &str, field: &str) -> Result<Metric> {
    name.parse::<Metric>().map_err(|_| config_error(format!("unknown metric '{}' in {}", name, field)))
}

impl EngineConfig {
    /// Load from a TOML file, then apply `PERF_ENGINE__*` environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let source = ::config::Config::builder()
            .add_source(::config::File::new(&path.to_string_lossy(), ::config::FileFormat::Toml))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?;

        Ok(source.try_deserialize()?)
    }

    /// Defaults overlaid with environment overrides only
    pub fn load_from_env() -> Result<Self> {
        let source = ::config::Config::builder()
            .add_source(::config::Config::try_from(&EngineConfig::default())?)
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?;

        Ok(source.try_deserialize()?)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| config_error(format!("failed to render TOML: {}", e)))
    }

    /// Resolve names and check every bound
    pub fn validate(&self) -> Result<ValidatedConfig> {
        if self.rolling_window_size_for_queue == 0 {
            return Err(config_error("rolling_window_size_for_queue must be positive"));
        }
        if self.window_sizes.is_empty() {
            return Err(config_error("window_sizes must not be empty"));
        }
        let mut window_sizes = self.window_sizes.clone();
        window_sizes.sort_unstable();
        window_sizes.dedup();
        if let Some(&zero) = window_sizes.iter().find(|&&n| n == 0) {
            return Err(config_error(format!("window size {} is not positive", zero)));
        }
        if let Some(&too_big) = window_sizes.iter().find(|&&n| n > self.rolling_window_size_for_queue) {
            return Err(config_error(format!(
                "window size {} exceeds rolling_window_size_for_queue {}",
                too_big, self.rolling_window_size_for_queue
            )));
        }

        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(config_error(format!(
                "significance_level must be in (0, 1), got {}",
                self.significance_level
            )));
        }

        let mut observation_variance = BTreeMap::new();
        for (name, variance) in &self.observation_variance_per_metric {
            let metric = parse_metric(name, "observation_variance_per_metric")?;
            if !(variance.is_finite() && *variance > 0.0) {
                return Err(config_error(format!(
                    "observation variance for {} must be positive, got {}",
                    name, variance
                )));
            }
            observation_variance.insert(metric, *variance);
        }

        if self.metric_importance_ranking.is_empty() {
            return Err(config_error("metric_importance_ranking must not be empty"));
        }
        let mut ranks = BTreeMap::new();
        for (name, rank) in &self.metric_importance_ranking {
            let signal = name
                .parse::<Signal>()
                .map_err(|_| config_error(format!("unknown metric '{}' in metric_importance_ranking", name)))?;
            if *rank == 0 {
                return Err(config_error(format!("importance rank for {} must be 1 or greater", name)));
            }
            if let Signal::Metric(metric) = signal {
                if !observation_variance.contains_key(&metric) {
                    return Err(config_error(format!("ranked metric {} has no observation variance", name)));
                }
            }
            ranks.insert(signal, *rank);
        }

        let pca_features = self
            .pca_features
            .iter()
            .map(|name| parse_metric(name, "pca_features"))
            .collect::<Result<Vec<_>>>()?;
        if ranks.contains_key(&Signal::PrincipalComponent) && (pca_features.is_empty() || self.pca_components == 0) {
            return Err(config_error("pca is ranked but pca_features or pca_components is empty"));
        }

        let ranked_metrics = self
            .ranking
            .metrics
            .iter()
            .map(|(name, direction)| {
                parse_metric(name, "ranking.metrics").map(|metric| RankedMetric { metric, direction: *direction })
            })
            .collect::<Result<Vec<_>>>()?;

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(config_error(format!("invalid log level: {}", other))),
        }
        match self.logging.format.as_str() {
            "json" | "pretty" | "compact" => {}
            other => return Err(config_error(format!("invalid log format: {}", other))),
        }

        Ok(ValidatedConfig {
            window_sizes,
            queue_capacity: self.rolling_window_size_for_queue,
            significance_level: self.significance_level,
            scoring_strength: self.scoring_strength,
            missing_period_policy: self.missing_period_policy,
            pca_components: self.pca_components,
            pca_features,
            importance_weights: importance_weights(&ranks),
            observation_variance,
            ranking_granularity: self.ranking.granularity,
            ranked_metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Mutex, MutexGuard};

    // environment variables are process-wide; tests that load through the
    // `config` sources take this lock
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn test_default_config_is_valid() {
        let validated = EngineConfig::default().validate().unwrap();

        assert_eq!(validated.window_sizes, vec![3, 5, 10, 20]);
        assert_eq!(validated.significance_level, 0.05);
        assert!(validated.uses_pca());
        let total: f64 = validated.importance_weights.values().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(validated.scored_metrics().len(), 4);
        assert_eq!(validated.ranked_metrics.len(), 7);
    }

    #[test]
    fn test_configuration_errors() {
        let cases: Vec<(&str, Box<dyn Fn(&mut EngineConfig)>)> = vec![
            ("unknown metric", Box::new(|c: &mut EngineConfig| {
                c.metric_importance_ranking.insert("expected_wins".into(), 6);
            })),
            ("rank zero", Box::new(|c: &mut EngineConfig| {
                c.metric_importance_ranking.insert("goals_per_60".into(), 0);
            })),
            ("non-positive variance", Box::new(|c: &mut EngineConfig| {
                c.observation_variance_per_metric.insert("goals_per_60".into(), 0.0);
            })),
            ("missing variance", Box::new(|c: &mut EngineConfig| {
                c.observation_variance_per_metric.remove("ixg_per_60");
            })),
            ("significance", Box::new(|c: &mut EngineConfig| c.significance_level = 1.0)),
            ("empty windows", Box::new(|c: &mut EngineConfig| c.window_sizes.clear())),
            ("zero window", Box::new(|c: &mut EngineConfig| c.window_sizes.push(0))),
            ("window over queue", Box::new(|c: &mut EngineConfig| c.window_sizes.push(21))),
            ("pca without features", Box::new(|c: &mut EngineConfig| c.pca_features.clear())),
            ("bad ranking metric", Box::new(|c: &mut EngineConfig| {
                c.ranking.metrics.insert("takeaways".into(), Direction::LargerIsBetter);
            })),
            ("bad log level", Box::new(|c: &mut EngineConfig| c.logging.level = "loud".into())),
        ];

        for (name, mutate) in cases {
            let mut config = EngineConfig::default();
            mutate(&mut config);
            let result = config.validate();
            assert!(matches!(result, Err(EngineError::Configuration(_))), "case '{}' should fail", name);
        }
    }

    #[test]
    fn test_duplicate_window_sizes_collapse() {
        let config = EngineConfig { window_sizes: vec![10, 3, 10], ..Default::default() };
        assert_eq!(config.validate().unwrap().window_sizes, vec![3, 10]);
    }

    #[test]
    fn test_load_from_toml_file() {
        let _guard = env_lock();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
window_sizes = [3, 5]
significance_level = 0.01
scoring_strength = "even_strength"
missing_period_policy = "zero_fill"

[metric_importance_ranking]
goals_per_60 = 1

[observation_variance_per_metric]
goals_per_60 = 2.5

[ranking]
granularity = "week"

[ranking.metrics]
goals = "larger_is_better"
"#
        )
        .unwrap();

        let config = EngineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.window_sizes, vec![3, 5]);
        assert_eq!(config.scoring_strength, StrengthContext::EvenStrength);
        assert_eq!(config.missing_period_policy, MissingPeriodPolicy::ZeroFill);
        // unspecified fields fall back to defaults
        assert_eq!(config.rolling_window_size_for_queue, 20);

        let validated = config.validate().unwrap();
        assert_eq!(validated.significance_level, 0.01);
        assert_eq!(validated.ranking_granularity, RankingGranularity::Week);
        assert_eq!(validated.importance_weights[&Signal::Metric(Metric::GoalsPer60)], 1.0);
        assert!(!validated.uses_pca());
    }

    #[test]
    fn test_default_config_renders_to_toml() {
        let rendered = EngineConfig::default().to_toml().unwrap();
        assert!(rendered.contains("window_sizes"));

        let parsed: EngineConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }

    #[test]
    fn test_environment_overrides_defaults_and_file() {
        let _guard = env_lock();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "significance_level = 0.01\nwindow_sizes = [3, 5]").unwrap();

        assert_eq!(EngineConfig::load_from_env().unwrap().significance_level, 0.05);

        std::env::set_var("PERF_ENGINE__SIGNIFICANCE_LEVEL", "0.2");
        let from_env = EngineConfig::load_from_env();
        let from_file = EngineConfig::load_from_file(file.path());
        std::env::remove_var("PERF_ENGINE__SIGNIFICANCE_LEVEL");

        let from_env = from_env.unwrap();
        assert_eq!(from_env.significance_level, 0.2);
        assert_eq!(from_env.window_sizes, EngineConfig::default().window_sizes);

        let from_file = from_file.unwrap();
        assert_eq!(from_file.significance_level, 0.2);
        // keys without an override keep the file value
        assert_eq!(from_file.window_sizes, vec![3, 5]);
    }
}
