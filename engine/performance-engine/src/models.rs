use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Player (entity) identifier as supplied by the ETL layer
pub type PlayerId = i64;

/// Team abbreviation (e.g., "TOR", "EDM")
pub type TeamId = String;

/// Game-state context a record was measured in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrengthContext {
    /// All situations
    #[default]
    All,
    /// 5v5 / even strength
    #[serde(alias = "ev")]
    EvenStrength,
    /// Power play
    #[serde(alias = "pp")]
    PowerPlay,
    /// Penalty kill
    #[serde(alias = "pk")]
    PenaltyKill,
}

impl fmt::Display for StrengthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrengthContext::All => "all",
            StrengthContext::EvenStrength => "even_strength",
            StrengthContext::PowerPlay => "power_play",
            StrengthContext::PenaltyKill => "penalty_kill",
        };
        write!(f, "{name}")
    }
}

/// Every metric the engine knows how to read or derive.
///
/// Counting metrics map one-to-one onto [`StatLine`] fields. Derived metrics
/// (per-60 rates and percentages) are evaluated from a stat line by
/// [`crate::derivation::evaluate`], so a window or a season is always rated
/// from summed totals, never from averaged per-game rates. Pooled totals only
/// include games carrying every input in [`Metric::inputs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Metric {
    Goals,
    Assists,
    Points,
    Shots,
    ShotAttempts,
    Hits,
    BlockedShots,
    PenaltyMinutes,
    PowerPlayPoints,
    Ixg,
    ToiSeconds,
    OnIceGoalsFor,
    OnIceShotsFor,
    OnIceShotAttemptsFor,
    OnIceShotAttemptsAgainst,

    GoalsPer60,
    AssistsPer60,
    PointsPer60,
    ShotsPer60,
    ShotAttemptsPer60,
    IxgPer60,
    HitsPer60,
    BlockedShotsPer60,
    ShootingPct,
    OnIceShootingPct,
    IndividualPointsPct,
    CorsiForPct,
}

impl Metric {
    /// Raw counting stats, in stat line order
    pub const COUNTING: [Metric; 15] = [
        Metric::Goals,
        Metric::Assists,
        Metric::Points,
        Metric::Shots,
        Metric::ShotAttempts,
        Metric::Hits,
        Metric::BlockedShots,
        Metric::PenaltyMinutes,
        Metric::PowerPlayPoints,
        Metric::Ixg,
        Metric::ToiSeconds,
        Metric::OnIceGoalsFor,
        Metric::OnIceShotsFor,
        Metric::OnIceShotAttemptsFor,
        Metric::OnIceShotAttemptsAgainst,
    ];

    /// Rates and percentages derived from counting stats
    pub const DERIVED: [Metric; 12] = [
        Metric::GoalsPer60,
        Metric::AssistsPer60,
        Metric::PointsPer60,
        Metric::ShotsPer60,
        Metric::ShotAttemptsPer60,
        Metric::IxgPer60,
        Metric::HitsPer60,
        Metric::BlockedShotsPer60,
        Metric::ShootingPct,
        Metric::OnIceShootingPct,
        Metric::IndividualPointsPct,
        Metric::CorsiForPct,
    ];

    pub fn is_counting(self) -> bool {
        Metric::COUNTING.contains(&self)
    }

    /// Counting stats a metric is computed from; a counting stat is its own input
    pub fn inputs(self) -> &'static [Metric] {
        use Metric::*;
        match self {
            GoalsPer60 => &[Goals, ToiSeconds],
            AssistsPer60 => &[Assists, ToiSeconds],
            PointsPer60 => &[Points, ToiSeconds],
            ShotsPer60 => &[Shots, ToiSeconds],
            ShotAttemptsPer60 => &[ShotAttempts, ToiSeconds],
            IxgPer60 => &[Ixg, ToiSeconds],
            HitsPer60 => &[Hits, ToiSeconds],
            BlockedShotsPer60 => &[BlockedShots, ToiSeconds],
            ShootingPct => &[Goals, Shots],
            OnIceShootingPct => &[OnIceGoalsFor, OnIceShotsFor],
            IndividualPointsPct => &[Points, OnIceGoalsFor],
            CorsiForPct => &[OnIceShotAttemptsFor, OnIceShotAttemptsAgainst],
            Goals => &[Goals],
            Assists => &[Assists],
            Points => &[Points],
            Shots => &[Shots],
            ShotAttempts => &[ShotAttempts],
            Hits => &[Hits],
            BlockedShots => &[BlockedShots],
            PenaltyMinutes => &[PenaltyMinutes],
            PowerPlayPoints => &[PowerPlayPoints],
            Ixg => &[Ixg],
            ToiSeconds => &[ToiSeconds],
            OnIceGoalsFor => &[OnIceGoalsFor],
            OnIceShotsFor => &[OnIceShotsFor],
            OnIceShotAttemptsFor => &[OnIceShotAttemptsFor],
            OnIceShotAttemptsAgainst => &[OnIceShotAttemptsAgainst],
        }
    }

    /// This metric's inputs as read off one line; `None` if any is missing
    pub fn input_values(self, line: &StatLine) -> Option<Vec<f64>> {
        self.inputs().iter().map(|&m| line.get(m)).collect()
    }

    pub fn all() -> impl Iterator<Item = Metric> {
        Metric::COUNTING.into_iter().chain(Metric::DERIVED)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Goals => "goals",
            Metric::Assists => "assists",
            Metric::Points => "points",
            Metric::Shots => "shots",
            Metric::ShotAttempts => "shot_attempts",
            Metric::Hits => "hits",
            Metric::BlockedShots => "blocked_shots",
            Metric::PenaltyMinutes => "penalty_minutes",
            Metric::PowerPlayPoints => "power_play_points",
            Metric::Ixg => "ixg",
            Metric::ToiSeconds => "toi_seconds",
            Metric::OnIceGoalsFor => "on_ice_goals_for",
            Metric::OnIceShotsFor => "on_ice_shots_for",
            Metric::OnIceShotAttemptsFor => "on_ice_shot_attempts_for",
            Metric::OnIceShotAttemptsAgainst => "on_ice_shot_attempts_against",
            Metric::GoalsPer60 => "goals_per_60",
            Metric::AssistsPer60 => "assists_per_60",
            Metric::PointsPer60 => "points_per_60",
            Metric::ShotsPer60 => "shots_per_60",
            Metric::ShotAttemptsPer60 => "shot_attempts_per_60",
            Metric::IxgPer60 => "ixg_per_60",
            Metric::HitsPer60 => "hits_per_60",
            Metric::BlockedShotsPer60 => "blocked_shots_per_60",
            Metric::ShootingPct => "shooting_pct",
            Metric::OnIceShootingPct => "on_ice_shooting_pct",
            Metric::IndividualPointsPct => "ipp",
            Metric::CorsiForPct => "cf_pct",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Metric::all().find(|m| m.as_str() == needle).ok_or_else(|| EngineError::UnknownMetric {
            name: s.to_string(),
            context: "metric catalogue".to_string(),
        })
    }
}

impl TryFrom<String> for Metric {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Metric> for &'static str {
    fn from(metric: Metric) -> Self {
        metric.as_str()
    }
}

/// Raw counting stats for one game, or summed over a window or season.
///
/// Every field is optional: an absent stat means "not measured", which is
/// different from a measured zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatLine {
    pub goals: Option<f64>,
    pub assists: Option<f64>,
    pub points: Option<f64>,
    pub shots: Option<f64>,
    pub shot_attempts: Option<f64>,
    pub hits: Option<f64>,
    pub blocked_shots: Option<f64>,
    pub penalty_minutes: Option<f64>,
    pub power_play_points: Option<f64>,
    pub ixg: Option<f64>,
    pub toi_seconds: Option<f64>,
    pub on_ice_goals_for: Option<f64>,
    pub on_ice_shots_for: Option<f64>,
    pub on_ice_shot_attempts_for: Option<f64>,
    pub on_ice_shot_attempts_against: Option<f64>,
}

impl StatLine {
    /// Read a counting stat. Derived metrics are not stored and read as `None`.
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Goals => self.goals,
            Metric::Assists => self.assists,
            Metric::Points => self.points,
            Metric::Shots => self.shots,
            Metric::ShotAttempts => self.shot_attempts,
            Metric::Hits => self.hits,
            Metric::BlockedShots => self.blocked_shots,
            Metric::PenaltyMinutes => self.penalty_minutes,
            Metric::PowerPlayPoints => self.power_play_points,
            Metric::Ixg => self.ixg,
            Metric::ToiSeconds => self.toi_seconds,
            Metric::OnIceGoalsFor => self.on_ice_goals_for,
            Metric::OnIceShotsFor => self.on_ice_shots_for,
            Metric::OnIceShotAttemptsFor => self.on_ice_shot_attempts_for,
            Metric::OnIceShotAttemptsAgainst => self.on_ice_shot_attempts_against,
            _ => None,
        }
    }

    /// Write a counting stat; writes to derived metrics are ignored
    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        let slot = match metric {
            Metric::Goals => &mut self.goals,
            Metric::Assists => &mut self.assists,
            Metric::Points => &mut self.points,
            Metric::Shots => &mut self.shots,
            Metric::ShotAttempts => &mut self.shot_attempts,
            Metric::Hits => &mut self.hits,
            Metric::BlockedShots => &mut self.blocked_shots,
            Metric::PenaltyMinutes => &mut self.penalty_minutes,
            Metric::PowerPlayPoints => &mut self.power_play_points,
            Metric::Ixg => &mut self.ixg,
            Metric::ToiSeconds => &mut self.toi_seconds,
            Metric::OnIceGoalsFor => &mut self.on_ice_goals_for,
            Metric::OnIceShotsFor => &mut self.on_ice_shots_for,
            Metric::OnIceShotAttemptsFor => &mut self.on_ice_shot_attempts_for,
            Metric::OnIceShotAttemptsAgainst => &mut self.on_ice_shot_attempts_against,
            _ => return,
        };
        *slot = value;
    }

    /// Value of any metric, counting or derived
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        crate::derivation::evaluate(metric, self)
    }

    /// Reject stat lines an upstream parser should never have produced
    pub fn validate(&self) -> std::result::Result<(), String> {
        for metric in Metric::COUNTING {
            if let Some(value) = self.get(metric) {
                if !value.is_finite() {
                    return Err(format!("{metric} is not finite ({value})"));
                }
                if value < 0.0 {
                    return Err(format!("{metric} is negative ({value})"));
                }
            }
        }
        Ok(())
    }
}

/// One skater's line for one game in one strength context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePerformanceRecord {
    pub player_id: PlayerId,
    pub game_id: i64,
    pub game_date: NaiveDate,
    pub season: i32,
    pub team: TeamId,
    #[serde(default)]
    pub strength: StrengthContext,
    #[serde(default)]
    pub stats: StatLine,
}

/// A scheduled team-vs-team game, used to build the participation ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledGame {
    pub game_id: i64,
    pub date: NaiveDate,
    pub home_team: TeamId,
    pub away_team: TeamId,
}

/// Summed stats for one player over one season
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonTotal {
    pub player_id: PlayerId,
    pub season: i32,
    pub games_played: u32,
    #[serde(default)]
    pub stats: StatLine,
}

/// Historical prior for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorSpec {
    /// Long-run per-game average
    pub mean: f64,
    /// Historical standard deviation, if known
    #[serde(default)]
    pub std_dev: Option<f64>,
}

/// Explicit priors supplied by the ETL layer for one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBaseline {
    pub player_id: PlayerId,
    pub priors: BTreeMap<Metric, PriorSpec>,
}

/// Everything one engine run consumes, fully materialized
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunInput {
    /// Season being scored; excluded from historical baselines
    pub current_season: i32,
    #[serde(default)]
    pub records: Vec<GamePerformanceRecord>,
    #[serde(default)]
    pub schedule: Vec<ScheduledGame>,
    #[serde(default)]
    pub season_totals: Vec<SeasonTotal>,
    #[serde(default)]
    pub baselines: Vec<EntityBaseline>,
}

/// A player whose stream was rejected during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub player_id: PlayerId,
    pub reason: String,
}
