//! # Rolling Window Accumulation
//!
//! All-time and trailing-N running sums for one player in one strength
//! context. Every window is updated in a single pass per game using running
//! sums, so an update costs O(1) per metric per window regardless of history
//! length.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::derivation::{evaluate, pooled_line, safe_divide};
use crate::error::{EngineError, Result};
use crate::ledger::TeamParticipationLedger;
use crate::models::{GamePerformanceRecord, Metric, PlayerId, StatLine, StrengthContext};

/// Window dimension: everything so far, or the trailing N observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WindowSize {
    All,
    Last(usize),
}

impl WindowSize {
    pub fn capacity(self) -> Option<usize> {
        match self {
            WindowSize::All => None,
            WindowSize::Last(n) => Some(n),
        }
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSize::All => write!(f, "all"),
            WindowSize::Last(n) => write!(f, "last_{n}"),
        }
    }
}

impl FromStr for WindowSize {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "all" {
            return Ok(WindowSize::All);
        }
        s.strip_prefix("last_")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .map(WindowSize::Last)
            .ok_or_else(|| EngineError::Configuration(format!("invalid window '{s}'")))
    }
}

impl TryFrom<String> for WindowSize {
    type Error = EngineError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WindowSize> for String {
    fn from(window: WindowSize) -> Self {
        window.to_string()
    }
}

/// Running sum/count for one (metric, window).
///
/// Invariants: a fixed window never holds more than its capacity, and `sum`
/// is the sum of exactly the values it holds (all values for the all-time
/// window).
#[derive(Debug, Clone)]
pub struct RunningWindow {
    capacity: Option<usize>,
    sum: f64,
    count: usize,
    queue: VecDeque<f64>,
}

impl RunningWindow {
    pub fn new(window: WindowSize) -> Self {
        let capacity = window.capacity();
        Self {
            capacity,
            sum: 0.0,
            count: 0,
            queue: VecDeque::with_capacity(capacity.map_or(0, |c| c + 1)),
        }
    }

    /// Feed one observation. Absent values are skipped entirely.
    pub fn observe(&mut self, value: Option<f64>) {
        let Some(value) = value else {
            return;
        };

        match self.capacity {
            None => {
                self.sum += value;
                self.count += 1;
            }
            Some(capacity) => {
                self.queue.push_back(value);
                self.sum += value;
                if self.queue.len() > capacity {
                    if let Some(oldest) = self.queue.pop_front() {
                        self.sum -= oldest;
                    }
                }
                self.count = self.queue.len();
            }
        }
    }

    /// Sum of the window; absent when nothing has been observed
    pub fn total(&self) -> Option<f64> {
        (self.count > 0).then_some(self.sum)
    }

    pub fn average(&self) -> Option<f64> {
        safe_divide(self.total(), Some(self.count as f64))
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Values currently held by a fixed window, oldest first
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.queue.iter().copied()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

/// Paired running sums for one derived metric.
///
/// A game enters only when it carries every input of the metric, so the
/// numerator and denominator of the rate always cover the same games.
#[derive(Debug, Clone)]
pub struct RateWindow {
    metric: Metric,
    capacity: Option<usize>,
    sums: Vec<f64>,
    count: usize,
    queue: VecDeque<Vec<f64>>,
}

impl RateWindow {
    pub fn new(metric: Metric, window: WindowSize) -> Self {
        let capacity = window.capacity();
        Self {
            metric,
            capacity,
            sums: vec![0.0; metric.inputs().len()],
            count: 0,
            queue: VecDeque::with_capacity(capacity.map_or(0, |c| c + 1)),
        }
    }

    pub fn observe(&mut self, line: &StatLine) {
        let Some(values) = self.metric.input_values(line) else {
            return;
        };

        for (sum, value) in self.sums.iter_mut().zip(&values) {
            *sum += value;
        }
        match self.capacity {
            None => self.count += 1,
            Some(capacity) => {
                self.queue.push_back(values);
                if self.queue.len() > capacity {
                    if let Some(oldest) = self.queue.pop_front() {
                        for (sum, value) in self.sums.iter_mut().zip(&oldest) {
                            *sum -= value;
                        }
                    }
                }
                self.count = self.queue.len();
            }
        }
    }

    /// Rate over the paired games; absent when none qualified
    pub fn value(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        evaluate(self.metric, &pooled_line(self.metric.inputs(), &self.sums))
    }

    /// Games contributing to the rate
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Appearance dates tracked for the participation rate
#[derive(Debug, Clone)]
struct AppearanceWindow {
    capacity: Option<usize>,
    dates: VecDeque<NaiveDate>,
    total: usize,
}

impl AppearanceWindow {
    fn new(window: WindowSize) -> Self {
        Self { capacity: window.capacity(), dates: VecDeque::new(), total: 0 }
    }

    fn record(&mut self, date: NaiveDate) {
        self.total += 1;
        match self.capacity {
            // all-time only needs the first appearance
            None if self.dates.is_empty() => self.dates.push_back(date),
            None => {}
            Some(capacity) => {
                self.dates.push_back(date);
                if self.dates.len() > capacity {
                    self.dates.pop_front();
                }
            }
        }
    }

    fn count(&self) -> usize {
        match self.capacity {
            None => self.total,
            Some(_) => self.dates.len(),
        }
    }

    fn start_date(&self) -> Option<NaiveDate> {
        self.dates.front().copied()
    }
}

#[derive(Debug, Clone)]
struct WindowSet {
    metrics: BTreeMap<Metric, RunningWindow>,
    rates: BTreeMap<Metric, RateWindow>,
    appearances: AppearanceWindow,
}

impl WindowSet {
    fn new(window: WindowSize) -> Self {
        let metrics = Metric::COUNTING.into_iter().map(|m| (m, RunningWindow::new(window))).collect();
        let rates = Metric::DERIVED.into_iter().map(|m| (m, RateWindow::new(m, window))).collect();
        Self { metrics, rates, appearances: AppearanceWindow::new(window) }
    }
}

/// One emitted row: the state of one window right after one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub player_id: PlayerId,
    pub game_id: i64,
    pub game_date: NaiveDate,
    pub strength: StrengthContext,
    pub window: WindowSize,
    /// Player appearances inside the window
    pub games: usize,
    /// Team games between the window's first appearance and this game
    pub team_games: u32,
    /// `games / team_games`, capped at 1.0
    pub participation: Option<f64>,
    pub totals: StatLine,
    pub averages: BTreeMap<Metric, Option<f64>>,
    pub rates: BTreeMap<Metric, Option<f64>>,
}

/// All windows for one (player, strength) stream
#[derive(Debug, Clone)]
pub struct RollingWindowAccumulator {
    player_id: PlayerId,
    strength: StrengthContext,
    windows: BTreeMap<WindowSize, WindowSet>,
    last_date: Option<NaiveDate>,
}

impl RollingWindowAccumulator {
    /// Create an accumulator with the all-time window plus each fixed size
    pub fn new(player_id: PlayerId, strength: StrengthContext, sizes: &[usize]) -> Self {
        let windows = std::iter::once(WindowSize::All)
            .chain(sizes.iter().map(|&n| WindowSize::Last(n)))
            .map(|w| (w, WindowSet::new(w)))
            .collect();

        Self { player_id, strength, windows, last_date: None }
    }

    /// Apply one game to every window and return a snapshot per window.
    ///
    /// Games must arrive in non-decreasing date order.
    pub fn observe(
        &mut self,
        record: &GamePerformanceRecord,
        ledger: &TeamParticipationLedger,
    ) -> Result<Vec<WindowSnapshot>> {
        if let Some(previous) = self.last_date {
            if record.game_date < previous {
                return Err(EngineError::OutOfOrder {
                    player_id: self.player_id,
                    date: record.game_date,
                    previous,
                });
            }
        }
        self.last_date = Some(record.game_date);

        let mut snapshots = Vec::with_capacity(self.windows.len());
        for (&window, set) in self.windows.iter_mut() {
            for (&metric, running) in set.metrics.iter_mut() {
                running.observe(record.stats.get(metric));
            }
            for rate in set.rates.values_mut() {
                rate.observe(&record.stats);
            }
            set.appearances.record(record.game_date);

            snapshots.push(Self::snapshot(self.player_id, self.strength, window, set, record, ledger));
        }

        Ok(snapshots)
    }

    fn snapshot(
        player_id: PlayerId,
        strength: StrengthContext,
        window: WindowSize,
        set: &WindowSet,
        record: &GamePerformanceRecord,
        ledger: &TeamParticipationLedger,
    ) -> WindowSnapshot {
        let mut totals = StatLine::default();
        let mut averages = BTreeMap::new();
        for (&metric, running) in &set.metrics {
            totals.set(metric, running.total());
            averages.insert(metric, running.average());
        }

        let rates = set.rates.iter().map(|(&m, rate)| (m, rate.value())).collect();

        let games = set.appearances.count();
        let start = set.appearances.start_date().unwrap_or(record.game_date);
        let team_games = ledger.games_in_window(&record.team, start, record.game_date);
        // a mid-window trade can leave more appearances than the new team's games
        let participation =
            safe_divide(Some(games as f64), Some(team_games as f64)).map(|p| p.min(1.0));

        WindowSnapshot {
            player_id,
            game_id: record.game_id,
            game_date: record.game_date,
            strength,
            window,
            games,
            team_games,
            participation,
            totals,
            averages,
            rates,
        }
    }

    /// Current state of one (window, counting metric)
    pub fn state(&self, window: WindowSize, metric: Metric) -> Option<&RunningWindow> {
        self.windows.get(&window).and_then(|set| set.metrics.get(&metric))
    }

    /// Current state of one (window, derived metric)
    pub fn rate_state(&self, window: WindowSize, metric: Metric) -> Option<&RateWindow> {
        self.windows.get(&window).and_then(|set| set.rates.get(&metric))
    }

    pub fn windows(&self) -> impl Iterator<Item = WindowSize> + '_ {
        self.windows.keys().copied()
    }

    pub fn strength(&self) -> StrengthContext {
        self.strength
    }
}
