//! Team participation ledger
//!
//! Cumulative games-played per team, indexed by date, so any window can be
//! expressed as "X of the team's Y games".

use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::debug;

use crate::models::{ScheduledGame, TeamId};

/// One cumulative step in a team's schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamGameEntry {
    pub date: NaiveDate,
    pub games_played: u32,
}

/// Per-team date-sorted cumulative game counts. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct TeamParticipationLedger {
    teams: HashMap<TeamId, Vec<TeamGameEntry>>,
}

impl TeamParticipationLedger {
    /// Build from the full schedule. Duplicate game ids are counted once.
    pub fn from_schedule(games: &[ScheduledGame]) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut dates: HashMap<TeamId, Vec<NaiveDate>> = HashMap::new();

        for game in games.iter().filter(|g| seen.insert(g.game_id)) {
            dates.entry(game.home_team.clone()).or_default().push(game.date);
            dates.entry(game.away_team.clone()).or_default().push(game.date);
        }

        let teams = dates
            .into_iter()
            .map(|(team, mut played)| {
                played.sort_unstable();
                let entries = played
                    .into_iter()
                    .enumerate()
                    .map(|(i, date)| TeamGameEntry { date, games_played: i as u32 + 1 })
                    .collect();
                (team, entries)
            })
            .collect::<HashMap<_, _>>();

        debug!("Built participation ledger for {} teams from {} games", teams.len(), seen.len());
        Self { teams }
    }

    /// Games the team had played up to and including `date`
    pub fn games_played_as_of(&self, team: &str, date: NaiveDate) -> u32 {
        let Some(entries) = self.teams.get(team) else {
            return 0;
        };
        // entries sharing a date are contiguous; take the last one at or before `date`
        let idx = entries.partition_point(|e| e.date <= date);
        if idx == 0 {
            0
        } else {
            entries[idx - 1].games_played
        }
    }

    /// Games the team played in `[start, end]`, floored at 0
    pub fn games_in_window(&self, team: &str, start: NaiveDate, end: NaiveDate) -> u32 {
        let before_start = match start.pred_opt() {
            Some(day) => self.games_played_as_of(team, day),
            None => 0,
        };
        self.games_played_as_of(team, end).saturating_sub(before_start)
    }

    pub fn team_count(&self) -> usize {
        self.teams.len()
    }

    pub fn entries(&self, team: &str) -> &[TeamGameEntry] {
        self.teams.get(team).map(Vec::as_slice).unwrap_or(&[])
    }
}
