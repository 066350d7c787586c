// Mutable state of one sortie, owned by the caller of `run_combat_cycle` and
// lent to every handler for the duration of the call.

use crate::core_modules::grid_locator::TileIndex;
use std::fmt;

/// How a combat cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCode {
    BossDefeated = 1,
    RetreatedAfterFights = 2,
    MoraleLow = 3,
    /// Dock full with nothing left to free, or the map could not be cleared.
    Blocked = 4,
    FleetDefeated = 5,
}

impl ExitCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the sortie counts as a completed combat.
    pub fn is_completed(self) -> bool {
        matches!(self, ExitCode::BossDefeated | ExitCode::RetreatedAfterFights)
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitCode::BossDefeated => "boss defeated",
            ExitCode::RetreatedAfterFights => "retreated after fights",
            ExitCode::MoraleLow => "morale too low",
            ExitCode::Blocked => "blocked",
            ExitCode::FleetDefeated => "fleet defeated",
        };
        write!(f, "{} ({label})", self.code())
    }
}

/// Which fleet the auto-switch logic should keep selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FleetRole {
    #[default]
    Mob,
    Boss,
    /// Pinned to a fleet number regardless of progress.
    Forced(u8),
}

#[derive(Debug, Clone, Default)]
pub struct CombatSession {
    /// Fights won this sortie.
    pub combats_done: u32,
    /// Mob fleets sunk this sortie; drops back when an ambush is fought.
    pub kills_count: u32,
    pub boss_fleet_found: bool,
    pub boss_defeated: bool,
    pub fleet_role: FleetRole,
    /// Tile the fleet last moved to, re-centred before the next search.
    pub last_visited: Option<TileIndex>,
    /// Next entry of the swipe gesture cycle.
    pub swipe_direction: usize,
    pub exit: Option<ExitCode>,
    /// Dock relief already tried and failed this stage.
    pub enhancement_failed: bool,
    pub retirement_failed: bool,
}

impl CombatSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a won fight.
    pub fn record_victory(&mut self) {
        self.combats_done += 1;
        self.kills_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_keep_their_numbers() {
        let codes: Vec<u8> = [
            ExitCode::BossDefeated,
            ExitCode::RetreatedAfterFights,
            ExitCode::MoraleLow,
            ExitCode::Blocked,
            ExitCode::FleetDefeated,
        ]
        .iter()
        .map(|c| c.code())
        .collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5]);
        assert!(ExitCode::RetreatedAfterFights.is_completed());
        assert!(!ExitCode::FleetDefeated.is_completed());
        assert_eq!(ExitCode::Blocked.to_string(), "4 (blocked)");
    }

    #[test]
    fn victories_count_both_tallies() {
        let mut session = CombatSession::new();
        session.record_victory();
        session.record_victory();
        assert_eq!((session.combats_done, session.kills_count), (2, 2));
        assert_eq!(session.fleet_role, FleetRole::Mob);
    }
}
