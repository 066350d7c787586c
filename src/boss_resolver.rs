// THEORY:
// Once the boss has spawned it still has to be found and reached. It may be
// off screen, hidden under one of our fleets, or walled in by mob fleets.
// Each of those has its own remedy, and the remedies are tried in order of
// cost:
//
// 1) Look: select the boss fleet and check the screen.
// 2) Swipe: pan around with growing swipe lengths, bounded by
//    `boss_swipe_max`.
// 3) Move: step the boss fleet, then the mob fleet, onto free tiles so
//    whatever they were covering shows.
//
// Reaching it follows the same idea: go straight for it, and when the path
// is blocked clear the mob fleets standing between, farthest from the boss
// first.

use crate::combat::{AttackResult, CombatModule, recoverable};
use crate::core_modules::graph_search::objective_indices;
use crate::core_modules::grid_locator::TileIndex;
use crate::core_modules::node_filter::NodeFilter;
use crate::core_modules::tile_classifier::TileClass;
use crate::device::{Collaborators, Device, Region, StableWait};
use crate::error::CombatError;
use crate::navigation::MoveOutcome;
use crate::perception::MapReader;
use crate::session::{CombatSession, ExitCode};
use crate::ui;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Scale range floor for the resolvers' boss lookups.
const BOSS_SEARCH_MIN_SCALE: f32 = 0.8;
/// Rounds of clearing blockers and re-finding the boss before giving up.
const MAX_BOSS_ROUNDS: usize = 6;
/// Moves towards the boss within one attack.
const MAX_BOSS_MOVES: usize = 10;

/// How an attack on the boss ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BossAttack {
    Defeated,
    /// The boss could not be reached, even after clearing blockers.
    Unreachable,
    /// The boss is not on the map read after centring it.
    Missing,
}

impl<D: Device, C: Collaborators, R: MapReader> CombatModule<D, C, R> {
    /// Finds the boss on screen, trying progressively more intrusive ways to
    /// bring it into view.
    pub async fn find_boss_fleet(
        &mut self,
        session: &mut CombatSession,
    ) -> Result<Option<Region>, CombatError> {
        debug!("boss fleet resolver");
        let boss_fleet = self.config.boss_fleet_no;
        let mob_fleet = self.config.mob_fleet_no;

        self.device.capture().await?;
        let mut boss = None;
        if self.fleet_number() != boss_fleet {
            self.switch_fleet(session, boss_fleet).await?;
            boss = self.find_boss(BOSS_SEARCH_MIN_SCALE);
        }
        if boss.is_none() {
            self.device.capture().await?;
            boss = self.find_boss(BOSS_SEARCH_MIN_SCALE);
        }
        if boss.is_none() {
            boss = self.boss_swipe_resolver(session).await?;
        }
        if boss.is_none() {
            boss = self.boss_move_resolver(session, boss_fleet).await?;
        }
        if boss.is_none() && boss_fleet != mob_fleet {
            boss = self.boss_move_resolver(session, mob_fleet).await?;
            self.switch_fleet(session, boss_fleet).await?;
        }
        if boss.is_none() {
            warn!("boss fleet could not be brought into view");
        }
        Ok(boss)
    }

    /// Pans the map looking for the boss, lengthening the swipes every four
    /// tries.
    pub async fn boss_swipe_resolver(
        &mut self,
        session: &mut CombatSession,
    ) -> Result<Option<Region>, CombatError> {
        self.device.capture().await?;
        let mut boss = self.find_boss(BOSS_SEARCH_MIN_SCALE);
        let mut swipes = 0;
        while boss.is_none() && swipes < self.config.boss_swipe_max {
            self.swipe_map(session, 1 + swipes / 4).await?;
            self.device.capture().await?;
            boss = self.find_boss(BOSS_SEARCH_MIN_SCALE);
            swipes += 1;
        }
        Ok(boss)
    }

    /// Toggles both fleets so their icons redraw, then selects `fleet`.
    /// `false` if `fleet` is neither of the configured fleets.
    async fn reselect_fleet(
        &mut self,
        session: &mut CombatSession,
        fleet: u8,
    ) -> Result<bool, CombatError> {
        if fleet != self.config.boss_fleet_no && fleet != self.config.mob_fleet_no {
            return Ok(false);
        }
        if self.config.boss_fleet_no != self.config.mob_fleet_no {
            self.device.capture().await?;
            let (first, second) = if self.fleet_number() == 1 { (2, 1) } else { (1, 2) };
            self.switch_fleet(session, first).await?;
            self.switch_fleet(session, second).await?;
        }
        self.switch_fleet(session, fleet).await?;
        Ok(true)
    }

    /// Walks `fleet` over free tiles until the boss shows up.
    pub async fn boss_move_resolver(
        &mut self,
        session: &mut CombatSession,
        fleet: u8,
    ) -> Result<Option<Region>, CombatError> {
        if !self.reselect_fleet(session, fleet).await? {
            return Ok(None);
        }
        let map = match self.reader.single_map(&mut self.device).await {
            Ok(map) => map,
            Err(err) => {
                recoverable(err)?;
                return Ok(None);
            }
        };
        let mut free = self.free_tiles(&map);
        self.device.capture().await?;
        let mut boss = self.find_boss(BOSS_SEARCH_MIN_SCALE);
        while boss.is_none() {
            if !self.move_fleet_to_free_tile(session, &mut free).await? {
                return Ok(None);
            }
            self.device.capture().await?;
            boss = self.find_boss(BOSS_SEARCH_MIN_SCALE);
        }
        Ok(boss)
    }

    /// Moves `fleet` to one free tile so the mob fleets it covered show.
    pub async fn mob_move_resolver(
        &mut self,
        session: &mut CombatSession,
        fleet: u8,
    ) -> Result<bool, CombatError> {
        if !self.reselect_fleet(session, fleet).await? {
            return Ok(false);
        }
        let map = match self.reader.merged_map(&mut self.device).await {
            Ok(map) => map,
            Err(err) => {
                recoverable(err)?;
                return Ok(false);
            }
        };
        let mut free = self.free_tiles(&map);
        self.move_fleet_to_free_tile(session, &mut free).await
    }

    /// Attacks the boss shown at `region`.
    pub async fn attack_boss(
        &mut self,
        session: &mut CombatSession,
        region: Region,
    ) -> Result<BossAttack, CombatError> {
        debug!("started boss attack");
        let at = region.center();

        if self.move_to(session, at).await? == MoveOutcome::NeedsBattle
            && self.battle_handler(session, true).await?
        {
            return self.boss_won(session).await;
        }
        if session.exit.is_some() {
            return Ok(BossAttack::Unreachable);
        }

        self.protected_swipe(session, at, ui::BOSS_CENTER_POINT, Duration::from_millis(300)).await?;
        let map = match self.reader.merged_map(&mut self.device).await {
            Ok(map) => map,
            Err(err) => {
                recoverable(err)?;
                return Ok(BossAttack::Missing);
            }
        };
        let Some(&boss) = map.grid.find(TileClass::Boss).first() else {
            warn!("unable to find the boss fleet on the map");
            return Ok(BossAttack::Missing);
        };

        // Blockers: enemies reachable from the boss, farthest first, then
        // the ones walled off from it
        let mut blockers = objective_indices(&map.grid, boss);
        NodeFilter::EnemyOnly.apply(&mut blockers, &map.nodes, &map.grid);
        blockers.reverse();
        for enemy in map.grid.find(TileClass::Enemy) {
            if !blockers.contains(&enemy) {
                blockers.push(enemy);
            }
        }

        let Some(boss_at) = self.reader.tile_to_screen(boss) else {
            return Ok(BossAttack::Missing);
        };
        for _ in 0..MAX_BOSS_MOVES {
            match self.move_to(session, boss_at).await? {
                MoveOutcome::NeedsBattle => {
                    if self.battle_handler(session, true).await? {
                        return self.boss_won(session).await;
                    }
                }
                MoveOutcome::Retrieved => {}
                MoveOutcome::Unreachable | MoveOutcome::TimedOut => {
                    info!("unable to reach boss, clearing the way");
                    let wait = StableWait::between(Duration::from_secs(1), Duration::from_secs(4));
                    self.device.wait_till_stable(wait).await?;
                    if !self.clear_blocker(session, &mut blockers).await? {
                        break;
                    }
                }
            }
            if session.exit.is_some() {
                break;
            }
        }
        Ok(BossAttack::Unreachable)
    }

    async fn boss_won(&mut self, session: &mut CombatSession) -> Result<BossAttack, CombatError> {
        self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(2))).await?;
        session.boss_defeated = true;
        info!("boss defeated");
        Ok(BossAttack::Defeated)
    }

    /// Fights the next blocker on the list that can be reached. `true` once
    /// one battle is won.
    async fn clear_blocker(
        &mut self,
        session: &mut CombatSession,
        blockers: &mut Vec<TileIndex>,
    ) -> Result<bool, CombatError> {
        while !blockers.is_empty() {
            let enemy = blockers.remove(0);
            let Some(at) = self.reader.tile_to_screen(enemy) else {
                continue;
            };
            if self.move_to(session, at).await? == MoveOutcome::NeedsBattle {
                if self.battle_handler(session, false).await? {
                    let (min, max) = (Duration::from_secs(2), Duration::from_secs(6));
                    let wait = StableWait::between(min, max).frames(5);
                    self.device.wait_till_stable(wait).await?;
                    return Ok(true);
                }
                if session.exit.is_some() {
                    return Ok(false);
                }
            } else {
                sleep(Duration::from_secs(1)).await;
                self.device.capture().await?;
            }
        }
        Ok(false)
    }

    /// Clears one mob fleet by some other route so the boss path opens up.
    /// The strategies run in order and the first that wins a fight counts.
    pub async fn attack_boss_resolver(
        &mut self,
        session: &mut CombatSession,
    ) -> Result<bool, CombatError> {
        let mob = self.config.mob_fleet_no;
        let boss = self.config.boss_fleet_no;
        let one_win = AttackResult::Defeated(1);

        // Swap fleets so the boss fleet goes hunting from a fresh spot
        if self.switch_fleet(session, mob).await?
            && self.switch_fleet(session, boss).await?
            && self.auto_attack_fleet(session, 1, false).await? == one_win
        {
            return Ok(true);
        }
        // Step the boss fleet aside and hunt
        if self.mob_move_resolver(session, boss).await?
            && self.auto_attack_fleet(session, 1, false).await? == one_win
        {
            return Ok(true);
        }
        // Step the mob fleet aside, then hunt with the boss fleet
        if self.mob_move_resolver(session, mob).await?
            && self.switch_fleet(session, boss).await?
            && self.auto_attack_fleet(session, 1, false).await? == one_win
        {
            return Ok(true);
        }
        Ok(false)
    }

    /// Attacks the boss until it falls, clearing blockers between attempts.
    pub async fn resolve_boss(
        &mut self,
        session: &mut CombatSession,
        region: Region,
    ) -> Result<ExitCode, CombatError> {
        let mut outcome = self.attack_boss(session, region).await?;
        let mut rounds = 0;
        while outcome != BossAttack::Defeated
            && rounds < MAX_BOSS_ROUNDS
            && session.exit.is_none()
        {
            rounds += 1;
            if !self.attack_boss_resolver(session).await? {
                break;
            }
            match self.find_boss_fleet(session).await? {
                Some(region) => outcome = self.attack_boss(session, region).await?,
                None => break,
            }
        }
        if outcome == BossAttack::Defeated {
            return Ok(ExitCode::BossDefeated);
        }
        if let Some(exit) = session.exit {
            return Ok(exit);
        }
        warn!(?outcome, "boss could not be defeated");
        Ok(ExitCode::Blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CombatConfig;
    use crate::testing::{enemy_at, harness, script_battle_screens, sea_map, tile_point};
    use crate::ui::assets;

    #[tokio::test(start_paused = true)]
    async fn swipe_search_stops_at_the_cap() {
        let (mut module, game) = harness(CombatConfig::default());
        let mut session = CombatSession::new();
        assert_eq!(module.boss_swipe_resolver(&mut session).await.unwrap(), None);
        // 4 swipes of length 1, 4 of length 2, 4 of length 3
        assert_eq!(game.borrow().swipes(), 24);
        assert_eq!(session.swipe_direction, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn boss_in_view_needs_no_swipe() {
        let (mut module, game) = harness(CombatConfig::default());
        let icon = Region::new(1000, 500, 50, 50);
        game.borrow_mut().show_at(assets::FLEET_BOSS, icon);
        let mut session = CombatSession::new();
        assert_eq!(module.boss_swipe_resolver(&mut session).await.unwrap(), Some(icon));
        assert_eq!(module.find_boss_fleet(&mut session).await.unwrap(), Some(icon));
        assert_eq!(game.borrow().swipes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn boss_hidden_under_a_fleet_is_uncovered_by_moving() {
        let (mut module, game) = harness(CombatConfig::default());
        game.borrow_mut().map = Some(sea_map(&["C.", ".."]));
        for row in 0..2 {
            for col in 0..2 {
                game.borrow_mut().on_touch(tile_point(TileIndex::new(row, col)), |g| {
                    g.show_at(assets::FLEET_BOSS, Region::new(1000, 500, 50, 50));
                });
            }
        }
        let mut session = CombatSession::new();
        let found = module.boss_move_resolver(&mut session, 1).await.unwrap();
        assert_eq!(found, Some(Region::new(1000, 500, 50, 50)));
        assert_eq!(module.boss_move_resolver(&mut session, 2).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_boss_is_reached_after_clearing_the_way() {
        let (mut module, game) = harness(CombatConfig::default());
        script_battle_screens(&game);
        game.borrow_mut().show(assets::BUTTON_RETREAT);
        game.borrow_mut().map = Some(sea_map(&["C.E", "..B"]));
        let boss = tile_point(TileIndex::new(1, 2));
        let enemy = tile_point(TileIndex::new(0, 2));
        let icon = Region::new(1000, 500, 50, 50);
        // The boss cannot be reached until the enemy next to it is gone
        game.borrow_mut().on_touch(icon.center(), |g| g.show(assets::ALERT_UNABLE_REACH));
        game.borrow_mut().on_touch(boss, |g| g.hide(assets::ALERT_UNABLE_REACH));
        game.borrow_mut().on_touch(enemy, |g| g.hide(assets::ALERT_UNABLE_REACH));
        enemy_at(&game, enemy);
        let mut cleared = false;
        game.borrow_mut().on_touch(boss, move |g| {
            if cleared {
                g.show(assets::MENU_LOADING);
                g.show(assets::MENU_TOUCH_TO_CONTINUE);
            } else {
                g.show(assets::ALERT_UNABLE_REACH);
            }
            cleared = true;
        });

        let mut session = CombatSession::new();
        let outcome = module.attack_boss(&mut session, icon).await.unwrap();
        assert_eq!(outcome, BossAttack::Defeated);
        assert!(session.boss_defeated);
        assert_eq!(session.combats_done, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_boss_is_reported() {
        let (mut module, game) = harness(CombatConfig::default());
        game.borrow_mut().map = Some(sea_map(&["C.E", "..."]));
        let icon = Region::new(1000, 500, 50, 50);
        game.borrow_mut().on_touch(icon.center(), |g| g.show(assets::ALERT_UNABLE_REACH));
        let mut session = CombatSession::new();
        assert_eq!(module.attack_boss(&mut session, icon).await.unwrap(), BossAttack::Missing);
    }
}
