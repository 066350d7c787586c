// Fleet selection and map panning.
//
// Both fleets live on the same map and the game toggles between them when
// the switch button is pressed, but a drag that starts on a fleet icon can
// also select it. Every swipe therefore checks the fleet badge afterwards
// and switches back if the selection moved.

use crate::combat::CombatModule;
use crate::device::{Collaborators, Device, Point, StableWait};
use crate::error::CombatError;
use crate::perception::MapReader;
use crate::session::{CombatSession, FleetRole};
use crate::ui::{SWIPE_GESTURES, assets, regions};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Taps on the switch button before giving up on reaching a fleet.
const MAX_SWITCH_TAPS: usize = 4;
/// Times a swipe is redone because it changed the selected fleet.
const MAX_SWIPE_RETRIES: usize = 3;

impl<D: Device, C: Collaborators, R: MapReader> CombatModule<D, C, R> {
    /// Selected fleet according to the badge on the current screen.
    pub fn fleet_number(&self) -> u8 {
        match self.device.find_in_region(assets::FLEET_1, regions::FLEET_NO, 0.9) {
            Some(_) => 1,
            None => 2,
        }
    }

    /// Selects `fleet`. `true` if the selection changed.
    pub async fn switch_fleet(
        &mut self,
        session: &mut CombatSession,
        fleet: u8,
    ) -> Result<bool, CombatError> {
        self.device.capture().await?;
        if self.fleet_number() == fleet {
            return Ok(false);
        }
        for _ in 0..MAX_SWITCH_TAPS {
            session.last_visited = None;
            self.device.touch_region(regions::BUTTON_SWITCH_FLEET).await?;
            self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(2))).await?;
            if self.fleet_number() == fleet {
                info!(fleet, "switched fleet");
                return Ok(true);
            }
        }
        warn!(fleet, "fleet switch did not take");
        Ok(false)
    }

    /// Pans the map `times` times in the next direction of the cycle.
    pub async fn swipe_map(
        &mut self,
        session: &mut CombatSession,
        times: u32,
    ) -> Result<(), CombatError> {
        self.device.capture().await?;
        let fleet = self.fleet_number();
        let gesture = SWIPE_GESTURES[session.swipe_direction % SWIPE_GESTURES.len()];
        for _ in 0..MAX_SWIPE_RETRIES {
            for _ in 0..times {
                session.last_visited = None;
                self.device.swipe(gesture.from, gesture.to, gesture.duration).await?;
            }
            self.device.capture().await?;
            if self.fleet_number() == fleet {
                break;
            }
            debug!(fleet, "swipe selected the other fleet, switching back");
            self.switch_fleet(session, fleet).await?;
        }
        session.swipe_direction = (session.swipe_direction + 1) % SWIPE_GESTURES.len();
        self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(2))).await?;
        Ok(())
    }

    /// A single drag that leaves the selected fleet unchanged.
    pub async fn protected_swipe(
        &mut self,
        session: &mut CombatSession,
        from: Point,
        to: Point,
        duration: Duration,
    ) -> Result<(), CombatError> {
        self.device.capture().await?;
        let fleet = self.fleet_number();
        self.device.swipe(from, to, duration).await?;
        self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(2))).await?;
        if self.fleet_number() != fleet {
            self.switch_fleet(session, fleet).await?;
        }
        Ok(())
    }

    /// Picks the fleet the sortie needs right now. `true` if it switched.
    pub async fn auto_switch_fleet(
        &mut self,
        session: &mut CombatSession,
    ) -> Result<bool, CombatError> {
        let fleet = match session.fleet_role {
            FleetRole::Forced(fleet) => fleet,
            _ => {
                let boss_time = session.combats_done >= self.config.switch_fleet_after_combats
                    || session.boss_fleet_found
                    || (self.kills_before_boss > 0
                        && session.kills_count >= self.kills_before_boss);
                if boss_time {
                    session.fleet_role = FleetRole::Boss;
                    self.config.boss_fleet_no
                } else {
                    session.fleet_role = FleetRole::Mob;
                    self.config.mob_fleet_no
                }
            }
        };
        self.switch_fleet(session, fleet).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CombatConfig;
    use crate::core_modules::grid_locator::TileIndex;
    use crate::testing::harness;

    #[tokio::test(start_paused = true)]
    async fn switching_to_the_current_fleet_is_a_no_op() {
        let (mut module, game) = harness(CombatConfig::default());
        let mut session = CombatSession::new();
        assert!(!module.switch_fleet(&mut session, 1).await.unwrap());
        assert!(game.borrow().actions.is_empty());
        assert!(module.switch_fleet(&mut session, 2).await.unwrap());
        assert_eq!(game.borrow().fleet, 2);
        assert_eq!(game.borrow().region_touches(regions::BUTTON_SWITCH_FLEET), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn swipes_cycle_directions_and_forget_the_last_tile() {
        let (mut module, game) = harness(CombatConfig::default());
        let mut session =
            CombatSession { last_visited: Some(TileIndex::new(1, 1)), ..CombatSession::new() };
        module.swipe_map(&mut session, 2).await.unwrap();
        module.swipe_map(&mut session, 1).await.unwrap();
        assert_eq!(session.swipe_direction, 2);
        assert_eq!(session.last_visited, None);
        assert_eq!(game.borrow().swipes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn a_swipe_that_grabs_a_fleet_is_undone() {
        let (mut module, game) = harness(CombatConfig::default());
        game.borrow_mut().swipes_grabbing_fleet = 1;
        let mut session = CombatSession::new();
        module
            .protected_swipe(
                &mut session,
                Point::new(700, 500),
                Point::new(960, 600),
                Duration::from_millis(300),
            )
            .await
            .unwrap();
        assert_eq!(game.borrow().fleet, 1);
        assert_eq!(game.borrow().region_touches(regions::BUTTON_SWITCH_FLEET), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn swipe_map_redoes_a_swipe_that_grabbed_a_fleet() {
        let (mut module, game) = harness(CombatConfig::default());
        game.borrow_mut().swipes_grabbing_fleet = 1;
        let mut session = CombatSession::new();
        module.swipe_map(&mut session, 1).await.unwrap();
        assert_eq!(game.borrow().fleet, 1);
        assert_eq!(game.borrow().swipes(), 2);
        assert_eq!(session.swipe_direction, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn boss_fleet_takes_over_after_enough_fights() {
        let config = CombatConfig {
            boss_fleet_no: 2,
            switch_fleet_after_combats: 2,
            ..CombatConfig::default()
        };
        let (mut module, game) = harness(config);
        let mut session = CombatSession { combats_done: 1, ..CombatSession::new() };
        assert!(!module.auto_switch_fleet(&mut session).await.unwrap());
        assert_eq!(session.fleet_role, FleetRole::Mob);
        session.combats_done = 2;
        assert!(module.auto_switch_fleet(&mut session).await.unwrap());
        assert_eq!(session.fleet_role, FleetRole::Boss);
        assert_eq!(game.borrow().fleet, 2);

        session.fleet_role = FleetRole::Forced(1);
        assert!(module.auto_switch_fleet(&mut session).await.unwrap());
        assert_eq!(game.borrow().fleet, 1);
    }
}
