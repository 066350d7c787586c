// THEORY:
// A battle is driven entirely by reading screens. The handler has two
// phases:
//
// Stage 1 (pre-battle): keep pressing start until the loading screen shows,
//          dealing with a full dock and low morale on the way.
// Stage 2 (post-battle): the battle itself runs on auto; afterwards a
//          sequence of result screens has to be dismissed in whatever order
//          the game shows them. A handful of flags remember how far along
//          the sequence we are, since several screens look alike.
//
// The retreat handler is the same idea pointed the other way: back out of
// whatever is on screen until the main menu shows.

use crate::combat::CombatModule;
use crate::device::{Collaborators, Device, POLL_INTERVAL, StableWait};
use crate::error::CombatError;
use crate::perception::MapReader;
use crate::session::{CombatSession, ExitCode};
use crate::ui::{assets, regions};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

pub const PRE_BATTLE_BUDGET: Duration = Duration::from_secs(60);
pub const POST_BATTLE_BUDGET: Duration = Duration::from_secs(300);
pub const RETREAT_BUDGET: Duration = Duration::from_secs(60);

impl<D: Device, C: Collaborators, R: MapReader> CombatModule<D, C, R> {
    /// Fights the battle that is about to start. `true` when the fleet won
    /// and is back on the map (a boss win returns as soon as it is
    /// confirmed).
    pub async fn battle_handler(
        &mut self,
        session: &mut CombatSession,
        boss: bool,
    ) -> Result<bool, CombatError> {
        info!(boss, "starting combat");

        // Stage 1: get the battle going
        let started = Instant::now();
        loop {
            self.device.capture().await?;
            if self.device.find(assets::MENU_LOADING, 0.8).is_some() {
                break;
            }
            if started.elapsed() > PRE_BATTLE_BUDGET {
                warn!("battle never started, retreating");
                session.exit.get_or_insert(ExitCode::Blocked);
                self.retreat_handler(session).await?;
                return Ok(false);
            }
            if self.seen(assets::BUTTON_SORT) {
                if !self.relieve_dock(session).await {
                    session.exit.get_or_insert(ExitCode::Blocked);
                    self.retreat_handler(session).await?;
                    return Ok(false);
                }
            } else if self.seen(assets::ALERT_MORALE_LOW) {
                if self.config.ignore_morale {
                    self.touch_if_seen(assets::MENU_BUTTON_CONFIRM).await?;
                } else {
                    session.exit.get_or_insert(ExitCode::MoraleLow);
                    self.retreat_handler(session).await?;
                    return Ok(false);
                }
            } else if self.device.find(assets::COMBAT_PAUSE, 0.7).is_some() {
                warn!("combat is paused without a loading screen, assuming the battle started");
                break;
            } else {
                self.device.touch_region(regions::MENU_COMBAT_START).await?;
                sleep(Duration::from_secs(1)).await;
            }
        }

        sleep(Duration::from_secs(4)).await;

        // Stage 2: dismiss the result screens
        let mut in_battle = true;
        let mut items_received = false;
        let mut locked_ship = false;
        let mut confirmed_fight = false;
        let mut defeat = false;
        let mut confirmed_fleet_switch = false;
        let started = Instant::now();
        loop {
            if started.elapsed() > POST_BATTLE_BUDGET {
                warn!("battle did not resolve in time");
                return Ok(false);
            }
            sleep(POLL_INTERVAL).await;
            self.device.capture().await?;

            if in_battle && self.device.find(assets::COMBAT_PAUSE, 0.7).is_some() {
                debug!("in battle");
                sleep(Duration::from_secs(2)).await;
                continue;
            }
            if !items_received {
                if self.seen(assets::MENU_TOUCH_TO_CONTINUE) {
                    debug!("combat ended: tap to continue");
                    self.device.touch_region(regions::TAP_TO_CONTINUE).await?;
                    in_battle = false;
                    continue;
                }
                if self.seen(assets::ITEM_FOUND) {
                    debug!("combat ended: items received screen");
                    self.device.touch_region(regions::TAP_TO_CONTINUE).await?;
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
                if !locked_ship && self.seen(assets::ALERT_LOCK) {
                    info!("locking received ship");
                    self.device.touch_region(regions::LOCK_SHIP_BUTTON).await?;
                    locked_ship = true;
                    continue;
                }
                if let Some(drop) = assets::DROPS.iter().copied().find(|d| self.seen(d)) {
                    info!(drop, "received ship as drop");
                    self.device.touch_region(regions::DISMISS_SHIP_DROP).await?;
                    self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(2))).await?;
                    continue;
                }
            }
            if in_battle {
                continue;
            }

            if !confirmed_fight && self.seen(assets::BUTTON_CONFIRM) {
                info!("combat ended");
                items_received = true;
                confirmed_fight = true;
                self.device.touch_region(regions::COMBAT_END_CONFIRM).await?;
                if boss {
                    return Ok(true);
                }
                self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(3))).await?;
            }
            if !confirmed_fight && self.seen(assets::COMMANDER) {
                // Submarine fleets show their own summary first
                items_received = true;
                self.device.touch_region(regions::DISMISS_SURFACE_FLEET_SUMMARY).await?;
                continue;
            }
            if defeat && !confirmed_fleet_switch {
                if self.seen(assets::ALERT_UNABLE_BATTLE) {
                    self.device.touch_region(regions::CLOSE_INFO_DIALOG).await?;
                    self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(3))).await?;
                    session.exit = Some(ExitCode::FleetDefeated);
                    return Ok(false);
                }
                if self.seen(assets::ALERT_FLEET_CANNOT_BE_FORMED) {
                    // The game switches to the other fleet by itself
                    self.device.touch_region(regions::CLOSE_INFO_DIALOG).await?;
                    confirmed_fleet_switch = true;
                    self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(3))).await?;
                    continue;
                }
                // Flagship sunk with part of the backline left
                self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(3))).await?;
                session.exit = Some(ExitCode::FleetDefeated);
                return Ok(false);
            }
            if confirmed_fight && self.seen(assets::MENU_BUTTON_CONFIRM) {
                info!("found commission info message");
                self.device.touch_region(regions::COMBAT_COM_CONFIRM).await?;
                continue;
            }
            if confirmed_fight && (self.seen(assets::BUTTON_RETREAT) || self.seen(assets::ATTACK)) {
                if confirmed_fleet_switch {
                    return Ok(false);
                }
                session.record_victory();
                let (combats_done, kills) = (session.combats_done, session.kills_count);
                debug!(combats_done, kills, "fleet won the fight");
                return Ok(true);
            }
            if confirmed_fight && self.touch_if_seen(assets::DEFEAT_CLOSE_BUTTON).await? {
                debug!("fleet was defeated");
                defeat = true;
                self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(3))).await?;
            }
        }
    }

    /// Backs out of the map until the main menu shows.
    pub async fn retreat_handler(
        &mut self,
        session: &mut CombatSession,
    ) -> Result<(), CombatError> {
        let started = Instant::now();
        while started.elapsed() < RETREAT_BUDGET {
            sleep(Duration::from_secs(1)).await;
            self.device.capture().await?;

            if self.seen(assets::ALERT_INFO) {
                debug!("found alert");
                self.touch_if_seen(assets::ALERT_CLOSE).await?;
                self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(2))).await?;
                continue;
            }
            if self.seen(assets::ALERT_MORALE_LOW) {
                self.device.touch_region(regions::CLOSE_INFO_DIALOG).await?;
                session.exit.get_or_insert(ExitCode::MoraleLow);
                continue;
            }
            if self.seen(assets::BUTTON_SORT) {
                self.device.touch_region(regions::CLOSE_INFO_DIALOG).await?;
                session.exit.get_or_insert(ExitCode::Blocked);
                continue;
            }
            if self.seen(assets::MENU_FORMATION) {
                self.device.touch_region(regions::MENU_NAV_BACK).await?;
                continue;
            }
            if self.seen(assets::BUTTON_RETREAT) {
                self.device.touch_region(regions::RETREAT_BUTTON).await?;
                continue;
            }
            if self.seen(assets::MENU_BUTTON_CONFIRM) {
                self.device.touch_region(regions::COMBAT_COM_CONFIRM).await?;
                continue;
            }
            if self.seen(assets::ATTACK) {
                let finished = matches!(
                    session.exit,
                    Some(
                        ExitCode::BossDefeated
                            | ExitCode::RetreatedAfterFights
                            | ExitCode::FleetDefeated
                    )
                );
                if !finished {
                    info!("retreating");
                }
                return Ok(());
            }
        }
        warn!("main menu never showed while retreating");
        Ok(())
    }
}
