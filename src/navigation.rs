// THEORY:
// Moving a fleet is a touch followed by watching the screen until the game
// says what happened. Touches inside HUD areas would press buttons instead
// of moving, so those points are refused before anything is sent.
//
// Key architectural principles:
// 1) One touch, then poll. The target is re-touched every 2 s in case the
//    first tap was eaten by an animation.
// 2) Every poll reacts to at most one screen: alerts and ambushes are dealt
//    with in place and the loop keeps watching.
// 3) The whole move is bounded at 16 s; a move that never resolves is
//    reported as timed out, not retried forever.

use crate::combat::CombatModule;
use crate::device::{Collaborators, Device, POLL_INTERVAL, Point, StableWait};
use crate::error::CombatError;
use crate::perception::MapReader;
use crate::session::CombatSession;
use crate::ui::{assets, regions};
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

pub const MOVE_BUDGET: Duration = Duration::from_secs(16);
pub const RETOUCH_INTERVAL: Duration = Duration::from_secs(2);

/// What a fleet movement ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The fleet ran into an enemy and a battle is about to start.
    NeedsBattle,
    /// The target was refused or the game reported it out of reach.
    Unreachable,
    /// The fleet picked up supplies or an item on the node.
    Retrieved,
    /// Nothing conclusive happened within the move budget.
    TimedOut,
}

/// Screen areas covered by HUD widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadZone {
    OffScreen,
    FleetBuff,
    FleetInfo,
    Command,
    Strategy,
    StageInfo,
}

impl fmt::Display for DeadZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeadZone::OffScreen => "out of screen",
            DeadZone::FleetBuff => "fleet buff",
            DeadZone::FleetInfo => "fleet info",
            DeadZone::Command => "command",
            DeadZone::Strategy => "strategy",
            DeadZone::StageInfo => "stage info",
        };
        f.write_str(name)
    }
}

/// The HUD area `p` falls in, if any.
pub fn dead_zone_for(p: Point) -> Option<DeadZone> {
    let (x, y) = (p.x, p.y);
    if !(0..1920).contains(&x) || !(0..1080).contains(&y) {
        return Some(DeadZone::OffScreen);
    }
    if y < 240 {
        return Some(DeadZone::FleetBuff);
    }
    if x < 180 {
        return Some(DeadZone::FleetInfo);
    }
    if x > 990 && y >= 940 {
        return Some(DeadZone::Command);
    }
    if x > 1765 && y > 605 && y < 805 {
        return Some(DeadZone::Strategy);
    }
    if x > 1845 && y > 150 && y < 340 {
        return Some(DeadZone::StageInfo);
    }
    None
}

impl<D: Device, C: Collaborators, R: MapReader> CombatModule<D, C, R> {
    /// Moves the selected fleet towards `target` and reports what stopped it.
    pub async fn move_to(
        &mut self,
        session: &mut CombatSession,
        target: Point,
    ) -> Result<MoveOutcome, CombatError> {
        if let Some(zone) = dead_zone_for(target) {
            info!(x = target.x, y = target.y, %zone, "skipping touch in HUD zone");
            return Ok(MoveOutcome::Unreachable);
        }

        info!(x = target.x, y = target.y, "moving towards objective");
        self.device.touch(target).await?;

        let mut started = Instant::now();
        let mut last_touch = started;
        while started.elapsed() < MOVE_BUDGET {
            sleep(POLL_INTERVAL).await;
            self.device.capture().await?;

            if self.device.find(assets::ALERT_UNABLE_REACH, 0.8).is_some() {
                warn!("unable to reach the target");
                return Ok(MoveOutcome::Unreachable);
            } else if self.seen(assets::BUTTON_EVADE) {
                info!("ambush found, trying to evade");
                self.device.touch_region(regions::COMBAT_AMBUSH_EVADE).await?;
                self.device.wait_till_stable(StableWait::up_to(Duration::from_millis(500))).await?;
                continue;
            } else if self.seen(assets::ALERT_FAILED_EVADE) {
                warn!("failed to evade ambush");
                session.kills_count = session.kills_count.saturating_sub(1);
                self.device.touch_region(regions::MENU_COMBAT_START).await?;
                self.battle_handler(session, false).await?;
                started = Instant::now();
                self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(2))).await?;
                continue;
            } else if self.seen(assets::ALERT_INFO) {
                debug!("found alert");
                self.touch_if_seen(assets::ALERT_CLOSE).await?;
                self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(2))).await?;
                continue;
            } else if self.seen(assets::ALERT_AMMO_SUPPLIES) {
                info!("ammo supplies found on node");
                return Ok(MoveOutcome::Retrieved);
            } else if self.seen(assets::ITEM_FOUND) {
                info!("item found on node");
                self.device.touch_region(regions::TAP_TO_CONTINUE).await?;
                if self.seen(assets::MENU_EMERGENCY) {
                    sleep(Duration::from_secs(1)).await;
                    self.device.capture().await?;
                    if !self.seen(assets::STRATEGY) {
                        self.device.touch_region(regions::CLOSE_STRATEGY_MENU).await?;
                        let wait = StableWait::up_to(Duration::from_secs(2));
                        self.device.wait_till_stable(wait).await?;
                    }
                }
                return Ok(MoveOutcome::Retrieved);
            }

            if self.seen(assets::MENU_LOADING) {
                return Ok(MoveOutcome::NeedsBattle);
            } else if self.seen(assets::MENU_FORMATION) {
                self.touch_if_seen(assets::AUTO_COMBAT_OFF).await?;
                return Ok(MoveOutcome::NeedsBattle);
            } else if last_touch.elapsed() > RETOUCH_INTERVAL {
                last_touch = Instant::now();
                self.device.touch(target).await?;
            }
        }

        debug!(x = target.x, y = target.y, "movement timed out");
        Ok(MoveOutcome::TimedOut)
    }
}
