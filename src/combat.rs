// THEORY:
// `CombatModule` runs one sortie from the stage selection screen to the
// return to the main menu. It is a polling state machine: every iteration
// reads the screen and reacts to the first thing it recognises.
//
// Key architectural principles:
// 1) One control loop. Nothing is spawned; every handler is an `async fn`
//    awaited in turn and the session state is lent to each of them.
// 2) Exit codes, not errors. Everything the game can throw at a sortie
//    (full dock, low morale, a lost fight, an unreadable map) ends the cycle
//    with an `ExitCode`. Only broken calibration or a broken device is an
//    `Err`.
// 3) Every loop is bounded, by a wall-clock budget or a counter, so a screen
//    the engine does not recognise ends the cycle instead of hanging it.
//
// The handlers are split by concern across `navigation`, `battle`, `fleet`
// and `boss_resolver`; this file holds the stage level and the mob hunt.

use crate::config::CombatConfig;
use crate::core_modules::graph_search::objective_indices;
use crate::core_modules::grid_locator::TileIndex;
use crate::core_modules::node_filter;
use crate::core_modules::tile_classifier::{ClassifiedMap, TileClass};
use crate::device::{Collaborators, DEFAULT_SIMILARITY, Device, POLL_INTERVAL, Region, StableWait};
use crate::error::{CombatError, ConfigError, DeviceError, PerceptionError};
use crate::navigation::MoveOutcome;
use crate::perception::MapReader;
use crate::presets::MapId;
use crate::session::{CombatSession, ExitCode, FleetRole};
use crate::ui::{self, assets, regions};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

/// Wall-clock limit for one stage.
pub const STAGE_BUDGET: Duration = Duration::from_secs(30 * 60);
/// How long to wait for the user to bring the map into view.
pub const MAP_SEARCH_BUDGET: Duration = Duration::from_secs(60);
/// Scale range floor used when looking for the boss icon on the map.
pub const BOSS_ICON_MIN_SCALE: f32 = 0.6;

const MAX_FLEET_LOCK_TAPS: usize = 5;
/// Search rounds `auto_attack_fleet` may spend without a win.
const MAX_ATTACK_ROUNDS: usize = 10;
/// Swipes tried on an unreadable map before giving up on it.
const UNREADABLE_MAP_SWIPES: usize = 4;

/// How the stage selection screen was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEntry {
    /// Already on the map, nothing to select.
    OnMap,
    /// The map button was found and pressed.
    Selected(Region),
    NotFound,
}

/// Result of hunting mob fleets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackResult {
    /// No enemy could be found or reached.
    Failed,
    /// A boss is on the map and the caller asked to stop for it.
    BossSighted,
    Defeated(u32),
}

/// Objectives seen on one read of the map.
#[derive(Debug, Clone, Default)]
pub struct Sighting {
    pub bosses: Vec<TileIndex>,
    pub targets: Vec<TileIndex>,
}

/// A merged map and the ranked targets read from it.
#[derive(Debug, Clone)]
pub struct MapRead {
    pub map: ClassifiedMap,
    pub targets: Vec<TileIndex>,
}

pub struct CombatModule<D, C, R> {
    pub(crate) device: D,
    pub(crate) collaborators: C,
    pub(crate) reader: R,
    pub(crate) config: CombatConfig,
    pub(crate) map: MapId,
    /// Kills the map needs before its boss spawns; 0 when unknown.
    pub(crate) kills_before_boss: u32,
    pub(crate) rng: StdRng,
}

impl<D: Device, C: Collaborators, R: MapReader> CombatModule<D, C, R> {
    pub fn new(
        device: D,
        collaborators: C,
        reader: R,
        config: CombatConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let map = config.map_id()?;
        let kills_before_boss = config.kills_before_boss_for(&map);
        Ok(Self {
            device,
            collaborators,
            reader,
            config,
            map,
            kills_before_boss,
            rng: StdRng::from_entropy(),
        })
    }

    /// Makes the shuffled fallback orders reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &CombatConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub(crate) fn seen(&self, asset: &str) -> bool {
        self.device.find(asset, DEFAULT_SIMILARITY).is_some()
    }

    /// Touches `asset` if it is on screen.
    pub(crate) async fn touch_if_seen(&mut self, asset: &str) -> Result<bool, DeviceError> {
        match self.device.find(asset, DEFAULT_SIMILARITY) {
            Some(region) => {
                self.device.touch_region(region).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn find_boss(&self, min_scale: f32) -> Option<Region> {
        self.device.find_in_scaling_range(assets::FLEET_BOSS, min_scale)
    }

    /// Tries to free dock space, enhancement first, each at most once per
    /// stage unless retirement succeeds. `false` when nothing is left to try.
    pub(crate) async fn relieve_dock(&mut self, session: &mut CombatSession) -> bool {
        if self.config.enhancement_enabled && !session.enhancement_failed {
            if !self.collaborators.enhance(true).await {
                session.enhancement_failed = true;
            }
            return true;
        }
        if self.config.retirement_enabled && !session.retirement_failed {
            if self.collaborators.retire(true).await {
                session.enhancement_failed = false;
            } else {
                session.retirement_failed = true;
            }
            return true;
        }
        false
    }

    /// Plays one sortie of the configured map and reports how it ended.
    ///
    /// `session` is reset first and holds the counters of the sortie when
    /// this returns.
    pub async fn run_combat_cycle(
        &mut self,
        session: &mut CombatSession,
    ) -> Result<ExitCode, CombatError> {
        *session = CombatSession::new();
        if let Some(fleet) = self.config.force_fleet_no {
            session.fleet_role = FleetRole::Forced(fleet);
        }
        self.reader.calibrate(&self.map)?;

        if !self.collaborators.oil_ok() {
            warn!("oil below the limit, not sortieing");
            return Ok(self.finish_cycle(session, ExitCode::Blocked));
        }

        let entry = self.reach_map().await?;
        if entry == MapEntry::NotFound {
            return Ok(self.finish_cycle(session, ExitCode::Blocked));
        }

        let started = Instant::now();
        loop {
            sleep(POLL_INTERVAL).await;
            self.device.capture().await?;

            if session.exit.is_some() {
                break;
            }
            if started.elapsed() > STAGE_BUDGET {
                warn!("stage budget exhausted");
                session.exit = Some(ExitCode::Blocked);
                break;
            }

            if self.seen(assets::BUTTON_GO) {
                debug!("found map summary go button");
                self.device.touch_region(regions::MAP_SUMMARY_GO).await?;
                self.device.wait_till_stable(StableWait::default()).await?;
            }
            if let Some(menu) = self.device.find(assets::MENU_FLEET, DEFAULT_SIMILARITY) {
                if ui::SECOND_FLEET_SLOT_Y.contains(&menu.y)
                    && !self.config.boss_fleet
                    && self.map.drops_second_fleet()
                {
                    info!("removing second fleet from fleet selection");
                    self.device.touch_region(regions::CLEAR_SECOND_FLEET).await?;
                }
            }
            if self.seen(assets::MENU_SELECT_FLEET) {
                debug!("found fleet select go button");
                self.device.touch_region(regions::FLEET_MENU_GO).await?;
                self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(2))).await?;
            }
            if self.seen(assets::BUTTON_RETREAT) {
                debug!("found retreat button, starting clear function");
                self.clear_map(session).await?;
                continue;
            }
            if self.seen(assets::BUTTON_SORT) {
                if self.relieve_dock(session).await {
                    sleep(Duration::from_secs(1)).await;
                    if let MapEntry::Selected(map_button) = entry {
                        self.device.touch_region(map_button).await?;
                    }
                    continue;
                }
                self.device.touch_region(regions::CLOSE_INFO_DIALOG).await?;
                session.exit = Some(ExitCode::Blocked);
                break;
            }
            if self.seen(assets::ALERT_MORALE_LOW) {
                if self.config.ignore_morale {
                    self.touch_if_seen(assets::MENU_BUTTON_CONFIRM).await?;
                } else {
                    self.device.touch_region(regions::CLOSE_INFO_DIALOG).await?;
                    session.exit = Some(ExitCode::MoraleLow);
                    break;
                }
            }
            if self.seen(assets::MENU_BUTTON_CONFIRM) {
                info!("found commission info message");
                self.device.touch_region(regions::COMBAT_COM_CONFIRM).await?;
            }
        }

        let exit = session.exit.unwrap_or(ExitCode::Blocked);
        Ok(self.finish_cycle(session, exit))
    }

    fn finish_cycle(&mut self, session: &mut CombatSession, exit: ExitCode) -> ExitCode {
        session.exit = Some(exit);
        if exit.is_completed() {
            self.collaborators.increment_combat_done();
        } else {
            self.collaborators.increment_combat_attempted();
        }
        info!(%exit, combats_done = session.combats_done, "combat cycle finished");
        exit
    }

    /// Gets from the main menu to the configured map and presses it.
    pub async fn reach_map(&mut self) -> Result<MapEntry, CombatError> {
        self.device.wait_till_stable(StableWait::default()).await?;
        if self.seen(assets::MENU_BUTTON_BATTLE) {
            debug!("found menu battle button");
            self.device.touch_region(regions::MENU_BUTTON_BATTLE).await?;
            sleep(Duration::from_secs(4)).await;
            self.device.capture().await?;
        }
        if self.seen(assets::BUTTON_RETREAT) {
            return Ok(MapEntry::OnMap);
        }

        match self.map {
            MapId::Event { .. } => {
                self.device.touch_region(regions::EVENT_BUTTON).await?;
                sleep(Duration::from_secs(1)).await;
                self.device.capture().await?;
                let normal_button = self.device.find(assets::BUTTON_NORMAL_MODE, 0.8).is_some();
                // The button offers the mode that is not active
                if self.map.is_normal_mode() == normal_button {
                    self.device.touch_region(regions::NORMAL_MODE_BUTTON).await?;
                    sleep(Duration::from_secs(1)).await;
                    self.device.capture().await?;
                }
            }
            MapId::Campaign { .. } => {
                if self.seen(assets::BUTTON_NORMAL_MODE) {
                    debug!("disabling hard mode");
                    self.device.touch_region(regions::NORMAL_MODE_BUTTON).await?;
                    sleep(Duration::from_secs(1)).await;
                    self.device.capture().await?;
                }
            }
        }

        let button = assets::map_button(&self.map.to_string());
        if let Some(region) = self.device.find(&button, 0.9) {
            info!(map = %self.map, "found specified map");
            self.device.touch_region(region).await?;
            return Ok(MapEntry::Selected(region));
        }

        self.navigate_worlds().await?;

        let started = Instant::now();
        let mut reported = false;
        while started.elapsed() < MAP_SEARCH_BUDGET {
            self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(1))).await?;
            if let Some(region) = self.device.find(&button, 0.9) {
                info!(map = %self.map, "found specified map");
                self.device.touch_region(region).await?;
                return Ok(MapEntry::Selected(region));
            }
            if !reported {
                error!(map = %self.map, "map button not found, move to the world the map is in");
                reported = true;
            }
            sleep(Duration::from_secs(1)).await;
        }
        Ok(MapEntry::NotFound)
    }

    /// Pages the stage selection towards the configured map's world.
    async fn navigate_worlds(&mut self) -> Result<(), CombatError> {
        match self.map {
            MapId::Event { letter, .. } => {
                let visible = |module: &Self, maps: [&str; 2]| {
                    maps.iter().any(|m| module.device.find(&assets::map_button(m), 0.9).is_some())
                };
                if matches!(letter, 'A' | 'C') && visible(self, ["E-B1", "E-D1"]) {
                    debug!("paging left");
                    self.device.touch_region(regions::MAP_NAV_LEFT).await?;
                } else if matches!(letter, 'B' | 'D') && visible(self, ["E-A1", "E-C1"]) {
                    debug!("paging right");
                    self.device.touch_region(regions::MAP_NAV_RIGHT).await?;
                }
            }
            MapId::Campaign { world, .. } => {
                let shown = (1..=13u32).find(|w| {
                    self.device.find(&assets::map_button(&format!("{w}-1")), 0.9).is_some()
                });
                if let Some(shown) = shown {
                    let taps = world as i64 - shown as i64;
                    let arrow =
                        if taps > 0 { regions::MAP_NAV_RIGHT } else { regions::MAP_NAV_LEFT };
                    for _ in 0..taps.unsigned_abs() {
                        debug!(taps, "paging worlds");
                        self.device.touch_region(arrow).await?;
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Clears the map the fleets are on until the boss falls or the sortie
    /// has to end, then retreats to the main menu.
    pub async fn clear_map(&mut self, session: &mut CombatSession) -> Result<(), CombatError> {
        info!("started map clear");
        self.device.wait_till_stable(StableWait::up_to(Duration::from_millis(2500))).await?;

        for _ in 0..MAX_FLEET_LOCK_TAPS {
            if self.device.find(assets::FLEET_LOCK, 0.99).is_none() {
                break;
            }
            warn!("fleet lock is not supported, disabling it");
            self.device.touch_region(regions::FLEET_LOCK).await?;
            sleep(Duration::from_secs(1)).await;
            self.device.capture().await?;
        }

        if self.config.hide_subs_hunting_range {
            sleep(Duration::from_millis(500)).await;
            self.device.touch_region(regions::OPEN_STRATEGY_MENU).await?;
            sleep(Duration::from_secs(1)).await;
            self.device.touch_region(regions::DISABLE_SUBS_HUNTING_RADIUS).await?;
            sleep(Duration::from_secs(1)).await;
            self.device.touch_region(regions::CLOSE_STRATEGY_MENU).await?;
        }

        if self.config.boss_fleet_no != self.config.mob_fleet_no {
            self.switch_fleet(session, self.config.boss_fleet_no).await?;
            self.switch_fleet(session, self.config.mob_fleet_no).await?;
        }

        let started = Instant::now();
        loop {
            sleep(POLL_INTERVAL).await;
            self.device.capture().await?;

            if session.exit.is_some() {
                break;
            }
            if session.boss_defeated {
                session.exit = Some(ExitCode::BossDefeated);
                break;
            }
            if started.elapsed() > STAGE_BUDGET {
                warn!("map clear budget exhausted");
                session.exit = Some(ExitCode::Blocked);
                break;
            }
            if self.seen(assets::ALERT_UNABLE_BATTLE) {
                self.device.touch_region(regions::CLOSE_INFO_DIALOG).await?;
                session.exit = Some(ExitCode::Blocked);
                break;
            }
            let retreat_after = self.config.retreat_after;
            if retreat_after != 0 && session.combats_done >= retreat_after {
                info!(retreat_after, "retreating after defeating enough enemies");
                session.exit = Some(ExitCode::FleetDefeated);
                break;
            }
            if !self.seen(assets::STRATEGY) {
                self.device.touch_region(regions::CLOSE_STRATEGY_MENU).await?;
                self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(2))).await?;
            }
            if self.seen(assets::MENU_LOADING) {
                self.battle_handler(session, false).await?;
                continue;
            } else if self.seen(assets::MENU_FORMATION) {
                self.touch_if_seen(assets::AUTO_COMBAT_OFF).await?;
                self.battle_handler(session, false).await?;
                continue;
            }

            let mut boss = self.find_boss(BOSS_ICON_MIN_SCALE);
            if session.boss_fleet_found || boss.is_some() {
                info!("boss fleet was found");
                session.boss_fleet_found = true;
                if self.auto_switch_fleet(session).await? || boss.is_none() {
                    boss = self.find_boss_fleet(session).await?;
                }
                if let Some(region) = boss {
                    let exit = self.resolve_boss(session, region).await?;
                    session.exit = Some(exit);
                    break;
                }
            }

            self.auto_switch_fleet(session).await?;
            if self.auto_attack_fleet(session, 1, true).await? == AttackResult::Failed {
                session.exit.get_or_insert(ExitCode::Blocked);
                break;
            }
        }

        self.retreat_handler(session).await
    }

    /// Hunts `count` mob fleets. With `stop_for_boss`, returns as soon as a
    /// boss is on the map.
    pub async fn auto_attack_fleet(
        &mut self,
        session: &mut CombatSession,
        count: u32,
        stop_for_boss: bool,
    ) -> Result<AttackResult, CombatError> {
        let mut defeated = 0;
        let mut rounds = 0;
        while defeated < count {
            rounds += 1;
            if rounds > MAX_ATTACK_ROUNDS || session.exit.is_some() {
                warn!(defeated, "giving up the mob hunt");
                return Ok(AttackResult::Failed);
            }
            let Some(sighting) = self.find_enemy_fleet(session, !stop_for_boss).await? else {
                return Ok(AttackResult::Failed);
            };
            if !sighting.bosses.is_empty() {
                return Ok(AttackResult::BossSighted);
            }
            match self.attack_mob(session, sighting.targets).await? {
                Some(index) => {
                    session.last_visited = Some(index);
                    defeated += 1;
                }
                None => {
                    session.last_visited = None;
                    if !self.auto_switch_fleet(session).await? {
                        self.swipe_map(session, 1).await?;
                    }
                }
            }
        }
        Ok(AttackResult::Defeated(defeated))
    }

    /// Looks for something to attack, panning the map and moving fleets out
    /// of the way as needed. `None` when the search is exhausted.
    pub async fn find_enemy_fleet(
        &mut self,
        session: &mut CombatSession,
        ignore_boss: bool,
    ) -> Result<Option<Sighting>, CombatError> {
        self.device.capture().await?;
        let current = self.fleet_number();
        let mut fleet_order = vec![current];
        for fleet in [self.config.mob_fleet_no, self.config.boss_fleet_no] {
            if !fleet_order.contains(&fleet) {
                fleet_order.push(fleet);
            }
        }

        if let Some(last) = session.last_visited.take() {
            if let Some(point) = self.reader.tile_to_screen(last) {
                let duration = Duration::from_millis(600);
                self.protected_swipe(session, point, ui::RECENTER_POINT, duration).await?;
            }
        }

        loop {
            for steps in 1..=3 {
                for _ in 0..4 {
                    let mut read = self.update_map().await?;
                    for _ in 0..UNREADABLE_MAP_SWIPES {
                        if read.is_some() {
                            break;
                        }
                        // No anchor tile in view
                        self.swipe_map(session, 1).await?;
                        read = self.update_map().await?;
                    }
                    let Some(read) = read else {
                        warn!("cannot read the sea map");
                        return Ok(None);
                    };

                    let bosses = read.map.grid.find(TileClass::Boss);
                    if !ignore_boss && !bosses.is_empty() {
                        session.boss_fleet_found = true;
                        return Ok(Some(Sighting { bosses, targets: read.targets }));
                    }
                    if !read.targets.is_empty() {
                        return Ok(Some(Sighting { bosses: Vec::new(), targets: read.targets }));
                    }
                    self.swipe_map(session, steps).await?;
                }
            }

            // Objectives can hide under our own fleets
            let mut moved = false;
            while !fleet_order.is_empty() {
                let fleet = fleet_order.remove(0);
                self.switch_fleet(session, fleet).await?;
                let mut free = match self.reader.merged_map(&mut self.device).await {
                    Ok(map) => self.free_tiles(&map),
                    Err(err) => {
                        recoverable(err)?;
                        continue;
                    }
                };
                if self.move_fleet_to_free_tile(session, &mut free).await? {
                    moved = true;
                    break;
                }
            }
            if !moved {
                warn!("nothing to attack anywhere on the map");
                return Ok(None);
            }
        }
    }

    /// Moves to each target in turn until one fight is won or one node is
    /// picked up.
    pub async fn attack_mob(
        &mut self,
        session: &mut CombatSession,
        targets: Vec<TileIndex>,
    ) -> Result<Option<TileIndex>, CombatError> {
        for index in targets {
            let Some(point) = self.reader.tile_to_screen(index) else {
                continue;
            };
            match self.move_to(session, point).await? {
                MoveOutcome::Retrieved => {
                    self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(4))).await?;
                    return Ok(Some(index));
                }
                MoveOutcome::NeedsBattle => {
                    if self.battle_handler(session, false).await? {
                        let (min, max) = (Duration::from_secs(1), Duration::from_secs(6));
                        let wait = StableWait::between(min, max).frames(5);
                        self.device.wait_till_stable(wait).await?;
                        return Ok(Some(index));
                    }
                }
                MoveOutcome::Unreachable | MoveOutcome::TimedOut => {
                    let wait = StableWait::between(Duration::from_secs(1), Duration::from_secs(6));
                    self.device.wait_till_stable(wait).await?;
                    if session.combats_done >= self.config.switch_fleet_after_combats
                        && self.fleet_number() == self.config.mob_fleet_no
                    {
                        return Ok(None);
                    }
                }
            }
            if session.exit.is_some() {
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// Reads the map and ranks what the selected fleet can go for. `None`
    /// when the map could not be read.
    pub async fn update_map(&mut self) -> Result<Option<MapRead>, CombatError> {
        let map = match self.reader.merged_map(&mut self.device).await {
            Ok(map) => map,
            Err(err) => {
                recoverable(err)?;
                return Ok(None);
            }
        };

        let mut targets = match map.grid.find(TileClass::Character).first() {
            Some(&start) => objective_indices(&map.grid, start),
            None => Vec::new(),
        };
        if targets.is_empty() {
            targets = map.grid.find(TileClass::Enemy);
            targets.extend(map.grid.find(TileClass::Supply));
            targets.shuffle(&mut self.rng);
        }
        node_filter::apply_all(&self.config.filter_exec_order, &mut targets, &map.nodes, &map.grid);
        debug!(targets = targets.len(), "map updated");
        Ok(Some(MapRead { map, targets }))
    }

    /// Free tiles of `map` in random order.
    pub(crate) fn free_tiles(&mut self, map: &ClassifiedMap) -> Vec<TileIndex> {
        let mut free = map.grid.find(TileClass::Free);
        free.shuffle(&mut self.rng);
        free
    }

    /// Moves the selected fleet to tiles popped off `free` until one move
    /// goes through.
    pub async fn move_fleet_to_free_tile(
        &mut self,
        session: &mut CombatSession,
        free: &mut Vec<TileIndex>,
    ) -> Result<bool, CombatError> {
        while let Some(index) = free.pop() {
            let Some(point) = self.reader.tile_to_screen(index) else {
                continue;
            };
            // A plain move never raises a screen, so it always runs out the clock
            if self.move_to(session, point).await? == MoveOutcome::TimedOut {
                return Ok(true);
            }
            self.device.wait_till_stable(StableWait::up_to(Duration::from_secs(2))).await?;
        }
        Ok(false)
    }
}

/// Lets map reading failures through as "no map" and escalates the rest.
pub(crate) fn recoverable(err: PerceptionError) -> Result<(), CombatError> {
    match err {
        PerceptionError::MapUnreadable { .. } | PerceptionError::GeometryUnstable { .. } => {
            debug!(error = %err, "map read failed");
            Ok(())
        }
        other => Err(other.into()),
    }
}
