// Scripted stand-ins for the device, the collaborators and the map reader.
//
// All three share one `FakeGame`: the set of assets currently on screen, the
// selected fleet, the sea map the reader hands out, and reactions that fire
// when a point or region is touched. Tests script a sortie by registering
// reactions and then read back the recorded actions.

use crate::combat::CombatModule;
use crate::config::CombatConfig;
use crate::core_modules::grid_locator::TileIndex;
use crate::core_modules::tile_classifier::{ClassifiedMap, TileClass, TileGrid};
use crate::device::{Collaborators, Device, POLL_INTERVAL, Point, Region, StableWait};
use crate::error::{CalibrationError, DeviceError, PerceptionError};
use crate::perception::MapReader;
use crate::presets::MapId;
use crate::ui::{assets, regions};
use image::RgbImage;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

/// Where the scripted reader puts tiles on screen.
pub fn tile_point(index: TileIndex) -> Point {
    Point::new(400 + 150 * index.col as i32, 300 + 120 * index.row as i32)
}

/// Builds a map from rows of class codes: `.` free, `#` obstacle, `C`
/// character, `E` enemy, `B` boss, `S` supply.
pub fn sea_map(rows: &[&str]) -> ClassifiedMap {
    let rows: Vec<Vec<TileClass>> = rows
        .iter()
        .map(|row| {
            row.chars()
                .map(|c| match c {
                    '.' => TileClass::Free,
                    'C' => TileClass::Character,
                    'E' => TileClass::Enemy,
                    'B' => TileClass::Boss,
                    'S' => TileClass::Supply,
                    _ => TileClass::Obstacle,
                })
                .collect()
        })
        .collect();
    ClassifiedMap { grid: TileGrid::from_rows(&rows), nodes: Default::default() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Touch(Point),
    TouchRegion(Region),
    Swipe(Point, Point),
}

type Reaction = Box<dyn FnMut(&mut FakeGame)>;

pub struct FakeGame {
    visible: HashSet<String>,
    placed: HashMap<String, Region>,
    pub fleet: u8,
    pub map: Option<ClassifiedMap>,
    pub map_reads: usize,
    pub actions: Vec<Action>,
    pub combat_done: u32,
    pub combat_attempted: u32,
    pub oil_ok: bool,
    pub retire_frees_space: bool,
    pub enhance_frees_space: bool,
    pub retirements: u32,
    pub enhancements: u32,
    /// Upcoming swipes that land on a fleet icon and select it.
    pub swipes_grabbing_fleet: u32,
    touch_reactions: Vec<(Point, Reaction)>,
    region_reactions: Vec<(Region, Reaction)>,
}

impl Default for FakeGame {
    fn default() -> Self {
        Self {
            visible: HashSet::new(),
            placed: HashMap::new(),
            fleet: 1,
            map: None,
            map_reads: 0,
            actions: Vec::new(),
            combat_done: 0,
            combat_attempted: 0,
            oil_ok: true,
            retire_frees_space: false,
            enhance_frees_space: false,
            retirements: 0,
            enhancements: 0,
            swipes_grabbing_fleet: 0,
            touch_reactions: Vec::new(),
            region_reactions: Vec::new(),
        }
    }
}

impl FakeGame {
    pub fn show(&mut self, asset: &str) {
        self.visible.insert(asset.to_string());
    }

    pub fn show_at(&mut self, asset: &str, region: Region) {
        self.placed.insert(asset.to_string(), region);
        self.show(asset);
    }

    pub fn hide(&mut self, asset: &str) {
        self.visible.remove(asset);
    }

    pub fn is_shown(&self, asset: &str) -> bool {
        self.visible.contains(asset)
    }

    pub fn on_touch(&mut self, point: Point, reaction: impl FnMut(&mut FakeGame) + 'static) {
        self.touch_reactions.push((point, Box::new(reaction)));
    }

    pub fn on_region(&mut self, region: Region, reaction: impl FnMut(&mut FakeGame) + 'static) {
        self.region_reactions.push((region, Box::new(reaction)));
    }

    pub fn swipes(&self) -> usize {
        self.actions.iter().filter(|a| matches!(a, Action::Swipe(..))).count()
    }

    pub fn region_touches(&self, region: Region) -> usize {
        self.actions.iter().filter(|a| **a == Action::TouchRegion(region)).count()
    }

    fn region_of(&self, asset: &str) -> Option<Region> {
        self.visible
            .contains(asset)
            .then(|| self.placed.get(asset).copied().unwrap_or(Region::new(900, 500, 60, 60)))
    }

    fn touched(&mut self, point: Point) {
        self.actions.push(Action::Touch(point));
        let mut reactions = std::mem::take(&mut self.touch_reactions);
        for (target, reaction) in reactions.iter_mut() {
            if *target == point {
                reaction(self);
            }
        }
        reactions.append(&mut self.touch_reactions);
        self.touch_reactions = reactions;
    }

    fn touched_region(&mut self, region: Region) {
        self.actions.push(Action::TouchRegion(region));
        if region == regions::BUTTON_SWITCH_FLEET {
            self.fleet = if self.fleet == 1 { 2 } else { 1 };
        }
        let mut reactions = std::mem::take(&mut self.region_reactions);
        for (target, reaction) in reactions.iter_mut() {
            if *target == region {
                reaction(self);
            }
        }
        reactions.append(&mut self.region_reactions);
        self.region_reactions = reactions;
    }
}

pub type SharedGame = Rc<RefCell<FakeGame>>;

pub struct FakeDevice {
    game: SharedGame,
}

impl Device for FakeDevice {
    async fn capture(&mut self) -> Result<RgbImage, DeviceError> {
        Ok(RgbImage::new(1, 1))
    }

    async fn touch(&mut self, point: Point) -> Result<(), DeviceError> {
        self.game.borrow_mut().touched(point);
        Ok(())
    }

    async fn touch_region(&mut self, region: Region) -> Result<(), DeviceError> {
        self.game.borrow_mut().touched_region(region);
        Ok(())
    }

    async fn swipe(
        &mut self,
        from: Point,
        to: Point,
        _duration: Duration,
    ) -> Result<(), DeviceError> {
        let mut game = self.game.borrow_mut();
        game.actions.push(Action::Swipe(from, to));
        if game.swipes_grabbing_fleet > 0 {
            game.swipes_grabbing_fleet -= 1;
            game.fleet = if game.fleet == 1 { 2 } else { 1 };
        }
        Ok(())
    }

    async fn wait_till_stable(&mut self, wait: StableWait) -> Result<(), DeviceError> {
        tokio::time::sleep(wait.min_time.max(POLL_INTERVAL)).await;
        Ok(())
    }

    fn find(&self, template: &str, _similarity: f32) -> Option<Region> {
        self.game.borrow().region_of(template)
    }

    fn find_in_region(&self, template: &str, region: Region, _similarity: f32) -> Option<Region> {
        let game = self.game.borrow();
        if template == assets::FLEET_1 && region == regions::FLEET_NO {
            return (game.fleet == 1).then_some(region);
        }
        game.region_of(template)
    }

    fn find_all(&self, template: &str, similarity: f32) -> Vec<Region> {
        self.find(template, similarity).into_iter().collect()
    }

    fn find_in_scaling_range(&self, template: &str, _lower_end: f32) -> Option<Region> {
        self.game.borrow().region_of(template)
    }
}

pub struct FakeCollaborators {
    game: SharedGame,
}

impl Collaborators for FakeCollaborators {
    async fn retire(&mut self, _forced: bool) -> bool {
        let mut game = self.game.borrow_mut();
        game.retirements += 1;
        game.retire_frees_space
    }

    async fn enhance(&mut self, _forced: bool) -> bool {
        let mut game = self.game.borrow_mut();
        game.enhancements += 1;
        game.enhance_frees_space
    }

    fn increment_combat_done(&mut self) {
        self.game.borrow_mut().combat_done += 1;
    }

    fn increment_combat_attempted(&mut self) {
        self.game.borrow_mut().combat_attempted += 1;
    }

    fn oil_ok(&self) -> bool {
        self.game.borrow().oil_ok
    }
}

/// Hands out whatever map the game currently holds.
pub struct ScriptedReader {
    game: SharedGame,
    calibrated: bool,
}

impl ScriptedReader {
    fn read(&mut self) -> Result<ClassifiedMap, PerceptionError> {
        if !self.calibrated {
            return Err(PerceptionError::NotCalibrated);
        }
        let mut game = self.game.borrow_mut();
        game.map_reads += 1;
        game.map.clone().ok_or_else(|| PerceptionError::unreadable("scripted map is empty"))
    }
}

impl MapReader for ScriptedReader {
    fn calibrate(&mut self, _map: &MapId) -> Result<(), CalibrationError> {
        self.calibrated = true;
        Ok(())
    }

    async fn merged_map<D: Device>(
        &mut self,
        _device: &mut D,
    ) -> Result<ClassifiedMap, PerceptionError> {
        self.read()
    }

    async fn single_map<D: Device>(
        &mut self,
        _device: &mut D,
    ) -> Result<ClassifiedMap, PerceptionError> {
        self.read()
    }

    fn tile_to_screen(&self, index: TileIndex) -> Option<Point> {
        Some(tile_point(index))
    }
}

pub type FakeModule = CombatModule<FakeDevice, FakeCollaborators, ScriptedReader>;

/// A calibrated module wired to a fresh fake game.
pub fn harness(config: CombatConfig) -> (FakeModule, SharedGame) {
    let game: SharedGame = Rc::new(RefCell::new(FakeGame::default()));
    let module = CombatModule::new(
        FakeDevice { game: game.clone() },
        FakeCollaborators { game: game.clone() },
        ScriptedReader { game: game.clone(), calibrated: true },
        config,
    )
    .expect("test config is valid")
    .with_seed(7);
    (module, game)
}

/// Wires the usual end-of-battle screens: tap to continue, then the result
/// confirmation, then back on the map.
pub fn script_battle_screens(game: &SharedGame) {
    let mut game = game.borrow_mut();
    game.on_region(regions::TAP_TO_CONTINUE, |g| {
        g.hide(assets::MENU_LOADING);
        g.hide(assets::MENU_TOUCH_TO_CONTINUE);
        g.show(assets::BUTTON_CONFIRM);
    });
    game.on_region(regions::COMBAT_END_CONFIRM, |g| g.hide(assets::BUTTON_CONFIRM));
}

/// Wires the retreat screens: retreat button, confirmation, main menu.
pub fn script_retreat_screens(game: &SharedGame) {
    let mut game = game.borrow_mut();
    game.on_region(regions::RETREAT_BUTTON, |g| {
        g.hide(assets::BUTTON_RETREAT);
        g.show(assets::MENU_BUTTON_CONFIRM);
    });
    game.on_region(regions::COMBAT_COM_CONFIRM, |g| {
        g.hide(assets::MENU_BUTTON_CONFIRM);
        g.show(assets::ATTACK);
    });
}

/// Touching `point` starts a fight.
pub fn enemy_at(game: &SharedGame, point: Point) {
    game.borrow_mut().on_touch(point, |g| {
        g.show(assets::MENU_LOADING);
        g.show(assets::MENU_TOUCH_TO_CONTINUE);
    });
}
