// Fixed screen layout of the game at 1920x1080: the tap regions the engine
// touches, the asset names it looks for, and the four map swipe gestures.

use crate::device::{Point, Region};
use std::time::Duration;

pub mod regions {
    use super::Region;

    pub const FLEET_LOCK: Region = Region::new(1790, 750, 130, 30);
    pub const OPEN_STRATEGY_MENU: Region = Region::new(1797, 617, 105, 90);
    pub const DISABLE_SUBS_HUNTING_RADIUS: Region = Region::new(1655, 615, 108, 108);
    pub const CLOSE_STRATEGY_MENU: Region = Region::new(1590, 615, 40, 105);
    pub const MENU_BUTTON_BATTLE: Region = Region::new(1517, 442, 209, 206);
    pub const MAP_SUMMARY_GO: Region = Region::new(1289, 743, 280, 79);
    pub const FLEET_MENU_GO: Region = Region::new(1485, 872, 270, 74);
    pub const COMBAT_AMBUSH_EVADE: Region = Region::new(1493, 682, 208, 56);
    pub const COMBAT_COM_CONFIRM: Region = Region::new(848, 740, 224, 56);
    pub const COMBAT_END_CONFIRM: Region = Region::new(1520, 963, 216, 58);
    pub const DISMISS_SURFACE_FLEET_SUMMARY: Region = Region::new(790, 950, 250, 65);
    pub const MENU_COMBAT_START: Region = Region::new(1578, 921, 270, 70);
    pub const TAP_TO_CONTINUE: Region = Region::new(661, 840, 598, 203);
    pub const CLOSE_INFO_DIALOG: Region = Region::new(1326, 274, 35, 35);
    pub const DISMISS_SHIP_DROP: Region = Region::new(1228, 103, 692, 735);
    pub const RETREAT_BUTTON: Region = Region::new(1130, 985, 243, 60);
    pub const NORMAL_MODE_BUTTON: Region = Region::new(88, 990, 80, 40);
    pub const MAP_NAV_RIGHT: Region = Region::new(1831, 547, 26, 26);
    pub const MAP_NAV_LEFT: Region = Region::new(65, 547, 26, 26);
    pub const EVENT_BUTTON: Region = Region::new(1770, 250, 75, 75);
    pub const LOCK_SHIP_BUTTON: Region = Region::new(1086, 739, 200, 55);
    pub const CLEAR_SECOND_FLEET: Region = Region::new(1690, 473, 40, 40);
    pub const BUTTON_SWITCH_FLEET: Region = Region::new(1430, 985, 240, 60);
    pub const MENU_NAV_BACK: Region = Region::new(54, 57, 67, 67);
    /// Badge showing which fleet is selected.
    pub const FLEET_NO: Region = Region::new(220, 110, 125, 45);
}

/// Asset names as the device's template library knows them.
pub mod assets {
    pub const BUTTON_GO: &str = "combat/button_go";
    pub const MENU_FLEET: &str = "combat/menu_fleet";
    pub const MENU_SELECT_FLEET: &str = "combat/menu_select_fleet";
    pub const BUTTON_RETREAT: &str = "combat/button_retreat";
    pub const ALERT_MORALE_LOW: &str = "combat/alert_morale_low";
    pub const MENU_LOADING: &str = "combat/menu_loading";
    pub const COMBAT_PAUSE: &str = "combat/combat_pause";
    pub const MENU_TOUCH_TO_CONTINUE: &str = "combat/menu_touch2continue";
    pub const ALERT_LOCK: &str = "combat/alert_lock";
    pub const BUTTON_CONFIRM: &str = "combat/button_confirm";
    pub const COMMANDER: &str = "combat/commander";
    pub const ALERT_UNABLE_BATTLE: &str = "combat/alert_unable_battle";
    pub const ALERT_FLEET_CANNOT_BE_FORMED: &str = "combat/alert_fleet_cannot_be_formed";
    pub const DEFEAT_CLOSE_BUTTON: &str = "combat/defeat_close_button";
    pub const ALERT_UNABLE_REACH: &str = "combat/alert_unable_reach";
    pub const BUTTON_EVADE: &str = "combat/button_evade";
    pub const ALERT_FAILED_EVADE: &str = "combat/alert_failed_evade";
    pub const ALERT_AMMO_SUPPLIES: &str = "combat/alert_ammo_supplies";
    pub const MENU_EMERGENCY: &str = "combat/menu_emergency";
    pub const STRATEGY: &str = "combat/strategy";
    pub const MENU_FORMATION: &str = "combat/menu_formation";
    pub const AUTO_COMBAT_OFF: &str = "combat/auto_combat_off";
    pub const FLEET_LOCK: &str = "combat/fleet_lock";
    pub const FLEET_1: &str = "combat/fleet_1";
    pub const FLEET_BOSS: &str = "enemy/fleet_boss";

    pub const MENU_BUTTON_BATTLE: &str = "menu/button_battle";
    pub const BUTTON_SORT: &str = "menu/button_sort";
    pub const MENU_BUTTON_CONFIRM: &str = "menu/button_confirm";
    pub const ITEM_FOUND: &str = "menu/item_found";
    pub const ALERT_INFO: &str = "menu/alert_info";
    pub const ALERT_CLOSE: &str = "menu/alert_close";
    pub const ATTACK: &str = "menu/attack";
    pub const BUTTON_NORMAL_MODE: &str = "menu/button_normal_mode";
    /// Ship drop screens, by rarity.
    pub const DROPS: [&str; 4] =
        ["menu/drop_elite", "menu/drop_rare", "menu/drop_ssr", "menu/drop_common"];

    pub fn map_button(map: &str) -> String {
        format!("maps/map_{map}")
    }
}

/// One drag across the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Swipe {
    pub from: Point,
    pub to: Point,
    pub duration: Duration,
}

impl Swipe {
    /// A 600 ms drag, slow enough that the map does not fling.
    pub const fn pan(from: Point, to: Point) -> Self {
        Self { from, to, duration: Duration::from_millis(600) }
    }
}

/// Map pans in the order they are cycled through: down, left, up, right.
pub const SWIPE_GESTURES: [Swipe; 4] = [
    Swipe::pan(Point::new(960, 240), Point::new(960, 940)),
    Swipe::pan(Point::new(1560, 540), Point::new(260, 540)),
    Swipe::pan(Point::new(960, 940), Point::new(960, 240)),
    Swipe::pan(Point::new(260, 540), Point::new(1560, 540)),
];

/// Where the last visited tile is dragged to before searching again.
pub const RECENTER_POINT: Point = Point::new(960, 600);
/// Where a found boss is dragged to before reading the map around it.
pub const BOSS_CENTER_POINT: Point = Point::new(960, 640);

/// Vertical band of the fleet selection list holding the second fleet slot.
pub const SECOND_FLEET_SLOT_Y: std::ops::Range<i32> = 415..584;
