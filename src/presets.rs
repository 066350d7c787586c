// Static per-map data: map identifiers, the calibration point pairs used to
// build the perspective model, and how many mob fleets a map spawns before
// its boss shows up.

use crate::core_modules::grid_locator::{TILE_HEIGHT, TILE_WIDTH};
use crate::core_modules::perspective::Coord;
use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Stage identifier: `<world>-<stage>` for the main campaign, `E-<letter><stage>`
/// for event maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapId {
    Campaign { world: u32, stage: u32 },
    Event { letter: char, stage: u32 },
}

/// Event letters in the order the event screen lists them. The first three
/// are played in normal mode, the rest in hard mode.
pub const EVENT_LETTERS: [char; 5] = ['A', 'B', 'S', 'C', 'D'];

impl MapId {
    pub fn is_event(&self) -> bool {
        matches!(self, MapId::Event { .. })
    }

    /// Whether the stage is played in normal (not hard) mode.
    pub fn is_normal_mode(&self) -> bool {
        match self {
            MapId::Campaign { .. } => true,
            MapId::Event { letter, .. } => {
                EVENT_LETTERS.iter().position(|l| l == letter).is_some_and(|i| i < 3)
            }
        }
    }

    /// Whether the second fleet is dropped from fleet selection when the
    /// boss fleet option is off.
    pub fn drops_second_fleet(&self) -> bool {
        match self {
            MapId::Campaign { .. } => true,
            MapId::Event { letter, .. } => *letter == 'A',
        }
    }

    /// Campaign world number; event maps have none.
    pub fn world(&self) -> Option<u32> {
        match self {
            MapId::Campaign { world, .. } => Some(*world),
            MapId::Event { .. } => None,
        }
    }
}

impl FromStr for MapId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ConfigError::MapId(s.to_string());
        let (head, tail) = s.split_once('-').ok_or_else(bad)?;
        if head == "E" {
            let mut chars = tail.chars();
            let letter = chars.next().filter(|c| EVENT_LETTERS.contains(c)).ok_or_else(bad)?;
            let stage = chars.as_str().parse().map_err(|_| bad())?;
            return Ok(MapId::Event { letter, stage });
        }
        let world = head.parse().map_err(|_| bad())?;
        let stage = tail.parse().map_err(|_| bad())?;
        if world == 0 || stage == 0 {
            return Err(bad());
        }
        Ok(MapId::Campaign { world, stage })
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapId::Campaign { world, stage } => write!(f, "{world}-{stage}"),
            MapId::Event { letter, stage } => write!(f, "E-{letter}{stage}"),
        }
    }
}

/// Four screen points of one tile and where they land on the rectified
/// canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub source: [Coord; 4],
    pub destination: [Coord; 4],
}

pub const DEFAULT_CALIBRATION: Calibration = Calibration {
    source: [(430.0, 790.0), (630.0, 790.0), (616.0, 950.0), (407.0, 950.0)],
    destination: [(430.0, 790.0), (630.0, 790.0), (630.0, 990.0), (430.0, 990.0)],
};

/// Event maps are drawn with a steeper camera; their presets map the
/// measured quad onto a 2x2 block of tiles anchored at its first corner.
fn event_calibration(source: [Coord; 4]) -> Calibration {
    let (x, y) = source[0];
    let w = 2.0 * TILE_WIDTH as f64;
    let h = 2.0 * TILE_HEIGHT as f64;
    Calibration { source, destination: [(x, y), (x + w, y), (x, y + h), (x + w, y + h)] }
}

/// Calibration preset for a map.
pub fn calibration_for(map: &MapId) -> Calibration {
    match map {
        MapId::Event { stage: 3, .. } => {
            event_calibration([(1005.0, 566.0), (1327.0, 566.0), (1009.0, 837.0), (1350.0, 837.0)])
        }
        MapId::Event { stage: 2, .. } => {
            event_calibration([(485.0, 529.0), (870.0, 529.0), (439.0, 827.0), (861.0, 827.0)])
        }
        MapId::Event { stage: 1, .. } => {
            event_calibration([(347.0, 578.0), (777.0, 578.0), (273.0, 923.0), (755.0, 923.0)])
        }
        _ => DEFAULT_CALIBRATION,
    }
}

/// Mob kills a campaign map needs before its boss appears.
pub fn kills_before_boss(map: &MapId) -> Option<u32> {
    let MapId::Campaign { world, stage } = *map else {
        return None;
    };
    if !(1..=4).contains(&stage) {
        return None;
    }
    let kills = match (world, stage) {
        (1, 1) => 1,
        (1, 2..=3) => 2,
        (1, 4) => 3,
        (2, 1) => 2,
        (2, _) | (3, _) => 3,
        (4, 4) => 4,
        (4, _) => 3,
        (5, _) => 4,
        (6, 4) => 5,
        (6, _) => 4,
        (7, _) => 5,
        (8, _) => 4,
        (9, _) => 5,
        (13, 4) => 7,
        (10..=13, _) => 6,
        _ => return None,
    };
    Some(kills)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::perspective::PerspectiveModel;

    #[test]
    fn map_ids_parse_and_print() {
        for raw in ["3-4", "13-1", "E-D3", "E-A1", "E-S2"] {
            let id: MapId = raw.parse().unwrap();
            assert_eq!(id.to_string(), raw);
        }
        for bad in ["3", "x-1", "E-Z1", "E-D", "0-1", ""] {
            assert!(bad.parse::<MapId>().is_err(), "{bad}");
        }
    }

    #[test]
    fn event_modes() {
        let normal: MapId = "E-B2".parse().unwrap();
        let hard: MapId = "E-C2".parse().unwrap();
        assert!(normal.is_normal_mode());
        assert!(!hard.is_normal_mode());
        assert!(!normal.drops_second_fleet());
        assert!("E-A1".parse::<MapId>().unwrap().drops_second_fleet());
    }

    #[test]
    fn kill_table_spot_checks() {
        let kills = |s: &str| kills_before_boss(&s.parse().unwrap());
        assert_eq!(kills("1-1"), Some(1));
        assert_eq!(kills("2-1"), Some(2));
        assert_eq!(kills("4-4"), Some(4));
        assert_eq!(kills("6-4"), Some(5));
        assert_eq!(kills("13-4"), Some(7));
        assert_eq!(kills("12-2"), Some(6));
        assert_eq!(kills("14-1"), None);
        assert_eq!(kills("E-D3"), None);
    }

    #[test]
    fn every_preset_calibrates() {
        for raw in ["1-1", "E-A1", "E-B2", "E-D3", "E-S4"] {
            let c = calibration_for(&raw.parse().unwrap());
            assert!(PerspectiveModel::from_points(&c.source, &c.destination).is_ok(), "{raw}");
        }
    }
}
