// THEORY:
// Tile rings blink and the selection highlight sweeps across the map, so a
// single read of the screen is noisy. The voter classifies several captures
// of the same on-screen state and keeps, per cell, only what a majority of
// them agreed on.
//
// Key architectural principles:
// 1) Plain counters: one small array of per-class votes for every cell.
// 2) Majority means strictly more than half the frames; anything less falls
//    back to Obstacle.
// 3) Small icons are under-counted, so one sighting is enough for a
//    Character, and for a Supply unless another frame saw an enemy there.
// 4) Metadata is not averaged: the last frame that saw a cell wins, and only
//    if it still fits the merged class.

use super::grid_locator::TileIndex;
use super::tile_classifier::{ClassifiedMap, NodeInfoMap, TileClass, TileGrid};

const CLASSES: usize = TileClass::ALL.len();

/// Running per-cell vote counts across frames of one map state.
#[derive(Debug, Clone)]
pub struct VoteTally {
    rows: usize,
    cols: usize,
    votes: Vec<[u32; CLASSES]>,
    frames: u32,
    nodes: NodeInfoMap,
}

impl VoteTally {
    pub fn new((rows, cols): (usize, usize)) -> Self {
        Self {
            rows,
            cols,
            votes: vec![[0; CLASSES]; rows * cols],
            frames: 0,
            nodes: NodeInfoMap::new(),
        }
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Counts one frame. Frames of a different shape are refused.
    pub fn add(&mut self, map: &ClassifiedMap) -> bool {
        if map.grid.shape() != (self.rows, self.cols) {
            return false;
        }
        for (i, index) in map.grid.indices().enumerate() {
            self.votes[i][map.grid.get(index).index()] += 1;
        }
        self.nodes.extend(map.nodes.iter().map(|(k, v)| (*k, *v)));
        self.frames += 1;
        true
    }

    fn merged_class(&self, votes: &[u32; CLASSES]) -> TileClass {
        let n = self.frames;
        let mut class = TileClass::Obstacle;
        for candidate in TileClass::ALL {
            if 2 * votes[candidate.index()] > n {
                class = candidate;
            }
        }
        if votes[TileClass::Character.index()] > 0 {
            class = TileClass::Character;
        }
        let contested = votes[TileClass::Enemy.index()] > 0 || votes[TileClass::Boss.index()] > 0;
        if votes[TileClass::Supply.index()] > 0 && !contested {
            class = TileClass::Supply;
        }
        class
    }

    /// Merged map, or `None` if no frame was counted.
    pub fn finish(self) -> Option<ClassifiedMap> {
        if self.frames == 0 {
            return None;
        }
        let mut grid = TileGrid::new(self.rows, self.cols);
        for (i, votes) in self.votes.iter().enumerate() {
            let index = TileIndex::new(i / self.cols.max(1), i % self.cols.max(1));
            grid.set(index, self.merged_class(votes));
        }
        let nodes =
            self.nodes.into_iter().filter(|(index, info)| info.fits(grid.get(*index))).collect();
        Some(ClassifiedMap { grid, nodes })
    }
}

/// Merges already classified frames. `None` when the list is empty or the
/// frames disagree on shape.
pub fn merge_votes(frames: &[ClassifiedMap]) -> Option<ClassifiedMap> {
    let first = frames.first()?;
    let mut tally = VoteTally::new(first.grid.shape());
    for frame in frames {
        if !tally.add(frame) {
            return None;
        }
    }
    tally.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::tile_classifier::{EnemyKind, NodeInfo, SupplyKind};
    use TileClass::*;

    fn single(class: TileClass) -> ClassifiedMap {
        ClassifiedMap { grid: TileGrid::from_rows(&[vec![class]]), nodes: NodeInfoMap::new() }
    }

    fn merged(classes: &[TileClass]) -> TileClass {
        let frames: Vec<_> = classes.iter().map(|&c| single(c)).collect();
        merge_votes(&frames).unwrap().grid.get(TileIndex::new(0, 0))
    }

    #[test]
    fn two_of_three_wins() {
        assert_eq!(merged(&[Enemy, Enemy, Free]), Enemy);
        assert_eq!(merged(&[Free, Obstacle, Free]), Free);
    }

    #[test]
    fn no_majority_is_an_obstacle() {
        assert_eq!(merged(&[Enemy, Free, Supply]), Obstacle);
        assert_eq!(merged(&[Enemy, Free, Boss]), Obstacle);
    }

    #[test]
    fn a_single_sighting_of_a_small_icon_is_enough() {
        assert_eq!(merged(&[Free, Character, Free]), Character);
        assert_eq!(merged(&[Free, Free, Supply]), Supply);
        assert_eq!(merged(&[Obstacle, Supply, Obstacle]), Supply);
    }

    #[test]
    fn frames_of_another_shape_are_refused() {
        let wide = ClassifiedMap { grid: TileGrid::new(1, 2), nodes: NodeInfoMap::new() };
        assert!(merge_votes(&[single(Free), wide]).is_none());
        assert!(merge_votes(&[]).is_none());
    }

    #[test]
    fn metadata_follows_the_last_frame_and_the_merged_class() {
        let cell = TileIndex::new(0, 0);
        let other = TileIndex::new(0, 1);
        let frame = |first: TileClass, info: NodeInfo| {
            let mut map = ClassifiedMap {
                grid: TileGrid::from_rows(&[vec![first, Enemy]]),
                nodes: NodeInfoMap::new(),
            };
            map.nodes.insert(cell, info);
            map.nodes.insert(other, NodeInfo::Enemy(EnemyKind::Siren));
            map
        };
        let frames = [
            frame(Enemy, NodeInfo::Enemy(EnemyKind::Normal(1))),
            frame(Enemy, NodeInfo::Enemy(EnemyKind::Normal(3))),
            frame(Free, NodeInfo::Supply(SupplyKind::Ammo)),
        ];
        let map = merge_votes(&frames).unwrap();
        assert_eq!(map.grid.get(cell), Enemy);
        // Last frame thought it was ammo, which does not fit an Enemy cell.
        assert_eq!(map.nodes.get(&cell), None);
        assert_eq!(map.nodes.get(&other), Some(&NodeInfo::Enemy(EnemyKind::Siren)));

        let map = merge_votes(&frames[..2]).unwrap();
        assert_eq!(map.nodes.get(&cell), Some(&NodeInfo::Enemy(EnemyKind::Normal(3))));
    }
}
