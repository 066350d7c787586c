// THEORY:
// Objectives are ranked by how many moves it takes to reach them, not by
// screen distance: a fleet sails tile to tile and cannot cross obstacles.
// A breadth-first flood from the start cell over sailable tiles (free water
// and our own fleets) reports every objective it touches in the order it
// touches them, so the list is nearest first. Objectives are leaves: a fleet
// that enters one stops there, so the flood never continues through it.
//
// The grid is copied into a frame one cell wider on every side; the frame is
// Obstacle, so neighbour lookups never need a bounds check.

use super::grid_locator::TileIndex;
use super::tile_classifier::{TileClass, TileGrid};
use std::collections::VecDeque;

/// An objective found by the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Objective {
    pub index: TileIndex,
    pub class: TileClass,
    /// Moves from the start cell.
    pub distance: usize,
}

/// Objectives reachable from `start`, in discovery order. A start outside
/// the grid finds nothing.
pub fn find_objectives(grid: &TileGrid, start: TileIndex) -> Vec<Objective> {
    if !grid.contains(start) {
        return Vec::new();
    }
    let (rows, cols) = grid.shape();
    let width = cols + 2;
    let mut padded = vec![TileClass::Obstacle; (rows + 2) * width];
    for index in grid.indices() {
        padded[(index.row + 1) * width + index.col + 1] = grid.get(index);
    }

    let mut visited = vec![false; padded.len()];
    let mut queue = VecDeque::new();
    let mut found = Vec::new();

    let origin = (start.row + 1) * width + start.col + 1;
    visited[origin] = true;
    queue.push_back((origin, 0usize));

    while let Some((current, distance)) = queue.pop_front() {
        // Up, down, left, right.
        for next in [current - width, current + width, current - 1, current + 1] {
            if visited[next] {
                continue;
            }
            visited[next] = true;
            let class = padded[next];
            if class.is_objective() {
                let index = TileIndex::new(next / width - 1, next % width - 1);
                found.push(Objective { index, class, distance: distance + 1 });
            } else if class.is_traversable() {
                queue.push_back((next, distance + 1));
            }
        }
    }
    found
}

/// Just the indices of [`find_objectives`].
pub fn objective_indices(grid: &TileGrid, start: TileIndex) -> Vec<TileIndex> {
    find_objectives(grid, start).into_iter().map(|o| o.index).collect()
}
