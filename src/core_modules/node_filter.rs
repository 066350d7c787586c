// THEORY:
// The search hands back objectives nearest first. Distance is not always
// what the player wants: a supply node or a siren may be worth a longer
// trip, and some runs only care about enemy fleets. Filters are small passes
// over the ranked list that encode those preferences.
//
// Key architectural principles:
// 1) Each pass is stable. Objectives it does not touch keep their relative
//    order, so the distance ranking survives underneath.
// 2) Passes compose in the order the run configuration lists them; the last
//    promotion wins the front of the list.
// 3) Filters only read the grid and node metadata, never the screen.

use super::grid_locator::TileIndex;
use super::tile_classifier::{NodeInfo, NodeInfoMap, TileClass, TileGrid};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeFilter {
    /// Supply nodes move to the front.
    #[serde(alias = "supply_first_filter")]
    SupplyFirst,
    /// Siren fleets move to the front.
    #[serde(alias = "siren_first_filter")]
    SirenFirst,
    /// Anything that is not an enemy fleet is dropped.
    #[serde(alias = "enemy_only_filter")]
    EnemyOnly,
}

impl NodeFilter {
    pub fn apply(self, targets: &mut Vec<TileIndex>, nodes: &NodeInfoMap, grid: &TileGrid) {
        match self {
            NodeFilter::SupplyFirst => promote(targets, |i| {
                grid.get(i) == TileClass::Supply
                    || matches!(nodes.get(&i), Some(NodeInfo::Supply(_)))
            }),
            NodeFilter::SirenFirst => {
                promote(targets, |i| nodes.get(&i).is_some_and(NodeInfo::is_siren))
            }
            NodeFilter::EnemyOnly => {
                targets.retain(|&i| matches!(grid.get(i), TileClass::Enemy | TileClass::Boss))
            }
        }
    }
}

/// Applies `filters` in order.
pub fn apply_all(
    filters: &[NodeFilter],
    targets: &mut Vec<TileIndex>,
    nodes: &NodeInfoMap,
    grid: &TileGrid,
) {
    for filter in filters {
        filter.apply(targets, nodes, grid);
    }
}

fn promote(targets: &mut Vec<TileIndex>, first: impl Fn(TileIndex) -> bool) {
    let (mut front, back): (Vec<TileIndex>, Vec<TileIndex>) =
        targets.drain(..).partition(|&i| first(i));
    front.extend(back);
    *targets = front;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::tile_classifier::{EnemyKind, SupplyKind};

    fn setup() -> (Vec<TileIndex>, NodeInfoMap, TileGrid) {
        let grid = TileGrid::from_rows(&[vec![
            TileClass::Enemy,
            TileClass::Supply,
            TileClass::Enemy,
            TileClass::Boss,
        ]]);
        let mut nodes = NodeInfoMap::new();
        nodes.insert(TileIndex::new(0, 0), NodeInfo::Enemy(EnemyKind::Normal(1)));
        nodes.insert(TileIndex::new(0, 1), NodeInfo::Supply(SupplyKind::Ammo));
        nodes.insert(TileIndex::new(0, 2), NodeInfo::Enemy(EnemyKind::Siren));
        let targets = (0..4).map(|c| TileIndex::new(0, c)).collect();
        (targets, nodes, grid)
    }

    fn cols(targets: &[TileIndex]) -> Vec<usize> {
        targets.iter().map(|t| t.col).collect()
    }

    #[test]
    fn siren_then_supply_first() {
        let (mut targets, nodes, grid) = setup();
        apply_all(&[NodeFilter::SirenFirst, NodeFilter::SupplyFirst], &mut targets, &nodes, &grid);
        assert_eq!(cols(&targets), vec![1, 2, 0, 3]);
    }

    #[test]
    fn enemy_only_keeps_boss_and_fleets() {
        let (mut targets, nodes, grid) = setup();
        NodeFilter::EnemyOnly.apply(&mut targets, &nodes, &grid);
        assert_eq!(cols(&targets), vec![0, 2, 3]);
    }

    #[test]
    fn config_names_parse() {
        let filters: Vec<NodeFilter> =
            serde_json::from_str(r#"["siren_first", "enemy_only_filter"]"#).unwrap();
        assert_eq!(filters, vec![NodeFilter::SirenFirst, NodeFilter::EnemyOnly]);
    }
}
