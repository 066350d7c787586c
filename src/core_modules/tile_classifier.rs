// THEORY:
// Classification turns one rectified frame into a grid of coarse tile
// classes plus fine metadata for the cells that need it. It stacks three
// kinds of evidence, cheapest first, each later one allowed to overwrite the
// earlier ones for the same cell:
//
// 1) Free test on the edge map: the centre mark of an empty sea tile, or
//    failing that, the corner hooks in at least two of the four corners
//    (tiles half hidden under an icon still show their corners).
// 2) Boundary colour on the rectified colour frame: enemy tiles are ringed
//    in red, supply tiles in yellow. Only a thin band along the tile border
//    is inspected so icons in the middle never count.
// 3) Unit icons on the raw capture: icons are drawn upright, not warped, so
//    they are matched on the raw screen in a window hung off the
//    un-warped tile corner, with the icon scaled to the row's apparent tile
//    width. Order: supplies, enemies, character, boss.
//
// Anything not positively identified stays Obstacle.

use super::grid_locator::{GridGeometry, TileIndex, edge_map};
use super::image_ops::{self, crop_clipped};
use super::perspective::{Coord, PerspectiveModel, RectifiedFrame};
use super::pixel::pixel::{HsvRange, Pixel};
use super::template::{DetectionTemplate, SearchArea, TemplateSet, best_match, count_matches};
use image::{GrayImage, RgbImage, imageops};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace};

pub const BOUNDARY_BAND: f64 = 0.1;
pub const BOUNDARY_RED: HsvRange = HsvRange::new([160, 70, 240], [180, 255, 255]);
pub const BOUNDARY_YELLOW: HsvRange = HsvRange::new([25, 100, 100], [35, 255, 255]);
pub const BOUNDARY_COUNT_THRESHOLD: usize = 1000;
/// Cells cropped below this fraction of a tile skip the boundary test.
pub const MIN_BOUNDARY_CROP: f64 = 0.8;
pub const CORNER_FRACTION: f64 = 0.2;
const CORNER_CLOSING_KERNEL: u32 = 5;
const FREE_MATCH_THRESHOLD: f32 = 0.8;

/// Coarse state of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum TileClass {
    #[default]
    Obstacle,
    Free,
    Character,
    Supply,
    Enemy,
    Boss,
}

impl TileClass {
    pub const ALL: [TileClass; 6] = [
        TileClass::Obstacle,
        TileClass::Free,
        TileClass::Character,
        TileClass::Supply,
        TileClass::Enemy,
        TileClass::Boss,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Cells a fleet can sail through.
    pub fn is_traversable(self) -> bool {
        matches!(self, TileClass::Free | TileClass::Character)
    }

    /// Cells worth sailing to; reached but never sailed through.
    pub fn is_objective(self) -> bool {
        matches!(self, TileClass::Enemy | TileClass::Boss | TileClass::Supply)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnemyKind {
    Siren,
    /// Normal fleet, level 1 to 3.
    Normal(u8),
    Boss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyKind {
    Ammo,
    Mystery,
}

/// Fine metadata for Enemy, Boss and Supply cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeInfo {
    Enemy(EnemyKind),
    Supply(SupplyKind),
}

impl NodeInfo {
    pub fn is_siren(&self) -> bool {
        matches!(self, NodeInfo::Enemy(EnemyKind::Siren))
    }

    pub fn enemy_level(&self) -> Option<u8> {
        match self {
            NodeInfo::Enemy(EnemyKind::Normal(level)) => Some(*level),
            _ => None,
        }
    }

    /// Whether this metadata may sit on a cell of `class`.
    pub fn fits(&self, class: TileClass) -> bool {
        match self {
            NodeInfo::Enemy(EnemyKind::Boss) => class == TileClass::Boss,
            NodeInfo::Enemy(_) => class == TileClass::Enemy,
            NodeInfo::Supply(_) => class == TileClass::Supply,
        }
    }
}

pub type NodeInfoMap = BTreeMap<TileIndex, NodeInfo>;

/// Row-major grid of tile classes. Reads outside the grid are Obstacle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TileGrid {
    rows: usize,
    cols: usize,
    cells: Vec<TileClass>,
}

impl TileGrid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols, cells: vec![TileClass::Obstacle; rows * cols] }
    }

    /// Builds a grid from rows of classes. Short rows are padded with
    /// Obstacle.
    pub fn from_rows(rows: &[Vec<TileClass>]) -> Self {
        let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut grid = Self::new(rows.len(), cols);
        for (r, row) in rows.iter().enumerate() {
            for (c, &class) in row.iter().enumerate() {
                grid.set(TileIndex::new(r, c), class);
            }
        }
        grid
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn contains(&self, index: TileIndex) -> bool {
        index.row < self.rows && index.col < self.cols
    }

    pub fn get(&self, index: TileIndex) -> TileClass {
        if self.contains(index) {
            self.cells[index.row * self.cols + index.col]
        } else {
            TileClass::Obstacle
        }
    }

    pub fn set(&mut self, index: TileIndex, class: TileClass) {
        if self.contains(index) {
            self.cells[index.row * self.cols + index.col] = class;
        }
    }

    pub fn indices(&self) -> impl Iterator<Item = TileIndex> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| TileIndex::new(row, col)))
    }

    /// Every cell of `class`, row-major.
    pub fn find(&self, class: TileClass) -> Vec<TileIndex> {
        self.indices().filter(|&i| self.get(i) == class).collect()
    }

    pub fn count(&self, class: TileClass) -> usize {
        self.cells.iter().filter(|&&c| c == class).count()
    }
}

impl fmt::Display for TileGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.rows {
            let line: Vec<String> = (0..self.cols)
                .map(|col| self.get(TileIndex::new(row, col)).index().to_string())
                .collect();
            writeln!(f, "[{}]", line.join(" "))?;
        }
        Ok(())
    }
}

/// Classes plus metadata for one read of the map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassifiedMap {
    pub grid: TileGrid,
    pub nodes: NodeInfoMap,
}

impl ClassifiedMap {
    /// Sets a cell's class and keeps its metadata consistent with it.
    pub fn mark(&mut self, index: TileIndex, class: TileClass, info: Option<NodeInfo>) {
        self.grid.set(index, class);
        match info {
            Some(info) => {
                self.nodes.insert(index, info);
            }
            None => {
                if self.nodes.get(&index).is_some_and(|n| !n.fits(class)) {
                    self.nodes.remove(&index);
                }
            }
        }
    }
}

/// Everything one classification pass reads.
pub struct ClassifierInput<'a> {
    pub model: &'a PerspectiveModel,
    pub geometry: &'a GridGeometry,
    pub frame: &'a RectifiedFrame,
    /// The raw capture the frame was rectified from.
    pub screen: &'a RgbImage,
}

/// Per-cell classification against a fixed template set.
#[derive(Debug, Clone, Copy)]
pub struct TileClassifier<'t> {
    templates: &'t TemplateSet,
}

impl<'t> TileClassifier<'t> {
    pub fn new(templates: &'t TemplateSet) -> Self {
        Self { templates }
    }

    pub fn classify(&self, input: &ClassifierInput<'_>) -> opencv::Result<ClassifiedMap> {
        let geometry = input.geometry;
        let mut map = ClassifiedMap {
            grid: TileGrid::new(geometry.rows, geometry.cols),
            nodes: NodeInfoMap::new(),
        };

        let edges = edge_map(&input.frame.image)?;
        let corner_template = self.scaled_corner_template();
        for index in geometry.indices() {
            if self.is_free(&edges, geometry, index, &corner_template)? {
                map.mark(index, TileClass::Free, None);
            }
            if let Some((class, info)) = boundary_class(&input.frame.image, geometry, index) {
                map.mark(index, class, Some(info));
            }
        }

        self.match_units(input, &mut map)?;
        debug!("read map:\n{}", map.grid);
        Ok(map)
    }

    fn scaled_corner_template(&self) -> GrayImage {
        let t = &self.templates.free_corner;
        imageops::resize(t, t.width() * 2, t.height() * 2, imageops::FilterType::Triangle)
    }

    fn is_free(
        &self,
        edges: &GrayImage,
        geometry: &GridGeometry,
        index: TileIndex,
        corner_template: &GrayImage,
    ) -> opencv::Result<bool> {
        let (x, y) = geometry.tile_origin(index);
        let (tw, th) = (geometry.tile_width as i64, geometry.tile_height as i64);
        let Some(crop) = crop_clipped(edges, x as i64, y as i64, tw, th) else {
            return Ok(false);
        };

        let center = &self.templates.free_center;
        if best_match(&crop, center)?.is_some_and(|m| m.score > FREE_MATCH_THRESHOLD) {
            return Ok(true);
        }

        let corner_w = (CORNER_FRACTION * geometry.tile_width as f64) as u32;
        let corner_h = (CORNER_FRACTION * geometry.tile_height as f64) as u32;
        let lu = &self.templates.free_corner;
        if corner_w < lu.width() || corner_h < lu.height() {
            return Ok(false);
        }
        if crop.width() < corner_w || crop.height() < corner_h {
            return Ok(false);
        }

        let (cw, ch) = crop.dimensions();
        // Every corner is flipped so its hook faces the same way as the
        // top-left template.
        let corners = [
            (0, 0, false, false),
            (cw - corner_w, 0, true, false),
            (0, ch - corner_h, false, true),
            (cw - corner_w, ch - corner_h, true, true),
        ];
        let mut hits = 0;
        for (cx, cy, flip_h, flip_v) in corners {
            let mut corner = imageops::crop_imm(&crop, cx, cy, corner_w, corner_h).to_image();
            if flip_h {
                corner = imageops::flip_horizontal(&corner);
            }
            if flip_v {
                corner = imageops::flip_vertical(&corner);
            }
            let (w2, h2) = (corner_w * 2, corner_h * 2);
            let corner = imageops::resize(&corner, w2, h2, imageops::FilterType::Triangle);
            let corner = image_ops::close(&corner, CORNER_CLOSING_KERNEL)?;
            if count_matches(&corner, corner_template, FREE_MATCH_THRESHOLD)? > 0 {
                hits += 1;
                if hits > 1 {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn match_units(
        &self,
        input: &ClassifierInput<'_>,
        map: &mut ClassifiedMap,
    ) -> opencv::Result<()> {
        let geometry = input.geometry;
        if geometry.cols < 2 {
            return Ok(());
        }
        let t = self.templates;
        let units: [(&DetectionTemplate, TileClass, Option<NodeInfo>); 7] = [
            (&t.ammo, TileClass::Supply, Some(NodeInfo::Supply(SupplyKind::Ammo))),
            (&t.mystery, TileClass::Supply, Some(NodeInfo::Supply(SupplyKind::Mystery))),
            (&t.enemies[0], TileClass::Enemy, Some(NodeInfo::Enemy(EnemyKind::Normal(1)))),
            (&t.enemies[1], TileClass::Enemy, Some(NodeInfo::Enemy(EnemyKind::Normal(2)))),
            (&t.enemies[2], TileClass::Enemy, Some(NodeInfo::Enemy(EnemyKind::Normal(3)))),
            (&t.character, TileClass::Character, None),
            (&t.boss, TileClass::Boss, Some(NodeInfo::Enemy(EnemyKind::Boss))),
        ];

        for row in 0..geometry.rows {
            let Some(tile_width) = apparent_tile_width(input.model, geometry, row) else {
                continue;
            };
            for (template, class, info) in &units {
                let scaled = template.scaled(template.scale_for(tile_width));
                for col in 0..geometry.cols {
                    let index = TileIndex::new(row, col);
                    let window = search_window(input.model, geometry, index, template, tile_width);
                    let Some(window) = window else {
                        continue;
                    };
                    let Some(score) = template.score_in(&scaled, input.screen, window)? else {
                        continue;
                    };
                    if score > template.threshold {
                        trace!(%index, ?class, score, "unit match");
                        map.mark(index, *class, *info);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Distance on the raw capture between the centres of a row's first two
/// tiles.
fn apparent_tile_width(
    model: &PerspectiveModel,
    geometry: &GridGeometry,
    row: usize,
) -> Option<f64> {
    let p1 = model.inverse(geometry.index_to_coord(TileIndex::new(row, 0)))?;
    let p2 = model.inverse(geometry.index_to_coord(TileIndex::new(row, 1)))?;
    let width = ((p1.0 - p2.0).powi(2) + (p1.1 - p2.1).powi(2)).sqrt();
    (width > 0.0).then_some(width)
}

/// Raw-capture window `(x, y, w, h)` to search for `template` on `index`.
fn search_window(
    model: &PerspectiveModel,
    geometry: &GridGeometry,
    index: TileIndex,
    template: &DetectionTemplate,
    tile_width: f64,
) -> Option<(i64, i64, i64, i64)> {
    let origin = geometry.tile_origin(index);
    match template.area {
        SearchArea::Square { side, offset_x, offset_y } => {
            let scale = template.scale_for(tile_width) * template.scale_base;
            let (x, y) = model.inverse(origin)?;
            let side = (side * scale) as i64;
            let (dx, dy) = ((offset_x * scale) as i64, (offset_y * scale) as i64);
            Some((x as i64 + dx, y as i64 + dy, side, side))
        }
        SearchArea::TileBounds => {
            let (tw, th) = (geometry.tile_width as f64, geometry.tile_height as f64);
            let corners: [Coord; 4] = [
                origin,
                (origin.0 + tw, origin.1),
                (origin.0 + tw, origin.1 + th),
                (origin.0, origin.1 + th),
            ];
            let mut min = (f64::INFINITY, f64::INFINITY);
            let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
            for corner in corners {
                let (x, y) = model.inverse(corner)?;
                min = (min.0.min(x), min.1.min(y));
                max = (max.0.max(x), max.1.max(y));
            }
            let (x, y) = (min.0.floor() as i64, min.1.floor() as i64);
            Some((x, y, max.0.ceil() as i64 - x, max.1.ceil() as i64 - y))
        }
    }
}

/// Red or yellow ring along the tile border.
fn boundary_class(
    frame: &RgbImage,
    geometry: &GridGeometry,
    index: TileIndex,
) -> Option<(TileClass, NodeInfo)> {
    let (x, y) = geometry.tile_origin(index);
    let (tw, th) = (geometry.tile_width, geometry.tile_height);
    let crop = crop_clipped(frame, x as i64, y as i64, tw as i64, th as i64)?;
    let too_narrow = (crop.width() as f64) < tw as f64 * MIN_BOUNDARY_CROP;
    if too_narrow || (crop.height() as f64) < th as f64 * MIN_BOUNDARY_CROP {
        return None;
    }

    let band_x = (tw as f64 * BOUNDARY_BAND) as u32;
    let band_y = (th as f64 * BOUNDARY_BAND) as u32;
    let (cw, ch) = crop.dimensions();
    let (mut red, mut yellow) = (0usize, 0usize);
    for (px, py, rgb) in crop.enumerate_pixels() {
        let in_band = px < band_x
            || px >= cw.saturating_sub(band_x)
            || py < band_y
            || py >= ch.saturating_sub(band_y);
        if !in_band {
            continue;
        }
        let hsv = Pixel::from(rgb).hsv();
        if BOUNDARY_RED.contains(hsv) {
            red += 1;
        } else if BOUNDARY_YELLOW.contains(hsv) {
            yellow += 1;
        }
    }

    if red > BOUNDARY_COUNT_THRESHOLD {
        Some((TileClass::Enemy, NodeInfo::Enemy(EnemyKind::Siren)))
    } else if yellow > BOUNDARY_COUNT_THRESHOLD {
        Some((TileClass::Supply, NodeInfo::Supply(SupplyKind::Mystery)))
    } else {
        None
    }
}
