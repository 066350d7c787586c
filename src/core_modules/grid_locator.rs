// THEORY:
// On the rectified canvas every tile is the same fixed square, so the whole
// grid is known once a single tile has been pinned down: the anchor is that
// tile's top-left corner folded back into the first tile period, and the
// row/column counts follow from the canvas size.
//
// Key architectural principles:
// 1) Fast path first. A free tile carries a distinctive centre mark; if the
//    mark's edge template is found, the anchor is a fixed offset away.
// 2) Lattice fallback. Otherwise close the edge map with a growing kernel
//    until tile-sized, roughly square regions appear, then keep the one that
//    agrees best with all the others about where the lattice lines are.
// 3) No geometry is better than a wrong one. An exhausted kernel sweep
//    reports nothing; callers swipe and try again. Vision backend failures
//    are errors, not "no grid".

use super::image_ops::{self, BoundingBox};
use super::perspective::{Coord, RectifiedFrame};
use super::template::best_match;
use image::{GrayImage, RgbImage};
use tracing::{debug, trace};

pub const TILE_WIDTH: u32 = 209;
pub const TILE_HEIGHT: u32 = 209;

pub const CANNY_LOW: f64 = 50.0;
pub const CANNY_HIGH: f64 = 100.0;
pub const CLOSING_KERNEL_MIN: u32 = 5;
pub const CLOSING_KERNEL_MAX: u32 = 25;
pub const CLOSING_KERNEL_STEP: u32 = 5;
pub const FREE_TILE_MATCH_THRESHOLD: f32 = 0.8;
/// Free-centre template position relative to its tile's top-left corner.
pub const FREE_TILE_OFFSET: (i64, i64) = (-70, -70);

const AREA_TOLERANCE: f64 = 0.2;
const ASPECT_TOLERANCE: f64 = 0.1;

/// Grid cell address, `row` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIndex {
    pub row: usize,
    pub col: usize,
}

impl TileIndex {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for TileIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Tile layout on the rectified canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridGeometry {
    /// Top-left corner of tile (0, 0).
    pub anchor_x: u32,
    pub anchor_y: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub rows: usize,
    pub cols: usize,
}

impl GridGeometry {
    /// Geometry for a lattice point `(x, y)` on a canvas of the given size.
    pub fn from_lattice_point(x: i64, y: i64, (canvas_width, canvas_height): (u32, u32)) -> Self {
        let (tw, th) = (TILE_WIDTH as i64, TILE_HEIGHT as i64);
        let anchor_x = x.rem_euclid(tw);
        let anchor_y = y.rem_euclid(th);
        let rows = ((canvas_height as i64 - anchor_y + th - 1) / th).max(0) as usize;
        let cols = ((canvas_width as i64 - anchor_x + tw - 1) / tw).max(0) as usize;
        Self {
            anchor_x: anchor_x as u32,
            anchor_y: anchor_y as u32,
            tile_width: TILE_WIDTH,
            tile_height: TILE_HEIGHT,
            rows,
            cols,
        }
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn contains(&self, index: TileIndex) -> bool {
        index.row < self.rows && index.col < self.cols
    }

    /// Top-left corner of a tile on the rectified canvas.
    pub fn tile_origin(&self, index: TileIndex) -> Coord {
        (
            self.anchor_x as f64 + (index.col as u32 * self.tile_width) as f64,
            self.anchor_y as f64 + (index.row as u32 * self.tile_height) as f64,
        )
    }

    /// Centre of a tile on the rectified canvas.
    pub fn index_to_coord(&self, index: TileIndex) -> Coord {
        let (x, y) = self.tile_origin(index);
        (x + self.tile_width as f64 / 2.0, y + self.tile_height as f64 / 2.0)
    }

    /// Tile under a rectified point, if the point is right of and below the
    /// anchor.
    pub fn coord_to_index(&self, (x, y): Coord) -> Option<TileIndex> {
        let col = ((x - self.anchor_x as f64) / self.tile_width as f64).floor();
        let row = ((y - self.anchor_y as f64) / self.tile_height as f64).floor();
        if col < 0.0 || row < 0.0 || !col.is_finite() || !row.is_finite() {
            return None;
        }
        Some(TileIndex::new(row as usize, col as usize))
    }

    /// Every tile index in row-major order.
    pub fn indices(&self) -> impl Iterator<Item = TileIndex> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| TileIndex::new(row, col)))
    }
}

/// Canny edge map of a colour image, on its luma channel.
pub fn edge_map(image: &RgbImage) -> opencv::Result<GrayImage> {
    let gray = image::DynamicImage::ImageRgb8(image.clone()).to_luma8();
    image_ops::canny(&gray, CANNY_LOW, CANNY_HIGH)
}

fn is_tile_sized(bounds: &BoundingBox) -> bool {
    if bounds.area() == 0 {
        return false;
    }
    let area_diff = (1.0 - (TILE_WIDTH * TILE_HEIGHT) as f64 / bounds.area() as f64).abs();
    let aspect_diff = (1.0 - bounds.width as f64 / bounds.height as f64).abs();
    area_diff < AREA_TOLERANCE && aspect_diff < ASPECT_TOLERANCE
}

/// Candidate whose offsets to every other candidate are closest to whole
/// tile multiples.
fn lattice_pivot(candidates: &[(i64, i64)]) -> Option<(i64, i64)> {
    let (tw, th) = (TILE_WIDTH as i64, TILE_HEIGHT as i64);
    candidates
        .iter()
        .map(|&(xi, yi)| {
            let cost: i64 = candidates
                .iter()
                .filter(|&&other| other != (xi, yi))
                .map(|&(xj, yj)| {
                    let rw = (xi - xj).abs() % tw;
                    let rh = (yi - yj).abs() % th;
                    rw.min(tw - rw) + rh.min(th - rh)
                })
                .sum();
            ((xi, yi), cost)
        })
        .min_by_key(|&(_, cost)| cost)
        .map(|(point, _)| point)
}

/// Finds the tile lattice on rectified frames.
#[derive(Debug, Clone)]
pub struct GridLocator {
    free_center: GrayImage,
}

impl GridLocator {
    pub fn new(free_center: GrayImage) -> Self {
        Self { free_center }
    }

    /// Locates the grid. `Ok(None)` means no tile could be pinned down.
    pub fn locate(&self, frame: &RectifiedFrame) -> opencv::Result<Option<GridGeometry>> {
        let canvas = frame.image.dimensions();
        let edges = edge_map(&frame.image)?;

        let closed = image_ops::close(&edges, CLOSING_KERNEL_MIN)?;
        if let Some(found) = best_match(&closed, &self.free_center)? {
            debug!(similarity = found.score, "free tile centre");
            if found.score > FREE_TILE_MATCH_THRESHOLD {
                let x = found.x as i64 + FREE_TILE_OFFSET.0;
                let y = found.y as i64 + FREE_TILE_OFFSET.1;
                return Ok(Some(GridGeometry::from_lattice_point(x, y, canvas)));
            }
        }

        let mut kernel = CLOSING_KERNEL_MIN;
        let mut candidates = Vec::new();
        while candidates.is_empty() && kernel <= CLOSING_KERNEL_MAX {
            let closed = image_ops::close(&edges, kernel)?;
            candidates = image_ops::hull_bounds(&closed)?
                .iter()
                .filter(|b| is_tile_sized(b))
                .map(|b| (b.x as i64, b.y as i64))
                .collect();
            trace!(kernel, candidates = candidates.len(), "closing sweep");
            kernel += CLOSING_KERNEL_STEP;
        }

        Ok(lattice_pivot(&candidates).map(|(x, y)| GridGeometry::from_lattice_point(x, y, canvas)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, imageops};
    use tokio::time::Instant;

    fn lattice_frame(width: u32, height: u32, origin: (u32, u32), marks: bool) -> RectifiedFrame {
        let image = RgbImage::from_fn(width, height, |x, y| {
            let on_line = |v: u32, o: u32, t: u32| (v + t - o % t) % t < 3;
            let in_mark = |v: u32, o: u32, t: u32| (90..120).contains(&((v + t - o % t) % t));
            if on_line(x, origin.0, TILE_WIDTH) || on_line(y, origin.1, TILE_HEIGHT) {
                Rgb([200, 200, 200])
            } else if marks
                && in_mark(x, origin.0, TILE_WIDTH)
                && in_mark(y, origin.1, TILE_HEIGHT)
            {
                Rgb([220, 220, 220])
            } else {
                Rgb([0, 0, 0])
            }
        });
        RectifiedFrame { image, captured_at: Instant::now() }
    }

    #[test]
    fn index_and_coordinate_are_a_bijection() {
        let geometry = GridGeometry::from_lattice_point(-40, 500, (1900, 1300));
        assert_eq!((geometry.anchor_x, geometry.anchor_y), (169, 82));
        for index in geometry.indices() {
            assert_eq!(geometry.coord_to_index(geometry.index_to_coord(index)), Some(index));
        }
    }

    #[test]
    fn shape_covers_partial_tiles_at_the_far_edges() {
        let geometry = GridGeometry::from_lattice_point(30, 50, (900, 700));
        assert_eq!(geometry.shape(), (4, 5));
        assert!(geometry.contains(TileIndex::new(3, 4)));
        assert!(!geometry.contains(TileIndex::new(4, 0)));
        assert_eq!(geometry.coord_to_index((10.0, 60.0)), None);
    }

    #[test]
    fn pivot_prefers_the_candidate_on_the_majority_lattice() {
        let candidates = [(30, 50), (239, 50), (448, 259), (130, 120)];
        assert_eq!(lattice_pivot(&candidates), Some((30, 50)));
        assert_eq!(lattice_pivot(&[]), None);
    }

    #[test]
    fn lattice_fallback_recovers_the_anchor() {
        let frame = lattice_frame(900, 700, (30, 50), false);
        // Larger than the canvas, so the fast path cannot fire.
        let locator = GridLocator::new(GrayImage::new(1000, 1000));
        let geometry = locator.locate(&frame).unwrap().expect("grid lines are visible");
        assert!(geometry.anchor_x.abs_diff(30) <= 6, "{geometry:?}");
        assert!(geometry.anchor_y.abs_diff(50) <= 6, "{geometry:?}");
        assert_eq!(geometry.shape(), (4, 5));
    }

    #[test]
    fn free_centre_template_gives_the_anchor_directly() {
        let frame = lattice_frame(900, 700, (30, 50), true);
        let edges = edge_map(&frame.image).unwrap();
        let closed = image_ops::close(&edges, CLOSING_KERNEL_MIN).unwrap();
        let template = imageops::crop_imm(&closed, 30 + 70, 50 + 70, 69, 69).to_image();
        let geometry = GridLocator::new(template).locate(&frame).unwrap().expect("mark matches");
        assert_eq!((geometry.anchor_x, geometry.anchor_y), (30, 50));
    }

    #[test]
    fn blank_frame_has_no_grid() {
        let frame = RectifiedFrame { image: RgbImage::new(600, 600), captured_at: Instant::now() };
        let locator = GridLocator::new(GrayImage::new(1000, 1000));
        assert_eq!(locator.locate(&frame).unwrap(), None);
    }
}
