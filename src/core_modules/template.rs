// THEORY:
// Template matching is how the engine recognises anything smaller than a tile:
// the free-tile centre mark on the edge map, the corner hooks of partially
// hidden free tiles, and the unit icons (our fleet's arrow, enemy fleets,
// the boss, supply pickups) on the raw colour capture.
//
// Scores are OpenCV's normalized correlation coefficient
// (`TM_CCOEFF_NORMED`): template and candidate window are mean-centred per
// channel and the dot product is divided by the product of their norms. A
// score of 1.0 is a perfect match, 0.0 no linear relationship, and a flat
// window or template scores 0.
//
// A `DetectionTemplate` packages one unit icon with everything needed to look
// for it on a perspective-distorted capture: the tile width it was authored
// against, where to look relative to the tile, and how good a match must be.

use super::image_ops::{crop_clipped, to_mat};
use image::{GrayImage, ImageBuffer, Pixel, RgbImage, imageops};
use opencv::core::{self, Mat, Point};
use opencv::imgproc;
use opencv::prelude::*;
use std::path::Path;

/// Location and score of the best match in a search image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// `CV_32F` score map with one entry per template position, or `None` when
/// the template does not fit inside the image.
fn score_map<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    template: &ImageBuffer<P, Vec<u8>>,
) -> opencv::Result<Option<Mat>>
where
    P: Pixel<Subpixel = u8>,
{
    let (iw, ih) = image.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > iw || th > ih {
        return Ok(None);
    }
    let mut scores = Mat::default();
    imgproc::match_template(
        &to_mat(image)?,
        &to_mat(template)?,
        &mut scores,
        imgproc::TM_CCOEFF_NORMED,
        &Mat::default(),
    )?;
    Ok(Some(scores))
}

/// Best match of `template` inside `image`, or `None` if the template does
/// not fit inside the image.
pub fn best_match<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    template: &ImageBuffer<P, Vec<u8>>,
) -> opencv::Result<Option<MatchResult>>
where
    P: Pixel<Subpixel = u8>,
{
    let Some(scores) = score_map(image, template)? else {
        return Ok(None);
    };
    let mut score = 0f64;
    let mut at = Point::default();
    core::min_max_loc(&scores, None, Some(&mut score), None, Some(&mut at), &Mat::default())?;
    Ok(Some(MatchResult { x: at.x as u32, y: at.y as u32, score: score as f32 }))
}

/// Number of positions where the match score reaches `threshold`.
pub fn count_matches<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    template: &ImageBuffer<P, Vec<u8>>,
    threshold: f32,
) -> opencv::Result<usize>
where
    P: Pixel<Subpixel = u8>,
{
    let Some(scores) = score_map(image, template)? else {
        return Ok(0);
    };
    Ok(scores.data_typed::<f32>()?.iter().filter(|&&s| s >= threshold).count())
}

/// Where to look for a unit icon relative to a tile on the raw capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchArea {
    /// A square anchored at the tile's un-warped top-left corner. Side and
    /// offset are fractions of the template's scale base.
    Square { side: f64, offset_x: f64, offset_y: f64 },
    /// The bounding rectangle of the whole un-warped tile.
    TileBounds,
}

impl SearchArea {
    /// Square search area given in pixels at `scale_base`.
    pub fn square_px(side: f64, offset_x: f64, offset_y: f64, scale_base: f64) -> Self {
        SearchArea::Square {
            side: side / scale_base,
            offset_x: offset_x / scale_base,
            offset_y: offset_y / scale_base,
        }
    }
}

/// A unit icon plus the geometry needed to find it on a perspective capture.
#[derive(Debug, Clone)]
pub struct DetectionTemplate {
    pub image: RgbImage,
    /// Tile width (raw capture pixels) the icon was cut at.
    pub scale_base: f64,
    pub area: SearchArea,
    pub threshold: f32,
}

impl DetectionTemplate {
    pub fn new(image: RgbImage, scale_base: f64, area: SearchArea, threshold: f32) -> Self {
        Self { image, scale_base, area, threshold }
    }

    /// Scale factor for a row whose measured tile width is `tile_width`.
    pub fn scale_for(&self, tile_width: f64) -> f64 {
        tile_width / self.scale_base
    }

    /// The icon resized by `scale`; never smaller than 1x1.
    pub fn scaled(&self, scale: f64) -> RgbImage {
        let (w, h) = self.image.dimensions();
        let nw = ((w as f64 * scale).round() as u32).max(1);
        let nh = ((h as f64 * scale).round() as u32).max(1);
        if (nw, nh) == (w, h) {
            return self.image.clone();
        }
        imageops::resize(&self.image, nw, nh, imageops::FilterType::Triangle)
    }

    /// Best score of the (already scaled) icon inside the `(x, y, w, h)`
    /// window of `screen`, if it fits there.
    pub fn score_in(
        &self,
        scaled: &RgbImage,
        screen: &RgbImage,
        (x, y, w, h): (i64, i64, i64, i64),
    ) -> opencv::Result<Option<f32>> {
        let Some(crop) = crop_clipped(screen, x, y, w, h) else {
            return Ok(None);
        };
        Ok(best_match(&crop, scaled)?.map(|m| m.score))
    }
}

/// File names looked up by [`TemplateSet::load`].
pub mod files {
    pub const FREE_TILE_CENTER: &str = "free_tile_center.png";
    pub const FREE_TILE_CORNER: &str = "free_tile_lu.png";
    pub const CHARACTER_ARROW: &str = "arrow.png";
    pub const ENEMY: [&str; 3] = ["e1.png", "e2.png", "e3.png"];
    pub const BOSS: &str = "boss.png";
    pub const AMMO: &str = "ammo.png";
    pub const MYSTERY: &str = "mystery.png";
}

/// Tile width, in raw capture pixels, all unit icons were authored against.
pub const SCALING_BASE: f64 = 195.0;
pub const UNIT_MATCH_THRESHOLD: f32 = 0.9;

/// Every template the map perception needs. Loaded once, read-only after.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    /// Edge-map template of a free tile's centre mark.
    pub free_center: GrayImage,
    /// Edge-map template of a free tile's top-left corner hook.
    pub free_corner: GrayImage,
    pub character: DetectionTemplate,
    /// Normal enemy fleets, level 1 to 3.
    pub enemies: [DetectionTemplate; 3],
    pub boss: DetectionTemplate,
    pub ammo: DetectionTemplate,
    pub mystery: DetectionTemplate,
}

impl TemplateSet {
    /// Assembles a set from already decoded icons, using the stock search
    /// geometry for each unit.
    pub fn from_images(
        free_center: GrayImage,
        free_corner: GrayImage,
        character: RgbImage,
        enemies: [RgbImage; 3],
        boss: RgbImage,
        ammo: RgbImage,
        mystery: RgbImage,
    ) -> Self {
        let base = SCALING_BASE;
        let enemy_area = SearchArea::square_px(80.0, -80.0 / 4.0, -80.0 * 4.0 / 5.0, base);
        let [e1, e2, e3] = enemies;
        Self {
            free_center,
            free_corner,
            character: DetectionTemplate::new(
                character,
                base,
                SearchArea::square_px(140.0, 0.0, -2.2 * 140.0, base),
                UNIT_MATCH_THRESHOLD,
            ),
            enemies: [
                DetectionTemplate::new(e1, base, enemy_area, UNIT_MATCH_THRESHOLD),
                DetectionTemplate::new(e2, base, enemy_area, UNIT_MATCH_THRESHOLD),
                DetectionTemplate::new(e3, base, enemy_area, UNIT_MATCH_THRESHOLD),
            ],
            boss: DetectionTemplate::new(boss, base, SearchArea::TileBounds, UNIT_MATCH_THRESHOLD),
            ammo: DetectionTemplate::new(
                ammo,
                base,
                SearchArea::square_px(120.0, 37.5, -60.0, base),
                UNIT_MATCH_THRESHOLD,
            ),
            mystery: DetectionTemplate::new(
                mystery,
                base,
                SearchArea::square_px(120.0, 37.5, -60.0, base),
                UNIT_MATCH_THRESHOLD,
            ),
        }
    }

    /// Loads every template from `dir` (see [`files`]).
    pub fn load(dir: &Path) -> Result<Self, image::ImageError> {
        let gray = |name: &str| image::open(dir.join(name)).map(|i| i.to_luma8());
        let rgb = |name: &str| image::open(dir.join(name)).map(|i| i.to_rgb8());
        Ok(Self::from_images(
            gray(files::FREE_TILE_CENTER)?,
            gray(files::FREE_TILE_CORNER)?,
            rgb(files::CHARACTER_ARROW)?,
            [rgb(files::ENEMY[0])?, rgb(files::ENEMY[1])?, rgb(files::ENEMY[2])?],
            rgb(files::BOSS)?,
            rgb(files::AMMO)?,
            rgb(files::MYSTERY)?,
        ))
    }
}
