// THEORY:
// The map is drawn with a camera tilt: tiles near the bottom of the screen
// are wide, tiles near the top are narrow and squashed. Every other
// perception stage wants a flat, top-down grid of equally sized squares, so
// the first step is a planar homography taken from four known point pairs
// (one tile's corners on screen and where they should land on a square).
//
// Key architectural principles:
// 1) Only the map area of the capture is warped. Coordinates in the
//    "rectified" space are relative to the rectified canvas; coordinates in
//    "screen" space are raw capture pixels. `forward`/`inverse` are the only
//    bridges between the two and both account for the crop offset.
// 2) The homography is shifted so the whole warped crop lands at
//    non-negative coordinates; the canvas is sized to hold it.
// 3) The model is immutable once built. A new map entry means a new model.

use super::image_ops::warp_with;
use crate::error::CalibrationError;
use image::RgbImage;
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use tokio::time::Instant;

/// A 2D point, `(x, y)`.
pub type Coord = (f64, f64);

/// Screen geometry of the capture the presets were measured on.
pub const SCREEN_WIDTH: u32 = 1920;
pub const SCREEN_HEIGHT: u32 = 1080;
/// Map crop, in screen pixels.
pub const MAP_CROP_TOP_LEFT: Coord = (185.0, 170.0);
pub const MAP_CROP_BOTTOM_RIGHT: Coord = (1795.0, 1080.0);

// A warped canvas beyond this means the quad puts part of the crop at or
// past the horizon.
const MAX_CANVAS_SIDE: f64 = 20_000.0;
const COLLINEAR_EPSILON: f64 = 1e-6;

/// One warped capture of the map area.
#[derive(Debug, Clone)]
pub struct RectifiedFrame {
    pub image: RgbImage,
    pub captured_at: Instant,
}

/// Planar calibration for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveModel {
    /// Cropped-screen -> rectified, already shifted to positive coordinates.
    forward: Matrix3<f64>,
    /// Rectified -> cropped-screen.
    inverse: Matrix3<f64>,
    canvas_width: u32,
    canvas_height: u32,
}

fn project(m: &Matrix3<f64>, (x, y): Coord) -> Option<Coord> {
    let p = m * Vector3::new(x, y, 1.0);
    if p.z.abs() < f64::EPSILON {
        return None;
    }
    Some((p.x / p.z, p.y / p.z))
}

fn cross((ax, ay): Coord, (bx, by): Coord, (cx, cy): Coord) -> f64 {
    (bx - ax) * (cy - ay) - (by - ay) * (cx - ax)
}

fn check_quad(points: &[Coord; 4], which: &'static str) -> Result<(), CalibrationError> {
    for skip in 0..4 {
        let tri: Vec<Coord> = (0..4).filter(|&i| i != skip).map(|i| points[i]).collect();
        if cross(tri[0], tri[1], tri[2]).abs() < COLLINEAR_EPSILON {
            return Err(CalibrationError::DegenerateQuad(which));
        }
    }
    Ok(())
}

/// Direct linear transform with `h33 = 1`, exact for four correspondences.
fn solve_homography(
    source: &[Coord; 4],
    destination: &[Coord; 4],
) -> Result<Matrix3<f64>, CalibrationError> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (i, (&(x, y), &(u, v))) in source.iter().zip(destination.iter()).enumerate() {
        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -u * x;
        a[(r, 7)] = -u * y;
        b[r] = u;

        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -v * x;
        a[(r + 1, 7)] = -v * y;
        b[r + 1] = v;
    }
    let h = a.lu().solve(&b).ok_or(CalibrationError::Singular)?;
    if h.iter().any(|v| !v.is_finite()) {
        return Err(CalibrationError::Singular);
    }
    Ok(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

impl PerspectiveModel {
    /// Builds the model from four screen-space correspondences.
    pub fn from_points(
        source: &[Coord; 4],
        destination: &[Coord; 4],
    ) -> Result<Self, CalibrationError> {
        check_quad(source, "source")?;
        check_quad(destination, "destination")?;

        let (ox, oy) = MAP_CROP_TOP_LEFT;
        let shift = |pts: &[Coord; 4]| pts.map(|(x, y)| (x - ox, y - oy));
        let h = solve_homography(&shift(source), &shift(destination))?;

        let src_w = MAP_CROP_BOTTOM_RIGHT.0 - ox;
        let src_h = MAP_CROP_BOTTOM_RIGHT.1 - oy;
        let mut min = (f64::INFINITY, f64::INFINITY);
        let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for corner in [(0.0, 0.0), (src_w, 0.0), (src_w, src_h), (0.0, src_h)] {
            let w = (h * Vector3::new(corner.0, corner.1, 1.0)).z;
            if w <= f64::EPSILON {
                return Err(CalibrationError::DegenerateQuad("map crop crosses the horizon"));
            }
            let (x, y) = project(&h, corner).ok_or(CalibrationError::Singular)?;
            min = (min.0.min(x.floor()), min.1.min(y.floor()));
            max = (max.0.max(x.ceil()), max.1.max(y.ceil()));
        }

        let anchor_x = (-min.0).max(0.0);
        let anchor_y = (-min.1).max(0.0);
        let translate = Matrix3::new(1.0, 0.0, anchor_x, 0.0, 1.0, anchor_y, 0.0, 0.0, 1.0);
        let shifted = translate * h;
        let forward = shifted / shifted[(2, 2)];
        let inverse = forward.try_inverse().ok_or(CalibrationError::Singular)?;

        let canvas_width = anchor_x + max.0.max(src_w);
        let canvas_height = anchor_y + max.1.max(src_h);
        if canvas_width > MAX_CANVAS_SIDE || canvas_height > MAX_CANVAS_SIDE {
            return Err(CalibrationError::DegenerateQuad("rectified canvas is unbounded"));
        }

        Ok(Self {
            forward,
            inverse,
            canvas_width: canvas_width as u32,
            canvas_height: canvas_height as u32,
        })
    }

    /// Rectified canvas size, `(width, height)`.
    pub fn canvas_size(&self) -> (u32, u32) {
        (self.canvas_width, self.canvas_height)
    }

    /// Screen point -> rectified point.
    pub fn forward(&self, (x, y): Coord) -> Option<Coord> {
        project(&self.forward, (x - MAP_CROP_TOP_LEFT.0, y - MAP_CROP_TOP_LEFT.1))
    }

    /// Rectified point -> screen point.
    pub fn inverse(&self, point: Coord) -> Option<Coord> {
        let (ox, oy) = MAP_CROP_TOP_LEFT;
        project(&self.inverse, point).map(|(x, y)| (x + ox, y + oy))
    }

    /// Warps the map area of a full screen capture onto the rectified canvas.
    pub fn rectify(&self, screen: &RgbImage) -> RectifiedFrame {
        let (x0, y0) = MAP_CROP_TOP_LEFT;
        let x1 = MAP_CROP_BOTTOM_RIGHT.0.min(screen.width() as f64);
        let y1 = MAP_CROP_BOTTOM_RIGHT.1.min(screen.height() as f64);
        let image = warp_with(screen, self.canvas_width, self.canvas_height, |x, y| {
            let (sx, sy) = self.inverse((x, y))?;
            (sx >= x0 && sy >= y0 && sx < x1 && sy < y1).then_some((sx, sy))
        });
        RectifiedFrame { image, captured_at: Instant::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const SRC: [Coord; 4] = [(430.0, 790.0), (630.0, 790.0), (616.0, 950.0), (407.0, 950.0)];
    const DST: [Coord; 4] = [(430.0, 790.0), (630.0, 790.0), (630.0, 990.0), (430.0, 990.0)];

    fn close(a: Coord, b: Coord) -> bool {
        (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6
    }

    #[test]
    fn round_trip_inside_the_calibrated_region() {
        let model = PerspectiveModel::from_points(&SRC, &DST).unwrap();
        let points =
            [(430.0, 790.0), (700.0, 600.0), (1500.0, 1000.0), (200.0, 400.0), (960.0, 540.0)];
        for &p in &points {
            let there = model.forward(p).unwrap();
            let back = model.inverse(there).unwrap();
            assert!(close(p, back), "{p:?} -> {there:?} -> {back:?}");
        }
    }

    #[test]
    fn correspondences_map_onto_their_targets_up_to_the_shift() {
        let model = PerspectiveModel::from_points(&SRC, &DST).unwrap();
        let base = model.forward(SRC[0]).unwrap();
        for (s, d) in SRC.iter().zip(DST.iter()) {
            let got = model.forward(*s).unwrap();
            let expected = (base.0 + d.0 - DST[0].0, base.1 + d.1 - DST[0].1);
            assert!(close(got, expected), "{got:?} != {expected:?}");
        }
    }

    #[test]
    fn warped_crop_lands_at_non_negative_coordinates() {
        let model = PerspectiveModel::from_points(&SRC, &DST).unwrap();
        let (w, h) = model.canvas_size();
        for corner in [MAP_CROP_TOP_LEFT, (1795.0, 170.0), MAP_CROP_BOTTOM_RIGHT, (185.0, 1080.0)] {
            let (x, y) = model.forward(corner).unwrap();
            assert!(x >= -1e-6 && y >= -1e-6, "{corner:?} -> ({x}, {y})");
            assert!(x <= w as f64 + 1.0 && y <= h as f64 + 1.0);
        }
    }

    #[test]
    fn collinear_points_are_rejected() {
        let line = [(0.0, 0.0), (10.0, 0.0), (20.0, 0.0), (5.0, 9.0)];
        assert_eq!(
            PerspectiveModel::from_points(&line, &DST),
            Err(CalibrationError::DegenerateQuad("source"))
        );
    }

    #[test]
    fn identity_calibration_just_crops() {
        let model = PerspectiveModel::from_points(&DST, &DST).unwrap();
        assert_eq!(model.canvas_size(), (1610, 910));
        let screen = RgbImage::from_fn(SCREEN_WIDTH, SCREEN_HEIGHT, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 7])
        });
        let frame = model.rectify(&screen);
        assert_eq!(frame.image.get_pixel(10, 20), screen.get_pixel(195, 190));
        assert_eq!(frame.image.get_pixel(1000, 500), screen.get_pixel(1185, 670));
    }
}
