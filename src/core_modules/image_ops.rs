// THEORY:
// `image_ops` holds the low-level raster passes the perception layers are built
// from. Frames live as `image` buffers everywhere else in the crate; the
// heavy passes hand them to OpenCV as `Mat`s and copy the result back, so no
// caller ever sees a `Mat`.
//
// 1.  **Edge map**: `imgproc::canny` turns the rectified capture into thin
//     tile outlines.
// 2.  **Closing**: `imgproc::morphology_ex` with a square structuring element
//     bridges the small gaps left in those outlines.
// 3.  **Hull bounds**: every contour of the closed edge map is replaced by its
//     convex hull and reported as a bounding box. A closed tile outline
//     yields boxes roughly one tile in size.
// 4.  **Sampling**: cropping with clipping and bilinear sampling for the warp.

use image::{GrayImage, ImageBuffer, Pixel, Rgb, RgbImage};
use opencv::core::{self, Mat, Point, Scalar, Size, Vector};
use opencv::imgproc;
use opencv::prelude::*;

pub const EDGE: u8 = 255;

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

fn is_empty<P: Pixel>(image: &ImageBuffer<P, Vec<P::Subpixel>>) -> bool {
    image.width() == 0 || image.height() == 0
}

/// Copies an 8-bit image into a continuous `Mat` with the same channel count.
/// The image must not be empty.
pub fn to_mat<P>(image: &ImageBuffer<P, Vec<u8>>) -> opencv::Result<Mat>
where
    P: Pixel<Subpixel = u8>,
{
    let kind = match P::CHANNEL_COUNT {
        1 => core::CV_8UC1,
        3 => core::CV_8UC3,
        4 => core::CV_8UC4,
        n => {
            let message = format!("unsupported channel count {n}");
            return Err(opencv::Error::new(core::StsBadArg, message));
        }
    };
    let (width, height) = image.dimensions();
    let mut mat =
        Mat::new_rows_cols_with_default(height as i32, width as i32, kind, Scalar::all(0.0))?;
    mat.data_bytes_mut()?.copy_from_slice(image.as_raw());
    Ok(mat)
}

fn gray_from_mat(mat: &Mat) -> opencv::Result<GrayImage> {
    let (width, height) = (mat.cols() as u32, mat.rows() as u32);
    GrayImage::from_raw(width, height, mat.data_bytes()?.to_vec()).ok_or_else(|| {
        opencv::Error::new(core::StsUnmatchedSizes, "expected a single-channel 8-bit mat")
    })
}

/// Canny edge detector. Output pixels are either 0 or [`EDGE`].
pub fn canny(
    gray: &GrayImage,
    low_threshold: f64,
    high_threshold: f64,
) -> opencv::Result<GrayImage> {
    if is_empty(gray) {
        return Ok(gray.clone());
    }
    let mut edges = Mat::default();
    imgproc::canny(&to_mat(gray)?, &mut edges, low_threshold, high_threshold, 3, false)?;
    gray_from_mat(&edges)
}

/// Morphological closing (dilate then erode) with a `kernel_size` square.
/// Pixels outside the image never erode a line.
pub fn close(binary: &GrayImage, kernel_size: u32) -> opencv::Result<GrayImage> {
    if is_empty(binary) || kernel_size < 2 {
        return Ok(binary.clone());
    }
    let side = kernel_size as i32;
    let anchor = Point::new(-1, -1);
    let kernel =
        imgproc::get_structuring_element(imgproc::MORPH_RECT, Size::new(side, side), anchor)?;
    let mut closed = Mat::default();
    imgproc::morphology_ex(
        &to_mat(binary)?,
        &mut closed,
        imgproc::MORPH_CLOSE,
        &kernel,
        anchor,
        1,
        core::BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    gray_from_mat(&closed)
}

/// Bounding box of the convex hull of every contour in a binary image.
pub fn hull_bounds(binary: &GrayImage) -> opencv::Result<Vec<BoundingBox>> {
    if is_empty(binary) {
        return Ok(Vec::new());
    }
    let mut contours: Vector<Vector<Point>> = Vector::new();
    imgproc::find_contours(
        &to_mat(binary)?,
        &mut contours,
        imgproc::RETR_LIST,
        imgproc::CHAIN_APPROX_SIMPLE,
        Point::new(0, 0),
    )?;

    let mut bounds = Vec::with_capacity(contours.len());
    for contour in contours.iter() {
        let mut hull: Vector<Point> = Vector::new();
        imgproc::convex_hull(&contour, &mut hull, false, true)?;
        let rect = imgproc::bounding_rect(&hull)?;
        bounds.push(BoundingBox {
            x: rect.x.max(0) as u32,
            y: rect.y.max(0) as u32,
            width: rect.width.max(0) as u32,
            height: rect.height.max(0) as u32,
        });
    }
    Ok(bounds)
}

/// Crops `image` to the requested rectangle, clipped to the image bounds.
/// Returns `None` when nothing of the rectangle lies inside the image.
pub fn crop_clipped<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    x: i64,
    y: i64,
    width: i64,
    height: i64,
) -> Option<ImageBuffer<P, Vec<P::Subpixel>>>
where
    P: Pixel + 'static,
{
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + width).min(image.width() as i64);
    let y1 = (y + height).min(image.height() as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let (cx, cy) = (x0 as u32, y0 as u32);
    Some(image::imageops::crop_imm(image, cx, cy, (x1 - x0) as u32, (y1 - y0) as u32).to_image())
}

/// Bilinear sample of an RGB image; `None` outside the image.
pub fn sample_bilinear(image: &RgbImage, x: f64, y: f64) -> Option<Rgb<u8>> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || x < 0.0 || y < 0.0 {
        return None;
    }
    if x > (width - 1) as f64 || y > (height - 1) as f64 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);
    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// Builds a `width` x `height` image by pulling every output pixel from the
/// source position `source_of(x, y)`. Positions outside the source are black.
pub fn warp_with<F>(source: &RgbImage, width: u32, height: u32, source_of: F) -> RgbImage
where
    F: Fn(f64, f64) -> Option<(f64, f64)>,
{
    if source.width() == 0 || source.height() == 0 {
        return RgbImage::new(width, height);
    }
    RgbImage::from_fn(width, height, |x, y| {
        source_of(x as f64, y as f64)
            .and_then(|(sx, sy)| sample_bilinear(source, sx, sy))
            .unwrap_or(Rgb([0, 0, 0]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn outlined_square(size: u32, origin: u32, side: u32) -> GrayImage {
        let mut image = GrayImage::new(size, size);
        for i in origin..=origin + side {
            image.put_pixel(i, origin, Luma([EDGE]));
            image.put_pixel(i, origin + side, Luma([EDGE]));
            image.put_pixel(origin, i, Luma([EDGE]));
            image.put_pixel(origin + side, i, Luma([EDGE]));
        }
        image
    }

    #[test]
    fn canny_finds_the_step_between_two_halves() {
        let image = GrayImage::from_fn(40, 20, |x, _| Luma([if x < 20 { 10 } else { 220 }]));
        let edges = canny(&image, 50.0, 100.0).unwrap();
        let edge_columns: Vec<u32> =
            (0..40).filter(|&x| edges.get_pixel(x, 10)[0] == EDGE).collect();
        assert!(!edge_columns.is_empty());
        assert!(edge_columns.iter().all(|&x| (18..=21).contains(&x)), "{edge_columns:?}");
    }

    #[test]
    fn canny_on_flat_image_is_empty() {
        let image = GrayImage::from_pixel(30, 30, Luma([128]));
        let edges = canny(&image, 50.0, 100.0).unwrap();
        assert_eq!(edges.dimensions(), (30, 30));
        assert!(edges.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn closing_bridges_a_small_gap() {
        let mut image = GrayImage::new(30, 5);
        for x in 0..30 {
            if !(14..=16).contains(&x) {
                image.put_pixel(x, 2, Luma([EDGE]));
            }
        }
        let closed = close(&image, 5).unwrap();
        assert!((0..30).all(|x| closed.get_pixel(x, 2)[0] == EDGE));
    }

    #[test]
    fn outline_is_bounded_by_its_hull() {
        let image = outlined_square(60, 10, 30);
        let bounds = hull_bounds(&image).unwrap();
        let outline = BoundingBox { x: 10, y: 10, width: 31, height: 31 };
        assert!(bounds.contains(&outline), "{bounds:?}");
        assert!(hull_bounds(&GrayImage::new(60, 60)).unwrap().is_empty());
    }

    #[test]
    fn mats_keep_every_channel() {
        let image = RgbImage::from_fn(4, 3, |x, y| Rgb([x as u8, y as u8, 9]));
        let mat = to_mat(&image).unwrap();
        assert_eq!((mat.cols(), mat.rows(), mat.channels()), (4, 3, 3));
        assert_eq!(mat.data_bytes().unwrap(), image.as_raw().as_slice());
    }

    #[test]
    fn crop_is_clipped_to_bounds() {
        let image = RgbImage::new(10, 10);
        let crop = crop_clipped(&image, -3, 8, 6, 6).expect("overlaps image");
        assert_eq!(crop.dimensions(), (3, 2));
        assert!(crop_clipped(&image, 20, 20, 5, 5).is_none());
    }

    #[test]
    fn bilinear_sample_interpolates_between_pixels() {
        let image = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 { Rgb([0, 0, 0]) } else { Rgb([200, 100, 50]) }
        });
        assert_eq!(sample_bilinear(&image, 0.5, 0.0), Some(Rgb([100, 50, 25])));
        assert_eq!(sample_bilinear(&image, 1.5, 0.0), None);
    }
}
