// THEORY:
// The engine never talks to the game directly. Everything it can observe or
// do goes through two narrow seams:
//
// 1) `Device`: screen capture, input injection, and the template lookups
//    that run on the most recent capture. Lookups are synchronous because
//    they only read the capture already in hand; anything that touches the
//    real device is async.
// 2) `Collaborators`: the stats sink and the modules that free dock space
//    (retirement, enhancement) plus the oil check. They run whole menus of
//    their own and report back a single yes/no.
//
// Both are traits so the orchestration can be driven by a scripted device in
// tests.

use crate::error::DeviceError;
use image::RgbImage;
use std::time::Duration;

/// Fixed delay between two reads of the screen in every polling loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Similarity used for UI lookups unless a caller asks for another.
pub const DEFAULT_SIMILARITY: f32 = 0.95;

/// A screen point in capture pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Rounds a sub-pixel coordinate to the nearest pixel.
    pub fn from_coord((x, y): (f64, f64)) -> Self {
        Self { x: x.round() as i32, y: y.round() as i32 }
    }
}

/// An axis-aligned screen rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width as i32 / 2, self.y + self.height as i32 / 2)
    }

    pub fn contains(&self, p: Point) -> bool {
        let inside_x = p.x >= self.x && p.x < self.x + self.width as i32;
        inside_x && p.y >= self.y && p.y < self.y + self.height as i32
    }
}

/// How long to wait for the screen to stop changing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StableWait {
    /// Consecutive identical frames that count as stable.
    pub frame_count: u32,
    pub min_time: Duration,
    pub max_time: Duration,
}

impl StableWait {
    pub const fn up_to(max_time: Duration) -> Self {
        Self { frame_count: 3, min_time: Duration::ZERO, max_time }
    }

    pub const fn between(min_time: Duration, max_time: Duration) -> Self {
        Self { frame_count: 3, min_time, max_time }
    }

    pub const fn frames(mut self, frame_count: u32) -> Self {
        self.frame_count = frame_count;
        self
    }
}

impl Default for StableWait {
    fn default() -> Self {
        Self::up_to(Duration::from_secs(2))
    }
}

/// Screen and input primitives of the device running the game.
#[allow(async_fn_in_trait)]
pub trait Device {
    /// Takes a new capture and makes it the current screen.
    async fn capture(&mut self) -> Result<RgbImage, DeviceError>;

    async fn touch(&mut self, point: Point) -> Result<(), DeviceError>;

    /// Touches somewhere inside `region`.
    async fn touch_region(&mut self, region: Region) -> Result<(), DeviceError>;

    async fn swipe(
        &mut self,
        from: Point,
        to: Point,
        duration: Duration,
    ) -> Result<(), DeviceError>;

    /// Blocks until the screen settles or `wait.max_time` passes. The last
    /// capture taken becomes the current screen.
    async fn wait_till_stable(&mut self, wait: StableWait) -> Result<(), DeviceError>;

    /// Best match of a named template on the current screen.
    fn find(&self, template: &str, similarity: f32) -> Option<Region>;

    fn find_in_region(&self, template: &str, region: Region, similarity: f32) -> Option<Region>;

    fn find_all(&self, template: &str, similarity: f32) -> Vec<Region>;

    /// Like [`Device::find`], trying the template at scales from
    /// `lower_end` up to 1.0.
    fn find_in_scaling_range(&self, template: &str, lower_end: f32) -> Option<Region>;
}

/// Services outside the combat engine it reports to or leans on.
#[allow(async_fn_in_trait)]
pub trait Collaborators {
    /// Retires ships to free dock space. `true` if space was freed.
    async fn retire(&mut self, forced: bool) -> bool;

    /// Feeds equipment to ships to free dock space. `true` if space was freed.
    async fn enhance(&mut self, forced: bool) -> bool;

    fn increment_combat_done(&mut self);

    fn increment_combat_attempted(&mut self);

    /// Whether there is enough oil left to sortie.
    fn oil_ok(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_contains_its_centre_but_not_its_far_edge() {
        let region = Region::new(1430, 985, 240, 60);
        assert_eq!(region.center(), Point::new(1550, 1015));
        assert!(region.contains(region.center()));
        assert!(region.contains(Point::new(1430, 985)));
        assert!(!region.contains(Point::new(1670, 1000)));
        assert!(!region.contains(Point::new(1500, 1045)));
    }

    #[test]
    fn empty_region_contains_nothing() {
        let region = Region::new(5, 6, 0, 0);
        assert!(!region.contains(Point::new(5, 6)));
    }

    #[test]
    fn sub_pixel_coordinates_round_to_nearest() {
        assert_eq!(Point::from_coord((10.4, 19.6)), Point::new(10, 20));
    }
}
