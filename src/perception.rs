// THEORY:
// `MapPerception` is the glue between the device and the perception engine
// in `core_modules`. One read of the map runs as a small pipeline:
//
// Stage 1: capture and rectify until two consecutive grid detections agree
//          on the shape. The map scrolls and animates after every move, so a
//          single detection is not trusted.
// Stage 2: capture, rectify, re-detect and classify N more frames, dropping
//          any whose shape drifted, and vote them into one map.
// Stage 3: keep the last geometry so tile indices can be turned back into
//          screen points for touching.
//
// The orchestrator only sees the `MapReader` trait, so scripted readers can
// stand in for the real thing in tests.

use crate::core_modules::frame_voter::VoteTally;
use crate::core_modules::grid_locator::{GridGeometry, GridLocator, TileIndex};
use crate::core_modules::perspective::PerspectiveModel;
use crate::core_modules::template::TemplateSet;
use crate::core_modules::tile_classifier::{ClassifiedMap, ClassifierInput, TileClassifier};
use crate::device::{Device, Point};
use crate::error::{CalibrationError, PerceptionError};
use crate::presets::{self, MapId};
use image::RgbImage;
use tracing::{debug, warn};

/// Grid detections tried before the shape is declared unstable.
pub const MAX_GEOMETRY_ATTEMPTS: usize = 6;

/// Frames that may be refused for a shape change during one merge.
const MAX_REFUSED_FRAMES: u32 = 6;

/// Reads the sea map off the device.
#[allow(async_fn_in_trait)]
pub trait MapReader {
    /// Builds the perspective model for a map's calibration preset.
    fn calibrate(&mut self, map: &MapId) -> Result<(), CalibrationError>;

    /// Reads the map over several frames and votes them into one.
    async fn merged_map<D: Device>(
        &mut self,
        device: &mut D,
    ) -> Result<ClassifiedMap, PerceptionError>;

    /// Reads the map from a single frame.
    async fn single_map<D: Device>(
        &mut self,
        device: &mut D,
    ) -> Result<ClassifiedMap, PerceptionError>;

    /// Screen point of a tile's centre under the latest geometry.
    fn tile_to_screen(&self, index: TileIndex) -> Option<Point>;
}

pub struct MapPerception {
    templates: TemplateSet,
    locator: GridLocator,
    model: Option<PerspectiveModel>,
    geometry: Option<GridGeometry>,
    merge_frames: u32,
}

impl MapPerception {
    pub fn new(templates: TemplateSet, merge_frames: u32) -> Self {
        let locator = GridLocator::new(templates.free_center.clone());
        Self {
            templates,
            locator,
            model: None,
            geometry: None,
            merge_frames: merge_frames.max(1),
        }
    }

    pub fn geometry(&self) -> Option<&GridGeometry> {
        self.geometry.as_ref()
    }

    fn model(&self) -> Result<PerspectiveModel, PerceptionError> {
        self.model.clone().ok_or(PerceptionError::NotCalibrated)
    }

    /// Classifies one capture against its own grid detection. `Ok(None)`
    /// means no grid was found on it.
    pub fn read_frame(
        &self,
        model: &PerspectiveModel,
        screen: &RgbImage,
    ) -> Result<Option<ClassifiedMap>, PerceptionError> {
        let frame = model.rectify(screen);
        let Some(geometry) = self.locator.locate(&frame)? else {
            return Ok(None);
        };
        let classifier = TileClassifier::new(&self.templates);
        let input = ClassifierInput { model, geometry: &geometry, frame: &frame, screen };
        Ok(Some(classifier.classify(&input)?))
    }

    async fn stable_geometry<D: Device>(
        &self,
        model: &PerspectiveModel,
        device: &mut D,
    ) -> Result<GridGeometry, PerceptionError> {
        let mut previous: Option<GridGeometry> = None;
        let mut detected_any = false;
        for attempt in 1..=MAX_GEOMETRY_ATTEMPTS {
            let screen = device.capture().await?;
            let current = self.locator.locate(&model.rectify(&screen))?;
            detected_any |= current.is_some();
            match (previous, current) {
                (Some(prev), Some(cur)) if prev.shape() == cur.shape() => {
                    debug!(attempt, rows = cur.rows, cols = cur.cols, "grid shape settled");
                    return Ok(cur);
                }
                (_, cur) => previous = cur,
            }
        }
        if detected_any {
            Err(PerceptionError::GeometryUnstable { attempts: MAX_GEOMETRY_ATTEMPTS })
        } else {
            Err(PerceptionError::unreadable("no tile anchor found"))
        }
    }
}

impl MapReader for MapPerception {
    fn calibrate(&mut self, map: &MapId) -> Result<(), CalibrationError> {
        let preset = presets::calibration_for(map);
        let model = PerspectiveModel::from_points(&preset.source, &preset.destination)?;
        debug!(%map, canvas = ?model.canvas_size(), "perspective model calibrated");
        self.model = Some(model);
        self.geometry = None;
        Ok(())
    }

    async fn merged_map<D: Device>(
        &mut self,
        device: &mut D,
    ) -> Result<ClassifiedMap, PerceptionError> {
        let model = self.model()?;

        // Stage 1: settle the grid shape
        let geometry = self.stable_geometry(&model, device).await?;
        self.geometry = Some(geometry);

        // Stage 2: vote over frames of that shape
        let classifier = TileClassifier::new(&self.templates);
        let mut tally = VoteTally::new(geometry.shape());
        let mut refused = 0;
        while tally.frames() < self.merge_frames {
            let screen = device.capture().await?;
            let frame = model.rectify(&screen);
            let Some(frame_geometry) = self.locator.locate(&frame)? else {
                refused += 1;
                if refused > MAX_REFUSED_FRAMES {
                    return Err(PerceptionError::unreadable("grid lost while merging"));
                }
                continue;
            };
            let map = classifier.classify(&ClassifierInput {
                model: &model,
                geometry: &frame_geometry,
                frame: &frame,
                screen: &screen,
            })?;
            if tally.add(&map) {
                // Stage 3: latest agreeing geometry is what tiles map back through
                self.geometry = Some(frame_geometry);
            } else {
                refused += 1;
                let (expected, got) = (geometry.shape(), map.grid.shape());
                warn!(?expected, ?got, "frame refused, grid shape changed");
                if refused > MAX_REFUSED_FRAMES {
                    return Err(PerceptionError::GeometryUnstable { attempts: refused as usize });
                }
            }
        }

        let merged = tally.finish().ok_or_else(|| PerceptionError::unreadable("no frames voted"))?;
        debug!("read map:\n{}", merged.grid);
        Ok(merged)
    }

    async fn single_map<D: Device>(
        &mut self,
        device: &mut D,
    ) -> Result<ClassifiedMap, PerceptionError> {
        let model = self.model()?;
        let screen = device.capture().await?;
        let frame = model.rectify(&screen);
        let geometry = self
            .locator
            .locate(&frame)?
            .ok_or_else(|| PerceptionError::unreadable("no tile anchor found"))?;
        self.geometry = Some(geometry);
        let classifier = TileClassifier::new(&self.templates);
        let input =
            ClassifierInput { model: &model, geometry: &geometry, frame: &frame, screen: &screen };
        Ok(classifier.classify(&input)?)
    }

    fn tile_to_screen(&self, index: TileIndex) -> Option<Point> {
        let model = self.model.as_ref()?;
        let geometry = self.geometry.as_ref()?;
        model.inverse(geometry.index_to_coord(index)).map(Point::from_coord)
    }
}
