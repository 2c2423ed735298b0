//! Shared data types for planning, sweeping and assembly.

use crate::errors::ScanError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One point in stage coordinates (millimeters).
///
/// Field names are uppercase in the JSON corner files written by the
/// calibration tooling, hence the renames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StagePoint {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "Z")]
    pub z: f64,
}

impl StagePoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Euclidean distance in the XY plane, ignoring Z.
    pub fn xy_distance(&self, other: &StagePoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// The four corners of the coverage region.
///
/// `(0, 0)` in grid coordinates corresponds to `bottom_left`. Z values may
/// differ per corner; a tilted slide plane is interpolated, not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornerSet {
    pub bottom_left: StagePoint,
    pub bottom_right: StagePoint,
    pub top_right: StagePoint,
    pub top_left: StagePoint,
}

impl CornerSet {
    /// Load a corner set from a JSON file produced by corner selection.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ScanError::Config(format!("failed to read corner file {:?}: {}", path, e))
        })?;

        let corners: CornerSet = serde_json::from_str(&contents).map_err(|e| {
            ScanError::Config(format!("failed to parse corner file {:?}: {}", path, e))
        })?;

        corners.validate()?;
        log::info!("Loaded corner set from {:?}", path);
        Ok(corners)
    }

    /// Reject corner sets no grid can be planned over: non-finite values or
    /// a zero-area (degenerate) quadrilateral.
    pub fn validate(&self) -> Result<(), ScanError> {
        for (name, corner) in self.named() {
            if !corner.is_finite() {
                return Err(ScanError::Config(format!(
                    "corner {} has non-finite coordinates",
                    name
                )));
            }
        }

        if self.xy_area() < 1e-9 {
            return Err(ScanError::Config(
                "corners form a degenerate (zero-area) quadrilateral".to_string(),
            ));
        }

        Ok(())
    }

    /// Shoelace area of the XY projection, corners taken in winding order.
    pub fn xy_area(&self) -> f64 {
        let pts = [
            self.bottom_left,
            self.bottom_right,
            self.top_right,
            self.top_left,
        ];
        let mut acc = 0.0;
        for i in 0..4 {
            let a = pts[i];
            let b = pts[(i + 1) % 4];
            acc += a.x * b.y - b.x * a.y;
        }
        (acc / 2.0).abs()
    }

    fn named(&self) -> [(&'static str, StagePoint); 4] {
        [
            ("bottom_left", self.bottom_left),
            ("bottom_right", self.bottom_right),
            ("top_right", self.top_right),
            ("top_left", self.top_left),
        ]
    }
}

/// One planned grid cell: integer cell identity plus the interpolated
/// stage target. `z` is an estimate; autofocus refines it per cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPosition {
    pub col: u32,
    pub row: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GridPosition {
    /// Tile filename for this cell, e.g. `img_x3_y1.png`.
    ///
    /// The name is the sole linkage between a persisted tile and its grid
    /// cell, consumed verbatim by the assembler.
    pub fn tile_filename(&self, extension: &str) -> String {
        format!("img_x{}_y{}.{}", self.col, self.row, extension)
    }
}

/// Outcome of a focus search around one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusResult {
    /// Absolute Z of the sharpest probe (mm). The stage is parked here
    /// when the search returns.
    pub best_z_mm: f64,
    /// Sharpness measured at `best_z_mm`.
    pub best_sharpness: f64,
    /// Number of probe captures attempted, coarse and fine combined.
    pub probes: u32,
    /// False when the coarse optimum sat at an extreme of the probed range
    /// or the best sharpness stayed below the threshold.
    pub converged: bool,
}

/// A captured camera frame: owned RGB8 pixels plus capture metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Interleaved RGB8, row-major, `width * height * 3` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Utc::now(),
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Convert into an `image` crate buffer for encoding to disk.
    pub fn into_rgb_image(self) -> Result<image::RgbImage, ScanError> {
        let (width, height) = (self.width, self.height);
        image::RgbImage::from_vec(width, height, self.data).ok_or_else(|| {
            ScanError::Image(format!(
                "frame buffer does not match declared dimensions {}x{}",
                width, height
            ))
        })
    }

    pub fn from_rgb_image(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self::new(img.into_raw(), width, height)
    }
}
