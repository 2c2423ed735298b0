//! Grid sweep controller.
//!
//! Drives the stage through the planned grid, one cell at a time:
//! move, focus, capture, verify, persist. Each cell runs a small state
//! machine (`Pending -> Moved -> Focused -> Captured -> Verified | Skipped`)
//! and no per-cell failure stops the batch; only a lost hardware connection
//! is fatal to the sweep.
//!
//! All sweep progress lives in an explicit [`RegionReport`] threaded through
//! the run, so two sweeps (say a calibration region then the slide region)
//! cannot interfere through shared state.

pub mod session;

use crate::config::{AutofocusMode, FocusConfig, SweepConfig};
use crate::errors::ScanError;
use crate::focus;
use crate::hardware::{Camera, Stage};
use crate::planner;
use crate::quality::laplacian_variance;
use crate::types::{FocusResult, Frame, GridPosition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Per-cell lifecycle state. `Verified` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    Pending,
    Moved,
    Focused,
    Captured,
    Verified,
    Skipped,
}

/// Everything recorded about one grid cell during a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRecord {
    pub col: u32,
    pub row: u32,
    pub state: CellState,
    /// Verified sharpness of the persisted tile; 0 when focus was
    /// unavailable or nothing was captured.
    pub sharpness: f64,
    pub low_quality: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<FocusResult>,
    /// Tile filename relative to the region directory, when persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Why the cell was skipped, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
}

impl CellRecord {
    fn new(pos: &GridPosition) -> Self {
        Self {
            col: pos.col,
            row: pos.row,
            state: CellState::Pending,
            sharpness: 0.0,
            low_quality: false,
            focus: None,
            file: None,
            reason: None,
            captured_at: None,
        }
    }

    fn skip(&mut self, reason: String) {
        log::error!("Cell ({}, {}) skipped: {}", self.col, self.row, reason);
        self.state = CellState::Skipped;
        self.reason = Some(reason);
    }
}

/// Accumulated result of sweeping one region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionReport {
    pub region: String,
    pub directory: PathBuf,
    pub cols: u32,
    pub rows: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub cells: Vec<CellRecord>,
}

impl RegionReport {
    pub fn new(region: &str, directory: PathBuf, positions: &[GridPosition]) -> Self {
        let (cols, rows) = planner::grid_dimensions(positions);
        Self {
            region: region.to_string(),
            directory,
            cols,
            rows,
            started_at: Utc::now(),
            finished_at: None,
            cells: positions.iter().map(CellRecord::new).collect(),
        }
    }

    pub fn count(&self, state: CellState) -> usize {
        self.cells.iter().filter(|c| c.state == state).count()
    }

    /// Cells never reached, e.g. after cancellation or a fatal error.
    pub fn pending_cells(&self) -> Vec<(u32, u32)> {
        self.cells
            .iter()
            .filter(|c| c.state == CellState::Pending)
            .map(|c| (c.col, c.row))
            .collect()
    }
}

/// Sweeps a planned grid against a stage and camera.
pub struct SweepController<'a, S: Stage, C: Camera> {
    stage: &'a mut S,
    camera: &'a mut C,
    focus_config: &'a FocusConfig,
    sweep_config: &'a SweepConfig,
    stop: Arc<AtomicBool>,
}

impl<'a, S: Stage, C: Camera> SweepController<'a, S, C> {
    pub fn new(
        stage: &'a mut S,
        camera: &'a mut C,
        focus_config: &'a FocusConfig,
        sweep_config: &'a SweepConfig,
    ) -> Self {
        Self {
            stage,
            camera,
            focus_config,
            sweep_config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an external stop signal. The sweep honors it at cell
    /// boundaries: the cell in flight finishes, later cells stay pending.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Run the sweep over `positions`, recording progress into `report`.
    ///
    /// Cell identity collisions fail fast with `ScanError::Config` before
    /// any motion. On `ScanError::ConnectionLost` the sweep stops where it
    /// is; tiles captured so far are already on disk and the report lists
    /// the cells still pending.
    pub fn run(
        &mut self,
        positions: &[GridPosition],
        report: &mut RegionReport,
    ) -> Result<(), ScanError> {
        planner::verify_unique_cells(positions)?;

        fs::create_dir_all(&report.directory).map_err(|e| {
            ScanError::Io(format!(
                "failed to create tile directory {:?}: {}",
                report.directory, e
            ))
        })?;

        log::info!(
            "Sweeping region '{}': {} cells ({} x {})",
            report.region,
            positions.len(),
            report.cols,
            report.rows
        );

        let directory = report.directory.clone();
        for (index, pos) in positions.iter().enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                log::warn!(
                    "Stop requested; leaving {} cells pending in region '{}'",
                    positions.len() - index,
                    report.region
                );
                break;
            }

            let result = self.scan_cell(pos, &mut report.cells[index], &directory);
            if let Err(e) = result {
                report.finished_at = Some(Utc::now());
                log::error!("Sweep of region '{}' aborted: {}", report.region, e);
                return Err(e);
            }
        }

        report.finished_at = Some(Utc::now());
        log::info!(
            "Region '{}' complete: {} verified, {} skipped, {} pending",
            report.region,
            report.count(CellState::Verified),
            report.count(CellState::Skipped),
            report.count(CellState::Pending)
        );
        Ok(())
    }

    /// Run one cell through its state machine. `Err` only for fatal errors.
    fn scan_cell(
        &mut self,
        pos: &GridPosition,
        record: &mut CellRecord,
        directory: &Path,
    ) -> Result<(), ScanError> {
        // Pending -> Moved
        match self.stage.move_to(pos.x, pos.y, pos.z) {
            Ok(()) => record.state = CellState::Moved,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                record.skip(format!("move failed: {}", e));
                return Ok(());
            }
        }

        if self.sweep_config.settle_ms > 0 {
            thread::sleep(Duration::from_millis(self.sweep_config.settle_ms));
        }

        // Moved -> Focused
        let mut focus_unavailable = false;
        let mut prefocus_frame: Option<Frame> = None;

        let run_search = match self.sweep_config.autofocus {
            AutofocusMode::Disabled => false,
            AutofocusMode::Always => true,
            AutofocusMode::BelowThreshold => match self.camera.capture() {
                Ok(frame) => {
                    let sharpness = laplacian_variance(&frame);
                    if sharpness >= self.focus_config.sharpness_threshold {
                        log::debug!(
                            "Cell ({}, {}) sharp at estimate ({:.1}), skipping focus search",
                            pos.col,
                            pos.row,
                            sharpness
                        );
                        prefocus_frame = Some(frame);
                        false
                    } else {
                        true
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => true,
            },
        };

        if run_search {
            match focus::search(&mut *self.stage, &mut *self.camera, pos.z, self.focus_config) {
                Ok(result) => {
                    record.focus = Some(result);
                    record.state = CellState::Focused;
                    if !result.converged {
                        log::warn!(
                            "Cell ({}, {}) focus did not converge (best sharpness {:.1})",
                            pos.col,
                            pos.row,
                            result.best_sharpness
                        );
                    }
                }
                Err(ScanError::FocusUnavailable(msg)) => {
                    // Best-effort: the search left the stage at the Z
                    // estimate; capture there anyway.
                    log::warn!(
                        "Cell ({}, {}) focus unavailable ({}), capturing at Z estimate",
                        pos.col,
                        pos.row,
                        msg
                    );
                    focus_unavailable = true;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    record.skip(format!("focus search failed: {}", e));
                    return Ok(());
                }
            }
        }

        // Focused -> Captured
        let frame = match prefocus_frame {
            Some(frame) => Some(frame),
            None => self.capture_with_retries(pos)?,
        };

        let frame = match frame {
            Some(frame) => frame,
            None => {
                record.skip(format!(
                    "capture failed after {} attempts",
                    1 + self.sweep_config.capture_retries
                ));
                return Ok(());
            }
        };
        record.state = CellState::Captured;
        log::debug!(
            "Cell ({}, {}) captured {}x{} ({} bytes)",
            pos.col,
            pos.row,
            frame.width,
            frame.height,
            frame.size_bytes()
        );

        // Captured -> Verified | Skipped. The tile is persisted either way
        // so the operator can inspect or re-scan later.
        let sharpness = laplacian_variance(&frame);
        let captured_at = frame.timestamp;
        let filename = pos.tile_filename(&self.sweep_config.tile_extension);
        let path = directory.join(&filename);

        let img = match frame.into_rgb_image() {
            Ok(img) => img,
            Err(e) => {
                record.skip(format!("tile encode failed: {}", e));
                return Ok(());
            }
        };
        if let Err(e) = img.save(&path) {
            record.skip(format!("tile write to {:?} failed: {}", path, e));
            return Ok(());
        }

        record.file = Some(filename);
        record.captured_at = Some(captured_at);

        if focus_unavailable {
            record.sharpness = 0.0;
            record.low_quality = true;
            record.skip("focus unavailable; tile captured at Z estimate".to_string());
            return Ok(());
        }

        record.sharpness = sharpness;
        record.low_quality = sharpness < self.focus_config.sharpness_threshold;
        record.state = CellState::Verified;

        if record.low_quality {
            log::warn!(
                "Cell ({}, {}) verified below threshold: sharpness {:.1} < {:.1}",
                pos.col,
                pos.row,
                sharpness,
                self.focus_config.sharpness_threshold
            );
        } else {
            log::info!(
                "Cell ({}, {}) verified: sharpness {:.1}",
                pos.col,
                pos.row,
                sharpness
            );
        }

        Ok(())
    }

    /// Bounded capture retry loop with backoff. `Ok(None)` when every
    /// attempt failed with a per-frame camera error.
    fn capture_with_retries(&mut self, pos: &GridPosition) -> Result<Option<Frame>, ScanError> {
        let attempts = 1 + self.sweep_config.capture_retries;
        for attempt in 1..=attempts {
            match self.camera.capture() {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!(
                        "Cell ({}, {}) capture attempt {}/{} failed: {}",
                        pos.col,
                        pos.row,
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts && self.sweep_config.retry_backoff_ms > 0 {
                        thread::sleep(Duration::from_millis(self.sweep_config.retry_backoff_ms));
                    }
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use crate::planner::plan;
    use crate::types::{CornerSet, StagePoint};
    use tempfile::tempdir;

    fn corners() -> CornerSet {
        CornerSet {
            bottom_left: StagePoint::new(0.0, 0.0, 5.0),
            bottom_right: StagePoint::new(1.0, 0.0, 5.0),
            top_right: StagePoint::new(1.0, 1.0, 5.0),
            top_left: StagePoint::new(0.0, 1.0, 5.0),
        }
    }

    fn fast_config() -> ScannerConfig {
        let mut config = ScannerConfig::default();
        config.focus.probe_settle_ms = 0;
        config.sweep.settle_ms = 0;
        config.sweep.retry_backoff_ms = 0;
        config
    }

    #[test]
    fn test_duplicate_cells_fail_before_any_motion() {
        let config = fast_config();
        let rig = crate::testing::SimulatedRig::new(5.0);
        let mut stage = rig.stage();
        let mut camera = rig.camera();

        let mut positions = plan(&corners(), 1.0, 1.0).unwrap();
        let first = positions[0];
        positions.push(first);

        let dir = tempdir().unwrap();
        let mut report = RegionReport::new("slide", dir.path().to_path_buf(), &positions);
        let mut controller =
            SweepController::new(&mut stage, &mut camera, &config.focus, &config.sweep);

        let result = controller.run(&positions, &mut report);
        assert!(matches!(result, Err(ScanError::Config(_))));
        assert_eq!(rig.moves(), 0);
        assert_eq!(rig.captures(), 0);
    }
}
