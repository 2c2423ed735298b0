//! Scan session layout and summary metadata.
//!
//! A session owns one root directory (named by creation time) with a tile
//! subdirectory per scanned region (`calibration/`, `slide/`) and a single
//! `session_summary.json` recording grid dimensions, per-cell sharpness,
//! skipped cells and timestamps for the whole run.

use crate::errors::ScanError;
use crate::sweep::{CellState, RegionReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const SUMMARY_FILENAME: &str = "session_summary.json";

/// One scan session: a root directory plus the reports of every region
/// swept into it.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub regions: Vec<RegionReport>,
}

impl Session {
    /// Create a fresh session directory under `parent`.
    pub fn create<P: AsRef<Path>>(parent: P) -> Result<Self, ScanError> {
        let started_at = Utc::now();
        let name = format!("scan_session_{}", started_at.format("%Y%m%d_%H%M%S"));
        let root = parent.as_ref().join(&name);

        fs::create_dir_all(&root).map_err(|e| {
            ScanError::Io(format!("failed to create session root {:?}: {}", root, e))
        })?;

        log::info!("Created session {:?}", root);
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            root,
            started_at,
            regions: Vec::new(),
        })
    }

    /// Reopen an existing directory as a session, e.g. for stitch-only runs.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, ScanError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(ScanError::Io(format!(
                "session directory {:?} does not exist",
                root
            )));
        }
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".to_string());
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            root,
            started_at: Utc::now(),
            regions: Vec::new(),
        })
    }

    /// Tile directory for a region of this session.
    pub fn region_dir(&self, region: &str) -> PathBuf {
        self.root.join(region)
    }

    pub fn push_region(&mut self, report: RegionReport) {
        self.regions.push(report);
    }

    /// Write `session_summary.json` into the session root. Safe to call
    /// repeatedly; the summary reflects the regions recorded so far.
    pub fn write_summary(&self) -> Result<PathBuf, ScanError> {
        let path = self.root.join(SUMMARY_FILENAME);
        let summary = SessionSummary::from(self);

        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| ScanError::Io(format!("failed to serialize session summary: {}", e)))?;

        fs::write(&path, json)
            .map_err(|e| ScanError::Io(format!("failed to write {:?}: {}", path, e)))?;

        log::info!("Session summary saved: {:?}", path);
        Ok(path)
    }
}

#[derive(Debug, Serialize)]
struct RegionSummary<'a> {
    #[serde(flatten)]
    report: &'a RegionReport,
    verified: usize,
    skipped: usize,
    pending: usize,
    low_quality: usize,
    skipped_cells: Vec<(u32, u32)>,
}

#[derive(Debug, Serialize)]
struct SessionSummary<'a> {
    session_id: Uuid,
    session_name: &'a str,
    started_at: DateTime<Utc>,
    written_at: DateTime<Utc>,
    regions: Vec<RegionSummary<'a>>,
}

impl<'a> From<&'a Session> for SessionSummary<'a> {
    fn from(session: &'a Session) -> Self {
        let regions = session
            .regions
            .iter()
            .map(|report| RegionSummary {
                report,
                verified: report.count(CellState::Verified),
                skipped: report.count(CellState::Skipped),
                pending: report.count(CellState::Pending),
                low_quality: report.cells.iter().filter(|c| c.low_quality).count(),
                skipped_cells: report
                    .cells
                    .iter()
                    .filter(|c| c.state == CellState::Skipped)
                    .map(|c| (c.col, c.row))
                    .collect(),
            })
            .collect();

        Self {
            session_id: session.id,
            session_name: &session.name,
            started_at: session.started_at,
            written_at: Utc::now(),
            regions,
        }
    }
}
