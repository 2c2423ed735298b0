//! Configuration management for slidescan.
//!
//! Provides configuration loading, saving, and validation for grid planning,
//! autofocus, sweep behavior, assembly and storage options.

use crate::errors::ScanError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub grid: GridConfig,
    pub focus: FocusConfig,
    pub sweep: SweepConfig,
    pub stitch: StitchConfig,
    pub storage: StorageConfig,
}

/// Grid planning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Grid step along the bottom edge (mm)
    pub step_x_mm: f64,
    /// Grid step along the left edge (mm)
    pub step_y_mm: f64,
}

/// Autofocus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusConfig {
    /// Total Z range probed by the coarse phase, centered on the estimate (mm)
    pub range_mm: f64,
    /// Coarse probe spacing (mm)
    pub coarse_step_mm: f64,
    /// Fine probe spacing around the coarse optimum (mm)
    pub fine_step_mm: f64,
    /// Laplacian-variance score below which focus is not considered found
    pub sharpness_threshold: f64,
    /// Settle delay between a probe move and its capture (ms)
    pub probe_settle_ms: u64,
}

/// When the sweep runs the focus search for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutofocusMode {
    /// Search at every cell before capturing.
    Always,
    /// Capture once at the Z estimate first; search only when that frame
    /// falls below the sharpness threshold.
    BelowThreshold,
    /// Trust the interpolated Z estimate, never search.
    Disabled,
}

/// Sweep behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub autofocus: AutofocusMode,
    /// Settle delay after arriving at a cell, before the first capture (ms)
    pub settle_ms: u64,
    /// Capture retries per cell after the first failed attempt
    pub capture_retries: u32,
    /// Backoff between capture retries (ms)
    pub retry_backoff_ms: u64,
    /// Tile file extension (png, jpg, bmp)
    pub tile_extension: String,
}

/// Grid assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchConfig {
    /// RGB fill for grid cells with no tile
    pub placeholder_color: [u8; 3],
    /// Composite filename written inside the tile directory
    pub output_filename: String,
}

/// Storage and session layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Parent directory for session roots
    pub output_directory: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig {
                step_x_mm: 1.0,
                step_y_mm: 1.0,
            },
            focus: FocusConfig {
                range_mm: 1.0,
                coarse_step_mm: 0.2,
                fine_step_mm: 0.05,
                sharpness_threshold: 30.0,
                probe_settle_ms: 200,
            },
            sweep: SweepConfig {
                autofocus: AutofocusMode::Always,
                settle_ms: 500,
                capture_retries: 2,
                retry_backoff_ms: 250,
                tile_extension: "png".to_string(),
            },
            stitch: StitchConfig {
                placeholder_color: [128, 128, 128],
                output_filename: "composite.png".to_string(),
            },
            storage: StorageConfig {
                output_directory: "./scans".to_string(),
            },
        }
    }
}

impl ScannerConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScanError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScanError::Config(format!("failed to read config file: {}", e)))?;

        let config: ScannerConfig = toml::from_str(&contents)
            .map_err(|e| ScanError::Config(format!("failed to parse config file: {}", e)))?;

        config.validate()?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ScanError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ScanError::Config(format!("failed to create config dir: {}", e)))?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ScanError::Config(format!("failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| ScanError::Config(format!("failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("slidescan.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ScanError> {
        if !(self.grid.step_x_mm > 0.0 && self.grid.step_x_mm.is_finite()) {
            return Err(ScanError::Config("grid step_x_mm must be positive".into()));
        }
        if !(self.grid.step_y_mm > 0.0 && self.grid.step_y_mm.is_finite()) {
            return Err(ScanError::Config("grid step_y_mm must be positive".into()));
        }

        if !(self.focus.range_mm > 0.0 && self.focus.range_mm.is_finite()) {
            return Err(ScanError::Config("focus range_mm must be positive".into()));
        }
        if !(self.focus.coarse_step_mm > 0.0 && self.focus.coarse_step_mm <= self.focus.range_mm) {
            return Err(ScanError::Config(
                "focus coarse_step_mm must be positive and no larger than range_mm".into(),
            ));
        }
        if !(self.focus.fine_step_mm > 0.0 && self.focus.fine_step_mm <= self.focus.coarse_step_mm)
        {
            return Err(ScanError::Config(
                "focus fine_step_mm must be positive and no larger than coarse_step_mm".into(),
            ));
        }
        if self.focus.sharpness_threshold < 0.0 {
            return Err(ScanError::Config(
                "focus sharpness_threshold must be non-negative".into(),
            ));
        }

        if self.sweep.capture_retries > 10 {
            return Err(ScanError::Config(
                "sweep capture_retries must be 10 or fewer".into(),
            ));
        }
        match self.sweep.tile_extension.as_str() {
            "png" | "jpg" | "jpeg" | "bmp" => {}
            other => {
                return Err(ScanError::Config(format!(
                    "unsupported tile extension: {}",
                    other
                )))
            }
        }

        if self.stitch.output_filename.is_empty() {
            return Err(ScanError::Config(
                "stitch output_filename must not be empty".into(),
            ));
        }

        Ok(())
    }
}
