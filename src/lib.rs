//! slidescan: automated microscope slide digitization on a motorized stage.
//!
//! This crate plans a coverage grid over a quadrilateral region in stage
//! coordinates, drives a 3-axis stage to every grid cell, autofocuses,
//! captures a tile per cell and assembles the captured tiles into one
//! composite image.
//!
//! # Features
//! - Bilinear grid planning over arbitrary (non-rectangular, tilted)
//!   quadrilaterals
//! - Two-phase autofocus driven by Laplacian-variance sharpness
//! - Per-cell retry and skip policy; one bad cell never stops the batch
//! - Gap-tolerant grid assembly with deterministic output
//! - Hardware behind two small capability traits, with simulated backends
//!   for offline use
//!
//! # Usage
//! ```rust,no_run
//! use slidescan::config::ScannerConfig;
//! use slidescan::sweep::{RegionReport, SweepController};
//! use slidescan::testing::SimulatedRig;
//! use slidescan::types::CornerSet;
//!
//! let config = ScannerConfig::default();
//! let corners = CornerSet::load_from_file("slide_corners.json")?;
//! let positions = slidescan::planner::plan(&corners, 1.0, 1.0)?;
//!
//! let rig = SimulatedRig::new(corners.bottom_left.z);
//! let (mut stage, mut camera) = (rig.stage(), rig.camera());
//! let mut report = RegionReport::new("slide", "tiles".into(), &positions);
//! SweepController::new(&mut stage, &mut camera, &config.focus, &config.sweep)
//!     .run(&positions, &mut report)?;
//! # Ok::<(), slidescan::errors::ScanError>(())
//! ```

pub mod config;
pub mod errors;
pub mod focus;
pub mod hardware;
pub mod planner;
pub mod quality;
pub mod stitch;
pub mod sweep;
pub mod types;

// Testing utilities - synthetic data and simulated hardware for offline use
pub mod testing;

// Re-exports for convenience
pub use config::ScannerConfig;
pub use errors::ScanError;
pub use hardware::{Camera, Stage};
pub use types::{CornerSet, FocusResult, Frame, GridPosition, StagePoint};

/// Initialize logging for the scanner
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "slidescan=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_metadata() {
        assert_eq!(NAME, "slidescan");
        assert!(!VERSION.is_empty());
        assert!(!DESCRIPTION.is_empty());
    }
}
