//! Hardware capability boundary.
//!
//! The core never speaks a wire protocol. It consumes exactly two
//! capabilities: a [`Stage`] that moves and a [`Camera`] that captures.
//! Real serial/USB drivers and the simulated backends in
//! [`crate::testing`] implement the same traits, so sweep, focus and
//! assembly logic run unchanged against either.

use crate::errors::ScanError;
use crate::types::Frame;

/// A motorized 3-axis positioning stage.
///
/// Both move operations block until the stage acknowledges arrival.
/// Implementations report `ScanError::StageTimeout` when the
/// acknowledgement does not arrive in time and `ScanError::ConnectionLost`
/// when the link itself is gone.
pub trait Stage {
    /// Absolute move in stage millimeters.
    fn move_to(&mut self, x: f64, y: f64, z: f64) -> Result<(), ScanError>;

    /// Relative Z move, used by the focus search for micro-steps.
    fn move_relative_z(&mut self, dz: f64) -> Result<(), ScanError>;

    /// Last commanded position.
    fn position(&self) -> (f64, f64, f64);
}

/// A camera delivering one frame per request.
///
/// Blocks on sensor exposure and transfer. `ScanError::Camera` marks a
/// transient per-frame failure; `ScanError::ConnectionLost` marks a dead
/// device.
pub trait Camera {
    fn capture(&mut self) -> Result<Frame, ScanError>;
}
