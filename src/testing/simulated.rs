//! Simulated stage and camera backends.
//!
//! A [`SimulatedRig`] couples one stage and one camera through shared state:
//! the camera's output sharpness depends on how far the stage Z sits from a
//! configured focal plane, so focus searches and full sweeps behave
//! realistically offline. Failure modes (capture failures, move timeouts,
//! lost connections) are scriptable per rig.

use crate::errors::ScanError;
use crate::hardware::{Camera, Stage};
use crate::testing::synthetic_data::{checkerboard_frame, flat_frame};
use crate::types::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Frame dimensions produced by the simulated camera.
pub const SIM_FRAME_WIDTH: u32 = 64;
pub const SIM_FRAME_HEIGHT: u32 = 48;

struct RigState {
    x: f64,
    y: f64,
    z: f64,
    focal_z: f64,
    flat_scene: bool,
    moves: u32,
    z_moves: u32,
    captures: u32,
    fail_captures: u32,
    fail_all_captures: bool,
    timeout_moves: u32,
    connection_lost: bool,
    lose_connection_after: Option<u32>,
    trip_stop: Option<(u32, Arc<AtomicBool>)>,
}

/// Shared simulated hardware: hand its [`SimulatedStage`] and
/// [`SimulatedCamera`] to the code under test, script failures through the
/// rig handle, and inspect motion/capture counters afterwards.
#[derive(Clone)]
pub struct SimulatedRig {
    state: Arc<Mutex<RigState>>,
}

impl SimulatedRig {
    /// A rig whose camera is sharpest when the stage Z equals `focal_z`.
    pub fn new(focal_z: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                focal_z,
                flat_scene: false,
                moves: 0,
                z_moves: 0,
                captures: 0,
                fail_captures: 0,
                fail_all_captures: false,
                timeout_moves: 0,
                connection_lost: false,
                lose_connection_after: None,
                trip_stop: None,
            })),
        }
    }

    pub fn stage(&self) -> SimulatedStage {
        SimulatedStage {
            state: Arc::clone(&self.state),
        }
    }

    pub fn camera(&self) -> SimulatedCamera {
        SimulatedCamera {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().expect("lock poisoned")
    }

    pub fn position(&self) -> (f64, f64, f64) {
        let s = self.lock();
        (s.x, s.y, s.z)
    }

    pub fn set_position(&self, x: f64, y: f64, z: f64) {
        let mut s = self.lock();
        s.x = x;
        s.y = y;
        s.z = z;
    }

    /// Number of absolute moves acknowledged so far.
    pub fn moves(&self) -> u32 {
        self.lock().moves
    }

    /// Number of relative Z moves acknowledged so far.
    pub fn z_moves(&self) -> u32 {
        self.lock().z_moves
    }

    /// Number of capture attempts, successful or not.
    pub fn captures(&self) -> u32 {
        self.lock().captures
    }

    /// Fail the next `n` capture attempts with a camera error.
    pub fn fail_next_captures(&self, n: u32) {
        self.lock().fail_captures = n;
    }

    /// Fail every capture attempt from now on.
    pub fn fail_all_captures(&self) {
        self.lock().fail_all_captures = true;
    }

    /// Time out the next `n` absolute moves.
    pub fn timeout_next_moves(&self, n: u32) {
        self.lock().timeout_moves = n;
    }

    /// Drop the connection: every subsequent hardware call fails fatally.
    pub fn drop_connection(&self) {
        self.lock().connection_lost = true;
    }

    /// Drop the connection once the capture counter reaches `after`.
    /// Deterministic hook for mid-sweep connection-loss tests.
    pub fn lose_connection_after_captures(&self, after: u32) {
        self.lock().lose_connection_after = Some(after);
    }

    /// Replace the scene with a featureless one (sharpness 0 at any Z).
    pub fn set_flat_scene(&self, flat: bool) {
        self.lock().flat_scene = flat;
    }

    /// Set `flag` once the capture counter reaches `after_captures`.
    /// Deterministic hook for cancellation tests.
    pub fn trip_stop_after_captures(&self, after_captures: u32, flag: Arc<AtomicBool>) {
        self.lock().trip_stop = Some((after_captures, flag));
    }
}

pub struct SimulatedStage {
    state: Arc<Mutex<RigState>>,
}

impl Stage for SimulatedStage {
    fn move_to(&mut self, x: f64, y: f64, z: f64) -> Result<(), ScanError> {
        let mut s = self.state.lock().expect("lock poisoned");
        if s.connection_lost {
            return Err(ScanError::ConnectionLost("stage link down".to_string()));
        }
        if s.timeout_moves > 0 {
            s.timeout_moves -= 1;
            return Err(ScanError::StageTimeout(format!(
                "no arrival ack for move to ({:.3}, {:.3}, {:.3})",
                x, y, z
            )));
        }
        s.x = x;
        s.y = y;
        s.z = z;
        s.moves += 1;
        Ok(())
    }

    fn move_relative_z(&mut self, dz: f64) -> Result<(), ScanError> {
        let mut s = self.state.lock().expect("lock poisoned");
        if s.connection_lost {
            return Err(ScanError::ConnectionLost("stage link down".to_string()));
        }
        s.z += dz;
        s.z_moves += 1;
        Ok(())
    }

    fn position(&self) -> (f64, f64, f64) {
        let s = self.state.lock().expect("lock poisoned");
        (s.x, s.y, s.z)
    }
}

pub struct SimulatedCamera {
    state: Arc<Mutex<RigState>>,
}

impl Camera for SimulatedCamera {
    fn capture(&mut self) -> Result<Frame, ScanError> {
        let mut s = self.state.lock().expect("lock poisoned");
        if s.connection_lost {
            return Err(ScanError::ConnectionLost("camera link down".to_string()));
        }

        s.captures += 1;
        if let Some((after, flag)) = &s.trip_stop {
            if s.captures >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if let Some(after) = s.lose_connection_after {
            if s.captures > after {
                s.connection_lost = true;
                return Err(ScanError::ConnectionLost("camera link down".to_string()));
            }
        }

        if s.fail_all_captures {
            return Err(ScanError::Camera("sensor returned no frame".to_string()));
        }
        if s.fail_captures > 0 {
            s.fail_captures -= 1;
            return Err(ScanError::Camera("sensor returned no frame".to_string()));
        }

        if s.flat_scene {
            return Ok(flat_frame(SIM_FRAME_WIDTH, SIM_FRAME_HEIGHT, 128));
        }

        // Contrast falls off with defocus distance; the Laplacian variance
        // of the resulting checkerboard is strictly unimodal in Z with its
        // peak at the focal plane.
        let defocus = s.z - s.focal_z;
        let amplitude = 220.0 / (1.0 + (defocus / 0.08).powi(2));
        Ok(checkerboard_frame(
            SIM_FRAME_WIDTH,
            SIM_FRAME_HEIGHT,
            amplitude.clamp(2.0, 220.0) as u8,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::laplacian_variance;

    #[test]
    fn test_sharpness_peaks_at_focal_plane() {
        let rig = SimulatedRig::new(5.0);
        let mut camera = rig.camera();

        rig.set_position(0.0, 0.0, 5.0);
        let in_focus = laplacian_variance(&camera.capture().unwrap());

        rig.set_position(0.0, 0.0, 5.4);
        let defocused = laplacian_variance(&camera.capture().unwrap());

        assert!(in_focus > defocused);
    }

    #[test]
    fn test_scripted_capture_failures() {
        let rig = SimulatedRig::new(5.0);
        let mut camera = rig.camera();

        rig.fail_next_captures(2);
        assert!(matches!(camera.capture(), Err(ScanError::Camera(_))));
        assert!(matches!(camera.capture(), Err(ScanError::Camera(_))));
        assert!(camera.capture().is_ok());
        assert_eq!(rig.captures(), 3);
    }

    #[test]
    fn test_move_timeout_leaves_position_unchanged() {
        let rig = SimulatedRig::new(5.0);
        let mut stage = rig.stage();

        stage.move_to(1.0, 1.0, 1.0).unwrap();
        rig.timeout_next_moves(1);
        assert!(matches!(
            stage.move_to(9.0, 9.0, 9.0),
            Err(ScanError::StageTimeout(_))
        ));
        assert_eq!(rig.position(), (1.0, 1.0, 1.0));
    }

    #[test]
    fn test_dropped_connection_is_fatal_everywhere() {
        let rig = SimulatedRig::new(5.0);
        let mut stage = rig.stage();
        let mut camera = rig.camera();

        rig.drop_connection();
        assert!(matches!(
            stage.move_to(0.0, 0.0, 0.0),
            Err(ScanError::ConnectionLost(_))
        ));
        assert!(matches!(
            stage.move_relative_z(0.1),
            Err(ScanError::ConnectionLost(_))
        ));
        assert!(matches!(
            camera.capture(),
            Err(ScanError::ConnectionLost(_))
        ));
    }
}
