//! Testing utilities for slidescan.
//!
//! Provides synthetic frame generators and simulated stage/camera backends
//! implementing the hardware capability traits, enabling sweep, focus and
//! assembly logic to run offline without physical hardware.

pub mod simulated;
pub mod synthetic_data;

pub use simulated::{SimulatedCamera, SimulatedRig, SimulatedStage};
pub use synthetic_data::{checkerboard_frame, flat_frame, gradient_frame};
