//! Autofocus search.
//!
//! Two-phase hill-climb over stage Z around an anchor position. The coarse
//! phase probes the configured range at coarse spacing; the fine phase
//! probes one coarse step to either side of the coarse optimum at fine
//! spacing. The best probe overall wins and the stage is parked there
//! before the search returns.
//!
//! Probe sharpness comes from the shared Laplacian-variance metric, so the
//! scores are directly comparable with capture verification thresholds.

use crate::config::FocusConfig;
use crate::errors::ScanError;
use crate::hardware::{Camera, Stage};
use crate::quality::laplacian_variance;
use crate::types::FocusResult;
use std::thread;
use std::time::Duration;

/// One probed Z offset (relative to the anchor) and its score. Failed
/// probe captures score negative infinity so they are never selected.
#[derive(Debug, Clone, Copy)]
struct Probe {
    offset: f64,
    score: f64,
}

/// Search for the Z maximizing sharpness near the stage's current position.
///
/// `z_anchor` is the absolute Z the stage currently sits at (the caller's
/// focus estimate); the result reports the absolute best Z. On success the
/// stage is left at the best Z. If every probe capture fails, the stage is
/// returned to the anchor (zero net displacement) and
/// `ScanError::FocusUnavailable` is raised. A single failed probe capture
/// never aborts the search.
pub fn search<S, C>(
    stage: &mut S,
    camera: &mut C,
    z_anchor: f64,
    config: &FocusConfig,
) -> Result<FocusResult, ScanError>
where
    S: Stage + ?Sized,
    C: Camera + ?Sized,
{
    let half = config.range_mm / 2.0;
    let mut current = 0.0;
    let mut probes_taken = 0u32;

    // Coarse phase across [-range/2, +range/2].
    let coarse_offsets = offsets(-half, half, config.coarse_step_mm);
    let mut coarse = Vec::with_capacity(coarse_offsets.len());
    for offset in &coarse_offsets {
        let probe = probe_at(stage, camera, *offset, &mut current, config)?;
        probes_taken += 1;
        coarse.push(probe);
    }

    let coarse_best = best_probe(&coarse);
    let mut all = coarse.clone();

    // Fine phase around the coarse optimum, skipped when nothing scored.
    let mut at_extreme = true;
    if let Some((idx, best)) = coarse_best {
        at_extreme = idx == 0 || idx == coarse.len() - 1;

        let fine_offsets = offsets(
            best.offset - config.coarse_step_mm,
            best.offset + config.coarse_step_mm,
            config.fine_step_mm,
        );
        for offset in &fine_offsets {
            let probe = probe_at(stage, camera, *offset, &mut current, config)?;
            probes_taken += 1;
            all.push(probe);
        }
    }

    match best_probe(&all) {
        None => {
            // Every capture failed: undo the accumulated displacement
            // before reporting, so the caller sees the stage where it
            // left it.
            stage.move_relative_z(-current)?;
            log::error!("All {} focus probes failed to capture", probes_taken);
            Err(ScanError::FocusUnavailable(format!(
                "all {} probe captures failed",
                probes_taken
            )))
        }
        Some((_, best)) => {
            stage.move_relative_z(best.offset - current)?;

            let converged = !at_extreme && best.score >= config.sharpness_threshold;
            let result = FocusResult {
                best_z_mm: z_anchor + best.offset,
                best_sharpness: best.score,
                probes: probes_taken,
                converged,
            };
            log::debug!(
                "Focus search done: best Z {:.3} (sharpness {:.1}, {} probes, converged: {})",
                result.best_z_mm,
                result.best_sharpness,
                result.probes,
                result.converged
            );
            Ok(result)
        }
    }
}

/// Move to `offset` (relative to the anchor), settle, capture and score.
fn probe_at<S, C>(
    stage: &mut S,
    camera: &mut C,
    offset: f64,
    current: &mut f64,
    config: &FocusConfig,
) -> Result<Probe, ScanError>
where
    S: Stage + ?Sized,
    C: Camera + ?Sized,
{
    stage.move_relative_z(offset - *current)?;
    *current = offset;

    if config.probe_settle_ms > 0 {
        thread::sleep(Duration::from_millis(config.probe_settle_ms));
    }

    match camera.capture() {
        Ok(frame) => {
            let score = laplacian_variance(&frame);
            log::debug!("Probe at dz {:+.3}: sharpness {:.1}", offset, score);
            Ok(Probe { offset, score })
        }
        Err(ScanError::Camera(msg)) => {
            log::warn!("Probe capture at dz {:+.3} failed: {}", offset, msg);
            Ok(Probe {
                offset,
                score: f64::NEG_INFINITY,
            })
        }
        Err(other) => Err(other),
    }
}

/// Inclusive range of probe offsets from `start` to `end` at `step` spacing.
fn offsets(start: f64, end: f64, step: f64) -> Vec<f64> {
    let mut out = Vec::new();
    let mut value = start;
    while value <= end + step / 2.0 {
        out.push(value);
        value += step;
    }
    out
}

/// Index and value of the highest-scoring probe that actually captured.
fn best_probe(probes: &[Probe]) -> Option<(usize, Probe)> {
    let mut best: Option<(usize, Probe)> = None;
    for (idx, probe) in probes.iter().enumerate() {
        if probe.score == f64::NEG_INFINITY {
            continue;
        }
        match best {
            Some((_, b)) if b.score >= probe.score => {}
            _ => best = Some((idx, *probe)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::simulated::SimulatedRig;

    fn fast_config() -> FocusConfig {
        FocusConfig {
            range_mm: 1.0,
            coarse_step_mm: 0.2,
            fine_step_mm: 0.05,
            sharpness_threshold: 30.0,
            probe_settle_ms: 0,
        }
    }

    #[test]
    fn test_offsets_cover_range_inclusive() {
        let offs = offsets(-0.5, 0.5, 0.2);
        assert_eq!(offs.len(), 6);
        assert!((offs[0] + 0.5).abs() < 1e-9);
        assert!((offs[5] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_converges_near_focal_plane() {
        let rig = SimulatedRig::new(5.12);
        rig.set_position(10.0, 10.0, 5.0);
        let config = fast_config();

        let result = search(&mut rig.stage(), &mut rig.camera(), 5.0, &config).unwrap();

        assert!(result.converged);
        assert!((result.best_z_mm - 5.12).abs() <= config.fine_step_mm + 1e-9);
        // Stage parked at the reported best Z.
        let (_, _, z) = rig.position();
        assert!((z - result.best_z_mm).abs() < 1e-9);
    }

    #[test]
    fn test_not_converged_when_optimum_at_range_edge() {
        // Focal plane a full millimeter above the anchor, outside the
        // probed +/-0.5mm window.
        let rig = SimulatedRig::new(6.0);
        rig.set_position(0.0, 0.0, 5.0);

        let result = search(&mut rig.stage(), &mut rig.camera(), 5.0, &fast_config()).unwrap();
        assert!(!result.converged);
    }

    #[test]
    fn test_not_converged_below_threshold() {
        let rig = SimulatedRig::new(5.0);
        rig.set_position(0.0, 0.0, 5.0);
        rig.set_flat_scene(true);

        let result = search(&mut rig.stage(), &mut rig.camera(), 5.0, &fast_config()).unwrap();
        assert_eq!(result.best_sharpness, 0.0);
        assert!(!result.converged);
    }

    #[test]
    fn test_single_failed_probe_does_not_abort() {
        let rig = SimulatedRig::new(5.0);
        rig.set_position(0.0, 0.0, 5.0);
        rig.fail_next_captures(1);

        let result = search(&mut rig.stage(), &mut rig.camera(), 5.0, &fast_config()).unwrap();
        assert!((result.best_z_mm - 5.0).abs() <= 0.05 + 1e-9);
    }

    #[test]
    fn test_all_probes_failing_raises_with_zero_net_displacement() {
        let rig = SimulatedRig::new(5.0);
        rig.set_position(2.0, 3.0, 5.0);
        rig.fail_all_captures();

        let result = search(&mut rig.stage(), &mut rig.camera(), 5.0, &fast_config());
        assert!(matches!(result, Err(ScanError::FocusUnavailable(_))));

        let (_, _, z) = rig.position();
        assert!((z - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_connection_loss_propagates() {
        let rig = SimulatedRig::new(5.0);
        rig.set_position(0.0, 0.0, 5.0);
        rig.drop_connection();

        let result = search(&mut rig.stage(), &mut rig.camera(), 5.0, &fast_config());
        assert!(matches!(result, Err(ScanError::ConnectionLost(_))));
    }
}
