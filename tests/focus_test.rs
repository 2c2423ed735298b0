//! Focus search tests against the simulated rig.
//!
//! The simulated camera's sharpness is unimodal in Z with its peak at the
//! rig's focal plane, which makes convergence claims checkable exactly.

use slidescan::config::FocusConfig;
use slidescan::errors::ScanError;
use slidescan::focus;
use slidescan::testing::SimulatedRig;

fn config() -> FocusConfig {
    FocusConfig {
        range_mm: 1.0,
        coarse_step_mm: 0.2,
        fine_step_mm: 0.05,
        sharpness_threshold: 30.0,
        probe_settle_ms: 0,
    }
}

#[test]
fn unimodal_scene_converges_within_one_fine_step() {
    // True optimum at 5.13, between coarse probes.
    let rig = SimulatedRig::new(5.13);
    rig.set_position(10.0, 20.0, 5.0);

    let result = focus::search(&mut rig.stage(), &mut rig.camera(), 5.0, &config()).unwrap();

    assert!(result.converged);
    assert!(
        (result.best_z_mm - 5.13).abs() <= config().fine_step_mm + 1e-9,
        "best Z {} too far from optimum",
        result.best_z_mm
    );
    assert!(result.best_sharpness > 30.0);
}

#[test]
fn stage_is_parked_at_best_z() {
    let rig = SimulatedRig::new(4.95);
    rig.set_position(0.0, 0.0, 5.0);

    let result = focus::search(&mut rig.stage(), &mut rig.camera(), 5.0, &config()).unwrap();
    let (_, _, z) = rig.position();
    assert!((z - result.best_z_mm).abs() < 1e-9);
}

#[test]
fn probe_count_covers_both_phases() {
    let rig = SimulatedRig::new(5.0);
    rig.set_position(0.0, 0.0, 5.0);

    let result = focus::search(&mut rig.stage(), &mut rig.camera(), 5.0, &config()).unwrap();

    // Coarse: 6 probes over [-0.5, 0.5] at 0.2mm. Fine: 9 over +/-0.2 at
    // 0.05mm around the coarse optimum.
    assert_eq!(result.probes, 15);
    assert_eq!(rig.captures(), 15);
}

#[test]
fn optimum_outside_range_reports_not_converged() {
    let rig = SimulatedRig::new(7.0);
    rig.set_position(0.0, 0.0, 5.0);

    let result = focus::search(&mut rig.stage(), &mut rig.camera(), 5.0, &config()).unwrap();
    assert!(!result.converged);
}

#[test]
fn featureless_scene_reports_not_converged() {
    let rig = SimulatedRig::new(5.0);
    rig.set_position(0.0, 0.0, 5.0);
    rig.set_flat_scene(true);

    let result = focus::search(&mut rig.stage(), &mut rig.camera(), 5.0, &config()).unwrap();
    assert!(!result.converged);
    assert_eq!(result.best_sharpness, 0.0);
}

#[test]
fn transient_probe_failures_are_tolerated() {
    let rig = SimulatedRig::new(5.0);
    rig.set_position(0.0, 0.0, 5.0);
    rig.fail_next_captures(3);

    let result = focus::search(&mut rig.stage(), &mut rig.camera(), 5.0, &config()).unwrap();
    assert!((result.best_z_mm - 5.0).abs() <= 0.05 + 1e-9);
}

#[test]
fn all_probes_failing_raises_focus_unavailable_with_no_net_motion() {
    let rig = SimulatedRig::new(5.0);
    rig.set_position(1.0, 2.0, 5.0);
    rig.fail_all_captures();

    let result = focus::search(&mut rig.stage(), &mut rig.camera(), 5.0, &config());
    assert!(matches!(result, Err(ScanError::FocusUnavailable(_))));

    let (x, y, z) = rig.position();
    assert_eq!((x, y), (1.0, 2.0));
    assert!((z - 5.0).abs() < 1e-9, "net Z displacement must be zero");
}

#[test]
fn lost_connection_propagates_as_fatal() {
    let rig = SimulatedRig::new(5.0);
    rig.set_position(0.0, 0.0, 5.0);
    rig.drop_connection();

    let result = focus::search(&mut rig.stage(), &mut rig.camera(), 5.0, &config());
    assert!(matches!(result, Err(ScanError::ConnectionLost(_))));
}
