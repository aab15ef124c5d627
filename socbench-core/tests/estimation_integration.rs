//! End-to-end estimation behaviour through the engine
//!
//! Covers:
//! - SoC bounds and covariance health over full cycles
//! - Coulomb counting accuracy and OCV re-anchoring
//! - Kalman convergence and the divergence gate
//! - SoH tracking over a synthetic cycle

#[macro_use]
mod common;

use socbench_core::{
    config::BatteryProfile,
    constants::kalman::DEFAULT_MAX_CONSECUTIVE_REJECTIONS,
    harness::Algorithm,
    matrix::is_positive_semidefinite,
    BatteryId, EngineEvent, OcvTable, RawReading,
};

use common::{count_events, engine, engine_with, ingest_all, CellSimulator};

fn id(s: &str) -> BatteryId {
    BatteryId::new(s).unwrap()
}

/// Profile that never detects rest, so only the Kalman filter sees voltage
fn no_rest_profile() -> BatteryProfile {
    BatteryProfile::default().with_rest(0.0, 0)
}

#[test]
fn soc_stays_bounded_over_full_cycles() {
    let engine = engine();
    let mut cell = CellSimulator::new("bounds", 100.0, 90.0).with_noise(0.005);

    let mut readings = vec![cell.sample(0.0)];
    for _ in 0..2 {
        readings.extend(cell.run_to(2.0, -40.0, 60_000));
        readings.extend(cell.rest(10_000, 10));
        readings.extend(cell.run_to(98.0, 40.0, 60_000));
        readings.extend(cell.rest(10_000, 10));
    }

    for processed in ingest_all(&engine, &readings) {
        for soc in [processed.soc_ocv, processed.soc_cc, processed.soc_kf] {
            assert!((0.0..=100.0).contains(&soc), "soc {} out of range", soc);
        }
    }

    let state = engine.battery_snapshot(&id("bounds")).unwrap().state.unwrap();
    assert!(is_positive_semidefinite(&state.kalman.p));
    assert_eq!(state.kalman.p[0][1], state.kalman.p[1][0]);
}

#[test]
fn coulomb_counting_is_exact_for_constant_current() {
    let engine = engine();

    // Charging at 5 A is never rest, so the counter starts at the default 50 %
    let first = engine.ingest(&RawReading::new("cc", 0, 3.72, 5.0)).unwrap();
    assert_eq!(first.soc_cc, 50.0);

    let mut last = first;
    for step in 1..=360u64 {
        last = engine
            .ingest(&RawReading::new("cc", step * 10_000, 3.72, 5.0))
            .unwrap();
    }

    assert_within_tolerance!(last.soc_cc, 55.0, 0.01);
}

#[test]
fn fresh_rest_reading_re_anchors_coulomb_counter() {
    let engine = engine();
    let mut cell = CellSimulator::new("recal", 100.0, 80.0);

    // First reading under load: no OCV seed, counter starts at 50 %
    engine.ingest(&cell.sample(-20.0)).unwrap();
    let loaded = ingest_all(&engine, &cell.constant(-20.0, 60_000, 30));
    assert_within_tolerance!(loaded.last().unwrap().soc_cc, 40.0, 0.01);

    let rest = ingest_all(&engine, &cell.rest(10_000, 8));

    // Settle period of 60 s starts at the first rest reading
    for processed in &rest[..6] {
        assert!(processed.eval_metrics[Algorithm::Ocv.index()].stale);
        assert_within_tolerance!(processed.soc_cc, 40.0, 0.01);
    }
    let fresh = &rest[6];
    assert!(!fresh.eval_metrics[Algorithm::Ocv.index()].stale);
    assert_within_tolerance!(fresh.soc_ocv, 70.0, 1.0);
    assert_within_tolerance!(fresh.soc_cc, fresh.soc_ocv, 1e-3);

    // Fresh OCV is the reference, so OCV scores zero error
    assert_eq!(fresh.eval_metrics[Algorithm::Ocv.index()].error_index, 0.0);
}

#[test]
fn kalman_converges_from_wrong_seed() {
    let engine = engine_with(no_rest_profile());
    let mut cell = CellSimulator::new("kf", 100.0, 70.0);

    engine.ingest(&cell.sample(0.0)).unwrap();
    assert!(matches!(
        engine.drain_events().as_slice(),
        [EngineEvent::BatteryRegistered {
            seeded_from_ocv: false,
            initial_soc_pct,
            ..
        }] if *initial_soc_pct == 50.0
    ));

    let processed = ingest_all(&engine, &cell.rest(10_000, 20));
    let last = processed.last().unwrap();
    assert!(processed.iter().all(|p| p.kf_update_accepted));
    assert_within_tolerance!(last.soc_kf, 70.0, 1.0);
}

#[test]
fn kalman_recovers_from_far_off_seed() {
    let engine = engine();
    let rest_v = OcvTable::default().voltage_at(95.0);

    // First seen under load, so seeded at the default 50 %
    let first = engine.ingest(&RawReading::new("far", 0, 4.10, -20.0)).unwrap();
    assert!(!first.kf_update_accepted);

    let rest: Vec<_> = (1..=30u64)
        .map(|k| RawReading::new("far", k * 10_000, rest_v, 0.0))
        .collect();
    let processed = ingest_all(&engine, &rest);

    let events = engine.drain_events();
    assert_eq!(count_events(&events, "covariance_reset"), 1);

    // The load reading plus 9 rest readings hit the limit; the reset
    // re-seeds and every later update is accepted
    let after_reset = DEFAULT_MAX_CONSECUTIVE_REJECTIONS as usize - 1;
    assert!(!processed[after_reset - 1].kf_update_accepted);
    assert!(processed[after_reset..].iter().all(|p| p.kf_update_accepted));

    let last = processed.last().unwrap();
    assert_within_tolerance!(last.soc_kf, 95.0, 1.0);
    assert_within_tolerance!(last.soc_kf, last.soc_ocv, 1.0);
    assert_within_tolerance!(last.soc_cc, 95.0, 0.01);
}

#[test]
fn divergence_gate_keeps_prediction() {
    let engine = engine_with(no_rest_profile());
    let mut cell = CellSimulator::new("gate", 100.0, 60.0);

    ingest_all(&engine, &[cell.sample(0.0)]);
    let settled = ingest_all(&engine, &cell.rest(10_000, 20));
    let before = settled.last().unwrap().soc_kf;
    engine.drain_events();

    let wild = engine
        .ingest(&RawReading::new("gate", cell.timestamp + 10_000, 12.0, 0.0))
        .unwrap();
    assert!(!wild.kf_update_accepted);
    // Zero current, so the prediction is the previous SoC
    assert_eq!(wild.soc_kf, before);

    let events = engine.drain_events();
    assert!(matches!(
        events.as_slice(),
        [EngineEvent::DivergenceDetected { consecutive: 1, .. }]
    ));
}

#[test]
fn repeated_rejections_reset_covariance() {
    let engine = engine_with(no_rest_profile());
    engine.ingest(&RawReading::new("reset", 0, 3.72, 0.0)).unwrap();

    for step in 1..=DEFAULT_MAX_CONSECUTIVE_REJECTIONS as u64 {
        let processed = engine
            .ingest(&RawReading::new("reset", step * 10_000, 12.0, 0.0))
            .unwrap();
        assert!(!processed.kf_update_accepted);
    }

    let events = engine.drain_events();
    assert_eq!(
        count_events(&events, "divergence_detected"),
        DEFAULT_MAX_CONSECUTIVE_REJECTIONS as usize
    );
    assert_eq!(count_events(&events, "covariance_reset"), 1);

    let state = engine.battery_snapshot(&id("reset")).unwrap().state.unwrap();
    assert_eq!(state.kalman.consecutive_rejections, 0);
    assert!(is_positive_semidefinite(&state.kalman.p));
}

#[test]
fn soh_holds_for_healthy_cell() {
    let engine = engine();
    let mut cell = CellSimulator::new("soh", 100.0, 95.0);

    let first = engine.ingest(&cell.sample(0.0)).unwrap();
    assert_within_tolerance!(first.soc_kf, 95.0, 0.01);

    ingest_all(&engine, &cell.run_to(5.0, -20.0, 60_000));
    let charged = ingest_all(&engine, &cell.run_to(20.0, 20.0, 60_000));

    let cycles: Vec<_> = engine
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::CycleCompleted {
                swing_pct,
                fade_ratio,
                ..
            } => Some((swing_pct, fade_ratio)),
            _ => None,
        })
        .collect();
    assert_eq!(cycles.len(), 1, "cycles: {:?}", cycles);

    let (swing_pct, fade_ratio) = cycles[0];
    assert!(swing_pct >= 80.0);
    assert_within_tolerance!(fade_ratio, 1.0, 0.1);

    let soh = charged.last().unwrap().soh_pct;
    assert!((90.0..=100.0).contains(&soh), "soh = {}", soh);

    let state = engine.battery_snapshot(&id("soh")).unwrap().state.unwrap();
    assert_eq!(state.soh.cycles_completed, 1);
    assert!(state.soh.history.len() >= 2);
}

#[test]
fn reconfigured_capacity_keeps_soc() {
    let engine = engine();
    let mut cell = CellSimulator::new("resize", 100.0, 60.0);

    engine.ingest(&cell.sample(-10.0)).unwrap();
    let before = ingest_all(&engine, &cell.constant(-10.0, 60_000, 10));
    let soc_before = before.last().unwrap().soc_cc;

    engine
        .reconfigure_battery(&id("resize"), BatteryProfile::default().with_capacity(50.0))
        .unwrap();

    let snapshot = engine.battery_snapshot(&id("resize")).unwrap();
    assert_eq!(snapshot.profile.capacity_ah, 50.0);
    let state = snapshot.state.unwrap();
    assert_eq!(state.capacity_ah, 50.0);
    assert_within_tolerance!(state.soc_cc(), soc_before, 1e-3);

    // Same current now moves SoC twice as fast
    let after = engine.ingest(&cell.step(-10.0, 60_000)).unwrap();
    let per_step_before = before[0].soc_cc - before[1].soc_cc;
    assert_within_tolerance!(soc_before - after.soc_cc, 2.0 * per_step_before, 1e-3);
}
