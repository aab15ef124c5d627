//! Per-Battery Estimation Pipeline
//!
//! Runs the estimators for one accepted reading, in dependency order:
//!
//! ```text
//! NormalizedReading
//!        │
//!        ├──→ OCV ──── fresh soc? ──┐
//!        │                          ▼
//!        ├──→ Coulomb counter (re-anchors first)
//!        ├──→ Kalman filter
//!        │
//!        └──→ SoH (soc_kf extrema, net charge)
//!                   │
//!                   ▼
//!            EvalHarness::score → [EvalMetrics; 3]
//! ```
//!
//! Every estimator runs on every reading. A step either commits all state
//! changes or none: the estimators work on a copy that replaces the stored
//! state only when the whole step succeeded.

use std::sync::Arc;

use crate::{
    config::BatteryProfile,
    errors::EstimationResult,
    estimators::{
        usable_capacity, CcEstimate, CcInput, CoulombCounter, CoulombState, KalmanConfig,
        KalmanEstimator, KalmanState, KfEstimate, KfInput, OcvEstimate, OcvEstimator, OcvInput,
        OcvState, SohConfig, SohEstimate, SohEstimator, SohInput, SohState,
    },
    harness::{EvalHarness, EvalMetrics},
    lookup::OcvTable,
    reading::NormalizedReading,
    state::BatteryState,
};

/// Results of one pipeline step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// OCV estimate
    pub ocv: OcvEstimate,
    /// Coulomb counting estimate
    pub cc: CcEstimate,
    /// Kalman estimate
    pub kf: KfEstimate,
    /// SoH estimate
    pub soh: SohEstimate,
    /// Scorecards in `[ocv, cc, kf]` order
    pub metrics: [EvalMetrics; 3],
}

/// Initial state of a newly seen battery
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// Fresh state
    pub state: BatteryState,
    /// Seed came from the OCV table
    pub seeded_from_ocv: bool,
    /// Seed SoC (%)
    pub initial_soc_pct: f32,
}

/// Estimators configured for one battery profile
#[derive(Debug, Clone)]
pub struct BatteryPipeline {
    ocv: OcvEstimator,
    coulomb: CoulombCounter,
    kalman: KalmanEstimator,
    soh: SohEstimator,
    table: Arc<OcvTable>,
    capacity_ah: f32,
    initial_soc_pct: f32,
}

impl BatteryPipeline {
    /// Configure estimators for a profile
    pub fn new(profile: &BatteryProfile, kalman: KalmanConfig, soh: SohConfig) -> Self {
        Self {
            ocv: OcvEstimator::new(profile.rest_current_threshold_a, profile.rest_settle_ms),
            coulomb: CoulombCounter::new(profile.capacity_ah),
            kalman: KalmanEstimator::new(kalman, profile.capacity_ah, profile.internal_resistance_ohm),
            soh: SohEstimator::new(soh, profile.capacity_ah),
            table: Arc::new(profile.table()),
            capacity_ah: profile.capacity_ah,
            initial_soc_pct: profile.initial_soc_pct,
        }
    }

    /// Configured capacity (Ah)
    pub fn capacity_ah(&self) -> f32 {
        self.capacity_ah
    }

    /// Calibration table
    pub fn table(&self) -> &Arc<OcvTable> {
        &self.table
    }

    /// Kalman tuning in use
    pub fn kalman_config(&self) -> &KalmanConfig {
        self.kalman.config()
    }

    /// Build state for a battery's first reading
    ///
    /// A first reading below the rest threshold seeds SoC from the table
    /// without waiting for the settle period; anything else starts from the
    /// profile's initial SoC.
    pub fn register(&self, reading: &NormalizedReading) -> EstimationResult<Registration> {
        let capacity_ah = usable_capacity(self.capacity_ah)?;

        let seeded_from_ocv = self.ocv.is_resting(reading.current_a);
        let initial_soc_pct = if seeded_from_ocv {
            self.table.soc_at(reading.voltage_v).0
        } else {
            self.initial_soc_pct
        };

        let state = BatteryState {
            ocv: OcvState::new(self.table.clone(), initial_soc_pct),
            coulomb: CoulombState::new(initial_soc_pct, capacity_ah),
            kalman: KalmanState::new(initial_soc_pct, self.kalman.config()),
            soh: SohState::new(),
            capacity_ah,
            last_timestamp: reading.timestamp,
        };

        Ok(Registration {
            state,
            seeded_from_ocv,
            initial_soc_pct,
        })
    }

    /// Adopt this pipeline's capacity and table in existing state
    ///
    /// The coulomb accumulator keeps its SoC. An unusable capacity leaves the
    /// state untouched; estimation refuses to run until it is fixed.
    pub fn adopt(&self, state: &mut BatteryState) {
        state.ocv.table = self.table.clone();
        if usable_capacity(self.capacity_ah).is_ok() {
            state.coulomb.rescale(state.capacity_ah, self.capacity_ah);
            state.capacity_ah = self.capacity_ah;
        }
    }

    /// Run all estimators for one reading
    pub fn step(
        &self,
        harness: &EvalHarness,
        state: &mut BatteryState,
        reading: &NormalizedReading,
    ) -> EstimationResult<StepOutcome> {
        let mut next = state.clone();

        let ocv = harness.run(
            &self.ocv,
            &mut next.ocv,
            OcvInput {
                timestamp: reading.timestamp,
                voltage_v: reading.voltage_v,
                current_a: reading.current_a,
            },
        );

        let cc = harness
            .run(
                &self.coulomb,
                &mut next.coulomb,
                CcInput {
                    current_a: reading.current_a,
                    dt_s: reading.dt_s,
                    anchor_soc_pct: ocv.output.fresh_soc(),
                },
            )
            .transpose()?;

        let kf = harness
            .run(
                &self.kalman,
                &mut next.kalman,
                KfInput {
                    voltage_v: reading.voltage_v,
                    current_a: reading.current_a,
                    dt_s: reading.dt_s,
                    table: self.table.clone(),
                },
            )
            .transpose()?;

        let soh = self.soh.update(
            &mut next.soh,
            SohInput {
                timestamp: reading.timestamp,
                soc_cc_pct: cc.output.soc_pct,
                soc_kf_pct: kf.output.soc_pct,
                net_charge_ah: next.coulomb.net_charge_ah,
            },
        );

        let metrics = harness.score(&ocv, &cc, &kf);
        next.last_timestamp = reading.timestamp;
        *state = next;

        Ok(StepOutcome {
            ocv: ocv.output,
            cc: cc.output,
            kf: kf.output,
            soh,
            metrics,
        })
    }
}
