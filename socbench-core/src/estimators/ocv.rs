//! Open-Circuit Voltage Estimator
//!
//! Terminal voltage equals OCV only once the cell has relaxed, so a reading is
//! trusted only after the current stayed below the rest threshold for the
//! settle period:
//!
//! ```text
//! |I|  ▲
//!      │████████                         ████
//!  thr ┼────────┼───────────────────┼─────────
//!      │        ▼ rest_since        ▼ settled
//!      └────────┴──── settle_ms ────┴───────→ t
//!         stale       stale           fresh   stale
//! ```
//!
//! Outside a settled rest the last rest-based value is held and flagged
//! stale. The estimator never reacts to load.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    estimators::Estimator, harness::Algorithm, lookup::OcvTable, time::Timestamp,
};

/// Rest detection settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcvEstimator {
    rest_current_threshold_a: f32,
    rest_settle_ms: u64,
}

impl OcvEstimator {
    /// Create with a rest threshold (A) and settle time (ms)
    pub fn new(rest_current_threshold_a: f32, rest_settle_ms: u64) -> Self {
        Self {
            rest_current_threshold_a: rest_current_threshold_a.abs(),
            rest_settle_ms,
        }
    }

    /// Current small enough to count as rest
    pub fn is_resting(&self, current_a: f32) -> bool {
        current_a.abs() < self.rest_current_threshold_a
    }
}

/// Per-battery OCV state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcvState {
    /// Calibration curve, shared between batteries with the same profile
    pub table: Arc<OcvTable>,
    /// Start of the current rest period
    pub rest_since: Option<Timestamp>,
    /// Last rest-based SoC, held while not at rest (%)
    pub last_soc_pct: f32,
    /// Voltage of the last fresh reading
    pub last_rest_voltage: Option<f32>,
    /// Timestamp of the last fresh reading
    pub last_rest_timestamp: Option<Timestamp>,
}

impl OcvState {
    /// New state holding `initial_soc_pct` until the first settled rest
    pub fn new(table: Arc<OcvTable>, initial_soc_pct: f32) -> Self {
        Self {
            table,
            rest_since: None,
            last_soc_pct: initial_soc_pct,
            last_rest_voltage: None,
            last_rest_timestamp: None,
        }
    }
}

/// One reading as seen by the OCV estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcvInput {
    /// Reading timestamp
    pub timestamp: Timestamp,
    /// Terminal voltage
    pub voltage_v: f32,
    /// Current, either sign convention
    pub current_a: f32,
}

/// OCV estimate for one reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcvEstimate {
    /// SoC (%)
    pub soc_pct: f32,
    /// Held value, not measured at a settled rest
    pub stale: bool,
    /// Voltage was outside the table and clamped
    pub clamped: bool,
}

impl OcvEstimate {
    /// Fresh value suitable for re-anchoring other estimators
    pub fn fresh_soc(&self) -> Option<f32> {
        (!self.stale).then_some(self.soc_pct)
    }
}

impl Estimator for OcvEstimator {
    type State = OcvState;
    type Input = OcvInput;
    type Output = OcvEstimate;

    const ALGORITHM: Algorithm = Algorithm::Ocv;

    fn step(&self, state: &mut OcvState, input: OcvInput) -> OcvEstimate {
        let held = OcvEstimate {
            soc_pct: state.last_soc_pct,
            stale: true,
            clamped: false,
        };

        if !self.is_resting(input.current_a) {
            state.rest_since = None;
            return held;
        }

        let since = *state.rest_since.get_or_insert(input.timestamp);
        if input.timestamp.saturating_sub(since) < self.rest_settle_ms {
            return held;
        }

        let (soc_pct, clamped) = state.table.soc_at(input.voltage_v);
        state.last_soc_pct = soc_pct;
        state.last_rest_voltage = Some(input.voltage_v);
        state.last_rest_timestamp = Some(input.timestamp);

        OcvEstimate {
            soc_pct,
            stale: false,
            clamped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(timestamp: Timestamp, voltage_v: f32, current_a: f32) -> OcvInput {
        OcvInput {
            timestamp,
            voltage_v,
            current_a,
        }
    }

    fn state() -> OcvState {
        OcvState::new(Arc::new(OcvTable::default_nmc()), 50.0)
    }

    #[test]
    fn fresh_after_settle_period() {
        let estimator = OcvEstimator::new(0.5, 60_000);
        let mut state = state();

        // Rest starts, not settled yet
        let first = estimator.step(&mut state, input(0, 3.85, 0.1));
        assert!(first.stale);
        assert_eq!(first.soc_pct, 50.0);

        let early = estimator.step(&mut state, input(30_000, 3.85, 0.1));
        assert!(early.stale);

        let settled = estimator.step(&mut state, input(60_000, 3.85, -0.1));
        assert!(!settled.stale);
        assert_eq!(settled.soc_pct, 70.0);
        assert_eq!(settled.fresh_soc(), Some(70.0));
        assert_eq!(state.last_rest_voltage, Some(3.85));
        assert_eq!(state.last_rest_timestamp, Some(60_000));
    }

    #[test]
    fn holds_value_under_load() {
        let estimator = OcvEstimator::new(0.5, 0);
        let mut state = state();

        let rest = estimator.step(&mut state, input(0, 3.72, 0.0));
        assert_eq!(rest.soc_pct, 50.0);
        assert!(!rest.stale);

        // Voltage sags under load, estimate does not move
        let loaded = estimator.step(&mut state, input(1_000, 3.60, -40.0));
        assert!(loaded.stale);
        assert_eq!(loaded.soc_pct, 50.0);
        assert_eq!(loaded.fresh_soc(), None);
        assert_eq!(state.rest_since, None);
    }

    #[test]
    fn load_restarts_settle_timer() {
        let estimator = OcvEstimator::new(0.5, 10_000);
        let mut state = state();

        estimator.step(&mut state, input(0, 3.72, 0.0));
        estimator.step(&mut state, input(5_000, 3.70, 10.0));
        let after_load = estimator.step(&mut state, input(12_000, 3.72, 0.0));
        assert!(after_load.stale);
        assert_eq!(state.rest_since, Some(12_000));

        let settled = estimator.step(&mut state, input(22_000, 3.72, 0.0));
        assert!(!settled.stale);
    }

    #[test]
    fn clamps_out_of_table_voltage() {
        let estimator = OcvEstimator::new(0.5, 0);
        let mut state = state();

        let high = estimator.step(&mut state, input(0, 4.35, 0.0));
        assert_eq!(high.soc_pct, 100.0);
        assert!(high.clamped);

        let low = estimator.step(&mut state, input(1_000, 2.7, 0.0));
        assert_eq!(low.soc_pct, 0.0);
        assert!(low.clamped);
    }
}
