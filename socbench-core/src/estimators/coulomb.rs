//! Coulomb Counting
//!
//! ```text
//! soc' = clamp(soc + (I·dt / 3600) / capacity_Ah × 100, 0, 100)
//! ```
//!
//! The accumulator holds remaining charge in Ah as `f64`, so long runs of
//! small increments do not lose precision. A fresh OCV reading re-anchors it
//! before integrating. Drift between anchors is not detected here; it only
//! shows up in the scorecard error index.
//!
//! `net_charge_ah` integrates the same current but is never clamped or
//! re-anchored, giving the SoH estimator the true charge passed between two
//! points in time.

use serde::{Deserialize, Serialize};

use crate::{
    constants::time::SECONDS_PER_HOUR,
    errors::EstimationResult,
    estimators::{clamp_soc, usable_capacity, Estimator},
    harness::Algorithm,
};

/// Coulomb counter for one battery profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoulombCounter {
    capacity_ah: f32,
}

impl CoulombCounter {
    /// Create for a rated capacity
    pub fn new(capacity_ah: f32) -> Self {
        Self { capacity_ah }
    }

    /// Configured capacity
    pub fn capacity_ah(&self) -> f32 {
        self.capacity_ah
    }
}

/// Per-battery coulomb counting state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoulombState {
    /// Remaining charge (Ah), within `[0, capacity]`
    pub accumulator_ah: f64,
    /// Signed charge passed since registration (Ah), positive while charging
    pub net_charge_ah: f64,
}

impl CoulombState {
    /// State at `soc_pct` of `capacity_ah`
    pub fn new(soc_pct: f32, capacity_ah: f32) -> Self {
        Self {
            accumulator_ah: charge_at(soc_pct, capacity_ah),
            net_charge_ah: 0.0,
        }
    }

    /// SoC for a capacity (%)
    pub fn soc_pct(&self, capacity_ah: f32) -> f32 {
        if capacity_ah > 0.0 {
            clamp_soc((self.accumulator_ah / capacity_ah as f64 * 100.0) as f32)
        } else {
            0.0
        }
    }

    /// Keep SoC constant across a capacity change
    ///
    /// Both capacities must be usable; otherwise the accumulator is left alone.
    pub fn rescale(&mut self, old_capacity_ah: f32, new_capacity_ah: f32) {
        if usable_capacity(old_capacity_ah).is_err() || usable_capacity(new_capacity_ah).is_err() {
            return;
        }
        let soc = self.soc_pct(old_capacity_ah);
        self.accumulator_ah = charge_at(soc, new_capacity_ah);
    }
}

fn charge_at(soc_pct: f32, capacity_ah: f32) -> f64 {
    clamp_soc(soc_pct) as f64 / 100.0 * capacity_ah.max(0.0) as f64
}

/// One reading as seen by the coulomb counter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CcInput {
    /// Current, positive while charging
    pub current_a: f32,
    /// Integration step (s), already clamped
    pub dt_s: f32,
    /// Fresh OCV SoC to re-anchor to before integrating
    pub anchor_soc_pct: Option<f32>,
}

/// Coulomb counting result for one reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CcEstimate {
    /// SoC after integration (%)
    pub soc_pct: f32,
    /// The accumulator was re-anchored to OCV
    pub recalibrated: bool,
    /// SoC before this step (%)
    pub previous_soc_pct: f32,
}

impl Estimator for CoulombCounter {
    type State = CoulombState;
    type Input = CcInput;
    type Output = EstimationResult<CcEstimate>;

    const ALGORITHM: Algorithm = Algorithm::Cc;

    fn step(&self, state: &mut CoulombState, input: CcInput) -> EstimationResult<CcEstimate> {
        let capacity_ah = usable_capacity(self.capacity_ah)?;
        let previous_soc_pct = state.soc_pct(capacity_ah);

        let recalibrated = match input.anchor_soc_pct {
            Some(anchor) => {
                log::debug!(
                    "Coulomb counter re-anchored {:.2}% → {:.2}%",
                    previous_soc_pct,
                    anchor
                );
                state.accumulator_ah = charge_at(anchor, capacity_ah);
                true
            }
            None => false,
        };

        let delta_ah = input.current_a as f64 * input.dt_s.max(0.0) as f64 / SECONDS_PER_HOUR as f64;
        state.accumulator_ah = (state.accumulator_ah + delta_ah).clamp(0.0, capacity_ah as f64);
        state.net_charge_ah += delta_ah;

        Ok(CcEstimate {
            soc_pct: state.soc_pct(capacity_ah),
            recalibrated,
            previous_soc_pct,
        })
    }
}
