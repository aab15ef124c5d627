//! SoC and SoH Estimators
//!
//! Three independent ways to answer "how full is this battery":
//!
//! - **OCV** (`ocv`): read SoC off the calibration curve when the cell rests.
//!   Accurate at rest, blind under load.
//! - **Coulomb counting** (`coulomb`): integrate current. Smooth and cheap,
//!   drifts with sensor offset until re-anchored.
//! - **Kalman filter** (`kalman`): predict with coulomb counting, correct with
//!   the voltage model. Costs a 2×2 covariance update per reading.
//!
//! plus `soh`, which turns completed charge/discharge swings into a capacity
//! fade estimate.
//!
//! ## Estimator Contract
//!
//! Estimators are stateless configuration objects. Everything that evolves per
//! battery lives in an explicit `State` value owned by the battery slot, which
//! keeps estimators shareable across threads and lets the evaluation harness
//! measure each state's serialized footprint.
//!
//! ```text
//!            ┌─────────────┐
//! input ───→ │  Estimator  │ ───→ output
//!            │  (config)   │
//!            └──────┬──────┘
//!                   │ &mut
//!              ┌────▼────┐
//!              │  State  │  (per battery, serialized for size)
//!              └─────────┘
//! ```
//!
//! SoC values are percent, always within 0-100.

use serde::Serialize;

use crate::{
    errors::{EstimationError, EstimationResult},
    harness::Algorithm,
};

/// Coulomb counting
pub mod coulomb;
/// Kalman filter over `[soc, polarization voltage]`
pub mod kalman;
/// Open-circuit voltage lookup
pub mod ocv;
/// State of health from completed cycles
pub mod soh;

pub use coulomb::{CcEstimate, CcInput, CoulombCounter, CoulombState};
pub use kalman::{KalmanConfig, KalmanEstimator, KalmanState, KfEstimate, KfInput};
pub use ocv::{OcvEstimate, OcvEstimator, OcvInput, OcvState};
pub use soh::{CompletedCycle, CycleMark, SohConfig, SohEstimate, SohEstimator, SohInput, SohState};

/// A SoC estimator the evaluation harness can wrap
pub trait Estimator {
    /// Per-battery state, serialized to measure its footprint
    type State: Serialize;

    /// Per-reading input
    type Input;

    /// Result of one step
    type Output;

    /// Which scorecard this estimator reports to
    const ALGORITHM: Algorithm;

    /// Advance `state` by one reading
    fn step(&self, state: &mut Self::State, input: Self::Input) -> Self::Output;
}

/// Clamp a SoC value to 0-100 %
pub fn clamp_soc(soc_pct: f32) -> f32 {
    soc_pct.clamp(0.0, 100.0)
}

/// Reject capacities that cannot be integrated against
pub fn usable_capacity(capacity_ah: f32) -> EstimationResult<f32> {
    if capacity_ah.is_finite() && capacity_ah > 0.0 {
        Ok(capacity_ah)
    } else {
        Err(EstimationError::CapacityMisconfigured { capacity_ah })
    }
}
