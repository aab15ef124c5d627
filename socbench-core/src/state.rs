//! Per-Battery Estimation State
//!
//! Everything the core remembers about one battery, grouped by estimator so
//! each estimator's footprint can be serialized and measured on its own:
//!
//! ```text
//! BatteryState
//! ├── ocv       rest tracking, held SoC, calibration table
//! ├── coulomb   remaining charge, net charge integral
//! ├── kalman    [soc, vp], 2x2 covariance, rejection counter
//! ├── soh       trend, extremum candidates, cycle history
//! ├── capacity_ah      capacity the coulomb accumulator is scaled to
//! └── last_timestamp   strictly increasing
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    config::BatteryProfile,
    estimators::{CoulombState, KalmanState, OcvState, SohState},
    reading::BatteryId,
    time::Timestamp,
};

/// Estimation state for one battery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    /// OCV estimator state
    pub ocv: OcvState,
    /// Coulomb counter state
    pub coulomb: CoulombState,
    /// Kalman filter state
    pub kalman: KalmanState,
    /// SoH estimator state
    pub soh: SohState,
    /// Capacity the accumulator currently refers to (Ah)
    pub capacity_ah: f32,
    /// Last accepted reading
    pub last_timestamp: Timestamp,
}

impl BatteryState {
    /// Kalman SoC (%)
    pub fn soc_kf(&self) -> f32 {
        self.kalman.soc_pct()
    }

    /// Coulomb counting SoC (%)
    pub fn soc_cc(&self) -> f32 {
        self.coulomb.soc_pct(self.capacity_ah)
    }

    /// Last rest-based SoC (%)
    pub fn soc_ocv(&self) -> f32 {
        self.ocv.last_soc_pct
    }

    /// Smoothed SoH (%)
    pub fn soh_pct(&self) -> f32 {
        self.soh.soh_pct
    }
}

/// Point-in-time copy of a battery for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    /// Battery
    pub battery_id: BatteryId,
    /// Profile in effect
    pub profile: BatteryProfile,
    /// Estimation state, `None` until a reading was accepted
    pub state: Option<BatteryState>,
    /// Scorecard records held
    pub history_len: usize,
}
