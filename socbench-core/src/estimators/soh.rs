//! State of Health from Completed Half Cycles
//!
//! ## Method
//!
//! A healthy cell moves `swing/100 × nominal_Ah` of charge to change SoC by
//! `swing` percent. A faded cell gets there with less, because its real
//! capacity is smaller. Comparing both over a large swing gives the fade
//! ratio:
//!
//! ```text
//! fade = |Δnet_charge_Ah| / (swing_pct / 100 × nominal_Ah)
//! soh  = clamp(α·fade·100 + (1 - α)·soh, 0, 100)     (first cycle: fade·100)
//! ```
//!
//! SoC swings are taken from the Kalman estimate, which is anchored to voltage
//! and does not drift with current sensor offset. Charge comes from the
//! coulomb counter's raw integral.
//!
//! ## Extremum Detection
//!
//! ```text
//! soc
//!  ▲      peak (confirmed once soc falls `hysteresis` below it)
//!  │     ╱╲
//!  │    ╱  ╲╱╲        noise smaller than the hysteresis is ignored
//!  │   ╱      ╲
//!  │  ╱        ╲   ╱
//!  │ ╱          ╲_╱  trough
//!  └─────────────────────→ t
//! ```
//!
//! A swing shorter than `min_cycle_swing_pct` still moves the reference
//! extremum but does not update SoH.

use serde::{Deserialize, Serialize};

use crate::{
    constants::battery::{
        CYCLE_HISTORY_LEN, DEFAULT_MIN_CYCLE_SWING_PCT, DEFAULT_SOH_HYSTERESIS_PCT,
        DEFAULT_SOH_SMOOTHING,
    },
    time::Timestamp,
};

/// SoH tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SohConfig {
    /// Reversal needed to confirm an extremum (%)
    pub hysteresis_pct: f32,
    /// Smallest swing counted as a cycle (%)
    pub min_cycle_swing_pct: f32,
    /// Weight of the newest fade ratio, 0-1
    pub smoothing: f32,
}

impl Default for SohConfig {
    fn default() -> Self {
        Self {
            hysteresis_pct: DEFAULT_SOH_HYSTERESIS_PCT,
            min_cycle_swing_pct: DEFAULT_MIN_CYCLE_SWING_PCT,
            smoothing: DEFAULT_SOH_SMOOTHING,
        }
    }
}

/// Kind of confirmed extremum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtremumKind {
    /// Local SoC maximum
    Peak,
    /// Local SoC minimum
    Trough,
}

/// Direction SoC is moving in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Not enough movement yet
    #[default]
    Unknown,
    /// Charging
    Rising,
    /// Discharging
    Falling,
}

/// Sample at a (candidate) extremum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleMark {
    /// Reading timestamp
    pub timestamp: Timestamp,
    /// Kalman SoC at the extremum (%)
    pub soc_pct: f32,
    /// Coulomb counting SoC at the extremum (%)
    pub soc_cc_pct: f32,
    /// Raw charge integral at the extremum (Ah)
    pub net_charge_ah: f64,
}

/// Confirmed extremum kept in the cycle history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    /// Peak or trough
    pub kind: ExtremumKind,
    /// Where it happened
    pub mark: CycleMark,
}

/// Per-battery SoH state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SohState {
    /// Smoothed SoH (%)
    pub soh_pct: f32,
    /// Current direction
    pub trend: Trend,
    /// Running maximum since the last confirmed trough
    pub peak: Option<CycleMark>,
    /// Running minimum since the last confirmed peak
    pub trough: Option<CycleMark>,
    /// Most recent confirmed extrema, oldest first
    pub history: heapless::Vec<Extremum, CYCLE_HISTORY_LEN>,
    /// Cycles that updated SoH
    pub cycles_completed: u32,
}

impl SohState {
    /// Fresh state at 100 %
    pub fn new() -> Self {
        Self {
            soh_pct: 100.0,
            trend: Trend::Unknown,
            peak: None,
            trough: None,
            history: heapless::Vec::new(),
            cycles_completed: 0,
        }
    }

    /// Last confirmed extremum
    pub fn last_extremum(&self) -> Option<&Extremum> {
        self.history.last()
    }

    fn remember(&mut self, extremum: Extremum) {
        if self.history.is_full() {
            self.history.remove(0);
        }
        // Room was just made
        let _ = self.history.push(extremum);
    }
}

impl Default for SohState {
    fn default() -> Self {
        Self::new()
    }
}

/// One reading as seen by the SoH estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SohInput {
    /// Reading timestamp
    pub timestamp: Timestamp,
    /// Coulomb counting SoC (%)
    pub soc_cc_pct: f32,
    /// Kalman SoC (%)
    pub soc_kf_pct: f32,
    /// Raw charge integral (Ah)
    pub net_charge_ah: f64,
}

/// Half cycle that updated SoH
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletedCycle {
    /// SoC swing between the two extrema (%)
    pub swing_pct: f32,
    /// Charge passed between the two extrema (Ah)
    pub charge_ah: f32,
    /// Charge passed relative to the rated charge for the swing
    pub fade_ratio: f32,
}

/// SoH result for one reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SohEstimate {
    /// Smoothed SoH (%)
    pub soh_pct: f32,
    /// Cycle completed by this reading
    pub cycle: Option<CompletedCycle>,
}

/// SoH estimator for one battery profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SohEstimator {
    config: SohConfig,
    nominal_capacity_ah: f32,
}

impl SohEstimator {
    /// Create for a rated capacity
    pub fn new(config: SohConfig, nominal_capacity_ah: f32) -> Self {
        Self {
            config,
            nominal_capacity_ah,
        }
    }

    /// Feed one reading
    pub fn update(&self, state: &mut SohState, input: SohInput) -> SohEstimate {
        let sample = CycleMark {
            timestamp: input.timestamp,
            soc_pct: input.soc_kf_pct,
            soc_cc_pct: input.soc_cc_pct,
            net_charge_ah: input.net_charge_ah,
        };
        let h = self.config.hysteresis_pct.max(0.0);

        let confirmed = match state.trend {
            Trend::Unknown => {
                let peak = *state.peak.get_or_insert(sample);
                let trough = *state.trough.get_or_insert(sample);
                if sample.soc_pct > peak.soc_pct {
                    state.peak = Some(sample);
                }
                if sample.soc_pct < trough.soc_pct {
                    state.trough = Some(sample);
                }

                if sample.soc_pct >= trough.soc_pct + h && h > 0.0 {
                    state.trend = Trend::Rising;
                    state.peak = Some(sample);
                    Some(Extremum {
                        kind: ExtremumKind::Trough,
                        mark: trough,
                    })
                } else if sample.soc_pct <= peak.soc_pct - h && h > 0.0 {
                    state.trend = Trend::Falling;
                    state.trough = Some(sample);
                    Some(Extremum {
                        kind: ExtremumKind::Peak,
                        mark: peak,
                    })
                } else {
                    None
                }
            }
            Trend::Rising => {
                let peak = *state.peak.get_or_insert(sample);
                if sample.soc_pct > peak.soc_pct {
                    state.peak = Some(sample);
                    None
                } else if sample.soc_pct <= peak.soc_pct - h {
                    state.trend = Trend::Falling;
                    state.trough = Some(sample);
                    Some(Extremum {
                        kind: ExtremumKind::Peak,
                        mark: peak,
                    })
                } else {
                    None
                }
            }
            Trend::Falling => {
                let trough = *state.trough.get_or_insert(sample);
                if sample.soc_pct < trough.soc_pct {
                    state.trough = Some(sample);
                    None
                } else if sample.soc_pct >= trough.soc_pct + h {
                    state.trend = Trend::Rising;
                    state.peak = Some(sample);
                    Some(Extremum {
                        kind: ExtremumKind::Trough,
                        mark: trough,
                    })
                } else {
                    None
                }
            }
        };

        let cycle = confirmed.and_then(|extremum| self.confirm(state, extremum));
        SohEstimate {
            soh_pct: state.soh_pct,
            cycle,
        }
    }

    fn confirm(&self, state: &mut SohState, extremum: Extremum) -> Option<CompletedCycle> {
        let previous = state.last_extremum().copied();
        state.remember(extremum);

        let previous = previous?;
        let swing_pct = (extremum.mark.soc_pct - previous.mark.soc_pct).abs();
        if swing_pct < self.config.min_cycle_swing_pct || swing_pct <= 0.0 {
            return None;
        }
        if !(self.nominal_capacity_ah.is_finite() && self.nominal_capacity_ah > 0.0) {
            return None;
        }

        let charge_ah = (extremum.mark.net_charge_ah - previous.mark.net_charge_ah).abs() as f32;
        let expected_ah = swing_pct / 100.0 * self.nominal_capacity_ah;
        let fade_ratio = charge_ah / expected_ah;
        let measured_pct = fade_ratio * 100.0;

        let alpha = self.config.smoothing.clamp(0.0, 1.0);
        let smoothed = if state.cycles_completed == 0 {
            measured_pct
        } else {
            alpha * measured_pct + (1.0 - alpha) * state.soh_pct
        };
        state.soh_pct = smoothed.clamp(0.0, 100.0);
        state.cycles_completed = state.cycles_completed.saturating_add(1);

        log::debug!(
            "SoH cycle: swing {:.1}%, {:.2} Ah passed, fade {:.3}, SoH {:.1}%",
            swing_pct,
            charge_ah,
            fade_ratio,
            state.soh_pct
        );

        Some(CompletedCycle {
            swing_pct,
            charge_ah,
            fade_ratio,
        })
    }
}
