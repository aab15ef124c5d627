//! Engine Configuration
//!
//! One JSON document configures everything. Every section is optional and
//! falls back to the defaults in [`crate::constants`]:
//!
//! ```json
//! {
//!   "default_profile": { "capacity_ah": 100.0, "internal_resistance_ohm": 0.0015 },
//!   "batteries": {
//!     "pack-7": { "capacity_ah": 80.0 }
//!   },
//!   "normalizer": { "max_dt_s": 30.0, "current_convention": "positive_discharge" },
//!   "kalman": { "gate_sigma": 4.0 },
//!   "workers": 4
//! }
//! ```
//!
//! A battery listed under `batteries` gets the default profile with the listed
//! fields replaced. Capacity is not checked here: a bad capacity
//! only stops the affected battery, and `reconfigure_battery` can fix it at
//! runtime.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    constants::battery::{
        DEFAULT_CAPACITY_AH, DEFAULT_INITIAL_SOC_PCT, DEFAULT_INTERNAL_RESISTANCE_OHM,
        DEFAULT_REST_CURRENT_THRESHOLD_A, DEFAULT_REST_SETTLE_MS,
    },
    errors::{ConfigError, ConfigResult},
    estimators::{KalmanConfig, SohConfig},
    harness::HarnessConfig,
    lookup::OcvTable,
    normalizer::NormalizerConfig,
    publisher::PublisherConfig,
    reading::BatteryId,
};

/// Per-battery physical parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryProfile {
    /// Nominal capacity (Ah)
    pub capacity_ah: f32,
    /// Ohmic resistance R0 (Ω)
    pub internal_resistance_ohm: f32,
    /// SoC assumed when the first reading is not at rest (%)
    pub initial_soc_pct: f32,
    /// Current magnitude below which the battery may be at rest (A)
    pub rest_current_threshold_a: f32,
    /// Time below the threshold before OCV is trusted (ms)
    pub rest_settle_ms: u64,
    /// Calibration table, the built-in NMC curve when absent
    pub ocv_table: Option<OcvTable>,
}

impl Default for BatteryProfile {
    fn default() -> Self {
        Self {
            capacity_ah: DEFAULT_CAPACITY_AH,
            internal_resistance_ohm: DEFAULT_INTERNAL_RESISTANCE_OHM,
            initial_soc_pct: DEFAULT_INITIAL_SOC_PCT,
            rest_current_threshold_a: DEFAULT_REST_CURRENT_THRESHOLD_A,
            rest_settle_ms: DEFAULT_REST_SETTLE_MS,
            ocv_table: None,
        }
    }
}

impl BatteryProfile {
    /// Set capacity
    pub fn with_capacity(mut self, capacity_ah: f32) -> Self {
        self.capacity_ah = capacity_ah;
        self
    }

    /// Set ohmic resistance
    pub fn with_internal_resistance(mut self, ohm: f32) -> Self {
        self.internal_resistance_ohm = ohm;
        self
    }

    /// Set rest detection
    pub fn with_rest(mut self, threshold_a: f32, settle_ms: u64) -> Self {
        self.rest_current_threshold_a = threshold_a;
        self.rest_settle_ms = settle_ms;
        self
    }

    /// Set calibration table
    pub fn with_table(mut self, table: OcvTable) -> Self {
        self.ocv_table = Some(table);
        self
    }

    /// Calibration table in effect
    pub fn table(&self) -> OcvTable {
        self.ocv_table.clone().unwrap_or_default()
    }

    /// Check everything except capacity
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.internal_resistance_ohm.is_finite() || self.internal_resistance_ohm < 0.0 {
            return invalid("profile.internal_resistance_ohm", "must be finite and >= 0");
        }
        if !(0.0..=100.0).contains(&self.initial_soc_pct) {
            return invalid("profile.initial_soc_pct", "must be within 0-100");
        }
        if !self.rest_current_threshold_a.is_finite() || self.rest_current_threshold_a < 0.0 {
            return invalid("profile.rest_current_threshold_a", "must be finite and >= 0");
        }
        Ok(())
    }
}

/// Fields a single battery may override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileOverride {
    /// Nominal capacity (Ah)
    pub capacity_ah: Option<f32>,
    /// Ohmic resistance R0 (Ω)
    pub internal_resistance_ohm: Option<f32>,
    /// Initial SoC (%)
    pub initial_soc_pct: Option<f32>,
    /// Rest threshold (A)
    pub rest_current_threshold_a: Option<f32>,
    /// Rest settle time (ms)
    pub rest_settle_ms: Option<u64>,
    /// Calibration table
    pub ocv_table: Option<OcvTable>,
}

impl ProfileOverride {
    /// Apply on top of `base`
    pub fn apply(&self, base: &BatteryProfile) -> BatteryProfile {
        BatteryProfile {
            capacity_ah: self.capacity_ah.unwrap_or(base.capacity_ah),
            internal_resistance_ohm: self
                .internal_resistance_ohm
                .unwrap_or(base.internal_resistance_ohm),
            initial_soc_pct: self.initial_soc_pct.unwrap_or(base.initial_soc_pct),
            rest_current_threshold_a: self
                .rest_current_threshold_a
                .unwrap_or(base.rest_current_threshold_a),
            rest_settle_ms: self.rest_settle_ms.unwrap_or(base.rest_settle_ms),
            ocv_table: self.ocv_table.clone().or_else(|| base.ocv_table.clone()),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocConfig {
    /// Profile for batteries without an override
    pub default_profile: BatteryProfile,
    /// Overrides keyed by battery id
    pub batteries: BTreeMap<String, ProfileOverride>,
    /// Input limits and sign convention
    pub normalizer: NormalizerConfig,
    /// Filter tuning
    pub kalman: KalmanConfig,
    /// Cycle detection and smoothing
    pub soh: SohConfig,
    /// Scoring and scorecard history
    pub harness: HarnessConfig,
    /// Sink delivery
    pub publisher: PublisherConfig,
    /// Threads used by batch ingestion
    pub workers: usize,
}

impl Default for SocConfig {
    fn default() -> Self {
        Self {
            default_profile: BatteryProfile::default(),
            batteries: BTreeMap::new(),
            normalizer: NormalizerConfig::default(),
            kalman: KalmanConfig::default(),
            soh: SohConfig::default(),
            harness: HarnessConfig::default(),
            publisher: PublisherConfig::default(),
            workers: default_workers(),
        }
    }
}

impl SocConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Effective profile for a battery
    pub fn profile_for(&self, battery_id: &BatteryId) -> BatteryProfile {
        match self.batteries.get(battery_id.as_str()) {
            Some(overrides) => overrides.apply(&self.default_profile),
            None => self.default_profile.clone(),
        }
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> ConfigResult<()> {
        self.default_profile.validate()?;
        for (id, overrides) in &self.batteries {
            BatteryId::new(id).map_err(|_| ConfigError::Invalid {
                field: "batteries",
                reason: "key is not a valid battery id",
            })?;
            overrides.apply(&self.default_profile).validate()?;
        }

        let n = &self.normalizer;
        if !n.max_dt_s.is_finite() || n.max_dt_s <= 0.0 {
            return invalid("normalizer.max_dt_s", "must be finite and > 0");
        }
        if !n.min_voltage_v.is_finite() || !n.max_voltage_v().is_finite() {
            return invalid("normalizer.min_voltage_v", "voltage bounds must be finite");
        }
        if n.min_voltage_v >= n.max_voltage_v() {
            return invalid("normalizer.max_voltage_factor", "upper voltage bound must exceed the lower");
        }
        if !n.max_current_a.is_finite() || n.max_current_a <= 0.0 {
            return invalid("normalizer.max_current_a", "must be finite and > 0");
        }

        let k = &self.kalman;
        if !k.measurement_noise.is_finite() || k.measurement_noise <= 0.0 {
            return invalid("kalman.measurement_noise", "must be finite and > 0");
        }
        let non_negative = [
            (k.soc_process_noise, "kalman.soc_process_noise"),
            (k.polarization_process_noise, "kalman.polarization_process_noise"),
            (k.initial_soc_variance, "kalman.initial_soc_variance"),
            (k.initial_polarization_variance, "kalman.initial_polarization_variance"),
            (k.polarization_time_constant_s, "kalman.polarization_time_constant_s"),
            (k.polarization_resistance_ohm, "kalman.polarization_resistance_ohm"),
        ];
        for (value, field) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return invalid(field, "must be finite and >= 0");
            }
        }
        if !k.gate_sigma.is_finite() || k.gate_sigma <= 0.0 {
            return invalid("kalman.gate_sigma", "must be finite and > 0");
        }
        if k.max_consecutive_rejections == 0 {
            return invalid("kalman.max_consecutive_rejections", "must be at least 1");
        }

        let s = &self.soh;
        if !(0.0..=1.0).contains(&s.smoothing) {
            return invalid("soh.smoothing", "must be within 0-1");
        }
        if !s.hysteresis_pct.is_finite() || s.hysteresis_pct < 0.0 {
            return invalid("soh.hysteresis_pct", "must be finite and >= 0");
        }
        if !(s.min_cycle_swing_pct > 0.0 && s.min_cycle_swing_pct <= 100.0) {
            return invalid("soh.min_cycle_swing_pct", "must be within (0, 100]");
        }

        if !self.harness.stale_error_penalty.is_finite() || self.harness.stale_error_penalty < 0.0
        {
            return invalid("harness.stale_error_penalty", "must be finite and >= 0");
        }
        if self.harness.history_capacity == 0 {
            return invalid("harness.history_capacity", "must be at least 1");
        }
        if self.publisher.max_attempts == 0 {
            return invalid("publisher.max_attempts", "must be at least 1");
        }
        if self.workers == 0 {
            return invalid("workers", "must be at least 1");
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigResult<()> {
    Err(ConfigError::Invalid { field, reason })
}
