//! Telemetry Records Flowing Through the Core
//!
//! ```text
//! RawReading ──normalize──→ NormalizedReading ──estimate──→ ProcessedReading
//!  (producer)                 (canonical sign, dt)           (3 × SoC, SoH, scorecards)
//! ```
//!
//! Field names on the wire follow the dashboard's existing records
//! (`batteryId`, `voltage_V`, `current_A`, `soc_kf`, ...), so the processed
//! stream can be stored next to data the dashboard already understands.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    constants::battery::MAX_BATTERY_ID_LEN,
    errors::{ReadingError, ReadingResult},
    harness::EvalMetrics,
    time::Timestamp,
};

/// Battery identifier stored inline
///
/// Ids longer than `MAX_BATTERY_ID_LEN` bytes are rejected by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatteryId(heapless::String<MAX_BATTERY_ID_LEN>);

impl BatteryId {
    /// Create from string slice
    pub fn new(id: &str) -> ReadingResult<Self> {
        if id.trim().is_empty() {
            return Err(ReadingError::InvalidBatteryId { reason: "empty" });
        }

        let mut inline = heapless::String::new();
        inline
            .push_str(id)
            .map_err(|_| ReadingError::InvalidBatteryId { reason: "too long" })?;
        Ok(Self(inline))
    }

    /// Get as string slice
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for BatteryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One telemetry sample as supplied by the ingestion layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    /// Producer's battery name
    #[serde(rename = "batteryId")]
    pub battery_id: String,
    /// Sample time in milliseconds
    pub timestamp: Timestamp,
    /// Terminal voltage
    #[serde(rename = "voltage_V")]
    pub voltage_v: f32,
    /// Current in the producer's sign convention
    #[serde(rename = "current_A")]
    pub current_a: f32,
}

impl RawReading {
    /// Create a reading with current in amps
    pub fn new(battery_id: impl Into<String>, timestamp: Timestamp, voltage_v: f32, current_a: f32) -> Self {
        Self {
            battery_id: battery_id.into(),
            timestamp,
            voltage_v,
            current_a,
        }
    }

    /// Create a reading from a producer that reports milliamps
    pub fn from_milliamps(
        battery_id: impl Into<String>,
        timestamp: Timestamp,
        voltage_v: f32,
        current_ma: f32,
    ) -> Self {
        Self::new(battery_id, timestamp, voltage_v, current_ma / 1000.0)
    }
}

/// Reading accepted by the normalizer
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReading {
    /// Validated battery id
    pub battery_id: BatteryId,
    /// Sample time in milliseconds
    pub timestamp: Timestamp,
    /// Terminal voltage
    pub voltage_v: f32,
    /// Current, positive while charging
    pub current_a: f32,
    /// Seconds since the previous accepted reading, clamped; zero for the first
    pub dt_s: f32,
    /// The gap was longer than the integration limit
    pub dt_clamped: bool,
}

impl NormalizedReading {
    /// Electrical power in milliwatts, positive while charging
    pub fn power_mw(&self) -> f32 {
        self.voltage_v * self.current_a * 1000.0
    }
}

/// Which SoC estimate a consumer wants to show
///
/// Only selects a value for display. All three estimators run on every reading
/// regardless, so the scorecards stay comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayAlgorithm {
    /// Kalman filter estimate
    #[default]
    Kalman,
    /// Open-circuit voltage lookup
    Ocv,
    /// Coulomb counting
    #[serde(rename = "cc")]
    CoulombCounting,
}

/// Enriched record emitted once per accepted reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedReading {
    /// Sample time in milliseconds
    pub timestamp: Timestamp,
    /// Battery the reading belongs to
    #[serde(rename = "batteryId")]
    pub battery_id: BatteryId,
    /// Terminal voltage
    #[serde(rename = "voltage_V")]
    pub voltage_v: f32,
    /// Current, positive while charging
    #[serde(rename = "current_A")]
    pub current_a: f32,
    /// Electrical power, positive while charging
    #[serde(rename = "power_mW")]
    pub power_mw: f32,
    /// Kalman filter SoC (%)
    pub soc_kf: f32,
    /// Open-circuit voltage SoC (%)
    pub soc_ocv: f32,
    /// Coulomb counting SoC (%)
    pub soc_cc: f32,
    /// State of health (% of rated capacity)
    pub soh_pct: f32,
    /// False when the divergence guard rejected this measurement update
    #[serde(rename = "kfUpdateAccepted")]
    pub kf_update_accepted: bool,
    /// Scorecards in `[ocv, cc, kf]` order
    #[serde(rename = "evalMetrics")]
    pub eval_metrics: [EvalMetrics; 3],
}

impl ProcessedReading {
    /// SoC selected by a display toggle
    pub fn displayed_soc(&self, algorithm: DisplayAlgorithm) -> f32 {
        match algorithm {
            DisplayAlgorithm::Kalman => self.soc_kf,
            DisplayAlgorithm::Ocv => self.soc_ocv,
            DisplayAlgorithm::CoulombCounting => self.soc_cc,
        }
    }
}
