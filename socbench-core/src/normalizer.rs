//! Reading Normalizer
//!
//! First stage of every battery pipeline. A raw reading either comes out
//! canonical or is dropped with a reason; no estimator sees a bad sample.
//!
//! ## Checks, in order
//!
//! 1. Battery id non-empty and fits inline
//! 2. Voltage and current finite
//! 3. Voltage within `[min_voltage_v, nominal_cell_voltage_v × max_voltage_factor]`
//! 4. `|current|` within `max_current_a`
//! 5. Timestamp strictly after the battery's last accepted reading
//!
//! ## Canonical Form
//!
//! ```text
//! current: positive = charging   (negated for positive_discharge producers)
//! dt_s:    (timestamp - last) / 1000, clamped to max_dt_s; 0 for the first reading
//! ```
//!
//! Clamping `dt` under-integrates across telemetry gaps instead of
//! extrapolating a stale current over them.

use serde::{Deserialize, Serialize};

use crate::{
    constants::battery::{
        DEFAULT_MAX_DT_S, MAX_CURRENT_A, MAX_VOLTAGE_FACTOR, MIN_VOLTAGE_V, NOMINAL_CELL_VOLTAGE_V,
    },
    errors::{ReadingError, ReadingResult},
    reading::{BatteryId, NormalizedReading, RawReading},
    time::{seconds_between, Timestamp},
};

/// Sign convention used by the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentConvention {
    /// Positive current charges the battery
    #[default]
    PositiveCharge,
    /// Positive current discharges the battery
    PositiveDischarge,
}

/// Normalizer limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Lowest accepted voltage (V)
    pub min_voltage_v: f32,
    /// Nominal cell voltage the upper bound derives from (V)
    pub nominal_cell_voltage_v: f32,
    /// Upper bound as a multiple of the nominal voltage
    pub max_voltage_factor: f32,
    /// Largest accepted current magnitude (A)
    pub max_current_a: f32,
    /// Longest integration step (s)
    pub max_dt_s: f32,
    /// Producer's current sign convention
    pub current_convention: CurrentConvention,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            min_voltage_v: MIN_VOLTAGE_V,
            nominal_cell_voltage_v: NOMINAL_CELL_VOLTAGE_V,
            max_voltage_factor: MAX_VOLTAGE_FACTOR,
            max_current_a: MAX_CURRENT_A,
            max_dt_s: DEFAULT_MAX_DT_S,
            current_convention: CurrentConvention::PositiveCharge,
        }
    }
}

impl NormalizerConfig {
    /// Highest accepted voltage (V)
    pub fn max_voltage_v(&self) -> f32 {
        self.nominal_cell_voltage_v * self.max_voltage_factor
    }
}

/// Check a value is finite
pub fn check_finite(value: f32, field: &'static str) -> ReadingResult<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ReadingError::InvalidValue { field })
    }
}

/// Check a voltage is within the specified range
pub fn check_voltage(value: f32, min: f32, max: f32) -> ReadingResult<()> {
    if value < min || value > max {
        Err(ReadingError::VoltageOutOfRange { value, min, max })
    } else {
        Ok(())
    }
}

/// Check a current magnitude against a limit
pub fn check_current(value: f32, max: f32) -> ReadingResult<()> {
    if value.abs() > max {
        Err(ReadingError::CurrentOutOfRange { value, max })
    } else {
        Ok(())
    }
}

/// Validates and canonicalizes raw readings
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReadingNormalizer {
    config: NormalizerConfig,
}

impl ReadingNormalizer {
    /// Create with limits
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Limits in use
    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Validate the parts of a reading that do not depend on battery state
    ///
    /// Returns the parsed id so the caller can look up `last_timestamp`.
    pub fn check(&self, raw: &RawReading) -> ReadingResult<BatteryId> {
        let battery_id = BatteryId::new(&raw.battery_id)?;

        let voltage_v = check_finite(raw.voltage_v, "voltage")?;
        let current_a = check_finite(raw.current_a, "current")?;
        check_voltage(voltage_v, self.config.min_voltage_v, self.config.max_voltage_v())?;
        check_current(current_a, self.config.max_current_a)?;

        Ok(battery_id)
    }

    /// Full normalization against the battery's last accepted timestamp
    pub fn normalize(
        &self,
        raw: &RawReading,
        last_timestamp: Option<Timestamp>,
    ) -> ReadingResult<NormalizedReading> {
        let battery_id = self.check(raw)?;
        self.finish(battery_id, raw, last_timestamp)
    }

    /// Ordering check and canonicalization for an already checked reading
    pub fn finish(
        &self,
        battery_id: BatteryId,
        raw: &RawReading,
        last_timestamp: Option<Timestamp>,
    ) -> ReadingResult<NormalizedReading> {
        let dt_raw_s = match last_timestamp {
            Some(last) if raw.timestamp <= last => {
                return Err(ReadingError::NonMonotonicTimestamp {
                    timestamp: raw.timestamp,
                    last,
                });
            }
            Some(last) => seconds_between(last, raw.timestamp),
            None => 0.0,
        };

        let dt_clamped = dt_raw_s > self.config.max_dt_s;
        let dt_s = dt_raw_s.min(self.config.max_dt_s);

        let current_a = match self.config.current_convention {
            CurrentConvention::PositiveCharge => raw.current_a,
            CurrentConvention::PositiveDischarge => -raw.current_a,
        };

        Ok(NormalizedReading {
            battery_id,
            timestamp: raw.timestamp,
            voltage_v: raw.voltage_v,
            current_a,
            dt_s,
            dt_clamped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> ReadingNormalizer {
        ReadingNormalizer::default()
    }

    #[test]
    fn accepts_and_computes_dt() {
        let raw = RawReading::new("A", 11_000, 3.7, 2.0);
        let reading = normalizer().normalize(&raw, Some(1_000)).unwrap();
        assert_eq!(reading.dt_s, 10.0);
        assert!(!reading.dt_clamped);
        assert_eq!(reading.current_a, 2.0);
        assert_eq!(reading.battery_id.as_str(), "A");
    }

    #[test]
    fn first_reading_has_zero_dt() {
        let raw = RawReading::new("A", 5_000, 3.7, 0.0);
        let reading = normalizer().normalize(&raw, None).unwrap();
        assert_eq!(reading.dt_s, 0.0);
    }

    #[test]
    fn gap_is_clamped() {
        let raw = RawReading::new("A", 3_600_000, 3.7, 1.0);
        let reading = normalizer().normalize(&raw, Some(0)).unwrap();
        assert_eq!(reading.dt_s, DEFAULT_MAX_DT_S);
        assert!(reading.dt_clamped);
    }

    #[test]
    fn rejects_non_monotonic() {
        let raw = RawReading::new("A", 1_000, 3.7, 0.0);
        assert_eq!(
            normalizer().normalize(&raw, Some(1_000)),
            Err(ReadingError::NonMonotonicTimestamp {
                timestamp: 1_000,
                last: 1_000
            })
        );
        assert!(normalizer().normalize(&raw, Some(2_000)).is_err());
    }

    #[test]
    fn rejects_bad_values() {
        let n = normalizer();
        assert_eq!(
            n.normalize(&RawReading::new("A", 1, f32::NAN, 0.0), None),
            Err(ReadingError::InvalidValue { field: "voltage" })
        );
        assert_eq!(
            n.normalize(&RawReading::new("A", 1, 3.7, f32::INFINITY), None),
            Err(ReadingError::InvalidValue { field: "current" })
        );
        assert!(matches!(
            n.normalize(&RawReading::new("A", 1, -0.1, 0.0), None),
            Err(ReadingError::VoltageOutOfRange { .. })
        ));
        assert!(matches!(
            n.normalize(&RawReading::new("A", 1, 19.0, 0.0), None),
            Err(ReadingError::VoltageOutOfRange { .. })
        ));
        assert!(matches!(
            n.normalize(&RawReading::new("A", 1, 3.7, -2500.0), None),
            Err(ReadingError::CurrentOutOfRange { .. })
        ));
        assert!(matches!(
            n.normalize(&RawReading::new("", 1, 3.7, 0.0), None),
            Err(ReadingError::InvalidBatteryId { .. })
        ));
    }

    #[test]
    fn voltage_bound_follows_nominal() {
        let n = normalizer();
        // Upper bound is 5 × 3.7 V
        assert!(n.normalize(&RawReading::new("A", 1, 18.0, 0.0), None).is_ok());
        assert!(n.normalize(&RawReading::new("A", 1, 18.6, 0.0), None).is_err());
    }

    #[test]
    fn discharge_positive_convention() {
        let n = ReadingNormalizer::new(NormalizerConfig {
            current_convention: CurrentConvention::PositiveDischarge,
            ..NormalizerConfig::default()
        });
        let reading = n.normalize(&RawReading::new("A", 1, 3.7, 5.0), None).unwrap();
        assert_eq!(reading.current_a, -5.0);
    }
}
