//! Open-Circuit Voltage Calibration Table
//!
//! ## Background
//!
//! With no current flowing and the cell relaxed, terminal voltage equals the
//! open-circuit voltage, which is a monotonic function of SoC for a given
//! chemistry. The table stores that curve as calibration points in ascending
//! voltage order:
//!
//! ```text
//!  V
//! 4.20 ┤                                   ●
//! 4.03 ┤                               ●
//! 3.93 ┤                           ●
//! 3.85 ┤                       ●
//! 3.72 ┤               ●   ●            (flat plateau: small dV/dSoC,
//! 3.62 ┤       ●   ●                     voltage says little about SoC)
//! 3.45 ┤   ●
//! 3.00 ┤●
//!      └──┬───┬───┬───┬───┬───┬───┬───┬───┬───┬── SoC %
//!         10  20  30  40  50  60  70  80  90  100
//! ```
//!
//! ## Operations
//!
//! - `soc_at(v)`: forward lookup used by the OCV estimator
//! - `voltage_at(soc)`: inverse used by the Kalman measurement model
//! - `slope_at(soc)`: local dV/dSoC, the Kalman measurement Jacobian
//!
//! Between points the curve is linear. Inputs past either end clamp to the
//! endpoint; the forward lookup reports the clamp so callers can flag it.
//!
//! Tables hold at most `MAX_OCV_POINTS` points inline, one table is shared
//! read-only between all batteries using the same profile.

use serde::{Deserialize, Serialize};

use crate::{
    constants::battery::{DEFAULT_OCV_CURVE, MAX_OCV_POINTS},
    errors::{TableError, TableResult},
};

/// One calibration point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OcvPoint {
    /// Rest voltage (V)
    pub voltage_v: f32,
    /// State of charge at that voltage (%)
    pub soc_pct: f32,
}

impl OcvPoint {
    /// Create a calibration point
    pub const fn new(voltage_v: f32, soc_pct: f32) -> Self {
        Self { voltage_v, soc_pct }
    }
}

/// Piecewise-linear OCV → SoC curve
///
/// Validated on construction: 2 to `MAX_OCV_POINTS` points, voltage and SoC both
/// strictly increasing, SoC within 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<OcvPoint>", into = "Vec<OcvPoint>")]
pub struct OcvTable {
    points: heapless::Vec<OcvPoint, MAX_OCV_POINTS>,
}

impl OcvTable {
    /// Build a table from `(voltage, soc)` pairs
    pub fn new(pairs: &[(f32, f32)]) -> TableResult<Self> {
        let points: Vec<OcvPoint> = pairs.iter().map(|&(v, soc)| OcvPoint::new(v, soc)).collect();
        Self::from_points(&points)
    }

    /// Build a table from calibration points
    pub fn from_points(points: &[OcvPoint]) -> TableResult<Self> {
        if points.len() < 2 {
            return Err(TableError::TooFewPoints { len: points.len() });
        }

        let mut inline = heapless::Vec::new();
        inline
            .extend_from_slice(points)
            .map_err(|_| TableError::TooManyPoints {
                len: points.len(),
                max: MAX_OCV_POINTS,
            })?;

        for (index, point) in points.iter().enumerate() {
            let finite = point.voltage_v.is_finite() && point.soc_pct.is_finite();
            if !finite || !(0.0..=100.0).contains(&point.soc_pct) {
                return Err(TableError::OutOfRange { index });
            }
        }

        for (index, pair) in points.windows(2).enumerate() {
            if pair[1].voltage_v <= pair[0].voltage_v || pair[1].soc_pct <= pair[0].soc_pct {
                return Err(TableError::NotIncreasing { index: index + 1 });
            }
        }

        Ok(Self { points: inline })
    }

    /// Generic NMC curve
    pub fn default_nmc() -> Self {
        let points = DEFAULT_OCV_CURVE.map(|(v, soc)| OcvPoint::new(v, soc));
        let mut inline = heapless::Vec::new();
        for point in points {
            // DEFAULT_OCV_CURVE is shorter than MAX_OCV_POINTS
            let _ = inline.push(point);
        }
        Self { points: inline }
    }

    /// Calibration points in ascending voltage order
    pub fn points(&self) -> &[OcvPoint] {
        &self.points
    }

    /// Voltage range covered by the table
    pub fn voltage_range(&self) -> (f32, f32) {
        (self.first().voltage_v, self.last().voltage_v)
    }

    /// SoC for a rest voltage, with a flag set when the voltage was clamped
    pub fn soc_at(&self, voltage_v: f32) -> (f32, bool) {
        let first = self.first();
        let last = self.last();

        if voltage_v <= first.voltage_v {
            let clamped = voltage_v < first.voltage_v;
            if clamped {
                log::debug!(
                    "OCV lookup: {} V below table, clamped to {} V",
                    voltage_v,
                    first.voltage_v
                );
            }
            return (first.soc_pct, clamped);
        }

        if voltage_v >= last.voltage_v {
            let clamped = voltage_v > last.voltage_v;
            if clamped {
                log::debug!(
                    "OCV lookup: {} V above table, clamped to {} V",
                    voltage_v,
                    last.voltage_v
                );
            }
            return (last.soc_pct, clamped);
        }

        // first.v < v < last.v, so 1 <= upper <= len - 1
        let upper = self.points.partition_point(|p| p.voltage_v <= voltage_v);
        let lo = self.points[upper - 1];
        let hi = self.points[upper];
        let frac = (voltage_v - lo.voltage_v) / (hi.voltage_v - lo.voltage_v);
        (lo.soc_pct + frac * (hi.soc_pct - lo.soc_pct), false)
    }

    /// Rest voltage for a SoC, clamped to the table ends
    pub fn voltage_at(&self, soc_pct: f32) -> f32 {
        let (lo, hi) = self.segment(soc_pct);
        if soc_pct <= lo.soc_pct {
            return lo.voltage_v;
        }
        if soc_pct >= hi.soc_pct {
            return hi.voltage_v;
        }
        let frac = (soc_pct - lo.soc_pct) / (hi.soc_pct - lo.soc_pct);
        lo.voltage_v + frac * (hi.voltage_v - lo.voltage_v)
    }

    /// Local dV/dSoC in V per % SoC
    ///
    /// Uses the segment containing `soc_pct`; at a breakpoint the segment above
    /// it (below it at the top end). Always positive for a valid table.
    pub fn slope_at(&self, soc_pct: f32) -> f32 {
        let (lo, hi) = self.segment(soc_pct);
        (hi.voltage_v - lo.voltage_v) / (hi.soc_pct - lo.soc_pct)
    }

    fn segment(&self, soc_pct: f32) -> (OcvPoint, OcvPoint) {
        let len = self.points.len();
        let upper = self
            .points
            .partition_point(|p| p.soc_pct <= soc_pct)
            .clamp(1, len - 1);
        (self.points[upper - 1], self.points[upper])
    }

    fn first(&self) -> OcvPoint {
        self.points[0]
    }

    fn last(&self) -> OcvPoint {
        self.points[self.points.len() - 1]
    }
}

impl Default for OcvTable {
    fn default() -> Self {
        Self::default_nmc()
    }
}

impl TryFrom<Vec<OcvPoint>> for OcvTable {
    type Error = TableError;

    fn try_from(points: Vec<OcvPoint>) -> TableResult<Self> {
        Self::from_points(&points)
    }
}

impl From<OcvTable> for Vec<OcvPoint> {
    fn from(table: OcvTable) -> Self {
        table.points.to_vec()
    }
}
