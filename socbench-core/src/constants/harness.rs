//! Evaluation Harness Constants
//!
//! Defaults for the per-algorithm scorecards. The energy weights are a proxy:
//! they turn call counts and measured execution time into a comparable
//! "power consumption" figure, not a measurement.

/// Error added to a held (stale) OCV estimate (% SoC).
///
/// The maximum possible SoC error, so a stale OCV value always ranks worst.
pub const DEFAULT_STALE_ERROR_PENALTY: f32 = 100.0;

/// Fixed energy cost per OCV call (µJ): one table search.
pub const OCV_CALL_COST_UJ: f32 = 0.05;

/// Fixed energy cost per coulomb counting call (µJ): one multiply-add.
pub const CC_CALL_COST_UJ: f32 = 0.02;

/// Fixed energy cost per Kalman call (µJ): 2x2 predict/update with Joseph form.
pub const KF_CALL_COST_UJ: f32 = 0.4;

/// Energy per microsecond of CPU time (µJ/µs), i.e. 0.5 W active core power.
///
/// Source: Cortex-A class core at nominal clock
pub const ACTIVE_POWER_UJ_PER_US: f32 = 0.5;

/// Percentiles reported for execution time.
pub const REPORTED_PERCENTILES: [f32; 3] = [50.0, 95.0, 99.0];
