//! Battery Model Defaults and Sanity Limits
//!
//! Defaults describe a single lithium-ion (NMC) cell of 100 Ah, which matches the
//! 100 Ah pack the reference telemetry was recorded from. Deployments with other
//! chemistries override these through the battery profile.

// ===== CELL CHARACTERISTICS =====

/// Nominal cell voltage (V).
///
/// Mid-plateau voltage of an NMC cell. The normalizer derives its upper voltage
/// bound from this value.
///
/// Source: Typical NMC datasheets (3.6-3.7 V nominal)
pub const NOMINAL_CELL_VOLTAGE_V: f32 = 3.7;

/// Multiple of the nominal cell voltage accepted as a sane reading.
///
/// Anything above `NOMINAL_CELL_VOLTAGE_V * MAX_VOLTAGE_FACTOR` is treated as a
/// wiring or ADC fault rather than a battery state.
pub const MAX_VOLTAGE_FACTOR: f32 = 5.0;

/// Lowest voltage accepted by the normalizer (V).
///
/// A fully shorted cell reads 0 V; negative readings are a sensor fault.
pub const MIN_VOLTAGE_V: f32 = 0.0;

/// Largest current magnitude accepted by the normalizer (A).
///
/// 20C for a 100 Ah cell. Larger values are clamp-meter saturation or noise.
pub const MAX_CURRENT_A: f32 = 2000.0;

/// Rated capacity used when no battery profile overrides it (Ah).
///
/// Source: Reference dataset (100 Ah pack)
pub const DEFAULT_CAPACITY_AH: f32 = 100.0;

/// Ohmic internal resistance of a 100 Ah cell (Ω).
///
/// Source: Large-format NMC pouch cells, 0.8-2 mΩ at 25°C
pub const DEFAULT_INTERNAL_RESISTANCE_OHM: f32 = 0.0015;

/// SoC assumed for a battery first seen under load (%).
pub const DEFAULT_INITIAL_SOC_PCT: f32 = 50.0;

// ===== REST DETECTION =====

/// Current magnitude below which the battery is considered at rest (A).
///
/// 0.5% of C-rate for a 100 Ah cell; below the offset error of most hall sensors.
pub const DEFAULT_REST_CURRENT_THRESHOLD_A: f32 = 0.5;

/// Time the current must stay below the rest threshold before the terminal
/// voltage is trusted as open-circuit voltage (ms).
///
/// Source: Diffusion relaxation of NMC cells settles most of the way within a minute
pub const DEFAULT_REST_SETTLE_MS: u64 = 60_000;

// ===== INTEGRATION =====

/// Largest time step integrated in one update (s).
///
/// Gaps longer than this are under-integrated rather than extrapolated.
pub const DEFAULT_MAX_DT_S: f32 = 60.0;

/// Maximum number of calibration points in an OCV table.
pub const MAX_OCV_POINTS: usize = 32;

/// Maximum length of a battery identifier (bytes).
pub const MAX_BATTERY_ID_LEN: usize = 32;

/// Default OCV curve for an NMC cell as `(voltage V, soc %)` pairs.
///
/// Source: Averaged C/20 charge/discharge curves of commercial NMC cells at 25°C
pub const DEFAULT_OCV_CURVE: [(f32, f32); 11] = [
    (3.00, 0.0),
    (3.45, 10.0),
    (3.55, 20.0),
    (3.62, 30.0),
    (3.67, 40.0),
    (3.72, 50.0),
    (3.78, 60.0),
    (3.85, 70.0),
    (3.93, 80.0),
    (4.03, 90.0),
    (4.20, 100.0),
];

// ===== STATE OF HEALTH =====

/// SoC reversal required before a local extremum is confirmed (%).
///
/// Larger than the KF's steady-state noise so jitter never counts as a cycle.
pub const DEFAULT_SOH_HYSTERESIS_PCT: f32 = 5.0;

/// Minimum SoC swing between extrema to count as a completed half cycle (%).
pub const DEFAULT_MIN_CYCLE_SWING_PCT: f32 = 80.0;

/// Exponential smoothing factor applied to each new fade ratio.
pub const DEFAULT_SOH_SMOOTHING: f32 = 0.3;

/// Number of confirmed extrema kept per battery.
pub const CYCLE_HISTORY_LEN: usize = 16;
