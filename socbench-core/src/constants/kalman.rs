//! Kalman Filter Constants
//!
//! Noise model and divergence guard defaults for the two-state
//! `[soc, polarization voltage]` filter. SoC is tracked in percent, so SoC
//! variances are in %² and voltage variances in V².

// ===== PROCESS NOISE (Q) =====

/// SoC process noise added per prediction step (%²).
///
/// Covers current sensor offset and capacity uncertainty between updates.
///
/// Source: 0.5% current sensor error over a 60 s step at 1C on 100 Ah
pub const DEFAULT_SOC_PROCESS_NOISE: f32 = 1e-3;

/// Polarization voltage process noise per prediction step (V²).
pub const DEFAULT_POLARIZATION_PROCESS_NOISE: f32 = 1e-7;

// ===== MEASUREMENT NOISE (R) =====

/// Terminal voltage measurement variance (V²).
///
/// 20 mV standard deviation: ADC noise plus unmodelled dynamics.
pub const DEFAULT_MEASUREMENT_NOISE: f32 = 4e-4;

// ===== PRIOR (P0) =====

/// Initial SoC variance (%²). 10% standard deviation.
pub const DEFAULT_INITIAL_SOC_VARIANCE: f32 = 100.0;

/// Initial polarization variance (V²). 10 mV standard deviation.
pub const DEFAULT_INITIAL_POLARIZATION_VARIANCE: f32 = 1e-4;

// ===== POLARIZATION (RC) MODEL =====

/// Relaxation time constant of the polarization branch (s).
///
/// Source: Single-RC Thevenin fits of NMC cells, 20-60 s
pub const DEFAULT_POLARIZATION_TIME_CONSTANT_S: f32 = 30.0;

/// Polarization branch resistance (Ω).
pub const DEFAULT_POLARIZATION_RESISTANCE_OHM: f32 = 0.0008;

// ===== DIVERGENCE GUARD =====

/// Innovation gate in standard deviations of the innovation covariance.
///
/// A 5σ gate rejects fewer than 1 in 10^6 consistent samples.
pub const DEFAULT_GATE_SIGMA: f32 = 5.0;

/// Consecutive gate rejections that trigger a covariance reset to the prior.
pub const DEFAULT_MAX_CONSECUTIVE_REJECTIONS: u32 = 10;

/// Tolerance used when checking covariance positive semi-definiteness.
pub const PSD_TOLERANCE: f32 = 1e-6;
