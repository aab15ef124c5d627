//! Constants for SocBench Core
//!
//! Centralized defaults used by the configuration layer and the estimators.
//! Every numeric default lives here with a note on where it comes from, so a
//! deployment can see what it is overriding.
//!
//! ## Organization
//!
//! - **Battery**: cell chemistry defaults, rest detection, sanity limits
//! - **Kalman**: noise model, gating and reset policy
//! - **Harness**: evaluation scorecard defaults and operation cost weights
//! - **Buffers**: event queue, scorecard history and publish retry limits
//! - **Time**: unit conversions
//!
//! Names carry their unit as a suffix (`_A`, `_V`, `_MS`, `_PCT`, `_AH`).

/// Battery model defaults and input sanity limits.
pub mod battery;

/// Kalman filter noise model and divergence guard parameters.
pub mod kalman;

/// Evaluation harness and scorecard defaults.
pub mod harness;

/// Queue, history and delivery limits.
pub mod buffers;

/// Time unit conversions.
pub mod time;

pub use battery::{
    DEFAULT_CAPACITY_AH, DEFAULT_INITIAL_SOC_PCT, DEFAULT_INTERNAL_RESISTANCE_OHM,
    DEFAULT_MAX_DT_S, DEFAULT_REST_CURRENT_THRESHOLD_A, DEFAULT_REST_SETTLE_MS,
    NOMINAL_CELL_VOLTAGE_V,
};

pub use buffers::{DEFAULT_HISTORY_CAPACITY, EVENT_QUEUE_CAPACITY};

pub use kalman::{DEFAULT_GATE_SIGMA, DEFAULT_MAX_CONSECUTIVE_REJECTIONS};

pub use time::{MS_PER_SECOND, SECONDS_PER_HOUR};
