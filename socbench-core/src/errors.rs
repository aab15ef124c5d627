//! Error Types for Ingestion, Estimation and Configuration
//!
//! ## Error Categories
//!
//! ### Input violations (sample dropped, no state touched)
//! - `ReadingError`: malformed or out-of-range telemetry, non-increasing timestamp
//!
//! ### Estimator refusals (returned by the estimator, never a panic)
//! - `EstimationError::CapacityMisconfigured`: zero, negative or non-finite capacity
//! - `EstimationError::NumericalInstability`: innovation covariance not positive
//!
//! ### Boundary failures
//! - `TableError`: OCV calibration table of the wrong size or ordering
//! - `ConfigError`: configuration file unreadable, unparsable or inconsistent
//! - `PublishError`: the downstream sink refused a processed reading
//!
//! A Kalman innovation-gate rejection is not an error: the filter keeps its
//! prediction and reports the rejection in its output. A first-seen battery is
//! not an error either; it creates state.
//!
//! ## Error Handling Strategy
//!
//! ```text
//! ingest(raw)
//!   ├── Err(InvalidReading)         → dropped, InvalidReading event, warn!
//!   ├── Err(CapacityMisconfigured)  → refused until reconfigure_battery()
//!   └── Ok(ProcessedReading)        → published; DivergenceDetected may be raised
//! ```
//!
//! Input and estimator errors are `Copy` and carry only inline data so they can
//! travel inside events without allocation.

use thiserror_no_std::Error;

use crate::time::Timestamp;

/// Result type for reading normalization
pub type ReadingResult<T> = Result<T, ReadingError>;

/// Result type for estimator calls
pub type EstimationResult<T> = Result<T, EstimationError>;

/// Result type for engine ingestion
pub type IngestResult<T> = Result<T, IngestError>;

/// Result type for calibration table construction
pub type TableResult<T> = Result<T, TableError>;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for publishing processed readings
pub type PublishResult<T> = Result<T, PublishError>;

/// Reasons a raw reading is rejected by the normalizer
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ReadingError {
    /// Value makes no physical sense (NaN, infinity)
    #[error("Invalid {field}: not a finite number")]
    InvalidValue {
        /// Name of the offending field
        field: &'static str,
    },

    /// Voltage outside the configured sane range
    #[error("Voltage {value} V outside range [{min}, {max}]")]
    VoltageOutOfRange {
        /// Measured terminal voltage
        value: f32,
        /// Lowest accepted voltage
        min: f32,
        /// Highest accepted voltage
        max: f32,
    },

    /// Current magnitude above the configured limit
    #[error("Current {value} A exceeds limit ±{max} A")]
    CurrentOutOfRange {
        /// Measured current
        value: f32,
        /// Largest accepted magnitude
        max: f32,
    },

    /// Timestamp not after the last accepted reading (duplicate or out of order)
    #[error("Timestamp {timestamp} not after last accepted {last}")]
    NonMonotonicTimestamp {
        /// Timestamp of the rejected reading
        timestamp: Timestamp,
        /// Timestamp of the last accepted reading
        last: Timestamp,
    },

    /// Battery identifier empty or too long
    #[error("Invalid battery id: {reason}")]
    InvalidBatteryId {
        /// What is wrong with the id
        reason: &'static str,
    },
}

/// Reasons an estimator refuses to run or fails
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum EstimationError {
    /// Configured capacity cannot be used for integration
    #[error("Capacity misconfigured: {capacity_ah} Ah")]
    CapacityMisconfigured {
        /// The configured capacity
        capacity_ah: f32,
    },

    /// Matrix math produced a non-finite or non-positive innovation covariance
    #[error("Numerical instability in Kalman update")]
    NumericalInstability,
}

/// Reasons an OCV calibration table is rejected
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum TableError {
    /// Fewer than two points, nothing to interpolate
    #[error("OCV table needs at least 2 points, got {len}")]
    TooFewPoints {
        /// Number of points supplied
        len: usize,
    },

    /// More points than the inline table holds
    #[error("OCV table holds at most {max} points, got {len}")]
    TooManyPoints {
        /// Number of points supplied
        len: usize,
        /// Table capacity
        max: usize,
    },

    /// Voltage or SoC not strictly increasing at this index
    #[error("OCV table not strictly increasing at point {index}")]
    NotIncreasing {
        /// Index of the first offending point
        index: usize,
    },

    /// SoC outside 0-100 or a non-finite value
    #[error("OCV table point {index} out of range")]
    OutOfRange {
        /// Index of the offending point
        index: usize,
    },
}

/// Errors returned by the engine for a single reading
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum IngestError {
    /// Reading dropped by the normalizer
    #[error("Invalid reading: {0}")]
    InvalidReading(#[from] ReadingError),

    /// Battery pipeline halted until its capacity is corrected
    #[error("Capacity misconfigured: {capacity_ah} Ah")]
    CapacityMisconfigured {
        /// The configured capacity
        capacity_ah: f32,
    },

    /// An estimator failed for a reason other than configuration
    #[error("Estimation failed: {0}")]
    Estimation(EstimationError),
}

impl From<EstimationError> for IngestError {
    fn from(err: EstimationError) -> Self {
        match err {
            EstimationError::CapacityMisconfigured { capacity_ah } => {
                IngestError::CapacityMisconfigured { capacity_ah }
            }
            other => IngestError::Estimation(other),
        }
    }
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is not valid JSON for the expected schema
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A calibration table is unusable
    #[error("Invalid OCV table: {0}")]
    Table(#[from] TableError),

    /// A value is outside its meaningful range
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid {
        /// Dotted path of the field
        field: &'static str,
        /// Why the value is rejected
        reason: &'static str,
    },
}

/// Errors raised while handing a processed reading to a sink
#[derive(Error, Debug)]
pub enum PublishError {
    /// Writing to the underlying sink failed
    #[error("Sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The reading could not be serialized
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The sink refused the reading
    #[error("Sink rejected reading: {reason}")]
    Rejected {
        /// Reason given by the sink
        reason: &'static str,
    },
}
