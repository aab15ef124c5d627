//! Time-Related Constants

/// Milliseconds per second.
pub const MS_PER_SECOND: u64 = 1000;

/// Microseconds per second.
pub const US_PER_SECOND: u64 = 1_000_000;

/// Seconds per hour; converts A·s to Ah.
pub const SECONDS_PER_HOUR: f32 = 3600.0;
