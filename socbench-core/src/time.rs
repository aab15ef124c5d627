//! Time handling for telemetry and measurement
//!
//! Telemetry carries millisecond timestamps chosen by the producer (wall clock
//! or device uptime, the core does not care as long as they increase per
//! battery). Execution time for the evaluation harness is measured separately
//! with a monotonic stopwatch.

use std::time::Instant;

use crate::constants::time::{MS_PER_SECOND, US_PER_SECOND};

/// Timestamp in milliseconds since epoch (or device boot for monotonic sources)
pub type Timestamp = u64;

/// Seconds elapsed between two timestamps, zero if `later` is not after `earlier`
pub fn seconds_between(earlier: Timestamp, later: Timestamp) -> f32 {
    later.saturating_sub(earlier) as f32 / MS_PER_SECOND as f32
}

/// Inclusive time window used for scorecard queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// First timestamp included
    pub start: Timestamp,
    /// Last timestamp included
    pub end: Timestamp,
}

impl TimeWindow {
    /// Window covering `[start, end]`; bounds are swapped if given backwards
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// Window covering every timestamp
    pub const fn all() -> Self {
        Self {
            start: 0,
            end: Timestamp::MAX,
        }
    }

    /// Check whether a timestamp falls inside the window
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::all()
    }
}

/// Monotonic stopwatch with microsecond resolution
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    /// Start timing now
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Microseconds since `start`, with sub-microsecond fraction
    pub fn elapsed_us(&self) -> f32 {
        let elapsed = self.started.elapsed();
        elapsed.as_secs() as f32 * US_PER_SECOND as f32 + elapsed.subsec_nanos() as f32 / 1000.0
    }
}
