//! Battery state-of-charge estimation core for SocBench
//!
//! Runs three SoC estimators side by side on every telemetry reading and
//! scores them against each other:
//!
//! - **OCV lookup**: table interpolation, trusted only at a settled rest
//! - **Coulomb counting**: current integration, re-anchored by fresh OCV
//! - **Kalman filter**: 2-state equivalent-circuit model with divergence gate
//!
//! A cycle-based state-of-health estimate rides along, and an evaluation
//! harness records execution time, state footprint and error per algorithm.
//!
//! ```no_run
//! use socbench_core::{Engine, RawReading, SocConfig, TimeWindow};
//!
//! let engine = Engine::new(SocConfig::from_path("socbench.json")?)?;
//!
//! let processed = engine.ingest(&RawReading::new("pack-1", 1_000, 3.71, -8.5))?;
//! println!("SoC {:.1}% (kf), SoH {:.1}%", processed.soc_kf, processed.soh_pct);
//!
//! let report = engine.scorecard(TimeWindow::all(), None);
//! println!("most accurate: {:?}", report.most_accurate());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod estimators;
pub mod events;
pub mod harness;
pub mod lookup;
pub mod matrix;
pub mod normalizer;
pub mod pipeline;
pub mod publisher;
pub mod queue;
pub mod reading;
pub mod state;
pub mod store;
pub mod time;

// Public API
pub use config::{BatteryProfile, ProfileOverride, SocConfig};
pub use engine::{Engine, EngineBuilder};
pub use errors::{
    ConfigError, EstimationError, IngestError, IngestResult, PublishError, ReadingError,
    TableError,
};
pub use estimators::Estimator;
pub use events::{EngineEvent, EventLevel, EventSink};
pub use harness::{Algorithm, EvalMetrics, PerformanceReport};
pub use lookup::OcvTable;
pub use publisher::{DiscardSink, JsonLinesSink, MemorySink, ReadingSink};
pub use queue::EventQueue;
pub use reading::{BatteryId, DisplayAlgorithm, ProcessedReading, RawReading};
pub use state::{BatterySnapshot, BatteryState};
pub use store::{InMemoryStore, StateStore};
pub use time::{TimeWindow, Timestamp};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
