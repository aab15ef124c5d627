//! Engine Events
//!
//! ## Overview
//!
//! Everything noteworthy that happens while processing readings is raised as
//! an `EngineEvent` on an `EventSink`. Events are observability only: the
//! engine never waits on a sink and never reads events back.
//!
//! ```text
//! ingest(raw) ──→ normalizer ──✗──→ InvalidReading
//!                    │
//!                    ├── first reading ──→ BatteryRegistered
//!                    ├── capacity ≤ 0 ──→ CapacityMisconfigured
//!                    ├── KF gate ──✗──→ DivergenceDetected (──→ CovarianceReset)
//!                    ├── SoH cycle ──→ CycleCompleted
//!                    └── publisher ──✗──→ PublishFailed
//! ```
//!
//! ## Levels
//!
//! Levels mirror the dashboard's event log (`info`, `warning`, `error`), and
//! `EngineEvent::to_record` produces the `{timestamp, message, level}` shape
//! that log stores.
//!
//! Events carry inline battery ids and `Copy` errors only, so they can sit in a
//! fixed-capacity queue.

use serde::{Deserialize, Serialize};

use crate::{errors::ReadingError, reading::BatteryId, time::Timestamp};

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Normal lifecycle
    Info,
    /// Recoverable anomaly
    Warning,
    /// A battery or the publisher stopped working
    Error,
}

/// Event raised by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A raw reading was dropped by the normalizer
    InvalidReading {
        /// Battery the reading claimed to come from, if the id itself was valid
        battery_id: Option<BatteryId>,
        /// Timestamp carried by the reading
        timestamp: Timestamp,
        /// Why it was dropped
        error: ReadingError,
    },

    /// First accepted reading for an unseen battery created its state
    BatteryRegistered {
        /// New battery
        battery_id: BatteryId,
        /// Timestamp of the first reading
        timestamp: Timestamp,
        /// Initial SoC came from the OCV table rather than the default
        seeded_from_ocv: bool,
        /// Initial SoC (%)
        initial_soc_pct: f32,
    },

    /// The Kalman innovation gate rejected a measurement update
    DivergenceDetected {
        /// Affected battery
        battery_id: BatteryId,
        /// Reading timestamp
        timestamp: Timestamp,
        /// Measured minus predicted voltage (V)
        innovation_v: f32,
        /// Gate width that was exceeded (V)
        gate_v: f32,
        /// Rejections in a row, including this one
        consecutive: u32,
    },

    /// Repeated rejections reset the Kalman covariance to its prior
    CovarianceReset {
        /// Affected battery
        battery_id: BatteryId,
        /// Reading timestamp
        timestamp: Timestamp,
    },

    /// Estimation halted because the configured capacity is unusable
    CapacityMisconfigured {
        /// Affected battery
        battery_id: BatteryId,
        /// Reading timestamp
        timestamp: Timestamp,
        /// The offending capacity
        capacity_ah: f32,
    },

    /// A half cycle large enough for capacity estimation completed
    CycleCompleted {
        /// Affected battery
        battery_id: BatteryId,
        /// Timestamp of the confirming reading
        timestamp: Timestamp,
        /// SoC swing between the two extrema (%)
        swing_pct: f32,
        /// Charge passed divided by rated charge for the swing
        fade_ratio: f32,
        /// Smoothed SoH after this cycle (%)
        soh_pct: f32,
    },

    /// A processed reading could not be handed to the sink
    PublishFailed {
        /// Affected battery
        battery_id: BatteryId,
        /// Reading timestamp
        timestamp: Timestamp,
        /// Attempts made before giving up
        attempts: u32,
    },
}

impl EngineEvent {
    /// Timestamp of the reading that raised the event
    pub fn timestamp(&self) -> Timestamp {
        match self {
            EngineEvent::InvalidReading { timestamp, .. }
            | EngineEvent::BatteryRegistered { timestamp, .. }
            | EngineEvent::DivergenceDetected { timestamp, .. }
            | EngineEvent::CovarianceReset { timestamp, .. }
            | EngineEvent::CapacityMisconfigured { timestamp, .. }
            | EngineEvent::CycleCompleted { timestamp, .. }
            | EngineEvent::PublishFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Battery the event concerns
    pub fn battery_id(&self) -> Option<&BatteryId> {
        match self {
            EngineEvent::InvalidReading { battery_id, .. } => battery_id.as_ref(),
            EngineEvent::BatteryRegistered { battery_id, .. }
            | EngineEvent::DivergenceDetected { battery_id, .. }
            | EngineEvent::CovarianceReset { battery_id, .. }
            | EngineEvent::CapacityMisconfigured { battery_id, .. }
            | EngineEvent::CycleCompleted { battery_id, .. }
            | EngineEvent::PublishFailed { battery_id, .. } => Some(battery_id),
        }
    }

    /// Severity
    pub fn level(&self) -> EventLevel {
        match self {
            EngineEvent::BatteryRegistered { .. } | EngineEvent::CycleCompleted { .. } => {
                EventLevel::Info
            }
            EngineEvent::InvalidReading { .. }
            | EngineEvent::DivergenceDetected { .. }
            | EngineEvent::CovarianceReset { .. } => EventLevel::Warning,
            EngineEvent::CapacityMisconfigured { .. } | EngineEvent::PublishFailed { .. } => {
                EventLevel::Error
            }
        }
    }

    /// Short machine-friendly name
    pub const fn kind(&self) -> &'static str {
        match self {
            EngineEvent::InvalidReading { .. } => "invalid_reading",
            EngineEvent::BatteryRegistered { .. } => "battery_registered",
            EngineEvent::DivergenceDetected { .. } => "divergence_detected",
            EngineEvent::CovarianceReset { .. } => "covariance_reset",
            EngineEvent::CapacityMisconfigured { .. } => "capacity_misconfigured",
            EngineEvent::CycleCompleted { .. } => "cycle_completed",
            EngineEvent::PublishFailed { .. } => "publish_failed",
        }
    }

    /// Human-readable description
    pub fn message(&self) -> String {
        match self {
            EngineEvent::InvalidReading {
                battery_id: Some(id),
                error,
                ..
            } => format!("Battery {}: reading dropped ({})", id, error),
            EngineEvent::InvalidReading {
                battery_id: None,
                error,
                ..
            } => format!("Reading dropped ({})", error),
            EngineEvent::BatteryRegistered {
                battery_id,
                seeded_from_ocv,
                initial_soc_pct,
                ..
            } => format!(
                "Battery {} registered at {:.1}% SoC ({})",
                battery_id,
                initial_soc_pct,
                if *seeded_from_ocv { "from OCV" } else { "default" }
            ),
            EngineEvent::DivergenceDetected {
                battery_id,
                innovation_v,
                gate_v,
                consecutive,
                ..
            } => format!(
                "Battery {}: Kalman update rejected, innovation {:.3} V exceeds gate {:.3} V ({} in a row)",
                battery_id, innovation_v, gate_v, consecutive
            ),
            EngineEvent::CovarianceReset { battery_id, .. } => {
                format!("Battery {}: Kalman covariance reset to prior", battery_id)
            }
            EngineEvent::CapacityMisconfigured {
                battery_id,
                capacity_ah,
                ..
            } => format!(
                "Battery {}: capacity {} Ah is unusable, estimation halted",
                battery_id, capacity_ah
            ),
            EngineEvent::CycleCompleted {
                battery_id,
                swing_pct,
                soh_pct,
                ..
            } => format!(
                "Battery {}: cycle of {:.1}% completed, SoH {:.1}%",
                battery_id, swing_pct, soh_pct
            ),
            EngineEvent::PublishFailed {
                battery_id,
                attempts,
                ..
            } => format!(
                "Battery {}: processed reading not published after {} attempts",
                battery_id, attempts
            ),
        }
    }

    /// Flatten into the dashboard's event log record
    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            timestamp: self.timestamp(),
            message: self.message(),
            level: self.level(),
        }
    }
}

/// Event as stored by the dashboard's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Reading timestamp
    pub timestamp: Timestamp,
    /// Human-readable description
    pub message: String,
    /// Severity
    pub level: EventLevel,
}

/// Destination for engine events
///
/// Called from ingestion threads; implementations must not block.
pub trait EventSink: Send + Sync {
    /// Accept one event, dropping it if there is no room
    fn emit(&self, event: EngineEvent);
}

/// Sink that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: EngineEvent) {}
}
