//! Processed Reading Publisher
//!
//! The core does not own a store or a wire protocol. It hands each
//! `ProcessedReading` to a `ReadingSink` and moves on:
//!
//! ```text
//! engine ──→ Publisher ──→ ReadingSink ──→ (database, HTTP, file, ...)
//!               │ retry up to max_attempts
//!               └── final failure → PublishFailed event, estimation kept
//! ```
//!
//! Sinks are shared by every ingestion thread, so they take `&self` and do
//! their own locking.

use std::{
    io::Write,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::{
    constants::buffers::DEFAULT_PUBLISH_ATTEMPTS,
    errors::{PublishError, PublishResult},
    reading::ProcessedReading,
};

/// Destination for processed readings
pub trait ReadingSink: Send + Sync {
    /// Deliver one reading
    fn publish(&self, reading: &ProcessedReading) -> PublishResult<()>;
}

/// Sink that accepts and drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl ReadingSink for DiscardSink {
    fn publish(&self, _reading: &ProcessedReading) -> PublishResult<()> {
        Ok(())
    }
}

/// Sink that keeps readings in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    readings: Mutex<Vec<ProcessedReading>>,
}

impl MemorySink {
    /// Create empty
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything published so far
    pub fn readings(&self) -> Vec<ProcessedReading> {
        self.lock().clone()
    }

    /// Remove and return everything published so far
    pub fn take(&self) -> Vec<ProcessedReading> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of readings held
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing was published
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProcessedReading>> {
        self.readings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReadingSink for MemorySink {
    fn publish(&self, reading: &ProcessedReading) -> PublishResult<()> {
        self.lock().push(reading.clone());
        Ok(())
    }
}

/// Sink writing one JSON object per line
#[derive(Debug)]
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Unwrap the writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ReadingSink for JsonLinesSink<W> {
    fn publish(&self, reading: &ProcessedReading) -> PublishResult<()> {
        // Serialize first so a failure never leaves half a line behind
        let mut line = serde_json::to_vec(reading)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Publisher settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Attempts per reading, at least one
    pub max_attempts: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PUBLISH_ATTEMPTS,
        }
    }
}

/// Failed delivery after all attempts
#[derive(Debug)]
pub struct PublishFailure {
    /// Attempts made
    pub attempts: u32,
    /// Error from the last attempt
    pub error: PublishError,
}

/// Hands readings to a sink with bounded retry
#[derive(Clone)]
pub struct Publisher {
    sink: Arc<dyn ReadingSink>,
    max_attempts: u32,
}

impl Publisher {
    /// Publish to `sink`
    pub fn new(sink: Arc<dyn ReadingSink>, config: PublisherConfig) -> Self {
        Self {
            sink,
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Deliver one reading, returning the attempts it took
    pub fn publish(&self, reading: &ProcessedReading) -> Result<u32, PublishFailure> {
        let mut attempt = 1;
        loop {
            match self.sink.publish(reading) {
                Ok(()) => return Ok(attempt),
                Err(error) if attempt >= self.max_attempts => {
                    return Err(PublishFailure {
                        attempts: attempt,
                        error,
                    });
                }
                Err(error) => {
                    log::debug!(
                        "Publish attempt {}/{} for {} failed: {}",
                        attempt,
                        self.max_attempts,
                        reading.battery_id,
                        error
                    );
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(Arc::new(DiscardSink), PublisherConfig::default())
    }
}

impl core::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Publisher")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
