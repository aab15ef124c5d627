//! Bounded Lock-Free Event Queue
//!
//! ## Overview
//!
//! Several ingestion threads raise events while a single consumer (a logger,
//! an HTTP forwarder, a test) drains them. The queue is a fixed-capacity
//! multi-producer multi-consumer ring from `heapless::mpmc`, so producers
//! never block and never allocate:
//!
//! ```text
//! worker 1 ──┐
//! worker 2 ──┼──→ [ ring of N slots ] ──→ drain()
//! worker n ──┘         │
//!                      └── full → event dropped, `dropped` counter += 1
//! ```
//!
//! Dropping on overflow is deliberate: events are observability, and a slow
//! consumer must not stall SoC estimation.
//!
//! ## Statistics
//!
//! `QueueStats` counts pushed, popped and dropped events plus the deepest
//! fill level seen, using relaxed atomics since they are advisory.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use heapless::mpmc::Queue as MpMcQueue;

use crate::{
    constants::buffers::EVENT_QUEUE_CAPACITY,
    events::{EngineEvent, EventSink},
};

/// Queue performance statistics
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total events pushed
    pub pushed: AtomicU32,
    /// Total events popped
    pub popped: AtomicU32,
    /// Events dropped due to full queue
    pub dropped: AtomicU32,
    /// Maximum queue depth seen
    pub max_depth: AtomicU32,
}

impl QueueStats {
    const fn new() -> Self {
        Self {
            pushed: AtomicU32::new(0),
            popped: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            max_depth: AtomicU32::new(0),
        }
    }

    /// Plain-value copy of the counters
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            max_depth: self.max_depth.load(Ordering::Relaxed),
        }
    }

    /// Update max depth if current is higher
    fn update_max_depth(&self, current: u32) {
        let mut max = self.max_depth.load(Ordering::Relaxed);
        while current > max {
            match self.max_depth.compare_exchange_weak(
                max,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => max = actual,
            }
        }
    }
}

/// Counters read at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatsSnapshot {
    /// Total events pushed
    pub pushed: u32,
    /// Total events popped
    pub popped: u32,
    /// Events dropped due to full queue
    pub dropped: u32,
    /// Maximum queue depth seen
    pub max_depth: u32,
}

/// Lock-free event queue
///
/// `N` must be a power of two.
///
/// ```
/// use socbench_core::events::{EngineEvent, EventSink};
/// use socbench_core::queue::EventQueue;
/// use socbench_core::reading::BatteryId;
///
/// let queue: EventQueue<8> = EventQueue::new();
/// queue.emit(EngineEvent::CovarianceReset {
///     battery_id: BatteryId::new("A").unwrap(),
///     timestamp: 1_000,
/// });
///
/// let events = queue.drain();
/// assert_eq!(events.len(), 1);
/// assert!(queue.is_empty());
/// ```
pub struct EventQueue<const N: usize = EVENT_QUEUE_CAPACITY> {
    ring: MpMcQueue<EngineEvent, N>,
    depth: AtomicUsize,
    stats: QueueStats,
}

impl<const N: usize> EventQueue<N> {
    /// Create new empty queue
    pub const fn new() -> Self {
        Self {
            ring: MpMcQueue::new(),
            depth: AtomicUsize::new(0),
            stats: QueueStats::new(),
        }
    }

    /// Push an event, returning it back if the queue is full
    pub fn push(&self, event: EngineEvent) -> Result<(), EngineEvent> {
        match self.ring.enqueue(event) {
            Ok(()) => {
                let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
                self.stats.pushed.fetch_add(1, Ordering::Relaxed);
                self.stats.update_max_depth(depth.min(u32::MAX as usize) as u32);
                Ok(())
            }
            Err(event) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(event)
            }
        }
    }

    /// Pop the oldest event
    pub fn pop(&self) -> Option<EngineEvent> {
        let event = self.ring.dequeue()?;
        // Saturating: a pop can race ahead of the matching push's counter update
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
        self.stats.popped.fetch_add(1, Ordering::Relaxed);
        Some(event)
    }

    /// Pop everything currently queued
    pub fn drain(&self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.pop() {
            events.push(event);
        }
        events
    }

    /// Approximate number of queued events
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Get queue statistics
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> core::fmt::Debug for EventQueue<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventQueue")
            .field("capacity", &N)
            .field("len", &self.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl<const N: usize> EventSink for EventQueue<N> {
    fn emit(&self, event: EngineEvent) {
        if let Err(event) = self.push(event) {
            log::trace!("Event queue full, dropped {}", event.kind());
        }
    }
}
