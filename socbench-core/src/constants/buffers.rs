//! Queue, History and Delivery Limits

/// Event queue capacity (events).
///
/// Sized for a gateway serving tens of batteries:
/// - 256 events × ~72 bytes/event ≈ 18 KB
/// - Absorbs a burst of invalid readings between two drains
///
/// Must be a power of two for `heapless::mpmc`.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Scorecard entries retained per battery.
///
/// 4096 entries × ~64 bytes ≈ 256 KB per battery, a bit over an hour at 1 Hz.
pub const DEFAULT_HISTORY_CAPACITY: usize = 4096;

/// Battery groups needed before `ingest_batch` spawns worker threads.
///
/// A batch touching a single battery runs on the calling thread.
pub const MIN_PARALLEL_GROUPS: usize = 2;

const _: () = assert!(
    EVENT_QUEUE_CAPACITY.is_power_of_two(),
    "Event queue capacity must be power of 2"
);

/// Attempts made to hand a processed reading to the sink.
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;
