//! State-of-Charge Engine
//!
//! Entry point of the crate. Raw readings go in, processed readings come out
//! through the configured sink, and everything noteworthy is raised as an
//! `EngineEvent`:
//!
//! ```text
//! RawReading ──→ normalize ──→ slot lock ──→ pipeline step ──→ history
//!                   │ invalid                  │ error             │
//!                   ▼                          ▼                   ▼
//!             InvalidReading          CapacityMisconfigured   Publisher → ReadingSink
//!                                                                  │ failed
//!                                                                  ▼
//!                                                            PublishFailed
//! ```
//!
//! ## Concurrency
//!
//! Readings for one battery are serialized by that battery's slot mutex;
//! different batteries proceed in parallel. `ingest_batch` groups a batch by
//! battery, keeping each group in input order, and spreads the groups over
//! scoped worker threads.
//!
//! ## Example
//!
//! ```
//! use socbench_core::{Engine, RawReading, SocConfig};
//!
//! let engine = Engine::new(SocConfig::default()).unwrap();
//! let processed = engine.ingest(&RawReading::new("pack-1", 0, 3.70, -12.0)).unwrap();
//! assert!((0.0..=100.0).contains(&processed.soc_kf));
//! ```

use std::{collections::HashMap, sync::Arc};

use crate::{
    config::{BatteryProfile, SocConfig},
    constants::buffers::MIN_PARALLEL_GROUPS,
    errors::{ConfigResult, EstimationError, IngestError, IngestResult},
    events::{EngineEvent, EventLevel, EventSink},
    harness::{EvalHarness, EvalHistory, EvalRecord, PerformanceReport, ReportBuilder},
    normalizer::ReadingNormalizer,
    pipeline::BatteryPipeline,
    publisher::{DiscardSink, Publisher, ReadingSink},
    queue::EventQueue,
    reading::{BatteryId, NormalizedReading, ProcessedReading, RawReading},
    state::BatterySnapshot,
    store::{lock_slot, BatterySlot, InMemoryStore, StateStore},
    time::{TimeWindow, Timestamp},
};

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: SocConfig,
    store: Option<Arc<dyn StateStore>>,
    sink: Option<Arc<dyn ReadingSink>>,
    events: Option<Arc<dyn EventSink>>,
}

impl EngineBuilder {
    /// Start from a configuration
    pub fn new(config: SocConfig) -> Self {
        Self {
            config,
            store: None,
            sink: None,
            events: None,
        }
    }

    /// Keep battery slots in `store` instead of memory
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Publish processed readings to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn ReadingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Send events to `events` instead of the built-in queue
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and build
    pub fn build(self) -> ConfigResult<Engine> {
        self.config.validate()?;

        let (events, queue) = match self.events {
            Some(events) => (events, None),
            None => {
                let queue: Arc<EventQueue> = Arc::new(EventQueue::new());
                (queue.clone() as Arc<dyn EventSink>, Some(queue))
            }
        };
        let sink = self.sink.unwrap_or_else(|| Arc::new(DiscardSink));

        Ok(Engine {
            normalizer: ReadingNormalizer::new(self.config.normalizer),
            harness: EvalHarness::new(self.config.harness),
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new())),
            publisher: Publisher::new(sink, self.config.publisher),
            events,
            queue,
            config: self.config,
        })
    }
}

/// Multi-battery SoC estimation engine
pub struct Engine {
    config: SocConfig,
    normalizer: ReadingNormalizer,
    harness: EvalHarness,
    store: Arc<dyn StateStore>,
    publisher: Publisher,
    events: Arc<dyn EventSink>,
    queue: Option<Arc<EventQueue>>,
}

impl Engine {
    /// Engine with in-memory state, no sink and the built-in event queue
    pub fn new(config: SocConfig) -> ConfigResult<Self> {
        EngineBuilder::new(config).build()
    }

    /// Start a builder
    pub fn builder(config: SocConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Configuration in use
    pub fn config(&self) -> &SocConfig {
        &self.config
    }

    /// Built-in event queue, `None` when a custom event sink was supplied
    pub fn event_queue(&self) -> Option<&EventQueue> {
        self.queue.as_deref()
    }

    /// Take all queued events
    pub fn drain_events(&self) -> Vec<EngineEvent> {
        self.queue.as_deref().map(EventQueue::drain).unwrap_or_default()
    }

    /// Process one reading
    ///
    /// Rejected readings leave all state untouched. The processed reading
    /// is published before the battery is released to the next reading. A
    /// failed publish is raised as an event; the estimation result is still
    /// returned.
    pub fn ingest(&self, raw: &RawReading) -> IngestResult<ProcessedReading> {
        let battery_id = match self.normalizer.check(raw) {
            Ok(battery_id) => battery_id,
            Err(error) => {
                self.raise(EngineEvent::InvalidReading {
                    battery_id: BatteryId::new(&raw.battery_id).ok(),
                    timestamp: raw.timestamp,
                    error,
                });
                return Err(error.into());
            }
        };

        let processed = loop {
            let shared = self
                .store
                .get_or_insert_with(&battery_id, &|| self.new_slot(&battery_id));
            let mut slot = lock_slot(&shared);
            // Evicted between lookup and lock, look up again
            if slot.evicted {
                continue;
            }
            let processed = self.process(&mut slot, raw)?;
            // Still under the slot lock, so egress follows acceptance order
            self.publish(&processed);
            break processed;
        };

        Ok(processed)
    }

    /// Process a batch, returning one result per reading in input order
    ///
    /// Equivalent to calling [`Engine::ingest`] for each reading in order.
    pub fn ingest_batch(&self, readings: &[RawReading]) -> Vec<IngestResult<ProcessedReading>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut group_of: HashMap<&str, usize> = HashMap::new();
        for (i, raw) in readings.iter().enumerate() {
            let group = *group_of.entry(raw.battery_id.as_str()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(i);
        }

        let workers = self.config.workers.min(groups.len());
        if workers < 2 || groups.len() < MIN_PARALLEL_GROUPS {
            return readings.iter().map(|raw| self.ingest(raw)).collect();
        }

        let mut assigned: Vec<Vec<&[usize]>> = vec![Vec::new(); workers];
        for (g, group) in groups.iter().enumerate() {
            assigned[g % workers].push(group.as_slice());
        }

        let mut results: Vec<Option<IngestResult<ProcessedReading>>> =
            (0..readings.len()).map(|_| None).collect();

        std::thread::scope(|scope| {
            let handles: Vec<_> = assigned
                .into_iter()
                .map(|worker_groups| {
                    scope.spawn(move || {
                        worker_groups
                            .into_iter()
                            .flatten()
                            .map(|&i| (i, self.ingest(&readings[i])))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(done) => {
                        for (i, result) in done {
                            results[i] = Some(result);
                        }
                    }
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
        });

        results.into_iter().flatten().collect()
    }

    /// Aggregate scorecards over a window, for one battery or all
    pub fn scorecard(&self, window: TimeWindow, battery_id: Option<&BatteryId>) -> PerformanceReport {
        let mut report = ReportBuilder::new(window, battery_id.cloned(), self.config.harness.energy);

        let ids = match battery_id {
            Some(id) => vec![id.clone()],
            None => self.store.battery_ids(),
        };
        for id in ids {
            if let Some(shared) = self.store.get(&id) {
                report.add_history(&lock_slot(&shared).history);
            }
        }

        report.build()
    }

    /// Copy of one battery's profile and state
    pub fn battery_snapshot(&self, battery_id: &BatteryId) -> Option<BatterySnapshot> {
        self.store
            .get(battery_id)
            .map(|shared| lock_slot(&shared).snapshot())
    }

    /// Ids of all known batteries, sorted
    pub fn batteries(&self) -> Vec<BatteryId> {
        self.store.battery_ids()
    }

    /// Replace a battery's profile
    ///
    /// Existing state is kept: SoC carries over and the coulomb accumulator
    /// is rescaled to the new capacity. A battery halted by a bad capacity
    /// resumes with its next reading.
    pub fn reconfigure_battery(
        &self,
        battery_id: &BatteryId,
        profile: BatteryProfile,
    ) -> ConfigResult<()> {
        profile.validate()?;
        let pipeline = BatteryPipeline::new(&profile, self.config.kalman, self.config.soh);

        loop {
            let shared = self
                .store
                .get_or_insert_with(battery_id, &|| self.new_slot(battery_id));
            let mut guard = lock_slot(&shared);
            if guard.evicted {
                continue;
            }

            let slot = &mut *guard;
            if let Some(state) = slot.state.as_mut() {
                pipeline.adopt(state);
            }
            log::info!(
                "Battery {} reconfigured: {} Ah, R0 {} Ω",
                battery_id,
                profile.capacity_ah,
                profile.internal_resistance_ohm
            );
            slot.pipeline = pipeline;
            slot.profile = profile;
            return Ok(());
        }
    }

    /// Drop batteries whose last reading is older than `cutoff`
    ///
    /// A battery that never got state, for example one halted by a bad
    /// capacity, ages by its last well-formed reading. Slots created by
    /// `reconfigure_battery` that have not seen a reading yet are kept.
    pub fn evict_idle(&self, cutoff: Timestamp) -> Vec<BatteryId> {
        let mut evicted = Vec::new();
        for id in self.store.battery_ids() {
            let Some(shared) = self.store.get(&id) else {
                continue;
            };
            let mut slot = lock_slot(&shared);
            let last = match slot.last_activity() {
                Some(last) if last < cutoff => last,
                _ => continue,
            };

            slot.evicted = true;
            self.store.remove(&id);
            log::info!("Battery {} evicted, last reading at {}", id, last);
            evicted.push(id);
        }
        evicted
    }

    fn new_slot(&self, battery_id: &BatteryId) -> BatterySlot {
        let profile = self.config.profile_for(battery_id);
        let pipeline = BatteryPipeline::new(&profile, self.config.kalman, self.config.soh);
        BatterySlot::new(
            battery_id.clone(),
            profile,
            pipeline,
            EvalHistory::new(self.config.harness.history_capacity),
        )
    }

    fn process(&self, slot: &mut BatterySlot, raw: &RawReading) -> IngestResult<ProcessedReading> {
        let last_timestamp = slot.state.as_ref().map(|state| state.last_timestamp);
        let reading = match self.normalizer.finish(slot.battery_id.clone(), raw, last_timestamp) {
            Ok(reading) => reading,
            Err(error) => {
                self.raise(EngineEvent::InvalidReading {
                    battery_id: Some(slot.battery_id.clone()),
                    timestamp: raw.timestamp,
                    error,
                });
                return Err(error.into());
            }
        };

        slot.last_seen = Some(reading.timestamp);

        let (mut state, registration) = match slot.state.take() {
            Some(state) => (state, None),
            None => match slot.pipeline.register(&reading) {
                Ok(registration) => (
                    registration.state,
                    Some((registration.seeded_from_ocv, registration.initial_soc_pct)),
                ),
                Err(err) => return Err(self.estimation_failed(&reading, err)),
            },
        };

        let result = slot.pipeline.step(&self.harness, &mut state, &reading);
        // A new battery only gets state once its first step succeeded
        if result.is_ok() || registration.is_none() {
            slot.state = Some(state);
        }
        let outcome = result.map_err(|err| self.estimation_failed(&reading, err))?;

        if let Some((seeded_from_ocv, initial_soc_pct)) = registration {
            self.raise(EngineEvent::BatteryRegistered {
                battery_id: reading.battery_id.clone(),
                timestamp: reading.timestamp,
                seeded_from_ocv,
                initial_soc_pct,
            });
        }

        let kf = &outcome.kf;
        if !kf.update_accepted {
            self.raise(EngineEvent::DivergenceDetected {
                battery_id: reading.battery_id.clone(),
                timestamp: reading.timestamp,
                innovation_v: kf.innovation_v,
                gate_v: kf.gate_v(slot.pipeline.kalman_config().gate_sigma),
                consecutive: kf.consecutive_rejections,
            });
        }
        if kf.covariance_reset {
            self.raise(EngineEvent::CovarianceReset {
                battery_id: reading.battery_id.clone(),
                timestamp: reading.timestamp,
            });
        }
        if let Some(cycle) = outcome.soh.cycle {
            self.raise(EngineEvent::CycleCompleted {
                battery_id: reading.battery_id.clone(),
                timestamp: reading.timestamp,
                swing_pct: cycle.swing_pct,
                fade_ratio: cycle.fade_ratio,
                soh_pct: outcome.soh.soh_pct,
            });
        }
        if reading.dt_clamped {
            log::debug!(
                "Battery {}: gap before {} clamped to {} s",
                reading.battery_id,
                reading.timestamp,
                reading.dt_s
            );
        }

        slot.history.push(EvalRecord {
            timestamp: reading.timestamp,
            metrics: outcome.metrics,
        });

        log::trace!(
            "Battery {} @ {}: ocv {:.2}%{} cc {:.2}% kf {:.2}% ±{:.2} soh {:.1}%",
            reading.battery_id,
            reading.timestamp,
            outcome.ocv.soc_pct,
            if outcome.ocv.stale { " (stale)" } else { "" },
            outcome.cc.soc_pct,
            kf.soc_pct,
            kf.soc_std_pct,
            outcome.soh.soh_pct
        );

        Ok(ProcessedReading {
            power_mw: reading.power_mw(),
            timestamp: reading.timestamp,
            voltage_v: reading.voltage_v,
            current_a: reading.current_a,
            soc_kf: kf.soc_pct,
            soc_ocv: outcome.ocv.soc_pct,
            soc_cc: outcome.cc.soc_pct,
            soh_pct: outcome.soh.soh_pct,
            kf_update_accepted: kf.update_accepted,
            eval_metrics: outcome.metrics,
            battery_id: reading.battery_id,
        })
    }

    fn estimation_failed(&self, reading: &NormalizedReading, err: EstimationError) -> IngestError {
        match err {
            EstimationError::CapacityMisconfigured { capacity_ah } => {
                self.raise(EngineEvent::CapacityMisconfigured {
                    battery_id: reading.battery_id.clone(),
                    timestamp: reading.timestamp,
                    capacity_ah,
                });
            }
            EstimationError::NumericalInstability => log::warn!(
                "Battery {}: estimation failed at {}: {}",
                reading.battery_id,
                reading.timestamp,
                err
            ),
        }
        err.into()
    }

    fn publish(&self, reading: &ProcessedReading) {
        if let Err(failure) = self.publisher.publish(reading) {
            log::debug!("Last publish error for {}: {}", reading.battery_id, failure.error);
            self.raise(EngineEvent::PublishFailed {
                battery_id: reading.battery_id.clone(),
                timestamp: reading.timestamp,
                attempts: failure.attempts,
            });
        }
    }

    fn raise(&self, event: EngineEvent) {
        match event.level() {
            EventLevel::Info => log::info!("{}", event.message()),
            EventLevel::Warning | EventLevel::Error => log::warn!("{}", event.message()),
        }
        self.events.emit(event);
    }
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("batteries", &self.store.len())
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}
