//! Engine plumbing across batteries
//!
//! Batch ingestion, scorecards, sinks, event delivery and configuration files.

#[macro_use]
mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use socbench_core::{
    config::{BatteryProfile, ProfileOverride},
    errors::PublishResult,
    harness::Algorithm,
    store::{BatterySlot, SharedSlot},
    BatteryId, Engine, EngineEvent, EventSink, InMemoryStore, IngestError, JsonLinesSink,
    MemorySink, OcvTable, ProcessedReading, RawReading, ReadingSink, SocConfig, StateStore,
    TimeWindow,
};

use common::{count_events, engine, engine_with, CellSimulator};

fn id(s: &str) -> BatteryId {
    BatteryId::new(s).unwrap()
}

/// Interleaved readings from several simulated cells
fn fleet(names: &[&str], steps: usize) -> Vec<RawReading> {
    let mut cells: Vec<CellSimulator> = names
        .iter()
        .enumerate()
        .map(|(i, name)| CellSimulator::new(name, 100.0, 40.0 + 10.0 * i as f32).with_noise(0.003))
        .collect();

    let mut readings: Vec<RawReading> = cells.iter_mut().map(|c| c.sample(0.0)).collect();
    for step in 0..steps {
        for (i, cell) in cells.iter_mut().enumerate() {
            let current = if (step / 20 + i) % 2 == 0 { -15.0 } else { 0.0 };
            readings.push(cell.step(current, 10_000));
        }
    }
    readings
}

fn parallel_config() -> SocConfig {
    SocConfig {
        workers: 4,
        ..SocConfig::default()
    }
}

#[test]
fn batch_matches_sequential() {
    let names = ["a", "b", "c", "d", "e"];
    let mut readings = fleet(&names, 60);
    // One duplicate and one bad sample in the middle of the batch
    readings.insert(40, readings[30].clone());
    readings.insert(70, RawReading::new("c", 999_999_999, f32::NAN, 0.0));

    let batched = Engine::new(parallel_config()).unwrap();
    let sequential = Engine::new(parallel_config()).unwrap();

    let batch_results = batched.ingest_batch(&readings);
    let seq_results: Vec<_> = readings.iter().map(|r| sequential.ingest(r)).collect();
    assert_eq!(batch_results.len(), readings.len());

    for (b, s) in batch_results.iter().zip(&seq_results) {
        match (b, s) {
            (Ok(b), Ok(s)) => {
                assert_eq!(b.battery_id, s.battery_id);
                assert_eq!(b.timestamp, s.timestamp);
                assert_eq!(b.soc_kf, s.soc_kf);
                assert_eq!(b.soc_cc, s.soc_cc);
                assert_eq!(b.soc_ocv, s.soc_ocv);
                assert_eq!(b.kf_update_accepted, s.kf_update_accepted);
            }
            (Err(b), Err(s)) => assert_eq!(b, s),
            other => panic!("batch and sequential disagree: {:?}", other),
        }
    }

    for name in names {
        let b = batched.battery_snapshot(&id(name)).unwrap();
        let s = sequential.battery_snapshot(&id(name)).unwrap();
        assert_eq!(b.state, s.state);
        assert_eq!(b.history_len, s.history_len);
    }
}

#[test]
fn batch_keeps_input_order() {
    let engine = Engine::new(parallel_config()).unwrap();
    let readings = fleet(&["x", "y", "z"], 10);

    let results = engine.ingest_batch(&readings);
    for (raw, result) in readings.iter().zip(&results) {
        let processed = result.as_ref().unwrap();
        assert_eq!(processed.battery_id.as_str(), raw.battery_id);
        assert_eq!(processed.timestamp, raw.timestamp);
    }
}

#[test]
fn misconfigured_battery_does_not_block_others() {
    let mut config = parallel_config();
    config.batteries.insert(
        "broken".to_string(),
        ProfileOverride {
            capacity_ah: Some(-5.0),
            ..ProfileOverride::default()
        },
    );
    let engine = Engine::new(config).unwrap();

    let readings = vec![
        RawReading::new("broken", 0, 3.7, -1.0),
        RawReading::new("fine", 0, 3.7, -1.0),
        RawReading::new("broken", 1_000, 3.7, -1.0),
        RawReading::new("fine", 1_000, 3.7, -1.0),
    ];
    let results = engine.ingest_batch(&readings);

    assert_eq!(
        results[0],
        Err(IngestError::CapacityMisconfigured { capacity_ah: -5.0 })
    );
    assert!(results[1].is_ok());
    assert!(results[2].is_err());
    assert!(results[3].is_ok());

    let events = engine.drain_events();
    assert_eq!(count_events(&events, "capacity_misconfigured"), 2);
    assert_eq!(count_events(&events, "battery_registered"), 1);
    assert!(engine.battery_snapshot(&id("broken")).unwrap().state.is_none());
}

#[test]
fn scorecard_aggregates_over_window() {
    let engine = engine();
    for t in 1..=10u64 {
        engine.ingest(&RawReading::new("a", t * 1_000, 3.7, -10.0)).unwrap();
    }
    for t in 1..=5u64 {
        engine.ingest(&RawReading::new("b", t * 1_000, 3.7, -10.0)).unwrap();
    }

    let a = engine.scorecard(TimeWindow::new(3_000, 6_000), Some(&id("a")));
    assert_eq!(a.readings, 4);
    assert_eq!(a.battery_id, Some(id("a")));
    for alg in Algorithm::ALL {
        assert_eq!(a.algorithm(alg).samples, 4);
        assert!(a.algorithm(alg).energy_uj > 0.0);
    }
    // Under load OCV is always held
    assert_eq!(a.algorithm(Algorithm::Ocv).stale_ratio, 1.0);
    assert_eq!(a.algorithm(Algorithm::Kf).stale_ratio, 0.0);

    let all = engine.scorecard(TimeWindow::all(), None);
    assert_eq!(all.readings, 15);
    assert_eq!(all.battery_id, None);

    let empty = engine.scorecard(TimeWindow::new(50_000, 60_000), None);
    assert_eq!(empty.readings, 0);
    assert_eq!(empty.most_accurate(), None);

    let unknown = engine.scorecard(TimeWindow::all(), Some(&id("nobody")));
    assert_eq!(unknown.readings, 0);
}

#[test]
fn stale_ocv_scores_worst_under_load() {
    let engine = engine();
    let mut cell = CellSimulator::new("load", 100.0, 70.0);
    engine.ingest(&cell.sample(-10.0)).unwrap();
    for reading in cell.constant(-10.0, 10_000, 30) {
        engine.ingest(&reading).unwrap();
    }

    let report = engine.scorecard(TimeWindow::all(), None);
    let ocv = report.algorithm(Algorithm::Ocv);
    assert!(ocv.mean_error_index >= 100.0);
    assert_ne!(report.most_accurate(), Some(Algorithm::Ocv));
}

#[test]
fn history_is_bounded_per_battery() {
    let mut config = SocConfig::default();
    config.harness.history_capacity = 8;
    let engine = Engine::new(config).unwrap();

    for t in 0..20u64 {
        engine.ingest(&RawReading::new("a", t * 1_000, 3.7, 0.0)).unwrap();
    }
    assert_eq!(engine.battery_snapshot(&id("a")).unwrap().history_len, 8);
    assert_eq!(engine.scorecard(TimeWindow::all(), None).readings, 8);
}

/// Sink that refuses everything
struct RefusingSink;

impl ReadingSink for RefusingSink {
    fn publish(&self, _reading: &ProcessedReading) -> PublishResult<()> {
        Err(socbench_core::PublishError::Rejected { reason: "offline" })
    }
}

#[test]
fn publish_failure_keeps_estimation() {
    let mut config = SocConfig::default();
    config.publisher.max_attempts = 2;
    let engine = Engine::builder(config)
        .with_sink(Arc::new(RefusingSink))
        .build()
        .unwrap();

    let processed = engine.ingest(&RawReading::new("a", 0, 3.7, 0.0)).unwrap();
    assert!(processed.soc_kf > 0.0);
    assert!(engine.battery_snapshot(&id("a")).unwrap().state.is_some());

    let events = engine.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::PublishFailed { attempts: 2, .. }
    )));
}

#[test]
fn json_lines_sink_receives_every_reading() {
    let sink = Arc::new(JsonLinesSink::new(Vec::new()));
    let engine = Engine::builder(SocConfig::default())
        .with_sink(sink.clone())
        .build()
        .unwrap();

    for t in 0..3u64 {
        engine.ingest(&RawReading::new("a", t * 1_000, 3.7, -2.0)).unwrap();
    }
    drop(engine);

    let sink = Arc::try_unwrap(sink).ok().unwrap();
    let text = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2]["batteryId"], "a");
    assert_eq!(lines[2]["timestamp"], 2_000);
    assert_eq!(lines[2]["evalMetrics"].as_array().unwrap().len(), 3);
}

/// Event sink that records everything
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[test]
fn custom_event_sink_replaces_queue() {
    let events = Arc::new(RecordingSink::default());
    let engine = Engine::builder(SocConfig::default())
        .with_event_sink(events.clone())
        .build()
        .unwrap();

    engine.ingest(&RawReading::new("a", 0, 3.7, 0.0)).unwrap();
    let _ = engine.ingest(&RawReading::new("a", 0, 3.7, 0.0));

    assert!(engine.event_queue().is_none());
    assert!(engine.drain_events().is_empty());

    let recorded = events.events.lock().unwrap();
    let kinds: Vec<_> = recorded.iter().map(EngineEvent::kind).collect();
    assert_eq!(kinds, vec!["battery_registered", "invalid_reading"]);
}

#[test]
fn memory_sink_and_config_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "default_profile": {{ "capacity_ah": 50.0 }},
            "batteries": {{ "big": {{ "capacity_ah": 200.0 }} }},
            "normalizer": {{ "current_convention": "positive_discharge" }}
        }}"#
    )
    .unwrap();

    let config = SocConfig::from_path(file.path()).unwrap();
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::builder(config).with_sink(sink.clone()).build().unwrap();

    // Positive current discharges under this convention
    engine.ingest(&RawReading::new("big", 0, 3.7, 10.0)).unwrap();
    let processed = engine.ingest(&RawReading::new("big", 3_600_000, 3.7, 10.0)).unwrap();
    assert_eq!(processed.current_a, -10.0);

    // Gap clamped to 60 s: 10 A for 60 s on 200 Ah
    assert_within_tolerance!(processed.soc_cc, 50.0 - 10.0 * 60.0 / 3600.0 / 200.0 * 100.0, 1e-4);

    assert_eq!(sink.len(), 2);
    assert_eq!(
        engine.battery_snapshot(&id("big")).unwrap().profile.capacity_ah,
        200.0
    );
}

#[test]
fn concurrent_ingest_from_many_threads() {
    let engine = engine();
    let names = ["t0", "t1", "t2", "t3"];

    std::thread::scope(|scope| {
        for name in names {
            let engine = &engine;
            scope.spawn(move || {
                for t in 0..50u64 {
                    engine.ingest(&RawReading::new(name, t * 1_000, 3.7, -5.0)).unwrap();
                }
            });
        }
    });

    assert_eq!(engine.batteries().len(), 4);
    for name in names {
        let state = engine.battery_snapshot(&id(name)).unwrap().state.unwrap();
        assert_eq!(state.last_timestamp, 49_000);
    }
    assert_eq!(engine.scorecard(TimeWindow::all(), None).readings, 200);
}

#[test]
fn egress_follows_acceptance_order() {
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::builder(SocConfig::default())
        .with_sink(sink.clone())
        .build()
        .unwrap();

    // Four producers race on one battery; late readings are rejected
    std::thread::scope(|scope| {
        for offset in 0..4u64 {
            let engine = &engine;
            scope.spawn(move || {
                for t in 0..100u64 {
                    let _ = engine.ingest(&RawReading::new("shared", t * 4_000 + offset * 1_000, 3.7, -5.0));
                }
            });
        }
    });

    let published = sink.readings();
    assert!(!published.is_empty());
    assert!(published.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    let state = engine.battery_snapshot(&id("shared")).unwrap().state.unwrap();
    assert_eq!(published.last().unwrap().timestamp, state.last_timestamp);
}

/// Store that counts slot creations
#[derive(Default)]
struct CountingStore {
    inner: InMemoryStore,
    created: AtomicUsize,
}

impl StateStore for CountingStore {
    fn get(&self, battery_id: &BatteryId) -> Option<SharedSlot> {
        self.inner.get(battery_id)
    }

    fn get_or_insert_with(&self, battery_id: &BatteryId, make: &dyn Fn() -> BatterySlot) -> SharedSlot {
        self.inner.get_or_insert_with(battery_id, &|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            make()
        })
    }

    fn remove(&self, battery_id: &BatteryId) -> Option<SharedSlot> {
        self.inner.remove(battery_id)
    }

    fn battery_ids(&self) -> Vec<BatteryId> {
        self.inner.battery_ids()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[test]
fn custom_store_holds_battery_slots() {
    let store = Arc::new(CountingStore::default());
    let engine = Engine::builder(SocConfig::default())
        .with_store(store.clone())
        .build()
        .unwrap();

    for t in 0..3u64 {
        engine.ingest(&RawReading::new("a", t * 1_000, 3.7, -5.0)).unwrap();
    }
    engine.ingest(&RawReading::new("b", 10_000, 3.7, -5.0)).unwrap();

    assert_eq!(store.created.load(Ordering::Relaxed), 2);
    assert_eq!(store.len(), 2);
    assert_eq!(engine.batteries(), store.battery_ids());

    assert_eq!(engine.evict_idle(5_000), vec![id("a")]);
    assert_eq!(store.battery_ids(), vec![id("b")]);
}

#[test]
fn profile_table_and_resistance_drive_the_filter() {
    // Flat mid-range curve, high resistance pack
    let table = OcvTable::new(&[(3.0, 0.0), (3.2, 20.0), (3.3, 80.0), (3.5, 100.0)]).unwrap();
    let engine = engine_with(
        BatteryProfile::default()
            .with_table(table)
            .with_internal_resistance(0.05),
    );

    // Rest seed comes from the profile's table
    let first = engine.ingest(&RawReading::new("lfp", 0, 3.3, 0.0)).unwrap();
    assert_within_tolerance!(first.soc_kf, 80.0, 0.01);

    // 10 A through 50 mΩ: the terminal voltage sags by 0.5 V, which the
    // model explains, so the update passes the gate
    let loaded = engine.ingest(&RawReading::new("lfp", 10_000, 2.8, -10.0)).unwrap();
    assert!(loaded.kf_update_accepted);
    assert_within_tolerance!(loaded.soc_kf, 80.0, 0.5);
}
