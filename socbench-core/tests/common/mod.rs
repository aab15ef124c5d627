//! Shared fixtures for integration tests
//!
//! `CellSimulator` produces raw readings from a simple equivalent-circuit
//! cell (OCV curve, R0, one RC pair) so estimators can be checked against a
//! known true SoC.

#![allow(dead_code)]

use socbench_core::{
    config::BatteryProfile,
    constants::{
        battery::DEFAULT_INTERNAL_RESISTANCE_OHM,
        kalman::{DEFAULT_POLARIZATION_RESISTANCE_OHM, DEFAULT_POLARIZATION_TIME_CONSTANT_S},
    },
    lookup::OcvTable,
    Engine, EngineEvent, RawReading, SocConfig,
};

/// Deterministic xorshift generator
pub struct TestRng {
    state: u32,
}

impl TestRng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed.max(1) }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform in `[lo, hi)`
    pub fn gen_range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + (self.next_u32() as f32 / u32::MAX as f32) * (hi - lo)
    }
}

/// Equivalent-circuit cell producing raw readings
pub struct CellSimulator {
    pub battery_id: String,
    pub table: OcvTable,
    /// True capacity, may differ from what the engine is told
    pub capacity_ah: f32,
    pub soc_pct: f32,
    pub polarization_v: f32,
    pub timestamp: u64,
    pub noise_v: f32,
    rng: TestRng,
}

impl CellSimulator {
    pub fn new(battery_id: &str, capacity_ah: f32, soc_pct: f32) -> Self {
        Self {
            battery_id: battery_id.to_string(),
            table: OcvTable::default(),
            capacity_ah,
            soc_pct,
            polarization_v: 0.0,
            timestamp: 0,
            noise_v: 0.0,
            rng: TestRng::new(7),
        }
    }

    pub fn with_noise(mut self, noise_v: f32) -> Self {
        self.noise_v = noise_v;
        self
    }

    /// Terminal voltage for the present state at `current_a` (positive charging)
    pub fn terminal_voltage(&mut self, current_a: f32) -> f32 {
        let noise = if self.noise_v > 0.0 {
            self.rng.gen_range(-self.noise_v, self.noise_v)
        } else {
            0.0
        };
        self.table.voltage_at(self.soc_pct) + current_a * DEFAULT_INTERNAL_RESISTANCE_OHM
            - self.polarization_v
            + noise
    }

    /// Reading at the current instant, without advancing time
    pub fn sample(&mut self, current_a: f32) -> RawReading {
        let voltage = self.terminal_voltage(current_a);
        RawReading::new(&self.battery_id, self.timestamp, voltage, current_a)
    }

    /// Advance `dt_ms` at `current_a`, then sample
    pub fn step(&mut self, current_a: f32, dt_ms: u64) -> RawReading {
        let dt_s = dt_ms as f32 / 1000.0;
        self.soc_pct =
            (self.soc_pct + current_a * dt_s / 3600.0 / self.capacity_ah * 100.0).clamp(0.0, 100.0);

        let decay = libm::expf(-dt_s / DEFAULT_POLARIZATION_TIME_CONSTANT_S);
        self.polarization_v = self.polarization_v * decay
            + DEFAULT_POLARIZATION_RESISTANCE_OHM * (1.0 - decay) * -current_a;

        self.timestamp += dt_ms;
        self.sample(current_a)
    }

    /// `count` steps at constant current
    pub fn constant(&mut self, current_a: f32, dt_ms: u64, count: usize) -> Vec<RawReading> {
        (0..count).map(|_| self.step(current_a, dt_ms)).collect()
    }

    /// Steps at zero current
    pub fn rest(&mut self, dt_ms: u64, count: usize) -> Vec<RawReading> {
        self.constant(0.0, dt_ms, count)
    }

    /// Steps at `current_a` until the true SoC crosses `target_pct`
    pub fn run_to(&mut self, target_pct: f32, current_a: f32, dt_ms: u64) -> Vec<RawReading> {
        let mut readings = Vec::new();
        let charging = current_a > 0.0;
        while (charging && self.soc_pct < target_pct) || (!charging && self.soc_pct > target_pct) {
            readings.push(self.step(current_a, dt_ms));
        }
        readings
    }
}

/// Engine with default settings
pub fn engine() -> Engine {
    Engine::new(SocConfig::default()).unwrap()
}

/// Engine whose default profile is `profile`
pub fn engine_with(profile: BatteryProfile) -> Engine {
    let config = SocConfig {
        default_profile: profile,
        ..SocConfig::default()
    };
    Engine::new(config).unwrap()
}

/// Ingest all readings, failing on the first rejection
pub fn ingest_all(engine: &Engine, readings: &[RawReading]) -> Vec<socbench_core::ProcessedReading> {
    readings
        .iter()
        .map(|raw| engine.ingest(raw).unwrap())
        .collect()
}

/// Count drained events of one kind
pub fn count_events(events: &[EngineEvent], kind: &str) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

/// Assert two floats are within a tolerance
#[macro_export]
macro_rules! assert_within_tolerance {
    ($actual:expr, $expected:expr, $tolerance:expr) => {
        let (actual, expected, tolerance) = ($actual as f32, $expected as f32, $tolerance as f32);
        assert!(
            (actual - expected).abs() <= tolerance,
            "{} = {} not within {} of {}",
            stringify!($actual),
            actual,
            tolerance,
            expected
        );
    };
}
