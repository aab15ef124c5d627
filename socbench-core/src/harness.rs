//! Evaluation Harness
//!
//! ## Overview
//!
//! Every estimator call is wrapped so the three SoC methods can be compared
//! on the same readings:
//!
//! ```text
//!            ┌──────────── EvalHarness::run ────────────┐
//! input ───→ │ Stopwatch → Estimator::step → elapsed_us │ ───→ Instrumented<Output>
//!            │ serde_json::to_vec(state).len()          │
//!            └──────────────────────────────────────────┘
//! ```
//!
//! `EvalHarness::score` then turns the three outputs into `EvalMetrics`:
//!
//! | Algorithm | Reference           | Error index                          |
//! |-----------|---------------------|--------------------------------------|
//! | OCV fresh | itself              | 0                                    |
//! | OCV stale | KF                  | \|ocv − kf\| + stale penalty         |
//! | CC        | fresh OCV, else KF  | \|cc − reference\|                   |
//! | KF        | fresh OCV           | \|kf − ocv\|                         |
//! | KF        | no fresh OCV        | posterior SoC std dev √P₀₀           |
//!
//! KF is never scored against itself.
//!
//! ## Energy Proxy
//!
//! There is no power meter on the hot path, so energy is modelled as a fixed
//! per-call cost plus active core power times measured execution time:
//!
//! ```text
//! energy_µJ = per_call_µJ(algorithm) + active_µJ_per_µs × execution_µs
//! ```
//!
//! ## History and Reports
//!
//! Each battery keeps its own bounded `EvalHistory`. `PerformanceReport`
//! aggregates any set of histories over a time window.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        buffers::DEFAULT_HISTORY_CAPACITY,
        harness::{
            ACTIVE_POWER_UJ_PER_US, CC_CALL_COST_UJ, DEFAULT_STALE_ERROR_PENALTY, KF_CALL_COST_UJ,
            OCV_CALL_COST_UJ, REPORTED_PERCENTILES,
        },
    },
    estimators::{CcEstimate, Estimator, KfEstimate, OcvEstimate},
    reading::BatteryId,
    time::{Stopwatch, TimeWindow, Timestamp},
};

/// SoC estimation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Open-circuit voltage lookup
    Ocv,
    /// Coulomb counting
    Cc,
    /// Kalman filter
    Kf,
}

impl Algorithm {
    /// All algorithms in scorecard order
    pub const ALL: [Algorithm; 3] = [Algorithm::Ocv, Algorithm::Cc, Algorithm::Kf];

    /// Position in `[ocv, cc, kf]` arrays
    pub const fn index(&self) -> usize {
        match self {
            Algorithm::Ocv => 0,
            Algorithm::Cc => 1,
            Algorithm::Kf => 2,
        }
    }

    /// Get human-readable name
    pub const fn name(&self) -> &'static str {
        match self {
            Algorithm::Ocv => "ocv",
            Algorithm::Cc => "cc",
            Algorithm::Kf => "kf",
        }
    }
}

/// Per-call scorecard entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// Which estimator
    pub algorithm: Algorithm,
    /// Wall-clock time of the estimator call (µs)
    #[serde(rename = "executionTime_us")]
    pub execution_time_us: f32,
    /// Serialized size of the estimator's persisted state
    #[serde(rename = "stateSize_bytes")]
    pub state_size_bytes: usize,
    /// Absolute SoC error against the reference (%)
    #[serde(rename = "errorIndex")]
    pub error_index: f32,
    /// OCV value was held rather than measured
    pub stale: bool,
}

/// Estimator output with its measured cost
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instrumented<T> {
    /// What the estimator returned
    pub output: T,
    /// Wall-clock time of the call (µs)
    pub execution_time_us: f32,
    /// Serialized state size after the call
    pub state_size_bytes: usize,
}

impl<T> Instrumented<T> {
    /// Replace the output, keeping the measurements
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Instrumented<U> {
        Instrumented {
            output: f(self.output),
            execution_time_us: self.execution_time_us,
            state_size_bytes: self.state_size_bytes,
        }
    }
}

impl<T, E> Instrumented<Result<T, E>> {
    /// Move the `Result` outward
    pub fn transpose(self) -> Result<Instrumented<T>, E> {
        let Instrumented {
            output,
            execution_time_us,
            state_size_bytes,
        } = self;
        output.map(|output| Instrumented {
            output,
            execution_time_us,
            state_size_bytes,
        })
    }
}

/// Energy cost model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyModel {
    /// Fixed cost per OCV call (µJ)
    pub ocv_call_uj: f32,
    /// Fixed cost per coulomb counting call (µJ)
    pub cc_call_uj: f32,
    /// Fixed cost per Kalman call (µJ)
    pub kf_call_uj: f32,
    /// Energy per µs of execution (µJ)
    pub active_uj_per_us: f32,
}

impl Default for EnergyModel {
    fn default() -> Self {
        Self {
            ocv_call_uj: OCV_CALL_COST_UJ,
            cc_call_uj: CC_CALL_COST_UJ,
            kf_call_uj: KF_CALL_COST_UJ,
            active_uj_per_us: ACTIVE_POWER_UJ_PER_US,
        }
    }
}

impl EnergyModel {
    /// Energy estimate for one call (µJ)
    pub fn energy_uj(&self, algorithm: Algorithm, execution_time_us: f32) -> f32 {
        let per_call = match algorithm {
            Algorithm::Ocv => self.ocv_call_uj,
            Algorithm::Cc => self.cc_call_uj,
            Algorithm::Kf => self.kf_call_uj,
        };
        per_call + self.active_uj_per_us * execution_time_us.max(0.0)
    }
}

/// Harness settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Error added to a stale OCV estimate (%)
    pub stale_error_penalty: f32,
    /// Scorecard entries kept per battery
    pub history_capacity: usize,
    /// Energy proxy weights
    pub energy: EnergyModel,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            stale_error_penalty: DEFAULT_STALE_ERROR_PENALTY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            energy: EnergyModel::default(),
        }
    }
}

/// Wraps estimator calls with timing, state size and error scoring
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EvalHarness {
    config: HarnessConfig,
}

impl EvalHarness {
    /// Create with settings
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    /// Settings in use
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one estimator step, measuring time and resulting state size
    pub fn run<E: Estimator>(
        &self,
        estimator: &E,
        state: &mut E::State,
        input: E::Input,
    ) -> Instrumented<E::Output> {
        let watch = Stopwatch::start();
        let output = estimator.step(state, input);
        let execution_time_us = watch.elapsed_us();

        Instrumented {
            output,
            execution_time_us,
            state_size_bytes: state_size::<E>(state),
        }
    }

    /// Score one reading's three estimates
    pub fn score(
        &self,
        ocv: &Instrumented<OcvEstimate>,
        cc: &Instrumented<CcEstimate>,
        kf: &Instrumented<KfEstimate>,
    ) -> [EvalMetrics; 3] {
        let fresh_ocv = ocv.output.fresh_soc();
        let kf_soc = kf.output.soc_pct;
        let reference = fresh_ocv.unwrap_or(kf_soc);

        let ocv_error = match fresh_ocv {
            Some(_) => 0.0,
            None => (ocv.output.soc_pct - reference).abs() + self.config.stale_error_penalty,
        };
        let cc_error = (cc.output.soc_pct - reference).abs();
        let kf_error = match fresh_ocv {
            Some(ocv_soc) => (kf_soc - ocv_soc).abs(),
            None => kf.output.soc_std_pct,
        };

        [
            metrics(Algorithm::Ocv, ocv, ocv_error, ocv.output.stale),
            metrics(Algorithm::Cc, cc, cc_error, false),
            metrics(Algorithm::Kf, kf, kf_error, false),
        ]
    }
}

fn metrics<T>(algorithm: Algorithm, call: &Instrumented<T>, error_index: f32, stale: bool) -> EvalMetrics {
    EvalMetrics {
        algorithm,
        execution_time_us: call.execution_time_us,
        state_size_bytes: call.state_size_bytes,
        error_index,
        stale,
    }
}

fn state_size<E: Estimator>(state: &E::State) -> usize {
    match serde_json::to_vec(state) {
        Ok(bytes) => bytes.len(),
        Err(err) => {
            log::warn!("{} state not serializable: {}", E::ALGORITHM.name(), err);
            0
        }
    }
}

/// Scorecards for one reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    /// Reading timestamp
    pub timestamp: Timestamp,
    /// Scorecards in `[ocv, cc, kf]` order
    pub metrics: [EvalMetrics; 3],
}

/// Bounded per-battery scorecard history
#[derive(Debug, Clone, PartialEq)]
pub struct EvalHistory {
    capacity: usize,
    records: VecDeque<EvalRecord>,
}

impl EvalHistory {
    /// Keep at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
        }
    }

    /// Append, evicting the oldest record when full
    pub fn push(&mut self, record: EvalRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Records inside a window, oldest first
    pub fn in_window(&self, window: TimeWindow) -> impl Iterator<Item = &EvalRecord> + '_ {
        self.records.iter().filter(move |r| window.contains(r.timestamp))
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no records are stored
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Aggregated scorecard for one algorithm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmReport {
    /// Which estimator
    pub algorithm: Algorithm,
    /// Calls aggregated
    pub samples: usize,
    /// Mean execution time (µs)
    pub mean_execution_us: f32,
    /// Execution time at `REPORTED_PERCENTILES` (µs)
    pub execution_percentiles_us: [f32; 3],
    /// Slowest call (µs)
    pub max_execution_us: f32,
    /// Mean error index (%)
    pub mean_error_index: f32,
    /// Largest error index (%)
    pub max_error_index: f32,
    /// Mean serialized state size
    pub mean_state_size_bytes: f32,
    /// Largest serialized state size
    pub peak_state_size_bytes: usize,
    /// Share of calls flagged stale
    pub stale_ratio: f32,
    /// Cumulative energy proxy (µJ)
    pub energy_uj: f32,
}

/// Scorecards for all three algorithms over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// First timestamp included
    pub window_start: Timestamp,
    /// Last timestamp included
    pub window_end: Timestamp,
    /// Battery filter, `None` for all batteries
    pub battery_id: Option<BatteryId>,
    /// Readings aggregated
    pub readings: usize,
    /// Per-algorithm aggregates in `[ocv, cc, kf]` order
    pub algorithms: [AlgorithmReport; 3],
}

impl PerformanceReport {
    /// Report for one algorithm
    pub fn algorithm(&self, algorithm: Algorithm) -> &AlgorithmReport {
        &self.algorithms[algorithm.index()]
    }

    /// Algorithm with the lowest mean error index, `None` without samples
    pub fn most_accurate(&self) -> Option<Algorithm> {
        if self.readings == 0 {
            return None;
        }
        self.algorithms
            .iter()
            .min_by(|a, b| a.mean_error_index.total_cmp(&b.mean_error_index))
            .map(|r| r.algorithm)
    }
}

/// Collects records into a `PerformanceReport`
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    window: TimeWindow,
    battery_id: Option<BatteryId>,
    energy: EnergyModel,
    readings: usize,
    execution_us: [Vec<f32>; 3],
    error_sum: [f64; 3],
    error_max: [f32; 3],
    size_sum: [f64; 3],
    size_peak: [usize; 3],
    stale: [usize; 3],
    energy_uj: [f64; 3],
}

impl ReportBuilder {
    /// Start an empty report
    pub fn new(window: TimeWindow, battery_id: Option<BatteryId>, energy: EnergyModel) -> Self {
        Self {
            window,
            battery_id,
            energy,
            readings: 0,
            execution_us: [Vec::new(), Vec::new(), Vec::new()],
            error_sum: [0.0; 3],
            error_max: [0.0; 3],
            size_sum: [0.0; 3],
            size_peak: [0; 3],
            stale: [0; 3],
            energy_uj: [0.0; 3],
        }
    }

    /// Add every record of a history that falls in the window
    pub fn add_history(&mut self, history: &EvalHistory) {
        for record in history.in_window(self.window) {
            self.add(record);
        }
    }

    /// Add one record
    pub fn add(&mut self, record: &EvalRecord) {
        self.readings += 1;
        for m in &record.metrics {
            let i = m.algorithm.index();
            self.execution_us[i].push(m.execution_time_us);
            self.error_sum[i] += m.error_index as f64;
            self.error_max[i] = self.error_max[i].max(m.error_index);
            self.size_sum[i] += m.state_size_bytes as f64;
            self.size_peak[i] = self.size_peak[i].max(m.state_size_bytes);
            if m.stale {
                self.stale[i] += 1;
            }
            self.energy_uj[i] += self.energy.energy_uj(m.algorithm, m.execution_time_us) as f64;
        }
    }

    /// Finish aggregation
    pub fn build(mut self) -> PerformanceReport {
        let algorithms = Algorithm::ALL.map(|algorithm| {
            let i = algorithm.index();
            let times = &mut self.execution_us[i];
            times.sort_by(|a, b| a.total_cmp(b));

            let samples = times.len();
            let mean = |sum: f64| if samples == 0 { 0.0 } else { (sum / samples as f64) as f32 };
            let time_sum: f64 = times.iter().map(|&t| t as f64).sum();

            AlgorithmReport {
                algorithm,
                samples,
                mean_execution_us: mean(time_sum),
                execution_percentiles_us: REPORTED_PERCENTILES.map(|p| percentile(times, p)),
                max_execution_us: times.last().copied().unwrap_or(0.0),
                mean_error_index: mean(self.error_sum[i]),
                max_error_index: self.error_max[i],
                mean_state_size_bytes: mean(self.size_sum[i]),
                peak_state_size_bytes: self.size_peak[i],
                stale_ratio: mean(self.stale[i] as f64),
                energy_uj: self.energy_uj[i] as f32,
            }
        });

        PerformanceReport {
            window_start: self.window.start,
            window_end: self.window.end,
            battery_id: self.battery_id,
            readings: self.readings,
            algorithms,
        }
    }
}

/// Nearest-rank percentile of sorted values, 0 when empty
fn percentile(sorted: &[f32], pct: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = libm::ceilf(pct.clamp(0.0, 100.0) / 100.0 * sorted.len() as f32) as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
