//! Kalman Filter SoC Estimator
//!
//! ## Model
//!
//! First-order Thevenin cell: an OCV source, an ohmic resistance R0 and one
//! RC branch (R1, τ) whose voltage `vp` is the polarization.
//!
//! ```text
//!        R0        R1
//!  ┌───/\/\/───┬──/\/\/──┬────○ +  v
//!  │           │         │
//! (OCV)        └───||────┘
//!  │                C1   (τ = R1·C1)
//!  └─────────────────────────○ −
//! ```
//!
//! State `x = [soc, vp]`, `i_d` = discharge current (`-I` with charging
//! positive).
//!
//! ### 1. Prediction
//! ```text
//! decay = exp(-dt/τ)
//! soc'  = soc + (I·dt/3600) / capacity × 100
//! vp'   = vp·decay + R1·(1 - decay)·i_d
//! F     = [[1, 0], [0, decay]]
//! P'    = F·P·Fᵀ + Q
//! ```
//!
//! ### 2. Update
//! ```text
//! v̂ = OCV(soc') - i_d·R0 - vp'
//! y = v - v̂
//! H = [dOCV/dsoc, -1]
//! S = H·P'·Hᵀ + R          (scalar)
//! K = P'·Hᵀ / S
//! x = x' + K·y
//! P = (I - K·H)·P'·(I - K·H)ᵀ + K·R·Kᵀ   (Joseph form, then symmetrized)
//! ```
//!
//! ## Divergence Guard
//!
//! An innovation beyond `gate_sigma·√S` is treated as an inconsistent
//! measurement: the update is skipped and the prediction kept. After
//! `max_consecutive_rejections` in a row the filter stops trusting its own
//! state: the covariance goes back to the prior and SoC is re-seeded from the
//! inverted measurement model,
//!
//! ```text
//! soc = OCV⁻¹(v + i_d·R0 + vp')
//! ```
//!
//! A prior-sized gate alone would keep rejecting a seed that is far off.
//! Voltages outside the table are not trusted for re-seeding; the prediction
//! is kept.
//!
//! All intermediate results are computed on copies and committed at the end,
//! so an `Err` leaves the state untouched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        kalman::{
            DEFAULT_GATE_SIGMA, DEFAULT_INITIAL_POLARIZATION_VARIANCE, DEFAULT_INITIAL_SOC_VARIANCE,
            DEFAULT_MAX_CONSECUTIVE_REJECTIONS, DEFAULT_MEASUREMENT_NOISE,
            DEFAULT_POLARIZATION_PROCESS_NOISE, DEFAULT_POLARIZATION_RESISTANCE_OHM,
            DEFAULT_POLARIZATION_TIME_CONSTANT_S, DEFAULT_SOC_PROCESS_NOISE,
        },
        time::SECONDS_PER_HOUR,
    },
    errors::{EstimationError, EstimationResult},
    estimators::{clamp_soc, usable_capacity, Estimator},
    harness::Algorithm,
    lookup::OcvTable,
    matrix::{
        add, diagonal, identity, is_finite, make_symmetric, multiply, scale, subtract, transpose,
        Matrix, SquareMatrix, Vector,
    },
};

/// Kalman filter tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// SoC process noise per step (%²)
    pub soc_process_noise: f32,
    /// Polarization process noise per step (V²)
    pub polarization_process_noise: f32,
    /// Terminal voltage measurement variance (V²)
    pub measurement_noise: f32,
    /// Prior SoC variance (%²)
    pub initial_soc_variance: f32,
    /// Prior polarization variance (V²)
    pub initial_polarization_variance: f32,
    /// RC branch time constant (s)
    pub polarization_time_constant_s: f32,
    /// RC branch resistance (Ω); zero gives a pure decay model
    pub polarization_resistance_ohm: f32,
    /// Innovation gate in standard deviations
    pub gate_sigma: f32,
    /// Rejections in a row before the covariance resets
    pub max_consecutive_rejections: u32,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            soc_process_noise: DEFAULT_SOC_PROCESS_NOISE,
            polarization_process_noise: DEFAULT_POLARIZATION_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
            initial_soc_variance: DEFAULT_INITIAL_SOC_VARIANCE,
            initial_polarization_variance: DEFAULT_INITIAL_POLARIZATION_VARIANCE,
            polarization_time_constant_s: DEFAULT_POLARIZATION_TIME_CONSTANT_S,
            polarization_resistance_ohm: DEFAULT_POLARIZATION_RESISTANCE_OHM,
            gate_sigma: DEFAULT_GATE_SIGMA,
            max_consecutive_rejections: DEFAULT_MAX_CONSECUTIVE_REJECTIONS,
        }
    }
}

impl KalmanConfig {
    /// Set process noise (higher = less trust in coulomb counting)
    pub fn with_process_noise(mut self, soc: f32, polarization: f32) -> Self {
        self.soc_process_noise = soc;
        self.polarization_process_noise = polarization;
        self
    }

    /// Set measurement noise as a standard deviation (V)
    pub fn with_measurement_noise(mut self, sigma_v: f32) -> Self {
        self.measurement_noise = sigma_v * sigma_v;
        self
    }

    /// Set the divergence gate
    pub fn with_gate(mut self, gate_sigma: f32, max_consecutive_rejections: u32) -> Self {
        self.gate_sigma = gate_sigma;
        self.max_consecutive_rejections = max_consecutive_rejections;
        self
    }

    /// Prior covariance P0
    pub fn prior(&self) -> SquareMatrix<2> {
        diagonal([self.initial_soc_variance, self.initial_polarization_variance])
    }

    fn process_noise(&self) -> SquareMatrix<2> {
        diagonal([self.soc_process_noise, self.polarization_process_noise])
    }
}

/// Kalman estimator for one battery profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanEstimator {
    config: KalmanConfig,
    capacity_ah: f32,
    internal_resistance_ohm: f32,
}

impl KalmanEstimator {
    /// Create for a capacity (Ah) and ohmic resistance (Ω)
    pub fn new(config: KalmanConfig, capacity_ah: f32, internal_resistance_ohm: f32) -> Self {
        Self {
            config,
            capacity_ah,
            internal_resistance_ohm,
        }
    }

    /// Tuning in use
    pub fn config(&self) -> &KalmanConfig {
        &self.config
    }

    /// Predicted terminal voltage for a state
    pub fn predicted_voltage(&self, table: &OcvTable, x: &Vector<2>, current_a: f32) -> f32 {
        let discharge_a = -current_a;
        table.voltage_at(x[0]) - discharge_a * self.internal_resistance_ohm - x[1]
    }

    /// SoC whose OCV explains the measured voltage, `None` outside the table
    fn reseed_soc(&self, input: &KfInput, x_pred: &Vector<2>) -> Option<f32> {
        let discharge_a = -input.current_a;
        let ocv = input.voltage_v + discharge_a * self.internal_resistance_ohm + x_pred[1];
        match input.table.soc_at(ocv) {
            (soc, false) if soc.is_finite() => Some(clamp_soc(soc)),
            _ => None,
        }
    }

    fn predict(
        &self,
        x: Vector<2>,
        p: SquareMatrix<2>,
        current_a: f32,
        dt_s: f32,
        capacity_ah: f32,
    ) -> (Vector<2>, SquareMatrix<2>) {
        if dt_s <= 0.0 {
            return (x, p);
        }

        let tau = self.config.polarization_time_constant_s;
        let decay = if tau > 0.0 { libm::expf(-dt_s / tau) } else { 0.0 };
        let discharge_a = -current_a;

        let soc = clamp_soc(x[0] + current_a * dt_s / SECONDS_PER_HOUR / capacity_ah * 100.0);
        let vp = x[1] * decay + self.config.polarization_resistance_ohm * (1.0 - decay) * discharge_a;

        let f: SquareMatrix<2> = [[1.0, 0.0], [0.0, decay]];
        let mut p_pred = add(
            &multiply(&multiply(&f, &p), &transpose(&f)),
            &self.config.process_noise(),
        );
        make_symmetric(&mut p_pred);

        ([soc, vp], p_pred)
    }
}

/// Per-battery Kalman state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KalmanState {
    /// `[soc %, polarization V]`
    pub x: Vector<2>,
    /// Error covariance
    pub p: SquareMatrix<2>,
    /// Gate rejections in a row
    pub consecutive_rejections: u32,
}

impl KalmanState {
    /// Seed at a SoC with the configured prior
    pub fn new(soc_pct: f32, config: &KalmanConfig) -> Self {
        Self {
            x: [clamp_soc(soc_pct), 0.0],
            p: config.prior(),
            consecutive_rejections: 0,
        }
    }

    /// SoC estimate (%)
    pub fn soc_pct(&self) -> f32 {
        self.x[0]
    }

    /// Polarization voltage (V)
    pub fn polarization_v(&self) -> f32 {
        self.x[1]
    }

    /// SoC standard deviation (%)
    pub fn soc_std_pct(&self) -> f32 {
        libm::sqrtf(self.p[0][0].max(0.0))
    }
}

/// One reading as seen by the Kalman filter
#[derive(Debug, Clone, PartialEq)]
pub struct KfInput {
    /// Terminal voltage
    pub voltage_v: f32,
    /// Current, positive while charging
    pub current_a: f32,
    /// Prediction step (s), already clamped
    pub dt_s: f32,
    /// Calibration curve for the measurement model
    pub table: Arc<OcvTable>,
}

/// Kalman result for one reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KfEstimate {
    /// Posterior SoC (%)
    pub soc_pct: f32,
    /// Posterior SoC standard deviation (%)
    pub soc_std_pct: f32,
    /// Posterior polarization voltage (V)
    pub polarization_v: f32,
    /// Measured minus predicted voltage (V)
    pub innovation_v: f32,
    /// Innovation standard deviation √S (V)
    pub innovation_std_v: f32,
    /// Measurement update applied; false when the gate rejected it
    pub update_accepted: bool,
    /// Rejections in a row after this step
    pub consecutive_rejections: u32,
    /// Covariance was reset to the prior in this step
    pub covariance_reset: bool,
    /// SoC was re-seeded from the measured voltage along with the reset
    pub reseeded: bool,
}

impl KfEstimate {
    /// Gate width in volts
    pub fn gate_v(&self, gate_sigma: f32) -> f32 {
        gate_sigma * self.innovation_std_v
    }
}

impl Estimator for KalmanEstimator {
    type State = KalmanState;
    type Input = KfInput;
    type Output = EstimationResult<KfEstimate>;

    const ALGORITHM: Algorithm = Algorithm::Kf;

    fn step(&self, state: &mut KalmanState, input: KfInput) -> EstimationResult<KfEstimate> {
        let capacity_ah = usable_capacity(self.capacity_ah)?;
        let (x_pred, p_pred) = self.predict(state.x, state.p, input.current_a, input.dt_s, capacity_ah);

        let h: Matrix<1, 2> = [[input.table.slope_at(x_pred[0]), -1.0]];
        let innovation_v = input.voltage_v - self.predicted_voltage(&input.table, &x_pred, input.current_a);

        let h_t = transpose(&h);
        let p_ht = multiply(&p_pred, &h_t);
        let s = multiply(&h, &p_ht)[0][0] + self.config.measurement_noise;
        if !(s.is_finite() && s > 0.0) || !innovation_v.is_finite() {
            return Err(EstimationError::NumericalInstability);
        }
        let innovation_std_v = libm::sqrtf(s);

        if innovation_v.abs() > self.config.gate_sigma * innovation_std_v {
            let rejections = state.consecutive_rejections.saturating_add(1);
            let reset = rejections >= self.config.max_consecutive_rejections.max(1);

            let reseed = if reset {
                self.reseed_soc(&input, &x_pred)
            } else {
                None
            };

            state.x = [reseed.unwrap_or(x_pred[0]), x_pred[1]];
            state.p = if reset { self.config.prior() } else { p_pred };
            state.consecutive_rejections = if reset { 0 } else { rejections };

            if let Some(soc) = reseed {
                log::debug!("Kalman SoC re-seeded {:.2}% → {:.2}%", x_pred[0], soc);
            }

            return Ok(KfEstimate {
                soc_pct: state.soc_pct(),
                soc_std_pct: state.soc_std_pct(),
                polarization_v: state.polarization_v(),
                innovation_v,
                innovation_std_v,
                update_accepted: false,
                consecutive_rejections: rejections,
                covariance_reset: reset,
                reseeded: reseed.is_some(),
            });
        }

        // K = P'·Hᵀ / S
        let gain: Matrix<2, 1> = scale(&p_ht, 1.0 / s);
        let x_new = [
            clamp_soc(x_pred[0] + gain[0][0] * innovation_v),
            x_pred[1] + gain[1][0] * innovation_v,
        ];

        // Joseph form: (I - K·H)·P'·(I - K·H)ᵀ + K·R·Kᵀ
        let i_kh = subtract(&identity::<2>(), &multiply(&gain, &h));
        let krk = scale(&multiply(&gain, &transpose(&gain)), self.config.measurement_noise);
        let mut p_new = add(&multiply(&multiply(&i_kh, &p_pred), &transpose(&i_kh)), &krk);
        make_symmetric(&mut p_new);

        if !is_finite(&p_new) || !x_new.iter().all(|v| v.is_finite()) {
            return Err(EstimationError::NumericalInstability);
        }

        state.x = x_new;
        state.p = p_new;
        state.consecutive_rejections = 0;

        Ok(KfEstimate {
            soc_pct: state.soc_pct(),
            soc_std_pct: state.soc_std_pct(),
            polarization_v: state.polarization_v(),
            innovation_v,
            innovation_std_v,
            update_accepted: true,
            consecutive_rejections: 0,
            covariance_reset: false,
            reseeded: false,
        })
    }
}
