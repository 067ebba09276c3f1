//! Configuration types for the pump control engine.
//!
//! These are the runtime configuration structs consumed by the controller
//! and the actuation loop. They are separate from the TOML-deserialized
//! config in `pump_config`; see `conversions` for the mapping.

/// Second-order setpoint shaping parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointFilterCfg {
    /// Natural frequency in Hz (ωn = 2π·freq_hz).
    pub freq_hz: f32,
    /// Damping ratio ζ. Values ≥ 1.0 give a non-overshooting trajectory.
    pub damping: f32,
}

impl Default for SetpointFilterCfg {
    fn default() -> Self {
        Self {
            freq_hz: 1.0,
            damping: 1.2,
        }
    }
}

/// Scalar Kalman filter for the raw pressure signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanCfg {
    /// Measurement uncertainty (bar).
    pub measurement_error: f32,
    /// Initial estimate uncertainty (bar).
    pub estimate_error: f32,
    /// Process noise. `None` derives `(3·dt)²` from the loop period.
    pub process_noise: Option<f32>,
}

impl Default for KalmanCfg {
    fn default() -> Self {
        Self {
            measurement_error: 0.1,
            estimate_error: 10.0,
            process_noise: None,
        }
    }
}

/// Recursive least-squares resistance estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RlsCfg {
    /// Prior resistance, bar·s/m³.
    pub initial_resistance: f32,
    /// Prior covariance of the normalized estimate.
    pub initial_covariance: f32,
    /// Forgetting factor λ in (0, 1].
    pub forgetting: f32,
    /// Pressure (bar) above which the path is considered pressurized.
    pub pressurized_bar: f32,
    /// Minimum pump-side flow (ml/s) for an update to carry information.
    pub min_flow_ml_s: f32,
    /// Relative residual scale for the consistency score.
    pub residual_tolerance: f32,
    /// Convergence score smoothing factor in (0, 1].
    pub score_gain: f32,
    /// Upper bound on the estimate before the estimator resets (bar·s/m³).
    pub max_resistance: f32,
    /// Upper bound on the covariance before the estimator resets.
    pub max_covariance: f32,
}

impl Default for RlsCfg {
    fn default() -> Self {
        Self {
            initial_resistance: 5e6,
            initial_covariance: 100.0,
            forgetting: 0.98,
            pressurized_bar: 1.0,
            min_flow_ml_s: 0.05,
            residual_tolerance: 0.05,
            score_gain: 0.05,
            max_resistance: 1e9,
            max_covariance: 1e6,
        }
    }
}

/// Sliding-mode duty controller gains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlidingModeCfg {
    /// Switching gain K.
    pub k: f32,
    /// Convergence gain λ on the error.
    pub lambda: f32,
    /// Fixed weight κ on the error derivative.
    pub kappa: f32,
    /// Proportional weight c on |s|.
    pub c: f32,
    /// Boundary-layer width ε.
    pub epsilon: f32,
    /// Uncertainty gain ρ.
    pub rho: f32,
    /// Integral gain Ki.
    pub ki: f32,
    /// Anti-windup limit on |Ki·∫e|.
    pub integral_limit: f32,
    /// Integration is gated until filtered pressure exceeds this (bar).
    pub priming_bar: f32,
}

impl Default for SlidingModeCfg {
    fn default() -> Self {
        Self {
            k: 0.3,
            lambda: 3.0,
            kappa: 0.1,
            c: 0.1,
            epsilon: 1.5,
            rho: 0.0,
            ki: 0.4,
            integral_limit: 1000.0,
            priming_bar: 1.0,
        }
    }
}

/// Vibratory pump hydraulic model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpModel {
    /// No-load flow at 0 bar, ml/s.
    pub q0_ml_s: f32,
    /// Stall pressure, bar.
    pub pmax_bar: f32,
    /// Exponent n of the empirical puck law `P = R·Q^n`.
    pub puck_exponent: f32,
}

impl Default for PumpModel {
    fn default() -> Self {
        Self {
            q0_ml_s: 14.0,
            pmax_bar: 15.0,
            puck_exponent: 1.2,
        }
    }
}

/// Mode arbitration thresholds.
///
/// The two bands are deliberately separate knobs: one is absolute (bar),
/// the other relative to the shaped setpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArbiterCfg {
    /// Convergence score at which the resistance estimate is trusted.
    pub converged_score: f32,
    /// |r − P| below which pump flow ≈ puck flow (bar).
    pub steady_band_bar: f32,
    /// |r − P|/r below which the setpoint counts as reached.
    pub reached_band_rel: f32,
    /// Max duty change (percent) on the tick the duty path changes.
    pub transfer_slew_pct: f32,
}

impl Default for ArbiterCfg {
    fn default() -> Self {
        Self {
            converged_score: 0.9,
            steady_band_bar: 0.2,
            reached_band_rel: 0.2,
            transfer_slew_pct: 25.0,
        }
    }
}

/// Plausibility window for raw sensor samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorGuardCfg {
    pub min_bar: f32,
    pub max_bar: f32,
    /// Consecutive invalid samples after which closed-loop duty is forced to 0.
    pub fault_ticks: u32,
}

impl Default for SensorGuardCfg {
    fn default() -> Self {
        Self {
            min_bar: -1.0,
            max_bar: 20.0,
            fault_ticks: 10,
        }
    }
}

/// Actuation loop timing and mains detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopCfg {
    /// Fixed tick period in milliseconds.
    pub period_ms: u64,
    /// Detected half-cycle rates above this are treated as double-counted.
    pub max_half_cycles_per_second: u32,
    /// Divider requested from the actuator when double counting is detected.
    pub clock_divider: u8,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            period_ms: 50,
            max_half_cycles_per_second: 70,
            clock_divider: 2,
        }
    }
}

impl LoopCfg {
    /// Tick period in seconds.
    #[inline]
    pub fn dt(&self) -> f32 {
        self.period_ms.max(1) as f32 / 1000.0
    }

    /// Ticks per second, at least 1.
    #[inline]
    pub fn ticks_per_second(&self) -> f32 {
        (1000.0 / self.period_ms.max(1) as f32).max(1.0)
    }
}

/// Which duty-cycle strategy drives PRESSURE and FLOW modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlStrategyKind {
    /// Kalman + RLS + sliding-mode model.
    #[default]
    Model,
    /// Calibration-based gain table.
    GainTable,
}

/// Legacy gain-table strategy parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainTableCfg {
    /// Pump displacement per fired half-cycle at 0 bar, ml.
    pub ml_per_half_cycle: f32,
}

impl Default for GainTableCfg {
    fn default() -> Self {
        Self {
            ml_per_half_cycle: 0.28,
        }
    }
}

/// Everything the model-based controller needs, bundled.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControllerCfg {
    pub setpoint: SetpointFilterCfg,
    pub kalman: KalmanCfg,
    pub rls: RlsCfg,
    pub sliding: SlidingModeCfg,
    pub pump: PumpModel,
    pub arbiter: ArbiterCfg,
    pub sensor: SensorGuardCfg,
}
