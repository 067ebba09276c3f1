//! `From` implementations bridging `pump_config` types to `pump_core` types.

use crate::calibration::PressureGainTable;
use crate::config::{
    ArbiterCfg, ControlStrategyKind, ControllerCfg, GainTableCfg, KalmanCfg, LoopCfg, PumpModel,
    RlsCfg, SensorGuardCfg, SetpointFilterCfg, SlidingModeCfg,
};

// ── Loop ─────────────────────────────────────────────────────────────────────

impl From<&pump_config::LoopCfg> for LoopCfg {
    fn from(c: &pump_config::LoopCfg) -> Self {
        Self {
            period_ms: c.period_ms,
            max_half_cycles_per_second: c.max_half_cycles_per_second,
            clock_divider: c.clock_divider,
        }
    }
}

// ── Filters ──────────────────────────────────────────────────────────────────

impl From<&pump_config::SetpointCfg> for SetpointFilterCfg {
    fn from(c: &pump_config::SetpointCfg) -> Self {
        Self {
            freq_hz: c.freq_hz,
            damping: c.damping,
        }
    }
}

impl From<&pump_config::KalmanCfg> for KalmanCfg {
    fn from(c: &pump_config::KalmanCfg) -> Self {
        Self {
            measurement_error: c.measurement_error,
            estimate_error: c.estimate_error,
            process_noise: c.process_noise,
        }
    }
}

// ── Estimator / controller ───────────────────────────────────────────────────

impl From<&pump_config::EstimatorCfg> for RlsCfg {
    fn from(c: &pump_config::EstimatorCfg) -> Self {
        Self {
            initial_resistance: c.initial_resistance,
            initial_covariance: c.initial_covariance,
            forgetting: c.forgetting,
            pressurized_bar: c.pressurized_bar,
            min_flow_ml_s: c.min_flow_ml_s,
            residual_tolerance: c.residual_tolerance,
            score_gain: c.score_gain,
            max_resistance: c.max_resistance,
            max_covariance: c.max_covariance,
        }
    }
}

impl From<&pump_config::ControllerCfg> for SlidingModeCfg {
    fn from(c: &pump_config::ControllerCfg) -> Self {
        Self {
            k: c.k,
            lambda: c.lambda,
            kappa: c.kappa,
            c: c.c,
            epsilon: c.epsilon,
            rho: c.rho,
            ki: c.ki,
            integral_limit: c.integral_limit,
            priming_bar: c.priming_bar,
        }
    }
}

impl From<&pump_config::PumpCfg> for PumpModel {
    fn from(c: &pump_config::PumpCfg) -> Self {
        Self {
            q0_ml_s: c.q0_ml_s,
            pmax_bar: c.pmax_bar,
            puck_exponent: c.puck_exponent,
        }
    }
}

impl From<&pump_config::ArbiterCfg> for ArbiterCfg {
    fn from(c: &pump_config::ArbiterCfg) -> Self {
        Self {
            converged_score: c.converged_score,
            steady_band_bar: c.steady_band_bar,
            reached_band_rel: c.reached_band_rel,
            transfer_slew_pct: c.transfer_slew_pct,
        }
    }
}

impl From<&pump_config::SensorCfg> for SensorGuardCfg {
    fn from(c: &pump_config::SensorCfg) -> Self {
        Self {
            min_bar: c.min_bar,
            max_bar: c.max_bar,
            fault_ticks: c.fault_ticks,
        }
    }
}

impl From<&pump_config::Config> for ControllerCfg {
    fn from(c: &pump_config::Config) -> Self {
        Self {
            setpoint: (&c.setpoint).into(),
            kalman: (&c.kalman).into(),
            rls: (&c.estimator).into(),
            sliding: (&c.controller).into(),
            pump: (&c.pump).into(),
            arbiter: (&c.arbiter).into(),
            sensor: (&c.sensor).into(),
        }
    }
}

// ── Strategy ─────────────────────────────────────────────────────────────────

impl From<pump_config::StrategyKind> for ControlStrategyKind {
    fn from(k: pump_config::StrategyKind) -> Self {
        match k {
            pump_config::StrategyKind::Model => ControlStrategyKind::Model,
            pump_config::StrategyKind::GainTable => ControlStrategyKind::GainTable,
        }
    }
}

impl From<&pump_config::StrategyCfg> for GainTableCfg {
    fn from(c: &pump_config::StrategyCfg) -> Self {
        Self {
            ml_per_half_cycle: c.ml_per_half_cycle,
        }
    }
}

impl From<&pump_config::GainTableCfg> for PressureGainTable {
    fn from(c: &pump_config::GainTableCfg) -> Self {
        PressureGainTable::new(c.gains.clone(), c.opv_pressure, c.half_cycles_per_second)
    }
}

impl From<&[pump_config::GainRow]> for PressureGainTable {
    fn from(rows: &[pump_config::GainRow]) -> Self {
        PressureGainTable::new(rows.iter().map(|r| r.gain).collect(), 0.0, 0)
    }
}
