//! Per-tick mode arbitration for the model-based strategy.
//!
//! One call to [`PressureController::tick`] takes a raw pressure sample and
//! the current operating point, and returns the duty to command plus the
//! estimates derived on the way. The controller owns all of its state; it
//! never reads shared memory.

use crate::config::ControllerCfg;
use crate::estimator::{ML_TO_M3, ResistanceEstimator};
use crate::kalman::PressureKalman;
use crate::operating_point::{ControlMode, OperatingPoint};
use crate::sensor_guard::SensorGuard;
use crate::setpoint::SetpointFilter;
use crate::sliding_mode::{SlidingInput, SlidingModeController};
use crate::util::{clamp_duty, guard_denominator, pump_headroom};
use crate::virtual_scale::{ScaleInput, VirtualScale, pump_flow_ml_s};

/// Which computation produced a tick's duty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DutyPath {
    /// Duty set directly (POWER mode).
    #[default]
    Power,
    /// Sliding-mode pressure controller.
    SlidingMode,
    /// Open-loop pump-curve inversion (FLOW mode before convergence).
    OpenLoopFlow,
    /// Calibration gain table.
    GainTable,
    /// Closed-loop mode with no trustworthy pressure; duty held at 0.
    SensorFault,
}

impl DutyPath {
    fn is_regulating(self) -> bool {
        matches!(
            self,
            DutyPath::SlidingMode | DutyPath::OpenLoopFlow | DutyPath::GainTable
        )
    }
}

impl core::fmt::Display for DutyPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DutyPath::Power => "power",
            DutyPath::SlidingMode => "sliding_mode",
            DutyPath::OpenLoopFlow => "open_loop_flow",
            DutyPath::GainTable => "gain_table",
            DutyPath::SensorFault => "sensor_fault",
        };
        f.pad(s)
    }
}

/// Everything a tick produced.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickOutput {
    pub duty_pct: f32,
    /// Filtered pressure, bar.
    pub pressure: f32,
    /// Shaped setpoint and its slope.
    pub setpoint: f32,
    pub setpoint_rate: f32,
    pub flow_ml_s: f32,
    pub volume_ml: f32,
    /// bar·s/m³.
    pub resistance: f32,
    pub convergence: f32,
    pub path: DutyPath,
    /// The raw sample passed the plausibility check.
    pub sensor_ok: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LimitedTarget {
    raw: f32,
    target: f32,
}

/// Model-based controller: Kalman + RLS + sliding mode + virtual scale.
#[derive(Debug, Clone)]
pub struct PressureController {
    cfg: ControllerCfg,
    dt: f32,
    guard: SensorGuard,
    kalman: PressureKalman,
    setpoint: SetpointFilter,
    estimator: ResistanceEstimator,
    smc: SlidingModeController,
    scale: VirtualScale,
    limited: Option<LimitedTarget>,
    last_mode: ControlMode,
    last_path: DutyPath,
    transferring: bool,
    duty_pct: f32,
}

impl PressureController {
    pub fn new(cfg: ControllerCfg, dt: f32) -> Self {
        let dt = dt.max(f32::EPSILON);
        Self {
            cfg,
            dt,
            guard: SensorGuard::new(cfg.sensor),
            kalman: PressureKalman::new(cfg.kalman, dt),
            setpoint: SetpointFilter::new(cfg.setpoint, dt),
            estimator: ResistanceEstimator::new(cfg.rls),
            smc: SlidingModeController::new(cfg.sliding, dt),
            scale: VirtualScale::new(
                cfg.pump,
                dt,
                cfg.arbiter.converged_score,
                cfg.arbiter.reached_band_rel,
            ),
            limited: None,
            last_mode: ControlMode::Power,
            last_path: DutyPath::Power,
            transferring: false,
            duty_pct: 0.0,
        }
    }

    /// Advance one tick.
    pub fn tick(&mut self, raw_pressure: f32, op: &OperatingPoint) -> TickOutput {
        let sample = self.guard.accept(raw_pressure);
        if let Some(raw) = sample {
            self.kalman.update(raw);
        }
        let p = self.kalman.estimate();

        if op.mode != self.last_mode {
            tracing::debug!(from = %self.last_mode, to = %op.mode, "control mode change");
            self.limited = None;
            if !self.last_mode.is_closed_loop() {
                self.setpoint.invalidate();
            }
            self.last_mode = op.mode;
        }

        let (duty, path) = if op.mode.is_closed_loop() && self.guard.faulted() {
            self.smc.track(p);
            (0.0, DutyPath::SensorFault)
        } else {
            match op.mode {
                ControlMode::Power => {
                    self.smc.track(p);
                    (clamp_duty(op.target), DutyPath::Power)
                }
                ControlMode::Pressure => {
                    let target = self.pressure_target(op, p);
                    (self.regulate(target, p), DutyPath::SlidingMode)
                }
                ControlMode::Flow => self.flow_duty(op, p),
            }
        };
        let duty = self.transfer(duty, path);

        let reading = self.scale.update(
            ScaleInput {
                duty_pct: duty,
                pressure: p,
                setpoint: self.setpoint.position(),
                valve_open: op.valve_open,
            },
            &mut self.estimator,
        );

        let out = TickOutput {
            duty_pct: duty,
            pressure: p,
            setpoint: self.setpoint.position(),
            setpoint_rate: self.setpoint.derivative(),
            flow_ml_s: reading.flow_ml_s,
            volume_ml: reading.volume_ml,
            resistance: self.estimator.estimate(),
            convergence: self.estimator.convergence(),
            path,
            sensor_ok: sample.is_some(),
        };
        tracing::trace!(
            duty = out.duty_pct,
            pressure = out.pressure,
            setpoint = out.setpoint,
            flow = out.flow_ml_s,
            "tick"
        );
        out
    }

    /// Pressure target after flow limiting.
    fn pressure_target(&mut self, op: &OperatingPoint, p: f32) -> f32 {
        let raw = op.target;
        let limit = op.flow_limit;
        if limit <= 0.0 {
            self.limited = None;
            return raw;
        }
        if self.estimator.is_converged(self.cfg.arbiter.converged_score) {
            self.limited = None;
            return raw.min(self.estimator.pressure_for_flow(limit));
        }
        // Near steady state pump flow equals puck flow, so the pump-side
        // estimate can scale the target down.
        let mut target = match self.limited {
            Some(l) if l.raw == raw => l.target,
            _ => {
                self.limited = None;
                raw
            }
        };
        let flow = self.scale.flow_ml_s();
        let steady = self.setpoint.is_initialized()
            && (self.setpoint.position() - p).abs() < self.cfg.arbiter.steady_band_bar;
        if steady && flow > limit {
            target *= limit / flow;
            self.limited = Some(LimitedTarget { raw, target });
        }
        target
    }

    fn flow_duty(&mut self, op: &OperatingPoint, p: f32) -> (f32, DutyPath) {
        let cap = if op.pressure_limit > 0.0 {
            op.pressure_limit
        } else {
            self.cfg.pump.pmax_bar
        };
        let target = self.estimator.pressure_for_flow(op.target).clamp(0.0, cap);
        if self.estimator.is_converged(self.cfg.arbiter.converged_score) {
            return (self.regulate(target, p), DutyPath::SlidingMode);
        }
        let (r, _) = self.setpoint.step(target);
        self.smc.track(p);
        // Flow implied by the shaped pressure under the current estimate.
        let wanted = r / guard_denominator(self.estimator.estimate() * ML_TO_M3);
        let full = pump_flow_ml_s(&self.cfg.pump, 100.0, p);
        let duty = 100.0 * wanted / guard_denominator(full);
        (clamp_duty(duty), DutyPath::OpenLoopFlow)
    }

    fn regulate(&mut self, target: f32, p: f32) -> f32 {
        let (r, dr) = self.setpoint.step(target);
        let out = self.smc.update(SlidingInput {
            pressure: p,
            setpoint: r,
            setpoint_rate: dr,
            pmax: self.cfg.pump.pmax_bar,
        });
        clamp_duty(out.duty_pct())
    }

    /// Bumpless handoff between regulating paths: after a path change the
    /// duty moves at most `transfer_slew_pct` per tick until it catches up.
    fn transfer(&mut self, duty: f32, path: DutyPath) -> f32 {
        if path != self.last_path {
            tracing::debug!(from = ?self.last_path, to = ?path, "duty path change");
            self.transferring = path.is_regulating() && self.last_path.is_regulating();
            self.last_path = path;
        }
        let out = if self.transferring {
            let slew = self.cfg.arbiter.transfer_slew_pct.max(0.0);
            let limited = duty.clamp(self.duty_pct - slew, self.duty_pct + slew);
            if limited == duty {
                self.transferring = false;
            }
            limited
        } else {
            duty
        };
        self.duty_pct = clamp_duty(out);
        self.duty_pct
    }

    /// Restore the freshly constructed control state for a new shot.
    /// Cumulative volume is kept; use [`Self::tare`] for that.
    pub fn reset(&mut self) {
        self.guard.reset();
        self.kalman.reset(0.0);
        self.setpoint = SetpointFilter::new(self.cfg.setpoint, self.dt);
        self.estimator.reset();
        self.smc.reset(0.0);
        self.scale.reset();
        self.limited = None;
        self.last_mode = ControlMode::Power;
        self.last_path = DutyPath::Power;
        self.transferring = false;
        self.duty_pct = 0.0;
    }

    /// Zero cumulative volume only.
    pub fn tare(&mut self) {
        self.scale.tare();
    }

    /// Warm-start the resistance estimate.
    pub fn seed_resistance(&mut self, resistance: f32, score: f32) {
        self.estimator.seed(resistance, score);
    }

    pub fn configure_setpoint(&mut self, cfg: crate::config::SetpointFilterCfg) {
        self.cfg.setpoint = cfg;
        self.setpoint.configure(cfg);
    }

    #[inline]
    pub fn config(&self) -> &ControllerCfg {
        &self.cfg
    }

    #[inline]
    pub fn dt(&self) -> f32 {
        self.dt
    }

    #[inline]
    pub fn duty_pct(&self) -> f32 {
        self.duty_pct
    }

    #[inline]
    pub fn pressure(&self) -> f32 {
        self.kalman.estimate()
    }

    #[inline]
    pub fn flow_ml_s(&self) -> f32 {
        self.scale.flow_ml_s()
    }

    #[inline]
    pub fn volume_ml(&self) -> f32 {
        self.scale.volume_ml()
    }

    #[inline]
    pub fn estimator(&self) -> &ResistanceEstimator {
        &self.estimator
    }

    /// Ki·∫e of the sliding-mode controller.
    #[inline]
    pub fn iterm(&self) -> f32 {
        self.smc.iterm()
    }

    #[inline]
    pub fn path(&self) -> DutyPath {
        self.last_path
    }

    #[inline]
    pub fn headroom(&self) -> f32 {
        pump_headroom(self.pressure(), self.cfg.pump.pmax_bar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> PressureController {
        PressureController::new(ControllerCfg::default(), 0.05)
    }

    #[test]
    fn power_mode_passes_duty_through() {
        let mut c = controller();
        let out = c.tick(0.0, &OperatingPoint::power(42.0));
        assert_eq!(out.duty_pct, 42.0);
        assert_eq!(out.path, DutyPath::Power);
    }

    #[test]
    fn power_mode_ignores_sensor_faults() {
        let mut c = controller();
        let out = c.tick(f32::NAN, &OperatingPoint::power(30.0));
        assert_eq!(out.duty_pct, 30.0);
        assert!(!out.sensor_ok);
    }

    #[test]
    fn closed_loop_without_valid_sample_holds_zero() {
        let mut c = controller();
        for _ in 0..5 {
            let out = c.tick(f32::NAN, &OperatingPoint::pressure(9.0, 0.0));
            assert_eq!(out.duty_pct, 0.0);
            assert_eq!(out.path, DutyPath::SensorFault);
            assert!(out.resistance.is_finite());
        }
    }

    #[test]
    fn isolated_bad_sample_holds_estimate() {
        let mut c = controller();
        let op = OperatingPoint::pressure(9.0, 0.0);
        c.tick(4.0, &op);
        let before = c.pressure();
        let out = c.tick(f32::NAN, &op);
        assert_eq!(out.pressure, before);
        assert_eq!(out.path, DutyPath::SlidingMode);
        assert!(out.duty_pct.is_finite());
    }

    #[test]
    fn converged_flow_limit_caps_pressure_target() {
        let mut c = controller();
        c.seed_resistance(2e6, 1.0);
        // 2 ml/s through 2e6 bar·s/m³ allows 4 bar.
        let out = c.tick(0.0, &OperatingPoint::pressure(9.0, 2.0));
        assert!((out.setpoint - 4.0).abs() < 1e-3);
    }

    #[test]
    fn flow_mode_targets_implied_pressure() {
        let mut c = controller();
        let out = c.tick(0.0, &OperatingPoint::flow(1.0, 0.0));
        // Prior resistance 5e6: 1 ml/s needs 5 bar.
        assert!((out.setpoint - 5.0).abs() < 1e-3);
        assert_eq!(out.path, DutyPath::OpenLoopFlow);
        assert!((out.duty_pct - 100.0 / 14.0).abs() < 1e-2);
    }

    #[test]
    fn flow_mode_respects_pressure_limit() {
        let mut c = controller();
        let out = c.tick(0.0, &OperatingPoint::flow(4.0, 6.0));
        assert!((out.setpoint - 6.0).abs() < 1e-3);
    }

    #[test]
    fn tare_leaves_estimator_alone() {
        let mut c = controller();
        c.seed_resistance(4e6, 0.95);
        let op = OperatingPoint::pressure(9.0, 0.0).with_valve(true);
        for _ in 0..40 {
            c.tick(9.0, &op);
        }
        let r = c.estimator().estimate();
        let score = c.estimator().convergence();
        c.tare();
        assert_eq!(c.volume_ml(), 0.0);
        assert_eq!(c.estimator().estimate(), r);
        assert_eq!(c.estimator().convergence(), score);
    }
}
