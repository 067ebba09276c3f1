//! Calibration-based gain-table strategy.
//!
//! Predicts how much pressure one fired half-cycle adds at the current
//! pressure level (from a [`PressureGainTable`]) and fires just enough
//! half-cycles to close the error, correcting for the gain it expected on the
//! previous tick. Flow is the pump-side displacement estimate only; this
//! strategy never estimates puck resistance.

use crate::arbiter::{DutyPath, TickOutput};
use crate::calibration::PressureGainTable;
use crate::config::{GainTableCfg, PumpModel, SensorGuardCfg};
use crate::operating_point::{ControlMode, OperatingPoint};
use crate::sensor_guard::SensorGuard;
use crate::util::{clamp_duty, pump_headroom};

#[derive(Debug, Clone)]
pub struct GainTableController {
    cfg: GainTableCfg,
    pump: PumpModel,
    table: PressureGainTable,
    guard: SensorGuard,
    dt: f32,
    half_cycles_per_second: u32,
    pressure: f32,
    last_pressure: f32,
    expected_gain: f32,
    flow_ml_s: f32,
    volume_ml: f32,
    duty_pct: f32,
}

impl GainTableController {
    pub fn new(
        cfg: GainTableCfg,
        pump: PumpModel,
        sensor: SensorGuardCfg,
        table: PressureGainTable,
        dt: f32,
    ) -> Self {
        let half_cycles_per_second = table.half_cycles_per_second.max(1);
        Self {
            cfg,
            pump,
            table,
            guard: SensorGuard::new(sensor),
            dt: dt.max(f32::EPSILON),
            half_cycles_per_second,
            pressure: 0.0,
            last_pressure: 0.0,
            expected_gain: 0.0,
            flow_ml_s: 0.0,
            volume_ml: 0.0,
            duty_pct: 0.0,
        }
    }

    /// Use the mains rate detected at runtime instead of the calibration's.
    pub fn set_half_cycles_per_second(&mut self, cps: u32) {
        self.half_cycles_per_second = cps.max(1);
    }

    fn ticks_per_second(&self) -> f32 {
        1.0 / self.dt
    }

    fn cps(&self) -> f32 {
        self.half_cycles_per_second as f32
    }

    /// Pump displacement at full power and `pressure`, ml/s.
    fn max_flow(&self, pressure: f32) -> f32 {
        self.cfg.ml_per_half_cycle * self.cps() * pump_headroom(pressure, self.pump.pmax_bar)
    }

    /// Duty for a pump-side flow target.
    pub fn power_for_flow(&self, target_ml_s: f32, pressure: f32, pressure_limit: f32) -> f32 {
        if pressure_limit > 0.0 && pressure > pressure_limit {
            return 0.0;
        }
        let ratio = (target_ml_s / self.max_flow(pressure).max(f32::EPSILON)).clamp(0.0, 1.0);
        if ratio.is_nan() { 0.0 } else { ratio * 100.0 }
    }

    /// Duty for a pressure target; updates the expected gain for the next tick.
    pub fn power_for_pressure(&mut self, target: f32, pressure: f32, flow_limit: f32) -> f32 {
        let Some(gain) = self.table.gain_at(pressure) else {
            return 0.0;
        };
        let per_tick = self.cps() / self.ticks_per_second();
        let max_gain = gain * per_tick;
        let loss = self.expected_gain - (pressure - self.last_pressure);
        let need = (target - pressure) + loss;

        let duty = if need > max_gain || (need > 0.0 && max_gain <= 0.0) {
            100.0
        } else if need > 0.0 {
            100.0 * need / max_gain
        } else {
            0.0
        };
        self.last_pressure = pressure;
        self.expected_gain = duty / 100.0 * per_tick * gain;

        if flow_limit > 0.0 {
            duty.min(self.power_for_flow(flow_limit, pressure, 0.0))
        } else {
            duty
        }
    }

    pub fn tick(&mut self, raw_pressure: f32, op: &OperatingPoint) -> TickOutput {
        let sample = self.guard.accept(raw_pressure);
        if let Some(p) = sample {
            self.pressure = p;
        }
        let p = self.pressure;

        let (duty, path, setpoint) = if op.mode.is_closed_loop() && self.guard.faulted() {
            (0.0, DutyPath::SensorFault, 0.0)
        } else {
            match op.mode {
                ControlMode::Power => (op.target, DutyPath::Power, 0.0),
                ControlMode::Pressure => (
                    self.power_for_pressure(op.target, p, op.flow_limit),
                    DutyPath::GainTable,
                    op.target,
                ),
                ControlMode::Flow => (
                    self.power_for_flow(op.target, p, op.pressure_limit),
                    DutyPath::GainTable,
                    0.0,
                ),
            }
        };
        self.duty_pct = clamp_duty(duty);
        self.flow_ml_s = self.duty_pct / 100.0 * self.max_flow(p);
        if op.valve_open {
            self.volume_ml += self.flow_ml_s * self.dt;
        }

        TickOutput {
            duty_pct: self.duty_pct,
            pressure: p,
            setpoint,
            setpoint_rate: 0.0,
            flow_ml_s: self.flow_ml_s,
            volume_ml: self.volume_ml,
            resistance: 0.0,
            convergence: 0.0,
            path,
            sensor_ok: sample.is_some(),
        }
    }

    pub fn reset(&mut self) {
        self.guard.reset();
        self.pressure = 0.0;
        self.last_pressure = 0.0;
        self.expected_gain = 0.0;
        self.flow_ml_s = 0.0;
        self.duty_pct = 0.0;
    }

    pub fn tare(&mut self) {
        self.volume_ml = 0.0;
    }

    pub fn table(&self) -> &PressureGainTable {
        &self.table
    }

    #[inline]
    pub fn flow_ml_s(&self) -> f32 {
        self.flow_ml_s
    }

    #[inline]
    pub fn volume_ml(&self) -> f32 {
        self.volume_ml
    }

    #[inline]
    pub fn duty_pct(&self) -> f32 {
        self.duty_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> GainTableController {
        let table = PressureGainTable::new(vec![0.02, 0.02, 0.015, 0.01], 9.0, 50);
        GainTableController::new(
            GainTableCfg::default(),
            PumpModel::default(),
            SensorGuardCfg::default(),
            table,
            0.05,
        )
    }

    #[test]
    fn large_error_fires_every_half_cycle() {
        let mut c = controller();
        let out = c.tick(0.0, &OperatingPoint::pressure(9.0, 0.0));
        assert_eq!(out.duty_pct, 100.0);
        assert_eq!(out.path, DutyPath::GainTable);
    }

    #[test]
    fn small_error_scales_duty() {
        let mut c = controller();
        // Level 0: 0.02 bar per half-cycle, 2.5 half-cycles per tick.
        let duty = c.power_for_pressure(0.025, 0.0, 0.0);
        assert!((duty - 50.0).abs() < 1e-2, "duty {duty}");
    }

    #[test]
    fn above_target_turns_off() {
        let mut c = controller();
        assert_eq!(c.power_for_pressure(2.0, 3.0, 0.0), 0.0);
    }

    #[test]
    fn flow_target_uses_displacement_curve() {
        let c = controller();
        // 0.28 ml × 50 half-cycles = 14 ml/s at 0 bar.
        assert!((c.power_for_flow(7.0, 0.0, 0.0) - 50.0).abs() < 1e-3);
        assert_eq!(c.power_for_flow(7.0, 6.0, 5.0), 0.0);
        assert_eq!(c.power_for_flow(100.0, 0.0, 0.0), 100.0);
    }

    #[test]
    fn flow_limit_caps_pressure_duty() {
        let mut c = controller();
        let duty = c.power_for_pressure(9.0, 0.0, 1.4);
        assert!((duty - 10.0).abs() < 1e-3);
    }

    #[test]
    fn volume_only_with_valve_open() {
        let mut c = controller();
        c.tick(0.0, &OperatingPoint::power(50.0));
        assert_eq!(c.volume_ml(), 0.0);
        c.tick(0.0, &OperatingPoint::power(50.0).with_valve(true));
        assert!((c.volume_ml() - 7.0 * 0.05).abs() < 1e-4);
        c.tare();
        assert_eq!(c.volume_ml(), 0.0);
    }

    #[test]
    fn empty_table_gives_zero_pressure_duty() {
        let mut c = GainTableController::new(
            GainTableCfg::default(),
            PumpModel::default(),
            SensorGuardCfg::default(),
            PressureGainTable::default(),
            0.05,
        );
        assert_eq!(c.power_for_pressure(9.0, 0.0, 0.0), 0.0);
    }
}
