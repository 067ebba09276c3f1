//! Lock-free snapshot of the last tick, written by the actuation loop and
//! read from any thread.
//!
//! Each field is an independent atomic; a reader may see fields from two
//! adjacent ticks, which is fine for display and profile sequencing.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use crate::arbiter::{DutyPath, TickOutput};
use crate::operating_point::ControlMode;

#[derive(Debug, Default)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    #[inline]
    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct Telemetry {
    duty_pct: AtomicF32,
    pressure: AtomicF32,
    setpoint: AtomicF32,
    flow_ml_s: AtomicF32,
    volume_ml: AtomicF32,
    resistance: AtomicF32,
    convergence: AtomicF32,
    mode: AtomicU8,
    path: AtomicU8,
    sensor_ok: AtomicBool,
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    actuator_failures: AtomicU64,
    half_cycles_per_second: AtomicU32,
}

/// Plain copy of [`Telemetry`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySnapshot {
    pub duty_pct: f32,
    pub pressure: f32,
    pub setpoint: f32,
    pub flow_ml_s: f32,
    pub volume_ml: f32,
    pub resistance: f32,
    pub convergence: f32,
    pub mode: ControlMode,
    pub path: DutyPath,
    pub sensor_ok: bool,
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub actuator_failures: u64,
    pub half_cycles_per_second: u32,
}

fn path_to_u8(p: DutyPath) -> u8 {
    match p {
        DutyPath::Power => 0,
        DutyPath::SlidingMode => 1,
        DutyPath::OpenLoopFlow => 2,
        DutyPath::GainTable => 3,
        DutyPath::SensorFault => 4,
    }
}

fn path_from_u8(v: u8) -> DutyPath {
    match v {
        1 => DutyPath::SlidingMode,
        2 => DutyPath::OpenLoopFlow,
        3 => DutyPath::GainTable,
        4 => DutyPath::SensorFault,
        _ => DutyPath::Power,
    }
}

impl Telemetry {
    pub(crate) fn publish(&self, mode: ControlMode, out: &TickOutput) {
        self.duty_pct.store(out.duty_pct);
        self.pressure.store(out.pressure);
        self.setpoint.store(out.setpoint);
        self.flow_ml_s.store(out.flow_ml_s);
        self.volume_ml.store(out.volume_ml);
        self.resistance.store(out.resistance);
        self.convergence.store(out.convergence);
        self.mode.store(mode.as_u8(), Ordering::Relaxed);
        self.path.store(path_to_u8(out.path), Ordering::Relaxed);
        self.sensor_ok.store(out.sensor_ok, Ordering::Relaxed);
        // Release so a reader that sees the new count also sees the fields.
        self.ticks.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn record_skip(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_actuator_failure(&self) {
        self.actuator_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_half_cycles_per_second(&self, cps: u32) {
        self.half_cycles_per_second.store(cps, Ordering::Relaxed);
    }

    #[inline]
    pub fn flow_ml_s(&self) -> f32 {
        self.flow_ml_s.load()
    }

    #[inline]
    pub fn volume_ml(&self) -> f32 {
        self.volume_ml.load()
    }

    #[inline]
    pub fn duty_pct(&self) -> f32 {
        self.duty_pct.load()
    }

    #[inline]
    pub fn pressure(&self) -> f32 {
        self.pressure.load()
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    #[inline]
    pub fn half_cycles_per_second(&self) -> u32 {
        self.half_cycles_per_second.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let ticks = self.ticks.load(Ordering::Acquire);
        TelemetrySnapshot {
            duty_pct: self.duty_pct.load(),
            pressure: self.pressure.load(),
            setpoint: self.setpoint.load(),
            flow_ml_s: self.flow_ml_s.load(),
            volume_ml: self.volume_ml.load(),
            resistance: self.resistance.load(),
            convergence: self.convergence.load(),
            mode: ControlMode::from_u8(self.mode.load(Ordering::Relaxed)),
            path: path_from_u8(self.path.load(Ordering::Relaxed)),
            sensor_ok: self.sensor_ok.load(Ordering::Relaxed),
            ticks,
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            actuator_failures: self.actuator_failures.load(Ordering::Relaxed),
            half_cycles_per_second: self.half_cycles_per_second.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_snapshot() {
        let t = Telemetry::default();
        let out = TickOutput {
            duty_pct: 37.5,
            pressure: 8.25,
            flow_ml_s: 1.5,
            volume_ml: 12.0,
            path: DutyPath::OpenLoopFlow,
            sensor_ok: true,
            ..TickOutput::default()
        };
        t.publish(ControlMode::Flow, &out);
        let s = t.snapshot();
        assert_eq!(s.duty_pct, 37.5);
        assert_eq!(s.pressure, 8.25);
        assert_eq!(s.volume_ml, 12.0);
        assert_eq!(s.mode, ControlMode::Flow);
        assert_eq!(s.path, DutyPath::OpenLoopFlow);
        assert_eq!(s.ticks, 1);
    }

    #[test]
    fn path_codes_roundtrip() {
        for p in [
            DutyPath::Power,
            DutyPath::SlidingMode,
            DutyPath::OpenLoopFlow,
            DutyPath::GainTable,
            DutyPath::SensorFault,
        ] {
            assert_eq!(path_from_u8(path_to_u8(p)), p);
        }
    }
}
