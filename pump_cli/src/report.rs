//! Telemetry rows and the end-of-run summary, pretty or JSON lines.

use pump_core::{ControlMode, DutyPath, TelemetrySnapshot, TickOutput};
use serde_json::json;

#[derive(Debug, Clone, Copy)]
pub struct Row {
    pub t_s: f32,
    pub mode: ControlMode,
    pub path: DutyPath,
    pub duty_pct: f32,
    pub pressure: f32,
    pub setpoint: f32,
    pub flow_ml_s: f32,
    pub volume_ml: f32,
    pub resistance: f32,
    pub convergence: f32,
    pub sensor_ok: bool,
}

impl Row {
    pub fn from_tick(t_s: f32, mode: ControlMode, out: &TickOutput) -> Self {
        Self {
            t_s,
            mode,
            path: out.path,
            duty_pct: out.duty_pct,
            pressure: out.pressure,
            setpoint: out.setpoint,
            flow_ml_s: out.flow_ml_s,
            volume_ml: out.volume_ml,
            resistance: out.resistance,
            convergence: out.convergence,
            sensor_ok: out.sensor_ok,
        }
    }

    pub fn from_snapshot(t_s: f32, snap: &TelemetrySnapshot) -> Self {
        Self {
            t_s,
            mode: snap.mode,
            path: snap.path,
            duty_pct: snap.duty_pct,
            pressure: snap.pressure,
            setpoint: snap.setpoint,
            flow_ml_s: snap.flow_ml_s,
            volume_ml: snap.volume_ml,
            resistance: snap.resistance,
            convergence: snap.convergence,
            sensor_ok: snap.sensor_ok,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Summary {
    pub seconds: f32,
    pub ticks: u64,
    pub half_cycles_per_second: u32,
    pub last: Row,
    /// Volume through the simulated puck, for comparison with the estimate.
    pub extracted_ml: f32,
    /// Resistance the simulated puck really has.
    pub true_resistance: f32,
}

pub struct Reporter {
    json: bool,
}

impl Reporter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn row(&self, r: &Row) {
        if self.json {
            println!(
                "{}",
                json!({
                    "event": "tick",
                    "t_s": r.t_s,
                    "mode": r.mode.to_string(),
                    "path": r.path.to_string(),
                    "duty_pct": r.duty_pct,
                    "pressure_bar": r.pressure,
                    "setpoint_bar": r.setpoint,
                    "flow_ml_s": r.flow_ml_s,
                    "volume_ml": r.volume_ml,
                    "resistance": r.resistance,
                    "convergence": r.convergence,
                    "sensor_ok": r.sensor_ok,
                })
            );
        } else {
            println!(
                "{:6.2}s {:<8} {:<14} duty {:5.1}%  P {:5.2} bar  r {:5.2}  Q {:4.2} ml/s  V {:6.1} ml  R {:.2e} ({:.2})",
                r.t_s,
                r.mode,
                r.path,
                r.duty_pct,
                r.pressure,
                r.setpoint,
                r.flow_ml_s,
                r.volume_ml,
                r.resistance,
                r.convergence,
            );
        }
    }

    pub fn summary(&self, s: &Summary) {
        if self.json {
            println!(
                "{}",
                json!({
                    "event": "summary",
                    "seconds": s.seconds,
                    "ticks": s.ticks,
                    "half_cycles_per_second": s.half_cycles_per_second,
                    "mode": s.last.mode.to_string(),
                    "pressure_bar": s.last.pressure,
                    "volume_ml": s.last.volume_ml,
                    "extracted_ml": s.extracted_ml,
                    "resistance": s.last.resistance,
                    "true_resistance": s.true_resistance,
                    "convergence": s.last.convergence,
                })
            );
        } else {
            println!("--- shot summary ---");
            println!("time: {:.2} s ({} ticks)", s.seconds, s.ticks);
            println!("mains: {} half-cycles/s", s.half_cycles_per_second);
            println!("final pressure: {:.2} bar", s.last.pressure);
            println!(
                "volume: {:.1} ml estimated, {:.1} ml simulated",
                s.last.volume_ml, s.extracted_ml
            );
            println!(
                "resistance: {:.3e} estimated (score {:.2}), {:.3e} simulated",
                s.last.resistance, s.last.convergence, s.true_resistance
            );
        }
    }
}
