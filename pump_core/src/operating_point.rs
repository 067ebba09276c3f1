//! Operating point (what the pump is asked to do) and the command messages
//! that change it.

/// Active control objective. Exactly one is in force at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// Raw power percentage, no pressure or flow arbitration.
    #[default]
    Power,
    /// Track a pressure target (bar), optionally capped by a flow limit.
    Pressure,
    /// Track a puck flow target (ml/s), optionally capped by a pressure limit.
    Flow,
}

impl ControlMode {
    pub fn as_u8(self) -> u8 {
        match self {
            ControlMode::Power => 0,
            ControlMode::Pressure => 1,
            ControlMode::Flow => 2,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ControlMode::Pressure,
            2 => ControlMode::Flow,
            _ => ControlMode::Power,
        }
    }

    /// Whether the mode runs through the pressure/flow controllers.
    pub fn is_closed_loop(self) -> bool {
        !matches!(self, ControlMode::Power)
    }
}

impl core::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ControlMode::Power => "power",
            ControlMode::Pressure => "pressure",
            ControlMode::Flow => "flow",
        };
        f.pad(s)
    }
}

/// Operating point consumed by the arbiter once per tick.
///
/// Limits are non-negative; `0.0` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OperatingPoint {
    pub mode: ControlMode,
    /// Power %, pressure bar or flow ml/s depending on `mode`.
    pub target: f32,
    /// ml/s, PRESSURE mode only.
    pub flow_limit: f32,
    /// bar, FLOW mode only.
    pub pressure_limit: f32,
    pub valve_open: bool,
}

fn sanitize(v: f32) -> f32 {
    if v.is_finite() { v.max(0.0) } else { 0.0 }
}

impl OperatingPoint {
    pub fn power(percent: f32) -> Self {
        Self::default().with_power(percent)
    }

    pub fn pressure(target_bar: f32, flow_limit_ml_s: f32) -> Self {
        Self::default().with_pressure(target_bar, flow_limit_ml_s)
    }

    pub fn flow(target_ml_s: f32, pressure_limit_bar: f32) -> Self {
        Self::default().with_flow(target_ml_s, pressure_limit_bar)
    }

    pub fn with_power(self, percent: f32) -> Self {
        Self {
            mode: ControlMode::Power,
            target: sanitize(percent).min(100.0),
            flow_limit: 0.0,
            pressure_limit: 0.0,
            ..self
        }
    }

    pub fn with_pressure(self, target_bar: f32, flow_limit_ml_s: f32) -> Self {
        Self {
            mode: ControlMode::Pressure,
            target: sanitize(target_bar),
            flow_limit: sanitize(flow_limit_ml_s),
            pressure_limit: 0.0,
            ..self
        }
    }

    pub fn with_flow(self, target_ml_s: f32, pressure_limit_bar: f32) -> Self {
        Self {
            mode: ControlMode::Flow,
            target: sanitize(target_ml_s),
            flow_limit: 0.0,
            pressure_limit: sanitize(pressure_limit_bar),
            ..self
        }
    }

    pub fn with_valve(self, open: bool) -> Self {
        Self {
            valve_open: open,
            ..self
        }
    }

    /// Apply an operating-point command. Returns `false` for commands that
    /// act on controller state instead.
    pub fn apply(&mut self, cmd: &Command) -> bool {
        *self = match *cmd {
            Command::SetPower(pct) => self.with_power(pct),
            Command::SetPressureTarget { target, flow_limit } => {
                self.with_pressure(target, flow_limit)
            }
            Command::SetFlowTarget {
                target,
                pressure_limit,
            } => self.with_flow(target, pressure_limit),
            Command::SetValve(open) => self.with_valve(open),
            _ => return false,
        };
        true
    }
}

/// Message from a setter caller to the actuation loop. Target and limit
/// travel together so the loop never observes half of an update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SetPower(f32),
    SetPressureTarget { target: f32, flow_limit: f32 },
    SetFlowTarget { target: f32, pressure_limit: f32 },
    SetValve(bool),
    Tare,
    Reset,
    SeedResistance { resistance: f32, score: f32 },
}
