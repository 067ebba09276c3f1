//! Interchangeable duty strategies behind one tick interface.

use crate::arbiter::{PressureController, TickOutput};
use crate::config::ControlStrategyKind;
use crate::legacy::GainTableController;
use crate::operating_point::OperatingPoint;

/// Selected at configuration time; the two never share state.
#[derive(Debug, Clone)]
pub enum ControlStrategy {
    Model(Box<PressureController>),
    GainTable(Box<GainTableController>),
}

impl ControlStrategy {
    pub fn kind(&self) -> ControlStrategyKind {
        match self {
            ControlStrategy::Model(_) => ControlStrategyKind::Model,
            ControlStrategy::GainTable(_) => ControlStrategyKind::GainTable,
        }
    }

    pub fn tick(&mut self, raw_pressure: f32, op: &OperatingPoint) -> TickOutput {
        match self {
            ControlStrategy::Model(c) => c.tick(raw_pressure, op),
            ControlStrategy::GainTable(c) => c.tick(raw_pressure, op),
        }
    }

    pub fn reset(&mut self) {
        match self {
            ControlStrategy::Model(c) => c.reset(),
            ControlStrategy::GainTable(c) => c.reset(),
        }
    }

    pub fn tare(&mut self) {
        match self {
            ControlStrategy::Model(c) => c.tare(),
            ControlStrategy::GainTable(c) => c.tare(),
        }
    }

    pub fn seed_resistance(&mut self, resistance: f32, score: f32) {
        match self {
            ControlStrategy::Model(c) => c.seed_resistance(resistance, score),
            ControlStrategy::GainTable(_) => {
                tracing::debug!("gain-table strategy has no resistance estimate; seed ignored");
            }
        }
    }

    /// Tell the strategy the effective mains half-cycle rate.
    pub fn set_half_cycles_per_second(&mut self, cps: u32) {
        if let ControlStrategy::GainTable(c) = self {
            c.set_half_cycles_per_second(cps);
        }
    }
}

impl From<PressureController> for ControlStrategy {
    fn from(c: PressureController) -> Self {
        ControlStrategy::Model(Box::new(c))
    }
}

impl From<GainTableController> for ControlStrategy {
    fn from(c: GainTableController) -> Self {
        ControlStrategy::GainTable(Box::new(c))
    }
}
