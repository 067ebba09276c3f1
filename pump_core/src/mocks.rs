//! Test and helper mocks for pump_core

use pump_traits::{HwResult, PhaseCutActuator, PressureSensor};
use std::sync::{Arc, Mutex};

/// A sensor that always errors on read; the loop treats every tick as a
/// sensor fault.
pub struct NoopSensor;

impl PressureSensor for NoopSensor {
    fn read_pressure(&mut self) -> HwResult<f32> {
        Err(Box::new(std::io::Error::other("noop sensor")))
    }
}

/// Returns a fixed pressure that can be changed from another thread.
#[derive(Clone, Default)]
pub struct ConstantSensor(Arc<Mutex<f32>>);

impl ConstantSensor {
    pub fn new(bar: f32) -> Self {
        Self(Arc::new(Mutex::new(bar)))
    }

    pub fn set(&self, bar: f32) {
        if let Ok(mut v) = self.0.lock() {
            *v = bar;
        }
    }
}

impl PressureSensor for ConstantSensor {
    fn read_pressure(&mut self) -> HwResult<f32> {
        Ok(self.0.lock().map(|v| *v).unwrap_or(f32::NAN))
    }
}

/// Actuator that records every write, shareable with the test body.
#[derive(Clone)]
pub struct RecordingActuator {
    writes: Arc<Mutex<Vec<f32>>>,
    half_cycles_per_second: u32,
    divider: Option<u8>,
    supports_divider: bool,
    fail_writes: bool,
}

impl RecordingActuator {
    pub fn new(half_cycles_per_second: u32) -> Self {
        Self {
            writes: Arc::new(Mutex::new(Vec::new())),
            half_cycles_per_second,
            divider: None,
            supports_divider: false,
            fail_writes: false,
        }
    }

    pub fn with_divider(mut self) -> Self {
        self.supports_divider = true;
        self
    }

    /// Every `set_power` returns an error (the value is still recorded).
    pub fn failing(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn writes(&self) -> Vec<f32> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<f32> {
        self.writes.lock().ok().and_then(|w| w.last().copied())
    }
}

impl PhaseCutActuator for RecordingActuator {
    fn set_power(&mut self, percent: f32) -> HwResult<()> {
        if let Ok(mut w) = self.writes.lock() {
            w.push(percent);
        }
        if self.fail_writes {
            return Err(Box::new(std::io::Error::other("triac driver fault")));
        }
        Ok(())
    }

    fn detected_half_cycles_per_second(&self) -> u32 {
        match self.divider {
            Some(d) => self.half_cycles_per_second / u32::from(d.max(1)),
            None => self.half_cycles_per_second,
        }
    }

    fn set_clock_divider(&mut self, divider: u8) -> HwResult<bool> {
        if !self.supports_divider {
            return Ok(false);
        }
        self.divider = Some(divider);
        Ok(true)
    }
}
