//! Simulated group-head hydraulics.
//!
//! The plant is a single compliance fed by the pump and drained by the puck
//! (valve open) and the over-pressure valve:
//!
//! ```text
//! C·dP/dt = Qpump − Qpuck − Qrelief
//! Qpump   = duty·Q0·(1 − P/Pmax)
//! Qpuck   = (P/R·1e6)^(1/n)          valve open only
//! Qrelief = k·(P − Popv)             above Popv
//! ```
//!
//! Time either advances explicitly through [`SimPlant::step`] or, when a
//! clock is attached, lazily up to `clock.now()` on every access.

use pump_traits::clock::Clock;
use pump_traits::{HwResult, PhaseCutActuator, PressureSensor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::error::HwError;

/// Integration step, seconds.
const SUBSTEP_S: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantParams {
    pub q0_ml_s: f32,
    pub pmax_bar: f32,
    pub compliance_ml_per_bar: f32,
    /// bar·s/m³.
    pub puck_resistance: f32,
    pub puck_exponent: f32,
    pub opv_bar: f32,
    pub opv_flow_per_bar: f32,
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            q0_ml_s: 14.0,
            pmax_bar: 15.0,
            compliance_ml_per_bar: 3.0,
            puck_resistance: 4e6,
            puck_exponent: 1.2,
            opv_bar: 11.0,
            opv_flow_per_bar: 20.0,
        }
    }
}

pub struct SimPlant {
    params: PlantParams,
    pressure: f32,
    duty_pct: f32,
    valve_open: bool,
    extracted_ml: f32,
    clock: Option<(Arc<dyn Clock + Send + Sync>, Instant)>,
}

impl core::fmt::Debug for SimPlant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimPlant")
            .field("params", &self.params)
            .field("pressure", &self.pressure)
            .field("duty_pct", &self.duty_pct)
            .field("valve_open", &self.valve_open)
            .finish_non_exhaustive()
    }
}

/// Plant shared between the simulated sensor and actuator.
pub type SharedPlant = Arc<Mutex<SimPlant>>;

impl SimPlant {
    pub fn new(params: PlantParams) -> Self {
        Self {
            params,
            pressure: 0.0,
            duty_pct: 0.0,
            valve_open: false,
            extracted_ml: 0.0,
            clock: None,
        }
    }

    /// Advance automatically with `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let now = clock.now();
        self.clock = Some((clock, now));
        self
    }

    pub fn shared(self) -> SharedPlant {
        Arc::new(Mutex::new(self))
    }

    pub fn params(&self) -> &PlantParams {
        &self.params
    }

    fn puck_flow_at(&self, pressure: f32) -> f32 {
        if !self.valve_open || pressure <= 0.0 {
            return 0.0;
        }
        let base = pressure / self.params.puck_resistance.max(f32::EPSILON) * 1e6;
        base.powf(1.0 / self.params.puck_exponent.max(f32::EPSILON))
    }

    fn pump_flow_at(&self, pressure: f32) -> f32 {
        let headroom = (1.0 - pressure / self.params.pmax_bar).max(0.0);
        self.duty_pct / 100.0 * self.params.q0_ml_s * headroom
    }

    /// Integrate `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        let mut left = dt.max(0.0);
        while left > 0.0 {
            let h = left.min(SUBSTEP_S);
            let p = self.pressure;
            let q_puck = self.puck_flow_at(p);
            let q_relief = (p - self.params.opv_bar).max(0.0) * self.params.opv_flow_per_bar;
            let dp = (self.pump_flow_at(p) - q_puck - q_relief)
                / self.params.compliance_ml_per_bar.max(f32::EPSILON);
            self.pressure = (p + dp * h).max(0.0);
            self.extracted_ml += q_puck * h;
            left -= h;
        }
    }

    fn catch_up(&mut self) {
        let Some((clock, last)) = &self.clock else {
            return;
        };
        let now = clock.now();
        let elapsed = now.saturating_duration_since(*last);
        if elapsed.is_zero() {
            return;
        }
        if let Some((_, last)) = self.clock.as_mut() {
            *last = now;
        }
        self.step(elapsed.as_secs_f32());
    }

    pub fn pressure(&mut self) -> f32 {
        self.catch_up();
        self.pressure
    }

    pub fn set_duty(&mut self, pct: f32) {
        self.catch_up();
        self.duty_pct = if pct.is_finite() { pct.clamp(0.0, 100.0) } else { 0.0 };
    }

    pub fn duty(&self) -> f32 {
        self.duty_pct
    }

    pub fn set_valve(&mut self, open: bool) {
        self.catch_up();
        self.valve_open = open;
    }

    pub fn valve_open(&self) -> bool {
        self.valve_open
    }

    /// True puck flow right now, ml/s.
    pub fn puck_flow_ml_s(&mut self) -> f32 {
        self.catch_up();
        self.puck_flow_at(self.pressure)
    }

    /// Volume that actually went through the puck, ml.
    pub fn extracted_ml(&mut self) -> f32 {
        self.catch_up();
        self.extracted_ml
    }

    pub fn set_puck_resistance(&mut self, resistance: f32) {
        self.catch_up();
        self.params.puck_resistance = resistance;
    }
}

fn lock(plant: &SharedPlant) -> std::sync::MutexGuard<'_, SimPlant> {
    plant.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pressure transducer reading the shared plant.
pub struct SimPressureSensor {
    plant: SharedPlant,
    noise_bar: f32,
    rng: u32,
    dropout_every: Option<u32>,
    reads: u32,
}

impl SimPressureSensor {
    pub fn new(plant: SharedPlant) -> Self {
        Self {
            plant,
            noise_bar: 0.0,
            rng: 0x9E37_79B9,
            dropout_every: None,
            reads: 0,
        }
    }

    /// Add uniform noise in `±noise_bar`, deterministic per seed.
    pub fn with_noise(mut self, noise_bar: f32, seed: u32) -> Self {
        self.noise_bar = noise_bar.max(0.0);
        self.rng = seed.max(1);
        self
    }

    /// Return NaN on every `n`th read.
    pub fn with_dropouts(mut self, every: u32) -> Self {
        self.dropout_every = (every > 0).then_some(every);
        self
    }

    fn next_unit(&mut self) -> f32 {
        // xorshift32
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        (x as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}

impl PressureSensor for SimPressureSensor {
    fn read_pressure(&mut self) -> HwResult<f32> {
        self.reads = self.reads.wrapping_add(1);
        if let Some(n) = self.dropout_every
            && self.reads % n == 0
        {
            return Ok(f32::NAN);
        }
        let p = lock(&self.plant).pressure();
        let noise = if self.noise_bar > 0.0 {
            self.next_unit() * self.noise_bar
        } else {
            0.0
        };
        Ok(p + noise)
    }
}

/// Phase-cut stage driving the shared plant.
pub struct SimActuator {
    plant: SharedPlant,
    detected_half_cycles_per_second: u32,
    divider_supported: bool,
    divider: u8,
    fail_writes: Arc<AtomicBool>,
}

impl SimActuator {
    pub fn new(plant: SharedPlant, detected_half_cycles_per_second: u32) -> Self {
        Self {
            plant,
            detected_half_cycles_per_second,
            divider_supported: false,
            divider: 1,
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_divider(mut self) -> Self {
        self.divider_supported = true;
        self
    }

    /// Switch that makes every write fail while set.
    pub fn fault_switch(&self) -> Arc<AtomicBool> {
        self.fail_writes.clone()
    }
}

impl PhaseCutActuator for SimActuator {
    fn set_power(&mut self, percent: f32) -> HwResult<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(HwError::Simulated("ssr write failed").into());
        }
        lock(&self.plant).set_duty(percent);
        Ok(())
    }

    fn detected_half_cycles_per_second(&self) -> u32 {
        self.detected_half_cycles_per_second / u32::from(self.divider.max(1))
    }

    fn set_clock_divider(&mut self, divider: u8) -> HwResult<bool> {
        if !self.divider_supported {
            return Ok(false);
        }
        if divider == 0 {
            return Err(HwError::InvalidReading("divider 0".into()).into());
        }
        self.divider = divider;
        tracing::debug!(divider, "simulated zero-cross divider set");
        Ok(true)
    }
}
