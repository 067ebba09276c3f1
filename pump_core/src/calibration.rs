//! Pressure-gain calibration for the gain-table strategy.
//!
//! With the valve closed and the pump at full power, pressure climbs until
//! the over-pressure valve opens. Every time the pressure crosses a new whole
//! bar the calibrator records how much pressure one half-cycle adds at that
//! level. The ramp ends when pressure stops rising.
//!
//! `GainCalibrator` is a pure state machine (`Idle → Ramping → Done`, or
//! `Failed`); the actuation module drives it against real hardware.

/// Learned pressure gain per fired half-cycle, indexed by whole bar.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PressureGainTable {
    pub gains: Vec<f32>,
    /// Pressure at which the ramp plateaued, bar.
    pub opv_pressure: f32,
    /// Mains half-cycle rate the gains were measured at.
    pub half_cycles_per_second: u32,
}

impl PressureGainTable {
    pub fn new(gains: Vec<f32>, opv_pressure: f32, half_cycles_per_second: u32) -> Self {
        Self {
            gains,
            opv_pressure,
            half_cycles_per_second,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.gains.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.gains.len()
    }

    /// Gain for the bar level nearest `pressure`, clamped to the table.
    pub fn gain_at(&self, pressure: f32) -> Option<f32> {
        let last = self.gains.len().checked_sub(1)?;
        let level = if pressure.is_finite() {
            pressure.round().max(0.0) as usize
        } else {
            0
        };
        self.gains.get(level.min(last)).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Idle,
    Ramping,
    Done,
    Failed,
}

/// What the driver should do after a calibration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationStep {
    pub duty_pct: f32,
    pub state: CalibrationState,
}

/// Step cadence expected by the gain formula, milliseconds.
pub const CALIBRATION_STEP_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct GainCalibrator {
    state: CalibrationState,
    half_cycles_per_second: u32,
    max_steps: u32,
    steps: u32,
    last_pressure: f32,
    gains: Vec<f32>,
    opv_pressure: f32,
    failure: Option<String>,
}

impl GainCalibrator {
    pub fn new(half_cycles_per_second: u32, max_steps: u32) -> Self {
        Self {
            state: CalibrationState::Idle,
            half_cycles_per_second: half_cycles_per_second.max(1),
            max_steps: max_steps.max(1),
            steps: 0,
            last_pressure: 0.0,
            gains: Vec::new(),
            opv_pressure: 0.0,
            failure: None,
        }
    }

    /// Begin a ramp from `pressure`. Returns the duty to command.
    pub fn start(&mut self, pressure: f32) -> CalibrationStep {
        self.gains.clear();
        self.opv_pressure = 0.0;
        self.steps = 0;
        self.failure = None;
        self.last_pressure = if pressure.is_finite() { pressure } else { 0.0 };
        self.state = CalibrationState::Ramping;
        tracing::info!(cps = self.half_cycles_per_second, "gain calibration started");
        CalibrationStep {
            duty_pct: 100.0,
            state: self.state,
        }
    }

    /// Feed one pressure sample taken `CALIBRATION_STEP_MS` after the last.
    pub fn step(&mut self, pressure: f32) -> CalibrationStep {
        if self.state != CalibrationState::Ramping {
            return self.idle_step();
        }
        if !pressure.is_finite() {
            return self.fail("pressure sample not finite");
        }
        self.steps += 1;

        if pressure.floor() > self.last_pressure.floor() {
            let gain = (pressure - self.last_pressure) * 10.0 / self.half_cycles_per_second as f32;
            self.gains.push(gain);
        }

        if pressure <= self.last_pressure {
            if self.gains.is_empty() {
                return self.fail("pressure never rose");
            }
            self.opv_pressure = pressure;
            self.state = CalibrationState::Done;
            tracing::info!(
                opv_bar = self.opv_pressure,
                levels = self.gains.len(),
                cps = self.half_cycles_per_second,
                "gain calibration finished"
            );
            return self.idle_step();
        }
        if self.steps >= self.max_steps {
            return self.fail("pressure still rising at step limit");
        }
        self.last_pressure = pressure;
        CalibrationStep {
            duty_pct: 100.0,
            state: self.state,
        }
    }

    fn fail(&mut self, why: &str) -> CalibrationStep {
        tracing::warn!(reason = why, steps = self.steps, "gain calibration failed");
        self.failure = Some(why.to_string());
        self.state = CalibrationState::Failed;
        self.idle_step()
    }

    fn idle_step(&self) -> CalibrationStep {
        CalibrationStep {
            duty_pct: 0.0,
            state: self.state,
        }
    }

    #[inline]
    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// The learned table once the ramp finished.
    pub fn table(&self) -> Option<PressureGainTable> {
        (self.state == CalibrationState::Done).then(|| {
            PressureGainTable::new(
                self.gains.clone(),
                self.opv_pressure,
                self.half_cycles_per_second,
            )
        })
    }
}
