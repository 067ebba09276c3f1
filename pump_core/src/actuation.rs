//! The periodic actuation loop and its handle.
//!
//! `Pump` spawns exactly one thread that, every tick, drains pending
//! commands, reads the pressure sensor, advances the control strategy and
//! writes the duty to the phase-cut actuator. The thread is shut down and
//! joined when the `Pump` is dropped.
//!
//! Sensor and actuator sit behind one mutex, the hardware token. The loop
//! only `try_lock`s it and skips the tick when calibration holds it, so a
//! calibration ramp and the loop never drive the pump at the same time.

use crossbeam_channel as xch;
use pump_traits::clock::Clock;
use pump_traits::{PhaseCutActuator, PressureSensor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use crate::arbiter::TickOutput;
use crate::calibration::{
    CALIBRATION_STEP_MS, CalibrationState, GainCalibrator, PressureGainTable,
};
use crate::config::{ControlStrategyKind, LoopCfg};
use crate::error::{PumpError, Result};
use crate::hw_error::map_hw_error;
use crate::operating_point::{Command, OperatingPoint};
use crate::strategy::ControlStrategy;
use crate::telemetry::{Telemetry, TelemetrySnapshot};

/// Sensor and actuator owned together; holding the lock is the exclusive
/// right to drive the pump.
pub struct Hardware {
    pub sensor: Box<dyn PressureSensor + Send>,
    pub actuator: Box<dyn PhaseCutActuator + Send>,
}

impl core::fmt::Debug for Hardware {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hardware").finish_non_exhaustive()
    }
}

fn lock_hw(hw: &Mutex<Hardware>) -> MutexGuard<'_, Hardware> {
    hw.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Query the mains half-cycle rate and correct double counting.
///
/// A rectified zero-cross input can report every half-cycle twice. Above
/// `max_half_cycles_per_second` the actuator is asked for a clock divider;
/// when it has none the figure is divided in software.
pub fn detect_mains<A: PhaseCutActuator + ?Sized>(actuator: &mut A, cfg: &LoopCfg) -> u32 {
    let detected = actuator.detected_half_cycles_per_second();
    if detected == 0 {
        tracing::warn!("no mains half-cycles detected");
        return 0;
    }
    if detected <= cfg.max_half_cycles_per_second {
        tracing::info!(cps = detected, "mains detected");
        return detected;
    }
    let divider = cfg.clock_divider.max(1);
    let effective = match actuator.set_clock_divider(divider) {
        Ok(true) => actuator.detected_half_cycles_per_second(),
        Ok(false) => detected / u32::from(divider),
        Err(e) => {
            let err = map_hw_error(&*e);
            tracing::warn!(error = %err, "clock divider rejected; dividing in software");
            detected / u32::from(divider)
        }
    };
    tracing::info!(detected, cps = effective, divider, "mains double counting corrected");
    effective
}

/// Handle to a running actuation loop.
pub struct Pump {
    tx: xch::Sender<Command>,
    telemetry: Arc<Telemetry>,
    hardware: Arc<Mutex<Hardware>>,
    clock: Arc<dyn Clock + Send + Sync>,
    calibrating: AtomicBool,
    half_cycles_per_second: u32,
    strategy: ControlStrategyKind,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl core::fmt::Debug for Pump {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pump")
            .field("strategy", &self.strategy)
            .field("half_cycles_per_second", &self.half_cycles_per_second)
            .field("telemetry", &self.telemetry.snapshot())
            .finish_non_exhaustive()
    }
}

impl Pump {
    /// Detect mains, then start the loop thread.
    pub(crate) fn spawn(
        mut hardware: Hardware,
        mut strategy: ControlStrategy,
        cfg: LoopCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let cps = detect_mains(hardware.actuator.as_mut(), &cfg);
        strategy.set_half_cycles_per_second(cps);
        let kind = strategy.kind();

        let (tx, rx) = xch::unbounded();
        let telemetry = Arc::new(Telemetry::default());
        telemetry.set_half_cycles_per_second(cps);
        let hardware = Arc::new(Mutex::new(hardware));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            rx,
            telemetry: telemetry.clone(),
            hardware: hardware.clone(),
            clock: clock.clone(),
            shutdown: shutdown.clone(),
            strategy,
            op: OperatingPoint::default(),
            period: Duration::from_millis(cfg.period_ms.max(1)),
        };
        tracing::info!(period_ms = cfg.period_ms, strategy = ?kind, "actuation loop starting");
        let join_handle = std::thread::spawn(move || worker.run());

        Self {
            tx,
            telemetry,
            hardware,
            clock,
            calibrating: AtomicBool::new(false),
            half_cycles_per_second: cps,
            strategy: kind,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| eyre::Report::new(PumpError::State("actuation loop stopped".into())))
    }

    /// Raw power in percent. Takes effect on the next tick.
    pub fn set_power(&self, percent: f32) -> Result<()> {
        self.send(Command::SetPower(percent))
    }

    /// Pressure target in bar with a flow limit in ml/s (0 = unlimited).
    pub fn set_pressure_target(&self, target: f32, flow_limit: f32) -> Result<()> {
        self.send(Command::SetPressureTarget { target, flow_limit })
    }

    /// Flow target in ml/s with a pressure limit in bar (0 = unlimited).
    pub fn set_flow_target(&self, target: f32, pressure_limit: f32) -> Result<()> {
        self.send(Command::SetFlowTarget {
            target,
            pressure_limit,
        })
    }

    pub fn set_valve_state(&self, open: bool) -> Result<()> {
        self.send(Command::SetValve(open))
    }

    /// Zero cumulative volume.
    pub fn tare(&self) -> Result<()> {
        self.send(Command::Tare)
    }

    /// Clear controller and estimator state for a new shot.
    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    pub fn seed_resistance(&self, resistance: f32, score: f32) -> Result<()> {
        self.send(Command::SeedResistance { resistance, score })
    }

    #[inline]
    pub fn volume_ml(&self) -> f32 {
        self.telemetry.volume_ml()
    }

    #[inline]
    pub fn flow_ml_s(&self) -> f32 {
        self.telemetry.flow_ml_s()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    /// Ticks completed so far.
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.telemetry.ticks()
    }

    /// Effective mains half-cycle rate after double-count correction.
    #[inline]
    pub fn half_cycles_per_second(&self) -> u32 {
        self.half_cycles_per_second
    }

    #[inline]
    pub fn strategy(&self) -> ControlStrategyKind {
        self.strategy
    }

    /// A calibration ramp currently owns the hardware.
    #[inline]
    pub fn is_calibrating(&self) -> bool {
        self.calibrating.load(Ordering::Acquire)
    }

    /// Run the pressure-gain calibration ramp. Blocks until it finishes.
    ///
    /// Holds the hardware token for the whole ramp; the loop skips its ticks
    /// meanwhile. The valve must be closed so pressure can build.
    pub fn calibrate(&self, max_steps: u32) -> Result<PressureGainTable> {
        if self
            .calibrating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(eyre::Report::new(PumpError::Busy(
                "calibration already running",
            )));
        }
        let result = {
            let mut hw = lock_hw(&self.hardware);
            let result = self.run_calibration(&mut hw, max_steps);
            if let Err(e) = hw.actuator.set_power(0.0) {
                tracing::warn!(error = %map_hw_error(&*e), "failed to stop pump after calibration");
            }
            result
        };
        self.calibrating.store(false, Ordering::Release);
        result
    }

    fn run_calibration(&self, hw: &mut Hardware, max_steps: u32) -> Result<PressureGainTable> {
        let step_period = Duration::from_millis(CALIBRATION_STEP_MS);
        let mut cal = GainCalibrator::new(self.half_cycles_per_second, max_steps);
        let read = |hw: &mut Hardware| -> Result<f32> {
            hw.sensor
                .read_pressure()
                .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
        };
        let write = |hw: &mut Hardware, duty: f32| -> Result<()> {
            hw.actuator
                .set_power(duty)
                .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
        };

        let initial = read(hw)?;
        self.clock.sleep(step_period);
        let mut step = cal.start(initial);
        write(hw, step.duty_pct)?;
        while step.state == CalibrationState::Ramping {
            self.clock.sleep(step_period);
            let p = read(hw).unwrap_or(f32::NAN);
            step = cal.step(p);
            write(hw, step.duty_pct)?;
        }
        cal.table().ok_or_else(|| {
            eyre::Report::new(PumpError::Calibration(
                cal.failure().unwrap_or("unknown").to_string(),
            ))
        })
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("actuation thread joined"),
                Err(e) => tracing::warn!(?e, "actuation thread panicked during shutdown"),
            }
        }
    }
}

struct Worker {
    rx: xch::Receiver<Command>,
    telemetry: Arc<Telemetry>,
    hardware: Arc<Mutex<Hardware>>,
    clock: Arc<dyn Clock + Send + Sync>,
    shutdown: Arc<AtomicBool>,
    strategy: ControlStrategy,
    op: OperatingPoint,
    period: Duration,
}

impl Worker {
    fn run(mut self) {
        let hardware = Arc::clone(&self.hardware);
        let mut deadline = self.clock.now();
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::debug!("actuation loop received shutdown signal");
                break;
            }
            self.drain_commands();

            match hardware.try_lock() {
                Ok(mut hw) => self.tick(&mut hw),
                Err(TryLockError::Poisoned(p)) => self.tick(&mut p.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    self.telemetry.record_skip();
                    tracing::trace!("hardware token held; tick skipped");
                }
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            deadline += self.period;
            let now = self.clock.now();
            if now > deadline + self.period {
                // Fell more than a period behind; do not burst to catch up.
                deadline = now;
            }
            self.clock.sleep_until(deadline);
        }

        let mut hw = lock_hw(&self.hardware);
        if let Err(e) = hw.actuator.set_power(0.0) {
            tracing::warn!(error = %map_hw_error(&*e), "failed to stop pump on shutdown");
        }
        tracing::info!("actuation loop stopped");
    }

    fn drain_commands(&mut self) {
        for cmd in self.rx.try_iter() {
            match cmd {
                Command::Tare => self.strategy.tare(),
                Command::Reset => self.strategy.reset(),
                Command::SeedResistance { resistance, score } => {
                    self.strategy.seed_resistance(resistance, score);
                }
                other => {
                    self.op.apply(&other);
                }
            }
        }
    }

    fn tick(&mut self, hw: &mut Hardware) {
        let raw = match hw.sensor.read_pressure() {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %map_hw_error(&*e), "pressure read failed");
                f32::NAN
            }
        };
        let out: TickOutput = self.strategy.tick(raw, &self.op);
        if let Err(e) = hw.actuator.set_power(out.duty_pct) {
            self.telemetry.record_actuator_failure();
            tracing::warn!(error = %map_hw_error(&*e), duty = out.duty_pct, "actuator write failed");
        }
        self.telemetry.publish(self.op.mode, &out);
    }
}
