//! Type-state builder for `Pump`.
//!
//! The builder enforces at compile time that a pressure sensor and an
//! actuator are provided before `build()` is available. `try_build()` is
//! always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use pump_traits::clock::{Clock, MonotonicClock};
use pump_traits::{PhaseCutActuator, PressureSensor};

use crate::actuation::{Hardware, Pump};
use crate::arbiter::PressureController;
use crate::calibration::PressureGainTable;
use crate::config::*;
use crate::error::{BuildError, Result};
use crate::legacy::GainTableController;
use crate::strategy::ControlStrategy;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Pump`. All fields are validated on `build()`.
pub struct PumpBuilder<S, A> {
    sensor: Option<Box<dyn PressureSensor + Send>>,
    actuator: Option<Box<dyn PhaseCutActuator + Send>>,
    controller: Option<ControllerCfg>,
    loop_cfg: Option<LoopCfg>,
    strategy: ControlStrategyKind,
    gain_table: Option<PressureGainTable>,
    gain_table_cfg: Option<GainTableCfg>,
    seed: Option<(f32, f32)>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    _s: PhantomData<S>,
    _a: PhantomData<A>,
}

impl Default for PumpBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            sensor: None,
            actuator: None,
            controller: None,
            loop_cfg: None,
            strategy: ControlStrategyKind::default(),
            gain_table: None,
            gain_table_cfg: None,
            seed: None,
            clock: None,
            _s: PhantomData,
            _a: PhantomData,
        }
    }
}

impl Pump {
    /// Start building a Pump.
    pub fn builder() -> PumpBuilder<Missing, Missing> {
        PumpBuilder::default()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn positive(x: f32) -> bool {
    x.is_finite() && x > 0.0
}

/// Check a controller configuration for values the math cannot run with.
pub fn validate_controller(cfg: &ControllerCfg) -> Result<()> {
    if !positive(cfg.setpoint.freq_hz) || !positive(cfg.setpoint.damping) {
        return Err(invalid("setpoint filter frequency and damping must be > 0"));
    }
    if !positive(cfg.kalman.measurement_error) || !positive(cfg.kalman.estimate_error) {
        return Err(invalid("kalman errors must be > 0"));
    }
    if cfg
        .kalman
        .process_noise
        .is_some_and(|q| !(q.is_finite() && q >= 0.0))
    {
        return Err(invalid("kalman process noise must be >= 0"));
    }
    let rls = &cfg.rls;
    if !(rls.forgetting > 0.0 && rls.forgetting <= 1.0) {
        return Err(invalid("estimator forgetting factor must be in (0, 1]"));
    }
    if !positive(rls.initial_resistance) || !positive(rls.initial_covariance) {
        return Err(invalid("estimator priors must be > 0"));
    }
    if !(rls.max_resistance > rls.initial_resistance && rls.max_covariance > rls.initial_covariance)
    {
        return Err(invalid("estimator bounds must exceed the priors"));
    }
    if !positive(rls.residual_tolerance) || !(0.0..=1.0).contains(&rls.score_gain) {
        return Err(invalid("estimator score parameters out of range"));
    }
    let smc = &cfg.sliding;
    if !positive(smc.epsilon) {
        return Err(invalid("boundary layer epsilon must be > 0"));
    }
    if [smc.k, smc.lambda, smc.kappa, smc.c, smc.ki, smc.integral_limit]
        .iter()
        .any(|g| !(g.is_finite() && *g >= 0.0))
    {
        return Err(invalid("sliding-mode gains must be >= 0"));
    }
    if !positive(cfg.pump.q0_ml_s) || !positive(cfg.pump.pmax_bar) || !positive(cfg.pump.puck_exponent)
    {
        return Err(invalid("pump model parameters must be > 0"));
    }
    if !(cfg.arbiter.converged_score > 0.0 && cfg.arbiter.converged_score <= 1.0) {
        return Err(invalid("convergence threshold must be in (0, 1]"));
    }
    if cfg.arbiter.steady_band_bar.is_sign_negative()
        || cfg.arbiter.reached_band_rel.is_sign_negative()
        || cfg.arbiter.transfer_slew_pct.is_sign_negative()
    {
        return Err(invalid("arbiter bands must be >= 0"));
    }
    if !(cfg.sensor.min_bar < cfg.sensor.max_bar) || cfg.sensor.fault_ticks == 0 {
        return Err(invalid("sensor window empty or fault_ticks == 0"));
    }
    Ok(())
}

fn validate_loop(cfg: &LoopCfg) -> Result<()> {
    if !(1..=crate::util::MILLIS_PER_SEC).contains(&cfg.period_ms) {
        return Err(invalid("loop period must be in 1..=1000 ms"));
    }
    if cfg.clock_divider == 0 {
        return Err(invalid("clock divider must be >= 1"));
    }
    Ok(())
}

/// Validate configuration and construct the selected strategy.
///
/// Shared by `PumpBuilder::try_build()` and callers that drive a strategy
/// without a loop thread (simulation, benches).
pub fn build_strategy(
    kind: ControlStrategyKind,
    controller: ControllerCfg,
    loop_cfg: &LoopCfg,
    gain_table: Option<PressureGainTable>,
    gain_table_cfg: GainTableCfg,
) -> Result<ControlStrategy> {
    validate_controller(&controller)?;
    validate_loop(loop_cfg)?;
    let dt = loop_cfg.dt();
    match kind {
        ControlStrategyKind::Model => Ok(PressureController::new(controller, dt).into()),
        ControlStrategyKind::GainTable => {
            let table = gain_table
                .filter(|t| !t.is_empty())
                .ok_or_else(|| eyre::Report::new(BuildError::MissingGainTable))?;
            if table.gains.iter().any(|g| !g.is_finite()) {
                return Err(invalid("gain table entries must be finite"));
            }
            if !positive(gain_table_cfg.ml_per_half_cycle) {
                return Err(invalid("ml_per_half_cycle must be > 0"));
            }
            Ok(GainTableController::new(
                gain_table_cfg,
                controller.pump,
                controller.sensor,
                table,
                dt,
            )
            .into())
        }
    }
}

impl<S, A> PumpBuilder<S, A> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<Pump> {
        let sensor = self
            .sensor
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSensor))?;
        let actuator = self
            .actuator
            .ok_or_else(|| eyre::Report::new(BuildError::MissingActuator))?;
        let loop_cfg = self.loop_cfg.unwrap_or_default();

        let mut strategy = build_strategy(
            self.strategy,
            self.controller.unwrap_or_default(),
            &loop_cfg,
            self.gain_table,
            self.gain_table_cfg.unwrap_or_default(),
        )?;
        if let Some((resistance, score)) = self.seed {
            strategy.seed_resistance(resistance, score);
        }

        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(b) => Arc::from(b),
            None => Arc::new(MonotonicClock::new()),
        };

        Ok(Pump::spawn(
            Hardware { sensor, actuator },
            strategy,
            loop_cfg,
            clock,
        ))
    }
}

/// Chainable setters that do not affect type-state.
impl<S, A> PumpBuilder<S, A> {
    pub fn with_controller(mut self, controller: ControllerCfg) -> Self {
        self.controller = Some(controller);
        self
    }
    pub fn with_loop(mut self, loop_cfg: LoopCfg) -> Self {
        self.loop_cfg = Some(loop_cfg);
        self
    }
    pub fn with_strategy(mut self, kind: ControlStrategyKind) -> Self {
        self.strategy = kind;
        self
    }
    pub fn with_gain_table(mut self, table: PressureGainTable) -> Self {
        self.gain_table = Some(table);
        self
    }
    pub fn with_gain_table_cfg(mut self, cfg: GainTableCfg) -> Self {
        self.gain_table_cfg = Some(cfg);
        self
    }
    /// Warm-start the resistance estimate (model strategy only).
    pub fn with_resistance_seed(mut self, resistance: f32, score: f32) -> Self {
        self.seed = Some((resistance, score));
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state
impl<A> PumpBuilder<Missing, A> {
    pub fn with_sensor(
        self,
        sensor: impl PressureSensor + Send + 'static,
    ) -> PumpBuilder<Set, A> {
        PumpBuilder {
            sensor: Some(Box::new(sensor)),
            actuator: self.actuator,
            controller: self.controller,
            loop_cfg: self.loop_cfg,
            strategy: self.strategy,
            gain_table: self.gain_table,
            gain_table_cfg: self.gain_table_cfg,
            seed: self.seed,
            clock: self.clock,
            _s: PhantomData,
            _a: PhantomData,
        }
    }
}

impl<S> PumpBuilder<S, Missing> {
    pub fn with_actuator(
        self,
        actuator: impl PhaseCutActuator + Send + 'static,
    ) -> PumpBuilder<S, Set> {
        PumpBuilder {
            sensor: self.sensor,
            actuator: Some(Box::new(actuator)),
            controller: self.controller,
            loop_cfg: self.loop_cfg,
            strategy: self.strategy,
            gain_table: self.gain_table,
            gain_table_cfg: self.gain_table_cfg,
            seed: self.seed,
            clock: self.clock,
            _s: PhantomData,
            _a: PhantomData,
        }
    }
}

impl PumpBuilder<Set, Set> {
    /// Validate and start the pump. Only available when sensor and actuator are set.
    pub fn build(self) -> Result<Pump> {
        self.try_build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_controller_is_valid() {
        assert!(validate_controller(&ControllerCfg::default()).is_ok());
    }

    #[test]
    fn rejects_zero_epsilon() {
        let mut cfg = ControllerCfg::default();
        cfg.sliding.epsilon = 0.0;
        let err = validate_controller(&cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::InvalidConfig(_))
        ));
    }

    #[test]
    fn gain_table_strategy_needs_table() {
        let err = build_strategy(
            ControlStrategyKind::GainTable,
            ControllerCfg::default(),
            &LoopCfg::default(),
            Some(PressureGainTable::default()),
            GainTableCfg::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingGainTable)
        ));
    }

    #[test]
    fn rejects_zero_period() {
        let loop_cfg = LoopCfg {
            period_ms: 0,
            ..LoopCfg::default()
        };
        assert!(
            build_strategy(
                ControlStrategyKind::Model,
                ControllerCfg::default(),
                &loop_cfg,
                None,
                GainTableCfg::default(),
            )
            .is_err()
        );
    }
}
