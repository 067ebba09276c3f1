//! `pumpctl simulate`: a shot on the simulated group head.

use pump_config::Config;
use pump_core::error::Result;
use pump_core::hw_error::map_hw_error;
use pump_core::{
    ControlMode, ControlStrategyKind, ControllerCfg, GainTableCfg, LoopCfg, OperatingPoint, Pump,
    build_strategy, detect_mains,
};
use pump_traits::clock::{Clock, MonotonicClock};
use pump_traits::{PhaseCutActuator, PressureSensor};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::calibrate::resolve_gain_table;
use crate::cli::{ModeArg, StrategyArg};
use crate::plant;
use crate::report::{Reporter, Row, Summary};

#[derive(Debug, Clone, Copy)]
pub struct ShotParams {
    pub mode: ModeArg,
    pub target: f32,
    pub limit: f32,
    pub seconds: f32,
    pub valve_open_at: f32,
    pub strategy: Option<StrategyArg>,
    pub every_ms: u64,
}

impl ShotParams {
    fn operating_point(&self, valve_open: bool) -> OperatingPoint {
        let op = match self.mode {
            ModeArg::Power => OperatingPoint::power(self.target),
            ModeArg::Pressure => OperatingPoint::pressure(self.target, self.limit),
            ModeArg::Flow => OperatingPoint::flow(self.target, self.limit),
        };
        op.with_valve(valve_open)
    }

    fn strategy_kind(&self, cfg: &Config) -> ControlStrategyKind {
        match self.strategy {
            Some(StrategyArg::Model) => ControlStrategyKind::Model,
            Some(StrategyArg::GainTable) => ControlStrategyKind::GainTable,
            None => cfg.strategy.kind.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.seconds.is_finite() && self.seconds > 0.0) {
            eyre::bail!("--seconds must be > 0");
        }
        if !self.target.is_finite() || self.target < 0.0 {
            eyre::bail!("--target must be >= 0");
        }
        if !self.limit.is_finite() || self.limit < 0.0 {
            eyre::bail!("--limit must be >= 0");
        }
        Ok(())
    }
}

pub fn run_simulate(cfg: &Config, shot: &ShotParams, realtime: bool, json: bool) -> Result<()> {
    shot.validate()?;
    let reporter = Reporter::new(json);
    let kind = shot.strategy_kind(cfg);
    let table = match kind {
        ControlStrategyKind::GainTable => Some(resolve_gain_table(cfg)?),
        ControlStrategyKind::Model => None,
    };
    tracing::info!(
        mode = ?shot.mode,
        target = shot.target,
        limit = shot.limit,
        seconds = shot.seconds,
        strategy = ?kind,
        realtime,
        "simulated shot"
    );
    let summary = if realtime {
        run_realtime(cfg, shot, kind, table, &reporter)?
    } else {
        run_stepped(cfg, shot, kind, table, &reporter)?
    };
    reporter.summary(&summary);
    Ok(())
}

/// Tick the strategy directly, advancing the plant one period per tick.
fn run_stepped(
    cfg: &Config,
    shot: &ShotParams,
    kind: ControlStrategyKind,
    table: Option<pump_core::PressureGainTable>,
    reporter: &Reporter,
) -> Result<Summary> {
    let loop_cfg = LoopCfg::from(&cfg.loop_cfg);
    let dt = loop_cfg.dt();
    let (plant, mut sensor, mut actuator) = plant::assemble(cfg, None);
    let cps = detect_mains(&mut actuator, &loop_cfg);
    let mut strategy = build_strategy(
        kind,
        ControllerCfg::from(cfg),
        &loop_cfg,
        table,
        GainTableCfg::from(&cfg.strategy),
    )?;
    strategy.set_half_cycles_per_second(cps);

    let ticks = (shot.seconds / dt).round().max(1.0) as u64;
    let print_every = (shot.every_ms / loop_cfg.period_ms.max(1)).max(1);
    let mut last = Row::from_tick(0.0, ControlMode::Power, &Default::default());
    for i in 0..ticks {
        let t = i as f32 * dt;
        let op = shot.operating_point(t >= shot.valve_open_at);
        plant::set_valve(&plant, op.valve_open);

        let raw = sensor.read_pressure().unwrap_or_else(|e| {
            tracing::debug!(error = %map_hw_error(&*e), "pressure read failed");
            f32::NAN
        });
        let out = strategy.tick(raw, &op);
        if let Err(e) = actuator.set_power(out.duty_pct) {
            tracing::warn!(error = %map_hw_error(&*e), duty = out.duty_pct, "actuator write failed");
        }
        plant::advance(&plant, dt);

        last = Row::from_tick(t + dt, op.mode, &out);
        if shot.every_ms > 0 && (i + 1) % print_every == 0 {
            reporter.row(&last);
        }
    }

    Ok(Summary {
        seconds: ticks as f32 * dt,
        ticks,
        half_cycles_per_second: cps,
        last,
        extracted_ml: plant::extracted_ml(&plant),
        true_resistance: cfg.simulation.puck_resistance,
    })
}

/// Run the actuation thread in wall-clock time and sample its telemetry.
fn run_realtime(
    cfg: &Config,
    shot: &ShotParams,
    kind: ControlStrategyKind,
    table: Option<pump_core::PressureGainTable>,
    reporter: &Reporter,
) -> Result<Summary> {
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::Relaxed))
            .map_err(|e| eyre::eyre!("install Ctrl-C handler: {e}"))?;
    }

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let (plant, sensor, actuator) = plant::assemble(cfg, Some(clock));
    let mut builder = Pump::builder()
        .with_sensor(sensor)
        .with_actuator(actuator)
        .with_controller(cfg.into())
        .with_loop((&cfg.loop_cfg).into())
        .with_strategy(kind)
        .with_gain_table_cfg((&cfg.strategy).into())
        .with_clock(Box::new(MonotonicClock::new()));
    if let Some(table) = table {
        builder = builder.with_gain_table(table);
    }
    let pump = builder.build()?;

    let closed = shot.operating_point(false);
    match closed.mode {
        ControlMode::Power => pump.set_power(closed.target)?,
        ControlMode::Pressure => pump.set_pressure_target(closed.target, closed.flow_limit)?,
        ControlMode::Flow => pump.set_flow_target(closed.target, closed.pressure_limit)?,
    }

    let start = Instant::now();
    let every = Duration::from_millis(shot.every_ms);
    let mut next_print = every;
    let mut valve_open = false;
    loop {
        let elapsed = start.elapsed();
        let t = elapsed.as_secs_f32();
        if t >= shot.seconds || shutdown.load(Ordering::Relaxed) {
            break;
        }
        if !valve_open && t >= shot.valve_open_at {
            pump.set_valve_state(true)?;
            valve_open = true;
        }
        if shot.every_ms > 0 && elapsed >= next_print {
            reporter.row(&Row::from_snapshot(t, &pump.telemetry()));
            next_print += every;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    if shutdown.load(Ordering::Relaxed) {
        tracing::warn!("interrupted; stopping pump");
    }

    let snap = pump.telemetry();
    let seconds = start.elapsed().as_secs_f32();
    let cps = pump.half_cycles_per_second();
    drop(pump);
    Ok(Summary {
        seconds,
        ticks: snap.ticks,
        half_cycles_per_second: cps,
        last: Row::from_snapshot(seconds, &snap),
        extracted_ml: plant::extracted_ml(&plant),
        true_resistance: cfg.simulation.puck_resistance,
    })
}
