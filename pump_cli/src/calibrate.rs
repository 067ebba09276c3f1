//! Gain-table calibration against the simulated group head.

use eyre::WrapErr;
use pump_config::Config;
use pump_core::calibration::CALIBRATION_STEP_MS;
use pump_core::error::Result;
use pump_core::hw_error::map_hw_error;
use pump_core::{
    CalibrationState, GainCalibrator, LoopCfg, PressureGainTable, Pump, PumpError, detect_mains,
};
use pump_traits::clock::{Clock, MonotonicClock};
use pump_traits::{PhaseCutActuator, PressureSensor};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::plant;

fn hw(e: Box<dyn std::error::Error + Send + Sync>) -> eyre::Report {
    eyre::Report::new(map_hw_error(&*e))
}

/// Drive the calibration state machine in simulated time.
pub fn calibrate_stepped(cfg: &Config, max_steps: u32) -> Result<PressureGainTable> {
    let (plant, mut sensor, mut actuator) = plant::assemble(cfg, None);
    plant::set_valve(&plant, false);
    let loop_cfg = LoopCfg::from(&cfg.loop_cfg);
    let cps = detect_mains(&mut actuator, &loop_cfg);
    let dt = CALIBRATION_STEP_MS as f32 / 1000.0;

    let mut cal = GainCalibrator::new(cps, max_steps);
    let mut step = cal.start(sensor.read_pressure().map_err(hw)?);
    actuator.set_power(step.duty_pct).map_err(hw)?;
    while step.state == CalibrationState::Ramping {
        plant::advance(&plant, dt);
        let p = sensor.read_pressure().map_err(hw)?;
        step = cal.step(p);
        actuator.set_power(step.duty_pct).map_err(hw)?;
    }
    cal.table().ok_or_else(|| {
        eyre::Report::new(PumpError::Calibration(
            cal.failure().unwrap_or("unknown").to_string(),
        ))
    })
}

/// Calibrate through the actuation loop, in wall-clock time.
pub fn calibrate_realtime(cfg: &Config, max_steps: u32) -> Result<PressureGainTable> {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let (_plant, sensor, actuator) = plant::assemble(cfg, Some(clock));
    let pump = Pump::builder()
        .with_sensor(sensor)
        .with_actuator(actuator)
        .with_controller(cfg.into())
        .with_loop((&cfg.loop_cfg).into())
        .with_clock(Box::new(MonotonicClock::new()))
        .build()?;
    pump.calibrate(max_steps)
}

pub fn run_calibrate(
    cfg: &Config,
    out: Option<&Path>,
    max_steps: u32,
    realtime: bool,
    json: bool,
) -> Result<()> {
    let table = if realtime {
        calibrate_realtime(cfg, max_steps)?
    } else {
        calibrate_stepped(cfg, max_steps)?
    };
    if let Some(path) = out {
        pump_config::save_gain_table_csv(path, &table.gains)
            .wrap_err_with(|| format!("write gain table {}", path.display()))?;
        tracing::info!(path = %path.display(), levels = table.len(), "gain table written");
    }

    if json {
        println!(
            "{}",
            json!({
                "event": "calibration",
                "gains": table.gains,
                "opv_pressure": table.opv_pressure,
                "half_cycles_per_second": table.half_cycles_per_second,
            })
        );
    } else {
        println!("pressure_bar,gain");
        for (bar, gain) in table.gains.iter().enumerate() {
            println!("{bar},{gain:.6}");
        }
        println!(
            "# plateau {:.2} bar at {} half-cycles/s",
            table.opv_pressure, table.half_cycles_per_second
        );
    }
    Ok(())
}

/// The table the gain-table strategy should run with: inline config first,
/// then the configured CSV, else a fresh calibration of the simulation.
pub fn resolve_gain_table(cfg: &Config) -> Result<PressureGainTable> {
    if let Some(inline) = &cfg.gain_table {
        return Ok(inline.into());
    }
    if let Some(path) = &cfg.strategy.gain_table_csv {
        let rows = pump_config::load_gain_table_csv(Path::new(path))?;
        return Ok(rows.as_slice().into());
    }
    tracing::info!("no gain table configured; calibrating the simulated group head first");
    calibrate_stepped(cfg, 600)
}
