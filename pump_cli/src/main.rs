//! `pumpctl`: simulate shots, calibrate gain tables and check the rig.

mod calibrate;
mod cli;
mod error_fmt;
mod plant;
mod report;
mod simulate;

use clap::Parser;
use eyre::WrapErr;
use pump_config::Config;
use pump_core::error::Result;
use pump_core::{LoopCfg, PumpError, detect_mains};
use serde_json::json;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::cli::{Cli, Commands, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::simulate::ShotParams;

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(err) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    // Held until the command returns so buffered file logs are flushed.
    let _file_guard = init_tracing(&cli, &cfg)?;
    tracing::debug!(config = ?cli.config, "configuration loaded");

    match cli.cmd {
        Commands::Simulate {
            mode,
            target,
            limit,
            seconds,
            valve_open_at,
            strategy,
            every_ms,
            realtime,
        } => {
            let shot = ShotParams {
                mode,
                target,
                limit,
                seconds,
                valve_open_at,
                strategy,
                every_ms,
            };
            simulate::run_simulate(&cfg, &shot, realtime, cli.json)
        }
        Commands::Calibrate {
            out,
            max_steps,
            realtime,
        } => calibrate::run_calibrate(&cfg, out.as_deref(), max_steps, realtime, cli.json),
        Commands::SelfCheck => self_check(&cfg, cli.json),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let cfg = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("read config {}", path.display()))?;
            pump_config::load_toml(&text)
                .wrap_err_with(|| format!("parse config {}", path.display()))?
        }
        None => Config::default(),
    };
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

fn init_tracing(cli: &Cli, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .wrap_err_with(|| format!("invalid log level '{}'", cli.log_level))?;

    let console: Box<dyn Layer<Registry> + Send + Sync> = if cli.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let mut guard = None;
    let file_layer = match cfg.logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
            let appender = match cfg.logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                "never" => tracing_appender::rolling::never(dir, name),
                other => eyre::bail!("logging.rotation must be never, daily or hourly (got {other})"),
            };
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard = Some(file_guard);
            let level = cfg.logging.level.as_deref().unwrap_or("info");
            let file_filter = EnvFilter::try_new(level)
                .wrap_err_with(|| format!("invalid logging.level '{level}'"))?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(file_filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console.with_filter(filter))
        .with(file_layer)
        .try_init()
        .map_err(|e| eyre::eyre!("install tracing subscriber: {e}"))?;
    Ok(guard)
}

fn self_check(cfg: &Config, json_out: bool) -> Result<()> {
    let loop_cfg = LoopCfg::from(&cfg.loop_cfg);
    let (backend, cps, pressure) = probe(cfg, &loop_cfg)?;
    if cps == 0 {
        return Err(PumpError::HardwareFault("no mains zero crossings detected".into()).into());
    }
    if json_out {
        println!(
            "{}",
            json!({
                "event": "self_check",
                "ok": true,
                "backend": backend,
                "half_cycles_per_second": cps,
                "pressure_bar": pressure,
            })
        );
    } else {
        println!("backend: {backend}");
        println!("mains: {cps} half-cycles/s");
        println!("pressure: {pressure:.2} bar");
        println!("OK");
    }
    Ok(())
}

#[cfg(not(feature = "hardware"))]
fn probe(cfg: &Config, loop_cfg: &LoopCfg) -> Result<(&'static str, u32, f32)> {
    use pump_traits::PressureSensor;

    let (_plant, mut sensor, mut actuator) = plant::assemble(cfg, None);
    let cps = detect_mains(&mut actuator, loop_cfg);
    let pressure = sensor
        .read_pressure()
        .map_err(|e| eyre::Report::new(pump_core::hw_error::map_hw_error(&*e)))?;
    Ok(("simulation", cps, pressure))
}

#[cfg(feature = "hardware")]
fn probe(cfg: &Config, loop_cfg: &LoopCfg) -> Result<(&'static str, u32, f32)> {
    use pump_hardware::{Ads1115Pressure, PsmActuator, Transducer};
    use pump_traits::PressureSensor;

    let mut actuator = PsmActuator::new(cfg.pins.zero_cross, cfg.pins.ssr)
        .wrap_err("open zero-cross/ssr pins")?;
    let cps = detect_mains(&mut actuator, loop_cfg);
    let mut sensor = Ads1115Pressure::new(
        cfg.pins.i2c_bus,
        cfg.pins.ads1115_address,
        cfg.pins.ads1115_channel,
        Transducer {
            zero_volts: cfg.sensor.zero_volts,
            full_scale_volts: cfg.sensor.full_scale_volts,
            full_scale_bar: cfg.sensor.full_scale_bar,
        },
    )
    .wrap_err("open ads1115")?;
    let pressure = sensor
        .read_pressure()
        .map_err(|e| eyre::Report::new(pump_core::hw_error::map_hw_error(&*e)))?;
    Ok(("hardware", cps, pressure))
}
