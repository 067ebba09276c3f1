//! CLI argument definitions and the output-mode flag.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "pumpctl", version, about = "Espresso pump controller CLI")]
pub struct Cli {
    /// Path to config TOML; built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print telemetry and errors as JSON lines
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    Power,
    Pressure,
    Flow,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    Model,
    #[value(name = "gain_table")]
    GainTable,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller against the simulated group head
    Simulate {
        /// Control mode
        #[arg(long, value_enum, default_value = "pressure")]
        mode: ModeArg,
        /// Power in percent, pressure in bar or flow in ml/s
        #[arg(long)]
        target: f32,
        /// Flow limit (pressure mode, ml/s) or pressure limit (flow mode, bar); 0 = none
        #[arg(long, default_value_t = 0.0)]
        limit: f32,
        /// Simulated shot length in seconds
        #[arg(long, default_value_t = 25.0)]
        seconds: f32,
        /// Keep the valve closed until this many seconds into the shot
        #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
        valve_open_at: f32,
        /// Override `[strategy] kind` from the config
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Telemetry print interval in milliseconds (0 = summary only)
        #[arg(long, value_name = "MS", default_value_t = 500)]
        every_ms: u64,
        /// Run the actuation thread in wall-clock time instead of stepping
        /// the controller in simulated time
        #[arg(long, action = ArgAction::SetTrue)]
        realtime: bool,
    },
    /// Learn a pressure-gain table on the simulated group head
    Calibrate {
        /// Write the table as CSV (pressure_bar,gain)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Maximum 100 ms ramp steps before giving up
        #[arg(long, default_value_t = 600)]
        max_steps: u32,
        /// Run through the actuation loop in wall-clock time
        #[arg(long, action = ArgAction::SetTrue)]
        realtime: bool,
    },
    /// Validate the config and detect the mains rate
    SelfCheck,
}
