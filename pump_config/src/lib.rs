#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and gain-table parsing for the pump controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//!   Every section is optional; omitted values take the reference tuning.
//! - The gain-table CSV loader enforces headers and level ordering.
use serde::Deserialize;
use std::io::Write;
use std::path::Path;

/// Gain table CSV schema.
///
/// Expected headers:
/// pressure_bar,gain
///
/// One row per whole-bar level starting at 0:
/// pressure_bar,gain
/// 0,0.021
/// 1,0.019
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct GainRow {
    pub pressure_bar: f32,
    pub gain: f32,
}

/// GPIO / I2C wiring, only used by the `hardware` backends.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Pins {
    /// Zero-cross detector input (BCM numbering).
    pub zero_cross: u8,
    /// Solid-state relay output (BCM numbering).
    pub ssr: u8,
    pub i2c_bus: u8,
    pub ads1115_address: u16,
    /// ADS1115 single-ended input channel, 0..=3.
    pub ads1115_channel: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            zero_cross: 17,
            ssr: 27,
            i2c_bus: 1,
            ads1115_address: 0x48,
            ads1115_channel: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoopCfg {
    pub period_ms: u64,
    /// Detected mains rates above this are treated as double counted.
    pub max_half_cycles_per_second: u32,
    pub clock_divider: u8,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            period_ms: 50,
            max_half_cycles_per_second: 70,
            clock_divider: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SetpointCfg {
    pub freq_hz: f32,
    pub damping: f32,
}

impl Default for SetpointCfg {
    fn default() -> Self {
        Self {
            freq_hz: 1.0,
            damping: 1.2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KalmanCfg {
    pub measurement_error: f32,
    pub estimate_error: f32,
    /// Defaults to `(3·dt)²` when absent.
    pub process_noise: Option<f32>,
}

impl Default for KalmanCfg {
    fn default() -> Self {
        Self {
            measurement_error: 0.1,
            estimate_error: 10.0,
            process_noise: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EstimatorCfg {
    /// Prior resistance, bar·s/m³.
    pub initial_resistance: f32,
    pub initial_covariance: f32,
    pub forgetting: f32,
    /// Pressure at which the hydraulic path counts as pressurized, bar.
    pub pressurized_bar: f32,
    pub min_flow_ml_s: f32,
    pub residual_tolerance: f32,
    pub score_gain: f32,
    pub max_resistance: f32,
    pub max_covariance: f32,
}

impl Default for EstimatorCfg {
    fn default() -> Self {
        Self {
            initial_resistance: 5e6,
            initial_covariance: 100.0,
            forgetting: 0.98,
            pressurized_bar: 1.0,
            min_flow_ml_s: 0.05,
            residual_tolerance: 0.05,
            score_gain: 0.05,
            max_resistance: 1e9,
            max_covariance: 1e6,
        }
    }
}

/// Sliding-mode duty controller gains.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControllerCfg {
    pub k: f32,
    pub lambda: f32,
    pub kappa: f32,
    pub c: f32,
    pub epsilon: f32,
    pub rho: f32,
    pub ki: f32,
    pub integral_limit: f32,
    pub priming_bar: f32,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            k: 0.3,
            lambda: 3.0,
            kappa: 0.1,
            c: 0.1,
            epsilon: 1.5,
            rho: 0.0,
            ki: 0.4,
            integral_limit: 1000.0,
            priming_bar: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PumpCfg {
    /// No-load flow at full power, ml/s.
    pub q0_ml_s: f32,
    /// Dead-head pressure, bar.
    pub pmax_bar: f32,
    pub puck_exponent: f32,
}

impl Default for PumpCfg {
    fn default() -> Self {
        Self {
            q0_ml_s: 14.0,
            pmax_bar: 15.0,
            puck_exponent: 1.2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ArbiterCfg {
    pub converged_score: f32,
    /// Absolute band (bar) for the PRESSURE-mode flow-limit heuristic.
    pub steady_band_bar: f32,
    /// Relative band for the virtual-scale carry term.
    pub reached_band_rel: f32,
    pub transfer_slew_pct: f32,
}

impl Default for ArbiterCfg {
    fn default() -> Self {
        Self {
            converged_score: 0.9,
            steady_band_bar: 0.2,
            reached_band_rel: 0.2,
            transfer_slew_pct: 25.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorCfg {
    pub min_bar: f32,
    pub max_bar: f32,
    pub fault_ticks: u32,
    /// Transducer output at 0 bar, volts.
    pub zero_volts: f32,
    /// Transducer output at `full_scale_bar`, volts.
    pub full_scale_volts: f32,
    pub full_scale_bar: f32,
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            min_bar: -1.0,
            max_bar: 20.0,
            fault_ticks: 10,
            zero_volts: 0.5,
            full_scale_volts: 4.5,
            full_scale_bar: 16.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Model,
    GainTable,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategyCfg {
    pub kind: StrategyKind,
    /// Pump displacement per fired half-cycle, ml (gain-table strategy).
    pub ml_per_half_cycle: f32,
    /// CSV produced by `pumpctl calibrate --out`.
    pub gain_table_csv: Option<String>,
}

impl Default for StrategyCfg {
    fn default() -> Self {
        Self {
            kind: StrategyKind::Model,
            ml_per_half_cycle: 0.28,
            gain_table_csv: None,
        }
    }
}

/// Inline calibration result; preferred over `strategy.gain_table_csv`.
#[derive(Debug, Deserialize, Clone)]
pub struct GainTableCfg {
    pub gains: Vec<f32>,
    #[serde(default)]
    pub opv_pressure: f32,
    #[serde(default)]
    pub half_cycles_per_second: u32,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Simulated plant used by `pumpctl simulate` and `calibrate`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulationCfg {
    /// Group-head compliance, ml per bar.
    pub compliance_ml_per_bar: f32,
    /// Puck resistance, bar·s/m³.
    pub puck_resistance: f32,
    /// Over-pressure valve opening pressure, bar.
    pub opv_bar: f32,
    /// Relief flow per bar above `opv_bar`, ml/s.
    pub opv_flow_per_bar: f32,
    /// Half-cycles per second reported by the simulated zero-cross input.
    pub detected_half_cycles_per_second: u32,
    /// The simulated driver accepts a clock divider.
    pub divider_supported: bool,
    /// Gaussian-ish sensor noise amplitude, bar.
    pub noise_bar: f32,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            compliance_ml_per_bar: 3.0,
            puck_resistance: 4e6,
            opv_bar: 11.0,
            opv_flow_per_bar: 20.0,
            detected_half_cycles_per_second: 100,
            divider_supported: true,
            noise_bar: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub pins: Pins,
    #[serde(rename = "loop")]
    pub loop_cfg: LoopCfg,
    pub setpoint: SetpointCfg,
    pub kalman: KalmanCfg,
    pub estimator: EstimatorCfg,
    pub controller: ControllerCfg,
    pub pump: PumpCfg,
    pub arbiter: ArbiterCfg,
    pub sensor: SensorCfg,
    pub strategy: StrategyCfg,
    pub logging: Logging,
    pub gain_table: Option<GainTableCfg>,
    pub simulation: SimulationCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

fn positive(x: f32) -> bool {
    x.is_finite() && x > 0.0
}

fn non_negative(x: f32) -> bool {
    x.is_finite() && x >= 0.0
}

/// Load a gain table written by `save_gain_table_csv`.
///
/// Rows must start at 0 bar and step by one whole bar.
pub fn load_gain_table_csv(path: &Path) -> eyre::Result<Vec<GainRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open gain table CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["pressure_bar", "gain"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "gain table CSV must have headers 'pressure_bar,gain', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<GainRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    validate_gain_rows(&rows)?;
    Ok(rows)
}

/// Check level ordering and values of a gain table.
pub fn validate_gain_rows(rows: &[GainRow]) -> eyre::Result<()> {
    if rows.is_empty() {
        eyre::bail!("gain table is empty");
    }
    for (i, row) in rows.iter().enumerate() {
        if (row.pressure_bar - i as f32).abs() > 1e-3 {
            eyre::bail!(
                "gain table row {} must be at {} bar, got {}",
                i + 2,
                i,
                row.pressure_bar
            );
        }
        if !non_negative(row.gain) {
            eyre::bail!("gain table row {} has invalid gain {}", i + 2, row.gain);
        }
    }
    Ok(())
}

/// Write a gain table CSV atomically (temp file + rename).
pub fn save_gain_table_csv(path: &Path, gains: &[f32]) -> eyre::Result<()> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["pressure_bar", "gain"])?;
    for (level, gain) in gains.iter().enumerate() {
        wtr.write_record([level.to_string(), gain.to_string()])?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| eyre::eyre!("encode gain table: {}", e))?;

    let tmp = path.with_extension("new");
    {
        let mut f = std::fs::File::create(&tmp)
            .map_err(|e| eyre::eyre!("create {:?}: {}", tmp, e))?;
        f.write_all(&bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path).map_err(|e| eyre::eyre!("rename {:?} -> {:?}: {}", tmp, path, e))
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Loop
        if !(1..=1000).contains(&self.loop_cfg.period_ms) {
            eyre::bail!("loop.period_ms must be in 1..=1000");
        }
        if self.loop_cfg.clock_divider == 0 {
            eyre::bail!("loop.clock_divider must be >= 1");
        }

        // Setpoint / Kalman
        if !positive(self.setpoint.freq_hz) {
            eyre::bail!("setpoint.freq_hz must be > 0");
        }
        if !positive(self.setpoint.damping) {
            eyre::bail!("setpoint.damping must be > 0");
        }
        if !positive(self.kalman.measurement_error) || !positive(self.kalman.estimate_error) {
            eyre::bail!("kalman.measurement_error and kalman.estimate_error must be > 0");
        }
        if let Some(q) = self.kalman.process_noise
            && !non_negative(q)
        {
            eyre::bail!("kalman.process_noise must be >= 0");
        }

        // Estimator
        let est = &self.estimator;
        if !(est.forgetting > 0.0 && est.forgetting <= 1.0) {
            eyre::bail!("estimator.forgetting must be in (0.0, 1.0]");
        }
        if !positive(est.initial_resistance) {
            eyre::bail!("estimator.initial_resistance must be > 0");
        }
        if !positive(est.initial_covariance) {
            eyre::bail!("estimator.initial_covariance must be > 0");
        }
        if !(est.max_resistance > est.initial_resistance) {
            eyre::bail!("estimator.max_resistance must exceed initial_resistance");
        }
        if !(est.max_covariance > est.initial_covariance) {
            eyre::bail!("estimator.max_covariance must exceed initial_covariance");
        }
        if !positive(est.residual_tolerance) {
            eyre::bail!("estimator.residual_tolerance must be > 0");
        }
        if !(0.0..=1.0).contains(&est.score_gain) {
            eyre::bail!("estimator.score_gain must be in [0.0, 1.0]");
        }

        // Controller
        let c = &self.controller;
        if !positive(c.epsilon) {
            eyre::bail!("controller.epsilon must be > 0");
        }
        for (name, v) in [
            ("k", c.k),
            ("lambda", c.lambda),
            ("kappa", c.kappa),
            ("c", c.c),
            ("ki", c.ki),
            ("integral_limit", c.integral_limit),
        ] {
            if !non_negative(v) {
                eyre::bail!("controller.{name} must be >= 0");
            }
        }

        // Pump
        if !positive(self.pump.q0_ml_s) {
            eyre::bail!("pump.q0_ml_s must be > 0");
        }
        if !positive(self.pump.pmax_bar) {
            eyre::bail!("pump.pmax_bar must be > 0");
        }
        if !positive(self.pump.puck_exponent) {
            eyre::bail!("pump.puck_exponent must be > 0");
        }

        // Arbiter
        if !(self.arbiter.converged_score > 0.0 && self.arbiter.converged_score <= 1.0) {
            eyre::bail!("arbiter.converged_score must be in (0.0, 1.0]");
        }
        if !non_negative(self.arbiter.steady_band_bar)
            || !non_negative(self.arbiter.reached_band_rel)
            || !non_negative(self.arbiter.transfer_slew_pct)
        {
            eyre::bail!("arbiter bands must be >= 0");
        }

        // Sensor
        if !(self.sensor.min_bar < self.sensor.max_bar) {
            eyre::bail!("sensor.min_bar must be < sensor.max_bar");
        }
        if self.sensor.fault_ticks == 0 {
            eyre::bail!("sensor.fault_ticks must be >= 1");
        }
        if !(self.sensor.full_scale_volts > self.sensor.zero_volts) {
            eyre::bail!("sensor.full_scale_volts must exceed sensor.zero_volts");
        }
        if !positive(self.sensor.full_scale_bar) {
            eyre::bail!("sensor.full_scale_bar must be > 0");
        }

        // Strategy
        if !positive(self.strategy.ml_per_half_cycle) {
            eyre::bail!("strategy.ml_per_half_cycle must be > 0");
        }
        if let Some(table) = &self.gain_table {
            if table.gains.is_empty() {
                eyre::bail!("gain_table.gains must not be empty");
            }
            if table.gains.iter().any(|g| !non_negative(*g)) {
                eyre::bail!("gain_table.gains must be finite and >= 0");
            }
        }
        if self.strategy.kind == StrategyKind::GainTable
            && self.gain_table.is_none()
            && self.strategy.gain_table_csv.is_none()
        {
            eyre::bail!("strategy.kind = \"gain_table\" requires [gain_table] or strategy.gain_table_csv");
        }

        // Pins
        if self.pins.ads1115_channel > 3 {
            eyre::bail!("pins.ads1115_channel must be in 0..=3");
        }

        // Simulation
        let sim = &self.simulation;
        if !positive(sim.compliance_ml_per_bar) || !positive(sim.puck_resistance) {
            eyre::bail!("simulation.compliance_ml_per_bar and puck_resistance must be > 0");
        }
        if !non_negative(sim.noise_bar) || !non_negative(sim.opv_flow_per_bar) {
            eyre::bail!("simulation noise and relief flow must be >= 0");
        }

        Ok(())
    }
}
