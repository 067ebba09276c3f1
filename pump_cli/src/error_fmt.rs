//! Human-readable error descriptions and structured JSON error formatting.

use pump_core::error::{BuildError, PumpError};
use serde_json::json;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSensor => {
                "What happened: No pressure sensor was provided to the pump.\nLikely causes: The sensor backend failed to initialize or was not wired into the builder.\nHow to fix: Check the [pins] I2C settings and that the ADS1115 answers on the bus.".to_string()
            }
            BuildError::MissingActuator => {
                "What happened: No actuator was provided to the pump.\nLikely causes: The zero-cross or SSR pin could not be claimed.\nHow to fix: Check [pins] zero_cross and ssr and the GPIO permissions.".to_string()
            }
            BuildError::MissingGainTable => {
                "What happened: The gain-table strategy was selected without a gain table.\nLikely causes: Neither [gain_table] nor strategy.gain_table_csv is set, or the table is empty.\nHow to fix: Run `pumpctl calibrate --out gains.csv` and point strategy.gain_table_csv at it.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid controller configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(pe) = err.downcast_ref::<PumpError>() {
        return match pe {
            PumpError::HardwareFault(msg) => format!(
                "What happened: Hardware fault ({msg}).\nLikely causes: No mains at the zero-cross detector, or a wiring fault.\nHow to fix: Check mains wiring and the detector, then run `pumpctl self-check`."
            ),
            PumpError::Busy(what) => format!(
                "What happened: The hardware is busy ({what}).\nLikely causes: A calibration is already running.\nHow to fix: Wait for it to finish and retry."
            ),
            PumpError::Calibration(msg) => format!(
                "What happened: Calibration failed ({msg}).\nLikely causes: The pressure never settled, or the ramp ran out of steps.\nHow to fix: Close the valve, check the sensor, or raise --max-steps."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from config loading
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("gain table csv must have headers") {
        return "Invalid headers in gain table CSV. Expected 'pressure_bar,gain'.".to_string();
    }

    if lower.contains("invalid configuration") || lower.contains("parse config") {
        return format!(
            "What happened: Configuration is invalid.\nDetails: {msg}\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nDetails: {msg}\nHow to fix: Check the --config path."
        );
    }

    // Generic fallback
    format!(
        "Something went wrong.\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn reason(err: &eyre::Report) -> &'static str {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSensor => "MissingSensor",
            BuildError::MissingActuator => "MissingActuator",
            BuildError::MissingGainTable => "MissingGainTable",
            BuildError::InvalidConfig(_) => "InvalidConfig",
        };
    }
    if let Some(pe) = err.downcast_ref::<PumpError>() {
        return match pe {
            PumpError::Hardware(_) => "Hardware",
            PumpError::HardwareFault(_) => "HardwareFault",
            PumpError::Config(_) => "Config",
            PumpError::Busy(_) => "Busy",
            PumpError::State(_) => "State",
            PumpError::Calibration(_) => "Calibration",
        };
    }
    let lower = format!("{err:#}").to_ascii_lowercase();
    if lower.contains("invalid configuration") || lower.contains("parse config") {
        return "Config";
    }
    "Error"
}

/// Stable exit codes: 1 generic, 3 configuration, 4 hardware, 5 calibration, 6 busy.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match reason(err) {
        "MissingGainTable" | "InvalidConfig" | "Config" => 3,
        "MissingSensor" | "MissingActuator" | "Hardware" | "HardwareFault" => 4,
        "Calibration" => 5,
        "Busy" => 6,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    json!({ "event": "error", "reason": reason(err), "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_maps_to_its_own_exit_code() {
        let err = eyre::Report::new(PumpError::Busy("calibration in progress"));
        assert_eq!(exit_code_for_error(&err), 6);
        assert!(humanize(&err).contains("busy"));
    }

    #[test]
    fn wrapped_config_errors_are_config() {
        let err = eyre::eyre!("loop.period_ms must be in 1..=1000").wrap_err("invalid configuration");
        assert_eq!(exit_code_for_error(&err), 3);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "Config");
        assert!(v["message"].as_str().unwrap().contains("period_ms"));
    }

    #[test]
    fn missing_gain_table_points_at_calibrate() {
        let err = eyre::Report::new(BuildError::MissingGainTable);
        assert!(humanize(&err).contains("pumpctl calibrate"));
        assert_eq!(exit_code_for_error(&err), 3);
    }
}
