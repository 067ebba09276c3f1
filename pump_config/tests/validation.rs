use pump_config::{StrategyKind, load_toml};
use rstest::rstest;

#[test]
fn empty_config_uses_reference_tuning() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults are valid");
    assert_eq!(cfg.loop_cfg.period_ms, 50);
    assert_eq!(cfg.setpoint.freq_hz, 1.0);
    assert_eq!(cfg.controller.ki, 0.4);
    assert_eq!(cfg.estimator.initial_resistance, 5e6);
    assert_eq!(cfg.strategy.kind, StrategyKind::Model);
    assert!(cfg.gain_table.is_none());
}

#[test]
fn full_config_parses() {
    let toml = r#"
[pins]
zero_cross = 5
ssr = 6

[loop]
period_ms = 40
max_half_cycles_per_second = 70
clock_divider = 2

[setpoint]
freq_hz = 0.8
damping = 1.0

[kalman]
measurement_error = 0.2
estimate_error = 5.0
process_noise = 0.01

[estimator]
initial_resistance = 3e6
forgetting = 0.99

[controller]
k = 0.25
ki = 0.3
integral_limit = 500.0

[pump]
q0_ml_s = 12.0
pmax_bar = 14.0

[arbiter]
converged_score = 0.85

[sensor]
fault_ticks = 5

[strategy]
kind = "gain_table"

[gain_table]
gains = [0.02, 0.018, 0.015]
opv_pressure = 10.5
half_cycles_per_second = 50

[logging]
level = "debug"
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid");
    assert_eq!(cfg.loop_cfg.period_ms, 40);
    assert_eq!(cfg.kalman.process_noise, Some(0.01));
    assert_eq!(cfg.strategy.kind, StrategyKind::GainTable);
    assert_eq!(cfg.gain_table.as_ref().map(|t| t.gains.len()), Some(3));
    // Unset fields keep their defaults.
    assert_eq!(cfg.controller.lambda, 3.0);
}

#[rstest]
#[case("[loop]\nperiod_ms = 0", "loop.period_ms")]
#[case("[loop]\nclock_divider = 0", "loop.clock_divider")]
#[case("[setpoint]\nfreq_hz = 0.0", "setpoint.freq_hz")]
#[case("[kalman]\nprocess_noise = -1.0", "kalman.process_noise")]
#[case("[estimator]\nforgetting = 1.5", "estimator.forgetting")]
#[case("[estimator]\ninitial_resistance = 0.0", "estimator.initial_resistance")]
#[case("[controller]\nepsilon = 0.0", "controller.epsilon")]
#[case("[controller]\nki = -0.1", "controller.ki")]
#[case("[pump]\npmax_bar = 0.0", "pump.pmax_bar")]
#[case("[arbiter]\nconverged_score = 0.0", "arbiter.converged_score")]
#[case("[sensor]\nmin_bar = 5.0\nmax_bar = 1.0", "sensor.min_bar")]
#[case("[sensor]\nfault_ticks = 0", "sensor.fault_ticks")]
#[case("[strategy]\nkind = \"gain_table\"", "requires [gain_table]")]
#[case("[gain_table]\ngains = []", "gain_table.gains")]
#[case("[pins]\nads1115_channel = 4", "pins.ads1115_channel")]
fn rejects_invalid_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains(needle), "got: {err}");
}

#[test]
fn unknown_strategy_is_a_parse_error() {
    assert!(load_toml("[strategy]\nkind = \"pid\"").is_err());
}
