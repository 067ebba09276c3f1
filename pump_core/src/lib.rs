#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Closed-loop pump control (hardware-agnostic).
//!
//! This crate turns a brewing objective (raw power, target pressure or
//! target flow) into a phase-cut power command for a vibratory pump. All
//! hardware interactions go through `pump_traits::PressureSensor` and
//! `pump_traits::PhaseCutActuator`.
//!
//! ## Architecture
//!
//! - **Setpoint shaping**: second-order trajectory (`setpoint`)
//! - **Sensor filtering**: plausibility guard and scalar Kalman filter
//!   (`sensor_guard`, `kalman`)
//! - **Estimation**: RLS hydraulic resistance (`estimator`) and the virtual
//!   scale for flow and volume (`virtual_scale`)
//! - **Control**: sliding-mode duty controller (`sliding_mode`) arbitrated
//!   per mode (`arbiter`), or the legacy gain table (`legacy`)
//! - **Runtime**: the periodic actuation loop (`actuation`), built through
//!   `PumpBuilder` (`builder`)
//!
//! ## Units
//!
//! Pressure in bar, flow in ml/s, volume in ml, resistance in bar·s/m³.

pub mod actuation;
pub mod arbiter;
pub mod builder;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod error;
pub mod estimator;
pub mod hw_error;
pub mod kalman;
pub mod legacy;
pub mod mocks;
pub mod operating_point;
pub mod sensor_guard;
pub mod setpoint;
pub mod sliding_mode;
pub mod strategy;
pub mod telemetry;
pub mod util;
pub mod virtual_scale;

pub use actuation::{Hardware, Pump, detect_mains};
pub use arbiter::{DutyPath, PressureController, TickOutput};
pub use builder::{Missing, PumpBuilder, Set, build_strategy};
pub use calibration::{CalibrationState, GainCalibrator, PressureGainTable};
pub use config::*;
pub use error::{BuildError, PumpError, Result};
pub use estimator::ResistanceEstimator;
pub use legacy::GainTableController;
pub use operating_point::{Command, ControlMode, OperatingPoint};
pub use strategy::ControlStrategy;
pub use telemetry::TelemetrySnapshot;
