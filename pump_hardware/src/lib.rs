//! Pressure sensor and phase-cut actuator backends.
//!
//! - `sim`: a hydraulic plant model with simulated sensor and actuator,
//!   always available (used by the CLI and tests).
//! - `psm` / `ads1115` (feature `hardware`): Raspberry Pi drivers over
//!   `rppal` GPIO and I2C.

pub mod error;
pub mod sim;

#[cfg(feature = "hardware")]
pub mod ads1115;
#[cfg(feature = "hardware")]
pub mod psm;

pub use error::HwError;
pub use sim::{PlantParams, SharedPlant, SimActuator, SimPlant, SimPressureSensor};

#[cfg(feature = "hardware")]
pub use ads1115::{Ads1115Pressure, Transducer};
#[cfg(feature = "hardware")]
pub use psm::PsmActuator;
