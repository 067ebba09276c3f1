use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PumpError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("hardware busy: {0}")]
    Busy(&'static str),
    #[error("invalid state: {0}")]
    State(String),
    #[error("calibration failed: {0}")]
    Calibration(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing pressure sensor")]
    MissingSensor,
    #[error("missing actuator")]
    MissingActuator,
    #[error("gain-table strategy selected without a gain table")]
    MissingGainTable,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
