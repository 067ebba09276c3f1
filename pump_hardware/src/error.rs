use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("i2c error: {0}")]
    I2c(String),
    #[error("conversion timeout")]
    Timeout,
    #[error("invalid reading: {0}")]
    InvalidReading(String),
    #[error("simulated fault: {0}")]
    Simulated(&'static str),
}

pub type Result<T> = std::result::Result<T, HwError>;
