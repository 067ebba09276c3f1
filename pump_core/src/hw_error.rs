//! Maps `Box<dyn Error>` from trait boundaries to typed `PumpError`.
//!
//! The traits in `pump_traits` use `Box<dyn Error + Send + Sync>` for maximum
//! flexibility; this module converts those to our typed error enum, with an
//! optional feature-gated path for `pump_hardware::HwError` downcasting.

use crate::error::PumpError;

/// Map a trait-boundary error to a typed `PumpError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> PumpError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<pump_hardware::error::HwError>() {
            return match hw {
                pump_hardware::error::HwError::Gpio(msg) | pump_hardware::error::HwError::I2c(msg) => {
                    PumpError::HardwareFault(msg.clone())
                }
                other => PumpError::Hardware(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("fault") {
        PumpError::HardwareFault(s)
    } else {
        PumpError::Hardware(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_errors_map_to_hardware() {
        let e = std::io::Error::other("bus glitch");
        match map_hw_error(&e) {
            PumpError::Hardware(msg) => assert!(msg.contains("bus glitch")),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn fault_wording_maps_to_fault() {
        let e = std::io::Error::other("SSR driver fault");
        assert!(matches!(map_hw_error(&e), PumpError::HardwareFault(_)));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn typed_gpio_error_is_a_fault() {
        let e = pump_hardware::error::HwError::Gpio("pin 17 busy".into());
        assert!(matches!(map_hw_error(&e), PumpError::HardwareFault(_)));
    }
}
