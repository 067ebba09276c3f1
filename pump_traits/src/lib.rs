//! Collaborator interfaces for the pump control engine.
//!
//! The engine only ever talks to hardware through these traits; concrete
//! drivers (simulated or real) live in `pump_hardware`.

pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Boxed error type used at the hardware trait boundary.
pub type HwResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Pressure transducer on the group head line.
///
/// One sample per call, no buffering. Units are bar and must match the
/// pump model's maximum pressure.
pub trait PressureSensor {
    fn read_pressure(&mut self) -> HwResult<f32>;
}

/// Phase-cut (or pulse-skip) AC power stage driving the vibratory pump.
///
/// The driver owns zero-crossing synchronization; the engine only issues
/// a percentage.
pub trait PhaseCutActuator {
    /// Request a power level in percent, `0.0..=100.0`.
    fn set_power(&mut self, percent: f32) -> HwResult<()>;

    /// Mains half-cycles per second as detected by the zero-cross input.
    fn detected_half_cycles_per_second(&self) -> u32;

    /// Change the zero-cross clock divider. Returns `Ok(false)` when the
    /// driver has no divider.
    fn set_clock_divider(&mut self, _divider: u8) -> HwResult<bool> {
        Ok(false)
    }
}

impl<T: PressureSensor + ?Sized> PressureSensor for Box<T> {
    fn read_pressure(&mut self) -> HwResult<f32> {
        (**self).read_pressure()
    }
}

impl<T: PhaseCutActuator + ?Sized> PhaseCutActuator for Box<T> {
    fn set_power(&mut self, percent: f32) -> HwResult<()> {
        (**self).set_power(percent)
    }

    fn detected_half_cycles_per_second(&self) -> u32 {
        (**self).detected_half_cycles_per_second()
    }

    fn set_clock_divider(&mut self, divider: u8) -> HwResult<bool> {
        (**self).set_clock_divider(divider)
    }
}
