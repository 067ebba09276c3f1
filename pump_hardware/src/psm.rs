//! Pulse-skip modulation over a zero-cross detector and an SSR.
//!
//! Every zero crossing decides whether the next half-cycle is conducted:
//! the requested power accumulates and a half-cycle fires whenever the
//! accumulator reaches 100. With a divider `n` only every `n`th crossing
//! is acted upon, halving the control rate on 60 Hz mains.

use pump_traits::{HwResult, PhaseCutActuator};
use rppal::gpio::{Gpio, InputPin, Level, Trigger};
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{HwError, Result};

const MEASURE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Shared {
    power_bits: AtomicU32,
    divider: AtomicU8,
    crossings: AtomicU32,
}

impl Shared {
    fn power(&self) -> f32 {
        f32::from_bits(self.power_bits.load(Ordering::Relaxed))
    }
}

pub struct PsmActuator {
    _zero_cross: InputPin,
    shared: Arc<Shared>,
    detected: u32,
}

impl PsmActuator {
    /// Claim the pins, arm the zero-cross interrupt and measure the mains
    /// rate over a short window.
    pub fn new(zero_cross_pin: u8, ssr_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut zc = gpio
            .get(zero_cross_pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_input_pulldown();
        let mut ssr = gpio
            .get(ssr_pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_output_low();
        ssr.set_reset_on_drop(true);

        let shared = Arc::new(Shared::default());
        shared.divider.store(1, Ordering::Relaxed);
        let cb_shared = Arc::clone(&shared);
        let mut acc = 0.0f32;
        zc.set_async_interrupt(Trigger::RisingEdge, move |_: Level| {
            let n = cb_shared.crossings.fetch_add(1, Ordering::Relaxed);
            let div = u32::from(cb_shared.divider.load(Ordering::Relaxed).max(1));
            if n % div != 0 {
                return;
            }
            acc += cb_shared.power();
            if acc >= 100.0 {
                acc -= 100.0;
                ssr.set_high();
            } else {
                ssr.set_low();
            }
        })
        .map_err(|e| HwError::Gpio(e.to_string()))?;

        let detected = measure(&shared);
        info!(
            zero_cross_pin,
            ssr_pin,
            half_cycles_per_second = detected,
            "psm actuator ready"
        );
        Ok(Self {
            _zero_cross: zc,
            shared,
            detected,
        })
    }
}

fn measure(shared: &Shared) -> u32 {
    let start_count = shared.crossings.load(Ordering::Relaxed);
    let start = Instant::now();
    std::thread::sleep(MEASURE_WINDOW);
    let n = shared.crossings.load(Ordering::Relaxed).wrapping_sub(start_count);
    let secs = start.elapsed().as_secs_f32().max(f32::EPSILON);
    let div = u32::from(shared.divider.load(Ordering::Relaxed).max(1));
    ((n as f32 / secs).round() as u32) / div
}

impl PhaseCutActuator for PsmActuator {
    fn set_power(&mut self, percent: f32) -> HwResult<()> {
        let p = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
        self.shared.power_bits.store(p.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn detected_half_cycles_per_second(&self) -> u32 {
        self.detected
    }

    fn set_clock_divider(&mut self, divider: u8) -> HwResult<bool> {
        if divider == 0 {
            return Err(HwError::InvalidReading("divider 0".into()).into());
        }
        self.shared.divider.store(divider, Ordering::Relaxed);
        self.detected = measure(&self.shared);
        debug!(divider, detected = self.detected, "zero-cross divider set");
        Ok(true)
    }
}
