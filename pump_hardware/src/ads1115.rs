//! ADS1115 single-shot reads of a ratiometric pressure transducer.

use pump_traits::{HwResult, PressureSensor};
use rppal::i2c::I2c;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::{HwError, Result};

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;
/// ±4.096 V full scale.
const VOLTS_PER_LSB: f32 = 4.096 / 32768.0;
const CONVERSION_TIMEOUT: Duration = Duration::from_millis(5);

/// Linear transducer: `zero_volts` at 0 bar, `full_scale_volts` at
/// `full_scale_bar`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transducer {
    pub zero_volts: f32,
    pub full_scale_volts: f32,
    pub full_scale_bar: f32,
}

impl Transducer {
    pub fn bar(&self, volts: f32) -> f32 {
        let span = self.full_scale_volts - self.zero_volts;
        if span.abs() < f32::EPSILON {
            return f32::NAN;
        }
        (volts - self.zero_volts) / span * self.full_scale_bar
    }
}

pub struct Ads1115Pressure {
    i2c: I2c,
    channel: u8,
    transducer: Transducer,
}

impl Ads1115Pressure {
    pub fn new(bus: u8, address: u16, channel: u8, transducer: Transducer) -> Result<Self> {
        if channel > 3 {
            return Err(HwError::InvalidReading(format!("ads1115 channel {channel}")));
        }
        let mut i2c = I2c::with_bus(bus).map_err(|e| HwError::I2c(e.to_string()))?;
        i2c.set_slave_address(address)
            .map_err(|e| HwError::I2c(e.to_string()))?;
        Ok(Self {
            i2c,
            channel,
            transducer,
        })
    }

    fn config_word(&self) -> u16 {
        // OS start | MUX AINx/GND | PGA ±4.096 | single-shot | 860 SPS | comparator off
        0x8000 | (u16::from(0b100 | self.channel) << 12) | (0b001 << 9) | 0x0100 | (0b111 << 5) | 0b11
    }

    fn read_register(&mut self, reg: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(&[reg], &mut buf)
            .map_err(|e| HwError::I2c(e.to_string()))?;
        Ok(u16::from_be_bytes(buf))
    }

    /// One conversion in volts.
    pub fn read_volts(&mut self) -> Result<f32> {
        let [hi, lo] = self.config_word().to_be_bytes();
        self.i2c
            .write(&[REG_CONFIG, hi, lo])
            .map_err(|e| HwError::I2c(e.to_string()))?;
        let deadline = Instant::now() + CONVERSION_TIMEOUT;
        while self.read_register(REG_CONFIG)? & 0x8000 == 0 {
            if Instant::now() >= deadline {
                return Err(HwError::Timeout);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
        let raw = self.read_register(REG_CONVERSION)? as i16;
        trace!(raw, "ads1115 raw read");
        Ok(f32::from(raw) * VOLTS_PER_LSB)
    }
}

impl PressureSensor for Ads1115Pressure {
    fn read_pressure(&mut self) -> HwResult<f32> {
        let volts = self.read_volts()?;
        Ok(self.transducer.bar(volts))
    }
}

#[cfg(test)]
mod tests {
    use super::Transducer;

    #[test]
    fn transducer_is_linear() {
        let t = Transducer {
            zero_volts: 0.5,
            full_scale_volts: 4.5,
            full_scale_bar: 16.0,
        };
        assert_eq!(t.bar(0.5), 0.0);
        assert!((t.bar(2.5) - 8.0).abs() < 1e-5);
        assert!(t.bar(0.3) < 0.0);
    }
}
