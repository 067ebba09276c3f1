//! Scalar Kalman filter for the group-head pressure signal.

use crate::config::KalmanCfg;

/// One-state Kalman filter with a random-walk process model.
///
/// The estimate error grows with the size of each correction, so the filter
/// tracks fast pressure ramps yet settles on a quiet signal.
#[derive(Debug, Clone)]
pub struct PressureKalman {
    measurement_error: f32,
    initial_error: f32,
    estimate_error: f32,
    process_noise: f32,
    estimate: f32,
    gain: f32,
}

impl PressureKalman {
    pub fn new(cfg: KalmanCfg, dt: f32) -> Self {
        let process_noise = cfg.process_noise.unwrap_or((3.0 * dt).powi(2));
        Self {
            measurement_error: cfg.measurement_error,
            initial_error: cfg.estimate_error,
            estimate_error: cfg.estimate_error,
            process_noise,
            estimate: 0.0,
            gain: 0.0,
        }
    }

    /// Fold one raw sample into the estimate and return it.
    ///
    /// Non-finite samples are ignored and the previous estimate is held.
    pub fn update(&mut self, measurement: f32) -> f32 {
        if !measurement.is_finite() {
            return self.estimate;
        }
        self.gain = self.estimate_error / (self.estimate_error + self.measurement_error);
        let previous = self.estimate;
        self.estimate = previous + self.gain * (measurement - previous);
        self.estimate_error = (1.0 - self.gain) * self.estimate_error
            + (previous - self.estimate).abs() * self.process_noise;
        self.estimate
    }

    /// Restore the initial uncertainty; the estimate restarts at `value`.
    pub fn reset(&mut self, value: f32) {
        self.estimate = value;
        self.estimate_error = self.initial_error;
        self.gain = 0.0;
    }

    #[inline]
    pub fn estimate(&self) -> f32 {
        self.estimate
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    #[inline]
    pub fn estimate_error(&self) -> f32 {
        self.estimate_error
    }
}
