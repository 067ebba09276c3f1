//! Sliding-mode duty controller with boundary-layer smoothing and gated,
//! conditionally-clamped integral action.
//!
//! ```text
//! e     = P − r
//! ė     = (P − P_prev)/dt − dr
//! s     = λ·e + κ·ė
//! α     = clamp(−(K + c·|s|)·tanh(s/ε) + ρ·sign(s) − Ki·iterm, 0, 1)
//! iterm = Ki·∫e
//! ```

use crate::config::SlidingModeCfg;
use crate::util::sign;

/// Per-tick controller input, passed by value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlidingInput {
    /// Filtered pressure, bar.
    pub pressure: f32,
    /// Shaped setpoint, bar.
    pub setpoint: f32,
    /// Shaped setpoint derivative, bar/s.
    pub setpoint_rate: f32,
    /// Stall pressure of the pump model, bar.
    pub pmax: f32,
}

/// Per-tick controller output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlidingOutput {
    /// Duty fraction α in `[0, 1]`.
    pub alpha: f32,
    /// Sliding variable s.
    pub surface: f32,
    /// Integral term Ki·∫e after anti-windup.
    pub iterm: f32,
    /// Integration was gated off this tick.
    pub priming: bool,
}

impl SlidingOutput {
    #[inline]
    pub fn duty_pct(&self) -> f32 {
        self.alpha * 100.0
    }
}

#[derive(Debug, Clone)]
pub struct SlidingModeController {
    cfg: SlidingModeCfg,
    dt: f32,
    previous_pressure: f32,
    error_integral: f32,
    alpha: f32,
}

impl SlidingModeController {
    pub fn new(cfg: SlidingModeCfg, dt: f32) -> Self {
        Self {
            cfg,
            dt: dt.max(f32::EPSILON),
            previous_pressure: 0.0,
            error_integral: 0.0,
            alpha: 0.0,
        }
    }

    pub fn update(&mut self, input: SlidingInput) -> SlidingOutput {
        if !(input.pressure.is_finite() && input.setpoint.is_finite()) {
            self.alpha = 0.0;
            return SlidingOutput {
                alpha: 0.0,
                surface: 0.0,
                iterm: self.iterm(),
                priming: true,
            };
        }
        let cfg = &self.cfg;
        let p = input.pressure;
        let error = p - input.setpoint;
        let pressure_rate = (p - self.previous_pressure) / self.dt;
        let error_rate = pressure_rate - input.setpoint_rate;
        self.previous_pressure = p;

        let s = cfg.lambda * error + cfg.kappa * error_rate;
        let sat = (s / cfg.epsilon.max(f32::EPSILON)).tanh();

        let priming = p <= cfg.priming_bar;
        let switching_gain = if priming {
            // Softer switching while the group head is still filling.
            cfg.k * (1.0 - 0.5 * input.setpoint / input.pmax.max(f32::EPSILON))
        } else {
            let candidate = self.error_integral + error * self.dt;
            let saturated = sign(error) == sign(candidate)
                && (cfg.ki * candidate).abs() > cfg.integral_limit;
            if error.is_finite() && !saturated {
                self.error_integral = candidate;
            }
            cfg.k
        };
        let iterm = cfg.ki * self.error_integral;

        let raw = -(switching_gain + cfg.c * s.abs()) * sat + cfg.rho * sign(s) - cfg.ki * iterm;
        self.alpha = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };

        SlidingOutput {
            alpha: self.alpha,
            surface: s,
            iterm,
            priming,
        }
    }

    /// Clear the integral and derivative history.
    pub fn reset(&mut self, pressure: f32) {
        self.previous_pressure = pressure;
        self.error_integral = 0.0;
        self.alpha = 0.0;
    }

    /// Keep the derivative history current on ticks where another path
    /// computed the duty.
    pub fn track(&mut self, pressure: f32) {
        self.previous_pressure = pressure;
    }

    #[inline]
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Ki·∫e, the quantity bounded by the anti-windup limit.
    #[inline]
    pub fn iterm(&self) -> f32 {
        self.cfg.ki * self.error_integral
    }
}
