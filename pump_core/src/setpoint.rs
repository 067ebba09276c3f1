//! Second-order setpoint shaping.
//!
//! Turns a step target into a smooth trajectory `(r, dr)`:
//!
//! ```text
//! d2r = ωn²·(target − r) − 2·ζ·ωn·dr
//! dr += d2r·dt
//! r  += dr·dt
//! ```

use std::f32::consts::PI;

use crate::config::SetpointFilterCfg;

#[derive(Debug, Clone)]
pub struct SetpointFilter {
    cfg: SetpointFilterCfg,
    dt: f32,
    r: f32,
    dr: f32,
    initialized: bool,
}

impl SetpointFilter {
    pub fn new(cfg: SetpointFilterCfg, dt: f32) -> Self {
        Self {
            cfg,
            dt,
            r: 0.0,
            dr: 0.0,
            initialized: false,
        }
    }

    /// Change shaping parameters. The trajectory restarts from the next
    /// target when they differ from the current ones.
    pub fn configure(&mut self, cfg: SetpointFilterCfg) {
        if cfg != self.cfg {
            self.initialized = false;
        }
        self.cfg = cfg;
    }

    /// Snap to `target` with zero slope.
    pub fn snap(&mut self, target: f32) {
        self.r = target;
        self.dr = 0.0;
        self.initialized = true;
    }

    /// Forget the trajectory; the next `step` snaps to its target.
    pub fn invalidate(&mut self) {
        self.initialized = false;
    }

    /// Advance one tick toward `target` and return `(r, dr)`.
    pub fn step(&mut self, target: f32) -> (f32, f32) {
        if !self.initialized {
            self.snap(target);
            return (self.r, self.dr);
        }
        let wn = 2.0 * PI * self.cfg.freq_hz;
        let d2r = wn * wn * (target - self.r) - 2.0 * self.cfg.damping * wn * self.dr;
        self.dr += d2r * self.dt;
        self.r += self.dr * self.dt;
        (self.r, self.dr)
    }

    #[inline]
    pub fn position(&self) -> f32 {
        self.r
    }

    #[inline]
    pub fn derivative(&self) -> f32 {
        self.dr
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}
