//! Raw pressure plausibility check.
//!
//! Invalid samples (non-finite or outside the configured window) never reach
//! the filters. The guard remembers the last good value and reports a fault
//! once too many consecutive samples were rejected or none was ever valid.

use crate::config::SensorGuardCfg;

#[derive(Debug, Clone)]
pub struct SensorGuard {
    cfg: SensorGuardCfg,
    last_valid: Option<f32>,
    invalid_streak: u32,
}

impl SensorGuard {
    pub fn new(cfg: SensorGuardCfg) -> Self {
        Self {
            cfg,
            last_valid: None,
            invalid_streak: 0,
        }
    }

    #[inline]
    pub fn is_plausible(&self, raw: f32) -> bool {
        raw.is_finite() && (self.cfg.min_bar..=self.cfg.max_bar).contains(&raw)
    }

    /// Check one raw sample. Returns it when usable.
    pub fn accept(&mut self, raw: f32) -> Option<f32> {
        if self.is_plausible(raw) {
            if self.invalid_streak >= self.cfg.fault_ticks.max(1) {
                tracing::info!(after = self.invalid_streak, "pressure sensor recovered");
            }
            self.last_valid = Some(raw);
            self.invalid_streak = 0;
            return Some(raw);
        }
        self.invalid_streak = self.invalid_streak.saturating_add(1);
        if self.invalid_streak == 1 {
            tracing::warn!(raw, "implausible pressure sample; holding last estimate");
        } else if self.invalid_streak == self.cfg.fault_ticks.max(1) {
            tracing::warn!(
                ticks = self.invalid_streak,
                "pressure sensor faulted; closed-loop duty forced to 0"
            );
        }
        None
    }

    /// Closed-loop control must not act on the pressure estimate.
    #[inline]
    pub fn faulted(&self) -> bool {
        self.last_valid.is_none() || self.invalid_streak >= self.cfg.fault_ticks.max(1)
    }

    #[inline]
    pub fn last_valid(&self) -> Option<f32> {
        self.last_valid
    }

    #[inline]
    pub fn invalid_streak(&self) -> u32 {
        self.invalid_streak
    }

    pub fn reset(&mut self) {
        self.last_valid = None;
        self.invalid_streak = 0;
    }
}
