//! Online hydraulic resistance estimation (recursive least squares).
//!
//! Model: quasi-static `P = R·Q`, with `Q` the pump-side flow estimate and
//! `P` the filtered pressure. Internally the estimator works on the
//! normalized parameter `θ = R·1e-6` (bar per ml/s) and flow in ml/s so the
//! arithmetic stays well scaled in `f32`.

use crate::config::RlsCfg;

/// ml/s → m³/s.
pub const ML_TO_M3: f32 = 1e-6;

#[derive(Debug, Clone)]
pub struct ResistanceEstimator {
    cfg: RlsCfg,
    theta: f32,
    covariance: f32,
    score: f32,
    updates: u64,
    resets: u64,
}

/// Outcome of one estimator update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorStep {
    /// Back-pressure has built up on the hydraulic path.
    pub pressurized: bool,
    /// The pair carried information and the estimate moved.
    pub updated: bool,
    /// The estimator diverged and was reset to its prior.
    pub diverged: bool,
}

impl ResistanceEstimator {
    pub fn new(cfg: RlsCfg) -> Self {
        Self {
            cfg,
            theta: cfg.initial_resistance * ML_TO_M3,
            covariance: cfg.initial_covariance,
            score: 0.0,
            updates: 0,
            resets: 0,
        }
    }

    /// Feed one `(Qi, P)` pair. `flow_ml_s` is the pump-side flow estimate.
    pub fn update(&mut self, flow_ml_s: f32, pressure_bar: f32) -> EstimatorStep {
        let pressurized = pressure_bar.is_finite() && pressure_bar >= self.cfg.pressurized_bar;
        let mut step = EstimatorStep {
            pressurized,
            updated: false,
            diverged: false,
        };
        if !pressurized || !flow_ml_s.is_finite() || flow_ml_s < self.cfg.min_flow_ml_s {
            return step;
        }

        let x = flow_ml_s;
        let lambda = self.cfg.forgetting.clamp(f32::EPSILON, 1.0);
        let gain = self.covariance * x / (lambda + x * self.covariance * x);
        self.theta += gain * (pressure_bar - self.theta * x);
        self.covariance = (self.covariance - gain * x * self.covariance) / lambda;
        self.updates += 1;
        step.updated = true;

        if !self.within_bounds() {
            tracing::warn!(
                theta = self.theta,
                covariance = self.covariance,
                "resistance estimator diverged; resetting"
            );
            self.reset();
            self.resets += 1;
            step.diverged = true;
            return step;
        }

        let residual = (pressure_bar - self.theta * x).abs() / pressure_bar.max(f32::EPSILON);
        let tol = self.cfg.residual_tolerance.max(f32::EPSILON);
        let consistency = (-(residual / tol).powi(2)).exp();
        let g = self.cfg.score_gain.clamp(0.0, 1.0);
        self.score = (self.score + g * (consistency - self.score)).clamp(0.0, 1.0);
        step
    }

    fn within_bounds(&self) -> bool {
        self.theta.is_finite()
            && self.theta > 0.0
            && self.theta / ML_TO_M3 <= self.cfg.max_resistance
            && self.covariance.is_finite()
            && self.covariance > 0.0
            && self.covariance <= self.cfg.max_covariance
    }

    /// Restore the prior so a new shot starts unbiased by the previous puck.
    pub fn reset(&mut self) {
        self.theta = self.cfg.initial_resistance * ML_TO_M3;
        self.covariance = self.cfg.initial_covariance;
        self.score = 0.0;
    }

    /// Install a known resistance and confidence (warm start).
    pub fn seed(&mut self, resistance: f32, score: f32) {
        if resistance.is_finite() && resistance > 0.0 && resistance <= self.cfg.max_resistance {
            self.theta = resistance * ML_TO_M3;
        }
        self.score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        self.covariance = (self.cfg.initial_covariance * (1.0 - self.score)).max(1e-3);
    }

    /// Resistance in bar·s/m³.
    #[inline]
    pub fn estimate(&self) -> f32 {
        self.theta / ML_TO_M3
    }

    /// Pressure (bar) the puck develops at `flow_ml_s` under the current estimate.
    #[inline]
    pub fn pressure_for_flow(&self, flow_ml_s: f32) -> f32 {
        self.theta * flow_ml_s
    }

    #[inline]
    pub fn convergence(&self) -> f32 {
        self.score
    }

    #[inline]
    pub fn covariance(&self) -> f32 {
        self.covariance
    }

    /// The estimate is trusted: score at or above `threshold` and bounded covariance.
    pub fn is_converged(&self, threshold: f32) -> bool {
        self.score >= threshold && self.within_bounds()
    }

    #[inline]
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    #[inline]
    pub fn divergence_resets(&self) -> u64 {
        self.resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rls() -> ResistanceEstimator {
        ResistanceEstimator::new(RlsCfg::default())
    }

    #[test]
    fn learns_constant_resistance() {
        let mut est = rls();
        let r_true = 3e6_f32;
        for i in 0..200 {
            let q = 1.0 + (i % 7) as f32 * 0.3;
            est.update(q, r_true * ML_TO_M3 * q);
        }
        let rel = (est.estimate() - r_true).abs() / r_true;
        assert!(rel < 1e-3, "rel error {rel}");
        assert!(est.is_converged(0.9), "score {}", est.convergence());
    }

    #[test]
    fn below_pressurization_nothing_moves() {
        let mut est = rls();
        let step = est.update(5.0, 0.5);
        assert!(!step.pressurized);
        assert!(!step.updated);
        assert_eq!(est.estimate(), RlsCfg::default().initial_resistance);
        assert_eq!(est.convergence(), 0.0);
    }

    #[test]
    fn no_flow_means_no_update_but_still_pressurized() {
        let mut est = rls();
        let step = est.update(0.0, 8.0);
        assert!(step.pressurized);
        assert!(!step.updated);
    }

    #[test]
    fn inconsistent_pairs_lower_the_score() {
        let mut est = rls();
        for _ in 0..100 {
            est.update(2.0, 8.0);
        }
        let high = est.convergence();
        for i in 0..40 {
            let p = if i % 2 == 0 { 2.0 } else { 12.0 };
            est.update(2.0, p);
        }
        assert!(est.convergence() < high);
    }

    #[test]
    fn divergence_resets_to_prior() {
        let cfg = RlsCfg {
            max_resistance: 1e7,
            ..RlsCfg::default()
        };
        let mut est = ResistanceEstimator::new(cfg);
        // 14 bar at 0.1 ml/s implies 1.4e8 bar·s/m³, far beyond the bound.
        let mut diverged = false;
        for _ in 0..10 {
            diverged |= est.update(0.1, 14.0).diverged;
        }
        assert!(diverged);
        assert!(est.estimate() > 0.0);
        assert!(est.estimate() <= 1e7);
        assert!(est.divergence_resets() >= 1);
    }

    #[test]
    fn seed_installs_estimate_and_score() {
        let mut est = rls();
        est.seed(4e6, 0.95);
        assert!((est.estimate() - 4e6).abs() < 1.0);
        assert_eq!(est.convergence(), 0.95);
        assert!(est.is_converged(0.9));
        est.reset();
        assert_eq!(est.convergence(), 0.0);
    }

    #[test]
    fn implausible_seed_keeps_prior() {
        let mut est = rls();
        est.seed(5e9, 0.5);
        assert!((est.estimate() - 5e6).abs() < 1.0);
        est.seed(f32::NAN, 0.5);
        assert!((est.estimate() - 5e6).abs() < 1.0);
    }

    #[test]
    fn pressure_for_flow_uses_ml_units() {
        let mut est = rls();
        est.seed(5e6, 1.0);
        // 2 ml/s through 5e6 bar·s/m³ is 10 bar.
        assert!((est.pressure_for_flow(2.0) - 10.0).abs() < 1e-4);
    }
}
