//! Common numeric helpers for pump_core.

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Smallest denominator the pump-curve formulas may divide by.
pub const MIN_DENOMINATOR: f32 = 1e-3;

/// Sign of `x` as -1, 0 or 1.
#[inline]
pub fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Keep `x` at least `MIN_DENOMINATOR` away from zero, preserving sign.
/// NaN maps to `MIN_DENOMINATOR`.
#[inline]
pub fn guard_denominator(x: f32) -> f32 {
    if x.is_nan() {
        MIN_DENOMINATOR
    } else if x.abs() < MIN_DENOMINATOR {
        if x < 0.0 { -MIN_DENOMINATOR } else { MIN_DENOMINATOR }
    } else {
        x
    }
}

/// Fraction of no-load flow the pump still delivers at `pressure`,
/// `1 − P/Pmax`, kept strictly positive.
#[inline]
pub fn pump_headroom(pressure_bar: f32, pmax_bar: f32) -> f32 {
    (1.0 - pressure_bar / guard_denominator(pmax_bar)).max(MIN_DENOMINATOR)
}

/// Clamp a duty percentage into `[0, 100]`; NaN becomes 0.
#[inline]
pub fn clamp_duty(pct: f32) -> f32 {
    if pct.is_nan() { 0.0 } else { pct.clamp(0.0, 100.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_matches_convention() {
        assert_eq!(sign(2.5), 1.0);
        assert_eq!(sign(-0.1), -1.0);
        assert_eq!(sign(0.0), 0.0);
    }

    #[test]
    fn denominators_stay_away_from_zero() {
        assert_eq!(guard_denominator(0.0), MIN_DENOMINATOR);
        assert_eq!(guard_denominator(-1e-9), -MIN_DENOMINATOR);
        assert_eq!(guard_denominator(f32::NAN), MIN_DENOMINATOR);
        assert_eq!(guard_denominator(3.0), 3.0);
    }

    #[test]
    fn headroom_is_positive_at_and_above_stall() {
        assert!((pump_headroom(0.0, 15.0) - 1.0).abs() < 1e-6);
        assert_eq!(pump_headroom(15.0, 15.0), MIN_DENOMINATOR);
        assert_eq!(pump_headroom(30.0, 15.0), MIN_DENOMINATOR);
    }

    #[test]
    fn duty_clamp_handles_nan_and_range() {
        assert_eq!(clamp_duty(f32::NAN), 0.0);
        assert_eq!(clamp_duty(-4.0), 0.0);
        assert_eq!(clamp_duty(140.0), 100.0);
        assert_eq!(clamp_duty(42.0), 42.0);
    }
}
