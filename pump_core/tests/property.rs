use proptest::prelude::*;
use pump_core::config::{RlsCfg, SetpointFilterCfg, SlidingModeCfg};
use pump_core::estimator::ResistanceEstimator;
use pump_core::setpoint::SetpointFilter;
use pump_core::sliding_mode::{SlidingInput, SlidingModeController};
use pump_core::{ControllerCfg, OperatingPoint, PressureController};

fn raw_sample() -> impl Strategy<Value = f32> {
    prop_oneof![
        8 => -2.0f32..25.0,
        1 => Just(f32::NAN),
        1 => Just(f32::INFINITY),
    ]
}

fn operating_point() -> impl Strategy<Value = OperatingPoint> {
    prop_oneof![
        (-10.0f32..150.0).prop_map(OperatingPoint::power),
        (0.0f32..15.0, 0.0f32..6.0, any::<bool>())
            .prop_map(|(t, l, v)| OperatingPoint::pressure(t, l).with_valve(v)),
        (0.0f32..6.0, 0.0f32..12.0, any::<bool>())
            .prop_map(|(t, l, v)| OperatingPoint::flow(t, l).with_valve(v)),
    ]
}

proptest! {
    #[test]
    fn duty_and_score_stay_in_range(
        samples in prop::collection::vec(raw_sample(), 1..300),
        ops in prop::collection::vec(operating_point(), 1..6),
        seed in prop::option::of((1e5f32..2e7, 0.0f32..1.0)),
    ) {
        let mut c = PressureController::new(ControllerCfg::default(), 0.05);
        if let Some((r, s)) = seed {
            c.seed_resistance(r, s);
        }
        let chunk = samples.len().div_ceil(ops.len());
        for (i, raw) in samples.iter().enumerate() {
            let op = &ops[(i / chunk).min(ops.len() - 1)];
            let out = c.tick(*raw, op);
            prop_assert!((0.0..=100.0).contains(&out.duty_pct), "duty {}", out.duty_pct);
            prop_assert!((0.0..=1.0).contains(&out.convergence));
            prop_assert!(out.flow_ml_s.is_finite() && out.flow_ml_s >= 0.0);
            prop_assert!(out.volume_ml.is_finite());
        }
    }

    #[test]
    fn integral_never_exceeds_limit_after_reversal(
        limit in 0.05f32..2.0,
        low in 1.5f32..5.0,
        wind_ticks in 10usize..400,
    ) {
        let cfg = SlidingModeCfg { integral_limit: limit, ..SlidingModeCfg::default() };
        let mut c = SlidingModeController::new(cfg, 0.05);
        c.reset(low);
        let input = |pressure| SlidingInput { pressure, setpoint: 9.0, setpoint_rate: 0.0, pmax: 15.0 };
        for _ in 0..wind_ticks {
            let out = c.update(input(low));
            prop_assert!(out.iterm.abs() <= limit + 1e-5);
        }
        for _ in 0..wind_ticks {
            let out = c.update(input(12.0));
            prop_assert!(out.iterm.abs() <= limit + 1e-5);
        }
    }

    #[test]
    fn damped_setpoint_settles_without_overshoot(
        target in 0.5f32..12.0,
        damping in 1.0f32..2.5,
        freq in 0.2f32..2.0,
    ) {
        let mut f = SetpointFilter::new(SetpointFilterCfg { freq_hz: freq, damping }, 0.01);
        f.snap(0.0);
        let mut r = 0.0;
        for _ in 0..6000 {
            (r, _) = f.step(target);
            prop_assert!(r <= target * 1.001 + 1e-4, "overshoot {} > {}", r, target);
        }
        prop_assert!((r - target).abs() < target * 0.01);
    }

    #[test]
    fn score_rises_on_consistent_pairs(
        resistance in 1e6f32..1e7,
        flows in prop::collection::vec(0.5f32..3.0, 20..120),
    ) {
        let mut est = ResistanceEstimator::new(RlsCfg::default());
        let mut previous = est.convergence();
        let mut settled = false;
        for q in flows {
            let p = resistance * 1e-6 * q;
            let step = est.update(q, p);
            prop_assert!((0.0..=1.0).contains(&est.convergence()));
            if step.updated && (est.estimate() - resistance).abs() / resistance < 1e-3 {
                settled = true;
            }
            if settled {
                prop_assert!(est.convergence() >= previous - 1e-6);
            }
            previous = est.convergence();
        }
    }
}
