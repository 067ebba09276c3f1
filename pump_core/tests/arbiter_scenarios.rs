use pump_core::virtual_scale::pump_flow_ml_s;
use pump_core::{ControllerCfg, DutyPath, OperatingPoint, PressureController, TickOutput};
use pump_hardware::{PlantParams, SimPlant};
use rstest::rstest;

const DT: f32 = 0.05;

fn controller() -> PressureController {
    PressureController::new(ControllerCfg::default(), DT)
}

/// Close the loop around the simulated plant for `ticks` ticks.
fn run_closed_loop(
    c: &mut PressureController,
    plant: &mut SimPlant,
    op: &OperatingPoint,
    ticks: usize,
) -> Vec<TickOutput> {
    plant.set_valve(op.valve_open);
    (0..ticks)
        .map(|_| {
            let out = c.tick(plant.pressure(), op);
            plant.set_duty(out.duty_pct);
            plant.step(DT);
            out
        })
        .collect()
}

#[test]
fn cold_start_pressure_primes_at_full_power_without_integral() {
    let mut c = controller();
    let mut plant = SimPlant::new(PlantParams::default());
    let op = OperatingPoint::pressure(6.0, 0.0).with_valve(true);

    let mut primed_ticks = 0;
    for _ in 0..40 {
        let out = c.tick(plant.pressure(), &op);
        if out.pressure <= 1.0 {
            primed_ticks += 1;
            assert_eq!(c.iterm(), 0.0, "integral moved while priming at {} bar", out.pressure);
            assert_eq!(out.duty_pct, 100.0);
        }
        plant.set_duty(out.duty_pct);
        plant.step(DT);
    }
    assert!(primed_ticks >= 3, "priming phase too short: {primed_ticks}");

    let outs = run_closed_loop(&mut c, &mut plant, &op, 560);
    let last = outs.last().expect("ran");
    assert!((last.pressure - 6.0).abs() < 0.3, "settled at {}", last.pressure);
    assert!(outs.iter().all(|o| (0.0..=100.0).contains(&o.duty_pct)));
}

#[test]
fn flow_mode_hands_over_to_sliding_mode_without_a_jump() {
    let mut c = controller();
    let op = OperatingPoint::flow(2.0, 0.0).with_valve(true);

    let mut last = 0.0;
    for _ in 0..10 {
        let out = c.tick(0.2, &op);
        assert_eq!(out.path, DutyPath::OpenLoopFlow);
        // Prior 5e6: 2 ml/s means 10 bar, i.e. 2 ml/s of pump flow.
        let expected = 100.0 * 2.0 / pump_flow_ml_s(&c.config().pump, 100.0, out.pressure);
        assert!((out.duty_pct - expected).abs() < 1e-3);
        last = out.duty_pct;
    }

    c.seed_resistance(5e6, 0.95);
    let slew = c.config().arbiter.transfer_slew_pct;
    let mut saw_sliding = false;
    for _ in 0..10 {
        let out = c.tick(0.2, &op);
        saw_sliding |= out.path == DutyPath::SlidingMode;
        assert!(
            (out.duty_pct - last).abs() <= slew + 1e-3,
            "duty jumped {last} -> {}",
            out.duty_pct
        );
        last = out.duty_pct;
    }
    assert!(saw_sliding);
    assert_eq!(last, 100.0);
}

#[test]
fn closed_valve_reports_pump_flow_every_tick() {
    let mut c = controller();
    c.seed_resistance(4e6, 1.0);
    let mut plant = SimPlant::new(PlantParams::default());
    let op = OperatingPoint::pressure(9.0, 0.0);

    for out in run_closed_loop(&mut c, &mut plant, &op, 300) {
        let qi = pump_flow_ml_s(&c.config().pump, out.duty_pct, out.pressure).max(0.0);
        assert_eq!(out.flow_ml_s, qi);
    }
}

#[rstest]
#[case::pressure(OperatingPoint::pressure(8.0, 0.0).with_valve(true))]
#[case::pressure_limited(OperatingPoint::pressure(9.0, 1.5).with_valve(true))]
#[case::flow(OperatingPoint::flow(2.0, 9.0).with_valve(true))]
fn reset_reproduces_a_fresh_run(#[case] op: OperatingPoint) {
    let trace = |c: &mut PressureController| {
        let mut plant = SimPlant::new(PlantParams::default());
        run_closed_loop(c, &mut plant, &op, 300)
    };

    let mut fresh = controller();
    let expected = trace(&mut fresh);

    let mut reused = controller();
    reused.seed_resistance(2.5e6, 0.97);
    trace(&mut reused);
    reused.reset();
    reused.tare();
    let actual = trace(&mut reused);

    assert_eq!(expected, actual);
}

#[test]
fn tare_zeroes_volume_and_keeps_the_estimate() {
    let mut c = controller();
    // 30 % at 9 bar pushes 1.68 ml/s, consistent with 9/1.68 bar per ml/s.
    c.seed_resistance(9.0 / 1.68 * 1e6, 1.0);
    let op = OperatingPoint::power(30.0).with_valve(true);
    for _ in 0..100 {
        c.tick(9.0, &op);
    }
    assert!(c.volume_ml() > 0.0);

    let resistance = c.estimator().estimate();
    let score = c.estimator().convergence();
    c.tare();
    assert_eq!(c.volume_ml(), 0.0);
    assert_eq!(c.estimator().estimate(), resistance);
    assert_eq!(c.estimator().convergence(), score);
}

#[test]
fn volume_never_decreases_without_tare() {
    let mut c = controller();
    let mut plant = SimPlant::new(PlantParams::default());
    let op = OperatingPoint::flow(1.5, 0.0).with_valve(true);
    let outs = run_closed_loop(&mut c, &mut plant, &op, 400);
    assert!(outs.windows(2).all(|w| w[1].volume_ml >= w[0].volume_ml));
}

#[test]
fn sensor_fault_after_streak_forces_zero_duty() {
    let mut c = controller();
    let op = OperatingPoint::pressure(9.0, 0.0);
    c.tick(3.0, &op);
    let fault_ticks = c.config().sensor.fault_ticks;
    let mut outs = Vec::new();
    for _ in 0..fault_ticks {
        outs.push(c.tick(f32::NAN, &op));
    }
    assert!(outs[..fault_ticks as usize - 1].iter().all(|o| o.path != DutyPath::SensorFault));
    let last = outs.last().expect("ticks");
    assert_eq!(last.path, DutyPath::SensorFault);
    assert_eq!(last.duty_pct, 0.0);

    let recovered = c.tick(3.0, &op);
    assert_eq!(recovered.path, DutyPath::SlidingMode);
}
