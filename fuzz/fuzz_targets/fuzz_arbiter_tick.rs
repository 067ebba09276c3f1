#![no_main]
use libfuzzer_sys::arbitrary::{self, Arbitrary};
use libfuzzer_sys::fuzz_target;
use pump_core::{ControllerCfg, OperatingPoint, PressureController};

#[derive(Debug, Arbitrary)]
enum Step {
    Sample(f32),
    Power(f32),
    Pressure(f32, f32),
    Flow(f32, f32),
    Valve(bool),
    Seed(f32, f32),
    Tare,
    Reset,
}

fuzz_target!(|steps: Vec<Step>| {
    let mut c = PressureController::new(ControllerCfg::default(), 0.05);
    let mut op = OperatingPoint::default();
    for step in steps {
        match step {
            Step::Sample(raw) => {
                let out = c.tick(raw, &op);
                assert!((0.0..=100.0).contains(&out.duty_pct), "duty {}", out.duty_pct);
                assert!((0.0..=1.0).contains(&out.convergence));
            }
            Step::Power(p) => op = op.with_power(p),
            Step::Pressure(t, l) => op = op.with_pressure(t, l),
            Step::Flow(t, l) => op = op.with_flow(t, l),
            Step::Valve(open) => op = op.with_valve(open),
            Step::Seed(r, s) => c.seed_resistance(r, s),
            Step::Tare => c.tare(),
            Step::Reset => c.reset(),
        }
    }
});
