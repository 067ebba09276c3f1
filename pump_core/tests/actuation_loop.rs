use crossbeam_channel as xch;
use pump_core::mocks::{ConstantSensor, NoopSensor, RecordingActuator};
use pump_core::{DutyPath, LoopCfg, Pump, PumpError};
use pump_hardware::{PlantParams, SharedPlant, SimActuator, SimPlant};
use pump_traits::{HwResult, ManualClock, PressureSensor};
use rstest::rstest;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Poll `cond` in real time; the loop itself runs on a manual clock.
fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn pump_with(sensor: impl PressureSensor + Send + 'static, actuator: RecordingActuator) -> Pump {
    Pump::builder()
        .with_sensor(sensor)
        .with_actuator(actuator)
        .with_clock(Box::new(ManualClock::new()))
        .build()
        .expect("build pump")
}

#[test]
fn power_command_reaches_the_actuator_and_drop_stops_the_pump() {
    let actuator = RecordingActuator::new(50);
    let pump = pump_with(ConstantSensor::new(0.0), actuator.clone());

    pump.set_power(40.0).unwrap();
    wait_for("power write", || actuator.last() == Some(40.0));
    let snap = pump.telemetry();
    assert_eq!(snap.path, DutyPath::Power);
    assert!(snap.ticks > 0);

    drop(pump);
    assert_eq!(actuator.last(), Some(0.0));
}

#[test]
fn faulted_sensor_keeps_closed_loop_duty_at_zero() {
    let actuator = RecordingActuator::new(50);
    let pump = pump_with(NoopSensor, actuator.clone());
    pump.set_pressure_target(9.0, 0.0).unwrap();
    let start = pump.ticks();

    wait_for("ticks", || pump.ticks() > start + 20);
    assert!(actuator.writes().iter().all(|w| *w == 0.0));
    let snap = pump.telemetry();
    assert!(!snap.sensor_ok);
    assert_eq!(snap.path, DutyPath::SensorFault);
}

#[test]
fn actuator_failures_do_not_stop_the_loop() {
    let actuator = RecordingActuator::new(50).failing();
    let pump = pump_with(ConstantSensor::new(2.0), actuator.clone());
    pump.set_power(25.0).unwrap();
    let start = pump.ticks();

    wait_for("ticks despite failures", || pump.ticks() > start + 10);
    let snap = pump.telemetry();
    assert!(snap.actuator_failures >= 10);
    assert_eq!(snap.duty_pct, 25.0);
}

#[rstest]
#[case::plain_50hz(RecordingActuator::new(50), 50)]
#[case::plain_60hz(RecordingActuator::new(60), 60)]
#[case::hardware_divider(RecordingActuator::new(100).with_divider(), 50)]
#[case::software_divider(RecordingActuator::new(120), 60)]
fn mains_rate_is_corrected(#[case] actuator: RecordingActuator, #[case] expected: u32) {
    let pump = pump_with(ConstantSensor::new(0.0), actuator);
    assert_eq!(pump.half_cycles_per_second(), expected);
    assert_eq!(pump.telemetry().half_cycles_per_second, expected);
}

#[test]
fn no_mains_reports_zero() {
    let pump = pump_with(ConstantSensor::new(0.0), RecordingActuator::new(0));
    assert_eq!(pump.half_cycles_per_second(), 0);
}

#[test]
fn tare_zeroes_published_volume() {
    let actuator = RecordingActuator::new(50);
    let pump = Pump::builder()
        .with_sensor(ConstantSensor::new(9.0))
        .with_actuator(actuator)
        .with_clock(Box::new(ManualClock::new()))
        .with_resistance_seed(9.0 / 1.68 * 1e6, 1.0)
        .build()
        .unwrap();
    pump.set_valve_state(true).unwrap();
    pump.set_power(30.0).unwrap();
    wait_for("volume", || pump.volume_ml() > 1.0);

    pump.set_power(0.0).unwrap();
    pump.set_valve_state(false).unwrap();
    pump.tare().unwrap();
    let ticks = pump.ticks();
    wait_for("tick after tare", || pump.ticks() > ticks + 2);
    assert_eq!(pump.volume_ml(), 0.0);
}

/// Reads block once while armed, until released.
struct HoldSensor {
    armed: Arc<AtomicBool>,
    release: xch::Receiver<()>,
}

impl PressureSensor for HoldSensor {
    fn read_pressure(&mut self) -> HwResult<f32> {
        if self.armed.swap(false, Ordering::AcqRel) {
            let _ = self.release.recv_timeout(Duration::from_secs(5));
        }
        Ok(0.0)
    }
}

#[test]
fn second_calibration_is_rejected_while_one_runs() {
    let armed = Arc::new(AtomicBool::new(false));
    let (release_tx, release_rx) = xch::bounded(1);
    let pump = Arc::new(pump_with(
        HoldSensor {
            armed: armed.clone(),
            release: release_rx,
        },
        RecordingActuator::new(50),
    ));

    armed.store(true, Ordering::Release);
    let first = {
        let pump = pump.clone();
        std::thread::spawn(move || pump.calibrate(50))
    };
    wait_for("calibration start", || pump.is_calibrating());

    let err = pump.calibrate(50).unwrap_err();
    assert!(matches!(err.downcast_ref::<PumpError>(), Some(PumpError::Busy(_))));

    release_tx.send(()).unwrap();
    // A flat sensor never rises, so the ramp itself fails.
    let result = first.join().expect("calibration thread");
    assert!(matches!(
        result.unwrap_err().downcast_ref::<PumpError>(),
        Some(PumpError::Calibration(_))
    ));
    assert!(!pump.is_calibrating());
}

/// Advances the plant by one calibration step per read.
struct SteppingSensor(SharedPlant);

impl PressureSensor for SteppingSensor {
    fn read_pressure(&mut self) -> HwResult<f32> {
        let mut plant = self.0.lock().map_err(|_| "plant poisoned")?;
        plant.step(0.1);
        Ok(plant.pressure())
    }
}

#[test]
fn calibration_learns_a_table_up_to_the_relief_valve() {
    let plant = SimPlant::new(PlantParams::default()).shared();
    let pump = Pump::builder()
        .with_sensor(SteppingSensor(plant.clone()))
        .with_actuator(SimActuator::new(plant.clone(), 100))
        .with_clock(Box::new(ManualClock::new()))
        .with_loop(LoopCfg::default())
        .build()
        .unwrap();

    let table = pump.calibrate(600).expect("calibration");
    assert_eq!(table.half_cycles_per_second, 50);
    assert!(table.len() >= 10, "levels: {}", table.len());
    assert!(table.gains.iter().all(|g| *g > 0.0));
    assert!(table.opv_pressure > 11.0 && table.opv_pressure < 11.5);
    assert_eq!(plant.lock().unwrap().duty(), 0.0);
}
