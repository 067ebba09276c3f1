use pump_hardware::{PlantParams, SimActuator, SimPlant, SimPressureSensor};
use pump_traits::{PhaseCutActuator, PressureSensor};
use rstest::rstest;

fn settle(plant: &mut SimPlant, secs: f32) {
    plant.step(secs);
}

#[rstest]
#[case(25.0)]
#[case(50.0)]
#[case(100.0)]
fn steady_state_balances_pump_and_puck(#[case] duty: f32) {
    let params = PlantParams {
        opv_bar: 50.0,
        ..PlantParams::default()
    };
    let mut plant = SimPlant::new(params);
    plant.set_valve(true);
    plant.set_duty(duty);
    settle(&mut plant, 60.0);

    let p = plant.pressure();
    let pump = duty / 100.0 * params.q0_ml_s * (1.0 - p / params.pmax_bar);
    let puck = plant.puck_flow_ml_s();
    assert!((pump - puck).abs() < 0.05, "pump {pump} puck {puck} at {p} bar");
}

#[rstest]
#[case(2e6)]
#[case(8e6)]
fn higher_resistance_means_higher_pressure(#[case] resistance: f32) {
    let mut low = SimPlant::new(PlantParams {
        puck_resistance: resistance,
        opv_bar: 50.0,
        ..PlantParams::default()
    });
    let mut high = SimPlant::new(PlantParams {
        puck_resistance: resistance * 2.0,
        opv_bar: 50.0,
        ..PlantParams::default()
    });
    for plant in [&mut low, &mut high] {
        plant.set_valve(true);
        plant.set_duty(60.0);
        settle(plant, 60.0);
    }
    assert!(high.pressure() > low.pressure());
}

#[test]
fn actuator_and_sensor_share_the_plant() {
    let plant = SimPlant::new(PlantParams::default()).shared();
    let mut actuator = SimActuator::new(plant.clone(), 100);
    let mut sensor = SimPressureSensor::new(plant.clone());

    actuator.set_power(100.0).unwrap();
    plant.lock().unwrap().step(1.0);
    let p = sensor.read_pressure().unwrap();
    assert!(p > 2.0, "p = {p}");

    actuator.set_power(f32::NAN).unwrap();
    assert_eq!(plant.lock().unwrap().duty(), 0.0);
}
