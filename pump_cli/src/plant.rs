//! Simulated group head assembled from `[pump]` and `[simulation]`.

use pump_config::Config;
use pump_hardware::{PlantParams, SharedPlant, SimActuator, SimPlant, SimPressureSensor};
use pump_traits::clock::Clock;
use std::sync::{Arc, PoisonError};

const NOISE_SEED: u32 = 0x5EED_1234;

pub fn plant_params(cfg: &Config) -> PlantParams {
    PlantParams {
        q0_ml_s: cfg.pump.q0_ml_s,
        pmax_bar: cfg.pump.pmax_bar,
        compliance_ml_per_bar: cfg.simulation.compliance_ml_per_bar,
        puck_resistance: cfg.simulation.puck_resistance,
        puck_exponent: cfg.pump.puck_exponent,
        opv_bar: cfg.simulation.opv_bar,
        opv_flow_per_bar: cfg.simulation.opv_flow_per_bar,
    }
}

/// Build the plant, sensor and actuator. With a clock the plant advances in
/// wall-clock time; without one the caller steps it.
pub fn assemble(
    cfg: &Config,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
) -> (SharedPlant, SimPressureSensor, SimActuator) {
    let mut plant = SimPlant::new(plant_params(cfg));
    if let Some(clock) = clock {
        plant = plant.with_clock(clock);
    }
    let plant = plant.shared();

    let mut sensor = SimPressureSensor::new(plant.clone());
    if cfg.simulation.noise_bar > 0.0 {
        sensor = sensor.with_noise(cfg.simulation.noise_bar, NOISE_SEED);
    }
    let mut actuator =
        SimActuator::new(plant.clone(), cfg.simulation.detected_half_cycles_per_second);
    if cfg.simulation.divider_supported {
        actuator = actuator.with_divider();
    }
    (plant, sensor, actuator)
}

/// Integrate the plant by `dt` seconds.
pub fn advance(plant: &SharedPlant, dt: f32) {
    plant.lock().unwrap_or_else(PoisonError::into_inner).step(dt);
}

pub fn set_valve(plant: &SharedPlant, open: bool) {
    plant
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .set_valve(open);
}

/// Volume that truly went through the simulated puck, ml.
pub fn extracted_ml(plant: &SharedPlant) -> f32 {
    plant
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .extracted_ml()
}
