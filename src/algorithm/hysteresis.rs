use super::{mean, zone_errors, AlgorithmTuning};
use crate::domain::{AlgorithmSnapshot, OperatingMode};

/// Mean airflow above which the zones are considered saturated
const SATURATED_AIRFLOW: f64 = 0.5;
/// Airflow removed per step once a zone is satisfied
const DECAY_STEP: f64 = 0.2;

pub(super) fn step(snapshot: &AlgorithmSnapshot, tuning: &AlgorithmTuning) -> (i32, Vec<f64>) {
    let target = snapshot.band.target;
    let current = snapshot.setpoint_current;
    let mean_error = mean(&zone_errors(snapshot));
    let mean_airflow = mean(&snapshot.zone_airflow);

    let setpoint = match snapshot.mode {
        OperatingMode::Heat => {
            if mean_error < 0.0 && mean_airflow > SATURATED_AIRFLOW {
                (current + 1).min(snapshot.band.max)
            } else {
                (current - 1).max(target)
            }
        }
        OperatingMode::Cool => {
            if mean_error > 0.0 && mean_airflow > SATURATED_AIRFLOW {
                (current - 1).max(snapshot.band.min)
            } else {
                (current + 1).min(target)
            }
        }
        _ => current,
    };

    let target = f64::from(target);
    let airflow = snapshot
        .zone_temperatures
        .iter()
        .zip(&snapshot.zone_airflow)
        .map(|(&temperature, &airflow_current)| {
            let ramp = ((target - temperature).abs() * tuning.airflow_ramp_degree * 10.0)
                .max(tuning.airflow_min)
                .min(1.0);
            let decayed = (airflow_current - DECAY_STEP).max(tuning.airflow_min);
            match snapshot.mode {
                OperatingMode::Heat if temperature > target => decayed,
                OperatingMode::Cool if temperature < target => decayed,
                OperatingMode::Heat | OperatingMode::Cool => ramp,
                _ => 0.0,
            }
        })
        .collect();

    (setpoint, airflow)
}
