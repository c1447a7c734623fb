use super::{mean, zone_errors, AlgorithmTuning};
use crate::domain::{AlgorithmSnapshot, OperatingMode};

/// `1 - exp(-(x / (radius / 2))^incline)` for `x >= 0`
pub(crate) fn sigmoid(x: f64, radius: f64, incline: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    1.0 - (-(x / (radius / 2.0)).powf(incline)).exp()
}

/// Average of mean and max airflow; 0 without zones
fn blended_airflow(airflow: &[f64]) -> f64 {
    let max = airflow.iter().copied().fold(None, |acc: Option<f64>, a| {
        Some(acc.map_or(a, |m| m.max(a)))
    });
    match max {
        Some(max) => (mean(airflow) + max) / 2.0,
        None => 0.0,
    }
}

pub(super) fn step(snapshot: &AlgorithmSnapshot, tuning: &AlgorithmTuning) -> (i32, Vec<f64>) {
    let target = snapshot.band.target;
    let current = snapshot.setpoint_current;
    let mean_error = mean(&zone_errors(snapshot));
    let blend = blended_airflow(&snapshot.zone_airflow);
    let indoor = snapshot
        .unit_temperature
        .filter(|t| t.is_finite())
        .map(|t| t.round() as i32);

    let setpoint = match snapshot.mode {
        OperatingMode::Heat => {
            let next = if mean_error < 0.0 && blend > tuning.airflow_blend_high {
                current + 1
            } else if mean_error >= 0.0 || blend < tuning.airflow_blend_low {
                (current - 1).max(target)
            } else {
                current
            };
            // never more than one degree above the live indoor temperature
            indoor.map_or(next, |t| next.min(t + 1))
        }
        OperatingMode::Cool => {
            let next = if mean_error > 0.0 && blend > tuning.airflow_blend_high {
                current - 1
            } else if mean_error <= 0.0 || blend < tuning.airflow_blend_low {
                (current + 1).min(target)
            } else {
                current
            };
            indoor.map_or(next, |t| next.max(t - 1))
        }
        _ => current,
    };

    let target = f64::from(target);
    let airflow = snapshot
        .zone_temperatures
        .iter()
        .map(|&temperature| {
            let corrective_error = match snapshot.mode {
                OperatingMode::Heat => target - temperature,
                OperatingMode::Cool => temperature - target,
                _ => return 0.0,
            };
            let response = sigmoid(
                corrective_error.max(0.0),
                tuning.sigmoid_radius,
                tuning.sigmoid_incline,
            );
            (response + tuning.airflow_min).min(1.0).max(tuning.airflow_min)
        })
        .collect();

    (setpoint, airflow)
}
