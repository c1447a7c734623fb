use super::{mean, zone_errors, zone_rates, AlgorithmTuning};
use crate::domain::{AlgorithmSnapshot, OperatingMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    PushHarder,
    BackOff,
    Hold,
}

/// `lag` is °C still to go toward the target (negative once past it),
/// `progress` is °C/min moved toward the target.
fn trigger(lag: f64, progress: f64, tuning: &AlgorithmTuning) -> Trigger {
    if lag > tuning.lag_max && progress < tuning.rate_flat {
        Trigger::PushHarder
    } else if -lag > tuning.overshoot_max || progress > tuning.rate_steep {
        Trigger::BackOff
    } else {
        Trigger::Hold
    }
}

pub(super) fn step(snapshot: &AlgorithmSnapshot, tuning: &AlgorithmTuning) -> (i32, Vec<f64>) {
    let current = snapshot.setpoint_current;
    // +1 when heating: warming is corrective; -1 when cooling
    let direction = match snapshot.mode {
        OperatingMode::Heat => 1.0,
        OperatingMode::Cool => -1.0,
        _ => return (current, vec![0.0; snapshot.zone_count()]),
    };

    let errors = zone_errors(snapshot);
    let rates = zone_rates(snapshot);

    let fleet = trigger(-direction * mean(&errors), direction * mean(&rates), tuning);
    let nudge = direction as i32;
    let setpoint = match fleet {
        Trigger::PushHarder => (current + nudge).clamp(snapshot.band.min, snapshot.band.max),
        Trigger::BackOff => (current - nudge).clamp(snapshot.band.min, snapshot.band.max),
        Trigger::Hold => current,
    };

    let airflow = errors
        .iter()
        .zip(&rates)
        .zip(&snapshot.zone_airflow)
        .map(|((&error, &rate), &airflow_current)| {
            match trigger(-direction * error, direction * rate, tuning) {
                Trigger::PushHarder => 1.0,
                Trigger::BackOff => (airflow_current * tuning.airflow_decay).max(tuning.airflow_min),
                Trigger::Hold => airflow_current,
            }
        })
        .collect();

    (setpoint, airflow)
}
