//! # Reactive setpoint / airflow algorithms
//!
//! Each version maps an [`AlgorithmSnapshot`] to an [`AlgorithmDecision`]:
//! the next integer setpoint for the unit and the next damper opening for
//! every sensored zone. Versions are pure: identical snapshot and tuning
//! always produce the identical decision.
//!
//! - **symmetric-hysteresis**: one-degree setpoint nudges gated on mean
//!   error and mean airflow, linear airflow ramp with fixed-step decay
//! - **lag-overshoot-band**: two-sided trigger on mean error and mean rate
//!   of temperature change, snap-open / multiplicative-decay airflow
//! - **sigmoid-airflow**: blended-airflow deadband with a soft ceiling at the
//!   live indoor temperature, continuous sigmoid airflow response
//!
//! The version is picked once from configuration; an unknown name is a
//! [`ConfigurationError::UnknownAlgorithmVersion`].

mod band;
mod hysteresis;
mod sigmoid;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info};
use validator::{Validate, ValidationError};

use crate::config::ConfigurationError;
use crate::domain::{AlgorithmDecision, AlgorithmSnapshot};

/// Tuning constants shared by all versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_thresholds"))]
pub struct AlgorithmTuning {
    /// Lowest airflow handed to a zone of a heating/cooling unit
    #[validate(range(min = 0.0, max = 1.0))]
    pub airflow_min: f64,
    /// Airflow per 0.1 °C of error (symmetric-hysteresis)
    #[validate(range(min = 0.0))]
    pub airflow_ramp_degree: f64,
    /// Mean error (°C) short of the target that counts as lagging
    #[validate(range(min = 0.0))]
    pub lag_max: f64,
    /// Mean error (°C) past the target that counts as overshooting
    #[validate(range(min = 0.0))]
    pub overshoot_max: f64,
    /// Corrective rate (°C/min) below which temperature is considered flat
    pub rate_flat: f64,
    /// Corrective rate (°C/min) above which the unit backs off
    #[validate(range(min = 0.0))]
    pub rate_steep: f64,
    /// Multiplicative airflow decay on overshoot
    #[validate(range(min = 0.0, max = 1.0))]
    pub airflow_decay: f64,
    /// Blended airflow above which the setpoint is pushed
    #[validate(range(min = 0.0, max = 1.0))]
    pub airflow_blend_high: f64,
    /// Blended airflow below which the setpoint relaxes
    #[validate(range(min = 0.0, max = 1.0))]
    pub airflow_blend_low: f64,
    /// Error (°C) at which the sigmoid response is ~98% open
    #[validate(range(exclusive_min = 0.0))]
    pub sigmoid_radius: f64,
    /// Exponent of the sigmoid response
    #[validate(range(exclusive_min = 0.0))]
    pub sigmoid_incline: f64,
}

impl Default for AlgorithmTuning {
    fn default() -> Self {
        Self {
            airflow_min: 0.1,
            airflow_ramp_degree: 0.1,
            lag_max: 0.5,
            overshoot_max: 0.5,
            rate_flat: 0.02,
            rate_steep: 0.1,
            // provisional constants, kept configurable
            airflow_decay: 0.7,
            airflow_blend_high: 0.6,
            airflow_blend_low: 0.4,
            sigmoid_radius: 1.5,
            sigmoid_incline: 2.0,
        }
    }
}

fn validate_thresholds(tuning: &AlgorithmTuning) -> Result<(), ValidationError> {
    if tuning.airflow_blend_low > tuning.airflow_blend_high {
        return Err(ValidationError::new("airflow_blend_low_above_high"));
    }
    if tuning.rate_flat > tuning.rate_steep {
        return Err(ValidationError::new("rate_flat_above_steep"));
    }
    Ok(())
}

/// Closed set of algorithm versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
pub enum ReactiveAlgorithm {
    #[strum(to_string = "symmetric-hysteresis", serialize = "v1_0")]
    SymmetricHysteresis,
    #[strum(to_string = "lag-overshoot-band", serialize = "v2_0")]
    LagOvershootBand,
    #[strum(to_string = "sigmoid-airflow", serialize = "v3_0")]
    SigmoidAirflow,
}

impl ReactiveAlgorithm {
    pub fn from_version(version: &str) -> Result<Self, ConfigurationError> {
        version
            .trim()
            .parse()
            .map_err(|_| ConfigurationError::UnknownAlgorithmVersion(version.to_string()))
    }

    pub fn step(&self, snapshot: &AlgorithmSnapshot, tuning: &AlgorithmTuning) -> AlgorithmDecision {
        let (setpoint, airflow) = match self {
            ReactiveAlgorithm::SymmetricHysteresis => hysteresis::step(snapshot, tuning),
            ReactiveAlgorithm::LagOvershootBand => band::step(snapshot, tuning),
            ReactiveAlgorithm::SigmoidAirflow => sigmoid::step(snapshot, tuning),
        };

        let decision = AlgorithmDecision::bounded(
            setpoint,
            airflow,
            &snapshot.band,
            snapshot.mode,
            tuning.airflow_min,
        );

        info!(
            unit_id = %snapshot.unit_id,
            algorithm = %self,
            mode = %snapshot.mode,
            setpoint_current = snapshot.setpoint_current,
            setpoint_next = decision.setpoint,
            airflow_next = ?decision.airflow,
            "generated command"
        );

        decision
    }
}

// ============================================================================
// Shared arithmetic
// ============================================================================

/// Arithmetic mean; 0 for an empty slice
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Per-zone `current - target`
pub(crate) fn zone_errors(snapshot: &AlgorithmSnapshot) -> Vec<f64> {
    let target = f64::from(snapshot.band.target);
    snapshot.zone_temperatures.iter().map(|t| t - target).collect()
}

/// Per-zone mean rate of change (°C/min) over the whole history.
///
/// A zone with fewer than two rows has rate 0. A missing or non-finite cell
/// contributes a zero delta for that step instead of failing the decision.
pub(crate) fn zone_rates(snapshot: &AlgorithmSnapshot) -> Vec<f64> {
    let history = &snapshot.zone_history;
    let interval = f64::from(snapshot.history_interval_minutes);

    (0..snapshot.zone_count())
        .map(|zone| {
            if history.len() < 2 || interval <= 0.0 {
                return 0.0;
            }
            let steps = history.len() - 1;
            let total: f64 = (1..history.len())
                .map(|t| match (cell(history, t, zone), cell(history, t - 1, zone)) {
                    (Some(now), Some(prev)) => (now - prev) / interval,
                    _ => {
                        debug!(
                            unit_id = %snapshot.unit_id,
                            zone_index = zone,
                            row = t,
                            "missing history cell, counting zero delta"
                        );
                        0.0
                    }
                })
                .sum();
            total / steps as f64
        })
        .collect()
}

fn cell(history: &[Vec<Option<f64>>], row: usize, zone: usize) -> Option<f64> {
    history
        .get(row)
        .and_then(|r| r.get(zone))
        .copied()
        .flatten()
        .filter(|v| v.is_finite())
}
