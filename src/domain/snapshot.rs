use serde::{Deserialize, Serialize};

use super::{OperatingMode, UnitId, ZoneId};

/// Setpoint band a decision must respect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetBand {
    /// Hardware minimum setpoint
    pub min: i32,
    /// Hardware maximum setpoint
    pub max: i32,
    /// Desired room temperature
    pub target: i32,
}

impl TargetBand {
    pub fn clamp(&self, setpoint: i32) -> i32 {
        // max() before min() so an inverted band still yields a defined value
        setpoint.max(self.min).min(self.max)
    }
}

/// Immutable input bundle for one algorithm step.
///
/// `zone_ids`, `zone_temperatures` and `zone_airflow` are parallel vectors and
/// every row of `zone_history` has (at most) one cell per zone, time-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmSnapshot {
    pub unit_id: UnitId,
    pub mode: OperatingMode,
    pub band: TargetBand,
    pub setpoint_current: i32,
    pub unit_temperature: Option<f64>,
    pub unit_history: Vec<f64>,
    pub zone_ids: Vec<ZoneId>,
    pub zone_temperatures: Vec<f64>,
    pub zone_history: Vec<Vec<Option<f64>>>,
    /// Minutes between two history rows
    pub history_interval_minutes: u32,
    pub zone_airflow: Vec<f64>,
}

impl AlgorithmSnapshot {
    /// Replace the target temperature, keeping the hardware bounds
    pub fn with_target(mut self, target: i32) -> Self {
        self.band.target = target;
        self
    }

    pub fn zone_count(&self) -> usize {
        self.zone_temperatures.len()
    }

    /// Whether the parallel zone vectors line up
    pub fn is_consistent(&self) -> bool {
        let n = self.zone_temperatures.len();
        self.zone_ids.len() == n
            && self.zone_airflow.len() == n
            && self.zone_history.iter().all(|row| row.len() <= n)
    }
}

/// Output of one algorithm step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmDecision {
    pub setpoint: i32,
    /// One fraction per snapshot zone, same order as `zone_ids`
    pub airflow: Vec<f64>,
}

impl AlgorithmDecision {
    /// Clamp the setpoint into the band and each airflow into `[airflow_min, 1.0]`,
    /// rounded to two decimals. Non-conditioning modes keep airflow at exactly 0.
    pub fn bounded(
        setpoint: i32,
        airflow: Vec<f64>,
        band: &TargetBand,
        mode: OperatingMode,
        airflow_min: f64,
    ) -> Self {
        let airflow = airflow
            .into_iter()
            .map(|a| {
                if !mode.is_conditioning() {
                    return 0.0;
                }
                let a = if a.is_finite() { a } else { airflow_min };
                round2(a.max(airflow_min).min(1.0))
            })
            .collect();
        Self {
            setpoint: band.clamp(setpoint),
            airflow,
        }
    }

    /// Pair airflow fractions with the zone ids they were computed for
    pub fn airflow_by_zone(&self, zone_ids: &[ZoneId]) -> std::collections::BTreeMap<ZoneId, f64> {
        zone_ids
            .iter()
            .copied()
            .zip(self.airflow.iter().copied())
            .collect()
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
