use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

// ============================================================================
// Identifiers
// ============================================================================

/// Hardware number of an AC unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u32);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hardware number of a zone (airflow group)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub u32);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Modes
// ============================================================================

/// Operating mode reported by a unit.
///
/// Only `Heat` and `Cool` drive an airflow response; every other mode
/// zeroes the per-zone airflow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase", try_from = "String")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OperatingMode {
    Auto,
    Cool,
    Dry,
    Fan,
    Heat,
}

impl TryFrom<String> for OperatingMode {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.trim().parse()
    }
}

impl OperatingMode {
    /// Whether the mode actively moves zone temperatures toward a target
    pub fn is_conditioning(&self) -> bool {
        matches!(self, OperatingMode::Heat | OperatingMode::Cool)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FanSpeed {
    #[default]
    Auto,
    Low,
    Medium,
    High,
}

// ============================================================================
// Read model
// ============================================================================

/// A controllable AC system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub mode: OperatingMode,
    pub fan_speed: FanSpeed,
    pub powered_on: bool,
    pub spill: bool,
    /// Return-air temperature measured at the unit (°C)
    pub temperature: Option<f64>,
    pub target_setpoint: i32,
    pub min_setpoint: i32,
    pub max_setpoint: i32,
}

/// Airflow group belonging to exactly one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub unit_id: UnitId,
    pub has_sensor: bool,
    pub powered_on: bool,
    /// Only present for sensored zones
    pub temperature: Option<f64>,
    /// Damper opening in [0, 1]
    pub airflow: f64,
    pub target_setpoint: Option<i32>,
}

impl Zone {
    /// Temperature of a zone that takes part in temperature-driven control
    pub fn sensed_temperature(&self) -> Option<f64> {
        if self.has_sensor {
            self.temperature
        } else {
            None
        }
    }
}

/// Full installation read-out handed to the persistence sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimateInfo {
    pub captured_at: DateTime<Utc>,
    pub units: Vec<Unit>,
    pub zones: Vec<Zone>,
}

impl ClimateInfo {
    pub fn unit(&self, unit_id: UnitId) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == unit_id)
    }

    pub fn zones_of(&self, unit_id: UnitId) -> impl Iterator<Item = &Zone> {
        self.zones.iter().filter(move |z| z.unit_id == unit_id)
    }
}
