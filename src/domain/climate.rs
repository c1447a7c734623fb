use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use super::{AlgorithmSnapshot, ClimateInfo, StoreError, Unit, UnitId, Zone, ZoneId};

/// Climate-driver errors
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Communication error: {0}")]
    Communication(String),
    #[error("Unit {0} not found")]
    UnitNotFound(UnitId),
    #[error("Command rejected: {0}")]
    Rejected(String),
    #[error("History unavailable: {0}")]
    History(#[from] StoreError),
}

/// Capability the control loops consume to read and command the installation.
///
/// Every call may fail with a [`DriverError`]; callers isolate failures per
/// unit and never let one failing call stop the fleet.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClimateDriver: Send + Sync {
    /// Connect and prepare backing resources. Called by the setup task.
    async fn prepare(&self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Complete read-out of all units and zones
    async fn info(&self) -> Result<ClimateInfo, DriverError>;

    async fn unit_ids(&self) -> Result<Vec<UnitId>, DriverError>;

    /// Units whose power state is on
    async fn on_unit_ids(&self) -> Result<Vec<UnitId>, DriverError>;

    async fn unit(&self, unit_id: UnitId) -> Result<Unit, DriverError>;

    /// Zones of a unit; `require_sensor` drops zones without a temperature sensor
    async fn zones(&self, unit_id: UnitId, require_sensor: bool) -> Result<Vec<Zone>, DriverError>;

    /// Algorithm input for a unit. The band's target is the unit's current
    /// setpoint; the caller replaces it with the configured target.
    async fn snapshot(&self, unit_id: UnitId) -> Result<AlgorithmSnapshot, DriverError>;

    async fn set_target_setpoint(&self, unit_id: UnitId, setpoint: i32) -> Result<(), DriverError>;

    async fn set_zone_airflow(
        &self,
        unit_id: UnitId,
        airflow: &BTreeMap<ZoneId, f64>,
    ) -> Result<(), DriverError>;

    async fn set_power(&self, unit_id: UnitId, on: bool) -> Result<(), DriverError>;
}
