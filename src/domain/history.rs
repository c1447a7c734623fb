use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::{ClimateInfo, UnitId, ZoneId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("History store unavailable: {0}")]
    Unavailable(String),
    #[error("History query failed: {0}")]
    Query(String),
}

/// Entity a series belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HistoryEntity {
    Unit(UnitId),
    Zone(ZoneId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HistoryMetric {
    Temperature,
    Setpoint,
    Airflow,
}

/// One metric of one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub entity: HistoryEntity,
    pub metric: HistoryMetric,
}

impl SeriesKey {
    pub fn unit_temperature(unit_id: UnitId) -> Self {
        Self { entity: HistoryEntity::Unit(unit_id), metric: HistoryMetric::Temperature }
    }

    pub fn zone_temperature(zone_id: ZoneId) -> Self {
        Self { entity: HistoryEntity::Zone(zone_id), metric: HistoryMetric::Temperature }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity {
            HistoryEntity::Unit(id) => write!(f, "unit/{}/{:?}", id, self.metric),
            HistoryEntity::Zone(id) => write!(f, "zone/{}/{:?}", id, self.metric),
        }
    }
}

/// Resampled point: start of the bucket and the mean value inside it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Source of resampled time series.
///
/// Samples come back chronologically; empty buckets are dropped, never
/// interpolated. An empty result is a valid cold-start answer.
#[async_trait]
pub trait TemperatureHistoryStore: Send + Sync {
    async fn resampled(
        &self,
        key: SeriesKey,
        lookback_minutes: u32,
        interval_minutes: u32,
    ) -> Result<Vec<HistorySample>, StoreError>;
}

/// Where the info loop hands each installation read-out
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn prepare(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save(&self, info: &ClimateInfo) -> Result<(), StoreError>;
}
