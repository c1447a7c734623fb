//! # Postgres history
//!
//! Every info read-out is written as one row per unit and one row per zone,
//! keyed by capture time. Resampling happens in SQL: samples are grouped
//! into epoch-aligned buckets and averaged, so empty buckets never appear.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::domain::{
    ClimateInfo, HistoryEntity, HistoryMetric, HistorySample, PersistenceSink, SeriesKey, StoreError,
    TemperatureHistoryStore,
};

const CREATE_UNIT_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS climate_unit_samples (
        recorded_at     TIMESTAMPTZ NOT NULL,
        unit_id         INTEGER NOT NULL,
        mode            TEXT NOT NULL,
        fan_speed       TEXT NOT NULL,
        powered_on      BOOLEAN NOT NULL,
        spill           BOOLEAN NOT NULL,
        temperature     DOUBLE PRECISION,
        target_setpoint INTEGER NOT NULL,
        PRIMARY KEY (recorded_at, unit_id)
    )
"#;

const CREATE_ZONE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS climate_zone_samples (
        recorded_at     TIMESTAMPTZ NOT NULL,
        zone_id         INTEGER NOT NULL,
        unit_id         INTEGER NOT NULL,
        has_sensor      BOOLEAN NOT NULL,
        powered_on      BOOLEAN NOT NULL,
        temperature     DOUBLE PRECISION,
        airflow         DOUBLE PRECISION NOT NULL,
        target_setpoint INTEGER,
        PRIMARY KEY (recorded_at, zone_id)
    )
"#;

pub struct PgHistory {
    pool: PgPool,
}

impl PgHistory {
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Table and column holding a series; units have no airflow
    fn source(key: &SeriesKey) -> Option<(&'static str, &'static str, &'static str, i32)> {
        match key.entity {
            HistoryEntity::Unit(id) => {
                let column = match key.metric {
                    HistoryMetric::Temperature => "temperature",
                    HistoryMetric::Setpoint => "target_setpoint",
                    HistoryMetric::Airflow => return None,
                };
                Some(("climate_unit_samples", "unit_id", column, id.0 as i32))
            }
            HistoryEntity::Zone(id) => {
                let column = match key.metric {
                    HistoryMetric::Temperature => "temperature",
                    HistoryMetric::Setpoint => "target_setpoint",
                    HistoryMetric::Airflow => "airflow",
                };
                Some(("climate_zone_samples", "zone_id", column, id.0 as i32))
            }
        }
    }
}

fn query_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

#[async_trait]
impl PersistenceSink for PgHistory {
    async fn prepare(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_UNIT_TABLE)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        sqlx::query(CREATE_ZONE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn save(&self, info: &ClimateInfo) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        for unit in &info.units {
            sqlx::query(
                r#"
                INSERT INTO climate_unit_samples
                    (recorded_at, unit_id, mode, fan_speed, powered_on, spill, temperature, target_setpoint)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (recorded_at, unit_id) DO UPDATE SET
                    mode = EXCLUDED.mode,
                    fan_speed = EXCLUDED.fan_speed,
                    powered_on = EXCLUDED.powered_on,
                    spill = EXCLUDED.spill,
                    temperature = EXCLUDED.temperature,
                    target_setpoint = EXCLUDED.target_setpoint
                "#,
            )
            .bind(info.captured_at)
            .bind(unit.id.0 as i32)
            .bind(unit.mode.to_string())
            .bind(unit.fan_speed.to_string())
            .bind(unit.powered_on)
            .bind(unit.spill)
            .bind(unit.temperature)
            .bind(unit.target_setpoint)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        for zone in &info.zones {
            sqlx::query(
                r#"
                INSERT INTO climate_zone_samples
                    (recorded_at, zone_id, unit_id, has_sensor, powered_on, temperature, airflow, target_setpoint)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (recorded_at, zone_id) DO UPDATE SET
                    unit_id = EXCLUDED.unit_id,
                    has_sensor = EXCLUDED.has_sensor,
                    powered_on = EXCLUDED.powered_on,
                    temperature = EXCLUDED.temperature,
                    airflow = EXCLUDED.airflow,
                    target_setpoint = EXCLUDED.target_setpoint
                "#,
            )
            .bind(info.captured_at)
            .bind(zone.id.0 as i32)
            .bind(zone.unit_id.0 as i32)
            .bind(zone.has_sensor)
            .bind(zone.powered_on)
            .bind(zone.sensed_temperature())
            .bind(zone.airflow)
            .bind(zone.target_setpoint)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }
}

#[async_trait]
impl TemperatureHistoryStore for PgHistory {
    async fn resampled(
        &self,
        key: SeriesKey,
        lookback_minutes: u32,
        interval_minutes: u32,
    ) -> Result<Vec<HistorySample>, StoreError> {
        if interval_minutes == 0 {
            return Err(StoreError::Query("resample interval must be positive".into()));
        }
        let Some((table, id_column, column, id)) = Self::source(&key) else {
            return Ok(Vec::new());
        };

        // identifiers come from the fixed table above, never from input
        let sql = format!(
            r#"
            SELECT to_timestamp(floor(extract(epoch FROM recorded_at)::float8 / $2) * $2) AS bucket,
                   avg({column})::float8 AS value
            FROM {table}
            WHERE {id_column} = $1
              AND {column} IS NOT NULL
              AND recorded_at > now() - make_interval(mins => $3)
              AND recorded_at <= now()
            GROUP BY bucket
            ORDER BY bucket
            "#
        );

        let rows: Vec<(DateTime<Utc>, Option<f64>)> = sqlx::query_as(&sql)
            .bind(id)
            .bind(f64::from(interval_minutes) * 60.0)
            .bind(lookback_minutes as i32)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|(timestamp, value)| value.map(|value| HistorySample { timestamp, value }))
            .collect())
    }
}
