use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::domain::{
    AlgorithmSnapshot, DriverError, HistorySample, SeriesKey, TargetBand, TemperatureHistoryStore, Unit, Zone,
};

/// Builds [`AlgorithmSnapshot`]s from live readings plus resampled history
#[derive(Clone)]
pub struct SnapshotAssembler {
    history: Arc<dyn TemperatureHistoryStore>,
    lookback_minutes: u32,
    interval_minutes: u32,
}

impl SnapshotAssembler {
    pub fn new(history: Arc<dyn TemperatureHistoryStore>, lookback_minutes: u32, interval_minutes: u32) -> Self {
        Self {
            history,
            lookback_minutes,
            interval_minutes,
        }
    }

    /// Only zones with a sensor and a current reading take part. The band
    /// target is the unit's current setpoint until the caller replaces it.
    pub async fn assemble(&self, unit: &Unit, zones: &[Zone]) -> Result<AlgorithmSnapshot, DriverError> {
        let sensored: Vec<(&Zone, f64)> = zones
            .iter()
            .filter(|z| z.unit_id == unit.id)
            .filter_map(|z| z.sensed_temperature().map(|t| (z, t)))
            .collect();

        let unit_history = self
            .resampled(SeriesKey::unit_temperature(unit.id))
            .await?
            .into_iter()
            .map(|s| s.value)
            .collect();

        let mut zone_series = Vec::with_capacity(sensored.len());
        for (zone, _) in &sensored {
            zone_series.push(self.resampled(SeriesKey::zone_temperature(zone.id)).await?);
        }

        Ok(AlgorithmSnapshot {
            unit_id: unit.id,
            mode: unit.mode,
            band: TargetBand {
                min: unit.min_setpoint,
                max: unit.max_setpoint,
                target: unit.target_setpoint,
            },
            setpoint_current: unit.target_setpoint,
            unit_temperature: unit.temperature,
            unit_history,
            zone_ids: sensored.iter().map(|(z, _)| z.id).collect(),
            zone_temperatures: sensored.iter().map(|(_, t)| *t).collect(),
            zone_history: align_rows(&zone_series),
            history_interval_minutes: self.interval_minutes,
            zone_airflow: sensored.iter().map(|(z, _)| z.airflow).collect(),
        })
    }

    async fn resampled(&self, key: SeriesKey) -> Result<Vec<HistorySample>, DriverError> {
        Ok(self
            .history
            .resampled(key, self.lookback_minutes, self.interval_minutes)
            .await?)
    }
}

/// Time-major matrix over the union of timestamps: one row per bucket, one
/// cell per series, `None` where a series has no value in that bucket.
pub fn align_rows(series: &[Vec<HistorySample>]) -> Vec<Vec<Option<f64>>> {
    let timestamps: BTreeSet<DateTime<Utc>> = series.iter().flatten().map(|s| s.timestamp).collect();
    let lookups: Vec<HashMap<DateTime<Utc>, f64>> = series
        .iter()
        .map(|samples| samples.iter().map(|s| (s.timestamp, s.value)).collect())
        .collect();

    timestamps
        .iter()
        .map(|ts| lookups.iter().map(|values| values.get(ts).copied()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FanSpeed, OperatingMode, StoreError, UnitId, ZoneId};
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 8, minute, 0).unwrap()
    }

    fn sample(minute: u32, value: f64) -> HistorySample {
        HistorySample { timestamp: at(minute), value }
    }

    struct FixedHistory(HashMap<SeriesKey, Vec<HistorySample>>);

    #[async_trait]
    impl TemperatureHistoryStore for FixedHistory {
        async fn resampled(&self, key: SeriesKey, _: u32, _: u32) -> Result<Vec<HistorySample>, StoreError> {
            Ok(self.0.get(&key).cloned().unwrap_or_default())
        }
    }

    struct BrokenHistory;

    #[async_trait]
    impl TemperatureHistoryStore for BrokenHistory {
        async fn resampled(&self, _: SeriesKey, _: u32, _: u32) -> Result<Vec<HistorySample>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    fn unit() -> Unit {
        Unit {
            id: UnitId(1),
            mode: OperatingMode::Heat,
            fan_speed: FanSpeed::Auto,
            powered_on: true,
            spill: false,
            temperature: Some(20.5),
            target_setpoint: 23,
            min_setpoint: 16,
            max_setpoint: 30,
        }
    }

    fn zone(id: u32, has_sensor: bool, temperature: Option<f64>, airflow: f64) -> Zone {
        Zone {
            id: ZoneId(id),
            unit_id: UnitId(1),
            has_sensor,
            powered_on: true,
            temperature,
            airflow,
            target_setpoint: None,
        }
    }

    #[test]
    fn test_align_rows_keeps_union_and_marks_gaps() {
        let rows = align_rows(&[
            vec![sample(0, 20.0), sample(5, 20.5), sample(10, 21.0)],
            vec![sample(5, 19.0), sample(15, 19.5)],
        ]);
        assert_eq!(
            rows,
            vec![
                vec![Some(20.0), None],
                vec![Some(20.5), Some(19.0)],
                vec![Some(21.0), None],
                vec![None, Some(19.5)],
            ]
        );
    }

    #[test]
    fn test_align_rows_empty() {
        assert!(align_rows(&[]).is_empty());
        assert!(align_rows(&[vec![], vec![]]).is_empty());
    }

    #[tokio::test]
    async fn test_assemble_uses_sensored_zones_only() {
        let mut series = HashMap::new();
        series.insert(SeriesKey::unit_temperature(UnitId(1)), vec![sample(0, 19.8), sample(5, 20.1)]);
        series.insert(SeriesKey::zone_temperature(ZoneId(11)), vec![sample(0, 19.0), sample(5, 19.4)]);
        series.insert(SeriesKey::zone_temperature(ZoneId(13)), vec![sample(5, 22.0)]);
        let assembler = SnapshotAssembler::new(Arc::new(FixedHistory(series)), 30, 5);

        let zones = vec![
            zone(11, true, Some(19.5), 0.6),
            zone(12, false, None, 0.3),
            zone(13, true, Some(22.1), 0.2),
            zone(14, true, None, 0.9),
        ];
        let snapshot = assembler.assemble(&unit(), &zones).await.unwrap();

        assert_eq!(snapshot.zone_ids, vec![ZoneId(11), ZoneId(13)]);
        assert_eq!(snapshot.zone_temperatures, vec![19.5, 22.1]);
        assert_eq!(snapshot.zone_airflow, vec![0.6, 0.2]);
        assert_eq!(snapshot.unit_history, vec![19.8, 20.1]);
        assert_eq!(snapshot.zone_history, vec![vec![Some(19.0), None], vec![Some(19.4), Some(22.0)]]);
        assert_eq!(snapshot.band, TargetBand { min: 16, max: 30, target: 23 });
        assert_eq!(snapshot.history_interval_minutes, 5);
        assert!(snapshot.is_consistent());
    }

    #[tokio::test]
    async fn test_cold_start_has_empty_history() {
        let assembler = SnapshotAssembler::new(Arc::new(FixedHistory(HashMap::new())), 30, 5);
        let snapshot = assembler
            .assemble(&unit(), &[zone(11, true, Some(20.0), 0.5)])
            .await
            .unwrap();
        assert!(snapshot.unit_history.is_empty());
        assert!(snapshot.zone_history.is_empty());
        assert_eq!(snapshot.zone_count(), 1);
    }

    #[tokio::test]
    async fn test_history_failure_is_driver_error() {
        let assembler = SnapshotAssembler::new(Arc::new(BrokenHistory), 30, 5);
        let err = assembler.assemble(&unit(), &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::History(StoreError::Unavailable(_))));
    }
}
