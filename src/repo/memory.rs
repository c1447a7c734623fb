use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::domain::{
    ClimateInfo, HistoryEntity, HistoryMetric, HistorySample, PersistenceSink, SeriesKey, StoreError,
    TemperatureHistoryStore,
};

/// In-process history: keeps raw samples for `retention_hours` and
/// resamples them on demand.
pub struct MemoryHistory {
    series: RwLock<HashMap<SeriesKey, VecDeque<(DateTime<Utc>, f64)>>>,
    retention: Duration,
}

impl MemoryHistory {
    pub fn new(retention_hours: u32) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            retention: Duration::hours(i64::from(retention_hours)),
        }
    }

    pub fn record(&self, key: SeriesKey, timestamp: DateTime<Utc>, value: f64) {
        if !value.is_finite() {
            return;
        }
        let mut series = self.series.write();
        let samples = series.entry(key).or_default();
        // read-outs arrive in order; keep the deque sorted if one does not
        let at = samples.partition_point(|(ts, _)| *ts <= timestamp);
        samples.insert(at, (timestamp, value));
    }

    /// Drop every sample older than the retention window ending at `now`
    pub fn prune(&self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        let mut series = self.series.write();
        for samples in series.values_mut() {
            while samples.front().is_some_and(|(ts, _)| *ts < cutoff) {
                samples.pop_front();
            }
        }
        series.retain(|_, samples| !samples.is_empty());
    }

    pub fn sample_count(&self, key: SeriesKey) -> usize {
        self.series.read().get(&key).map_or(0, VecDeque::len)
    }

    /// Mean per epoch-aligned bucket over `(now - lookback, now]`
    pub fn resample_until(
        &self,
        key: SeriesKey,
        lookback_minutes: u32,
        interval_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<HistorySample>, StoreError> {
        if interval_minutes == 0 {
            return Err(StoreError::Query("resample interval must be positive".into()));
        }
        let bucket_seconds = i64::from(interval_minutes) * 60;
        let since = now - Duration::minutes(i64::from(lookback_minutes));

        let series = self.series.read();
        let Some(samples) = series.get(&key) else {
            return Ok(Vec::new());
        };

        let mut buckets: BTreeMap<i64, (f64, u32)> = BTreeMap::new();
        for (ts, value) in samples.iter().filter(|(ts, _)| *ts > since && *ts <= now) {
            let bucket = ts.timestamp().div_euclid(bucket_seconds) * bucket_seconds;
            let entry = buckets.entry(bucket).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }

        Ok(buckets
            .into_iter()
            .filter_map(|(start, (sum, count))| {
                DateTime::from_timestamp(start, 0).map(|timestamp| HistorySample {
                    timestamp,
                    value: sum / f64::from(count),
                })
            })
            .collect())
    }
}

#[async_trait]
impl TemperatureHistoryStore for MemoryHistory {
    async fn resampled(
        &self,
        key: SeriesKey,
        lookback_minutes: u32,
        interval_minutes: u32,
    ) -> Result<Vec<HistorySample>, StoreError> {
        self.resample_until(key, lookback_minutes, interval_minutes, Utc::now())
    }
}

#[async_trait]
impl PersistenceSink for MemoryHistory {
    async fn save(&self, info: &ClimateInfo) -> Result<(), StoreError> {
        let at = info.captured_at;
        for unit in &info.units {
            let entity = HistoryEntity::Unit(unit.id);
            if let Some(t) = unit.temperature {
                self.record(SeriesKey { entity, metric: HistoryMetric::Temperature }, at, t);
            }
            self.record(
                SeriesKey { entity, metric: HistoryMetric::Setpoint },
                at,
                f64::from(unit.target_setpoint),
            );
        }
        for zone in &info.zones {
            let entity = HistoryEntity::Zone(zone.id);
            if let Some(t) = zone.sensed_temperature() {
                self.record(SeriesKey { entity, metric: HistoryMetric::Temperature }, at, t);
            }
            if let Some(setpoint) = zone.target_setpoint {
                self.record(SeriesKey { entity, metric: HistoryMetric::Setpoint }, at, f64::from(setpoint));
            }
            self.record(SeriesKey { entity, metric: HistoryMetric::Airflow }, at, zone.airflow);
        }
        self.prune(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FanSpeed, OperatingMode, Unit, UnitId, Zone, ZoneId};
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, h, m, s).unwrap()
    }

    fn key() -> SeriesKey {
        SeriesKey::zone_temperature(ZoneId(4))
    }

    #[test]
    fn test_resample_means_per_aligned_bucket() {
        let history = MemoryHistory::new(24);
        history.record(key(), at(10, 1, 0), 20.0);
        history.record(key(), at(10, 3, 30), 21.0);
        history.record(key(), at(10, 6, 0), 22.0);
        // 10:10 bucket left empty
        history.record(key(), at(10, 16, 0), 23.0);

        let samples = history.resample_until(key(), 30, 5, at(10, 20, 0)).unwrap();
        assert_eq!(
            samples,
            vec![
                HistorySample { timestamp: at(10, 0, 0), value: 20.5 },
                HistorySample { timestamp: at(10, 5, 0), value: 22.0 },
                HistorySample { timestamp: at(10, 15, 0), value: 23.0 },
            ]
        );
    }

    #[test]
    fn test_lookback_excludes_old_and_future_samples() {
        let history = MemoryHistory::new(24);
        history.record(key(), at(9, 0, 0), 18.0);
        history.record(key(), at(10, 0, 0), 20.0);
        history.record(key(), at(11, 0, 0), 25.0);

        let samples = history.resample_until(key(), 30, 5, at(10, 10, 0)).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 20.0);
    }

    #[test]
    fn test_unknown_series_and_zero_interval() {
        let history = MemoryHistory::new(24);
        assert!(history.resample_until(key(), 30, 5, at(10, 0, 0)).unwrap().is_empty());
        assert!(matches!(
            history.resample_until(key(), 30, 0, at(10, 0, 0)),
            Err(StoreError::Query(_))
        ));
    }

    #[test]
    fn test_out_of_order_samples_stay_sorted() {
        let history = MemoryHistory::new(24);
        history.record(key(), at(10, 7, 0), 21.0);
        history.record(key(), at(10, 2, 0), 19.0);
        history.record(key(), at(10, 4, 0), f64::NAN);
        let samples = history.resample_until(key(), 60, 5, at(10, 10, 0)).unwrap();
        assert_eq!(samples[0].value, 19.0);
        assert_eq!(samples[1].value, 21.0);
        assert_eq!(history.sample_count(key()), 2);
    }

    #[tokio::test]
    async fn test_save_records_series_and_prunes() {
        let history = MemoryHistory::new(1);
        let unit = Unit {
            id: UnitId(1),
            mode: OperatingMode::Cool,
            fan_speed: FanSpeed::High,
            powered_on: true,
            spill: false,
            temperature: Some(24.5),
            target_setpoint: 23,
            min_setpoint: 16,
            max_setpoint: 30,
        };
        let zones = vec![
            Zone {
                id: ZoneId(4),
                unit_id: UnitId(1),
                has_sensor: true,
                powered_on: true,
                temperature: Some(25.0),
                airflow: 0.4,
                target_setpoint: Some(22),
            },
            Zone {
                id: ZoneId(5),
                unit_id: UnitId(1),
                has_sensor: false,
                powered_on: true,
                temperature: Some(99.0),
                airflow: 0.2,
                target_setpoint: None,
            },
        ];
        let info = |captured_at| ClimateInfo { captured_at, units: vec![unit.clone()], zones: zones.clone() };

        history.save(&info(at(8, 0, 0))).await.unwrap();
        assert_eq!(history.sample_count(SeriesKey::unit_temperature(UnitId(1))), 1);
        assert_eq!(history.sample_count(key()), 1);
        assert_eq!(history.sample_count(SeriesKey::zone_temperature(ZoneId(5))), 0);
        assert_eq!(
            history.sample_count(SeriesKey { entity: HistoryEntity::Zone(ZoneId(5)), metric: HistoryMetric::Airflow }),
            1
        );

        history.save(&info(at(9, 30, 0))).await.unwrap();
        assert_eq!(history.sample_count(key()), 1);
    }
}
