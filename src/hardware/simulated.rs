use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::SnapshotAssembler;
use crate::config::{SimulationConfig, SimulatedUnitConfig};
use crate::domain::{
    AlgorithmSnapshot, ClimateDriver, ClimateInfo, DriverError, FanSpeed, OperatingMode, Unit, UnitId, Zone,
    ZoneId,
};

/// First-order thermal model of the simulated installation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalPhysics {
    pub ambient_temperature: f64,
    pub zone_response_per_minute: f64,
    pub ambient_drift_per_minute: f64,
}

impl From<&SimulationConfig> for ThermalPhysics {
    fn from(cfg: &SimulationConfig) -> Self {
        Self {
            ambient_temperature: cfg.ambient_temperature,
            zone_response_per_minute: cfg.zone_response_per_minute,
            ambient_drift_per_minute: cfg.ambient_drift_per_minute,
        }
    }
}

struct Installation {
    units: BTreeMap<UnitId, Unit>,
    zones: Vec<Zone>,
    last_step: DateTime<Utc>,
}

impl Installation {
    fn unit(&self, unit_id: UnitId) -> Result<&Unit, DriverError> {
        self.units.get(&unit_id).ok_or(DriverError::UnitNotFound(unit_id))
    }

    fn unit_mut(&mut self, unit_id: UnitId) -> Result<&mut Unit, DriverError> {
        self.units.get_mut(&unit_id).ok_or(DriverError::UnitNotFound(unit_id))
    }

    /// Move every sensored zone toward its unit's supply air and toward
    /// ambient, then take the unit temperature from its zones (return air).
    fn advance(&mut self, physics: &ThermalPhysics, now: DateTime<Utc>) {
        let minutes = (now - self.last_step).num_milliseconds() as f64 / 60_000.0;
        if minutes <= 0.0 {
            return;
        }
        self.last_step = now;

        let Installation { units, zones, .. } = self;
        for zone in zones.iter_mut() {
            let Some(mut t) = zone.temperature else {
                continue;
            };
            if let Some(unit) = units.get(&zone.unit_id).filter(|u| u.powered_on && zone.powered_on) {
                let supply = f64::from(unit.target_setpoint);
                let gap = match unit.mode {
                    OperatingMode::Heat => (supply - t).max(0.0),
                    OperatingMode::Cool => (supply - t).min(0.0),
                    _ => 0.0,
                };
                t += gap * (1.0 - (-physics.zone_response_per_minute * zone.airflow * minutes).exp());
            }
            t += (physics.ambient_temperature - t) * (1.0 - (-physics.ambient_drift_per_minute * minutes).exp());
            zone.temperature = Some(t);
        }

        for unit in units.values_mut() {
            let readings: Vec<f64> = zones
                .iter()
                .filter(|z| z.unit_id == unit.id)
                .filter_map(Zone::sensed_temperature)
                .collect();
            if !readings.is_empty() {
                unit.temperature = Some(readings.iter().sum::<f64>() / readings.len() as f64);
            }
        }
    }
}

/// In-process installation driven by a simple thermal model
pub struct SimulatedClimateDriver {
    state: RwLock<Installation>,
    physics: ThermalPhysics,
    assembler: SnapshotAssembler,
    /// Advance the thermal model on every read
    pub simulate_dynamics: bool,
    /// Enable random noise in sensor readings (±0.05 °C)
    pub simulate_noise: bool,
}

impl SimulatedClimateDriver {
    pub fn new(cfg: &SimulationConfig, assembler: SnapshotAssembler) -> Self {
        let mut units = BTreeMap::new();
        let mut zones = Vec::new();
        for unit_cfg in &cfg.units {
            let (unit, unit_zones) = build_unit(unit_cfg);
            units.insert(unit.id, unit);
            zones.extend(unit_zones);
        }

        Self {
            state: RwLock::new(Installation {
                units,
                zones,
                last_step: Utc::now(),
            }),
            physics: ThermalPhysics::from(cfg),
            assembler,
            simulate_dynamics: true,
            simulate_noise: false,
        }
    }

    /// Installation that never changes on its own; commands still apply
    pub fn frozen(cfg: &SimulationConfig, assembler: SnapshotAssembler) -> Self {
        Self {
            simulate_dynamics: false,
            ..Self::new(cfg, assembler)
        }
    }

    pub fn with_noise(mut self) -> Self {
        self.simulate_noise = true;
        self
    }

    /// Step the thermal model to `now`
    pub async fn advance_to(&self, now: DateTime<Utc>) {
        self.state.write().await.advance(&self.physics, now);
    }

    async fn step(&self) {
        if self.simulate_dynamics {
            self.advance_to(Utc::now()).await;
        }
    }

    fn add_noise(&self, value: Option<f64>) -> Option<f64> {
        if !self.simulate_noise {
            return value;
        }
        let mut rng = rand::thread_rng();
        value.map(|t| ((t + rng.gen_range(-0.05..=0.05)) * 10.0).round() / 10.0)
    }

    fn read_unit(&self, unit: &Unit) -> Unit {
        Unit {
            temperature: self.add_noise(unit.temperature),
            ..unit.clone()
        }
    }

    fn read_zone(&self, zone: &Zone) -> Zone {
        Zone {
            temperature: self.add_noise(zone.temperature),
            ..zone.clone()
        }
    }
}

fn build_unit(cfg: &SimulatedUnitConfig) -> (Unit, Vec<Zone>) {
    let unit_id = UnitId(cfg.id);
    let zones: Vec<Zone> = cfg
        .zones
        .iter()
        .map(|z| Zone {
            id: ZoneId(z.id),
            unit_id,
            has_sensor: z.has_sensor,
            powered_on: true,
            temperature: z.has_sensor.then_some(z.temperature),
            airflow: z.airflow.clamp(0.0, 1.0),
            target_setpoint: None,
        })
        .collect();
    let sensed: Vec<f64> = zones.iter().filter_map(Zone::sensed_temperature).collect();
    let unit = Unit {
        id: unit_id,
        mode: cfg.mode,
        fan_speed: FanSpeed::Auto,
        powered_on: cfg.powered_on,
        spill: false,
        temperature: (!sensed.is_empty()).then(|| sensed.iter().sum::<f64>() / sensed.len() as f64),
        target_setpoint: cfg.setpoint.clamp(cfg.min_setpoint, cfg.max_setpoint),
        min_setpoint: cfg.min_setpoint,
        max_setpoint: cfg.max_setpoint,
    };
    (unit, zones)
}

#[async_trait]
impl ClimateDriver for SimulatedClimateDriver {
    async fn info(&self) -> Result<ClimateInfo, DriverError> {
        self.step().await;
        let state = self.state.read().await;
        Ok(ClimateInfo {
            captured_at: Utc::now(),
            units: state.units.values().map(|u| self.read_unit(u)).collect(),
            zones: state.zones.iter().map(|z| self.read_zone(z)).collect(),
        })
    }

    async fn unit_ids(&self) -> Result<Vec<UnitId>, DriverError> {
        Ok(self.state.read().await.units.keys().copied().collect())
    }

    async fn on_unit_ids(&self) -> Result<Vec<UnitId>, DriverError> {
        Ok(self
            .state
            .read()
            .await
            .units
            .values()
            .filter(|u| u.powered_on)
            .map(|u| u.id)
            .collect())
    }

    async fn unit(&self, unit_id: UnitId) -> Result<Unit, DriverError> {
        self.step().await;
        let state = self.state.read().await;
        Ok(self.read_unit(state.unit(unit_id)?))
    }

    async fn zones(&self, unit_id: UnitId, require_sensor: bool) -> Result<Vec<Zone>, DriverError> {
        self.step().await;
        let state = self.state.read().await;
        state.unit(unit_id)?;
        Ok(state
            .zones
            .iter()
            .filter(|z| z.unit_id == unit_id && (!require_sensor || z.has_sensor))
            .map(|z| self.read_zone(z))
            .collect())
    }

    async fn snapshot(&self, unit_id: UnitId) -> Result<AlgorithmSnapshot, DriverError> {
        let unit = self.unit(unit_id).await?;
        let zones = self.zones(unit_id, true).await?;
        self.assembler.assemble(&unit, &zones).await
    }

    async fn set_target_setpoint(&self, unit_id: UnitId, setpoint: i32) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        let unit = state.unit_mut(unit_id)?;
        if !(unit.min_setpoint..=unit.max_setpoint).contains(&setpoint) {
            return Err(DriverError::Rejected(format!(
                "setpoint {setpoint} outside [{}, {}] for unit {unit_id}",
                unit.min_setpoint, unit.max_setpoint
            )));
        }
        unit.target_setpoint = setpoint;
        Ok(())
    }

    async fn set_zone_airflow(&self, unit_id: UnitId, airflow: &BTreeMap<ZoneId, f64>) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        state.unit(unit_id)?;

        for (&zone_id, &fraction) in airflow {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(DriverError::Rejected(format!("airflow {fraction} for zone {zone_id}")));
            }
            if !state.zones.iter().any(|z| z.id == zone_id && z.unit_id == unit_id) {
                return Err(DriverError::Rejected(format!("zone {zone_id} does not belong to unit {unit_id}")));
            }
        }
        for zone in state.zones.iter_mut().filter(|z| z.unit_id == unit_id) {
            if let Some(&fraction) = airflow.get(&zone.id) {
                // dampers move in whole percent
                zone.airflow = (fraction * 100.0).round() / 100.0;
            }
        }
        Ok(())
    }

    async fn set_power(&self, unit_id: UnitId, on: bool) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        state.unit_mut(unit_id)?.powered_on = on;
        Ok(())
    }
}
