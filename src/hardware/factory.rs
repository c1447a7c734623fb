use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::{SimulatedClimateDriver, SnapshotAssembler};
use crate::config::{Config, SolarProvider};
use crate::controller::Clock;
use crate::domain::{ClimateDriver, MeterError, SolarMeter, TemperatureHistoryStore};
use crate::solar::{HttpSolarMeter, SimulatedSolarMeter};

/// Hardware mode configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareMode {
    /// Simulated installation with thermal dynamics
    #[default]
    Simulated,
    /// Simulated installation that only changes when commanded
    Frozen,
}

/// Factory for the driver and meter the control loop talks to
pub struct DeviceFactory {
    mode: HardwareMode,
    config: Config,
}

impl DeviceFactory {
    pub fn with_config(mode: HardwareMode, config: Config) -> Self {
        Self { mode, config }
    }

    pub fn mode(&self) -> HardwareMode {
        self.mode
    }

    /// Create the climate driver based on hardware mode
    pub fn create_driver(&self, history: Arc<dyn TemperatureHistoryStore>) -> Arc<dyn ClimateDriver> {
        let assembler = SnapshotAssembler::new(
            history,
            self.config.history.lookback_minutes,
            self.config.history.resample_interval_minutes,
        );
        let simulation = &self.config.simulation;
        if simulation.units.is_empty() {
            tracing::warn!("simulated installation has no units configured");
        }

        match self.mode {
            HardwareMode::Simulated => Arc::new(SimulatedClimateDriver::new(simulation, assembler).with_noise()),
            HardwareMode::Frozen => Arc::new(SimulatedClimateDriver::frozen(simulation, assembler)),
        }
    }

    /// Create the solar meter, if one is configured
    pub fn create_solar_meter(&self, clock: Arc<dyn Clock>) -> Result<Option<Arc<dyn SolarMeter>>> {
        let solar = &self.config.solar;
        let meter: Arc<dyn SolarMeter> = match solar.provider {
            SolarProvider::Disabled => return Ok(None),
            SolarProvider::Http => {
                let url = solar
                    .url_consumption_net
                    .clone()
                    .ok_or(MeterError::NotConfigured)?;
                Arc::new(
                    HttpSolarMeter::new(url, Duration::from_secs(solar.timeout_seconds))
                        .context("Failed to build solar meter client")?,
                )
            }
            SolarProvider::Simulated => Arc::new(SimulatedSolarMeter::new(solar.simulated.clone(), clock)),
        };
        Ok(Some(meter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DaemonConfig, SolarConfig};
    use crate::controller::SystemClock;
    use crate::repo::MemoryHistory;
    use figment::{providers::{Format, Toml}, Figment};

    fn config(solar: &str) -> Config {
        let toml = format!(
            r#"
            [daemon]
            algorithm_version = "symmetric-hysteresis"
            hardware = "frozen"

            [control]
            target_temperature = 22

            {solar}

            [[simulation.units]]
            id = 1
            mode = "cool"
            setpoint = 24

            [[simulation.units.zones]]
            id = 10
            temperature = 26.0
            "#
        );
        Figment::new().merge(Toml::string(&toml)).extract().unwrap()
    }

    #[tokio::test]
    async fn test_driver_built_from_simulation_config() {
        let cfg = config("");
        let daemon: &DaemonConfig = &cfg.daemon;
        assert_eq!(daemon.hardware, HardwareMode::Frozen);

        let factory = DeviceFactory::with_config(daemon.hardware, cfg.clone());
        let driver = factory.create_driver(Arc::new(MemoryHistory::new(24)));
        let zones = driver.zones(crate::domain::UnitId(1), true).await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].airflow, 0.5);
    }

    #[test]
    fn test_meter_selection() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let cfg = config("");
        assert_eq!(cfg.solar.provider, SolarConfig::default().provider);
        let factory = DeviceFactory::with_config(HardwareMode::Frozen, cfg);
        assert!(factory.create_solar_meter(clock.clone()).unwrap().is_none());

        let factory = DeviceFactory::with_config(HardwareMode::Frozen, config("[solar]\nprovider = \"simulated\""));
        assert!(factory.create_solar_meter(clock.clone()).unwrap().is_some());

        let factory = DeviceFactory::with_config(HardwareMode::Frozen, config("[solar]\nprovider = \"http\""));
        assert!(factory.create_solar_meter(clock).is_err());
    }
}
