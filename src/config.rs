use async_trait::async_trait;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use validator::Validate;

use crate::algorithm::AlgorithmTuning;
use crate::domain::OperatingMode;
use crate::hardware::HardwareMode;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "CLIMATE__";

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("interval of {0} minutes does not evenly divide an hour")]
    InvalidInterval(u32),
    #[error("unknown algorithm version '{0}'")]
    UnknownAlgorithmVersion(String),
    #[error("malformed time period '{name}': {reason}")]
    MalformedPeriod { name: String, reason: String },
    #[error("invalid control configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub solar: SolarConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    pub control: ControlConfig,
}

/// Which units the algorithm loop drives each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitSelection {
    #[default]
    All,
    PoweredOn,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub hardware: HardwareMode,
    pub algorithm_version: String,
    #[serde(default)]
    pub unit_selection: UnitSelection,
    #[serde(default = "default_one")]
    pub algorithm_interval_minutes: u32,
    #[serde(default = "default_five")]
    pub info_interval_minutes: u32,
    #[serde(default = "default_five")]
    pub config_refresh_minutes: u32,
    #[serde(default = "default_one")]
    pub power_interval_minutes: u32,
    /// Power-aware deployments also run the power-scheduling loop
    #[serde(default)]
    pub power_scheduling: bool,
    #[serde(default = "default_setup_backoff")]
    pub setup_backoff_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    pub lookback_minutes: u32,
    pub resample_interval_minutes: u32,
    pub retention_hours: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            lookback_minutes: 30,
            resample_interval_minutes: 5,
            retention_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolarProvider {
    #[default]
    Disabled,
    Http,
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolarConfig {
    #[serde(default)]
    pub provider: SolarProvider,
    pub url_consumption_net: Option<String>,
    #[serde(default = "default_five_u64")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub simulated: SimulatedSolarProfile,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            provider: SolarProvider::Disabled,
            url_consumption_net: None,
            timeout_seconds: 5,
            simulated: SimulatedSolarProfile::default(),
        }
    }
}

/// Diurnal net-consumption curve for the simulated meter
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedSolarProfile {
    pub base_load_w: f64,
    pub peak_production_w: f64,
    pub sunrise_hour: f64,
    pub sunset_hour: f64,
}

impl Default for SimulatedSolarProfile {
    fn default() -> Self {
        Self {
            base_load_w: 600.0,
            peak_production_w: 4000.0,
            sunrise_hour: 6.5,
            sunset_hour: 19.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DbConfig {
    pub url: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to this file
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
    /// Overrides the default `EnvFilter` directive when `RUST_LOG` is unset
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub ambient_temperature: f64,
    /// Share of the gap to the supply air a fully open zone closes per minute
    pub zone_response_per_minute: f64,
    /// Share of the gap to ambient every zone closes per minute
    pub ambient_drift_per_minute: f64,
    pub units: Vec<SimulatedUnitConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ambient_temperature: 17.0,
            zone_response_per_minute: 0.08,
            ambient_drift_per_minute: 0.01,
            units: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedUnitConfig {
    pub id: u32,
    pub mode: OperatingMode,
    #[serde(default)]
    pub powered_on: bool,
    pub setpoint: i32,
    #[serde(default = "default_min_setpoint")]
    pub min_setpoint: i32,
    #[serde(default = "default_max_setpoint")]
    pub max_setpoint: i32,
    #[serde(default)]
    pub zones: Vec<SimulatedZoneConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedZoneConfig {
    pub id: u32,
    #[serde(default = "default_true")]
    pub has_sensor: bool,
    pub temperature: f64,
    #[serde(default = "default_half")]
    pub airflow: f64,
}

// ============================================================================
// Hot-reloadable control parameters
// ============================================================================

/// Parameters re-read on every config-refresh tick and swapped in wholesale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ControlConfig {
    pub target_temperature: i32,
    #[serde(default)]
    pub sleep: Option<SleepOverride>,
    #[serde(default)]
    pub periods: PeriodsConfig,
    /// Nominal draw of a running unit (W)
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub power_consumption: f64,
    /// Fraction of `power_consumption` net flow that counts as surplus / deficit
    #[serde(default = "default_surplus_ratio")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub solar_surplus_ratio: f64,
    #[serde(default = "default_five")]
    #[validate(range(max = 1440))]
    pub period_end_grace_minutes: u32,
    #[serde(default)]
    #[validate(nested)]
    pub algorithm: AlgorithmTuning,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            target_temperature: 22,
            sleep: None,
            periods: PeriodsConfig::default(),
            power_consumption: 0.0,
            solar_surplus_ratio: default_surplus_ratio(),
            period_end_grace_minutes: 5,
            algorithm: AlgorithmTuning::default(),
        }
    }
}

/// Lower/higher target substituted inside a time-of-day window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepOverride {
    /// `["HH:MM", "HH:MM"]`, half-open
    pub window: Vec<String>,
    pub target_temperature: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodsConfig {
    pub daytime: PeriodConfig,
    pub morning: PeriodConfig,
}

impl Default for PeriodsConfig {
    fn default() -> Self {
        Self {
            daytime: PeriodConfig { window: Vec::new(), mode: OperatingMode::Cool, trigger: 0.0 },
            morning: PeriodConfig { window: Vec::new(), mode: OperatingMode::Heat, trigger: 0.0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodConfig {
    /// `["HH:MM", "HH:MM"]`, half-open
    #[serde(default)]
    pub window: Vec<String>,
    /// Mode a unit must be in for the period to act on it
    pub mode: OperatingMode,
    /// Degrees past the target before the period switches a unit on
    #[serde(default)]
    pub trigger: f64,
}

fn default_one() -> u32 { 1 }
fn default_five() -> u32 { 5 }
fn default_five_u64() -> u64 { 5 }
fn default_setup_backoff() -> u64 { 5 }
fn default_surplus_ratio() -> f64 { 0.6 }
fn default_min_setpoint() -> i32 { 16 }
fn default_max_setpoint() -> i32 { 30 }
fn default_true() -> bool { true }
fn default_half() -> f64 { 0.5 }

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let cfg: Config = figment_for(path.as_ref()).extract()?;
        cfg.control.validate()?;
        Ok(cfg)
    }
}

fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

// ============================================================================
// Config sources
// ============================================================================

/// Pull-based source of [`ControlConfig`], polled on the refresh cadence
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<ControlConfig, ConfigurationError>;
}

/// Re-reads the `control` section of the same file + environment stack as [`Config`]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn load(&self) -> Result<ControlConfig, ConfigurationError> {
        let control: ControlConfig = figment_for(&self.path).extract_inner("control")?;
        control.validate()?;
        Ok(control)
    }
}

/// Always yields the same parameters
pub struct StaticConfigSource(pub ControlConfig);

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn load(&self) -> Result<ControlConfig, ConfigurationError> {
        self.0.validate()?;
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [daemon]
        algorithm_version = "sigmoid-airflow"
        power_scheduling = true

        [control]
        target_temperature = 23
        power_consumption = 1000.0

        [control.sleep]
        window = ["00:00", "06:00"]
        target_temperature = 20

        [control.periods.daytime]
        window = ["09:00", "18:00"]
        mode = "cool"
        trigger = 2.0

        [control.periods.morning]
        window = ["06:00", "09:00"]
        mode = "Heat"
        trigger = 1.0

        [control.algorithm]
        airflow_min = 0.15
    "#;

    #[test]
    fn test_control_config_defaults() {
        let cfg: ControlConfig = toml::from_str("target_temperature = 21").unwrap();
        assert_eq!(cfg.solar_surplus_ratio, 0.6);
        assert_eq!(cfg.period_end_grace_minutes, 5);
        assert_eq!(cfg.algorithm, AlgorithmTuning::default());
        assert!(cfg.periods.daytime.window.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_simulation_units_without_physics_use_defaults() {
        let raw = r#"
            [[simulation.units]]
            id = 7
            mode = "Cool"
            setpoint = 24
        "#;
        let cfg: Config = Figment::new()
            .merge(Toml::string(raw))
            .merge(Toml::string("[daemon]\nalgorithm_version = \"v1_0\"\n[control]\ntarget_temperature = 22"))
            .extract()
            .unwrap();
        assert_eq!(cfg.simulation.ambient_temperature, SimulationConfig::default().ambient_temperature);
        assert_eq!(cfg.simulation.units.len(), 1);
        assert_eq!(cfg.simulation.units[0].mode, OperatingMode::Cool);
    }

    #[test]
    fn test_full_config_parses() {
        let cfg: Config = Figment::new().merge(Toml::string(SAMPLE)).extract().unwrap();
        assert_eq!(cfg.daemon.algorithm_interval_minutes, 1);
        assert_eq!(cfg.daemon.info_interval_minutes, 5);
        assert_eq!(cfg.daemon.unit_selection, UnitSelection::All);
        assert!(cfg.daemon.power_scheduling);
        assert_eq!(cfg.control.target_temperature, 23);
        assert_eq!(cfg.control.periods.morning.mode, OperatingMode::Heat);
        assert_eq!(cfg.control.algorithm.airflow_min, 0.15);
        assert_eq!(cfg.control.sleep.as_ref().map(|s| s.target_temperature), Some(20));
        assert_eq!(cfg.history.resample_interval_minutes, 5);
    }

    #[test]
    fn test_out_of_range_tuning_fails_validation() {
        let mut cfg = ControlConfig::default();
        cfg.algorithm.airflow_min = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = ControlConfig::default();
        cfg.solar_surplus_ratio = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn test_static_source_rejects_invalid_config() {
        let mut cfg = ControlConfig::default();
        cfg.algorithm.sigmoid_radius = 0.0;
        let err = StaticConfigSource(cfg).load().await.unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid(_)));
    }
}
