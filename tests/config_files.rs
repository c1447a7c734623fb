//! Shipped configuration and file-backed hot reload.

use std::path::PathBuf;

use climate_controller::algorithm::ReactiveAlgorithm;
use climate_controller::config::{Config, ConfigSource, FileConfigSource};
use climate_controller::controller::{LoopSettings, PowerSchedule};
use climate_controller::domain::OperatingMode;

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/default.toml")
}

fn scratch_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("climate-controller-{}-{name}.toml", std::process::id()))
}

#[test]
fn test_shipped_config_is_runnable() {
    let cfg = Config::load_from(shipped_config()).unwrap();

    assert_eq!(
        ReactiveAlgorithm::from_version(&cfg.daemon.algorithm_version).unwrap(),
        ReactiveAlgorithm::SigmoidAirflow
    );
    LoopSettings::from(&cfg.daemon).validate().unwrap();
    PowerSchedule::from_config(&cfg.control).unwrap();

    assert_eq!(cfg.control.periods.daytime.mode, OperatingMode::Cool);
    assert!(!cfg.simulation.units.is_empty());
}

#[tokio::test]
async fn test_file_source_picks_up_edits() {
    let path = scratch_file("reload");
    std::fs::write(&path, "[control]\ntarget_temperature = 21\n").unwrap();

    let source = FileConfigSource::new(&path);
    assert_eq!(source.load().await.unwrap().target_temperature, 21);

    std::fs::write(&path, "[control]\ntarget_temperature = 23\nsolar_surplus_ratio = 0.4\n").unwrap();
    let control = source.load().await.unwrap();
    assert_eq!(control.target_temperature, 23);
    assert_eq!(control.solar_surplus_ratio, 0.4);

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_file_source_rejects_invalid_values() {
    let path = scratch_file("invalid");
    std::fs::write(&path, "[control]\ntarget_temperature = 22\nsolar_surplus_ratio = 1.5\n").unwrap();

    assert!(FileConfigSource::new(&path).load().await.is_err());

    std::fs::remove_file(&path).ok();
}
