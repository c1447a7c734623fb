use anyhow::Result;
use climate_controller::{algorithm, config, controller, hardware, repo, telemetry};
use config::{Config, FileConfigSource, DEFAULT_CONFIG_PATH};
use controller::{Clock, Collaborators, ControlLoop, Daemon, LoopSettings, StartOutcome, SystemClock};
use std::sync::Arc;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;
    let _log_guard = init_tracing(&cfg.logging);

    let algorithm = algorithm::ReactiveAlgorithm::from_version(&cfg.daemon.algorithm_version)?;
    let repos = repo::Repositories::new(&cfg).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let factory = hardware::DeviceFactory::with_config(cfg.daemon.hardware, cfg.clone());
    let driver = factory.create_driver(repos.history.clone());
    let meter = factory.create_solar_meter(clock.clone())?;

    if cfg.daemon.power_scheduling && meter.is_none() {
        warn!("power scheduling enabled without a solar meter; daytime period will hold");
    }

    let control_loop = ControlLoop::new(
        LoopSettings::from(&cfg.daemon),
        algorithm,
        cfg.control.clone(),
        Collaborators {
            driver,
            sink: repos.sink.clone(),
            meter,
            config_source: Arc::new(FileConfigSource::new(DEFAULT_CONFIG_PATH)),
            clock,
        },
    )?;

    info!(
        %algorithm,
        hardware = ?factory.mode(),
        power_scheduling = cfg.daemon.power_scheduling,
        "starting Climate Controller"
    );

    let daemon = Daemon::new(Arc::new(control_loop));
    if daemon.start() != StartOutcome::Started {
        anyhow::bail!("control loop already running");
    }

    telemetry::shutdown_signal().await;
    daemon.shutdown().await;

    warn!("shutdown complete");
    Ok(())
}
