//! # Control loop orchestration
//!
//! [`ControlLoop`] owns the shared state of the daemon and exposes one
//! long-running method per task:
//!
//! - **setup**: prepares the driver and the sink, seeds the on/off bias and
//!   flips the setup gate; retried with back-off until it succeeds
//! - **config refresh**: swaps in a freshly loaded [`ControlConfig`]
//! - **info persistence**: hands a full read-out to the persistence sink
//! - **algorithm**: reads a snapshot per unit, runs the reactive algorithm
//!   and writes setpoint and airflow back
//! - **power scheduling** (optional): applies the time-of-day power policy
//!
//! Periodic tasks sleep until wall-clock boundaries, never for a fixed
//! interval after their body finished. Every iteration runs its own
//! `*_once` method, which tests drive directly.
//!
//! A failure inside one unit is logged and recorded in the
//! [`IterationReport`]; the remaining units are still processed. After
//! cancellation no new read or actuation is started.

pub mod clock;
pub mod daemon;
pub mod power;
pub mod scheduler;

pub use clock::{Clock, ClockAligner, SystemClock, TimeWindow};
pub use daemon::{Daemon, StartOutcome};
pub use power::{OnOffBias, PowerAction, PowerReason, PowerSchedule, TimePeriod, UnitPowerView};
pub use scheduler::{TaskBoard, TaskKind, TaskPhase, TaskStatus};

use chrono::NaiveTime;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::algorithm::{AlgorithmTuning, ReactiveAlgorithm};
use crate::config::{ConfigSource, ConfigurationError, ControlConfig, DaemonConfig, UnitSelection};
use crate::domain::{
    AlgorithmDecision, ClimateDriver, DriverError, PersistenceSink, SolarMeter, StoreError, UnitId, Zone,
};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Unit {0} returned an inconsistent snapshot")]
    InconsistentSnapshot(UnitId),
    #[error("Cancelled")]
    Cancelled,
}

// ============================================================================
// Iteration results
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum UnitAction {
    Commanded(AlgorithmDecision),
    Power(PowerAction),
}

#[derive(Debug)]
pub struct UnitOutcome {
    pub unit_id: UnitId,
    pub result: Result<UnitAction, ControlError>,
}

/// Per-unit results of one algorithm or power iteration
#[derive(Debug, Default)]
pub struct IterationReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl IterationReport {
    /// Record a unit's result; returns `false` once the iteration was cancelled
    fn push(&mut self, unit_id: UnitId, result: Result<UnitAction, ControlError>) -> bool {
        let cancelled = matches!(result, Err(ControlError::Cancelled));
        if let Err(e) = &result {
            if !cancelled {
                warn!(unit_id = %unit_id, error = %e, "unit skipped this iteration");
            }
        }
        self.outcomes.push(UnitOutcome { unit_id, result });
        !cancelled
    }

    pub fn outcome(&self, unit_id: UnitId) -> Option<&UnitOutcome> {
        self.outcomes.iter().find(|o| o.unit_id == unit_id)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Loop cadence and behaviour fixed at startup
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub algorithm_interval_minutes: u32,
    pub info_interval_minutes: u32,
    pub config_refresh_minutes: u32,
    pub power_interval_minutes: u32,
    pub power_scheduling: bool,
    pub unit_selection: UnitSelection,
    pub setup_backoff: Duration,
}

impl From<&DaemonConfig> for LoopSettings {
    fn from(cfg: &DaemonConfig) -> Self {
        Self {
            algorithm_interval_minutes: cfg.algorithm_interval_minutes,
            info_interval_minutes: cfg.info_interval_minutes,
            config_refresh_minutes: cfg.config_refresh_minutes,
            power_interval_minutes: cfg.power_interval_minutes,
            power_scheduling: cfg.power_scheduling,
            unit_selection: cfg.unit_selection,
            setup_backoff: Duration::from_secs(cfg.setup_backoff_seconds),
        }
    }
}

impl LoopSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        clock::validate_interval(self.algorithm_interval_minutes)?;
        clock::validate_interval(self.info_interval_minutes)?;
        clock::validate_interval(self.config_refresh_minutes)?;
        if self.power_scheduling {
            clock::validate_interval(self.power_interval_minutes)?;
        }
        Ok(())
    }
}

/// External capabilities the control loop drives
pub struct Collaborators {
    pub driver: Arc<dyn ClimateDriver>,
    pub sink: Arc<dyn PersistenceSink>,
    pub meter: Option<Arc<dyn SolarMeter>>,
    pub config_source: Arc<dyn ConfigSource>,
    pub clock: Arc<dyn Clock>,
}

pub struct ControlLoop {
    settings: LoopSettings,
    algorithm: ReactiveAlgorithm,
    driver: Arc<dyn ClimateDriver>,
    sink: Arc<dyn PersistenceSink>,
    meter: Option<Arc<dyn SolarMeter>>,
    config_source: Arc<dyn ConfigSource>,
    aligner: ClockAligner,
    control: RwLock<Arc<ControlConfig>>,
    bias: Mutex<OnOffBias>,
    setup_complete: AtomicBool,
    cancel: CancellationToken,
    tasks: TaskBoard,
}

impl ControlLoop {
    pub fn new(
        settings: LoopSettings,
        algorithm: ReactiveAlgorithm,
        initial: ControlConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigurationError> {
        settings.validate()?;
        initial.validate()?;

        Ok(Self {
            settings,
            algorithm,
            driver: collaborators.driver,
            sink: collaborators.sink,
            meter: collaborators.meter,
            config_source: collaborators.config_source,
            aligner: ClockAligner::new(collaborators.clock),
            control: RwLock::new(Arc::new(initial)),
            bias: Mutex::new(OnOffBias::default()),
            setup_complete: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: TaskBoard::default(),
        })
    }

    /// Share an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn algorithm(&self) -> ReactiveAlgorithm {
        self.algorithm
    }

    /// Consistent view of the current parameters
    pub fn control_config(&self) -> Arc<ControlConfig> {
        self.control.read().clone()
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.load(Ordering::Acquire)
    }

    pub fn is_policy_on(&self, unit_id: UnitId) -> bool {
        self.bias.lock().is_policy_on(unit_id)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn task_status(&self, kind: TaskKind) -> TaskStatus {
        self.tasks.status(kind).await
    }

    // ========================================================================
    // Single iterations
    // ========================================================================

    pub async fn setup_once(&self) -> Result<(), ControlError> {
        self.until_cancelled(self.driver.prepare()).await??;
        self.until_cancelled(self.sink.prepare()).await??;
        let unit_ids = self.until_cancelled(self.driver.unit_ids()).await??;

        self.bias.lock().seed(&unit_ids);
        self.setup_complete.store(true, Ordering::Release);
        info!(units = unit_ids.len(), algorithm = %self.algorithm, "setup complete");
        Ok(())
    }

    pub async fn refresh_config_once(&self) -> Result<(), ControlError> {
        let fresh = self.until_cancelled(self.config_source.load()).await??;
        let changed = self.control.read().as_ref() != &fresh;
        *self.control.write() = Arc::new(fresh);
        info!(changed, "config successfully updated");
        Ok(())
    }

    pub async fn save_info_once(&self) -> Result<(), ControlError> {
        let info = self.until_cancelled(self.driver.info()).await??;
        self.ensure_running()?;
        self.sink.save(&info).await?;
        info!(units = info.units.len(), zones = info.zones.len(), "climate info saved");
        Ok(())
    }

    pub async fn run_algorithm_once(&self) -> Result<IterationReport, ControlError> {
        let control = self.control_config();
        let target = effective_target(&control, self.aligner.now().time())?;
        let unit_ids = match self.settings.unit_selection {
            UnitSelection::All => self.until_cancelled(self.driver.unit_ids()).await??,
            UnitSelection::PoweredOn => self.until_cancelled(self.driver.on_unit_ids()).await??,
        };

        let mut report = IterationReport::default();
        for unit_id in unit_ids {
            let result = self.drive_unit(unit_id, target, &control.algorithm).await;
            if !report.push(unit_id, result) {
                break;
            }
        }
        Ok(report)
    }

    pub async fn run_power_once(&self) -> Result<IterationReport, ControlError> {
        let control = self.control_config();
        let schedule = PowerSchedule::from_config(&control)?;
        let now = self.aligner.now().time();
        let net_consumption = match &self.meter {
            Some(meter) => self.until_cancelled(meter.net_consumption()).await?,
            None => None,
        };
        let unit_ids = self.until_cancelled(self.driver.unit_ids()).await??;

        let mut report = IterationReport::default();
        for unit_id in unit_ids {
            let result = self.schedule_unit(&schedule, now, net_consumption, unit_id).await;
            if !report.push(unit_id, result) {
                break;
            }
        }
        Ok(report)
    }

    async fn drive_unit(
        &self,
        unit_id: UnitId,
        target: i32,
        tuning: &AlgorithmTuning,
    ) -> Result<UnitAction, ControlError> {
        let snapshot = self
            .until_cancelled(self.driver.snapshot(unit_id))
            .await??
            .with_target(target);
        if !snapshot.is_consistent() {
            return Err(ControlError::InconsistentSnapshot(unit_id));
        }

        let decision = self.algorithm.step(&snapshot, tuning);
        let airflow = decision.airflow_by_zone(&snapshot.zone_ids);

        self.ensure_running()?;
        self.driver.set_target_setpoint(unit_id, decision.setpoint).await?;
        self.ensure_running()?;
        self.driver.set_zone_airflow(unit_id, &airflow).await?;

        info!(unit_id = %unit_id, setpoint = decision.setpoint, "successfully sent command");
        Ok(UnitAction::Commanded(decision))
    }

    async fn schedule_unit(
        &self,
        schedule: &PowerSchedule,
        now: NaiveTime,
        net_consumption: Option<f64>,
        unit_id: UnitId,
    ) -> Result<UnitAction, ControlError> {
        let unit = self.until_cancelled(self.driver.unit(unit_id)).await??;
        let zones = self.until_cancelled(self.driver.zones(unit_id, true)).await??;
        let view = UnitPowerView {
            unit_id,
            mode: unit.mode,
            zone_temperatures: zones.iter().filter_map(Zone::sensed_temperature).collect(),
            policy_on: self.is_policy_on(unit_id),
        };

        let action = schedule.decide(now, &view, net_consumption);
        match (action, action.command()) {
            (PowerAction::TurnOn(reason) | PowerAction::TurnOff(reason), Some(on)) => {
                self.ensure_running()?;
                self.driver.set_power(unit_id, on).await?;
                self.bias.lock().record(unit_id, on);
                info!(unit_id = %unit_id, on, %reason, net_consumption, "power command sent");
            }
            _ => debug!(unit_id = %unit_id, powered_on = unit.powered_on, "power state held"),
        }
        Ok(UnitAction::Power(action))
    }

    // ========================================================================
    // Long-running tasks
    // ========================================================================

    /// Retry setup until it succeeds or the loop is cancelled
    pub async fn run_setup(&self) {
        let kind = TaskKind::Setup;
        self.tasks.set_phase(kind, TaskPhase::Running).await;

        loop {
            if self.is_cancelled() {
                break;
            }
            self.tasks.begin_run(kind).await;
            match self.setup_once().await {
                Ok(()) => {
                    self.tasks.record_success(kind).await;
                    self.tasks.set_phase(kind, TaskPhase::Completed).await;
                    return;
                }
                Err(ControlError::Cancelled) => break,
                Err(e) => {
                    error!(error = %e, retry_in = ?self.settings.setup_backoff, "setup failed");
                    self.tasks.record_error(kind, &e).await;
                    if !self.sleep_or_cancel(self.settings.setup_backoff).await {
                        break;
                    }
                }
            }
        }
        self.tasks.set_phase(kind, TaskPhase::Cancelled).await;
    }

    pub async fn run_config_refresh(&self) {
        self.run_periodic(
            TaskKind::ConfigRefresh,
            self.settings.config_refresh_minutes,
            false,
            || self.refresh_config_once(),
        )
        .await
    }

    pub async fn run_info_persistence(&self) {
        self.run_periodic(
            TaskKind::InfoPersistence,
            self.settings.info_interval_minutes,
            true,
            || self.save_info_once(),
        )
        .await
    }

    pub async fn run_algorithm(&self) {
        self.run_periodic(
            TaskKind::Algorithm,
            self.settings.algorithm_interval_minutes,
            true,
            || self.algorithm_tick(),
        )
        .await
    }

    pub async fn run_power_scheduling(&self) {
        self.run_periodic(
            TaskKind::PowerScheduling,
            self.settings.power_interval_minutes,
            true,
            || self.power_tick(),
        )
        .await
    }

    async fn algorithm_tick(&self) -> Result<(), ControlError> {
        let report = self.run_algorithm_once().await?;
        debug!(succeeded = report.succeeded(), failed = report.failed(), "algorithm iteration done");
        Ok(())
    }

    async fn power_tick(&self) -> Result<(), ControlError> {
        let report = self.run_power_once().await?;
        debug!(succeeded = report.succeeded(), failed = report.failed(), "power iteration done");
        Ok(())
    }

    async fn run_periodic<F, Fut>(&self, kind: TaskKind, every_minutes: u32, needs_setup: bool, mut body: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), ControlError>>,
    {
        self.tasks.set_phase(kind, TaskPhase::Running).await;
        info!(task = %kind, every_minutes, "task started");

        loop {
            if self.is_cancelled() {
                break;
            }
            if needs_setup && !self.is_setup_complete() {
                self.tasks.set_phase(kind, TaskPhase::WaitingForSetup).await;
                debug!(task = %kind, "setup not complete, backing off");
                if !self.sleep_or_cancel(self.settings.setup_backoff).await {
                    break;
                }
                continue;
            }

            self.tasks.begin_run(kind).await;
            match body().await {
                Ok(()) => self.tasks.record_success(kind).await,
                Err(ControlError::Cancelled) => break,
                Err(e) => {
                    error!(task = %kind, error = %e, "iteration failed");
                    self.tasks.record_error(kind, &e).await;
                }
            }

            let delay = self
                .aligner
                .delay_until_next_boundary(every_minutes)
                .unwrap_or_else(|e| {
                    error!(task = %kind, error = %e, "cannot align to clock, sleeping one minute");
                    Duration::from_secs(60)
                });
            self.tasks.set_phase(kind, TaskPhase::SleepingUntilBoundary).await;
            if !self.sleep_or_cancel(delay).await {
                break;
            }
        }

        self.tasks.set_phase(kind, TaskPhase::Cancelled).await;
        info!(task = %kind, "task stopped");
    }

    // ========================================================================
    // Cancellation helpers
    // ========================================================================

    fn ensure_running(&self) -> Result<(), ControlError> {
        if self.is_cancelled() {
            Err(ControlError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn until_cancelled<T>(&self, fut: impl Future<Output = T>) -> Result<T, ControlError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ControlError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// `false` when cancelled before the delay elapsed
    async fn sleep_or_cancel(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Sleep-override target inside its window, the regular target otherwise
pub fn effective_target(control: &ControlConfig, now: NaiveTime) -> Result<i32, ConfigurationError> {
    if let Some(sleep) = &control.sleep {
        if TimeWindow::parse("sleep", &sleep.window)?.contains(now) {
            return Ok(sleep.target_temperature);
        }
    }
    Ok(control.target_temperature)
}
