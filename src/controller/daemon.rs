use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::ControlLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A previous `start` is still active; nothing was spawned
    AlreadyRunning,
    /// The daemon was stopped and cannot be started again
    Stopped,
}

/// Runs the control loop's tasks as one group
pub struct Daemon {
    control_loop: Arc<ControlLoop>,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Daemon {
    pub fn new(control_loop: Arc<ControlLoop>) -> Self {
        Self {
            control_loop,
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn control_loop(&self) -> &Arc<ControlLoop> {
        &self.control_loop
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.control_loop.is_cancelled()
    }

    /// Spawn setup and every periodic task. Only the first call spawns.
    pub fn start(&self) -> StartOutcome {
        if self.started.swap(true, Ordering::AcqRel) {
            if self.control_loop.is_cancelled() {
                return StartOutcome::Stopped;
            }
            warn!("control loop already running");
            return StartOutcome::AlreadyRunning;
        }

        let mut handles = Vec::with_capacity(5);

        let control_loop = self.control_loop.clone();
        handles.push(tokio::spawn(async move { control_loop.run_setup().await }));

        let control_loop = self.control_loop.clone();
        handles.push(tokio::spawn(async move { control_loop.run_config_refresh().await }));

        let control_loop = self.control_loop.clone();
        handles.push(tokio::spawn(async move { control_loop.run_info_persistence().await }));

        let control_loop = self.control_loop.clone();
        handles.push(tokio::spawn(async move { control_loop.run_algorithm().await }));

        if self.control_loop.settings().power_scheduling {
            let control_loop = self.control_loop.clone();
            handles.push(tokio::spawn(async move { control_loop.run_power_scheduling().await }));
            info!("power scheduling enabled");
        } else {
            info!("power scheduling disabled");
        }

        *self.handles.lock() = handles;
        info!(algorithm = %self.control_loop.algorithm(), "all control tasks started");
        StartOutcome::Started
    }

    /// Signal every task to stop. Safe to call repeatedly.
    pub fn stop(&self) {
        if !self.control_loop.is_cancelled() {
            info!("stopping control tasks");
        }
        self.control_loop.cancel();
    }

    /// Wait for all spawned tasks to finish
    pub async fn wait(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "control task ended abnormally");
            }
        }
    }

    pub async fn shutdown(&self) {
        self.stop();
        self.wait().await;
    }
}
