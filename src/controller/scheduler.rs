use chrono::{DateTime, Utc};
use std::collections::HashMap;
use strum::{Display, EnumIter, IntoEnumIterator};
use tokio::sync::RwLock;

/// Long-running tasks owned by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum TaskKind {
    Setup,
    ConfigRefresh,
    InfoPersistence,
    Algorithm,
    PowerScheduling,
}

/// Where a task currently sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TaskPhase {
    #[default]
    NotStarted,
    Running,
    WaitingForSetup,
    Executing,
    SleepingUntilBoundary,
    /// One-shot task finished its work
    Completed,
    Cancelled,
}

/// Task status tracking
#[derive(Debug, Clone, Default)]
pub struct TaskStatus {
    pub phase: TaskPhase,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

impl TaskStatus {
    fn begin_run(&mut self, now: DateTime<Utc>) {
        self.phase = TaskPhase::Executing;
        self.last_run = Some(now);
        self.run_count += 1;
    }

    fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_success = Some(now);
        self.success_count += 1;
        self.last_error = None;
    }

    fn record_error(&mut self, error: String) {
        self.error_count += 1;
        self.last_error = Some(error);
    }
}

/// Status of every task, readable while the tasks run
pub struct TaskBoard {
    statuses: HashMap<TaskKind, RwLock<TaskStatus>>,
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self {
            statuses: TaskKind::iter()
                .map(|kind| (kind, RwLock::new(TaskStatus::default())))
                .collect(),
        }
    }
}

impl TaskBoard {
    pub async fn status(&self, kind: TaskKind) -> TaskStatus {
        match self.statuses.get(&kind) {
            Some(status) => status.read().await.clone(),
            None => TaskStatus::default(),
        }
    }

    pub async fn set_phase(&self, kind: TaskKind, phase: TaskPhase) {
        if let Some(status) = self.statuses.get(&kind) {
            status.write().await.phase = phase;
        }
    }

    pub async fn begin_run(&self, kind: TaskKind) {
        if let Some(status) = self.statuses.get(&kind) {
            status.write().await.begin_run(Utc::now());
        }
    }

    pub async fn record_success(&self, kind: TaskKind) {
        if let Some(status) = self.statuses.get(&kind) {
            status.write().await.record_success(Utc::now());
        }
    }

    pub async fn record_error(&self, kind: TaskKind, error: impl ToString) {
        if let Some(status) = self.statuses.get(&kind) {
            status.write().await.record_error(error.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_board_starts_with_every_task_not_started() {
        let board = TaskBoard::default();
        for kind in TaskKind::iter() {
            let status = board.status(kind).await;
            assert_eq!(status.phase, TaskPhase::NotStarted);
            assert_eq!(status.run_count, 0);
        }
    }

    #[tokio::test]
    async fn test_success_clears_last_error() {
        let board = TaskBoard::default();
        board.begin_run(TaskKind::Algorithm).await;
        board.record_error(TaskKind::Algorithm, "driver offline").await;
        let status = board.status(TaskKind::Algorithm).await;
        assert_eq!(status.phase, TaskPhase::Executing);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("driver offline"));

        board.begin_run(TaskKind::Algorithm).await;
        board.record_success(TaskKind::Algorithm).await;
        let status = board.status(TaskKind::Algorithm).await;
        assert_eq!(status.run_count, 2);
        assert_eq!(status.success_count, 1);
        assert!(status.last_error.is_none());
        assert!(status.last_success.is_some());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(TaskKind::PowerScheduling.to_string(), "power_scheduling");
        assert_eq!(TaskPhase::SleepingUntilBoundary.to_string(), "sleeping_until_boundary");
    }
}
