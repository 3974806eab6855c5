//! Step History: per-run log of stage attempts
//!
//! One row per visited stage. A row is created when its stage is entered
//! and updated in place until the stage resolves. Re-entering a stage via
//! retry resets that same row and bumps `attempt`; rows are never deleted.
use crate::data_model::RunId;
use crate::error::Result;
use crate::stage::Stage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepHistoryEntry {
    pub run_id: RunId,
    pub step_name: Stage,
    pub status: StepStatus,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl StepHistoryEntry {
    pub fn entered(run_id: RunId, stage: Stage, status: StepStatus) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            step_name: stage,
            status,
            attempt: 1,
            started_at: now,
            finished_at: status.is_resolved().then_some(now),
            error_message: None,
        }
    }

    /// Resets the row for a new attempt at the same stage.
    pub fn reenter(&mut self, status: StepStatus) {
        let now = Utc::now();
        self.attempt += 1;
        self.status = status;
        self.started_at = now;
        self.finished_at = status.is_resolved().then_some(now);
        self.error_message = None;
    }

    pub fn apply(&mut self, status: StepStatus, error_message: Option<String>) {
        let now = Utc::now();
        if status == StepStatus::Running {
            self.started_at = now;
        }
        self.status = status;
        self.finished_at = status.is_resolved().then_some(now);
        self.error_message = error_message;
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Creates the row for `stage`, or resets it if the stage was visited
    /// before.
    async fn enter(&self, run_id: RunId, stage: Stage, status: StepStatus)
        -> Result<StepHistoryEntry>;

    /// Updates the existing row for `stage`. Missing rows are an error.
    async fn set_status(
        &self,
        run_id: RunId,
        stage: Stage,
        status: StepStatus,
        error_message: Option<String>,
    ) -> Result<StepHistoryEntry>;

    /// Rows of one run in stage order.
    async fn steps(&self, run_id: RunId) -> Result<Vec<StepHistoryEntry>>;

    /// Rows still `running` that started before `cutoff`.
    async fn running_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<StepHistoryEntry>>;
}
