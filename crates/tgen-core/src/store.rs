//! Run Repository: persisted Run entities plus the in-memory backend
use crate::data_model::{Run, RunId};
use crate::error::{PipelineError, Result};
use crate::history::{HistoryStore, StepHistoryEntry, StepStatus};
use crate::stage::Stage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Listing filter. Empty filter matches every run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFilter {
    pub state: Option<Stage>,
    pub project_id: Option<String>,
}

impl RunFilter {
    pub fn matches(&self, run: &Run) -> bool {
        self.state.map_or(true, |s| run.state == s)
            && self
                .project_id
                .as_deref()
                .map_or(true, |p| run.project_id == p)
    }
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert(&self, run: &Run) -> Result<()>;

    async fn get(&self, id: RunId) -> Result<Run>;

    /// Replaces the stored run. The run must already exist.
    async fn save(&self, run: &Run) -> Result<()>;

    /// Newest first.
    async fn list(&self, filter: &RunFilter) -> Result<Vec<Run>>;
}

#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<RunId, Run>>,
    steps: RwLock<HashMap<RunId, Vec<StepHistoryEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a run and its rows, used when loading snapshots.
    pub async fn restore(&self, run: Run, steps: Vec<StepHistoryEntry>) {
        let id = run.id;
        self.runs.write().await.insert(id, run);
        self.steps.write().await.insert(id, steps);
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn insert(&self, run: &Run) -> Result<()> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(PipelineError::Storage(format!("run {} already exists", run.id)));
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get(&self, id: RunId) -> Result<Run> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(PipelineError::NotFound(id))
    }

    async fn save(&self, run: &Run) -> Result<()> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.id) {
            Some(slot) => {
                *slot = run.clone();
                Ok(())
            }
            None => Err(PipelineError::NotFound(run.id)),
        }
    }

    async fn list(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn enter(
        &self,
        run_id: RunId,
        stage: Stage,
        status: StepStatus,
    ) -> Result<StepHistoryEntry> {
        let mut steps = self.steps.write().await;
        let rows = steps.entry(run_id).or_default();
        if let Some(row) = rows.iter_mut().find(|r| r.step_name == stage) {
            row.reenter(status);
            return Ok(row.clone());
        }
        let row = StepHistoryEntry::entered(run_id, stage, status);
        rows.push(row.clone());
        Ok(row)
    }

    async fn set_status(
        &self,
        run_id: RunId,
        stage: Stage,
        status: StepStatus,
        error_message: Option<String>,
    ) -> Result<StepHistoryEntry> {
        let mut steps = self.steps.write().await;
        let row = steps
            .get_mut(&run_id)
            .and_then(|rows| rows.iter_mut().find(|r| r.step_name == stage))
            .ok_or_else(|| {
                PipelineError::Storage(format!("no {stage} step recorded for run {run_id}"))
            })?;
        row.apply(status, error_message);
        Ok(row.clone())
    }

    async fn steps(&self, run_id: RunId) -> Result<Vec<StepHistoryEntry>> {
        let mut rows = self
            .steps
            .read()
            .await
            .get(&run_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|r| r.step_name.index());
        Ok(rows)
    }

    async fn running_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<StepHistoryEntry>> {
        Ok(self
            .steps
            .read()
            .await
            .values()
            .flatten()
            .filter(|r| r.status == StepStatus::Running && r.started_at < cutoff)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::RunMode;

    #[tokio::test]
    async fn test_insert_get_save() {
        let store = MemoryStore::new();
        let mut run = Run::new("proj", "main", RunMode::Manual);
        store.insert(&run).await.unwrap();
        assert!(store.insert(&run).await.is_err());

        run.advance_to(Stage::PullingCode).unwrap();
        store.save(&run).await.unwrap();
        assert_eq!(store.get(run.id).await.unwrap().state, Stage::PullingCode);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = MemoryStore::new();
        let id = RunId::new();
        assert_eq!(store.get(id).await.unwrap_err(), PipelineError::NotFound(id));
    }

    #[tokio::test]
    async fn test_list_filters_by_state_and_project() {
        let store = MemoryStore::new();
        let a = Run::new("alpha", "main", RunMode::Manual);
        let mut b = Run::new("beta", "main", RunMode::Automatic);
        b.advance_to(Stage::PullingCode).unwrap();
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        let all = store.list(&RunFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let queued = store
            .list(&RunFilter {
                state: Some(Stage::Queued),
                project_id: None,
            })
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].project_id, "alpha");

        let beta = store
            .list(&RunFilter {
                state: None,
                project_id: Some("beta".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(beta[0].id, b.id);
    }

    #[tokio::test]
    async fn test_reentering_a_stage_overwrites_its_row() {
        let store = MemoryStore::new();
        let id = RunId::new();
        store.enter(id, Stage::Queued, StepStatus::Completed).await.unwrap();
        store.enter(id, Stage::PullingCode, StepStatus::Running).await.unwrap();
        store
            .set_status(id, Stage::PullingCode, StepStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        let row = store.enter(id, Stage::PullingCode, StepStatus::Pending).await.unwrap();

        assert_eq!(row.attempt, 2);
        let rows = store.steps(id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_set_status_requires_existing_row() {
        let store = MemoryStore::new();
        let err = store
            .set_status(RunId::new(), Stage::RunTest, StepStatus::Running, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Storage");
    }

    #[tokio::test]
    async fn test_running_before_only_returns_running_rows() {
        let store = MemoryStore::new();
        let id = RunId::new();
        store.enter(id, Stage::Queued, StepStatus::Completed).await.unwrap();
        store.enter(id, Stage::PullingCode, StepStatus::Running).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let stale = store.running_before(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].step_name, Stage::PullingCode);

        let past = Utc::now() - chrono::Duration::seconds(60);
        assert!(store.running_before(past).await.unwrap().is_empty());
    }
}
