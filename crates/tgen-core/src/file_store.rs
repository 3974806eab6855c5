//! JSON snapshot persistence
//!
//! Each run lives in `<dir>/<run_id>.json` together with its step rows.
//! Reads are served from memory; every mutation rewrites the snapshot of
//! the run it touched (temp file + rename).
use crate::data_model::{Run, RunId};
use crate::error::{PipelineError, Result};
use crate::history::{HistoryStore, StepHistoryEntry, StepStatus};
use crate::stage::Stage;
use crate::store::{MemoryStore, RunFilter, RunStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    run: Run,
    steps: Vec<StepHistoryEntry>,
}

pub struct FileStore {
    dir: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Opens `dir`, creating it if needed, and loads every snapshot in it.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::Storage(format!("create {}: {e}", dir.display())))?;

        let inner = MemoryStore::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| PipelineError::Storage(format!("read {}: {e}", dir.display())))?;
        let mut loaded = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| PipelineError::Storage(format!("read {}: {e}", path.display())))?;
            match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) => {
                    inner.restore(snapshot.run, snapshot.steps).await;
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable run snapshot");
                }
            }
        }
        tracing::info!(dir = %dir.display(), runs = loaded, "Run store opened");

        Ok(Self { dir, inner })
    }

    fn path_for(&self, id: RunId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn persist(&self, id: RunId) -> Result<()> {
        let snapshot = Snapshot {
            run: self.inner.get(id).await?,
            steps: self.inner.steps(id).await?,
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| PipelineError::Storage(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| PipelineError::Storage(format!("rename {}: {e}", path.display())))
    }
}

#[async_trait]
impl RunStore for FileStore {
    async fn insert(&self, run: &Run) -> Result<()> {
        self.inner.insert(run).await?;
        self.persist(run.id).await
    }

    async fn get(&self, id: RunId) -> Result<Run> {
        self.inner.get(id).await
    }

    async fn save(&self, run: &Run) -> Result<()> {
        self.inner.save(run).await?;
        self.persist(run.id).await
    }

    async fn list(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        self.inner.list(filter).await
    }
}

#[async_trait]
impl HistoryStore for FileStore {
    async fn enter(
        &self,
        run_id: RunId,
        stage: Stage,
        status: StepStatus,
    ) -> Result<StepHistoryEntry> {
        let row = self.inner.enter(run_id, stage, status).await?;
        self.persist(run_id).await?;
        Ok(row)
    }

    async fn set_status(
        &self,
        run_id: RunId,
        stage: Stage,
        status: StepStatus,
        error_message: Option<String>,
    ) -> Result<StepHistoryEntry> {
        let row = self.inner.set_status(run_id, stage, status, error_message).await?;
        self.persist(run_id).await?;
        Ok(row)
    }

    async fn steps(&self, run_id: RunId) -> Result<Vec<StepHistoryEntry>> {
        self.inner.steps(run_id).await
    }

    async fn running_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<StepHistoryEntry>> {
        self.inner.running_before(cutoff).await
    }
}
