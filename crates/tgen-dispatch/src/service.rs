//! Pipeline Service: the surface the API talks to
//!
//! Wraps the orchestrator with the dispatcher so that every action which
//! leaves a run in an automatic stage also hands it back to the pool.
use crate::dispatcher::Dispatcher;
use crate::recovery::spawn_recovery;
use std::sync::{Arc, Mutex};
use tgen_core::error::Result;
use tgen_core::{
    Orchestrator, PipelineError, Run, RunFilter, RunId, RunMode, StepHistoryEntry,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct PipelineService {
    orchestrator: Arc<Orchestrator>,
    dispatcher: Dispatcher,
    shutdown: watch::Sender<bool>,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineService {
    /// Starts the worker pool and the recovery sweeper, sized from the
    /// orchestrator's configuration. Must be called inside a tokio runtime.
    pub fn start(orchestrator: Arc<Orchestrator>) -> Self {
        let config = orchestrator.config().clone();
        let (shutdown, signal) = watch::channel(false);

        let dispatcher = Dispatcher::spawn(
            orchestrator.clone(),
            config.workers,
            config.queue_capacity,
            signal.clone(),
        );
        let recovery = spawn_recovery(
            orchestrator.clone(),
            config.recovery_interval(),
            config.stale_after(),
            signal,
        );

        Self {
            orchestrator,
            dispatcher,
            shutdown,
            recovery: Mutex::new(Some(recovery)),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Queue hand-off for internal transitions. A full queue leaves the run
    /// where it is; `dispatch` or `resume` picks it up later.
    fn hand_off(&self, run: &Run) {
        if let Err(e) = self.dispatcher.enqueue(run.id) {
            tracing::warn!(run_id = %run.id, state = %run.state, error = %e, "Hand-off failed");
        }
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Creates a run. Manual runs start at once; automatic ones wait in
    /// `queued` for `dispatch`.
    pub async fn submit(&self, project_id: &str, branch: &str, mode: RunMode) -> Result<Run> {
        let run = self
            .orchestrator
            .create_run(project_id, branch, mode, None)
            .await?;
        if mode == RunMode::Manual {
            self.hand_off(&run);
        }
        Ok(run)
    }

    /// Hands a run sitting in `queued` or an automatic stage to the pool.
    /// Runs at a gate or already finished are a conflict.
    pub async fn dispatch(&self, run_id: RunId) -> Result<Run> {
        let run = self.orchestrator.get(run_id).await?;
        if run.state.is_gate() || run.is_terminal() {
            return Err(PipelineError::conflict(
                run_id,
                "queued or an automatic stage",
                run.state,
            ));
        }
        self.dispatcher.enqueue(run_id)?;
        Ok(run)
    }

    /// Re-queues runs that no worker owns: what a previous process left
    /// behind, or a hand-off lost to a full queue.
    pub async fn resume(&self) -> Result<Vec<RunId>> {
        let mut resumed = Vec::new();
        for run in self.orchestrator.resumable().await? {
            match self.dispatcher.enqueue(run.id) {
                Ok(()) => resumed.push(run.id),
                Err(e) => {
                    tracing::warn!(run_id = %run.id, error = %e, "Resume stopped");
                    break;
                }
            }
        }
        if !resumed.is_empty() {
            tracing::info!(count = resumed.len(), "Runs resumed");
        }
        Ok(resumed)
    }

    pub async fn resubmit(&self, run_id: RunId) -> Result<Run> {
        let run = self.orchestrator.resubmit(run_id).await?;
        if run.mode == RunMode::Manual {
            self.hand_off(&run);
        }
        Ok(run)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get(&self, run_id: RunId) -> Result<Run> {
        self.orchestrator.get(run_id).await
    }

    pub async fn steps(&self, run_id: RunId) -> Result<Vec<StepHistoryEntry>> {
        self.orchestrator.steps(run_id).await
    }

    pub async fn list(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        self.orchestrator.list(filter).await
    }

    // ------------------------------------------------------------------
    // Gates and actions
    // ------------------------------------------------------------------

    pub async fn approve_test_cases(&self, run_id: RunId, approved_ids: &[String]) -> Result<Run> {
        let run = self
            .orchestrator
            .approve_test_cases(run_id, approved_ids)
            .await?;
        self.hand_off(&run);
        Ok(run)
    }

    pub async fn reject_test_cases(&self, run_id: RunId) -> Result<Run> {
        self.orchestrator.reject_test_cases(run_id).await
    }

    pub async fn approve_report(&self, run_id: RunId) -> Result<Run> {
        self.orchestrator.approve_report(run_id).await
    }

    pub async fn reject_report(&self, run_id: RunId) -> Result<Run> {
        self.orchestrator.reject_report(run_id).await
    }

    pub async fn cancel(&self, run_id: RunId) -> Result<Run> {
        self.orchestrator.cancel(run_id).await
    }

    pub async fn retry(&self, run_id: RunId) -> Result<Run> {
        let run = self.orchestrator.retry(run_id).await?;
        self.hand_off(&run);
        Ok(run)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stops accepting queue items, lets in-flight drives finish and waits
    /// for the workers and the sweeper.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.dispatcher.join().await;

        let recovery = self
            .recovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = recovery {
            let _ = handle.await;
        }
        tracing::info!("Pipeline service stopped");
    }
}
