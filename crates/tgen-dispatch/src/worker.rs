use std::sync::Arc;
use tgen_core::{Orchestrator, PipelineError, RunId};
use tokio::sync::{mpsc, watch, Mutex};

pub(crate) type SharedQueue = Arc<Mutex<mpsc::Receiver<RunId>>>;

/// Pulls run ids off the shared queue and drives each one until it
/// suspends. A drive in progress always finishes before shutdown is seen.
pub(crate) async fn run_worker(
    worker: usize,
    orchestrator: Arc<Orchestrator>,
    queue: SharedQueue,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker, "Worker started");
    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            run_id = async { queue.lock().await.recv().await } => run_id,
        };
        let Some(run_id) = next else { break };

        match orchestrator.drive(run_id).await {
            Ok(run) => {
                tracing::debug!(worker, %run_id, state = %run.state, "Run suspended")
            }
            // already persisted on the run
            Err(PipelineError::StageExecution { stage, .. }) => {
                tracing::debug!(worker, %run_id, %stage, "Run stopped on stage failure")
            }
            Err(e) => tracing::error!(worker, %run_id, error = %e, "Drive failed"),
        }
    }
    tracing::debug!(worker, "Worker stopped");
}
