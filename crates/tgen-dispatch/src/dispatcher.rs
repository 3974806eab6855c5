//! Dispatcher: bounded queue of run ids feeding a fixed worker pool
use crate::worker::{run_worker, SharedQueue};
use std::sync::{Arc, Mutex};
use tgen_core::error::Result;
use tgen_core::{Orchestrator, PipelineError, RunId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub struct Dispatcher {
    tx: mpsc::Sender<RunId>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawns `workers` tasks sharing one queue of `capacity` slots.
    pub fn spawn(
        orchestrator: Arc<Orchestrator>,
        workers: usize,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue: SharedQueue = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    orchestrator.clone(),
                    queue.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        tracing::info!(workers, capacity, "Dispatcher started");
        Self {
            tx,
            handles: Mutex::new(handles),
        }
    }

    /// Hands a run to the pool without waiting for a free slot.
    pub fn enqueue(&self, run_id: RunId) -> Result<()> {
        self.tx.try_send(run_id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PipelineError::Dispatch(format!("queue full, run {run_id} not dispatched"))
            }
            mpsc::error::TrySendError::Closed(_) => {
                PipelineError::Dispatch("dispatcher is stopped".into())
            }
        })?;
        tracing::debug!(%run_id, "Run enqueued");
        Ok(())
    }

    /// Number of free queue slots.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// Waits for every worker to exit. The shutdown signal must already
    /// have been sent.
    pub async fn join(&self) {
        let handles: Vec<_> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker panicked");
            }
        }
    }
}
