//! Per-run mutual exclusion
//!
//! Every mutation of a run (stage advancement, gate decisions, cancel,
//! retry, stale recovery) happens while holding that run's guard. A slot
//! lives only while some caller holds or waits on it; the last guard to
//! drop removes it.
use crate::data_model::RunId;
use crate::error::{PipelineError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;
type Slots = Arc<Mutex<HashMap<RunId, Slot>>>;

/// Held lock on one run. Dropping it releases the run and prunes the slot
/// when nobody else is waiting.
#[derive(Debug)]
pub struct RunGuard {
    run_id: RunId,
    inner: Option<OwnedMutexGuard<()>>,
    slots: Slots,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        drop(self.inner.take());
        prune(&self.slots, self.run_id);
    }
}

fn prune(slots: &Slots, run_id: RunId) {
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(slot) = slots.get(&run_id) {
        if Arc::strong_count(slot) == 1 {
            slots.remove(&run_id);
        }
    }
}

#[derive(Default)]
pub struct RunLocks {
    slots: Slots,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, run_id: RunId) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(run_id).or_default().clone()
    }

    fn guard(&self, run_id: RunId, inner: OwnedMutexGuard<()>) -> RunGuard {
        RunGuard {
            run_id,
            inner: Some(inner),
            slots: self.slots.clone(),
        }
    }

    /// Waits as long as it takes. Used by workers.
    pub async fn acquire(&self, run_id: RunId) -> RunGuard {
        let inner = self.slot(run_id).lock_owned().await;
        tracing::debug!(%run_id, "Run lock acquired");
        self.guard(run_id, inner)
    }

    /// Waits up to `wait`, then reports contention.
    pub async fn acquire_within(&self, run_id: RunId, wait: Duration) -> Result<RunGuard> {
        let slot = self.slot(run_id);
        match tokio::time::timeout(wait, slot.lock_owned()).await {
            Ok(inner) => Ok(self.guard(run_id, inner)),
            Err(_) => {
                tracing::debug!(%run_id, "Run lock contended");
                prune(&self.slots, run_id);
                Err(PipelineError::LockContention(run_id))
            }
        }
    }

    pub fn try_acquire(&self, run_id: RunId) -> Result<RunGuard> {
        let slot = self.slot(run_id);
        match slot.try_lock_owned() {
            Ok(inner) => Ok(self.guard(run_id, inner)),
            Err(_) => {
                prune(&self.slots, run_id);
                Err(PipelineError::LockContention(run_id))
            }
        }
    }

    /// Runs that currently have a slot, held or awaited.
    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
