use std::sync::Arc;
use std::time::Duration;
use tgen_core::Orchestrator;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodically fails `running` steps abandoned by a lost worker.
pub fn spawn_recovery(
    orchestrator: Arc<Orchestrator>,
    every: Duration,
    stale_after: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            match orchestrator.recover_stale(stale_after).await {
                Ok(recovered) if !recovered.is_empty() => {
                    tracing::warn!(count = recovered.len(), "Recovered stale runs")
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Stale recovery sweep failed"),
            }
        }
        tracing::debug!("Recovery sweeper stopped");
    })
}
