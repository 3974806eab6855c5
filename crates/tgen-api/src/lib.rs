//! TGEN API: REST endpoints
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use metrics::Metrics;
use std::path::PathBuf;
use std::sync::Arc;
use tgen_core::{FileStore, HistoryStore, MemoryStore, Orchestrator, OrchestratorConfig, RunStore};
use tgen_dispatch::PipelineService;
use tgen_stages::reference_collaborators;
use tower_http::trace::TraceLayer;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PipelineService>,
    pub metrics: Arc<Metrics>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/runs", post(handlers::submit_run).get(handlers::list_runs))
        .route("/runs/{id}", get(handlers::get_run))
        .route("/runs/{id}/steps", get(handlers::get_steps))
        .route("/runs/{id}/approve-test-cases", post(handlers::approve_test_cases))
        .route("/runs/{id}/reject-test-cases", post(handlers::reject_test_cases))
        .route("/runs/{id}/approve-report", post(handlers::approve_report))
        .route("/runs/{id}/reject-report", post(handlers::reject_report))
        .route("/runs/{id}/cancel", post(handlers::cancel_run))
        .route("/runs/{id}/retry", post(handlers::retry_run))
        .route("/runs/{id}/resubmit", post(handlers::resubmit_run))
        .route("/runs/{id}/dispatch", post(handlers::dispatch_run))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(axum::middleware::from_fn_with_state(
            state.metrics.clone(),
            middleware::track_requests,
        ))
        .layer(middleware::cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wires stores, reference collaborators, metrics and the worker pool,
/// then re-queues whatever a previous process left unfinished.
pub async fn build_state(config: OrchestratorConfig) -> Result<AppState, BoxError> {
    let (runs, history, workdir): (Arc<dyn RunStore>, Arc<dyn HistoryStore>, PathBuf) =
        match &config.store_dir {
            Some(dir) => {
                let store = Arc::new(FileStore::open(dir).await?);
                (
                    store.clone() as Arc<dyn RunStore>,
                    store as Arc<dyn HistoryStore>,
                    dir.join("checkouts"),
                )
            }
            None => {
                let store = Arc::new(MemoryStore::new());
                (
                    store.clone() as Arc<dyn RunStore>,
                    store as Arc<dyn HistoryStore>,
                    std::env::temp_dir().join("tgen"),
                )
            }
        };

    let metrics = Arc::new(Metrics::new()?);
    let orchestrator = Orchestrator::new(runs, history, reference_collaborators(workdir), config)
        .with_observer(metrics.clone());

    let service = PipelineService::start(Arc::new(orchestrator));
    service.resume().await?;

    Ok(AppState {
        service: Arc::new(service),
        metrics,
    })
}

pub async fn run(config: OrchestratorConfig) -> Result<(), BoxError> {
    let addr = config.listen_addr.clone();
    let state = build_state(config).await?;
    let service = state.service.clone();

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("TGEN API listening on {}", addr);
    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    service.shutdown().await;
    Ok(())
}
