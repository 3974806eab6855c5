//! End-to-end runs through the service, worker pool included.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tgen_core::{
    Checkout, CollaboratorResult, ExecutionOutcome, MemoryStore, MergeRequest, Orchestrator,
    OrchestratorConfig, PipelineError, Run, RunFilter, RunId, RunMode, SourceControlClient,
    Stage, StageContext, StepStatus, TestExecutor, TestResult,
};
use tgen_dispatch::PipelineService;
use tgen_stages::{reference_collaborators, SimulatedSourceControl};
use tokio::sync::Notify;

/// Hangs on the first call, answers afterwards.
struct FlakyExecutor {
    hung: AtomicBool,
}

#[async_trait]
impl TestExecutor for FlakyExecutor {
    async fn execute(
        &self,
        _ctx: &StageContext,
        _checkout: &Checkout,
        _scripts: &serde_json::Value,
    ) -> CollaboratorResult<ExecutionOutcome> {
        if !self.hung.swap(true, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(ExecutionOutcome {
            results: vec![TestResult {
                case_id: "tc-1".into(),
                passed: true,
                duration_ms: 1,
                message: None,
            }],
            coverage: Some(0.9),
        })
    }
}

fn service_with(config: OrchestratorConfig, flaky: bool) -> PipelineService {
    let store = Arc::new(MemoryStore::new());
    let mut collaborators = reference_collaborators("/work");
    if flaky {
        collaborators.executor = Arc::new(FlakyExecutor {
            hung: AtomicBool::new(false),
        });
    }
    let orchestrator = Orchestrator::new(store.clone(), store, collaborators, config);
    PipelineService::start(Arc::new(orchestrator))
}

fn service() -> PipelineService {
    service_with(OrchestratorConfig::default(), false)
}

async fn wait_for(service: &PipelineService, run_id: RunId, state: Stage) -> Run {
    for _ in 0..500 {
        let run = service.get(run_id).await.unwrap();
        if run.state == state {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never reached {state}");
}

// ============================================================================
// Manual flow
// ============================================================================

#[tokio::test]
async fn test_manual_run_to_completion() {
    let service = service();
    let run = service.submit("shop", "main", RunMode::Manual).await.unwrap();
    assert_eq!(run.state, Stage::Queued);

    let run = wait_for(&service, run.id, Stage::TestApproval).await;
    service
        .approve_test_cases(run.id, &["tc-1".into(), "tc-2".into()])
        .await
        .unwrap();

    let run = wait_for(&service, run.id, Stage::ReportApproval).await;
    assert!(run.report.is_some());

    let run = service.approve_report(run.id).await.unwrap();
    assert_eq!(run.state, Stage::Completed);

    let steps = service.steps(run.id).await.unwrap();
    assert_eq!(steps.len(), 11);
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));

    service.shutdown().await;
}

#[tokio::test]
async fn test_report_rejection_fails_run() {
    let service = service();
    let run = service.submit("shop", "main", RunMode::Manual).await.unwrap();
    wait_for(&service, run.id, Stage::TestApproval).await;
    service.approve_test_cases(run.id, &["tc-1".into()]).await.unwrap();
    wait_for(&service, run.id, Stage::ReportApproval).await;

    let run = service.reject_report(run.id).await.unwrap();
    assert_eq!(run.state, Stage::Failed);
    assert_eq!(run.error_message.as_deref(), Some("report rejected by user"));

    let err = service.retry(run.id).await.unwrap_err();
    assert_eq!(err.kind(), "StateConflict");
    service.shutdown().await;
}

// ============================================================================
// Automatic mode and dispatch
// ============================================================================

#[tokio::test]
async fn test_automatic_run_waits_for_dispatch() {
    let service = service();
    let run = service.submit("shop", "main", RunMode::Automatic).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.get(run.id).await.unwrap().state, Stage::Queued);

    service.dispatch(run.id).await.unwrap();
    wait_for(&service, run.id, Stage::TestApproval).await;

    let err = service.dispatch(run.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::StateConflict { actual: Stage::TestApproval, .. }));

    let queued = service
        .list(&RunFilter {
            state: Some(Stage::TestApproval),
            project_id: None,
        })
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn test_resubmit_starts_a_new_manual_run() {
    let service = service();
    let run = service.submit("shop", "main", RunMode::Manual).await.unwrap();
    wait_for(&service, run.id, Stage::TestApproval).await;
    service.reject_test_cases(run.id).await.unwrap();

    let fresh = service.resubmit(run.id).await.unwrap();
    assert_ne!(fresh.id, run.id);
    assert_eq!(fresh.resubmitted_from, Some(run.id));
    wait_for(&service, fresh.id, Stage::TestApproval).await;
    assert_eq!(service.get(run.id).await.unwrap().state, Stage::Failed);
    service.shutdown().await;
}

// ============================================================================
// Timeouts and retry
// ============================================================================

#[tokio::test]
async fn test_timeout_then_retry() {
    let mut config = OrchestratorConfig::default();
    config.stage_timeouts.insert(Stage::RunTest, 1);
    let service = service_with(config, true);

    let run = service.submit("shop", "main", RunMode::Manual).await.unwrap();
    wait_for(&service, run.id, Stage::TestApproval).await;
    service.approve_test_cases(run.id, &["tc-1".into()]).await.unwrap();

    let failed = wait_for(&service, run.id, Stage::Failed).await;
    assert_eq!(failed.error_message.as_deref(), Some("timeout"));
    assert_eq!(failed.failed_stage, Some(Stage::RunTest));

    let retried = service.retry(run.id).await.unwrap();
    assert_eq!(retried.state, Stage::RunTest);

    let run = wait_for(&service, run.id, Stage::ReportApproval).await;
    assert_eq!(run.coverage, Some(0.9));

    let steps = service.steps(run.id).await.unwrap();
    let run_test: Vec<_> = steps.iter().filter(|s| s.step_name == Stage::RunTest).collect();
    assert_eq!(run_test.len(), 1);
    assert_eq!(run_test[0].attempt, 2);
    assert_eq!(run_test[0].status, StepStatus::Completed);
    service.shutdown().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_dispatch_after_shutdown_is_refused() {
    let service = service();
    let run = service.submit("shop", "main", RunMode::Automatic).await.unwrap();
    service.shutdown().await;

    let err = service.dispatch(run.id).await.unwrap_err();
    assert_eq!(err.kind(), "Dispatch");
}

// ============================================================================
// Full queue
// ============================================================================

/// Clones of project "blocker" wait for `release`; everything else passes.
struct BlockingSourceControl {
    inner: SimulatedSourceControl,
    release: Arc<Notify>,
}

#[async_trait]
impl SourceControlClient for BlockingSourceControl {
    async fn clone_repository(&self, ctx: &StageContext) -> CollaboratorResult<Checkout> {
        if ctx.project_id == "blocker" {
            self.release.notified().await;
        }
        self.inner.clone_repository(ctx).await
    }

    async fn create_merge_request(
        &self,
        ctx: &StageContext,
        scripts: &serde_json::Value,
    ) -> CollaboratorResult<MergeRequest> {
        self.inner.create_merge_request(ctx, scripts).await
    }

    async fn pull_branch(&self, ctx: &StageContext, branch: &str) -> CollaboratorResult<Checkout> {
        self.inner.pull_branch(ctx, branch).await
    }
}

fn single_slot_service(release: Arc<Notify>) -> (PipelineService, Arc<Orchestrator>) {
    let config = OrchestratorConfig {
        workers: 1,
        queue_capacity: 1,
        ..OrchestratorConfig::default()
    };
    let store = Arc::new(MemoryStore::new());
    let mut collaborators = reference_collaborators("/work");
    collaborators.source_control = Arc::new(BlockingSourceControl {
        inner: SimulatedSourceControl::new("/work"),
        release,
    });
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), store, collaborators, config));
    (PipelineService::start(orchestrator.clone()), orchestrator)
}

#[tokio::test]
async fn test_approved_run_survives_a_full_queue() {
    let release = Arc::new(Notify::new());
    let (service, _) = single_slot_service(release.clone());

    let run = service.submit("shop", "main", RunMode::Manual).await.unwrap();
    wait_for(&service, run.id, Stage::TestApproval).await;

    // The only worker is stuck, and one more run takes the only slot.
    let blocker = service.submit("blocker", "main", RunMode::Manual).await.unwrap();
    wait_for(&service, blocker.id, Stage::PullingCode).await;
    let filler = service.submit("shop", "dev", RunMode::Automatic).await.unwrap();
    service.dispatch(filler.id).await.unwrap();

    let approved = service.approve_test_cases(run.id, &["tc-1".into()]).await.unwrap();
    assert_eq!(approved.state, Stage::GeneratingScripts);

    let err = service.dispatch(run.id).await.unwrap_err();
    assert_eq!(err.kind(), "Dispatch");

    release.notify_one();
    wait_for(&service, filler.id, Stage::TestApproval).await;

    service.dispatch(run.id).await.unwrap();
    let run = wait_for(&service, run.id, Stage::ReportApproval).await;
    assert!(run.report.is_some());
    service.shutdown().await;
}

#[tokio::test]
async fn test_resume_requeues_unowned_runs() {
    let release = Arc::new(Notify::new());
    let (service, orchestrator) = single_slot_service(release);

    // Created behind the service's back, as if by a previous process.
    let manual = orchestrator
        .create_run("shop", "main", RunMode::Manual, None)
        .await
        .unwrap();
    let automatic = orchestrator
        .create_run("shop", "main", RunMode::Automatic, None)
        .await
        .unwrap();

    let resumed = service.resume().await.unwrap();
    assert_eq!(resumed, vec![manual.id]);

    wait_for(&service, manual.id, Stage::TestApproval).await;
    assert_eq!(service.get(automatic.id).await.unwrap().state, Stage::Queued);
    service.shutdown().await;
}
