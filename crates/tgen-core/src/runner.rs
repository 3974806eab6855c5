//! Pipeline Runner: Conduz um Run pelos estágios automáticos até um gate ou estado terminal
//!
//! `drive` holds the run lock for the whole automatic chain. It returns
//! once the run is suspended at a gate, finished, or failed. Each stage:
//!
//! 1. marks its step row `running`
//! 2. calls its collaborator under the stage timeout
//! 3. on success merges the output, completes the row and enters the
//!    next stage in the same save
//! 4. on failure (or timeout) fails the row and the run, and stops
use crate::collaborators::{CollaboratorError, Collaborators, Notification, NotificationKind};
use crate::config::OrchestratorConfig;
use crate::context::StageContext;
use crate::data_model::{
    Checkout, ExecutionOutcome, MergeRequest, Report, Run, RunId, RunMode, TestCase,
};
use crate::error::{PipelineError, Result};
use crate::history::{HistoryStore, StepHistoryEntry, StepStatus};
use crate::locks::RunLocks;
use crate::observer::{NoopObserver, PipelineObserver};
use crate::stage::Stage;
use crate::store::{RunFilter, RunStore};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TIMEOUT_MESSAGE: &str = "timeout";
pub const CANCELLED_MESSAGE: &str = "cancelled";
pub const STALE_MESSAGE: &str = "stale: worker lost";

/// What a collaborator produced for one stage.
enum StageOutput {
    Checkout(Checkout),
    Proposals(Vec<TestCase>),
    Scripts(serde_json::Value),
    MergeRequest(MergeRequest),
    NewBranch(Checkout),
    Execution(ExecutionOutcome),
    Report(Report),
}

impl StageOutput {
    fn apply(self, run: &mut Run) {
        match self {
            Self::Checkout(checkout) => run.checkout = Some(checkout),
            Self::Proposals(proposals) => {
                run.proposals = proposals;
                run.approved_test_case_ids.clear();
            }
            Self::Scripts(scripts) => {
                let bytes = serde_json::to_vec(&scripts).unwrap_or_default();
                run.scripts_digest = Some(format!("blake3:{}", blake3::hash(&bytes)));
                run.scripts = Some(scripts);
            }
            Self::MergeRequest(mr) => run.merge_request = Some(mr),
            Self::NewBranch(checkout) => run.new_branch_checkout = Some(checkout),
            Self::Execution(outcome) => {
                run.test_results = outcome.results;
                run.coverage = outcome.coverage;
            }
            Self::Report(report) => run.report = Some(report),
        }
    }
}

fn require<'a, T>(value: Option<&'a T>, what: &str) -> std::result::Result<&'a T, CollaboratorError> {
    value.ok_or_else(|| CollaboratorError::new(format!("no {what} available")))
}

pub struct Orchestrator {
    runs: Arc<dyn RunStore>,
    history: Arc<dyn HistoryStore>,
    collaborators: Collaborators,
    locks: RunLocks,
    observer: Arc<dyn PipelineObserver>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        runs: Arc<dyn RunStore>,
        history: Arc<dyn HistoryStore>,
        collaborators: Collaborators,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            runs,
            history,
            collaborators,
            locks: RunLocks::new(),
            observer: Arc::new(NoopObserver),
            config,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs with a live lock slot, i.e. held or awaited right now.
    pub fn tracked_locks(&self) -> usize {
        self.locks.tracked()
    }

    pub(crate) fn locks(&self) -> &RunLocks {
        &self.locks
    }

    pub(crate) fn observer(&self) -> &dyn PipelineObserver {
        self.observer.as_ref()
    }

    pub(crate) fn history(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }

    pub(crate) fn runs(&self) -> &dyn RunStore {
        self.runs.as_ref()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get(&self, run_id: RunId) -> Result<Run> {
        self.runs.get(run_id).await
    }

    pub async fn steps(&self, run_id: RunId) -> Result<Vec<StepHistoryEntry>> {
        self.runs.get(run_id).await?;
        self.history.steps(run_id).await
    }

    pub async fn list(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        self.runs.list(filter).await
    }

    /// Runs a worker should pick up after a restart or a lost hand-off:
    /// manual runs still `queued`, and runs parked in an automatic stage
    /// whose step is not `running`. Running steps belong to stale
    /// recovery. Oldest first.
    pub async fn resumable(&self) -> Result<Vec<Run>> {
        let mut resumable = Vec::new();
        for run in self.runs.list(&RunFilter::default()).await? {
            let stage = run.state;
            if stage.is_terminal() || stage.is_gate() {
                continue;
            }
            if stage == Stage::Queued {
                if run.mode == RunMode::Manual {
                    resumable.push(run);
                }
                continue;
            }
            let running = self
                .history
                .steps(run.id)
                .await?
                .iter()
                .any(|row| row.step_name == stage && row.status == StepStatus::Running);
            if !running {
                resumable.push(run);
            }
        }
        resumable.reverse();
        Ok(resumable)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Persists a new run in `queued`, with its `queued` step already
    /// completed.
    pub async fn create_run(
        &self,
        project_id: &str,
        branch: &str,
        mode: RunMode,
        resubmitted_from: Option<RunId>,
    ) -> Result<Run> {
        let (project_id, branch) = (project_id.trim(), branch.trim());
        if project_id.is_empty() {
            return Err(PipelineError::Validation("projectId must not be empty".into()));
        }
        if branch.is_empty() {
            return Err(PipelineError::Validation("branch must not be empty".into()));
        }

        let mut run = Run::new(project_id, branch, mode);
        run.resubmitted_from = resubmitted_from;
        self.runs.insert(&run).await?;
        self.history
            .enter(run.id, Stage::Queued, StepStatus::Completed)
            .await?;

        tracing::info!(run_id = %run.id, project_id, branch, ?mode, "Run queued");
        self.observer.run_submitted(&run);
        Ok(run)
    }

    /// Advances a run through automatic stages until it suspends.
    ///
    /// Calling this on a run parked at a gate or already terminal is a
    /// no-op that returns the run unchanged.
    pub async fn drive(&self, run_id: RunId) -> Result<Run> {
        let _guard = self.locks.acquire(run_id).await;
        self.advance_locked(run_id).await
    }

    async fn advance_locked(&self, run_id: RunId) -> Result<Run> {
        let mut run = self.runs.get(run_id).await?;
        loop {
            let stage = run.state;
            if stage.is_terminal() || stage.is_gate() {
                return Ok(run);
            }
            if stage == Stage::Queued {
                self.enter_next(&mut run, Stage::PullingCode).await?;
                continue;
            }

            self.execute_stage(&mut run, stage).await?;

            let next = stage.next().ok_or(PipelineError::IllegalTransition {
                from: stage,
                to: stage,
            })?;
            self.enter_next(&mut run, next).await?;

            match next {
                Stage::TestApproval => {
                    self.notify(&run, NotificationKind::AwaitingTestApproval).await;
                    return Ok(run);
                }
                Stage::ReportApproval => {
                    self.notify(&run, NotificationKind::AwaitingReportApproval).await;
                    return Ok(run);
                }
                _ => {}
            }
        }
    }

    /// Moves the run one edge forward and records the new stage's row.
    /// Gates and `completed` are recorded as completed on entry.
    pub(crate) async fn enter_next(&self, run: &mut Run, next: Stage) -> Result<()> {
        run.advance_to(next)?;
        let status = if next.is_gate() || next.is_terminal() {
            StepStatus::Completed
        } else {
            StepStatus::Pending
        };
        self.history.enter(run.id, next, status).await?;
        self.runs.save(run).await?;
        tracing::info!(run_id = %run.id, stage = %next, "Stage entered");
        Ok(())
    }

    async fn execute_stage(&self, run: &mut Run, stage: Stage) -> Result<()> {
        let row = self
            .history
            .set_status(run.id, stage, StepStatus::Running, None)
            .await?;

        let mut ctx = StageContext::for_run(run, stage, row.attempt);
        if let Some(digest) = &run.scripts_digest {
            ctx = ctx.with_metadata("scriptsDigest", serde_json::json!(digest));
        }

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.config.stage_timeout(stage), self.invoke(run, &ctx)).await;

        let message = match outcome {
            Ok(Ok(output)) => {
                output.apply(run);
                self.history
                    .set_status(run.id, stage, StepStatus::Completed, None)
                    .await?;
                tracing::info!(
                    run_id = %run.id,
                    stage = %stage,
                    attempt = row.attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Stage completed"
                );
                return Ok(());
            }
            Ok(Err(e)) => e.0,
            Err(_) => TIMEOUT_MESSAGE.to_string(),
        };
        self.fail_stage(run, stage, message).await
    }

    async fn fail_stage(&self, run: &mut Run, stage: Stage, message: String) -> Result<()> {
        tracing::warn!(run_id = %run.id, stage = %stage, error = %message, "Stage failed");
        self.history
            .set_status(run.id, stage, StepStatus::Failed, Some(message.clone()))
            .await?;
        run.fail(message.clone(), Some(stage))?;
        self.runs.save(run).await?;

        self.observer.stage_failed(stage, &message);
        self.notify(run, NotificationKind::Failed).await;
        Err(PipelineError::StageExecution { stage, message })
    }

    async fn invoke(
        &self,
        run: &Run,
        ctx: &StageContext,
    ) -> std::result::Result<StageOutput, CollaboratorError> {
        let c = &self.collaborators;
        match ctx.stage {
            Stage::PullingCode => c
                .source_control
                .clone_repository(ctx)
                .await
                .map(StageOutput::Checkout),
            Stage::GeneratingTests => {
                let checkout = require(run.checkout.as_ref(), "checkout")?;
                let proposals = c.generator.propose(ctx, checkout).await?;
                if proposals.is_empty() {
                    return Err(CollaboratorError::new("generator returned no test cases"));
                }
                let mut seen = HashSet::new();
                if let Some(dup) = proposals.iter().find(|p| !seen.insert(p.id.as_str())) {
                    return Err(CollaboratorError::new(format!(
                        "generator returned duplicate test case id '{}'",
                        dup.id
                    )));
                }
                Ok(StageOutput::Proposals(proposals))
            }
            Stage::GeneratingScripts => {
                let approved = run.approved_cases();
                c.compiler
                    .compile(ctx, &approved)
                    .await
                    .map(StageOutput::Scripts)
            }
            Stage::CreateMr => {
                let scripts = require(run.scripts.as_ref(), "compiled scripts")?;
                c.source_control
                    .create_merge_request(ctx, scripts)
                    .await
                    .map(StageOutput::MergeRequest)
            }
            Stage::PullNewBranch => {
                let mr = require(run.merge_request.as_ref(), "merge request")?;
                c.source_control
                    .pull_branch(ctx, &mr.source_branch)
                    .await
                    .map(StageOutput::NewBranch)
            }
            Stage::RunTest => {
                let checkout = require(
                    run.new_branch_checkout.as_ref().or(run.checkout.as_ref()),
                    "checkout",
                )?;
                let scripts = require(run.scripts.as_ref(), "compiled scripts")?;
                let outcome = c.executor.execute(ctx, checkout, scripts).await?;
                if let Some(coverage) = outcome.coverage {
                    if !(0.0..=1.0).contains(&coverage) {
                        return Err(CollaboratorError::new(format!(
                            "coverage {coverage} outside [0, 1]"
                        )));
                    }
                }
                Ok(StageOutput::Execution(outcome))
            }
            Stage::GeneratingReport => c.reporter.generate(ctx, run).await.map(StageOutput::Report),
            other => Err(CollaboratorError::new(format!(
                "{other} does not call a collaborator"
            ))),
        }
    }

    pub(crate) async fn notify(&self, run: &Run, kind: NotificationKind) {
        let message = match kind {
            NotificationKind::AwaitingTestApproval => format!(
                "{} test cases proposed for {}@{}, awaiting approval",
                run.proposals.len(),
                run.project_id,
                run.branch
            ),
            NotificationKind::AwaitingReportApproval => format!(
                "report ready for {}@{}, awaiting approval",
                run.project_id, run.branch
            ),
            NotificationKind::Completed => {
                format!("run completed for {}@{}", run.project_id, run.branch)
            }
            NotificationKind::Failed => format!(
                "run failed for {}@{}: {}",
                run.project_id,
                run.branch,
                run.error_message.as_deref().unwrap_or("unknown error")
            ),
        };
        let notification = Notification {
            run_id: run.id,
            project_id: run.project_id.clone(),
            branch: run.branch.clone(),
            kind,
            message,
        };

        let bound = Duration::from_secs(self.config.stage_timeout_secs);
        match tokio::time::timeout(bound, self.collaborators.notifier.notify(&notification)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(run_id = %run.id, ?kind, error = %e, "Notification failed")
            }
            Err(_) => tracing::warn!(run_id = %run.id, ?kind, "Notification timed out"),
        }
    }

    // ------------------------------------------------------------------
    // External actions
    // ------------------------------------------------------------------

    /// Fails a non-terminal run with "cancelled". Shares the run lock with
    /// stage advancement, so it waits for an in-flight chain at most
    /// `lock_wait` before reporting contention.
    pub async fn cancel(&self, run_id: RunId) -> Result<Run> {
        let _guard = self
            .locks
            .acquire_within(run_id, self.config.lock_wait())
            .await?;
        let mut run = self.runs.get(run_id).await?;
        if run.is_terminal() {
            return Err(PipelineError::conflict(run_id, "a non-terminal state", run.state));
        }

        let stage = run.state;
        if stage != Stage::Queued {
            self.history
                .set_status(run_id, stage, StepStatus::Failed, Some(CANCELLED_MESSAGE.into()))
                .await?;
        }
        run.fail(CANCELLED_MESSAGE, None)?;
        self.runs.save(&run).await?;

        tracing::info!(%run_id, stage = %stage, "Run cancelled");
        self.notify(&run, NotificationKind::Failed).await;
        Ok(run)
    }

    /// Re-enters the stage a run failed in. The stage's step row is reset
    /// (attempt + 1); the caller dispatches the run again.
    pub async fn retry(&self, run_id: RunId) -> Result<Run> {
        let _guard = self
            .locks
            .acquire_within(run_id, self.config.lock_wait())
            .await?;
        let mut run = self.runs.get(run_id).await?;
        let stage = run.reenter()?;
        let row = self.history.enter(run_id, stage, StepStatus::Pending).await?;
        self.runs.save(&run).await?;

        tracing::info!(%run_id, stage = %stage, attempt = row.attempt, "Run retried from stage");
        Ok(run)
    }

    /// Queues a fresh run for the same project/branch/mode as a terminal
    /// one. The source run is left untouched.
    pub async fn resubmit(&self, run_id: RunId) -> Result<Run> {
        let source = self.runs.get(run_id).await?;
        if !source.is_terminal() {
            return Err(PipelineError::conflict(run_id, "a terminal state", source.state));
        }
        self.create_run(&source.project_id, &source.branch, source.mode, Some(source.id))
            .await
    }

    /// Fails step rows left `running` for longer than `stale_after` by a
    /// worker that is gone. Rows whose run lock is still held belong to a
    /// live worker and are skipped.
    pub async fn recover_stale(&self, stale_after: Duration) -> Result<Vec<RunId>> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let rows = self.history.running_before(Utc::now() - stale_after).await?;

        let mut recovered = Vec::new();
        for row in rows {
            let Ok(_guard) = self.locks.try_acquire(row.run_id) else {
                tracing::debug!(run_id = %row.run_id, stage = %row.step_name, "Running step still owned");
                continue;
            };
            let mut run = match self.runs.get(row.run_id).await {
                Ok(run) => run,
                Err(e) => {
                    tracing::warn!(
                        run_id = %row.run_id,
                        error = %e,
                        "Skipping step of unreadable run"
                    );
                    continue;
                }
            };
            self.history
                .set_status(
                    row.run_id,
                    row.step_name,
                    StepStatus::Failed,
                    Some(STALE_MESSAGE.into()),
                )
                .await?;
            if run.state != row.step_name || run.is_terminal() {
                continue;
            }

            run.fail(STALE_MESSAGE, Some(row.step_name))?;
            self.runs.save(&run).await?;
            tracing::warn!(run_id = %run.id, stage = %row.step_name, "Stale step recovered");
            self.observer.stage_failed(row.step_name, STALE_MESSAGE);
            self.notify(&run, NotificationKind::Failed).await;
            recovered.push(run.id);
        }
        Ok(recovered)
    }
}
