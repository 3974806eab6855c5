//! Approval Gate: human decisions that unblock a suspended run
//!
//! Each call is one read-modify-write of a single run under its lock,
//! guarded by the current-state check. A call against any other state is
//! a `StateConflict` and changes nothing.
use crate::collaborators::NotificationKind;
use crate::data_model::{Run, RunId};
use crate::error::{PipelineError, Result};
use crate::history::StepStatus;
use crate::locks::RunGuard;
use crate::runner::Orchestrator;
use crate::stage::Stage;
use std::collections::BTreeSet;

pub const TEST_CASES_REJECTED: &str = "rejected by user";
pub const REPORT_REJECTED: &str = "report rejected by user";

/// Checks an approval payload: non-empty and fully contained in the
/// proposals. All or nothing.
pub fn validate_selection(run: &Run, approved_ids: &[String]) -> Result<BTreeSet<String>> {
    if approved_ids.is_empty() {
        return Err(PipelineError::InvalidSelection(
            "at least one test case must be approved".into(),
        ));
    }
    let known = run.proposal_ids();
    let unknown: BTreeSet<&str> = approved_ids
        .iter()
        .map(String::as_str)
        .filter(|id| !known.contains(id))
        .collect();
    if !unknown.is_empty() {
        let listed: Vec<&str> = unknown.into_iter().collect();
        return Err(PipelineError::InvalidSelection(format!(
            "unknown test case ids: {}",
            listed.join(", ")
        )));
    }
    Ok(approved_ids.iter().cloned().collect())
}

impl Orchestrator {
    async fn lock_at_gate(&self, run_id: RunId, gate: Stage) -> Result<(RunGuard, Run)> {
        let guard = self
            .locks()
            .acquire_within(run_id, self.config().lock_wait())
            .await?;
        let run = self.runs().get(run_id).await?;
        if run.state != gate {
            return Err(PipelineError::conflict(run_id, gate.as_str(), run.state));
        }
        Ok((guard, run))
    }

    async fn reject_at_gate(&self, run_id: RunId, gate: Stage, reason: &str) -> Result<Run> {
        let (_guard, mut run) = self.lock_at_gate(run_id, gate).await?;
        self.history()
            .set_status(run_id, gate, StepStatus::Failed, Some(reason.to_string()))
            .await?;
        run.fail(reason, None)?;
        self.runs().save(&run).await?;

        tracing::info!(%run_id, gate = %gate, "Gate rejected");
        self.observer().gate_decision(gate, false);
        self.notify(&run, NotificationKind::Failed).await;
        Ok(run)
    }

    /// Records the selection and moves the run to `generating_scripts`.
    /// The caller is responsible for dispatching it again.
    pub async fn approve_test_cases(&self, run_id: RunId, approved_ids: &[String]) -> Result<Run> {
        let (_guard, mut run) = self.lock_at_gate(run_id, Stage::TestApproval).await?;
        run.approved_test_case_ids = validate_selection(&run, approved_ids)?;
        self.enter_next(&mut run, Stage::GeneratingScripts).await?;

        tracing::info!(
            %run_id,
            approved = run.approved_test_case_ids.len(),
            proposed = run.proposals.len(),
            "Test cases approved"
        );
        self.observer().gate_decision(Stage::TestApproval, true);
        Ok(run)
    }

    pub async fn reject_test_cases(&self, run_id: RunId) -> Result<Run> {
        self.reject_at_gate(run_id, Stage::TestApproval, TEST_CASES_REJECTED)
            .await
    }

    pub async fn approve_report(&self, run_id: RunId) -> Result<Run> {
        let (_guard, mut run) = self.lock_at_gate(run_id, Stage::ReportApproval).await?;
        self.enter_next(&mut run, Stage::Completed).await?;

        tracing::info!(%run_id, "Report approved");
        self.observer().gate_decision(Stage::ReportApproval, true);
        self.notify(&run, NotificationKind::Completed).await;
        Ok(run)
    }

    pub async fn reject_report(&self, run_id: RunId) -> Result<Run> {
        self.reject_at_gate(run_id, Stage::ReportApproval, REPORT_REJECTED)
            .await
    }
}
