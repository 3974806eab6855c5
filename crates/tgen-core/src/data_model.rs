//! Data Model: Run, TestCase e payloads produzidos pelos estágios
use crate::error::{PipelineError, Result};
use crate::stage::{is_legal_transition, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// How a submitted run is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Starts advancing as soon as it is submitted.
    Manual,
    /// Waits in `queued` until an external scheduler dispatches it.
    Automatic,
}

/// AI-proposed test case. Immutable once generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub description: String,
    pub input: serde_json::Value,
    pub expected: serde_json::Value,
}

/// Working copy produced by a clone or pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkout {
    pub workdir: String,
    pub branch: String,
    pub commit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub id: String,
    pub url: String,
    pub source_branch: String,
    pub target_branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub case_id: String,
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What the executor hands back for a batch of scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub results: Vec<TestResult>,
    /// Fraction in `[0, 1]`, when the executor measures it
    pub coverage: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportVerdict {
    Ok,
    Warn,
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub summary: String,
    /// Markdown body
    pub body: String,
    pub passed: u32,
    pub failed: u32,
    pub coverage: Option<f32>,
    pub verdict: ReportVerdict,
}

/// One execution of the pipeline against one project/branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub project_id: String,
    pub branch: String,
    pub mode: RunMode,
    pub state: Stage,
    #[serde(default)]
    pub proposals: Vec<TestCase>,
    #[serde(default)]
    pub approved_test_case_ids: BTreeSet<String>,
    pub checkout: Option<Checkout>,
    /// Compiled test payload, opaque to the orchestrator
    pub scripts: Option<serde_json::Value>,
    pub scripts_digest: Option<String>,
    pub merge_request: Option<MergeRequest>,
    pub new_branch_checkout: Option<Checkout>,
    #[serde(default)]
    pub test_results: Vec<TestResult>,
    pub coverage: Option<f32>,
    pub report: Option<Report>,
    pub error_message: Option<String>,
    /// Stage whose execution failed; only set when the failure is retryable
    pub failed_stage: Option<Stage>,
    pub resubmitted_from: Option<RunId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(project_id: impl Into<String>, branch: impl Into<String>, mode: RunMode) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            project_id: project_id.into(),
            branch: branch.into(),
            mode,
            state: Stage::Queued,
            proposals: Vec::new(),
            approved_test_case_ids: BTreeSet::new(),
            checkout: None,
            scripts: None,
            scripts_digest: None,
            merge_request: None,
            new_branch_checkout: None,
            test_results: Vec::new(),
            coverage: None,
            report: None,
            error_message: None,
            failed_stage: None,
            resubmitted_from: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn proposal_ids(&self) -> BTreeSet<&str> {
        self.proposals.iter().map(|p| p.id.as_str()).collect()
    }

    /// Proposals selected at the test approval gate, in proposal order.
    pub fn approved_cases(&self) -> Vec<TestCase> {
        self.proposals
            .iter()
            .filter(|p| self.approved_test_case_ids.contains(&p.id))
            .cloned()
            .collect()
    }

    /// Moves along one edge of the state graph.
    pub fn advance_to(&mut self, to: Stage) -> Result<()> {
        if !is_legal_transition(self.state, to) {
            return Err(PipelineError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.touch();
        if to.is_terminal() {
            self.finished_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Terminal failure. `failed_stage` is set only for stage execution
    /// failures, which are the ones `reenter` accepts.
    pub fn fail(&mut self, message: impl Into<String>, failed_stage: Option<Stage>) -> Result<()> {
        self.advance_to(Stage::Failed)?;
        self.error_message = Some(message.into());
        self.failed_stage = failed_stage;
        Ok(())
    }

    /// Explicit retry-from-stage: the only way back out of `Failed`.
    pub fn reenter(&mut self) -> Result<Stage> {
        let stage = match (self.state, self.failed_stage) {
            (Stage::Failed, Some(stage)) if stage.is_automatic() => stage,
            _ => {
                return Err(PipelineError::conflict(
                    self.id,
                    "failed with a retryable stage",
                    self.state,
                ))
            }
        };
        self.state = stage;
        self.error_message = None;
        self.failed_stage = None;
        self.finished_at = None;
        self.touch();
        Ok(stage)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
