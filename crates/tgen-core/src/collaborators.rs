//! Collaborators: capabilities the pipeline calls out to
//!
//! The orchestrator never talks to a git provider, a model or a test
//! runner directly. Each automatic stage maps to one of these traits and
//! every call is bounded by the stage timeout.
use crate::context::StageContext;
use crate::data_model::{Checkout, ExecutionOutcome, MergeRequest, Report, Run, RunId, TestCase};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Failure reported by a collaborator. The message is stored verbatim on
/// the run and its step history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CollaboratorError {}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Clone, branch and merge request operations against the connected repo.
#[async_trait]
pub trait SourceControlClient: Send + Sync {
    async fn clone_repository(&self, ctx: &StageContext) -> CollaboratorResult<Checkout>;

    /// Pushes the compiled scripts on a new branch and opens a merge request.
    async fn create_merge_request(
        &self,
        ctx: &StageContext,
        scripts: &serde_json::Value,
    ) -> CollaboratorResult<MergeRequest>;

    async fn pull_branch(&self, ctx: &StageContext, branch: &str) -> CollaboratorResult<Checkout>;
}

/// AI proposal generation. Opaque to the pipeline.
#[async_trait]
pub trait TestCaseGenerator: Send + Sync {
    async fn propose(
        &self,
        ctx: &StageContext,
        checkout: &Checkout,
    ) -> CollaboratorResult<Vec<TestCase>>;
}

/// Turns approved test cases into runnable test code.
#[async_trait]
pub trait ScriptCompiler: Send + Sync {
    async fn compile(
        &self,
        ctx: &StageContext,
        approved: &[TestCase],
    ) -> CollaboratorResult<serde_json::Value>;
}

#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &StageContext,
        checkout: &Checkout,
        scripts: &serde_json::Value,
    ) -> CollaboratorResult<ExecutionOutcome>;
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, ctx: &StageContext, run: &Run) -> CollaboratorResult<Report>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AwaitingTestApproval,
    AwaitingReportApproval,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub run_id: RunId,
    pub project_id: String,
    pub branch: String,
    pub kind: NotificationKind,
    pub message: String,
}

/// Channel messages (chat, email). Delivery failures never fail a run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> CollaboratorResult<()>;
}

/// The full set of capabilities one orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub source_control: Arc<dyn SourceControlClient>,
    pub generator: Arc<dyn TestCaseGenerator>,
    pub compiler: Arc<dyn ScriptCompiler>,
    pub executor: Arc<dyn TestExecutor>,
    pub reporter: Arc<dyn ReportGenerator>,
    pub notifier: Arc<dyn Notifier>,
}
