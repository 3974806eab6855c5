//! Scriptable collaborators for orchestrator tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tgen_core::{
    Checkout, CollaboratorError, CollaboratorResult, Collaborators, ExecutionOutcome,
    MergeRequest, MemoryStore, Notification, Notifier, Orchestrator, OrchestratorConfig, Report,
    ReportGenerator, ReportVerdict, Run, ScriptCompiler, SourceControlClient, Stage,
    StageContext, TestCase, TestCaseGenerator, TestExecutor, TestResult,
};
use tokio::sync::Notify;

#[derive(Clone)]
pub enum Behavior {
    Succeed,
    Fail(String),
    /// Never returns; only the stage timeout ends it
    Hang,
    /// Blocks until the notify fires, then succeeds
    WaitFor(Arc<Notify>),
}

pub struct Fake {
    behaviors: Mutex<HashMap<Stage, Behavior>>,
    calls: Mutex<Vec<Stage>>,
    notifications: Mutex<Vec<Notification>>,
    proposals: usize,
}

impl Fake {
    pub fn new() -> Arc<Self> {
        Self::with_proposals(3)
    }

    pub fn with_proposals(proposals: usize) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            proposals,
        })
    }

    pub fn set(&self, stage: Stage, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(stage, behavior);
    }

    pub fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    async fn behave(&self, stage: Stage) -> CollaboratorResult<()> {
        self.calls.lock().unwrap().push(stage);
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&stage)
            .cloned()
            .unwrap_or(Behavior::Succeed);
        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(message) => Err(CollaboratorError::new(message)),
            Behavior::Hang => std::future::pending().await,
            Behavior::WaitFor(notify) => {
                notify.notified().await;
                Ok(())
            }
        }
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            source_control: self.clone(),
            generator: self.clone(),
            compiler: self.clone(),
            executor: self.clone(),
            reporter: self.clone(),
            notifier: self.clone(),
        }
    }
}

#[async_trait]
impl SourceControlClient for Fake {
    async fn clone_repository(&self, ctx: &StageContext) -> CollaboratorResult<Checkout> {
        self.behave(Stage::PullingCode).await?;
        Ok(Checkout {
            workdir: format!("/tmp/fake/{}", ctx.project_id),
            branch: ctx.branch.clone(),
            commit: "abc123".into(),
        })
    }

    async fn create_merge_request(
        &self,
        ctx: &StageContext,
        _scripts: &serde_json::Value,
    ) -> CollaboratorResult<MergeRequest> {
        self.behave(Stage::CreateMr).await?;
        Ok(MergeRequest {
            id: "7".into(),
            url: format!("https://scm.test/{}/merge_requests/7", ctx.project_id),
            source_branch: format!("tgen/{}", ctx.run_id),
            target_branch: ctx.branch.clone(),
        })
    }

    async fn pull_branch(&self, ctx: &StageContext, branch: &str) -> CollaboratorResult<Checkout> {
        self.behave(Stage::PullNewBranch).await?;
        Ok(Checkout {
            workdir: format!("/tmp/fake/{}-{}", ctx.project_id, branch),
            branch: branch.to_string(),
            commit: "def456".into(),
        })
    }
}

#[async_trait]
impl TestCaseGenerator for Fake {
    async fn propose(
        &self,
        _ctx: &StageContext,
        _checkout: &Checkout,
    ) -> CollaboratorResult<Vec<TestCase>> {
        self.behave(Stage::GeneratingTests).await?;
        Ok((1..=self.proposals)
            .map(|n| TestCase {
                id: format!("c{n}"),
                description: format!("case {n}"),
                input: json!({ "n": n }),
                expected: json!({ "ok": true }),
            })
            .collect())
    }
}

#[async_trait]
impl ScriptCompiler for Fake {
    async fn compile(
        &self,
        _ctx: &StageContext,
        approved: &[TestCase],
    ) -> CollaboratorResult<serde_json::Value> {
        self.behave(Stage::GeneratingScripts).await?;
        let ids: Vec<&str> = approved.iter().map(|c| c.id.as_str()).collect();
        Ok(json!({ "cases": ids }))
    }
}

#[async_trait]
impl TestExecutor for Fake {
    async fn execute(
        &self,
        _ctx: &StageContext,
        _checkout: &Checkout,
        scripts: &serde_json::Value,
    ) -> CollaboratorResult<ExecutionOutcome> {
        self.behave(Stage::RunTest).await?;
        let results = scripts["cases"]
            .as_array()
            .map(|cases| {
                cases
                    .iter()
                    .filter_map(|c| c.as_str())
                    .map(|id| TestResult {
                        case_id: id.to_string(),
                        passed: true,
                        duration_ms: 5,
                        message: None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ExecutionOutcome {
            results,
            coverage: Some(0.75),
        })
    }
}

#[async_trait]
impl ReportGenerator for Fake {
    async fn generate(&self, _ctx: &StageContext, run: &Run) -> CollaboratorResult<Report> {
        self.behave(Stage::GeneratingReport).await?;
        let passed = run.test_results.iter().filter(|r| r.passed).count() as u32;
        Ok(Report {
            summary: format!("{passed} passed"),
            body: "# Report".into(),
            passed,
            failed: run.test_results.len() as u32 - passed,
            coverage: run.coverage,
            verdict: ReportVerdict::Ok,
        })
    }
}

#[async_trait]
impl Notifier for Fake {
    async fn notify(&self, notification: &Notification) -> CollaboratorResult<()> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        lock_wait_ms: 50,
        ..OrchestratorConfig::default()
    }
}

pub fn orchestrator(fake: &Arc<Fake>, config: OrchestratorConfig) -> (Arc<Orchestrator>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(store.clone(), store.clone(), fake.collaborators(), config);
    (Arc::new(orchestrator), store)
}
