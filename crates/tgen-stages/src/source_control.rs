use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tgen_core::{
    Checkout, CollaboratorError, CollaboratorResult, MergeRequest, SourceControlClient,
    StageContext,
};

/// Source control stand-in: derives checkouts and merge requests from the
/// run's coordinates without touching a git provider.
pub struct SimulatedSourceControl {
    root: PathBuf,
    base_url: String,
    next_mr: AtomicU64,
}

impl SimulatedSourceControl {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: "https://scm.local".to_string(),
            next_mr: AtomicU64::new(1),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn checkout(&self, project_id: &str, branch: &str, salt: &str) -> CollaboratorResult<Checkout> {
        if project_id.chars().any(char::is_whitespace) {
            return Err(CollaboratorError::new(format!(
                "invalid project id '{project_id}'"
            )));
        }
        let workdir = self.root.join(project_id).join(branch.replace('/', "_"));
        let commit = blake3::hash(format!("{project_id}:{branch}:{salt}").as_bytes())
            .to_hex()
            .chars()
            .take(12)
            .collect();
        Ok(Checkout {
            workdir: workdir.to_string_lossy().to_string(),
            branch: branch.to_string(),
            commit,
        })
    }
}

#[async_trait]
impl SourceControlClient for SimulatedSourceControl {
    async fn clone_repository(&self, ctx: &StageContext) -> CollaboratorResult<Checkout> {
        tracing::debug!(run_id = %ctx.run_id, project_id = %ctx.project_id, "Simulated clone");
        self.checkout(&ctx.project_id, &ctx.branch, "")
    }

    async fn create_merge_request(
        &self,
        ctx: &StageContext,
        scripts: &serde_json::Value,
    ) -> CollaboratorResult<MergeRequest> {
        if scripts.is_null() {
            return Err(CollaboratorError::new("nothing to push"));
        }
        let id = self.next_mr.fetch_add(1, Ordering::Relaxed);
        let run = ctx.run_id.to_string();
        Ok(MergeRequest {
            id: id.to_string(),
            url: format!("{}/{}/-/merge_requests/{id}", self.base_url, ctx.project_id),
            source_branch: format!("tgen/{}", &run[..8]),
            target_branch: ctx.branch.clone(),
        })
    }

    async fn pull_branch(&self, ctx: &StageContext, branch: &str) -> CollaboratorResult<Checkout> {
        let salt = ctx
            .metadata
            .get("scriptsDigest")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        self.checkout(&ctx.project_id, branch, salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tgen_core::{Run, RunMode, Stage};

    fn ctx(project: &str) -> StageContext {
        let run = Run::new(project, "feature/login", RunMode::Manual);
        StageContext::for_run(&run, Stage::PullingCode, 1)
    }

    #[tokio::test]
    async fn test_clone_is_deterministic() {
        let scm = SimulatedSourceControl::new("/work");
        let a = scm.clone_repository(&ctx("shop")).await.unwrap();
        let b = scm.clone_repository(&ctx("shop")).await.unwrap();
        assert_eq!(a.commit, b.commit);
        assert_eq!(a.commit.len(), 12);
        assert!(a.workdir.ends_with("feature_login"));
    }

    #[tokio::test]
    async fn test_invalid_project_is_refused() {
        let scm = SimulatedSourceControl::new("/work");
        let err = scm.clone_repository(&ctx("my shop")).await.unwrap_err();
        assert!(err.to_string().contains("invalid project id"));
    }

    #[tokio::test]
    async fn test_merge_requests_are_numbered() {
        let scm = SimulatedSourceControl::new("/work").with_base_url("https://git.example/");
        let ctx = ctx("shop");
        let first = scm.create_merge_request(&ctx, &json!({"files": []})).await.unwrap();
        let second = scm.create_merge_request(&ctx, &json!({"files": []})).await.unwrap();
        assert_eq!(first.id, "1");
        assert_eq!(second.id, "2");
        assert_eq!(first.url, "https://git.example/shop/-/merge_requests/1");
        assert!(first.source_branch.starts_with("tgen/"));
        assert_eq!(first.target_branch, "feature/login");
    }
}
