use crate::compiler::ScriptBundle;
use async_trait::async_trait;
use std::time::Instant;
use tgen_core::{
    Checkout, CollaboratorError, CollaboratorResult, ExecutionOutcome, StageContext,
    TestExecutor, TestResult,
};

/// Validates a `ScriptBundle` without running it. A file passes when it
/// carries a shebang; coverage is not measured.
#[derive(Default)]
pub struct DryRunExecutor;

#[async_trait]
impl TestExecutor for DryRunExecutor {
    async fn execute(
        &self,
        ctx: &StageContext,
        checkout: &Checkout,
        scripts: &serde_json::Value,
    ) -> CollaboratorResult<ExecutionOutcome> {
        let bundle: ScriptBundle = serde_json::from_value(scripts.clone())
            .map_err(|e| CollaboratorError::new(format!("unreadable scripts payload: {e}")))?;
        if bundle.files.is_empty() {
            return Err(CollaboratorError::new("scripts payload has no files"));
        }

        let results = bundle
            .files
            .iter()
            .map(|file| {
                let started = Instant::now();
                let passed = file.content.starts_with("#!");
                TestResult {
                    case_id: file.case_id.clone(),
                    passed,
                    duration_ms: started.elapsed().as_millis() as u64,
                    message: (!passed).then(|| format!("{}: missing interpreter line", file.path)),
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            run_id = %ctx.run_id,
            workdir = %checkout.workdir,
            cases = results.len(),
            "Dry run finished"
        );
        Ok(ExecutionOutcome {
            results,
            coverage: None,
        })
    }
}
