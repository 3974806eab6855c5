use async_trait::async_trait;
use serde_json::json;
use tgen_core::{
    Checkout, CollaboratorError, CollaboratorResult, StageContext, TestCase, TestCaseGenerator,
};

/// Scenario catalogue walked in order: (name, expected outcome).
const SCENARIOS: &[(&str, &str)] = &[
    ("happy path", "pass"),
    ("empty input", "error"),
    ("boundary values", "pass"),
    ("invalid input", "error"),
    ("repeated invocation", "pass"),
    ("concurrent access", "pass"),
];

/// Deterministic proposal source used when no model is wired in. Emits
/// one case per catalogue scenario, up to `per_run`.
pub struct HeuristicCaseGenerator {
    per_run: usize,
}

impl HeuristicCaseGenerator {
    pub fn new(per_run: usize) -> Self {
        Self { per_run }
    }
}

impl Default for HeuristicCaseGenerator {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl TestCaseGenerator for HeuristicCaseGenerator {
    async fn propose(
        &self,
        ctx: &StageContext,
        checkout: &Checkout,
    ) -> CollaboratorResult<Vec<TestCase>> {
        if self.per_run == 0 {
            return Err(CollaboratorError::new("generator configured to propose nothing"));
        }
        let cases: Vec<TestCase> = SCENARIOS
            .iter()
            .take(self.per_run)
            .enumerate()
            .map(|(i, (scenario, outcome))| TestCase {
                id: format!("tc-{}", i + 1),
                description: format!("{scenario} for {}@{}", ctx.project_id, checkout.branch),
                input: json!({ "scenario": scenario, "commit": checkout.commit }),
                expected: json!({ "outcome": outcome }),
            })
            .collect();

        tracing::debug!(run_id = %ctx.run_id, proposed = cases.len(), "Heuristic proposals ready");
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgen_core::{Run, RunMode, Stage};

    fn checkout() -> Checkout {
        Checkout {
            workdir: "/work/shop/main".into(),
            branch: "main".into(),
            commit: "abc".into(),
        }
    }

    #[tokio::test]
    async fn test_proposes_up_to_per_run() {
        let run = Run::new("shop", "main", RunMode::Manual);
        let ctx = StageContext::for_run(&run, Stage::GeneratingTests, 1);

        let cases = HeuristicCaseGenerator::new(2).propose(&ctx, &checkout()).await.unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].id, "tc-1");
        assert_eq!(cases[1].expected["outcome"], "error");

        let all = HeuristicCaseGenerator::new(50).propose(&ctx, &checkout()).await.unwrap();
        assert_eq!(all.len(), SCENARIOS.len());
    }

    #[tokio::test]
    async fn test_zero_is_an_error() {
        let run = Run::new("shop", "main", RunMode::Manual);
        let ctx = StageContext::for_run(&run, Stage::GeneratingTests, 1);
        assert!(HeuristicCaseGenerator::new(0).propose(&ctx, &checkout()).await.is_err());
    }
}
