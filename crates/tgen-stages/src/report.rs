//! Markdown report rendering and verdict thresholds.
use async_trait::async_trait;
use handlebars::{handlebars_helper, Handlebars};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tgen_core::{
    CollaboratorError, CollaboratorResult, Report, ReportGenerator, ReportVerdict, Run,
    StageContext,
};

const REPORT_TEMPLATE: &str = r#"# Test report: {{project}}@{{branch}}

Run `{{run_id}}`{{#if merge_request}} | merge request [!{{merge_request.id}}]({{merge_request.url}}){{/if}}

**Verdict:** {{verdict}}

| Passed | Failed | Coverage |
|-------:|-------:|---------:|
| {{passed}} | {{failed}} | {{#if has_coverage}}{{percent coverage}}{{else}}n/a{{/if}} |

## Cases
{{#each results}}
- [{{#if passed}}x{{else}} {{/if}}] `{{caseId}}` ({{durationMs}} ms){{#if message}}: {{message}}{{/if}}
{{/each}}
{{#each findings}}
> {{this}}
{{/each}}
"#;

handlebars_helper!(percent: |v: f64| format!("{:.0}%", v * 100.0));

static RENDERER: Lazy<Handlebars<'static>> = Lazy::new(|| {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(false);
    hb.register_escape_fn(handlebars::no_escape);
    hb.register_helper("percent", Box::new(percent));
    hb
});

/// Limits a report must respect to get an `OK` verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportThresholds {
    /// More failures than this blocks the report
    pub max_failures: u32,
    /// Measured coverage below this warns
    pub min_coverage: f32,
}

impl Default for ReportThresholds {
    fn default() -> Self {
        Self {
            max_failures: 0,
            min_coverage: 0.6,
        }
    }
}

impl ReportThresholds {
    /// Verdict plus the human-readable reasons behind it.
    pub fn evaluate(&self, passed: u32, failed: u32, coverage: Option<f32>) -> (ReportVerdict, Vec<String>) {
        let mut findings = Vec::new();
        if failed > self.max_failures {
            findings.push(format!(
                "{failed} failing case(s), at most {} allowed",
                self.max_failures
            ));
            return (ReportVerdict::Block, findings);
        }
        if passed + failed == 0 {
            findings.push("no test results were recorded".to_string());
        }
        if let Some(c) = coverage {
            if c < self.min_coverage {
                findings.push(format!(
                    "coverage {:.0}% below {:.0}%",
                    c * 100.0,
                    self.min_coverage * 100.0
                ));
            }
        }
        let verdict = if findings.is_empty() {
            ReportVerdict::Ok
        } else {
            ReportVerdict::Warn
        };
        (verdict, findings)
    }
}

#[derive(Default)]
pub struct MarkdownReportGenerator {
    thresholds: ReportThresholds,
}

impl MarkdownReportGenerator {
    pub fn new(thresholds: ReportThresholds) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl ReportGenerator for MarkdownReportGenerator {
    async fn generate(&self, ctx: &StageContext, run: &Run) -> CollaboratorResult<Report> {
        let passed = run.test_results.iter().filter(|r| r.passed).count() as u32;
        let failed = run.test_results.len() as u32 - passed;
        let (verdict, findings) = self.thresholds.evaluate(passed, failed, run.coverage);

        let data = json!({
            "project": run.project_id,
            "branch": run.branch,
            "run_id": run.id.to_string(),
            "merge_request": run.merge_request,
            "verdict": verdict,
            "passed": passed,
            "failed": failed,
            "has_coverage": run.coverage.is_some(),
            "coverage": run.coverage,
            "results": run.test_results,
            "findings": findings,
        });
        let body = RENDERER
            .render_template(REPORT_TEMPLATE, &data)
            .map_err(|e| CollaboratorError::new(format!("render error: {e}")))?;

        tracing::debug!(run_id = %ctx.run_id, ?verdict, "Report rendered");
        Ok(Report {
            summary: format!("{passed} passed, {failed} failed"),
            body,
            passed,
            failed,
            coverage: run.coverage,
            verdict,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgen_core::{RunMode, Stage, TestResult};

    fn result(id: &str, passed: bool) -> TestResult {
        TestResult {
            case_id: id.into(),
            passed,
            duration_ms: 3,
            message: (!passed).then(|| "assertion failed".to_string()),
        }
    }

    #[test]
    fn test_thresholds() {
        let t = ReportThresholds::default();
        assert_eq!(t.evaluate(3, 0, Some(0.9)).0, ReportVerdict::Ok);
        assert_eq!(t.evaluate(3, 0, None).0, ReportVerdict::Ok);
        assert_eq!(t.evaluate(3, 0, Some(0.2)).0, ReportVerdict::Warn);
        assert_eq!(t.evaluate(0, 0, None).0, ReportVerdict::Warn);
        let (verdict, findings) = t.evaluate(2, 1, Some(0.9));
        assert_eq!(verdict, ReportVerdict::Block);
        assert_eq!(findings.len(), 1);
    }

    #[tokio::test]
    async fn test_markdown_body() {
        let mut run = Run::new("shop", "main", RunMode::Manual);
        run.test_results = vec![result("tc-1", true), result("tc-2", false)];
        run.coverage = Some(0.5);
        let ctx = StageContext::for_run(&run, Stage::GeneratingReport, 1);

        let report = MarkdownReportGenerator::default().generate(&ctx, &run).await.unwrap();
        assert_eq!(report.summary, "1 passed, 1 failed");
        assert_eq!(report.verdict, ReportVerdict::Block);
        assert!(report.body.starts_with("# Test report: shop@main"));
        assert!(report.body.contains("| 1 | 1 | 50% |"));
        assert!(report.body.contains("- [ ] `tc-2` (3 ms): assertion failed"));
        assert!(report.body.contains("**Verdict:** BLOCK"));
    }
}
