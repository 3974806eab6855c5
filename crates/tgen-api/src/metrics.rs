//! Prometheus registry fed by the orchestrator's observer hooks and the
//! request middleware.
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tgen_core::{PipelineObserver, Run, Stage};

pub struct Metrics {
    registry: Registry,
    runs_submitted: IntCounter,
    stage_failures: IntCounterVec,
    gate_decisions: IntCounterVec,
    http_requests: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let runs_submitted =
            IntCounter::new("tgen_runs_submitted_total", "Runs created through submit or resubmit")?;
        let stage_failures = IntCounterVec::new(
            Opts::new("tgen_stage_failures_total", "Automatic stage failures, timeouts included"),
            &["stage"],
        )?;
        let gate_decisions = IntCounterVec::new(
            Opts::new("tgen_gate_decisions_total", "Human decisions taken at approval gates"),
            &["gate", "decision"],
        )?;
        let http_requests = IntCounterVec::new(
            Opts::new("tgen_http_requests_total", "HTTP requests served"),
            &["method", "status"],
        )?;

        registry.register(Box::new(runs_submitted.clone()))?;
        registry.register(Box::new(stage_failures.clone()))?;
        registry.register(Box::new(gate_decisions.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;

        Ok(Self {
            registry,
            runs_submitted,
            stage_failures,
            gate_decisions,
            http_requests,
        })
    }

    pub fn record_request(&self, method: &str, status: u16) {
        self.http_requests
            .with_label_values(&[method, &status.to_string()])
            .inc();
    }

    /// Text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

impl PipelineObserver for Metrics {
    fn run_submitted(&self, _run: &Run) {
        self.runs_submitted.inc();
    }

    fn stage_failed(&self, stage: Stage, _message: &str) {
        self.stage_failures.with_label_values(&[stage.as_str()]).inc();
    }

    fn gate_decision(&self, gate: Stage, approved: bool) {
        let decision = if approved { "approved" } else { "rejected" };
        self.gate_decisions
            .with_label_values(&[gate.as_str(), decision])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_hooks_are_counted() {
        let metrics = Metrics::new().unwrap();
        metrics.stage_failed(Stage::RunTest, "timeout");
        metrics.stage_failed(Stage::RunTest, "timeout");
        metrics.gate_decision(Stage::ReportApproval, false);
        metrics.record_request("GET", 404);

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"tgen_stage_failures_total{stage="run_test"} 2"#));
        assert!(text.contains(r#"tgen_gate_decisions_total{decision="rejected",gate="report_approval"} 1"#));
        assert!(text.contains(r#"tgen_http_requests_total{method="GET",status="404"} 1"#));
    }
}
