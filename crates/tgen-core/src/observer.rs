//! Hooks for metrics collectors. All methods default to no-ops.
use crate::data_model::Run;
use crate::stage::Stage;

pub trait PipelineObserver: Send + Sync {
    fn run_submitted(&self, _run: &Run) {}

    fn stage_failed(&self, _stage: Stage, _message: &str) {}

    /// `gate` is `test_approval` or `report_approval`.
    fn gate_decision(&self, _gate: Stage, _approved: bool) {}
}

pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}
