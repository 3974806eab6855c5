//! TGEN Stages: reference collaborators used by the orchestrator.
//!
//! These stay small and deterministic. They act as defaults so the
//! pipeline can run end to end without a git provider, a model or a CI
//! runner. Deployments are expected to replace them.
//!
//! # Pipeline Flow
//!
//! ```text
//! clone → propose → [approve] → compile → MR → pull → dry run → report → [approve]
//!   ↓        ↓                     ↓       ↓              ↓         ↓
//! Simulated Heuristic         ShellScript Simulated  DryRun   Markdown
//! ```

mod compiler;
mod executor;
mod generator;
mod notifier;
mod report;
mod source_control;

pub use compiler::{ScriptBundle, ScriptFile, ShellScriptCompiler};
pub use executor::DryRunExecutor;
pub use generator::HeuristicCaseGenerator;
pub use notifier::TracingNotifier;
pub use report::{MarkdownReportGenerator, ReportThresholds};
pub use source_control::SimulatedSourceControl;

use std::path::PathBuf;
use std::sync::Arc;
use tgen_core::Collaborators;

/// Wires every reference collaborator together; checkouts land under `root`.
pub fn reference_collaborators(root: impl Into<PathBuf>) -> Collaborators {
    Collaborators {
        source_control: Arc::new(SimulatedSourceControl::new(root)),
        generator: Arc::new(HeuristicCaseGenerator::default()),
        compiler: Arc::new(ShellScriptCompiler),
        executor: Arc::new(DryRunExecutor),
        reporter: Arc::new(MarkdownReportGenerator::default()),
        notifier: Arc::new(TracingNotifier),
    }
}
