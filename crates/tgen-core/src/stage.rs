//! Stage: Enumeração única dos estágios do pipeline e tabela de transições
//!
//! Every consumer (orchestrator, gates, API projections) derives step order
//! and display index from this type. There is no other stage table.
//!
//! ```text
//! queued → pulling_code → generating_tests → test_approval[gate]
//!        → generating_scripts → create_mr → pull_new_branch → run_test
//!        → generating_report → report_approval[gate] → completed
//!
//! failed is reachable from any non-terminal stage
//! ```
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    PullingCode,
    GeneratingTests,
    TestApproval,
    GeneratingScripts,
    CreateMr,
    PullNewBranch,
    RunTest,
    GeneratingReport,
    ReportApproval,
    Completed,
    Failed,
}

impl Stage {
    /// Forward order of the pipeline. `Failed` is off-path.
    pub const ALL: [Stage; 11] = [
        Stage::Queued,
        Stage::PullingCode,
        Stage::GeneratingTests,
        Stage::TestApproval,
        Stage::GeneratingScripts,
        Stage::CreateMr,
        Stage::PullNewBranch,
        Stage::RunTest,
        Stage::GeneratingReport,
        Stage::ReportApproval,
        Stage::Completed,
    ];

    /// Wire id (ex: "generating_tests")
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::PullingCode => "pulling_code",
            Self::GeneratingTests => "generating_tests",
            Self::TestApproval => "test_approval",
            Self::GeneratingScripts => "generating_scripts",
            Self::CreateMr => "create_mr",
            Self::PullNewBranch => "pull_new_branch",
            Self::RunTest => "run_test",
            Self::GeneratingReport => "generating_report",
            Self::ReportApproval => "report_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Next stage on the forward path, if any.
    pub fn next(self) -> Option<Stage> {
        let idx = self.index()?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Zero-based step index used for progress display. `None` for `Failed`.
    pub fn index(self) -> Option<usize> {
        Self::ALL.iter().position(|s| *s == self)
    }

    /// Stages that suspend the run until a human decision arrives.
    pub fn is_gate(self) -> bool {
        matches!(self, Self::TestApproval | Self::ReportApproval)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stages that invoke an external collaborator when executed.
    pub fn is_automatic(self) -> bool {
        matches!(
            self,
            Self::PullingCode
                | Self::GeneratingTests
                | Self::GeneratingScripts
                | Self::CreateMr
                | Self::PullNewBranch
                | Self::RunTest
                | Self::GeneratingReport
        )
    }
}

/// Legal edges of the run state graph.
///
/// Forward edges follow `Stage::ALL` one step at a time; any
/// non-terminal stage may move to `Failed`. Re-entering a failed stage is
/// not an edge here, it goes through `Run::reenter`.
pub fn is_legal_transition(from: Stage, to: Stage) -> bool {
    if to == Stage::Failed {
        return !from.is_terminal();
    }
    from.next() == Some(to)
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stage '{}'", self.0)
    }
}

impl std::error::Error for UnknownStage {}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .chain(std::iter::once(&Stage::Failed))
            .find(|stage| stage.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}
