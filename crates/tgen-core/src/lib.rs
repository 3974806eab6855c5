//! TGEN Core: Run model, máquina de estados do pipeline e gates de aprovação
//!
//! Núcleo que conduz um Run do clone até o relatório aprovado, gravando o
//! histórico por estágio.

pub mod collaborators;
pub mod config;
pub mod context;
pub mod data_model;
pub mod error;
pub mod file_store;
pub mod gate;
pub mod history;
pub mod locks;
pub mod observer;
pub mod runner;
pub mod stage;
pub mod store;

pub use collaborators::{
    CollaboratorError, CollaboratorResult, Collaborators, Notification, NotificationKind,
    Notifier, ReportGenerator, ScriptCompiler, SourceControlClient, TestCaseGenerator,
    TestExecutor,
};
pub use config::OrchestratorConfig;
pub use context::StageContext;
pub use data_model::{
    Checkout, ExecutionOutcome, MergeRequest, Report, ReportVerdict, Run, RunId, RunMode,
    TestCase, TestResult,
};
pub use error::PipelineError;
pub use file_store::FileStore;
pub use history::{HistoryStore, StepHistoryEntry, StepStatus};
pub use observer::{NoopObserver, PipelineObserver};
pub use runner::Orchestrator;
pub use stage::Stage;
pub use store::{MemoryStore, RunFilter, RunStore};

/// Versão do motor TGEN
pub const TGEN_VERSION: &str = "1.0.0";
