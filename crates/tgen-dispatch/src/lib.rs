//! TGEN Dispatch: pool de workers, recuperação de runs órfãos e fachada do serviço
//!
//! ```text
//! submit / approve / retry ─► Dispatcher queue ─► worker N ─► Orchestrator::drive
//!                                                   ▲
//!                            recovery sweeper ──────┘ (recover_stale)
//! ```

mod dispatcher;
mod recovery;
mod service;
mod worker;

pub use dispatcher::Dispatcher;
pub use recovery::spawn_recovery;
pub use service::PipelineService;
