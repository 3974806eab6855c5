//! Stage Context: Estado compartilhado com os colaboradores durante um estágio
use crate::data_model::{Run, RunId, RunMode};
use crate::stage::Stage;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: RunId,
    pub project_id: String,
    pub branch: String,
    pub mode: RunMode,
    pub stage: Stage,
    pub attempt: u32,
    pub trace_id: String,
    pub metadata: HashMap<String, Value>,
}

impl StageContext {
    pub fn for_run(run: &Run, stage: Stage, attempt: u32) -> Self {
        Self {
            run_id: run.id,
            project_id: run.project_id.clone(),
            branch: run.branch.clone(),
            mode: run.mode,
            stage,
            attempt,
            trace_id: uuid::Uuid::new_v4().to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
