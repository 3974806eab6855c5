//! Orchestrator configuration
//!
//! Loaded from YAML (`TGEN_CONFIG`), then overridden by `TGEN_ADDR`,
//! `TGEN_WORKERS` and `TGEN_STORE_DIR`. Every field has a default.
use crate::error::{PipelineError, Result};
use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_ENV: &str = "TGEN_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub listen_addr: String,

    /// Worker pool size
    pub workers: usize,

    /// Pending work items before `submit` backs off
    pub queue_capacity: usize,

    /// Default bound on a single collaborator call
    pub stage_timeout_secs: u64,

    /// Per-stage overrides of `stage_timeout_secs`
    pub stage_timeouts: HashMap<Stage, u64>,

    /// How long gate calls and cancel wait for a busy run
    pub lock_wait_ms: u64,

    /// A `running` step older than this is considered abandoned
    pub stale_after_secs: u64,

    pub recovery_interval_secs: u64,

    /// When set, runs are persisted as JSON snapshots here
    pub store_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8787".to_string(),
            workers: 4,
            queue_capacity: 256,
            stage_timeout_secs: 600,
            stage_timeouts: HashMap::new(),
            lock_wait_ms: 250,
            stale_after_secs: 1800,
            recovery_interval_secs: 60,
            store_dir: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `TGEN_CONFIG` (if set) and applies environment overrides.
    pub fn load() -> Result<Self> {
        let base = match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let yaml = std::fs::read_to_string(&path)
                    .map_err(|e| PipelineError::Config(format!("{path}: {e}")))?;
                Self::from_yaml(&yaml)?
            }
            Err(_) => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("TGEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(workers) = lookup("TGEN_WORKERS") {
            self.workers = workers
                .parse()
                .map_err(|_| PipelineError::Config(format!("TGEN_WORKERS: '{workers}'")))?;
        }
        if let Some(dir) = lookup("TGEN_STORE_DIR") {
            self.store_dir = Some(PathBuf::from(dir));
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::Config("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config("queue_capacity must be at least 1".into()));
        }
        if self.recovery_interval_secs == 0 {
            return Err(PipelineError::Config("recovery_interval_secs must be at least 1".into()));
        }
        if self.stage_timeout_secs == 0 {
            return Err(PipelineError::Config("stage_timeout_secs must be at least 1".into()));
        }
        if let Some(stage) = self.stage_timeouts.keys().find(|s| !s.is_automatic()) {
            return Err(PipelineError::Config(format!(
                "stage_timeouts: {stage} does not call a collaborator"
            )));
        }
        if let Some((stage, _)) = self.stage_timeouts.iter().find(|(_, secs)| **secs == 0) {
            return Err(PipelineError::Config(format!(
                "stage_timeouts: {stage} must be at least 1 second"
            )));
        }
        Ok(())
    }

    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        let secs = self
            .stage_timeouts
            .get(&stage)
            .copied()
            .unwrap_or(self.stage_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }
}
