use super::ConfigError;
use crate::orchestration::{ExecutionLimits, RejectionPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    File,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTrailKind {
    #[default]
    Jsonl,
    Memory,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default = "default_max_steps_per_run")]
    pub max_steps_per_run: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_steps_per_run: default_max_steps_per_run(),
        }
    }
}

impl From<LimitsConfig> for ExecutionLimits {
    fn from(value: LimitsConfig) -> Self {
        Self {
            max_steps_per_run: value.max_steps_per_run,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    pub state_root: PathBuf,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub on_reject: RejectionPolicy,
    #[serde(default)]
    pub audit_trail: AuditTrailKind,
    #[serde(default = "default_true")]
    pub event_log: bool,
    /// `null` lets suspended cases wait forever.
    #[serde(default = "default_approval_ttl_secs")]
    pub approval_ttl_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_approval_ttl_secs() -> Option<u64> {
    Some(7 * 24 * 60 * 60)
}

fn default_max_steps_per_run() -> u32 {
    ExecutionLimits::default().max_steps_per_run
}

impl EngineSettings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_root.as_os_str().is_empty() {
            return Err(ConfigError::Settings(
                "`state_root` must be non-empty".to_string(),
            ));
        }
        if !self.state_root.is_absolute() {
            return Err(ConfigError::Settings(
                "`state_root` must be an absolute path".to_string(),
            ));
        }
        if self.limits.max_steps_per_run == 0 {
            return Err(ConfigError::Settings(
                "`limits.max_steps_per_run` must be greater than zero".to_string(),
            ));
        }
        if self.approval_ttl_secs == Some(0) {
            return Err(ConfigError::Settings(
                "`approval_ttl_secs` must be greater than zero or null".to_string(),
            ));
        }
        Ok(())
    }

    pub fn execution_limits(&self) -> ExecutionLimits {
        self.limits.into()
    }
}
