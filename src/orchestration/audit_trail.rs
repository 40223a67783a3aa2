use crate::shared::{CaseId, TenantId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub tenant_id: TenantId,
    pub case_id: CaseId,
    pub step_name: String,
    pub decision: String,
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    pub escalated: bool,
    pub recorded_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error for decision of `{step}`: {source}")]
    Json {
        step: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("audit trail unavailable: {0}")]
    Unavailable(String),
}

/// Sink for step decisions. Callers treat failures as non-fatal.
pub trait AuditTrail: Send + Sync {
    fn record(&self, record: &DecisionRecord) -> Result<(), AuditError>;
}

pub fn decisions_path(state_root: &Path) -> PathBuf {
    state_root.join("audit/decisions.jsonl")
}

/// Appends one JSON object per decision to a file.
#[derive(Debug)]
pub struct JsonlAuditTrail {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditTrail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn for_state_root(state_root: &Path) -> Self {
        Self::new(decisions_path(state_root))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(&self) -> Result<Vec<DecisionRecord>, AuditError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&self.path, source)),
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| AuditError::Json {
                    step: "<read>".to_string(),
                    source,
                })
            })
            .collect()
    }
}

impl AuditTrail for JsonlAuditTrail {
    fn record(&self, record: &DecisionRecord) -> Result<(), AuditError> {
        let line = serde_json::to_string(record).map_err(|source| AuditError::Json {
            step: record.step_name.clone(),
            source,
        })?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| io_error(&self.path, source))?;
        writeln!(file, "{line}").map_err(|source| io_error(&self.path, source))
    }
}

/// Drops every decision. Default for engines built without a trail.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditTrail;

impl AuditTrail for NoopAuditTrail {
    fn record(&self, _record: &DecisionRecord) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Keeps every decision in memory; meant for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditTrail {
    records: Mutex<Vec<DecisionRecord>>,
}

impl MemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AuditTrail for MemoryAuditTrail {
    fn record(&self, record: &DecisionRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> AuditError {
    AuditError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(step: &str) -> DecisionRecord {
        DecisionRecord {
            tenant_id: TenantId::parse("acme").expect("tenant"),
            case_id: CaseId::parse("case-9").expect("case"),
            step_name: step.to_string(),
            decision: "plan_created".to_string(),
            reasoning: "scope agreed".to_string(),
            confidence: 0.8,
            resource_type: Some("audit_plan".to_string()),
            resource_id: None,
            escalated: false,
            recorded_at: 1_700_000_000,
        }
    }

    #[test]
    fn jsonl_trail_appends_one_line_per_decision() {
        let dir = tempdir().expect("tempdir");
        let trail = JsonlAuditTrail::for_state_root(dir.path());
        trail.record(&sample("auditor_planner")).expect("first");
        trail.record(&sample("auditor_report_writer")).expect("second");

        let records = trail.read_all().expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].step_name, "auditor_report_writer");
        assert!(trail.path().ends_with("audit/decisions.jsonl"));
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().expect("tempdir");
        let trail = JsonlAuditTrail::for_state_root(dir.path());
        assert!(trail.read_all().expect("read").is_empty());
    }

    #[test]
    fn jsonl_trail_reports_unwritable_location() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("audit");
        fs::write(&blocker, "not a directory").expect("blocker");
        let trail = JsonlAuditTrail::for_state_root(dir.path());
        let err = trail.record(&sample("auditor_planner")).expect_err("blocked");
        assert!(matches!(err, AuditError::Io { .. }));
    }

    #[test]
    fn memory_trail_keeps_records_in_order() {
        let trail = MemoryAuditTrail::new();
        trail.record(&sample("a")).expect("a");
        trail.record(&sample("b")).expect("b");
        let names: Vec<String> = trail.records().into_iter().map(|r| r.step_name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn noop_trail_accepts_every_decision() {
        let trail = NoopAuditTrail;
        trail.record(&sample("a")).expect("a");
        trail.record(&sample("b")).expect("b");
    }
}
