use super::{ApprovalRequest, ArtifactSlot, Artifacts, MergeError, Phase, StateUpdate};
use crate::shared::{CaseId, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed,
    Approved,
    Rejected,
}

/// One executed node of a case, kept in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub outcome: ExecutionOutcome,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub escalated: bool,
    pub phase_after: Phase,
}

/// Mutable record threaded through every step of one case.
///
/// Callers build the initial state; afterwards only the engine mutates it,
/// by merging step updates and by resolving approval gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseState {
    tenant_id: TenantId,
    case_id: CaseId,
    phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_step: Option<String>,
    #[serde(default)]
    artifacts: Artifacts,
    #[serde(default)]
    requires_approval: bool,
    #[serde(default)]
    approval_context: Map<String, Value>,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    executions: Vec<ExecutionRecord>,
}

impl CaseState {
    pub fn new(tenant_id: TenantId, case_id: CaseId, phase: Phase) -> Self {
        Self {
            tenant_id,
            case_id,
            phase,
            current_step: None,
            artifacts: Artifacts::default(),
            requires_approval: false,
            approval_context: Map::new(),
            errors: Vec::new(),
            metadata: Map::new(),
            executions: Vec::new(),
        }
    }

    pub fn auditor(tenant_id: TenantId, case_id: CaseId) -> Self {
        Self::new(tenant_id, case_id, Phase::Init)
    }

    pub fn auditee(tenant_id: TenantId, case_id: CaseId) -> Self {
        Self::new(tenant_id, case_id, Phase::Idle)
    }

    pub fn with_artifact(mut self, slot: ArtifactSlot, value: Value) -> Self {
        self.artifacts.set(slot, value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn case_id(&self) -> &CaseId {
        &self.case_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    pub fn artifact(&self, slot: ArtifactSlot) -> Option<&Value> {
        self.artifacts.get(slot)
    }

    pub fn has_artifact(&self, slot: ArtifactSlot) -> bool {
        self.artifacts.is_present(slot)
    }

    pub fn requires_approval(&self) -> bool {
        self.requires_approval
    }

    pub fn approval_context(&self) -> &Map<String, Value> {
        &self.approval_context
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn executions(&self) -> &[ExecutionRecord] {
        &self.executions
    }

    pub fn is_closed(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Merges a step update. Either the whole update lands or the state is
    /// left untouched.
    pub(crate) fn apply_update(&mut self, update: StateUpdate) -> Result<(), MergeError> {
        let StateUpdate {
            phase,
            artifacts,
            approval,
            metadata,
        } = update;

        let next_phase = match phase {
            Some(next) if next != self.phase => {
                if !self.phase.can_advance_to(next) {
                    return Err(MergeError::PhaseRegression {
                        from: self.phase,
                        to: next,
                    });
                }
                next
            }
            _ => self.phase,
        };

        let mut merged = self.artifacts.clone();
        for (slot, value) in artifacts {
            merged.merge(slot, value)?;
        }

        self.phase = next_phase;
        self.artifacts = merged;
        if let Some(request) = approval {
            self.request_approval(&request);
        }
        self.metadata.extend(metadata);
        Ok(())
    }

    fn request_approval(&mut self, request: &ApprovalRequest) {
        self.requires_approval = true;
        self.approval_context = request.to_context();
    }

    pub(crate) fn clear_approval(&mut self) {
        self.requires_approval = false;
        self.approval_context = Map::new();
    }

    pub(crate) fn insert_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    pub(crate) fn set_current_step(&mut self, step: &str) {
        self.current_step = Some(step.to_string());
    }

    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub(crate) fn record_execution(&mut self, record: ExecutionRecord) {
        self.executions.push(record);
    }

    pub(crate) fn finish(&mut self, terminal: Phase) {
        debug_assert!(terminal.is_terminal());
        self.phase = terminal;
    }
}
