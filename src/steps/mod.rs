//! Concrete steps of the auditor and auditee workflows. Domain work is
//! delegated to an [`AgentBackend`]; the steps only project replies onto
//! artifact slots and pick a confidence.

pub mod auditee;
pub mod auditor;
pub mod scripted;

pub use scripted::{ScriptError, ScriptedBackend};

use crate::case::{CaseState, Phase};
use crate::orchestration::{StepContext, StepError, StepRegistry};
use crate::shared::EventLog;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct AgentRequest<'a> {
    pub step: &'a str,
    pub state: &'a CaseState,
    pub instruction: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: String,
}

impl AgentReply {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            confidence: None,
            reasoning: String::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

/// Language-model or connector side of a step. Implementations classify
/// transient failures themselves; the engine never retries.
pub trait AgentBackend: Send + Sync {
    fn invoke(&self, request: &AgentRequest<'_>) -> Result<AgentReply, StepError>;
}

pub fn register_auditor_steps(registry: &mut StepRegistry, backend: Arc<dyn AgentBackend>) {
    registry.register(Arc::new(auditor::AuditorOrchestratorStep));
    registry.register(Arc::new(auditor::PlannerStep::new(backend.clone())));
    registry.register(Arc::new(auditor::DataCollectorStep::new(backend.clone())));
    registry.register(Arc::new(auditor::ControlsTesterStep::new(backend.clone())));
    registry.register(Arc::new(auditor::AnomalyDetectiveStep::new(backend.clone())));
    registry.register(Arc::new(auditor::KnowledgeStep::new(backend.clone())));
    registry.register(Arc::new(auditor::ReportWriterStep::new(backend.clone())));
    registry.register(Arc::new(auditor::FollowUpStep::new(backend)));
}

pub fn register_auditee_steps(
    registry: &mut StepRegistry,
    backend: Arc<dyn AgentBackend>,
    log: EventLog,
) {
    registry.register(Arc::new(auditee::AuditeeOrchestratorStep::new(log)));
    registry.register(Arc::new(auditee::ResponseStep::new(backend.clone())));
    registry.register(Arc::new(auditee::EvidenceSearchStep::new(backend.clone())));
    registry.register(Arc::new(auditee::PrepStep::new(backend.clone())));
    registry.register(Arc::new(auditee::ControlsMonitorStep::new(backend.clone())));
    registry.register(Arc::new(auditee::RiskAlertStep::new(backend)));
}

/// Calls the backend unless the case is being cancelled. The reply payload
/// must be a JSON object.
fn consult(
    backend: &dyn AgentBackend,
    step: &str,
    state: &CaseState,
    ctx: &StepContext,
    instruction: &str,
) -> Result<(Map<String, Value>, Option<f64>, String), StepError> {
    if ctx.is_cancelled() {
        return Err(StepError::Cancelled);
    }
    let reply = backend.invoke(&AgentRequest {
        step,
        state,
        instruction,
    })?;
    match reply.payload {
        Value::Object(payload) => Ok((payload, reply.confidence, reply.reasoning)),
        Value::Null => Ok((Map::new(), reply.confidence, reply.reasoning)),
        other => Err(StepError::MalformedReply {
            step: step.to_string(),
            reason: format!("expected a json object, got `{other}`"),
        }),
    }
}

/// `target` when the case may move there, `None` when it is already there or
/// beyond.
fn advance(state: &CaseState, target: Phase) -> Option<Phase> {
    let current = state.phase();
    (current != target && current.can_advance_to(target)).then_some(target)
}

fn number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}
