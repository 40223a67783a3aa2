use super::{needs_approval, END};
use crate::case::{ArtifactSlot, CaseState, Phase};
use crate::orchestration::{DefinitionError, WorkflowDefinition};
use crate::steps::auditee::{
    AuditeeOrchestratorStep, ControlsMonitorStep, EvidenceSearchStep, PrepStep, ResponseStep,
    RiskAlertStep,
};

pub const AUDITEE_RESPONSE_WORKFLOW: &str = "auditee_response";
pub const AUDITEE_MONITORING_WORKFLOW: &str = "auditee_monitoring";

pub const ORCHESTRATOR: &str = "orchestrator";
pub const RESPONSE: &str = "response";
pub const EVIDENCE_SEARCH: &str = "evidence_search";
pub const PREP: &str = "prep";
pub const APPROVAL: &str = "approval";
pub const CONTROLS_MONITOR: &str = "controls_monitor";
pub const RISK_ALERT: &str = "risk_alert";

/// Where the first queued incoming question sends an auditee case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionRoute {
    NoQuestion,
    Evidence,
    Preparation,
    Response,
    /// Category with no mapping; handled like a plain question.
    Unmapped(String),
}

impl QuestionRoute {
    pub fn phase(&self) -> Phase {
        match self {
            Self::NoQuestion => Phase::Idle,
            Self::Evidence => Phase::Searching,
            Self::Preparation => Phase::Preparing,
            Self::Response | Self::Unmapped(_) => Phase::Responding,
        }
    }
}

/// Declared category of the first incoming question: `category`, then
/// `type`, defaulting to `general`.
pub fn first_question_category(state: &CaseState) -> Option<String> {
    let question = state
        .artifacts()
        .items(ArtifactSlot::IncomingQuestions)
        .first()?;
    let declared = question
        .get("category")
        .or_else(|| question.get("type"));
    Some(match declared {
        None => "general".to_string(),
        Some(value) => value
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
    })
}

pub fn question_route(state: &CaseState) -> QuestionRoute {
    match first_question_category(state).as_deref() {
        None => QuestionRoute::NoQuestion,
        Some("evidence_request") => QuestionRoute::Evidence,
        Some("preparation") => QuestionRoute::Preparation,
        Some("question") | Some("general") => QuestionRoute::Response,
        Some(other) => QuestionRoute::Unmapped(other.to_string()),
    }
}

pub fn no_question(state: &CaseState) -> bool {
    question_route(state) == QuestionRoute::NoQuestion
}

pub fn evidence_requested(state: &CaseState) -> bool {
    question_route(state) == QuestionRoute::Evidence
}

pub fn preparation_requested(state: &CaseState) -> bool {
    question_route(state) == QuestionRoute::Preparation
}

pub fn evidence_queued(state: &CaseState) -> bool {
    state.has_artifact(ArtifactSlot::EvidenceQueue)
}

/// Answers the audit team's incoming questions.
pub fn auditee_response_workflow() -> Result<WorkflowDefinition, DefinitionError> {
    WorkflowDefinition::builder(AUDITEE_RESPONSE_WORKFLOW)
        .start(ORCHESTRATOR)
        .step(ORCHESTRATOR, AuditeeOrchestratorStep::NAME)
        .step(RESPONSE, ResponseStep::NAME)
        .step(EVIDENCE_SEARCH, EvidenceSearchStep::NAME)
        .step(PREP, PrepStep::NAME)
        .gate(APPROVAL)
        .terminal(END)
        .edge_when(ORCHESTRATOR, "no_question", no_question, END)
        .edge_when(ORCHESTRATOR, "evidence_request", evidence_requested, EVIDENCE_SEARCH)
        .edge_when(ORCHESTRATOR, "preparation", preparation_requested, PREP)
        .edge(ORCHESTRATOR, RESPONSE)
        .edge_when(RESPONSE, "evidence_queued", evidence_queued, EVIDENCE_SEARCH)
        .edge_when(RESPONSE, "needs_approval", needs_approval, APPROVAL)
        .edge(RESPONSE, END)
        .edge_when(EVIDENCE_SEARCH, "needs_approval", needs_approval, APPROVAL)
        .edge(EVIDENCE_SEARCH, END)
        .edge(PREP, END)
        .edge(APPROVAL, END)
        .build()
}

/// Periodic controls check; no branching and no gates.
pub fn auditee_monitoring_workflow() -> Result<WorkflowDefinition, DefinitionError> {
    WorkflowDefinition::builder(AUDITEE_MONITORING_WORKFLOW)
        .start(CONTROLS_MONITOR)
        .step(CONTROLS_MONITOR, ControlsMonitorStep::NAME)
        .step(RISK_ALERT, RiskAlertStep::NAME)
        .terminal(END)
        .edge(CONTROLS_MONITOR, RISK_ALERT)
        .edge(RISK_ALERT, END)
        .build()
}
