use super::{advance, consult, AgentBackend};
use crate::case::{ApprovalRequest, ArtifactSlot, CaseState, Phase, StateUpdate};
use crate::orchestration::{Decision, Step, StepContext, StepError, StepOutput};
use crate::shared::EventLog;
use crate::workflows::auditee::{first_question_category, question_route, QuestionRoute};
use serde_json::{json, Value};
use std::sync::Arc;

/// Routes an auditee case by the first queued question's category.
#[derive(Debug, Clone, Default)]
pub struct AuditeeOrchestratorStep {
    log: EventLog,
}

impl AuditeeOrchestratorStep {
    pub const NAME: &'static str = "auditee_orchestrator";

    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl Step for AuditeeOrchestratorStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "routes incoming audit requests to response, evidence search or preparation"
    }

    fn execute(&self, state: &CaseState, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        let route = question_route(state);
        let mut update = StateUpdate::new();
        if let Some(phase) = advance(state, route.phase()) {
            update = update.with_phase(phase);
        }

        let category = first_question_category(state).unwrap_or_else(|| "none".to_string());
        let mut reasoning = format!("category={category} phase={}", route.phase());
        if let QuestionRoute::Unmapped(unmapped) = &route {
            // Unknown categories still go to the response step, but are flagged.
            self.log.warn(
                "routing.unmapped_category",
                &format!(
                    "case_id={} category={} fallback=responding",
                    state.case_id(),
                    unmapped
                ),
            );
            update = update.with_metadata("unmapped_question_category", json!(unmapped));
            reasoning.push_str(" unmapped category routed to response");
        }

        Ok(StepOutput::new(
            update,
            1.0,
            Decision::new("question_routed", reasoning),
        ))
    }
}

pub struct ResponseStep {
    backend: Arc<dyn AgentBackend>,
}

impl ResponseStep {
    pub const NAME: &'static str = "auditee_response";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for ResponseStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "drafts answers to the audit team's questions"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (mut payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Draft an answer for each incoming question from past responses and \
             regulations. Return `drafted_responses` and an `evidence_queue` of \
             evidence still to locate.",
        )?;

        let drafts = payload.remove("drafted_responses").unwrap_or(Value::Null);
        let mut update = StateUpdate::new().with_artifact(ArtifactSlot::DraftedResponses, drafts.clone());
        if let Some(queue) = payload.remove("evidence_queue") {
            update = update.with_artifact(ArtifactSlot::EvidenceQueue, queue);
        }
        if let Some(phase) = advance(state, Phase::Responding) {
            update = update.with_phase(phase);
        }

        Ok(StepOutput::new(
            update,
            confidence.unwrap_or(0.5),
            Decision::new("response_drafted", reasoning)
                .with_resource("dialogue", state.case_id().as_str()),
        )
        .escalate_with(ApprovalRequest::new(
            "response_draft",
            drafts,
            "response draft confidence is below the approval threshold",
        )))
    }
}

pub struct EvidenceSearchStep {
    backend: Arc<dyn AgentBackend>,
}

impl EvidenceSearchStep {
    pub const NAME: &'static str = "auditee_evidence_search";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for EvidenceSearchStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "searches document stores for requested evidence"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (mut payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Search for each queued evidence request and return `results`.",
        )?;

        let results = payload.remove("results").unwrap_or(Value::Null);
        let found = results.as_array().map_or(0, Vec::len);
        let confidence = confidence.unwrap_or_else(|| (0.3 + 0.1 * found as f64).min(0.9));

        let mut update = StateUpdate::new()
            .with_artifact(ArtifactSlot::EvidenceSearchResults, results)
            .with_artifact(ArtifactSlot::EvidenceQueue, Value::Null);
        if let Some(phase) = advance(state, Phase::Searching) {
            update = update.with_phase(phase);
        }

        Ok(StepOutput::new(
            update,
            confidence,
            Decision::new(
                "evidence_searched",
                if reasoning.is_empty() {
                    format!("{found} evidence items found")
                } else {
                    reasoning
                },
            )
            .with_resource("evidence", state.case_id().as_str()),
        ))
    }
}

pub struct PrepStep {
    backend: Arc<dyn AgentBackend>,
}

impl PrepStep {
    pub const NAME: &'static str = "auditee_prep";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for PrepStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "prepares a checklist and likely questions ahead of an audit"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (mut payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Prepare for the upcoming audit. Return a `prep_checklist` and \
             `predicted_questions`.",
        )?;

        let mut update = StateUpdate::new()
            .with_artifact(
                ArtifactSlot::PrepChecklist,
                payload.remove("prep_checklist").unwrap_or(Value::Null),
            )
            .with_artifact(
                ArtifactSlot::PredictedQuestions,
                payload.remove("predicted_questions").unwrap_or(Value::Null),
            );
        if let Some(phase) = advance(state, Phase::Preparing) {
            update = update.with_phase(phase);
        }

        Ok(StepOutput::new(
            update,
            confidence.unwrap_or(0.8),
            Decision::new("audit_prepared", reasoning),
        ))
    }
}

pub struct ControlsMonitorStep {
    backend: Arc<dyn AgentBackend>,
}

impl ControlsMonitorStep {
    pub const NAME: &'static str = "auditee_controls_monitor";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for ControlsMonitorStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "scores the health of internal controls"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (mut payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Score current control effectiveness. Return `controls_status` and a \
             list of `issues`.",
        )?;

        let issues = payload.remove("issues").unwrap_or(Value::Null);
        let issue_count = issues.as_array().map_or(0, Vec::len);
        let mut update = StateUpdate::new().with_artifact(
            ArtifactSlot::ControlsStatus,
            payload.remove("controls_status").unwrap_or(Value::Null),
        );
        if issue_count > 0 {
            update = update.with_metadata("control_issues", issues);
        }
        if let Some(phase) = advance(state, Phase::Monitoring) {
            update = update.with_phase(phase);
        }

        Ok(StepOutput::new(
            update,
            confidence.unwrap_or(if issue_count == 0 { 0.9 } else { 0.7 }),
            Decision::new(
                "controls_monitored",
                if reasoning.is_empty() {
                    format!("{issue_count} control issues")
                } else {
                    reasoning
                },
            )
            .with_resource("controls_scorecard", state.tenant_id().as_str()),
        ))
    }
}

pub struct RiskAlertStep {
    backend: Arc<dyn AgentBackend>,
}

impl RiskAlertStep {
    pub const NAME: &'static str = "auditee_risk_alert";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for RiskAlertStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "raises risk alerts for control issues"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (mut payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Raise a risk alert for each open control issue. Return `risk_alerts`.",
        )?;

        let alerts = payload.remove("risk_alerts").unwrap_or(Value::Null);
        Ok(StepOutput::new(
            StateUpdate::new().with_artifact(ArtifactSlot::RiskAlerts, alerts),
            confidence.unwrap_or(0.8),
            Decision::new("risk_alerts_raised", reasoning),
        ))
    }
}
