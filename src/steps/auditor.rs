use super::{advance, consult, number, AgentBackend};
use crate::case::{ApprovalRequest, ArtifactSlot, CaseState, Phase, StateUpdate};
use crate::orchestration::{Decision, Step, StepContext, StepError, StepOutput};
use serde_json::{json, Value};
use std::sync::Arc;

/// Moves an audit case through its phases based on the artifacts collected
/// so far. Deterministic, so it always reports full confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditorOrchestratorStep;

impl AuditorOrchestratorStep {
    pub const NAME: &'static str = "auditor_orchestrator";

    fn next_phase(state: &CaseState) -> Phase {
        let has = |slot| state.has_artifact(slot);
        match state.phase() {
            Phase::Init => Phase::Planning,
            Phase::Planning if has(ArtifactSlot::AuditPlan) => Phase::Fieldwork,
            Phase::Fieldwork if has(ArtifactSlot::TestResults) && has(ArtifactSlot::Findings) => {
                Phase::Reporting
            }
            Phase::Reporting if has(ArtifactSlot::Report) => Phase::FollowUp,
            current => current,
        }
    }
}

impl Step for AuditorOrchestratorStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "advances the audit phase from the artifacts gathered so far"
    }

    fn execute(&self, state: &CaseState, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        let next = Self::next_phase(state);
        let mut update = StateUpdate::new();
        if let Some(phase) = advance(state, next) {
            update = update.with_phase(phase);
        }
        Ok(StepOutput::new(
            update,
            1.0,
            Decision::new(
                "phase_routed",
                format!("phase {} -> {}", state.phase(), next),
            ),
        ))
    }
}

pub struct PlannerStep {
    backend: Arc<dyn AgentBackend>,
}

impl PlannerStep {
    pub const NAME: &'static str = "auditor_planner";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for PlannerStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "assesses risks and drafts the audit plan"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (mut payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Assess the risk universe and return `risk_assessment` and an `audit_plan` \
             with scope, objectives, methodology, test procedures and a confidence.",
        )?;

        let plan = payload.remove("audit_plan").unwrap_or(Value::Null);
        let confidence = confidence
            .or_else(|| number(plan.get("confidence")))
            .unwrap_or(0.0);
        let reasoning = plan
            .get("methodology")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(reasoning);

        let mut update = StateUpdate::new().with_artifact(ArtifactSlot::AuditPlan, plan.clone());
        if let Some(assessment) = payload.remove("risk_assessment") {
            update = update.with_artifact(ArtifactSlot::RiskAssessment, assessment);
        }
        if let Some(phase) = advance(state, Phase::Planning) {
            update = update.with_phase(phase);
        }

        Ok(StepOutput::new(
            update,
            confidence,
            Decision::new("audit_plan_generated", reasoning)
                .with_resource("audit_plan", state.case_id().as_str()),
        )
        .escalate_with(ApprovalRequest::new(
            "audit_plan",
            plan,
            "audit plan confidence is below the approval threshold",
        )))
    }
}

pub struct DataCollectorStep {
    backend: Arc<dyn AgentBackend>,
}

impl DataCollectorStep {
    pub const NAME: &'static str = "auditor_data_collector";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for DataCollectorStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "collects ledger and system data named by the audit plan"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (mut payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Collect the data sources listed in the audit plan and return \
             `collected_data` with a `record_count`.",
        )?;

        let record_count = payload
            .get("record_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let collected = payload.remove("collected_data").unwrap_or(Value::Null);
        let confidence = confidence.unwrap_or(if record_count > 0 { 0.9 } else { 0.3 });

        let mut update = StateUpdate::new()
            .with_metadata("collected_data", collected)
            .with_metadata("collection_status", json!("completed"));
        if let Some(phase) = advance(state, Phase::Fieldwork) {
            update = update.with_phase(phase);
        }

        Ok(StepOutput::new(
            update,
            confidence,
            Decision::new(
                "data_collected",
                if reasoning.is_empty() {
                    format!("{record_count} records collected")
                } else {
                    reasoning
                },
            )
            .with_resource("data_collection", state.case_id().as_str()),
        ))
    }
}

pub struct ControlsTesterStep {
    backend: Arc<dyn AgentBackend>,
}

impl ControlsTesterStep {
    pub const NAME: &'static str = "auditor_controls_tester";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for ControlsTesterStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "runs the planned control tests against the collected data"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (mut payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Run the planned control tests and return `test_results`.",
        )?;

        let results = payload.remove("test_results").unwrap_or(Value::Null);
        let mut update = StateUpdate::new().with_artifact(ArtifactSlot::TestResults, results);
        if let Some(phase) = advance(state, Phase::Fieldwork) {
            update = update.with_phase(phase);
        }

        Ok(StepOutput::new(
            update,
            confidence.unwrap_or(0.5),
            Decision::new("controls_tested", reasoning)
                .with_resource("control_test", state.case_id().as_str()),
        ))
    }
}

pub struct AnomalyDetectiveStep {
    backend: Arc<dyn AgentBackend>,
}

impl AnomalyDetectiveStep {
    pub const NAME: &'static str = "auditor_anomaly_detective";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for AnomalyDetectiveStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "screens collected data for anomalies and promotes severe ones to findings"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (mut payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Screen the collected data for anomalies. Return `anomalies`, any \
             `findings`, and `pending_questions` for the auditee.",
        )?;

        let mut update = StateUpdate::new()
            .with_artifact(
                ArtifactSlot::Anomalies,
                payload.remove("anomalies").unwrap_or(Value::Null),
            )
            .with_artifact(
                ArtifactSlot::Findings,
                payload.remove("findings").unwrap_or(Value::Null),
            );
        if let Some(questions) = payload.remove("pending_questions") {
            update = update.with_artifact(ArtifactSlot::PendingQuestions, questions);
        }
        if let Some(phase) = advance(state, Phase::Fieldwork) {
            update = update.with_phase(phase);
        }

        Ok(StepOutput::new(
            update,
            confidence.unwrap_or(0.5),
            Decision::new("anomalies_analyzed", reasoning)
                .with_resource("anomaly_scan", state.case_id().as_str()),
        ))
    }
}

pub struct KnowledgeStep {
    backend: Arc<dyn AgentBackend>,
}

impl KnowledgeStep {
    pub const NAME: &'static str = "auditor_knowledge";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for KnowledgeStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "answers pending questions from regulations and past audits"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (mut payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Answer each pending question from the knowledge base and return \
             `answers` with sources.",
        )?;

        let answers = payload.remove("answers").unwrap_or(Value::Null);
        let answered = answers.as_array().map_or(0, Vec::len);
        let update = StateUpdate::new()
            .with_artifact(ArtifactSlot::DialogueHistory, answers)
            .with_artifact(ArtifactSlot::PendingQuestions, Value::Null);

        Ok(StepOutput::new(
            update,
            confidence.unwrap_or(0.5),
            Decision::new(
                "knowledge_searched",
                if reasoning.is_empty() {
                    format!("{answered} questions answered")
                } else {
                    reasoning
                },
            ),
        ))
    }
}

pub struct ReportWriterStep {
    backend: Arc<dyn AgentBackend>,
}

impl ReportWriterStep {
    pub const NAME: &'static str = "auditor_report_writer";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for ReportWriterStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "drafts the audit report; every report needs human sign-off"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (mut payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Draft the audit report from the findings and test results. Return `report`.",
        )?;

        let report = payload.remove("report").unwrap_or(Value::Null);
        let confidence = confidence
            .or_else(|| number(report.get("confidence")))
            .unwrap_or(0.7);
        let mut update = StateUpdate::new()
            .with_artifact(ArtifactSlot::Report, report.clone())
            .request_approval(ApprovalRequest::new(
                "report",
                report,
                "audit reports always require approval",
            ));
        if let Some(phase) = advance(state, Phase::Reporting) {
            update = update.with_phase(phase);
        }

        Ok(StepOutput::new(
            update,
            confidence,
            Decision::new("report_generated", reasoning)
                .with_resource("audit_report", state.case_id().as_str()),
        ))
    }
}

pub struct FollowUpStep {
    backend: Arc<dyn AgentBackend>,
}

impl FollowUpStep {
    pub const NAME: &'static str = "auditor_follow_up";

    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

impl Step for FollowUpStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "tracks remediation of approved findings"
    }

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let (payload, confidence, reasoning) = consult(
            self.backend.as_ref(),
            Self::NAME,
            state,
            ctx,
            "Plan follow-up for each finding: owner, due date and remediation status.",
        )?;

        let mut update = StateUpdate::new().with_metadata("follow_up", Value::Object(payload));
        if let Some(phase) = advance(state, Phase::FollowUp) {
            update = update.with_phase(phase);
        }

        Ok(StepOutput::new(
            update,
            confidence.unwrap_or(0.8),
            Decision::new("follow_up_planned", reasoning),
        ))
    }
}
