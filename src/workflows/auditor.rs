use super::{needs_approval, END};
use crate::case::{ArtifactSlot, CaseState};
use crate::orchestration::{DefinitionError, WorkflowDefinition};
use crate::steps::auditor::{
    AnomalyDetectiveStep, AuditorOrchestratorStep, ControlsTesterStep, DataCollectorStep,
    FollowUpStep, KnowledgeStep, PlannerStep, ReportWriterStep,
};

pub const AUDITOR_WORKFLOW: &str = "auditor";

pub const ORCHESTRATOR: &str = "orchestrator";
pub const PLANNER: &str = "planner";
pub const PLAN_APPROVAL: &str = "plan_approval";
pub const DATA_COLLECTOR: &str = "data_collector";
pub const CONTROLS_TESTER: &str = "controls_tester";
pub const ANOMALY_DETECTIVE: &str = "anomaly_detective";
pub const KNOWLEDGE: &str = "knowledge";
pub const REPORT_WRITER: &str = "report_writer";
pub const REPORT_APPROVAL: &str = "report_approval";
pub const FOLLOW_UP: &str = "follow_up";

pub fn plan_ready(state: &CaseState) -> bool {
    state.has_artifact(ArtifactSlot::AuditPlan)
}

pub fn questions_pending(state: &CaseState) -> bool {
    state.has_artifact(ArtifactSlot::PendingQuestions)
}

/// Audit engagement: planning, fieldwork, reporting and follow-up, with a
/// gate after an escalated plan and a mandatory gate on the report.
pub fn auditor_workflow() -> Result<WorkflowDefinition, DefinitionError> {
    WorkflowDefinition::builder(AUDITOR_WORKFLOW)
        .start(ORCHESTRATOR)
        .step(ORCHESTRATOR, AuditorOrchestratorStep::NAME)
        .step(PLANNER, PlannerStep::NAME)
        .gate(PLAN_APPROVAL)
        .step(DATA_COLLECTOR, DataCollectorStep::NAME)
        .step(CONTROLS_TESTER, ControlsTesterStep::NAME)
        .step(ANOMALY_DETECTIVE, AnomalyDetectiveStep::NAME)
        .step(KNOWLEDGE, KnowledgeStep::NAME)
        .step(REPORT_WRITER, ReportWriterStep::NAME)
        .gate(REPORT_APPROVAL)
        .step(FOLLOW_UP, FollowUpStep::NAME)
        .terminal(END)
        .edge(ORCHESTRATOR, PLANNER)
        .edge_when(PLANNER, "needs_approval", needs_approval, PLAN_APPROVAL)
        .edge_when(PLANNER, "plan_ready", plan_ready, DATA_COLLECTOR)
        .edge(PLANNER, ORCHESTRATOR)
        .edge(PLAN_APPROVAL, DATA_COLLECTOR)
        .edge(DATA_COLLECTOR, CONTROLS_TESTER)
        .edge(CONTROLS_TESTER, ANOMALY_DETECTIVE)
        .edge_when(ANOMALY_DETECTIVE, "questions_pending", questions_pending, KNOWLEDGE)
        .edge(ANOMALY_DETECTIVE, REPORT_WRITER)
        .edge(KNOWLEDGE, REPORT_WRITER)
        .edge(REPORT_WRITER, REPORT_APPROVAL)
        .edge(REPORT_APPROVAL, FOLLOW_UP)
        .edge(FOLLOW_UP, END)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::Next;
    use crate::shared::{CaseId, TenantId};
    use serde_json::json;

    fn state() -> CaseState {
        CaseState::auditor(
            TenantId::parse("acme").expect("tenant"),
            CaseId::parse("audit-1").expect("case"),
        )
    }

    #[test]
    fn planner_without_plan_loops_back_to_orchestrator() {
        let workflow = auditor_workflow().expect("workflow");
        let next = workflow.next(PLANNER, &state()).expect("route");
        assert!(matches!(next, Next::Node(node) if node.id == ORCHESTRATOR));
    }

    #[test]
    fn anomaly_detective_routes_on_pending_questions() {
        let workflow = auditor_workflow().expect("workflow");
        let quiet = workflow.next(ANOMALY_DETECTIVE, &state()).expect("route");
        assert!(matches!(quiet, Next::Node(node) if node.id == REPORT_WRITER));

        let asking = state().with_artifact(ArtifactSlot::PendingQuestions, json!(["why?"]));
        let next = workflow.next(ANOMALY_DETECTIVE, &asking).expect("route");
        assert!(matches!(next, Next::Node(node) if node.id == KNOWLEDGE));
    }

    #[test]
    fn follow_up_ends_the_workflow() {
        let workflow = auditor_workflow().expect("workflow");
        assert_eq!(
            workflow.next(FOLLOW_UP, &state()).expect("route"),
            Next::Terminal(END)
        );
        assert!(workflow.node(REPORT_APPROVAL).expect("gate").is_gate());
    }
}
