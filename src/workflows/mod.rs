//! The concrete workflow graphs and the route predicates they branch on.

pub mod auditee;
pub mod auditor;

pub use auditee::{
    auditee_monitoring_workflow, auditee_response_workflow, question_route, QuestionRoute,
    AUDITEE_MONITORING_WORKFLOW, AUDITEE_RESPONSE_WORKFLOW,
};
pub use auditor::{auditor_workflow, AUDITOR_WORKFLOW};

use crate::case::CaseState;
use crate::orchestration::{DefinitionError, WorkflowDefinition};

/// Terminal node shared by every workflow.
pub const END: &str = "end";

pub fn needs_approval(state: &CaseState) -> bool {
    state.requires_approval()
}

pub fn all_workflows() -> Result<Vec<WorkflowDefinition>, DefinitionError> {
    Ok(vec![
        auditor_workflow()?,
        auditee_response_workflow()?,
        auditee_monitoring_workflow()?,
    ])
}
