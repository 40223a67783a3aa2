pub mod audit_trail;
pub mod case_leases;
pub mod definition;
pub mod error;
pub mod escalation;
pub mod metrics;
pub mod registry;
pub mod step;
pub mod step_execution;
pub mod workflow_engine;

pub use audit_trail::{
    AuditError, AuditTrail, DecisionRecord, JsonlAuditTrail, MemoryAuditTrail, NoopAuditTrail,
};
pub use case_leases::{CaseLease, CaseLeases};
pub use definition::{
    DefinitionError, Edge, Guard, Next, NodeKind, RoutePredicate, StepNode, WorkflowDefinition,
    WorkflowDefinitionBuilder,
};
pub use error::{EngineError, ResumeRejection};
pub use escalation::{should_escalate, EscalationPolicy, CONFIDENCE_THRESHOLD};
pub use metrics::{InMemoryMetrics, MetricsSink, MetricsSnapshot, NoopMetrics, StepOutcome};
pub use registry::{StepDescriptor, StepRegistry};
pub use step::{CancelToken, Decision, Step, StepContext, StepError, StepOutput};
pub use step_execution::{StepEvaluation, StepExecutor};
pub use workflow_engine::{
    ApprovalDecision, CaseFailure, ExecutionLimits, ExpiredApproval, PendingApproval,
    RejectionPolicy, RunOutcome, SuspendedCase, Suspension, WorkflowEngine, WorkflowEngineBuilder,
};
