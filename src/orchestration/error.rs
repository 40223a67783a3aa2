use crate::case::{MergeError, Phase};
use crate::orchestration::definition::DefinitionError;
use crate::orchestration::step::StepError;
use crate::shared::{CaseHandle, CaseId};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeRejection {
    UnknownHandle,
    AlreadyResumed,
    Cancelled,
    Expired,
}

impl std::fmt::Display for ResumeRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownHandle => write!(f, "handle is unknown"),
            Self::AlreadyResumed => write!(f, "handle was already resumed"),
            Self::Cancelled => write!(f, "case was cancelled"),
            Self::Expired => write!(f, "approval window expired"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("step `{step}` failed: {source}")]
    StepExecution {
        step: String,
        #[source]
        source: StepError,
    },
    #[error("workflow `{workflow}` has no route out of node `{node}`")]
    Routing { workflow: String, node: String },
    #[error("unknown step `{name}`")]
    UnknownStep { name: String },
    #[error("cannot resume `{handle}`: {reason}")]
    Resume {
        handle: CaseHandle,
        reason: ResumeRejection,
    },
    #[error("case `{case_id}` is running or awaiting approval")]
    CaseBusy { case_id: CaseId },
    #[error("case `{case_id}` was cancelled")]
    Cancelled { case_id: CaseId },
    #[error("approval at gate `{gate}` was rejected: {reason}")]
    ApprovalRejected { gate: String, reason: String },
    #[error("unknown workflow `{workflow_id}`")]
    UnknownWorkflow { workflow_id: String },
    #[error("case `{case_id}` is already closed in phase `{phase}`")]
    CaseClosed { case_id: CaseId, phase: Phase },
    #[error("run exceeded {max_steps_per_run} step executions")]
    StepLimitExceeded { max_steps_per_run: u32 },
    #[error("update from step `{step}` was rejected: {source}")]
    Merge {
        step: String,
        #[source]
        source: MergeError,
    },
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("suspended case record is not valid json: {0}")]
    Record(#[source] serde_json::Error),
    #[error("handle generation failed: {0}")]
    HandleGeneration(String),
    #[error("approval decision must be `approve` or `reject`, got `{0}`")]
    InvalidDecision(String),
}
