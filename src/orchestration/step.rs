use crate::case::{ApprovalRequest, CaseState, StateUpdate};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for one running case.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-invocation context handed to a step alongside the case.
#[derive(Debug, Clone)]
pub struct StepContext {
    node: String,
    cancel: CancelToken,
}

impl StepContext {
    pub fn new(node: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            node: node.into(),
            cancel,
        }
    }

    pub fn detached(node: impl Into<String>) -> Self {
        Self::new(node, CancelToken::new())
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Label and linkage of the decision a step made; becomes a `DecisionRecord`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub label: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
}

impl Decision {
    pub fn new(label: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            reasoning: reasoning.into(),
            resource_type: None,
            resource_id: None,
        }
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub update: StateUpdate,
    pub confidence: f64,
    pub decision: Decision,
    /// Approval context to use if the confidence triggers escalation.
    pub on_escalation: Option<ApprovalRequest>,
}

impl StepOutput {
    pub fn new(update: StateUpdate, confidence: f64, decision: Decision) -> Self {
        Self {
            update,
            confidence,
            decision,
            on_escalation: None,
        }
    }

    pub fn escalate_with(mut self, request: ApprovalRequest) -> Self {
        self.on_escalation = Some(request);
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error("{0}")]
    Domain(String),
    #[error("backend call for step `{step}` failed: {reason}")]
    Backend {
        step: String,
        reason: String,
        retryable: bool,
    },
    #[error("reply for step `{step}` is malformed: {reason}")]
    MalformedReply { step: String, reason: String },
    #[error("confidence {value} is outside [0, 1]")]
    InvalidConfidence { value: f64 },
    #[error("step was cancelled")]
    Cancelled,
}

/// One unit of domain processing. Implementations read the case and return a
/// partial update; they never mutate the case directly.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn execute(&self, state: &CaseState, ctx: &StepContext) -> Result<StepOutput, StepError>;
}
