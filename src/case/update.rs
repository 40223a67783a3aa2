use super::{ArtifactSlot, Phase};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Context a step attaches when it asks for a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    pub reason: String,
}

impl ApprovalRequest {
    pub fn new(kind: impl Into<String>, payload: Value, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            reason: reason.into(),
        }
    }

    pub fn low_confidence(step: &str, confidence: f64) -> Self {
        Self::new(
            "low_confidence",
            serde_json::json!({ "step": step, "confidence": confidence }),
            format!("confidence {confidence:.2} from `{step}` is below the approval threshold"),
        )
    }

    /// Flattened form stored in `CaseState::approval_context`.
    pub fn to_context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("type".to_string(), Value::String(self.kind.clone()));
        context.insert("payload".to_string(), self.payload.clone());
        context.insert("reason".to_string(), Value::String(self.reason.clone()));
        context
    }
}

/// Partial update returned by a step and merged into the case by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<ArtifactSlot, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_artifact(mut self, slot: ArtifactSlot, value: Value) -> Self {
        self.artifacts.insert(slot, value);
        self
    }

    pub fn request_approval(mut self, request: ApprovalRequest) -> Self {
        self.approval = Some(request);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn requests_approval(&self) -> bool {
        self.approval.is_some()
    }
}
