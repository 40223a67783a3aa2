use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    Replace,
    Append,
}

/// Named artifact slots of a case. The merge policy of each slot is fixed here
/// and is never inferred from the shape of an incoming value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSlot {
    RiskAssessment,
    AuditPlan,
    TestResults,
    Anomalies,
    Findings,
    Report,
    PendingQuestions,
    DialogueHistory,
    IncomingQuestions,
    DraftedResponses,
    EvidenceSearchResults,
    EvidenceQueue,
    RiskAlerts,
    ControlsStatus,
    PrepChecklist,
    PredictedQuestions,
}

impl ArtifactSlot {
    pub const ALL: [ArtifactSlot; 16] = [
        Self::RiskAssessment,
        Self::AuditPlan,
        Self::TestResults,
        Self::Anomalies,
        Self::Findings,
        Self::Report,
        Self::PendingQuestions,
        Self::DialogueHistory,
        Self::IncomingQuestions,
        Self::DraftedResponses,
        Self::EvidenceSearchResults,
        Self::EvidenceQueue,
        Self::RiskAlerts,
        Self::ControlsStatus,
        Self::PrepChecklist,
        Self::PredictedQuestions,
    ];

    pub const fn merge_policy(self) -> MergePolicy {
        match self {
            Self::TestResults
            | Self::Anomalies
            | Self::Findings
            | Self::DialogueHistory
            | Self::DraftedResponses
            | Self::EvidenceSearchResults
            | Self::RiskAlerts => MergePolicy::Append,
            Self::RiskAssessment
            | Self::AuditPlan
            | Self::Report
            | Self::PendingQuestions
            | Self::IncomingQuestions
            | Self::EvidenceQueue
            | Self::ControlsStatus
            | Self::PrepChecklist
            | Self::PredictedQuestions => MergePolicy::Replace,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RiskAssessment => "risk_assessment",
            Self::AuditPlan => "audit_plan",
            Self::TestResults => "test_results",
            Self::Anomalies => "anomalies",
            Self::Findings => "findings",
            Self::Report => "report",
            Self::PendingQuestions => "pending_questions",
            Self::DialogueHistory => "dialogue_history",
            Self::IncomingQuestions => "incoming_questions",
            Self::DraftedResponses => "drafted_responses",
            Self::EvidenceSearchResults => "evidence_search_results",
            Self::EvidenceQueue => "evidence_queue",
            Self::RiskAlerts => "risk_alerts",
            Self::ControlsStatus => "controls_status",
            Self::PrepChecklist => "prep_checklist",
            Self::PredictedQuestions => "predicted_questions",
        }
    }
}

impl std::fmt::Display for ArtifactSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("append slot `{slot}` holds a non-list value")]
    NotAList { slot: ArtifactSlot },
    #[error("phase cannot move from `{from}` to `{to}`")]
    PhaseRegression {
        from: super::Phase,
        to: super::Phase,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artifacts {
    slots: BTreeMap<ArtifactSlot, Value>,
}

impl Artifacts {
    pub fn get(&self, slot: ArtifactSlot) -> Option<&Value> {
        self.slots.get(&slot)
    }

    /// Items of a list slot; empty when the slot is unset or not a list.
    pub fn items(&self, slot: ArtifactSlot) -> &[Value] {
        match self.slots.get(&slot) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        }
    }

    pub fn is_present(&self, slot: ArtifactSlot) -> bool {
        match self.slots.get(&slot) {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::String(text)) => !text.is_empty(),
            Some(_) => true,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArtifactSlot, &Value)> {
        self.slots.iter().map(|(slot, value)| (*slot, value))
    }

    /// Overwrites a slot regardless of its merge policy. Append slots always
    /// end up holding a list.
    pub fn set(&mut self, slot: ArtifactSlot, value: Value) {
        self.slots.remove(&slot);
        match (slot.merge_policy(), value) {
            (_, Value::Null) => {}
            (MergePolicy::Append, Value::Array(items)) => {
                self.slots.insert(slot, Value::Array(items));
            }
            (MergePolicy::Append, other) => {
                self.slots.insert(slot, Value::Array(vec![other]));
            }
            (MergePolicy::Replace, other) => {
                self.slots.insert(slot, other);
            }
        }
    }

    pub fn merge(&mut self, slot: ArtifactSlot, value: Value) -> Result<(), MergeError> {
        match slot.merge_policy() {
            MergePolicy::Replace => {
                if value.is_null() {
                    self.slots.remove(&slot);
                } else {
                    self.slots.insert(slot, value);
                }
                Ok(())
            }
            MergePolicy::Append => {
                if value.is_null() {
                    return Ok(());
                }
                let entry = self
                    .slots
                    .entry(slot)
                    .or_insert_with(|| Value::Array(Vec::new()));
                let Value::Array(items) = entry else {
                    return Err(MergeError::NotAList { slot });
                };
                match value {
                    Value::Array(incoming) => items.extend(incoming),
                    other => items.push(other),
                }
                Ok(())
            }
        }
    }
}
