use super::{AgentBackend, AgentReply, AgentRequest};
use crate::orchestration::StepError;
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum ScriptEntry {
    Fail { fail: String },
    Reply(AgentReply),
}

#[derive(Debug, Default)]
struct Script {
    replies: BTreeMap<String, VecDeque<ScriptEntry>>,
    calls: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to read script {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse script {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Backend that replays canned replies per step name. Each step's replies
/// are consumed in order and the last one repeats.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, step: &str, reply: AgentReply) -> Self {
        self.push(step, ScriptEntry::Reply(reply));
        self
    }

    pub fn fail(self, step: &str, reason: impl Into<String>) -> Self {
        self.push(
            step,
            ScriptEntry::Fail {
                fail: reason.into(),
            },
        );
        self
    }

    /// Loads a YAML map of step name to a list of replies. An entry of the
    /// form `{fail: reason}` makes that call fail.
    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        let parsed: BTreeMap<String, Vec<ScriptEntry>> = serde_yaml::from_str(raw)?;
        let backend = Self::new();
        {
            let mut script = backend.script();
            for (step, entries) in parsed {
                script.replies.insert(step, entries.into());
            }
        }
        Ok(backend)
    }

    pub fn from_path(path: &Path) -> Result<Self, ScriptError> {
        let raw = fs::read_to_string(path).map_err(|source| ScriptError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw).map_err(|source| ScriptError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Step names in the order the backend was invoked.
    pub fn calls(&self) -> Vec<String> {
        self.script().calls.clone()
    }

    fn push(&self, step: &str, entry: ScriptEntry) {
        self.script()
            .replies
            .entry(step.to_string())
            .or_default()
            .push_back(entry);
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AgentBackend for ScriptedBackend {
    fn invoke(&self, request: &AgentRequest<'_>) -> Result<AgentReply, StepError> {
        let mut script = self.script();
        script.calls.push(request.step.to_string());
        let queue = script.replies.get_mut(request.step);
        let entry = match queue {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match entry {
            Some(ScriptEntry::Reply(reply)) => Ok(reply),
            Some(ScriptEntry::Fail { fail }) => Err(StepError::Backend {
                step: request.step.to_string(),
                reason: fail,
                retryable: false,
            }),
            None => Err(StepError::Backend {
                step: request.step.to_string(),
                reason: "no scripted reply".to_string(),
                retryable: false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CaseState;
    use crate::shared::{CaseId, TenantId};
    use serde_json::json;

    fn ask(backend: &ScriptedBackend, step: &str) -> Result<AgentReply, StepError> {
        let state = CaseState::auditor(
            TenantId::parse("acme").expect("tenant"),
            CaseId::parse("c-1").expect("case"),
        );
        backend.invoke(&AgentRequest {
            step,
            state: &state,
            instruction: "",
        })
    }

    #[test]
    fn replies_are_consumed_in_order_and_the_last_repeats() {
        let backend = ScriptedBackend::new()
            .reply("planner", AgentReply::new(json!({"n": 1})))
            .reply("planner", AgentReply::new(json!({"n": 2})));
        assert_eq!(ask(&backend, "planner").expect("first").payload, json!({"n": 1}));
        assert_eq!(ask(&backend, "planner").expect("second").payload, json!({"n": 2}));
        assert_eq!(ask(&backend, "planner").expect("third").payload, json!({"n": 2}));
        assert_eq!(backend.calls().len(), 3);
    }

    #[test]
    fn unscripted_step_fails_as_backend_error() {
        let err = ask(&ScriptedBackend::new(), "planner").expect_err("missing");
        assert!(matches!(err, StepError::Backend { retryable: false, .. }));
    }

    #[test]
    fn yaml_script_supports_replies_and_failures() {
        let backend = ScriptedBackend::from_yaml_str(
            r#"
auditor_planner:
  - payload:
      audit_plan:
        scope: revenue
    confidence: 0.9
    reasoning: sampled revenue
auditor_data_collector:
  - fail: erp timeout
"#,
        )
        .expect("parse");

        let reply = ask(&backend, "auditor_planner").expect("planner");
        assert_eq!(reply.confidence, Some(0.9));
        assert_eq!(reply.payload["audit_plan"]["scope"], json!("revenue"));

        let err = ask(&backend, "auditor_data_collector").expect_err("failure");
        assert_eq!(
            err,
            StepError::Backend {
                step: "auditor_data_collector".to_string(),
                reason: "erp timeout".to_string(),
                retryable: false,
            }
        );
    }
}
