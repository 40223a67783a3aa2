use crate::orchestration::error::EngineError;
use crate::orchestration::step::CancelToken;
use crate::shared::CaseId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Tracks which cases are currently running so a case never executes two
/// steps at once. Attempts to advance a busy case are rejected, not queued.
#[derive(Debug, Clone, Default)]
pub struct CaseLeases {
    active: Arc<Mutex<BTreeMap<CaseId, CancelToken>>>,
}

impl CaseLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, case_id: &CaseId) -> Result<CaseLease, EngineError> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if active.contains_key(case_id) {
            return Err(EngineError::CaseBusy {
                case_id: case_id.clone(),
            });
        }
        let token = CancelToken::new();
        active.insert(case_id.clone(), token.clone());
        Ok(CaseLease {
            case_id: case_id.clone(),
            token,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_running(&self, case_id: &CaseId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(case_id)
    }

    /// Requests cooperative cancellation of a running case.
    pub fn cancel(&self, case_id: &CaseId) -> bool {
        match self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(case_id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Exclusive right to run one case; released on drop.
#[derive(Debug)]
pub struct CaseLease {
    case_id: CaseId,
    token: CancelToken,
    active: Arc<Mutex<BTreeMap<CaseId, CancelToken>>>,
}

impl CaseLease {
    pub fn case_id(&self) -> &CaseId {
        &self.case_id
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for CaseLease {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.case_id);
    }
}
