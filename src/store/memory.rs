use super::{HandleLookup, HandleStatus, StoreError, SuspensionStore};
use crate::shared::{CaseHandle, CaseId};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct Entry {
    status: HandleStatus,
    case_id: CaseId,
    body: String,
}

#[derive(Debug, Default)]
pub struct MemorySuspensionStore {
    entries: Mutex<BTreeMap<CaseHandle, Entry>>,
}

impl MemorySuspensionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<CaseHandle, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, handle: &CaseHandle, to: HandleStatus) -> HandleLookup {
        let mut entries = self.entries();
        match entries.get_mut(handle) {
            None => HandleLookup::Unknown,
            Some(entry) if entry.status == HandleStatus::Pending => {
                entry.status = to;
                HandleLookup::Pending(entry.body.clone())
            }
            Some(entry) => HandleLookup::Closed(entry.status),
        }
    }
}

impl SuspensionStore for MemorySuspensionStore {
    fn save(&self, handle: &CaseHandle, case_id: &CaseId, body: &str) -> Result<(), StoreError> {
        let mut entries = self.entries();
        if entries.contains_key(handle) {
            return Err(StoreError::DuplicateHandle {
                handle: handle.clone(),
            });
        }
        entries.insert(
            handle.clone(),
            Entry {
                status: HandleStatus::Pending,
                case_id: case_id.clone(),
                body: body.to_string(),
            },
        );
        Ok(())
    }

    fn load(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError> {
        Ok(self.transition(handle, HandleStatus::Resumed))
    }

    fn cancel(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError> {
        Ok(self.transition(handle, HandleStatus::Cancelled))
    }

    fn expire(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError> {
        Ok(self.transition(handle, HandleStatus::Expired))
    }

    fn release(&self, handle: &CaseHandle) -> Result<(), StoreError> {
        let mut entries = self.entries();
        match entries.get_mut(handle) {
            None => Err(StoreError::UnknownHandle {
                handle: handle.clone(),
            }),
            Some(entry) if entry.status == HandleStatus::Resumed => {
                entry.status = HandleStatus::Pending;
                Ok(())
            }
            Some(entry) => Err(StoreError::NotResumed {
                handle: handle.clone(),
                status: entry.status,
            }),
        }
    }

    fn status(&self, handle: &CaseHandle) -> Result<Option<HandleStatus>, StoreError> {
        Ok(self.entries().get(handle).map(|entry| entry.status))
    }

    fn peek(&self, handle: &CaseHandle) -> Result<Option<(HandleStatus, String)>, StoreError> {
        Ok(self
            .entries()
            .get(handle)
            .map(|entry| (entry.status, entry.body.clone())))
    }

    fn pending(&self) -> Result<Vec<(CaseHandle, String)>, StoreError> {
        Ok(self
            .entries()
            .iter()
            .filter(|(_, entry)| entry.status == HandleStatus::Pending)
            .map(|(handle, entry)| (handle.clone(), entry.body.clone()))
            .collect())
    }

    fn pending_for_case(&self, case_id: &CaseId) -> Result<Option<CaseHandle>, StoreError> {
        Ok(self
            .entries()
            .iter()
            .find(|(_, entry)| entry.status == HandleStatus::Pending && &entry.case_id == case_id)
            .map(|(handle, _)| handle.clone()))
    }
}
