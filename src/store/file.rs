use super::{HandleLookup, HandleStatus, StoreError, SuspensionStore};
use crate::shared::{CaseHandle, CaseId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const STATUSES: [HandleStatus; 4] = [
    HandleStatus::Pending,
    HandleStatus::Resumed,
    HandleStatus::Cancelled,
    HandleStatus::Expired,
];

#[derive(Debug, Serialize, Deserialize)]
struct StoredSuspension {
    case_id: CaseId,
    body: String,
}

/// One JSON file per handle under `cases/<status>/`. Status changes are
/// renames between the status directories, so exactly one caller wins a
/// concurrent claim.
#[derive(Debug, Clone)]
pub struct FileSuspensionStore {
    root: PathBuf,
}

impl FileSuspensionStore {
    pub fn new(state_root: &Path) -> Result<Self, StoreError> {
        let root = state_root.join("cases");
        for status in STATUSES {
            let dir = root.join(status.as_str());
            fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, status: HandleStatus) -> PathBuf {
        self.root.join(status.as_str())
    }

    fn path_for(&self, status: HandleStatus, handle: &CaseHandle) -> PathBuf {
        self.dir_for(status).join(format!("{}.json", handle.as_str()))
    }

    fn find_status(&self, handle: &CaseHandle) -> Option<HandleStatus> {
        STATUSES
            .into_iter()
            .find(|status| self.path_for(*status, handle).is_file())
    }

    fn rename_between(
        &self,
        handle: &CaseHandle,
        from: HandleStatus,
        to: HandleStatus,
    ) -> std::io::Result<PathBuf> {
        let target = self.path_for(to, handle);
        fs::rename(self.path_for(from, handle), &target)?;
        sync_dir(&self.dir_for(from))?;
        sync_dir(&self.dir_for(to))?;
        Ok(target)
    }

    fn move_pending(
        &self,
        handle: &CaseHandle,
        to: HandleStatus,
    ) -> Result<HandleLookup, StoreError> {
        match self.rename_between(handle, HandleStatus::Pending, to) {
            Ok(target) => Ok(HandleLookup::Pending(read_record(&target)?.body)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(match self.find_status(handle) {
                Some(status) => HandleLookup::Closed(status),
                None => HandleLookup::Unknown,
            }),
            Err(source) => Err(io_error(&self.path_for(HandleStatus::Pending, handle), source)),
        }
    }

    fn pending_records(&self) -> Result<Vec<(CaseHandle, StoredSuspension)>, StoreError> {
        let dir = self.dir_for(HandleStatus::Pending);
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|source| io_error(&dir, source))? {
            let entry = entry.map_err(|source| io_error(&dir, source))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            let handle = CaseHandle::parse(stem).map_err(|reason| StoreError::InvalidHandle {
                value: stem.to_string(),
                reason,
            })?;
            let record = match read_record(&path) {
                Ok(record) => record,
                // claimed by a concurrent resume
                Err(StoreError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                    continue
                }
                Err(err) => return Err(err),
            };
            out.push((handle, record));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

impl SuspensionStore for FileSuspensionStore {
    fn save(&self, handle: &CaseHandle, case_id: &CaseId, body: &str) -> Result<(), StoreError> {
        if self.find_status(handle).is_some() {
            return Err(StoreError::DuplicateHandle {
                handle: handle.clone(),
            });
        }
        let path = self.path_for(HandleStatus::Pending, handle);
        let record = StoredSuspension {
            case_id: case_id.clone(),
            body: body.to_string(),
        };
        let encoded = serde_json::to_vec(&record).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        atomic_write_file(&path, &encoded).map_err(|source| io_error(&path, source))
    }

    fn load(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError> {
        self.move_pending(handle, HandleStatus::Resumed)
    }

    fn cancel(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError> {
        self.move_pending(handle, HandleStatus::Cancelled)
    }

    fn expire(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError> {
        self.move_pending(handle, HandleStatus::Expired)
    }

    fn release(&self, handle: &CaseHandle) -> Result<(), StoreError> {
        match self.rename_between(handle, HandleStatus::Resumed, HandleStatus::Pending) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => match self.find_status(handle) {
                Some(status) => Err(StoreError::NotResumed {
                    handle: handle.clone(),
                    status,
                }),
                None => Err(StoreError::UnknownHandle {
                    handle: handle.clone(),
                }),
            },
            Err(source) => Err(io_error(&self.path_for(HandleStatus::Resumed, handle), source)),
        }
    }

    fn status(&self, handle: &CaseHandle) -> Result<Option<HandleStatus>, StoreError> {
        Ok(self.find_status(handle))
    }

    fn peek(&self, handle: &CaseHandle) -> Result<Option<(HandleStatus, String)>, StoreError> {
        for status in STATUSES {
            match read_record(&self.path_for(status, handle)) {
                Ok(record) => return Ok(Some((status, record.body))),
                Err(StoreError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    fn pending(&self) -> Result<Vec<(CaseHandle, String)>, StoreError> {
        Ok(self
            .pending_records()?
            .into_iter()
            .map(|(handle, record)| (handle, record.body))
            .collect())
    }

    fn pending_for_case(&self, case_id: &CaseId) -> Result<Option<CaseHandle>, StoreError> {
        Ok(self
            .pending_records()?
            .into_iter()
            .find(|(_, record)| &record.case_id == case_id)
            .map(|(handle, _)| handle))
    }
}

fn read_record(path: &Path) -> Result<StoredSuspension, StoreError> {
    let raw = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
    serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
        path: path.display().to_string(),
        source,
    })
}

fn atomic_write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent"))?;
    let tmp_path = parent.join(format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("case"),
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or(0),
    ));

    {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    sync_dir(parent)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}
