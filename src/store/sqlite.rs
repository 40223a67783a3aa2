use super::{HandleLookup, HandleStatus, StoreError, SuspensionStore};
use crate::shared::{now_secs, CaseHandle, CaseId};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};

pub fn suspensions_db_path(state_root: &Path) -> PathBuf {
    state_root.join("cases/suspensions.db")
}

/// Suspended cases in a single sqlite table. Every status change runs in an
/// immediate transaction so concurrent claims serialize on the write lock.
#[derive(Debug, Clone)]
pub struct SqliteSuspensionStore {
    db_path: PathBuf,
}

impl SqliteSuspensionStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn for_state_root(state_root: &Path) -> Result<Self, StoreError> {
        Self::open(&suspensions_db_path(state_root))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.connect()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS suspensions (
                    handle TEXT PRIMARY KEY,
                    case_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    body TEXT NOT NULL,
                    saved_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS suspensions_status ON suspensions(status);
                CREATE INDEX IF NOT EXISTS suspensions_case ON suspensions(case_id, status);",
            )
            .map_err(|source| StoreError::Sql { source })
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let connection = Connection::open(&self.db_path).map_err(|source| StoreError::Open {
            path: self.db_path.display().to_string(),
            source,
        })?;
        connection
            .busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|source| StoreError::Sql { source })?;
        connection
            .execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|source| StoreError::Sql { source })?;
        Ok(connection)
    }

    fn move_pending(
        &self,
        handle: &CaseHandle,
        to: HandleStatus,
    ) -> Result<HandleLookup, StoreError> {
        let mut connection = self.connect()?;
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| StoreError::Sql { source })?;
        let row: Option<(String, String)> = tx
            .query_row(
                "SELECT status, body FROM suspensions WHERE handle = ?1",
                params![handle.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|source| StoreError::Sql { source })?;
        let Some((status, body)) = row else {
            return Ok(HandleLookup::Unknown);
        };
        let status = parse_status(&status)?;
        if status != HandleStatus::Pending {
            return Ok(HandleLookup::Closed(status));
        }
        tx.execute(
            "UPDATE suspensions SET status = ?1, updated_at = ?2 WHERE handle = ?3",
            params![to.as_str(), now_secs(), handle.as_str()],
        )
        .map_err(|source| StoreError::Sql { source })?;
        tx.commit().map_err(|source| StoreError::Sql { source })?;
        Ok(HandleLookup::Pending(body))
    }
}

impl SuspensionStore for SqliteSuspensionStore {
    fn save(&self, handle: &CaseHandle, case_id: &CaseId, body: &str) -> Result<(), StoreError> {
        let now = now_secs();
        let inserted = self
            .connect()?
            .execute(
                "INSERT OR IGNORE INTO suspensions
                     (handle, case_id, status, body, saved_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    handle.as_str(),
                    case_id.as_str(),
                    HandleStatus::Pending.as_str(),
                    body,
                    now
                ],
            )
            .map_err(|source| StoreError::Sql { source })?;
        if inserted == 0 {
            return Err(StoreError::DuplicateHandle {
                handle: handle.clone(),
            });
        }
        Ok(())
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
        let mut connection = self.connect()?;
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| StoreError::Sql { source })?;
        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM suspensions WHERE handle = ?1",
                params![handle.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| StoreError::Sql { source })?;
        let Some(status) = status else {
            return Err(StoreError::UnknownHandle {
                handle: handle.clone(),
            });
        };
        let status = parse_status(&status)?;
        if status != HandleStatus::Resumed {
            return Err(StoreError::NotResumed {
                handle: handle.clone(),
                status,
            });
        }
        tx.execute(
            "UPDATE suspensions SET status = ?1, updated_at = ?2 WHERE handle = ?3",
            params![HandleStatus::Pending.as_str(), now_secs(), handle.as_str()],
        )
        .map_err(|source| StoreError::Sql { source })?;
        tx.commit().map_err(|source| StoreError::Sql { source })
    }

    fn status(&self, handle: &CaseHandle) -> Result<Option<HandleStatus>, StoreError> {
        let status: Option<String> = self
            .connect()?
            .query_row(
                "SELECT status FROM suspensions WHERE handle = ?1",
                params![handle.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| StoreError::Sql { source })?;
        status.as_deref().map(parse_status).transpose()
    }

    fn peek(&self, handle: &CaseHandle) -> Result<Option<(HandleStatus, String)>, StoreError> {
        let row: Option<(String, String)> = self
            .connect()?
            .query_row(
                "SELECT status, body FROM suspensions WHERE handle = ?1",
                params![handle.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|source| StoreError::Sql { source })?;
        row.map(|(status, body)| parse_status(&status).map(|status| (status, body)))
            .transpose()
    }

    fn pending(&self) -> Result<Vec<(CaseHandle, String)>, StoreError> {
        let connection = self.connect()?;
        let mut stmt = connection
            .prepare("SELECT handle, body FROM suspensions WHERE status = ?1 ORDER BY handle")
            .map_err(|source| StoreError::Sql { source })?;
        let rows = stmt
            .query_map(params![HandleStatus::Pending.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|source| StoreError::Sql { source })?;

        let mut out = Vec::new();
        for row in rows {
            let (raw_handle, body) = row.map_err(|source| StoreError::Sql { source })?;
            let handle =
                CaseHandle::parse(&raw_handle).map_err(|reason| StoreError::InvalidHandle {
                    value: raw_handle.clone(),
                    reason,
                })?;
            out.push((handle, body));
        }
        Ok(out)
    }

    fn pending_for_case(&self, case_id: &CaseId) -> Result<Option<CaseHandle>, StoreError> {
        let raw_handle: Option<String> = self
            .connect()?
            .query_row(
                "SELECT handle FROM suspensions WHERE case_id = ?1 AND status = ?2
                 ORDER BY handle LIMIT 1",
                params![case_id.as_str(), HandleStatus::Pending.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| StoreError::Sql { source })?;
        raw_handle
            .map(|raw| {
                CaseHandle::parse(&raw).map_err(|reason| StoreError::InvalidHandle {
                    value: raw.clone(),
                    reason,
                })
            })
            .transpose()
    }
}

fn parse_status(raw: &str) -> Result<HandleStatus, StoreError> {
    HandleStatus::parse(raw).ok_or_else(|| StoreError::InvalidStatus {
        value: raw.to_string(),
    })
}
