pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::FileSuspensionStore;
pub use memory::MemorySuspensionStore;
pub use sqlite::SqliteSuspensionStore;

use crate::shared::{CaseHandle, CaseId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleStatus {
    Pending,
    Resumed,
    Cancelled,
    Expired,
}

impl HandleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resumed => "resumed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "resumed" => Some(Self::Resumed),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for HandleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of claiming, cancelling or expiring a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleLookup {
    /// The handle was pending; its body is returned and the handle moved on.
    Pending(String),
    Closed(HandleStatus),
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("handle `{handle}` is already stored")]
    DuplicateHandle { handle: CaseHandle },
    #[error("handle `{handle}` cannot be released from status `{status}`")]
    NotResumed {
        handle: CaseHandle,
        status: HandleStatus,
    },
    #[error("handle `{handle}` is unknown")]
    UnknownHandle { handle: CaseHandle },
    #[error("invalid handle status `{value}` in store")]
    InvalidStatus { value: String },
    #[error("invalid handle `{value}` in store: {reason}")]
    InvalidHandle { value: String, reason: String },
    #[error("corrupt suspension record at {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable home of suspended cases. `save` must be durable before it
/// returns; `load` claims a pending handle exactly once. Each case has at
/// most one pending handle.
pub trait SuspensionStore: Send + Sync {
    fn save(&self, handle: &CaseHandle, case_id: &CaseId, body: &str) -> Result<(), StoreError>;

    /// Moves a pending handle to resumed and returns its body.
    fn load(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError>;

    /// Moves a pending handle to cancelled and returns its body.
    fn cancel(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError>;

    /// Moves a pending handle to expired and returns its body.
    fn expire(&self, handle: &CaseHandle) -> Result<HandleLookup, StoreError>;

    /// Returns a claimed handle to pending.
    fn release(&self, handle: &CaseHandle) -> Result<(), StoreError>;

    fn status(&self, handle: &CaseHandle) -> Result<Option<HandleStatus>, StoreError>;

    /// Status and body of a handle, without changing it.
    fn peek(&self, handle: &CaseHandle) -> Result<Option<(HandleStatus, String)>, StoreError>;

    fn pending(&self) -> Result<Vec<(CaseHandle, String)>, StoreError>;

    /// Pending handle of `case_id`, if the case is waiting at a gate.
    fn pending_for_case(&self, case_id: &CaseId) -> Result<Option<CaseHandle>, StoreError>;
}
