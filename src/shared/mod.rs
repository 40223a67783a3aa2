pub mod ids;
pub mod logging;
pub mod time;

pub use ids::{CaseHandle, CaseId, TenantId};
pub use logging::EventLog;
pub use time::now_secs;
