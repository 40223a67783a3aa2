pub mod artifacts;
pub mod phase;
pub mod state;
pub mod update;

pub use artifacts::{ArtifactSlot, Artifacts, MergeError, MergePolicy};
pub use phase::{Phase, PhaseFamily};
pub use state::{CaseState, ExecutionOutcome, ExecutionRecord};
pub use update::{ApprovalRequest, StateUpdate};
