use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseFamily {
    Auditor,
    Auditee,
    Terminal,
}

/// Lifecycle phase of a case. Auditor and auditee phases advance forward
/// within their own family; only the engine moves a case into a terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Planning,
    Fieldwork,
    Reporting,
    FollowUp,
    Idle,
    Responding,
    Preparing,
    Monitoring,
    Searching,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Planning => "planning",
            Self::Fieldwork => "fieldwork",
            Self::Reporting => "reporting",
            Self::FollowUp => "follow_up",
            Self::Idle => "idle",
            Self::Responding => "responding",
            Self::Preparing => "preparing",
            Self::Monitoring => "monitoring",
            Self::Searching => "searching",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn family(self) -> PhaseFamily {
        match self {
            Self::Init | Self::Planning | Self::Fieldwork | Self::Reporting | Self::FollowUp => {
                PhaseFamily::Auditor
            }
            Self::Idle | Self::Responding | Self::Preparing | Self::Monitoring | Self::Searching => {
                PhaseFamily::Auditee
            }
            Self::Completed | Self::Failed | Self::Cancelled => PhaseFamily::Terminal,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Init | Self::Idle => 0,
            Self::Planning | Self::Responding | Self::Preparing | Self::Monitoring => 1,
            Self::Fieldwork | Self::Searching => 2,
            Self::Reporting => 3,
            Self::FollowUp => 4,
            Self::Completed | Self::Failed | Self::Cancelled => u8::MAX,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.family() == PhaseFamily::Terminal
    }

    /// Whether a step output may move a case from `self` to `next`.
    pub fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal()
            && !next.is_terminal()
            && self.family() == next.family()
            && next.rank() >= self.rank()
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
