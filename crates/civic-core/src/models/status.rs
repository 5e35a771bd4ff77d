//! Complaint status lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Lifecycle status of a complaint, mirroring the backend `complaint_status` enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    /// Filed, not yet picked up
    #[default]
    Pending,
    InProgress,
    WorkStarted,
    Completed,
    Rejected,
}

impl ComplaintStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::InProgress,
        Self::WorkStarted,
        Self::Completed,
        Self::Rejected,
    ];

    /// Backend column value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::WorkStarted => "work_started",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    /// Human-readable label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::WorkStarted => "Work Started",
            Self::Completed => "Completed",
            Self::Rejected => "Rejected",
        }
    }

    /// No further transitions are expected once a complaint is completed or rejected.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplaintStatus {
    type Err = Error;

    /// Accepts `in_progress`, `in-progress` and `In Progress` alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown complaint status: {s}")))
    }
}
