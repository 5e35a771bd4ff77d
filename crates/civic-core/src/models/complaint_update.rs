//! Complaint update model (timeline entries)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ComplaintId, ComplaintStatus};

/// Immutable, timestamped note appended to a complaint's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintUpdate {
    /// Backend sequence number
    pub id: i64,
    /// Complaint this entry belongs to
    pub complaint_id: ComplaintId,
    /// Status the complaint moved to with this update, if any
    #[serde(default)]
    pub status: Option<ComplaintStatus>,
    /// Free-text note
    #[serde(rename = "update_text")]
    pub note: String,
    /// Profile of the authority or admin who wrote the update
    #[serde(default)]
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ComplaintUpdate {
    /// Total order of a timeline: creation time, then sequence id.
    #[must_use]
    pub const fn timeline_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.id)
    }
}
