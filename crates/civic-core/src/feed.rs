//! Change-event vocabulary shared by the transport and the view.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::models::{Complaint, ComplaintId, ComplaintUpdate};

/// One of the two change-event streams a view listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    Complaints,
    ComplaintUpdates,
}

impl Feed {
    /// Backend table the feed watches
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Complaints => "complaints",
            Self::ComplaintUpdates => "complaint_updates",
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Row-level operation carried by a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Created,
    Modified,
    Deleted,
}

impl FromStr for ChangeOp {
    type Err = Error;

    /// Parses the transport's `INSERT` / `UPDATE` / `DELETE` tags.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Created),
            "UPDATE" => Ok(Self::Modified),
            "DELETE" => Ok(Self::Deleted),
            other => Err(Error::InvalidInput(format!("Unknown change type: {other}"))),
        }
    }
}

/// Change to a complaint row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComplaintChange {
    Created(Complaint),
    Modified(Complaint),
    Deleted(ComplaintId),
}

impl ComplaintChange {
    #[must_use]
    pub const fn op(&self) -> ChangeOp {
        match self {
            Self::Created(_) => ChangeOp::Created,
            Self::Modified(_) => ChangeOp::Modified,
            Self::Deleted(_) => ChangeOp::Deleted,
        }
    }

    #[must_use]
    pub const fn complaint_id(&self) -> &ComplaintId {
        match self {
            Self::Created(complaint) | Self::Modified(complaint) => &complaint.id,
            Self::Deleted(id) => id,
        }
    }
}

/// Message delivered from a subscription to the consuming view task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Complaint(ComplaintChange),
    UpdateInserted(ComplaintUpdate),
    /// The transport lost the stream; events may have been missed.
    Dropped(Feed),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_op_parses_transport_tags() {
        assert_eq!("INSERT".parse::<ChangeOp>().unwrap(), ChangeOp::Created);
        assert_eq!("update".parse::<ChangeOp>().unwrap(), ChangeOp::Modified);
        assert_eq!("DELETE".parse::<ChangeOp>().unwrap(), ChangeOp::Deleted);
        assert!("TRUNCATE".parse::<ChangeOp>().is_err());
    }

    #[test]
    fn feed_names_its_table() {
        assert_eq!(Feed::Complaints.to_string(), "complaints");
        assert_eq!(Feed::ComplaintUpdates.table(), "complaint_updates");
    }

    #[test]
    fn complaint_change_reports_op_and_id() {
        let created = ComplaintChange::Created(crate::models::complaint::fixtures::complaint("c1", 0));
        assert_eq!(created.op(), ChangeOp::Created);
        assert_eq!(created.complaint_id().as_str(), "c1");

        let deleted = ComplaintChange::Deleted("c9".parse().unwrap());
        assert_eq!(deleted.op(), ChangeOp::Deleted);
        assert_eq!(deleted.complaint_id().as_str(), "c9");
    }
}
