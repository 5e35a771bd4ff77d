//! Data models for Civic Watch

pub(crate) mod complaint;
pub(crate) mod complaint_update;
mod status;

pub use complaint::{CitizenId, Complaint, ComplaintId};
pub use complaint_update::ComplaintUpdate;
pub use status::ComplaintStatus;
