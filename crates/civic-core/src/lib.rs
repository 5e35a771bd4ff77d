//! civic-core - Core library for Civic Watch
//!
//! This crate contains the complaint models, the Supabase backend binding, and the
//! live complaint view synchronizer used by Civic Watch interfaces.

pub mod backend;
pub mod config;
pub mod error;
pub mod feed;
pub mod models;
pub mod state;
pub mod sync;
pub mod view;

pub use error::{Error, Operation, Result};
pub use feed::{ChangeOp, ComplaintChange, Feed, FeedMessage};
pub use models::{CitizenId, Complaint, ComplaintId, ComplaintStatus, ComplaintUpdate};
pub use state::ReadinessState;
pub use sync::SyncHandle;
pub use view::{LoadMode, ViewSnapshot};
