//! Backend collaborator consumed by the live complaint view.
//!
//! [`Backend`] is the seam between the view and the hosted backend: two reads and
//! two change-event subscriptions. [`SupabaseBackend`] binds it to PostgREST and
//! Supabase Realtime; tests substitute an in-memory double.

mod realtime;
mod supabase;

use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::feed::{Feed, FeedMessage};
use crate::models::{CitizenId, Complaint, ComplaintId, ComplaintUpdate};

pub use realtime::{decode_change, RealtimeClient};
pub use supabase::SupabaseBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Invalid backend configuration: {0}")]
    InvalidConfiguration(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend API error: {0}")]
    Api(String),
    #[error("Failed to decode backend payload: {0}")]
    Decode(String),
    #[error("Realtime error: {0}")]
    Realtime(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Reads and change feeds for one citizen's complaints.
///
/// Subscriptions deliver into the bounded `sender`; a full channel applies
/// backpressure to the transport rather than dropping events.
pub trait Backend: Send + Sync + 'static {
    /// All complaints owned by `citizen_id`, newest first (`created_at` desc, `id` desc).
    fn fetch_complaints(
        &self,
        citizen_id: &CitizenId,
    ) -> impl Future<Output = BackendResult<Vec<Complaint>>> + Send;

    /// Timeline of one complaint, oldest first (`created_at` asc, `id` asc).
    fn fetch_timeline(
        &self,
        complaint_id: &ComplaintId,
    ) -> impl Future<Output = BackendResult<Vec<ComplaintUpdate>>> + Send;

    /// Create/modify/delete events for complaints owned by `citizen_id`.
    fn subscribe_complaint_changes(
        &self,
        citizen_id: &CitizenId,
        sender: mpsc::Sender<FeedMessage>,
    ) -> impl Future<Output = BackendResult<Subscription>> + Send;

    /// Insert events for complaint updates visible to the session.
    fn subscribe_update_insertions(
        &self,
        sender: mpsc::Sender<FeedMessage>,
    ) -> impl Future<Output = BackendResult<Subscription>> + Send;
}

/// Handle to a live change-event stream.
///
/// Cancelling is idempotent, and dropping the handle cancels it as well.
#[derive(Debug)]
pub struct Subscription {
    feed: Feed,
    task: Option<JoinHandle<()>>,
    cancelled: bool,
}

impl Subscription {
    /// Subscription backed by a transport pump task.
    pub const fn spawned(feed: Feed, task: JoinHandle<()>) -> Self {
        Self {
            feed,
            task: Some(task),
            cancelled: false,
        }
    }

    /// Subscription whose events are pushed by an in-process source.
    pub const fn detached(feed: Feed) -> Self {
        Self {
            feed,
            task: None,
            cancelled: false,
        }
    }

    pub const fn feed(&self) -> Feed {
        self.feed
    }

    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        tracing::debug!(feed = %self.feed, "Subscription cancelled");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
