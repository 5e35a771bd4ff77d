//! In-memory projection of one citizen's complaints and the selected timeline.
//!
//! `ComplaintView` is the merge core of the live view: it performs no I/O and is
//! driven by [`crate::sync`], which owns the backend and the event channel. Every
//! mutator first checks the liveness flag, so once [`ComplaintView::shutdown`] has
//! run under the view lock no later event can change the state.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::feed::{ComplaintChange, FeedMessage};
use crate::models::{Complaint, ComplaintId, ComplaintUpdate};
use crate::state::ReadinessState;

/// How a completed load chooses the selected complaint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Select the newest complaint.
    Initial,
    /// Keep the current selection if it still exists.
    Reconcile,
}

/// Result of the reads behind a load, committed atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedView {
    pub complaints: Vec<Complaint>,
    pub selected: Option<ComplaintId>,
    pub timeline: Vec<ComplaintUpdate>,
}

/// Outcome of offering one feed message to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Merged,
    /// Held until the view is ready.
    Queued,
    /// Duplicate delivery of something already applied.
    Duplicate,
    /// Older than the row already held.
    Stale,
    /// Not relevant to the current view, or the view is closed.
    Ignored,
}

/// Point-in-time copy of the view for renderers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSnapshot {
    pub readiness: ReadinessState,
    pub complaints: Vec<Complaint>,
    pub selected: Option<Complaint>,
    pub timeline: Vec<ComplaintUpdate>,
    /// Events waiting for the view to become ready
    pub queued: usize,
    pub last_error: Option<Error>,
}

#[derive(Debug)]
struct Retarget {
    complaint_id: ComplaintId,
    buffered: Vec<ComplaintUpdate>,
}

#[derive(Debug)]
pub struct ComplaintView {
    readiness: ReadinessState,
    complaints: Vec<Complaint>,
    selected: Option<Complaint>,
    timeline: Vec<ComplaintUpdate>,
    pending: VecDeque<FeedMessage>,
    max_pending: usize,
    needs_reconcile: bool,
    retarget: Option<Retarget>,
    last_error: Option<Error>,
    live: bool,
}

impl ComplaintView {
    pub fn new(max_pending: usize) -> Self {
        Self {
            readiness: ReadinessState::Uninitialized,
            complaints: Vec::new(),
            selected: None,
            timeline: Vec::new(),
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            needs_reconcile: false,
            retarget: None,
            last_error: None,
            live: true,
        }
    }

    pub const fn is_live(&self) -> bool {
        self.live
    }

    pub const fn readiness(&self) -> ReadinessState {
        self.readiness
    }

    pub fn complaints(&self) -> &[Complaint] {
        &self.complaints
    }

    pub const fn selected(&self) -> Option<&Complaint> {
        self.selected.as_ref()
    }

    pub fn selected_id(&self) -> Option<ComplaintId> {
        self.selected.as_ref().map(|complaint| complaint.id.clone())
    }

    pub fn timeline(&self) -> &[ComplaintUpdate] {
        &self.timeline
    }

    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            readiness: self.readiness,
            complaints: self.complaints.clone(),
            selected: self.selected.clone(),
            timeline: self.timeline.clone(),
            queued: self.pending.len(),
            last_error: self.last_error.clone(),
        }
    }

    /// Enter `Loading`. Returns `false` once the view is closed.
    pub fn begin_load(&mut self) -> bool {
        if !self.live {
            return false;
        }
        self.readiness = ReadinessState::Loading;
        true
    }

    /// Replace the collection and timeline, become ready, then replay queued events
    /// in arrival order. Returns the number of replayed events.
    pub fn commit_load(&mut self, loaded: LoadedView) -> usize {
        if !self.live {
            return 0;
        }

        let LoadedView {
            complaints,
            selected,
            mut timeline,
        } = loaded;
        self.complaints = complaints;
        self.selected = selected.and_then(|id| self.find(&id).cloned());
        if self.selected.is_some() {
            timeline.sort_by_key(ComplaintUpdate::timeline_key);
            timeline.dedup_by_key(|update| update.id);
            self.timeline = timeline;
        } else {
            self.timeline.clear();
        }
        self.readiness = ReadinessState::Ready;
        self.last_error = None;

        let queued = std::mem::take(&mut self.pending);
        let replayed = queued.len();
        for message in queued {
            self.merge(message);
        }
        replayed
    }

    /// Enter `Failed`, keeping the last-known-good collection and timeline.
    pub fn fail_load(&mut self, error: Error) {
        if !self.live {
            return;
        }
        self.readiness = ReadinessState::Failed;
        self.last_error = Some(error);
    }

    /// Whether queued events were discarded and a reload is owed.
    pub fn take_reconcile_request(&mut self) -> bool {
        std::mem::take(&mut self.needs_reconcile)
    }

    /// Start re-targeting the selection. Timeline events for the target are buffered
    /// until [`Self::commit_retarget`] installs the fetched timeline.
    pub fn begin_retarget(&mut self, complaint_id: &ComplaintId) -> Result<()> {
        if !self.live {
            return Err(Error::Closed);
        }
        if self.find(complaint_id).is_none() {
            return Err(Error::UnknownComplaint(complaint_id.clone()));
        }
        self.retarget = Some(Retarget {
            complaint_id: complaint_id.clone(),
            buffered: Vec::new(),
        });
        Ok(())
    }

    /// Make `complaint_id` the selected complaint with `timeline` as its history.
    pub fn commit_retarget(
        &mut self,
        complaint_id: &ComplaintId,
        mut timeline: Vec<ComplaintUpdate>,
    ) -> Result<()> {
        if !self.live {
            return Err(Error::Closed);
        }
        let buffered = match self.retarget.take() {
            Some(retarget) if &retarget.complaint_id == complaint_id => retarget.buffered,
            other => {
                self.retarget = other;
                Vec::new()
            }
        };
        let Some(complaint) = self.find(complaint_id).cloned() else {
            return Err(Error::UnknownComplaint(complaint_id.clone()));
        };

        timeline.sort_by_key(ComplaintUpdate::timeline_key);
        timeline.dedup_by_key(|update| update.id);
        for update in buffered {
            insert_update(&mut timeline, update);
        }
        self.selected = Some(complaint);
        self.timeline = timeline;
        Ok(())
    }

    /// Abandon a re-target after a failed fetch; the selection is unchanged.
    pub fn abort_retarget(&mut self, complaint_id: &ComplaintId, error: Error) {
        if self
            .retarget
            .as_ref()
            .is_some_and(|retarget| &retarget.complaint_id == complaint_id)
        {
            self.retarget = None;
        }
        if self.live {
            self.last_error = Some(error);
        }
    }

    /// Offer one message to the view: merged when ready, queued otherwise.
    pub fn apply(&mut self, message: FeedMessage) -> Applied {
        if !self.live {
            return Applied::Ignored;
        }
        if let FeedMessage::Dropped(feed) = message {
            self.last_error = Some(Error::SubscriptionDropped { feed });
            return Applied::Ignored;
        }
        if !self.readiness.is_ready() {
            return self.enqueue(message);
        }
        self.merge(message)
    }

    /// Clear the liveness flag. Returns whether the view was live.
    pub fn shutdown(&mut self) -> bool {
        let was_live = self.live;
        self.live = false;
        self.pending.clear();
        self.retarget = None;
        was_live
    }

    fn enqueue(&mut self, message: FeedMessage) -> Applied {
        if self.pending.len() >= self.max_pending {
            tracing::warn!(
                limit = self.max_pending,
                "Too many events queued while loading; a reload will follow"
            );
            self.pending.clear();
            self.needs_reconcile = true;
            return Applied::Ignored;
        }
        self.pending.push_back(message);
        Applied::Queued
    }

    fn merge(&mut self, message: FeedMessage) -> Applied {
        match message {
            FeedMessage::Complaint(change) => self.merge_complaint(change),
            FeedMessage::UpdateInserted(update) => self.merge_update(update),
            FeedMessage::Dropped(_) => Applied::Ignored,
        }
    }

    fn merge_complaint(&mut self, change: ComplaintChange) -> Applied {
        tracing::trace!(
            complaint_id = %change.complaint_id(),
            op = ?change.op(),
            "Merging complaint change"
        );
        match change {
            ComplaintChange::Created(complaint) => {
                if self.position(&complaint.id).is_some() {
                    return Applied::Duplicate;
                }
                tracing::debug!(complaint_id = %complaint.id, "Complaint created");
                // Arrivals are prepended, not re-sorted by creation time.
                self.complaints.insert(0, complaint);
                Applied::Merged
            }
            ComplaintChange::Modified(complaint) => {
                let Some(index) = self.position(&complaint.id) else {
                    tracing::debug!(complaint_id = %complaint.id, "Ignoring change to unknown complaint");
                    return Applied::Ignored;
                };
                if !self.complaints[index].is_superseded_by(&complaint) {
                    tracing::warn!(complaint_id = %complaint.id, "Ignoring stale complaint change");
                    return Applied::Stale;
                }
                if self
                    .selected
                    .as_ref()
                    .is_some_and(|selected| selected.id == complaint.id)
                {
                    self.selected = Some(complaint.clone());
                }
                self.complaints[index] = complaint;
                Applied::Merged
            }
            ComplaintChange::Deleted(complaint_id) => {
                let Some(index) = self.position(&complaint_id) else {
                    return Applied::Ignored;
                };
                self.complaints.remove(index);
                if self
                    .selected
                    .as_ref()
                    .is_some_and(|selected| selected.id == complaint_id)
                {
                    self.selected = None;
                    self.timeline.clear();
                }
                tracing::debug!(%complaint_id, "Complaint deleted");
                Applied::Merged
            }
        }
    }

    fn merge_update(&mut self, update: ComplaintUpdate) -> Applied {
        if let Some(retarget) = self.retarget.as_mut() {
            if retarget.complaint_id == update.complaint_id {
                insert_update(&mut retarget.buffered, update.clone());
            }
        }

        let is_selected = self
            .selected
            .as_ref()
            .is_some_and(|selected| selected.id == update.complaint_id);
        if !is_selected {
            return Applied::Ignored;
        }
        if insert_update(&mut self.timeline, update) {
            Applied::Merged
        } else {
            Applied::Duplicate
        }
    }

    fn position(&self, complaint_id: &ComplaintId) -> Option<usize> {
        self.complaints
            .iter()
            .position(|complaint| &complaint.id == complaint_id)
    }

    fn find(&self, complaint_id: &ComplaintId) -> Option<&Complaint> {
        self.complaints
            .iter()
            .find(|complaint| &complaint.id == complaint_id)
    }
}

/// Insert at the `(created_at, id)` position; in-order delivery appends.
fn insert_update(timeline: &mut Vec<ComplaintUpdate>, update: ComplaintUpdate) -> bool {
    if timeline.iter().any(|existing| existing.id == update.id) {
        return false;
    }
    let key = update.timeline_key();
    let index = timeline.partition_point(|existing| existing.timeline_key() <= key);
    timeline.insert(index, update);
    true
}
