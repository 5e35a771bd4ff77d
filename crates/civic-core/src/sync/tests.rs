use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, Semaphore};

use super::*;
use crate::backend::{BackendError, BackendResult};
use crate::feed::ComplaintChange;
use crate::models::complaint::fixtures::{at, complaint};
use crate::models::complaint_update::fixtures::update;
use crate::models::ComplaintStatus;

/// In-memory backend: scripted reads, captured feed senders.
#[derive(Default)]
struct FakeBackend {
    complaints: StdMutex<Vec<Complaint>>,
    timelines: StdMutex<HashMap<ComplaintId, Vec<ComplaintUpdate>>>,
    fail_complaints: StdMutex<Option<String>>,
    fail_timeline: StdMutex<Option<String>>,
    fail_subscribes: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    complaint_senders: StdMutex<Vec<mpsc::Sender<FeedMessage>>>,
    update_senders: StdMutex<Vec<mpsc::Sender<FeedMessage>>>,
    complaint_fetches: AtomicUsize,
}

impl FakeBackend {
    fn with_complaints(complaints: Vec<Complaint>) -> Self {
        Self {
            complaints: StdMutex::new(complaints),
            ..Default::default()
        }
    }

    /// Complaint fetches wait for a permit from the returned semaphore.
    fn gated(complaints: Vec<Complaint>) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let backend = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::with_complaints(complaints)
        };
        (backend, gate)
    }

    fn set_timeline(&self, complaint_id: &str, updates: Vec<ComplaintUpdate>) {
        self.timelines
            .lock()
            .unwrap()
            .insert(complaint_id.parse().unwrap(), updates);
    }

    fn complaint_sender(&self) -> mpsc::Sender<FeedMessage> {
        self.complaint_senders.lock().unwrap().last().unwrap().clone()
    }

    fn update_sender(&self) -> mpsc::Sender<FeedMessage> {
        self.update_senders.lock().unwrap().last().unwrap().clone()
    }

    fn complaint_subscriptions(&self) -> usize {
        self.complaint_senders.lock().unwrap().len()
    }

    fn subscribe_result(&self) -> BackendResult<()> {
        let remaining = self.fail_subscribes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_subscribes.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Realtime("connect refused".to_string()));
        }
        Ok(())
    }
}

impl Backend for FakeBackend {
    async fn fetch_complaints(&self, _citizen_id: &CitizenId) -> BackendResult<Vec<Complaint>> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.complaint_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.fail_complaints.lock().unwrap().clone() {
            return Err(BackendError::Api(reason));
        }
        Ok(self.complaints.lock().unwrap().clone())
    }

    async fn fetch_timeline(
        &self,
        complaint_id: &ComplaintId,
    ) -> BackendResult<Vec<ComplaintUpdate>> {
        if let Some(reason) = self.fail_timeline.lock().unwrap().clone() {
            return Err(BackendError::Api(reason));
        }
        Ok(self
            .timelines
            .lock()
            .unwrap()
            .get(complaint_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn subscribe_complaint_changes(
        &self,
        _citizen_id: &CitizenId,
        sender: mpsc::Sender<FeedMessage>,
    ) -> BackendResult<Subscription> {
        self.subscribe_result()?;
        self.complaint_senders.lock().unwrap().push(sender);
        Ok(Subscription::detached(Feed::Complaints))
    }

    async fn subscribe_update_insertions(
        &self,
        sender: mpsc::Sender<FeedMessage>,
    ) -> BackendResult<Subscription> {
        self.subscribe_result()?;
        self.update_senders.lock().unwrap().push(sender);
        Ok(Subscription::detached(Feed::ComplaintUpdates))
    }
}

fn citizen() -> CitizenId {
    "citizen-1".parse().unwrap()
}

fn id(raw: &str) -> ComplaintId {
    raw.parse().unwrap()
}

fn settings() -> SyncSettings {
    SyncSettings {
        resubscribe_backoff_ms: 10,
        ..SyncSettings::default()
    }
}

async fn start(backend: &Arc<FakeBackend>) -> SyncHandle {
    SyncHandle::start(Arc::clone(backend), citizen(), settings())
        .await
        .unwrap()
}

async fn wait_until(
    handle: &SyncHandle,
    predicate: impl Fn(&ViewSnapshot) -> bool,
) -> ViewSnapshot {
    let mut changes = handle.changes();
    loop {
        let snapshot = handle.snapshot().await;
        if predicate(&snapshot) {
            return snapshot;
        }
        tokio::time::timeout(Duration::from_secs(5), changes.changed())
            .await
            .expect("view did not reach the expected state")
            .expect("view task stopped");
    }
}

fn ids(snapshot: &ViewSnapshot) -> Vec<&str> {
    snapshot
        .complaints
        .iter()
        .map(|complaint| complaint.id.as_str())
        .collect()
}

#[tokio::test(flavor = "current_thread")]
async fn load_selects_newest_and_fetches_its_timeline() {
    let backend = Arc::new(FakeBackend::with_complaints(vec![
        complaint("c2", 1),
        complaint("c1", 0),
    ]));
    backend.set_timeline("c2", vec![update(1, "c2", 2), update(2, "c2", 3)]);
    let handle = start(&backend).await;
    assert_eq!(handle.readiness().await, ReadinessState::Uninitialized);

    handle.load().await.unwrap();

    let snapshot = handle.snapshot().await;
    assert_eq!(snapshot.readiness, ReadinessState::Ready);
    assert_eq!(ids(&snapshot), vec!["c2", "c1"]);
    assert_eq!(snapshot.selected.map(|c| c.id), Some(id("c2")));
    assert_eq!(snapshot.timeline.len(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn live_status_progress_scenario() {
    let c1 = complaint("c1", 0);
    let backend = Arc::new(FakeBackend::with_complaints(vec![c1.clone()]));
    let handle = start(&backend).await;
    handle.load().await.unwrap();
    assert!(handle.timeline().await.is_empty());

    let mut progress = update(1, "c1", 1);
    progress.status = Some(ComplaintStatus::InProgress);
    backend
        .update_sender()
        .send(FeedMessage::UpdateInserted(progress.clone()))
        .await
        .unwrap();
    let snapshot = wait_until(&handle, |s| s.timeline.len() == 1).await;
    assert_eq!(snapshot.timeline, vec![progress]);

    let mut c1_progress = c1;
    c1_progress.status = ComplaintStatus::InProgress;
    c1_progress.updated_at = at(1);
    backend
        .complaint_sender()
        .send(FeedMessage::Complaint(ComplaintChange::Modified(
            c1_progress.clone(),
        )))
        .await
        .unwrap();
    let snapshot = wait_until(&handle, |s| {
        s.selected
            .as_ref()
            .is_some_and(|c| c.status == ComplaintStatus::InProgress)
    })
    .await;
    assert_eq!(snapshot.complaints, vec![c1_progress.clone()]);
    assert_eq!(snapshot.selected, Some(c1_progress));
}

#[tokio::test(flavor = "current_thread")]
async fn events_during_load_are_replayed_after_ready() {
    let (backend, gate) = FakeBackend::gated(vec![complaint("c2", 1), complaint("c1", 0)]);
    let backend = Arc::new(backend);
    let handle = start(&backend).await;

    let loader = handle.clone();
    let load = tokio::spawn(async move { loader.load().await });
    wait_until(&handle, |s| s.readiness == ReadinessState::Loading).await;

    let sender = backend.complaint_sender();
    sender
        .send(FeedMessage::Complaint(ComplaintChange::Created(complaint(
            "c3", 2,
        ))))
        .await
        .unwrap();
    sender
        .send(FeedMessage::Complaint(ComplaintChange::Deleted(id("c1"))))
        .await
        .unwrap();
    let queued = wait_until(&handle, |s| s.queued == 2).await;
    assert_eq!(queued.readiness, ReadinessState::Loading);
    assert!(queued.complaints.is_empty());

    gate.add_permits(1);
    load.await.unwrap().unwrap();

    let snapshot = handle.snapshot().await;
    assert_eq!(snapshot.readiness, ReadinessState::Ready);
    assert_eq!(snapshot.queued, 0);
    assert_eq!(ids(&snapshot), vec!["c3", "c2"]);
    assert_eq!(snapshot.selected.map(|c| c.id), Some(id("c2")));
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_loads_share_one_fetch() {
    let backend = Arc::new(FakeBackend::with_complaints(vec![complaint("c1", 0)]));
    let handle = start(&backend).await;

    let (first, second) = tokio::join!(handle.load(), handle.load());
    first.unwrap();
    second.unwrap();
    assert_eq!(backend.complaint_fetches.load(Ordering::SeqCst), 1);
    assert_eq!(handle.readiness().await, ReadinessState::Ready);
}

#[tokio::test(flavor = "current_thread")]
async fn created_complaint_is_prepended() {
    // Listed as the backend returned them; arrivals are never re-sorted.
    let backend = Arc::new(FakeBackend::with_complaints(vec![
        complaint("c1", 0),
        complaint("c2", 1),
    ]));
    let handle = start(&backend).await;
    handle.load().await.unwrap();

    backend
        .complaint_sender()
        .send(FeedMessage::Complaint(ComplaintChange::Created(complaint(
            "c3", 2,
        ))))
        .await
        .unwrap();
    let snapshot = wait_until(&handle, |s| s.complaints.len() == 3).await;
    assert_eq!(ids(&snapshot), vec!["c3", "c1", "c2"]);
    assert_eq!(snapshot.selected.map(|c| c.id), Some(id("c1")));
}

#[tokio::test(flavor = "current_thread")]
async fn failed_load_reports_operation_and_can_retry() {
    let backend = Arc::new(FakeBackend::with_complaints(vec![complaint("c1", 0)]));
    *backend.fail_complaints.lock().unwrap() = Some("permission denied (403)".to_string());
    let handle = start(&backend).await;

    let error = handle.load().await.unwrap_err();
    assert!(matches!(
        error,
        Error::FetchFailed {
            operation: Operation::Load,
            ..
        }
    ));
    let snapshot = handle.snapshot().await;
    assert_eq!(snapshot.readiness, ReadinessState::Failed);
    assert!(snapshot.complaints.is_empty());
    assert_eq!(snapshot.last_error, Some(error));

    *backend.fail_complaints.lock().unwrap() = None;
    handle.load().await.unwrap();
    assert_eq!(handle.readiness().await, ReadinessState::Ready);
    assert_eq!(handle.complaints().await.len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn timeline_failure_during_load_leaves_nothing_half_applied() {
    let backend = Arc::new(FakeBackend::with_complaints(vec![complaint("c1", 0)]));
    *backend.fail_timeline.lock().unwrap() = Some("timeout".to_string());
    let handle = start(&backend).await;

    let error = handle.load().await.unwrap_err();
    assert!(matches!(
        error,
        Error::FetchFailed {
            operation: Operation::LoadTimeline,
            ..
        }
    ));
    assert!(handle.complaints().await.is_empty());
    assert!(handle.selected().await.is_none());
}

#[tokio::test(flavor = "current_thread")]
async fn select_retargets_and_replaces_timeline() {
    let backend = Arc::new(FakeBackend::with_complaints(vec![
        complaint("c2", 1),
        complaint("c1", 0),
    ]));
    backend.set_timeline("c2", vec![update(1, "c2", 2)]);
    backend.set_timeline("c1", vec![update(5, "c1", 1), update(6, "c1", 4)]);
    let handle = start(&backend).await;
    handle.load().await.unwrap();

    handle.select(id("c1")).await.unwrap();
    let snapshot = handle.snapshot().await;
    assert_eq!(snapshot.selected.map(|c| c.id), Some(id("c1")));
    let timeline: Vec<i64> = snapshot.timeline.iter().map(|u| u.id).collect();
    assert_eq!(timeline, vec![5, 6]);

    // Updates for the previously selected complaint no longer reach the view.
    backend
        .update_sender()
        .send(FeedMessage::UpdateInserted(update(2, "c2", 9)))
        .await
        .unwrap();
    backend
        .update_sender()
        .send(FeedMessage::UpdateInserted(update(7, "c1", 9)))
        .await
        .unwrap();
    let snapshot = wait_until(&handle, |s| s.timeline.len() == 3).await;
    assert!(snapshot.timeline.iter().all(|u| u.complaint_id == id("c1")));
}

#[tokio::test(flavor = "current_thread")]
async fn select_failure_keeps_previous_selection() {
    let backend = Arc::new(FakeBackend::with_complaints(vec![
        complaint("c2", 1),
        complaint("c1", 0),
    ]));
    backend.set_timeline("c2", vec![update(1, "c2", 2)]);
    let handle = start(&backend).await;
    handle.load().await.unwrap();

    *backend.fail_timeline.lock().unwrap() = Some("offline".to_string());
    let error = handle.select(id("c1")).await.unwrap_err();
    assert!(matches!(
        error,
        Error::FetchFailed {
            operation: Operation::Select,
            ..
        }
    ));
    assert_eq!(handle.selected().await.map(|c| c.id), Some(id("c2")));
    assert_eq!(handle.timeline().await.len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn select_unknown_complaint_is_rejected() {
    let backend = Arc::new(FakeBackend::with_complaints(vec![complaint("c1", 0)]));
    let handle = start(&backend).await;
    handle.load().await.unwrap();

    assert_eq!(
        handle.load_timeline(id("missing")).await,
        Err(Error::UnknownComplaint(id("missing")))
    );
}

#[tokio::test(flavor = "current_thread")]
async fn dropped_subscription_resubscribes_and_reconciles() {
    let backend = Arc::new(FakeBackend::with_complaints(vec![
        complaint("c2", 1),
        complaint("c1", 0),
    ]));
    let handle = start(&backend).await;
    handle.load().await.unwrap();
    handle.select(id("c1")).await.unwrap();

    // A complaint was created while the stream was down, and one subscribe
    // attempt fails before the transport comes back.
    backend
        .complaints
        .lock()
        .unwrap()
        .insert(0, complaint("c3", 2));
    backend.set_timeline("c1", vec![update(4, "c1", 4)]);
    backend.fail_subscribes.store(1, Ordering::SeqCst);
    backend
        .complaint_sender()
        .send(FeedMessage::Dropped(Feed::Complaints))
        .await
        .unwrap();

    let snapshot = wait_until(&handle, |s| {
        s.complaints.len() == 3 && s.readiness == ReadinessState::Ready
    })
    .await;
    assert_eq!(backend.complaint_subscriptions(), 2);
    assert_eq!(ids(&snapshot), vec!["c3", "c2", "c1"]);
    // Reconciliation keeps the user's selection.
    assert_eq!(snapshot.selected.map(|c| c.id), Some(id("c1")));
    assert_eq!(snapshot.timeline.len(), 1);
    assert_eq!(snapshot.last_error, None);
}

#[tokio::test(flavor = "current_thread")]
async fn reconcile_keeps_selection_made_while_it_ran() {
    let (backend, gate) = FakeBackend::gated(vec![complaint("c2", 1), complaint("c1", 0)]);
    let backend = Arc::new(backend);
    backend.set_timeline("c2", vec![update(1, "c2", 2)]);
    backend.set_timeline("c1", vec![update(5, "c1", 1)]);
    let handle = start(&backend).await;
    gate.add_permits(1);
    handle.load().await.unwrap();
    assert_eq!(handle.selected().await.map(|c| c.id), Some(id("c2")));

    // The reconcile after a drop waits at the gate while the user selects c1.
    backend
        .complaint_sender()
        .send(FeedMessage::Dropped(Feed::Complaints))
        .await
        .unwrap();
    wait_until(&handle, |s| s.readiness == ReadinessState::Loading).await;
    handle.select(id("c1")).await.unwrap();

    gate.add_permits(1);
    let snapshot = wait_until(&handle, |s| s.readiness == ReadinessState::Ready).await;
    assert_eq!(ids(&snapshot), vec!["c2", "c1"]);
    assert_eq!(snapshot.selected.map(|c| c.id), Some(id("c1")));
    let timeline: Vec<i64> = snapshot.timeline.iter().map(|u| u.id).collect();
    assert_eq!(timeline, vec![5]);
}

#[tokio::test(flavor = "current_thread")]
async fn teardown_stops_merging_and_cancels_subscriptions() {
    let backend = Arc::new(FakeBackend::with_complaints(vec![complaint("c1", 0)]));
    let handle = start(&backend).await;
    handle.load().await.unwrap();
    let before = handle.snapshot().await;

    let complaints = backend.complaint_sender();
    let updates = backend.update_sender();
    // Queued in the channel before teardown runs.
    complaints
        .send(FeedMessage::Complaint(ComplaintChange::Created(complaint(
            "c2", 1,
        ))))
        .await
        .unwrap();

    handle.teardown().await;
    handle.teardown().await;

    assert!(!handle.is_live().await);
    assert!(complaints.is_closed());
    assert!(updates.is_closed());
    let _ = updates
        .send(FeedMessage::UpdateInserted(update(1, "c1", 1)))
        .await;

    assert_eq!(handle.snapshot().await, before);
    assert_eq!(handle.load().await, Err(Error::Closed));
}
