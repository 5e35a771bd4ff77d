//! Live complaint view synchronizer.
//!
//! [`SyncHandle::start`] subscribes to both change feeds and spawns a single
//! consuming task. Feed messages arrive on one bounded channel; commands (load,
//! select, teardown) and fetch completions arrive on another. Fetches run as
//! separate tasks, so events keep flowing into the view's queue while a load is in
//! flight. All view mutations happen under one lock.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::backend::{Backend, BackendResult, Subscription};
use crate::config::SyncSettings;
use crate::error::{Error, Operation, Result};
use crate::feed::{Feed, FeedMessage};
use crate::models::{CitizenId, Complaint, ComplaintId, ComplaintUpdate};
use crate::state::ReadinessState;
use crate::view::{Applied, ComplaintView, LoadMode, LoadedView, ViewSnapshot};

const COMMAND_CAPACITY: usize = 32;

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    Load {
        mode: LoadMode,
        reply: Option<Reply>,
    },
    Select {
        complaint_id: ComplaintId,
        operation: Operation,
        reply: Reply,
    },
    LoadFinished {
        generation: u64,
        outcome: Result<LoadedView>,
    },
    SelectFinished {
        generation: u64,
        complaint_id: ComplaintId,
        outcome: Result<Vec<ComplaintUpdate>>,
        reply: Reply,
    },
    Resubscribe(Feed),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running live complaint view. Cheap to clone.
///
/// Dropping the last clone stops the consuming task; call [`SyncHandle::teardown`]
/// for an orderly shutdown.
#[derive(Clone)]
pub struct SyncHandle {
    inner: Arc<Inner>,
}

struct Inner {
    citizen_id: CitizenId,
    view: Arc<Mutex<ComplaintView>>,
    commands: mpsc::Sender<Command>,
    revisions: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl SyncHandle {
    /// Subscribe to both feeds for `citizen_id` and start the consuming task.
    ///
    /// The view starts `Uninitialized`; events that arrive before the first
    /// [`load`](Self::load) completes are queued.
    pub async fn start<B: Backend>(
        backend: Arc<B>,
        citizen_id: CitizenId,
        settings: SyncSettings,
    ) -> Result<Self> {
        let (feed_tx, feed_rx) = mpsc::channel(settings.channel_capacity.max(1));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (revision_tx, revision_rx) = watch::channel(0);
        let view = Arc::new(Mutex::new(ComplaintView::new(settings.max_pending_events)));

        let complaints = backend
            .subscribe_complaint_changes(&citizen_id, feed_tx.clone())
            .await?;
        let updates = backend.subscribe_update_insertions(feed_tx.clone()).await?;
        tracing::info!(%citizen_id, "Live complaint view subscribed");

        let worker = Worker {
            backend,
            citizen_id: citizen_id.clone(),
            settings,
            view: Arc::clone(&view),
            revision: revision_tx,
            commands_tx: command_tx.clone(),
            commands: command_rx,
            feed_tx,
            feed: feed_rx,
            complaint_subscription: Some(complaints),
            update_subscription: Some(updates),
            load_in_flight: false,
            reconcile_queued: false,
            load_waiters: Vec::new(),
            select_generation: 0,
        };
        let task = tokio::spawn(worker.run());

        Ok(Self {
            inner: Arc::new(Inner {
                citizen_id,
                view,
                commands: command_tx,
                revisions: revision_rx,
                task,
            }),
        })
    }

    pub fn citizen_id(&self) -> &CitizenId {
        &self.inner.citizen_id
    }

    /// Fetch the citizen's complaints and the newest complaint's timeline.
    ///
    /// Concurrent calls share one fetch. On failure the view keeps its previous
    /// contents and becomes `Failed`; calling `load` again retries.
    pub async fn load(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Load {
            mode: LoadMode::Initial,
            reply: Some(reply),
        })
        .await?;
        response.await.map_err(|_| Error::Closed)?
    }

    /// Make `complaint_id` the selected complaint and load its timeline.
    pub async fn select(&self, complaint_id: ComplaintId) -> Result<()> {
        self.retarget(complaint_id, Operation::Select).await
    }

    /// Replace the timeline of `complaint_id` in full, selecting it.
    pub async fn load_timeline(&self, complaint_id: ComplaintId) -> Result<()> {
        self.retarget(complaint_id, Operation::LoadTimeline).await
    }

    async fn retarget(&self, complaint_id: ComplaintId, operation: Operation) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Select {
            complaint_id,
            operation,
            reply,
        })
        .await?;
        response.await.map_err(|_| Error::Closed)?
    }

    /// Stop merging events and cancel both subscriptions. Safe to call repeatedly.
    pub async fn teardown(&self) {
        let was_live = self.inner.view.lock().await.shutdown();
        if !was_live {
            return;
        }

        let (done, finished) = oneshot::channel();
        if self.inner.commands.send(Command::Shutdown(done)).await.is_ok() {
            let _ = finished.await;
        }
        tracing::info!(citizen_id = %self.inner.citizen_id, "Live complaint view torn down");
    }

    pub async fn is_live(&self) -> bool {
        self.inner.view.lock().await.is_live()
    }

    pub async fn snapshot(&self) -> ViewSnapshot {
        self.inner.view.lock().await.snapshot()
    }

    pub async fn readiness(&self) -> ReadinessState {
        self.inner.view.lock().await.readiness()
    }

    pub async fn complaints(&self) -> Vec<Complaint> {
        self.inner.view.lock().await.complaints().to_vec()
    }

    pub async fn selected(&self) -> Option<Complaint> {
        self.inner.view.lock().await.selected().cloned()
    }

    pub async fn timeline(&self) -> Vec<ComplaintUpdate> {
        self.inner.view.lock().await.timeline().to_vec()
    }

    /// Revision counter bumped after every view change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revisions.clone()
    }

    async fn send(&self, command: Command) -> Result<()> {
        if !self.is_live().await {
            return Err(Error::Closed);
        }
        self.inner
            .commands
            .send(command)
            .await
            .map_err(|_| Error::Closed)
    }
}

struct Worker<B: Backend> {
    backend: Arc<B>,
    citizen_id: CitizenId,
    settings: SyncSettings,
    view: Arc<Mutex<ComplaintView>>,
    revision: watch::Sender<u64>,
    commands_tx: mpsc::Sender<Command>,
    commands: mpsc::Receiver<Command>,
    feed_tx: mpsc::Sender<FeedMessage>,
    feed: mpsc::Receiver<FeedMessage>,
    complaint_subscription: Option<Subscription>,
    update_subscription: Option<Subscription>,
    load_in_flight: bool,
    reconcile_queued: bool,
    load_waiters: Vec<Reply>,
    select_generation: u64,
}

impl<B: Backend> Worker<B> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if let Command::Shutdown(done) = command {
                        self.cancel_subscriptions();
                        let _ = done.send(());
                        break;
                    }
                    self.handle_command(command).await;
                }
                Some(message) = self.feed.recv() => {
                    self.handle_feed(message).await;
                }
            }
        }
        self.cancel_subscriptions();
        for waiter in self.load_waiters.drain(..) {
            let _ = waiter.send(Err(Error::Closed));
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Load { mode, reply } => self.start_load(mode, reply).await,
            Command::LoadFinished {
                generation,
                outcome,
            } => self.finish_load(generation, outcome).await,
            Command::Select {
                complaint_id,
                operation,
                reply,
            } => self.start_select(complaint_id, operation, reply).await,
            Command::SelectFinished {
                generation,
                complaint_id,
                outcome,
                reply,
            } => {
                self.finish_select(generation, &complaint_id, outcome, reply)
                    .await;
            }
            Command::Resubscribe(feed) => self.resubscribe(feed).await,
            Command::Shutdown(done) => {
                let _ = done.send(());
            }
        }
    }

    async fn handle_feed(&mut self, message: FeedMessage) {
        let dropped = match &message {
            FeedMessage::Dropped(feed) => Some(*feed),
            _ => None,
        };

        let applied = self.view.lock().await.apply(message);
        match applied {
            Applied::Merged | Applied::Queued => self.bump(),
            Applied::Duplicate | Applied::Stale | Applied::Ignored => {}
        }

        if let Some(feed) = dropped {
            self.bump();
            self.resubscribe(feed).await;
        }
    }

    async fn start_load(&mut self, mode: LoadMode, reply: Option<Reply>) {
        if let Some(reply) = reply {
            self.load_waiters.push(reply);
        }
        if self.load_in_flight {
            if mode == LoadMode::Reconcile {
                self.reconcile_queued = true;
            }
            return;
        }

        let current = {
            let mut view = self.view.lock().await;
            if !view.begin_load() {
                return;
            }
            view.selected_id()
        };
        self.load_in_flight = true;
        self.bump();
        tracing::debug!(citizen_id = %self.citizen_id, ?mode, "Loading complaints");

        let generation = self.select_generation;
        let backend = Arc::clone(&self.backend);
        let citizen_id = self.citizen_id.clone();
        let commands = self.commands_tx.clone();
        tokio::spawn(async move {
            let outcome = fetch_view(backend.as_ref(), &citizen_id, mode, current).await;
            let _ = commands
                .send(Command::LoadFinished {
                    generation,
                    outcome,
                })
                .await;
        });
    }

    async fn finish_load(&mut self, generation: u64, outcome: Result<LoadedView>) {
        self.load_in_flight = false;

        let (result, reconcile) = {
            let mut view = self.view.lock().await;
            match outcome {
                Ok(mut loaded) => {
                    if generation != self.select_generation {
                        // The selection was re-targeted while this fetch ran; keep it.
                        loaded.selected = view.selected_id();
                        loaded.timeline = view.timeline().to_vec();
                    }
                    let count = loaded.complaints.len();
                    let replayed = view.commit_load(loaded);
                    tracing::info!(
                        citizen_id = %self.citizen_id,
                        complaints = count,
                        replayed,
                        "Complaint view ready"
                    );
                    (Ok(()), view.take_reconcile_request())
                }
                Err(error) => {
                    tracing::warn!(citizen_id = %self.citizen_id, %error, "Complaint load failed");
                    view.fail_load(error.clone());
                    (Err(error), false)
                }
            }
        };
        self.bump();

        for waiter in self.load_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }

        let reconcile = std::mem::take(&mut self.reconcile_queued) || reconcile;
        if reconcile && result.is_ok() {
            self.start_load(LoadMode::Reconcile, None).await;
        }
    }

    async fn start_select(&mut self, complaint_id: ComplaintId, operation: Operation, reply: Reply) {
        if let Err(error) = self.view.lock().await.begin_retarget(&complaint_id) {
            let _ = reply.send(Err(error));
            return;
        }

        self.select_generation += 1;
        let generation = self.select_generation;
        let backend = Arc::clone(&self.backend);
        let commands = self.commands_tx.clone();
        tokio::spawn(async move {
            let outcome = backend
                .fetch_timeline(&complaint_id)
                .await
                .map_err(|error| Error::fetch_failed(operation, &error));
            let _ = commands
                .send(Command::SelectFinished {
                    generation,
                    complaint_id,
                    outcome,
                    reply,
                })
                .await;
        });
    }

    async fn finish_select(
        &mut self,
        generation: u64,
        complaint_id: &ComplaintId,
        outcome: Result<Vec<ComplaintUpdate>>,
        reply: Reply,
    ) {
        if generation != self.select_generation {
            // A later selection owns the view now.
            let _ = reply.send(outcome.map(|_| ()));
            return;
        }

        let result = {
            let mut view = self.view.lock().await;
            match outcome {
                Ok(timeline) => view.commit_retarget(complaint_id, timeline),
                Err(error) => {
                    tracing::warn!(%complaint_id, %error, "Timeline load failed");
                    view.abort_retarget(complaint_id, error.clone());
                    Err(error)
                }
            }
        };
        self.bump();
        let _ = reply.send(result);
    }

    async fn resubscribe(&mut self, feed: Feed) {
        if !self.view.lock().await.is_live() {
            return;
        }
        if let Some(mut stale) = self.take_subscription(feed) {
            tracing::debug!(feed = %stale.feed(), "Cancelling dropped subscription");
            stale.cancel();
        }

        match self.subscribe(feed).await {
            Ok(subscription) => {
                tracing::info!(%feed, "Resubscribed; reconciling complaint view");
                match feed {
                    Feed::Complaints => self.complaint_subscription = Some(subscription),
                    Feed::ComplaintUpdates => self.update_subscription = Some(subscription),
                }
                // Nothing to reconcile until the first load has been requested.
                let readiness = self.view.lock().await.readiness();
                if readiness != ReadinessState::Uninitialized {
                    self.start_load(LoadMode::Reconcile, None).await;
                }
            }
            Err(error) => {
                tracing::warn!(%feed, %error, "Resubscribe failed; retrying");
                let commands = self.commands_tx.clone();
                let delay = self.settings.resubscribe_backoff();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = commands.send(Command::Resubscribe(feed)).await;
                });
            }
        }
    }

    async fn subscribe(&self, feed: Feed) -> BackendResult<Subscription> {
        match feed {
            Feed::Complaints => {
                self.backend
                    .subscribe_complaint_changes(&self.citizen_id, self.feed_tx.clone())
                    .await
            }
            Feed::ComplaintUpdates => {
                self.backend
                    .subscribe_update_insertions(self.feed_tx.clone())
                    .await
            }
        }
    }

    fn take_subscription(&mut self, feed: Feed) -> Option<Subscription> {
        match feed {
            Feed::Complaints => self.complaint_subscription.take(),
            Feed::ComplaintUpdates => self.update_subscription.take(),
        }
    }

    fn cancel_subscriptions(&mut self) {
        if let Some(mut subscription) = self.complaint_subscription.take() {
            subscription.cancel();
        }
        if let Some(mut subscription) = self.update_subscription.take() {
            subscription.cancel();
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

/// Reads behind a load: the collection, then the chosen complaint's timeline.
async fn fetch_view<B: Backend>(
    backend: &B,
    citizen_id: &CitizenId,
    mode: LoadMode,
    current: Option<ComplaintId>,
) -> Result<LoadedView> {
    let complaints = backend
        .fetch_complaints(citizen_id)
        .await
        .map_err(|error| Error::fetch_failed(Operation::Load, &error))?;

    let selected = match mode {
        LoadMode::Initial => complaints.first().map(|complaint| complaint.id.clone()),
        LoadMode::Reconcile => {
            current.filter(|id| complaints.iter().any(|complaint| &complaint.id == id))
        }
    };

    let timeline = match &selected {
        Some(complaint_id) => backend
            .fetch_timeline(complaint_id)
            .await
            .map_err(|error| Error::fetch_failed(Operation::LoadTimeline, &error))?,
        None => Vec::new(),
    };

    Ok(LoadedView {
        complaints,
        selected,
        timeline,
    })
}
