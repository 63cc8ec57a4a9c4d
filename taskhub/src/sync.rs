//! Task synchronizer.
//!
//! Owns the canonical local task collection and keeps it equal to the
//! remote collection after every known change. Local mutations, push events
//! and explicit refresh requests all end in the same place: a full refetch
//! whose result replaces the collection in one swap. The collection is never
//! patched locally.
//!
//! # Concurrency
//!
//! A single worker task is the only writer of [`SyncState`], published
//! through a [`tokio::sync::watch`] channel. Triggers wake the worker through
//! a [`Notify`], which stores at most one permit: any number of triggers
//! while a refresh is in flight collapse into one follow-up refresh.
//!
//! After [`Synchronizer::shutdown`] the worker exits, a refresh that was in
//! flight has its result discarded, and mutations fail with
//! [`RepoError::Auth`] without contacting the service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, broadcast, watch};

use taskhub_proto::event::PushEventKind;
use taskhub_proto::task::{Task, TaskDraft, TaskId};

use crate::push::RemoteEventSink;
use crate::repo::{RepoError, TaskRepository};

/// Capacity of the remote-notice channel.
const NOTICE_CHANNEL_CAPACITY: usize = 32;

/// Published synchronizer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Canonical collection in service order.
    pub tasks: Arc<[Task]>,
    /// `true` exactly while a refresh is in flight.
    pub loading: bool,
    /// Error from the most recent refresh, cleared by the next success.
    pub last_error: Option<RepoError>,
    /// Number of completed refresh attempts, successful or not.
    pub revision: u64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            tasks: Arc::from(Vec::new()),
            loading: false,
            last_error: None,
            revision: 0,
        }
    }
}

/// A local change submitted through the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create a task from a draft.
    Create(TaskDraft),
    /// Replace every editable field of a task.
    Update(TaskId, TaskDraft),
    /// Delete a task.
    Delete(TaskId),
}

impl Mutation {
    const fn draft(&self) -> Option<&TaskDraft> {
        match self {
            Self::Create(draft) | Self::Update(_, draft) => Some(draft),
            Self::Delete(_) => None,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(..) => "update",
            Self::Delete(_) => "delete",
        }
    }
}

/// Keeps the canonical task collection in line with the service.
///
/// Created with [`Synchronizer::spawn`], which starts the worker and an
/// initial refresh. Shared as `Arc<Synchronizer<R>>` so the push listener
/// can hold it as a [`RemoteEventSink`].
pub struct Synchronizer<R> {
    repo: Arc<R>,
    state: watch::Receiver<SyncState>,
    wake: Arc<Notify>,
    active: Arc<AtomicBool>,
    notices: broadcast::Sender<PushEventKind>,
    worker: tokio::task::JoinHandle<()>,
}

impl<R: TaskRepository + 'static> Synchronizer<R> {
    /// Starts the worker over `repo` and schedules the initial refresh.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(repo: R) -> Arc<Self> {
        let repo = Arc::new(repo);
        let (state_tx, state_rx) = watch::channel(SyncState::default());
        let wake = Arc::new(Notify::new());
        let active = Arc::new(AtomicBool::new(true));
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);

        let worker = tokio::spawn(run_worker(
            Arc::clone(&repo),
            state_tx,
            Arc::clone(&wake),
            Arc::clone(&active),
        ));
        wake.notify_one();

        Arc::new(Self {
            repo,
            state: state_rx,
            wake,
            active,
            notices,
            worker,
        })
    }

    /// Schedules a refresh without waiting. Coalesces with pending requests.
    pub fn request_refresh(&self) {
        if self.is_active() {
            self.wake.notify_one();
        }
    }

    /// Schedules a refresh and waits for one that started after this call.
    ///
    /// Returns the state published by that refresh. After shutdown it
    /// returns the last published state immediately.
    pub async fn refresh(&self) -> SyncState {
        if !self.is_active() {
            return self.snapshot();
        }

        let (in_flight, revision) = {
            let state = self.state.borrow();
            (state.loading, state.revision)
        };
        // An in-flight refresh may predate this call; wait past it.
        let target = revision + if in_flight { 2 } else { 1 };
        self.wake.notify_one();

        let mut rx = self.state.clone();
        match rx.wait_for(|state| state.revision >= target).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Handles a push notification: rebroadcasts it as a notice and
    /// schedules a refresh. Every kind has the same effect on state.
    pub fn notify_remote_event(&self, kind: PushEventKind) {
        if !self.is_active() {
            tracing::debug!(event = %kind, "remote event after shutdown, ignoring");
            return;
        }
        tracing::info!(event = %kind, "remote change, refreshing");
        // No observers is fine.
        let _ = self.notices.send(kind);
        self.request_refresh();
    }

    /// Submits a mutation and, if the service accepts it, refreshes.
    ///
    /// Drafts are validated before anything is sent. On failure no refresh
    /// runs and the state is untouched.
    ///
    /// # Errors
    ///
    /// - [`RepoError::Auth`] after shutdown or when the credential is rejected.
    /// - [`RepoError::Validation`] for invalid drafts or rejected payloads.
    /// - [`RepoError::Transport`] when the service cannot be reached.
    pub async fn apply(&self, mutation: Mutation) -> Result<SyncState, RepoError> {
        if !self.is_active() {
            return Err(RepoError::Auth("no active session".to_string()));
        }
        if let Some(draft) = mutation.draft() {
            draft
                .validate()
                .map_err(|e| RepoError::Validation(e.to_string()))?;
        }

        let label = mutation.label();
        let result = match &mutation {
            Mutation::Create(draft) => self.repo.create(draft).await.map(|_| ()),
            Mutation::Update(id, draft) => self.repo.update(id, draft).await.map(|_| ()),
            Mutation::Delete(id) => self.repo.delete(id).await,
        };
        if let Err(e) = result {
            tracing::warn!(mutation = label, err = %e, "mutation rejected");
            return Err(e);
        }

        tracing::info!(mutation = label, "mutation accepted, refreshing");
        Ok(self.refresh().await)
    }

    /// Creates a task. See [`Synchronizer::apply`].
    ///
    /// # Errors
    ///
    /// Same as [`Synchronizer::apply`].
    pub async fn create(&self, draft: TaskDraft) -> Result<SyncState, RepoError> {
        self.apply(Mutation::Create(draft)).await
    }

    /// Replaces a task with `draft`. See [`Synchronizer::apply`].
    ///
    /// # Errors
    ///
    /// Same as [`Synchronizer::apply`].
    pub async fn update(&self, id: TaskId, draft: TaskDraft) -> Result<SyncState, RepoError> {
        self.apply(Mutation::Update(id, draft)).await
    }

    /// Deletes a task. See [`Synchronizer::apply`].
    ///
    /// # Errors
    ///
    /// Same as [`Synchronizer::apply`].
    pub async fn delete(&self, id: TaskId) -> Result<SyncState, RepoError> {
        self.apply(Mutation::Delete(id)).await
    }
}

impl<R> Synchronizer<R> {
    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every published state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Receiver for rebroadcast push notices.
    #[must_use]
    pub fn remote_events(&self) -> broadcast::Receiver<PushEventKind> {
        self.notices.subscribe()
    }

    /// Whether the synchronizer still accepts work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stops the worker. Idempotent.
    pub fn shutdown(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            // Wake the worker so it sees the flag even when idle.
            self.wake.notify_one();
            tracing::debug!("synchronizer shut down");
        }
    }
}

impl<R> Drop for Synchronizer<R> {
    fn drop(&mut self) {
        self.shutdown();
        self.worker.abort();
    }
}

impl<R: TaskRepository + 'static> RemoteEventSink for Synchronizer<R> {
    fn notify_remote_event(&self, kind: PushEventKind) {
        Self::notify_remote_event(self, kind);
    }
}

impl<R> std::fmt::Debug for Synchronizer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Synchronizer")
            .field("active", &self.is_active())
            .field("tasks", &state.tasks.len())
            .field("revision", &state.revision)
            .finish_non_exhaustive()
    }
}

/// Worker loop: one refresh per wake-up until shutdown.
async fn run_worker<R: TaskRepository>(
    repo: Arc<R>,
    state: watch::Sender<SyncState>,
    wake: Arc<Notify>,
    active: Arc<AtomicBool>,
) {
    loop {
        wake.notified().await;
        if !active.load(Ordering::Acquire) {
            break;
        }

        state.send_modify(|s| s.loading = true);
        let result = repo.list().await;

        if !active.load(Ordering::Acquire) {
            tracing::debug!("discarding refresh result after shutdown");
            break;
        }

        state.send_modify(|s| {
            match result {
                Ok(tasks) => {
                    tracing::debug!(count = tasks.len(), "task collection replaced");
                    s.tasks = Arc::from(tasks);
                    s.last_error = None;
                }
                Err(e) => {
                    tracing::warn!(err = %e, "refresh failed, keeping previous collection");
                    s.last_error = Some(e);
                }
            }
            s.loading = false;
            s.revision += 1;
        });
    }
    tracing::debug!("synchronizer worker exiting");
}
