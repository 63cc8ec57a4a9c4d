//! Test doubles shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use taskhub_proto::task::{Task, TaskDraft, TaskId, TaskStatus};

use crate::credential::{
    Credential, CredentialError, CredentialStore, MemoryCredentialStore,
};
use crate::push::loopback::LoopbackSource;
use crate::push::{PushError, PushSubscription, RemoteEventSink};
use crate::repo::{RepoError, TaskRepository};
use crate::session::{SessionError, SessionFactory};

pub fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

pub fn task(id: &str, title: &str) -> Task {
    Task {
        id: TaskId::new(id),
        title: title.to_string(),
        description: None,
        due_date: today(),
        status: TaskStatus::Pending,
        shared_with: Vec::new(),
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// In-memory repository with call counters, scripted failures and an
/// optional gate that holds every `list` until a permit is released.
#[derive(Debug, Default)]
pub struct ScriptedRepository {
    tasks: Mutex<Vec<Task>>,
    gate: Option<Semaphore>,
    list_calls: AtomicUsize,
    mutation_calls: AtomicUsize,
    next_id: AtomicUsize,
    list_error: Mutex<Option<RepoError>>,
    mutation_error: Mutex<Option<RepoError>>,
}

impl ScriptedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            ..Self::default()
        }
    }

    /// Every `list` blocks until [`ScriptedRepository::release`] adds a permit.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        *self.tasks.lock() = tasks;
    }

    pub fn fail_next_list(&self, err: RepoError) {
        *self.list_error.lock() = Some(err);
    }

    pub fn fail_next_mutation(&self, err: RepoError) {
        *self.mutation_error.lock() = Some(err);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    fn begin_mutation(&self) -> Result<(), RepoError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.mutation_error.lock().take().map_or(Ok(()), Err)
    }

    fn record(id: TaskId, draft: &TaskDraft) -> Task {
        Task {
            id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            due_date: draft.due_date,
            status: draft.status,
            shared_with: draft.shared_with.clone(),
        }
    }
}

impl TaskRepository for ScriptedRepository {
    async fn list(&self) -> Result<Vec<Task>, RepoError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| RepoError::Transport(e.to_string()))?
                .forget();
        }
        if let Some(err) = self.list_error.lock().take() {
            return Err(err);
        }
        Ok(self.tasks.lock().clone())
    }

    async fn create(&self, draft: &TaskDraft) -> Result<Task, RepoError> {
        self.begin_mutation()?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let created = Self::record(TaskId::new(format!("scripted-{n}")), draft);
        self.tasks.lock().push(created.clone());
        Ok(created)
    }

    async fn update(&self, id: &TaskId, draft: &TaskDraft) -> Result<Task, RepoError> {
        self.begin_mutation()?;
        let mut tasks = self.tasks.lock();
        let slot = tasks
            .iter_mut()
            .find(|t| t.id == *id)
            .ok_or_else(|| RepoError::Validation(format!("task {id} not found")))?;
        *slot = Self::record(id.clone(), draft);
        Ok(slot.clone())
    }

    async fn delete(&self, id: &TaskId) -> Result<(), RepoError> {
        self.begin_mutation()?;
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| t.id != *id);
        if tasks.len() == before {
            return Err(RepoError::Validation(format!("task {id} not found")));
        }
        Ok(())
    }
}

/// Session factory handing out one shared scripted repository, with
/// loopback push sources queued up by the test.
#[derive(Debug, Default)]
pub struct ScriptedSessionFactory {
    pub repo: Arc<ScriptedRepository>,
    pub sessions_opened: AtomicUsize,
    pub credentials: Mutex<Vec<Credential>>,
    push_sources: Mutex<Vec<LoopbackSource>>,
    fail_repository: AtomicBool,
}

impl ScriptedSessionFactory {
    pub fn new(repo: ScriptedRepository) -> Self {
        Self {
            repo: Arc::new(repo),
            ..Self::default()
        }
    }

    pub fn queue_push(&self, source: LoopbackSource) {
        self.push_sources.lock().push(source);
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    /// Makes every later `repository` call fail with a transport error.
    pub fn fail_repositories(&self) {
        self.fail_repository.store(true, Ordering::SeqCst);
    }
}

impl SessionFactory for ScriptedSessionFactory {
    type Repository = Arc<ScriptedRepository>;

    fn repository(&self, credential: &Credential) -> Result<Self::Repository, SessionError> {
        if self.fail_repository.load(Ordering::SeqCst) {
            return Err(RepoError::Transport("http client unavailable".to_string()).into());
        }
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.credentials.lock().push(credential.clone());
        Ok(Arc::clone(&self.repo))
    }

    async fn subscribe_push(
        &self,
        _credential: &Credential,
        sink: Arc<dyn RemoteEventSink>,
    ) -> Result<Option<PushSubscription>, PushError> {
        let source = self.push_sources.lock().pop();
        match source {
            Some(source) => Ok(Some(source.subscribe(sink))),
            None => Err(PushError::Unreachable("no loopback source queued".to_string())),
        }
    }
}

/// Memory store whose writes fail while `fail_writes` is set.
#[derive(Debug, Default)]
pub struct FailingCredentialStore {
    inner: MemoryCredentialStore,
    fail_writes: AtomicBool,
}

impl FailingCredentialStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl CredentialStore for FailingCredentialStore {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        self.inner.load()
    }

    fn store(&self, credential: &Credential) -> Result<(), CredentialError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CredentialError::Io {
                path: "token".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.inner.store(credential)
    }

    fn clear(&self) -> Result<(), CredentialError> {
        self.inner.clear()
    }
}
