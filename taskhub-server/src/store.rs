//! In-memory task storage scoped by owner and collaborators.
//!
//! The [`TaskStore`] keeps tasks in insertion order, which is the order
//! `list` returns them in. A caller only sees tasks it owns or that are
//! shared with it; updates and deletes on invisible tasks behave as if the
//! task did not exist.

use parking_lot::Mutex;
use uuid::Uuid;

use taskhub_proto::task::{Task, TaskDraft, TaskId};

/// A task together with the account that created it.
#[derive(Debug, Clone)]
struct StoredTask {
    owner: String,
    task: Task,
}

impl StoredTask {
    fn visible_to(&self, user: &str) -> bool {
        self.owner == user || self.task.shared_with.iter().any(|c| c == user)
    }
}

/// Thread-safe in-memory task table.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: Mutex<Vec<StoredTask>>,
}

impl TaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new task owned by `owner` and returns the stored record.
    pub fn create(&self, owner: &str, draft: TaskDraft) -> Task {
        let task = Task {
            id: TaskId::new(Uuid::now_v7().simple().to_string()),
            title: draft.title,
            description: draft.description,
            due_date: draft.due_date,
            status: draft.status,
            shared_with: draft.shared_with,
        };
        self.tasks.lock().push(StoredTask {
            owner: owner.to_string(),
            task: task.clone(),
        });
        task
    }

    /// Returns every task visible to `user`, in insertion order.
    #[must_use]
    pub fn list_for(&self, user: &str) -> Vec<Task> {
        self.tasks
            .lock()
            .iter()
            .filter(|stored| stored.visible_to(user))
            .map(|stored| stored.task.clone())
            .collect()
    }

    /// Replaces every client-editable field of a visible task.
    ///
    /// Returns `None` if the task does not exist or is not visible to `user`.
    pub fn replace(&self, user: &str, id: &TaskId, draft: TaskDraft) -> Option<Task> {
        let mut tasks = self.tasks.lock();
        let stored = tasks
            .iter_mut()
            .find(|stored| stored.task.id == *id && stored.visible_to(user))?;
        stored.task = Task {
            id: id.clone(),
            title: draft.title,
            description: draft.description,
            due_date: draft.due_date,
            status: draft.status,
            shared_with: draft.shared_with,
        };
        Some(stored.task.clone())
    }

    /// Removes a visible task. Returns `false` if there was nothing to remove.
    pub fn remove(&self, user: &str, id: &TaskId) -> bool {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|stored| !(stored.task.id == *id && stored.visible_to(user)));
        tasks.len() != before
    }

    /// Total number of stored tasks across all users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether the store holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
