//! Task repository abstraction.
//!
//! Defines the [`TaskRepository`] trait the synchronizer talks to, and the
//! [`RepoError`] taxonomy shared by every caller. Implementations:
//! - [`http::HttpTaskRepository`]: REST client against the task service

pub mod http;

use std::future::Future;
use std::sync::Arc;

use taskhub_proto::task::{Task, TaskDraft, TaskId};

/// Errors from repository calls.
///
/// Cloneable so a failure can be kept in synchronizer state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    /// Missing or rejected credential. Ends the session.
    #[error("not authorized: {0}")]
    Auth(String),

    /// The service could not be reached or answered unusably. Transient.
    #[error("service unavailable: {0}")]
    Transport(String),

    /// The payload was rejected, locally or by the service.
    #[error("invalid request: {0}")]
    Validation(String),
}

impl RepoError {
    /// Whether this error should end the session.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Typed CRUD access to the remote task collection.
///
/// Every call is credential-scoped; `list` returns only tasks the caller
/// owns or that are shared with it, in service order.
pub trait TaskRepository: Send + Sync {
    /// Fetch the full collection.
    fn list(&self) -> impl Future<Output = Result<Vec<Task>, RepoError>> + Send;

    /// Create a task and return the stored record.
    fn create(&self, draft: &TaskDraft)
    -> impl Future<Output = Result<Task, RepoError>> + Send;

    /// Replace every editable field of a task and return the stored record.
    fn update(
        &self,
        id: &TaskId,
        draft: &TaskDraft,
    ) -> impl Future<Output = Result<Task, RepoError>> + Send;

    /// Delete a task.
    fn delete(&self, id: &TaskId) -> impl Future<Output = Result<(), RepoError>> + Send;
}

impl<T: TaskRepository> TaskRepository for Arc<T> {
    fn list(&self) -> impl Future<Output = Result<Vec<Task>, RepoError>> + Send {
        T::list(self)
    }

    fn create(&self, draft: &TaskDraft) -> impl Future<Output = Result<Task, RepoError>> + Send {
        T::create(self, draft)
    }

    fn update(
        &self,
        id: &TaskId,
        draft: &TaskDraft,
    ) -> impl Future<Output = Result<Task, RepoError>> + Send {
        T::update(self, id, draft)
    }

    fn delete(&self, id: &TaskId) -> impl Future<Output = Result<(), RepoError>> + Send {
        T::delete(self, id)
    }
}
