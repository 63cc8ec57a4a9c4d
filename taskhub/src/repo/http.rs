//! REST repository against the task service.
//!
//! Endpoints are appended to the configured base URL as path segments, so a
//! base with a prefix (`https://host/api`) yields `https://host/api/tasks`.
//! No request is sent without a credential, and nothing is retried.

use std::time::Duration;

use reqwest::StatusCode;
use url::Url;

use taskhub_proto::api::{ApiMessage, TASKS_PATH};
use taskhub_proto::task::{Task, TaskDraft, TaskId};

use super::{RepoError, TaskRepository};
use crate::credential::Credential;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`TaskRepository`] over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpTaskRepository {
    client: reqwest::Client,
    base_url: Url,
    credential: Option<Credential>,
}

impl HttpTaskRepository {
    /// Creates a repository bound to `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        base_url: Url,
        credential: Option<Credential>,
        timeout: Duration,
    ) -> Result<Self, RepoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RepoError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            credential,
        })
    }

    /// The service base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RepoError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                RepoError::Transport(format!("service url {} cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn credential(&self) -> Result<&Credential, RepoError> {
        self.credential
            .as_ref()
            .ok_or_else(|| RepoError::Auth("no credential".to_string()))
    }

    /// Sends `request` with the bearer header and checks the status.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        task: Option<&TaskId>,
    ) -> Result<reqwest::Response, RepoError> {
        let credential = self.credential()?;
        let response = request
            .bearer_auth(credential.expose())
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "task service request failed");
                RepoError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // Best effort: the body only refines the message.
        let body = response.text().await.unwrap_or_default();
        let err = map_status(status, &body, task);
        tracing::warn!(%status, err = %err, "task service rejected request");
        Err(err)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RepoError> {
        response
            .json()
            .await
            .map_err(|e| RepoError::Transport(format!("undecodable response: {e}")))
    }
}

impl TaskRepository for HttpTaskRepository {
    async fn list(&self) -> Result<Vec<Task>, RepoError> {
        let url = self.endpoint(&[TASKS_PATH])?;
        let response = self.execute(self.client.get(url), None).await?;
        let tasks: Vec<Task> = Self::decode(response).await?;
        tracing::debug!(count = tasks.len(), "fetched task collection");
        Ok(tasks)
    }

    async fn create(&self, draft: &TaskDraft) -> Result<Task, RepoError> {
        let url = self.endpoint(&[TASKS_PATH])?;
        let response = self.execute(self.client.post(url).json(draft), None).await?;
        Self::decode(response).await
    }

    async fn update(&self, id: &TaskId, draft: &TaskDraft) -> Result<Task, RepoError> {
        let url = self.endpoint(&[TASKS_PATH, id.as_str()])?;
        let response = self
            .execute(self.client.put(url).json(draft), Some(id))
            .await?;
        Self::decode(response).await
    }

    async fn delete(&self, id: &TaskId) -> Result<(), RepoError> {
        let url = self.endpoint(&[TASKS_PATH, id.as_str()])?;
        self.execute(self.client.delete(url), Some(id)).await?;
        Ok(())
    }
}

/// Maps a non-success status to the repository taxonomy.
fn map_status(status: StatusCode, body: &str, task: Option<&TaskId>) -> RepoError {
    let message = serde_json::from_str::<ApiMessage>(body)
        .map(|m| m.message)
        .ok()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| status.to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RepoError::Auth(message),
        StatusCode::NOT_FOUND => match task {
            Some(id) => RepoError::Validation(format!("task {id} not found")),
            None => RepoError::Validation(message),
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            RepoError::Validation(message)
        }
        _ => RepoError::Transport(message),
    }
}
