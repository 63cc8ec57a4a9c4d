//! Development task service: REST routes, dev login, and the push channel.
//!
//! Every mutation that succeeds is announced to all connected push
//! subscribers as a payload-free event. Clients are expected to refetch
//! `GET /tasks`, which is scoped to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use url::Url;
use uuid::Uuid;

use taskhub_proto::api::{ApiMessage, TOKEN_QUERY_PARAM};
use taskhub_proto::event::{self, PushEventKind};
use taskhub_proto::task::{Task, TaskDraft, TaskId};

use crate::store::TaskStore;

/// Capacity of the push fan-out channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Account used by the dev login when no `email` is given.
pub const DEFAULT_DEV_EMAIL: &str = "dev@localhost";

/// Default page the dev login redirects back to.
pub const DEFAULT_CLIENT_URL: &str = "http://localhost:3000/dashboard";

/// Shared service state: task table, issued credentials, push fan-out.
pub struct ServerState {
    /// Task storage.
    pub store: TaskStore,
    /// Issued bearer tokens mapped to the account they authenticate.
    sessions: RwLock<HashMap<String, String>>,
    /// Fan-out of change notifications to push subscribers.
    events: broadcast::Sender<PushEventKind>,
    /// Where the dev login redirects when the request names no target.
    client_url: String,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Creates an empty state redirecting logins to [`DEFAULT_CLIENT_URL`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_client_url(DEFAULT_CLIENT_URL)
    }

    /// Creates an empty state redirecting logins to `client_url`.
    #[must_use]
    pub fn with_client_url(client_url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store: TaskStore::new(),
            sessions: RwLock::new(HashMap::new()),
            events,
            client_url: client_url.into(),
        }
    }

    /// Issues a fresh bearer token for `email`.
    pub fn issue_token(&self, email: &str) -> String {
        let token = Uuid::now_v7().simple().to_string();
        self.sessions.write().insert(token.clone(), email.to_string());
        tracing::info!(email = %email, "issued credential");
        token
    }

    /// Invalidates a previously issued token.
    pub fn revoke_token(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    /// Resolves the account behind a bearer token.
    #[must_use]
    pub fn user_for(&self, token: &str) -> Option<String> {
        self.sessions.read().get(token).cloned()
    }

    /// Announces a change to every push subscriber.
    pub fn publish(&self, kind: PushEventKind) {
        // No subscribers is not an error.
        let receivers = self.events.send(kind).unwrap_or(0);
        tracing::debug!(event = %kind, receivers, "published push event");
    }

    /// Subscribes to change announcements.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<PushEventKind> {
        self.events.subscribe()
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        bearer_token(headers)
            .and_then(|token| self.user_for(token))
            .ok_or(ApiError::Unauthorized)
    }
}

/// Errors returned by the REST handlers, rendered as `{"message": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No credential, or one the service did not issue.
    #[error("missing or invalid credential")]
    Unauthorized,
    /// The request body was rejected.
    #[error("{0}")]
    Validation(String),
    /// The task does not exist or is not visible to the caller.
    #[error("task {0} not found")]
    NotFound(TaskId),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(ApiMessage::new(self.to_string()))).into_response()
    }
}

/// Builds the service router over `state`.
pub fn router(state: Arc<ServerState>) -> axum::Router {
    axum::Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", axum::routing::put(update_task).delete(delete_task))
        .route("/auth/google", get(dev_login))
        .route("/events", get(events_handler))
        .with_state(state)
}

/// Starts the service on `addr` with fresh state.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the service on `addr` with caller-provided state, so tests can
/// issue tokens and inspect the store.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "task service error");
        }
    });

    Ok((bound_addr, handle))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn accept_draft(payload: Result<Json<TaskDraft>, JsonRejection>) -> Result<TaskDraft, ApiError> {
    let Json(draft) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    draft
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(draft)
}

async fn list_tasks(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Task>>, ApiError> {
    let user = state.authenticate(&headers)?;
    Ok(Json(state.store.list_for(&user)))
}

async fn create_task(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    payload: Result<Json<TaskDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let user = state.authenticate(&headers)?;
    let draft = accept_draft(payload)?;
    let task = state.store.create(&user, draft);
    tracing::info!(user = %user, task_id = %task.id, "task created");
    state.publish(PushEventKind::Created);
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<TaskDraft>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let user = state.authenticate(&headers)?;
    let draft = accept_draft(payload)?;
    let id = TaskId::new(id);
    let task = state
        .store
        .replace(&user, &id, draft)
        .ok_or(ApiError::NotFound(id))?;
    tracing::info!(user = %user, task_id = %task.id, "task updated");
    state.publish(PushEventKind::Updated);
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiMessage>, ApiError> {
    let user = state.authenticate(&headers)?;
    let id = TaskId::new(id);
    if !state.store.remove(&user, &id) {
        return Err(ApiError::NotFound(id));
    }
    tracing::info!(user = %user, task_id = %id, "task deleted");
    state.publish(PushEventKind::Deleted);
    Ok(Json(ApiMessage::new("Task deleted")))
}

/// Query accepted by the dev login.
#[derive(Debug, serde::Deserialize)]
struct LoginQuery {
    email: Option<String>,
    redirect: Option<String>,
}

/// Stands in for the identity provider: issues a token immediately and
/// redirects back with `?token=`.
async fn dev_login(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LoginQuery>,
) -> Result<Redirect, ApiError> {
    let email = query
        .email
        .filter(|email| !email.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DEV_EMAIL.to_string());
    let target = query.redirect.as_deref().unwrap_or(&state.client_url);
    let mut return_url = Url::parse(target)
        .map_err(|e| ApiError::Validation(format!("invalid redirect url '{target}': {e}")))?;
    let token = state.issue_token(&email);
    return_url
        .query_pairs_mut()
        .append_pair(TOKEN_QUERY_PARAM, &token);
    Ok(Redirect::to(return_url.as_str()))
}

async fn events_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user = state.authenticate(&headers)?;
    let events = state.subscribe_events();
    Ok(ws.on_upgrade(move |socket| forward_events(socket, events, user)))
}

/// Pushes change announcements to one subscriber until either side closes.
async fn forward_events(
    socket: WebSocket,
    mut events: broadcast::Receiver<PushEventKind>,
    user: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    tracing::info!(user = %user, "push subscriber connected");

    loop {
        tokio::select! {
            received = events.recv() => {
                let kind = match received {
                    Ok(kind) => kind,
                    // Any event makes the client refetch, so one stands in for the skipped ones.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(user = %user, skipped, "push subscriber lagged");
                        PushEventKind::Updated
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if ws_sender.send(Message::Text(event::encode(kind).into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!(user = %user, "push subscriber disconnected");
}

/// Starts the service in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port).
#[cfg(test)]
async fn start_test_server() -> (
    std::net::SocketAddr,
    Arc<ServerState>,
    tokio::task::JoinHandle<()>,
) {
    let state = Arc::new(ServerState::new());
    let (addr, handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test server");
    (addr, state, handle)
}
