//! Integration tests for task synchronization against the dev service.
//!
//! Validates the synchronizer end to end over HTTP and WebSocket:
//! - Mutations are followed by a full refetch that reflects them
//! - Update replaces the whole record
//! - Lists are scoped to owner and collaborators
//! - A collaborator's synchronizer picks up changes through push
//! - Service errors land in the right taxonomy bucket

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use url::Url;

use taskhub::push::websocket;
use taskhub::repo::http::HttpTaskRepository;
use taskhub::repo::{RepoError, TaskRepository};
use taskhub::sync::{SyncState, Synchronizer};
use taskhub_proto::task::{TaskDraft, TaskId, TaskStatus};
use taskhub_server::server::{self, ServerState};

/// Start the dev service in-process and return its base URL and state.
async fn start_service() -> (Url, Arc<ServerState>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(ServerState::new());
    let (addr, handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start task service");
    let url = Url::parse(&format!("http://{addr}")).unwrap();
    (url, state, handle)
}

fn repo(base: &Url, token: &str) -> HttpTaskRepository {
    HttpTaskRepository::new(
        base.clone(),
        Some(taskhub::credential::Credential::new(token).unwrap()),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn due() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

/// Wait until the synchronizer publishes a state matching `pred`.
async fn wait_state(
    sync: &Synchronizer<HttpTaskRepository>,
    pred: impl FnMut(&SyncState) -> bool,
) -> SyncState {
    let mut rx = sync.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("state not reached")
        .expect("synchronizer gone")
        .clone()
}

#[tokio::test]
async fn create_is_reflected_after_refetch() {
    let (base, state, _handle) = start_service().await;
    let token = state.issue_token("alice@example.com");
    let sync = Synchronizer::spawn(repo(&base, &token));
    wait_state(&sync, |s| s.revision >= 1).await;

    let draft = TaskDraft::new("Write report", due())
        .with_description("Quarterly numbers")
        .with_status(TaskStatus::InProgress)
        .with_shared_with([" bob@example.com", "bob@example.com", "", "carol@example.com "]);
    let after = sync.create(draft).await.unwrap();

    assert_eq!(after.tasks.len(), 1);
    let task = &after.tasks[0];
    assert_eq!(task.title, "Write report");
    assert_eq!(task.description.as_deref(), Some("Quarterly numbers"));
    assert_eq!(task.due_date, due());
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.shared_with, ["bob@example.com", "carol@example.com"]);
    assert!(after.last_error.is_none());
    assert_eq!(state.store.len(), 1);
}

#[tokio::test]
async fn list_keeps_service_order() {
    let (base, state, _handle) = start_service().await;
    let token = state.issue_token("alice@example.com");
    let sync = Synchronizer::spawn(repo(&base, &token));

    for title in ["first", "second", "third"] {
        sync.create(TaskDraft::new(title, due())).await.unwrap();
    }
    let titles: Vec<_> = sync
        .refresh()
        .await
        .tasks
        .iter()
        .map(|t| t.title.clone())
        .collect();
    assert_eq!(titles, ["first", "second", "third"]);
}

#[tokio::test]
async fn update_replaces_the_full_record() {
    let (base, state, _handle) = start_service().await;
    let token = state.issue_token("alice@example.com");
    let sync = Synchronizer::spawn(repo(&base, &token));

    let created = sync
        .create(
            TaskDraft::new("Draft", due())
                .with_description("old notes")
                .with_shared_with(["bob@example.com"]),
        )
        .await
        .unwrap();
    let id = created.tasks[0].id.clone();

    let replacement = TaskDraft::new("Final", due()).with_status(TaskStatus::Completed);
    let after = sync.update(id.clone(), replacement).await.unwrap();

    let task = &after.tasks[0];
    assert_eq!(task.id, id);
    assert_eq!(task.title, "Final");
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.description.is_none());
    assert!(task.shared_with.is_empty());
}

#[tokio::test]
async fn edit_flow_resubmits_existing_fields() {
    let (base, state, _handle) = start_service().await;
    let token = state.issue_token("alice@example.com");
    let sync = Synchronizer::spawn(repo(&base, &token));

    let created = sync
        .create(
            TaskDraft::new("Plan offsite", due())
                .with_description("venue + agenda")
                .with_shared_with(["bob@example.com"]),
        )
        .await
        .unwrap();
    let original = created.tasks[0].clone();

    let edited = original.to_draft().with_status(TaskStatus::InProgress);
    let after = sync.update(original.id.clone(), edited).await.unwrap();

    let task = &after.tasks[0];
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.description, original.description);
    assert_eq!(task.shared_with, original.shared_with);
}

#[tokio::test]
async fn delete_removes_and_missing_is_validation() {
    let (base, state, _handle) = start_service().await;
    let token = state.issue_token("alice@example.com");
    let sync = Synchronizer::spawn(repo(&base, &token));

    let created = sync.create(TaskDraft::new("Temp", due())).await.unwrap();
    let id = created.tasks[0].id.clone();

    let after = sync.delete(id.clone()).await.unwrap();
    assert!(after.tasks.is_empty());

    let err = sync.delete(id.clone()).await.unwrap_err();
    assert_eq!(err, RepoError::Validation(format!("task {id} not found")));
    let err = sync
        .update(TaskId::new("missing"), TaskDraft::new("x", due()))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
}

#[tokio::test]
async fn service_rejects_blank_title() {
    let (base, state, _handle) = start_service().await;
    let token = state.issue_token("alice@example.com");
    let repo = repo(&base, &token);

    // Bypass local validation to exercise the service's check.
    let err = repo.create(&TaskDraft::new("  ", due())).await.unwrap_err();
    assert_eq!(err, RepoError::Validation("title is required".to_string()));
    assert!(state.store.is_empty());
}

#[tokio::test]
async fn unknown_credential_is_auth_error() {
    let (base, _state, _handle) = start_service().await;
    let sync = Synchronizer::spawn(repo(&base, "never-issued"));

    let after = sync.refresh().await;
    assert!(matches!(after.last_error, Some(RepoError::Auth(_))));
    assert!(after.tasks.is_empty());
    assert!(!after.loading);

    let err = sync.create(TaskDraft::new("x", due())).await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn lists_are_scoped_to_owner_and_collaborators() {
    let (base, state, _handle) = start_service().await;
    let alice = Synchronizer::spawn(repo(&base, &state.issue_token("alice@example.com")));
    let bob = Synchronizer::spawn(repo(&base, &state.issue_token("bob@example.com")));
    let mallory = Synchronizer::spawn(repo(&base, &state.issue_token("mallory@example.com")));

    alice
        .create(TaskDraft::new("private", due()))
        .await
        .unwrap();
    alice
        .create(TaskDraft::new("shared", due()).with_shared_with(["bob@example.com"]))
        .await
        .unwrap();

    assert_eq!(alice.refresh().await.tasks.len(), 2);
    let bob_view = bob.refresh().await;
    assert_eq!(bob_view.tasks.len(), 1);
    assert_eq!(bob_view.tasks[0].title, "shared");
    assert!(mallory.refresh().await.tasks.is_empty());
}

#[tokio::test]
async fn collaborator_sees_changes_through_push() {
    let (base, state, _handle) = start_service().await;
    let bob_token = state.issue_token("bob@example.com");
    let alice = Synchronizer::spawn(repo(&base, &state.issue_token("alice@example.com")));
    let bob = Synchronizer::spawn(repo(&base, &bob_token));
    wait_state(&bob, |s| s.revision >= 1).await;

    let push_url = taskhub::push::derive_push_url(&base).unwrap();
    let _subscription = websocket::connect(
        &push_url,
        &taskhub::credential::Credential::new(&bob_token).unwrap(),
        Duration::from_secs(5),
        bob.clone(),
    )
    .await
    .unwrap();
    let mut notices = bob.remote_events();
    // Let the service register the subscriber before mutating.
    tokio::time::sleep(Duration::from_millis(50)).await;

    alice
        .create(TaskDraft::new("Review PR", due()).with_shared_with(["bob@example.com"]))
        .await
        .unwrap();

    let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .expect("no notice")
        .unwrap();
    assert_eq!(notice.notice(), "A new task was added");
    let seen = wait_state(&bob, |s| s.tasks.len() == 1).await;
    assert_eq!(seen.tasks[0].title, "Review PR");

    let id = seen.tasks[0].id.clone();
    alice.delete(id).await.unwrap();
    wait_state(&bob, |s| s.tasks.is_empty() && !s.loading).await;
}

#[tokio::test]
async fn unreachable_service_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let base = Url::parse(&format!("http://{addr}")).unwrap();
    let sync = Synchronizer::spawn(repo(&base, "tok"));

    let after = sync.refresh().await;
    assert!(matches!(after.last_error, Some(RepoError::Transport(_))));
    assert!(after.tasks.is_empty());
    assert!(!after.loading);

    let err = sync.create(TaskDraft::new("x", due())).await.unwrap_err();
    assert!(matches!(err, RepoError::Transport(_)));
}
