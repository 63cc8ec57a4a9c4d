//! Integration tests for the WebSocket push listener.
//!
//! Drives real REST mutations against the dev service and checks what a
//! subscribed listener receives.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use url::Url;

use taskhub::credential::Credential;
use taskhub::push::{self, PushError, RemoteEventSink, websocket};
use taskhub::repo::TaskRepository;
use taskhub::repo::http::HttpTaskRepository;
use taskhub_proto::event::PushEventKind;
use taskhub_proto::task::TaskDraft;
use taskhub_server::server::{self, ServerState};

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<PushEventKind>>,
}

impl Recorder {
    fn seen(&self) -> Vec<PushEventKind> {
        self.seen.lock().clone()
    }
}

impl RemoteEventSink for Recorder {
    fn notify_remote_event(&self, kind: PushEventKind) {
        self.seen.lock().push(kind);
    }
}

async fn start_service() -> (Url, Arc<ServerState>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(ServerState::new());
    let (addr, handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start task service");
    let url = Url::parse(&format!("http://{addr}")).unwrap();
    (url, state, handle)
}

async fn wait_for_count(recorder: &Recorder, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while recorder.seen().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("push events did not arrive");
}

#[tokio::test]
async fn mutations_are_announced_in_order() {
    let (base, state, _handle) = start_service().await;
    let credential = Credential::new(state.issue_token("alice@example.com")).unwrap();
    let repo = HttpTaskRepository::new(
        base.clone(),
        Some(credential.clone()),
        Duration::from_secs(5),
    )
    .unwrap();

    let recorder = Arc::new(Recorder::default());
    let subscription = websocket::connect(
        &push::derive_push_url(&base).unwrap(),
        &credential,
        Duration::from_secs(5),
        Arc::clone(&recorder) as Arc<dyn RemoteEventSink>,
    )
    .await
    .unwrap();
    assert!(subscription.is_active());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let task = repo.create(&TaskDraft::new("Announce me", due)).await.unwrap();
    repo.update(&task.id, &task.to_draft().with_description("edited"))
        .await
        .unwrap();
    repo.delete(&task.id).await.unwrap();

    wait_for_count(&recorder, 3).await;
    assert_eq!(
        recorder.seen(),
        [
            PushEventKind::Created,
            PushEventKind::Updated,
            PushEventKind::Deleted
        ]
    );
}

#[tokio::test]
async fn unknown_credential_is_refused() {
    let (base, _state, _handle) = start_service().await;
    let recorder = Arc::new(Recorder::default());

    let err = websocket::connect(
        &push::derive_push_url(&base).unwrap(),
        &Credential::new("never-issued").unwrap(),
        Duration::from_secs(5),
        recorder,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PushError::Handshake(_)), "{err:?}");
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let (base, state, _handle) = start_service().await;
    let credential = Credential::new(state.issue_token("bob@example.com")).unwrap();
    let recorder = Arc::new(Recorder::default());

    let subscription = websocket::connect(
        &push::derive_push_url(&base).unwrap(),
        &credential,
        Duration::from_secs(5),
        Arc::clone(&recorder) as Arc<dyn RemoteEventSink>,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    state.publish(PushEventKind::Created);
    wait_for_count(&recorder, 1).await;

    subscription.unsubscribe();
    state.publish(PushEventKind::Updated);
    state.publish(PushEventKind::Deleted);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(recorder.seen(), [PushEventKind::Created]);
}
