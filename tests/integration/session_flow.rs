//! Integration tests for the login lifecycle against the dev service.
//!
//! Covers the dev identity-provider redirect, completing login from the
//! return URL, restoring from a persisted credential, and forced logout
//! when the service stops honoring the credential.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::header::LOCATION;
use url::Url;

use taskhub::config::ClientConfig;
use taskhub::credential::{CredentialStore, FileCredentialStore};
use taskhub::repo::RepoError;
use taskhub::session::{RemoteSessionFactory, SessionController, SessionState};
use taskhub_proto::task::TaskDraft;
use taskhub_server::server::{self, ServerState};

type Controller = SessionController<FileCredentialStore, RemoteSessionFactory>;

async fn start_service() -> (Url, Arc<ServerState>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(ServerState::new());
    let (addr, handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start task service");
    let url = Url::parse(&format!("http://{addr}")).unwrap();
    (url, state, handle)
}

/// A fresh per-test credential directory.
fn credential_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "taskhub-session-flow-{}-{name}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn config(service_url: &Url, push_url: Url, dir: &Path) -> ClientConfig {
    ClientConfig {
        service_url: service_url.clone(),
        push_url,
        request_timeout: Duration::from_secs(5),
        push_connect_timeout: Duration::from_secs(2),
        credential_dir: dir.to_path_buf(),
    }
}

fn controller(config: &ClientConfig) -> Controller {
    SessionController::new(
        FileCredentialStore::new(&config.credential_dir),
        RemoteSessionFactory::from_config(config),
        config.service_url.clone(),
    )
}

/// Follows the dev identity provider by hand and returns the return URL.
async fn dev_login(login_url: &Url, email: &str) -> String {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let response = client
        .get(login_url.clone())
        .query(&[
            ("email", email),
            ("redirect", "http://localhost:3000/dashboard?tab=all"),
        ])
        .send()
        .await
        .unwrap();
    assert!(response.status().is_redirection(), "{}", response.status());
    response
        .headers()
        .get(LOCATION)
        .expect("redirect without location")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn login_through_dev_provider() {
    let (base, state, _handle) = start_service().await;
    let dir = credential_dir("login");
    let config = config(&base, taskhub::push::derive_push_url(&base).unwrap(), &dir);
    let mut session = controller(&config);

    let login_url = session.begin_login().unwrap();
    assert_eq!(login_url.path(), "/auth/google");
    assert_eq!(session.state(), SessionState::Authenticating);

    let return_url = dev_login(&login_url, "alice@example.com").await;
    let cleaned = session.complete_login(&return_url).await.unwrap();

    assert_eq!(cleaned.as_str(), "http://localhost:3000/dashboard?tab=all");
    assert_eq!(session.state(), SessionState::Authenticated);
    assert!(session.push_active());

    let stored = FileCredentialStore::new(&dir).load().unwrap().unwrap();
    assert_eq!(state.user_for(stored.expose()).as_deref(), Some("alice@example.com"));

    let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let sync = Arc::clone(session.synchronizer().unwrap());
    let after = sync.create(TaskDraft::new("From the CLI", due)).await.unwrap();
    assert_eq!(after.tasks.len(), 1);
    assert_eq!(state.store.list_for("alice@example.com").len(), 1);

    session.logout().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn restore_from_persisted_credential() {
    let (base, state, _handle) = start_service().await;
    let dir = credential_dir("restore");
    let config = config(&base, taskhub::push::derive_push_url(&base).unwrap(), &dir);

    {
        let mut first = controller(&config);
        first.begin_login().unwrap();
        let return_url = dev_login(&first.login_url().unwrap(), "bob@example.com").await;
        first.complete_login(&return_url).await.unwrap();
        let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let _ = state
            .store
            .create("bob@example.com", TaskDraft::new("Persisted", due));
    }

    let mut second = controller(&config);
    assert_eq!(second.state(), SessionState::Anonymous);
    assert!(second.restore().await.unwrap());
    assert_eq!(second.state(), SessionState::Authenticated);

    let tasks = second.synchronizer().unwrap().refresh().await.tasks;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Persisted");

    second.logout().unwrap();
    let mut third = controller(&config);
    assert!(!third.restore().await.unwrap());
    assert_eq!(third.state(), SessionState::Anonymous);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn revoked_credential_forces_logout() {
    let (base, state, _handle) = start_service().await;
    let dir = credential_dir("revoke");
    let config = config(&base, taskhub::push::derive_push_url(&base).unwrap(), &dir);
    let mut session = controller(&config);

    let token = state.issue_token("carol@example.com");
    session
        .complete_login(&format!("http://localhost:3000/dashboard?token={token}"))
        .await
        .unwrap();
    let sync = Arc::clone(session.synchronizer().unwrap());
    assert!(sync.refresh().await.last_error.is_none());
    assert!(!session.enforce_sync_state().unwrap());

    assert!(state.revoke_token(&token));
    let after = sync.refresh().await;
    assert!(matches!(after.last_error, Some(RepoError::Auth(_))));

    assert!(session.enforce_sync_state().unwrap());
    assert_eq!(session.state(), SessionState::Anonymous);
    assert!(session.synchronizer().is_none());
    assert!(!sync.is_active());
    assert!(FileCredentialStore::new(&dir).load().unwrap().is_none());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn unreachable_push_channel_is_not_fatal() {
    let (base, state, _handle) = start_service().await;
    let dir = credential_dir("no-push");

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed = listener.local_addr().unwrap();
    drop(listener);
    let push_url = Url::parse(&format!("ws://{closed}/events")).unwrap();

    let config = config(&base, push_url, &dir);
    let mut session = controller(&config);
    let token = state.issue_token("dave@example.com");
    session
        .complete_login(&format!("http://localhost:3000/dashboard?token={token}"))
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Authenticated);
    assert!(!session.push_active());
    let after = session.synchronizer().unwrap().refresh().await;
    assert!(after.last_error.is_none());

    session.logout().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}
