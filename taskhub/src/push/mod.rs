//! Push event listener.
//!
//! Translates server-pushed frames into [`PushEventKind`]s and hands them to
//! a [`RemoteEventSink`] (the synchronizer). Sources:
//! - [`websocket`]: authenticated WebSocket channel at `/events`
//! - [`loopback`]: in-process channel for tests and embedding
//!
//! A [`PushSubscription`] is the session-scoped handle for one source. Once
//! it is unsubscribed or dropped no further event reaches the sink.

pub mod loopback;
pub mod websocket;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use url::Url;

use taskhub_proto::api::EVENTS_PATH;
use taskhub_proto::event::{self, PushEventKind};

/// Receiver of remote change notifications.
pub trait RemoteEventSink: Send + Sync {
    /// Called once for every decoded push event.
    fn notify_remote_event(&self, kind: PushEventKind);
}

/// Errors establishing a push subscription.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The connection attempt exceeded the configured timeout.
    #[error("push connect timed out")]
    Timeout,

    /// The push endpoint could not be reached.
    #[error("push endpoint unreachable: {0}")]
    Unreachable(String),

    /// The server refused the upgrade (bad credential, wrong path).
    #[error("push handshake rejected: {0}")]
    Handshake(String),

    /// The push URL could not be used or derived.
    #[error("invalid push url: {0}")]
    InvalidUrl(String),
}

/// Live subscription to a push source.
///
/// Dropping the handle deregisters it.
pub struct PushSubscription {
    active: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl PushSubscription {
    /// Wraps a spawned reader task that checks `active` before every delivery.
    pub(crate) const fn new(active: Arc<AtomicBool>, handle: tokio::task::JoinHandle<()>) -> Self {
        Self { active, handle }
    }

    /// Whether the source is still connected and delivering.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.handle.is_finished()
    }

    /// Stops delivery and closes the source.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        self.handle.abort();
        tracing::debug!("push subscription closed");
    }
}

impl std::fmt::Debug for PushSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSubscription")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Decodes one text frame and delivers it, unless the subscription has
/// been torn down. Bad frames are logged and skipped.
fn deliver_frame(frame: &str, sink: &dyn RemoteEventSink, active: &AtomicBool) {
    match event::decode(frame) {
        Ok(kind) => {
            if !active.load(Ordering::Acquire) {
                tracing::debug!(event = %kind, "push event after teardown, dropping");
                return;
            }
            tracing::debug!(event = %kind, "push event received");
            sink.notify_remote_event(kind);
        }
        Err(e) => {
            tracing::warn!(err = %e, "undecodable push frame, skipping");
        }
    }
}

/// Derives the push endpoint from the service URL: `http→ws`, `https→wss`,
/// with `/events` appended to the service path.
///
/// # Errors
///
/// Returns [`PushError::InvalidUrl`] if the service URL is not `http(s)`.
pub fn derive_push_url(service_url: &Url) -> Result<Url, PushError> {
    let scheme = match service_url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(PushError::InvalidUrl(format!(
                "cannot derive push url from '{other}' scheme"
            )));
        }
    };
    let mut url = service_url.clone();
    url.set_scheme(scheme)
        .map_err(|()| PushError::InvalidUrl(format!("cannot switch {service_url} to {scheme}")))?;
    url.path_segments_mut()
        .map_err(|()| PushError::InvalidUrl(format!("{service_url} cannot be a base")))?
        .pop_if_empty()
        .push(EVENTS_PATH);
    url.set_query(None);
    Ok(url)
}
