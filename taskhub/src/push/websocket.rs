//! WebSocket push source.
//!
//! Opens `GET /events` with the session's bearer credential and spawns a
//! background reader that decodes text frames into push events. The
//! subscription never tears itself down over bad data; it ends only when the
//! server closes the socket or the handle is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{PushError, PushSubscription, RemoteEventSink, deliver_frame};
use crate::credential::Credential;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Default timeout for opening the push channel.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects to the push channel at `url` and starts delivering to `sink`.
///
/// # Errors
///
/// - [`PushError::Timeout`] if the handshake does not finish within `timeout`.
/// - [`PushError::Unreachable`] if the endpoint refuses the TCP connection.
/// - [`PushError::Handshake`] if the server rejects the upgrade.
/// - [`PushError::InvalidUrl`] if `url` is not a usable WebSocket URL.
pub async fn connect(
    url: &Url,
    credential: &Credential,
    timeout: Duration,
    sink: Arc<dyn RemoteEventSink>,
) -> Result<PushSubscription, PushError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| PushError::InvalidUrl(e.to_string()))?;
    let bearer = HeaderValue::from_str(&credential.bearer())
        .map_err(|e| PushError::Handshake(format!("credential is not a valid header: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| {
            tracing::warn!(url = %url, "push connect timed out");
            PushError::Timeout
        })?
        .map_err(|e| {
            tracing::warn!(url = %url, err = %e, "push connect failed");
            map_ws_connect_error(e)
        })?;

    tracing::info!(url = %url, "push channel connected");

    let active = Arc::new(AtomicBool::new(true));
    let handle = tokio::spawn(reader_loop(ws_stream, sink, Arc::clone(&active)));
    Ok(PushSubscription::new(active, handle))
}

/// Reads frames until the socket closes, delivering decoded events.
async fn reader_loop(mut ws: WsStream, sink: Arc<dyn RemoteEventSink>, active: Arc<AtomicBool>) {
    while let Some(msg_result) = ws.next().await {
        match msg_result {
            Ok(Message::Text(text)) => deliver_frame(text.as_str(), sink.as_ref(), &active),
            Ok(Message::Close(_)) => {
                tracing::info!("push channel closed by server");
                break;
            }
            Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "push channel read error");
                break;
            }
        }
    }
    active.store(false, Ordering::Release);
    tracing::info!("push reader task exiting");
}

fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> PushError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        // DNS and network failures surface as io errors.
        WsError::Io(io_err) => PushError::Unreachable(io_err.to_string()),
        WsError::Http(response) => {
            PushError::Handshake(format!("status {}", response.status()))
        }
        WsError::Url(e) => PushError::InvalidUrl(e.to_string()),
        other => PushError::Handshake(other.to_string()),
    }
}
