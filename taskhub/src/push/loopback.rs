//! Loopback push source for testing.
//!
//! [`LoopbackPush::create_pair`] returns a [`LoopbackPush`] that accepts
//! frames and the [`LoopbackSource`] that delivers them. Frames go through
//! the same decoder as the WebSocket source.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use taskhub_proto::event::{self, PushEventKind};

use super::{PushSubscription, RemoteEventSink, deliver_frame};

/// Sending end of a loopback push channel.
#[derive(Debug, Clone)]
pub struct LoopbackPush {
    tx: mpsc::Sender<String>,
}

/// Receiving end; turned into a [`PushSubscription`] by [`LoopbackSource::subscribe`].
#[derive(Debug)]
pub struct LoopbackSource {
    rx: mpsc::Receiver<String>,
}

impl LoopbackPush {
    /// Creates a connected sender/source pair with `buffer` frames of capacity.
    #[must_use]
    pub fn create_pair(buffer: usize) -> (Self, LoopbackSource) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, LoopbackSource { rx })
    }

    /// Sends an event as the JSON frame the service would send.
    ///
    /// Returns `false` if the source has been dropped.
    pub async fn send_event(&self, kind: PushEventKind) -> bool {
        self.send_frame(event::encode(kind)).await
    }

    /// Sends a raw text frame.
    ///
    /// Returns `false` if the source has been dropped.
    pub async fn send_frame(&self, frame: impl Into<String>) -> bool {
        self.tx.send(frame.into()).await.is_ok()
    }

    /// Whether the receiving side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl LoopbackSource {
    /// Starts delivering frames to `sink`.
    #[must_use]
    pub fn subscribe(self, sink: Arc<dyn RemoteEventSink>) -> PushSubscription {
        let active = Arc::new(AtomicBool::new(true));
        let reader_active = Arc::clone(&active);
        let mut rx = self.rx;
        let handle = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                deliver_frame(&frame, sink.as_ref(), &reader_active);
            }
            reader_active.store(false, Ordering::Release);
        });
        PushSubscription::new(active, handle)
    }
}
