//! Push channel event kinds and their text-frame codec.
//!
//! The service announces task changes without payloads: a frame only says
//! *that* something was created, updated or deleted. Frames are JSON
//! objects `{"event":"task:created"}`; a bare event name is accepted too.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of remote change announced on the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushEventKind {
    /// A task was created.
    Created,
    /// A task was updated.
    Updated,
    /// A task was deleted.
    Deleted,
}

impl PushEventKind {
    /// Every kind a listener handles.
    pub const ALL: [Self; 3] = [Self::Created, Self::Updated, Self::Deleted];

    /// Event name on the wire.
    #[must_use]
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Created => "task:created",
            Self::Updated => "task:updated",
            Self::Deleted => "task:deleted",
        }
    }

    /// Looks up a kind by its wire name.
    #[must_use]
    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.event_name() == name)
    }

    /// Short user-facing notice for this change.
    #[must_use]
    pub const fn notice(self) -> &'static str {
        match self {
            Self::Created => "A new task was added",
            Self::Updated => "A task was updated",
            Self::Deleted => "A task was deleted",
        }
    }
}

impl fmt::Display for PushEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// JSON body of a push frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFrame {
    /// Wire event name, e.g. `task:updated`.
    pub event: String,
}

/// Errors decoding a push frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventDecodeError {
    /// The frame is not valid JSON of the expected shape.
    #[error("malformed push frame: {0}")]
    Malformed(String),
    /// The frame names an event this client does not know.
    #[error("unknown push event '{0}'")]
    UnknownEvent(String),
}

/// Encodes a kind as a JSON push frame.
#[must_use]
pub fn encode(kind: PushEventKind) -> String {
    // A struct holding one string field always serializes.
    serde_json::to_string(&PushFrame {
        event: kind.event_name().to_string(),
    })
    .unwrap_or_else(|_| format!("{{\"event\":\"{}\"}}", kind.event_name()))
}

/// Decodes a push frame into its kind.
///
/// # Errors
///
/// Returns [`EventDecodeError::Malformed`] for JSON that is not a push
/// frame, or [`EventDecodeError::UnknownEvent`] for unrecognized names.
pub fn decode(frame: &str) -> Result<PushEventKind, EventDecodeError> {
    let frame = frame.trim();
    let name = if frame.starts_with('{') {
        serde_json::from_str::<PushFrame>(frame)
            .map_err(|e| EventDecodeError::Malformed(e.to_string()))?
            .event
    } else {
        frame.to_string()
    };
    PushEventKind::from_event_name(&name).ok_or(EventDecodeError::UnknownEvent(name))
}
