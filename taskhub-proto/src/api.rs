//! REST and login contract shared by client and service.

use serde::{Deserialize, Serialize};

/// Collection path for task CRUD (`/tasks`, `/tasks/{id}`).
pub const TASKS_PATH: &str = "tasks";

/// Push channel path (WebSocket upgrade).
pub const EVENTS_PATH: &str = "events";

/// Identity-provider login entry point, relative to the service root.
pub const AUTH_LOGIN_PATH: [&str; 2] = ["auth", "google"];

/// Query parameter carrying the issued credential on the login return URL.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Body of a non-success response, and of the delete acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMessage {
    /// Human-readable message.
    pub message: String,
}

impl ApiMessage {
    /// Creates a message body.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
