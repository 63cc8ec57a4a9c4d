//! Task records as exchanged with the remote task service.
//!
//! The service assigns [`TaskId`]s; clients only ever submit a [`TaskDraft`]
//! (create, or full-record replace on update) and read back [`Task`]s.
//! Collaborator lists are normalized on every path in so that two drafts
//! describing the same share set compare equal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Wire format for due dates sent by the client.
pub const DUE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Opaque task identifier assigned by the service at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps a service-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Progress state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Pending,
    /// Actively being worked on.
    InProgress,
    /// Done.
    Completed,
}

impl TaskStatus {
    /// All statuses in display order.
    pub const ALL: [Self; 3] = [Self::Pending, Self::InProgress, Self::Completed];

    /// Wire name of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status '{0}' (expected pending, in-progress or completed)")]
pub struct UnknownStatus(pub String);

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A task as stored by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Service-assigned identifier (`_id` on the wire).
    #[serde(rename = "_id", alias = "id")]
    pub id: TaskId,
    /// Task title.
    pub title: String,
    /// Optional free-form details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Calendar date the task is due.
    #[serde(with = "due_date")]
    pub due_date: NaiveDate,
    /// Progress state.
    #[serde(default)]
    pub status: TaskStatus,
    /// Collaborators this task is shared with.
    #[serde(default, deserialize_with = "deserialize_shared_with")]
    pub shared_with: Vec<String>,
}

impl Task {
    /// Returns a draft carrying this task's current fields, for the
    /// full-record edit flow.
    #[must_use]
    pub fn to_draft(&self) -> TaskDraft {
        TaskDraft {
            title: self.title.clone(),
            description: self.description.clone(),
            due_date: self.due_date,
            status: self.status,
            shared_with: self.shared_with.clone(),
        }
    }
}

/// Client-submitted task fields (create body, or full replacement on update).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    /// Task title; must not be blank.
    pub title: String,
    /// Optional free-form details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Calendar date the task is due.
    #[serde(with = "due_date")]
    pub due_date: NaiveDate,
    /// Progress state.
    #[serde(default)]
    pub status: TaskStatus,
    /// Collaborators this task is shared with.
    #[serde(default, deserialize_with = "deserialize_shared_with")]
    pub shared_with: Vec<String>,
}

/// Reasons a draft is rejected before it is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    /// Title is empty or whitespace.
    #[error("title is required")]
    TitleEmpty,
}

impl TaskDraft {
    /// Creates a pending, unshared draft.
    pub fn new(title: impl Into<String>, due_date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            description: None,
            due_date,
            status: TaskStatus::Pending,
            shared_with: Vec::new(),
        }
    }

    /// Sets the description; blank text clears it.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.trim().is_empty()).then_some(description);
        self
    }

    /// Sets the status.
    #[must_use]
    pub const fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the collaborator set, normalizing it.
    #[must_use]
    pub fn with_shared_with<I, S>(mut self, collaborators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.shared_with = normalize_shared_with(collaborators);
        self
    }

    /// Checks the fields the service requires.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::TitleEmpty`] if the title is blank.
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.title.trim().is_empty() {
            return Err(DraftError::TitleEmpty);
        }
        Ok(())
    }
}

impl From<&Task> for TaskDraft {
    fn from(task: &Task) -> Self {
        task.to_draft()
    }
}

/// Trims entries and drops blanks and duplicates, keeping first occurrences.
pub fn normalize_shared_with<I, S>(collaborators: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for entry in collaborators {
        let entry = entry.as_ref().trim();
        if !entry.is_empty() && !out.iter().any(|seen| seen == entry) {
            out.push(entry.to_string());
        }
    }
    out
}

/// Parses the comma-separated collaborator field users type
/// (`"a@example.com, b@example.com"`).
#[must_use]
pub fn parse_shared_with(input: &str) -> Vec<String> {
    normalize_shared_with(input.split(','))
}

fn deserialize_shared_with<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<String>>::deserialize(deserializer)?;
    Ok(normalize_shared_with(raw.unwrap_or_default()))
}

/// Parses a due date from any of the forms the service may send.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps (date taken in the
/// timestamp's own offset) and naive `YYYY-MM-DDTHH:MM:SS[.f]` timestamps.
///
/// # Errors
///
/// Returns the date parse error if none of the forms match.
pub fn parse_due_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.date_naive());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(ts.date());
    }
    NaiveDate::parse_from_str(raw, DUE_DATE_FORMAT)
}

/// Serde adapter: writes `YYYY-MM-DD`, reads via [`parse_due_date`].
pub mod due_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer, de};

    use super::{DUE_DATE_FORMAT, parse_due_date};

    /// Serializes a due date as `YYYY-MM-DD`.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&date.format(DUE_DATE_FORMAT))
    }

    /// Deserializes a due date in any accepted form.
    ///
    /// # Errors
    ///
    /// Fails if the value is not a string or does not parse as a date.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_due_date(&raw).map_err(|e| de::Error::custom(format!("invalid due date '{raw}': {e}")))
    }
}
