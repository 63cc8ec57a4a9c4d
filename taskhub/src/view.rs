//! Filtered views over the canonical collection.
//!
//! [`derive_view`] is a pure stable filter: it keeps the input order and
//! depends only on its arguments. Callers re-derive on every state change
//! and every selector change instead of caching results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone};

use taskhub_proto::task::{Task, TaskStatus};

use crate::repo::RepoError;
use crate::sync::SyncState;

/// Which subset of tasks to display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterSelector {
    /// Every task.
    #[default]
    All,
    /// Tasks due on the current calendar date.
    Today,
    /// Unfinished tasks whose due date has started.
    Overdue,
    /// Finished tasks.
    Completed,
}

impl FilterSelector {
    /// Every selector, in display order.
    pub const ALL: [Self; 4] = [Self::All, Self::Today, Self::Overdue, Self::Completed];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Today => "today",
            Self::Overdue => "overdue",
            Self::Completed => "completed",
        }
    }

    /// Whether `task` belongs in this view at local wall-clock time `now`.
    ///
    /// A due date counts as its start of day, so a task due today turns
    /// overdue once midnight has passed.
    #[must_use]
    pub fn matches(self, task: &Task, now: NaiveDateTime) -> bool {
        match self {
            Self::All => true,
            Self::Today => task.due_date == now.date(),
            Self::Overdue => {
                task.due_date.and_time(NaiveTime::MIN) < now
                    && task.status != TaskStatus::Completed
            }
            Self::Completed => task.status == TaskStatus::Completed,
        }
    }
}

impl fmt::Display for FilterSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a filter name that is not one of `all`, `today`, `overdue`, `completed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown filter '{0}' (expected all, today, overdue or completed)")]
pub struct UnknownFilter(pub String);

impl FromStr for FilterSelector {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|selector| selector.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownFilter(name.to_string()))
    }
}

/// Returns the tasks matching `selector` at `now`, in input order.
///
/// Calendar comparisons use `now`'s wall-clock time in its own time zone.
#[must_use]
pub fn derive_view<Tz: TimeZone>(
    tasks: &[Task],
    selector: FilterSelector,
    now: &DateTime<Tz>,
) -> Vec<Task> {
    let local = now.naive_local();
    tasks
        .iter()
        .filter(|task| selector.matches(task, local))
        .cloned()
        .collect()
}

/// A derived view of one synchronizer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterView {
    selector: FilterSelector,
    tasks: Vec<Task>,
    loading: bool,
    error: Option<RepoError>,
}

impl FilterView {
    /// Derives the view of `state` under `selector` at `now`.
    #[must_use]
    pub fn derive<Tz: TimeZone>(
        state: &SyncState,
        selector: FilterSelector,
        now: &DateTime<Tz>,
    ) -> Self {
        Self {
            selector,
            tasks: derive_view(&state.tasks, selector, now),
            loading: state.loading,
            error: state.last_error.clone(),
        }
    }

    /// Selector this view was derived with.
    #[must_use]
    pub const fn selector(&self) -> FilterSelector {
        self.selector
    }

    /// Matching tasks in service order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Whether the source state had a refresh in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// Error from the last refresh; the tasks are the last good load.
    #[must_use]
    pub const fn error(&self) -> Option<&RepoError> {
        self.error.as_ref()
    }

    /// Nothing to show ("No tasks to show.").
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
