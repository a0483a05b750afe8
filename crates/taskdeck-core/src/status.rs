//! Task status state machine.
//!
//! Toggling walks the cycle `todo -> in-progress -> done -> todo`, except that
//! a `done` task never leaves `done` on a plain toggle: it already counts
//! toward project completion, so the caller must confirm either a revert to
//! `in-progress` or a deletion. Edit forms may still set any status directly.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::model::{ParseEnumError, normalize};

/// The three lifecycle states of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Todo,
    InProgress,
    Done,
}

impl Default for Status {
    fn default() -> Self {
        Self::Todo
    }
}

impl Status {
    pub const ALL: [Self; 3] = [Self::Todo, Self::InProgress, Self::Done];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Done => "done",
        }
    }

    /// Successor in the status cycle.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Todo => Self::InProgress,
            Self::InProgress => Self::Done,
            Self::Done => Self::Todo,
        }
    }

    /// True once a task counts toward completion.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }

    /// Decide what a toggle request does from this status.
    #[must_use]
    pub const fn toggle(self) -> Toggle {
        if self.is_terminal() {
            Toggle::NeedsConfirmation
        } else {
            Toggle::Apply(self.next())
        }
    }
}

/// Result of a toggle request against the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    /// Write this status right away.
    Apply(Status),
    /// Nothing changes until a [`ConfirmAction`] is chosen.
    NeedsConfirmation,
}

/// Explicit choices offered when toggling a `done` task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmAction {
    /// Move the task back to `in-progress`.
    Revert,
    /// Delete the task.
    Delete,
}

impl ConfirmAction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Revert => "revert",
            Self::Delete => "delete",
        }
    }

    /// Status a confirmed revert lands on.
    pub const REVERT_TARGET: Status = Status::InProgress;
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ConfirmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        match normalized.as_str() {
            "todo" => Ok(Self::Todo),
            "in-progress" | "in_progress" | "doing" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(ParseEnumError {
                expected: "status",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for ConfirmAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        match normalized.as_str() {
            "revert" => Ok(Self::Revert),
            "delete" => Ok(Self::Delete),
            _ => Err(ParseEnumError {
                expected: "confirm action",
                got: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_walks_the_cycle() {
        assert_eq!(Status::Todo.next(), Status::InProgress);
        assert_eq!(Status::InProgress.next(), Status::Done);
        assert_eq!(Status::Done.next(), Status::Todo);
    }

    #[test]
    fn three_steps_return_to_start() {
        for status in Status::ALL {
            assert_eq!(status.next().next().next(), status);
        }
    }

    #[test]
    fn toggle_applies_immediately_before_done() {
        assert_eq!(Status::Todo.toggle(), Toggle::Apply(Status::InProgress));
        assert_eq!(Status::InProgress.toggle(), Toggle::Apply(Status::Done));
    }

    #[test]
    fn toggle_on_done_requires_confirmation() {
        assert_eq!(Status::Done.toggle(), Toggle::NeedsConfirmation);
        assert_eq!(ConfirmAction::REVERT_TARGET, Status::InProgress);
    }

    #[test]
    fn new_tasks_start_in_todo() {
        assert_eq!(Status::default(), Status::Todo);
    }

    #[test]
    fn status_round_trips_through_text_and_json() {
        for status in Status::ALL {
            assert_eq!(status.to_string().parse::<Status>(), Ok(status));
        }
        let json = serde_json::to_string(&Status::InProgress).expect("serialize");
        assert_eq!(json, "\"in-progress\"");
        assert_eq!(" DOING ".parse::<Status>(), Ok(Status::InProgress));
    }

    #[test]
    fn unknown_values_are_rejected() {
        let err = "blocked".parse::<Status>().unwrap_err();
        assert_eq!(err.expected, "status");
        assert_eq!(err.to_string(), "invalid status: 'blocked'");

        assert!("undo".parse::<ConfirmAction>().is_err());
        assert_eq!("Delete".parse::<ConfirmAction>(), Ok(ConfirmAction::Delete));
    }
}
