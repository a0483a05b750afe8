//! Pure views over task lists: category filtering, board columns,
//! completion, and deadline ordering.
//!
//! Every function here preserves the input order unless it says it sorts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::model::{Category, CategorySet, ParseEnumError, TaskRecord, TaskView, normalize};
use crate::status::Status;

/// Fields the filters need, implemented for stored and hydrated rows.
pub trait TaskFields {
    fn categories(&self) -> &CategorySet;
    fn status(&self) -> Status;
    fn deadline(&self) -> DateTime<Utc>;
    fn assigned_to(&self) -> &str;
}

impl TaskFields for TaskRecord {
    fn categories(&self) -> &CategorySet {
        &self.categories
    }

    fn status(&self) -> Status {
        self.status
    }

    fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    fn assigned_to(&self) -> &str {
        &self.assigned_to
    }
}

impl TaskFields for TaskView {
    fn categories(&self) -> &CategorySet {
        &self.task.categories
    }

    fn status(&self) -> Status {
        self.task.status
    }

    fn deadline(&self) -> DateTime<Utc> {
        self.task.deadline
    }

    fn assigned_to(&self) -> &str {
        &self.task.assigned_to
    }
}

/// The filter bar: one category, `team`, or `all`.
///
/// `team` and `all` both show the whole list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Solo,
    Front,
    Back,
    Setting,
    Team,
    #[default]
    All,
}

impl FilterKind {
    pub const ALL: [Self; 6] = [
        Self::Solo,
        Self::Front,
        Self::Back,
        Self::Setting,
        Self::Team,
        Self::All,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Front => "front",
            Self::Back => "back",
            Self::Setting => "setting",
            Self::Team => "team",
            Self::All => "all",
        }
    }

    /// Category a task must carry, or `None` for the pass-through kinds.
    #[must_use]
    pub const fn required_category(self) -> Option<Category> {
        match self {
            Self::Solo => Some(Category::Solo),
            Self::Front => Some(Category::Front),
            Self::Back => Some(Category::Back),
            Self::Setting => Some(Category::Setting),
            Self::Team | Self::All => None,
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "solo" => Ok(Self::Solo),
            "front" => Ok(Self::Front),
            "back" => Ok(Self::Back),
            "setting" => Ok(Self::Setting),
            "team" => Ok(Self::Team),
            "all" => Ok(Self::All),
            _ => Err(ParseEnumError {
                expected: "filter",
                got: s.to_string(),
            }),
        }
    }
}

/// Filter bar state plus an optional extra category refinement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSelection {
    pub kind: FilterKind,
    #[serde(default)]
    pub refine: Option<Category>,
}

impl FilterSelection {
    #[must_use]
    pub const fn new(kind: FilterKind) -> Self {
        Self { kind, refine: None }
    }

    #[must_use]
    pub const fn refined(self, category: Category) -> Self {
        Self {
            kind: self.kind,
            refine: Some(category),
        }
    }

    #[must_use]
    pub fn matches(&self, categories: &CategorySet) -> bool {
        let kind_ok = self
            .kind
            .required_category()
            .is_none_or(|category| categories.contains(category));
        let refine_ok = self
            .refine
            .is_none_or(|category| categories.contains(category));
        kind_ok && refine_ok
    }
}

/// Order-preserving subsequence of `tasks` matching `selection`.
#[must_use]
pub fn filter<T: TaskFields + Clone>(tasks: &[T], selection: &FilterSelection) -> Vec<T> {
    tasks
        .iter()
        .filter(|task| selection.matches(task.categories()))
        .cloned()
        .collect()
}

/// Tasks split into the three board columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Board<T> {
    pub todo: Vec<T>,
    pub in_progress: Vec<T>,
    pub done: Vec<T>,
}

impl<T> Board<T> {
    #[must_use]
    pub const fn column(&self, status: Status) -> &Vec<T> {
        match status {
            Status::Todo => &self.todo,
            Status::InProgress => &self.in_progress,
            Status::Done => &self.done,
        }
    }
}

#[must_use]
pub fn by_status<T: TaskFields + Clone>(tasks: &[T]) -> Board<T> {
    let mut board = Board {
        todo: Vec::new(),
        in_progress: Vec::new(),
        done: Vec::new(),
    };
    for task in tasks {
        match task.status() {
            Status::Todo => board.todo.push(task.clone()),
            Status::InProgress => board.in_progress.push(task.clone()),
            Status::Done => board.done.push(task.clone()),
        }
    }
    board
}

/// Done-versus-total count for a progress bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub done: usize,
    pub total: usize,
}

impl Completion {
    #[must_use]
    pub fn of<T: TaskFields>(tasks: &[T]) -> Self {
        Self {
            done: tasks.iter().filter(|t| t.status().is_terminal()).count(),
            total: tasks.len(),
        }
    }

    /// Whole percent, rounded down; 0 for an empty list.
    #[must_use]
    pub const fn percent(&self) -> usize {
        if self.total == 0 {
            0
        } else {
            self.done * 100 / self.total
        }
    }
}

/// Unfinished tasks due within `[now, now + days]`, earliest deadline first.
///
/// A window reaching past the representable range ends at
/// [`DateTime::<Utc>::MAX_UTC`]; a negative `days` yields nothing.
#[must_use]
pub fn upcoming<T: TaskFields + Clone>(tasks: &[T], now: DateTime<Utc>, days: i64) -> Vec<T> {
    if days < 0 {
        return Vec::new();
    }
    let until = Duration::try_days(days)
        .and_then(|span| now.checked_add_signed(span))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let mut out: Vec<T> = tasks
        .iter()
        .filter(|task| !task.status().is_terminal())
        .filter(|task| (now..=until).contains(&task.deadline()))
        .cloned()
        .collect();
    out.sort_by_key(TaskFields::deadline);
    out
}

/// Tasks assigned to `user_id`, earliest deadline first.
#[must_use]
pub fn assigned_to<T: TaskFields + Clone>(tasks: &[T], user_id: &str) -> Vec<T> {
    let mut out: Vec<T> = tasks
        .iter()
        .filter(|task| task.assigned_to() == user_id)
        .cloned()
        .collect();
    out.sort_by_key(TaskFields::deadline);
    out
}
