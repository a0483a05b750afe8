use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::{fmt, str::FromStr};

use super::{ParseEnumError, normalize};
use crate::error::TaskDeckError;
use crate::status::Status;

/// Upper bound on categories attached to one task.
pub const MAX_CATEGORIES: usize = 3;

/// Display name used when a referenced user cannot be resolved.
pub const UNKNOWN_USER_NAME: &str = "Unknown";

/// Functional area a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Solo,
    Front,
    Back,
    Setting,
    Team,
}

impl Category {
    pub const ALL: [Self; 5] = [Self::Solo, Self::Front, Self::Back, Self::Setting, Self::Team];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Front => "front",
            Self::Back => "back",
            Self::Setting => "setting",
            Self::Team => "team",
        }
    }
}

/// Task urgency, stored as the integers 1 through 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Low
    }
}

impl Priority {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.as_u8()
    }
}

impl TryFrom<u8> for Priority {
    type Error = ParseEnumError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            _ => Err(ParseEnumError {
                expected: "priority",
                got: value.to_string(),
            }),
        }
    }
}

/// Returned when more than [`MAX_CATEGORIES`] categories are supplied at once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("a task holds at most {MAX_CATEGORIES} categories, got {count}")]
pub struct CategoryLimitExceeded {
    pub count: usize,
}

/// Set of categories on a task. Never grows past [`MAX_CATEGORIES`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Category>", into = "Vec<Category>")]
pub struct CategorySet(BTreeSet<Category>);

impl CategorySet {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Add a category. Returns `false` and leaves the set untouched when it
    /// is already full or already holds `category`.
    pub fn insert(&mut self, category: Category) -> bool {
        if self.0.contains(&category) || self.0.len() >= MAX_CATEGORIES {
            return false;
        }
        self.0.insert(category)
    }

    pub fn remove(&mut self, category: Category) -> bool {
        self.0.remove(&category)
    }

    #[must_use]
    pub fn contains(&self, category: Category) -> bool {
        self.0.contains(&category)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.0.len() >= MAX_CATEGORIES
    }

    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        self.0.iter().copied()
    }

    /// Comma-separated form used by text output and the SQLite backend.
    #[must_use]
    pub fn joined(&self) -> String {
        self.iter().map(Category::as_str).collect::<Vec<_>>().join(",")
    }
}

impl TryFrom<Vec<Category>> for CategorySet {
    type Error = CategoryLimitExceeded;

    fn try_from(values: Vec<Category>) -> Result<Self, Self::Error> {
        let set: BTreeSet<Category> = values.into_iter().collect();
        if set.len() > MAX_CATEGORIES {
            return Err(CategoryLimitExceeded { count: set.len() });
        }
        Ok(Self(set))
    }
}

impl TryFrom<&[Category]> for CategorySet {
    type Error = CategoryLimitExceeded;

    fn try_from(values: &[Category]) -> Result<Self, Self::Error> {
        Self::try_from(values.to_vec())
    }
}

impl From<CategorySet> for Vec<Category> {
    fn from(set: CategorySet) -> Self {
        set.0.into_iter().collect()
    }
}

/// A task row as the remote store holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub status: Status,
    pub priority: Priority,
    pub categories: CategorySet,
    pub icon: Option<String>,
    pub created_by: String,
    pub assigned_to: String,
    pub deadline: DateTime<Utc>,
    pub one_line: String,
    pub memo: String,
    pub related_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload. The remote store assigns `id` and the timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTaskRecord {
    pub project_id: String,
    pub title: String,
    pub status: Status,
    pub priority: Priority,
    pub categories: CategorySet,
    pub icon: Option<String>,
    pub created_by: String,
    pub assigned_to: String,
    pub deadline: DateTime<Utc>,
    pub one_line: String,
    pub memo: String,
    pub related_url: Option<String>,
}

/// Row-level partial update. `None` leaves a column alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub categories: Option<CategorySet>,
    pub icon: Option<Option<String>>,
    pub assigned_to: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub one_line: Option<String>,
    pub memo: Option<String>,
    pub related_url: Option<Option<String>>,
}

impl TaskChanges {
    /// Changes that only move the status.
    #[must_use]
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply these changes to a row in place.
    pub fn apply_to(&self, record: &mut TaskRecord) {
        if let Some(title) = &self.title {
            record.title.clone_from(title);
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(priority) = self.priority {
            record.priority = priority;
        }
        if let Some(categories) = &self.categories {
            record.categories = categories.clone();
        }
        if let Some(icon) = &self.icon {
            record.icon.clone_from(icon);
        }
        if let Some(assigned_to) = &self.assigned_to {
            record.assigned_to.clone_from(assigned_to);
        }
        if let Some(deadline) = self.deadline {
            record.deadline = deadline;
        }
        if let Some(one_line) = &self.one_line {
            record.one_line.clone_from(one_line);
        }
        if let Some(memo) = &self.memo {
            record.memo.clone_from(memo);
        }
        if let Some(related_url) = &self.related_url {
            record.related_url.clone_from(related_url);
        }
    }
}

/// A task row with creator and assignee ids resolved to display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: TaskRecord,
    pub created_by_name: String,
    pub assigned_to_name: String,
}

impl TaskView {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.task.id
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        self.task.status
    }
}

/// Creation input coming from an edit form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    pub categories: CategorySet,
    #[serde(default)]
    pub icon: Option<String>,
    /// Display name of the assignee; empty or unresolved means the creator.
    #[serde(default)]
    pub assignee_name: Option<String>,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub one_line: String,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub related_url: Option<String>,
}

impl TaskDraft {
    /// A draft with form defaults: `todo`, priority 1, category `solo`.
    #[must_use]
    pub fn new(title: impl Into<String>, deadline: DateTime<Utc>) -> Self {
        let mut categories = CategorySet::new();
        categories.insert(Category::Solo);
        Self {
            title: title.into(),
            status: Status::Todo,
            priority: Priority::Low,
            categories,
            icon: None,
            assignee_name: None,
            deadline,
            one_line: String::new(),
            memo: String::new(),
            related_url: None,
        }
    }

    /// Check required fields before any remote call is made.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::Validation`] for a blank title or an empty
    /// category set.
    pub fn validate(&self) -> Result<(), TaskDeckError> {
        validate_title(&self.title)?;
        validate_categories(&self.categories)
    }
}

/// Partial update input coming from an edit form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub categories: Option<CategorySet>,
    pub icon: Option<Option<String>>,
    pub assignee_name: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub one_line: Option<String>,
    pub memo: Option<String>,
    pub related_url: Option<Option<String>>,
}

impl TaskPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// # Errors
    ///
    /// Returns [`TaskDeckError::Validation`] when the patch would blank the
    /// title or empty the category set.
    pub fn validate(&self) -> Result<(), TaskDeckError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(categories) = &self.categories {
            validate_categories(categories)?;
        }
        Ok(())
    }

    /// Row-level changes, with the assignee already resolved to an id.
    #[must_use]
    pub fn into_changes(self, assigned_to: Option<String>) -> TaskChanges {
        TaskChanges {
            title: self.title.map(|title| title.trim().to_string()),
            status: self.status,
            priority: self.priority,
            categories: self.categories,
            icon: self.icon,
            assigned_to,
            deadline: self.deadline,
            one_line: self.one_line,
            memo: self.memo,
            related_url: self.related_url,
        }
    }
}

fn validate_title(title: &str) -> Result<(), TaskDeckError> {
    if title.trim().is_empty() {
        return Err(TaskDeckError::validation("title", "title is required"));
    }
    Ok(())
}

fn validate_categories(categories: &CategorySet) -> Result<(), TaskDeckError> {
    if categories.is_empty() {
        return Err(TaskDeckError::validation(
            "category",
            "pick at least one category",
        ));
    }
    Ok(())
}

/// Calendar-day distance between `today` and a deadline.
#[must_use]
pub fn days_remaining(deadline: NaiveDate, today: NaiveDate) -> i64 {
    deadline.signed_duration_since(today).num_days()
}

/// Coarse deadline bucket shown next to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "state", content = "days")]
pub enum DeadlineStatus {
    Overdue,
    DueToday,
    DueTomorrow,
    DaysLeft(i64),
}

impl DeadlineStatus {
    #[must_use]
    pub fn of(deadline: NaiveDate, today: NaiveDate) -> Self {
        match days_remaining(deadline, today) {
            d if d < 0 => Self::Overdue,
            0 => Self::DueToday,
            1 => Self::DueTomorrow,
            d => Self::DaysLeft(d),
        }
    }
}

impl fmt::Display for DeadlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overdue => f.write_str("overdue"),
            Self::DueToday => f.write_str("due today"),
            Self::DueTomorrow => f.write_str("due tomorrow"),
            Self::DaysLeft(days) => write!(f, "{days} days left"),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        match normalized.as_str() {
            "solo" => Ok(Self::Solo),
            "front" => Ok(Self::Front),
            "back" => Ok(Self::Back),
            "setting" => Ok(Self::Setting),
            "team" => Ok(Self::Team),
            _ => Err(ParseEnumError {
                expected: "category",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        match normalized.as_str() {
            "1" | "low" => Ok(Self::Low),
            "2" | "medium" => Ok(Self::Medium),
            "3" | "high" => Ok(Self::High),
            _ => Err(ParseEnumError {
                expected: "priority",
                got: s.to_string(),
            }),
        }
    }
}
