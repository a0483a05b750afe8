//! Domain records shared by the session, membership, and task layers.

pub mod task;
pub mod user;

use std::fmt;

pub use task::{
    Category, CategoryLimitExceeded, CategorySet, DeadlineStatus, MAX_CATEGORIES, NewTaskRecord,
    Priority, TaskChanges, TaskDraft, TaskPatch, TaskRecord, TaskView, UNKNOWN_USER_NAME,
};
pub use user::{
    Identity, Member, MemberChanges, NewMember, NewProject, NewUser, Project, ProjectMember, Role,
    UserRecord,
};

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

pub(crate) fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}
