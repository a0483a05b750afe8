//! The remote relational store, seen from the client.
//!
//! [`RemoteStore`] mirrors the four hosted tables (`task`, `users`,
//! `project`, `project_members`) and only the access patterns the client
//! uses: equality filters, "category contains X", timestamp ordering,
//! insert/update/delete by id, and batch lookup by id list. Every write
//! returns the row as stored so callers never have to guess server-assigned
//! fields.
//!
//! Two backends ship with the crate:
//! - [`memory::MemoryRemote`] keeps tables in memory and can inject latency
//!   and failures.
//! - [`sqlite::SqliteRemote`] persists tables in a local SQLite file.

pub mod memory;
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;

use crate::model::{
    Category, MemberChanges, NewMember, NewProject, NewTaskRecord, NewUser, Project, ProjectMember,
    TaskChanges, TaskRecord, UserRecord,
};

/// Failure reported by a remote store call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The addressed row does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint refused the write.
    #[error("duplicate {entity}: {detail}")]
    Duplicate { entity: &'static str, detail: String },

    /// Network, server, or lock failure that may succeed on retry.
    #[error("remote unavailable: {0}")]
    Transient(String),

    /// The store refused the request for a reason a retry will not fix.
    #[error("remote rejected request: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Client view of the hosted task backend.
#[async_trait]
pub trait RemoteStore: Send + Sync + fmt::Debug {
    /// All tasks of a project, newest `created_at` first.
    async fn tasks_by_project(&self, project_id: &str) -> Result<Vec<TaskRecord>, RemoteError>;

    /// Tasks of a project whose category set contains `category`, newest first.
    async fn tasks_by_category(
        &self,
        project_id: &str,
        category: Category,
    ) -> Result<Vec<TaskRecord>, RemoteError>;

    async fn task_by_id(&self, id: &str) -> Result<TaskRecord, RemoteError>;

    async fn insert_task(&self, task: &NewTaskRecord) -> Result<TaskRecord, RemoteError>;

    async fn update_task(&self, id: &str, changes: &TaskChanges)
    -> Result<TaskRecord, RemoteError>;

    async fn delete_task(&self, id: &str) -> Result<(), RemoteError>;

    async fn user_by_id(&self, id: &str) -> Result<UserRecord, RemoteError>;

    /// Batch lookup. Unknown ids are skipped, not reported.
    async fn users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRecord>, RemoteError>;

    async fn insert_user(&self, user: &NewUser) -> Result<UserRecord, RemoteError>;

    async fn set_user_active(&self, id: &str, active: bool) -> Result<(), RemoteError>;

    /// Memberships of a project (active or not), oldest first.
    async fn members_by_project(&self, project_id: &str)
    -> Result<Vec<ProjectMember>, RemoteError>;

    /// Memberships of a user (active or not), oldest first.
    async fn memberships_by_user(&self, user_id: &str) -> Result<Vec<ProjectMember>, RemoteError>;

    /// Fails with [`RemoteError::Duplicate`] when the user already has a
    /// membership row for the project.
    async fn insert_member(&self, member: &NewMember) -> Result<ProjectMember, RemoteError>;

    async fn update_member(
        &self,
        id: &str,
        changes: &MemberChanges,
    ) -> Result<ProjectMember, RemoteError>;

    async fn delete_member(&self, id: &str) -> Result<(), RemoteError>;

    async fn project_by_id(&self, id: &str) -> Result<Project, RemoteError>;

    /// Batch lookup. Unknown ids are skipped, not reported.
    async fn projects_by_ids(&self, ids: &[String]) -> Result<Vec<Project>, RemoteError>;

    async fn project_by_code(&self, code: &str) -> Result<Project, RemoteError>;

    async fn project_by_name(&self, name: &str) -> Result<Project, RemoteError>;

    /// All projects, newest first.
    async fn list_projects(&self) -> Result<Vec<Project>, RemoteError>;

    /// Fails with [`RemoteError::Duplicate`] when the code is taken.
    async fn insert_project(&self, project: &NewProject) -> Result<Project, RemoteError>;
}
