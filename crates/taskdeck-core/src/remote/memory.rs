//! In-memory [`RemoteStore`] with latency and failure injection.
//!
//! Faults are keyed by the trait method name (`"user_by_id"`,
//! `"update_task"`, ...). Every call is counted under that name before any
//! injected delay or failure applies, so tests can assert exactly how many
//! round trips an operation cost.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{RemoteError, RemoteStore};
use crate::clock::{Clock, SystemClock};
use crate::ids;
use crate::model::{
    Category, MemberChanges, NewMember, NewProject, NewTaskRecord, NewUser, Project, ProjectMember,
    TaskChanges, TaskRecord, UserRecord,
};

#[derive(Debug, Default)]
struct Tables {
    tasks: Vec<TaskRecord>,
    users: Vec<UserRecord>,
    projects: Vec<Project>,
    members: Vec<ProjectMember>,
}

#[derive(Debug, Default)]
struct Faults {
    calls: HashMap<&'static str, u32>,
    delays: HashMap<&'static str, Duration>,
    failures: HashMap<&'static str, VecDeque<RemoteError>>,
}

/// Tables held in process memory.
#[derive(Debug)]
pub struct MemoryRemote {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Newest first; rows inserted later win ties.
fn newest_first<T: Clone>(rows: &[T], created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let mut out: Vec<T> = rows.iter().rev().cloned().collect();
    out.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
    out
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Stamp rows with `clock` instead of the system time.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            faults: Mutex::new(Faults::default()),
            clock,
        }
    }

    /// Delay every future call of `operation` by `delay`.
    pub fn set_delay(&self, operation: &'static str, delay: Duration) {
        lock(&self.faults).delays.insert(operation, delay);
    }

    pub fn clear_delay(&self, operation: &'static str) {
        lock(&self.faults).delays.remove(operation);
    }

    /// Queue `error` as the answer to the next call of `operation`.
    pub fn fail_next(&self, operation: &'static str, error: RemoteError) {
        lock(&self.faults)
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Queue `times` transient failures for `operation`.
    pub fn fail_transient(&self, operation: &'static str, times: u32) {
        for attempt in 1..=times {
            self.fail_next(
                operation,
                RemoteError::Transient(format!("injected failure #{attempt}")),
            );
        }
    }

    /// Number of calls made to `operation` so far.
    #[must_use]
    pub fn calls(&self, operation: &str) -> u32 {
        lock(&self.faults).calls.get(operation).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        lock(&self.faults).calls.clear();
    }

    /// Count the call, then apply any injected delay and failure.
    async fn enter(&self, operation: &'static str) -> Result<(), RemoteError> {
        let (delay, failure) = {
            let mut faults = lock(&self.faults);
            *faults.calls.entry(operation).or_default() += 1;
            let delay = faults.delays.get(operation).copied();
            let failure = faults
                .failures
                .get_mut(operation)
                .and_then(VecDeque::pop_front);
            (delay, failure)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        failure.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn tasks_by_project(&self, project_id: &str) -> Result<Vec<TaskRecord>, RemoteError> {
        self.enter("tasks_by_project").await?;
        let tables = lock(&self.tables);
        let rows: Vec<TaskRecord> = tables
            .tasks
            .iter()
            .filter(|task| task.project_id == project_id)
            .cloned()
            .collect();
        Ok(newest_first(&rows, |task| task.created_at))
    }

    async fn tasks_by_category(
        &self,
        project_id: &str,
        category: Category,
    ) -> Result<Vec<TaskRecord>, RemoteError> {
        self.enter("tasks_by_category").await?;
        let tables = lock(&self.tables);
        let rows: Vec<TaskRecord> = tables
            .tasks
            .iter()
            .filter(|task| task.project_id == project_id && task.categories.contains(category))
            .cloned()
            .collect();
        Ok(newest_first(&rows, |task| task.created_at))
    }

    async fn task_by_id(&self, id: &str) -> Result<TaskRecord, RemoteError> {
        self.enter("task_by_id").await?;
        lock(&self.tables)
            .tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found("task", id))
    }

    async fn insert_task(&self, task: &NewTaskRecord) -> Result<TaskRecord, RemoteError> {
        self.enter("insert_task").await?;
        let now = self.clock.now();
        let mut tables = lock(&self.tables);
        if !tables.projects.iter().any(|p| p.id == task.project_id) {
            return Err(RemoteError::Rejected(format!(
                "task references unknown project '{}'",
                task.project_id
            )));
        }
        let record = TaskRecord {
            id: ids::generate("td"),
            project_id: task.project_id.clone(),
            title: task.title.clone(),
            status: task.status,
            priority: task.priority,
            categories: task.categories.clone(),
            icon: task.icon.clone(),
            created_by: task.created_by.clone(),
            assigned_to: task.assigned_to.clone(),
            deadline: task.deadline,
            one_line: task.one_line.clone(),
            memo: task.memo.clone(),
            related_url: task.related_url.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.tasks.push(record.clone());
        Ok(record)
    }

    async fn update_task(
        &self,
        id: &str,
        changes: &TaskChanges,
    ) -> Result<TaskRecord, RemoteError> {
        self.enter("update_task").await?;
        let now = self.clock.now();
        let mut tables = lock(&self.tables);
        let record = tables
            .tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| RemoteError::not_found("task", id))?;
        changes.apply_to(record);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn delete_task(&self, id: &str) -> Result<(), RemoteError> {
        self.enter("delete_task").await?;
        let mut tables = lock(&self.tables);
        let before = tables.tasks.len();
        tables.tasks.retain(|task| task.id != id);
        if tables.tasks.len() == before {
            return Err(RemoteError::not_found("task", id));
        }
        Ok(())
    }

    async fn user_by_id(&self, id: &str) -> Result<UserRecord, RemoteError> {
        self.enter("user_by_id").await?;
        lock(&self.tables)
            .users
            .iter()
            .find(|user| user.id == id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found("user", id))
    }

    async fn users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRecord>, RemoteError> {
        self.enter("users_by_ids").await?;
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(lock(&self.tables)
            .users
            .iter()
            .filter(|user| wanted.contains(user.id.as_str()))
            .cloned()
            .collect())
    }

    async fn insert_user(&self, user: &NewUser) -> Result<UserRecord, RemoteError> {
        self.enter("insert_user").await?;
        let now = self.clock.now();
        let mut tables = lock(&self.tables);
        let id = user.id.clone().unwrap_or_else(|| ids::generate("u"));
        if tables.users.iter().any(|existing| existing.id == id) {
            return Err(RemoteError::Duplicate {
                entity: "user",
                detail: format!("id '{id}' is taken"),
            });
        }
        let record = UserRecord {
            id,
            user_name: user.user_name.clone(),
            email: user.email.clone(),
            role: user.role,
            project_id: None,
            is_active: user.is_active,
            created_at: now,
            updated_at: now,
        };
        tables.users.push(record.clone());
        Ok(record)
    }

    async fn set_user_active(&self, id: &str, active: bool) -> Result<(), RemoteError> {
        self.enter("set_user_active").await?;
        let now = self.clock.now();
        let mut tables = lock(&self.tables);
        let user = tables
            .users
            .iter_mut()
            .find(|user| user.id == id)
            .ok_or_else(|| RemoteError::not_found("user", id))?;
        user.is_active = active;
        user.updated_at = now;
        Ok(())
    }

    async fn members_by_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<ProjectMember>, RemoteError> {
        self.enter("members_by_project").await?;
        let tables = lock(&self.tables);
        let mut rows: Vec<ProjectMember> = tables
            .members
            .iter()
            .filter(|member| member.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by_key(|member| member.created_at);
        Ok(rows)
    }

    async fn memberships_by_user(&self, user_id: &str) -> Result<Vec<ProjectMember>, RemoteError> {
        self.enter("memberships_by_user").await?;
        let tables = lock(&self.tables);
        let mut rows: Vec<ProjectMember> = tables
            .members
            .iter()
            .filter(|member| member.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|member| member.created_at);
        Ok(rows)
    }

    async fn insert_member(&self, member: &NewMember) -> Result<ProjectMember, RemoteError> {
        self.enter("insert_member").await?;
        let now = self.clock.now();
        let mut tables = lock(&self.tables);
        if !tables.projects.iter().any(|p| p.id == member.project_id) {
            return Err(RemoteError::Rejected(format!(
                "membership references unknown project '{}'",
                member.project_id
            )));
        }
        if !tables.users.iter().any(|u| u.id == member.user_id) {
            return Err(RemoteError::Rejected(format!(
                "membership references unknown user '{}'",
                member.user_id
            )));
        }
        if tables
            .members
            .iter()
            .any(|m| m.project_id == member.project_id && m.user_id == member.user_id)
        {
            return Err(RemoteError::Duplicate {
                entity: "membership",
                detail: format!(
                    "user '{}' already belongs to project '{}'",
                    member.user_id, member.project_id
                ),
            });
        }
        let record = ProjectMember {
            id: ids::generate("pm"),
            project_id: member.project_id.clone(),
            user_id: member.user_id.clone(),
            role: member.role,
            is_active: member.is_active,
            created_at: now,
            updated_at: now,
        };
        tables.members.push(record.clone());
        Ok(record)
    }

    async fn update_member(
        &self,
        id: &str,
        changes: &MemberChanges,
    ) -> Result<ProjectMember, RemoteError> {
        self.enter("update_member").await?;
        let now = self.clock.now();
        let mut tables = lock(&self.tables);
        let member = tables
            .members
            .iter_mut()
            .find(|member| member.id == id)
            .ok_or_else(|| RemoteError::not_found("membership", id))?;
        changes.apply_to(member);
        member.updated_at = now;
        Ok(member.clone())
    }

    async fn delete_member(&self, id: &str) -> Result<(), RemoteError> {
        self.enter("delete_member").await?;
        let mut tables = lock(&self.tables);
        let before = tables.members.len();
        tables.members.retain(|member| member.id != id);
        if tables.members.len() == before {
            return Err(RemoteError::not_found("membership", id));
        }
        Ok(())
    }

    async fn project_by_id(&self, id: &str) -> Result<Project, RemoteError> {
        self.enter("project_by_id").await?;
        lock(&self.tables)
            .projects
            .iter()
            .find(|project| project.id == id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found("project", id))
    }

    async fn projects_by_ids(&self, ids: &[String]) -> Result<Vec<Project>, RemoteError> {
        self.enter("projects_by_ids").await?;
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(lock(&self.tables)
            .projects
            .iter()
            .filter(|project| wanted.contains(project.id.as_str()))
            .cloned()
            .collect())
    }

    async fn project_by_code(&self, code: &str) -> Result<Project, RemoteError> {
        self.enter("project_by_code").await?;
        lock(&self.tables)
            .projects
            .iter()
            .find(|project| project.code == code)
            .cloned()
            .ok_or_else(|| RemoteError::not_found("project", code))
    }

    async fn project_by_name(&self, name: &str) -> Result<Project, RemoteError> {
        self.enter("project_by_name").await?;
        lock(&self.tables)
            .projects
            .iter()
            .find(|project| project.name == name)
            .cloned()
            .ok_or_else(|| RemoteError::not_found("project", name))
    }

    async fn list_projects(&self) -> Result<Vec<Project>, RemoteError> {
        self.enter("list_projects").await?;
        let tables = lock(&self.tables);
        Ok(newest_first(&tables.projects, |project| project.created_at))
    }

    async fn insert_project(&self, project: &NewProject) -> Result<Project, RemoteError> {
        self.enter("insert_project").await?;
        let now = self.clock.now();
        let mut tables = lock(&self.tables);
        if tables.projects.iter().any(|p| p.code == project.code) {
            return Err(RemoteError::Duplicate {
                entity: "project",
                detail: format!("code '{}' is taken", project.code),
            });
        }
        let record = Project {
            id: ids::generate("p"),
            name: project.name.clone(),
            code: project.code.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.projects.push(record.clone());
        Ok(record)
    }
}
