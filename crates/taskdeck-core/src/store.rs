//! Task store: the client-side snapshot of one project's tasks.
//!
//! Reads come from the snapshot. Every mutation goes through a single-flight
//! queue that covers both the remote write and the re-read that follows it,
//! so snapshots land in the order their mutations were issued. The snapshot
//! only ever holds rows the remote store returned; nothing is patched in
//! ahead of the write.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::TaskDeckError;
use crate::filter::{self, Board, Completion, FilterSelection};
use crate::membership::Membership;
use crate::model::{
    Category, NewTaskRecord, ParseEnumError, TaskChanges, TaskDraft, TaskPatch, TaskRecord,
    TaskView, UNKNOWN_USER_NAME, normalize,
};
use crate::remote::RemoteStore;
use crate::retry::{RetryPolicy, with_retry};
use crate::status::{ConfirmAction, Status, Toggle};

/// How the snapshot is brought up to date after a successful write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    /// Re-read the whole project.
    #[default]
    Full,
    /// Re-read only the written row and splice it in.
    Targeted,
}

impl RefreshPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Targeted => "targeted",
        }
    }
}

impl fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshPolicy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "full" => Ok(Self::Full),
            "targeted" => Ok(Self::Targeted),
            _ => Err(ParseEnumError {
                expected: "refresh policy",
                got: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreConfig {
    pub refresh: RefreshPolicy,
    /// Applied to writes and re-reads alike.
    pub retry: RetryPolicy,
}

/// Result of [`TaskStore::toggle_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The next status was written; this is the row as stored.
    Applied(TaskView),
    /// The task is done. Nothing was written; call [`TaskStore::confirm`].
    NeedsConfirmation(TaskView),
}

/// Result of [`TaskStore::confirm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Reverted(TaskView),
    Deleted(String),
}

/// Snapshot and mutation queue for one project.
#[derive(Debug)]
pub struct TaskStore {
    remote: Arc<dyn RemoteStore>,
    membership: Membership,
    project_id: String,
    config: StoreConfig,
    snapshot: Mutex<Vec<TaskView>>,
    queue: AsyncMutex<()>,
}

impl TaskStore {
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        project_id: impl Into<String>,
        config: StoreConfig,
    ) -> Self {
        Self {
            membership: Membership::new(Arc::clone(&remote), config.retry),
            remote,
            project_id: project_id.into(),
            config,
            snapshot: Mutex::new(Vec::new()),
            queue: AsyncMutex::new(()),
        }
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TaskView>> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- reads ---------------------------------------------------------------

    /// Copy of the current snapshot, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskView> {
        self.lock().clone()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<TaskView> {
        self.lock().iter().find(|view| view.id() == id).cloned()
    }

    #[must_use]
    pub fn visible(&self, selection: &FilterSelection) -> Vec<TaskView> {
        filter::filter(&self.lock(), selection)
    }

    #[must_use]
    pub fn by_status(&self) -> Board<TaskView> {
        filter::by_status(&self.lock())
    }

    #[must_use]
    pub fn completion(&self) -> Completion {
        Completion::of(&self.lock())
    }

    #[must_use]
    pub fn upcoming(&self, now: DateTime<Utc>, days: i64) -> Vec<TaskView> {
        filter::upcoming(&self.lock(), now, days)
    }

    #[must_use]
    pub fn assigned_to(&self, user_id: &str) -> Vec<TaskView> {
        filter::assigned_to(&self.lock(), user_id)
    }

    // -- remote reads --------------------------------------------------------

    /// Re-read the whole project and replace the snapshot.
    ///
    /// # Errors
    ///
    /// Propagates remote failures after retries; the snapshot is unchanged.
    pub async fn fetch(&self) -> Result<Vec<TaskView>, TaskDeckError> {
        let _turn = self.queue.lock().await;
        self.refresh_all().await
    }

    /// Server-side category query. Does not touch the snapshot.
    ///
    /// # Errors
    ///
    /// Propagates remote failures after retries.
    pub async fn fetch_category(
        &self,
        category: Category,
    ) -> Result<Vec<TaskView>, TaskDeckError> {
        let rows = with_retry(self.config.retry, "list tasks by category", || {
            self.remote.tasks_by_category(&self.project_id, category)
        })
        .await?;
        Ok(self.hydrate(rows).await)
    }

    async fn refresh_all(&self) -> Result<Vec<TaskView>, TaskDeckError> {
        let rows = with_retry(self.config.retry, "list tasks", || {
            self.remote.tasks_by_project(&self.project_id)
        })
        .await?;
        let views = self.hydrate(rows).await;
        debug!(project_id = %self.project_id, count = views.len(), "snapshot refreshed");
        *self.lock() = views.clone();
        Ok(views)
    }

    /// Creator and assignee names for `rows`, from one batch user lookup.
    ///
    /// A failed lookup degrades to [`UNKNOWN_USER_NAME`] rather than failing
    /// the whole read.
    async fn names_for(&self, rows: &[TaskRecord]) -> HashMap<String, String> {
        let ids: Vec<String> = rows
            .iter()
            .flat_map(|row| [row.created_by.clone(), row.assigned_to.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return HashMap::new();
        }

        match with_retry(self.config.retry, "load task users", || {
            self.remote.users_by_ids(&ids)
        })
        .await
        {
            Ok(users) => users.into_iter().map(|u| (u.id, u.user_name)).collect(),
            Err(err) => {
                warn!(error = %err, "user lookup failed, names shown as unknown");
                HashMap::new()
            }
        }
    }

    async fn hydrate(&self, rows: Vec<TaskRecord>) -> Vec<TaskView> {
        let names = self.names_for(&rows).await;
        rows.into_iter().map(|row| view_of(row, &names)).collect()
    }

    async fn hydrate_one(&self, row: TaskRecord) -> TaskView {
        let names = self.names_for(std::slice::from_ref(&row)).await;
        view_of(row, &names)
    }

    // -- mutations -----------------------------------------------------------

    /// Create a task authored by `creator_id`.
    ///
    /// The assignee display name is resolved against the active roster; a
    /// blank or unknown name assigns the task to its creator.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::Validation`] before any remote call for a
    /// blank title or empty category set, and remote failures after retries.
    pub async fn create(
        &self,
        creator_id: &str,
        draft: TaskDraft,
    ) -> Result<TaskView, TaskDeckError> {
        draft.validate()?;
        let assigned_to = self
            .assignee_or_creator(draft.assignee_name.as_deref(), creator_id)
            .await;

        let new_task = NewTaskRecord {
            project_id: self.project_id.clone(),
            title: draft.title.trim().to_string(),
            status: draft.status,
            priority: draft.priority,
            categories: draft.categories,
            icon: draft.icon,
            created_by: creator_id.to_string(),
            assigned_to,
            deadline: draft.deadline,
            one_line: draft.one_line,
            memo: draft.memo,
            related_url: draft.related_url,
        };

        let _turn = self.queue.lock().await;
        let row = self
            .write("create task", || self.remote.insert_task(&new_task))
            .await?;
        info!(task_id = %row.id, project_id = %self.project_id, "task created");
        Ok(self.after_upsert(row).await)
    }

    async fn assignee_or_creator(&self, name: Option<&str>, creator_id: &str) -> String {
        let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) else {
            return creator_id.to_string();
        };
        match self.membership.resolve_assignee_id(name, &self.project_id).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(name, "assignee not found among active members, using creator");
                creator_id.to_string()
            }
            Err(err) => {
                warn!(name, error = %err, "assignee lookup failed, using creator");
                creator_id.to_string()
            }
        }
    }

    /// Apply a partial edit.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::Validation`] for an empty patch, a blank
    /// title, an empty category set, or an assignee name that matches no
    /// active member; [`TaskDeckError::NotFound`] for an unknown task.
    pub async fn update(&self, id: &str, patch: TaskPatch) -> Result<TaskView, TaskDeckError> {
        if patch.is_empty() {
            return Err(TaskDeckError::validation("patch", "nothing to update"));
        }
        patch.validate()?;

        let assigned_to = match patch.assignee_name.as_deref().map(str::trim) {
            None => None,
            Some("") => {
                return Err(TaskDeckError::validation("assignee", "name must not be blank"));
            }
            Some(name) => Some(
                self.membership
                    .resolve_assignee_id(name, &self.project_id)
                    .await?
                    .ok_or_else(|| {
                        TaskDeckError::validation(
                            "assignee",
                            format!("no active member named '{name}'"),
                        )
                    })?,
            ),
        };
        let changes = patch.into_changes(assigned_to);

        let _turn = self.queue.lock().await;
        self.current(id).await?;
        let row = self
            .write("update task", || self.remote.update_task(id, &changes))
            .await?;
        info!(task_id = id, "task updated");
        Ok(self.after_upsert(row).await)
    }

    /// Set the status directly, bypassing the toggle cycle.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotFound`] for an unknown task or one that
    /// belongs to another project.
    pub async fn set_status(&self, id: &str, status: Status) -> Result<TaskView, TaskDeckError> {
        let _turn = self.queue.lock().await;
        self.current(id).await?;
        self.write_status(id, status).await
    }

    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotFound`] for an unknown task or one that
    /// belongs to another project.
    pub async fn delete(&self, id: &str) -> Result<(), TaskDeckError> {
        let _turn = self.queue.lock().await;
        self.current(id).await?;
        self.delete_locked(id).await
    }

    /// Advance a task one step through the status cycle.
    ///
    /// Done tasks are not moved; the caller gets
    /// [`ToggleOutcome::NeedsConfirmation`] and must follow up with
    /// [`TaskStore::confirm`].
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotFound`] for an unknown task.
    pub async fn toggle_status(&self, id: &str) -> Result<ToggleOutcome, TaskDeckError> {
        let _turn = self.queue.lock().await;
        let current = self.current(id).await?;
        match current.status().toggle() {
            Toggle::Apply(next) => {
                let view = self.write_status(id, next).await?;
                Ok(ToggleOutcome::Applied(view))
            }
            Toggle::NeedsConfirmation => {
                debug!(task_id = id, "toggle on done task needs confirmation");
                Ok(ToggleOutcome::NeedsConfirmation(current))
            }
        }
    }

    /// Carry out the choice made for a done task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::InvalidTransition`] when the task is not done.
    pub async fn confirm(
        &self,
        id: &str,
        action: ConfirmAction,
    ) -> Result<ConfirmOutcome, TaskDeckError> {
        let _turn = self.queue.lock().await;
        let current = self.current(id).await?.status();
        if !current.is_terminal() {
            return Err(TaskDeckError::InvalidTransition {
                from: current,
                to: ConfirmAction::REVERT_TARGET,
                reason: "only done tasks need confirmation",
            });
        }
        match action {
            ConfirmAction::Revert => {
                let view = self.write_status(id, ConfirmAction::REVERT_TARGET).await?;
                Ok(ConfirmOutcome::Reverted(view))
            }
            ConfirmAction::Delete => {
                self.delete_locked(id).await?;
                Ok(ConfirmOutcome::Deleted(id.to_string()))
            }
        }
    }

    // -- queue-held helpers --------------------------------------------------

    /// The task as this store sees it. Rows of other projects are reported
    /// as missing, so nothing here ever writes across projects.
    async fn current(&self, id: &str) -> Result<TaskView, TaskDeckError> {
        if let Some(view) = self.get(id) {
            return Ok(view);
        }
        let row = with_retry(self.config.retry, "load task", || self.remote.task_by_id(id)).await?;
        if row.project_id != self.project_id {
            warn!(task_id = id, project_id = %self.project_id, "task belongs to another project");
            return Err(TaskDeckError::NotFound {
                entity: "task",
                id: id.to_string(),
            });
        }
        Ok(self.hydrate_one(row).await)
    }

    async fn write_status(&self, id: &str, status: Status) -> Result<TaskView, TaskDeckError> {
        let changes = TaskChanges::status(status);
        let row = self
            .write("update task status", || self.remote.update_task(id, &changes))
            .await?;
        info!(task_id = id, status = %status, "task status changed");
        Ok(self.after_upsert(row).await)
    }

    async fn delete_locked(&self, id: &str) -> Result<(), TaskDeckError> {
        self.write("delete task", || self.remote.delete_task(id)).await?;
        info!(task_id = id, "task deleted");
        self.after_delete(id).await;
        Ok(())
    }

    /// Retried remote write. A failure is logged here and returned; the
    /// snapshot is not touched.
    async fn write<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, TaskDeckError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, crate::remote::RemoteError>>,
    {
        with_retry(self.config.retry, operation, call)
            .await
            .inspect_err(|err| {
                warn!(operation, project_id = %self.project_id, error = %err, "task write failed");
            })
    }

    /// Bring the snapshot in line with a write that already succeeded.
    ///
    /// A failed re-read does not undo the write: the row the write returned
    /// is spliced in instead, and the failure is logged.
    async fn after_upsert(&self, row: TaskRecord) -> TaskView {
        match self.config.refresh {
            RefreshPolicy::Full => match self.refresh_all().await {
                Ok(views) => match views.into_iter().find(|view| view.id() == row.id) {
                    Some(view) => view,
                    None => self.hydrate_one(row).await,
                },
                Err(err) => {
                    warn!(error = %err, "re-read after write failed, splicing written row");
                    self.splice(row).await
                }
            },
            RefreshPolicy::Targeted => {
                let fresh = match with_retry(self.config.retry, "re-read task", || {
                    self.remote.task_by_id(&row.id)
                })
                .await
                {
                    Ok(fresh) => fresh,
                    Err(err) => {
                        warn!(task_id = %row.id, error = %err, "targeted re-read failed");
                        row
                    }
                };
                self.splice(fresh).await
            }
        }
    }

    async fn after_delete(&self, id: &str) {
        if self.config.refresh == RefreshPolicy::Full {
            match self.refresh_all().await {
                Ok(_) => return,
                Err(err) => warn!(error = %err, "re-read after delete failed"),
            }
        }
        self.lock().retain(|view| view.id() != id);
        debug!(task_id = id, "row dropped from snapshot");
    }

    /// Replace the row in place, or insert it at its `created_at` position.
    async fn splice(&self, row: TaskRecord) -> TaskView {
        let view = self.hydrate_one(row).await;
        if view.task.project_id != self.project_id {
            warn!(task_id = %view.id(), "refusing to splice a row from another project");
            return view;
        }
        let mut snapshot = self.lock();
        if let Some(slot) = snapshot.iter_mut().find(|v| v.id() == view.id()) {
            slot.clone_from(&view);
        } else {
            let at = snapshot
                .iter()
                .position(|v| v.task.created_at <= view.task.created_at)
                .unwrap_or(snapshot.len());
            snapshot.insert(at, view.clone());
        }
        debug!(task_id = %view.id(), "row spliced into snapshot");
        view
    }
}

fn view_of(task: TaskRecord, names: &HashMap<String, String>) -> TaskView {
    let name_of = |id: &str| {
        names
            .get(id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string())
    };
    TaskView {
        created_by_name: name_of(&task.created_by),
        assigned_to_name: name_of(&task.assigned_to),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_policy_parses_config_values() {
        assert_eq!("full".parse::<RefreshPolicy>(), Ok(RefreshPolicy::Full));
        assert_eq!(" Targeted ".parse::<RefreshPolicy>(), Ok(RefreshPolicy::Targeted));
        assert!("partial".parse::<RefreshPolicy>().is_err());
        assert_eq!(RefreshPolicy::default(), RefreshPolicy::Full);
    }

    #[test]
    fn toml_uses_lowercase_names() {
        #[derive(Deserialize)]
        struct Table {
            refresh: RefreshPolicy,
        }
        let table: Table = toml::from_str(r#"refresh = "targeted""#).expect("parse");
        assert_eq!(table.refresh, RefreshPolicy::Targeted);
    }
}
