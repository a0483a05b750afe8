//! [`RemoteStore`] backed by a local SQLite file.
//!
//! Connection defaults:
//! - `journal_mode = WAL` so readers do not block the writer
//! - `busy_timeout = 5s`; a lock that outlives it surfaces as
//!   [`RemoteError::Transient`] and goes through the caller's retry policy
//! - `foreign_keys = ON` so memberships and tasks cannot outlive their project

pub mod migrations;
pub mod schema;

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter, types::Type};

use super::{RemoteError, RemoteStore};
use crate::clock::{Clock, SystemClock};
use crate::ids;
use crate::model::{
    Category, CategorySet, MemberChanges, NewMember, NewProject, NewTaskRecord, NewUser, Priority,
    Project, ProjectMember, TaskChanges, TaskRecord, UserRecord,
};

/// Busy timeout applied to every connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TASK_SELECT: &str = "SELECT t.id, t.project_id, t.title, t.status, t.priority, t.icon,
        t.created_by, t.assigned_to, t.deadline_us, t.one_line, t.memo, t.related_url,
        t.created_at_us, t.updated_at_us,
        (SELECT group_concat(c.category, ',') FROM task_categories c WHERE c.task_id = t.id)
     FROM task t";

const USER_SELECT: &str = "SELECT id, user_name, email, role, project_id, is_active,
        created_at_us, updated_at_us
     FROM users";

const MEMBER_SELECT: &str = "SELECT id, project_id, user_id, role, is_active,
        created_at_us, updated_at_us
     FROM project_members";

const PROJECT_SELECT: &str = "SELECT id, name, code, created_at_us, updated_at_us FROM project";

/// Tables persisted in SQLite.
#[derive(Debug)]
pub struct SqliteRemote {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteRemote {
    /// Open (or create) the database at `path`, apply pragmas, and migrate.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or opening,
    /// configuring, or migrating the database fails.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open remote database {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, gone when dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if configuring or migrating the database fails.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        configure_connection(&conn).context("configure sqlite pragmas")?;
        migrations::migrate(&mut conn).context("apply schema migrations")?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        })
    }

    /// Stamp rows with `clock` instead of the system time.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn with_conn<T>(
        &self,
        entity: &'static str,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, RemoteError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn).map_err(|err| classify(entity, err))
    }

    fn now_us(&self) -> i64 {
        self.clock.now().timestamp_micros()
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Map a SQLite failure onto the remote error taxonomy.
fn classify(entity: &'static str, err: rusqlite::Error) -> RemoteError {
    use rusqlite::ErrorCode;
    use rusqlite::ffi::{SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE};

    if let rusqlite::Error::SqliteFailure(failure, detail) = &err {
        let message = detail.clone().unwrap_or_else(|| failure.to_string());
        match failure.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::CannotOpen => return RemoteError::Transient(message),
            ErrorCode::ConstraintViolation => {
                return if matches!(
                    failure.extended_code,
                    SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY
                ) {
                    RemoteError::Duplicate {
                        entity,
                        detail: message,
                    }
                } else {
                    RemoteError::Rejected(message)
                };
            }
            _ => {}
        }
    }
    RemoteError::Rejected(err.to_string())
}

fn required<T>(entity: &'static str, id: &str, row: Option<T>) -> Result<T, RemoteError> {
    row.ok_or_else(|| RemoteError::not_found(entity, id))
}

fn conversion_error(
    idx: usize,
    ty: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn parse_text<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|err| conversion_error(idx, Type::Text, err))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let us: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_micros(us).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp {us} out of range").into(),
        )
    })
}

fn categories(row: &Row<'_>, idx: usize) -> rusqlite::Result<CategorySet> {
    let joined: Option<String> = row.get(idx)?;
    let parsed = joined
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|part| !part.is_empty())
        .map(Category::from_str)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| conversion_error(idx, Type::Text, err))?;
    CategorySet::try_from(parsed).map_err(|err| conversion_error(idx, Type::Text, err))
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let priority: u8 = row.get(4)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        status: parse_text(row, 3)?,
        priority: Priority::try_from(priority)
            .map_err(|err| conversion_error(4, Type::Integer, err))?,
        icon: row.get(5)?,
        created_by: row.get(6)?,
        assigned_to: row.get(7)?,
        deadline: timestamp(row, 8)?,
        one_line: row.get(9)?,
        memo: row.get(10)?,
        related_url: row.get(11)?,
        created_at: timestamp(row, 12)?,
        updated_at: timestamp(row, 13)?,
        categories: categories(row, 14)?,
    })
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        user_name: row.get(1)?,
        email: row.get(2)?,
        role: parse_text(row, 3)?,
        project_id: row.get(4)?,
        is_active: row.get(5)?,
        created_at: timestamp(row, 6)?,
        updated_at: timestamp(row, 7)?,
    })
}

fn row_to_member(row: &Row<'_>) -> rusqlite::Result<ProjectMember> {
    Ok(ProjectMember {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        role: parse_text(row, 3)?,
        is_active: row.get(4)?,
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
    })
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        created_at: timestamp(row, 3)?,
        updated_at: timestamp(row, 4)?,
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn load_task(conn: &Connection, id: &str) -> rusqlite::Result<Option<TaskRecord>> {
    conn.query_row(&format!("{TASK_SELECT} WHERE t.id = ?1"), [id], row_to_task)
        .optional()
}

fn write_categories(conn: &Connection, task_id: &str, set: &CategorySet) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM task_categories WHERE task_id = ?1", [task_id])?;
    let mut stmt =
        conn.prepare("INSERT INTO task_categories (task_id, category) VALUES (?1, ?2)")?;
    for category in set.iter() {
        stmt.execute(params![task_id, category.as_str()])?;
    }
    Ok(())
}

fn query_list<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    rows.collect()
}

#[async_trait]
impl RemoteStore for SqliteRemote {
    async fn tasks_by_project(&self, project_id: &str) -> Result<Vec<TaskRecord>, RemoteError> {
        self.with_conn("task", |conn| {
            query_list(
                conn,
                &format!(
                    "{TASK_SELECT} WHERE t.project_id = ?1
                     ORDER BY t.created_at_us DESC, t.rowid DESC"
                ),
                [project_id],
                row_to_task,
            )
        })
    }

    async fn tasks_by_category(
        &self,
        project_id: &str,
        category: Category,
    ) -> Result<Vec<TaskRecord>, RemoteError> {
        self.with_conn("task", |conn| {
            query_list(
                conn,
                &format!(
                    "{TASK_SELECT} WHERE t.project_id = ?1
                       AND EXISTS (SELECT 1 FROM task_categories c
                                   WHERE c.task_id = t.id AND c.category = ?2)
                     ORDER BY t.created_at_us DESC, t.rowid DESC"
                ),
                params![project_id, category.as_str()],
                row_to_task,
            )
        })
    }

    async fn task_by_id(&self, id: &str) -> Result<TaskRecord, RemoteError> {
        let row = self.with_conn("task", |conn| load_task(conn, id))?;
        required("task", id, row)
    }

    async fn insert_task(&self, task: &NewTaskRecord) -> Result<TaskRecord, RemoteError> {
        let id = ids::generate("td");
        let now = self.now_us();
        let row = self.with_conn("task", |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO task (id, project_id, title, status, priority, icon, created_by,
                                   assigned_to, deadline_us, one_line, memo, related_url,
                                   created_at_us, updated_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                params![
                    id,
                    task.project_id,
                    task.title,
                    task.status.as_str(),
                    task.priority.as_u8(),
                    task.icon,
                    task.created_by,
                    task.assigned_to,
                    task.deadline.timestamp_micros(),
                    task.one_line,
                    task.memo,
                    task.related_url,
                    now,
                ],
            )?;
            write_categories(&tx, &id, &task.categories)?;
            let row = load_task(&tx, &id)?;
            tx.commit()?;
            Ok(row)
        })?;
        required("task", &id, row)
    }

    async fn update_task(
        &self,
        id: &str,
        changes: &TaskChanges,
    ) -> Result<TaskRecord, RemoteError> {
        let now = self.now_us();
        let row = self.with_conn("task", |conn| {
            let tx = conn.transaction()?;
            let Some(mut record) = load_task(&tx, id)? else {
                return Ok(None);
            };
            changes.apply_to(&mut record);
            tx.execute(
                "UPDATE task SET title = ?2, status = ?3, priority = ?4, icon = ?5,
                        assigned_to = ?6, deadline_us = ?7, one_line = ?8, memo = ?9,
                        related_url = ?10, updated_at_us = ?11
                 WHERE id = ?1",
                params![
                    id,
                    record.title,
                    record.status.as_str(),
                    record.priority.as_u8(),
                    record.icon,
                    record.assigned_to,
                    record.deadline.timestamp_micros(),
                    record.one_line,
                    record.memo,
                    record.related_url,
                    now,
                ],
            )?;
            if let Some(set) = &changes.categories {
                write_categories(&tx, id, set)?;
            }
            let row = load_task(&tx, id)?;
            tx.commit()?;
            Ok(row)
        })?;
        required("task", id, row)
    }

    async fn delete_task(&self, id: &str) -> Result<(), RemoteError> {
        let removed =
            self.with_conn("task", |conn| conn.execute("DELETE FROM task WHERE id = ?1", [id]))?;
        required("task", id, (removed > 0).then_some(()))
    }

    async fn user_by_id(&self, id: &str) -> Result<UserRecord, RemoteError> {
        let row = self.with_conn("user", |conn| {
            conn.query_row(&format!("{USER_SELECT} WHERE id = ?1"), [id], row_to_user)
                .optional()
        })?;
        required("user", id, row)
    }

    async fn users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRecord>, RemoteError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn("user", |conn| {
            query_list(
                conn,
                &format!("{USER_SELECT} WHERE id IN ({})", placeholders(ids.len())),
                params_from_iter(ids.iter()),
                row_to_user,
            )
        })
    }

    async fn insert_user(&self, user: &NewUser) -> Result<UserRecord, RemoteError> {
        let id = user.id.clone().unwrap_or_else(|| ids::generate("u"));
        let now = self.now_us();
        let row = self.with_conn("user", |conn| {
            conn.execute(
                "INSERT INTO users (id, user_name, email, role, is_active,
                                    created_at_us, updated_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    user.user_name,
                    user.email,
                    user.role.as_str(),
                    user.is_active,
                    now
                ],
            )?;
            conn.query_row(&format!("{USER_SELECT} WHERE id = ?1"), [&id], row_to_user)
                .optional()
        })?;
        required("user", &id, row)
    }

    async fn set_user_active(&self, id: &str, active: bool) -> Result<(), RemoteError> {
        let now = self.now_us();
        let changed = self.with_conn("user", |conn| {
            conn.execute(
                "UPDATE users SET is_active = ?2, updated_at_us = ?3 WHERE id = ?1",
                params![id, active, now],
            )
        })?;
        required("user", id, (changed > 0).then_some(()))
    }

    async fn members_by_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<ProjectMember>, RemoteError> {
        self.with_conn("membership", |conn| {
            query_list(
                conn,
                &format!("{MEMBER_SELECT} WHERE project_id = ?1 ORDER BY created_at_us, rowid"),
                [project_id],
                row_to_member,
            )
        })
    }

    async fn memberships_by_user(&self, user_id: &str) -> Result<Vec<ProjectMember>, RemoteError> {
        self.with_conn("membership", |conn| {
            query_list(
                conn,
                &format!("{MEMBER_SELECT} WHERE user_id = ?1 ORDER BY created_at_us, rowid"),
                [user_id],
                row_to_member,
            )
        })
    }

    async fn insert_member(&self, member: &NewMember) -> Result<ProjectMember, RemoteError> {
        let id = ids::generate("pm");
        let now = self.now_us();
        let row = self.with_conn("membership", |conn| {
            conn.execute(
                "INSERT INTO project_members (id, project_id, user_id, role, is_active,
                                              created_at_us, updated_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    member.project_id,
                    member.user_id,
                    member.role.as_str(),
                    member.is_active,
                    now
                ],
            )?;
            conn.query_row(&format!("{MEMBER_SELECT} WHERE id = ?1"), [&id], row_to_member)
                .optional()
        })?;
        required("membership", &id, row)
    }

    async fn update_member(
        &self,
        id: &str,
        changes: &MemberChanges,
    ) -> Result<ProjectMember, RemoteError> {
        let now = self.now_us();
        let row = self.with_conn("membership", |conn| {
            let tx = conn.transaction()?;
            let current = tx
                .query_row(&format!("{MEMBER_SELECT} WHERE id = ?1"), [id], row_to_member)
                .optional()?;
            let Some(mut member) = current else {
                return Ok(None);
            };
            changes.apply_to(&mut member);
            tx.execute(
                "UPDATE project_members SET role = ?2, is_active = ?3, updated_at_us = ?4
                 WHERE id = ?1",
                params![id, member.role.as_str(), member.is_active, now],
            )?;
            let row = tx
                .query_row(&format!("{MEMBER_SELECT} WHERE id = ?1"), [id], row_to_member)
                .optional()?;
            tx.commit()?;
            Ok(row)
        })?;
        required("membership", id, row)
    }

    async fn delete_member(&self, id: &str) -> Result<(), RemoteError> {
        let removed = self.with_conn("membership", |conn| {
            conn.execute("DELETE FROM project_members WHERE id = ?1", [id])
        })?;
        required("membership", id, (removed > 0).then_some(()))
    }

    async fn project_by_id(&self, id: &str) -> Result<Project, RemoteError> {
        let row = self.with_conn("project", |conn| {
            conn.query_row(&format!("{PROJECT_SELECT} WHERE id = ?1"), [id], row_to_project)
                .optional()
        })?;
        required("project", id, row)
    }

    async fn projects_by_ids(&self, ids: &[String]) -> Result<Vec<Project>, RemoteError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn("project", |conn| {
            query_list(
                conn,
                &format!(
                    "{PROJECT_SELECT} WHERE id IN ({}) ORDER BY created_at_us DESC",
                    placeholders(ids.len())
                ),
                params_from_iter(ids.iter()),
                row_to_project,
            )
        })
    }

    async fn project_by_code(&self, code: &str) -> Result<Project, RemoteError> {
        let row = self.with_conn("project", |conn| {
            conn.query_row(&format!("{PROJECT_SELECT} WHERE code = ?1"), [code], row_to_project)
                .optional()
        })?;
        required("project", code, row)
    }

    async fn project_by_name(&self, name: &str) -> Result<Project, RemoteError> {
        let row = self.with_conn("project", |conn| {
            conn.query_row(
                &format!("{PROJECT_SELECT} WHERE name = ?1 ORDER BY created_at_us LIMIT 1"),
                [name],
                row_to_project,
            )
            .optional()
        })?;
        required("project", name, row)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, RemoteError> {
        self.with_conn("project", |conn| {
            query_list(
                conn,
                &format!("{PROJECT_SELECT} ORDER BY created_at_us DESC, rowid DESC"),
                [],
                row_to_project,
            )
        })
    }

    async fn insert_project(&self, project: &NewProject) -> Result<Project, RemoteError> {
        let id = ids::generate("p");
        let now = self.now_us();
        let row = self.with_conn("project", |conn| {
            conn.execute(
                "INSERT INTO project (id, name, code, created_at_us, updated_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id, project.name, project.code, now],
            )?;
            conn.query_row(&format!("{PROJECT_SELECT} WHERE id = ?1"), [&id], row_to_project)
                .optional()
        })?;
        required("project", &id, row)
    }
}
