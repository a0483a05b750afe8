//! SQLite schema for the local remote-store backend.
//!
//! Mirrors the hosted tables:
//! - `project`, `users`, and `project_members` for the membership graph
//! - `task` for task rows, with `task_categories` as an edge table so
//!   "category contains X" is an indexed join instead of a string scan
//!
//! Timestamps are stored as integer microseconds (`*_us`).

/// Migration v1: core tables.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS project (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    code TEXT NOT NULL UNIQUE,
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    user_name TEXT NOT NULL,
    email TEXT NOT NULL DEFAULT '',
    role TEXT NOT NULL DEFAULT 'member' CHECK (role IN ('admin', 'member')),
    project_id TEXT REFERENCES project(id) ON DELETE SET NULL,
    is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1)),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS project_members (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES project(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role TEXT NOT NULL DEFAULT 'member' CHECK (role IN ('admin', 'member')),
    is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1)),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    UNIQUE (project_id, user_id)
);

CREATE TABLE IF NOT EXISTS task (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES project(id) ON DELETE CASCADE,
    title TEXT NOT NULL CHECK (length(trim(title)) > 0),
    status TEXT NOT NULL DEFAULT 'todo' CHECK (status IN ('todo', 'in-progress', 'done')),
    priority INTEGER NOT NULL DEFAULT 1 CHECK (priority BETWEEN 1 AND 3),
    icon TEXT,
    created_by TEXT NOT NULL,
    assigned_to TEXT NOT NULL,
    deadline_us INTEGER NOT NULL,
    one_line TEXT NOT NULL DEFAULT '',
    memo TEXT NOT NULL DEFAULT '',
    related_url TEXT,
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS task_categories (
    task_id TEXT NOT NULL REFERENCES task(id) ON DELETE CASCADE,
    category TEXT NOT NULL CHECK (category IN ('solo', 'front', 'back', 'setting', 'team')),
    PRIMARY KEY (task_id, category)
);

CREATE INDEX IF NOT EXISTS idx_task_project_created
    ON task(project_id, created_at_us DESC);

CREATE INDEX IF NOT EXISTS idx_task_assigned_deadline
    ON task(assigned_to, deadline_us);

CREATE INDEX IF NOT EXISTS idx_task_categories_category
    ON task_categories(category, task_id);

CREATE INDEX IF NOT EXISTS idx_project_members_user
    ON project_members(user_id, created_at_us);

CREATE INDEX IF NOT EXISTS idx_project_members_project
    ON project_members(project_id, created_at_us);

CREATE INDEX IF NOT EXISTS idx_project_name
    ON project(name);
";

/// Indexes expected after all migrations have run.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_task_project_created",
    "idx_task_assigned_deadline",
    "idx_task_categories_category",
    "idx_project_members_user",
    "idx_project_members_project",
    "idx_project_name",
];
