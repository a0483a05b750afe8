use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use taskdeck_core::config::{self, ProjectConfig, WORKSPACE_DIR};
use taskdeck_core::remote::sqlite::SqliteRemote;
use tracing::info;

use crate::output::{OutputMode, pretty_kv, render};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite the default config even if `.taskdeck/` already exists.
    #[arg(long)]
    pub force: bool,
}

const GITIGNORE: &str = "remote.sqlite3\nremote.sqlite3-wal\nremote.sqlite3-shm\nstate.toml\n";

#[derive(Debug, Serialize)]
struct InitReport {
    workspace: String,
    database: String,
    reinitialized: bool,
}

/// Execute `td init`. Creates the workspace skeleton:
///
/// ```text
/// .taskdeck/
///   config.toml       (default session/store/remote settings)
///   remote.sqlite3    (local remote store, migrated to the latest schema)
///   .gitignore        (database files and per-checkout state)
/// ```
///
/// # Errors
///
/// Returns an error if `.taskdeck/` already exists and `--force` is not set,
/// or if any filesystem or database operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let workspace = config::workspace_dir(project_root);
    let existed = workspace.exists();
    if existed && !args.force {
        anyhow::bail!("{WORKSPACE_DIR}/ already exists. Use `td init --force` to reinitialize.");
    }

    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create {}", workspace.display()))?;

    let project_config = if existed {
        config::load_project_config(project_root).unwrap_or_default()
    } else {
        ProjectConfig::default()
    };
    config::save_project_config(project_root, &project_config)?;

    let gitignore = workspace.join(".gitignore");
    std::fs::write(&gitignore, GITIGNORE)
        .with_context(|| format!("Failed to write {}", gitignore.display()))?;

    let database = project_config.remote.database_path(project_root);
    SqliteRemote::open(&database)
        .with_context(|| format!("Failed to create database at {}", database.display()))?;
    info!(workspace = %workspace.display(), "workspace initialized");

    let report = InitReport {
        workspace: workspace.display().to_string(),
        database: database.display().to_string(),
        reinitialized: existed,
    };
    render(output, &report, |report, w| {
        let verb = if report.reinitialized {
            "Reinitialized"
        } else {
            "Initialized"
        };
        writeln!(w, "✓ {verb} taskdeck workspace")?;
        pretty_kv(w, "workspace", &report.workspace)?;
        pretty_kv(w, "database", &report.database)?;
        writeln!(w, "Next: td user add <name> --email <email>")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_workspace_and_database() {
        let dir = TempDir::new().unwrap();
        run_init(&InitArgs { force: false }, OutputMode::Json, dir.path()).unwrap();

        let workspace = dir.path().join(WORKSPACE_DIR);
        assert!(workspace.join("config.toml").is_file());
        assert!(workspace.join("remote.sqlite3").is_file());
        let ignore = std::fs::read_to_string(workspace.join(".gitignore")).unwrap();
        assert!(ignore.contains("remote.sqlite3"));
    }

    #[test]
    fn second_init_needs_force() {
        let dir = TempDir::new().unwrap();
        run_init(&InitArgs { force: false }, OutputMode::Json, dir.path()).unwrap();

        let err = run_init(&InitArgs { force: false }, OutputMode::Json, dir.path()).unwrap_err();
        assert!(err.to_string().contains("--force"));
        run_init(&InitArgs { force: true }, OutputMode::Json, dir.path()).unwrap();
    }

    #[test]
    fn force_keeps_existing_settings() {
        let dir = TempDir::new().unwrap();
        run_init(&InitArgs { force: false }, OutputMode::Json, dir.path()).unwrap();
        let mut cfg = config::load_project_config(dir.path()).unwrap();
        cfg.session.ttl_ms = 30_000;
        config::save_project_config(dir.path(), &cfg).unwrap();

        run_init(&InitArgs { force: true }, OutputMode::Json, dir.path()).unwrap();
        assert_eq!(
            config::load_project_config(dir.path()).unwrap().session.ttl_ms,
            30_000
        );
    }
}
