use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::session::SessionConfig;
use crate::store::{RefreshPolicy, StoreConfig};

/// Workspace directory holding config, state, and the local database.
pub const WORKSPACE_DIR: &str = ".taskdeck";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub remote: RemoteSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl SessionSection {
    #[must_use]
    pub const fn to_config(&self) -> SessionConfig {
        SessionConfig {
            ttl: Duration::from_millis(self.ttl_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            retry: RetryPolicy::new(self.retries, Duration::from_millis(self.retry_delay_ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub refresh: RefreshPolicy,
    #[serde(default = "default_retries")]
    pub write_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            refresh: RefreshPolicy::default(),
            write_retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl StoreSection {
    #[must_use]
    pub const fn to_config(&self) -> StoreConfig {
        StoreConfig {
            refresh: self.refresh,
            retry: RetryPolicy::new(self.write_retries, Duration::from_millis(self.retry_delay_ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSection {
    /// SQLite file; relative paths resolve against the workspace root.
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

impl RemoteSection {
    #[must_use]
    pub fn database_path(&self, project_root: &Path) -> PathBuf {
        if self.database.is_absolute() {
            self.database.clone()
        } else {
            project_root.join(&self.database)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct UserConfig {
    /// Default acting user id.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

/// Per-workspace state written by commands, not by hand.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct WorkspaceState {
    /// Project chosen with `td project use`.
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub user: UserConfig,
    pub resolved_output: String,
}

#[must_use]
pub fn workspace_dir(project_root: &Path) -> PathBuf {
    project_root.join(WORKSPACE_DIR)
}

fn read_toml<T>(path: &Path) -> Result<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str::<T>(&content)
        .map(Some)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(value).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = workspace_dir(project_root).join("config.toml");
    Ok(read_toml(&path)?.unwrap_or_default())
}

/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_project_config(project_root: &Path, config: &ProjectConfig) -> Result<()> {
    write_toml(&workspace_dir(project_root).join("config.toml"), config)
}

/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };
    Ok(read_toml(&config_dir.join("taskdeck/config.toml"))?.unwrap_or_default())
}

/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_state(project_root: &Path) -> Result<WorkspaceState> {
    Ok(read_toml(&workspace_dir(project_root).join("state.toml"))?.unwrap_or_default())
}

/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_state(project_root: &Path, state: &WorkspaceState) -> Result<()> {
    write_toml(&workspace_dir(project_root).join("state.toml"), state)
}

/// # Errors
///
/// Returns an error if either config file exists but is malformed.
pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.clone(), env_format);

    Ok(EffectiveConfig {
        project,
        user,
        resolved_output,
    })
}

fn resolve_output(cli_json: bool, user_output: Option<String>, env_format: Option<String>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "table" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_ttl_ms() -> u64 {
    10_000
}

const fn default_timeout_ms() -> u64 {
    8_000
}

const fn default_retries() -> u32 {
    1
}

const fn default_retry_delay_ms() -> u64 {
    500
}

fn default_database() -> PathBuf {
    PathBuf::from(WORKSPACE_DIR).join("remote.sqlite3")
}
