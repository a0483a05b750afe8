//! Command handlers and the context they share.

pub mod completions;
pub mod init;
pub mod project;
pub mod task;
pub mod user;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use taskdeck_core::clock::SystemClock;
use taskdeck_core::config::{self, EffectiveConfig, WorkspaceState};
use taskdeck_core::error::TaskDeckError;
use taskdeck_core::model::{Identity, Project};
use taskdeck_core::project::ProjectDirectory;
use taskdeck_core::remote::RemoteStore;
use taskdeck_core::remote::sqlite::SqliteRemote;
use taskdeck_core::session::{Resolution, SessionCache};
use taskdeck_core::store::TaskStore;
use tracing::{debug, warn};

use crate::actor;
use crate::output::OutputMode;

/// Everything a command needs once the workspace is known to exist.
pub struct Context {
    pub root: PathBuf,
    pub output: OutputMode,
    pub config: EffectiveConfig,
    remote: Arc<dyn RemoteStore>,
    user_flag: Option<String>,
    project_flag: Option<String>,
}

impl Context {
    /// Open the workspace at `root` and its remote database.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotInitialized`] when `td init` has not been
    /// run here, or an error if the database cannot be opened.
    pub fn open(
        root: &Path,
        output: OutputMode,
        config: EffectiveConfig,
        user_flag: Option<String>,
        project_flag: Option<String>,
    ) -> anyhow::Result<Self> {
        let workspace = config::workspace_dir(root);
        if !workspace.is_dir() {
            return Err(TaskDeckError::NotInitialized(workspace).into());
        }
        let database = config.project.remote.database_path(root);
        let remote = SqliteRemote::open(&database)
            .with_context(|| format!("open remote store at {}", database.display()))?;
        debug!(database = %database.display(), "remote store opened");

        Ok(Self {
            root: root.to_path_buf(),
            output,
            config,
            remote: Arc::new(remote),
            user_flag,
            project_flag,
        })
    }

    #[must_use]
    pub fn remote(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.remote)
    }

    #[must_use]
    pub fn directory(&self) -> ProjectDirectory {
        ProjectDirectory::new(self.remote(), self.config.project.store.to_config().retry)
    }

    #[must_use]
    pub fn session(&self) -> SessionCache {
        SessionCache::new(
            self.remote(),
            Arc::new(SystemClock),
            self.config.project.session.to_config(),
        )
    }

    #[must_use]
    pub fn store(&self, project: &Project) -> TaskStore {
        TaskStore::new(
            self.remote(),
            project.id.clone(),
            self.config.project.store.to_config(),
        )
    }

    /// Identity of the acting user, read through the session cache.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotAuthenticated`] when no user is named or
    /// the named user has no row, and [`TaskDeckError::Timeout`] when the
    /// lookup timed out with nothing cached.
    pub async fn acting_user(&self) -> anyhow::Result<Identity> {
        let user_id = actor::require_user(self.user_flag.as_deref(), self.config.user.user.as_deref())?;
        let session = self.session();
        let identity = match session.resolve(&user_id).await? {
            Resolution::Missing => {
                return Err(TaskDeckError::NotAuthenticated(format!(
                    "user '{user_id}' does not exist; create it with `td user add`"
                ))
                .into());
            }
            Resolution::TimedOut => {
                return Err(TaskDeckError::Timeout {
                    operation: "resolve acting user",
                    waited: session.config().timeout,
                }
                .into());
            }
            Resolution::Stale(identity) => {
                warn!(user_id = %identity.id, "using stale identity");
                identity
            }
            Resolution::Cached(identity) | Resolution::Fetched(identity) => identity,
        };
        if !identity.is_active {
            return Err(TaskDeckError::NotAuthenticated(format!(
                "user '{user_id}' is deactivated"
            ))
            .into());
        }
        Ok(identity)
    }

    /// The project commands act on, for `user`.
    ///
    /// An explicit or saved selection must name a project the user actively
    /// belongs to. Without one, the user's most recently joined project is
    /// used.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::NoProjectSelected`] when nothing is selected
    /// and the user has no project, and a validation error when the selected
    /// project does not list the user as an active member.
    pub async fn current_project(&self, user: &Identity) -> anyhow::Result<Project> {
        let directory = self.directory();
        let state = config::load_state(&self.root)?;
        let requested = actor::resolve_project(self.project_flag.as_deref(), state.project.as_deref());

        let Some(requested) = requested else {
            let projects = directory.membership().user_projects(&user.id).await?;
            return projects
                .into_iter()
                .next()
                .ok_or_else(|| TaskDeckError::NoProjectSelected.into());
        };

        self.current_project_named(user, &requested).await
    }

    /// Project `requested` (id or join code), provided `user` is an active
    /// member of it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotFound`] for an unknown project and a
    /// validation error when the user is not an active member.
    pub async fn current_project_named(
        &self,
        user: &Identity,
        requested: &str,
    ) -> anyhow::Result<Project> {
        let directory = self.directory();
        let project = directory.find(requested).await?;
        let active = directory
            .membership()
            .membership_of(&project.id, &user.id)
            .await?
            .is_some_and(|membership| membership.is_active);
        if !active {
            return Err(TaskDeckError::validation(
                "project",
                format!("'{}' is not a member of {}", user.name, project.code),
            )
            .into());
        }
        Ok(project)
    }

    /// Remember `project` as the selection for later commands.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written.
    pub fn select_project(&self, project: &Project) -> anyhow::Result<()> {
        config::save_state(
            &self.root,
            &WorkspaceState {
                project: Some(project.id.clone()),
            },
        )
    }
}
