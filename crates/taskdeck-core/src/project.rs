//! Project creation, join codes, and default project assignment.

use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};

use crate::error::TaskDeckError;
use crate::membership::Membership;
use crate::model::{NewProject, Project, Role};
use crate::remote::{RemoteError, RemoteStore};
use crate::retry::{RetryPolicy, with_retry};

/// Prefix of generated join codes.
pub const CODE_PREFIX: &str = "PRJ-";

/// Random characters after [`CODE_PREFIX`].
pub const CODE_RANDOM_LEN: usize = 6;

pub const MAX_NAME_LEN: usize = 50;

/// Name of the project new users land in.
pub const DEFAULT_PROJECT_NAME: &str = "default";

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const GENERATED_CODE_ATTEMPTS: u32 = 5;

/// A fresh join code such as `PRJ-7QK2ZD`.
#[must_use]
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CODE_RANDOM_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect();
    format!("{CODE_PREFIX}{suffix}")
}

/// Trimmed, upper-cased form used for storage and lookup.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// # Errors
///
/// Returns [`TaskDeckError::Validation`] unless the code is 3-20 characters
/// of `A-Z`, `0-9`, and `-`.
pub fn validate_code(code: &str) -> Result<(), TaskDeckError> {
    let len = code.chars().count();
    if !(3..=20).contains(&len) {
        return Err(TaskDeckError::validation(
            "code",
            format!("must be 3-20 characters, got {len}"),
        ));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(TaskDeckError::validation(
            "code",
            "only A-Z, 0-9 and '-' are allowed",
        ));
    }
    Ok(())
}

/// # Errors
///
/// Returns [`TaskDeckError::Validation`] for a blank name or one longer than
/// [`MAX_NAME_LEN`] characters.
pub fn validate_name(name: &str) -> Result<(), TaskDeckError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TaskDeckError::validation("name", "project name is required"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(TaskDeckError::validation(
            "name",
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(())
}

/// Result of [`ProjectDirectory::join_by_code`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(Project),
    AlreadyMember(Project),
}

impl JoinOutcome {
    #[must_use]
    pub const fn project(&self) -> &Project {
        match self {
            Self::Joined(project) | Self::AlreadyMember(project) => project,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectDirectory {
    remote: Arc<dyn RemoteStore>,
    membership: Membership,
    retry: RetryPolicy,
}

impl ProjectDirectory {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, retry: RetryPolicy) -> Self {
        Self {
            membership: Membership::new(Arc::clone(&remote), retry),
            remote,
            retry,
        }
    }

    /// Create a project and make `creator_id` its first admin.
    ///
    /// Without an explicit `code` a random one is generated, and regenerated
    /// on collision a few times before giving up.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::Validation`] for a bad name or code,
    /// [`TaskDeckError::Conflict`] when an explicit code is taken, and remote
    /// failures after retries.
    pub async fn create_project(
        &self,
        name: &str,
        code: Option<&str>,
        creator_id: &str,
    ) -> Result<Project, TaskDeckError> {
        validate_name(name)?;
        let explicit = code.map(normalize_code);
        if let Some(code) = &explicit {
            validate_code(code)?;
        }

        let mut attempt = 0;
        let project = loop {
            attempt += 1;
            let new_project = NewProject {
                name: name.trim().to_string(),
                code: explicit.clone().unwrap_or_else(generate_code),
            };
            match with_retry(self.retry, "create project", || {
                self.remote.insert_project(&new_project)
            })
            .await
            {
                Err(TaskDeckError::Conflict { .. })
                    if explicit.is_none() && attempt < GENERATED_CODE_ATTEMPTS =>
                {
                    warn!(code = %new_project.code, attempt, "generated code collided, retrying");
                }
                other => break other?,
            }
        };

        self.membership
            .add_member(&project.id, creator_id, Role::Admin)
            .await?;
        info!(project_id = %project.id, code = %project.code, creator_id, "project created");
        Ok(project)
    }

    /// Join the project behind `code` as a member.
    ///
    /// An inactive membership is reactivated rather than duplicated.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotFound`] when no project has this code.
    pub async fn join_by_code(&self, code: &str, user_id: &str) -> Result<JoinOutcome, TaskDeckError> {
        let code = normalize_code(code);
        validate_code(&code)?;
        let project =
            with_retry(self.retry, "find project", || self.remote.project_by_code(&code)).await?;

        match self.membership.membership_of(&project.id, user_id).await? {
            Some(existing) if existing.is_active => {
                info!(project_id = %project.id, user_id, "already a member");
                Ok(JoinOutcome::AlreadyMember(project))
            }
            Some(existing) => {
                self.membership.reactivate_member(&existing.id).await?;
                info!(project_id = %project.id, user_id, "membership reactivated");
                Ok(JoinOutcome::Joined(project))
            }
            None => {
                self.membership
                    .add_member(&project.id, user_id, Role::Member)
                    .await?;
                Ok(JoinOutcome::Joined(project))
            }
        }
    }

    /// Make sure `user_id` belongs to at least one project.
    ///
    /// Users with no active membership are added to the project named
    /// [`DEFAULT_PROJECT_NAME`], or to the oldest project when that does not
    /// exist. Returns the project joined, or `None` when nothing was done.
    ///
    /// # Errors
    ///
    /// Propagates remote failures after retries. An existing membership row
    /// is not an error.
    pub async fn ensure_user_has_project(
        &self,
        user_id: &str,
    ) -> Result<Option<Project>, TaskDeckError> {
        if !self.membership.user_projects(user_id).await?.is_empty() {
            return Ok(None);
        }

        let target = match with_retry(self.retry, "find default project", || {
            self.remote.project_by_name(DEFAULT_PROJECT_NAME)
        })
        .await
        {
            Ok(project) => Some(project),
            Err(err) if err.is_not_found() => self.oldest_project().await?,
            Err(err) => return Err(err),
        };

        let Some(project) = target else {
            warn!(user_id, "no project exists to place the user in");
            return Ok(None);
        };

        match self
            .membership
            .add_member(&project.id, user_id, Role::Member)
            .await
        {
            Ok(_) | Err(TaskDeckError::Conflict { .. }) => Ok(Some(project)),
            Err(err) => Err(err),
        }
    }

    async fn oldest_project(&self) -> Result<Option<Project>, TaskDeckError> {
        let projects = with_retry(self.retry, "list projects", || self.remote.list_projects()).await?;
        Ok(projects.into_iter().min_by_key(|project| project.created_at))
    }

    /// All projects, newest first.
    ///
    /// # Errors
    ///
    /// Propagates remote failures after retries.
    pub async fn list(&self) -> Result<Vec<Project>, TaskDeckError> {
        with_retry(self.retry, "list projects", || self.remote.list_projects()).await
    }

    /// Look a project up by id or join code.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotFound`] when neither matches.
    pub async fn find(&self, id_or_code: &str) -> Result<Project, TaskDeckError> {
        match self.remote.project_by_id(id_or_code).await {
            Ok(project) => Ok(project),
            Err(RemoteError::NotFound { .. }) => {
                let code = normalize_code(id_or_code);
                with_retry(self.retry, "find project", || self.remote.project_by_code(&code)).await
            }
            Err(err) => Err(TaskDeckError::from_remote("find project", 1, err)),
        }
    }

    #[must_use]
    pub const fn membership(&self) -> &Membership {
        &self.membership
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewUser;
    use crate::remote::memory::MemoryRemote;

    async fn user(remote: &MemoryRemote, name: &str) -> String {
        remote
            .insert_user(&NewUser::member(name, format!("{name}@example.com")))
            .await
            .expect("user")
            .id
    }

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..100 {
            let code = generate_code();
            assert!(code.starts_with(CODE_PREFIX));
            assert_eq!(code.len(), CODE_PREFIX.len() + CODE_RANDOM_LEN);
            validate_code(&code).expect("generated code validates");
        }
    }

    #[test]
    fn code_and_name_rules() {
        assert!(validate_code("AB").is_err());
        assert!(validate_code("ABC").is_ok());
        assert!(validate_code("prj-1").is_err());
        assert!(validate_code(&"A".repeat(21)).is_err());
        assert_eq!(normalize_code(" prj-1 "), "PRJ-1");

        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(50)).is_ok());
        assert!(validate_name(&"x".repeat(51)).is_err());
    }

    #[tokio::test]
    async fn creator_becomes_admin() {
        let remote = Arc::new(MemoryRemote::new());
        let owner = user(&remote, "owner").await;
        let directory = ProjectDirectory::new(remote.clone(), RetryPolicy::none());

        let project = directory
            .create_project("  Launch  ", None, &owner)
            .await
            .expect("create");
        assert_eq!(project.name, "Launch");
        assert!(project.code.starts_with(CODE_PREFIX));
        assert!(
            directory
                .membership()
                .is_project_admin(&project.id, &owner)
                .await
                .expect("admin check")
        );
    }

    #[tokio::test]
    async fn explicit_code_collision_is_a_conflict() {
        let remote = Arc::new(MemoryRemote::new());
        let owner = user(&remote, "owner").await;
        let directory = ProjectDirectory::new(remote.clone(), RetryPolicy::none());

        directory
            .create_project("one", Some("team-a"), &owner)
            .await
            .expect("first");
        let err = directory
            .create_project("two", Some("TEAM-A"), &owner)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskDeckError::Conflict { .. }));
    }

    #[tokio::test]
    async fn joining_twice_returns_early() {
        let remote = Arc::new(MemoryRemote::new());
        let owner = user(&remote, "owner").await;
        let dev = user(&remote, "dev").await;
        let directory = ProjectDirectory::new(remote.clone(), RetryPolicy::none());
        let project = directory
            .create_project("deck", Some("DECK-1"), &owner)
            .await
            .expect("create");

        let first = directory.join_by_code("deck-1", &dev).await.expect("join");
        assert!(matches!(first, JoinOutcome::Joined(_)));
        let calls = remote.calls("insert_member");

        let second = directory.join_by_code("DECK-1", &dev).await.expect("join again");
        assert!(matches!(second, JoinOutcome::AlreadyMember(ref p) if p.id == project.id));
        assert_eq!(remote.calls("insert_member"), calls);

        let err = directory.join_by_code("NOPE-9", &dev).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn new_users_land_in_the_default_project() {
        let remote = Arc::new(MemoryRemote::new());
        let owner = user(&remote, "owner").await;
        let directory = ProjectDirectory::new(remote.clone(), RetryPolicy::none());
        directory
            .create_project("side", Some("SIDE-1"), &owner)
            .await
            .expect("side");
        let default = directory
            .create_project(DEFAULT_PROJECT_NAME, Some("DEFAULT"), &owner)
            .await
            .expect("default");

        let newcomer = user(&remote, "newcomer").await;
        let placed = directory
            .ensure_user_has_project(&newcomer)
            .await
            .expect("ensure");
        assert_eq!(placed.map(|p| p.id), Some(default.id));

        assert_eq!(
            directory.ensure_user_has_project(&newcomer).await.expect("ensure"),
            None
        );
    }

    #[tokio::test]
    async fn without_default_the_oldest_project_is_used() {
        let remote = Arc::new(MemoryRemote::new());
        let owner = user(&remote, "owner").await;
        let directory = ProjectDirectory::new(remote.clone(), RetryPolicy::none());
        let first = directory
            .create_project("first", Some("FIRST-1"), &owner)
            .await
            .expect("first");

        let newcomer = user(&remote, "newcomer").await;
        let placed = directory
            .ensure_user_has_project(&newcomer)
            .await
            .expect("ensure");
        assert_eq!(placed.map(|p| p.id), Some(first.id));
    }
}
