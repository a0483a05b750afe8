//! Project rosters and display-name resolution.
//!
//! Every roster is built from one membership query plus one batch user
//! lookup, regardless of member count.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::TaskDeckError;
use crate::model::{
    Member, MemberChanges, NewMember, Project, ProjectMember, Role, UNKNOWN_USER_NAME, UserRecord,
};
use crate::remote::RemoteStore;
use crate::retry::{RetryPolicy, with_retry};

/// Roster queries and membership administration for projects.
#[derive(Debug, Clone)]
pub struct Membership {
    remote: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
}

impl Membership {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, retry: RetryPolicy) -> Self {
        Self { remote, retry }
    }

    async fn memberships(&self, project_id: &str) -> Result<Vec<ProjectMember>, TaskDeckError> {
        with_retry(self.retry, "list memberships", || {
            self.remote.members_by_project(project_id)
        })
        .await
    }

    async fn users_for(
        &self,
        memberships: &[ProjectMember],
    ) -> Result<HashMap<String, UserRecord>, TaskDeckError> {
        let mut ids: Vec<String> = memberships.iter().map(|m| m.user_id.clone()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let users = with_retry(self.retry, "load members", || self.remote.users_by_ids(&ids)).await?;
        Ok(users.into_iter().map(|user| (user.id.clone(), user)).collect())
    }

    /// Active roster: the membership and the user must both be active.
    ///
    /// # Errors
    ///
    /// Propagates remote failures after retries.
    pub async fn members(&self, project_id: &str) -> Result<Vec<Member>, TaskDeckError> {
        let memberships: Vec<ProjectMember> = self
            .memberships(project_id)
            .await?
            .into_iter()
            .filter(|m| m.is_active)
            .collect();
        let users = self.users_for(&memberships).await?;

        Ok(memberships
            .into_iter()
            .filter_map(|membership| {
                let user = users.get(&membership.user_id).filter(|u| u.is_active)?;
                Some(Member {
                    member_id: membership.id,
                    user_id: membership.user_id,
                    name: user.user_name.clone(),
                    email: user.email.clone(),
                    role: membership.role,
                    is_active: true,
                })
            })
            .collect())
    }

    /// Every membership row, active or not, oldest first. Users without a
    /// row show up as [`UNKNOWN_USER_NAME`].
    ///
    /// # Errors
    ///
    /// Propagates remote failures after retries.
    pub async fn roster(&self, project_id: &str) -> Result<Vec<Member>, TaskDeckError> {
        let memberships = self.memberships(project_id).await?;
        let users = self.users_for(&memberships).await?;

        Ok(memberships
            .into_iter()
            .map(|membership| {
                let user = users.get(&membership.user_id);
                Member {
                    member_id: membership.id,
                    name: user.map_or_else(
                        || UNKNOWN_USER_NAME.to_string(),
                        |u| u.user_name.clone(),
                    ),
                    email: user.map(|u| u.email.clone()).unwrap_or_default(),
                    user_id: membership.user_id,
                    role: membership.role,
                    is_active: membership.is_active && user.is_some_and(|u| u.is_active),
                }
            })
            .collect())
    }

    /// Id of the first active member named `display_name`, if any.
    ///
    /// Names are not unique; when several active members share one, the
    /// oldest membership wins and a warning is logged.
    ///
    /// # Errors
    ///
    /// Propagates remote failures after retries.
    pub async fn resolve_assignee_id(
        &self,
        display_name: &str,
        project_id: &str,
    ) -> Result<Option<String>, TaskDeckError> {
        let wanted = display_name.trim();
        let matches: Vec<Member> = self
            .members(project_id)
            .await?
            .into_iter()
            .filter(|member| member.name == wanted)
            .collect();

        if matches.len() > 1 {
            warn!(
                name = wanted,
                project_id,
                count = matches.len(),
                "display name is ambiguous, using oldest membership"
            );
        }
        let resolved = matches.into_iter().next().map(|member| member.user_id);
        debug!(name = wanted, project_id, resolved = ?resolved, "resolved assignee");
        Ok(resolved)
    }

    /// Whether `user_id` holds an active admin membership in the project.
    ///
    /// # Errors
    ///
    /// Propagates remote failures after retries.
    pub async fn is_project_admin(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> Result<bool, TaskDeckError> {
        let memberships = self.memberships(project_id).await?;
        Ok(memberships
            .iter()
            .any(|m| m.user_id == user_id && m.is_active && m.role == Role::Admin))
    }

    /// Membership row of `user_id` in the project, active or not.
    ///
    /// # Errors
    ///
    /// Propagates remote failures after retries.
    pub async fn membership_of(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> Result<Option<ProjectMember>, TaskDeckError> {
        let memberships = with_retry(self.retry, "list user memberships", || {
            self.remote.memberships_by_user(user_id)
        })
        .await?;
        Ok(memberships.into_iter().find(|m| m.project_id == project_id))
    }

    /// Projects the user is an active member of, newest first.
    ///
    /// # Errors
    ///
    /// Propagates remote failures after retries.
    pub async fn user_projects(&self, user_id: &str) -> Result<Vec<Project>, TaskDeckError> {
        let ids: Vec<String> = with_retry(self.retry, "list user memberships", || {
            self.remote.memberships_by_user(user_id)
        })
        .await?
        .into_iter()
        .filter(|m| m.is_active)
        .map(|m| m.project_id)
        .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut projects =
            with_retry(self.retry, "load projects", || self.remote.projects_by_ids(&ids)).await?;
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    /// # Errors
    ///
    /// Returns [`TaskDeckError::Conflict`] when the user already has a
    /// membership row in the project.
    pub async fn add_member(
        &self,
        project_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<ProjectMember, TaskDeckError> {
        let new_member = NewMember {
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            role,
            is_active: true,
        };
        let member =
            with_retry(self.retry, "add member", || self.remote.insert_member(&new_member)).await?;
        info!(project_id, user_id, role = %role, "member added");
        Ok(member)
    }

    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotFound`] for an unknown membership id.
    pub async fn update_role(
        &self,
        member_id: &str,
        role: Role,
    ) -> Result<ProjectMember, TaskDeckError> {
        self.change(
            member_id,
            MemberChanges {
                role: Some(role),
                is_active: None,
            },
        )
        .await
    }

    /// Set `is_active = false`, keeping the row for the admin roster.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotFound`] for an unknown membership id.
    pub async fn deactivate_member(&self, member_id: &str) -> Result<ProjectMember, TaskDeckError> {
        self.change(
            member_id,
            MemberChanges {
                role: None,
                is_active: Some(false),
            },
        )
        .await
    }

    /// Set `is_active = true` on an existing membership.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotFound`] for an unknown membership id.
    pub async fn reactivate_member(&self, member_id: &str) -> Result<ProjectMember, TaskDeckError> {
        self.change(
            member_id,
            MemberChanges {
                role: None,
                is_active: Some(true),
            },
        )
        .await
    }

    async fn change(
        &self,
        member_id: &str,
        changes: MemberChanges,
    ) -> Result<ProjectMember, TaskDeckError> {
        let member = with_retry(self.retry, "update member", || {
            self.remote.update_member(member_id, &changes)
        })
        .await?;
        info!(member_id, role = %member.role, active = member.is_active, "membership updated");
        Ok(member)
    }

    /// # Errors
    ///
    /// Returns [`TaskDeckError::NotFound`] for an unknown membership id.
    pub async fn remove_member(&self, member_id: &str) -> Result<(), TaskDeckError> {
        with_retry(self.retry, "remove member", || self.remote.delete_member(member_id)).await?;
        info!(member_id, "member removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewProject, NewUser};
    use crate::remote::memory::MemoryRemote;

    struct Fixture {
        remote: Arc<MemoryRemote>,
        membership: Membership,
        project: Project,
    }

    async fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemote::new());
        let project = remote
            .insert_project(&NewProject {
                name: "deck".into(),
                code: "PRJ-MEMBER".into(),
            })
            .await
            .expect("project");
        let membership = Membership::new(remote.clone(), RetryPolicy::none());
        Fixture {
            remote,
            membership,
            project,
        }
    }

    async fn join(fx: &Fixture, name: &str, role: Role) -> (UserRecord, ProjectMember) {
        let user = fx
            .remote
            .insert_user(&NewUser::member(name, format!("{name}@example.com")))
            .await
            .expect("user");
        let member = fx
            .membership
            .add_member(&fx.project.id, &user.id, role)
            .await
            .expect("member");
        (user, member)
    }

    #[tokio::test]
    async fn roster_uses_one_batch_user_lookup() {
        let fx = fixture().await;
        for name in ["aiko", "ren", "mio", "sora"] {
            join(&fx, name, Role::Member).await;
        }
        fx.remote.reset_calls();

        let members = fx.membership.members(&fx.project.id).await.expect("members");
        assert_eq!(members.len(), 4);
        assert_eq!(fx.remote.calls("users_by_ids"), 1);
        assert_eq!(fx.remote.calls("user_by_id"), 0);
    }

    #[tokio::test]
    async fn inactive_members_are_not_assignable() {
        let fx = fixture().await;
        let (_aiko, membership) = join(&fx, "aiko", Role::Member).await;
        let (ren, _) = join(&fx, "ren", Role::Member).await;

        fx.membership
            .deactivate_member(&membership.id)
            .await
            .expect("deactivate");
        fx.remote.set_user_active(&ren.id, false).await.expect("deactivate user");

        assert_eq!(
            fx.membership
                .resolve_assignee_id("aiko", &fx.project.id)
                .await
                .expect("resolve"),
            None
        );
        assert_eq!(
            fx.membership
                .resolve_assignee_id("ren", &fx.project.id)
                .await
                .expect("resolve"),
            None
        );

        let roster = fx.membership.roster(&fx.project.id).await.expect("roster");
        assert_eq!(roster.len(), 2);
        assert!(roster.iter().all(|m| !m.is_active));
    }

    #[tokio::test]
    async fn duplicate_names_resolve_to_oldest_membership() {
        let fx = fixture().await;
        let (first, _) = join(&fx, "aiko", Role::Member).await;
        join(&fx, "aiko", Role::Member).await;

        let resolved = fx
            .membership
            .resolve_assignee_id(" aiko ", &fx.project.id)
            .await
            .expect("resolve");
        assert_eq!(resolved, Some(first.id));
    }

    #[tokio::test]
    async fn admin_check_follows_role_and_activity() {
        let fx = fixture().await;
        let (owner, owner_membership) = join(&fx, "owner", Role::Admin).await;
        let (dev, dev_membership) = join(&fx, "dev", Role::Member).await;

        assert!(fx.membership.is_project_admin(&fx.project.id, &owner.id).await.expect("check"));
        assert!(!fx.membership.is_project_admin(&fx.project.id, &dev.id).await.expect("check"));

        fx.membership
            .update_role(&dev_membership.id, Role::Admin)
            .await
            .expect("promote");
        assert!(fx.membership.is_project_admin(&fx.project.id, &dev.id).await.expect("check"));

        fx.membership
            .deactivate_member(&owner_membership.id)
            .await
            .expect("deactivate");
        assert!(!fx.membership.is_project_admin(&fx.project.id, &owner.id).await.expect("check"));
    }

    #[tokio::test]
    async fn roster_marks_missing_users_unknown_and_remove_deletes_row() {
        let fx = fixture().await;
        let (_user, member) = join(&fx, "aiko", Role::Member).await;

        let roster = fx.membership.roster(&fx.project.id).await.expect("roster");
        assert_eq!(roster[0].name, "aiko");

        fx.membership.remove_member(&member.id).await.expect("remove");
        assert!(fx.membership.roster(&fx.project.id).await.expect("roster").is_empty());

        let err = fx.membership.remove_member(&member.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn user_projects_lists_active_memberships_only() {
        let fx = fixture().await;
        let (user, member) = join(&fx, "aiko", Role::Member).await;

        let projects = fx.membership.user_projects(&user.id).await.expect("projects");
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].code, "PRJ-MEMBER");

        fx.membership.deactivate_member(&member.id).await.expect("deactivate");
        assert!(fx.membership.user_projects(&user.id).await.expect("projects").is_empty());
    }

    #[tokio::test]
    async fn membership_of_returns_inactive_rows_too() {
        let fx = fixture().await;
        let (user, member) = join(&fx, "aiko", Role::Member).await;
        fx.membership.deactivate_member(&member.id).await.expect("deactivate");

        let row = fx
            .membership
            .membership_of(&fx.project.id, &user.id)
            .await
            .expect("lookup")
            .expect("row kept");
        assert_eq!(row.id, member.id);
        assert!(!row.is_active);

        fx.membership.remove_member(&member.id).await.expect("remove");
        assert!(
            fx.membership
                .membership_of(&fx.project.id, &user.id)
                .await
                .expect("lookup")
                .is_none()
        );
    }
}
