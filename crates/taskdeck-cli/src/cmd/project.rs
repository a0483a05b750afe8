//! `td project`: create, join, list, and select projects, and let project
//! admins manage memberships.

use anyhow::Result;
use clap::{Args, Subcommand};
use std::io::{self, Write};
use taskdeck_core::error::TaskDeckError;
use taskdeck_core::membership::Membership;
use taskdeck_core::model::{Identity, Member, Project, Role};
use taskdeck_core::project::JoinOutcome;
use tracing::info;

use super::Context;
use crate::output::{Renderable, pretty_kv, render_item, render_list, render_success, write_json};

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    #[command(
        about = "Create a project",
        long_about = "Create a project, make the acting user its admin, and select it.",
        after_help = "EXAMPLES:\n    # Create with a generated join code\n    td project create \"Garden app\"\n\n    # Pick the join code yourself\n    td project create \"Garden app\" --code GARDEN"
    )]
    Create(CreateArgs),

    #[command(
        about = "Join a project by code",
        long_about = "Join the project behind a join code as a member, and select it.",
        after_help = "EXAMPLES:\n    # Join with a code shared by a teammate\n    td project join PRJ-4KX9Q2"
    )]
    Join(JoinArgs),

    #[command(
        about = "List projects",
        long_about = "List the acting user's projects, or every project with --all.",
        after_help = "EXAMPLES:\n    # My projects\n    td project list\n\n    # Everything in the store\n    td project list --all --json"
    )]
    List(ListArgs),

    #[command(
        about = "List project members",
        long_about = "List the active roster of the current project.",
        after_help = "EXAMPLES:\n    # Active members\n    td project members\n\n    # Include deactivated memberships\n    td project members --all"
    )]
    Members(MembersArgs),

    #[command(
        about = "Select the current project",
        long_about = "Remember a project (by id or join code) for later commands.",
        after_help = "EXAMPLES:\n    # Switch projects\n    td project use PRJ-4KX9Q2"
    )]
    Use(UseArgs),

    #[command(
        about = "Manage memberships (project admins only)",
        long_about = "Change a member's role, deactivate or reactivate a membership, or remove it. Only active admins of the current project may do this.",
        after_help = "EXAMPLES:
    # Promote a teammate
    td project member role ben admin

    # Take someone off the roster but keep the row
    td project member deactivate ben"
    )]
    Member {
        #[command(subcommand)]
        command: MemberCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum MemberCommand {
    /// Set a member's project role.
    Role(RoleArgs),
    /// Deactivate a membership, keeping its row.
    Deactivate(MemberArgs),
    /// Reactivate a deactivated membership.
    Activate(MemberArgs),
    /// Delete a membership row.
    Remove(MemberArgs),
}

impl MemberCommand {
    fn target(&self) -> &str {
        match self {
            Self::Role(args) => &args.member,
            Self::Deactivate(args) | Self::Activate(args) | Self::Remove(args) => &args.member,
        }
    }

    const fn action(&self) -> &'static str {
        match self {
            Self::Role(_) => "change roles",
            Self::Deactivate(_) => "deactivate members",
            Self::Activate(_) => "reactivate members",
            Self::Remove(_) => "remove members",
        }
    }
}

#[derive(Args, Debug)]
pub struct RoleArgs {
    /// Member user id or display name.
    pub member: String,

    /// New role: admin or member.
    pub role: Role,
}

#[derive(Args, Debug)]
pub struct MemberArgs {
    /// Member user id or display name.
    pub member: String,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Project name.
    pub name: String,

    /// Join code (generated when omitted).
    #[arg(long)]
    pub code: Option<String>,
}

#[derive(Args, Debug)]
pub struct JoinArgs {
    /// Join code, case-insensitive.
    pub code: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// List every project, not just the ones you belong to.
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct MembersArgs {
    /// Include deactivated memberships and users.
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct UseArgs {
    /// Project id or join code.
    pub project: String,
}

impl Renderable for Project {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "{}  {}", self.code, self.name)?;
        pretty_kv(w, "id", &self.id)?;
        pretty_kv(w, "created", self.created_at.format("%Y-%m-%d").to_string())
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "{}\t{}\t{}", self.id, self.code, self.name)
    }

    fn table_headers() -> &'static [&'static str] {
        &["ID", "CODE", "NAME"]
    }
}

impl Renderable for Member {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        let inactive = if self.is_active { "" } else { "  (inactive)" };
        writeln!(
            w,
            "{:<16} {:<7} {}{inactive}",
            self.name,
            self.role.as_str(),
            self.email
        )
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            self.user_id, self.name, self.role, self.is_active
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["USER", "NAME", "ROLE", "ACTIVE"]
    }
}

/// # Errors
///
/// Returns an error if the acting user cannot be resolved or a remote call
/// fails.
pub async fn run_project(command: &ProjectCommand, ctx: &Context) -> Result<()> {
    let user = ctx.acting_user().await?;
    let directory = ctx.directory();

    match command {
        ProjectCommand::Create(args) => {
            let project = directory
                .create_project(&args.name, args.code.as_deref(), &user.id)
                .await?;
            ctx.select_project(&project)?;
            render_item(&project, ctx.output)?;
        }
        ProjectCommand::Join(args) => {
            let outcome = directory.join_by_code(&args.code, &user.id).await?;
            if let JoinOutcome::AlreadyMember(project) = &outcome {
                if !ctx.output.is_json() {
                    eprintln!("Already a member of {}", project.code);
                }
            }
            ctx.select_project(outcome.project())?;
            render_item(outcome.project(), ctx.output)?;
        }
        ProjectCommand::List(args) => {
            let projects = if args.all {
                directory.list().await?
            } else {
                directory.membership().user_projects(&user.id).await?
            };
            render_list(&projects, ctx.output)?;
        }
        ProjectCommand::Members(args) => {
            let project = ctx.current_project(&user).await?;
            let membership = directory.membership();
            let members = if args.all {
                membership.roster(&project.id).await?
            } else {
                membership.members(&project.id).await?
            };
            render_list(&members, ctx.output)?;
        }
        ProjectCommand::Use(args) => {
            let project = ctx.current_project_named(&user, &args.project).await?;
            ctx.select_project(&project)?;
            render_item(&project, ctx.output)?;
        }
        ProjectCommand::Member { command } => {
            let project = ctx.current_project(&user).await?;
            run_member(command, &user, &project, &directory.membership()).await?;
            if let MemberCommand::Remove(args) = command {
                render_success(
                    ctx.output,
                    &format!("Removed {} from {}", args.member, project.code),
                )?;
            } else {
                let member = find_member(&directory.membership(), &project, command.target()).await?;
                render_item(&member, ctx.output)?;
            }
        }
    }
    Ok(())
}

async fn run_member(
    command: &MemberCommand,
    actor: &Identity,
    project: &Project,
    membership: &Membership,
) -> Result<()> {
    if !membership.is_project_admin(&project.id, &actor.id).await? {
        return Err(TaskDeckError::Forbidden {
            actor: actor.name.clone(),
            action: format!("{} in {}", command.action(), project.code),
        }
        .into());
    }

    let target = find_member(membership, project, command.target()).await?;
    if target.user_id == actor.id {
        return Err(TaskDeckError::validation(
            "member",
            "admins cannot change their own membership",
        )
        .into());
    }

    match command {
        MemberCommand::Role(args) => {
            membership.update_role(&target.member_id, args.role).await?;
        }
        MemberCommand::Deactivate(_) => {
            membership.deactivate_member(&target.member_id).await?;
        }
        MemberCommand::Activate(_) => {
            membership.reactivate_member(&target.member_id).await?;
        }
        MemberCommand::Remove(_) => {
            membership.remove_member(&target.member_id).await?;
        }
    }
    info!(
        project = %project.code,
        actor = %actor.id,
        member = %target.user_id,
        action = command.action(),
        "membership changed by admin"
    );
    Ok(())
}

/// Roster entry whose user id or display name is `wanted`. Ids win over
/// names; a name shared by several members is refused.
async fn find_member(membership: &Membership, project: &Project, wanted: &str) -> Result<Member> {
    let roster = membership.roster(&project.id).await?;
    if let Some(member) = roster.iter().find(|member| member.user_id == wanted) {
        return Ok(member.clone());
    }
    let mut named = roster
        .into_iter()
        .filter(|member| member.name.eq_ignore_ascii_case(wanted.trim()));
    match (named.next(), named.next()) {
        (Some(member), None) => Ok(member),
        (Some(_), Some(_)) => Err(TaskDeckError::validation(
            "member",
            format!("several members are named '{wanted}'; use the user id"),
        )
        .into()),
        (None, _) => Err(TaskDeckError::NotFound {
            entity: "member",
            id: wanted.to_string(),
        }
        .into()),
    }
}
