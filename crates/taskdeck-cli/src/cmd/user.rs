//! `td user`: register users, show the acting identity, and switch accounts
//! on or off.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::{self, Write};
use taskdeck_core::error::TaskDeckError;
use taskdeck_core::model::{Identity, NewUser, Project, Role, UserRecord};
use taskdeck_core::retry::with_retry;
use tracing::info;

use super::Context;
use crate::output::{Renderable, pretty_kv, render_item, write_json};

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    #[command(
        about = "Register a user",
        long_about = "Register a user and place them in a project if they have none.",
        after_help = "EXAMPLES:\n    # Add a member\n    td user add aiko --email aiko@example.com\n\n    # Add an admin with a fixed id\n    td user add ren --email ren@example.com --id u-ren --admin"
    )]
    Add(AddArgs),

    #[command(
        about = "Show the acting user",
        long_about = "Resolve the acting user through the session cache and show their profile.",
        after_help = "EXAMPLES:\n    # Who am I?\n    td --user u-ren user whoami\n\n    # Emit machine-readable output\n    td user whoami --json"
    )]
    Whoami,

    #[command(
        about = "Deactivate a user account",
        long_about = "Mark a user inactive everywhere. Allowed for global admins, and for admins of the current project when the user belongs to it.",
        after_help = "EXAMPLES:
    td --user u-aiko user deactivate u-ben"
    )]
    Deactivate(TargetArgs),

    #[command(
        about = "Reactivate a user account",
        long_about = "Mark a deactivated user active again. Same permissions as `deactivate`.",
        after_help = "EXAMPLES:
    td --user u-aiko user activate u-ben"
    )]
    Activate(TargetArgs),
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    /// User id.
    pub id: String,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Display name shown on tasks and used for assignment.
    pub name: String,

    /// Email address.
    #[arg(long)]
    pub email: String,

    /// Explicit user id (generated when omitted).
    #[arg(long)]
    pub id: Option<String>,

    /// Grant the global admin role.
    #[arg(long)]
    pub admin: bool,
}

#[derive(Debug, Serialize)]
struct AddedUser {
    #[serde(flatten)]
    user: UserRecord,
    joined_project: Option<Project>,
}

impl Renderable for AddedUser {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "✓ Added user {} ({})", self.user.user_name, self.user.id)?;
        pretty_kv(w, "email", &self.user.email)?;
        pretty_kv(w, "role", self.user.role.as_str())?;
        if let Some(project) = &self.joined_project {
            pretty_kv(w, "project", format!("{} ({})", project.name, project.code))?;
        }
        Ok(())
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        let project = self
            .joined_project
            .as_ref()
            .map_or("-", |project| project.code.as_str());
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            self.user.id, self.user.user_name, self.user.role, project
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["ID", "NAME", "ROLE", "PROJECT"]
    }
}

impl Renderable for UserRecord {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        let state = if self.is_active { "active" } else { "inactive" };
        writeln!(w, "{} ({}) is {state}", self.user_name, self.id)?;
        pretty_kv(w, "email", &self.email)
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            self.id, self.user_name, self.role, self.is_active
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["ID", "NAME", "ROLE", "ACTIVE"]
    }
}

#[derive(Debug, Serialize)]
struct WhoAmI {
    #[serde(flatten)]
    identity: Identity,
    projects: Vec<Project>,
}

impl Renderable for WhoAmI {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "{} <{}>", self.identity.name, self.identity.email)?;
        pretty_kv(w, "id", &self.identity.id)?;
        pretty_kv(w, "role", self.identity.role.as_str())?;
        let projects = if self.projects.is_empty() {
            "(none)".to_string()
        } else {
            self.projects
                .iter()
                .map(|project| project.code.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        pretty_kv(w, "projects", projects)
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            self.identity.id, self.identity.name, self.identity.email, self.identity.role
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["ID", "NAME", "EMAIL", "ROLE"]
    }
}

/// # Errors
///
/// Returns an error if the user cannot be stored or resolved.
pub async fn run_user(command: &UserCommand, ctx: &Context) -> Result<()> {
    match command {
        UserCommand::Add(args) => run_add(args, ctx).await,
        UserCommand::Whoami => run_whoami(ctx).await,
        UserCommand::Deactivate(args) => run_set_active(&args.id, false, ctx).await,
        UserCommand::Activate(args) => run_set_active(&args.id, true, ctx).await,
    }
}

async fn run_add(args: &AddArgs, ctx: &Context) -> Result<()> {
    let new_user = NewUser {
        id: args.id.clone(),
        role: if args.admin { Role::Admin } else { Role::Member },
        ..NewUser::member(args.name.trim(), args.email.trim())
    };
    if new_user.user_name.is_empty() {
        return Err(TaskDeckError::validation("name", "name must not be blank").into());
    }

    let remote = ctx.remote();
    let retry = ctx.config.project.store.to_config().retry;
    let user = with_retry(retry, "create user", || remote.insert_user(&new_user)).await?;
    info!(user_id = %user.id, "user added");

    let joined_project = ctx.directory().ensure_user_has_project(&user.id).await?;
    render_item(
        &AddedUser {
            user,
            joined_project,
        },
        ctx.output,
    )?;
    Ok(())
}

async fn run_whoami(ctx: &Context) -> Result<()> {
    let identity = ctx.acting_user().await?;
    let projects = ctx
        .directory()
        .membership()
        .user_projects(&identity.id)
        .await?;
    render_item(&WhoAmI { identity, projects }, ctx.output)?;
    Ok(())
}

async fn run_set_active(target_id: &str, active: bool, ctx: &Context) -> Result<()> {
    let actor = ctx.acting_user().await?;
    if actor.id == target_id {
        return Err(TaskDeckError::validation("user", "cannot change your own account state").into());
    }
    let remote = ctx.remote();
    let retry = ctx.config.project.store.to_config().retry;
    with_retry(retry, "load user", || remote.user_by_id(target_id)).await?;
    require_user_admin(ctx, &actor, target_id).await?;

    with_retry(retry, "set user active", || remote.set_user_active(target_id, active)).await?;
    info!(user_id = target_id, active, actor = %actor.id, "user account state changed");

    let user = with_retry(retry, "load user", || remote.user_by_id(target_id)).await?;
    render_item(&user, ctx.output)?;
    Ok(())
}

/// Global admins may switch any account; project admins only accounts with a
/// membership (active or not) in the current project.
async fn require_user_admin(ctx: &Context, actor: &Identity, target_id: &str) -> Result<()> {
    if actor.is_admin() {
        return Ok(());
    }
    let project = ctx.current_project(actor).await?;
    let directory = ctx.directory();
    let membership = directory.membership();
    let in_project = membership
        .membership_of(&project.id, target_id)
        .await?
        .is_some();
    if in_project && membership.is_project_admin(&project.id, &actor.id).await? {
        return Ok(());
    }
    Err(TaskDeckError::Forbidden {
        actor: actor.name.clone(),
        action: format!("change the account of {target_id}"),
    }
    .into())
}
