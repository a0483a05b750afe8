//! `td task`: the task board.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::{self, Write};
use taskdeck_core::error::TaskDeckError;
use taskdeck_core::filter::{Board, Completion, FilterKind, FilterSelection};
use taskdeck_core::model::{
    Category, CategorySet, DeadlineStatus, Identity, Priority, TaskDraft, TaskPatch, TaskView,
};
use taskdeck_core::status::{ConfirmAction, Status};
use taskdeck_core::store::{ConfirmOutcome, TaskStore, ToggleOutcome};

use super::Context;
use crate::output::{
    OutputMode, Renderable, pretty_kv, pretty_section, render, render_item, render_list,
    render_success, write_json,
};

/// Days until the default deadline of a new task.
const DEFAULT_DUE_DAYS: i64 = 7;

/// Longest window `td task upcoming` accepts.
const MAX_WINDOW_DAYS: i64 = 3650;

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    #[command(
        about = "List tasks",
        long_about = "List the current project's tasks, newest first, through the filter bar.",
        after_help = "EXAMPLES:\n    # Everything\n    td task list\n\n    # Back-end tasks that are in progress\n    td task list --filter back --status in-progress\n\n    # Emit machine-readable output\n    td task list --json"
    )]
    List(ListArgs),

    #[command(
        about = "Show one task",
        after_help = "EXAMPLES:\n    td task show td-4kx9q2m7ab"
    )]
    Show(IdArgs),

    #[command(
        about = "Create a task",
        long_about = "Create a task. The assignee is a display name from the project roster; \
                      an unknown or missing name assigns the task to you.",
        after_help = "EXAMPLES:\n    # Solo task due in a week\n    td task create --title \"Draft README\"\n\n    # Shared front/back task for a teammate\n    td task create --title \"Login flow\" --category front,back --assignee ben --deadline 2026-11-01"
    )]
    Create(CreateArgs),

    #[command(
        about = "Edit a task",
        after_help = "EXAMPLES:\n    # Raise priority and reassign\n    td task update td-4kx9q2m7ab --priority high --assignee aiko\n\n    # Clear the link\n    td task update td-4kx9q2m7ab --clear-url"
    )]
    Update(UpdateArgs),

    #[command(
        about = "Delete a task",
        after_help = "EXAMPLES:\n    td task delete td-4kx9q2m7ab"
    )]
    Delete(IdArgs),

    #[command(
        about = "Advance a task's status",
        long_about = "Move a task one step: todo -> in-progress -> done. A done task is not \
                      moved; confirm a revert or a delete with `td task confirm`.",
        after_help = "EXAMPLES:\n    td task toggle td-4kx9q2m7ab"
    )]
    Toggle(IdArgs),

    #[command(
        about = "Revert or delete a done task",
        after_help = "EXAMPLES:\n    # Back to in-progress\n    td task confirm td-4kx9q2m7ab revert\n\n    # Remove it\n    td task confirm td-4kx9q2m7ab delete"
    )]
    Confirm(ConfirmArgs),

    #[command(
        about = "Show the board",
        long_about = "Show tasks in todo / in-progress / done columns with project completion.",
        after_help = "EXAMPLES:\n    td task board\n    td task board --filter team --json"
    )]
    Board(FilterArgs),

    #[command(
        about = "Unfinished tasks due soon",
        after_help = "EXAMPLES:\n    td task upcoming --days 3"
    )]
    Upcoming(UpcomingArgs),

    #[command(
        about = "Tasks assigned to you",
        after_help = "EXAMPLES:\n    td task mine"
    )]
    Mine,
}

#[derive(Args, Debug)]
pub struct IdArgs {
    /// Task id.
    pub id: String,
}

#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// Filter bar value: solo, front, back, setting, team, all.
    #[arg(short, long, default_value_t = FilterKind::All)]
    pub filter: FilterKind,

    /// Extra category every shown task must carry.
    #[arg(long)]
    pub category: Option<Category>,
}

impl FilterArgs {
    fn selection(&self) -> FilterSelection {
        let selection = FilterSelection::new(self.filter);
        match self.category {
            Some(category) => selection.refined(category),
            None => selection,
        }
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Only tasks with this status.
    #[arg(short, long)]
    pub status: Option<Status>,

    /// Ask the remote store for the filter's category instead of filtering
    /// the full snapshot locally.
    #[arg(long)]
    pub server: bool,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Task title.
    #[arg(short, long)]
    pub title: String,

    /// Categories, comma-separated or repeated (at most three; default solo).
    #[arg(short, long = "category", value_delimiter = ',')]
    pub categories: Vec<Category>,

    /// Priority: 1-3 or low, medium, high.
    #[arg(short, long, default_value = "low")]
    pub priority: Priority,

    /// Initial status.
    #[arg(short, long, default_value = "todo")]
    pub status: Status,

    /// Assignee display name.
    #[arg(short, long)]
    pub assignee: Option<String>,

    /// Due date (YYYY-MM-DD or RFC 3339); defaults to a week from now.
    #[arg(short, long, value_parser = parse_deadline)]
    pub deadline: Option<DateTime<Utc>>,

    /// One-line summary.
    #[arg(long)]
    pub summary: Option<String>,

    /// Free-form notes.
    #[arg(long)]
    pub memo: Option<String>,

    /// Related link.
    #[arg(long)]
    pub url: Option<String>,

    /// Icon name.
    #[arg(long)]
    pub icon: Option<String>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Task id.
    pub id: String,

    #[arg(short, long)]
    pub title: Option<String>,

    /// Replace the category set (comma-separated or repeated).
    #[arg(short, long = "category", value_delimiter = ',')]
    pub categories: Vec<Category>,

    #[arg(short, long)]
    pub priority: Option<Priority>,

    /// Set the status directly, bypassing the toggle cycle.
    #[arg(short, long)]
    pub status: Option<Status>,

    /// Assignee display name; must match an active member.
    #[arg(short, long)]
    pub assignee: Option<String>,

    #[arg(short, long, value_parser = parse_deadline)]
    pub deadline: Option<DateTime<Utc>>,

    #[arg(long)]
    pub summary: Option<String>,

    #[arg(long)]
    pub memo: Option<String>,

    #[arg(long, conflicts_with = "clear_url")]
    pub url: Option<String>,

    #[arg(long)]
    pub clear_url: bool,

    #[arg(long, conflicts_with = "clear_icon")]
    pub icon: Option<String>,

    #[arg(long)]
    pub clear_icon: bool,
}

#[derive(Args, Debug)]
pub struct ConfirmArgs {
    /// Task id.
    pub id: String,

    /// What to do with the done task: revert or delete.
    pub action: ConfirmAction,
}

#[derive(Args, Debug)]
pub struct UpcomingArgs {
    /// Window length in days (0-3650).
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(i64).range(0..=MAX_WINDOW_DAYS))]
    pub days: i64,
}

/// Parse `YYYY-MM-DD` (end of that day, UTC) or an RFC 3339 timestamp.
fn parse_deadline(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(end_of_day(date));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| format!("invalid deadline '{raw}': use YYYY-MM-DD or RFC 3339"))
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    date.and_time(last_second).and_utc()
}

fn category_set(categories: &[Category]) -> Result<CategorySet, TaskDeckError> {
    CategorySet::try_from(categories)
        .map_err(|err| TaskDeckError::validation("category", err.to_string()))
}

fn status_mark(status: Status) -> &'static str {
    match status {
        Status::Todo => "[ ]",
        Status::InProgress => "[~]",
        Status::Done => "[x]",
    }
}

fn deadline_label(view: &TaskView) -> String {
    let due = view.task.deadline.date_naive();
    format!("{due} ({})", DeadlineStatus::of(due, Utc::now().date_naive()))
}

impl Renderable for TaskView {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{} {}  ({})",
            status_mark(self.status()),
            self.task.title,
            self.task.id
        )?;
        writeln!(
            w,
            "    p{}  {}  @{}  due {}",
            self.task.priority,
            self.task.categories.joined(),
            self.assigned_to_name,
            deadline_label(self)
        )
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        write_json(w, self)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.task.id,
            self.task.status,
            self.task.priority,
            self.task.categories.joined(),
            self.assigned_to_name,
            self.task.deadline.date_naive(),
            self.task.title
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &[
            "ID", "STATUS", "PRI", "CATEGORIES", "ASSIGNEE", "DEADLINE", "TITLE",
        ]
    }
}

fn render_detail(view: &TaskView, mode: OutputMode) -> Result<()> {
    if mode != OutputMode::Pretty {
        render_item(view, mode)?;
        return Ok(());
    }
    render(mode, view, |view, w| {
        pretty_section(w, &format!("{} {}", status_mark(view.status()), view.task.title))?;
        pretty_kv(w, "id", &view.task.id)?;
        pretty_kv(w, "status", view.task.status.as_str())?;
        pretty_kv(w, "priority", view.task.priority.to_string())?;
        pretty_kv(w, "categories", view.task.categories.joined())?;
        pretty_kv(w, "assignee", &view.assigned_to_name)?;
        pretty_kv(w, "creator", &view.created_by_name)?;
        pretty_kv(w, "deadline", deadline_label(view))?;
        if let Some(icon) = &view.task.icon {
            pretty_kv(w, "icon", icon)?;
        }
        if !view.task.one_line.is_empty() {
            pretty_kv(w, "summary", &view.task.one_line)?;
        }
        if let Some(url) = &view.task.related_url {
            pretty_kv(w, "url", url)?;
        }
        pretty_kv(
            w,
            "created",
            view.task.created_at.format("%Y-%m-%d %H:%M").to_string(),
        )?;
        if !view.task.memo.is_empty() {
            writeln!(w)?;
            writeln!(w, "{}", view.task.memo)?;
        }
        Ok(())
    })
}

#[derive(Debug, Serialize)]
struct BoardReport {
    #[serde(flatten)]
    board: Board<TaskView>,
    completion: Completion,
    percent: usize,
}

fn render_board(report: &BoardReport, mode: OutputMode) -> Result<()> {
    render(mode, report, |report, w| {
        let columns = [
            ("TODO", &report.board.todo),
            ("IN PROGRESS", &report.board.in_progress),
            ("DONE", &report.board.done),
        ];
        for (heading, tasks) in columns {
            pretty_section(w, &format!("{heading} ({})", tasks.len()))?;
            for task in tasks {
                if mode == OutputMode::Pretty {
                    task.render_human(w)?;
                } else {
                    task.render_table(w)?;
                }
            }
            writeln!(w)?;
        }
        writeln!(
            w,
            "{}/{} done ({}%)",
            report.completion.done, report.completion.total, report.percent
        )
    })
}

#[derive(Debug, Serialize)]
struct ConfirmationPrompt<'a> {
    needs_confirmation: bool,
    task: &'a TaskView,
    choices: [ConfirmAction; 2],
}

/// # Errors
///
/// Returns an error if the acting user or project cannot be resolved, input
/// fails validation, or a remote call fails.
pub async fn run_task(command: &TaskCommand, ctx: &Context) -> Result<()> {
    let user = ctx.acting_user().await?;
    let project = ctx.current_project(&user).await?;
    let store = ctx.store(&project);

    match command {
        TaskCommand::List(args) => run_list(args, &store, ctx.output).await,
        TaskCommand::Show(args) => {
            store.fetch().await?;
            let view = store.get(&args.id).ok_or_else(|| TaskDeckError::NotFound {
                entity: "task",
                id: args.id.clone(),
            })?;
            render_detail(&view, ctx.output)
        }
        TaskCommand::Create(args) => run_create(args, &user, &store, ctx.output).await,
        TaskCommand::Update(args) => run_update(args, &store, ctx.output).await,
        TaskCommand::Delete(args) => {
            store.delete(&args.id).await?;
            render_success(ctx.output, &format!("Deleted task {}", args.id))
        }
        TaskCommand::Toggle(args) => match store.toggle_status(&args.id).await? {
            ToggleOutcome::Applied(view) => render_detail(&view, ctx.output),
            ToggleOutcome::NeedsConfirmation(view) => {
                let prompt = ConfirmationPrompt {
                    needs_confirmation: true,
                    task: &view,
                    choices: [ConfirmAction::Revert, ConfirmAction::Delete],
                };
                render(ctx.output, &prompt, |prompt, w| {
                    let id = &prompt.task.task.id;
                    writeln!(w, "Task {id} is done; nothing changed.")?;
                    writeln!(w, "  td task confirm {id} revert   # back to in-progress")?;
                    writeln!(w, "  td task confirm {id} delete   # remove it")
                })
            }
        },
        TaskCommand::Confirm(args) => match store.confirm(&args.id, args.action).await? {
            ConfirmOutcome::Reverted(view) => render_detail(&view, ctx.output),
            ConfirmOutcome::Deleted(id) => {
                render_success(ctx.output, &format!("Deleted task {id}"))
            }
        },
        TaskCommand::Board(args) => {
            store.fetch().await?;
            let visible = store.visible(&args.selection());
            let board = taskdeck_core::filter::by_status(&visible);
            let completion = Completion::of(&visible);
            let report = BoardReport {
                board,
                percent: completion.percent(),
                completion,
            };
            render_board(&report, ctx.output)
        }
        TaskCommand::Upcoming(args) => {
            store.fetch().await?;
            render_list(&store.upcoming(Utc::now(), args.days), ctx.output)?;
            Ok(())
        }
        TaskCommand::Mine => {
            store.fetch().await?;
            render_list(&store.assigned_to(&user.id), ctx.output)?;
            Ok(())
        }
    }
}

async fn run_list(args: &ListArgs, store: &TaskStore, output: OutputMode) -> Result<()> {
    let selection = args.filter.selection();
    let mut tasks = match selection.kind.required_category().filter(|_| args.server) {
        Some(category) => {
            let rows = store.fetch_category(category).await?;
            taskdeck_core::filter::filter(&rows, &selection)
        }
        None => {
            store.fetch().await?;
            store.visible(&selection)
        }
    };
    if let Some(status) = args.status {
        tasks.retain(|task| task.status() == status);
    }
    render_list(&tasks, output)?;
    Ok(())
}

async fn run_create(
    args: &CreateArgs,
    user: &Identity,
    store: &TaskStore,
    output: OutputMode,
) -> Result<()> {
    let deadline = args
        .deadline
        .unwrap_or_else(|| end_of_day((Utc::now() + Duration::days(DEFAULT_DUE_DAYS)).date_naive()));
    let mut draft = TaskDraft::new(args.title.clone(), deadline);
    if !args.categories.is_empty() {
        draft.categories = category_set(&args.categories)?;
    }
    draft.priority = args.priority;
    draft.status = args.status;
    draft.assignee_name.clone_from(&args.assignee);
    draft.one_line = args.summary.clone().unwrap_or_default();
    draft.memo = args.memo.clone().unwrap_or_default();
    draft.related_url.clone_from(&args.url);
    draft.icon.clone_from(&args.icon);

    let view = store.create(&user.id, draft).await?;
    render_detail(&view, output)
}

fn patch_from(args: &UpdateArgs) -> Result<TaskPatch, TaskDeckError> {
    let categories = if args.categories.is_empty() {
        None
    } else {
        Some(category_set(&args.categories)?)
    };
    let clearable = |value: &Option<String>, clear: bool| {
        if clear {
            Some(None)
        } else {
            value.clone().map(Some)
        }
    };
    Ok(TaskPatch {
        title: args.title.clone(),
        status: args.status,
        priority: args.priority,
        categories,
        icon: clearable(&args.icon, args.clear_icon),
        assignee_name: args.assignee.clone(),
        deadline: args.deadline,
        one_line: args.summary.clone(),
        memo: args.memo.clone(),
        related_url: clearable(&args.url, args.clear_url),
    })
}

async fn run_update(args: &UpdateArgs, store: &TaskStore, output: OutputMode) -> Result<()> {
    let patch = patch_from(args)?;
    let view = store.update(&args.id, patch).await?;
    render_detail(&view, output)
}
