#![forbid(unsafe_code)]

mod actor;
mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use std::env;
use std::process::ExitCode;
use taskdeck_core::config;
use taskdeck_core::error::ErrorCode;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "taskdeck: shared task board for small teams",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output (shorthand for `--format json`).
    #[arg(long, global = true, hide = true)]
    json: bool,

    /// Output format: pretty, text, or json.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Act as this user id (overrides TASKDECK_USER and config).
    #[arg(long, global = true)]
    user: Option<String>,

    /// Act on this project, by id or join code (overrides the saved selection).
    #[arg(long, global = true)]
    project: Option<String>,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Lifecycle",
        about = "Initialize a taskdeck workspace",
        long_about = "Create .taskdeck/ in the current directory with a config file and the local store.",
        after_help = "EXAMPLES:\n    # Initialize the current directory\n    td init\n\n    # Emit machine-readable output\n    td init --json"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "People",
        about = "Manage users",
        after_help = "EXAMPLES:\n    td user add aiko --email aiko@example.com\n    td --user u-aiko user whoami\n    td --user u-aiko user deactivate u-ben"
    )]
    User {
        #[command(subcommand)]
        command: cmd::user::UserCommand,
    },

    #[command(
        next_help_heading = "People",
        about = "Create, join, and select projects",
        after_help = "EXAMPLES:\n    td project create \"Garden app\"\n    td project join PRJ-4KX9Q2\n    td project members\n    td project member role ben admin"
    )]
    Project {
        #[command(subcommand)]
        command: cmd::project::ProjectCommand,
    },

    #[command(
        next_help_heading = "Tasks",
        about = "Work with the task board",
        after_help = "EXAMPLES:\n    td task create --title \"Draft README\"\n    td task toggle td-4kx9q2m7ab\n    td task board"
    )]
    Task {
        #[command(subcommand)]
        command: cmd::task::TaskCommand,
    },

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Generate shell completion scripts",
        long_about = "Generate shell completion scripts for supported shells.",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    td completions bash\n\n    # Generate zsh completions\n    td completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_env("TASKDECK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if quiet {
            "error"
        } else if verbose || env::var("DEBUG").is_ok() {
            "taskdeck=debug,info"
        } else {
            "taskdeck=info,warn"
        })
    });

    let format = env::var("TASKDECK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn run(cli: Cli, output: OutputMode, config: config::EffectiveConfig) -> anyhow::Result<()> {
    let project_root = env::current_dir()?;

    match cli.command {
        Commands::Init(args) => cmd::init::run_init(&args, output, &project_root),
        Commands::Completions(args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
        Commands::User { command } => {
            let ctx = cmd::Context::open(&project_root, output, config, cli.user, cli.project)?;
            cmd::user::run_user(&command, &ctx).await
        }
        Commands::Project { command } => {
            let ctx = cmd::Context::open(&project_root, output, config, cli.user, cli.project)?;
            cmd::project::run_project(&command, &ctx).await
        }
        Commands::Task { command } => {
            let ctx = cmd::Context::open(&project_root, output, config, cli.user, cli.project)?;
            cmd::task::run_task(&command, &ctx).await
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let fallback_output = cli
        .format
        .unwrap_or(if cli.json { OutputMode::Json } else { OutputMode::Text });
    let project_root = match env::current_dir() {
        Ok(root) => root,
        Err(err) => {
            let error = CliError::coded(
                format!("cannot read current directory: {err}"),
                ErrorCode::InternalUnexpected,
            );
            let _ = render_error(fallback_output, &error);
            return ExitCode::FAILURE;
        }
    };

    let config = match config::resolve_config(&project_root, cli.json) {
        Ok(config) => config,
        Err(err) => {
            let error = CliError::coded(format!("{err:#}"), ErrorCode::ConfigParseError);
            let _ = render_error(fallback_output, &error);
            return ExitCode::FAILURE;
        }
    };
    let output = resolve_output_mode(cli.format, &config.resolved_output);
    debug!(?output, "output mode resolved");

    match run(cli, output, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!("command failed: {err:#}");
            let _ = render_error(output, &CliError::from_anyhow(&err));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_before_subcommand() {
        let cli = Cli::parse_from(["td", "--json", "task", "list"]);
        assert!(cli.json);
    }

    #[test]
    fn json_flag_after_subcommand() {
        let cli = Cli::parse_from(["td", "task", "list", "--json"]);
        assert!(cli.json);
    }

    #[test]
    fn format_flag_wins_over_resolved_mode() {
        let cli = Cli::parse_from(["td", "--format", "pretty", "task", "board"]);
        assert_eq!(resolve_output_mode(cli.format, "json"), OutputMode::Pretty);
        assert!(Cli::try_parse_from(["td", "--format", "yaml", "task", "board"]).is_err());
    }

    #[test]
    fn user_and_project_flags_are_global() {
        let cli = Cli::parse_from([
            "td", "task", "mine", "--user", "u-aiko", "--project", "WEB-1",
        ]);
        assert_eq!(cli.user.as_deref(), Some("u-aiko"));
        assert_eq!(cli.project.as_deref(), Some("WEB-1"));
    }

    #[test]
    fn quiet_and_verbose_conflict() {
        assert!(Cli::parse_from(["td", "-q", "task", "list"]).quiet);
        assert!(Cli::try_parse_from(["td", "-q", "-v", "task", "list"]).is_err());
    }

    #[test]
    fn member_role_must_be_known() {
        assert!(Cli::try_parse_from(["td", "project", "member", "role", "ben", "owner"]).is_err());
        assert!(Cli::try_parse_from(["td", "project", "member", "remove"]).is_err());
    }

    #[test]
    fn completions_subcommand_parses() {
        let cli = Cli::parse_from(["td", "completions", "bash"]);
        assert!(matches!(
            cli.command,
            Commands::Completions(cmd::completions::CompletionsArgs {
                shell: clap_complete::Shell::Bash,
            })
        ));
    }

    #[test]
    fn all_subcommands_listed() {
        let subcommands = [
            vec!["td", "init"],
            vec!["td", "user", "add", "aiko", "--email", "a@example.com"],
            vec!["td", "user", "whoami"],
            vec!["td", "user", "deactivate", "u-ben"],
            vec!["td", "user", "activate", "u-ben"],
            vec!["td", "project", "create", "Garden"],
            vec!["td", "project", "join", "PRJ-1"],
            vec!["td", "project", "list", "--all"],
            vec!["td", "project", "members"],
            vec!["td", "project", "use", "PRJ-1"],
            vec!["td", "project", "member", "role", "ben", "admin"],
            vec!["td", "project", "member", "deactivate", "ben"],
            vec!["td", "project", "member", "activate", "u-ben"],
            vec!["td", "project", "member", "remove", "ben"],
            vec!["td", "task", "list", "--filter", "back"],
            vec!["td", "task", "show", "x"],
            vec!["td", "task", "create", "--title", "x"],
            vec!["td", "task", "update", "x", "--title", "y"],
            vec!["td", "task", "delete", "x"],
            vec!["td", "task", "toggle", "x"],
            vec!["td", "task", "confirm", "x", "revert"],
            vec!["td", "task", "board"],
            vec!["td", "task", "upcoming", "--days", "3"],
            vec!["td", "task", "mine"],
            vec!["td", "completions", "zsh"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(
                result.is_ok(),
                "failed to parse {args:?}: {:?}",
                result.err()
            );
        }
    }

    #[test]
    fn clap_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
