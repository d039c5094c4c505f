//! `tf`: command-line client for TFVC-style workspaces.
//!
//! Provides subcommands for managing workspaces and working folders,
//! pending changes, get / merge / rollback, conflict resolution, checkin,
//! and generating / validating the client configuration.

mod commands;
mod output;
mod progress;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tfvc_core::models::CommandStatus;
use tfvc_core::ClientConfig;

use commands::Context;
use output::OutputFormat;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Team Foundation Version Control client.
#[derive(Parser, Debug)]
#[command(
    name = "tf",
    version,
    about = "Work with TFVC-style workspaces, pending changes and conflicts"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace to use instead of the one mapping the current directory.
    #[arg(short, long, global = true)]
    workspace: Option<String>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Brief)]
    format: OutputFormat,

    /// More log output (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create, delete and list workspaces.
    Workspace {
        #[command(subcommand)]
        action: commands::workspace::WorkspaceAction,
    },

    /// Manage working folder mappings.
    Workfold {
        #[command(subcommand)]
        action: commands::workfold::WorkfoldAction,
    },

    /// Pend adds for local files and folders.
    Add(commands::pend::AddArgs),

    /// Pend edits.
    Edit(commands::pend::ItemArgs),

    /// Pend deletes.
    Delete(commands::pend::ItemArgs),

    /// Pend a rename or move.
    Rename(commands::pend::RenameArgs),

    /// Undo pending changes.
    Undo(commands::pend::ItemArgs),

    /// List pending changes.
    Status(commands::pend::ItemArgs),

    /// Bring the workspace up to a server version.
    Get(commands::get::GetArgs),

    /// Merge a range of changes from one folder into another.
    Merge(commands::get::MergeArgs),

    /// Pend changes that undo a range of changesets.
    Rollback(commands::get::RollbackArgs),

    /// List outstanding conflicts.
    Conflicts(commands::pend::ItemArgs),

    /// Resolve conflicts, automatically or interactively.
    Resolve(commands::resolve::ResolveArgs),

    /// Commit pending changes as a new changeset.
    Checkin(commands::checkin::CheckinArgs),

    /// Generate or validate the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },

    /// Manage local collections.
    Collection {
        #[command(subcommand)]
        action: commands::collection::CollectionAction,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    init_logging(cli.verbose, &config_path);

    let ctx = Context {
        config_path,
        workspace: cli.workspace.clone(),
        format: cli.format,
    };

    match run(&ctx, cli.command) {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(CommandStatus::Failure.exit_code())
        }
    }
}

/// `RUST_LOG` wins; otherwise `-v` flags, then the configured level.
fn init_logging(verbose: u8, config_path: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbose {
            0 => ClientConfig::load_or_default(config_path)
                .map(|c| c.client.log_level)
                .unwrap_or_else(|_| "warn".into()),
            1 => "info".into(),
            _ => "debug".into(),
        };
        EnvFilter::new(level)
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn run(ctx: &Context, command: Commands) -> Result<CommandStatus> {
    use commands::*;

    match command {
        Commands::Config { action } => config::run(ctx, action),
        Commands::Collection { action } => collection::run(ctx, action),
        Commands::Workspace { action } => workspace::run(ctx, action),
        Commands::Workfold { action } => workfold::run(ctx, action),
        Commands::Add(args) => pend::run_add(ctx, args),
        Commands::Edit(args) => pend::run_edit(ctx, args),
        Commands::Delete(args) => pend::run_delete(ctx, args),
        Commands::Rename(args) => pend::run_rename(ctx, args),
        Commands::Undo(args) => pend::run_undo(ctx, args),
        Commands::Status(args) => pend::run_status(ctx, args),
        Commands::Get(args) => get::run_get(ctx, args),
        Commands::Merge(args) => get::run_merge(ctx, args),
        Commands::Rollback(args) => get::run_rollback(ctx, args),
        Commands::Conflicts(args) => resolve::run_conflicts(ctx, args),
        Commands::Resolve(args) => resolve::run_resolve(ctx, args),
        Commands::Checkin(args) => checkin::run(ctx, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["tf", "status", "-r", "--format", "json", "-vv", "$/P"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Status(_)));
    }

    #[test]
    fn test_usage_errors_exit_with_two() {
        let err = Cli::try_parse_from(["tf", "rename", "only-one"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let err = Cli::try_parse_from(["tf", "--format", "xml", "status"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_resolve_auto_parses_resolution() {
        let cli = Cli::try_parse_from(["tf", "resolve", "--auto", "KeepYours", "$/P/a.txt"]).unwrap();
        let Commands::Resolve(args) = cli.command else {
            panic!("expected resolve");
        };
        assert_eq!(
            args.auto,
            Some(tfvc_core::conflict::Resolution::AcceptYours)
        );
    }
}
