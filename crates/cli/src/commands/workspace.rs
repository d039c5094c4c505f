//! `workspace new|delete|list`.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Subcommand;
use dialoguer::Confirm;

use tfvc_core::models::CommandStatus;
use tfvc_core::ServerPath;

use super::{expand_tilde, interactive, Context};
use crate::output;
use crate::style;

#[derive(Subcommand, Debug)]
pub enum WorkspaceAction {
    /// Create a workspace, optionally with a first mapping.
    New {
        name: String,

        /// Collection database; the default collection when omitted.
        #[arg(long)]
        collection: Option<PathBuf>,

        /// Server folder to map, together with --local.
        #[arg(long, requires = "local")]
        server: Option<String>,

        /// Local folder for --server.
        #[arg(long, requires = "server")]
        local: Option<PathBuf>,
    },

    /// Delete a workspace. Local files are left in place.
    Delete {
        name: String,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// List workspaces on this machine.
    List,
}

pub fn run(ctx: &Context, action: WorkspaceAction) -> Result<CommandStatus> {
    let mut manager = ctx.manager()?;

    match action {
        WorkspaceAction::New {
            name,
            collection,
            server,
            local,
        } => {
            let collection = collection
                .map(|c| expand_tilde(&c))
                .unwrap_or_else(|| manager.default_collection());
            let mut ws = manager
                .create_workspace(&name, &collection)
                .with_context(|| format!("failed to create workspace '{}'", name))?;

            if let (Some(server), Some(local)) = (server, local) {
                let server = ServerPath::parse(&server)
                    .with_context(|| format!("invalid server path '{}'", server))?;
                let local = expand_tilde(&local);
                manager
                    .map(&mut ws, server.clone(), &local)
                    .with_context(|| format!("failed to map {} to {}", server, local.display()))?;
                println!("Mapped {} to {}", server, local.display());
            }

            println!(
                "{}",
                style::success(&format!("Workspace '{}' created on {}", ws.name(), collection.display()))
            );
            Ok(CommandStatus::Success)
        }

        WorkspaceAction::Delete { name, yes } => {
            if !yes && interactive() {
                let confirmed = Confirm::new()
                    .with_prompt(format!(
                        "Delete workspace '{}'? Pending changes and conflicts are lost.",
                        name
                    ))
                    .default(false)
                    .interact()
                    .context("failed to read confirmation")?;
                if !confirmed {
                    println!("{}", style::warn("Cancelled. The workspace was not deleted."));
                    return Ok(CommandStatus::Unknown);
                }
            }

            let info = manager
                .delete_workspace(&name)
                .with_context(|| format!("failed to delete workspace '{}'", name))?;
            println!("{}", style::success(&format!("Workspace '{}' deleted", info.name)));
            Ok(CommandStatus::Success)
        }

        WorkspaceAction::List => {
            output::print_workspaces(manager.workspaces(), ctx.format)?;
            Ok(CommandStatus::Success)
        }
    }
}
