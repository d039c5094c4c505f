//! `workfold map|unmap|cloak|list`.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Subcommand;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use tfvc_core::models::CommandStatus;
use tfvc_core::ServerPath;

use super::{expand_tilde, Context};
use crate::output;
use crate::style;

#[derive(Subcommand, Debug)]
pub enum WorkfoldAction {
    /// Map a server folder to a local folder.
    Map { server: String, local: PathBuf },

    /// Remove a mapping or cloak.
    Unmap { server: String },

    /// Exclude a server folder below a mapping.
    Cloak { server: String },

    /// Show the workspace's working folders.
    List,
}

fn server_path(input: &str) -> Result<ServerPath> {
    ServerPath::parse(input).with_context(|| format!("invalid server path '{}'", input))
}

pub fn run(ctx: &Context, action: WorkfoldAction) -> Result<CommandStatus> {
    let mut manager = ctx.manager()?;
    let mut ws = ctx.open_workspace(&manager)?;

    match action {
        WorkfoldAction::Map { server, local } => {
            let server = server_path(&server)?;
            let local = expand_tilde(&local);
            manager
                .map(&mut ws, server.clone(), &local)
                .with_context(|| format!("failed to map {}", server))?;
            println!("{}", style::success(&format!("{} -> {}", server, local.display())));
        }

        WorkfoldAction::Unmap { server } => {
            let server = server_path(&server)?;
            if !ws.unmap(&server).context("failed to update working folders")? {
                println!("{}", style::warn(&format!("{} is not a working folder", server)));
                return Ok(CommandStatus::Failure);
            }
            manager.save_mappings(&ws).context("failed to update the workspace cache")?;
            println!("{}", style::success(&format!("Removed {}", server)));
        }

        WorkfoldAction::Cloak { server } => {
            let server = server_path(&server)?;
            ws.cloak(server.clone())
                .with_context(|| format!("failed to cloak {}", server))?;
            manager.save_mappings(&ws).context("failed to update the workspace cache")?;
            println!("{}", style::success(&format!("Cloaked {}", server)));
        }

        WorkfoldAction::List => {
            let folders = ws.mappings().folders();
            if ctx.format.is_json() {
                output::print_json(folders)?;
                return Ok(CommandStatus::Success);
            }
            println!("{}", style::header(&format!("Workspace: {} ({})", ws.name(), ws.owner())));
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERVER", "LOCAL"]);
            for folder in folders {
                let local = match &folder.local_item {
                    Some(path) => path.display().to_string(),
                    None => style::dim("(cloaked)"),
                };
                table.add_row(vec![Cell::new(folder.server_item.as_str()), Cell::new(local)]);
            }
            println!("{}", table);
        }
    }
    Ok(CommandStatus::Success)
}
