//! `checkin`.

use anyhow::{Context as _, Result};
use clap::Args;
use dialoguer::Input;

use tfvc_core::errors::CheckinError;
use tfvc_core::models::CommandStatus;

use super::{interactive, item_specs, Context};
use crate::output;
use crate::progress::Progress;
use crate::style;

#[derive(Args, Debug)]
pub struct CheckinArgs {
    /// Items to check in; every pending change when omitted.
    pub items: Vec<String>,

    #[arg(short, long)]
    pub recursive: bool,

    /// Changeset comment. Prompted for when omitted on a terminal.
    #[arg(short = 'm', long)]
    pub comment: Option<String>,
}

pub fn run(ctx: &Context, args: CheckinArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let mut ws = ctx.open_workspace(&manager)?;
    let specs = item_specs(&args.items, args.recursive);

    let comment = match args.comment {
        Some(comment) => comment,
        None if interactive() && !ctx.format.is_json() => Input::<String>::new()
            .with_prompt("Comment")
            .allow_empty(true)
            .interact_text()
            .context("failed to read the comment")?,
        None => String::new(),
    };

    let mut progress = Progress::new("Checking in", ctx.format);
    let result = ws.checkin(&specs, &comment, &mut progress);
    progress.finish();

    match result {
        Ok(result) => {
            if ctx.format.is_json() {
                output::print_json(&result)?;
            } else {
                for item in &result.changes {
                    println!("{:<16} {}", item.change.to_string(), item.path);
                }
                println!();
                println!(
                    "{}",
                    style::success(&format!("Changeset {} checked in.", result.changeset))
                );
            }
            Ok(CommandStatus::Success)
        }
        Err(CheckinError::NothingToCheckIn) => {
            println!("There are no pending changes to check in.");
            Ok(CommandStatus::Unknown)
        }
        Err(e @ CheckinError::UnresolvedConflicts(_)) => {
            eprintln!("{}", style::error(&e.to_string()));
            eprintln!("Resolve them with `tf resolve` first.");
            Ok(CommandStatus::Failure)
        }
        Err(e @ CheckinError::NewerVersionExists { .. }) => {
            eprintln!("{}", style::error(&e.to_string()));
            Ok(CommandStatus::Failure)
        }
        Err(e) => Err(e).context("checkin failed"),
    }
}
