//! `add`, `edit`, `delete`, `rename`, `undo` and `status`.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;

use tfvc_core::models::CommandStatus;
use tfvc_core::workspace::PendResult;

use super::{item_specs, Context};
use crate::output;
use crate::progress::Progress;

#[derive(Args, Debug)]
pub struct ItemArgs {
    /// Server paths (`$/...`) or local paths; wildcards allowed in the last
    /// segment. Everything when omitted.
    pub items: Vec<String>,

    /// Include everything below each item.
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Local files or folders to add.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Add folder contents as well.
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Args, Debug)]
pub struct RenameArgs {
    /// Current name (server or local path).
    pub old: String,

    /// New name (server or local path).
    pub new: String,
}

fn report(ctx: &Context, result: &PendResult) -> Result<CommandStatus> {
    output::print_pend_result(result, ctx.format)?;
    Ok(result.status())
}

pub fn run_add(ctx: &Context, args: AddArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let mut ws = ctx.open_workspace(&manager)?;
    let mut progress = Progress::new("Adding", ctx.format);
    let result = ws
        .pend_add(&args.paths, args.recursive, &mut progress)
        .context("failed to pend adds");
    progress.finish();
    report(ctx, &result?)
}

pub fn run_edit(ctx: &Context, args: ItemArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let mut ws = ctx.open_workspace(&manager)?;
    let specs = item_specs(&args.items, args.recursive);
    let mut progress = Progress::new("Pending edits", ctx.format);
    let result = ws.pend_edit(&specs, &mut progress).context("failed to pend edits");
    progress.finish();
    report(ctx, &result?)
}

pub fn run_delete(ctx: &Context, args: ItemArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let mut ws = ctx.open_workspace(&manager)?;
    let specs = item_specs(&args.items, args.recursive);
    let mut progress = Progress::new("Pending deletes", ctx.format);
    let result = ws.pend_delete(&specs, &mut progress).context("failed to pend deletes");
    progress.finish();
    report(ctx, &result?)
}

pub fn run_rename(ctx: &Context, args: RenameArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let mut ws = ctx.open_workspace(&manager)?;
    let mut progress = Progress::new("Renaming", ctx.format);
    let result = ws
        .pend_rename(&args.old, &args.new, &mut progress)
        .with_context(|| format!("failed to rename {} to {}", args.old, args.new));
    progress.finish();
    report(ctx, &result?)
}

pub fn run_undo(ctx: &Context, args: ItemArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let mut ws = ctx.open_workspace(&manager)?;
    let specs = item_specs(&args.items, args.recursive);
    let mut progress = Progress::new("Undoing", ctx.format);
    let result = ws.undo(&specs, &mut progress).context("failed to undo pending changes");
    progress.finish();
    report(ctx, &result?)
}

pub fn run_status(ctx: &Context, args: ItemArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let ws = ctx.open_workspace(&manager)?;
    let specs = item_specs(&args.items, args.recursive);
    let changes = ws
        .pending_changes(&specs)
        .context("failed to list pending changes")?;
    output::print_pending(&changes, ctx.format)?;
    Ok(CommandStatus::Success)
}
