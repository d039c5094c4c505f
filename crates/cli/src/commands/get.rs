//! `get`, `merge` and `rollback`: the commands that apply server history
//! to the workspace.

use anyhow::{Context as _, Result};
use clap::Args;

use tfvc_core::models::{CommandStatus, RecursionType, VersionRange, VersionSpec};
use tfvc_core::status::GetStatus;
use tfvc_core::workspace::{GetRequest, MergeRequest, RollbackRequest};

use super::{item_specs, Context};
use crate::output;
use crate::progress::Progress;
use crate::style;

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Items to get; the whole workspace when omitted.
    pub items: Vec<String>,

    #[arg(short, long)]
    pub recursive: bool,

    /// Version to get: T, C<n>, <n>, D<date> or W.
    #[arg(long, default_value = "T")]
    pub version: VersionSpec,

    /// Download items even when the workspace says they are current.
    #[arg(long)]
    pub force: bool,

    /// Replace writable local files that are in the way.
    #[arg(long)]
    pub overwrite: bool,

    /// Show what would happen without changing anything.
    #[arg(long)]
    pub preview: bool,
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Source folder or file.
    pub source: String,

    /// Target folder or file.
    pub target: String,

    /// Changesets to merge, `from~to` or `to`.
    #[arg(long, default_value = "T")]
    pub version: VersionRange,

    #[arg(short, long)]
    pub recursive: bool,

    #[arg(long)]
    pub preview: bool,
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Items to roll back; the whole workspace when omitted.
    pub items: Vec<String>,

    /// Changesets to undo, `from~to` or a single changeset.
    #[arg(long)]
    pub changeset: VersionRange,

    #[arg(short, long)]
    pub recursive: bool,

    #[arg(long)]
    pub preview: bool,
}

fn report(ctx: &Context, status: &GetStatus) -> Result<CommandStatus> {
    output::print_get_status(status, ctx.format)?;
    let folded = status.status();
    if status.conflicts > 0 && !ctx.format.is_json() {
        eprintln!(
            "{}",
            style::warn("Conflicts were recorded; run `tf conflicts` or `tf resolve`.")
        );
    }
    Ok(folded)
}

pub fn run_get(ctx: &Context, args: GetArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let mut ws = ctx.open_workspace(&manager)?;
    let request = GetRequest {
        specs: item_specs(&args.items, args.recursive),
        version: args.version,
        force: args.force,
        overwrite: args.overwrite,
        preview: args.preview,
    };

    let mut progress = Progress::new("Getting", ctx.format);
    let status = ws.get(&request, &mut progress).context("get failed");
    progress.finish();
    report(ctx, &status?)
}

pub fn run_merge(ctx: &Context, args: MergeArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let mut ws = ctx.open_workspace(&manager)?;
    let request = MergeRequest {
        source: args.source,
        target: args.target,
        range: args.version,
        recursion: if args.recursive {
            RecursionType::Full
        } else {
            RecursionType::None
        },
        preview: args.preview,
    };

    let mut progress = Progress::new("Merging", ctx.format);
    let status = ws
        .merge(&request, &mut progress)
        .with_context(|| format!("merge of {} into {} failed", request.source, request.target));
    progress.finish();
    report(ctx, &status?)
}

pub fn run_rollback(ctx: &Context, args: RollbackArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let mut ws = ctx.open_workspace(&manager)?;
    let request = RollbackRequest {
        specs: item_specs(&args.items, args.recursive),
        range: args.changeset,
        preview: args.preview,
    };

    let mut progress = Progress::new("Rolling back", ctx.format);
    let status = ws
        .rollback(&request, &mut progress)
        .with_context(|| format!("rollback of {} failed", request.range));
    progress.finish();
    report(ctx, &status?)
}
