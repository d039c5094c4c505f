//! `conflicts` and `resolve`.
//!
//! With `--auto` the whole selection goes through the resolution engine in
//! one run. Without it, and when attached to a terminal, each conflict is
//! shown and the user picks a resolution for it; the engine then runs for
//! that one conflict, and the list is re-read because a resolution may
//! settle or move others.

use std::collections::HashSet;

use anyhow::{bail, Context as _, Result};
use clap::Args;
use dialoguer::{Input, Select};

use tfvc_core::conflict::{
    Conflict, EncodingStrategy, Resolution, ResolutionOptions, ResolveRequest, ResolveSummary,
};
use tfvc_core::encoding::FileEncoding;
use tfvc_core::models::{CommandStatus, ItemSpec, RecursionType};
use tfvc_core::{ServerPath, Workspace};

use super::pend::ItemArgs;
use super::{interactive, item_specs, Context};
use crate::output;
use crate::progress::Progress;
use crate::style;

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Items whose conflicts to resolve; every conflict when omitted.
    pub items: Vec<String>,

    #[arg(short, long)]
    pub recursive: bool,

    /// Resolve without prompting: AcceptMerge (AutoMerge), AcceptYours
    /// (KeepYours), AcceptTheirs (TakeTheirs), DeleteConflict,
    /// AcceptYoursRenameTheirs, OverwriteLocal or ExternalTool.
    #[arg(long, value_name = "RESOLUTION")]
    pub auto: Option<Resolution>,

    /// New name for the item (or for theirs, with AcceptYoursRenameTheirs).
    #[arg(long, value_name = "SERVER_PATH")]
    pub new_name: Option<String>,

    /// Read every side of a content merge as this encoding.
    #[arg(long, value_name = "ENCODING", conflicts_with = "convert_to_encoding")]
    pub override_encoding: Option<FileEncoding>,

    /// Write the merged result in this encoding.
    #[arg(long, value_name = "ENCODING")]
    pub convert_to_encoding: Option<FileEncoding>,

    /// Keep conflict markers when the merge still has conflicting lines.
    #[arg(long)]
    pub accept_with_conflicts: bool,

    /// Show what would be resolved without changing anything.
    #[arg(long)]
    pub preview: bool,
}

impl ResolveArgs {
    fn options(&self, ws: &Workspace, accept_with_conflicts: bool) -> Result<ResolutionOptions> {
        let encoding = match (self.override_encoding, self.convert_to_encoding) {
            (Some(enc), _) => EncodingStrategy::OverrideExplicit(enc),
            (None, Some(enc)) => EncodingStrategy::ConvertExplicit(enc),
            (None, None) => EncodingStrategy::Default,
        };
        let new_path = self
            .new_name
            .as_deref()
            .map(|name| resolve_new_name(ws, name))
            .transpose()?;
        Ok(ResolutionOptions {
            encoding,
            accept_merge_with_conflicts: accept_with_conflicts,
            new_path,
        })
    }
}

fn resolve_new_name(ws: &Workspace, name: &str) -> Result<ServerPath> {
    ws.resolve_server_path(name)
        .with_context(|| format!("invalid new name '{}'", name))
}

pub fn run_conflicts(ctx: &Context, args: ItemArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let ws = ctx.open_workspace(&manager)?;
    let conflicts = ws
        .conflicts(&item_specs(&args.items, args.recursive))
        .context("failed to list conflicts")?;
    output::print_conflicts(&conflicts, ctx.format)?;
    Ok(CommandStatus::Success)
}

pub fn run_resolve(ctx: &Context, args: ResolveArgs) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    let config = manager.config().resolve.clone();
    let mut ws = ctx.open_workspace(&manager)?;
    let specs = item_specs(&args.items, args.recursive);

    if let Some(resolution) = args.auto {
        // The configured default only applies where a merge can leave
        // conflicts; an explicit flag is always passed on to validation.
        let accept_with_conflicts = args.accept_with_conflicts
            || (config.accept_merge_with_conflicts && resolution.merges_content());
        let mut request = ResolveRequest::new(specs, resolution)
            .with_options(args.options(&ws, accept_with_conflicts)?);
        request.preview = args.preview;
        let summary = run_engine(ctx, &mut ws, &request, "Resolving")?;
        output::print_resolve_summary(&summary, ctx.format)?;
        return Ok(summary.status());
    }

    if !config.interactive || !interactive() || ctx.format.is_json() {
        bail!("choose a resolution with --auto (prompting needs a terminal and resolve.interactive = true)");
    }
    let accept_with_conflicts = args.accept_with_conflicts || config.accept_merge_with_conflicts;
    prompt_each(ctx, &mut ws, &args, &specs, accept_with_conflicts)
}

fn run_engine(
    ctx: &Context,
    ws: &mut Workspace,
    request: &ResolveRequest,
    message: &str,
) -> Result<ResolveSummary> {
    let mut progress = Progress::new(message, ctx.format);
    let summary = ws.resolve(request, &mut progress).context("resolve failed");
    progress.finish();
    summary
}

/// Choices offered for one conflict, plus "skip" at the end.
fn choices(conflict: &Conflict) -> Vec<Resolution> {
    Resolution::ALL
        .iter()
        .copied()
        .filter(|r| r.applies_to(conflict))
        .filter(|r| ResolveRequest::new(Vec::new(), *r).check_compatible(conflict).is_ok())
        .collect()
}

fn label(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::AcceptMerge => "Merge changes (AcceptMerge)",
        Resolution::AcceptYours => "Keep yours (AcceptYours)",
        Resolution::AcceptTheirs => "Take theirs (AcceptTheirs)",
        Resolution::DeleteConflict => "Forget the conflict (DeleteConflict)",
        Resolution::AcceptYoursRenameTheirs => "Keep yours, rename theirs",
        Resolution::OverwriteLocal => "Overwrite the local file",
        Resolution::ExternalTool => "Merge with the external tool",
        Resolution::None => "None",
    }
}

fn prompt_each(
    ctx: &Context,
    ws: &mut Workspace,
    args: &ResolveArgs,
    specs: &[ItemSpec],
    accept_with_conflicts: bool,
) -> Result<CommandStatus> {
    let mut skipped: HashSet<i64> = HashSet::new();
    let mut status = CommandStatus::Unknown;

    loop {
        let conflicts = ws.conflicts(specs).context("failed to list conflicts")?;
        let Some(conflict) = conflicts.into_iter().find(|c| !skipped.contains(&c.id)) else {
            break;
        };

        output::print_conflict_detail(&conflict);
        let options = choices(&conflict);
        let mut items: Vec<&str> = options.iter().map(|r| label(*r)).collect();
        items.push("Skip");
        let picked = Select::new()
            .with_prompt("Resolution")
            .items(&items)
            .default(0)
            .interact()
            .context("failed to read selection")?;
        let Some(&resolution) = options.get(picked) else {
            skipped.insert(conflict.id);
            continue;
        };

        let mut opts = args.options(ws, accept_with_conflicts)?;
        if resolution == Resolution::AcceptYoursRenameTheirs && opts.new_path.is_none() {
            let name: String = Input::new()
                .with_prompt("New name for their item")
                .interact_text()
                .context("failed to read the new name")?;
            opts.new_path = Some(resolve_new_name(ws, &name)?);
        }
        if resolution != Resolution::AcceptMerge && resolution != Resolution::AcceptYoursRenameTheirs {
            opts.new_path = None;
        }
        if !resolution.merges_content() {
            opts.encoding = EncodingStrategy::Default;
            opts.accept_merge_with_conflicts = false;
        }

        let only = vec![ItemSpec::new(
            conflict.your_server_item.to_string(),
            RecursionType::None,
        )];
        let mut request = ResolveRequest::new(only, resolution).with_options(opts);
        request.preview = args.preview;

        let summary = match run_engine(ctx, ws, &request, "Resolving") {
            Ok(summary) => summary,
            Err(e) => {
                eprintln!("{}", style::error(&format!("{:#}", e)));
                skipped.insert(conflict.id);
                status = status.combine(CommandStatus::Failure);
                continue;
            }
        };
        output::print_resolve_summary(&summary, ctx.format)?;
        status = status.combine(summary.status());
        if args.preview || !summary.resolved.contains(&conflict.id) {
            skipped.insert(conflict.id);
        }
    }

    if !skipped.is_empty() && !args.preview {
        println!("{}", style::warn(&format!("{} conflict(s) left unresolved", skipped.len())));
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfvc_core::conflict::ConflictType;
    use tfvc_core::models::ItemType;

    fn conflict(kind: ConflictType) -> Conflict {
        Conflict::new(kind, ItemType::File, ServerPath::parse("$/P/a.txt").unwrap())
    }

    #[test]
    fn test_choices_for_local_conflict() {
        let offered = choices(&conflict(ConflictType::Local));
        assert!(offered.contains(&Resolution::OverwriteLocal));
        assert!(!offered.contains(&Resolution::AcceptMerge));
        assert!(!offered.contains(&Resolution::AcceptYoursRenameTheirs));
    }

    #[test]
    fn test_choices_for_namespace_conflict() {
        let offered = choices(&conflict(ConflictType::Namespace));
        assert!(offered.contains(&Resolution::AcceptYoursRenameTheirs));
        assert!(!offered.contains(&Resolution::OverwriteLocal));
        assert!(!offered.contains(&Resolution::None));
    }

    #[test]
    fn test_choices_for_symlink_conflict() {
        let link = Conflict::new(
            ConflictType::Content,
            ItemType::Symlink,
            ServerPath::parse("$/P/link").unwrap(),
        );
        assert_eq!(
            choices(&link),
            vec![Resolution::AcceptYours, Resolution::AcceptTheirs]
        );
    }

    #[test]
    fn test_every_choice_has_a_label() {
        for r in Resolution::ALL {
            assert_ne!(label(r), "None");
        }
    }
}
