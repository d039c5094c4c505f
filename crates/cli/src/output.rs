//! Rendering command results as tables, detail blocks or JSON.

use anyhow::{Context, Result};
use clap::ValueEnum;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};
use serde::Serialize;

use tfvc_core::cache::WorkspaceInfo;
use tfvc_core::conflict::{Conflict, ResolveSummary};
use tfvc_core::pending::{PendingChange, PendingSummary};
use tfvc_core::status::{GetStatus, OperationOutcome};
use tfvc_core::workspace::PendResult;

use crate::style;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One line per item.
    #[default]
    Brief,
    /// Tables and per-item details.
    Detailed,
    /// Machine-readable JSON on stdout.
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        self == Self::Json
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.iter().map(|h| Cell::new(h)).collect::<Vec<_>>());
    table
}

// ---------------------------------------------------------------------------
// Get / merge / rollback
// ---------------------------------------------------------------------------

pub fn print_get_status(status: &GetStatus, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(status);
    }
    if status.no_action_needed {
        println!("All files are up to date.");
        return Ok(());
    }

    if format == OutputFormat::Detailed {
        let mut t = table(&["ACTION", "ITEM", "FROM", "VERSION", "RESULT"]);
        for op in &status.operations {
            t.add_row(vec![
                Cell::new(op.kind.as_str()),
                Cell::new(op.server_item.as_str()),
                Cell::new(op.source_item.as_ref().map_or("", |s| s.as_str())),
                Cell::new(format!("C{}", op.version)),
                Cell::new(outcome_label(&op.outcome)),
            ]);
        }
        println!("{}", t);
    } else {
        for op in &status.operations {
            match &op.outcome {
                OperationOutcome::Applied => println!("{} {}", op.kind, op.server_item),
                OperationOutcome::Conflict => println!(
                    "{}",
                    style::warn(&format!("Conflict: {} ({})", op.server_item, op.kind))
                ),
                OperationOutcome::Warning(msg) => {
                    println!("{}", style::warn(&format!("{}: {}", op.server_item, msg)))
                }
                OperationOutcome::Failed(msg) => {
                    println!("{}", style::error(&format!("{}: {}", op.server_item, msg)))
                }
            }
        }
    }

    println!();
    let prefix = if status.preview { "Preview: " } else { "" };
    println!(
        "{}{} applied, {} conflicts, {} warnings, {} failures",
        prefix, status.applied, status.conflicts, status.warnings, status.failures
    );
    Ok(())
}

fn outcome_label(outcome: &OperationOutcome) -> String {
    match outcome {
        OperationOutcome::Applied => "applied".into(),
        OperationOutcome::Conflict => style::warn("conflict"),
        OperationOutcome::Warning(msg) => style::warn(msg),
        OperationOutcome::Failed(msg) => style::error(msg),
    }
}

// ---------------------------------------------------------------------------
// Pending changes
// ---------------------------------------------------------------------------

pub fn print_pending(changes: &[PendingChange], format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(changes);
    }
    if changes.is_empty() {
        println!("There are no pending changes.");
        return Ok(());
    }

    if format == OutputFormat::Detailed {
        let mut t = table(&["CHANGE", "ITEM", "TYPE", "ENCODING", "VERSION", "SOURCE"]);
        for c in changes {
            let source = c
                .source_server_item
                .as_ref()
                .or(c.merge_source.as_ref())
                .map_or(String::new(), |s| s.to_string());
            t.add_row(vec![
                Cell::new(c.change_type.to_string()),
                Cell::new(c.server_item.as_str()),
                Cell::new(c.item_type.as_str()),
                Cell::new(c.encoding.to_string()),
                Cell::new(format!("C{}", c.version)),
                Cell::new(source),
            ]);
        }
        println!("{}", t);
    } else {
        for c in changes {
            println!("{:<16} {}", c.change_type.to_string(), c.server_item);
        }
    }

    let summary = PendingSummary::from_changes(changes);
    let kinds: Vec<String> = summary
        .by_kind
        .iter()
        .map(|(kind, n)| format!("{} {}", n, kind))
        .collect();
    println!();
    println!("{} change(s): {}", summary.total, kinds.join(", "));
    Ok(())
}

pub fn print_pend_result(result: &PendResult, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(result);
    }
    for p in &result.pended {
        println!("{}: {}", p.change_type, p.server_item);
    }
    for path in &result.undone {
        println!("undone: {}", path);
    }
    for w in &result.warnings {
        eprintln!("{}", style::warn(w));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

pub fn print_conflicts(conflicts: &[Conflict], format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(conflicts);
    }
    if conflicts.is_empty() {
        println!("There are no conflicts.");
        return Ok(());
    }

    if format == OutputFormat::Detailed {
        for c in conflicts {
            print_conflict_detail(c);
        }
    } else {
        let mut t = table(&["ID", "TYPE", "ITEM", "YOURS", "THEIRS", "DESCRIPTION"]);
        for c in conflicts {
            t.add_row(vec![
                Cell::new(c.id),
                Cell::new(style::conflict_type(c.conflict_type)),
                Cell::new(c.your_server_item.as_str()),
                Cell::new(c.your_change.to_string()),
                Cell::new(c.their_change.to_string()),
                Cell::new(truncate(&c.describe(), 60)),
            ]);
        }
        println!("{}", t);
    }
    println!();
    println!("{} conflict(s)", conflicts.len());
    Ok(())
}

pub fn print_conflict_detail(c: &Conflict) {
    let title = format!("Conflict {}", c.id);
    println!("{}", style::header(&title));
    println!("{}", "=".repeat(title.len()));
    println!("  Type         : {}", style::conflict_type(c.conflict_type));
    println!("  Item type    : {}", c.item_type);
    println!("  Yours        : {} ({}, C{}, {})", c.your_server_item, c.your_change, c.your_version, c.your_encoding);
    println!(
        "  Theirs       : {} ({}, C{})",
        c.their_server_item
            .as_ref()
            .map_or_else(|| "-".to_string(), |p| p.to_string()),
        c.their_change,
        c.their_version
    );
    if c.base_version > 0 {
        println!("  Base version : C{}", c.base_version);
    }
    if let Some(target) = &c.target_item {
        println!("  Target       : {}", target);
    }
    println!("  Description  : {}", c.describe());
    println!("  Created at   : {}", c.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!();
}

pub fn print_resolve_summary(summary: &ResolveSummary, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(summary);
    }
    if summary.nothing_to_resolve {
        println!("There are no conflicts to resolve.");
        return Ok(());
    }

    for failure in &summary.failures {
        eprintln!(
            "{}",
            style::error(&format!("{} (conflict {}): {}", failure.path, failure.conflict_id, failure.message))
        );
    }
    if format == OutputFormat::Detailed && !summary.remaining.is_empty() {
        println!("{}", style::header("Still outstanding"));
        for c in &summary.remaining {
            println!("  {} {}", style::dim(&c.id.to_string()), c.describe());
        }
    }

    let verb = if summary.preview { "Would resolve" } else { "Resolved" };
    println!(
        "{} {} conflict(s) in {} pass(es); {} skipped, {} deferred, {} failed, {} remaining",
        verb,
        summary.resolved.len(),
        summary.passes,
        summary.skipped.len(),
        summary.deferred_total,
        summary.failures.len(),
        summary.remaining.len()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Workspaces
// ---------------------------------------------------------------------------

pub fn print_workspaces(workspaces: &[WorkspaceInfo], format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(workspaces);
    }
    if workspaces.is_empty() {
        println!("No workspaces found.");
        return Ok(());
    }

    let mut t = table(&["NAME", "OWNER", "COLLECTION", "MAPPED PATHS", "CREATED"]);
    for ws in workspaces {
        let mapped: Vec<String> = ws
            .mapped_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        t.add_row(vec![
            Cell::new(&ws.name),
            Cell::new(&ws.owner),
            Cell::new(ws.collection.display()),
            Cell::new(mapped.join("\n")),
            Cell::new(ws.created_at.format("%Y-%m-%d")),
        ]);
    }
    println!("{}", t);
    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
