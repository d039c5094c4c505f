//! Spinner bound to workspace and resolve events.

use std::time::Duration;

use console::Term;
use indicatif::{ProgressBar, ProgressStyle};

use tfvc_core::conflict::{Conflict, ResolveObserver, SkipReason};
use tfvc_core::events::{EventObserver, WorkspaceEvent};

use crate::output::OutputFormat;
use crate::style;

pub struct Progress {
    bar: ProgressBar,
    total: usize,
    done: usize,
    /// Print one line per event above the spinner.
    echo: bool,
}

impl Progress {
    /// A spinner on stderr, or a hidden one when stderr is not a terminal or
    /// the output is JSON.
    pub fn new(message: &str, format: OutputFormat) -> Self {
        let visible = !format.is_json() && Term::stderr().is_term();
        let bar = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        if let Ok(spinner) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
            bar.set_style(spinner.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        bar.set_message(message.to_string());
        if visible {
            bar.enable_steady_tick(Duration::from_millis(100));
        }
        Self {
            bar,
            total: 0,
            done: 0,
            echo: visible && format == OutputFormat::Detailed,
        }
    }

    pub fn finish(self) {
        self.bar.finish_and_clear();
    }

    fn step(&mut self, label: &str) {
        self.done += 1;
        if self.total > 0 {
            self.bar
                .set_message(format!("[{}/{}] {}", self.done, self.total, label));
        } else {
            self.bar.set_message(label.to_string());
        }
    }
}

impl EventObserver for Progress {
    fn on_event(&mut self, event: &WorkspaceEvent) {
        match event {
            WorkspaceEvent::Planned { operation, items } => {
                self.total = *items;
                self.done = 0;
                self.bar.set_message(format!("{}: {} item(s)", operation, items));
            }
            WorkspaceEvent::Operation(op) => {
                self.step(&format!("{} {}", op.kind, op.server_item));
            }
            WorkspaceEvent::ConflictRecorded {
                path,
                conflict_type,
                ..
            } => {
                self.bar.println(style::warn(&format!(
                    "{} conflict on {}",
                    conflict_type, path
                )));
            }
            WorkspaceEvent::Pended { path, change } => {
                self.step(&format!("{} {}", change, path));
            }
            WorkspaceEvent::Undone { path } => {
                self.step(&format!("undo {}", path));
            }
            WorkspaceEvent::CheckedIn { changeset, .. } => {
                self.bar.set_message(format!("checked in C{}", changeset));
            }
        }
    }
}

impl ResolveObserver for Progress {
    fn conflict_resolved(&mut self, conflict: &Conflict, resolved_ids: &[i64]) {
        self.step(&conflict.your_server_item.to_string());
        if self.echo {
            self.bar.println(style::success(&format!(
                "{} ({} conflict(s) settled)",
                conflict.your_server_item,
                resolved_ids.len()
            )));
        }
    }

    fn conflict_failed(&mut self, conflict: &Conflict, message: &str) {
        if self.echo {
            self.bar.println(style::error(&format!(
                "{}: {}",
                conflict.your_server_item, message
            )));
        }
    }

    fn conflict_skipped(&mut self, conflict: &Conflict, reason: SkipReason) {
        if self.echo && reason == SkipReason::NotApplicable {
            self.bar.println(style::dim(&format!(
                "skipped {}: resolution does not apply",
                conflict.your_server_item
            )));
        }
    }

    fn pass_completed(&mut self, pass: usize, resolved: usize) {
        self.bar
            .set_message(format!("pass {} resolved {}", pass, resolved));
    }
}
