//! Shared styling utilities for terminal output.

use console::Style;

use tfvc_core::conflict::ConflictType;
use tfvc_core::models::CommandStatus;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Conflict type label, coloured by how disruptive it usually is.
pub fn conflict_type(kind: ConflictType) -> String {
    let style = match kind {
        ConflictType::Content | ConflictType::Merge => Style::new().yellow().bold(),
        ConflictType::Namespace => Style::new().magenta().bold(),
        ConflictType::Local => Style::new().cyan(),
    };
    style.apply_to(kind.as_str()).to_string()
}

/// Closing line for a command.
pub fn status(status: CommandStatus) -> String {
    match status {
        CommandStatus::Success => success("done"),
        CommandStatus::PartialSuccess => warn("completed with problems"),
        CommandStatus::Failure => error("failed"),
        CommandStatus::Unknown => dim("nothing to do"),
    }
}
