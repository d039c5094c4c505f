//! `collection create`.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Subcommand;

use tfvc_core::models::CommandStatus;

use super::{expand_tilde, Context};
use crate::style;

#[derive(Subcommand, Debug)]
pub enum CollectionAction {
    /// Create an empty collection database.
    Create {
        /// Where to create it; the default collection when omitted.
        path: Option<PathBuf>,
    },
}

pub fn run(ctx: &Context, action: CollectionAction) -> Result<CommandStatus> {
    let manager = ctx.manager()?;
    match action {
        CollectionAction::Create { path } => {
            let path = path
                .map(|p| expand_tilde(&p))
                .unwrap_or_else(|| manager.default_collection());
            if path.exists() {
                anyhow::bail!("collection already exists: {}", path.display());
            }
            manager
                .create_collection(&path)
                .with_context(|| format!("failed to create collection {}", path.display()))?;
            println!("{}", style::success(&format!("Collection created at {}", path.display())));
            Ok(CommandStatus::Success)
        }
    }
}
