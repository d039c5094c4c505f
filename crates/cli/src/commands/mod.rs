//! Subcommand implementations.
//!
//! Every command returns the folded [`CommandStatus`] of what it did; the
//! binary turns that into the process exit code.

pub mod checkin;
pub mod collection;
pub mod config;
pub mod get;
pub mod pend;
pub mod resolve;
pub mod workfold;
pub mod workspace;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};

use tfvc_core::models::{ItemSpec, RecursionType};
use tfvc_core::{ClientConfig, Workspace, WorkspaceManager};

use crate::output::OutputFormat;

/// Global options shared by every command.
#[derive(Debug)]
pub struct Context {
    pub config_path: PathBuf,
    pub workspace: Option<String>,
    pub format: OutputFormat,
}

impl Context {
    /// Load (or default), resolve the owner, and validate.
    pub fn config(&self) -> Result<ClientConfig> {
        ClientConfig::load_and_resolve(&self.config_path).with_context(|| {
            format!(
                "failed to load configuration from {}",
                self.config_path.display()
            )
        })
    }

    pub fn manager(&self) -> Result<WorkspaceManager> {
        let config = self.config()?;
        WorkspaceManager::new(config).context("failed to read the workspace cache")
    }

    /// The workspace named by `--workspace`, else the one mapping the
    /// current directory, else the only workspace there is.
    pub fn open_workspace(&self, manager: &WorkspaceManager) -> Result<Workspace> {
        if let Some(name) = &self.workspace {
            return manager
                .open_by_name(name)
                .with_context(|| format!("failed to open workspace '{}'", name));
        }

        let cwd = std::env::current_dir().context("failed to read the current directory")?;
        if let Ok(ws) = manager.open_for_path(&cwd) {
            return Ok(ws);
        }
        match manager.workspaces() {
            [only] => manager
                .open_by_name(&only.name)
                .with_context(|| format!("failed to open workspace '{}'", only.name)),
            [] => bail!("no workspace exists yet; create one with `tf workspace new`"),
            _ => bail!(
                "{} is not mapped in any workspace; pass --workspace",
                cwd.display()
            ),
        }
    }
}

/// Item arguments as specs; `recursive` applies to every one.
pub fn item_specs(items: &[String], recursive: bool) -> Vec<ItemSpec> {
    let recursion = if recursive {
        RecursionType::Full
    } else {
        RecursionType::None
    };
    items.iter().map(|i| ItemSpec::new(i.as_str(), recursion)).collect()
}

/// Whether prompts can be shown.
pub fn interactive() -> bool {
    console::Term::stdout().is_term() && console::Term::stderr().is_term()
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_specs_recursion() {
        let specs = item_specs(&["$/P".into(), "src".into()], true);
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|s| s.recursion == RecursionType::Full));
        assert!(specs[0].is_server_path());
        assert!(!specs[1].is_server_path());

        let specs = item_specs(&["a.txt".into()], false);
        assert_eq!(specs[0].recursion, RecursionType::None);
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/tmp/x");
        assert_eq!(expand_tilde(plain), PathBuf::from("/tmp/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/work")), home.join("work"));
        }
    }
}
