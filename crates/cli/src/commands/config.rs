//! `config init|validate`.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Subcommand;

use tfvc_core::models::CommandStatus;
use tfvc_core::ClientConfig;

use super::{expand_tilde, Context};
use crate::style;

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a commented starter configuration.
    Init {
        /// Output path; the --config path (or the default location) when
        /// omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Check the configuration file and print a summary.
    Validate,
}

pub fn run(ctx: &Context, action: ConfigAction) -> Result<CommandStatus> {
    match action {
        ConfigAction::Init { output, force } => {
            let output = output
                .map(|o| expand_tilde(&o))
                .unwrap_or_else(|| ctx.config_path.clone());
            cmd_init(&output, force)
        }
        ConfigAction::Validate => cmd_validate(&ctx.config_path),
    }
}

fn cmd_init(output: &Path, force: bool) -> Result<CommandStatus> {
    if output.exists() && !force {
        anyhow::bail!(
            "file already exists: {}. Use --force or a different path.",
            output.display()
        );
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(output, ClientConfig::default_template())
        .context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Set your owner name and any merge tools in the file");
    println!("  2. Validate with: tf config validate --config {}", output.display());
    println!("  3. Create a collection: tf collection create");
    println!("  4. Create a workspace: tf workspace new <name> --server $/Project --local <dir>");
    Ok(CommandStatus::Success)
}

fn cmd_validate(config_path: &Path) -> Result<CommandStatus> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config = ClientConfig::load_from_file(config_path)
        .context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config.resolve_owner();
    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {}", e);
        return Ok(CommandStatus::Failure);
    }
    println!("  [OK] All fields are valid");

    println!();
    println!("Configuration summary:");
    println!("  Data directory : {}", config.client.data_dir.display());
    println!("  Log level      : {}", config.client.log_level);
    println!(
        "  Owner          : {}",
        config.owner.as_deref().unwrap_or("NOT SET")
    );
    println!("  Merge tools    : {}", config.merge_tools.len());
    for tool in &config.merge_tools {
        println!("    {:<12} {} {}", tool.pattern, tool.command, tool.arguments);
    }
    println!(
        "  Resolve        : interactive={}, accept_merge_with_conflicts={}",
        config.resolve.interactive, config.resolve.accept_merge_with_conflicts
    );
    println!();
    println!("Configuration is valid.");
    Ok(CommandStatus::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_valid_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        assert_eq!(cmd_init(&path, false).unwrap(), CommandStatus::Success);
        assert!(ClientConfig::load_from_file(&path).unwrap().validate().is_ok());
        assert_eq!(cmd_validate(&path).unwrap(), CommandStatus::Success);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# mine\n").unwrap();
        assert!(cmd_init(&path, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");
        assert!(cmd_init(&path, true).is_ok());
    }

    #[test]
    fn test_validate_reports_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[merge_tools]]\ncommand = \"meld\"\narguments = \"%1 %2\"\n",
        )
        .unwrap();
        assert_eq!(cmd_validate(&path).unwrap(), CommandStatus::Failure);
        assert!(cmd_validate(&dir.path().join("missing.toml")).is_err());
    }
}
