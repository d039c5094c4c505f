//! External merge tools.
//!
//! A tool is launched synchronously with the three sides written to a
//! temporary directory and must write its result to the `%4` file. The
//! process blocks the caller until it exits.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::config::MergeToolConfig;
use crate::errors::ToolError;

/// A configured tool command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeToolCommand {
    pub pattern: String,
    pub command: String,
    pub arguments: String,
}

impl From<&MergeToolConfig> for MergeToolCommand {
    fn from(config: &MergeToolConfig) -> Self {
        Self {
            pattern: config.pattern.clone(),
            command: config.command.clone(),
            arguments: config.arguments.clone(),
        }
    }
}

/// The three sides handed to a tool, with labels for its title bars.
#[derive(Debug, Clone)]
pub struct MergeInputs<'a> {
    pub file_name: &'a str,
    pub theirs: &'a [u8],
    pub yours: &'a [u8],
    pub base: &'a [u8],
    pub their_label: String,
    pub your_label: String,
    pub base_label: String,
}

/// Configured tools, matched by file name; first match wins.
#[derive(Debug, Clone, Default)]
pub struct MergeToolRegistry {
    tools: Vec<MergeToolCommand>,
}

impl MergeToolRegistry {
    pub fn new(tools: Vec<MergeToolCommand>) -> Self {
        Self { tools }
    }

    pub fn from_config(configs: &[MergeToolConfig]) -> Self {
        Self::new(configs.iter().map(MergeToolCommand::from).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_for(&self, file_name: &str) -> Option<&MergeToolCommand> {
        let name = file_name.to_lowercase();
        self.tools
            .iter()
            .find(|t| glob_match::glob_match(&t.pattern.to_lowercase(), &name))
    }

    /// Run the tool configured for `inputs.file_name` and return the merged
    /// bytes.
    pub fn merge(&self, inputs: &MergeInputs<'_>) -> Result<Vec<u8>, ToolError> {
        let tool = self
            .tool_for(inputs.file_name)
            .ok_or_else(|| ToolError::NotConfigured(inputs.file_name.to_string()))?;
        ExternalMergeTool::new(tool.clone()).run(inputs)
    }
}

pub struct ExternalMergeTool {
    command: MergeToolCommand,
}

impl ExternalMergeTool {
    pub fn new(command: MergeToolCommand) -> Self {
        Self { command }
    }

    pub fn run(&self, inputs: &MergeInputs<'_>) -> Result<Vec<u8>, ToolError> {
        let dir = tempfile::Builder::new().prefix("tfvc-merge").tempdir()?;
        let name = sanitize_file_name(inputs.file_name);
        let theirs = write_side(dir.path(), &format!("theirs.{name}"), inputs.theirs)?;
        let yours = write_side(dir.path(), &format!("yours.{name}"), inputs.yours)?;
        let base = write_side(dir.path(), &format!("base.{name}"), inputs.base)?;
        let result = dir.path().join(format!("result.{name}"));

        let placeholders = [
            ("%1", theirs.display().to_string()),
            ("%2", yours.display().to_string()),
            ("%3", base.display().to_string()),
            ("%4", result.display().to_string()),
            ("%6", inputs.their_label.clone()),
            ("%7", inputs.your_label.clone()),
            ("%8", inputs.base_label.clone()),
        ];
        let args: Vec<String> = split_arguments(&self.command.arguments)
            .into_iter()
            .map(|arg| substitute(&arg, &placeholders))
            .collect();

        info!(command = %self.command.command, file = inputs.file_name, "launching merge tool");
        debug!(?args, "merge tool arguments");

        let status = Command::new(&self.command.command)
            .args(&args)
            .status()
            .map_err(|source| ToolError::LaunchFailed {
                command: self.command.command.clone(),
                source,
            })?;

        match status.code() {
            None => {
                warn!(command = %self.command.command, "merge tool terminated by a signal");
                return Err(ToolError::Interrupted(self.command.command.clone()));
            }
            Some(0) => {}
            Some(code) => {
                return Err(ToolError::ExitStatus {
                    command: self.command.command.clone(),
                    code,
                })
            }
        }

        if !result.exists() {
            return Err(ToolError::NoResult(self.command.command.clone()));
        }
        Ok(std::fs::read(&result)?)
    }
}

fn write_side(dir: &Path, name: &str, content: &[u8]) -> Result<PathBuf, ToolError> {
    let path = dir.join(name);
    std::fs::write(&path, content)?;
    Ok(path)
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "file".into()
    } else {
        cleaned
    }
}

/// Split an argument template on whitespace, keeping double-quoted runs
/// together.
fn split_arguments(template: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    for c in template.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

fn substitute(arg: &str, placeholders: &[(&str, String)]) -> String {
    placeholders
        .iter()
        .fold(arg.to_string(), |acc, (key, value)| acc.replace(key, value))
}
