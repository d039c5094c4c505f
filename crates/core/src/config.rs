//! TOML-based client configuration.
//!
//! The configuration file lives at `<config dir>/tfvc/config.toml` by
//! default. Every section is optional; a missing file yields the defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level client configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// General client settings.
    #[serde(default)]
    pub client: ClientSection,

    /// External merge tools, matched by file name.
    #[serde(default)]
    pub merge_tools: Vec<MergeToolConfig>,

    /// Defaults for `tf resolve`.
    #[serde(default)]
    pub resolve: ResolveConfig,

    /// Resolved owner name (not serialized).
    #[serde(skip)]
    pub owner: Option<String>,
}

/// `[client]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Directory holding workspace databases and the workspace cache.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level filter (`error`, `warn`, `info`, `debug`, `trace`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Owner recorded on new workspaces and changesets. Falls back to the
    /// environment variable named by `owner_env`.
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default = "default_owner_env")]
    pub owner_env: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("tfvc"))
        .unwrap_or_else(|| PathBuf::from(".tfvc"))
}

fn default_log_level() -> String {
    "warn".into()
}

fn default_owner_env() -> String {
    if cfg!(windows) {
        "USERNAME".into()
    } else {
        "USER".into()
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            owner: None,
            owner_env: default_owner_env(),
        }
    }
}

/// One `[[merge_tools]]` entry.
///
/// `arguments` may reference `%1` (theirs), `%2` (yours), `%3` (base) and
/// `%4` (the result file the tool must write).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeToolConfig {
    /// Glob matched against the file name, e.g. `*.cs`.
    #[serde(default = "default_pattern")]
    pub pattern: String,

    pub command: String,

    #[serde(default = "default_arguments")]
    pub arguments: String,
}

fn default_pattern() -> String {
    "*".into()
}

fn default_arguments() -> String {
    "%1 %2 %3 %4".into()
}

/// `[resolve]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Prompt for a resolution when `tf resolve` is run without `--auto`.
    #[serde(default = "default_true")]
    pub interactive: bool,

    /// Keep conflict markers when an automatic merge leaves conflicts.
    #[serde(default)]
    pub accept_merge_with_conflicts: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            interactive: true,
            accept_merge_with_conflicts: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl ClientConfig {
    /// Default configuration file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("tfvc").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".tfvc").join("config.toml"))
    }

    /// Load a [`ClientConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Like [`load_from_file`](Self::load_from_file), but a missing file
    /// yields the default configuration.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load_from_file(path) {
            Ok(config) => Ok(config),
            Err(ConfigError::FileNotFound(p)) => {
                debug!(path = %p, "no configuration file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve the owner name from the config or the environment.
    pub fn resolve_owner(&mut self) {
        if let Some(owner) = self.client.owner.as_ref().filter(|o| !o.is_empty()) {
            self.owner = Some(owner.clone());
            return;
        }
        let env_name = &self.client.owner_env;
        self.owner = match std::env::var(env_name) {
            Ok(val) if !val.is_empty() => {
                debug!(env_name, "resolved owner from environment");
                Some(val)
            }
            _ => {
                warn!(env_name, "owner not configured and env var not set");
                None
            }
        };
    }

    /// The resolved owner, or `"unknown"`.
    pub fn owner(&self) -> String {
        self.owner.clone().unwrap_or_else(|| "unknown".into())
    }

    /// Validate that all fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
        if !LEVELS.contains(&self.client.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "client.log_level".into(),
                detail: format!("must be one of {}", LEVELS.join(", ")),
            });
        }
        if self.client.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "client.data_dir".into(),
                detail: "data directory must not be empty".into(),
            });
        }
        for (i, tool) in self.merge_tools.iter().enumerate() {
            if tool.command.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("merge_tools[{i}].command"),
                    detail: "merge tool command must not be empty".into(),
                });
            }
            if tool.pattern.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("merge_tools[{i}].pattern"),
                    detail: "pattern must not be empty".into(),
                });
            }
            if !tool.arguments.contains("%4") {
                return Err(ConfigError::InvalidValue {
                    field: format!("merge_tools[{i}].arguments"),
                    detail: "arguments must reference the result file (%4)".into(),
                });
            }
        }
        Ok(())
    }

    /// Convenience: load (or default), resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_or_default(path)?;
        config.resolve_owner();
        config.validate()?;
        Ok(config)
    }

    /// Directory holding one SQLite database per workspace.
    pub fn workspaces_dir(&self) -> PathBuf {
        self.client.data_dir.join("workspaces")
    }

    /// Path of the workspace cache file.
    pub fn cache_path(&self) -> PathBuf {
        self.client.data_dir.join("workspaces.toml")
    }

    /// Write the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        std::fs::write(path, contents)?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// A commented starter configuration.
    pub fn default_template() -> String {
        format!(
            r#"# tfvc client configuration

[client]
# data_dir = "{data_dir}"
log_level = "warn"
# owner = "jdoe"

[resolve]
interactive = true
accept_merge_with_conflicts = false

# External merge tools. %1 = theirs, %2 = yours, %3 = base, %4 = result.
# [[merge_tools]]
# pattern = "*"
# command = "meld"
# arguments = "%2 %3 %1 -o %4"
"#,
            data_dir = default_data_dir().display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[client]
data_dir = "/tmp/tfvc-data"
log_level = "debug"
owner = "jdoe"

[resolve]
interactive = false

[[merge_tools]]
pattern = "*.cs"
command = "kdiff3"
arguments = "%3 %2 %1 -o %4"

[[merge_tools]]
command = "meld"
arguments = "%2 %1 -o %4"
"#
    }

    #[test]
    fn test_load_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(sample_toml().as_bytes()).unwrap();

        let config = ClientConfig::load_from_file(tmp.path()).unwrap();
        assert_eq!(config.client.data_dir, PathBuf::from("/tmp/tfvc-data"));
        assert_eq!(config.client.log_level, "debug");
        assert!(!config.resolve.interactive);
        assert_eq!(config.merge_tools.len(), 2);
        assert_eq!(config.merge_tools[0].pattern, "*.cs");
        assert_eq!(config.merge_tools[1].pattern, "*");
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file() {
        let result = ClientConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));

        let config = ClientConfig::load_or_default("/nonexistent/config.toml").unwrap();
        assert_eq!(config.client.log_level, "warn");
        assert!(config.merge_tools.is_empty());
    }

    #[test]
    fn test_parse_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"[client\nlog_level = ").unwrap();
        let result = ClientConfig::load_from_file(tmp.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.client.log_level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "client.log_level"
        ));

        let mut config = ClientConfig::default();
        config.merge_tools.push(MergeToolConfig {
            pattern: "*".into(),
            command: "meld".into(),
            arguments: "%1 %2".into(),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "merge_tools[0].arguments"
        ));
    }

    #[test]
    fn test_resolve_owner_prefers_config() {
        let mut config = ClientConfig::default();
        config.client.owner = Some("alice".into());
        config.resolve_owner();
        assert_eq!(config.owner(), "alice");
    }

    #[test]
    fn test_default_template_parses() {
        let config: ClientConfig = toml::from_str(&ClientConfig::default_template()).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = ClientConfig::default();
        config.client.log_level = "info".into();
        config.save(&path).unwrap();

        let loaded = ClientConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.client.log_level, "info");
    }
}
