//! Local workspace cache.
//!
//! A TOML file listing every workspace known on this machine, so that a
//! command run inside a mapped folder can find its workspace without being
//! told the name.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{ConfigError, WorkspaceError};
use crate::mappings::normalize_path;

/// One cached workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    /// Path of the collection (repository) database.
    pub collection: PathBuf,
    /// Path of this workspace's own state database.
    pub database: PathBuf,
    /// Local roots of the workspace's non-cloaked mappings.
    #[serde(default)]
    pub mapped_paths: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceCache {
    #[serde(default, rename = "workspace")]
    workspaces: Vec<WorkspaceInfo>,

    #[serde(skip)]
    path: PathBuf,
}

impl WorkspaceCache {
    /// Load the cache at `path`. A missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut cache = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<WorkspaceCache>(&contents)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?
        } else {
            debug!(path = %path.display(), "no workspace cache yet");
            WorkspaceCache::default()
        };
        cache.path = path.to_path_buf();
        Ok(cache)
    }

    /// Write the cache atomically (temp file in the same directory, then
    /// rename).
    pub fn save(&self) -> Result<(), ConfigError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, contents.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| ConfigError::IoError(e.error))?;
        debug!(path = %self.path.display(), count = self.workspaces.len(), "workspace cache saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn workspaces(&self) -> &[WorkspaceInfo] {
        &self.workspaces
    }

    /// Add a workspace. Names are unique per collection (case-insensitive)
    /// and no two workspaces may share a mapped local root.
    pub fn insert(&mut self, info: WorkspaceInfo) -> Result<(), WorkspaceError> {
        if self.find(&info.name, &info.collection).is_some() {
            return Err(WorkspaceError::WorkspaceExists(info.name));
        }
        self.check_paths_free(&info.name, &info.mapped_paths)?;
        info!(name = %info.name, "workspace added to cache");
        self.workspaces.push(info);
        Ok(())
    }

    /// Remove a workspace by name and collection.
    pub fn remove(&mut self, name: &str, collection: &Path) -> Option<WorkspaceInfo> {
        let idx = self
            .workspaces
            .iter()
            .position(|w| w.name.eq_ignore_ascii_case(name) && w.collection == collection)?;
        Some(self.workspaces.remove(idx))
    }

    pub fn find(&self, name: &str, collection: &Path) -> Option<&WorkspaceInfo> {
        self.workspaces
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(name) && w.collection == collection)
    }

    /// Find by name alone; errors out when the name is ambiguous.
    pub fn find_by_name(&self, name: &str) -> Result<&WorkspaceInfo, WorkspaceError> {
        let mut matches = self
            .workspaces
            .iter()
            .filter(|w| w.name.eq_ignore_ascii_case(name));
        let first = matches
            .next()
            .ok_or_else(|| WorkspaceError::NotFound(name.to_string()))?;
        if matches.next().is_some() {
            return Err(WorkspaceError::InvalidSpec(format!(
                "workspace name '{name}' exists in more than one collection"
            )));
        }
        Ok(first)
    }

    /// The workspace whose mapped root contains `path` (deepest wins).
    pub fn find_for_path(&self, path: &Path) -> Option<&WorkspaceInfo> {
        let path = normalize_path(path);
        self.workspaces
            .iter()
            .flat_map(|w| w.mapped_paths.iter().map(move |p| (w, p)))
            .filter(|(_, root)| path.starts_with(root))
            .max_by_key(|(_, root)| root.components().count())
            .map(|(w, _)| w)
    }

    /// Replace the mapped roots recorded for a workspace.
    pub fn update_mapped_paths(
        &mut self,
        id: Uuid,
        paths: Vec<PathBuf>,
    ) -> Result<(), WorkspaceError> {
        let name = self
            .workspaces
            .iter()
            .find(|w| w.id == id)
            .map(|w| w.name.clone())
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))?;
        self.check_paths_free(&name, &paths)?;
        if let Some(ws) = self.workspaces.iter_mut().find(|w| w.id == id) {
            ws.mapped_paths = paths;
        }
        Ok(())
    }

    fn check_paths_free(&self, name: &str, paths: &[PathBuf]) -> Result<(), WorkspaceError> {
        for path in paths {
            if let Some(owner) = self
                .workspaces
                .iter()
                .filter(|w| !w.name.eq_ignore_ascii_case(name))
                .find(|w| w.mapped_paths.iter().any(|p| p == path))
            {
                return Err(WorkspaceError::MappingOverlap {
                    path: path.display().to_string(),
                    workspace: owner.name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, root: &str) -> WorkspaceInfo {
        WorkspaceInfo {
            id: Uuid::new_v4(),
            name: name.into(),
            owner: "jdoe".into(),
            collection: PathBuf::from("/data/collection.db"),
            database: PathBuf::from(format!("/data/{name}.db")),
            mapped_paths: vec![PathBuf::from(root)],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspaces.toml");

        let mut cache = WorkspaceCache::load(&path).unwrap();
        assert!(cache.workspaces().is_empty());
        cache.insert(info("dev", "/work/dev")).unwrap();
        cache.save().unwrap();

        let loaded = WorkspaceCache::load(&path).unwrap();
        assert_eq!(loaded.workspaces().len(), 1);
        assert_eq!(loaded.workspaces()[0].name, "dev");
    }

    #[test]
    fn test_insert_rejects_duplicate_name() {
        let mut cache = WorkspaceCache::default();
        cache.insert(info("dev", "/work/dev")).unwrap();
        let err = cache.insert(info("DEV", "/work/other")).unwrap_err();
        assert!(matches!(err, WorkspaceError::WorkspaceExists(_)));
    }

    #[test]
    fn test_insert_rejects_shared_root() {
        let mut cache = WorkspaceCache::default();
        cache.insert(info("dev", "/work/dev")).unwrap();
        let err = cache.insert(info("qa", "/work/dev")).unwrap_err();
        assert!(matches!(err, WorkspaceError::MappingOverlap { .. }));
    }

    #[test]
    fn test_find_for_path_picks_deepest_root() {
        let mut cache = WorkspaceCache::default();
        cache.insert(info("outer", "/work")).unwrap();
        cache.insert(info("inner", "/work/inner")).unwrap();

        let found = cache.find_for_path(Path::new("/work/inner/src/a.rs")).unwrap();
        assert_eq!(found.name, "inner");
        let found = cache.find_for_path(Path::new("/work/other")).unwrap();
        assert_eq!(found.name, "outer");
        assert!(cache.find_for_path(Path::new("/elsewhere")).is_none());
    }

    #[test]
    fn test_remove() {
        let mut cache = WorkspaceCache::default();
        cache.insert(info("dev", "/work/dev")).unwrap();
        let removed = cache.remove("Dev", Path::new("/data/collection.db"));
        assert!(removed.is_some());
        assert!(cache.find_by_name("dev").is_err());
    }
}
