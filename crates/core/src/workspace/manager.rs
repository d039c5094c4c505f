//! Creating, finding and deleting workspaces on this machine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::Workspace;
use crate::cache::{WorkspaceCache, WorkspaceInfo};
use crate::config::ClientConfig;
use crate::errors::WorkspaceError;
use crate::mappings::normalize_path;
use crate::paths::ServerPath;
use crate::repository::{Repository, SqliteRepository};
use crate::tool::MergeToolRegistry;

/// Owns the configuration and the workspace cache, and hands out opened
/// [`Workspace`]s.
pub struct WorkspaceManager {
    config: ClientConfig,
    cache: WorkspaceCache,
}

impl WorkspaceManager {
    pub fn new(config: ClientConfig) -> Result<Self, WorkspaceError> {
        let cache = WorkspaceCache::load(&config.cache_path())?;
        Ok(Self { config, cache })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn workspaces(&self) -> &[WorkspaceInfo] {
        self.cache.workspaces()
    }

    /// The collection used when none is named.
    pub fn default_collection(&self) -> PathBuf {
        self.config.client.data_dir.join("collection.db")
    }

    /// Create an empty collection database.
    pub fn create_collection(&self, path: &Path) -> Result<(), WorkspaceError> {
        let repo = SqliteRepository::create(path)?;
        info!(location = repo.location(), "collection created");
        Ok(())
    }

    fn repository(&self, collection: &Path) -> Result<Arc<dyn Repository>, WorkspaceError> {
        Ok(Arc::new(SqliteRepository::open(collection)?))
    }

    fn tools(&self) -> MergeToolRegistry {
        MergeToolRegistry::from_config(&self.config.merge_tools)
    }

    pub fn create_workspace(&mut self, name: &str, collection: &Path) -> Result<Workspace, WorkspaceError> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\', ';', ':']) {
            return Err(WorkspaceError::InvalidSpec(format!("'{name}' is not a valid workspace name")));
        }
        let collection = normalize_path(collection);
        if self.cache.find(name, &collection).is_some() {
            return Err(WorkspaceError::WorkspaceExists(name.to_string()));
        }
        let repo = self.repository(&collection)?;

        let id = Uuid::new_v4();
        let info = WorkspaceInfo {
            id,
            name: name.to_string(),
            owner: self.config.owner(),
            collection,
            database: self.config.workspaces_dir().join(format!("{id}.db")),
            mapped_paths: Vec::new(),
            created_at: Utc::now(),
        };
        let workspace = Workspace::create(info.clone(), repo)?.with_tools(self.tools());
        self.cache.insert(info)?;
        self.cache.save()?;
        Ok(workspace)
    }

    /// Remove a workspace from the cache and delete its state database.
    /// Local files are left alone.
    pub fn delete_workspace(&mut self, name: &str) -> Result<WorkspaceInfo, WorkspaceError> {
        let collection = self.cache.find_by_name(name)?.collection.clone();
        let info = self
            .cache
            .remove(name, &collection)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_string()))?;
        for suffix in ["", "-wal", "-shm"] {
            let mut file = info.database.clone().into_os_string();
            file.push(suffix);
            let file = PathBuf::from(file);
            if let Err(e) = std::fs::remove_file(&file) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %file.display(), error = %e, "could not remove workspace database");
                }
            }
        }
        self.cache.save()?;
        info!(name = %info.name, "workspace deleted");
        Ok(info)
    }

    fn open(&self, info: &WorkspaceInfo) -> Result<Workspace, WorkspaceError> {
        let repo = self.repository(&info.collection)?;
        Ok(Workspace::open(info.clone(), repo)?.with_tools(self.tools()))
    }

    pub fn open_by_name(&self, name: &str) -> Result<Workspace, WorkspaceError> {
        let info = self.cache.find_by_name(name)?;
        self.open(info)
    }

    /// The workspace mapping `path`.
    pub fn open_for_path(&self, path: &Path) -> Result<Workspace, WorkspaceError> {
        let info = self
            .cache
            .find_for_path(path)
            .ok_or_else(|| WorkspaceError::NotMapped(path.display().to_string()))?;
        self.open(info)
    }

    /// Map a working folder, refusing local roots that another workspace
    /// already maps.
    pub fn map(
        &mut self,
        workspace: &mut Workspace,
        server_item: ServerPath,
        local_item: &Path,
    ) -> Result<(), WorkspaceError> {
        workspace.map(server_item.clone(), local_item)?;
        if let Err(e) = self.save_mappings(workspace) {
            workspace.unmap(&server_item)?;
            return Err(e);
        }
        Ok(())
    }

    /// Record the workspace's mapped roots in the cache.
    pub fn save_mappings(&mut self, workspace: &Workspace) -> Result<(), WorkspaceError> {
        let info = workspace.info();
        self.cache
            .update_mapped_paths(info.id, info.mapped_paths.clone())?;
        self.cache.save()?;
        Ok(())
    }
}
