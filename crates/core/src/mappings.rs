//! Working folder mappings between server paths and local directories.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::WorkspaceError;
use crate::paths::ServerPath;

/// One mapping entry. A cloaked entry hides its server subtree from the
/// workspace and carries no local path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingFolder {
    pub server_item: ServerPath,
    pub local_item: Option<PathBuf>,
}

impl WorkingFolder {
    pub fn mapped(server_item: ServerPath, local_item: PathBuf) -> Self {
        Self {
            server_item,
            local_item: Some(local_item),
        }
    }

    pub fn cloaked(server_item: ServerPath) -> Self {
        Self {
            server_item,
            local_item: None,
        }
    }

    pub fn is_cloaked(&self) -> bool {
        self.local_item.is_none()
    }
}

/// The full set of working folders of a workspace.
///
/// Lookups pick the deepest matching entry, so a cloak or a nested mapping
/// overrides the mapping of its parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMappings {
    folders: Vec<WorkingFolder>,
}

impl WorkspaceMappings {
    pub fn new(folders: Vec<WorkingFolder>) -> Self {
        let mut mappings = Self { folders };
        mappings.sort();
        mappings
    }

    pub fn folders(&self) -> &[WorkingFolder] {
        &self.folders
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// Map `server_item` to `local_item`, replacing any existing entry for
    /// the same server path.
    pub fn map(&mut self, server_item: ServerPath, local_item: &Path) -> Result<(), WorkspaceError> {
        let local_item = normalize_path(local_item);
        if let Some(existing) = self.folders.iter().find(|f| {
            f.local_item.as_deref() == Some(local_item.as_path()) && f.server_item != server_item
        }) {
            return Err(WorkspaceError::AlreadyExists(format!(
                "{} (mapped to {})",
                local_item.display(),
                existing.server_item
            )));
        }
        self.folders.retain(|f| f.server_item != server_item);
        self.folders.push(WorkingFolder::mapped(server_item, local_item));
        self.sort();
        Ok(())
    }

    /// Cloak a server subtree. It must sit below an existing mapping.
    pub fn cloak(&mut self, server_item: ServerPath) -> Result<(), WorkspaceError> {
        let covered = self.folders.iter().any(|f| {
            !f.is_cloaked() && server_item.is_descendant_of(&f.server_item)
        });
        if !covered {
            return Err(WorkspaceError::NotMapped(server_item.to_string()));
        }
        self.folders.retain(|f| f.server_item != server_item);
        self.folders.push(WorkingFolder::cloaked(server_item));
        self.sort();
        Ok(())
    }

    /// Remove the entry for exactly `server_item`. Returns whether one existed.
    pub fn unmap(&mut self, server_item: &ServerPath) -> bool {
        let before = self.folders.len();
        self.folders.retain(|f| &f.server_item != server_item);
        before != self.folders.len()
    }

    fn sort(&mut self) {
        self.folders.sort_by(|a, b| a.server_item.cmp(&b.server_item));
    }

    fn deepest_for_server(&self, server_item: &ServerPath) -> Option<&WorkingFolder> {
        self.folders
            .iter()
            .filter(|f| server_item.is_same_or_descendant_of(&f.server_item))
            .max_by_key(|f| f.server_item.depth())
    }

    /// Local path of a server item, or `None` when unmapped or cloaked.
    pub fn local_for_server(&self, server_item: &ServerPath) -> Option<PathBuf> {
        let folder = self.deepest_for_server(server_item)?;
        let local_root = folder.local_item.as_ref()?;
        let relative = server_item.relative_to(&folder.server_item)?;
        let mut local = local_root.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            local.push(segment);
        }
        Some(local)
    }

    /// Server path of a local path, or `None` when it is outside every
    /// mapping or falls under a cloak.
    pub fn server_for_local(&self, local: &Path) -> Option<ServerPath> {
        let local = normalize_path(local);
        let folder = self
            .folders
            .iter()
            .filter(|f| {
                f.local_item
                    .as_deref()
                    .is_some_and(|root| local.starts_with(root))
            })
            .max_by_key(|f| f.local_item.as_ref().map_or(0, |p| p.components().count()))?;
        let root = folder.local_item.as_deref()?;
        let relative: Vec<String> = local
            .strip_prefix(root)
            .ok()?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let server = folder.server_item.join(&relative.join("/")).ok()?;
        self.is_mapped(&server).then_some(server)
    }

    pub fn is_mapped(&self, server_item: &ServerPath) -> bool {
        self.local_for_server(server_item).is_some()
    }

    /// Server roots of every non-cloaked mapping.
    pub fn mapped_roots(&self) -> Vec<ServerPath> {
        self.folders
            .iter()
            .filter(|f| !f.is_cloaked())
            .map(|f| f.server_item.clone())
            .collect()
    }

    /// Local roots of every non-cloaked mapping.
    pub fn local_roots(&self) -> Vec<PathBuf> {
        self.folders
            .iter()
            .filter_map(|f| f.local_item.clone())
            .collect()
    }
}

/// Make a path absolute and remove `.` and `..` components lexically.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(s: &str) -> ServerPath {
        ServerPath::parse(s).unwrap()
    }

    fn mappings() -> WorkspaceMappings {
        let mut m = WorkspaceMappings::default();
        m.map(sp("$/Proj"), Path::new("/work/proj")).unwrap();
        m.map(sp("$/Proj/Docs"), Path::new("/docs")).unwrap();
        m.cloak(sp("$/Proj/Bin")).unwrap();
        m
    }

    #[test]
    fn test_local_for_server_uses_deepest_mapping() {
        let m = mappings();
        assert_eq!(
            m.local_for_server(&sp("$/Proj/src/main.rs")),
            Some(PathBuf::from("/work/proj/src/main.rs"))
        );
        assert_eq!(
            m.local_for_server(&sp("$/Proj/Docs/guide.md")),
            Some(PathBuf::from("/docs/guide.md"))
        );
        assert_eq!(m.local_for_server(&sp("$/Proj/Bin/app.exe")), None);
        assert_eq!(m.local_for_server(&sp("$/Other")), None);
    }

    #[test]
    fn test_server_for_local() {
        let m = mappings();
        assert_eq!(
            m.server_for_local(Path::new("/work/proj/src/../lib/a.rs")),
            Some(sp("$/Proj/lib/a.rs"))
        );
        assert_eq!(
            m.server_for_local(Path::new("/docs/guide.md")),
            Some(sp("$/Proj/Docs/guide.md"))
        );
        assert_eq!(m.server_for_local(Path::new("/work/proj/Bin/app.exe")), None);
        assert_eq!(m.server_for_local(Path::new("/elsewhere/file")), None);
    }

    #[test]
    fn test_map_rejects_shared_local_folder() {
        let mut m = mappings();
        let err = m.map(sp("$/Other"), Path::new("/work/proj")).unwrap_err();
        assert!(matches!(err, WorkspaceError::AlreadyExists(_)));
    }

    #[test]
    fn test_map_replaces_same_server_item() {
        let mut m = mappings();
        m.map(sp("$/Proj"), Path::new("/work/proj2")).unwrap();
        assert_eq!(
            m.local_for_server(&sp("$/Proj/a.txt")),
            Some(PathBuf::from("/work/proj2/a.txt"))
        );
    }

    #[test]
    fn test_cloak_requires_parent_mapping() {
        let mut m = WorkspaceMappings::default();
        let err = m.cloak(sp("$/Proj/Bin")).unwrap_err();
        assert!(matches!(err, WorkspaceError::NotMapped(_)));
    }

    #[test]
    fn test_unmap() {
        let mut m = mappings();
        assert!(m.unmap(&sp("$/Proj/Docs")));
        assert!(!m.unmap(&sp("$/Proj/Docs")));
        assert_eq!(
            m.local_for_server(&sp("$/Proj/Docs/guide.md")),
            Some(PathBuf::from("/work/proj/Docs/guide.md"))
        );
    }

    #[test]
    fn test_mapped_roots_skip_cloaks() {
        let m = mappings();
        let roots = m.mapped_roots();
        assert_eq!(roots, vec![sp("$/Proj"), sp("$/Proj/Docs")]);
    }
}
