//! A workspace: mappings, retrieved items, pending changes and conflicts,
//! bound to one repository.
//!
//! All state lives in the workspace's own SQLite database. Operations are
//! synchronous and report progress through an [`EventObserver`].

mod checkin;
mod fs;
mod get;
mod manager;
mod merge;
mod pend;
mod resolve;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::WorkspaceInfo;
use crate::conflict::{
    Conflict, ConflictStore, ResolutionEngine, ResolveObserver, ResolveRequest, ResolveSummary,
};
use crate::db::{Database, LocalItem};
use crate::errors::{CoreError, ResolveError, WorkspaceError};
use crate::events::{EventObserver, WorkspaceEvent};
use crate::mappings::WorkspaceMappings;
use crate::models::{ItemSpec, ItemType, RecursionType};
use crate::paths::{PathFilter, ServerPath};
use crate::pending::{filter_pending, PendingChange};
use crate::repository::{Repository, ServerItem};
use crate::tool::MergeToolRegistry;

pub use checkin::{CheckedInItem, CheckinResult};
pub use get::GetRequest;
pub use manager::WorkspaceManager;
pub use merge::{MergeRequest, RollbackRequest};
pub use pend::PendResult;

pub struct Workspace {
    info: WorkspaceInfo,
    db: Database,
    repo: Arc<dyn Repository>,
    mappings: WorkspaceMappings,
    tools: MergeToolRegistry,
}

impl Workspace {
    /// Create the state database for a new workspace.
    pub fn create(info: WorkspaceInfo, repo: Arc<dyn Repository>) -> Result<Self, WorkspaceError> {
        if info.database.exists() {
            return Err(WorkspaceError::WorkspaceExists(info.name));
        }
        let db = Database::new(&info.database)?;
        Self::init(info, db, repo)
    }

    /// Open an existing workspace database.
    pub fn open(info: WorkspaceInfo, repo: Arc<dyn Repository>) -> Result<Self, WorkspaceError> {
        if !info.database.exists() {
            return Err(WorkspaceError::NotFound(info.name));
        }
        let db = Database::new(&info.database)?;
        db.initialize()?;
        let mappings = WorkspaceMappings::new(db.list_working_folders()?);
        debug!(name = %info.name, folders = mappings.folders().len(), "workspace opened");
        Ok(Self {
            info,
            db,
            repo,
            mappings,
            tools: MergeToolRegistry::default(),
        })
    }

    /// A workspace whose state lives only in memory.
    pub fn in_memory(info: WorkspaceInfo, repo: Arc<dyn Repository>) -> Result<Self, WorkspaceError> {
        let db = Database::in_memory()?;
        Self::init(info, db, repo)
    }

    fn init(info: WorkspaceInfo, db: Database, repo: Arc<dyn Repository>) -> Result<Self, WorkspaceError> {
        db.initialize()?;
        db.set_meta("id", &info.id.to_string())?;
        db.set_meta("name", &info.name)?;
        db.set_meta("owner", &info.owner)?;
        info!(name = %info.name, owner = %info.owner, "workspace created");
        Ok(Self {
            info,
            db,
            repo,
            mappings: WorkspaceMappings::default(),
            tools: MergeToolRegistry::default(),
        })
    }

    pub fn with_tools(mut self, tools: MergeToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn info(&self) -> &WorkspaceInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn owner(&self) -> &str {
        &self.info.owner
    }

    pub fn mappings(&self) -> &WorkspaceMappings {
        &self.mappings
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // -- mappings -----------------------------------------------------------

    pub fn map(&mut self, server_item: ServerPath, local_item: &Path) -> Result<(), WorkspaceError> {
        self.mappings.map(server_item.clone(), local_item)?;
        self.save_mappings()?;
        info!(server = %server_item, local = %local_item.display(), "mapped working folder");
        Ok(())
    }

    pub fn cloak(&mut self, server_item: ServerPath) -> Result<(), WorkspaceError> {
        self.mappings.cloak(server_item.clone())?;
        self.save_mappings()?;
        info!(server = %server_item, "cloaked working folder");
        Ok(())
    }

    /// Remove a mapping or cloak. Items already retrieved stay on disk until
    /// the next get.
    pub fn unmap(&mut self, server_item: &ServerPath) -> Result<bool, WorkspaceError> {
        let removed = self.mappings.unmap(server_item);
        if removed {
            self.save_mappings()?;
            info!(server = %server_item, "removed working folder");
        }
        Ok(removed)
    }

    fn save_mappings(&mut self) -> Result<(), WorkspaceError> {
        self.db.replace_working_folders(self.mappings.folders())?;
        self.info.mapped_paths = self.mappings.local_roots();
        Ok(())
    }

    // -- item specs ---------------------------------------------------------

    /// Turn a user item spec into a server-side filter. Local paths are
    /// translated through the mappings; a wildcard may appear in the last
    /// segment of either form.
    pub fn resolve_filter(&self, spec: &ItemSpec) -> Result<PathFilter, WorkspaceError> {
        if spec.is_server_path() {
            let path = ServerPath::parse_pattern(&spec.path)?;
            return Ok(PathFilter::new(path, spec.recursion));
        }

        let local = PathBuf::from(&spec.path);
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.contains(['*', '?']) {
            let parent = local.parent().unwrap_or_else(|| Path::new("."));
            let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
            let server_parent = self
                .mappings
                .server_for_local(parent)
                .ok_or_else(|| WorkspaceError::NotMapped(parent.display().to_string()))?;
            let joined = if server_parent.is_root() {
                format!("$/{name}")
            } else {
                format!("{server_parent}/{name}")
            };
            let pattern = ServerPath::parse_pattern(&joined)?;
            return Ok(PathFilter::new(pattern, spec.recursion));
        }

        let server = self
            .mappings
            .server_for_local(&local)
            .ok_or_else(|| WorkspaceError::NotMapped(spec.path.clone()))?;
        Ok(PathFilter::new(server, spec.recursion))
    }

    pub fn resolve_filters(&self, specs: &[ItemSpec]) -> Result<Vec<PathFilter>, WorkspaceError> {
        specs.iter().map(|s| self.resolve_filter(s)).collect()
    }

    /// A single, wildcard-free server path from a user argument.
    pub fn resolve_server_path(&self, input: &str) -> Result<ServerPath, WorkspaceError> {
        let filter = self.resolve_filter(&ItemSpec::new(input, RecursionType::None))?;
        if filter.path.has_wildcard() {
            return Err(WorkspaceError::InvalidSpec(format!(
                "wildcards are not allowed in '{input}'"
            )));
        }
        Ok(filter.path)
    }

    /// Filters covering every mapped root.
    pub(crate) fn scope_filters(&self, specs: &[ItemSpec]) -> Result<Vec<PathFilter>, WorkspaceError> {
        if specs.is_empty() {
            Ok(self
                .mappings
                .mapped_roots()
                .into_iter()
                .map(|root| PathFilter::new(root, RecursionType::Full))
                .collect())
        } else {
            self.resolve_filters(specs)
        }
    }

    /// Local path of a server item.
    pub fn local_path(&self, server_item: &ServerPath) -> Result<PathBuf, WorkspaceError> {
        self.mappings
            .local_for_server(server_item)
            .ok_or_else(|| WorkspaceError::NotMapped(server_item.to_string()))
    }

    // -- state queries ------------------------------------------------------

    pub fn local_items(&self) -> Result<Vec<LocalItem>, WorkspaceError> {
        Ok(self.db.list_local_items()?)
    }

    /// Pending changes selected by `specs` (all when empty).
    pub fn pending_changes(&self, specs: &[ItemSpec]) -> Result<Vec<PendingChange>, WorkspaceError> {
        let filters = self.resolve_filters(specs)?;
        let all = self.db.list_pending()?;
        Ok(filter_pending(&all, &filters).into_iter().cloned().collect())
    }

    /// Conflicts selected by `specs`, parents before children.
    pub fn conflicts(&self, specs: &[ItemSpec]) -> Result<Vec<Conflict>, WorkspaceError> {
        let filters = self.resolve_filters(specs)?;
        let mut conflicts: Vec<Conflict> = self
            .db
            .list_conflicts()?
            .into_iter()
            .filter(|c| filters.is_empty() || filters.iter().any(|f| c.matches(f)))
            .collect();
        conflicts.sort_by(|a, b| {
            a.depth()
                .cmp(&b.depth())
                .then_with(|| a.your_server_item.cmp(&b.your_server_item))
        });
        Ok(conflicts)
    }

    /// Run the resolution engine over this workspace's conflicts.
    pub fn resolve(
        &mut self,
        request: &ResolveRequest,
        observer: &mut dyn ResolveObserver,
    ) -> Result<ResolveSummary, CoreError> {
        ResolutionEngine::run(self, request, observer)
    }

    pub(crate) fn snapshot(&self) -> Result<Snapshot, WorkspaceError> {
        Snapshot::load(&self.db)
    }

    pub(crate) fn record_conflict(
        &self,
        conflict: &Conflict,
        observer: &mut dyn EventObserver,
    ) -> Result<i64, WorkspaceError> {
        let id = self.db.insert_conflict(conflict)?;
        info!(id, path = %conflict.your_server_item, conflict_type = %conflict.conflict_type, "conflict recorded");
        observer.on_event(&WorkspaceEvent::ConflictRecorded {
            id,
            path: conflict.your_server_item.clone(),
            conflict_type: conflict.conflict_type,
        });
        Ok(id)
    }
}

impl ConflictStore for Workspace {
    fn query_conflicts(&self, filters: &[ItemSpec]) -> Result<Vec<Conflict>, CoreError> {
        Ok(self.conflicts(filters)?)
    }

    fn resolve_conflict(&mut self, conflict: &Conflict) -> Result<Vec<i64>, ResolveError> {
        resolve::resolve(self, conflict)
    }
}

/// The workspace's record of a server item it has retrieved.
pub(crate) fn retrieved(item: &ServerItem) -> LocalItem {
    LocalItem {
        item_id: item.item_id,
        server_item: item.path.clone(),
        item_type: item.item_type,
        version: item.changeset,
        encoding: item.encoding,
        hash: item.hash.clone(),
    }
}

// ---------------------------------------------------------------------------
// Snapshot of workspace state
// ---------------------------------------------------------------------------

/// One item as the workspace currently sees it: retrieved, pending, or both.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub local: Option<LocalItem>,
    pub pending: Option<PendingChange>,
    /// Where the item is now, pending renames included.
    pub path: ServerPath,
    pub item_type: ItemType,
}

impl Entry {
    pub fn item_id(&self) -> Option<i64> {
        self.local
            .as_ref()
            .map(|l| l.item_id)
            .or_else(|| self.pending.as_ref().and_then(|p| p.item_id))
    }

    /// Committed path, if the item exists on the server.
    pub fn committed_path(&self) -> Option<&ServerPath> {
        self.local.as_ref().map(|l| &l.server_item)
    }

    pub fn matches(&self, filter: &PathFilter) -> bool {
        filter.matches(&self.path) || self.committed_path().is_some_and(|p| filter.matches(p))
    }
}

/// Retrieved items and pending changes read in one go.
pub(crate) struct Snapshot {
    pub items: HashMap<i64, LocalItem>,
    pub pending: Vec<PendingChange>,
}

impl Snapshot {
    fn load(db: &Database) -> Result<Self, WorkspaceError> {
        let items = db
            .list_local_items()?
            .into_iter()
            .map(|i| (i.item_id, i))
            .collect();
        let pending = db.list_pending()?;
        Ok(Self { items, pending })
    }

    pub fn pending_for(&self, item_id: i64) -> Option<&PendingChange> {
        self.pending.iter().find(|p| p.item_id == Some(item_id))
    }

    pub fn entries(&self) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self
            .items
            .values()
            .map(|local| {
                let pending = self.pending_for(local.item_id).cloned();
                let path = pending
                    .as_ref()
                    .map_or_else(|| local.server_item.clone(), |p| p.server_item.clone());
                Entry {
                    local: Some(local.clone()),
                    pending,
                    path,
                    item_type: local.item_type,
                }
            })
            .collect();
        let known: HashSet<i64> = self.items.keys().copied().collect();
        entries.extend(
            self.pending
                .iter()
                .filter(|p| p.item_id.map_or(true, |id| !known.contains(&id)))
                .map(|p| Entry {
                    local: None,
                    pending: Some(p.clone()),
                    path: p.server_item.clone(),
                    item_type: p.item_type,
                }),
        );
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// The item currently occupying `path`.
    pub fn entry_at(&self, path: &ServerPath) -> Option<Entry> {
        self.entries().into_iter().find(|e| &e.path == path)
    }

    pub fn select(&self, filters: &[PathFilter]) -> Vec<Entry> {
        self.entries()
            .into_iter()
            .filter(|e| filters.iter().any(|f| e.matches(f)))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    use super::Workspace;
    use crate::cache::WorkspaceInfo;
    use crate::encoding::FileEncoding;
    use crate::models::ItemType;
    use crate::paths::ServerPath;
    use crate::repository::{CommitChange, Repository, SqliteRepository};

    pub fn sp(s: &str) -> ServerPath {
        ServerPath::parse(s).unwrap()
    }

    pub fn info(dir: &Path) -> WorkspaceInfo {
        WorkspaceInfo {
            id: Uuid::new_v4(),
            name: "ws".into(),
            owner: "alice".into(),
            collection: dir.join("collection.db"),
            database: dir.join("ws.db"),
            mapped_paths: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn folder(path: &str) -> CommitChange {
        CommitChange {
            item_id: None,
            path: sp(path),
            item_type: ItemType::Folder,
            encoding: FileEncoding::BINARY,
            content: None,
            deleted: false,
        }
    }

    pub fn file(path: &str, content: &str) -> CommitChange {
        CommitChange {
            item_id: None,
            path: sp(path),
            item_type: ItemType::File,
            encoding: FileEncoding::UTF8,
            content: Some(content.as_bytes().to_vec()),
            deleted: false,
        }
    }

    pub fn edit(repo: &dyn Repository, path: &str, content: &str) -> i64 {
        let latest = repo.latest_changeset().unwrap();
        let item = repo.item_at(&sp(path), latest).unwrap().unwrap();
        let change = CommitChange {
            item_id: Some(item.item_id),
            ..file(path, content)
        };
        repo.commit("bob", "edit", &[change]).unwrap().changeset
    }

    /// A repository with `$/P`, `$/P/a.txt` and `$/P/src/b.txt`, and a
    /// workspace mapping `$/P` to `<dir>/work`.
    pub fn setup(dir: &Path) -> (Arc<SqliteRepository>, Workspace) {
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        repo.commit(
            "bob",
            "initial",
            &[
                folder("$/P"),
                file("$/P/a.txt", "one\ntwo\nthree\n"),
                folder("$/P/src"),
                file("$/P/src/b.txt", "bee\n"),
            ],
        )
        .unwrap();
        let mut ws = Workspace::in_memory(info(dir), repo.clone()).unwrap();
        ws.map(sp("$/P"), &dir.join("work")).unwrap();
        (repo, ws)
    }
}
