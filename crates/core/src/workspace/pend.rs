//! Pending adds, edits, deletes, renames and undo.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{fs, Entry, Snapshot, Workspace};
use crate::encoding::FileEncoding;
use crate::errors::WorkspaceError;
use crate::events::{EventObserver, WorkspaceEvent};
use crate::mappings::normalize_path;
use crate::models::{ChangeType, CommandStatus, ItemSpec, ItemType};
use crate::paths::ServerPath;
use crate::pending::PendingChange;

/// What a pend or undo command did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PendResult {
    pub pended: Vec<PendingChange>,
    pub undone: Vec<ServerPath>,
    /// Items that were named but could not be changed.
    pub warnings: Vec<String>,
}

impl PendResult {
    pub fn status(&self) -> CommandStatus {
        CommandStatus::from_outcomes(self.pended.len() + self.undone.len(), self.warnings.len())
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

impl Workspace {
    fn save_and_report(
        &self,
        change: &mut PendingChange,
        result: &mut PendResult,
        observer: &mut dyn EventObserver,
    ) -> Result<(), WorkspaceError> {
        change.id = self.db.save_pending(change)?;
        observer.on_event(&WorkspaceEvent::Pended {
            path: change.server_item.clone(),
            change: change.change_type,
        });
        result.pended.push(change.clone());
        Ok(())
    }

    /// Pend adds for local files and folders. Missing parent folders are
    /// added as well.
    pub fn pend_add(
        &mut self,
        paths: &[PathBuf],
        recursive: bool,
        observer: &mut dyn EventObserver,
    ) -> Result<PendResult, WorkspaceError> {
        let mut result = PendResult::default();
        let snapshot = self.snapshot()?;
        let mut occupied: HashSet<ServerPath> =
            snapshot.entries().into_iter().map(|e| e.path).collect();
        let latest = self.repo.latest_changeset()?;

        // (server path, local path, explicitly named)
        let mut candidates: Vec<(ServerPath, PathBuf, bool)> = Vec::new();
        for path in paths {
            let local = normalize_path(path);
            if !local.exists() {
                result.warn(format!("{}: file not found", local.display()));
                continue;
            }
            let Some(server) = self.mappings.server_for_local(&local) else {
                result.warn(format!("{}: not mapped in this workspace", local.display()));
                continue;
            };
            candidates.push((server, local.clone(), true));
            if recursive && local.is_dir() {
                for child in fs::walk(&local)? {
                    if let Some(server) = self.mappings.server_for_local(&child) {
                        candidates.push((server, child, false));
                    }
                }
            }
        }

        let mut parents: Vec<(ServerPath, PathBuf, bool)> = Vec::new();
        for (server, _, _) in &candidates {
            let mut current = server.parent();
            while let Some(parent) = current {
                if occupied.contains(&parent)
                    || parents.iter().any(|(p, _, _)| p == &parent)
                    || candidates.iter().any(|(p, _, _)| p == &parent)
                    || !self.mappings.is_mapped(&parent)
                    || self.repo.item_at(&parent, latest)?.is_some()
                {
                    break;
                }
                let local = self.local_path(&parent)?;
                parents.push((parent.clone(), local, false));
                current = parent.parent();
            }
        }
        candidates.extend(parents);
        candidates.sort_by(|a, b| a.0.depth().cmp(&b.0.depth()).then_with(|| a.0.cmp(&b.0)));

        for (server, local, named) in candidates {
            if occupied.contains(&server) {
                if named {
                    result.warn(format!("{server}: already under version control"));
                }
                continue;
            }
            let (item_type, encoding) = if local.is_dir() {
                (ItemType::Folder, FileEncoding::BINARY)
            } else {
                (ItemType::File, FileEncoding::detect(&fs::read_file(&local)?))
            };
            let mut change =
                PendingChange::new(None, server.clone(), ChangeType::ADD, item_type, encoding, 0);
            self.save_and_report(&mut change, &mut result, observer)?;
            occupied.insert(server);
        }
        info!(added = result.pended.len(), "pended adds");
        Ok(result)
    }

    /// Pend edits on versioned files. Folders are ignored.
    pub fn pend_edit(
        &mut self,
        specs: &[ItemSpec],
        observer: &mut dyn EventObserver,
    ) -> Result<PendResult, WorkspaceError> {
        let mut result = PendResult::default();
        let filters = self.resolve_filters(specs)?;
        let entries = self.snapshot()?.select(&filters);
        if entries.is_empty() {
            for spec in specs {
                result.warn(format!("{}: no matching items in this workspace", spec.path));
            }
        }

        for entry in entries.into_iter().filter(|e| !e.item_type.is_folder()) {
            match (entry.local, entry.pending) {
                (Some(_), Some(p)) if p.is_delete() => {
                    result.warn(format!("{}: has a pending delete", p.server_item));
                }
                (_, Some(p)) if p.is_new_item() || p.change_type.contains(ChangeType::EDIT) => {
                    debug!(path = %p.server_item, "already pending as an edit");
                }
                (_, Some(mut p)) => {
                    p.add_change(ChangeType::EDIT);
                    self.save_and_report(&mut p, &mut result, observer)?;
                }
                (Some(l), None) => {
                    let mut change = PendingChange::new(
                        Some(l.item_id),
                        entry.path,
                        ChangeType::EDIT,
                        l.item_type,
                        l.encoding,
                        l.version,
                    );
                    self.save_and_report(&mut change, &mut result, observer)?;
                }
                (None, None) => {}
            }
        }
        info!(edited = result.pended.len(), "pended edits");
        Ok(result)
    }

    /// Pend deletes and remove the local copies. Deleting a folder deletes
    /// everything below it; deleting a pending add just cancels the add.
    pub fn pend_delete(
        &mut self,
        specs: &[ItemSpec],
        observer: &mut dyn EventObserver,
    ) -> Result<PendResult, WorkspaceError> {
        let mut result = PendResult::default();
        let filters = self.resolve_filters(specs)?;
        let snapshot = self.snapshot()?;
        let selected = snapshot.select(&filters);
        if selected.is_empty() {
            for spec in specs {
                result.warn(format!("{}: no matching items in this workspace", spec.path));
            }
        }

        let folders: Vec<ServerPath> = selected
            .iter()
            .filter(|e| e.item_type.is_folder())
            .map(|e| e.path.clone())
            .collect();
        let mut targets: Vec<Entry> = snapshot
            .entries()
            .into_iter()
            .filter(|e| {
                selected.iter().any(|s| s.path == e.path)
                    || folders.iter().any(|f| e.path.is_descendant_of(f))
            })
            .collect();
        // Deepest first so folders are empty when their turn comes.
        targets.sort_by(|a, b| b.path.depth().cmp(&a.path.depth()));

        for entry in targets {
            let local = self.local_path(&entry.path).ok();
            match (entry.local, entry.pending) {
                (_, Some(p)) if p.is_delete() => continue,
                (None, Some(p)) => {
                    self.db.delete_pending(p.id)?;
                    observer.on_event(&WorkspaceEvent::Undone {
                        path: p.server_item.clone(),
                    });
                    result.undone.push(p.server_item);
                }
                (Some(_), Some(mut p)) => {
                    if p.add_change(ChangeType::DELETE) {
                        self.save_and_report(&mut p, &mut result, observer)?;
                    } else {
                        self.db.delete_pending(p.id)?;
                        result.undone.push(p.server_item);
                    }
                }
                (Some(l), None) => {
                    let mut change = PendingChange::new(
                        Some(l.item_id),
                        entry.path,
                        ChangeType::DELETE,
                        l.item_type,
                        l.encoding,
                        l.version,
                    );
                    self.save_and_report(&mut change, &mut result, observer)?;
                }
                (None, None) => continue,
            }
            if let Some(local) = local {
                fs::remove_item(&local)?;
            }
        }
        info!(deleted = result.pended.len(), "pended deletes");
        Ok(result)
    }

    /// Rename one item. Everything below a renamed folder follows it.
    pub fn pend_rename(
        &mut self,
        old: &str,
        new: &str,
        observer: &mut dyn EventObserver,
    ) -> Result<PendResult, WorkspaceError> {
        let from = self.resolve_server_path(old)?;
        let to = self.resolve_server_path(new)?;
        let snapshot = self.snapshot()?;
        check_rename(&snapshot, &from, &to)?;

        let from_local = self.local_path(&from)?;
        let to_local = self.local_path(&to)?;
        fs::move_item(&from_local, &to_local)?;

        let mut result = PendResult::default();
        let moved: Vec<Entry> = snapshot
            .entries()
            .into_iter()
            .filter(|e| e.path.is_same_or_descendant_of(&from))
            .collect();
        for e in moved {
            let Some(new_path) = e.path.rebase(&from, &to) else {
                continue;
            };
            let mut change = match (&e.local, e.pending) {
                (None, Some(mut p)) => {
                    p.server_item = new_path;
                    p
                }
                (Some(l), pending) => {
                    let mut p = pending.unwrap_or_else(|| {
                        PendingChange::new(
                            Some(l.item_id),
                            e.path.clone(),
                            ChangeType::NONE,
                            l.item_type,
                            l.encoding,
                            l.version,
                        )
                    });
                    if new_path.as_str() == l.server_item.as_str() {
                        // Renamed back to where it was committed.
                        p.server_item = new_path;
                        p.source_server_item = None;
                        if !p.remove_change(ChangeType::RENAME) {
                            if p.id != 0 {
                                self.db.delete_pending(p.id)?;
                            }
                            result.undone.push(p.server_item);
                            continue;
                        }
                    } else {
                        p.server_item = new_path;
                        p.source_server_item = Some(l.server_item.clone());
                        p.add_change(ChangeType::RENAME);
                    }
                    p
                }
                (None, None) => continue,
            };
            if change.server_item == to {
                self.save_and_report(&mut change, &mut result, observer)?;
            } else {
                change.id = self.db.save_pending(&change)?;
            }
        }
        self.db.rebase_paths(&from, &to)?;
        info!(%from, %to, "pended rename");
        Ok(result)
    }

    /// Revert pending changes. Edits and deletes get the retrieved content
    /// back, renames move back, and added files stay on disk unversioned.
    pub fn undo(
        &mut self,
        specs: &[ItemSpec],
        observer: &mut dyn EventObserver,
    ) -> Result<PendResult, WorkspaceError> {
        let mut result = PendResult::default();
        let filters = self.resolve_filters(specs)?;
        let snapshot = self.snapshot()?;
        let selected: Vec<Entry> = snapshot
            .select(&filters)
            .into_iter()
            .filter(|e| e.pending.is_some())
            .collect();
        if selected.is_empty() {
            for spec in specs {
                result.warn(format!("{}: no pending changes", spec.path));
            }
            return Ok(result);
        }

        // Undoing a folder rename or add takes everything below it along.
        let moved_folders: Vec<ServerPath> = selected
            .iter()
            .filter(|e| {
                e.item_type.is_folder()
                    && e.pending.as_ref().is_some_and(|p| p.is_rename() || p.is_new_item())
            })
            .map(|e| e.path.clone())
            .collect();
        let mut targets: Vec<Entry> = snapshot
            .entries()
            .into_iter()
            .filter(|e| e.pending.is_some())
            .filter(|e| {
                selected.iter().any(|s| s.path == e.path)
                    || moved_folders.iter().any(|f| e.path.is_descendant_of(f))
            })
            .collect();
        targets.sort_by(|a, b| a.path.depth().cmp(&b.path.depth()));

        let conflicts = self.db.list_conflicts()?;
        for entry in targets {
            let Some(pending) = &entry.pending else {
                continue;
            };
            match &entry.local {
                None => {
                    if pending
                        .change_type
                        .intersects(ChangeType::UNDELETE | ChangeType::BRANCH)
                    {
                        if let Ok(local) = self.local_path(&entry.path) {
                            fs::remove_item(&local)?;
                        }
                    }
                }
                Some(l) => {
                    let committed = self.local_path(&l.server_item)?;
                    if pending.is_rename() {
                        if let Ok(current) = self.local_path(&entry.path) {
                            fs::move_item(&current, &committed)?;
                        }
                    }
                    let modified = ChangeType::DELETE
                        | ChangeType::EDIT
                        | ChangeType::MERGE
                        | ChangeType::ROLLBACK
                        | ChangeType::ENCODING;
                    if pending.change_type.intersects(modified) {
                        if l.item_type.is_folder() {
                            fs::ensure_dir(&committed)?;
                        } else {
                            let content = self.repo.content(l.item_id, l.version)?;
                            fs::write_file(&committed, &content)?;
                        }
                    }
                }
            }
            self.db.delete_pending(pending.id)?;

            let item_id = entry.item_id();
            for conflict in conflicts.iter().filter(|c| {
                (item_id.is_some() && (c.item_id == item_id || c.their_item_id == item_id))
                    || c.your_server_item == entry.path
            }) {
                self.db.delete_conflict(conflict.id)?;
            }

            observer.on_event(&WorkspaceEvent::Undone {
                path: entry.path.clone(),
            });
            result.undone.push(entry.path.clone());
        }
        info!(undone = result.undone.len(), "undid pending changes");
        Ok(result)
    }
}

/// Whether `from` can be renamed to `to` without touching anything.
pub(super) fn check_rename(
    snapshot: &Snapshot,
    from: &ServerPath,
    to: &ServerPath,
) -> Result<(), WorkspaceError> {
    let entry = snapshot
        .entry_at(from)
        .ok_or_else(|| WorkspaceError::NotVersioned(from.to_string()))?;
    if entry.pending.as_ref().is_some_and(|p| p.is_delete()) {
        return Err(WorkspaceError::InvalidSpec(format!("{from} has a pending delete")));
    }
    if from.as_str() == to.as_str() {
        return Err(WorkspaceError::InvalidSpec(format!("{from} already has that name")));
    }
    if from != to && snapshot.entry_at(to).is_some() {
        return Err(WorkspaceError::AlreadyExists(to.to_string()));
    }
    if to.is_descendant_of(from) {
        return Err(WorkspaceError::InvalidSpec(format!(
            "cannot move {from} below itself"
        )));
    }
    let parent = to.parent().unwrap_or_else(ServerPath::root);
    let parent_ok = snapshot
        .entry_at(&parent)
        .is_some_and(|e| e.item_type.is_folder() && !e.pending.as_ref().is_some_and(|p| p.is_delete()));
    if !parent_ok {
        return Err(WorkspaceError::InvalidSpec(format!(
            "parent folder {parent} is not in this workspace"
        )));
    }
    Ok(())
}
