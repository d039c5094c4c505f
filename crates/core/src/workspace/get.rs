//! Bringing the workspace to a server version.
//!
//! A get first plans one action per item by comparing what the workspace
//! retrieved (and has pending) with the server at the target version, then
//! applies the plan. A preview stops after planning.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::{fs, retrieved, Workspace};
use crate::conflict::{Conflict, ConflictType};
use crate::db::LocalItem;
use crate::errors::WorkspaceError;
use crate::events::{EventObserver, WorkspaceEvent};
use crate::models::{ChangeType, ItemSpec, RecursionType, VersionSpec};
use crate::pending::PendingChange;
use crate::repository::ServerItem;
use crate::status::{GetOperation, GetOperationKind, GetStatus, OperationOutcome};

#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    /// Items to get; the whole workspace when empty.
    pub specs: Vec<ItemSpec>,
    pub version: VersionSpec,
    /// Download items even when the workspace says they are current.
    pub force: bool,
    /// Replace local files that are in the way or changed without a
    /// pending change.
    pub overwrite: bool,
    pub preview: bool,
}

enum Action {
    /// Put the server version at its local path, moving it from `from` first.
    Fetch {
        item: ServerItem,
        from: Option<PathBuf>,
        content: bool,
    },
    /// Only the workspace's bookkeeping changes.
    Record { item: ServerItem },
    /// The server moved or changed an item that has a pending change which
    /// does not touch its content.
    UpdatePending {
        item: ServerItem,
        pending: PendingChange,
        from: Option<PathBuf>,
        to: PathBuf,
        content: bool,
    },
    Remove {
        item_id: i64,
        local: Option<PathBuf>,
        pending: Option<i64>,
    },
    Conflict(Box<Conflict>),
    Skip(String),
}

struct Planned {
    op: GetOperation,
    action: Action,
}

impl Planned {
    fn sort_key(&self) -> (bool, i64) {
        let depth = self.op.server_item.depth() as i64;
        match self.action {
            // Removals run last, deepest first.
            Action::Remove { .. } => (true, -depth),
            _ => (false, depth),
        }
    }
}

impl Workspace {
    pub fn get(
        &mut self,
        request: &GetRequest,
        observer: &mut dyn EventObserver,
    ) -> Result<GetStatus, WorkspaceError> {
        if request.version == VersionSpec::Workspace {
            return Err(WorkspaceError::InvalidSpec(
                "get needs a server version, not the workspace version".into(),
            ));
        }
        let target = self.repo.resolve_version(&request.version)?;
        let plan = self.plan_get(request, target)?;
        info!(target, items = plan.len(), preview = request.preview, "get planned");
        observer.on_event(&WorkspaceEvent::Planned {
            operation: "get".into(),
            items: plan.len(),
        });

        let mut status = GetStatus::new(target, request.preview);
        let mut vacated = Vec::new();
        for Planned { op, action } in plan {
            let outcome = if request.preview {
                predicted(&action)
            } else {
                match self.apply_get(action, &mut vacated, observer) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(path = %op.server_item, error = %e, "get failed for item");
                        OperationOutcome::Failed(e.to_string())
                    }
                }
            };
            let op = op.with_outcome(outcome);
            observer.on_event(&WorkspaceEvent::Operation(op.clone()));
            status.record(op);
        }

        if !request.preview {
            vacated.sort_by_key(|p: &PathBuf| std::cmp::Reverse(p.components().count()));
            for dir in vacated {
                fs::remove_item(&dir)?;
            }
            self.db
                .insert_history("get", target, &status.status().to_string(), None)?;
        }
        info!(
            target,
            applied = status.applied,
            conflicts = status.conflicts,
            warnings = status.warnings,
            failures = status.failures,
            "get finished"
        );
        Ok(status)
    }

    fn plan_get(&self, request: &GetRequest, target: i64) -> Result<Vec<Planned>, WorkspaceError> {
        let filters = self.scope_filters(&request.specs)?;
        let snapshot = self.snapshot()?;
        let conflicted: HashSet<i64> = self
            .db
            .list_conflicts()?
            .iter()
            .flat_map(|c| [c.item_id, c.their_item_id])
            .flatten()
            .collect();

        let mut server: BTreeMap<i64, ServerItem> = BTreeMap::new();
        for filter in &filters {
            let recursion = match (filter.path.has_wildcard(), filter.recursion) {
                (true, RecursionType::None) => RecursionType::OneLevel,
                (true, _) => RecursionType::Full,
                (false, recursion) => recursion,
            };
            for item in self.repo.items_under(&filter.query_root(), recursion, target)? {
                if filter.matches(&item.path) && self.mappings.is_mapped(&item.path) {
                    server.insert(item.item_id, item);
                }
            }
        }

        let mut ids: BTreeSet<i64> = server.keys().copied().collect();
        for local in snapshot.items.values() {
            let current = snapshot
                .pending_for(local.item_id)
                .map_or(&local.server_item, |p| &p.server_item);
            if filters
                .iter()
                .any(|f| f.matches(&local.server_item) || f.matches(current))
            {
                ids.insert(local.item_id);
            }
        }
        let pending_adds: Vec<&PendingChange> =
            snapshot.pending.iter().filter(|p| p.item_id.is_none()).collect();

        let mut plan = Vec::new();
        for id in ids {
            let local = snapshot.items.get(&id);
            let pending = snapshot.pending_for(id);
            let theirs = match server.get(&id) {
                Some(item) => Some(item.clone()),
                None => self
                    .repo
                    .item_by_id(id, target)?
                    .filter(|i| !i.deleted && self.mappings.is_mapped(&i.path)),
            };

            if conflicted.contains(&id) {
                let differs = match (local, &theirs) {
                    (Some(l), Some(t)) => l.version != t.changeset || l.server_item != t.path,
                    (None, None) => false,
                    _ => true,
                };
                if differs {
                    let path = theirs
                        .as_ref()
                        .map(|t| t.path.clone())
                        .or_else(|| local.map(|l| l.server_item.clone()));
                    if let Some(path) = path {
                        plan.push(Planned {
                            op: GetOperation::new(GetOperationKind::Get, path, target),
                            action: Action::Skip("the item has an unresolved conflict".into()),
                        });
                    }
                }
                continue;
            }

            let planned = match (local, theirs) {
                (None, None) => None,
                (None, Some(item)) => Some(self.plan_new(item, pending, &pending_adds, request)?),
                (Some(local), None) => Some(self.plan_removal(local, pending, target, request)?),
                (Some(local), Some(item)) => self.plan_update(local, pending, item, request)?,
            };
            plan.extend(planned);
        }

        plan.sort_by_key(|p| p.sort_key());
        Ok(plan)
    }

    fn plan_new(
        &self,
        item: ServerItem,
        pending: Option<&PendingChange>,
        pending_adds: &[&PendingChange],
        request: &GetRequest,
    ) -> Result<Planned, WorkspaceError> {
        let local_path = self.local_path(&item.path)?;
        let op = GetOperation::new(GetOperationKind::Get, item.path.clone(), item.changeset)
            .with_local(Some(local_path.clone()));

        if pending.is_some() {
            return Ok(Planned {
                op,
                action: Action::Skip("the item has a pending change but was never retrieved".into()),
            });
        }

        if let Some(add) = pending_adds.iter().find(|p| p.server_item == item.path) {
            let mut conflict = Conflict::new(ConflictType::Namespace, item.item_type, item.path.clone());
            conflict.your_change = add.change_type;
            conflict.your_encoding = add.encoding;
            conflict.their_item_id = Some(item.item_id);
            conflict.their_server_item = Some(item.path.clone());
            conflict.their_change = ChangeType::ADD;
            conflict.their_version = item.changeset;
            conflict.message = format!(
                "{}: you added an item with the same name as one added on the server",
                item.path
            );
            return Ok(Planned {
                op,
                action: Action::Conflict(Box::new(conflict)),
            });
        }

        if item.item_type.is_folder() {
            return Ok(Planned {
                op,
                action: Action::Fetch {
                    item,
                    from: None,
                    content: false,
                },
            });
        }

        let action = match fs::file_hash(&local_path)? {
            None => Action::Fetch {
                item,
                from: None,
                content: true,
            },
            Some(hash) if item.hash.as_deref() == Some(hash.as_str()) => Action::Record { item },
            Some(_) if request.overwrite => Action::Fetch {
                item,
                from: None,
                content: true,
            },
            Some(_) => {
                let mut conflict = Conflict::new(ConflictType::Local, item.item_type, item.path.clone());
                conflict.their_item_id = Some(item.item_id);
                conflict.their_server_item = Some(item.path.clone());
                conflict.their_change = ChangeType::ADD;
                conflict.their_version = item.changeset;
                conflict.your_encoding = item.encoding;
                conflict.message = format!(
                    "{}: a local file that is not in the workspace is in the way",
                    item.path
                );
                Action::Conflict(Box::new(conflict))
            }
        };
        Ok(Planned { op, action })
    }

    fn plan_removal(
        &self,
        local: &LocalItem,
        pending: Option<&PendingChange>,
        target: i64,
        request: &GetRequest,
    ) -> Result<Planned, WorkspaceError> {
        let path = pending.map_or(&local.server_item, |p| &p.server_item).clone();
        let local_path = self.local_path(&path).ok();
        let op = GetOperation::new(GetOperationKind::Delete, path.clone(), target)
            .with_local(local_path.clone());

        let their_delete = |conflict_type: ConflictType, your_change: ChangeType| {
            let mut conflict = Conflict::new(conflict_type, local.item_type, path.clone());
            conflict.item_id = Some(local.item_id);
            conflict.your_change = your_change;
            conflict.your_version = local.version;
            conflict.your_encoding = local.encoding;
            conflict.their_item_id = Some(local.item_id);
            conflict.their_change = ChangeType::DELETE;
            conflict.their_version = target;
            conflict.base_item_id = Some(local.item_id);
            conflict.base_version = local.version;
            conflict
        };

        let action = match pending {
            Some(p) if p.is_delete() => Action::Remove {
                item_id: local.item_id,
                local: local_path,
                pending: Some(p.id),
            },
            Some(p) => {
                let mut conflict = their_delete(ConflictType::Namespace, p.change_type);
                conflict.your_encoding = p.encoding;
                conflict.message = format!("{path}: deleted on the server but you have pending changes");
                Action::Conflict(Box::new(conflict))
            }
            None => {
                let modified = match (&local_path, local.item_type.is_folder()) {
                    (Some(lp), false) if !request.overwrite => {
                        fs::file_hash(lp)?.is_some_and(|h| Some(h) != local.hash)
                    }
                    _ => false,
                };
                if modified {
                    let mut conflict = their_delete(ConflictType::Local, ChangeType::NONE);
                    conflict.message = format!("{path}: deleted on the server but changed locally");
                    Action::Conflict(Box::new(conflict))
                } else {
                    Action::Remove {
                        item_id: local.item_id,
                        local: local_path,
                        pending: None,
                    }
                }
            }
        };
        Ok(Planned { op, action })
    }

    fn plan_update(
        &self,
        local: &LocalItem,
        pending: Option<&PendingChange>,
        item: ServerItem,
        request: &GetRequest,
    ) -> Result<Option<Planned>, WorkspaceError> {
        let current = pending.map_or(&local.server_item, |p| &p.server_item).clone();
        let is_file = !item.item_type.is_folder();
        let content_changed = is_file && item.hash != local.hash;
        let moved = item.path.as_str() != local.server_item.as_str();
        let up_to_date = !content_changed && !moved && item.changeset == local.version;

        let from = self.local_path(&current).ok();
        let to = self.local_path(&item.path)?;
        let kind = match (moved, content_changed) {
            (true, _) => GetOperationKind::Rename,
            (false, true) => GetOperationKind::Replace,
            (false, false) => GetOperationKind::Get,
        };
        let mut op = GetOperation::new(kind, item.path.clone(), item.changeset).with_local(Some(to.clone()));
        if moved {
            op = op.with_source(current.clone());
        }

        let mut their_change = ChangeType::NONE;
        if content_changed {
            their_change = their_change | ChangeType::EDIT;
        }
        if moved {
            their_change = their_change | ChangeType::RENAME;
        }
        let conflict = |conflict_type: ConflictType, your_change: ChangeType, message: String| {
            let mut conflict = Conflict::new(conflict_type, local.item_type, current.clone());
            conflict.item_id = Some(local.item_id);
            conflict.your_change = your_change;
            conflict.your_version = local.version;
            conflict.your_encoding = pending.map_or(local.encoding, |p| p.encoding);
            conflict.their_item_id = Some(item.item_id);
            conflict.their_server_item = Some(item.path.clone());
            conflict.their_change = their_change;
            conflict.their_version = item.changeset;
            conflict.base_item_id = Some(local.item_id);
            conflict.base_version = local.version;
            conflict.message = message;
            Action::Conflict(Box::new(conflict))
        };

        let Some(p) = pending else {
            if up_to_date {
                if request.force && is_file {
                    return Ok(Some(Planned {
                        op,
                        action: Action::Fetch {
                            item,
                            from,
                            content: true,
                        },
                    }));
                }
                return Ok(None);
            }
            if !content_changed && !moved {
                return Ok(Some(Planned {
                    op,
                    action: Action::Record { item },
                }));
            }
            if is_file && !request.overwrite {
                if let Some(from) = &from {
                    let hash = fs::file_hash(from)?;
                    if hash.is_some() && hash != local.hash {
                        let mut action = conflict(
                            ConflictType::Local,
                            ChangeType::NONE,
                            format!("{current}: changed locally without a pending edit"),
                        );
                        if let Action::Conflict(c) = &mut action {
                            c.target_item = moved.then(|| item.path.clone());
                        }
                        return Ok(Some(Planned { op, action }));
                    }
                }
            }
            return Ok(Some(Planned {
                op,
                action: Action::Fetch {
                    item,
                    from,
                    content: content_changed,
                },
            }));
        };

        if up_to_date {
            return Ok(None);
        }
        let edits_content = p
            .change_type
            .intersects(ChangeType::EDIT | ChangeType::MERGE | ChangeType::ROLLBACK | ChangeType::DELETE);

        let action = if p.is_rename() && moved && item.path != p.server_item {
            let mut action = conflict(
                ConflictType::Namespace,
                p.change_type,
                format!("{current}: renamed to {} on the server", item.path),
            );
            if let Action::Conflict(c) = &mut action {
                c.target_item = Some(item.path.clone());
            }
            action
        } else if content_changed && edits_content {
            let mut action = conflict(
                ConflictType::Content,
                p.change_type,
                format!("{current}: a newer version exists on the server"),
            );
            if let Action::Conflict(c) = &mut action {
                c.target_item = (moved && !p.is_rename()).then(|| item.path.clone());
            }
            action
        } else {
            let to = if p.is_rename() || p.is_delete() {
                self.local_path(&p.server_item)?
            } else {
                to
            };
            Action::UpdatePending {
                item,
                pending: p.clone(),
                from: if p.is_delete() { None } else { from },
                to,
                content: content_changed && !p.is_delete(),
            }
        };
        Ok(Some(Planned { op, action }))
    }

    fn apply_get(
        &self,
        action: Action,
        vacated: &mut Vec<PathBuf>,
        observer: &mut dyn EventObserver,
    ) -> Result<OperationOutcome, WorkspaceError> {
        match action {
            Action::Fetch { item, from, content } => {
                let to = self.local_path(&item.path)?;
                if item.item_type.is_folder() {
                    fs::ensure_dir(&to)?;
                    if let Some(from) = from.filter(|f| f != &to) {
                        vacated.push(from);
                    }
                } else {
                    if let Some(from) = from.filter(|f| f != &to && f.exists()) {
                        fs::move_item(&from, &to)?;
                    }
                    if content || !to.exists() {
                        let bytes = self.repo.content(item.item_id, item.changeset)?;
                        fs::write_file(&to, &bytes)?;
                    }
                }
                self.db.upsert_local_item(&retrieved(&item))?;
                Ok(OperationOutcome::Applied)
            }
            Action::Record { item } => {
                self.db.upsert_local_item(&retrieved(&item))?;
                Ok(OperationOutcome::Applied)
            }
            Action::UpdatePending {
                item,
                mut pending,
                from,
                to,
                content,
            } => {
                if let Some(from) = from.filter(|f| f != &to) {
                    if item.item_type.is_folder() {
                        fs::ensure_dir(&to)?;
                        vacated.push(from);
                    } else if from.exists() {
                        fs::move_item(&from, &to)?;
                    }
                }
                if content {
                    let bytes = self.repo.content(item.item_id, item.changeset)?;
                    fs::write_file(&to, &bytes)?;
                }
                let renamed_to_same = pending.is_rename() && item.path == pending.server_item;
                if !pending.is_rename() {
                    pending.server_item = item.path.clone();
                }
                pending.version = item.changeset;
                if renamed_to_same {
                    pending.source_server_item = None;
                    if !pending.remove_change(ChangeType::RENAME) {
                        self.db.delete_pending(pending.id)?;
                        self.db.upsert_local_item(&retrieved(&item))?;
                        return Ok(OperationOutcome::Applied);
                    }
                } else if pending.is_rename() {
                    pending.source_server_item = Some(item.path.clone());
                }
                self.db.save_pending(&pending)?;
                self.db.upsert_local_item(&retrieved(&item))?;
                Ok(OperationOutcome::Applied)
            }
            Action::Remove {
                item_id,
                local,
                pending,
            } => {
                if let Some(local) = local {
                    fs::remove_item(&local)?;
                }
                self.db.delete_local_item(item_id)?;
                if let Some(id) = pending {
                    self.db.delete_pending(id)?;
                }
                debug!(item_id, "removed item from workspace");
                Ok(OperationOutcome::Applied)
            }
            Action::Conflict(conflict) => {
                self.record_conflict(&conflict, observer)?;
                Ok(OperationOutcome::Conflict)
            }
            Action::Skip(message) => Ok(OperationOutcome::Warning(message)),
        }
    }
}

fn predicted(action: &Action) -> OperationOutcome {
    match action {
        Action::Conflict(_) => OperationOutcome::Conflict,
        Action::Skip(message) => OperationOutcome::Warning(message.clone()),
        _ => OperationOutcome::Applied,
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::events::{EventLog, NullObserver};
    use crate::models::CommandStatus;
    use crate::repository::{CommitChange, Repository};

    fn spec(path: &str) -> ItemSpec {
        ItemSpec::new(path, RecursionType::None)
    }

    #[test]
    fn test_initial_get_downloads_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, mut ws) = setup(dir.path());
        let mut log = EventLog::default();
        let status = ws.get(&GetRequest::default(), &mut log).unwrap();

        assert_eq!(status.applied, 4);
        assert_eq!(status.status(), CommandStatus::Success);
        let work = dir.path().join("work");
        assert_eq!(fs::read_file(&work.join("a.txt")).unwrap(), b"one\ntwo\nthree\n");
        assert_eq!(fs::read_file(&work.join("src").join("b.txt")).unwrap(), b"bee\n");
        assert_eq!(ws.local_items().unwrap().len(), 4);
        assert!(matches!(log.events[0], WorkspaceEvent::Planned { items: 4, .. }));

        let again = ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        assert!(again.no_action_needed);
    }

    #[test]
    fn test_preview_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, mut ws) = setup(dir.path());
        let request = GetRequest {
            preview: true,
            ..Default::default()
        };
        let status = ws.get(&request, &mut NullObserver).unwrap();
        assert_eq!(status.applied, 4);
        assert!(status.preview);
        assert!(!dir.path().join("work").exists());
        assert!(ws.local_items().unwrap().is_empty());
    }

    #[test]
    fn test_get_older_version_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, mut ws) = setup(dir.path());
        let first = repo.latest_changeset().unwrap();
        edit(repo.as_ref(), "$/P/a.txt", "changed\n");
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        let path = dir.path().join("work").join("a.txt");
        assert_eq!(fs::read_file(&path).unwrap(), b"changed\n");

        let request = GetRequest {
            version: VersionSpec::Changeset(first),
            ..Default::default()
        };
        let status = ws.get(&request, &mut NullObserver).unwrap();
        assert_eq!(status.applied, 1);
        assert_eq!(fs::read_file(&path).unwrap(), b"one\ntwo\nthree\n");
    }

    #[test]
    fn test_pending_edit_and_newer_version_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, mut ws) = setup(dir.path());
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        ws.pend_edit(&[spec("$/P/a.txt")], &mut NullObserver).unwrap();
        edit(repo.as_ref(), "$/P/a.txt", "server\n");

        let status = ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        assert_eq!(status.conflicts, 1);
        assert_eq!(status.status(), CommandStatus::Failure);
        let conflicts = ws.conflicts(&[]).unwrap();
        assert_eq!(conflicts[0].conflict_type, ConflictType::Content);
        assert_eq!(conflicts[0].their_change, ChangeType::EDIT);

        // A second get leaves the conflicted item alone.
        let again = ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        assert_eq!(again.warnings, 1);
        assert_eq!(ws.conflicts(&[]).unwrap().len(), 1);
    }

    #[test]
    fn test_untracked_file_in_the_way() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, mut ws) = setup(dir.path());
        fs::write_file(&dir.path().join("work").join("a.txt"), b"mine\n").unwrap();

        let status = ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        assert_eq!(status.conflicts, 1);
        assert_eq!(status.status(), CommandStatus::PartialSuccess);
        assert_eq!(ws.conflicts(&[]).unwrap()[0].conflict_type, ConflictType::Local);
        assert_eq!(
            fs::read_file(&dir.path().join("work").join("a.txt")).unwrap(),
            b"mine\n"
        );
    }

    #[test]
    fn test_overwrite_replaces_untracked_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, mut ws) = setup(dir.path());
        let path = dir.path().join("work").join("a.txt");
        fs::write_file(&path, b"mine\n").unwrap();
        let request = GetRequest {
            overwrite: true,
            ..Default::default()
        };
        let status = ws.get(&request, &mut NullObserver).unwrap();
        assert_eq!(status.conflicts, 0);
        assert_eq!(fs::read_file(&path).unwrap(), b"one\ntwo\nthree\n");
    }

    #[test]
    fn test_server_rename_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, mut ws) = setup(dir.path());
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();

        let latest = repo.latest_changeset().unwrap();
        let src_folder = repo.item_at(&sp("$/P/src"), latest).unwrap().unwrap();
        let child = repo.item_at(&sp("$/P/src/b.txt"), latest).unwrap().unwrap();
        let a = repo.item_at(&sp("$/P/a.txt"), latest).unwrap().unwrap();
        repo.commit(
            "bob",
            "move and delete",
            &[
                CommitChange {
                    item_id: Some(src_folder.item_id),
                    ..folder("$/P/lib")
                },
                CommitChange {
                    item_id: Some(child.item_id),
                    ..file("$/P/lib/b.txt", "bee\n")
                },
                CommitChange {
                    item_id: Some(a.item_id),
                    deleted: true,
                    ..file("$/P/a.txt", "")
                },
            ],
        )
        .unwrap();

        let status = ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        assert_eq!(status.failures, 0);
        let work = dir.path().join("work");
        assert!(!work.join("a.txt").exists());
        assert!(!work.join("src").exists());
        assert_eq!(fs::read_file(&work.join("lib").join("b.txt")).unwrap(), b"bee\n");
    }

    #[test]
    fn test_server_delete_of_edited_item_is_namespace_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, mut ws) = setup(dir.path());
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        ws.pend_edit(&[spec("$/P/a.txt")], &mut NullObserver).unwrap();
        let latest = repo.latest_changeset().unwrap();
        let a = repo.item_at(&sp("$/P/a.txt"), latest).unwrap().unwrap();
        repo.commit(
            "bob",
            "delete",
            &[CommitChange {
                item_id: Some(a.item_id),
                deleted: true,
                ..file("$/P/a.txt", "")
            }],
        )
        .unwrap();

        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        let conflicts = ws.conflicts(&[]).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::Namespace);
        assert!(conflicts[0].their_deleted());
    }

    #[test]
    fn test_server_add_over_pending_add() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, mut ws) = setup(dir.path());
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        let mine = dir.path().join("work").join("new.txt");
        fs::write_file(&mine, b"mine\n").unwrap();
        ws.pend_add(&[mine.clone()], false, &mut NullObserver).unwrap();
        repo.commit("bob", "add", &[file("$/P/new.txt", "theirs\n")]).unwrap();

        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        let conflicts = ws.conflicts(&[]).unwrap();
        assert_eq!(conflicts[0].conflict_type, ConflictType::Namespace);
        assert_eq!(conflicts[0].your_change, ChangeType::ADD);
        assert_eq!(fs::read_file(&mine).unwrap(), b"mine\n");
    }

    #[test]
    fn test_rejects_workspace_version() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, mut ws) = setup(dir.path());
        let request = GetRequest {
            version: VersionSpec::Workspace,
            ..Default::default()
        };
        assert!(ws.get(&request, &mut NullObserver).is_err());
    }
}
