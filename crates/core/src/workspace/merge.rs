//! Merging a range of changes from one folder into another, and rolling a
//! range of changes back.
//!
//! Both plan one action per changed item and then apply the plan, like a
//! get. Results land as pending changes marked `merge` or `rollback`; an
//! item the workspace changed in the meantime becomes a Merge conflict.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::{fs, Entry, Snapshot, Workspace};
use crate::conflict::{Conflict, ConflictType};
use crate::errors::WorkspaceError;
use crate::events::{EventObserver, NullObserver, WorkspaceEvent};
use crate::models::{ChangeType, ItemSpec, RecursionType, VersionRange, VersionSpec};
use crate::paths::ServerPath;
use crate::pending::PendingChange;
use crate::repository::{ItemHistory, ServerItem};
use crate::status::{GetOperation, GetOperationKind, GetStatus, OperationOutcome};

#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub source: String,
    pub target: String,
    /// Changesets to merge; from the first changeset when `from` is unset.
    pub range: VersionRange,
    pub recursion: RecursionType,
    pub preview: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RollbackRequest {
    /// Items to roll back; the whole workspace when empty.
    pub specs: Vec<ItemSpec>,
    /// Changesets to undo; a single changeset when `from` is unset.
    pub range: VersionRange,
    pub preview: bool,
}

enum Action {
    /// Bring an item into the workspace as a pending branch or undelete.
    Create {
        item: ServerItem,
        to: ServerPath,
        change: ChangeType,
        item_id: Option<i64>,
        version: i64,
    },
    /// Pend a change on an item already in the workspace.
    Pend {
        entry: Box<Entry>,
        change: ChangeType,
        content: Option<ServerItem>,
        rename_to: Option<ServerPath>,
        source: Option<ServerPath>,
    },
    Conflict(Box<Conflict>),
    Skip(String),
}

struct Planned {
    op: GetOperation,
    action: Action,
}

impl Planned {
    fn new(op: GetOperation, action: Action) -> Self {
        Self { op, action }
    }

    fn sort_key(&self) -> (bool, i64) {
        let depth = self.op.server_item.depth() as i64;
        match &self.action {
            Action::Pend { change, .. } if change.contains(ChangeType::DELETE) => (true, -depth),
            _ => (false, depth),
        }
    }
}

/// The parts of a Merge conflict that differ between merge and rollback.
struct Diverged<'a> {
    entry: &'a Entry,
    their: Option<&'a ServerItem>,
    their_item_id: i64,
    their_change: ChangeType,
    their_version: i64,
    base: Option<(i64, i64)>,
    target: Option<ServerPath>,
}

impl Diverged<'_> {
    fn into_conflict(self) -> Conflict {
        let entry = self.entry;
        let mut c = Conflict::new(ConflictType::Merge, entry.item_type, entry.path.clone());
        c.item_id = entry.item_id();
        if let Some(p) = &entry.pending {
            c.your_change = p.change_type;
            c.your_encoding = p.encoding;
            c.your_version = p.version;
        } else if let Some(l) = &entry.local {
            c.your_encoding = l.encoding;
            c.your_version = l.version;
        }
        c.their_item_id = Some(self.their_item_id);
        c.their_server_item = self.their.map(|i| i.path.clone());
        c.their_change = self.their_change;
        c.their_version = self.their_version;
        if let Some((id, version)) = self.base {
            c.base_item_id = Some(id);
            c.base_version = version;
        }
        c.target_item = self.target;
        c
    }
}

impl Workspace {
    pub fn merge(
        &mut self,
        request: &MergeRequest,
        observer: &mut dyn EventObserver,
    ) -> Result<GetStatus, WorkspaceError> {
        let source = self.resolve_server_path(&request.source)?;
        let target = self.resolve_server_path(&request.target)?;
        if source.is_same_or_descendant_of(&target) || target.is_same_or_descendant_of(&source) {
            return Err(WorkspaceError::InvalidSpec(format!(
                "cannot merge {source} into {target}: one contains the other"
            )));
        }
        let (from, to) = self.resolve_range(&request.range, 1)?;

        let snapshot = self.snapshot()?;
        let conflicted = self.conflicted_items()?;
        let mut plan = Vec::new();
        for h in self.repo.changed_items(&source, request.recursion, from, to)? {
            if let Some(planned) = self.plan_merge_item(&h, &source, &target, from, to, &snapshot, &conflicted)? {
                plan.push(planned);
            }
        }
        info!(%source, %target, from, to, items = plan.len(), "merge planned");
        self.run_plan("merge", plan, to, request.preview, observer)
    }

    pub fn rollback(
        &mut self,
        request: &RollbackRequest,
        observer: &mut dyn EventObserver,
    ) -> Result<GetStatus, WorkspaceError> {
        let to = self.resolve_one(&request.range.to)?;
        let (from, to) = self.resolve_range(&request.range, to)?;
        let filters = self.scope_filters(&request.specs)?;

        let snapshot = self.snapshot()?;
        let conflicted = self.conflicted_items()?;
        let mut seen = HashSet::new();
        let mut plan = Vec::new();
        for filter in &filters {
            let recursion = if filter.path.has_wildcard() {
                RecursionType::Full
            } else {
                filter.recursion
            };
            for h in self.repo.changed_items(&filter.query_root(), recursion, from, to)? {
                let in_scope = [&h.before, &h.after]
                    .into_iter()
                    .flatten()
                    .any(|i| filter.matches(&i.path));
                if !in_scope || !seen.insert(h.item_id) {
                    continue;
                }
                if let Some(planned) = self.plan_rollback_item(&h, from, to, &snapshot, &conflicted)? {
                    plan.push(planned);
                }
            }
        }
        info!(from, to, items = plan.len(), "rollback planned");
        self.run_plan("rollback", plan, to, request.preview, observer)
    }

    fn resolve_one(&self, spec: &VersionSpec) -> Result<i64, WorkspaceError> {
        if *spec == VersionSpec::Workspace {
            return Err(WorkspaceError::InvalidSpec(
                "a server version is required, not the workspace version".into(),
            ));
        }
        Ok(self.repo.resolve_version(spec)?)
    }

    fn resolve_range(&self, range: &VersionRange, default_from: i64) -> Result<(i64, i64), WorkspaceError> {
        let to = self.resolve_one(&range.to)?;
        let from = match &range.from {
            Some(spec) => self.resolve_one(spec)?,
            None => default_from,
        };
        if from > to || from < 1 {
            return Err(WorkspaceError::InvalidSpec(format!("invalid version range C{from}~C{to}")));
        }
        Ok((from, to))
    }

    fn conflicted_items(&self) -> Result<HashSet<i64>, WorkspaceError> {
        Ok(self
            .db
            .list_conflicts()?
            .iter()
            .filter_map(|c| c.item_id)
            .collect())
    }

    /// Whether the workspace copy of `entry` matches `hash`. Folders always do.
    fn local_matches(&self, entry: &Entry, hash: Option<&String>) -> Result<bool, WorkspaceError> {
        if entry.item_type.is_folder() {
            return Ok(true);
        }
        let local = fs::file_hash(&self.local_path(&entry.path)?)?;
        Ok(local.as_ref() == hash)
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_merge_item(
        &self,
        h: &ItemHistory,
        source: &ServerPath,
        target: &ServerPath,
        from: i64,
        to: i64,
        snapshot: &Snapshot,
        conflicted: &HashSet<i64>,
    ) -> Result<Option<Planned>, WorkspaceError> {
        let map = |p: &ServerPath| p.rebase(source, target);
        let merge_op = |kind, path: ServerPath, their: &ServerPath| {
            GetOperation::new(kind, path, to).with_source(their.clone())
        };

        let planned = match (&h.before, &h.after) {
            (None, None) => return Ok(None),
            (None, Some(after)) => {
                let Some(dest) = map(&after.path) else {
                    return Ok(None);
                };
                let op = merge_op(GetOperationKind::Branch, dest.clone(), &after.path)
                    .with_local(self.local_path(&dest).ok());
                match snapshot.entry_at(&dest) {
                    Some(existing) => {
                        let conflict = Diverged {
                            entry: &existing,
                            their: Some(after),
                            their_item_id: after.item_id,
                            their_change: ChangeType::MERGE | ChangeType::BRANCH,
                            their_version: to,
                            base: None,
                            target: None,
                        }
                        .into_conflict();
                        Planned::new(op, Action::Conflict(Box::new(conflict)))
                    }
                    None => Planned::new(
                        op,
                        Action::Create {
                            item: after.clone(),
                            to: dest,
                            change: ChangeType::MERGE | ChangeType::BRANCH,
                            item_id: None,
                            version: 0,
                        },
                    ),
                }
            }
            (Some(before), after) => {
                let Some(dest) = map(&before.path) else {
                    return Ok(None);
                };
                let Some(entry) = snapshot.entry_at(&dest) else {
                    let op = merge_op(GetOperationKind::Merge, dest.clone(), &before.path);
                    let message = format!("{dest} is not in the workspace; get it before merging");
                    return Ok(Some(Planned::new(op, Action::Skip(message))));
                };
                let op = |kind| {
                    merge_op(kind, entry.path.clone(), &before.path)
                        .with_local(self.local_path(&entry.path).ok())
                };
                if entry.item_id().is_some_and(|id| conflicted.contains(&id)) {
                    let message = format!("{} has an unresolved conflict", entry.path);
                    return Ok(Some(Planned::new(op(GetOperationKind::Merge), Action::Skip(message))));
                }

                match after {
                    None => {
                        let diverged = entry.pending.is_some()
                            || !self.local_matches(&entry, before.hash.as_ref())?;
                        if diverged {
                            let conflict = Diverged {
                                entry: &entry,
                                their: None,
                                their_item_id: before.item_id,
                                their_change: ChangeType::MERGE | ChangeType::DELETE,
                                their_version: to,
                                base: Some((before.item_id, from - 1)),
                                target: None,
                            }
                            .into_conflict();
                            Planned::new(op(GetOperationKind::Delete), Action::Conflict(Box::new(conflict)))
                        } else {
                            Planned::new(
                                op(GetOperationKind::Delete),
                                Action::Pend {
                                    entry: Box::new(entry.clone()),
                                    change: ChangeType::MERGE | ChangeType::DELETE,
                                    content: None,
                                    rename_to: None,
                                    source: Some(before.path.clone()),
                                },
                            )
                        }
                    }
                    Some(after) => {
                        let rename_to = if before.path.as_str() != after.path.as_str() {
                            map(&after.path).filter(|p| p.as_str() != entry.path.as_str())
                        } else {
                            None
                        };
                        let kind = if rename_to.is_some() {
                            GetOperationKind::Rename
                        } else {
                            GetOperationKind::Merge
                        };
                        let edited = !after.item_type.is_folder() && before.hash != after.hash;
                        let yours_edited = entry
                            .pending
                            .as_ref()
                            .is_some_and(|p| p.change_type.intersects(ChangeType::EDIT | ChangeType::DELETE));

                        let mut content = None;
                        if edited && !self.local_matches(&entry, after.hash.as_ref())? {
                            if !yours_edited && self.local_matches(&entry, before.hash.as_ref())? {
                                content = Some(after.clone());
                            } else {
                                let mut their_change = ChangeType::MERGE | ChangeType::EDIT;
                                if rename_to.is_some() {
                                    their_change = their_change | ChangeType::RENAME;
                                }
                                let conflict = Diverged {
                                    entry: &entry,
                                    their: Some(after),
                                    their_item_id: after.item_id,
                                    their_change,
                                    their_version: to,
                                    base: Some((before.item_id, from - 1)),
                                    target: rename_to,
                                }
                                .into_conflict();
                                return Ok(Some(Planned::new(op(kind), Action::Conflict(Box::new(conflict)))));
                            }
                        }
                        let change = if content.is_some() {
                            ChangeType::MERGE | ChangeType::EDIT
                        } else {
                            ChangeType::MERGE
                        };
                        Planned::new(
                            op(kind),
                            Action::Pend {
                                entry: Box::new(entry.clone()),
                                change,
                                content,
                                rename_to,
                                source: Some(after.path.clone()),
                            },
                        )
                    }
                }
            }
        };
        Ok(Some(planned))
    }

    fn plan_rollback_item(
        &self,
        h: &ItemHistory,
        from: i64,
        to: i64,
        snapshot: &Snapshot,
        conflicted: &HashSet<i64>,
    ) -> Result<Option<Planned>, WorkspaceError> {
        let entry = snapshot
            .entries()
            .into_iter()
            .find(|e| e.item_id() == Some(h.item_id));
        let before_range = from - 1;

        // Deleted in the range: bring it back.
        if let (Some(before), None) = (&h.before, &h.after) {
            let op = GetOperation::new(GetOperationKind::Undelete, before.path.clone(), before_range)
                .with_local(self.local_path(&before.path).ok());
            if entry.is_some() {
                return Ok(None);
            }
            if snapshot.entry_at(&before.path).is_some() {
                let message = format!("{} is in use by another item", before.path);
                return Ok(Some(Planned::new(op, Action::Skip(message))));
            }
            let latest = self.repo.latest_changeset()?;
            let version = self
                .repo
                .item_by_id(before.item_id, latest)?
                .map_or(to, |i| i.changeset);
            return Ok(Some(Planned::new(
                op,
                Action::Create {
                    item: before.clone(),
                    to: before.path.clone(),
                    change: ChangeType::ROLLBACK | ChangeType::UNDELETE,
                    item_id: Some(before.item_id),
                    version,
                },
            )));
        }

        let Some(after) = &h.after else {
            return Ok(None);
        };
        let Some(entry) = entry else {
            let op = GetOperation::new(GetOperationKind::Rollback, after.path.clone(), before_range);
            let message = format!("{} is not in the workspace", after.path);
            return Ok(Some(Planned::new(op, Action::Skip(message))));
        };
        let op = |kind| {
            GetOperation::new(kind, entry.path.clone(), before_range)
                .with_local(self.local_path(&entry.path).ok())
        };
        if conflicted.contains(&h.item_id) {
            let message = format!("{} has an unresolved conflict", entry.path);
            return Ok(Some(Planned::new(op(GetOperationKind::Rollback), Action::Skip(message))));
        }

        let Some(before) = &h.before else {
            // Added in the range: delete it again.
            let diverged = entry.pending.is_some() || !self.local_matches(&entry, after.hash.as_ref())?;
            let action = if diverged {
                let conflict = Diverged {
                    entry: &entry,
                    their: None,
                    their_item_id: h.item_id,
                    their_change: ChangeType::ROLLBACK | ChangeType::DELETE,
                    their_version: before_range,
                    base: Some((h.item_id, to)),
                    target: None,
                }
                .into_conflict();
                Action::Conflict(Box::new(conflict))
            } else {
                Action::Pend {
                    entry: Box::new(entry.clone()),
                    change: ChangeType::ROLLBACK | ChangeType::DELETE,
                    content: None,
                    rename_to: None,
                    source: None,
                }
            };
            return Ok(Some(Planned::new(op(GetOperationKind::Delete), action)));
        };

        let rename_to = (before.path.as_str() != after.path.as_str()
            && entry.path.as_str() != before.path.as_str())
        .then(|| before.path.clone());
        let kind = if rename_to.is_some() {
            GetOperationKind::Rename
        } else {
            GetOperationKind::Rollback
        };
        let edited = !after.item_type.is_folder() && before.hash != after.hash;
        let yours_edited = entry
            .pending
            .as_ref()
            .is_some_and(|p| p.change_type.intersects(ChangeType::EDIT | ChangeType::DELETE));

        let mut content = None;
        if edited && !self.local_matches(&entry, before.hash.as_ref())? {
            if !yours_edited && self.local_matches(&entry, after.hash.as_ref())? {
                content = Some(before.clone());
            } else {
                let mut their_change = ChangeType::ROLLBACK | ChangeType::EDIT;
                if rename_to.is_some() {
                    their_change = their_change | ChangeType::RENAME;
                }
                let conflict = Diverged {
                    entry: &entry,
                    their: Some(before),
                    their_item_id: h.item_id,
                    their_change,
                    their_version: before_range,
                    base: Some((h.item_id, to)),
                    target: rename_to,
                }
                .into_conflict();
                return Ok(Some(Planned::new(op(kind), Action::Conflict(Box::new(conflict)))));
            }
        }
        if content.is_none() && rename_to.is_none() {
            debug!(path = %entry.path, "nothing to roll back");
            return Ok(None);
        }
        let change = if content.is_some() {
            ChangeType::ROLLBACK | ChangeType::EDIT
        } else {
            ChangeType::ROLLBACK
        };
        Ok(Some(Planned::new(
            op(kind),
            Action::Pend {
                entry: Box::new(entry.clone()),
                change,
                content,
                rename_to,
                source: None,
            },
        )))
    }

    fn run_plan(
        &mut self,
        operation: &str,
        mut plan: Vec<Planned>,
        version: i64,
        preview: bool,
        observer: &mut dyn EventObserver,
    ) -> Result<GetStatus, WorkspaceError> {
        plan.sort_by_key(Planned::sort_key);
        observer.on_event(&WorkspaceEvent::Planned {
            operation: operation.to_string(),
            items: plan.len(),
        });

        let mut status = GetStatus::new(version, preview);
        for Planned { op, action } in plan {
            let outcome = if preview {
                match action {
                    Action::Skip(message) => OperationOutcome::Warning(message),
                    Action::Conflict(_) => OperationOutcome::Conflict,
                    _ => OperationOutcome::Applied,
                }
            } else {
                match self.apply_merge(action, version, observer) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(path = %op.server_item, error = %e, "{operation} failed for item");
                        OperationOutcome::Failed(e.to_string())
                    }
                }
            };
            let op = op.with_outcome(outcome);
            observer.on_event(&WorkspaceEvent::Operation(op.clone()));
            status.record(op);
        }

        if !preview {
            self.db
                .insert_history(operation, version, &status.status().to_string(), None)?;
        }
        info!(
            operation,
            applied = status.applied,
            conflicts = status.conflicts,
            warnings = status.warnings,
            failures = status.failures,
            "{operation} finished"
        );
        Ok(status)
    }

    fn apply_merge(
        &mut self,
        action: Action,
        version: i64,
        observer: &mut dyn EventObserver,
    ) -> Result<OperationOutcome, WorkspaceError> {
        match action {
            Action::Create {
                item,
                to,
                change,
                item_id,
                version: pending_version,
            } => {
                let local = self.local_path(&to)?;
                if item.item_type.is_folder() {
                    fs::ensure_dir(&local)?;
                } else {
                    let bytes = self.repo.content(item.item_id, item.changeset)?;
                    fs::write_file(&local, &bytes)?;
                }
                let mut pending =
                    PendingChange::new(item_id, to.clone(), change, item.item_type, item.encoding, pending_version);
                if change.contains(ChangeType::MERGE) {
                    pending.merge_source = Some(item.path.clone());
                    pending.merge_version = Some(version);
                }
                self.db.save_pending(&pending)?;
                observer.on_event(&WorkspaceEvent::Pended { path: to, change });
                Ok(OperationOutcome::Applied)
            }
            Action::Pend {
                entry,
                change,
                content,
                rename_to,
                source,
            } => {
                let local = self.local_path(&entry.path)?;
                if change.contains(ChangeType::DELETE) {
                    fs::remove_item(&local)?;
                } else if let Some(item) = &content {
                    let bytes = self.repo.content(item.item_id, item.changeset)?;
                    fs::write_file(&local, &bytes)?;
                }

                let mut pending = match (&entry.pending, &entry.local) {
                    (Some(p), _) => p.clone(),
                    (None, Some(l)) => PendingChange::new(
                        Some(l.item_id),
                        entry.path.clone(),
                        ChangeType::NONE,
                        l.item_type,
                        l.encoding,
                        l.version,
                    ),
                    (None, None) => return Err(WorkspaceError::NotVersioned(entry.path.to_string())),
                };
                if !pending.add_change(change) {
                    // Deleting a pending branch cancels it.
                    if pending.id != 0 {
                        self.db.delete_pending(pending.id)?;
                    }
                    observer.on_event(&WorkspaceEvent::Undone { path: entry.path.clone() });
                    return Ok(OperationOutcome::Applied);
                }
                if let Some(content) = &content {
                    pending.encoding = content.encoding;
                }
                if let Some(source) = source {
                    pending.merge_source = Some(source);
                    pending.merge_version = Some(version);
                }
                self.db.save_pending(&pending)?;
                observer.on_event(&WorkspaceEvent::Pended {
                    path: entry.path.clone(),
                    change: pending.change_type,
                });

                if let Some(to) = rename_to {
                    self.pend_rename(entry.path.as_str(), to.as_str(), &mut NullObserver)?;
                    observer.on_event(&WorkspaceEvent::Pended {
                        path: to,
                        change: pending.change_type | ChangeType::RENAME,
                    });
                }
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
