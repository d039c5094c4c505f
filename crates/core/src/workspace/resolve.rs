//! Applying one resolution to one conflict.
//!
//! Each conflict type has its own handler. A handler either finishes the
//! resolution (the record is then deleted, along with any conflict it
//! settles as a side effect) or fails with a [`ResolveError`]: recoverable
//! when only this conflict is stuck, fatal when nothing else can work.

use tracing::{debug, info, warn};

use super::pend::check_rename;
use super::{fs, retrieved, Workspace};
use crate::conflict::{Conflict, ConflictType, EncodingStrategy, MergeSide, Merger, Resolution};
use crate::encoding::FileEncoding;
use crate::errors::{CoreError, ResolveError, WorkspaceError};
use crate::events::NullObserver;
use crate::models::ChangeType;
use crate::paths::ServerPath;
use crate::pending::PendingChange;
use crate::repository::ServerItem;
use crate::tool::MergeInputs;

const SAVEPOINT: &str = "resolve_conflict";

/// Resolve `conflict` with the resolution it carries. Returns the ids of
/// every conflict that is now gone.
///
/// A failed attempt leaves the workspace as it was: database changes are
/// rolled back and the conflict's local files are restored.
pub(super) fn resolve(ws: &mut Workspace, conflict: &Conflict) -> Result<Vec<i64>, ResolveError> {
    debug!(id = conflict.id, resolution = %conflict.resolution, "resolving conflict");
    let touched = [
        Some(&conflict.your_server_item),
        conflict.target_item.as_ref(),
        conflict.their_server_item.as_ref(),
        conflict.options.new_path.as_ref(),
    ];
    let backup = fs::FileBackup::capture(
        touched
            .into_iter()
            .flatten()
            .filter_map(|path| ws.local_path(path).ok()),
    );

    ws.db.begin_savepoint(SAVEPOINT)?;
    match apply(ws, conflict) {
        Ok(resolved) => {
            ws.db.release_savepoint(SAVEPOINT)?;
            Ok(resolved)
        }
        Err(e) => {
            if let Err(rollback) = ws.db.rollback_savepoint(SAVEPOINT) {
                warn!(id = conflict.id, error = %rollback, "could not roll back the failed resolution");
            }
            backup.restore();
            Err(e)
        }
    }
}

fn apply(ws: &mut Workspace, conflict: &Conflict) -> Result<Vec<i64>, ResolveError> {
    match (conflict.resolution, conflict.conflict_type) {
        (Resolution::None, _) => {
            return Err(ResolveError::recoverable("no resolution was chosen"));
        }
        (Resolution::DeleteConflict, _) => {}
        (_, ConflictType::Content) => ws.resolve_content(conflict)?,
        (_, ConflictType::Merge) => ws.resolve_merge(conflict)?,
        (_, ConflictType::Namespace) => ws.resolve_namespace(conflict)?,
        (_, ConflictType::Local) => ws.resolve_local(conflict)?,
    }

    ws.db.delete_conflict(conflict.id)?;
    let mut resolved = vec![conflict.id];

    let removes_subtree = conflict.item_type.is_folder()
        && conflict.their_deleted()
        && matches!(conflict.resolution, Resolution::AcceptTheirs | Resolution::OverwriteLocal);
    for other in ws.db.list_conflicts()? {
        let same_item = conflict.item_id.is_some() && other.item_id == conflict.item_id;
        let below = removes_subtree && other.your_server_item.is_descendant_of(&conflict.your_server_item);
        if same_item || below {
            ws.db.delete_conflict(other.id)?;
            resolved.push(other.id);
        }
    }
    info!(
        id = conflict.id,
        path = %conflict.your_server_item,
        resolution = %conflict.resolution,
        cascaded = resolved.len() - 1,
        "conflict resolved"
    );
    Ok(resolved)
}

/// What a merge resolution does to the local copy.
enum LocalWrite {
    Keep,
    Remove,
    Server(ServerItem),
    Content(Vec<u8>),
}

/// Name clashes and missing items only block this conflict; storage and
/// I/O failures stop the run.
fn soft(e: WorkspaceError) -> ResolveError {
    match e {
        WorkspaceError::AlreadyExists(_)
        | WorkspaceError::InvalidSpec(_)
        | WorkspaceError::NotVersioned(_)
        | WorkspaceError::NotMapped(_) => ResolveError::recoverable(e.to_string()),
        other => other.into(),
    }
}

/// Point a pending change at the server item's committed path, keeping or
/// dropping the rename bit. Returns `false` when nothing is left pending.
fn rebase_on(pending: &mut PendingChange, item: &ServerItem) -> bool {
    pending.version = item.changeset;
    if pending.server_item.as_str() == item.path.as_str() {
        pending.source_server_item = None;
        pending.remove_change(ChangeType::RENAME)
    } else {
        pending.source_server_item = Some(item.path.clone());
        pending.add_change(ChangeType::RENAME)
    }
}

impl Workspace {
    fn server_state(&self, item_id: Option<i64>, version: i64) -> Result<Option<ServerItem>, ResolveError> {
        let Some(id) = item_id else {
            return Ok(None);
        };
        Ok(self.repo.item_by_id(id, version)?.filter(|i| !i.deleted))
    }

    fn their_item(&self, conflict: &Conflict) -> Result<Option<ServerItem>, ResolveError> {
        self.server_state(conflict.their_item_id, conflict.their_version)
    }

    fn save_or_drop(&self, pending: &PendingChange, keep: bool) -> Result<(), ResolveError> {
        if keep {
            self.db.save_pending(pending)?;
        } else if pending.id != 0 {
            self.db.delete_pending(pending.id)?;
        }
        Ok(())
    }

    fn write_server_content(&self, item: &ServerItem, path: &ServerPath) -> Result<(), ResolveError> {
        let local = self.local_path(path).map_err(soft)?;
        if item.item_type.is_folder() {
            fs::ensure_dir(&local)?;
        } else {
            let bytes = self.repo.content(item.item_id, item.changeset)?;
            fs::write_file(&local, &bytes)?;
        }
        Ok(())
    }

    /// Merge the file at `conflict.your_server_item` with their content,
    /// either in-process or with the configured tool.
    fn merged_content(&self, conflict: &Conflict) -> Result<(Vec<u8>, FileEncoding), ResolveError> {
        let theirs_item = self
            .their_item(conflict)?
            .ok_or_else(|| ResolveError::recoverable("their side was deleted; there is nothing to merge"))?;
        let base_item = self.server_state(conflict.base_item_id, conflict.base_version)?;

        let local = self.local_path(&conflict.your_server_item).map_err(soft)?;
        let yours = fs::read_file(&local)?;
        let theirs = self.repo.content(theirs_item.item_id, theirs_item.changeset)?;
        let base = match &base_item {
            Some(b) => self.repo.content(b.item_id, b.changeset)?,
            None => Vec::new(),
        };
        let base_encoding = base_item.as_ref().map_or(theirs_item.encoding, |b| b.encoding);

        if conflict.resolution == Resolution::ExternalTool {
            let inputs = MergeInputs {
                file_name: conflict.your_server_item.name(),
                theirs: &theirs,
                yours: &yours,
                base: &base,
                their_label: format!("{};C{}", theirs_item.path, theirs_item.changeset),
                your_label: format!("{};yours", conflict.your_server_item),
                base_label: format!("{};C{}", conflict.your_server_item, conflict.base_version),
            };
            let merged = self.tools.merge(&inputs).map_err(|e| {
                if e.is_fatal() {
                    ResolveError::Fatal(Box::new(CoreError::Tool(e)))
                } else {
                    ResolveError::recoverable(e.to_string())
                }
            })?;
            let encoding = match conflict.options.encoding {
                EncodingStrategy::Default => conflict.your_encoding,
                EncodingStrategy::OverrideExplicit(e) | EncodingStrategy::ConvertExplicit(e) => e,
            };
            return Ok((merged, encoding));
        }

        let merged = Merger::merge_content(
            MergeSide::new(&base, base_encoding),
            MergeSide::new(&yours, conflict.your_encoding),
            MergeSide::new(&theirs, theirs_item.encoding),
            conflict.options.encoding,
        )
        .map_err(|e| ResolveError::recoverable(e.to_string()))?;
        if merged.has_conflicts && !conflict.options.accept_merge_with_conflicts {
            return Err(ResolveError::recoverable(format!(
                "{}: the merge left {} conflicting region(s)",
                conflict.your_server_item,
                merged.conflict_markers.len()
            )));
        }
        Ok((merged.content, merged.encoding))
    }

    fn local_and_pending(
        &self,
        conflict: &Conflict,
    ) -> Result<(crate::db::LocalItem, Option<PendingChange>), ResolveError> {
        let id = conflict
            .item_id
            .ok_or_else(|| ResolveError::recoverable("the conflict does not name a workspace item"))?;
        let local = self.db.get_local_item(id)?.ok_or_else(|| {
            ResolveError::recoverable(format!("{} is no longer in the workspace", conflict.your_server_item))
        })?;
        let pending = self.db.get_pending_for_item(id)?;
        Ok((local, pending))
    }

    // -- content ------------------------------------------------------------

    fn resolve_content(&mut self, conflict: &Conflict) -> Result<(), ResolveError> {
        let (local, pending) = self.local_and_pending(conflict)?;
        let theirs = self.their_item(conflict)?;
        let your_local = self.local_path(&conflict.your_server_item).map_err(soft)?;

        let Some(theirs) = theirs else {
            return match conflict.resolution {
                Resolution::AcceptTheirs => {
                    fs::remove_item(&your_local)?;
                    self.db.delete_local_item(local.item_id)?;
                    if let Some(p) = pending {
                        self.db.delete_pending(p.id)?;
                    }
                    Ok(())
                }
                Resolution::AcceptYours => self.keep_as_add(&local, pending),
                _ => Err(ResolveError::recoverable(
                    "their side was deleted; there is nothing to merge",
                )),
            };
        };

        // Where the item ends up when their location wins.
        let destination = conflict
            .target_item
            .clone()
            .unwrap_or_else(|| conflict.your_server_item.clone());

        match conflict.resolution {
            Resolution::AcceptTheirs => {
                self.write_server_content(&theirs, &destination)?;
                let dest_local = self.local_path(&destination).map_err(soft)?;
                if dest_local != your_local {
                    fs::remove_item(&your_local)?;
                }
                self.db.upsert_local_item(&retrieved(&theirs))?;
                if let Some(mut p) = pending {
                    p.server_item = destination;
                    p.encoding = theirs.encoding;
                    let keep = p.remove_change(ChangeType::EDIT | ChangeType::ENCODING)
                        && rebase_on(&mut p, &theirs);
                    self.save_or_drop(&p, keep)?;
                }
            }
            Resolution::AcceptYours => {
                self.db.upsert_local_item(&retrieved(&theirs))?;
                let mut p = pending.unwrap_or_else(|| {
                    PendingChange::new(
                        Some(local.item_id),
                        conflict.your_server_item.clone(),
                        ChangeType::EDIT,
                        local.item_type,
                        local.encoding,
                        local.version,
                    )
                });
                p.add_change(ChangeType::EDIT);
                let keep = rebase_on(&mut p, &theirs);
                self.save_or_drop(&p, keep)?;
            }
            Resolution::AcceptMerge | Resolution::ExternalTool => {
                let (content, encoding) = self.merged_content(conflict)?;
                let dest_local = self.local_path(&destination).map_err(soft)?;
                fs::write_file(&dest_local, &content)?;
                if dest_local != your_local {
                    fs::remove_item(&your_local)?;
                }
                self.db.upsert_local_item(&retrieved(&theirs))?;
                let mut p = pending.unwrap_or_else(|| {
                    PendingChange::new(
                        Some(local.item_id),
                        destination.clone(),
                        ChangeType::NONE,
                        local.item_type,
                        encoding,
                        theirs.changeset,
                    )
                });
                p.server_item = destination;
                p.encoding = encoding;
                p.add_change(ChangeType::EDIT);
                if encoding != theirs.encoding {
                    p.add_change(ChangeType::ENCODING);
                }
                let keep = rebase_on(&mut p, &theirs);
                self.save_or_drop(&p, keep)?;
            }
            other => {
                return Err(ResolveError::recoverable(format!(
                    "{other} does not apply to content conflicts"
                )))
            }
        }
        Ok(())
    }

    /// Their side deleted the item; keep yours as a new item.
    fn keep_as_add(
        &self,
        local: &crate::db::LocalItem,
        pending: Option<PendingChange>,
    ) -> Result<(), ResolveError> {
        let mut p = pending.unwrap_or_else(|| {
            PendingChange::new(
                None,
                local.server_item.clone(),
                ChangeType::ADD,
                local.item_type,
                local.encoding,
                0,
            )
        });
        p.item_id = None;
        p.change_type = ChangeType::ADD;
        p.source_server_item = None;
        p.version = 0;
        self.db.save_pending(&p)?;
        self.db.delete_local_item(local.item_id)?;
        Ok(())
    }

    // -- merge and rollback -------------------------------------------------

    fn resolve_merge(&mut self, conflict: &Conflict) -> Result<(), ResolveError> {
        let marker = if conflict.is_rollback() {
            ChangeType::ROLLBACK
        } else {
            ChangeType::MERGE
        };
        let your_local = self.local_path(&conflict.your_server_item).map_err(soft)?;

        // Their rename carries over unless you keep your name.
        let renames = conflict.their_renamed()
            && matches!(
                conflict.resolution,
                Resolution::AcceptTheirs | Resolution::AcceptMerge | Resolution::ExternalTool
            );
        let new_name = conflict
            .options
            .new_path
            .clone()
            .or_else(|| renames.then(|| conflict.target_item.clone()).flatten())
            .filter(|to| to.as_str() != conflict.your_server_item.as_str());

        // Everything that can fail on its own is settled before the first
        // write.
        let (change, write) = match conflict.resolution {
            Resolution::AcceptYours => (ChangeType::NONE, LocalWrite::Keep),
            Resolution::AcceptTheirs if conflict.their_deleted() => {
                (ChangeType::DELETE, LocalWrite::Remove)
            }
            Resolution::AcceptTheirs => {
                let theirs = self
                    .their_item(conflict)?
                    .ok_or_else(|| ResolveError::recoverable("their version no longer exists"))?;
                let change = if theirs.item_type.is_folder() {
                    ChangeType::NONE
                } else {
                    ChangeType::EDIT
                };
                (change, LocalWrite::Server(theirs))
            }
            Resolution::AcceptMerge | Resolution::ExternalTool => {
                if conflict.their_deleted() {
                    return Err(ResolveError::recoverable(
                        "their side was deleted; accept yours or theirs instead",
                    ));
                }
                if conflict.item_type.is_folder() {
                    (ChangeType::NONE, LocalWrite::Keep)
                } else {
                    let (content, _) = self.merged_content(conflict)?;
                    (ChangeType::EDIT, LocalWrite::Content(content))
                }
            }
            other => {
                return Err(ResolveError::recoverable(format!(
                    "{other} does not apply to merge conflicts"
                )))
            }
        };
        let mut pending = self.pending_for_target(conflict)?;
        if let Some(to) = &new_name {
            let snapshot = self.snapshot().map_err(soft)?;
            check_rename(&snapshot, &conflict.your_server_item, to).map_err(soft)?;
        }

        match write {
            LocalWrite::Keep => {}
            LocalWrite::Remove => fs::remove_item(&your_local)?,
            LocalWrite::Server(theirs) => self.write_server_content(&theirs, &conflict.your_server_item)?,
            LocalWrite::Content(content) => fs::write_file(&your_local, &content)?,
        }
        let keep = pending.add_change(marker | change);
        pending.merge_source = conflict.their_server_item.clone();
        pending.merge_version = Some(conflict.their_version);
        self.save_or_drop(&pending, keep)?;

        if let Some(to) = new_name {
            self.move_item_to(&conflict.your_server_item, &to, marker)?;
        }
        Ok(())
    }

    fn pending_for_target(&self, conflict: &Conflict) -> Result<PendingChange, ResolveError> {
        if let Some(id) = conflict.item_id {
            if let Some(p) = self.db.get_pending_for_item(id)? {
                return Ok(p);
            }
            let local = self.db.get_local_item(id)?.ok_or_else(|| {
                ResolveError::recoverable(format!("{} is not in the workspace", conflict.your_server_item))
            })?;
            return Ok(PendingChange::new(
                Some(id),
                conflict.your_server_item.clone(),
                ChangeType::NONE,
                local.item_type,
                local.encoding,
                local.version,
            ));
        }
        self.db
            .find_pending_by_path(&conflict.your_server_item)?
            .ok_or_else(|| {
                ResolveError::recoverable(format!("{} has no pending change", conflict.your_server_item))
            })
    }

    /// Rename an item as part of a resolution; everything below a folder
    /// follows, conflicts included.
    fn move_item_to(&mut self, from: &ServerPath, to: &ServerPath, extra: ChangeType) -> Result<(), ResolveError> {
        if from.as_str() == to.as_str() {
            return Ok(());
        }
        self.pend_rename(from.as_str(), to.as_str(), &mut NullObserver)
            .map_err(soft)?;
        if !extra.is_empty() {
            if let Some(mut p) = self.db.find_pending_by_path(to)? {
                p.add_change(extra);
                self.db.save_pending(&p)?;
            }
        }
        Ok(())
    }

    // -- namespace ----------------------------------------------------------

    fn resolve_namespace(&mut self, conflict: &Conflict) -> Result<(), ResolveError> {
        if conflict.their_deleted() {
            return self.resolve_deleted_vs_changed(conflict);
        }
        if conflict.item_id.is_none() {
            return self.resolve_add_vs_add(conflict);
        }
        self.resolve_rename_vs_rename(conflict)
    }

    fn resolve_add_vs_add(&mut self, conflict: &Conflict) -> Result<(), ResolveError> {
        let theirs = self
            .their_item(conflict)?
            .ok_or_else(|| ResolveError::recoverable("their item no longer exists"))?;
        let mut your_add = self
            .db
            .find_pending_by_path(&conflict.your_server_item)?
            .filter(|p| p.item_id.is_none())
            .ok_or_else(|| {
                ResolveError::recoverable(format!("{} has no pending add", conflict.your_server_item))
            })?;

        match conflict.resolution {
            Resolution::AcceptTheirs => {
                self.db.delete_pending(your_add.id)?;
                self.write_server_content(&theirs, &theirs.path)?;
                self.db.upsert_local_item(&retrieved(&theirs))?;
            }
            Resolution::AcceptYours | Resolution::AcceptMerge | Resolution::ExternalTool => {
                // Your add becomes an edit of their item.
                if !theirs.item_type.is_folder() && conflict.resolution != Resolution::AcceptYours {
                    let (content, _) = self.merged_content(conflict)?;
                    let local = self.local_path(&conflict.your_server_item).map_err(soft)?;
                    fs::write_file(&local, &content)?;
                }
                self.db.upsert_local_item(&retrieved(&theirs))?;
                your_add.item_id = Some(theirs.item_id);
                your_add.version = theirs.changeset;
                your_add.item_type = theirs.item_type;
                your_add.change_type = if theirs.item_type.is_folder() {
                    ChangeType::NONE
                } else {
                    ChangeType::EDIT
                };
                let keep = rebase_on(&mut your_add, &theirs);
                self.save_or_drop(&your_add, keep)?;
            }
            Resolution::AcceptYoursRenameTheirs => {
                let new_path = conflict.options.new_path.clone().ok_or_else(|| {
                    ResolveError::recoverable("a new name for their item is required")
                })?;
                self.write_server_content(&theirs, &new_path)?;
                self.db.upsert_local_item(&retrieved(&theirs))?;
                let mut rename = PendingChange::new(
                    Some(theirs.item_id),
                    new_path.clone(),
                    ChangeType::RENAME,
                    theirs.item_type,
                    theirs.encoding,
                    theirs.changeset,
                );
                rename.source_server_item = Some(theirs.path.clone());
                self.db.save_pending(&rename)?;
            }
            other => {
                return Err(ResolveError::recoverable(format!(
                    "{other} does not apply to this conflict"
                )))
            }
        }
        Ok(())
    }

    fn resolve_rename_vs_rename(&mut self, conflict: &Conflict) -> Result<(), ResolveError> {
        let (local, pending) = self.local_and_pending(conflict)?;
        let theirs = self
            .their_item(conflict)?
            .ok_or_else(|| ResolveError::recoverable("their item no longer exists"))?;
        let content_changed = !theirs.item_type.is_folder() && theirs.hash != local.hash;
        let edited = pending
            .as_ref()
            .is_some_and(|p| p.change_type.contains(ChangeType::EDIT));

        let destination = match conflict.resolution {
            Resolution::AcceptTheirs => theirs.path.clone(),
            Resolution::AcceptYours => conflict.your_server_item.clone(),
            Resolution::AcceptMerge => conflict
                .options
                .new_path
                .clone()
                .unwrap_or_else(|| theirs.path.clone()),
            Resolution::AcceptYoursRenameTheirs => {
                return Err(ResolveError::recoverable(
                    "both sides renamed the same item; accept one name or merge to a new one",
                ))
            }
            other => {
                return Err(ResolveError::recoverable(format!(
                    "{other} does not apply to this conflict"
                )))
            }
        };

        // The committed side moves first so the rename below is measured
        // against their name.
        self.db.upsert_local_item(&retrieved(&theirs))?;
        if let Some(mut p) = pending {
            let keep = rebase_on(&mut p, &theirs);
            self.save_or_drop(&p, keep)?;
        }
        self.move_item_to(&conflict.your_server_item, &destination, ChangeType::NONE)?;

        if content_changed && (!edited || conflict.resolution == Resolution::AcceptTheirs) {
            self.write_server_content(&theirs, &destination)?;
            if let Some(mut p) = self.db.get_pending_for_item(theirs.item_id)? {
                let keep = p.remove_change(ChangeType::EDIT);
                self.save_or_drop(&p, keep)?;
            }
        }
        Ok(())
    }

    fn resolve_deleted_vs_changed(&mut self, conflict: &Conflict) -> Result<(), ResolveError> {
        let (local, pending) = self.local_and_pending(conflict)?;
        match conflict.resolution {
            Resolution::AcceptTheirs => {
                let mut doomed: Vec<(crate::db::LocalItem, Option<PendingChange>)> = Vec::new();
                if local.item_type.is_folder() {
                    let snapshot = self.snapshot()?;
                    for entry in snapshot.entries() {
                        if entry.path.is_descendant_of(&conflict.your_server_item) {
                            if let Some(l) = entry.local {
                                doomed.push((l, entry.pending));
                            } else if let Some(p) = entry.pending {
                                self.db.delete_pending(p.id)?;
                            }
                        }
                    }
                }
                doomed.push((local, pending));
                doomed.sort_by(|a, b| b.0.server_item.depth().cmp(&a.0.server_item.depth()));
                for (l, p) in doomed {
                    let path = p.as_ref().map_or(&l.server_item, |p| &p.server_item);
                    if let Ok(local_path) = self.local_path(path) {
                        fs::remove_item(&local_path)?;
                    }
                    self.db.delete_local_item(l.item_id)?;
                    if let Some(p) = p {
                        self.db.delete_pending(p.id)?;
                    }
                }
                Ok(())
            }
            Resolution::AcceptYours | Resolution::AcceptMerge => self.keep_as_add(&local, pending),
            other => Err(ResolveError::recoverable(format!(
                "{other} does not apply to an item deleted on the server"
            ))),
        }
    }

    // -- local --------------------------------------------------------------

    fn resolve_local(&mut self, conflict: &Conflict) -> Result<(), ResolveError> {
        let theirs = self.their_item(conflict)?;
        let your_local = self.local_path(&conflict.your_server_item).map_err(soft)?;

        match (conflict.resolution, theirs) {
            (Resolution::OverwriteLocal | Resolution::AcceptTheirs, Some(theirs)) => {
                self.write_server_content(&theirs, &theirs.path)?;
                let their_local = self.local_path(&theirs.path).map_err(soft)?;
                if their_local != your_local {
                    fs::remove_item(&your_local)?;
                }
                self.db.upsert_local_item(&retrieved(&theirs))?;
            }
            (Resolution::OverwriteLocal | Resolution::AcceptTheirs, None) => {
                fs::remove_item(&your_local)?;
                if let Some(id) = conflict.item_id {
                    self.db.delete_local_item(id)?;
                }
            }
            (Resolution::AcceptYours, Some(theirs)) => {
                let their_local = self.local_path(&theirs.path).map_err(soft)?;
                fs::move_item(&your_local, &their_local)?;
                self.db.upsert_local_item(&retrieved(&theirs))?;
                let hash = fs::file_hash(&their_local)?;
                if !theirs.item_type.is_folder() && hash != theirs.hash {
                    let mut edit = PendingChange::new(
                        Some(theirs.item_id),
                        theirs.path.clone(),
                        ChangeType::EDIT,
                        theirs.item_type,
                        theirs.encoding,
                        theirs.changeset,
                    );
                    if let Some(existing) = self.db.get_pending_for_item(theirs.item_id)? {
                        edit = existing;
                        edit.add_change(ChangeType::EDIT);
                        edit.version = theirs.changeset;
                    }
                    self.db.save_pending(&edit)?;
                }
            }
            (Resolution::AcceptYours, None) => {
                if let Some(id) = conflict.item_id {
                    self.db.delete_local_item(id)?;
                }
                let content = fs::read_file(&your_local)?;
                let add = PendingChange::new(
                    None,
                    conflict.your_server_item.clone(),
                    ChangeType::ADD,
                    conflict.item_type,
                    FileEncoding::detect(&content),
                    0,
                );
                self.db.save_pending(&add)?;
            }
            (other, _) => {
                return Err(ResolveError::recoverable(format!(
                    "{other} does not apply to local conflicts"
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::GetRequest;
    use super::*;
    use crate::conflict::{ResolutionOptions, ResolveRequest};
    use crate::models::{CommandStatus, ItemSpec, ItemType, RecursionType};
    use crate::repository::{CommitChange, Repository};
    use crate::tool::{MergeToolCommand, MergeToolRegistry};

    fn spec(path: &str) -> ItemSpec {
        ItemSpec::new(path, RecursionType::None)
    }

    fn all(resolution: Resolution) -> ResolveRequest {
        ResolveRequest::new(Vec::new(), resolution)
    }

    /// Workspace at latest with a pending edit of a.txt (local content
    /// `local`) and a newer server version (content `server`).
    fn content_conflict(dir: &std::path::Path, local: &str, server: &str) -> Workspace {
        let (repo, mut ws) = setup(dir);
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        ws.pend_edit(&[spec("$/P/a.txt")], &mut NullObserver).unwrap();
        fs::write_file(&dir.join("work").join("a.txt"), local.as_bytes()).unwrap();
        edit(repo.as_ref(), "$/P/a.txt", server);
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        assert_eq!(ws.conflicts(&[]).unwrap().len(), 1);
        ws
    }

    #[test]
    fn test_accept_merge_combines_both_edits() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = content_conflict(dir.path(), "ONE\ntwo\nthree\n", "one\ntwo\nTHREE\n");
        let summary = ws.resolve(&all(Resolution::AcceptMerge), &mut ()).unwrap();

        assert_eq!(summary.status(), CommandStatus::Success);
        assert!(ws.conflicts(&[]).unwrap().is_empty());
        assert_eq!(
            fs::read_file(&dir.path().join("work").join("a.txt")).unwrap(),
            b"ONE\ntwo\nTHREE\n"
        );
        let pending = ws.pending_changes(&[]).unwrap();
        assert_eq!(pending[0].change_type, ChangeType::EDIT);
        let latest = ws.repository().latest_changeset().unwrap();
        assert_eq!(pending[0].version, latest);
    }

    #[test]
    fn test_accept_merge_refuses_conflicting_result_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = content_conflict(dir.path(), "mine\ntwo\nthree\n", "theirs\ntwo\nthree\n");
        let summary = ws.resolve(&all(Resolution::AcceptMerge), &mut ()).unwrap();
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.status(), CommandStatus::Failure);
        assert_eq!(ws.conflicts(&[]).unwrap().len(), 1);

        let forced = all(Resolution::AcceptMerge).with_options(ResolutionOptions {
            accept_merge_with_conflicts: true,
            ..Default::default()
        });
        let summary = ws.resolve(&forced, &mut ()).unwrap();
        assert_eq!(summary.resolved.len(), 1);
        let merged = fs::read_file(&dir.path().join("work").join("a.txt")).unwrap();
        assert!(String::from_utf8(merged).unwrap().contains("<<<<<<< yours"));
    }

    #[test]
    fn test_accept_theirs_drops_edit() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = content_conflict(dir.path(), "mine\n", "theirs\n");
        ws.resolve(&all(Resolution::AcceptTheirs), &mut ()).unwrap();
        assert!(ws.pending_changes(&[]).unwrap().is_empty());
        assert_eq!(
            fs::read_file(&dir.path().join("work").join("a.txt")).unwrap(),
            b"theirs\n"
        );
    }

    #[test]
    fn test_accept_yours_advances_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = content_conflict(dir.path(), "mine\n", "theirs\n");
        ws.resolve(&all(Resolution::AcceptYours), &mut ()).unwrap();
        let pending = ws.pending_changes(&[]).unwrap();
        assert_eq!(pending[0].version, ws.repository().latest_changeset().unwrap());
        assert_eq!(
            fs::read_file(&dir.path().join("work").join("a.txt")).unwrap(),
            b"mine\n"
        );
    }

    #[test]
    fn test_overwrite_local_is_skipped_for_content_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = content_conflict(dir.path(), "mine\n", "theirs\n");
        let summary = ws.resolve(&all(Resolution::OverwriteLocal), &mut ()).unwrap();
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.failures.is_empty());
        assert_eq!(ws.conflicts(&[]).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_tool_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = content_conflict(dir.path(), "mine\n", "theirs\n");
        let err = ws.resolve(&all(Resolution::ExternalTool), &mut ()).unwrap_err();
        assert!(matches!(err, CoreError::Tool(_)));
        assert_eq!(ws.conflicts(&[]).unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_external_tool_result_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let ws = content_conflict(dir.path(), "mine\n", "theirs\n");
        let mut ws = ws.with_tools(MergeToolRegistry::new(vec![MergeToolCommand {
            pattern: "*.txt".into(),
            command: "cp".into(),
            arguments: "%1 %4".into(),
        }]));
        let summary = ws.resolve(&all(Resolution::ExternalTool), &mut ()).unwrap();
        assert_eq!(summary.resolved.len(), 1);
        assert_eq!(
            fs::read_file(&dir.path().join("work").join("a.txt")).unwrap(),
            b"theirs\n"
        );
    }

    #[test]
    fn test_local_conflict_overwrite_and_keep() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, mut ws) = setup(dir.path());
        let work = dir.path().join("work");
        fs::write_file(&work.join("a.txt"), b"mine\n").unwrap();
        fs::write_file(&work.join("src").join("b.txt"), b"mine too\n").unwrap();
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        assert_eq!(ws.conflicts(&[]).unwrap().len(), 2);

        let overwrite = ResolveRequest::new(vec![spec("$/P/a.txt")], Resolution::OverwriteLocal);
        ws.resolve(&overwrite, &mut ()).unwrap();
        assert_eq!(fs::read_file(&work.join("a.txt")).unwrap(), b"one\ntwo\nthree\n");

        let keep = ResolveRequest::new(vec![spec("$/P/src/b.txt")], Resolution::AcceptYours);
        ws.resolve(&keep, &mut ()).unwrap();
        assert_eq!(fs::read_file(&work.join("src").join("b.txt")).unwrap(), b"mine too\n");
        let pending = ws.pending_changes(&[]).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].change_type, ChangeType::EDIT);
        assert!(ws.conflicts(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_deleted_on_server_keep_yours_becomes_add() {
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

        ws.resolve(&all(Resolution::AcceptYours), &mut ()).unwrap();
        let pending = ws.pending_changes(&[]).unwrap();
        assert_eq!(pending[0].change_type, ChangeType::ADD);
        assert_eq!(pending[0].item_id, None);
        assert!(dir.path().join("work").join("a.txt").exists());
    }

    #[test]
    fn test_add_vs_add_rename_theirs() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, mut ws) = setup(dir.path());
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        let mine = dir.path().join("work").join("new.txt");
        fs::write_file(&mine, b"mine\n").unwrap();
        ws.pend_add(&[mine.clone()], false, &mut NullObserver).unwrap();
        repo.commit("bob", "add", &[file("$/P/new.txt", "theirs\n")]).unwrap();
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();

        let request = all(Resolution::AcceptYoursRenameTheirs).with_options(ResolutionOptions {
            new_path: Some(sp("$/P/new-theirs.txt")),
            ..Default::default()
        });
        let summary = ws.resolve(&request, &mut ()).unwrap();
        assert_eq!(summary.resolved.len(), 1);
        assert_eq!(fs::read_file(&mine).unwrap(), b"mine\n");
        assert_eq!(
            fs::read_file(&dir.path().join("work").join("new-theirs.txt")).unwrap(),
            b"theirs\n"
        );
        assert_eq!(ws.pending_changes(&[]).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_rename_leaves_workspace_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, mut ws) = setup(dir.path());
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        ws.pend_edit(&[spec("$/P/a.txt")], &mut NullObserver).unwrap();
        let path = dir.path().join("work").join("a.txt");
        fs::write_file(&path, b"mine\n").unwrap();
        let their_version = edit(repo.as_ref(), "$/P/a.txt", "theirs\n");
        let a = repo.item_at(&sp("$/P/a.txt"), their_version).unwrap().unwrap();

        // Their side renames a.txt onto a name this workspace already uses.
        let mut conflict = Conflict::new(ConflictType::Merge, ItemType::File, sp("$/P/a.txt"));
        conflict.item_id = Some(a.item_id);
        conflict.your_change = ChangeType::EDIT;
        conflict.their_item_id = Some(a.item_id);
        conflict.their_server_item = Some(sp("$/P/a.txt"));
        conflict.their_change = ChangeType::MERGE | ChangeType::EDIT | ChangeType::RENAME;
        conflict.their_version = their_version;
        conflict.target_item = Some(sp("$/P/src/b.txt"));
        ws.db.insert_conflict(&conflict).unwrap();

        let summary = ws.resolve(&all(Resolution::AcceptTheirs), &mut ()).unwrap();
        assert_eq!(summary.status(), CommandStatus::Failure);
        assert!(summary.failures[0].message.contains("already exists"));
        assert_eq!(ws.conflicts(&[]).unwrap().len(), 1);
        assert_eq!(fs::read_file(&path).unwrap(), b"mine\n");
        let pending = ws.pending_changes(&[]).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].change_type, ChangeType::EDIT);

        // The workspace is still usable for a resolution that fits.
        let summary = ws.resolve(&all(Resolution::AcceptYours), &mut ()).unwrap();
        assert_eq!(summary.resolved.len(), 1);
        assert_eq!(fs::read_file(&path).unwrap(), b"mine\n");
        let pending = ws.pending_changes(&[]).unwrap();
        assert_eq!(pending[0].change_type, ChangeType::MERGE | ChangeType::EDIT);
        assert_eq!(pending[0].server_item, sp("$/P/a.txt"));
    }

    #[test]
    fn test_delete_conflict_only_drops_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = content_conflict(dir.path(), "mine\n", "theirs\n");
        ws.resolve(&all(Resolution::DeleteConflict), &mut ()).unwrap();
        assert!(ws.conflicts(&[]).unwrap().is_empty());
        assert_eq!(
            fs::read_file(&dir.path().join("work").join("a.txt")).unwrap(),
            b"mine\n"
        );
    }
}
