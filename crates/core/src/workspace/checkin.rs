//! Committing pending changes as one changeset.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info};

use super::{fs, Workspace};
use crate::db::LocalItem;
use crate::errors::CheckinError;
use crate::events::{EventObserver, WorkspaceEvent};
use crate::models::{ChangeType, ItemSpec};
use crate::paths::ServerPath;
use crate::pending::PendingChange;
use crate::repository::{content_hash, CommitChange};

#[derive(Debug, Clone, Serialize)]
pub struct CheckinResult {
    pub changeset: i64,
    pub changes: Vec<CheckedInItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckedInItem {
    pub path: ServerPath,
    pub change: ChangeType,
}

/// Deletes first, deepest first, so a folder's children go before it.
/// Everything else parents first, with existing items ahead of new ones at
/// the same depth so a rename frees its old name before an add reuses it.
fn commit_order(changes: &mut [PendingChange]) {
    changes.sort_by_key(|p| {
        let depth = p.server_item.depth() as i64;
        if p.is_delete() {
            (0, -depth, false)
        } else {
            (1, depth, p.is_new_item())
        }
    });
}

impl Workspace {
    pub fn checkin(
        &mut self,
        specs: &[ItemSpec],
        comment: &str,
        observer: &mut dyn EventObserver,
    ) -> Result<CheckinResult, CheckinError> {
        let mut selected = self.pending_changes(specs)?;
        if selected.is_empty() {
            return Err(CheckinError::NothingToCheckIn);
        }

        let ids: HashSet<i64> = selected.iter().filter_map(|p| p.item_id).collect();
        let paths: HashSet<&str> = selected.iter().map(|p| p.server_item.as_str()).collect();
        let blocking = self
            .db
            .list_conflicts()?
            .iter()
            .filter(|c| {
                c.item_id.is_some_and(|id| ids.contains(&id))
                    || paths.contains(c.your_server_item.as_str())
            })
            .count();
        if blocking > 0 {
            return Err(CheckinError::UnresolvedConflicts(blocking));
        }

        let latest = self.repo.latest_changeset()?;
        for p in &selected {
            let Some(id) = p.item_id else { continue };
            if let Some(server) = self.repo.item_by_id(id, latest)? {
                if server.changeset > p.version {
                    return Err(CheckinError::NewerVersionExists {
                        path: p.server_item.to_string(),
                        yours: p.version,
                        latest: server.changeset,
                    });
                }
            }
        }

        commit_order(&mut selected);
        let mut commit = Vec::with_capacity(selected.len());
        for p in &selected {
            let content = if p.is_delete() || p.item_type.is_folder() {
                None
            } else {
                Some(fs::read_file(&self.local_path(&p.server_item)?)?)
            };
            commit.push(CommitChange {
                item_id: p.item_id,
                path: p.server_item.clone(),
                item_type: p.item_type,
                encoding: p.encoding,
                content,
                deleted: p.is_delete(),
            });
        }

        let result = self.repo.commit(self.owner(), comment, &commit)?;
        info!(changeset = result.changeset, changes = commit.len(), "checked in");

        let mut changes = Vec::with_capacity(selected.len());
        for ((p, c), item_id) in selected.iter().zip(&commit).zip(&result.item_ids) {
            if p.is_delete() {
                self.db.delete_local_item(*item_id)?;
            } else {
                self.db.upsert_local_item(&LocalItem {
                    item_id: *item_id,
                    server_item: p.server_item.clone(),
                    item_type: p.item_type,
                    version: result.changeset,
                    encoding: p.encoding,
                    hash: c.content.as_deref().map(content_hash),
                })?;
            }
            self.db.delete_pending(p.id)?;
            debug!(path = %p.server_item, change = %p.change_type, "committed pending change");
            changes.push(CheckedInItem {
                path: p.server_item.clone(),
                change: p.change_type,
            });
        }
        self.db
            .insert_history("checkin", result.changeset, "success", Some(comment))?;

        observer.on_event(&WorkspaceEvent::CheckedIn {
            changeset: result.changeset,
            changes: changes.len(),
        });
        Ok(CheckinResult {
            changeset: result.changeset,
            changes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::GetRequest;
    use super::*;
    use crate::events::NullObserver;
    use crate::models::RecursionType;
    use crate::repository::Repository;

    fn spec(path: &str) -> ItemSpec {
        ItemSpec::new(path, RecursionType::None)
    }

    #[test]
    fn test_checkin_edit_advances_version() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, mut ws) = setup(dir.path());
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        ws.pend_edit(&[spec("$/P/a.txt")], &mut NullObserver).unwrap();
        fs::write_file(&dir.path().join("work").join("a.txt"), b"changed\n").unwrap();

        let result = ws.checkin(&[], "edit a", &mut NullObserver).unwrap();
        assert_eq!(result.changes.len(), 1);
        assert!(ws.pending_changes(&[]).unwrap().is_empty());

        let item = repo.item_at(&sp("$/P/a.txt"), result.changeset).unwrap().unwrap();
        assert_eq!(item.changeset, result.changeset);
        assert_eq!(repo.content(item.item_id, result.changeset).unwrap(), b"changed\n");
        let local = ws.database().get_local_item(item.item_id).unwrap().unwrap();
        assert_eq!(local.version, result.changeset);
        assert_eq!(local.hash, item.hash);
        assert_eq!(repo.changeset(result.changeset).unwrap().owner, "alice");
    }

    #[test]
    fn test_nothing_to_check_in() {
        let dir = tempfile::tempdir().unwrap();
        let (_repo, mut ws) = setup(dir.path());
        assert!(matches!(
            ws.checkin(&[], "empty", &mut NullObserver),
            Err(CheckinError::NothingToCheckIn)
        ));
    }

    #[test]
    fn test_checkin_refuses_stale_version() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, mut ws) = setup(dir.path());
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        ws.pend_edit(&[spec("$/P/a.txt")], &mut NullObserver).unwrap();
        edit(repo.as_ref(), "$/P/a.txt", "theirs\n");

        let err = ws.checkin(&[], "stale", &mut NullObserver).unwrap_err();
        assert!(matches!(err, CheckinError::NewerVersionExists { .. }));
        assert_eq!(ws.pending_changes(&[]).unwrap().len(), 1);
    }

    #[test]
    fn test_checkin_refuses_unresolved_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, mut ws) = setup(dir.path());
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        ws.pend_edit(&[spec("$/P/a.txt")], &mut NullObserver).unwrap();
        fs::write_file(&dir.path().join("work").join("a.txt"), b"mine\n").unwrap();
        edit(repo.as_ref(), "$/P/a.txt", "theirs\n");
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();

        let err = ws.checkin(&[], "blocked", &mut NullObserver).unwrap_err();
        assert!(matches!(err, CheckinError::UnresolvedConflicts(1)));
    }

    #[test]
    fn test_checkin_rename_then_add_at_old_name() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, mut ws) = setup(dir.path());
        ws.get(&GetRequest::default(), &mut NullObserver).unwrap();
        ws.pend_rename("$/P/a.txt", "$/P/renamed.txt", &mut NullObserver).unwrap();
        let fresh = dir.path().join("work").join("a.txt");
        fs::write_file(&fresh, b"fresh\n").unwrap();
        ws.pend_add(&[fresh], false, &mut NullObserver).unwrap();
        ws.pend_delete(&[spec("$/P/src")], &mut NullObserver).unwrap();

        let result = ws.checkin(&[], "shuffle", &mut NullObserver).unwrap();
        assert_eq!(result.changes.len(), 4);
        let latest = result.changeset;
        assert!(repo.item_at(&sp("$/P/src/b.txt"), latest).unwrap().is_none());
        let renamed = repo.item_at(&sp("$/P/renamed.txt"), latest).unwrap().unwrap();
        assert_eq!(repo.content(renamed.item_id, latest).unwrap(), b"one\ntwo\nthree\n");
        let added = repo.item_at(&sp("$/P/a.txt"), latest).unwrap().unwrap();
        assert_ne!(added.item_id, renamed.item_id);
        assert!(ws.pending_changes(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_commit_order() {
        let change = |path: &str, change: ChangeType, item_id: Option<i64>| {
            PendingChange::new(
                item_id,
                sp(path),
                change,
                crate::models::ItemType::File,
                crate::encoding::FileEncoding::UTF8,
                1,
            )
        };
        let mut changes = vec![
            change("$/P/new", ChangeType::ADD, None),
            change("$/P/a/b", ChangeType::DELETE, Some(3)),
            change("$/P/old", ChangeType::RENAME, Some(4)),
            change("$/P/a", ChangeType::DELETE, Some(2)),
        ];
        commit_order(&mut changes);
        let order: Vec<&str> = changes.iter().map(|c| c.server_item.as_str()).collect();
        assert_eq!(order, vec!["$/P/a/b", "$/P/a", "$/P/old", "$/P/new"]);
    }
}
