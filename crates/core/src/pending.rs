//! Pending changes: what the workspace will commit on the next checkin.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::FileEncoding;
use crate::models::{ChangeType, ItemType, LockLevel};
use crate::paths::{PathFilter, ServerPath};

/// One pending change on one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: i64,
    /// Server item id; `None` for items the server does not have yet.
    pub item_id: Option<i64>,
    /// Path the item will have after checkin.
    pub server_item: ServerPath,
    /// Committed path before a pending rename.
    pub source_server_item: Option<ServerPath>,
    pub change_type: ChangeType,
    pub item_type: ItemType,
    pub encoding: FileEncoding,
    pub lock_level: LockLevel,
    /// Workspace version the change is based on.
    pub version: i64,
    /// Source item of a pending merge, branch, or rollback.
    pub merge_source: Option<ServerPath>,
    pub merge_version: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl PendingChange {
    pub fn new(
        item_id: Option<i64>,
        server_item: ServerPath,
        change_type: ChangeType,
        item_type: ItemType,
        encoding: FileEncoding,
        version: i64,
    ) -> Self {
        Self {
            id: 0,
            item_id,
            server_item,
            source_server_item: None,
            change_type,
            item_type,
            encoding,
            lock_level: LockLevel::None,
            version,
            merge_source: None,
            merge_version: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_new_item(&self) -> bool {
        self.item_id.is_none() || self.change_type.is_new_item()
    }

    pub fn is_delete(&self) -> bool {
        self.change_type.contains(ChangeType::DELETE)
    }

    pub fn is_rename(&self) -> bool {
        self.change_type.contains(ChangeType::RENAME)
    }

    /// Fold a further change into this one. Returns `false` when the pending
    /// change cancels out entirely and should be removed.
    pub fn add_change(&mut self, change: ChangeType) -> bool {
        match combine_change(self.change_type, change) {
            Some(combined) => {
                self.change_type = combined;
                true
            }
            None => false,
        }
    }

    /// Remove bits; returns `false` when nothing is left.
    pub fn remove_change(&mut self, change: ChangeType) -> bool {
        self.change_type = self.change_type.without(change);
        !self.change_type.is_empty()
    }
}

/// Combine an existing pending change type with a new one.
///
/// Editing a pending add is still an add. Deleting a pending add cancels it
/// (`None`). Deleting anything else keeps only the merge or rollback
/// bookkeeping of either side next to the delete.
pub fn combine_change(existing: ChangeType, new: ChangeType) -> Option<ChangeType> {
    if new.contains(ChangeType::DELETE) {
        if existing.is_new_item() {
            return None;
        }
        let bookkeeping = (ChangeType::MERGE | ChangeType::ROLLBACK).bits();
        let kept = ChangeType::from_bits((existing.bits() | new.bits()) & bookkeeping);
        return Some(kept | ChangeType::DELETE);
    }
    if existing.is_new_item() && new == ChangeType::EDIT {
        return Some(existing);
    }
    Some(existing | new)
}

/// Pending changes matching any of `filters` (all when empty).
pub fn filter_pending<'a>(
    changes: &'a [PendingChange],
    filters: &[PathFilter],
) -> Vec<&'a PendingChange> {
    changes
        .iter()
        .filter(|c| {
            filters.is_empty()
                || filters.iter().any(|f| {
                    f.matches(&c.server_item)
                        || c.source_server_item.as_ref().is_some_and(|s| f.matches(s))
                })
        })
        .collect()
}

/// Counts of pending changes by change kind, for status output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingSummary {
    pub total: usize,
    pub by_kind: BTreeMap<String, usize>,
}

impl PendingSummary {
    pub fn from_changes<'a>(changes: impl IntoIterator<Item = &'a PendingChange>) -> Self {
        let mut summary = Self::default();
        for change in changes {
            summary.total += 1;
            *summary
                .by_kind
                .entry(change.change_type.to_string())
                .or_insert(0) += 1;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecursionType;

    fn change(path: &str, ct: ChangeType) -> PendingChange {
        PendingChange::new(
            Some(1),
            ServerPath::parse(path).unwrap(),
            ct,
            ItemType::File,
            FileEncoding::UTF8,
            3,
        )
    }

    #[test]
    fn test_combine_edit_on_add_stays_add() {
        assert_eq!(
            combine_change(ChangeType::ADD, ChangeType::EDIT),
            Some(ChangeType::ADD)
        );
    }

    #[test]
    fn test_combine_delete_cancels_add() {
        assert_eq!(combine_change(ChangeType::ADD, ChangeType::DELETE), None);
        assert_eq!(
            combine_change(ChangeType::BRANCH | ChangeType::MERGE, ChangeType::DELETE),
            None
        );
    }

    #[test]
    fn test_combine_delete_keeps_merge_bookkeeping() {
        assert_eq!(
            combine_change(ChangeType::MERGE | ChangeType::EDIT, ChangeType::DELETE),
            Some(ChangeType::MERGE | ChangeType::DELETE)
        );
        assert_eq!(
            combine_change(ChangeType::EDIT, ChangeType::DELETE),
            Some(ChangeType::DELETE)
        );
    }

    #[test]
    fn test_combine_delete_keeps_incoming_bookkeeping() {
        assert_eq!(
            combine_change(ChangeType::NONE, ChangeType::MERGE | ChangeType::DELETE),
            Some(ChangeType::MERGE | ChangeType::DELETE)
        );
        assert_eq!(
            combine_change(ChangeType::EDIT, ChangeType::ROLLBACK | ChangeType::DELETE),
            Some(ChangeType::ROLLBACK | ChangeType::DELETE)
        );
    }

    #[test]
    fn test_combine_rename_and_edit() {
        assert_eq!(
            combine_change(ChangeType::RENAME, ChangeType::EDIT),
            Some(ChangeType::RENAME | ChangeType::EDIT)
        );
    }

    #[test]
    fn test_add_and_remove_change() {
        let mut pc = change("$/P/a.txt", ChangeType::EDIT);
        assert!(pc.add_change(ChangeType::RENAME));
        assert!(pc.is_rename());
        assert!(pc.remove_change(ChangeType::EDIT));
        assert!(!pc.remove_change(ChangeType::RENAME));
    }

    #[test]
    fn test_filter_pending_matches_source_path() {
        let mut renamed = change("$/P/new.txt", ChangeType::RENAME);
        renamed.source_server_item = Some(ServerPath::parse("$/Q/old.txt").unwrap());
        let changes = vec![change("$/P/a.txt", ChangeType::EDIT), renamed];

        let filter = PathFilter::new(ServerPath::parse("$/Q").unwrap(), RecursionType::Full);
        let found = filter_pending(&changes, &[filter]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].server_item.as_str(), "$/P/new.txt");

        assert_eq!(filter_pending(&changes, &[]).len(), 2);
    }

    #[test]
    fn test_summary_counts() {
        let changes = vec![
            change("$/P/a.txt", ChangeType::EDIT),
            change("$/P/b.txt", ChangeType::EDIT),
            change("$/P/c.txt", ChangeType::DELETE),
        ];
        let summary = PendingSummary::from_changes(&changes);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_kind.get("edit"), Some(&2));
        assert_eq!(summary.by_kind.get("delete"), Some(&1));
    }
}
