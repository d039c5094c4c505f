//! Typed query helpers for every table in the workspace database.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Database;
use crate::conflict::{Conflict, Resolution, ResolutionOptions};
use crate::encoding::FileEncoding;
use crate::errors::DatabaseError;
use crate::mappings::WorkingFolder;
use crate::models::ItemType;
use crate::paths::ServerPath;
use crate::pending::PendingChange;

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `local_items` table: an item as last retrieved from the
/// server into this workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalItem {
    pub item_id: i64,
    /// Committed server path of the retrieved version.
    pub server_item: ServerPath,
    pub item_type: ItemType,
    pub version: i64,
    pub encoding: FileEncoding,
    /// SHA-256 of the retrieved content; `None` for folders.
    pub hash: Option<String>,
}

/// A row from the `get_history` table.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub operation: String,
    pub version: i64,
    pub status: String,
    pub details: Option<String>,
    pub recorded_at: String,
}

const LOCAL_ITEM_COLUMNS: &str = "item_id, server_path, item_type, version, encoding, hash";

fn local_item_from_row(row: &Row<'_>) -> rusqlite::Result<LocalItem> {
    Ok(LocalItem {
        item_id: row.get(0)?,
        server_item: row.get(1)?,
        item_type: row.get(2)?,
        version: row.get(3)?,
        encoding: row.get(4)?,
        hash: row.get(5)?,
    })
}

const PENDING_COLUMNS: &str = "id, item_id, server_path, source_server_path, change_type, \
     item_type, encoding, lock_level, version, merge_source, merge_version, created_at";

fn pending_from_row(row: &Row<'_>) -> rusqlite::Result<PendingChange> {
    Ok(PendingChange {
        id: row.get(0)?,
        item_id: row.get(1)?,
        server_item: row.get(2)?,
        source_server_item: row.get(3)?,
        change_type: row.get(4)?,
        item_type: row.get(5)?,
        encoding: row.get(6)?,
        lock_level: row.get(7)?,
        version: row.get(8)?,
        merge_source: row.get(9)?,
        merge_version: row.get(10)?,
        created_at: parse_timestamp(row.get::<_, String>(11)?),
    })
}

const CONFLICT_COLUMNS: &str = "id, conflict_type, item_type, item_id, your_server_item, \
     your_change, your_version, your_encoding, their_item_id, their_server_item, their_change, \
     their_version, base_item_id, base_version, target_item, message, created_at";

fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<Conflict> {
    Ok(Conflict {
        id: row.get(0)?,
        conflict_type: row.get(1)?,
        item_type: row.get(2)?,
        item_id: row.get(3)?,
        your_server_item: row.get(4)?,
        your_change: row.get(5)?,
        your_version: row.get(6)?,
        your_encoding: row.get(7)?,
        their_item_id: row.get(8)?,
        their_server_item: row.get(9)?,
        their_change: row.get(10)?,
        their_version: row.get(11)?,
        base_item_id: row.get(12)?,
        base_version: row.get(13)?,
        target_item: row.get(14)?,
        message: row.get(15)?,
        resolution: Resolution::None,
        options: ResolutionOptions::default(),
        created_at: parse_timestamp(row.get::<_, String>(16)?),
    })
}

fn parse_timestamp(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn folded(path: &ServerPath) -> String {
    path.as_str().to_lowercase()
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- workspace_meta -----------------------------------------------------

    pub fn get_meta(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM workspace_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO workspace_meta (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        debug!(key, value, "set workspace meta");
        Ok(())
    }

    // -- working_folders ----------------------------------------------------

    pub fn list_working_folders(&self) -> Result<Vec<WorkingFolder>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT server_item, local_item FROM working_folders ORDER BY folded_item",
        )?;
        let folders = stmt
            .query_map([], |row| {
                Ok(WorkingFolder {
                    server_item: row.get(0)?,
                    local_item: row.get::<_, Option<String>>(1)?.map(Into::into),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    /// Replace the whole mapping table.
    pub fn replace_working_folders(&self, folders: &[WorkingFolder]) -> Result<(), DatabaseError> {
        self.transaction(|conn| {
            conn.execute("DELETE FROM working_folders", [])?;
            for folder in folders {
                let local = folder
                    .local_item
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned());
                conn.execute(
                    "INSERT INTO working_folders (folded_item, server_item, local_item)
                     VALUES (?1, ?2, ?3)",
                    params![folded(&folder.server_item), folder.server_item, local],
                )?;
            }
            Ok(())
        })?;
        debug!(count = folders.len(), "working folders saved");
        Ok(())
    }

    // -- local_items --------------------------------------------------------

    pub fn upsert_local_item(&self, item: &LocalItem) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO local_items (item_id, server_path, folded_path, item_type, version, encoding, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(item_id) DO UPDATE SET
                server_path = excluded.server_path,
                folded_path = excluded.folded_path,
                item_type = excluded.item_type,
                version = excluded.version,
                encoding = excluded.encoding,
                hash = excluded.hash",
            params![
                item.item_id,
                item.server_item,
                folded(&item.server_item),
                item.item_type,
                item.version,
                item.encoding,
                item.hash,
            ],
        )?;
        Ok(())
    }

    pub fn get_local_item(&self, item_id: i64) -> Result<Option<LocalItem>, DatabaseError> {
        let conn = self.conn();
        let item = conn
            .query_row(
                &format!("SELECT {LOCAL_ITEM_COLUMNS} FROM local_items WHERE item_id = ?1"),
                params![item_id],
                local_item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn find_local_item_by_path(
        &self,
        path: &ServerPath,
    ) -> Result<Option<LocalItem>, DatabaseError> {
        let conn = self.conn();
        let item = conn
            .query_row(
                &format!("SELECT {LOCAL_ITEM_COLUMNS} FROM local_items WHERE folded_path = ?1"),
                params![folded(path)],
                local_item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn list_local_items(&self) -> Result<Vec<LocalItem>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOCAL_ITEM_COLUMNS} FROM local_items ORDER BY folded_path"
        ))?;
        let items = stmt
            .query_map([], local_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn delete_local_item(&self, item_id: i64) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute("DELETE FROM local_items WHERE item_id = ?1", params![item_id])?;
        Ok(())
    }

    // -- pending_changes ----------------------------------------------------

    /// Insert (when `id == 0`) or update a pending change. Returns its id.
    pub fn save_pending(&self, change: &PendingChange) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        if change.id == 0 {
            conn.execute(
                "INSERT INTO pending_changes (item_id, server_path, folded_path, source_server_path,
                    change_type, item_type, encoding, lock_level, version, merge_source,
                    merge_version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    change.item_id,
                    change.server_item,
                    folded(&change.server_item),
                    change.source_server_item,
                    change.change_type,
                    change.item_type,
                    change.encoding,
                    change.lock_level,
                    change.version,
                    change.merge_source,
                    change.merge_version,
                    change.created_at.to_rfc3339(),
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!(id, path = %change.server_item, change = %change.change_type, "pended change");
            Ok(id)
        } else {
            let updated = conn.execute(
                "UPDATE pending_changes SET item_id = ?2, server_path = ?3, folded_path = ?4,
                    source_server_path = ?5, change_type = ?6, item_type = ?7, encoding = ?8,
                    lock_level = ?9, version = ?10, merge_source = ?11, merge_version = ?12
                 WHERE id = ?1",
                params![
                    change.id,
                    change.item_id,
                    change.server_item,
                    folded(&change.server_item),
                    change.source_server_item,
                    change.change_type,
                    change.item_type,
                    change.encoding,
                    change.lock_level,
                    change.version,
                    change.merge_source,
                    change.merge_version,
                ],
            )?;
            if updated == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "pending change".into(),
                    id: change.id.to_string(),
                });
            }
            Ok(change.id)
        }
    }

    pub fn get_pending_for_item(&self, item_id: i64) -> Result<Option<PendingChange>, DatabaseError> {
        let conn = self.conn();
        let change = conn
            .query_row(
                &format!("SELECT {PENDING_COLUMNS} FROM pending_changes WHERE item_id = ?1"),
                params![item_id],
                pending_from_row,
            )
            .optional()?;
        Ok(change)
    }

    /// The pending change whose target path is `path`.
    pub fn find_pending_by_path(
        &self,
        path: &ServerPath,
    ) -> Result<Option<PendingChange>, DatabaseError> {
        let conn = self.conn();
        let change = conn
            .query_row(
                &format!(
                    "SELECT {PENDING_COLUMNS} FROM pending_changes WHERE folded_path = ?1
                     ORDER BY id LIMIT 1"
                ),
                params![folded(path)],
                pending_from_row,
            )
            .optional()?;
        Ok(change)
    }

    pub fn list_pending(&self) -> Result<Vec<PendingChange>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_changes ORDER BY folded_path"
        ))?;
        let changes = stmt
            .query_map([], pending_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(changes)
    }

    pub fn delete_pending(&self, id: i64) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute("DELETE FROM pending_changes WHERE id = ?1", params![id])?;
        Ok(())
    }

    // -- conflicts ----------------------------------------------------------

    /// Insert a conflict record, ignoring `conflict.id`. Returns the new id.
    pub fn insert_conflict(&self, conflict: &Conflict) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO conflicts (conflict_type, item_type, item_id, your_server_item, your_change,
                your_version, your_encoding, their_item_id, their_server_item, their_change,
                their_version, base_item_id, base_version, target_item, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                conflict.conflict_type,
                conflict.item_type,
                conflict.item_id,
                conflict.your_server_item,
                conflict.your_change,
                conflict.your_version,
                conflict.your_encoding,
                conflict.their_item_id,
                conflict.their_server_item,
                conflict.their_change,
                conflict.their_version,
                conflict.base_item_id,
                conflict.base_version,
                conflict.target_item,
                conflict.message,
                conflict.created_at.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, path = %conflict.your_server_item, conflict_type = %conflict.conflict_type, "inserted conflict");
        Ok(id)
    }

    pub fn get_conflict(&self, id: i64) -> Result<Option<Conflict>, DatabaseError> {
        let conn = self.conn();
        let conflict = conn
            .query_row(
                &format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = ?1"),
                params![id],
                conflict_from_row,
            )
            .optional()?;
        Ok(conflict)
    }

    pub fn list_conflicts(&self) -> Result<Vec<Conflict>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {CONFLICT_COLUMNS} FROM conflicts ORDER BY id"))?;
        let conflicts = stmt
            .query_map([], conflict_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(conflicts)
    }

    pub fn conflicts_for_item(&self, item_id: i64) -> Result<Vec<Conflict>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE item_id = ?1 OR their_item_id = ?1 ORDER BY id"
        ))?;
        let conflicts = stmt
            .query_map(params![item_id], conflict_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(conflicts)
    }

    pub fn count_conflicts(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM conflicts", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn delete_conflict(&self, id: i64) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM conflicts WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // -- path rebasing ------------------------------------------------------

    /// Move pending targets and conflict paths from under `from` to under
    /// `to` (the moved folder itself included). Returns rows touched.
    pub fn rebase_paths(&self, from: &ServerPath, to: &ServerPath) -> Result<usize, DatabaseError> {
        let pending = self.list_pending()?;
        let conflicts = self.list_conflicts()?;
        let touched = self.transaction(|conn| {
            let mut touched = 0;
            for change in &pending {
                if let Some(moved) = change.server_item.rebase(from, to) {
                    conn.execute(
                        "UPDATE pending_changes SET server_path = ?2, folded_path = ?3 WHERE id = ?1",
                        params![change.id, moved, folded(&moved)],
                    )?;
                    touched += 1;
                }
            }
            for conflict in &conflicts {
                let your = conflict.your_server_item.rebase(from, to);
                let target = conflict.target_item.as_ref().and_then(|t| t.rebase(from, to));
                if your.is_none() && target.is_none() {
                    continue;
                }
                conn.execute(
                    "UPDATE conflicts SET your_server_item = ?2, target_item = ?3 WHERE id = ?1",
                    params![
                        conflict.id,
                        your.unwrap_or_else(|| conflict.your_server_item.clone()),
                        target.or_else(|| conflict.target_item.clone()),
                    ],
                )?;
                touched += 1;
            }
            Ok(touched)
        })?;
        debug!(%from, %to, touched, "rebased workspace paths");
        Ok(touched)
    }

    // -- get_history --------------------------------------------------------

    pub fn insert_history(
        &self,
        operation: &str,
        version: i64,
        status: &str,
        details: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO get_history (operation, version, status, details, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![operation, version, status, details, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_history(&self, limit: u32) -> Result<Vec<HistoryEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, operation, version, status, details, recorded_at
             FROM get_history ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    operation: row.get(1)?,
                    version: row.get(2)?,
                    status: row.get(3)?,
                    details: row.get(4)?,
                    recorded_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
