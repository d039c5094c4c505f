//! A team project collection stored in a single SQLite file.
//!
//! Every commit writes one `item_versions` row per changed item carrying
//! that item's full state (path, type, content). The state of an item at
//! changeset `N` is its row with the greatest changeset `<= N`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::{
    content_hash, Changeset, CommitChange, CommitResult, ItemHistory, Repository, ServerItem,
};
use crate::db::schema::apply_migrations;
use crate::encoding::FileEncoding;
use crate::errors::{DatabaseError, RepositoryError};
use crate::models::{ItemType, RecursionType, VersionSpec};
use crate::paths::{PathFilter, ServerPath};

static MIGRATIONS: &[(u32, &str, &str)] = &[(
    1,
    "collection schema",
    r#"
    CREATE TABLE IF NOT EXISTS changesets (
        id          INTEGER PRIMARY KEY,
        owner       TEXT NOT NULL,
        comment     TEXT NOT NULL DEFAULT '',
        created_at  TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS item_versions (
        item_id     INTEGER NOT NULL,
        changeset   INTEGER NOT NULL REFERENCES changesets (id),
        server_path TEXT    NOT NULL,
        folded_path TEXT    NOT NULL,
        item_type   TEXT    NOT NULL,
        deleted     INTEGER NOT NULL DEFAULT 0,
        encoding    INTEGER NOT NULL,
        hash        TEXT,
        content     BLOB,
        PRIMARY KEY (item_id, changeset)
    );

    CREATE INDEX IF NOT EXISTS idx_item_versions_path ON item_versions (folded_path);
    CREATE INDEX IF NOT EXISTS idx_item_versions_changeset ON item_versions (changeset);
    "#,
)];

const ROOT_ITEM_ID: i64 = 1;

/// State of every item as of `?1`; callers append further conditions.
const STATE_AT: &str = "SELECT v.item_id, v.server_path, v.item_type, v.changeset, v.deleted, \
     v.encoding, v.hash FROM item_versions v \
     WHERE v.changeset = (SELECT MAX(w.changeset) FROM item_versions w \
                          WHERE w.item_id = v.item_id AND w.changeset <= ?1)";

pub struct SqliteRepository {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteRepository {
    /// Create a new collection at `path`, seeded with changeset 1 holding `$/`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        if path.exists() {
            return Err(RepositoryError::AlreadyExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(DatabaseError::IoError)?;
        }
        info!(path = %path.display(), "creating collection");
        let repo = Self::open_connection(Connection::open(path)?, path.display().to_string())?;
        repo.seed()?;
        Ok(repo)
    }

    /// Open an existing collection.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RepositoryError::NotFound(path.display().to_string()));
        }
        debug!(path = %path.display(), "opening collection");
        Self::open_connection(Connection::open(path)?, path.display().to_string())
    }

    /// A seeded collection that lives only in memory (useful for testing).
    pub fn in_memory() -> Result<Self, RepositoryError> {
        let repo = Self::open_connection(Connection::open_in_memory()?, ":memory:".into())?;
        repo.seed()?;
        Ok(repo)
    }

    fn open_connection(conn: Connection, location: String) -> Result<Self, RepositoryError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if location != ":memory:" {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        }
        apply_migrations(&conn, MIGRATIONS)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    fn seed(&self) -> Result<(), RepositoryError> {
        let conn = self.conn();
        let existing: i64 = conn.query_row("SELECT COUNT(*) FROM changesets", [], |r| r.get(0))?;
        if existing > 0 {
            return Ok(());
        }
        conn.execute(
            "INSERT INTO changesets (id, owner, comment, created_at) VALUES (1, 'system', ?1, ?2)",
            params!["Created team project collection", timestamp(Utc::now())],
        )?;
        let root = ServerPath::root();
        conn.execute(
            "INSERT INTO item_versions (item_id, changeset, server_path, folded_path, item_type, encoding)
             VALUES (?1, 1, ?2, ?3, ?4, ?5)",
            params![
                ROOT_ITEM_ID,
                root,
                root.as_str(),
                ItemType::Folder,
                FileEncoding::BINARY
            ],
        )?;
        Ok(())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("collection mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ServerItem> {
    Ok(ServerItem {
        item_id: row.get(0)?,
        path: row.get(1)?,
        item_type: row.get(2)?,
        changeset: row.get(3)?,
        deleted: row.get(4)?,
        encoding: row.get(5)?,
        hash: row.get(6)?,
    })
}

fn changeset_from_row(row: &Row<'_>) -> rusqlite::Result<Changeset> {
    let created: String = row.get(3)?;
    Ok(Changeset {
        id: row.get(0)?,
        owner: row.get(1)?,
        comment: row.get(2)?,
        created_at: DateTime::parse_from_rfc3339(&created)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}

/// `LIKE` pattern for everything strictly below `root`.
fn descendant_pattern(root: &ServerPath) -> String {
    let folded = root.as_str().to_lowercase();
    let escaped = folded
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    if root.is_root() {
        format!("{escaped}%")
    } else {
        format!("{escaped}/%")
    }
}

fn latest(conn: &Connection) -> Result<i64, RepositoryError> {
    let id: Option<i64> = conn.query_row("SELECT MAX(id) FROM changesets", [], |r| r.get(0))?;
    Ok(id.unwrap_or(0))
}

fn state_of(conn: &Connection, item_id: i64, version: i64) -> Result<Option<ServerItem>, RepositoryError> {
    let item = conn
        .query_row(
            &format!("{STATE_AT} AND v.item_id = ?2"),
            params![version, item_id],
            item_from_row,
        )
        .optional()?;
    Ok(item)
}

fn live_at(conn: &Connection, path: &ServerPath, version: i64) -> Result<Option<ServerItem>, RepositoryError> {
    let item = conn
        .query_row(
            &format!("{STATE_AT} AND v.folded_path = ?2 AND v.deleted = 0 LIMIT 1"),
            params![version, path.as_str().to_lowercase()],
            item_from_row,
        )
        .optional()?;
    Ok(item)
}

impl Repository for SqliteRepository {
    fn latest_changeset(&self) -> Result<i64, RepositoryError> {
        latest(&self.conn())
    }

    fn resolve_version(&self, spec: &VersionSpec) -> Result<i64, RepositoryError> {
        let conn = self.conn();
        let latest = latest(&conn)?;
        match spec {
            VersionSpec::Latest => Ok(latest),
            VersionSpec::Changeset(n) => {
                if *n < 1 || *n > latest {
                    Err(RepositoryError::ChangesetNotFound(*n))
                } else {
                    Ok(*n)
                }
            }
            VersionSpec::Date(date) => {
                let id: Option<i64> = conn.query_row(
                    "SELECT MAX(id) FROM changesets WHERE created_at <= ?1",
                    params![timestamp(*date)],
                    |r| r.get(0),
                )?;
                id.ok_or_else(|| {
                    RepositoryError::InvalidVersion(format!("no changeset exists on or before {date}"))
                })
            }
            VersionSpec::Workspace => Err(RepositoryError::InvalidVersion(
                "the workspace version has no meaning on the server".into(),
            )),
        }
    }

    fn changeset(&self, id: i64) -> Result<Changeset, RepositoryError> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, owner, comment, created_at FROM changesets WHERE id = ?1",
            params![id],
            changeset_from_row,
        )
        .optional()?
        .ok_or(RepositoryError::ChangesetNotFound(id))
    }

    fn item_at(&self, path: &ServerPath, version: i64) -> Result<Option<ServerItem>, RepositoryError> {
        live_at(&self.conn(), path, version)
    }

    fn item_by_id(&self, item_id: i64, version: i64) -> Result<Option<ServerItem>, RepositoryError> {
        state_of(&self.conn(), item_id, version)
    }

    fn items_under(
        &self,
        root: &ServerPath,
        recursion: RecursionType,
        version: i64,
    ) -> Result<Vec<ServerItem>, RepositoryError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{STATE_AT} AND v.deleted = 0
             AND (v.folded_path = ?2 OR v.folded_path LIKE ?3 ESCAPE '\\')
             ORDER BY v.folded_path"
        ))?;
        let filter = PathFilter::new(root.clone(), recursion);
        let items = stmt
            .query_map(
                params![version, root.as_str().to_lowercase(), descendant_pattern(root)],
                item_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|item| filter.matches(&item.path))
            .collect();
        Ok(items)
    }

    fn content(&self, item_id: i64, version: i64) -> Result<Vec<u8>, RepositoryError> {
        let conn = self.conn();
        let row: Option<(Option<Vec<u8>>, bool)> = conn
            .query_row(
                "SELECT content, deleted FROM item_versions
                 WHERE item_id = ?1 AND changeset =
                    (SELECT MAX(changeset) FROM item_versions WHERE item_id = ?1 AND changeset <= ?2)",
                params![item_id, version],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        match row {
            Some((content, false)) => Ok(content.unwrap_or_default()),
            _ => Err(RepositoryError::ItemNotFound {
                path: format!("item {item_id}"),
                version: format!("C{version}"),
            }),
        }
    }

    fn changed_items(
        &self,
        root: &ServerPath,
        recursion: RecursionType,
        from: i64,
        to: i64,
    ) -> Result<Vec<ItemHistory>, RepositoryError> {
        let conn = self.conn();
        let ids: Vec<i64> = {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT item_id FROM item_versions
                 WHERE changeset BETWEEN ?1 AND ?2 ORDER BY item_id",
            )?;
            let ids = stmt
                .query_map(params![from, to], |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let filter = PathFilter::new(root.clone(), recursion);
        let mut histories = Vec::new();
        for item_id in ids {
            let before = state_of(&conn, item_id, from - 1)?.filter(|i| !i.deleted);
            let after = state_of(&conn, item_id, to)?.filter(|i| !i.deleted);
            let in_scope = [&before, &after]
                .into_iter()
                .flatten()
                .any(|i| filter.matches(&i.path));
            if !in_scope || (before.is_none() && after.is_none()) {
                continue;
            }
            histories.push(ItemHistory {
                item_id,
                before,
                after,
            });
        }
        histories.sort_by(|a, b| a.path().cmp(&b.path()));
        debug!(%root, from, to, count = histories.len(), "collected changed items");
        Ok(histories)
    }

    fn commit(
        &self,
        owner: &str,
        comment: &str,
        changes: &[CommitChange],
    ) -> Result<CommitResult, RepositoryError> {
        if changes.is_empty() {
            return Err(RepositoryError::CommitRejected("no changes to commit".into()));
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let changeset = latest(&tx)? + 1;
        tx.execute(
            "INSERT INTO changesets (id, owner, comment, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![changeset, owner, comment, timestamp(Utc::now())],
        )?;

        let mut next_item_id: i64 =
            tx.query_row("SELECT COALESCE(MAX(item_id), 0) + 1 FROM item_versions", [], |r| {
                r.get(0)
            })?;

        let mut item_ids = Vec::with_capacity(changes.len());
        for change in changes {
            let item_id = match change.item_id {
                Some(id) => {
                    if state_of(&tx, id, changeset)?.is_none() {
                        return Err(RepositoryError::CommitRejected(format!(
                            "item {id} ({}) does not exist",
                            change.path
                        )));
                    }
                    id
                }
                None => {
                    let id = next_item_id;
                    next_item_id += 1;
                    id
                }
            };

            if !change.deleted {
                if let Some(other) = live_at(&tx, &change.path, changeset)? {
                    if other.item_id != item_id {
                        return Err(RepositoryError::CommitRejected(format!(
                            "{} is already in use by another item",
                            change.path
                        )));
                    }
                }
                if let Some(parent) = change.path.parent() {
                    let parent_ok = live_at(&tx, &parent, changeset)?
                        .is_some_and(|p| p.item_type == ItemType::Folder);
                    if !parent_ok {
                        return Err(RepositoryError::CommitRejected(format!(
                            "parent folder {parent} does not exist"
                        )));
                    }
                }
            }

            let (content, hash) = match (change.item_type, change.deleted) {
                (ItemType::Folder, _) | (_, true) => (None, None),
                _ => {
                    let bytes = change.content.clone().unwrap_or_default();
                    let hash = content_hash(&bytes);
                    (Some(bytes), Some(hash))
                }
            };

            tx.execute(
                "INSERT INTO item_versions (item_id, changeset, server_path, folded_path, item_type,
                    deleted, encoding, hash, content)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    item_id,
                    changeset,
                    change.path,
                    change.path.as_str().to_lowercase(),
                    change.item_type,
                    change.deleted,
                    change.encoding,
                    hash,
                    content,
                ],
            )?;
            item_ids.push(item_id);
        }

        tx.commit()?;
        info!(changeset, owner, changes = changes.len(), "committed changeset");
        Ok(CommitResult {
            changeset,
            item_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(s: &str) -> ServerPath {
        ServerPath::parse(s).unwrap()
    }

    fn folder(path: &str) -> CommitChange {
        CommitChange {
            item_id: None,
            path: sp(path),
            item_type: ItemType::Folder,
            encoding: FileEncoding::BINARY,
            content: None,
            deleted: false,
        }
    }

    fn file(id: Option<i64>, path: &str, content: &str) -> CommitChange {
        CommitChange {
            item_id: id,
            path: sp(path),
            item_type: ItemType::File,
            encoding: FileEncoding::UTF8,
            content: Some(content.as_bytes().to_vec()),
            deleted: false,
        }
    }

    fn seeded() -> (SqliteRepository, i64) {
        let repo = SqliteRepository::in_memory().unwrap();
        let result = repo
            .commit(
                "alice",
                "initial",
                &[folder("$/Proj"), file(None, "$/Proj/a.txt", "one\n")],
            )
            .unwrap();
        (repo, result.item_ids[1])
    }

    #[test]
    fn test_seeded_root() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert_eq!(repo.latest_changeset().unwrap(), 1);
        let root = repo.item_at(&ServerPath::root(), 1).unwrap().unwrap();
        assert_eq!(root.item_type, ItemType::Folder);
        assert_eq!(repo.changeset(1).unwrap().owner, "system");
    }

    #[test]
    fn test_commit_and_read_back() {
        let (repo, file_id) = seeded();
        assert_eq!(repo.latest_changeset().unwrap(), 2);

        let item = repo.item_at(&sp("$/proj/A.TXT"), 2).unwrap().unwrap();
        assert_eq!(item.item_id, file_id);
        assert_eq!(item.hash.as_deref(), Some(content_hash(b"one\n").as_str()));
        assert_eq!(repo.content(file_id, 2).unwrap(), b"one\n");
        assert!(repo.item_at(&sp("$/Proj/a.txt"), 1).unwrap().is_none());
    }

    #[test]
    fn test_versions_over_time() {
        let (repo, file_id) = seeded();
        repo.commit("bob", "edit", &[file(Some(file_id), "$/Proj/a.txt", "two\n")])
            .unwrap();
        repo.commit("bob", "rename", &[file(Some(file_id), "$/Proj/b.txt", "two\n")])
            .unwrap();

        assert_eq!(repo.content(file_id, 2).unwrap(), b"one\n");
        assert_eq!(repo.content(file_id, 3).unwrap(), b"two\n");
        assert_eq!(repo.item_by_id(file_id, 4).unwrap().unwrap().path, sp("$/Proj/b.txt"));
        assert!(repo.item_at(&sp("$/Proj/a.txt"), 4).unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let (repo, file_id) = seeded();
        repo.commit(
            "bob",
            "delete",
            &[CommitChange {
                deleted: true,
                content: None,
                ..file(Some(file_id), "$/Proj/a.txt", "")
            }],
        )
        .unwrap();
        assert!(repo.item_at(&sp("$/Proj/a.txt"), 3).unwrap().is_none());
        assert!(repo.item_by_id(file_id, 3).unwrap().unwrap().deleted);
        assert!(repo.content(file_id, 3).is_err());
    }

    #[test]
    fn test_items_under_recursion() {
        let (repo, _) = seeded();
        repo.commit(
            "alice",
            "more",
            &[folder("$/Proj/sub"), file(None, "$/Proj/sub/b.txt", "b")],
        )
        .unwrap();

        let full = repo.items_under(&sp("$/Proj"), RecursionType::Full, 3).unwrap();
        assert_eq!(full.len(), 4);
        let one = repo.items_under(&sp("$/Proj"), RecursionType::OneLevel, 3).unwrap();
        assert_eq!(one.len(), 3);
        let none = repo.items_under(&sp("$/Proj"), RecursionType::None, 3).unwrap();
        assert_eq!(none.len(), 1);
    }

    #[test]
    fn test_commit_rejects_path_in_use_and_missing_parent() {
        let (repo, _) = seeded();
        let err = repo
            .commit("bob", "dup", &[file(None, "$/Proj/a.txt", "x")])
            .unwrap_err();
        assert!(matches!(err, RepositoryError::CommitRejected(_)));

        let err = repo
            .commit("bob", "orphan", &[file(None, "$/Nope/a.txt", "x")])
            .unwrap_err();
        assert!(matches!(err, RepositoryError::CommitRejected(_)));
        // A rejected commit leaves no changeset behind.
        assert_eq!(repo.latest_changeset().unwrap(), 2);
    }

    #[test]
    fn test_changed_items() {
        let (repo, file_id) = seeded();
        repo.commit("bob", "edit", &[file(Some(file_id), "$/Proj/a.txt", "two\n")])
            .unwrap();
        let added = repo
            .commit("bob", "add", &[file(None, "$/Proj/c.txt", "c")])
            .unwrap()
            .item_ids[0];

        let changes = repo
            .changed_items(&sp("$/Proj"), RecursionType::Full, 3, 4)
            .unwrap();
        assert_eq!(changes.len(), 2);
        let edit = changes.iter().find(|h| h.item_id == file_id).unwrap();
        assert_eq!(edit.before.as_ref().unwrap().changeset, 2);
        assert_eq!(edit.after.as_ref().unwrap().changeset, 3);
        let add = changes.iter().find(|h| h.item_id == added).unwrap();
        assert!(add.before.is_none());
    }

    #[test]
    fn test_resolve_version() {
        let (repo, _) = seeded();
        assert_eq!(repo.resolve_version(&VersionSpec::Latest).unwrap(), 2);
        assert_eq!(repo.resolve_version(&VersionSpec::Changeset(1)).unwrap(), 1);
        assert!(matches!(
            repo.resolve_version(&VersionSpec::Changeset(9)),
            Err(RepositoryError::ChangesetNotFound(9))
        ));
        assert!(repo.resolve_version(&VersionSpec::Workspace).is_err());

        let tomorrow = Utc::now() + chrono::Duration::days(1);
        assert_eq!(repo.resolve_version(&VersionSpec::Date(tomorrow)).unwrap(), 2);
        let long_ago = DateTime::parse_from_rfc3339("2000-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(repo.resolve_version(&VersionSpec::Date(long_ago)).is_err());
    }

    #[test]
    fn test_create_and_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection.db");
        SqliteRepository::create(&path).unwrap();
        assert!(matches!(
            SqliteRepository::create(&path),
            Err(RepositoryError::AlreadyExists(_))
        ));
        let repo = SqliteRepository::open(&path).unwrap();
        assert_eq!(repo.latest_changeset().unwrap(), 1);
        assert!(matches!(
            SqliteRepository::open(dir.path().join("missing.db")),
            Err(RepositoryError::NotFound(_))
        ));
    }
}
