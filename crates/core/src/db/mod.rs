//! SQLite persistence layer for workspace state.
//!
//! Provides a [`Database`] handle with WAL-mode journaling, automatic schema
//! migrations, and query helpers for the local item table, pending changes,
//! conflicts, and working folders of one workspace.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::conflict::ConflictType;
use crate::encoding::FileEncoding;
use crate::errors::DatabaseError;
use crate::models::{ChangeType, ItemType, LockLevel};
use crate::paths::ServerPath;

pub use queries::LocalItem;

/// Main database handle wrapping a SQLite connection.
///
/// The inner connection is wrapped in a `Mutex` so that `Database` is
/// `Send + Sync`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening workspace database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        debug!("database opened successfully with WAL mode");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run all schema migrations to bring the database up to date.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        info!("initializing workspace schema");
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("workspace schema is up to date");
        Ok(())
    }

    /// Obtain a lock on the underlying connection.
    ///
    /// If the Mutex is poisoned (a previous holder panicked), the lock is
    /// recovered rather than propagating a panic.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Execute a closure inside a SQLite transaction. If the closure returns
    /// `Ok`, the transaction is committed; otherwise it is rolled back.
    ///
    /// Runs as a savepoint, so it nests inside [`Database::begin_savepoint`].
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.savepoint()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Open a named savepoint. Every statement until the matching
    /// [`Database::release_savepoint`] or [`Database::rollback_savepoint`]
    /// belongs to it, across helper calls.
    pub fn begin_savepoint(&self, name: &'static str) -> Result<(), DatabaseError> {
        self.conn().execute_batch(&format!("SAVEPOINT {name};"))?;
        Ok(())
    }

    pub fn release_savepoint(&self, name: &'static str) -> Result<(), DatabaseError> {
        self.conn().execute_batch(&format!("RELEASE {name};"))?;
        Ok(())
    }

    /// Undo everything since [`Database::begin_savepoint`] and close it.
    pub fn rollback_savepoint(&self, name: &'static str) -> Result<(), DatabaseError> {
        self.conn()
            .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Column conversions
// ---------------------------------------------------------------------------

fn text_column<T, E>(value: ValueRef<'_>, parse: impl FnOnce(&str) -> Result<T, E>) -> FromSqlResult<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let s = value.as_str()?;
    parse(s).map_err(|e| FromSqlError::Other(Box::new(e)))
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognised value '{0}'")]
struct UnknownValue(String);

impl ToSql for ServerPath {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ServerPath {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_column(value, ServerPath::parse_pattern)
    }
}

impl ToSql for ChangeType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.bits())))
    }
}

impl FromSql for ChangeType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let bits = value.as_i64()?;
        u32::try_from(bits)
            .map(ChangeType::from_bits)
            .map_err(|_| FromSqlError::OutOfRange(bits))
    }
}

impl ToSql for FileEncoding {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code_page()))
    }
}

impl FromSql for FileEncoding {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code_page = value.as_i64()?;
        i32::try_from(code_page)
            .map(FileEncoding::from_code_page)
            .map_err(|_| FromSqlError::OutOfRange(code_page))
    }
}

impl ToSql for ItemType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ItemType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_column(value, |s| {
            ItemType::from_str_val(s).ok_or_else(|| UnknownValue(s.to_string()))
        })
    }
}

impl ToSql for ConflictType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ConflictType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_column(value, |s| {
            ConflictType::from_str_val(s).ok_or_else(|| UnknownValue(s.to_string()))
        })
    }
}

impl ToSql for LockLevel {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LockLevel {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(LockLevel::from_str_val(value.as_str()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().expect("failed to create in-memory db");
        db.initialize().expect("failed to initialize schema");
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ws.db");
        let db = Database::new(&path).expect("failed to create file db");
        db.initialize().expect("failed to initialize schema");
        assert!(path.exists());
    }

    #[test]
    fn test_transaction_rollback() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<(), DatabaseError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO workspace_meta (key, value, updated_at) VALUES (?1, ?2, ?3)",
                rusqlite::params!["name", "dev", "2025-01-01T00:00:00Z"],
            )?;
            Err(DatabaseError::NotFound {
                entity: "test".into(),
                id: "forced".into(),
            })
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM workspace_meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_savepoint_spans_helper_calls() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        db.begin_savepoint("work").unwrap();
        db.set_meta("name", "dev").unwrap();
        db.transaction(|conn| {
            conn.execute(
                "INSERT INTO workspace_meta (key, value, updated_at) VALUES (?1, ?2, ?3)",
                rusqlite::params!["owner", "alice", "2025-01-01T00:00:00Z"],
            )?;
            Ok(())
        })
        .unwrap();
        db.rollback_savepoint("work").unwrap();
        assert_eq!(db.get_meta("name").unwrap(), None);
        assert_eq!(db.get_meta("owner").unwrap(), None);

        db.begin_savepoint("work").unwrap();
        db.set_meta("name", "dev").unwrap();
        db.release_savepoint("work").unwrap();
        assert_eq!(db.get_meta("name").unwrap().as_deref(), Some("dev"));
    }

    #[test]
    fn test_column_conversions_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        let path = ServerPath::parse("$/Proj/a.txt").unwrap();
        let ct = ChangeType::MERGE | ChangeType::EDIT;
        let (p, c, e, t): (ServerPath, ChangeType, FileEncoding, ItemType) = conn
            .query_row(
                "SELECT ?1, ?2, ?3, ?4",
                rusqlite::params![path, ct, FileEncoding::UTF16LE, ItemType::Folder],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(p, path);
        assert_eq!(c, ct);
        assert_eq!(e, FileEncoding::UTF16LE);
        assert_eq!(t, ItemType::Folder);
    }

    #[test]
    fn test_invalid_column_value_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        let result: rusqlite::Result<ItemType> =
            conn.query_row("SELECT 'blob'", [], |row| row.get(0));
        assert!(result.is_err());
    }
}
