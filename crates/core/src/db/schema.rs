//! Workspace database schema and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS workspace_meta (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS working_folders (
            folded_item TEXT PRIMARY KEY,
            server_item TEXT NOT NULL,
            local_item  TEXT
        );

        -- Items as last retrieved from the server.
        CREATE TABLE IF NOT EXISTS local_items (
            item_id     INTEGER PRIMARY KEY,
            server_path TEXT    NOT NULL,
            folded_path TEXT    NOT NULL,
            item_type   TEXT    NOT NULL,
            version     INTEGER NOT NULL,
            encoding    INTEGER NOT NULL,
            hash        TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_local_items_path ON local_items (folded_path);

        CREATE TABLE IF NOT EXISTS pending_changes (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id            INTEGER,
            server_path        TEXT    NOT NULL,
            folded_path        TEXT    NOT NULL,
            source_server_path TEXT,
            change_type        INTEGER NOT NULL,
            item_type          TEXT    NOT NULL,
            encoding           INTEGER NOT NULL,
            lock_level         TEXT    NOT NULL DEFAULT 'none',
            version            INTEGER NOT NULL DEFAULT 0,
            merge_source       TEXT,
            merge_version      INTEGER,
            created_at         TEXT    NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_item ON pending_changes (item_id)
            WHERE item_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_pending_path ON pending_changes (folded_path);

        CREATE TABLE IF NOT EXISTS conflicts (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            conflict_type     TEXT    NOT NULL,
            item_type         TEXT    NOT NULL,
            item_id           INTEGER,
            your_server_item  TEXT    NOT NULL,
            your_change       INTEGER NOT NULL,
            your_version      INTEGER NOT NULL,
            your_encoding     INTEGER NOT NULL,
            their_item_id     INTEGER,
            their_server_item TEXT,
            their_change      INTEGER NOT NULL,
            their_version     INTEGER NOT NULL,
            base_item_id      INTEGER,
            base_version      INTEGER NOT NULL,
            target_item       TEXT,
            message           TEXT    NOT NULL DEFAULT '',
            created_at        TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conflicts_item ON conflicts (item_id);
        "#,
    ),
    (
        2,
        "get history",
        r#"
        CREATE TABLE IF NOT EXISTS get_history (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            operation   TEXT    NOT NULL,
            version     INTEGER NOT NULL,
            status      TEXT    NOT NULL,
            details     TEXT,
            recorded_at TEXT    NOT NULL
        );
        "#,
    ),
];

/// Run all pending workspace migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    apply_migrations(conn, MIGRATIONS)
}

/// Apply every migration in `migrations` newer than the stored
/// `user_version`, in order.
pub fn apply_migrations(
    conn: &Connection,
    migrations: &[(u32, &str, &str)],
) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = migrations.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in migrations {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
pub fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
