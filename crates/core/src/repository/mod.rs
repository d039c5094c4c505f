//! The version-control server a workspace talks to.
//!
//! [`Repository`] is the seam between workspace logic and wherever history
//! lives. [`SqliteRepository`] keeps a whole collection in one SQLite file,
//! which is what the CLI and the tests use.

pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::encoding::FileEncoding;
use crate::errors::RepositoryError;
use crate::models::{ItemType, RecursionType, VersionSpec};
use crate::paths::ServerPath;

pub use sqlite::SqliteRepository;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An item as it exists at some version on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerItem {
    pub item_id: i64,
    pub path: ServerPath,
    pub item_type: ItemType,
    /// Changeset that produced this version of the item.
    pub changeset: i64,
    pub deleted: bool,
    pub encoding: FileEncoding,
    /// SHA-256 of the content; `None` for folders and deleted items.
    pub hash: Option<String>,
}

/// A committed changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub id: i64,
    pub owner: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// How one item changed across a version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemHistory {
    pub item_id: i64,
    /// State just before the range; `None` when the item did not exist.
    pub before: Option<ServerItem>,
    /// State at the end of the range; `None` when the item is gone.
    pub after: Option<ServerItem>,
}

impl ItemHistory {
    /// The most recent known path, for ordering and display.
    pub fn path(&self) -> Option<&ServerPath> {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(|i| &i.path)
    }
}

/// One change in a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitChange {
    /// Existing item, or `None` to create a new one.
    pub item_id: Option<i64>,
    pub path: ServerPath,
    pub item_type: ItemType,
    pub encoding: FileEncoding,
    /// File content; ignored for folders and deletions.
    pub content: Option<Vec<u8>>,
    pub deleted: bool,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub changeset: i64,
    /// Item id of each change, in the order the changes were given.
    pub item_ids: Vec<i64>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

pub trait Repository: Send + Sync {
    fn latest_changeset(&self) -> Result<i64, RepositoryError>;

    /// Turn a version spec into a changeset number. `W` is meaningless to a
    /// server and is rejected.
    fn resolve_version(&self, spec: &VersionSpec) -> Result<i64, RepositoryError>;

    fn changeset(&self, id: i64) -> Result<Changeset, RepositoryError>;

    /// The live (not deleted) item at `path` as of `version`.
    fn item_at(&self, path: &ServerPath, version: i64) -> Result<Option<ServerItem>, RepositoryError>;

    /// The item's latest state at or before `version`, deleted or not.
    fn item_by_id(&self, item_id: i64, version: i64) -> Result<Option<ServerItem>, RepositoryError>;

    /// Live items at or below `root` as of `version`, sorted by path.
    fn items_under(
        &self,
        root: &ServerPath,
        recursion: RecursionType,
        version: i64,
    ) -> Result<Vec<ServerItem>, RepositoryError>;

    /// Content of the item's latest state at or before `version`.
    fn content(&self, item_id: i64, version: i64) -> Result<Vec<u8>, RepositoryError>;

    /// Items changed in `from..=to` whose path before or after the range
    /// falls under `root`.
    fn changed_items(
        &self,
        root: &ServerPath,
        recursion: RecursionType,
        from: i64,
        to: i64,
    ) -> Result<Vec<ItemHistory>, RepositoryError>;

    fn commit(
        &self,
        owner: &str,
        comment: &str,
        changes: &[CommitChange],
    ) -> Result<CommitResult, RepositoryError>;
}

/// SHA-256 of `content`, hex-encoded.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
