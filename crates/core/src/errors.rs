//! Error types for the tfvc core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Checkin(#[from] CheckinError),
}

// ---------------------------------------------------------------------------
// Server path errors
// ---------------------------------------------------------------------------

/// Errors raised while parsing or manipulating server paths.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("server path must not be empty")]
    Empty,

    /// The path does not start with `$/`.
    #[error("'{0}' is not a server path (server paths start with '$/')")]
    NotServerPath(String),

    #[error("server path '{path}' contains the invalid character {ch:?}")]
    InvalidCharacter { path: String, ch: char },

    #[error("server path '{path}' contains the invalid name '{segment}'")]
    InvalidSegment { path: String, segment: String },

    #[error("server path is {len} characters long; the maximum is {max}")]
    TooLong { len: usize, max: usize },

    /// `..` segments climbed above `$/`.
    #[error("server path '{0}' refers to a location above '$/'")]
    EscapesRoot(String),

    #[error("wildcards are not allowed in '{0}'")]
    WildcardNotAllowed(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration and workspace-cache loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse or serialization error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Repository (server) errors
// ---------------------------------------------------------------------------

/// Errors from the version-control server a workspace talks to.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("collection not found at '{0}'")]
    NotFound(String),

    #[error("collection at '{0}' already exists")]
    AlreadyExists(String),

    #[error("item {path} does not exist at version {version}")]
    ItemNotFound { path: String, version: String },

    #[error("changeset {0} does not exist")]
    ChangesetNotFound(i64),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("commit rejected: {0}")]
    CommitRejected(String),

    #[error("repository database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::SqliteError(e))
    }
}

// ---------------------------------------------------------------------------
// Encoding errors
// ---------------------------------------------------------------------------

/// Errors from decoding or encoding file content.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("binary content cannot be treated as text")]
    Binary,

    #[error("content is not valid {0}")]
    Malformed(String),

    #[error("content cannot be represented in {0}")]
    Unmappable(String),

    #[error("unknown encoding '{0}'")]
    Unknown(String),
}

// ---------------------------------------------------------------------------
// Workspace errors
// ---------------------------------------------------------------------------

/// Errors from workspace operations (mappings, pending changes, get, merge).
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("'{0}' is not mapped in this workspace")]
    NotMapped(String),

    #[error("'{0}' is not under version control")]
    NotVersioned(String),

    #[error("'{0}' already exists")]
    AlreadyExists(String),

    #[error("workspace '{0}' not found")]
    NotFound(String),

    #[error("workspace '{0}' already exists")]
    WorkspaceExists(String),

    #[error("local path '{path}' is already mapped in workspace '{workspace}'")]
    MappingOverlap { path: String, workspace: String },

    #[error("invalid item specification: {0}")]
    InvalidSpec(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for WorkspaceError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::SqliteError(e))
    }
}

impl WorkspaceError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from conflict queries and resolve-request validation.
#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("conflict {0} not found")]
    NotFound(i64),

    /// The resolve request is malformed; reported before any resolution.
    #[error("invalid resolve request: {0}")]
    InvalidRequest(String),

    #[error("a new name applies to exactly one conflict, but {0} conflicts match")]
    NewNameRequiresSingleConflict(usize),

    #[error("three-way merge failed: {0}")]
    MergeFailed(String),

    #[error("conflict database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

/// Failure of a single resolution attempt.
///
/// `Fatal` aborts the whole resolve run; `Recoverable` is recorded against
/// the conflict and the run continues with the next one.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{0}")]
    Recoverable(String),

    #[error(transparent)]
    Fatal(Box<CoreError>),
}

impl ResolveError {
    pub fn recoverable(msg: impl Into<String>) -> Self {
        Self::Recoverable(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<WorkspaceError> for ResolveError {
    fn from(e: WorkspaceError) -> Self {
        Self::Fatal(Box::new(CoreError::Workspace(e)))
    }
}

impl From<DatabaseError> for ResolveError {
    fn from(e: DatabaseError) -> Self {
        Self::Fatal(Box::new(CoreError::Database(e)))
    }
}

impl From<RepositoryError> for ResolveError {
    fn from(e: RepositoryError) -> Self {
        Self::Fatal(Box::new(CoreError::Repository(e)))
    }
}

// ---------------------------------------------------------------------------
// External tool errors
// ---------------------------------------------------------------------------

/// Errors from launching an external merge tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("no merge tool is configured for '{0}'")]
    NotConfigured(String),

    /// The process could not be started at all.
    #[error("failed to launch merge tool '{command}': {source}")]
    LaunchFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process was terminated by a signal before it exited.
    #[error("merge tool '{0}' was interrupted")]
    Interrupted(String),

    #[error("merge tool '{command}' exited with code {code}")]
    ExitStatus { command: String, code: i32 },

    #[error("merge tool '{0}' did not produce a result file")]
    NoResult(String),

    #[error("merge tool I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Errors after which no further resolution attempt can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotConfigured(_) | Self::LaunchFailed { .. })
    }
}

// ---------------------------------------------------------------------------
// Checkin errors
// ---------------------------------------------------------------------------

/// Errors from checking in pending changes.
#[derive(Debug, Error)]
pub enum CheckinError {
    #[error("there are no pending changes to check in")]
    NothingToCheckIn,

    #[error("{0} unresolved conflict(s) must be resolved before checking in")]
    UnresolvedConflicts(usize),

    #[error("a newer version of {path} exists on the server (yours: C{yours}, latest: C{latest}); get and resolve first")]
    NewerVersionExists {
        path: String,
        yours: i64,
        latest: i64,
    },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl From<RepositoryError> for CheckinError {
    fn from(e: RepositoryError) -> Self {
        Self::Workspace(WorkspaceError::Repository(e))
    }
}

impl From<DatabaseError> for CheckinError {
    fn from(e: DatabaseError) -> Self {
        Self::Workspace(WorkspaceError::Database(e))
    }
}
