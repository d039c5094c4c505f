//! tfvc core library.
//!
//! This crate provides the foundational components of a Team Foundation
//! Version Control client: server paths and working-folder mappings, the
//! workspace state database, pending changes, get/merge/rollback
//! orchestration, checkin, and the conflict-resolution engine.

pub mod cache;
pub mod config;
pub mod conflict;
pub mod db;
pub mod encoding;
pub mod errors;
pub mod events;
pub mod mappings;
pub mod models;
pub mod paths;
pub mod pending;
pub mod repository;
pub mod status;
pub mod tool;
pub mod workspace;

// Re-exports for convenience.
pub use config::ClientConfig;
pub use conflict::{Conflict, ResolutionEngine, ResolveRequest};
pub use db::Database;
pub use errors::CoreError;
pub use paths::ServerPath;
pub use repository::{Repository, SqliteRepository};
pub use workspace::{Workspace, WorkspaceManager};
