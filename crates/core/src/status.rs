//! Per-item results of get, merge and rollback, folded into a summary.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::models::CommandStatus;
use crate::paths::ServerPath;

/// What happened (or would happen) to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GetOperationKind {
    Get,
    Replace,
    Delete,
    Rename,
    Branch,
    Merge,
    Rollback,
    Undelete,
}

impl GetOperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Rename => "rename",
            Self::Branch => "branch",
            Self::Merge => "merge",
            Self::Rollback => "rollback",
            Self::Undelete => "undelete",
        }
    }
}

impl fmt::Display for GetOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "message")]
pub enum OperationOutcome {
    Applied,
    /// A conflict was recorded instead.
    Conflict,
    /// Skipped for a reason the user should see.
    Warning(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetOperation {
    pub kind: GetOperationKind,
    pub server_item: ServerPath,
    /// Previous path for renames, source path for merges.
    pub source_item: Option<ServerPath>,
    pub local_item: Option<PathBuf>,
    pub version: i64,
    pub outcome: OperationOutcome,
}

impl GetOperation {
    pub fn new(kind: GetOperationKind, server_item: ServerPath, version: i64) -> Self {
        Self {
            kind,
            server_item,
            source_item: None,
            local_item: None,
            version,
            outcome: OperationOutcome::Applied,
        }
    }

    pub fn with_source(mut self, source: ServerPath) -> Self {
        self.source_item = Some(source);
        self
    }

    pub fn with_local(mut self, local: Option<PathBuf>) -> Self {
        self.local_item = local;
        self
    }

    pub fn with_outcome(mut self, outcome: OperationOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// Aggregate result of one get, merge or rollback.
#[derive(Debug, Clone, Serialize)]
pub struct GetStatus {
    pub operations: Vec<GetOperation>,
    pub applied: usize,
    pub conflicts: usize,
    pub warnings: usize,
    pub failures: usize,
    pub no_action_needed: bool,
    /// Target changeset, when one was resolved.
    pub version: Option<i64>,
    pub preview: bool,
}

impl Default for GetStatus {
    fn default() -> Self {
        Self {
            operations: Vec::new(),
            applied: 0,
            conflicts: 0,
            warnings: 0,
            failures: 0,
            no_action_needed: true,
            version: None,
            preview: false,
        }
    }
}

impl GetStatus {
    pub fn new(version: i64, preview: bool) -> Self {
        Self {
            version: Some(version),
            preview,
            ..Default::default()
        }
    }

    pub fn record(&mut self, operation: GetOperation) {
        match &operation.outcome {
            OperationOutcome::Applied => self.applied += 1,
            OperationOutcome::Conflict => self.conflicts += 1,
            OperationOutcome::Warning(_) => self.warnings += 1,
            OperationOutcome::Failed(_) => self.failures += 1,
        }
        self.no_action_needed = false;
        self.operations.push(operation);
    }

    pub fn merge(&mut self, other: GetStatus) {
        for op in other.operations {
            self.record(op);
        }
        self.version = self.version.or(other.version);
    }

    pub fn has_problems(&self) -> bool {
        self.conflicts + self.failures + self.warnings > 0
    }

    pub fn status(&self) -> CommandStatus {
        if self.no_action_needed || !self.has_problems() {
            return CommandStatus::Success;
        }
        if self.applied > 0 {
            return CommandStatus::PartialSuccess;
        }
        if self.conflicts + self.failures > 0 {
            CommandStatus::Failure
        } else {
            CommandStatus::Success
        }
    }
}
