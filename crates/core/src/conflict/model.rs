//! Conflict records and resolution kinds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::FileEncoding;
use crate::models::{ChangeType, ItemType};
use crate::paths::{PathFilter, ServerPath};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Categorisation of a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Your pending edit and a newer server version touch the same file.
    Content,
    /// A merge or rollback change collides with the target item.
    Merge,
    /// Two changes disagree about an item's name or existence.
    Namespace,
    /// A local file that is not under pending change blocks a get.
    Local,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Merge => "merge",
            Self::Namespace => "namespace",
            Self::Local => "local",
        }
    }

    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "content" => Some(Self::Content),
            "merge" => Some(Self::Merge),
            "namespace" => Some(Self::Namespace),
            "local" => Some(Self::Local),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a conflict should be (or was) resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    None,
    /// Combine both sides: a three-way content merge, or taking their name
    /// (or a new one) for a folder.
    AcceptMerge,
    AcceptYours,
    AcceptTheirs,
    /// Drop the conflict record without touching anything else.
    DeleteConflict,
    /// Keep your item and bring theirs in under a new name.
    AcceptYoursRenameTheirs,
    /// Replace the blocking local file with the server version.
    OverwriteLocal,
    /// Merge content with a configured external tool.
    ExternalTool,
}

impl Resolution {
    pub const ALL: [Resolution; 7] = [
        Self::AcceptMerge,
        Self::AcceptYours,
        Self::AcceptTheirs,
        Self::DeleteConflict,
        Self::AcceptYoursRenameTheirs,
        Self::OverwriteLocal,
        Self::ExternalTool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AcceptMerge => "accept_merge",
            Self::AcceptYours => "accept_yours",
            Self::AcceptTheirs => "accept_theirs",
            Self::DeleteConflict => "delete_conflict",
            Self::AcceptYoursRenameTheirs => "accept_yours_rename_theirs",
            Self::OverwriteLocal => "overwrite_local",
            Self::ExternalTool => "external_tool",
        }
    }

    /// Whether this resolution makes sense for `conflict` at all. Inapplicable
    /// conflicts are skipped, not failed.
    pub fn applies_to(&self, conflict: &Conflict) -> bool {
        match self {
            Self::None => false,
            Self::AcceptYours | Self::AcceptTheirs | Self::DeleteConflict => true,
            Self::AcceptMerge => conflict.conflict_type != ConflictType::Local,
            Self::AcceptYoursRenameTheirs => conflict.conflict_type == ConflictType::Namespace,
            Self::OverwriteLocal => conflict.conflict_type == ConflictType::Local,
            Self::ExternalTool => {
                conflict.item_type == ItemType::File
                    && conflict.conflict_type != ConflictType::Local
                    && !conflict.their_deleted()
            }
        }
    }

    /// Resolutions that produce new file content from both sides.
    pub fn merges_content(&self) -> bool {
        matches!(self, Self::AcceptMerge | Self::ExternalTool)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Accepts the stored names as well as the classic `/auto` spellings
    /// (`AutoMerge`, `KeepYours`, `TakeTheirs`, ...), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "none" => Ok(Self::None),
            "acceptmerge" | "automerge" | "merge" => Ok(Self::AcceptMerge),
            "acceptyours" | "keepyours" | "yours" => Ok(Self::AcceptYours),
            "accepttheirs" | "taketheirs" | "theirs" => Ok(Self::AcceptTheirs),
            "deleteconflict" => Ok(Self::DeleteConflict),
            "acceptyoursrenametheirs" | "keepyoursrenametheirs" => {
                Ok(Self::AcceptYoursRenameTheirs)
            }
            "overwritelocal" => Ok(Self::OverwriteLocal),
            "externaltool" | "tool" => Ok(Self::ExternalTool),
            _ => Err(format!("unknown resolution '{s}'")),
        }
    }
}

/// How to reconcile differing encodings during a content merge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "encoding")]
pub enum EncodingStrategy {
    /// All three sides must already agree.
    #[default]
    Default,
    /// Read every side as this encoding, whatever the server recorded.
    OverrideExplicit(FileEncoding),
    /// Read each side in its own encoding and write the result in this one.
    ConvertExplicit(FileEncoding),
}

/// Options attached to a resolution attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionOptions {
    pub encoding: EncodingStrategy,
    /// Write merge output even when it still contains conflict markers.
    pub accept_merge_with_conflicts: bool,
    /// New name for the item (or, for accept-yours-rename-theirs, for theirs).
    pub new_path: Option<ServerPath>,
}

// ---------------------------------------------------------------------------
// Conflict
// ---------------------------------------------------------------------------

/// A recorded conflict in a workspace.
///
/// Content references point into the repository as `(item id, changeset)`;
/// "yours" is always the file on disk at `your_server_item`'s local path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conflict {
    pub id: i64,
    pub conflict_type: ConflictType,
    pub item_type: ItemType,

    /// Your item, if it is known to the server.
    pub item_id: Option<i64>,
    /// The path in this workspace the conflict is about.
    pub your_server_item: ServerPath,
    pub your_change: ChangeType,
    /// The workspace version your side is based on (0 for new items).
    pub your_version: i64,
    pub your_encoding: FileEncoding,

    pub their_item_id: Option<i64>,
    pub their_server_item: Option<ServerPath>,
    pub their_change: ChangeType,
    pub their_version: i64,

    pub base_item_id: Option<i64>,
    pub base_version: i64,

    /// Where accepting their change would put the item in this workspace.
    pub target_item: Option<ServerPath>,

    pub message: String,

    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub options: ResolutionOptions,

    pub created_at: DateTime<Utc>,
}

impl Conflict {
    pub fn new(conflict_type: ConflictType, item_type: ItemType, your_server_item: ServerPath) -> Self {
        Self {
            id: 0,
            conflict_type,
            item_type,
            item_id: None,
            your_server_item,
            your_change: ChangeType::NONE,
            your_version: 0,
            your_encoding: FileEncoding::UTF8,
            their_item_id: None,
            their_server_item: None,
            their_change: ChangeType::NONE,
            their_version: 0,
            base_item_id: None,
            base_version: 0,
            target_item: None,
            message: String::new(),
            resolution: Resolution::None,
            options: ResolutionOptions::default(),
            created_at: Utc::now(),
        }
    }

    pub fn their_deleted(&self) -> bool {
        self.their_change.contains(ChangeType::DELETE)
    }

    pub fn their_renamed(&self) -> bool {
        self.their_change.contains(ChangeType::RENAME)
    }

    pub fn is_rollback(&self) -> bool {
        self.their_change.contains(ChangeType::ROLLBACK)
    }

    /// Where their change puts the item: the explicit target, else their path.
    pub fn their_target(&self) -> Option<&ServerPath> {
        self.target_item.as_ref().or(self.their_server_item.as_ref())
    }

    /// Sort key: parents before children, then by path.
    pub fn depth(&self) -> usize {
        self.your_server_item.depth()
    }

    /// True when resolving this conflict the way it is currently set up moves
    /// a folder, so conflicts below it must wait for a fresh query.
    pub fn changes_location(&self) -> bool {
        if !self.item_type.is_folder() {
            return false;
        }
        match self.resolution {
            Resolution::AcceptMerge | Resolution::AcceptTheirs => {
                self.options.new_path.is_some()
                    || self
                        .their_change
                        .intersects(ChangeType::RENAME | ChangeType::UNDELETE | ChangeType::DELETE)
                    || (self.resolution == Resolution::AcceptMerge
                        && self.your_change.intersects(ChangeType::RENAME | ChangeType::UNDELETE))
            }
            Resolution::AcceptYoursRenameTheirs => true,
            _ => false,
        }
    }

    /// Every path this conflict occupies in the workspace namespace.
    pub fn paths(&self) -> Vec<ServerPath> {
        let mut paths = vec![self.your_server_item.clone()];
        for p in [&self.their_server_item, &self.target_item].into_iter().flatten() {
            if !paths.contains(p) {
                paths.push(p.clone());
            }
        }
        paths
    }

    /// Whether the conflict is below (strictly) any of `folders`.
    pub fn is_below_any(&self, folders: &[ServerPath]) -> bool {
        folders
            .iter()
            .any(|f| self.your_server_item.is_descendant_of(f))
    }

    pub fn matches(&self, filter: &PathFilter) -> bool {
        self.paths().iter().any(|p| filter.matches(p))
    }

    /// One-line description for listings.
    pub fn describe(&self) -> String {
        if !self.message.is_empty() {
            return self.message.clone();
        }
        match self.conflict_type {
            ConflictType::Content => format!(
                "{}: the item content has changed (yours: {}, theirs: {})",
                self.your_server_item, self.your_change, self.their_change
            ),
            ConflictType::Merge => format!(
                "{}: the source and target both have changes ({})",
                self.your_server_item, self.their_change
            ),
            ConflictType::Namespace => format!(
                "{}: the name is in use or was changed on both sides",
                self.your_server_item
            ),
            ConflictType::Local => format!(
                "{}: a writable local file is in the way",
                self.your_server_item
            ),
        }
    }
}
