//! Domain model types shared by the workspace, conflict engine, and CLI.
//!
//! Change types, item kinds, version specifications, and the command-status
//! lattice that every command folds its per-item outcomes into.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Change type
// ---------------------------------------------------------------------------

/// A set of change kinds pended on, or committed against, an item.
///
/// Stored as a bit set so combinations such as `merge, edit` or
/// `rename, edit` round-trip through the database as a single integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeType(u32);

impl ChangeType {
    pub const NONE: Self = Self(0);
    pub const ADD: Self = Self(1 << 0);
    pub const EDIT: Self = Self(1 << 1);
    pub const DELETE: Self = Self(1 << 2);
    pub const RENAME: Self = Self(1 << 3);
    pub const BRANCH: Self = Self(1 << 4);
    pub const MERGE: Self = Self(1 << 5);
    pub const UNDELETE: Self = Self(1 << 6);
    pub const ROLLBACK: Self = Self(1 << 7);
    pub const ENCODING: Self = Self(1 << 8);
    pub const LOCK: Self = Self(1 << 9);

    const ALL_BITS: u32 = (1 << 10) - 1;

    const NAMES: &'static [(ChangeType, &'static str)] = &[
        (Self::ADD, "add"),
        (Self::BRANCH, "branch"),
        (Self::MERGE, "merge"),
        (Self::ROLLBACK, "rollback"),
        (Self::UNDELETE, "undelete"),
        (Self::RENAME, "rename"),
        (Self::EDIT, "edit"),
        (Self::ENCODING, "encoding"),
        (Self::DELETE, "delete"),
        (Self::LOCK, "lock"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping any unknown ones.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL_BITS)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && (self.0 & other.0) == other.0
    }

    /// True when `self` and `other` share at least one bit.
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// True for changes that introduce an item the server does not yet have.
    pub const fn is_new_item(self) -> bool {
        self.intersects(Self(Self::ADD.0 | Self::BRANCH.0))
    }
}

impl BitOr for ChangeType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for ChangeType {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join(", "))
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = Self::NONE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("none") {
                continue;
            }
            let flag = Self::NAMES
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(part))
                .map(|(flag, _)| *flag)
                .ok_or_else(|| format!("unknown change type '{part}'"))?;
            result |= flag;
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Item type
// ---------------------------------------------------------------------------

/// Kind of versioned item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    File,
    Folder,
    Symlink,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
            Self::Symlink => "symlink",
        }
    }

    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "folder" => Some(Self::Folder),
            "symlink" => Some(Self::Symlink),
            _ => None,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Recursion and locks
// ---------------------------------------------------------------------------

/// How far an item specification reaches below its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecursionType {
    /// The named item only.
    #[default]
    None,
    /// The item and its direct children.
    OneLevel,
    /// The item and everything below it.
    Full,
}

/// Lock level requested alongside a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockLevel {
    #[default]
    None,
    Checkin,
    Checkout,
}

impl LockLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Checkin => "checkin",
            Self::Checkout => "checkout",
        }
    }

    pub fn from_str_val(s: &str) -> Self {
        match s {
            "checkin" => Self::Checkin,
            "checkout" => Self::Checkout,
            _ => Self::None,
        }
    }
}

// ---------------------------------------------------------------------------
// Version specifications
// ---------------------------------------------------------------------------

/// A point in repository history.
///
/// Textual forms: `T` (latest), `C12` or `12` (changeset), `D2024-01-31`
/// or `D2024-01-31T10:00:00Z` (date), `W` (the workspace's own version).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum VersionSpec {
    #[default]
    Latest,
    Changeset(i64),
    Date(DateTime<Utc>),
    Workspace,
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "T"),
            Self::Changeset(n) => write!(f, "C{n}"),
            Self::Date(d) => write!(f, "D{}", d.to_rfc3339()),
            Self::Workspace => write!(f, "W"),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("version specification must not be empty".into());
        }
        if s.eq_ignore_ascii_case("t") {
            return Ok(Self::Latest);
        }
        if s.eq_ignore_ascii_case("w") {
            return Ok(Self::Workspace);
        }

        let (prefix, rest) = match s.char_indices().nth(1) {
            Some((i, _)) => s.split_at(i),
            None => (s, ""),
        };
        if prefix.eq_ignore_ascii_case("d") {
            return parse_date(rest).map(Self::Date);
        }

        let digits = if prefix.eq_ignore_ascii_case("c") { rest } else { s };
        let n: i64 = digits
            .parse()
            .map_err(|_| format!("invalid version specification '{s}'"))?;
        if n < 1 {
            return Err(format!("changeset numbers start at 1, got {n}"));
        }
        Ok(Self::Changeset(n))
    }
}

fn parse_date(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{s}' (expected YYYY-MM-DD or RFC 3339)"))?;
    // The whole day is included.
    date.and_hms_opt(23, 59, 59)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid date '{s}'"))
}

/// A range of versions, written `from~to` or just `to`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionRange {
    pub from: Option<VersionSpec>,
    pub to: VersionSpec,
}

impl VersionRange {
    pub fn single(version: VersionSpec) -> Self {
        Self {
            from: Some(version.clone()),
            to: version,
        }
    }
}

impl FromStr for VersionRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('~') {
            Some((from, to)) => Ok(Self {
                from: Some(from.parse()?),
                to: to.parse()?,
            }),
            None => Ok(Self {
                from: None,
                to: s.parse()?,
            }),
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.from {
            Some(from) => write!(f, "{from}~{}", self.to),
            None => write!(f, "{}", self.to),
        }
    }
}

// ---------------------------------------------------------------------------
// Item specifications
// ---------------------------------------------------------------------------

/// A path argument as given by the user: a server path (`$/...`) or a
/// local path, optionally with a wildcard in its last segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub path: String,
    pub recursion: RecursionType,
}

impl ItemSpec {
    pub fn new(path: impl Into<String>, recursion: RecursionType) -> Self {
        Self {
            path: path.into(),
            recursion,
        }
    }

    pub fn is_server_path(&self) -> bool {
        self.path.starts_with('$')
    }
}

// ---------------------------------------------------------------------------
// Command status
// ---------------------------------------------------------------------------

/// Outcome of a whole command, folded from per-item outcomes.
///
/// `Unknown` is the identity of [`combine`](Self::combine): a command that
/// touched nothing reports nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    #[default]
    Unknown,
    Success,
    PartialSuccess,
    Failure,
}

impl CommandStatus {
    pub fn combine(self, other: Self) -> Self {
        use CommandStatus::*;
        match (self, other) {
            (Unknown, x) | (x, Unknown) => x,
            (Success, Success) => Success,
            (Failure, Failure) => Failure,
            _ => PartialSuccess,
        }
    }

    /// Process exit code: 0 for success (or nothing done), 1 for partial
    /// success, 100 for failure.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Unknown | Self::Success => 0,
            Self::PartialSuccess => 1,
            Self::Failure => 100,
        }
    }

    pub fn from_outcomes(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (0, 0) => Self::Unknown,
            (_, 0) => Self::Success,
            (0, _) => Self::Failure,
            _ => Self::PartialSuccess,
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Success => write!(f, "success"),
            Self::PartialSuccess => write!(f, "partial_success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_display_and_parse() {
        let ct = ChangeType::MERGE | ChangeType::EDIT;
        assert_eq!(ct.to_string(), "merge, edit");
        assert_eq!("edit, merge".parse::<ChangeType>().unwrap(), ct);
        assert_eq!(ChangeType::NONE.to_string(), "none");
        assert!("frobnicate".parse::<ChangeType>().is_err());
    }

    #[test]
    fn test_change_type_contains() {
        let ct = ChangeType::RENAME | ChangeType::EDIT;
        assert!(ct.contains(ChangeType::RENAME));
        assert!(!ct.contains(ChangeType::DELETE));
        assert!(!ct.contains(ChangeType::NONE));
        assert!(ct.intersects(ChangeType::EDIT | ChangeType::DELETE));
        assert_eq!(ct.without(ChangeType::EDIT), ChangeType::RENAME);
        assert!((ChangeType::BRANCH | ChangeType::MERGE).is_new_item());
    }

    #[test]
    fn test_change_type_from_bits_masks_unknown() {
        let ct = ChangeType::from_bits(u32::MAX);
        assert!(ct.contains(ChangeType::LOCK));
        assert_eq!(ct.bits(), (1 << 10) - 1);
    }

    #[test]
    fn test_version_spec_parse() {
        assert_eq!("T".parse::<VersionSpec>().unwrap(), VersionSpec::Latest);
        assert_eq!("w".parse::<VersionSpec>().unwrap(), VersionSpec::Workspace);
        assert_eq!(
            "C12".parse::<VersionSpec>().unwrap(),
            VersionSpec::Changeset(12)
        );
        assert_eq!("7".parse::<VersionSpec>().unwrap(), VersionSpec::Changeset(7));
        assert!("C0".parse::<VersionSpec>().is_err());
        assert!("Cabc".parse::<VersionSpec>().is_err());

        match "D2024-01-31".parse::<VersionSpec>().unwrap() {
            VersionSpec::Date(d) => assert_eq!(d.to_rfc3339(), "2024-01-31T23:59:59+00:00"),
            other => panic!("expected date, got {other:?}"),
        }
    }

    #[test]
    fn test_version_range_parse() {
        let range: VersionRange = "C3~C9".parse().unwrap();
        assert_eq!(range.from, Some(VersionSpec::Changeset(3)));
        assert_eq!(range.to, VersionSpec::Changeset(9));
        assert_eq!(range.to_string(), "C3~C9");

        let range: VersionRange = "T".parse().unwrap();
        assert_eq!(range.from, None);
        assert_eq!(range.to, VersionSpec::Latest);
    }

    #[test]
    fn test_command_status_combine() {
        use CommandStatus::*;
        assert_eq!(Unknown.combine(Success), Success);
        assert_eq!(Failure.combine(Unknown), Failure);
        assert_eq!(Success.combine(Success), Success);
        assert_eq!(Success.combine(Failure), PartialSuccess);
        assert_eq!(Failure.combine(Success), PartialSuccess);
        assert_eq!(PartialSuccess.combine(Success), PartialSuccess);
        assert_eq!(Failure.combine(Failure), Failure);
    }

    #[test]
    fn test_command_status_exit_codes() {
        assert_eq!(CommandStatus::Unknown.exit_code(), 0);
        assert_eq!(CommandStatus::Success.exit_code(), 0);
        assert_eq!(CommandStatus::PartialSuccess.exit_code(), 1);
        assert_eq!(CommandStatus::Failure.exit_code(), 100);
    }

    #[test]
    fn test_command_status_from_outcomes() {
        assert_eq!(CommandStatus::from_outcomes(0, 0), CommandStatus::Unknown);
        assert_eq!(CommandStatus::from_outcomes(2, 0), CommandStatus::Success);
        assert_eq!(CommandStatus::from_outcomes(0, 1), CommandStatus::Failure);
        assert_eq!(
            CommandStatus::from_outcomes(1, 1),
            CommandStatus::PartialSuccess
        );
    }

    #[test]
    fn test_item_type_round_trip() {
        for t in [ItemType::File, ItemType::Folder, ItemType::Symlink] {
            assert_eq!(ItemType::from_str_val(t.as_str()), Some(t));
        }
        assert_eq!(ItemType::from_str_val("blob"), None);
    }
}
