//! Server paths.
//!
//! A [`ServerPath`] is an absolute, canonical path in the repository
//! namespace, rooted at `$/`. Paths compare case-insensitively but keep the
//! casing they were created with for display.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use glob_match::glob_match;
use serde::{Deserialize, Serialize};

use crate::errors::PathError;
use crate::models::RecursionType;

/// Maximum length of a server path, in characters.
pub const MAX_PATH_LENGTH: usize = 399;

const ROOT: &str = "$/";

/// Characters that may never appear in a path segment.
const INVALID_CHARS: &[char] = &['"', ':', '<', '>', '|', ';'];

const WILDCARD_CHARS: &[char] = &['*', '?'];

// ---------------------------------------------------------------------------
// ServerPath
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerPath {
    path: String,
    folded: String,
}

impl ServerPath {
    /// The repository root, `$/`.
    pub fn root() -> Self {
        Self::from_canonical(ROOT.to_string())
    }

    /// Parse and canonicalize a server path. Wildcards are rejected.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        Self::parse_inner(input, false)
    }

    /// Parse a server path that may carry a wildcard in its last segment.
    pub fn parse_pattern(input: &str) -> Result<Self, PathError> {
        Self::parse_inner(input, true)
    }

    fn from_canonical(path: String) -> Self {
        let folded = path.to_lowercase();
        Self { path, folded }
    }

    fn parse_inner(input: &str, allow_wildcard: bool) -> Result<Self, PathError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        let normalized = trimmed.replace('\\', "/");
        if normalized != "$" && !normalized.starts_with(ROOT) {
            return Err(PathError::NotServerPath(input.to_string()));
        }

        let mut segments: Vec<&str> = Vec::new();
        for segment in normalized[1..].split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        return Err(PathError::EscapesRoot(input.to_string()));
                    }
                }
                other => segments.push(other),
            }
        }

        let last = segments.len().saturating_sub(1);
        for (i, segment) in segments.iter().enumerate() {
            validate_segment(input, segment, allow_wildcard && i == last)?;
        }

        let path = if segments.is_empty() {
            ROOT.to_string()
        } else {
            format!("{ROOT}{}", segments.join("/"))
        };

        let len = path.chars().count();
        if len > MAX_PATH_LENGTH {
            return Err(PathError::TooLong {
                len,
                max: MAX_PATH_LENGTH,
            });
        }

        Ok(Self::from_canonical(path))
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path == ROOT
    }

    /// Segments below `$/`, in display casing.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path[ROOT.len()..].split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments below the root; the root itself has depth 0.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Last segment, or an empty string for the root.
    pub fn name(&self) -> &str {
        self.segments().last().unwrap_or("")
    }

    pub fn parent(&self) -> Option<ServerPath> {
        if self.is_root() {
            return None;
        }
        match self.path.rsplit_once('/') {
            Some(("$", _)) | None => Some(Self::root()),
            Some((prefix, _)) => Some(Self::from_canonical(prefix.to_string())),
        }
    }

    /// Append a relative path (segments separated by `/`).
    pub fn join(&self, relative: &str) -> Result<ServerPath, PathError> {
        if relative.is_empty() {
            return Ok(self.clone());
        }
        let base = self.path.trim_end_matches('/');
        Self::parse(&format!("{base}/{relative}"))
    }

    pub fn has_wildcard(&self) -> bool {
        self.name().contains(WILDCARD_CHARS)
    }

    /// Strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &ServerPath) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.folded.len() > ancestor.folded.len()
            && self.folded.starts_with(&ancestor.folded)
            && self.folded[ancestor.folded.len()..].starts_with('/')
    }

    pub fn is_same_or_descendant_of(&self, ancestor: &ServerPath) -> bool {
        self == ancestor || self.is_descendant_of(ancestor)
    }

    /// The path of `self` relative to `ancestor`, or `None` when `self` is
    /// not at or below it. The relative path keeps `self`'s casing.
    pub fn relative_to(&self, ancestor: &ServerPath) -> Option<String> {
        if !self.is_same_or_descendant_of(ancestor) {
            return None;
        }
        let skip = ancestor.depth();
        Some(self.segments().skip(skip).collect::<Vec<_>>().join("/"))
    }

    /// Move `self` from under `from` to the same relative place under `to`.
    pub fn rebase(&self, from: &ServerPath, to: &ServerPath) -> Option<ServerPath> {
        let relative = self.relative_to(from)?;
        to.join(&relative).ok()
    }

    /// Match against a path that may end in a wildcard segment.
    pub fn matches(&self, pattern: &ServerPath) -> bool {
        if !pattern.has_wildcard() {
            return self == pattern;
        }
        self.parent() == pattern.parent()
            && glob_match(&pattern.name().to_lowercase(), &self.name().to_lowercase())
    }
}

fn validate_segment(input: &str, segment: &str, allow_wildcard: bool) -> Result<(), PathError> {
    for ch in segment.chars() {
        if ch.is_control() || INVALID_CHARS.contains(&ch) {
            return Err(PathError::InvalidCharacter {
                path: input.to_string(),
                ch,
            });
        }
        if WILDCARD_CHARS.contains(&ch) && !allow_wildcard {
            return Err(PathError::WildcardNotAllowed(input.to_string()));
        }
    }
    if segment.starts_with('$') || segment.ends_with('.') || segment.ends_with(' ') {
        return Err(PathError::InvalidSegment {
            path: input.to_string(),
            segment: segment.to_string(),
        });
    }
    Ok(())
}

impl PartialEq for ServerPath {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for ServerPath {}

impl Hash for ServerPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl PartialOrd for ServerPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded.cmp(&other.folded)
    }
}

impl fmt::Debug for ServerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerPath({:?})", self.path)
    }
}

impl fmt::Display for ServerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl TryFrom<String> for ServerPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_pattern(&value)
    }
}

impl From<ServerPath> for String {
    fn from(value: ServerPath) -> Self {
        value.path
    }
}

impl std::str::FromStr for ServerPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// PathFilter
// ---------------------------------------------------------------------------

/// A server path plus recursion, used to select items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    pub path: ServerPath,
    pub recursion: RecursionType,
}

impl PathFilter {
    pub fn new(path: ServerPath, recursion: RecursionType) -> Self {
        Self { path, recursion }
    }

    /// The folder a repository query has to start from to cover this filter.
    pub fn query_root(&self) -> ServerPath {
        if self.path.has_wildcard() {
            self.path.parent().unwrap_or_else(ServerPath::root)
        } else {
            self.path.clone()
        }
    }

    pub fn matches(&self, candidate: &ServerPath) -> bool {
        if self.path.has_wildcard() {
            return self.matches_wildcard(candidate);
        }
        match self.recursion {
            RecursionType::None => candidate == &self.path,
            RecursionType::OneLevel => {
                candidate == &self.path || candidate.parent().as_ref() == Some(&self.path)
            }
            RecursionType::Full => candidate.is_same_or_descendant_of(&self.path),
        }
    }

    fn matches_wildcard(&self, candidate: &ServerPath) -> bool {
        if candidate.matches(&self.path) {
            return true;
        }
        // With recursion, anything below a matching item matches as well.
        let mut current = candidate.parent();
        let mut levels = 1;
        while let Some(ancestor) = current {
            if ancestor.matches(&self.path) {
                return match self.recursion {
                    RecursionType::None => false,
                    RecursionType::OneLevel => levels == 1,
                    RecursionType::Full => true,
                };
            }
            current = ancestor.parent();
            levels += 1;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ServerPath {
        ServerPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse_canonicalizes() {
        assert_eq!(p("$/Proj//src/./a.txt").as_str(), "$/Proj/src/a.txt");
        assert_eq!(p("$\\Proj\\src").as_str(), "$/Proj/src");
        assert_eq!(p("$/Proj/src/../lib/").as_str(), "$/Proj/lib");
        assert_eq!(p("$").as_str(), "$/");
        assert!(p("$/").is_root());
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert_eq!(ServerPath::parse(""), Err(PathError::Empty));
        assert!(matches!(
            ServerPath::parse("src/a.txt"),
            Err(PathError::NotServerPath(_))
        ));
        assert!(matches!(
            ServerPath::parse("$/.."),
            Err(PathError::EscapesRoot(_))
        ));
        assert!(matches!(
            ServerPath::parse("$/Proj/a|b"),
            Err(PathError::InvalidCharacter { ch: '|', .. })
        ));
        assert!(matches!(
            ServerPath::parse("$/Proj/$tf"),
            Err(PathError::InvalidSegment { .. })
        ));
        assert!(matches!(
            ServerPath::parse("$/Proj/trailing."),
            Err(PathError::InvalidSegment { .. })
        ));
        assert!(matches!(
            ServerPath::parse("$/Proj/*.txt"),
            Err(PathError::WildcardNotAllowed(_))
        ));
    }

    #[test]
    fn test_parse_length_limit() {
        let long = format!("$/{}", "a".repeat(MAX_PATH_LENGTH));
        assert!(matches!(
            ServerPath::parse(&long),
            Err(PathError::TooLong { .. })
        ));
        let ok = format!("$/{}", "a".repeat(MAX_PATH_LENGTH - 2));
        assert!(ServerPath::parse(&ok).is_ok());
    }

    #[test]
    fn test_wildcard_only_in_last_segment() {
        assert!(ServerPath::parse_pattern("$/Proj/*.txt").is_ok());
        assert!(matches!(
            ServerPath::parse_pattern("$/Pr*j/a.txt"),
            Err(PathError::WildcardNotAllowed(_))
        ));
    }

    #[test]
    fn test_case_insensitive_equality() {
        assert_eq!(p("$/Proj/Readme.md"), p("$/PROJ/readme.MD"));
        assert_eq!(p("$/Proj/Readme.md").to_string(), "$/Proj/Readme.md");

        let mut set = std::collections::HashSet::new();
        set.insert(p("$/A/b"));
        assert!(set.contains(&p("$/a/B")));
    }

    #[test]
    fn test_parent_name_depth() {
        let path = p("$/Proj/src/main.rs");
        assert_eq!(path.name(), "main.rs");
        assert_eq!(path.depth(), 3);
        assert_eq!(path.parent().unwrap(), p("$/Proj/src"));
        assert_eq!(p("$/Proj").parent().unwrap(), ServerPath::root());
        assert!(ServerPath::root().parent().is_none());
        assert_eq!(ServerPath::root().depth(), 0);
    }

    #[test]
    fn test_descendant_and_relative() {
        let folder = p("$/Proj/src");
        assert!(p("$/Proj/src/a.rs").is_descendant_of(&folder));
        assert!(!p("$/Proj/srcx/a.rs").is_descendant_of(&folder));
        assert!(!folder.is_descendant_of(&folder));
        assert!(folder.is_same_or_descendant_of(&folder));
        assert!(folder.is_descendant_of(&ServerPath::root()));

        assert_eq!(
            p("$/Proj/SRC/Lib/a.rs").relative_to(&folder).as_deref(),
            Some("Lib/a.rs")
        );
        assert_eq!(folder.relative_to(&folder).as_deref(), Some(""));
        assert_eq!(p("$/Other").relative_to(&folder), None);
    }

    #[test]
    fn test_rebase() {
        let moved = p("$/Proj/A/b.txt").rebase(&p("$/Proj/A"), &p("$/Proj/A2"));
        assert_eq!(moved.unwrap().as_str(), "$/Proj/A2/b.txt");
        assert!(p("$/Proj/C").rebase(&p("$/Proj/A"), &p("$/Proj/A2")).is_none());
    }

    #[test]
    fn test_wildcard_matching() {
        let pattern = ServerPath::parse_pattern("$/Proj/*.TXT").unwrap();
        assert!(p("$/Proj/readme.txt").matches(&pattern));
        assert!(!p("$/Proj/readme.md").matches(&pattern));
        assert!(!p("$/Proj/sub/readme.txt").matches(&pattern));
    }

    #[test]
    fn test_path_filter_recursion() {
        let folder = p("$/Proj");
        let none = PathFilter::new(folder.clone(), RecursionType::None);
        let one = PathFilter::new(folder.clone(), RecursionType::OneLevel);
        let full = PathFilter::new(folder.clone(), RecursionType::Full);

        let child = p("$/Proj/a.txt");
        let grandchild = p("$/Proj/sub/b.txt");

        assert!(none.matches(&folder));
        assert!(!none.matches(&child));
        assert!(one.matches(&child));
        assert!(!one.matches(&grandchild));
        assert!(full.matches(&grandchild));
        assert!(!full.matches(&p("$/Other/a.txt")));
    }

    #[test]
    fn test_path_filter_wildcard_recursion() {
        let pattern = ServerPath::parse_pattern("$/Proj/src*").unwrap();
        let filter = PathFilter::new(pattern.clone(), RecursionType::Full);
        assert_eq!(filter.query_root(), p("$/Proj"));
        assert!(filter.matches(&p("$/Proj/src2")));
        assert!(filter.matches(&p("$/Proj/src2/deep/file.rs")));
        assert!(!filter.matches(&p("$/Proj/lib/file.rs")));

        let shallow = PathFilter::new(pattern, RecursionType::None);
        assert!(!shallow.matches(&p("$/Proj/src2/file.rs")));
    }

    #[test]
    fn test_serde_as_string() {
        let path = p("$/Proj/a.txt");
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"$/Proj/a.txt\"");
        let back: ServerPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
