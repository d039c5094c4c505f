//! Three-way merge engine.
//!
//! Uses the `diffy` crate to perform line-based three-way merges between a
//! base, "yours" (the local file), and "theirs" (the server version).

use tracing::{debug, info};

use crate::conflict::model::EncodingStrategy;
use crate::encoding::FileEncoding;
use crate::errors::ConflictError;

const YOURS_MARKER: &str = "<<<<<<< yours";
const BASE_MARKER: &str = "||||||| base";
const SEPARATOR: &str = "=======";
const THEIRS_MARKER: &str = ">>>>>>> theirs";

/// The result of a three-way merge attempt.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The merged content (may contain conflict markers if `has_conflicts` is true).
    pub merged_content: String,
    /// Whether the merge left conflicting regions behind.
    pub has_conflicts: bool,
    /// Locations of conflict markers within the merged content.
    pub conflict_markers: Vec<ConflictMarker>,
}

impl MergeResult {
    fn clean(content: &str) -> Self {
        Self {
            merged_content: content.to_string(),
            has_conflicts: false,
            conflict_markers: Vec::new(),
        }
    }
}

/// A single conflict region within merged output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictMarker {
    /// Starting line number (1-indexed) of the conflict marker block.
    pub start_line: usize,
    /// Ending line number (1-indexed) of the conflict marker block.
    pub end_line: usize,
}

/// One side of a merge as raw bytes in a known encoding.
#[derive(Debug, Clone, Copy)]
pub struct MergeSide<'a> {
    pub content: &'a [u8],
    pub encoding: FileEncoding,
}

impl<'a> MergeSide<'a> {
    pub fn new(content: &'a [u8], encoding: FileEncoding) -> Self {
        Self { content, encoding }
    }
}

/// Merged bytes ready to be written back to disk.
#[derive(Debug, Clone)]
pub struct ContentMerge {
    pub content: Vec<u8>,
    pub encoding: FileEncoding,
    pub has_conflicts: bool,
    pub conflict_markers: Vec<ConflictMarker>,
}

/// Stateless three-way merge engine.
pub struct Merger;

impl Merger {
    /// Attempt a three-way merge of `base`, `yours`, and `theirs`.
    ///
    /// Always returns merged content. When regions conflict, they are wrapped
    /// in `<<<<<<< yours` / `||||||| base` / `=======` / `>>>>>>> theirs`
    /// markers and `has_conflicts` is set.
    pub fn three_way_merge(
        base: &str,
        yours: &str,
        theirs: &str,
    ) -> Result<MergeResult, ConflictError> {
        info!("performing three-way merge");

        // Fast path: if either side is identical to base, the other side wins cleanly.
        if yours == base {
            debug!("yours == base, theirs wins cleanly");
            return Ok(MergeResult::clean(theirs));
        }
        if theirs == base {
            debug!("theirs == base, yours wins cleanly");
            return Ok(MergeResult::clean(yours));
        }

        // Fast path: both sides made the exact same change.
        if yours == theirs {
            debug!("yours == theirs, identical changes");
            return Ok(MergeResult::clean(yours));
        }

        match diffy::merge(base, yours, theirs) {
            Ok(merged) => {
                debug!("clean merge");
                Ok(MergeResult::clean(&merged))
            }
            Err(conflicted) => {
                let merged_content = relabel_markers(&conflicted);
                let conflict_markers = find_conflict_regions(&merged_content);
                debug!(regions = conflict_markers.len(), "merge left conflicts");
                Ok(MergeResult {
                    merged_content,
                    has_conflicts: true,
                    conflict_markers,
                })
            }
        }
    }

    /// Merge raw file content, reconciling encodings according to `strategy`.
    ///
    /// Binary content is never merged.
    pub fn merge_content(
        base: MergeSide<'_>,
        yours: MergeSide<'_>,
        theirs: MergeSide<'_>,
        strategy: EncodingStrategy,
    ) -> Result<ContentMerge, ConflictError> {
        let (read_as, output): ([FileEncoding; 3], FileEncoding) = match strategy {
            EncodingStrategy::Default => {
                if base.encoding != yours.encoding || yours.encoding != theirs.encoding {
                    return Err(ConflictError::MergeFailed(format!(
                        "encodings differ (base {}, yours {}, theirs {}); choose an encoding to override or convert to",
                        base.encoding, yours.encoding, theirs.encoding
                    )));
                }
                ([yours.encoding; 3], yours.encoding)
            }
            EncodingStrategy::OverrideExplicit(encoding) => ([encoding; 3], encoding),
            EncodingStrategy::ConvertExplicit(encoding) => (
                [base.encoding, yours.encoding, theirs.encoding],
                encoding,
            ),
        };

        if output.is_binary() || read_as.iter().any(|e| e.is_binary()) {
            return Err(ConflictError::MergeFailed(
                "binary files cannot be merged".into(),
            ));
        }

        let decode = |side: MergeSide<'_>, encoding: FileEncoding, label: &str| {
            encoding
                .decode(side.content)
                .map_err(|e| ConflictError::MergeFailed(format!("{label}: {e}")))
        };
        let base_text = decode(base, read_as[0], "base")?;
        let your_text = decode(yours, read_as[1], "yours")?;
        let their_text = decode(theirs, read_as[2], "theirs")?;

        let result = Self::three_way_merge(&base_text, &your_text, &their_text)?;
        let content = output
            .encode(&result.merged_content)
            .map_err(|e| ConflictError::MergeFailed(e.to_string()))?;

        Ok(ContentMerge {
            content,
            encoding: output,
            has_conflicts: result.has_conflicts,
            conflict_markers: result.conflict_markers,
        })
    }
}

/// Rewrite diffy's `ours` / `original` labels to the workspace vocabulary.
fn relabel_markers(conflicted: &str) -> String {
    conflicted
        .split_inclusive('\n')
        .map(|line| {
            let body = line.trim_end_matches(['\r', '\n']);
            let ending = &line[body.len()..];
            let replacement = match body {
                "<<<<<<< ours" => YOURS_MARKER,
                "||||||| original" => BASE_MARKER,
                ">>>>>>> theirs" => THEIRS_MARKER,
                _ => return line.to_string(),
            };
            format!("{replacement}{ending}")
        })
        .collect()
}

fn find_conflict_regions(merged: &str) -> Vec<ConflictMarker> {
    let mut markers = Vec::new();
    let mut start = None;
    for (index, line) in merged.lines().enumerate() {
        if line == YOURS_MARKER {
            start = Some(index + 1);
        } else if line == THEIRS_MARKER {
            if let Some(start_line) = start.take() {
                markers.push(ConflictMarker {
                    start_line,
                    end_line: index + 1,
                });
            }
        }
    }
    markers
}

/// Whether `content` still carries unresolved merge markers.
pub fn has_conflict_markers(content: &str) -> bool {
    content
        .lines()
        .any(|l| l == YOURS_MARKER || l == SEPARATOR || l == THEIRS_MARKER)
}
