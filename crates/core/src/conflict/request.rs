//! Validation of resolve requests before any conflict is touched.

use serde::{Deserialize, Serialize};

use crate::conflict::model::{Conflict, EncodingStrategy, Resolution, ResolutionOptions};
use crate::errors::ConflictError;
use crate::models::{ItemSpec, ItemType};

/// What the caller asked `resolve` to do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveRequest {
    /// Items whose conflicts to resolve; empty means the whole workspace.
    pub filters: Vec<ItemSpec>,
    pub resolution: Resolution,
    pub options: ResolutionOptions,
    /// Report what would be resolved without changing anything.
    #[serde(default)]
    pub preview: bool,
}

impl ResolveRequest {
    pub fn new(filters: Vec<ItemSpec>, resolution: Resolution) -> Self {
        Self {
            filters,
            resolution,
            options: ResolutionOptions::default(),
            preview: false,
        }
    }

    pub fn with_options(mut self, options: ResolutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Check the request on its own, before querying any conflicts.
    pub fn validate(&self) -> Result<(), ConflictError> {
        let invalid = |msg: &str| Err(ConflictError::InvalidRequest(msg.to_string()));

        if self.resolution == Resolution::None {
            return invalid("a resolution must be chosen for automatic resolution");
        }

        if let Some(new_path) = &self.options.new_path {
            if !matches!(
                self.resolution,
                Resolution::AcceptMerge | Resolution::AcceptYoursRenameTheirs
            ) {
                return invalid(
                    "a new name can only be given with accept-merge or accept-yours-rename-theirs",
                );
            }
            if new_path.has_wildcard() {
                return Err(ConflictError::InvalidRequest(format!(
                    "the new name '{new_path}' must not contain wildcards"
                )));
            }
        } else if self.resolution == Resolution::AcceptYoursRenameTheirs {
            return invalid("accept-yours-rename-theirs requires a new name for their item");
        }

        if self.options.accept_merge_with_conflicts && !self.resolution.merges_content() {
            return invalid(
                "accepting a merge with conflicts is only valid with accept-merge or external-tool",
            );
        }

        if self.options.encoding != EncodingStrategy::Default && !self.resolution.merges_content() {
            return invalid("an encoding can only be chosen for accept-merge or external-tool");
        }

        Ok(())
    }

    /// Check the request against the conflicts it would apply to.
    pub fn validate_targets(&self, conflicts: &[Conflict]) -> Result<(), ConflictError> {
        if self.options.new_path.is_some() && conflicts.len() != 1 {
            return Err(ConflictError::NewNameRequiresSingleConflict(conflicts.len()));
        }
        Ok(())
    }

    /// Symbolic links cannot have their content merged; this is an error,
    /// not a silent skip.
    pub fn check_compatible(&self, conflict: &Conflict) -> Result<(), ConflictError> {
        if conflict.item_type == ItemType::Symlink
            && !matches!(
                self.resolution,
                Resolution::AcceptYours | Resolution::AcceptTheirs | Resolution::OverwriteLocal
            )
        {
            return Err(ConflictError::InvalidRequest(format!(
                "{} is a symbolic link; only accept-yours, accept-theirs or overwrite-local apply",
                conflict.your_server_item
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::model::ConflictType;
    use crate::encoding::FileEncoding;
    use crate::models::RecursionType;
    use crate::paths::ServerPath;

    fn request(resolution: Resolution) -> ResolveRequest {
        ResolveRequest::new(vec![ItemSpec::new("$/P", RecursionType::Full)], resolution)
    }

    fn new_path(s: &str) -> Option<ServerPath> {
        Some(ServerPath::parse_pattern(s).unwrap())
    }

    #[test]
    fn test_none_resolution_rejected() {
        assert!(request(Resolution::None).validate().is_err());
        assert!(request(Resolution::AcceptTheirs).validate().is_ok());
    }

    #[test]
    fn test_new_path_only_with_merge_or_rename_theirs() {
        let mut req = request(Resolution::AcceptTheirs);
        req.options.new_path = new_path("$/P/renamed.txt");
        assert!(req.validate().is_err());

        req.resolution = Resolution::AcceptMerge;
        assert!(req.validate().is_ok());

        req.resolution = Resolution::AcceptYoursRenameTheirs;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_rename_theirs_requires_new_path() {
        assert!(request(Resolution::AcceptYoursRenameTheirs).validate().is_err());
    }

    #[test]
    fn test_new_path_rejects_wildcards() {
        let mut req = request(Resolution::AcceptMerge);
        req.options.new_path = new_path("$/P/*.txt");
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("wildcards"));
    }

    #[test]
    fn test_force_only_with_content_merge() {
        let mut req = request(Resolution::AcceptYours);
        req.options.accept_merge_with_conflicts = true;
        assert!(req.validate().is_err());
        req.resolution = Resolution::AcceptMerge;
        assert!(req.validate().is_ok());
        req.resolution = Resolution::ExternalTool;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_encoding_only_with_content_merge() {
        let mut req = request(Resolution::AcceptTheirs);
        req.options.encoding = EncodingStrategy::ConvertExplicit(FileEncoding::UTF8);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_new_path_needs_exactly_one_conflict() {
        let mut req = request(Resolution::AcceptMerge);
        req.options.new_path = new_path("$/P/x.txt");
        let c = Conflict::new(
            ConflictType::Content,
            ItemType::File,
            ServerPath::parse("$/P/a.txt").unwrap(),
        );
        assert!(req.validate_targets(&[c.clone()]).is_ok());
        assert!(matches!(
            req.validate_targets(&[c.clone(), c]),
            Err(ConflictError::NewNameRequiresSingleConflict(2))
        ));
    }

    #[test]
    fn test_symlink_rejects_merge() {
        let link = Conflict::new(
            ConflictType::Content,
            ItemType::Symlink,
            ServerPath::parse("$/P/link").unwrap(),
        );
        assert!(request(Resolution::AcceptMerge).check_compatible(&link).is_err());
        assert!(request(Resolution::ExternalTool).check_compatible(&link).is_err());
        assert!(request(Resolution::DeleteConflict).check_compatible(&link).is_err());
        assert!(request(Resolution::AcceptTheirs).check_compatible(&link).is_ok());
        assert!(request(Resolution::OverwriteLocal).check_compatible(&link).is_ok());
    }
}
