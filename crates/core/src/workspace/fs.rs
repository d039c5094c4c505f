//! Local file operations used by workspace commands.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::WorkspaceError;
use crate::repository::content_hash;

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, WorkspaceError> {
    std::fs::read(path).map_err(|e| WorkspaceError::io(path, e))
}

/// Write `content`, creating parent directories as needed.
pub(crate) fn write_file(path: &Path, content: &[u8]) -> Result<(), WorkspaceError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    std::fs::write(path, content).map_err(|e| WorkspaceError::io(path, e))?;
    debug!(path = %path.display(), bytes = content.len(), "wrote local file");
    Ok(())
}

pub(crate) fn ensure_dir(path: &Path) -> Result<(), WorkspaceError> {
    std::fs::create_dir_all(path).map_err(|e| WorkspaceError::io(path, e))
}

/// Remove a file, or a directory if it is empty. Missing paths are fine;
/// a directory that still holds untracked files is left in place.
pub(crate) fn remove_item(path: &Path) -> Result<(), WorkspaceError> {
    let result = if path.is_dir() {
        std::fs::remove_dir(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => {
            debug!(path = %path.display(), "removed local item");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) if path.is_dir() => {
            warn!(path = %path.display(), error = %e, "directory not removed");
            Ok(())
        }
        Err(e) => Err(WorkspaceError::io(path, e)),
    }
}

/// Move a file or directory. When the source is gone but the destination
/// exists the move has already happened.
pub(crate) fn move_item(from: &Path, to: &Path) -> Result<(), WorkspaceError> {
    if from == to {
        return Ok(());
    }
    if !from.exists() {
        if to.exists() {
            return Ok(());
        }
        return Err(WorkspaceError::io(
            from,
            std::io::Error::new(ErrorKind::NotFound, "source does not exist"),
        ));
    }
    if let Some(parent) = to.parent() {
        ensure_dir(parent)?;
    }
    std::fs::rename(from, to).map_err(|e| WorkspaceError::io(from, e))?;
    debug!(from = %from.display(), to = %to.display(), "moved local item");
    Ok(())
}

/// Content hash of a local file, `None` when it does not exist.
pub(crate) fn file_hash(path: &Path) -> Result<Option<String>, WorkspaceError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(content_hash(&bytes))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WorkspaceError::io(path, e)),
    }
}

/// Every file and directory below `root`, parents before children.
pub(crate) fn walk(root: &Path) -> Result<Vec<PathBuf>, WorkspaceError> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| WorkspaceError::io(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| WorkspaceError::io(&dir, e))?.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            found.push(path);
        }
    }
    found.sort_by_key(|p| p.components().count());
    Ok(found)
}

/// Local files as they were before an operation that may have to be
/// undone. Folders are not captured.
pub(crate) struct FileBackup {
    files: Vec<(PathBuf, Option<Vec<u8>>)>,
}

impl FileBackup {
    pub(crate) fn capture(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut files: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::new();
        for path in paths {
            if path.is_dir() || files.iter().any(|(p, _)| p == &path) {
                continue;
            }
            let bytes = std::fs::read(&path).ok();
            files.push((path, bytes));
        }
        Self { files }
    }

    /// Put every captured file back. A file that did not exist before is
    /// removed again.
    pub(crate) fn restore(self) {
        for (path, bytes) in self.files {
            let result = match bytes {
                Some(bytes) => write_file(&path, &bytes),
                None if path.is_file() => remove_item(&path),
                None => Ok(()),
            };
            match result {
                Ok(()) => debug!(path = %path.display(), "restored local file"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not restore local file"),
            }
        }
    }
}
