//! Virtual path resolution for a shared folder.
//!
//! A virtual path is folder-relative and always begins with `/`; the
//! replicated path map uses it as its key. Absolute paths (vault-relative
//! strings, as consumed by the `FileSystem` adapter) are
//! `folder path + virtual path`.

use thiserror::Error;

/// Longest virtual path we will accept (filesystem safety).
const MAX_VPATH_LEN: usize = 1024;

#[derive(Debug, Error, PartialEq)]
pub enum PathError {
    #[error("Path is not in shared folder: {0}")]
    OutsideFolder(String),

    #[error("Invalid virtual path {path:?}: {reason}")]
    InvalidVirtualPath { path: String, reason: &'static str },
}

/// The boundary of one shared folder within the vault.
///
/// Pure translation and containment checks; no filesystem access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderBoundary {
    path: String,
}

impl FolderBoundary {
    /// Create a boundary for the folder at `path` (vault-relative, no
    /// trailing slash is stored).
    pub fn new(path: impl Into<String>) -> Self {
        let mut path = path.into();
        while path.ends_with('/') {
            path.pop();
        }
        Self { path }
    }

    /// The folder's vault-relative path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether `path` (vault-relative) lives inside this folder.
    pub fn contains(&self, path: &str) -> bool {
        path.len() > self.path.len() + 1 && path.starts_with(&self.path) && path.as_bytes()[self.path.len()] == b'/'
    }

    /// Translate a vault-relative path into this folder's virtual path.
    pub fn virtual_path(&self, path: &str) -> Result<String, PathError> {
        if !self.contains(path) {
            return Err(PathError::OutsideFolder(path.to_string()));
        }
        let vpath = path[self.path.len()..].to_string();
        validate_virtual_path(&vpath)?;
        Ok(vpath)
    }

    /// Expand a virtual path back into a vault-relative path.
    pub fn expand(&self, vpath: &str) -> String {
        format!("{}{}", self.path, vpath)
    }
}

/// Validate a virtual path received from the replicated map or a caller.
///
/// Rejecting traversal here is what guarantees `expand` can never leave the
/// folder subtree, so a corrupted map entry can be healed instead of
/// materializing a file outside the boundary.
pub fn validate_virtual_path(vpath: &str) -> Result<(), PathError> {
    let fail = |reason: &'static str| PathError::InvalidVirtualPath {
        path: vpath.to_string(),
        reason,
    };

    if vpath.is_empty() {
        return Err(fail("empty path"));
    }
    if !vpath.starts_with('/') {
        return Err(fail("must begin with a path separator"));
    }
    if vpath.len() == 1 {
        return Err(fail("missing file name"));
    }
    if vpath.len() > MAX_VPATH_LEN {
        return Err(fail("path too long"));
    }
    if vpath.contains("//") {
        return Err(fail("empty path segment"));
    }
    if vpath.contains('\\') {
        return Err(fail("backslash not allowed"));
    }
    if vpath.contains('\0') {
        return Err(fail("null byte not allowed"));
    }
    if vpath.chars().any(|c| c.is_control()) {
        return Err(fail("control character not allowed"));
    }
    if vpath.split('/').any(|segment| segment == "..") {
        return Err(fail("path traversal not allowed"));
    }
    if vpath.ends_with('/') {
        return Err(fail("missing file name"));
    }
    Ok(())
}
