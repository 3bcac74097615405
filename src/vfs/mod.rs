//! Filesystem capability for the output tree.
//!
//! The orchestrator never touches `std::fs` directly; all writes go through
//! [`OutputFs`], which has a real on-disk implementation and an in-memory
//! one for tests. Every path handed to the trait is output-root-relative
//! and already normalised via [`clean_rel_path`].

mod disk;
mod memory;

use std::io;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub use disk::DiskFs;
pub use memory::MemoryFs;

/// Why a path was refused by [`clean_rel_path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathViolation {
    #[error("path is empty")]
    Empty,
    #[error("path is absolute")]
    Absolute,
    #[error("path contains a `..` segment")]
    ParentEscape,
    #[error("path contains a backslash")]
    Backslash,
}

/// Normalise an output-root-relative path.
///
/// Collapses `.` segments and duplicate separators; rejects absolute
/// paths, backslashes, and anything containing a `..` segment, so the
/// result can never escape the root it is joined to.
pub fn clean_rel_path(path: &str) -> Result<String, PathViolation> {
    if path.contains('\\') {
        return Err(PathViolation::Backslash);
    }
    if path.starts_with('/') {
        return Err(PathViolation::Absolute);
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(PathViolation::ParentEscape),
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(PathViolation::Empty);
    }
    Ok(segments.join("/"))
}

/// Parent directory of a cleaned relative path, if any.
pub fn parent_of(rel: &str) -> Option<&str> {
    rel.rfind('/').map(|i| &rel[..i])
}

/// Async access to one output root.
#[async_trait]
pub trait OutputFs: Send + Sync {
    /// Create the output root itself. `Ok(true)` when this call created it,
    /// `Ok(false)` when it already existed. The create is a single
    /// operation, so two concurrent generations cannot both see `true`.
    async fn create_root(&self) -> io::Result<bool>;

    async fn root_is_empty(&self) -> io::Result<bool>;

    async fn create_dir_all(&self, rel: &str) -> io::Result<()>;

    async fn write(&self, rel: &str, bytes: &[u8]) -> io::Result<()>;

    async fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    async fn read(&self, rel: &str) -> io::Result<Vec<u8>>;

    async fn exists(&self, rel: &str) -> bool;

    async fn remove_file(&self, rel: &str) -> io::Result<()>;

    /// `Ok(true)` when the directory (or the root, for `""`) was removed.
    async fn remove_dir_if_empty(&self, rel: &str) -> io::Result<bool>;

    async fn set_executable(&self, rel: &str, on: bool) -> io::Result<()>;

    async fn is_executable(&self, rel: &str) -> io::Result<bool>;

    /// All files under the root, relative, sorted.
    async fn walk(&self) -> io::Result<Vec<String>>;

    /// All directories under the root (excluding the root), sorted.
    async fn walk_dirs(&self) -> io::Result<Vec<String>>;

    /// Real path of the root when the tree lives on disk; process-spawning
    /// hooks need it as a working directory.
    fn disk_root(&self) -> Option<&Path> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_paths() {
        assert_eq!(clean_rel_path("cmd/root.go").unwrap(), "cmd/root.go");
        assert_eq!(clean_rel_path("./a//b/./c").unwrap(), "a/b/c");
        assert_eq!(clean_rel_path("a/").unwrap(), "a");
    }

    #[test]
    fn rejected_paths() {
        assert_eq!(clean_rel_path(""), Err(PathViolation::Empty));
        assert_eq!(clean_rel_path("."), Err(PathViolation::Empty));
        assert_eq!(clean_rel_path("/etc/passwd"), Err(PathViolation::Absolute));
        assert_eq!(clean_rel_path("a/../b"), Err(PathViolation::ParentEscape));
        assert_eq!(clean_rel_path(".."), Err(PathViolation::ParentEscape));
        assert_eq!(clean_rel_path("a\\b"), Err(PathViolation::Backslash));
    }

    #[test]
    fn parents() {
        assert_eq!(parent_of("cmd/root.go"), Some("cmd"));
        assert_eq!(parent_of("main.go"), None);
        assert_eq!(parent_of("a/b/c"), Some("a/b"));
    }
}
