//! Read-only blueprint source filesystems.
//!
//! A source's root contains one subdirectory per blueprint, each holding a
//! `template.yaml` manifest and a tree of template files. The builtin
//! blueprint set is compiled into the binary; on-disk trees and in-memory
//! maps cover external blueprint directories and tests.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use rust_embed::RustEmbed;

/// Read-only access to a blueprint tree.
///
/// Paths use `/` separators and are relative to the blueprint directory.
/// Listings are sorted so registry declaration order is deterministic.
pub trait BlueprintSource: Send + Sync {
    /// Names of the blueprint subdirectories at the source root.
    fn blueprint_dirs(&self) -> io::Result<Vec<String>>;

    /// All file paths under one blueprint directory.
    fn list_files(&self, dir: &str) -> io::Result<Vec<String>>;

    fn read(&self, dir: &str, rel: &str) -> io::Result<Vec<u8>>;
}

fn not_found(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, what.to_string())
}

// ---------------------------------------------------------------------------
// Builtin, compiled-in blueprints
// ---------------------------------------------------------------------------

#[derive(RustEmbed)]
#[folder = "blueprints/"]
struct BuiltinAssets;

/// The blueprint set shipped with the crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedSource;

impl EmbeddedSource {
    pub fn new() -> Self {
        EmbeddedSource
    }
}

impl BlueprintSource for EmbeddedSource {
    fn blueprint_dirs(&self) -> io::Result<Vec<String>> {
        let mut dirs: Vec<String> = BuiltinAssets::iter()
            .filter_map(|path| path.split('/').next().map(str::to_string))
            .collect();
        dirs.sort();
        dirs.dedup();
        Ok(dirs)
    }

    fn list_files(&self, dir: &str) -> io::Result<Vec<String>> {
        let prefix = format!("{dir}/");
        let mut files: Vec<String> = BuiltinAssets::iter()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .collect();
        if files.is_empty() {
            return Err(not_found(dir));
        }
        files.sort();
        Ok(files)
    }

    fn read(&self, dir: &str, rel: &str) -> io::Result<Vec<u8>> {
        let path = format!("{dir}/{rel}");
        BuiltinAssets::get(&path)
            .map(|f| f.data.into_owned())
            .ok_or_else(|| not_found(&path))
    }
}

// ---------------------------------------------------------------------------
// On-disk blueprint trees
// ---------------------------------------------------------------------------

/// A blueprint tree rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskSource {
    root: PathBuf,
}

impl DiskSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskSource { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlueprintSource for DiskSource {
    fn blueprint_dirs(&self) -> io::Result<Vec<String>> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn list_files(&self, dir: &str) -> io::Result<Vec<String>> {
        let base = self.root.join(dir);
        if !base.is_dir() {
            return Err(not_found(dir));
        }
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::other("walk failed"))
            })?;
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(&base)
                    .map_err(io::Error::other)?;
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        files.sort();
        Ok(files)
    }

    fn read(&self, dir: &str, rel: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.root.join(dir).join(rel))
    }
}

// ---------------------------------------------------------------------------
// In-memory source for tests
// ---------------------------------------------------------------------------

/// An in-memory blueprint tree. Insertion is `dir`-plus-relative-path;
/// listings come back sorted like the other sources.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, dir: &str, rel: &str, content: impl Into<Vec<u8>>) -> &mut Self {
        self.files.insert(format!("{dir}/{rel}"), content.into());
        self
    }
}

impl BlueprintSource for MemorySource {
    fn blueprint_dirs(&self) -> io::Result<Vec<String>> {
        let mut dirs: Vec<String> = self
            .files
            .keys()
            .filter_map(|path| path.split('/').next().map(str::to_string))
            .collect();
        dirs.dedup();
        Ok(dirs)
    }

    fn list_files(&self, dir: &str) -> io::Result<Vec<String>> {
        let prefix = format!("{dir}/");
        let files: Vec<String> = self
            .files
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .collect();
        if files.is_empty() {
            return Err(not_found(dir));
        }
        Ok(files)
    }

    fn read(&self, dir: &str, rel: &str) -> io::Result<Vec<u8>> {
        let path = format!("{dir}/{rel}");
        self.files
            .get(&path)
            .cloned()
            .ok_or_else(|| not_found(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_round_trip() {
        let mut src = MemorySource::new();
        src.add("bp", "template.yaml", "id: bp")
            .add("bp", "files/main.go.tmpl", "package main")
            .add("other", "template.yaml", "id: other");

        assert_eq!(src.blueprint_dirs().unwrap(), vec!["bp", "other"]);
        assert_eq!(
            src.list_files("bp").unwrap(),
            vec!["files/main.go.tmpl", "template.yaml"]
        );
        assert_eq!(src.read("bp", "template.yaml").unwrap(), b"id: bp");
        assert!(src.read("bp", "missing").is_err());
        assert!(src.list_files("nope").is_err());
    }

    #[test]
    fn embedded_source_carries_builtin_blueprints() {
        let src = EmbeddedSource::new();
        let dirs = src.blueprint_dirs().unwrap();
        assert!(dirs.contains(&"cli-simple".to_string()));
        assert!(dirs.contains(&"web-api".to_string()));
        assert!(src.read("cli-simple", "template.yaml").is_ok());
    }
}
