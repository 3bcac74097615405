//! On-disk implementation of the output filesystem capability.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::OutputFs;

#[derive(Debug, Clone)]
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskFs { root: root.into() }
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }
}

#[async_trait]
impl OutputFs for DiskFs {
    async fn create_root(&self) -> io::Result<bool> {
        if let Some(parent) = self.root.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        match fs::create_dir(&self.root).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn root_is_empty(&self) -> io::Result<bool> {
        let mut entries = fs::read_dir(&self.root).await?;
        Ok(entries.next_entry().await?.is_none())
    }

    async fn create_dir_all(&self, rel: &str) -> io::Result<()> {
        fs::create_dir_all(self.resolve(rel)).await
    }

    async fn write(&self, rel: &str, bytes: &[u8]) -> io::Result<()> {
        fs::write(self.resolve(rel), bytes).await
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.resolve(from), self.resolve(to)).await
    }

    async fn read(&self, rel: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(rel)).await
    }

    async fn exists(&self, rel: &str) -> bool {
        fs::try_exists(self.resolve(rel)).await.unwrap_or(false)
    }

    async fn remove_file(&self, rel: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(rel)).await
    }

    async fn remove_dir_if_empty(&self, rel: &str) -> io::Result<bool> {
        match fs::remove_dir(self.resolve(rel)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            // ENOTEMPTY: 39 on Linux, 66 on the BSDs and macOS, 145 on
            // Windows (ERROR_DIR_NOT_EMPTY). Non-empty directories stay.
            Err(e) if matches!(e.raw_os_error(), Some(39 | 66 | 145)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn set_executable(&self, rel: &str, on: bool) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let path = self.resolve(rel);
            let metadata = fs::metadata(&path).await?;
            let mut permissions = metadata.permissions();
            let mode = permissions.mode();
            let new_mode = if on { mode | 0o111 } else { mode & !0o111 };
            permissions.set_mode(new_mode);
            fs::set_permissions(path, permissions).await
        }
        #[cfg(not(unix))]
        {
            let _ = (rel, on);
            Ok(())
        }
    }

    async fn is_executable(&self, rel: &str) -> io::Result<bool> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = fs::metadata(self.resolve(rel)).await?;
            Ok(metadata.permissions().mode() & 0o111 != 0)
        }
        #[cfg(not(unix))]
        {
            let _ = rel;
            Ok(false)
        }
    }

    async fn walk(&self) -> io::Result<Vec<String>> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || walk_sync(&root, true))
            .await
            .map_err(io::Error::other)??;
        Ok(files)
    }

    async fn walk_dirs(&self) -> io::Result<Vec<String>> {
        let root = self.root.clone();
        let dirs = tokio::task::spawn_blocking(move || walk_sync(&root, false))
            .await
            .map_err(io::Error::other)??;
        Ok(dirs)
    }

    fn disk_root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

fn walk_sync(root: &Path, want_files: bool) -> io::Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| io::Error::other("walk failed"))
        })?;
        let is_file = entry.file_type().is_file();
        if is_file == want_files {
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(io::Error::other)?
                .to_string_lossy()
                .replace('\\', "/");
            out.push(rel);
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_root_reports_prior_existence() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = DiskFs::new(tmp.path().join("out"));
        assert!(fs.create_root().await.unwrap());
        assert!(!fs.create_root().await.unwrap());
        assert!(fs.root_is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn write_walk_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = DiskFs::new(tmp.path().join("out"));
        fs.create_root().await.unwrap();
        fs.create_dir_all("cmd").await.unwrap();
        fs.write("cmd/root.go", b"package cmd\n").await.unwrap();
        fs.write("main.go", b"package main\n").await.unwrap();

        assert_eq!(fs.walk().await.unwrap(), vec!["cmd/root.go", "main.go"]);
        assert_eq!(fs.walk_dirs().await.unwrap(), vec!["cmd"]);
        assert_eq!(fs.read("cmd/root.go").await.unwrap(), b"package cmd\n");

        fs.remove_file("cmd/root.go").await.unwrap();
        assert!(fs.remove_dir_if_empty("cmd").await.unwrap());
        assert!(!fs.exists("cmd").await);
    }

    #[tokio::test]
    async fn remove_non_empty_dir_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = DiskFs::new(tmp.path().join("out"));
        fs.create_root().await.unwrap();
        fs.create_dir_all("cmd").await.unwrap();
        fs.write("cmd/root.go", b"x").await.unwrap();
        assert!(!fs.remove_dir_if_empty("cmd").await.unwrap());
        assert!(fs.exists("cmd/root.go").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn executable_bit_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = DiskFs::new(tmp.path().join("out"));
        fs.create_root().await.unwrap();
        fs.write("run.sh", b"#!/bin/sh\n").await.unwrap();
        assert!(!fs.is_executable("run.sh").await.unwrap());
        fs.set_executable("run.sh", true).await.unwrap();
        assert!(fs.is_executable("run.sh").await.unwrap());
    }

    #[tokio::test]
    async fn atomic_rename() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = DiskFs::new(tmp.path().join("out"));
        fs.create_root().await.unwrap();
        fs.write("main.go.goforge-tmp", b"package main\n").await.unwrap();
        fs.rename("main.go.goforge-tmp", "main.go").await.unwrap();
        assert!(fs.exists("main.go").await);
        assert!(!fs.exists("main.go.goforge-tmp").await);
    }
}
