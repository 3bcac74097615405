//! In-memory implementation of the output filesystem capability, used by
//! tests that should not touch disk.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{parent_of, OutputFs};

#[derive(Debug, Clone, Default)]
struct MemFile {
    bytes: Vec<u8>,
    executable: bool,
}

#[derive(Debug, Default)]
struct State {
    root_created: bool,
    files: BTreeMap<String, MemFile>,
    dirs: BTreeSet<String>,
}

/// A purely in-memory output tree.
#[derive(Debug, Default)]
pub struct MemoryFs {
    state: Mutex<State>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the root, as if a prior generation or the user had
    /// left files behind.
    pub fn seed(&self, rel: &str, bytes: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().expect("memory fs lock");
        state.root_created = true;
        insert_parents(&mut state.dirs, rel);
        state.files.insert(
            rel.to_string(),
            MemFile {
                bytes: bytes.into(),
                executable: false,
            },
        );
    }

    /// Snapshot of every file, for assertions.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        let state = self.state.lock().expect("memory fs lock");
        state
            .files
            .iter()
            .map(|(k, v)| (k.clone(), v.bytes.clone()))
            .collect()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().expect("memory fs lock");
        f(&mut state)
    }
}

fn insert_parents(dirs: &mut BTreeSet<String>, rel: &str) {
    let mut current = parent_of(rel);
    while let Some(dir) = current {
        dirs.insert(dir.to_string());
        current = parent_of(dir);
    }
}

fn not_found(rel: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, rel.to_string())
}

#[async_trait]
impl OutputFs for MemoryFs {
    async fn create_root(&self) -> io::Result<bool> {
        self.with(|state| {
            if state.root_created {
                Ok(false)
            } else {
                state.root_created = true;
                Ok(true)
            }
        })
    }

    async fn root_is_empty(&self) -> io::Result<bool> {
        self.with(|state| Ok(state.files.is_empty() && state.dirs.is_empty()))
    }

    async fn create_dir_all(&self, rel: &str) -> io::Result<()> {
        self.with(|state| {
            state.dirs.insert(rel.to_string());
            insert_parents(&mut state.dirs, rel);
            Ok(())
        })
    }

    async fn write(&self, rel: &str, bytes: &[u8]) -> io::Result<()> {
        self.with(|state| {
            insert_parents(&mut state.dirs, rel);
            let executable = state
                .files
                .get(rel)
                .map(|f| f.executable)
                .unwrap_or(false);
            state.files.insert(
                rel.to_string(),
                MemFile {
                    bytes: bytes.to_vec(),
                    executable,
                },
            );
            Ok(())
        })
    }

    async fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        self.with(|state| {
            let file = state.files.remove(from).ok_or_else(|| not_found(from))?;
            insert_parents(&mut state.dirs, to);
            state.files.insert(to.to_string(), file);
            Ok(())
        })
    }

    async fn read(&self, rel: &str) -> io::Result<Vec<u8>> {
        self.with(|state| {
            state
                .files
                .get(rel)
                .map(|f| f.bytes.clone())
                .ok_or_else(|| not_found(rel))
        })
    }

    async fn exists(&self, rel: &str) -> bool {
        self.with(|state| state.files.contains_key(rel) || state.dirs.contains(rel))
    }

    async fn remove_file(&self, rel: &str) -> io::Result<()> {
        self.with(|state| {
            state.files.remove(rel).ok_or_else(|| not_found(rel))?;
            Ok(())
        })
    }

    async fn remove_dir_if_empty(&self, rel: &str) -> io::Result<bool> {
        self.with(|state| {
            if rel.is_empty() {
                // The root itself; "removing" it only makes sense when the
                // tree is empty.
                return Ok(state.files.is_empty() && state.dirs.is_empty());
            }
            if !state.dirs.contains(rel) {
                return Ok(false);
            }
            let prefix = format!("{rel}/");
            let occupied = state.files.keys().any(|f| f.starts_with(&prefix))
                || state.dirs.iter().any(|d| d.starts_with(&prefix));
            if occupied {
                return Ok(false);
            }
            state.dirs.remove(rel);
            Ok(true)
        })
    }

    async fn set_executable(&self, rel: &str, on: bool) -> io::Result<()> {
        self.with(|state| {
            let file = state.files.get_mut(rel).ok_or_else(|| not_found(rel))?;
            file.executable = on;
            Ok(())
        })
    }

    async fn is_executable(&self, rel: &str) -> io::Result<bool> {
        self.with(|state| {
            state
                .files
                .get(rel)
                .map(|f| f.executable)
                .ok_or_else(|| not_found(rel))
        })
    }

    async fn walk(&self) -> io::Result<Vec<String>> {
        self.with(|state| Ok(state.files.keys().cloned().collect()))
    }

    async fn walk_dirs(&self) -> io::Result<Vec<String>> {
        self.with(|state| Ok(state.dirs.iter().cloned().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn behaves_like_a_filesystem() {
        let fs = MemoryFs::new();
        assert!(fs.create_root().await.unwrap());
        assert!(!fs.create_root().await.unwrap());
        assert!(fs.root_is_empty().await.unwrap());

        fs.write("cmd/root.go", b"package cmd").await.unwrap();
        assert!(fs.exists("cmd").await);
        assert!(!fs.root_is_empty().await.unwrap());
        assert_eq!(fs.walk().await.unwrap(), vec!["cmd/root.go"]);
        assert_eq!(fs.walk_dirs().await.unwrap(), vec!["cmd"]);

        fs.rename("cmd/root.go", "cmd/main.go").await.unwrap();
        assert!(!fs.exists("cmd/root.go").await);
        assert_eq!(fs.read("cmd/main.go").await.unwrap(), b"package cmd");

        assert!(!fs.remove_dir_if_empty("cmd").await.unwrap());
        fs.remove_file("cmd/main.go").await.unwrap();
        assert!(fs.remove_dir_if_empty("cmd").await.unwrap());
    }

    #[tokio::test]
    async fn executable_bit_survives_overwrite() {
        let fs = MemoryFs::new();
        fs.create_root().await.unwrap();
        fs.write("run.sh", b"a").await.unwrap();
        fs.set_executable("run.sh", true).await.unwrap();
        fs.write("run.sh", b"b").await.unwrap();
        assert!(fs.is_executable("run.sh").await.unwrap());
    }

    #[tokio::test]
    async fn seeded_files_mark_root_as_pre_existing() {
        let fs = MemoryFs::new();
        fs.seed("NOTES.md", "keep me");
        assert!(!fs.create_root().await.unwrap());
        assert!(!fs.root_is_empty().await.unwrap());
    }
}
