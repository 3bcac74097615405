//! Write ordering.
//!
//! Emission order is observable to hooks: directories before their
//! contents, rendered text before binary within a directory, and the
//! module manifest last in its directory.

use std::collections::BTreeSet;

use crate::evaluator::FilePlan;
use crate::registry::FileKind;
use crate::vfs::parent_of;

/// One entry in the committer's ordered work list.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderedWrite {
    /// Index into the expanded file plans.
    File(usize),
    /// The synthesised module manifest.
    ModuleManifest,
}

fn dir_of(path: &str) -> &str {
    parent_of(path).unwrap_or("")
}

fn depth(dir: &str) -> usize {
    if dir.is_empty() {
        0
    } else {
        dir.matches('/').count() + 1
    }
}

/// Every directory needed by the plans, parents before children.
pub fn ordered_dirs(plans: &[FilePlan]) -> Vec<String> {
    let mut dirs: BTreeSet<String> = BTreeSet::new();
    for plan in plans {
        let mut current = parent_of(&plan.destination);
        while let Some(dir) = current {
            dirs.insert(dir.to_string());
            current = parent_of(dir);
        }
    }
    let mut ordered: Vec<String> = dirs.into_iter().collect();
    ordered.sort_by(|a, b| depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)));
    ordered
}

/// The committer's work list. `manifest_dir` is the directory of the
/// synthesised module manifest (the root), or `None` when no manifest is
/// emitted.
pub fn ordered_writes(plans: &[FilePlan], emit_manifest: bool) -> Vec<OrderedWrite> {
    let mut indices: Vec<usize> = (0..plans.len()).collect();
    indices.sort_by(|&a, &b| {
        let (pa, pb) = (&plans[a], &plans[b]);
        let (da, db) = (dir_of(&pa.destination), dir_of(&pb.destination));
        depth(da)
            .cmp(&depth(db))
            .then_with(|| da.cmp(db))
            .then_with(|| class(pa.kind).cmp(&class(pb.kind)))
            .then(a.cmp(&b))
    });

    let mut writes: Vec<OrderedWrite> = Vec::with_capacity(indices.len() + 1);
    let mut manifest_emitted = false;
    for index in indices {
        // The manifest lands in the root directory, after every other root
        // file and before deeper directories' files would not matter; it is
        // simply appended once all root-dir files are out.
        if emit_manifest && !manifest_emitted && dir_of(&plans[index].destination) != "" {
            // Root files are ordered first (depth 0), so the first deeper
            // file means the root directory is finished.
            writes.push(OrderedWrite::ModuleManifest);
            manifest_emitted = true;
        }
        writes.push(OrderedWrite::File(index));
    }
    if emit_manifest && !manifest_emitted {
        writes.push(OrderedWrite::ModuleManifest);
    }
    writes
}

/// Rendered text sorts before verbatim copies within a directory.
fn class(kind: FileKind) -> u8 {
    match kind {
        FileKind::Text | FileKind::Source => 0,
        FileKind::Binary | FileKind::Script => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(destination: &str, kind: FileKind) -> FilePlan {
        FilePlan {
            index: 0,
            source: format!("{destination}.tmpl"),
            destination: destination.to_string(),
            kind,
            executable: false,
        }
    }

    #[test]
    fn dirs_come_parents_first() {
        let plans = vec![
            plan("cmd/sub/deep.go", FileKind::Source),
            plan("cmd/root.go", FileKind::Source),
            plan("internal/db/db.go", FileKind::Source),
        ];
        assert_eq!(
            ordered_dirs(&plans),
            vec!["cmd", "internal", "cmd/sub", "internal/db"]
        );
    }

    #[test]
    fn text_before_binary_within_a_directory() {
        let plans = vec![
            plan("assets/logo.png", FileKind::Binary),
            plan("assets/readme.txt", FileKind::Text),
            plan("main.go", FileKind::Source),
        ];
        let writes = ordered_writes(&plans, false);
        assert_eq!(
            writes,
            vec![
                OrderedWrite::File(2),
                OrderedWrite::File(1),
                OrderedWrite::File(0),
            ]
        );
    }

    #[test]
    fn module_manifest_is_last_in_the_root() {
        let plans = vec![
            plan("main.go", FileKind::Source),
            plan("cmd/root.go", FileKind::Source),
        ];
        let writes = ordered_writes(&plans, true);
        assert_eq!(
            writes,
            vec![
                OrderedWrite::File(0),
                OrderedWrite::ModuleManifest,
                OrderedWrite::File(1),
            ]
        );
    }

    #[test]
    fn manifest_alone_is_still_emitted() {
        let writes = ordered_writes(&[], true);
        assert_eq!(writes, vec![OrderedWrite::ModuleManifest]);
    }
}
