//! Optional post-emission optimisation pass.
//!
//! Walks the emitted files whose kind is `source` and cleans up their
//! import sections. A file that fails to parse is recorded as an issue and
//! left intact; the pass never fails a generation.

mod imports;

use thiserror::Error;
use tracing::debug;

use crate::evaluator::FilePlan;
use crate::registry::FileKind;
use crate::verify::ValidationIssue;
use crate::vfs::OutputFs;

pub use imports::rewrite;

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("optimisation of `{path}` failed: {message}")]
    ParseFailed { path: String, message: String },
}

/// What the pass did, folded into the generation report.
#[derive(Debug, Default)]
pub struct OptimizeOutcome {
    /// Files whose bytes changed.
    pub rewritten: Vec<String>,
    /// Per-file parse failures, recorded as warnings.
    pub issues: Vec<ValidationIssue>,
}

const TMP_SUFFIX: &str = ".goforge-tmp";

/// Run the import cleanup over every committed `source` file.
pub async fn optimize_tree(
    fs: &dyn OutputFs,
    plans: &[FilePlan],
    module_path: &str,
) -> std::io::Result<OptimizeOutcome> {
    let mut outcome = OptimizeOutcome::default();

    for plan in plans {
        if plan.kind != FileKind::Source {
            continue;
        }
        let bytes = fs.read(&plan.destination).await?;
        let Ok(content) = String::from_utf8(bytes) else {
            outcome.issues.push(ValidationIssue::warning(
                "optimisation_failed",
                format!("`{}` is not valid UTF-8", plan.destination),
                Some(plan.destination.clone()),
            ));
            continue;
        };

        match imports::rewrite(&content, module_path) {
            Ok(None) => {}
            Ok(Some(rewritten)) => {
                // Same atomic discipline as generation writes.
                let tmp = format!("{}{TMP_SUFFIX}", plan.destination);
                fs.write(&tmp, rewritten.as_bytes()).await?;
                fs.rename(&tmp, &plan.destination).await?;
                debug!(path = %plan.destination, "optimised imports");
                outcome.rewritten.push(plan.destination.clone());
            }
            Err(message) => {
                outcome.issues.push(ValidationIssue::warning(
                    "optimisation_failed",
                    format!("`{}`: {message}", plan.destination),
                    Some(plan.destination.clone()),
                ));
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryFs;

    fn plan(destination: &str, kind: FileKind) -> FilePlan {
        FilePlan {
            index: 0,
            source: format!("{destination}.tmpl"),
            destination: destination.to_string(),
            kind,
            executable: false,
        }
    }

    #[tokio::test]
    async fn rewrites_source_files_only() {
        let fs = MemoryFs::new();
        fs.create_root().await.unwrap();
        fs.write(
            "main.go",
            b"package main\n\nimport (\n\t\"os\"\n\t\"fmt\"\n)\n\nfunc main() {\n\tfmt.Println(os.Args)\n}\n",
        )
        .await
        .unwrap();
        fs.write("README.md", b"docs with {{ nothing }} rendered... no: plain\n")
            .await
            .unwrap();

        let plans = vec![
            plan("main.go", FileKind::Source),
            plan("README.md", FileKind::Text),
        ];
        let outcome = optimize_tree(&fs, &plans, "example.com/mytool").await.unwrap();
        assert_eq!(outcome.rewritten, vec!["main.go"]);
        assert!(outcome.issues.is_empty());

        let main = String::from_utf8(fs.read("main.go").await.unwrap()).unwrap();
        assert!(main.find("\"fmt\"").unwrap() < main.find("\"os\"").unwrap());
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let fs = MemoryFs::new();
        fs.create_root().await.unwrap();
        fs.write(
            "main.go",
            b"package main\n\nimport (\n\t\"os\"\n\t\"fmt\"\n)\n\nfunc main() {\n\tfmt.Println(os.Args)\n}\n",
        )
        .await
        .unwrap();
        let plans = vec![plan("main.go", FileKind::Source)];

        let first = optimize_tree(&fs, &plans, "example.com/mytool").await.unwrap();
        assert_eq!(first.rewritten.len(), 1);
        let snapshot = fs.read("main.go").await.unwrap();

        let second = optimize_tree(&fs, &plans, "example.com/mytool").await.unwrap();
        assert!(second.rewritten.is_empty());
        assert_eq!(fs.read("main.go").await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn parse_failure_leaves_file_intact() {
        let fs = MemoryFs::new();
        fs.create_root().await.unwrap();
        let broken = b"// no package clause here\nimport \"fmt\"\n".to_vec();
        fs.write("broken.go", &broken).await.unwrap();

        let plans = vec![plan("broken.go", FileKind::Source)];
        let outcome = optimize_tree(&fs, &plans, "example.com/mytool").await.unwrap();
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].code, "optimisation_failed");
        assert_eq!(fs.read("broken.go").await.unwrap(), broken);
    }
}
